//! Benchmark catalog: named instance sets, greedy ordering groups, tier names
//! and remote datasets.
//!
//! The built-in catalog is embedded at compile time and parsed once into
//! process-wide immutable state; nothing mutates it afterwards.

use crate::batch::{AlgorithmParams, BatchGroup};
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const BUILTIN_CATALOG: &str = include_str!("catalog.yaml");

static BUILTIN: OnceLock<Catalog> = OnceLock::new();

/// One problem input: a path relative to the data directory plus the format
/// tag the solver needs to parse it. Identified by its path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceRef {
    pub path: String,
    pub format: String,
}

impl InstanceRef {
    pub fn new(path: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            format: format.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Catalog {
    pub instance_sets: BTreeMap<String, InstanceSet>,
    #[serde(default)]
    pub greedy_groups: Vec<GreedyGroupDef>,
    #[serde(default)]
    pub tiers: Vec<String>,
    #[serde(default)]
    pub datasets: Vec<DatasetDef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceSet {
    pub format: String,
    pub instances: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GreedyGroupDef {
    pub name: String,
    pub directory: String,
    pub instance_set: String,
    pub algorithm: String,
    #[serde(default)]
    pub ordering: Option<String>,
    #[serde(default)]
    pub reverse: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetDef {
    pub tag: String,
    pub remote_id: String,
    /// Top-level directory the archive extracts to.
    pub directory: String,
    #[serde(default)]
    pub default: bool,
}

impl Catalog {
    /// The embedded catalog, parsed on first use.
    pub fn builtin() -> Result<&'static Catalog> {
        if let Some(catalog) = BUILTIN.get() {
            return Ok(catalog);
        }
        let parsed = Catalog::from_yaml_str(BUILTIN_CATALOG).context("embedded catalog")?;
        Ok(BUILTIN.get_or_init(|| parsed))
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let catalog: Catalog = serde_yaml::from_str(raw)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            fs::read_to_string(path).with_context(|| format!("read catalog {}", path.display()))?;
        Self::from_yaml_str(&raw).with_context(|| format!("parse catalog {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        let mut names = BTreeSet::new();
        for group in &self.greedy_groups {
            if !names.insert(group.name.as_str()) {
                errors.push(format!("duplicate greedy group '{}'", group.name));
            }
            if !self.instance_sets.contains_key(&group.instance_set) {
                errors.push(format!(
                    "greedy group '{}' references unknown instance set '{}'",
                    group.name, group.instance_set
                ));
            }
        }
        for tier in &self.tiers {
            if !self.instance_sets.contains_key(tier) {
                errors.push(format!("tier '{}' has no instance set", tier));
            }
        }
        let mut tags = BTreeSet::new();
        for dataset in &self.datasets {
            if !tags.insert(dataset.tag.as_str()) {
                errors.push(format!("duplicate dataset tag '{}'", dataset.tag));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("invalid catalog:\n  {}", errors.join("\n  ")))
        }
    }

    pub fn instances(&self, set: &str) -> Result<Vec<InstanceRef>> {
        let def = self
            .instance_sets
            .get(set)
            .ok_or_else(|| anyhow!("unknown instance set '{}'", set))?;
        Ok(def
            .instances
            .iter()
            .map(|p| InstanceRef::new(p.clone(), def.format.clone()))
            .collect())
    }

    pub fn has_tier(&self, tier: &str) -> bool {
        self.tiers.iter().any(|t| t == tier)
    }

    /// Batch groups for the greedy ordering comparison, writing JSON outputs
    /// below `directory/<group directory>/`.
    pub fn greedy_batch_groups(&self, directory: &Path) -> Result<Vec<BatchGroup>> {
        self.greedy_groups
            .iter()
            .map(|def| {
                Ok(BatchGroup {
                    name: def.name.clone(),
                    output_dir: directory.join(&def.directory),
                    instances: self.instances(&def.instance_set)?,
                    params: AlgorithmParams {
                        algorithm: def.algorithm.clone(),
                        ordering: def.ordering.clone(),
                        reverse: def.reverse,
                        time_limit: None,
                    },
                    write_certificate: false,
                })
            })
            .collect()
    }

    /// Batch group running `algorithm` on every instance of `tier`, with
    /// certificates, below [`tier_output_dir`].
    pub fn tier_batch_group(
        &self,
        tier: &str,
        algorithm: &str,
        time_limit: Option<f64>,
        output_root: &Path,
    ) -> Result<BatchGroup> {
        if !self.has_tier(tier) {
            return Err(anyhow!(
                "unknown tier '{}' (known: {})",
                tier,
                self.tiers.join(", ")
            ));
        }
        Ok(BatchGroup {
            name: tier.to_string(),
            output_dir: tier_output_dir(output_root, algorithm, time_limit, tier),
            instances: self.instances(tier)?,
            params: AlgorithmParams {
                algorithm: algorithm.to_string(),
                ordering: None,
                reverse: false,
                time_limit,
            },
            write_certificate: true,
        })
    }

    pub fn dataset(&self, tag: &str) -> Option<&DatasetDef> {
        self.datasets.iter().find(|d| d.tag == tag)
    }

    pub fn default_datasets(&self) -> impl Iterator<Item = &DatasetDef> + '_ {
        self.datasets.iter().filter(|d| d.default)
    }
}

/// `<output_root>/<algorithm>[ | <time limit>]/<tier>`
pub fn tier_output_dir(
    output_root: &Path,
    algorithm: &str,
    time_limit: Option<f64>,
    tier: &str,
) -> PathBuf {
    let run_name = match time_limit {
        Some(limit) => format!("{} | {}", algorithm, limit),
        None => algorithm.to_string(),
    };
    output_root.join(run_name).join(tier)
}
