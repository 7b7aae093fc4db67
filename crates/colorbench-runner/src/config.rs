//! Workspace configuration, read from an optional `bench.yaml`.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! usable configuration. Paths are interpreted relative to the working
//! directory the tool is launched from.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BenchConfig {
    pub solver: SolverConfig,
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Holds the reusable certificate/JSON pair of the optimal filter.
    pub scratch_dir: PathBuf,
    /// Manifest file name, relative to `data_dir`.
    pub manifest: String,
    pub filter: FilterConfig,
    pub seven_zip: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolverConfig {
    pub path: PathBuf,
    pub verbosity_level: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterConfig {
    pub time_limit: f64,
    pub format: String,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            solver: SolverConfig::default(),
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("output"),
            scratch_dir: PathBuf::from("."),
            manifest: "test_all.txt".to_string(),
            filter: FilterConfig::default(),
            seven_zip: PathBuf::from("7z"),
        }
    }
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("install").join("bin").join("coloringsolver"),
            verbosity_level: 1,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            time_limit: 1.0,
            format: "snap".to_string(),
        }
    }
}

impl BenchConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
        Self::from_yaml_str(&raw).with_context(|| format!("parse config {}", path.display()))
    }

    /// Loads `path` when given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.data_dir.join(&self.manifest)
    }

    fn validate(&self) -> Result<()> {
        if !(self.filter.time_limit.is_finite() && self.filter.time_limit > 0.0) {
            anyhow::bail!(
                "filter.time_limit must be a positive number (got {})",
                self.filter.time_limit
            );
        }
        if self.manifest.trim().is_empty() {
            anyhow::bail!("manifest must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = BenchConfig::from_yaml_str("").expect("empty config");
        assert_eq!(
            config.solver.path,
            PathBuf::from("install/bin/coloringsolver")
        );
        assert_eq!(config.solver.verbosity_level, 1);
        assert_eq!(config.manifest_path(), PathBuf::from("data/test_all.txt"));
        assert_eq!(config.filter.format, "snap");
        assert_eq!(config.filter.time_limit, 1.0);
    }

    #[test]
    fn partial_config_keeps_remaining_defaults() {
        let config = BenchConfig::from_yaml_str(
            "solver:\n  path: bazel-bin/coloringsolver/main\ndata_dir: /srv/data\n",
        )
        .expect("partial config");
        assert_eq!(
            config.solver.path,
            PathBuf::from("bazel-bin/coloringsolver/main")
        );
        assert_eq!(config.solver.verbosity_level, 1);
        assert_eq!(config.manifest_path(), PathBuf::from("/srv/data/test_all.txt"));
        assert_eq!(config.output_dir, PathBuf::from("output"));
    }

    #[test]
    fn rejects_unknown_keys_and_bad_limits() {
        assert!(BenchConfig::from_yaml_str("solvr: {}\n").is_err());
        let err = BenchConfig::from_yaml_str("filter:\n  time_limit: 0\n").expect_err("zero limit");
        assert!(err.to_string().contains("time_limit"), "{}", err);
    }
}
