//! Synthetic test instances.
//!
//! Four families are swept over a fixed grid: complete graphs, empty graphs,
//! `G(n, p)` random graphs and random `d`-regular graphs. Every instance is an
//! edge list (`u v` per line, vertices numbered from 0) at a path that spells
//! out its parameters, and every path is appended to a manifest in generation
//! order. Random families are seeded, so a grid always regenerates to the same
//! bytes.

use crate::{ensure_parent, ManifestWriter};
use anyhow::{anyhow, bail, Context, Result};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

pub type Edge = (usize, usize);

/// Restarts allowed for one random-regular draw before giving up.
const MAX_REGULAR_ATTEMPTS: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GraphFamily {
    Complete,
    Empty,
    Random { p: f64, seed: u64 },
    RandomRegular { d: usize, seed: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceSpec {
    pub n: usize,
    pub family: GraphFamily,
}

impl InstanceSpec {
    /// Manifest path, relative to the data directory.
    pub fn relative_path(&self) -> String {
        let n = self.n;
        match self.family {
            GraphFamily::Complete => format!("tests/complete/complete_n{n}"),
            GraphFamily::Empty => format!("tests/empty/empty_n{n}"),
            GraphFamily::Random { p, seed } => {
                format!("tests/random/random_n{n}_p{p}_s{seed}")
            }
            GraphFamily::RandomRegular { d, seed } => {
                format!("tests/random_regular/random_regular_n{n}_d{d}_s{seed}")
            }
        }
    }

    pub fn edges(&self) -> Result<Vec<Edge>> {
        let n = self.n;
        match self.family {
            GraphFamily::Complete => Ok(complete_edges(n)),
            GraphFamily::Empty => Ok(Vec::new()),
            GraphFamily::Random { p, seed } => {
                if !(0.0..=1.0).contains(&p) {
                    bail!("edge probability {} is not in [0, 1]", p);
                }
                let mut rng = Pcg64::seed_from_u64(seed);
                Ok(gnp_edges(n, p, &mut rng))
            }
            GraphFamily::RandomRegular { d, seed } => {
                let mut rng = Pcg64::seed_from_u64(seed);
                random_regular_edges(n, d, &mut rng)
            }
        }
    }
}

/// Parameter sweep of the generator.
#[derive(Debug, Clone)]
pub struct GeneratorGrid {
    pub node_counts: Vec<usize>,
    pub probabilities: Vec<f64>,
    pub seeds: u64,
}

impl Default for GeneratorGrid {
    fn default() -> Self {
        Self {
            node_counts: vec![1, 2, 5, 10, 20, 50],
            probabilities: vec![0.02, 0.05, 0.1, 0.2, 0.5],
            seeds: 8,
        }
    }
}

impl GeneratorGrid {
    /// Every instance of the grid, family by family, in generation order.
    /// Regular degrees run over the even values `2, 4, ...` below `n`.
    pub fn instances(&self) -> Vec<InstanceSpec> {
        let mut out = Vec::new();
        for &n in &self.node_counts {
            out.push(InstanceSpec {
                n,
                family: GraphFamily::Complete,
            });
        }
        for &n in &self.node_counts {
            out.push(InstanceSpec {
                n,
                family: GraphFamily::Empty,
            });
        }
        for &n in &self.node_counts {
            for &p in &self.probabilities {
                for seed in 0..self.seeds {
                    out.push(InstanceSpec {
                        n,
                        family: GraphFamily::Random { p, seed },
                    });
                }
            }
        }
        for &n in &self.node_counts {
            for d in (2..n).step_by(2) {
                for seed in 0..self.seeds {
                    out.push(InstanceSpec {
                        n,
                        family: GraphFamily::RandomRegular { d, seed },
                    });
                }
            }
        }
        out
    }
}

#[derive(Debug)]
pub struct GenerationReport {
    pub manifest: PathBuf,
    pub instances: usize,
    pub edges: usize,
}

/// Writes every grid instance below `data_dir` and the manifest listing them
/// to `data_dir/<manifest_name>`.
pub fn generate_instances(
    data_dir: &Path,
    manifest_name: &str,
    grid: &GeneratorGrid,
) -> Result<GenerationReport> {
    let manifest_path = data_dir.join(manifest_name);
    let mut manifest = ManifestWriter::create(&manifest_path)?;
    let mut edges_total = 0;
    let mut family = None;
    for spec in grid.instances() {
        let kind = family_name(&spec.family);
        if family != Some(kind) {
            info!(family = kind, "generating instances");
            family = Some(kind);
        }
        let relative = spec.relative_path();
        let edges = spec
            .edges()
            .with_context(|| format!("generate {}", relative))?;
        write_edge_list(&data_dir.join(&relative), &edges)?;
        manifest.append(&relative)?;
        edges_total += edges.len();
    }
    info!(
        instances = manifest.lines(),
        edges = edges_total,
        manifest = %manifest_path.display(),
        "generation complete"
    );
    Ok(GenerationReport {
        manifest: manifest_path,
        instances: manifest.lines(),
        edges: edges_total,
    })
}

fn family_name(family: &GraphFamily) -> &'static str {
    match family {
        GraphFamily::Complete => "complete",
        GraphFamily::Empty => "empty",
        GraphFamily::Random { .. } => "random",
        GraphFamily::RandomRegular { .. } => "random_regular",
    }
}

pub fn write_edge_list(path: &Path, edges: &[Edge]) -> Result<()> {
    ensure_parent(path)?;
    let file = fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    for (u, v) in edges {
        writeln!(out, "{} {}", u, v)?;
    }
    out.flush()?;
    Ok(())
}

fn complete_edges(n: usize) -> Vec<Edge> {
    (0..n)
        .flat_map(|u| (u + 1..n).map(move |v| (u, v)))
        .collect()
}

fn gnp_edges<R: Rng>(n: usize, p: f64, rng: &mut R) -> Vec<Edge> {
    let mut edges = Vec::new();
    for u in 0..n {
        for v in u + 1..n {
            if rng.gen_bool(p) {
                edges.push((u, v));
            }
        }
    }
    edges
}

/// Uniform-ish random `d`-regular graph on `n` vertices by repeated random
/// stub pairing (Steger-Wormald). Dense degrees are drawn as the complement
/// of an `(n - 1 - d)`-regular graph, where pairing rarely gets stuck.
pub fn random_regular_edges<R: Rng>(n: usize, d: usize, rng: &mut R) -> Result<Vec<Edge>> {
    if d == 0 {
        return Ok(Vec::new());
    }
    if d >= n {
        bail!("degree {} must be below the vertex count {}", d, n);
    }
    if (n * d) % 2 != 0 {
        bail!("n * d must be even (n = {}, d = {})", n, d);
    }
    if 2 * d > n - 1 {
        let sparse: BTreeSet<Edge> = random_regular_edges(n, n - 1 - d, rng)?
            .into_iter()
            .collect();
        return Ok(complete_edges(n)
            .into_iter()
            .filter(|e| !sparse.contains(e))
            .collect());
    }
    for _ in 0..MAX_REGULAR_ATTEMPTS {
        if let Some(edges) = try_pairing(n, d, rng) {
            return Ok(edges.into_iter().collect());
        }
    }
    Err(anyhow!(
        "no {}-regular graph on {} vertices after {} attempts",
        d,
        n,
        MAX_REGULAR_ATTEMPTS
    ))
}

fn try_pairing<R: Rng>(n: usize, d: usize, rng: &mut R) -> Option<BTreeSet<Edge>> {
    let mut edges = BTreeSet::new();
    let mut stubs: Vec<usize> = (0..n)
        .flat_map(|v| std::iter::repeat(v).take(d))
        .collect();
    while !stubs.is_empty() {
        let mut leftover: BTreeMap<usize, usize> = BTreeMap::new();
        stubs.shuffle(rng);
        for pair in stubs.chunks_exact(2) {
            let (u, v) = (pair[0].min(pair[1]), pair[0].max(pair[1]));
            if u != v && edges.insert((u, v)) {
                continue;
            }
            *leftover.entry(u).or_default() += 1;
            *leftover.entry(v).or_default() += 1;
        }
        if !can_progress(&edges, &leftover) {
            return None;
        }
        stubs = leftover
            .iter()
            .flat_map(|(&v, &count)| std::iter::repeat(v).take(count))
            .collect();
    }
    Some(edges)
}

/// True when the leftover stubs still admit at least one new edge.
fn can_progress(edges: &BTreeSet<Edge>, leftover: &BTreeMap<usize, usize>) -> bool {
    if leftover.is_empty() {
        return true;
    }
    let nodes: Vec<usize> = leftover.keys().copied().collect();
    nodes.iter().enumerate().any(|(i, &u)| {
        nodes[i + 1..]
            .iter()
            .any(|&v| !edges.contains(&(u, v)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::read_manifest;
    use crate::testutil::scratch_dir;

    fn degrees(n: usize, edges: &[Edge]) -> Vec<usize> {
        let mut deg = vec![0; n];
        for &(u, v) in edges {
            deg[u] += 1;
            deg[v] += 1;
        }
        deg
    }

    #[test]
    fn paths_spell_out_parameters() {
        let spec = InstanceSpec {
            n: 20,
            family: GraphFamily::Random { p: 0.05, seed: 3 },
        };
        assert_eq!(spec.relative_path(), "tests/random/random_n20_p0.05_s3");
        let spec = InstanceSpec {
            n: 10,
            family: GraphFamily::RandomRegular { d: 4, seed: 0 },
        };
        assert_eq!(
            spec.relative_path(),
            "tests/random_regular/random_regular_n10_d4_s0"
        );
        let spec = InstanceSpec {
            n: 5,
            family: GraphFamily::Complete,
        };
        assert_eq!(spec.relative_path(), "tests/complete/complete_n5");
    }

    #[test]
    fn default_grid_size_matches_families() {
        let instances = GeneratorGrid::default().instances();
        // 6 complete + 6 empty + 6*5*8 random + (2+4+9+24)*8 regular
        assert_eq!(instances.len(), 6 + 6 + 240 + 312);
        assert_eq!(instances[0].family, GraphFamily::Complete);
        assert_eq!(instances[6].family, GraphFamily::Empty);
    }

    #[test]
    fn complete_and_empty_graphs_have_expected_edges() {
        let complete = InstanceSpec {
            n: 5,
            family: GraphFamily::Complete,
        };
        assert_eq!(complete.edges().expect("edges").len(), 10);
        let empty = InstanceSpec {
            n: 50,
            family: GraphFamily::Empty,
        };
        assert!(empty.edges().expect("edges").is_empty());
    }

    #[test]
    fn regular_graphs_are_simple_and_regular() {
        for &(n, d) in &[(5, 2), (5, 4), (10, 4), (10, 8), (20, 10), (50, 24), (50, 48)] {
            for seed in 0..3 {
                let mut rng = Pcg64::seed_from_u64(seed);
                let edges = random_regular_edges(n, d, &mut rng).expect("regular graph");
                assert!(edges.iter().all(|&(u, v)| u < v && v < n));
                let unique: BTreeSet<Edge> = edges.iter().copied().collect();
                assert_eq!(unique.len(), edges.len(), "no multi-edges");
                assert!(degrees(n, &edges).iter().all(|&k| k == d), "n={n} d={d}");
            }
        }
    }

    #[test]
    fn regular_rejects_impossible_parameters() {
        let mut rng = Pcg64::seed_from_u64(0);
        assert!(random_regular_edges(5, 3, &mut rng).is_err());
        assert!(random_regular_edges(4, 4, &mut rng).is_err());
    }

    #[test]
    fn seeded_families_are_reproducible() {
        let spec = InstanceSpec {
            n: 50,
            family: GraphFamily::Random { p: 0.2, seed: 5 },
        };
        assert_eq!(spec.edges().expect("a"), spec.edges().expect("b"));
        let other = InstanceSpec {
            n: 50,
            family: GraphFamily::Random { p: 0.2, seed: 6 },
        };
        assert_ne!(spec.edges().expect("a"), other.edges().expect("c"));
    }

    #[test]
    fn regeneration_is_byte_identical() {
        let grid = GeneratorGrid {
            node_counts: vec![1, 5, 10],
            probabilities: vec![0.2, 0.5],
            seeds: 2,
        };
        let first = scratch_dir("gen_a");
        let second = scratch_dir("gen_b");
        let a = generate_instances(&first, "test_all.txt", &grid).expect("first");
        let b = generate_instances(&second, "test_all.txt", &grid).expect("second");

        let listed = read_manifest(&a.manifest).expect("manifest");
        assert_eq!(listed.len(), a.instances);
        assert_eq!(listed.len(), grid.instances().len());
        assert_eq!(listed, read_manifest(&b.manifest).expect("manifest b"));
        for rel in &listed {
            let left = fs::read(first.join(rel)).expect("left");
            let right = fs::read(second.join(rel)).expect("right");
            assert_eq!(left, right, "{} differs", rel);
        }
        assert_eq!(
            fs::read_to_string(first.join("tests/complete/complete_n5"))
                .expect("complete")
                .lines()
                .count(),
            10
        );

        // Running again over an existing tree is fine.
        generate_instances(&first, "test_all.txt", &grid).expect("rerun");
        let _ = fs::remove_dir_all(first);
        let _ = fs::remove_dir_all(second);
    }
}
