use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub mod aggregate;
pub mod batch;
pub mod catalog;
pub mod config;
pub mod generate;
pub mod provision;
pub mod report;
pub mod solver;

pub use aggregate::{
    filter_optimal, summarize_directory, FilterOptions, FilterReport, SummaryRow, SummaryWriter,
};
pub use batch::{
    run_batch, BatchGroup, BatchOptions, BatchReport, BatchState, GroupSelection, RunOutputs,
};
pub use catalog::{Catalog, DatasetDef, InstanceRef};
pub use config::BenchConfig;
pub use generate::{generate_instances, GenerationReport, GeneratorGrid, GraphFamily, InstanceSpec};
pub use provision::{provision_datasets, DatasetSource, ProvisionReport, RemoteSource};
pub use report::{IncumbentReport, Optimality, OutputReport, SolutionRecord};
pub use solver::{ProcessExecutor, SolverExecutor, SolverFailure, SolverInvocation, SolverStatus};

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

pub(crate) fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_dir(parent),
        _ => Ok(()),
    }
}

pub(crate) fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    ensure_parent(path)?;
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub(crate) fn atomic_write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write_bytes(path, &bytes)
}

pub(crate) fn load_json_file(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse JSON {}", path.display()))
}

/// Reads a manifest: one relative instance path per line. Blank lines are ignored.
pub fn read_manifest(path: &Path) -> Result<Vec<String>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("read manifest {}", path.display()))?;
    Ok(raw
        .lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect())
}

/// Append-only manifest writer. Every entry is newline-terminated and flushed
/// as soon as it is written, so an aborted run leaves a valid prefix behind.
pub struct ManifestWriter {
    path: PathBuf,
    out: BufWriter<fs::File>,
    lines: usize,
}

impl ManifestWriter {
    pub fn create(path: &Path) -> Result<Self> {
        ensure_parent(path)?;
        let file = fs::File::create(path)
            .with_context(|| format!("create manifest {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
            lines: 0,
        })
    }

    pub fn append(&mut self, instance_path: &str) -> Result<()> {
        writeln!(self.out, "{}", instance_path)?;
        self.out.flush()?;
        self.lines += 1;
        Ok(())
    }

    pub fn lines(&self) -> usize {
        self.lines
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
