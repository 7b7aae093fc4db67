//! Dataset provisioning: download a 7z archive by remote id, extract it, and
//! merge its top-level directory into the local data directory.
//!
//! Every step is attempted once. A failed download or extraction aborts the
//! whole provisioning run.

use crate::catalog::{Catalog, DatasetDef};
use crate::{ensure_dir, ensure_parent};
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{info, warn};

const ARCHIVE_NAME: &str = "data.7z";
const DRIVE_DOWNLOAD_URL: &str = "https://drive.google.com/uc";

/// Where archives come from and how they are unpacked.
pub trait DatasetSource {
    fn download(&mut self, remote_id: &str, destination: &Path) -> Result<()>;
    fn extract(&mut self, archive: &Path, into: &Path) -> Result<()>;
}

/// Downloads from Google Drive by file id and extracts with the `7z` tool.
pub struct RemoteSource {
    client: reqwest::blocking::Client,
    seven_zip: PathBuf,
}

impl RemoteSource {
    pub fn new(seven_zip: impl Into<PathBuf>) -> Result<Self> {
        // Archives are large; the default request timeout would cut them off.
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(None::<Duration>)
            .build()?;
        Ok(Self {
            client,
            seven_zip: seven_zip.into(),
        })
    }
}

impl DatasetSource for RemoteSource {
    fn download(&mut self, remote_id: &str, destination: &Path) -> Result<()> {
        info!(remote_id, destination = %destination.display(), "downloading archive");
        let mut response = self
            .client
            .get(DRIVE_DOWNLOAD_URL)
            .query(&[("export", "download"), ("confirm", "t"), ("id", remote_id)])
            .send()
            .with_context(|| format!("download {}", remote_id))?
            .error_for_status()
            .with_context(|| format!("download {}", remote_id))?;
        ensure_parent(destination)?;
        let mut file = fs::File::create(destination)
            .with_context(|| format!("create {}", destination.display()))?;
        let bytes = response.copy_to(&mut file)?;
        info!(remote_id, bytes, "download complete");
        Ok(())
    }

    fn extract(&mut self, archive: &Path, into: &Path) -> Result<()> {
        info!(archive = %archive.display(), "extracting");
        let mut output_flag = std::ffi::OsString::from("-o");
        output_flag.push(into.as_os_str());
        let status = Command::new(&self.seven_zip)
            .arg("x")
            .arg("-y")
            .arg(output_flag)
            .arg(archive)
            .status()
            .with_context(|| format!("spawn {}", self.seven_zip.display()))?;
        if !status.success() {
            return Err(anyhow!(
                "{} failed on {} ({})",
                self.seven_zip.display(),
                archive.display(),
                status
                    .code()
                    .map(|c| format!("exit code {}", c))
                    .unwrap_or_else(|| "signal".to_string())
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ProvisionReport {
    pub provisioned: Vec<String>,
    pub ignored: Vec<String>,
    pub files_merged: usize,
}

/// Provisions the datasets named by `tags` (the catalog defaults when
/// `None`) into `<root>/<data_dir>`. Unknown tags are reported and otherwise
/// ignored.
pub fn provision_datasets<S: DatasetSource>(
    source: &mut S,
    catalog: &Catalog,
    tags: Option<&[String]>,
    root: &Path,
    data_dir: &Path,
) -> Result<ProvisionReport> {
    let mut report = ProvisionReport::default();
    let selected: Vec<&DatasetDef> = match tags {
        None => catalog.default_datasets().collect(),
        Some(tags) => {
            for tag in tags.iter().filter(|t| catalog.dataset(t).is_none()) {
                warn!(tag = %tag, "unknown dataset tag; nothing to do");
                report.ignored.push(tag.clone());
            }
            catalog
                .datasets
                .iter()
                .filter(|d| tags.iter().any(|t| t == &d.tag))
                .collect()
        }
    };

    let data_root = root.join(data_dir);
    for dataset in selected {
        let archive = root.join(ARCHIVE_NAME);
        source.download(&dataset.remote_id, &archive)?;
        source.extract(&archive, root)?;
        fs::remove_file(&archive)
            .with_context(|| format!("remove {}", archive.display()))?;
        let extracted = root.join(&dataset.directory);
        let merged = merge_dir(&extracted, &data_root)?;
        info!(
            tag = %dataset.tag,
            files = merged,
            into = %data_root.display(),
            "dataset merged"
        );
        report.files_merged += merged;
        report.provisioned.push(dataset.tag.clone());
    }
    Ok(report)
}

/// Copies the tree under `src` into `dst`: directories are unioned, files
/// overwrite their counterparts, nothing already in `dst` is removed.
/// Returns the number of files copied.
pub fn merge_dir(src: &Path, dst: &Path) -> Result<usize> {
    if !src.is_dir() {
        return Err(anyhow!("expected extracted directory {}", src.display()));
    }
    ensure_dir(dst)?;
    let mut copied = 0;
    for entry in walkdir::WalkDir::new(src).follow_links(true) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("{} escapes {}", entry.path().display(), src.display()))?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            ensure_dir(&target)?;
        } else if entry.file_type().is_file() {
            ensure_parent(&target)?;
            fs::copy(entry.path(), &target).with_context(|| {
                format!("copy {} -> {}", entry.path().display(), target.display())
            })?;
            copied += 1;
        }
    }
    Ok(copied)
}
