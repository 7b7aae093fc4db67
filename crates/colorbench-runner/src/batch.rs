//! Sequential batch runner.
//!
//! A batch walks the selected groups in order and runs the solver once per
//! instance, blocking on each process. The first non-successful run aborts
//! the whole batch: remaining instances and groups are not attempted and
//! partial outputs are left where they are.

use crate::catalog::InstanceRef;
use crate::solver::{SolverExecutor, SolverFailure, SolverInvocation};
use crate::{atomic_write_json_pretty, ensure_parent};
use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Algorithm parameters shared by every run of a group.
#[derive(Debug, Clone, PartialEq)]
pub struct AlgorithmParams {
    pub algorithm: String,
    pub ordering: Option<String>,
    pub reverse: bool,
    pub time_limit: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct BatchGroup {
    pub name: String,
    /// JSON outputs (and certificates) land at `<output_dir>/<instance>.json`.
    pub output_dir: PathBuf,
    pub instances: Vec<InstanceRef>,
    pub params: AlgorithmParams,
    pub write_certificate: bool,
}

impl BatchGroup {
    pub fn json_output_path(&self, instance: &InstanceRef) -> PathBuf {
        self.output_dir.join(format!("{}.json", instance.path))
    }

    pub fn certificate_path(&self, instance: &InstanceRef) -> PathBuf {
        self.output_dir.join(format!("{}_solution.txt", instance.path))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupSelection {
    All,
    Named(Vec<String>),
}

impl GroupSelection {
    /// `None` or an empty list selects every group.
    pub fn from_names(names: Option<Vec<String>>) -> Self {
        match names {
            Some(names) if !names.is_empty() => GroupSelection::Named(names),
            _ => GroupSelection::All,
        }
    }

    fn includes(&self, group: &str) -> bool {
        match self {
            GroupSelection::All => true,
            GroupSelection::Named(names) => names.iter().any(|n| n == group),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    SelectingGroups,
    RunningInstance,
    CheckingStatus,
    Done,
    Aborted,
}

impl BatchState {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchState::Idle => "idle",
            BatchState::SelectingGroups => "selecting_groups",
            BatchState::RunningInstance => "running_instance",
            BatchState::CheckingStatus => "checking_status",
            BatchState::Done => "done",
            BatchState::Aborted => "aborted",
        }
    }

    fn can_advance_to(self, next: BatchState) -> bool {
        use BatchState::*;
        matches!(
            (self, next),
            (Idle, SelectingGroups)
                | (SelectingGroups, RunningInstance)
                | (SelectingGroups, Done)
                | (RunningInstance, CheckingStatus)
                | (CheckingStatus, RunningInstance)
                | (CheckingStatus, Done)
                | (CheckingStatus, Aborted)
        )
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub data_dir: PathBuf,
    pub verbosity_level: u32,
    /// Where `batch_state.json` is kept. No state file when unset.
    pub state_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct RunOutputs {
    pub group: String,
    pub instance: InstanceRef,
    pub json: PathBuf,
    pub certificate: Option<PathBuf>,
}

#[derive(Debug)]
pub struct BatchReport {
    pub groups: Vec<String>,
    pub invocations: usize,
    pub runs: Vec<RunOutputs>,
    pub state: BatchState,
}

struct BatchTracker<'a> {
    state: BatchState,
    state_path: Option<&'a Path>,
    invocations: usize,
}

impl<'a> BatchTracker<'a> {
    fn new(state_path: Option<&'a Path>) -> Self {
        Self {
            state: BatchState::Idle,
            state_path,
            invocations: 0,
        }
    }

    fn advance(
        &mut self,
        next: BatchState,
        group: Option<&str>,
        instance: Option<&str>,
    ) -> Result<()> {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal batch transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(from = self.state.as_str(), to = next.as_str(), "batch transition");
        self.state = next;
        if next == BatchState::RunningInstance {
            self.invocations += 1;
        }
        // Status checks are too fine-grained to persist.
        if next != BatchState::CheckingStatus {
            self.persist(group, instance)?;
        }
        Ok(())
    }

    fn persist(&self, group: Option<&str>, instance: Option<&str>) -> Result<()> {
        let Some(path) = self.state_path else {
            return Ok(());
        };
        write_batch_state(path, self.state, group, instance, self.invocations)
    }
}

impl Drop for BatchTracker<'_> {
    fn drop(&mut self) {
        if !matches!(self.state, BatchState::Done | BatchState::Aborted) {
            self.state = BatchState::Aborted;
            let _ = self.persist(None, None);
        }
    }
}

fn write_batch_state(
    path: &Path,
    state: BatchState,
    group: Option<&str>,
    instance: Option<&str>,
    invocations: usize,
) -> Result<()> {
    let payload = json!({
        "schema_version": "batch_state_v1",
        "status": state.as_str(),
        "active_group": group,
        "active_instance": instance,
        "invocations": invocations,
        "updated_at": Utc::now().to_rfc3339(),
    });
    atomic_write_json_pretty(path, &payload)
}

/// Runs every selected group of `groups` in order. Returns a
/// [`SolverFailure`] error as soon as one solver run does not succeed.
pub fn run_batch<E: SolverExecutor>(
    executor: &mut E,
    groups: &[BatchGroup],
    selection: &GroupSelection,
    options: &BatchOptions,
) -> Result<BatchReport> {
    let mut tracker = BatchTracker::new(options.state_path.as_deref());
    tracker.advance(BatchState::SelectingGroups, None, None)?;

    if let GroupSelection::Named(names) = selection {
        let known: BTreeSet<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        for name in names.iter().filter(|n| !known.contains(n.as_str())) {
            warn!(group = %name, "ignoring unknown test group");
        }
    }
    let selected: Vec<&BatchGroup> = groups
        .iter()
        .filter(|g| selection.includes(&g.name))
        .collect();

    let mut runs = Vec::new();
    for group in &selected {
        info!(
            group = %group.name,
            algorithm = %group.params.algorithm,
            ordering = group.params.ordering.as_deref().unwrap_or("-"),
            reverse = group.params.reverse,
            instances = group.instances.len(),
            "running group"
        );
        for instance in &group.instances {
            let json_path = group.json_output_path(instance);
            let certificate = group
                .write_certificate
                .then(|| group.certificate_path(instance));
            ensure_parent(&json_path)?;
            if let Some(cert) = &certificate {
                ensure_parent(cert)?;
            }
            let invocation = SolverInvocation {
                input: options.data_dir.join(&instance.path),
                format: instance.format.clone(),
                algorithm: group.params.algorithm.clone(),
                ordering: group.params.ordering.clone(),
                reverse: group.params.reverse,
                time_limit: group.params.time_limit,
                certificate: certificate.clone(),
                output: json_path.clone(),
                verbosity_level: options.verbosity_level,
            };

            tracker.advance(
                BatchState::RunningInstance,
                Some(&group.name),
                Some(&instance.path),
            )?;
            info!(group = %group.name, instance = %instance.path, "solving");
            let status = executor.execute(&invocation)?;
            tracker.advance(
                BatchState::CheckingStatus,
                Some(&group.name),
                Some(&instance.path),
            )?;

            if !status.success() {
                tracker.advance(
                    BatchState::Aborted,
                    Some(&group.name),
                    Some(&instance.path),
                )?;
                warn!(
                    group = %group.name,
                    instance = %instance.path,
                    %status,
                    "solver failed; aborting batch"
                );
                return Err(SolverFailure {
                    group: group.name.clone(),
                    instance: instance.path.clone(),
                    status,
                }
                .into());
            }
            runs.push(RunOutputs {
                group: group.name.clone(),
                instance: instance.clone(),
                json: json_path,
                certificate,
            });
        }
    }

    tracker.advance(BatchState::Done, None, None)?;
    info!(
        groups = selected.len(),
        invocations = tracker.invocations,
        "batch complete"
    );
    Ok(BatchReport {
        groups: selected.iter().map(|g| g.name.clone()).collect(),
        invocations: tracker.invocations,
        runs,
        state: tracker.state,
    })
}
