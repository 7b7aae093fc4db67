//! Reduction of solver reports into comparable results: a CSV summary per
//! benchmark directory, and a manifest of instances solved to optimality.

use crate::catalog::InstanceRef;
use crate::report::{IncumbentReport, Optimality, OutputReport};
use crate::solver::{SolverExecutor, SolverFailure, SolverInvocation};
use crate::{ensure_dir, ensure_parent, read_manifest, ManifestWriter};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const SUMMARY_HEADER: [&str; 4] = ["Instance", "Value", "Time to best", "Time to end"];
pub const SUMMARY_FILE: &str = "results.csv";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRow {
    pub instance: String,
    pub value: String,
    pub time_to_best: String,
    pub time_to_end: String,
}

impl SummaryRow {
    pub fn from_report(instance: &str, report: &IncumbentReport) -> Result<Self> {
        let (value, time_to_best, time_to_end) = report.summary_fields()?;
        Ok(Self {
            instance: instance.to_string(),
            value,
            time_to_best,
            time_to_end,
        })
    }
}

/// Append-only CSV summary. The header is written on creation and every row is
/// flushed as soon as it is appended.
pub struct SummaryWriter {
    out: csv::Writer<fs::File>,
    rows: usize,
}

impl SummaryWriter {
    pub fn create(path: &Path) -> Result<Self> {
        ensure_parent(path)?;
        let mut out = csv::Writer::from_path(path)
            .with_context(|| format!("create summary {}", path.display()))?;
        out.write_record(SUMMARY_HEADER)?;
        out.flush()?;
        Ok(Self { out, rows: 0 })
    }

    pub fn append(&mut self, row: &SummaryRow) -> Result<()> {
        self.out.write_record([
            row.instance.as_str(),
            row.value.as_str(),
            row.time_to_best.as_str(),
            row.time_to_end.as_str(),
        ])?;
        self.out.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }
}

/// Reads `<dir>/<instance>.json` for every instance and writes
/// `<dir>/results.csv`. A missing or malformed report aborts the summary.
pub fn summarize_directory(dir: &Path, instances: &[InstanceRef]) -> Result<Vec<SummaryRow>> {
    let summary_path = dir.join(SUMMARY_FILE);
    let mut writer = SummaryWriter::create(&summary_path)?;
    let mut rows = Vec::with_capacity(instances.len());
    for instance in instances {
        let report_path = dir.join(format!("{}.json", instance.path));
        let report = IncumbentReport::from_path(&report_path)?;
        let row = SummaryRow::from_report(&instance.path, &report)
            .with_context(|| format!("summarize {}", report_path.display()))?;
        debug!(
            instance = %row.instance,
            value = %row.value,
            time_to_best = %row.time_to_best,
            time_to_end = %row.time_to_end,
            "summary row"
        );
        writer.append(&row)?;
        rows.push(row);
    }
    info!(rows = writer.rows(), path = %summary_path.display(), "wrote summary");
    Ok(rows)
}

#[derive(Debug, Clone)]
pub struct FilterOptions {
    pub data_dir: PathBuf,
    pub manifest: PathBuf,
    pub output_manifest: PathBuf,
    pub algorithm: String,
    pub time_limit: f64,
    pub format: String,
    /// Holds the single reusable `solution.txt` / `output.json` pair.
    pub scratch_dir: PathBuf,
    pub verbosity_level: u32,
}

#[derive(Debug, Default)]
pub struct FilterReport {
    pub examined: usize,
    pub unsolved: usize,
    pub open: usize,
    pub optimal: Vec<String>,
}

/// `<data_dir>/<instance>_solution.txt`
pub fn certificate_destination(data_dir: &Path, instance: &str) -> PathBuf {
    data_dir.join(format!("{}_solution.txt", instance))
}

/// Solves every manifest instance once with a short time limit and keeps those
/// whose reported bound equals the reported value: their path goes to the
/// output manifest and their certificate is copied next to the instance.
pub fn filter_optimal<E: SolverExecutor>(
    executor: &mut E,
    options: &FilterOptions,
) -> Result<FilterReport> {
    let instances = read_manifest(&options.manifest)?;
    ensure_dir(&options.scratch_dir)?;
    let scratch_certificate = options.scratch_dir.join("solution.txt");
    let scratch_output = options.scratch_dir.join("output.json");
    let mut output = ManifestWriter::create(&options.output_manifest)?;
    let mut report = FilterReport::default();

    info!(
        instances = instances.len(),
        algorithm = %options.algorithm,
        time_limit = options.time_limit,
        "filtering optimal instances"
    );
    for instance in &instances {
        let invocation = SolverInvocation {
            input: options.data_dir.join(instance),
            format: options.format.clone(),
            algorithm: options.algorithm.clone(),
            ordering: None,
            reverse: false,
            time_limit: Some(options.time_limit),
            certificate: Some(scratch_certificate.clone()),
            output: scratch_output.clone(),
            verbosity_level: options.verbosity_level,
        };
        let status = executor.execute(&invocation)?;
        if !status.success() {
            return Err(SolverFailure {
                group: "filter-optimal".to_string(),
                instance: instance.clone(),
                status,
            }
            .into());
        }
        report.examined += 1;

        let verdict = OutputReport::from_path(&scratch_output)?
            .optimality()
            .with_context(|| format!("report for {}", instance))?;
        match verdict {
            Optimality::Unsolved => {
                debug!(%instance, "no solution reported; skipping");
                report.unsolved += 1;
            }
            Optimality::Open { value, bound } => {
                debug!(%instance, value, bound, "not proven optimal");
                report.open += 1;
            }
            Optimality::Optimal { value } => {
                let destination = certificate_destination(&options.data_dir, instance);
                output.append(instance)?;
                ensure_parent(&destination)?;
                fs::copy(&scratch_certificate, &destination).with_context(|| {
                    format!(
                        "copy certificate {} -> {}",
                        scratch_certificate.display(),
                        destination.display()
                    )
                })?;
                info!(%instance, value, "optimal");
                report.optimal.push(instance.clone());
            }
        }
    }
    info!(
        examined = report.examined,
        optimal = report.optimal.len(),
        unsolved = report.unsolved,
        open = report.open,
        path = %output.path().display(),
        "filter complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::mock::MockSolver;
    use crate::solver::SolverStatus;
    use crate::testutil::scratch_dir;
    use serde_json::json;

    fn filter_options(root: &Path) -> FilterOptions {
        FilterOptions {
            data_dir: root.join("data"),
            manifest: root.join("data").join("test_all.txt"),
            output_manifest: root.join("optimal.txt"),
            algorithm: "milp".to_string(),
            time_limit: 1.0,
            format: "snap".to_string(),
            scratch_dir: root.join("scratch"),
            verbosity_level: 1,
        }
    }

    fn write_manifest(root: &Path, lines: &[&str]) {
        let path = root.join("data").join("test_all.txt");
        ensure_parent(&path).expect("data dir");
        let mut body = String::new();
        for line in lines {
            body.push_str(line);
            body.push('\n');
        }
        fs::write(path, body).expect("manifest");
    }

    /// Replies with a scripted `Output` document per invocation.
    struct ScriptedSolver {
        replies: Vec<serde_json::Value>,
        calls: usize,
    }

    impl SolverExecutor for ScriptedSolver {
        fn execute(&mut self, invocation: &SolverInvocation) -> Result<SolverStatus> {
            let reply = &self.replies[self.calls];
            self.calls += 1;
            fs::write(&invocation.output, serde_json::to_vec(reply)?)?;
            if let Some(cert) = &invocation.certificate {
                fs::write(cert, format!("run {}\n", self.calls))?;
            }
            Ok(SolverStatus::Exited(0))
        }
    }

    #[test]
    fn summary_has_header_and_one_row_per_instance() {
        let root = scratch_dir("summary");
        let instances = vec![
            InstanceRef::new("graphcoloring/anna.col", "dimacs"),
            InstanceRef::new("graphcoloring/david.col", "dimacs"),
        ];
        ensure_dir(&root.join("graphcoloring")).expect("dir");
        fs::write(
            root.join("graphcoloring/anna.col.json"),
            json!({
                "Solution": {"Value": 11, "Time": 0.5},
                "Solution1": {"Value": 12, "Time": 0.1},
                "Solution2": {"Value": 11, "Time": 0.3}
            })
            .to_string(),
        )
        .expect("anna");
        fs::write(
            root.join("graphcoloring/david.col.json"),
            json!({"Solution": {"Value": 11, "Time": 0.2}, "Solution1": {"Value": 11, "Time": 0.05}})
                .to_string(),
        )
        .expect("david");

        let rows = summarize_directory(&root, &instances).expect("summary");
        assert_eq!(rows.len(), 2);
        let csv = fs::read_to_string(root.join(SUMMARY_FILE)).expect("csv");
        assert_eq!(
            csv,
            "Instance,Value,Time to best,Time to end\n\
             graphcoloring/anna.col,11,0.3,0.5\n\
             graphcoloring/david.col,11,0.05,0.2\n"
        );
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn summary_aborts_on_missing_report() {
        let root = scratch_dir("summary_missing");
        let instances = vec![InstanceRef::new("missing.col", "dimacs")];
        assert!(summarize_directory(&root, &instances).is_err());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn unsolved_instances_are_skipped_and_optimal_ones_recorded() {
        let root = scratch_dir("filter_mixed");
        write_manifest(&root, &["tests/a", "tests/b", "tests/c"]);
        let mut solver = ScriptedSolver {
            replies: vec![
                json!({"Output": {"Value": "inf", "Bound": "0"}}),
                json!({"Output": {"Value": "10", "Bound": "10"}}),
                json!({"Output": {"Value": "7", "Bound": "6"}}),
            ],
            calls: 0,
        };
        let options = filter_options(&root);
        let report = filter_optimal(&mut solver, &options).expect("filter");

        assert_eq!(report.examined, 3);
        assert_eq!(report.unsolved, 1);
        assert_eq!(report.open, 1);
        assert_eq!(report.optimal, vec!["tests/b".to_string()]);
        assert_eq!(
            fs::read_to_string(&options.output_manifest).expect("out"),
            "tests/b\n"
        );
        assert!(!root.join("data/tests/a_solution.txt").exists());
        assert_eq!(
            fs::read_to_string(root.join("data/tests/b_solution.txt")).expect("cert"),
            "run 2\n"
        );
        assert!(!root.join("data/tests/c_solution.txt").exists());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn every_run_reuses_the_same_scratch_pair() {
        let root = scratch_dir("filter_scratch");
        write_manifest(&root, &["tests/x", "tests/y"]);
        let mut solver = MockSolver::new(json!({"Output": {"Value": "5", "Bound": "5"}}));
        let options = filter_options(&root);
        filter_optimal(&mut solver, &options).expect("filter");

        assert_eq!(solver.calls.len(), 2);
        for call in &solver.calls {
            assert_eq!(call.output, root.join("scratch/output.json"));
            assert_eq!(
                call.certificate.as_deref(),
                Some(root.join("scratch/solution.txt").as_path())
            );
            assert_eq!(call.time_limit, Some(1.0));
            assert_eq!(call.format, "snap");
        }
        assert_eq!(
            fs::read_dir(root.join("scratch")).expect("scratch").count(),
            2
        );
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn failing_solver_stops_the_filter() {
        let root = scratch_dir("filter_fail");
        write_manifest(&root, &["tests/x", "tests/y", "tests/z"]);
        let mut solver =
            MockSolver::new(json!({"Output": {"Value": "5", "Bound": "5"}})).failing_at(2);
        let options = filter_options(&root);
        let err = filter_optimal(&mut solver, &options).expect_err("abort");
        assert!(err.downcast_ref::<SolverFailure>().is_some());
        assert_eq!(solver.calls.len(), 2);
        assert_eq!(
            fs::read_to_string(&options.output_manifest).expect("out"),
            "tests/x\n"
        );
        let _ = fs::remove_dir_all(root);
    }

    #[cfg(unix)]
    #[test]
    fn end_to_end_with_script_solver() {
        use crate::solver::ProcessExecutor;
        use std::os::unix::fs::PermissionsExt;

        let root = scratch_dir("filter_e2e");
        write_manifest(&root, &["tests/complete/complete_n5", "tests/empty/empty_n2"]);
        let script = root.join("fake_solver.sh");
        fs::write(
            &script,
            "#!/bin/sh\n\
             out=\"\"\n\
             cert=\"\"\n\
             while [ $# -gt 0 ]; do\n\
             \x20 case \"$1\" in\n\
             \x20   --output) out=\"$2\"; shift 2 ;;\n\
             \x20   --certificate) cert=\"$2\"; shift 2 ;;\n\
             \x20   *) shift ;;\n\
             \x20 esac\n\
             done\n\
             printf '{\"Output\":{\"Value\":\"5\",\"Bound\":\"5\"}}' > \"$out\"\n\
             printf 'colors\\n' > \"$cert\"\n",
        )
        .expect("script");
        let mut perms = fs::metadata(&script).expect("meta").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&script, perms).expect("chmod");

        let mut executor = ProcessExecutor::new(&script);
        let options = filter_options(&root);
        let report = filter_optimal(&mut executor, &options).expect("filter");

        assert_eq!(report.optimal.len(), 2);
        assert_eq!(
            fs::read_to_string(&options.output_manifest).expect("out"),
            "tests/complete/complete_n5\ntests/empty/empty_n2\n"
        );
        assert!(root
            .join("data/tests/complete/complete_n5_solution.txt")
            .exists());
        assert!(root.join("data/tests/empty/empty_n2_solution.txt").exists());
        let _ = fs::remove_dir_all(root);
    }
}
