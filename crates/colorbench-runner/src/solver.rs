//! Invocation of the external coloring solver.
//!
//! The solver is a black box: it receives its whole run specification on the
//! command line, enforces its own time limit, and reports through the JSON
//! (and optional certificate) files it is pointed at.

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct SolverInvocation {
    pub input: PathBuf,
    pub format: String,
    pub algorithm: String,
    pub ordering: Option<String>,
    pub reverse: bool,
    pub time_limit: Option<f64>,
    pub certificate: Option<PathBuf>,
    pub output: PathBuf,
    pub verbosity_level: u32,
}

impl SolverInvocation {
    /// Discrete argument list handed to the solver process, in flag order.
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--verbosity-level".into(),
            self.verbosity_level.to_string().into(),
            "--input".into(),
            self.input.clone().into_os_string(),
            "--format".into(),
            self.format.clone().into(),
            "--algorithm".into(),
            self.algorithm.clone().into(),
        ];
        if let Some(ordering) = &self.ordering {
            args.push("--ordering".into());
            args.push(ordering.into());
        }
        if self.reverse {
            args.push("--reverse".into());
            args.push("1".into());
        }
        if let Some(limit) = self.time_limit {
            args.push("--time-limit".into());
            args.push(limit.to_string().into());
        }
        if let Some(certificate) = &self.certificate {
            args.push("--certificate".into());
            args.push(certificate.clone().into_os_string());
        }
        args.push("--output".into());
        args.push(self.output.clone().into_os_string());
        args
    }

    /// Human-readable rendering for logs. Never executed through a shell.
    pub fn display_command(&self, program: &Path) -> String {
        let mut parts = vec![program.to_string_lossy().to_string()];
        parts.extend(self.args().iter().map(|a| a.to_string_lossy().to_string()));
        shell_join(&parts)
    }
}

/// How a solver process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverStatus {
    Exited(i32),
    /// Terminated without an exit code (killed by a signal on unix).
    Signaled,
}

impl SolverStatus {
    pub fn success(self) -> bool {
        matches!(self, SolverStatus::Exited(0))
    }
}

impl From<ExitStatus> for SolverStatus {
    fn from(status: ExitStatus) -> Self {
        status
            .code()
            .map(SolverStatus::Exited)
            .unwrap_or(SolverStatus::Signaled)
    }
}

impl fmt::Display for SolverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverStatus::Exited(code) => write!(f, "exit code {}", code),
            SolverStatus::Signaled => write!(f, "signal"),
        }
    }
}

/// A non-successful solver run. Aborts whatever batch it occurs in.
#[derive(Debug, thiserror::Error)]
#[error("solver failed on '{instance}' ({status}) in group '{group}'")]
pub struct SolverFailure {
    pub group: String,
    pub instance: String,
    pub status: SolverStatus,
}

/// Runs one solver invocation to completion.
pub trait SolverExecutor {
    fn execute(&mut self, invocation: &SolverInvocation) -> Result<SolverStatus>;
}

/// Spawns the solver binary as a child process and waits for it. The child
/// inherits stdout/stderr so its console output stays visible.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    program: PathBuf,
}

impl ProcessExecutor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl SolverExecutor for ProcessExecutor {
    fn execute(&mut self, invocation: &SolverInvocation) -> Result<SolverStatus> {
        debug!(command = %invocation.display_command(&self.program), "spawning solver");
        let status = Command::new(&self.program)
            .args(invocation.args())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .with_context(|| format!("spawn solver {}", self.program.display()))?;
        Ok(status.into())
    }
}

fn shell_join(parts: &[String]) -> String {
    parts
        .iter()
        .map(|p| shell_quote(p))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::fs;

    /// Records every invocation, writes `document` to the requested output
    /// (and a stub certificate when one is requested), and fails with exit
    /// code 1 on the invocation numbered `fail_at` (1-based).
    pub struct MockSolver {
        pub calls: Vec<SolverInvocation>,
        pub fail_at: Option<usize>,
        pub document: serde_json::Value,
    }

    impl MockSolver {
        pub fn new(document: serde_json::Value) -> Self {
            Self {
                calls: Vec::new(),
                fail_at: None,
                document,
            }
        }

        pub fn failing_at(mut self, n: usize) -> Self {
            self.fail_at = Some(n);
            self
        }
    }

    impl SolverExecutor for MockSolver {
        fn execute(&mut self, invocation: &SolverInvocation) -> Result<SolverStatus> {
            self.calls.push(invocation.clone());
            if self.fail_at == Some(self.calls.len()) {
                return Ok(SolverStatus::Exited(1));
            }
            fs::write(&invocation.output, serde_json::to_vec(&self.document)?)?;
            if let Some(cert) = &invocation.certificate {
                fs::write(
                    cert,
                    format!("certificate for {}\n", invocation.input.display()),
                )?;
            }
            Ok(SolverStatus::Exited(0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation() -> SolverInvocation {
        SolverInvocation {
            input: PathBuf::from("data/gebremedhin2013/msdoor.mtx"),
            format: "matrixmarket".to_string(),
            algorithm: "greedy".to_string(),
            ordering: Some("incidence-degree".to_string()),
            reverse: true,
            time_limit: None,
            certificate: None,
            output: PathBuf::from("out/greedy_incidence_degree/msdoor.mtx.json"),
            verbosity_level: 1,
        }
    }

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn args_include_ordering_and_reverse_flag() {
        let args = strings(invocation().args());
        assert_eq!(
            args,
            vec![
                "--verbosity-level",
                "1",
                "--input",
                "data/gebremedhin2013/msdoor.mtx",
                "--format",
                "matrixmarket",
                "--algorithm",
                "greedy",
                "--ordering",
                "incidence-degree",
                "--reverse",
                "1",
                "--output",
                "out/greedy_incidence_degree/msdoor.mtx.json",
            ]
        );
    }

    #[test]
    fn args_carry_time_limit_and_certificate() {
        let mut inv = invocation();
        inv.ordering = None;
        inv.reverse = false;
        inv.time_limit = Some(1.0);
        inv.certificate = Some(PathBuf::from("solution.txt"));
        let args = strings(inv.args());
        assert!(!args.contains(&"--ordering".to_string()));
        assert!(!args.contains(&"--reverse".to_string()));
        let pos = args.iter().position(|a| a == "--time-limit").expect("limit");
        assert_eq!(args[pos + 1], "1");
        let pos = args.iter().position(|a| a == "--certificate").expect("cert");
        assert_eq!(args[pos + 1], "solution.txt");
        assert_eq!(args[args.len() - 2], "--output");
    }

    #[test]
    fn paths_with_spaces_stay_single_arguments() {
        let mut inv = invocation();
        inv.input = PathBuf::from("data/my graphs/a b.col");
        let args = strings(inv.args());
        assert!(args.contains(&"data/my graphs/a b.col".to_string()));
        let shown = inv.display_command(Path::new("./main"));
        assert!(shown.contains("'data/my graphs/a b.col'"), "{}", shown);
    }

    #[test]
    fn status_success_only_for_zero_exit() {
        assert!(SolverStatus::Exited(0).success());
        assert!(!SolverStatus::Exited(2).success());
        assert!(!SolverStatus::Signaled.success());
        assert_eq!(SolverStatus::Exited(3).to_string(), "exit code 3");
    }

    #[cfg(unix)]
    #[test]
    fn process_executor_reports_exit_code() {
        let mut ok = ProcessExecutor::new("true");
        assert_eq!(
            ok.execute(&invocation()).expect("spawn true"),
            SolverStatus::Exited(0)
        );
        let mut failing = ProcessExecutor::new("false");
        assert_eq!(
            failing.execute(&invocation()).expect("spawn false"),
            SolverStatus::Exited(1)
        );
        let mut missing = ProcessExecutor::new("/nonexistent/colorbench/solver");
        assert!(missing.execute(&invocation()).is_err());
    }
}
