//! Sandboxed test oracle.
//!
//! The working tree is mounted into an isolated container and a fixed shell
//! command decides pass/fail by exit code. Every failure mode (non-zero
//! exit, wall-clock timeout, Docker missing) is a failed run with a log,
//! never a crash: the repair loop decides what happens next.

use crate::lang::failing_test_hint;
use crate::util::run_command_with_timeout;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Only the log tail reaches the oracle; failures summarize at the end.
const MAX_LOG_CHARS: usize = 4000;

/// Result of one sandboxed test run.
#[derive(Debug, Clone)]
pub struct TestRun {
    pub passed: bool,
    pub log: String,
    /// Best-effort guess at the failing test file, extracted from the log.
    pub failing_file_hint: Option<PathBuf>,
}

impl TestRun {
    pub fn passed(log: String) -> Self {
        Self {
            passed: true,
            log,
            failing_file_hint: None,
        }
    }

    pub fn failed(log: String) -> Self {
        let failing_file_hint = failing_test_hint(&log).map(PathBuf::from);
        Self {
            passed: false,
            log,
            failing_file_hint,
        }
    }
}

/// The black-box test oracle: run the suite against a working tree.
pub trait TestOracle: Send + Sync {
    fn run(&self, repo_root: &Path) -> TestRun;
}

/// Docker-backed test oracle.
pub struct DockerSandbox {
    image: String,
    command: String,
    timeout: Duration,
}

impl DockerSandbox {
    pub fn new(image: String, command: String, timeout: Duration) -> Self {
        Self {
            image,
            command,
            timeout,
        }
    }
}

impl TestOracle for DockerSandbox {
    fn run(&self, repo_root: &Path) -> TestRun {
        let abs_path = repo_root
            .canonicalize()
            .unwrap_or_else(|_| repo_root.to_path_buf());
        let mount = format!("{}:/app", abs_path.display());

        eprintln!("  Sandbox: {} ({})", self.image, self.command);

        let mut cmd = Command::new("docker");
        cmd.args([
            "run",
            "--rm",
            "-v",
            &mount,
            "-w",
            "/app",
            &self.image,
            "/bin/bash",
            "-c",
            &self.command,
        ]);

        let output = match run_command_with_timeout(&mut cmd, self.timeout) {
            Ok(output) => output,
            Err(err) => {
                // Docker itself is unreachable; report a failed run so the
                // repair loop (and the published PR) records it.
                return TestRun::failed(format!("Docker not available: {}", err));
            }
        };

        if output.timed_out {
            return TestRun::failed(format!(
                "Test run timed out after {}s\n{}",
                self.timeout.as_secs(),
                output.combined_tail(MAX_LOG_CHARS)
            ));
        }

        let log = output.combined_tail(MAX_LOG_CHARS);
        if output.success() {
            TestRun::passed(log)
        } else {
            TestRun::failed(log)
        }
    }
}
