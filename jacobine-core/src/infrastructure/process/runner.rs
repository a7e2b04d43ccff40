//! Launch external binaries and capture their outcome.
//!
//! Stages shell out to tar, git, and the analysis tools through this
//! runner. Arguments are passed as an argv vector; the runner does no
//! quoting beyond what the OS spawn API provides, and binary paths from
//! configuration are treated as trusted.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::debug;

/// The runner's long default timeout when a tool has none configured.
const DEFAULT_TIMEOUT_SECS: u64 = 3600;

/// A child process invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    current_dir: Option<std::path::PathBuf>,
    timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// `None` inherits the runner's long default.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// The full command line, for logs and error reports.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured outcome of a finished child.
#[derive(Debug, Clone)]
pub struct ProcessReport {
    pub command_line: String,
    /// `None` when the child was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessReport {
    pub fn successful(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Promote a non-zero exit into [`ProcessError::Failed`].
    pub fn require_success(self) -> Result<ProcessReport, ProcessError> {
        if self.successful() {
            Ok(self)
        } else {
            Err(ProcessError::Failed { report: self })
        }
    }

    /// Last `limit` bytes of stderr, for log lines that must stay bounded.
    pub fn stderr_tail(&self, limit: usize) -> &str {
        let mut start = self.stderr.len().saturating_sub(limit);
        while start < self.stderr.len() && !self.stderr.is_char_boundary(start) {
            start += 1;
        }
        &self.stderr[start..]
    }
}

/// Child process failures.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to launch `{command_line}`: {source}")]
    Spawn {
        command_line: String,
        #[source]
        source: std::io::Error,
    },

    #[error("waiting for `{command_line}` failed: {source}")]
    Wait {
        command_line: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{}` exceeded its timeout of {timeout:?}", report.command_line)]
    Timeout {
        report: ProcessReport,
        timeout: Duration,
    },

    #[error("`{}` exited with code {:?}", report.command_line, report.exit_code)]
    Failed { report: ProcessReport },
}

/// Spawns external binaries with a timeout and captures exit code, stdout,
/// and stderr.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    default_timeout: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self {
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub async fn run(&self, spec: CommandSpec) -> Result<ProcessReport, ProcessError> {
        let command_line = spec.command_line();
        let timeout = spec.timeout.unwrap_or(self.default_timeout);

        debug!(command = %command_line, ?timeout, "Spawning child process");

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.current_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            command_line: command_line.clone(),
            source,
        })?;

        // Drain both pipes concurrently so a chatty child cannot deadlock
        // against a full pipe buffer while we wait on it.
        let stdout_task = tokio::spawn(read_pipe(child.stdout.take()));
        let stderr_task = tokio::spawn(read_pipe(child.stderr.take()));

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(source)) => {
                return Err(ProcessError::Wait {
                    command_line,
                    source,
                });
            }
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                let report = ProcessReport {
                    command_line,
                    exit_code: None,
                    stdout: stdout_task.await.unwrap_or_default(),
                    stderr: stderr_task.await.unwrap_or_default(),
                };
                return Err(ProcessError::Timeout { report, timeout });
            }
        };

        Ok(ProcessReport {
            command_line,
            exit_code: status.code(),
            stdout: stdout_task.await.unwrap_or_default(),
            stderr: stderr_task.await.unwrap_or_default(),
        })
    }
}

async fn read_pipe<R: AsyncReadExt + Unpin>(pipe: Option<R>) -> String {
    let mut buffer = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buffer).await;
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_joins_program_and_args() {
        let spec = CommandSpec::new("tar").args(["-xzf", "release.tar.gz", "-C", "/tmp/out"]);
        assert_eq!(spec.command_line(), "tar -xzf release.tar.gz -C /tmp/out");
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let runner = ProcessRunner::new();
        let report = runner
            .run(CommandSpec::new("/bin/sh").args(["-c", "echo hello"]))
            .await
            .unwrap();
        assert!(report.successful());
        assert_eq!(report.exit_code, Some(0));
        assert_eq!(report.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn reports_non_zero_exit_via_require_success() {
        let runner = ProcessRunner::new();
        let report = runner
            .run(CommandSpec::new("/bin/sh").args(["-c", "echo oops >&2; exit 3"]))
            .await
            .unwrap();
        assert!(!report.successful());
        assert_eq!(report.exit_code, Some(3));
        assert_eq!(report.stderr.trim(), "oops");

        let err = report.require_success().unwrap_err();
        assert!(matches!(err, ProcessError::Failed { .. }));
    }

    #[tokio::test]
    async fn kills_child_on_timeout() {
        let runner = ProcessRunner::new();
        let started = std::time::Instant::now();
        let err = runner
            .run(
                CommandSpec::new("/bin/sh")
                    .args(["-c", "sleep 30"])
                    .timeout(Some(Duration::from_millis(200))),
            )
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        match err {
            ProcessError::Timeout { report, .. } => assert_eq!(report.exit_code, None),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let runner = ProcessRunner::new();
        let err = runner
            .run(CommandSpec::new("/nonexistent/binary"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[test]
    fn stderr_tail_is_bounded() {
        let report = ProcessReport {
            command_line: "x".to_string(),
            exit_code: Some(1),
            stdout: String::new(),
            stderr: "a".repeat(100),
        };
        assert_eq!(report.stderr_tail(10).len(), 10);
        assert_eq!(report.stderr_tail(1000).len(), 100);
    }
}
