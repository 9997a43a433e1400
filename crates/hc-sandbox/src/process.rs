//! Process execution capability.
//!
//! Every container operation is a one-shot external command. The sandbox
//! code only looks at the exit status and the captured, trimmed output.

use async_trait::async_trait;
use std::process::Stdio;

/// Captured result of a finished external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// True if the process exited with status 0.
    pub success: bool,
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Standard output, trimmed.
    pub stdout: String,
    /// Standard error, trimmed.
    pub stderr: String,
}

impl ProcessOutput {
    /// A successful run that printed `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed run with the given exit code and error output.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Short description of the failure for error messages.
    pub fn failure_summary(&self) -> String {
        let status = match self.code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        };
        if self.stderr.is_empty() {
            status
        } else {
            format!("{status}: {}", self.stderr)
        }
    }
}

/// Runs external commands to completion.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `program` with `args` and capture its output.
    ///
    /// An `Err` means the process could not be spawned at all; a non-zero
    /// exit is reported through [`ProcessOutput::success`].
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<ProcessOutput>;
}

/// Runs commands on the host with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl ProcessRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<ProcessOutput> {
        let start = std::time::Instant::now();
        tracing::debug!(program, ?args, "Running command");

        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        let result = ProcessOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };

        tracing::trace!(
            program,
            success = result.success,
            code = ?result.code,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Command finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_summary() {
        assert_eq!(
            ProcessOutput::failed(125, "no such image").failure_summary(),
            "exit code 125: no such image"
        );
        assert_eq!(ProcessOutput::failed(1, "").failure_summary(), "exit code 1");

        let killed = ProcessOutput {
            success: false,
            code: None,
            ..Default::default()
        };
        assert_eq!(killed.failure_summary(), "terminated by signal");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_trims_output() {
        let output = SystemRunner
            .run("sh", &["-c".to_string(), "echo '  abc  '; echo oops >&2; exit 3".to_string()])
            .await
            .expect("sh should spawn");

        assert!(!output.success);
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout, "abc");
        assert_eq!(output.stderr, "oops");
    }

    #[tokio::test]
    async fn test_system_runner_missing_binary() {
        let result = SystemRunner
            .run("hc-definitely-not-a-real-binary", &[])
            .await;
        assert!(result.is_err());
    }
}
