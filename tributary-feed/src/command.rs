//! Spawning the backend executable and classifying its exit status.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, warn};

use crate::error::FeedError;

/// Exit codes a read-only query may return and still be trusted. The backend
/// returns `1` for some successful queries.
pub const QUERY_EXIT_CODES: &[i32] = &[0, 1];
/// Exit codes a mutating command may return.
pub const STRICT_EXIT_CODES: &[i32] = &[0];

/// Captured result of one backend invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub command: String,
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    fn detail(&self) -> String {
        let mut detail = format!("exit code {}", self.exit_code);
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            detail.push_str(&format!("\nstderr: {stderr}"));
        }
        let stdout = self.stdout_text();
        let stdout = stdout.trim();
        if !stdout.is_empty() {
            detail.push_str(&format!("\nstdout: {stdout}"));
        }
        detail
    }
}

/// Runs `<executable> <args...>` with an optional working directory.
#[derive(Debug, Clone)]
pub struct Runner {
    executable: PathBuf,
}

impl Runner {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Run and return the output whatever the exit code.
    pub fn run(&self, args: &[String], cwd: Option<&Path>) -> Result<CommandOutput, FeedError> {
        let command = self.describe(args);
        debug!(%command, "running backend command");

        let mut process = Command::new(&self.executable);
        process.args(args);
        if let Some(dir) = cwd {
            process.current_dir(dir);
        }
        let output = process.output().map_err(|e| FeedError::BackendUnavailable {
            command: command.clone(),
            detail: format!("could not start {}: {e}", self.executable.display()),
        })?;

        let out = CommandOutput {
            command,
            exit_code: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if !out.stderr.trim().is_empty() {
            warn!(command = %out.command, stderr = %out.stderr.trim(), "backend wrote to stderr");
        }
        Ok(out)
    }

    /// Run and fail unless the exit code is in `accepted`.
    pub fn checked(
        &self,
        args: &[String],
        cwd: Option<&Path>,
        accepted: &[i32],
    ) -> Result<CommandOutput, FeedError> {
        let output = self.run(args, cwd)?;
        classify(output, accepted)
    }

    fn describe(&self, args: &[String]) -> String {
        let program = self
            .executable
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.executable.display().to_string());
        std::iter::once(program)
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Map a finished command to `Ok` or the error taxonomy.
pub fn classify(output: CommandOutput, accepted: &[i32]) -> Result<CommandOutput, FeedError> {
    if accepted.contains(&output.exit_code) {
        return Ok(output);
    }
    let detail = output.detail();
    if mentions_authentication(&output.stderr) || mentions_authentication(&output.stdout_text()) {
        return Err(FeedError::AuthenticationFailed {
            command: output.command,
            detail,
        });
    }
    Err(FeedError::BackendUnavailable {
        command: output.command,
        detail,
    })
}

fn mentions_authentication(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("failed authentication")
        || lower.contains("not authenticated")
        || lower.contains("expired")
        || lower.contains("not logged in")
}

/// `["a", "b"]` → owned argument vector.
pub(crate) fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(code: i32, stderr: &str) -> CommandOutput {
        CommandOutput {
            command: "accurev hist".into(),
            exit_code: code,
            stdout: b"partial".to_vec(),
            stderr: stderr.into(),
        }
    }

    #[test]
    fn tolerated_codes_pass() {
        assert!(classify(output(1, ""), QUERY_EXIT_CODES).is_ok());
        assert!(classify(output(1, ""), STRICT_EXIT_CODES).is_err());
    }

    #[test]
    fn authentication_message_is_classified() {
        let err = classify(output(2, "Failed authentication for user"), QUERY_EXIT_CODES)
            .unwrap_err();
        assert!(err.is_authentication(), "got {err}");
    }

    #[test]
    fn other_failures_are_backend_unavailable() {
        let err = classify(output(3, "connection refused"), QUERY_EXIT_CODES).unwrap_err();
        match err {
            FeedError::BackendUnavailable { command, detail } => {
                assert_eq!(command, "accurev hist");
                assert!(detail.contains("exit code 3"));
                assert!(detail.contains("connection refused"));
                assert!(detail.contains("partial"));
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn missing_executable_is_backend_unavailable() {
        let runner = Runner::new("/definitely/not/accurev");
        let err = runner.run(&args(["info"]), None).unwrap_err();
        assert!(matches!(err, FeedError::BackendUnavailable { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn captures_stdout_and_exit_code() {
        let runner = Runner::new("sh");
        let out = runner
            .run(&args(["-c", "printf hello; exit 1"]), None)
            .expect("run");
        assert_eq!(out.exit_code, 1);
        assert_eq!(out.stdout_text(), "hello");
        assert!(out.command.starts_with("sh -c"));
    }
}
