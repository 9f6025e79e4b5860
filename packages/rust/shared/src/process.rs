//! Helpers for running the external programs kubepull depends on.

use std::ffi::OsStr;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::{KubepullError, Result};

/// Captured result of a finished external command.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Exit code, `None` if killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Best short description of a failure for error messages.
    pub fn failure_detail(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.lines().last().unwrap_or(stderr).to_string();
        }
        match self.code {
            Some(code) => format!("exited with status {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Check that `program` is installed by running it with `version_args`.
///
/// Returns the first line of whatever the program printed (some tools
/// report their version on stderr).
pub fn require_tool(program: &str, version_args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(version_args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| KubepullError::dependency(program, format!("not runnable: {e}")))?;

    if !output.status.success() {
        return Err(KubepullError::dependency(
            program,
            format!("`{program} {}` failed with {}", version_args.join(" "), output.status),
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let version = stdout
        .lines()
        .chain(stderr.lines())
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
        .to_string();

    debug!(program, %version, "tool found");
    Ok(version)
}

/// Run `program` to completion, capturing stdout and stderr.
///
/// A non-zero exit is not an error here; callers decide via [`ToolOutput::success`].
pub fn run_tool<I, S>(program: &str, args: I, envs: &[(&str, &OsStr)]) -> Result<ToolOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null());
    for (key, value) in envs {
        cmd.env(key, value);
    }

    let output = cmd
        .output()
        .map_err(|e| KubepullError::dependency(program, format!("failed to spawn: {e}")))?;

    Ok(ToolOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tool_is_dependency_error() {
        let err = require_tool("kubepull-definitely-not-installed", &["--version"]).unwrap_err();
        assert!(matches!(err, KubepullError::DependencyMissing { .. }));
    }

    #[test]
    fn failure_detail_prefers_last_stderr_line() {
        let out = ToolOutput {
            code: Some(255),
            stdout: String::new(),
            stderr: "Warning: something\nssh: connect to host 10.0.0.5 port 22: Connection refused\n"
                .into(),
        };
        assert!(!out.success());
        assert_eq!(
            out.failure_detail(),
            "ssh: connect to host 10.0.0.5 port 22: Connection refused"
        );
    }

    #[test]
    fn failure_detail_falls_back_to_status() {
        let out = ToolOutput {
            code: Some(3),
            stdout: String::new(),
            stderr: "  ".into(),
        };
        assert_eq!(out.failure_detail(), "exited with status 3");
    }

    #[cfg(unix)]
    #[test]
    fn run_tool_captures_stdout_and_env() {
        let out = run_tool(
            "sh",
            ["-c", "printf '%s' \"$KP_TEST_VALUE\""],
            &[("KP_TEST_VALUE", OsStr::new("hello"))],
        )
        .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "hello");
    }
}
