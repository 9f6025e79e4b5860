//! Remote command execution and credentials retrieval.
//!
//! kubepull reads the node's admin kubeconfig by running a single `cat`
//! over a remote shell session. The [`RemoteShell`] trait is the seam:
//! [`SshShell`] drives the system `ssh` client (optionally through
//! `sshpass`), and [`mock::MockShell`] serves canned output for tests.

pub mod mock;
mod ssh;

use std::future::Future;

use kubepull_shared::{KubepullError, Result};
use tracing::{debug, info, instrument};

pub use ssh::{AuthMethod, SshOptions, SshShell};

// ---------------------------------------------------------------------------
// RemoteShell
// ---------------------------------------------------------------------------

/// Output of a command run on the remote node.
#[derive(Debug, Clone, Default)]
pub struct RemoteOutput {
    /// Exit code, `None` if the session died before reporting one.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl RemoteOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Something that can run a shell command on the remote node.
pub trait RemoteShell {
    /// Human-readable target, e.g. `root@10.0.0.5:22`.
    fn target(&self) -> String;

    /// Run `command` remotely and capture its output.
    fn exec(&self, command: &str) -> impl Future<Output = Result<RemoteOutput>> + Send;
}

// ---------------------------------------------------------------------------
// Fetch
// ---------------------------------------------------------------------------

/// Build the remote command that prints the credentials file.
pub fn read_command(remote_path: &str) -> String {
    format!("cat -- {}", shell_escape::unix::escape(remote_path.into()))
}

/// Fetch the raw credentials document from `remote_path` on the node.
///
/// Fails with [`KubepullError::RemoteFetch`] when the command fails or
/// prints nothing but whitespace.
#[instrument(skip_all, fields(target = %shell.target(), remote_path = %remote_path))]
pub async fn fetch_credentials<S: RemoteShell>(shell: &S, remote_path: &str) -> Result<String> {
    let command = read_command(remote_path);
    debug!(%command, "reading remote credentials");

    let output = shell.exec(&command).await?;

    if !output.success() {
        let stderr = output.stderr.trim();
        let detail = if stderr.is_empty() {
            match output.code {
                Some(code) => format!("remote command exited with status {code}"),
                None => "remote session closed without an exit status".to_string(),
            }
        } else {
            stderr.to_string()
        };
        return Err(KubepullError::remote(format!(
            "could not read {remote_path} on {}: {detail}",
            shell.target()
        )));
    }

    if output.stdout.trim().is_empty() {
        return Err(KubepullError::remote(format!(
            "{remote_path} on {} is empty",
            shell.target()
        )));
    }

    info!(bytes = output.stdout.len(), "remote credentials fetched");
    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockShell;

    const REMOTE_PATH: &str = "/etc/rancher/rke2/rke2.yaml";

    #[test]
    fn read_command_quotes_path() {
        assert_eq!(read_command(REMOTE_PATH), "cat -- /etc/rancher/rke2/rke2.yaml");
        assert_eq!(read_command("/tmp/my config"), "cat -- '/tmp/my config'");
    }

    #[tokio::test]
    async fn fetch_returns_stdout() {
        let shell = MockShell::succeeding("apiVersion: v1\nkind: Config\n");
        let text = fetch_credentials(&shell, REMOTE_PATH).await.unwrap();
        assert!(text.starts_with("apiVersion: v1"));
        assert_eq!(shell.commands(), vec![read_command(REMOTE_PATH)]);
    }

    #[tokio::test]
    async fn fetch_empty_document_is_remote_error() {
        let shell = MockShell::succeeding("  \n\t\n");
        let err = fetch_credentials(&shell, REMOTE_PATH).await.unwrap_err();
        assert!(matches!(err, KubepullError::RemoteFetch(_)));
        assert!(err.to_string().contains("is empty"));
    }

    #[tokio::test]
    async fn fetch_nonzero_exit_reports_stderr() {
        let shell = MockShell::failing(1, "cat: /etc/rancher/rke2/rke2.yaml: No such file or directory");
        let err = fetch_credentials(&shell, REMOTE_PATH).await.unwrap_err();
        assert!(matches!(err, KubepullError::RemoteFetch(_)));
        assert!(err.to_string().contains("No such file or directory"));
    }

    #[tokio::test]
    async fn fetch_connection_error_propagates() {
        let shell = MockShell::unreachable("ssh: connect to host 10.0.0.5 port 22: Connection timed out");
        let err = fetch_credentials(&shell, REMOTE_PATH).await.unwrap_err();
        assert!(err.to_string().contains("Connection timed out"));
    }
}
