//! `RemoteShell` over the system OpenSSH client.
//!
//! Key and agent authentication run `ssh` directly in batch mode. Password
//! authentication wraps it in `sshpass -e`, handing the secret over through
//! the `SSHPASS` environment variable so it never appears in the process list.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use kubepull_shared::{KubepullError, Result, Secret, ServerAddress, require_tool};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{RemoteOutput, RemoteShell};

/// Exit status `ssh` uses for its own failures (connect, auth, host key).
const SSH_CLIENT_ERROR: i32 = 255;

/// How the remote login is authenticated.
#[derive(Debug, Clone)]
pub enum AuthMethod {
    /// Whatever the local ssh config and agent provide.
    Agent,
    /// A private key file.
    Key(PathBuf),
    /// A password, fed to `sshpass`.
    Password(Secret),
}

/// Immutable connection settings for one run.
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub address: ServerAddress,
    pub user: String,
    pub port: u16,
    pub auth: AuthMethod,
    /// Bound on TCP connect + handshake (`ConnectTimeout`).
    pub connect_timeout: Duration,
    /// Overall deadline for the remote command.
    pub command_timeout: Duration,
    pub ssh_program: String,
    pub sshpass_program: String,
}

/// Executes commands with the `ssh` binary.
#[derive(Debug, Clone)]
pub struct SshShell {
    opts: SshOptions,
}

/// A fully assembled local invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub password_env: bool,
}

impl SshShell {
    /// Validate inputs and check the required programs are installed.
    ///
    /// Input problems (missing key file) are reported before dependency
    /// problems, and neither touches the network.
    pub fn new(opts: SshOptions) -> Result<Self> {
        if let AuthMethod::Key(path) = &opts.auth {
            if !path.is_file() {
                return Err(KubepullError::validation(format!(
                    "SSH key file {} does not exist",
                    path.display()
                )));
            }
        }

        require_tool(&opts.ssh_program, &["-V"])?;

        if matches!(opts.auth, AuthMethod::Password(_)) {
            require_tool(&opts.sshpass_program, &["-V"]).map_err(|_| {
                KubepullError::dependency(
                    &opts.sshpass_program,
                    "required for password authentication; install sshpass or use --key",
                )
            })?;
        }

        Ok(Self { opts })
    }

    /// Assemble the local command line for `remote_command`.
    pub(crate) fn invocation(&self, remote_command: &str) -> Invocation {
        let opts = &self.opts;
        let mut args: Vec<String> = vec![
            "-o".into(),
            format!("ConnectTimeout={}", opts.connect_timeout.as_secs().max(1)),
            "-o".into(),
            "StrictHostKeyChecking=accept-new".into(),
            "-o".into(),
            "LogLevel=ERROR".into(),
            "-p".into(),
            opts.port.to_string(),
            "-l".into(),
            opts.user.clone(),
        ];

        match &opts.auth {
            AuthMethod::Agent => {
                args.extend(["-o".into(), "BatchMode=yes".into()]);
            }
            AuthMethod::Key(path) => {
                args.extend([
                    "-i".into(),
                    path.display().to_string(),
                    "-o".into(),
                    "IdentitiesOnly=yes".into(),
                    "-o".into(),
                    "BatchMode=yes".into(),
                ]);
            }
            AuthMethod::Password(_) => {
                args.extend([
                    "-o".into(),
                    "PreferredAuthentications=password,keyboard-interactive".into(),
                    "-o".into(),
                    "PubkeyAuthentication=no".into(),
                    "-o".into(),
                    "NumberOfPasswordPrompts=1".into(),
                ]);
            }
        }

        args.push("--".into());
        args.push(opts.address.ssh_host());
        args.push(remote_command.to_string());

        match &opts.auth {
            AuthMethod::Password(_) => {
                let mut wrapped = vec!["-e".to_string(), opts.ssh_program.clone()];
                wrapped.extend(args);
                Invocation {
                    program: opts.sshpass_program.clone(),
                    args: wrapped,
                    password_env: true,
                }
            }
            _ => Invocation {
                program: opts.ssh_program.clone(),
                args,
                password_env: false,
            },
        }
    }
}

impl RemoteShell for SshShell {
    fn target(&self) -> String {
        format!("{}@{}:{}", self.opts.user, self.opts.address, self.opts.port)
    }

    async fn exec(&self, command: &str) -> Result<RemoteOutput> {
        let invocation = self.invocation(command);
        debug!(program = %invocation.program, target = %self.target(), "spawning remote command");

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let AuthMethod::Password(secret) = &self.opts.auth {
            cmd.env("SSHPASS", secret.expose());
        }

        let child = cmd.spawn().map_err(|e| {
            KubepullError::dependency(&invocation.program, format!("failed to spawn: {e}"))
        })?;

        let output = tokio::time::timeout(self.opts.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                KubepullError::remote(format!(
                    "{} did not answer within {}s",
                    self.target(),
                    self.opts.command_timeout.as_secs()
                ))
            })?
            .map_err(|e| KubepullError::remote(format!("ssh session failed: {e}")))?;

        let remote = RemoteOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        // 255 is ssh itself failing; sshpass uses 5 for a rejected password.
        match (remote.code, invocation.password_env) {
            (Some(SSH_CLIENT_ERROR), _) => {
                warn!(remote = %self.target(), "ssh connection failed");
                Err(KubepullError::remote(connection_detail(&remote, &self.target())))
            }
            (Some(5), true) => Err(KubepullError::remote(format!(
                "password rejected by {}",
                self.target()
            ))),
            _ => Ok(remote),
        }
    }
}

fn connection_detail(output: &RemoteOutput, target: &str) -> String {
    let stderr = output.stderr.trim();
    if stderr.is_empty() {
        format!("could not connect to {target}")
    } else {
        format!("could not connect to {target}: {stderr}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(auth: AuthMethod) -> SshOptions {
        SshOptions {
            address: ServerAddress::parse("10.0.0.5").unwrap(),
            user: "root".into(),
            port: 2222,
            auth,
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(30),
            ssh_program: "ssh".into(),
            sshpass_program: "sshpass".into(),
        }
    }

    fn shell(auth: AuthMethod) -> SshShell {
        // Bypass `new` so tests do not depend on installed programs.
        SshShell { opts: opts(auth) }
    }

    #[test]
    fn agent_invocation_runs_ssh_in_batch_mode() {
        let inv = shell(AuthMethod::Agent).invocation("cat -- /etc/rancher/rke2/rke2.yaml");
        assert_eq!(inv.program, "ssh");
        assert!(!inv.password_env);
        assert!(inv.args.contains(&"ConnectTimeout=10".to_string()));
        assert!(inv.args.contains(&"BatchMode=yes".to_string()));
        assert!(inv.args.windows(2).any(|w| w == ["-p", "2222"]));
        assert!(inv.args.windows(2).any(|w| w == ["-l", "root"]));

        let n = inv.args.len();
        assert_eq!(inv.args[n - 3], "--");
        assert_eq!(inv.args[n - 2], "10.0.0.5");
        assert_eq!(inv.args[n - 1], "cat -- /etc/rancher/rke2/rke2.yaml");
    }

    #[test]
    fn key_invocation_pins_identity() {
        let inv = shell(AuthMethod::Key(PathBuf::from("/home/me/.ssh/id_ed25519")))
            .invocation("true");
        assert!(inv.args.windows(2).any(|w| w == ["-i", "/home/me/.ssh/id_ed25519"]));
        assert!(inv.args.contains(&"IdentitiesOnly=yes".to_string()));
    }

    #[test]
    fn password_invocation_wraps_sshpass_without_secret_in_args() {
        let inv = shell(AuthMethod::Password(Secret::new("hunter2"))).invocation("true");
        assert_eq!(inv.program, "sshpass");
        assert_eq!(inv.args[0], "-e");
        assert_eq!(inv.args[1], "ssh");
        assert!(inv.password_env);
        assert!(inv.args.iter().all(|a| !a.contains("hunter2")));
        assert!(!inv.args.contains(&"BatchMode=yes".to_string()));
    }

    #[test]
    fn target_is_user_host_port() {
        assert_eq!(shell(AuthMethod::Agent).target(), "root@10.0.0.5:2222");
    }

    #[test]
    fn missing_key_file_is_input_error() {
        let err = SshShell::new(opts(AuthMethod::Key(PathBuf::from(
            "/nonexistent/kubepull/test_key",
        ))))
        .unwrap_err();
        assert!(matches!(err, KubepullError::InputValidation { .. }));
    }

    #[cfg(unix)]
    mod stubbed {
        use super::*;
        use std::path::Path;

        /// Write an executable `sh` script standing in for ssh or sshpass.
        fn stub(dir: &Path, name: &str, body: &str) -> String {
            use std::os::unix::fs::PermissionsExt;

            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path.display().to_string()
        }

        fn stubbed_shell(auth: AuthMethod, ssh: String, sshpass: String) -> SshShell {
            let mut o = opts(auth);
            o.ssh_program = ssh;
            o.sshpass_program = sshpass;
            o.command_timeout = Duration::from_secs(5);
            SshShell { opts: o }
        }

        #[tokio::test]
        async fn successful_command_returns_output_and_separates_host() {
            let tmp = tempfile::tempdir().unwrap();
            // Echo back the three trailing arguments: `--`, host, command.
            let ssh = stub(
                tmp.path(),
                "ssh",
                r#"while [ $# -gt 3 ]; do shift; done; printf '%s|%s|%s' "$1" "$2" "$3""#,
            );
            let shell = stubbed_shell(AuthMethod::Agent, ssh, "unused".into());

            let out = shell.exec("cat -- /etc/rancher/rke2/rke2.yaml").await.unwrap();
            assert!(out.success());
            assert_eq!(out.stdout, "--|10.0.0.5|cat -- /etc/rancher/rke2/rke2.yaml");
        }

        #[tokio::test]
        async fn ssh_exit_255_is_connection_error() {
            let tmp = tempfile::tempdir().unwrap();
            let ssh = stub(
                tmp.path(),
                "ssh",
                "echo 'ssh: connect to host 10.0.0.5 port 2222: Connection refused' >&2; exit 255",
            );
            let shell = stubbed_shell(AuthMethod::Agent, ssh, "unused".into());

            let err = shell.exec("true").await.unwrap_err();
            assert!(matches!(err, KubepullError::RemoteFetch(_)));
            assert!(err.to_string().contains("could not connect to root@10.0.0.5:2222"));
            assert!(err.to_string().contains("Connection refused"));
        }

        #[tokio::test]
        async fn sshpass_exit_5_is_rejected_password() {
            let tmp = tempfile::tempdir().unwrap();
            let ssh = stub(tmp.path(), "ssh", "exit 0");
            // Fail unless the secret arrived through the environment.
            let sshpass = stub(
                tmp.path(),
                "sshpass",
                r#"[ "$SSHPASS" = "hunter2" ] || exit 99; exit 5"#,
            );
            let shell = stubbed_shell(AuthMethod::Password(Secret::new("hunter2")), ssh, sshpass);

            let err = shell.exec("true").await.unwrap_err();
            assert!(matches!(err, KubepullError::RemoteFetch(_)));
            assert!(err.to_string().contains("password rejected"));
        }

        #[tokio::test]
        async fn exit_5_without_password_is_plain_output() {
            let tmp = tempfile::tempdir().unwrap();
            let ssh = stub(tmp.path(), "ssh", "echo 'cat: denied' >&2; exit 5");
            let shell = stubbed_shell(AuthMethod::Agent, ssh, "unused".into());

            let out = shell.exec("true").await.unwrap();
            assert_eq!(out.code, Some(5));
            assert_eq!(out.stderr.trim(), "cat: denied");
        }

        #[tokio::test]
        async fn slow_command_times_out() {
            let tmp = tempfile::tempdir().unwrap();
            let ssh = stub(tmp.path(), "ssh", "sleep 5");
            let mut shell = stubbed_shell(AuthMethod::Agent, ssh, "unused".into());
            shell.opts.command_timeout = Duration::from_millis(200);

            let started = std::time::Instant::now();
            let err = shell.exec("true").await.unwrap_err();
            assert!(matches!(err, KubepullError::RemoteFetch(_)));
            assert!(err.to_string().contains("did not answer"));
            assert!(started.elapsed() < Duration::from_secs(4));
        }
    }

    #[test]
    fn missing_ssh_binary_is_dependency_error() {
        let mut o = opts(AuthMethod::Agent);
        o.ssh_program = "kubepull-missing-ssh".into();
        let err = SshShell::new(o).unwrap_err();
        assert!(matches!(err, KubepullError::DependencyMissing { .. }));
    }
}
