//! In-memory [`RemoteShell`] for tests and dry runs against canned output.

use std::sync::Mutex;

use kubepull_shared::{KubepullError, Result};

use crate::{RemoteOutput, RemoteShell};

#[derive(Debug, Clone)]
enum Reply {
    Output(RemoteOutput),
    Unreachable(String),
}

/// Replays a fixed reply for every command and records what was asked.
#[derive(Debug)]
pub struct MockShell {
    reply: Reply,
    commands: Mutex<Vec<String>>,
}

impl MockShell {
    /// Every command succeeds and prints `stdout`.
    pub fn succeeding(stdout: impl Into<String>) -> Self {
        Self::with_reply(Reply::Output(RemoteOutput {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }))
    }

    /// Every command exits with `code` and prints `stderr`.
    pub fn failing(code: i32, stderr: impl Into<String>) -> Self {
        Self::with_reply(Reply::Output(RemoteOutput {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }))
    }

    /// The session can never be established.
    pub fn unreachable(reason: impl Into<String>) -> Self {
        Self::with_reply(Reply::Unreachable(reason.into()))
    }

    fn with_reply(reply: Reply) -> Self {
        Self {
            reply,
            commands: Mutex::new(Vec::new()),
        }
    }

    /// Commands received so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }
}

impl RemoteShell for MockShell {
    fn target(&self) -> String {
        "mock@node".to_string()
    }

    async fn exec(&self, command: &str) -> Result<RemoteOutput> {
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command.to_string());
        }
        match &self.reply {
            Reply::Output(out) => Ok(out.clone()),
            Reply::Unreachable(reason) => Err(KubepullError::remote(reason.clone())),
        }
    }
}
