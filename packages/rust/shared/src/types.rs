//! Core domain types shared across kubepull crates.

use std::sync::LazyLock;

use regex::Regex;
use url::{Host, Url};
use uuid::Uuid;

use crate::error::{KubepullError, Result};

/// Suffix appended to the cluster name to form the user entry name.
pub const USER_NAME_SUFFIX: &str = "-user";

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 identifying one invocation (time-sortable, used in logs and temp dirs).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ClusterName
// ---------------------------------------------------------------------------

/// A validated cluster identifier: letters, digits, hyphen and underscore only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterName(String);

impl ClusterName {
    /// Validate and wrap a caller-supplied cluster name.
    pub fn parse(name: &str) -> Result<Self> {
        static NAME_RE: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex"));

        if NAME_RE.is_match(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(KubepullError::validation(format!(
                "cluster name '{name}' is invalid: use only letters, digits, '-' and '_'"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the user entry belonging to this cluster (`<name>-user`).
    pub fn user_name(&self) -> String {
        format!("{}{USER_NAME_SUFFIX}", self.0)
    }
}

impl std::fmt::Display for ClusterName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ClusterName {
    type Err = KubepullError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl AsRef<str> for ClusterName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// ServerAddress
// ---------------------------------------------------------------------------

/// The remote node's address: a hostname, IPv4 or IPv6 literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    host: Host<String>,
}

impl ServerAddress {
    /// Parse a server address. IPv6 literals may be given with or without brackets.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(KubepullError::validation("server address is empty"));
        }
        if raw.starts_with('-') {
            return Err(KubepullError::validation(format!(
                "server address '{raw}' must not start with '-'"
            )));
        }
        if raw.contains(['/', '@', ' ']) {
            return Err(KubepullError::validation(format!(
                "server address '{raw}' must be a bare host or IP (no user, path or spaces)"
            )));
        }

        let candidate = if raw.contains(':') && !raw.starts_with('[') {
            format!("[{raw}]")
        } else {
            raw.to_string()
        };

        let host = Host::parse(&candidate).map_err(|e| {
            KubepullError::validation(format!("server address '{raw}' is invalid: {e}"))
        })?;

        Ok(Self { host })
    }

    /// Host as `ssh` expects it (IPv6 without brackets).
    pub fn ssh_host(&self) -> String {
        match &self.host {
            Host::Ipv6(addr) => addr.to_string(),
            other => other.to_string(),
        }
    }

    /// Host as it appears inside a URL (IPv6 bracketed).
    pub fn url_host(&self) -> String {
        self.host.to_string()
    }

    /// Default API server endpoint for this address.
    pub fn endpoint(&self, api_port: u16) -> Result<Url> {
        let raw = format!("https://{}:{api_port}", self.url_host());
        Url::parse(&raw).map_err(|e| KubepullError::validation(format!("bad endpoint {raw}: {e}")))
    }
}

impl std::fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.host)
    }
}

// ---------------------------------------------------------------------------
// Secret
// ---------------------------------------------------------------------------

/// A password that never shows up in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the underlying value. Only pass it to the process that needs it.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}
