//! Error types for kubepull.
//!
//! Library crates use [`KubepullError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all kubepull operations.
#[derive(Debug, thiserror::Error)]
pub enum KubepullError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Caller-supplied input rejected before any I/O (cluster name, key file, address).
    #[error("invalid input: {message}")]
    InputValidation { message: String },

    /// A required external program is not installed or not runnable.
    #[error("missing dependency `{tool}`: {reason}")]
    DependencyMissing { tool: String, reason: String },

    /// Remote fetch failed: unreachable host, remote command failure, or empty document.
    #[error("remote fetch failed: {0}")]
    RemoteFetch(String),

    /// A credentials document could not be parsed or is missing required fields.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Every configured merge strategy failed.
    #[error("merge failed: {0}")]
    Merge(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, KubepullError>;

impl KubepullError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an input validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::InputValidation {
            message: msg.into(),
        }
    }

    /// Create a missing-dependency error for `tool`.
    pub fn dependency(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DependencyMissing {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    /// Create a remote fetch error from any displayable message.
    pub fn remote(msg: impl Into<String>) -> Self {
        Self::RemoteFetch(msg.into())
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a merge error from any displayable message.
    pub fn merge(msg: impl Into<String>) -> Self {
        Self::Merge(msg.into())
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
