//! Shared types, error model, and configuration for kubepull.
//!
//! This crate is the foundation depended on by all other kubepull crates.
//! It provides:
//! - [`KubepullError`]: the unified error type
//! - Domain types ([`ClusterName`], [`ServerAddress`], [`Secret`], [`RunId`])
//! - Configuration ([`AppConfig`], config loading)
//! - External program helpers ([`require_tool`], [`run_tool`])

pub mod config;
pub mod error;
pub mod process;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, KubeconfigConfig, MergeConfig, MergeTier, SshConfig, ToolsConfig, config_dir,
    config_file_path, default_kubeconfig_path, expand_home, init_config, load_config,
    load_config_from, validate_config,
};
pub use error::{KubepullError, Result};
pub use process::{ToolOutput, require_tool, run_tool};
pub use types::{ClusterName, RunId, Secret, ServerAddress, USER_NAME_SUFFIX};
