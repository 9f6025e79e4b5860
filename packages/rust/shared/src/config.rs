//! Application configuration for kubepull.
//!
//! User config lives at `~/.kubepull/kubepull.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{KubepullError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "kubepull.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".kubepull";

// ---------------------------------------------------------------------------
// Config structs (matching kubepull.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote shell settings.
    #[serde(default)]
    pub ssh: SshConfig,

    /// Local credentials file settings.
    #[serde(default)]
    pub kubeconfig: KubeconfigConfig,

    /// External program names.
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Merge strategy settings.
    #[serde(default)]
    pub merge: MergeConfig,
}

/// `[ssh]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    /// Remote login user.
    #[serde(default = "default_ssh_user")]
    pub user: String,

    /// Private key used when no password is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,

    /// Remote SSH port.
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Bound on connection establishment.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Overall deadline for the remote read command.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Location of the admin credentials file on the node.
    #[serde(default = "default_remote_config_path")]
    pub remote_config_path: String,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: default_ssh_user(),
            key_path: None,
            port: default_ssh_port(),
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: default_command_timeout(),
            remote_config_path: default_remote_config_path(),
        }
    }
}

fn default_ssh_user() -> String {
    "root".into()
}
fn default_ssh_port() -> u16 {
    22
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_command_timeout() -> u64 {
    30
}
fn default_remote_config_path() -> String {
    "/etc/rancher/rke2/rke2.yaml".into()
}

/// `[kubeconfig]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubeconfigConfig {
    /// Local credentials file. Defaults to `~/.kube/config`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// API server port used when the fetched document has no usable server URL.
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

impl Default for KubeconfigConfig {
    fn default() -> Self {
        Self {
            path: None,
            api_port: default_api_port(),
        }
    }
}

fn default_api_port() -> u16 {
    6443
}

/// `[tools]` section: program names, looked up on `PATH`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_ssh")]
    pub ssh: String,
    #[serde(default = "default_sshpass")]
    pub sshpass: String,
    #[serde(default = "default_kubectl")]
    pub kubectl: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ssh: default_ssh(),
            sshpass: default_sshpass(),
            kubectl: default_kubectl(),
        }
    }
}

fn default_ssh() -> String {
    "ssh".into()
}
fn default_sshpass() -> String {
    "sshpass".into()
}
fn default_kubectl() -> String {
    "kubectl".into()
}

/// A merge tier, tried in the configured order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeTier {
    /// `kubectl config view --flatten` over both files.
    Kubectl,
    /// In-process structured YAML merge.
    Yaml,
    /// Text concatenation (degraded).
    Concat,
}

impl MergeTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kubectl => "kubectl",
            Self::Yaml => "yaml",
            Self::Concat => "concat",
        }
    }
}

/// `[merge]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Tiers in order of preference.
    #[serde(default = "default_merge_order")]
    pub order: Vec<MergeTier>,

    /// Query the cluster with kubectl after writing.
    #[serde(default = "default_true")]
    pub verify: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            order: default_merge_order(),
            verify: true,
        }
    }
}

fn default_merge_order() -> Vec<MergeTier> {
    vec![MergeTier::Kubectl, MergeTier::Yaml, MergeTier::Concat]
}
fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// Expand a leading `~/` against the user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    if path == "~" {
        return home_dir();
    }
    match path.strip_prefix("~/") {
        Some(rest) => Ok(home_dir()?.join(rest)),
        None => Ok(PathBuf::from(path)),
    }
}

fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or_else(|| KubepullError::config("could not determine home directory"))
}

/// Default local credentials path (`~/.kube/config`).
pub fn default_kubeconfig_path() -> Result<PathBuf> {
    Ok(home_dir()?.join(".kube").join("config"))
}

impl AppConfig {
    /// Resolve the local credentials path from config, falling back to `~/.kube/config`.
    pub fn kubeconfig_path(&self) -> Result<PathBuf> {
        match &self.kubeconfig.path {
            Some(p) => expand_home(p),
            None => default_kubeconfig_path(),
        }
    }

    /// Resolve the configured key path, if any.
    pub fn key_path(&self) -> Result<Option<PathBuf>> {
        self.ssh.key_path.as_deref().map(expand_home).transpose()
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.kubepull/`).
pub fn config_dir() -> Result<PathBuf> {
    Ok(home_dir()?.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.kubepull/kubepull.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| KubepullError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        KubepullError::config(format!("failed to parse {}: {e}", path.display()))
    })?;

    validate_config(&config)?;
    Ok(config)
}

/// Reject configs that cannot drive a run.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.merge.order.is_empty() {
        return Err(KubepullError::config("[merge] order must name at least one tier"));
    }
    if config.ssh.user.trim().is_empty() {
        return Err(KubepullError::config("[ssh] user must not be empty"));
    }
    if config.ssh.connect_timeout_secs == 0 {
        return Err(KubepullError::config("[ssh] connect_timeout_secs must be positive"));
    }
    Ok(())
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| KubepullError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    if path.exists() {
        return Err(KubepullError::config(format!(
            "{} already exists; remove it first to regenerate defaults",
            path.display()
        )));
    }

    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| KubepullError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| KubepullError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
