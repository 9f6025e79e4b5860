//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use kubepull_core::{
    MergeKind, ProgressReporter, PullConfig, PullReport, Stage, pull_kubeconfig,
};
use kubepull_remote::{AuthMethod, RemoteShell, SshOptions, SshShell};
use kubepull_shared::{
    AppConfig, ClusterName, Secret, ServerAddress, config_file_path, expand_home, init_config,
    load_config,
};
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// kubepull: fetch an RKE2 node's kubeconfig and merge it into your own.
#[derive(Parser, Debug)]
#[command(
    name = "kubepull",
    version,
    about = "Fetch an RKE2 node's admin kubeconfig over SSH and merge it into the local kubeconfig.",
    long_about = None,
    args_conflicts_with_subcommands = true,
    subcommand_negates_reqs = true,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(flatten)]
    pub pull: PullArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Arguments of the default (pull) command.
#[derive(Args, Debug)]
pub(crate) struct PullArgs {
    /// IP address or hostname of the RKE2 node.
    #[arg(required = true)]
    pub server_address: Option<String>,

    /// Name for the cluster, context and user entries (`[A-Za-z0-9_-]+`).
    #[arg(required = true)]
    pub cluster_name: Option<String>,

    /// Remote login user [default from config: root].
    #[arg(long)]
    pub user: Option<String>,

    /// SSH private key file.
    #[arg(long)]
    pub key: Option<PathBuf>,

    /// SSH password (requires sshpass).
    #[arg(long, env = "KUBEPULL_SSH_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Credentials file on the node [default: /etc/rancher/rke2/rke2.yaml].
    /// Use /etc/rancher/k3s/k3s.yaml for a k3s node.
    #[arg(long)]
    pub remote_config_path: Option<String>,

    /// Remote SSH port.
    #[arg(long)]
    pub port: Option<u16>,

    /// API server port for a rebuilt server URL.
    #[arg(long)]
    pub api_port: Option<u16>,

    /// Local kubeconfig to merge into [default: ~/.kube/config].
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Skip the post-write kubectl check.
    #[arg(long)]
    pub no_verify: bool,

    /// Print the merged kubeconfig instead of writing it.
    #[arg(long)]
    pub dry_run: bool,
}

/// Top-level CLI subcommands.
#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
///
/// Logs go to stderr so `--dry-run` output on stdout stays a clean document.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "kubepull=info",
        1 => "kubepull=debug",
        _ => "kubepull=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Command::Config { action }) => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
        None => cmd_pull(cli.pull).await,
    }
}

// ---------------------------------------------------------------------------
// Pull
// ---------------------------------------------------------------------------

async fn cmd_pull(args: PullArgs) -> Result<()> {
    let (address, cluster) = parse_targets(&args)?;
    let config = load_config()?;

    let ssh = ssh_options(&args, &config, &address)?;
    let pull = pull_config(&args, &config, &address, &cluster)?;

    info!(
        cluster = %cluster,
        server = %address,
        user = %ssh.user,
        port = ssh.port,
        auth = auth_label(&ssh.auth),
        "pulling kubeconfig"
    );

    let shell = SshShell::new(ssh)?;
    debug!(remote = %shell.target(), "ssh client ready");

    let reporter = CliProgress::new();
    let report = match pull_kubeconfig(&shell, &pull, &reporter).await {
        Ok(report) => report,
        Err(e) => {
            reporter.clear();
            return Err(e.into());
        }
    };

    if let Some(document) = &report.document {
        print!("{document}");
        return Ok(());
    }

    print_summary(&report);
    Ok(())
}

/// Validate the positional arguments before anything touches disk or network.
fn parse_targets(args: &PullArgs) -> Result<(ServerAddress, ClusterName)> {
    let address = args
        .server_address
        .as_deref()
        .ok_or_else(|| eyre!("missing <SERVER_ADDRESS>"))?;
    let name = args
        .cluster_name
        .as_deref()
        .ok_or_else(|| eyre!("missing <CLUSTER_NAME>"))?;

    let cluster = ClusterName::parse(name)?;
    let address = ServerAddress::parse(address)?;
    Ok((address, cluster))
}

/// Merge flags over the config file into connection settings.
///
/// Authentication precedence: `--key`, then a password (flag or
/// `KUBEPULL_SSH_PASSWORD`), then `[ssh] key_path`, then the ssh agent.
fn ssh_options(args: &PullArgs, config: &AppConfig, address: &ServerAddress) -> Result<SshOptions> {
    let auth = match (&args.key, &args.password) {
        (Some(key), _) => AuthMethod::Key(expand_home(&key.to_string_lossy())?),
        (None, Some(password)) if !password.is_empty() => {
            AuthMethod::Password(Secret::new(password.clone()))
        }
        _ => match config.key_path()? {
            Some(key) => AuthMethod::Key(key),
            None => AuthMethod::Agent,
        },
    };

    Ok(SshOptions {
        address: address.clone(),
        user: args.user.clone().unwrap_or_else(|| config.ssh.user.clone()),
        port: args.port.unwrap_or(config.ssh.port),
        auth,
        connect_timeout: Duration::from_secs(config.ssh.connect_timeout_secs),
        command_timeout: Duration::from_secs(config.ssh.command_timeout_secs),
        ssh_program: config.tools.ssh.clone(),
        sshpass_program: config.tools.sshpass.clone(),
    })
}

fn pull_config(
    args: &PullArgs,
    config: &AppConfig,
    address: &ServerAddress,
    cluster: &ClusterName,
) -> Result<PullConfig> {
    let kubeconfig_path = match &args.kubeconfig {
        Some(path) => expand_home(&path.to_string_lossy())?,
        None => config.kubeconfig_path()?,
    };

    Ok(PullConfig {
        cluster: cluster.clone(),
        address: address.clone(),
        api_port: args.api_port.unwrap_or(config.kubeconfig.api_port),
        remote_path: args
            .remote_config_path
            .clone()
            .unwrap_or_else(|| config.ssh.remote_config_path.clone()),
        kubeconfig_path,
        merge_order: config.merge.order.clone(),
        kubectl: config.tools.kubectl.clone(),
        verify: config.merge.verify && !args.no_verify,
        dry_run: args.dry_run,
    })
}

fn auth_label(auth: &AuthMethod) -> &'static str {
    match auth {
        AuthMethod::Agent => "agent",
        AuthMethod::Key(_) => "key",
        AuthMethod::Password(_) => "password",
    }
}

fn print_summary(report: &PullReport) {
    let merge = match &report.merge {
        MergeKind::Structured { strategy } => format!("merged ({strategy})"),
        MergeKind::Fallback => "concatenated (degraded)".to_string(),
        MergeKind::Fresh => "new file".to_string(),
    };
    let written = match &report.persisted {
        Some(p) if p.unchanged => format!("{} (unchanged)", p.path.display()),
        Some(p) => p.path.display().to_string(),
        None => "-".to_string(),
    };

    println!();
    println!("  Kubeconfig updated for cluster '{}'", report.cluster);
    println!("  Server:   {}", report.server.as_deref().unwrap_or("-"));
    println!("  Rewrite:  {}", report.rewrite_strategy);
    println!("  Merge:    {merge}");
    println!("  File:     {written}");
    if let Some(backup) = report.persisted.as_ref().and_then(|p| p.backup.as_ref()) {
        println!("  Backup:   {}", backup.display());
    }
    println!("  Verify:   {}", report.verification);
    println!("  Time:     {:.1}s", report.elapsed.as_secs_f64());
    if !report.warnings.is_empty() {
        println!("  Warnings:");
        for warning in &report.warnings {
            println!("    - {warning}");
        }
    }
    if report.verification.is_verified() {
        println!();
        println!("  Try: kubectl --context {} get nodes", report.cluster);
    }
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn clear(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn stage(&self, stage: Stage) {
        debug!(%stage, "stage reached");
    }

    fn done(&self, _report: &PullReport) {
        self.clear();
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("# {}", config_file_path()?.display());
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> std::result::Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("kubepull").chain(args.iter().copied()))
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_positionals_and_flags() {
        let cli = parse(&[
            "10.0.0.5",
            "demo",
            "--user",
            "admin",
            "--port",
            "2222",
            "--no-verify",
            "--dry-run",
        ])
        .unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.pull.server_address.as_deref(), Some("10.0.0.5"));
        assert_eq!(cli.pull.cluster_name.as_deref(), Some("demo"));
        assert_eq!(cli.pull.user.as_deref(), Some("admin"));
        assert_eq!(cli.pull.port, Some(2222));
        assert!(cli.pull.no_verify);
        assert!(cli.pull.dry_run);
    }

    #[test]
    fn cluster_name_is_required() {
        let err = parse(&["10.0.0.5"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn help_is_not_a_failure() {
        let err = parse(&["--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
        assert_eq!(err.exit_code(), 0);
    }

    #[test]
    fn config_subcommand_needs_no_positionals() {
        let cli = parse(&["config", "show"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Config {
                action: ConfigAction::Show
            })
        ));
    }

    #[test]
    fn invalid_cluster_name_is_rejected_before_io() {
        let cli = parse(&["10.0.0.5", "bad/name"]).unwrap();
        assert!(parse_targets(&cli.pull).is_err());

        let cli = parse(&["bad host", "demo"]).unwrap();
        assert!(parse_targets(&cli.pull).is_err());
    }

    #[test]
    fn flags_override_config() {
        let cli = parse(&[
            "node.lan",
            "demo",
            "--key",
            "/tmp/id_ed25519",
            "--password",
            "hunter2",
            "--api-port",
            "7443",
            "--remote-config-path",
            "/tmp/k3s.yaml",
            "--kubeconfig",
            "/tmp/kubeconfig",
        ])
        .unwrap();
        let config = AppConfig::default();
        let (address, cluster) = parse_targets(&cli.pull).unwrap();

        let ssh = ssh_options(&cli.pull, &config, &address).unwrap();
        assert!(matches!(ssh.auth, AuthMethod::Key(ref p) if p == &PathBuf::from("/tmp/id_ed25519")));
        assert_eq!(ssh.user, "root");
        assert_eq!(ssh.port, 22);

        let pull = pull_config(&cli.pull, &config, &address, &cluster).unwrap();
        assert_eq!(pull.api_port, 7443);
        assert_eq!(pull.remote_path, "/tmp/k3s.yaml");
        assert_eq!(pull.kubeconfig_path, PathBuf::from("/tmp/kubeconfig"));
        assert!(pull.verify);
        assert!(!pull.dry_run);
    }

    #[test]
    fn password_selects_password_auth() {
        let cli = parse(&["10.0.0.5", "demo", "--password", "hunter2"]).unwrap();
        let (address, _) = parse_targets(&cli.pull).unwrap();
        let ssh = ssh_options(&cli.pull, &AppConfig::default(), &address).unwrap();
        match ssh.auth {
            AuthMethod::Password(secret) => assert_eq!(secret.expose(), "hunter2"),
            other => panic!("expected password auth, got {other:?}"),
        }
    }

    #[test]
    fn no_verify_wins_over_config() {
        let cli = parse(&["10.0.0.5", "demo", "--no-verify"]).unwrap();
        let (address, cluster) = parse_targets(&cli.pull).unwrap();
        let pull = pull_config(&cli.pull, &AppConfig::default(), &address, &cluster).unwrap();
        assert!(!pull.verify);
    }
}
