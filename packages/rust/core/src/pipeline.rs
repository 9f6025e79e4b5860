//! End-to-end pull: fetch → sanitize → rewrite → merge → persist → verify.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use kubepull_kubeconfig::{Kubeconfig, RewriteTarget, rewrite, sanitize};
use kubepull_remote::{RemoteShell, fetch_credentials};
use kubepull_shared::{ClusterName, KubepullError, MergeTier, Result, RunId, ServerAddress};

use crate::merge::{MergeEngine, MergeKind};
use crate::persist::{PersistOutcome, persist, read_existing};
use crate::verify::{Verification, verify_context};

/// Inputs for one run of [`pull_kubeconfig`]. Fixed for the whole run.
#[derive(Debug, Clone)]
pub struct PullConfig {
    pub cluster: ClusterName,
    pub address: ServerAddress,
    /// API port used when the fetched server URL has to be rebuilt.
    pub api_port: u16,
    /// Credentials file on the node.
    pub remote_path: String,
    /// Local kubeconfig to merge into.
    pub kubeconfig_path: PathBuf,
    pub merge_order: Vec<MergeTier>,
    pub kubectl: String,
    pub verify: bool,
    /// Stop after merging and hand the document back instead of writing it.
    pub dry_run: bool,
}

/// Milestones of a run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    NotStarted,
    Fetched,
    Sanitized,
    Rewritten,
    MergedStructured,
    MergedFallback,
    WrittenFresh,
    Persisted,
    Verified,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotStarted => "not started",
            Self::Fetched => "fetched",
            Self::Sanitized => "sanitized",
            Self::Rewritten => "rewritten",
            Self::MergedStructured => "merged",
            Self::MergedFallback => "merged (fallback)",
            Self::WrittenFresh => "new kubeconfig",
            Self::Persisted => "written",
            Self::Verified => "verified",
        };
        f.write_str(s)
    }
}

/// Result of [`pull_kubeconfig`].
#[derive(Debug)]
pub struct PullReport {
    pub run_id: RunId,
    pub cluster: ClusterName,
    /// Server URL of the new cluster entry, when it could be read back.
    pub server: Option<String>,
    /// Last stage reached.
    pub stage: Stage,
    pub rewrite_strategy: &'static str,
    pub merge: MergeKind,
    /// Result is best-effort (concatenated) rather than checked.
    pub degraded: bool,
    pub kubeconfig_path: PathBuf,
    /// `None` on dry runs.
    pub persisted: Option<PersistOutcome>,
    /// The merged document, only on dry runs.
    pub document: Option<String>,
    pub verification: Verification,
    pub warnings: Vec<String>,
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called before starting a step.
    fn phase(&self, name: &str);
    /// Called when a stage is reached.
    fn stage(&self, stage: Stage);
    /// Called when the run completes successfully.
    fn done(&self, report: &PullReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn stage(&self, _stage: Stage) {}
    fn done(&self, _report: &PullReport) {}
}

/// Pull the node's kubeconfig over `shell` and merge it into the local one.
///
/// Nothing local is modified until every step up to and including the merge
/// has succeeded. Verification problems are reported as warnings only.
#[instrument(skip_all, fields(cluster = %config.cluster, target = %shell.target()))]
pub async fn pull_kubeconfig<S: RemoteShell>(
    shell: &S,
    config: &PullConfig,
    progress: &dyn ProgressReporter,
) -> Result<PullReport> {
    let start = Instant::now();
    let run_id = RunId::new();
    let mut warnings: Vec<String> = Vec::new();

    info!(%run_id, dry_run = config.dry_run, "starting pull");
    progress.stage(Stage::NotStarted);

    // --- Fetch ---
    progress.phase(&format!("Fetching {} from {}", config.remote_path, shell.target()));
    let raw = fetch_credentials(shell, &config.remote_path).await?;
    progress.stage(Stage::Fetched);

    // --- Sanitize ---
    let clean = sanitize(&raw);
    if clean.is_empty() {
        return Err(KubepullError::remote(format!(
            "{} on {} contained no usable text",
            config.remote_path,
            shell.target()
        )));
    }
    progress.stage(Stage::Sanitized);

    // --- Rewrite ---
    progress.phase("Rewriting kubeconfig");
    let target = RewriteTarget {
        name: config.cluster.clone(),
        address: config.address.clone(),
        api_port: config.api_port,
    };
    let rewritten = rewrite(&clean, &target)?;
    warnings.extend(rewritten.warnings.iter().cloned());
    let server = Kubeconfig::parse(&rewritten.text).ok().and_then(|doc| {
        doc.cluster(config.cluster.as_str())
            .map(|c| c.cluster.server.clone())
    });
    progress.stage(Stage::Rewritten);

    // --- Merge ---
    progress.phase(&format!("Merging into {}", config.kubeconfig_path.display()));
    let existing = read_existing(&config.kubeconfig_path)?;
    let merged = MergeEngine::from_tiers(&config.merge_order, &config.kubectl)
        .with_local_path(&config.kubeconfig_path)
        .merge(existing.as_deref(), &rewritten.text, &config.cluster)?;
    if merged.degraded {
        warnings.push(format!(
            "merged by concatenation; {} may contain duplicate entries for '{}'",
            config.kubeconfig_path.display(),
            config.cluster
        ));
        warnings.extend(
            merged
                .failures
                .iter()
                .map(|f| format!("structured merge failed: {f}")),
        );
    }
    let mut stage = match merged.kind {
        MergeKind::Structured { .. } => Stage::MergedStructured,
        MergeKind::Fallback => Stage::MergedFallback,
        MergeKind::Fresh => Stage::WrittenFresh,
    };
    progress.stage(stage);

    let mut report = PullReport {
        run_id,
        cluster: config.cluster.clone(),
        server,
        stage,
        rewrite_strategy: rewritten.strategy,
        merge: merged.kind.clone(),
        degraded: merged.degraded,
        kubeconfig_path: config.kubeconfig_path.clone(),
        persisted: None,
        document: None,
        verification: Verification::Skipped {
            reason: "disabled".to_string(),
        },
        warnings: Vec::new(),
        elapsed: Duration::ZERO,
    };

    if config.dry_run {
        info!("dry run; local kubeconfig left untouched");
        report.document = Some(merged.text);
        report.verification = Verification::Skipped {
            reason: "dry run".to_string(),
        };
        return Ok(finish(report, warnings, start, progress));
    }

    // --- Persist ---
    progress.phase("Writing kubeconfig");
    report.persisted = Some(persist(&config.kubeconfig_path, &merged.text)?);
    stage = Stage::Persisted;
    report.stage = stage;
    progress.stage(stage);

    // --- Verify ---
    if config.verify {
        progress.phase(&format!("Verifying context {}", config.cluster));
        let kubectl = config.kubectl.clone();
        let path = config.kubeconfig_path.clone();
        let context = config.cluster.clone();
        report.verification =
            tokio::task::spawn_blocking(move || verify_context(&kubectl, &path, &context))
                .await
                .unwrap_or_else(|e| Verification::Failed {
                    reason: format!("verification task failed: {e}"),
                });

        match &report.verification {
            Verification::Verified { .. } => {
                report.stage = Stage::Verified;
                progress.stage(Stage::Verified);
            }
            Verification::Failed { reason } => {
                warnings.push(format!("verification failed: {reason}"));
            }
            Verification::Skipped { .. } => {}
        }
    }

    Ok(finish(report, warnings, start, progress))
}

fn finish(
    mut report: PullReport,
    warnings: Vec<String>,
    start: Instant,
    progress: &dyn ProgressReporter,
) -> PullReport {
    report.warnings = warnings;
    report.elapsed = start.elapsed();

    if report.degraded {
        warn!(run_id = %report.run_id, "run finished with a degraded merge");
    }
    info!(
        run_id = %report.run_id,
        stage = %report.stage,
        warnings = report.warnings.len(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "pull complete"
    );

    progress.done(&report);
    report
}
