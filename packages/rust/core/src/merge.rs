//! Merge engine: fold a freshly rewritten kubeconfig into the local one.
//!
//! Strategies run in the configured order until one succeeds:
//!
//! 1. `kubectl`: `kubectl config view --flatten` over `KUBECONFIG=<new>:<old>`;
//!    kubectl lets the first file win, so the new entries replace old ones.
//!    `<old>` is the local file itself when known, so relative certificate
//!    paths in it still resolve.
//! 2. `yaml`: in-process structured merge by entry name.
//! 3. `concat`: text concatenation. Never fails, but may leave duplicate
//!    entries, so its result is always flagged as degraded.
//!
//! Structured results are re-parsed and checked before they are accepted; a
//! result that leaves the new context dangling counts as a failed tier.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use kubepull_kubeconfig::{Kubeconfig, merge_documents};
use kubepull_shared::{ClusterName, KubepullError, MergeTier, Result, require_tool, run_tool};

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// How the final document came about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeKind {
    /// A key-aware strategy produced a checked result.
    Structured { strategy: &'static str },
    /// Concatenation; duplicates possible.
    Fallback,
    /// No local document existed; the new document is used verbatim.
    Fresh,
}

/// Result of [`MergeEngine::merge`].
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub text: String,
    pub kind: MergeKind,
    /// Set whenever the result is best-effort rather than verified.
    pub degraded: bool,
    /// Why earlier strategies were skipped, in order.
    pub failures: Vec<String>,
}

/// Text produced by one strategy.
#[derive(Debug, Clone)]
pub struct MergedText {
    pub text: String,
    pub degraded: bool,
}

/// Per-merge inputs shared by all strategies.
#[derive(Debug)]
pub struct MergeContext<'a> {
    pub cluster: &'a ClusterName,
    /// Private scratch directory, removed when the merge returns.
    pub workdir: &'a Path,
    /// Where the existing document was read from, if it came from disk.
    pub local_path: Option<&'a Path>,
}

/// One way of combining an existing and an incoming document.
pub trait MergeStrategy {
    fn name(&self) -> &'static str;
    fn merge(&self, existing: &str, incoming: &str, ctx: &MergeContext<'_>) -> Result<MergedText>;
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Delegates to `kubectl config view --flatten`.
pub struct KubectlMerger {
    pub program: String,
}

impl MergeStrategy for KubectlMerger {
    fn name(&self) -> &'static str {
        MergeTier::Kubectl.as_str()
    }

    fn merge(&self, existing: &str, incoming: &str, ctx: &MergeContext<'_>) -> Result<MergedText> {
        require_tool(&self.program, &["version", "--client"])?;

        let new_path = write_scratch(ctx.workdir, "incoming.yaml", incoming)?;
        let old_path = match ctx.local_path {
            Some(path) if path.is_file() => path.to_path_buf(),
            _ => write_scratch(ctx.workdir, "existing.yaml", existing)?,
        };
        let kubeconfig = std::env::join_paths([&new_path, &old_path])
            .map_err(|e| KubepullError::merge(format!("cannot build KUBECONFIG: {e}")))?;

        let output = run_tool(
            &self.program,
            ["config", "view", "--flatten"],
            &[("KUBECONFIG", kubeconfig.as_os_str())],
        )?;

        if !output.success() {
            return Err(KubepullError::merge(format!(
                "kubectl config view failed: {}",
                output.failure_detail()
            )));
        }

        Ok(MergedText {
            text: output.stdout,
            degraded: false,
        })
    }
}

/// In-process merge by entry name.
pub struct YamlMerger;

impl MergeStrategy for YamlMerger {
    fn name(&self) -> &'static str {
        MergeTier::Yaml.as_str()
    }

    fn merge(&self, existing: &str, incoming: &str, _ctx: &MergeContext<'_>) -> Result<MergedText> {
        let existing = Kubeconfig::parse(existing)
            .map_err(|e| KubepullError::merge(format!("local kubeconfig: {e}")))?;
        let incoming = Kubeconfig::parse(incoming)
            .map_err(|e| KubepullError::merge(format!("fetched kubeconfig: {e}")))?;

        Ok(MergedText {
            text: merge_documents(existing, incoming).to_yaml()?,
            degraded: false,
        })
    }
}

/// Appends the incoming text to the existing text.
pub struct ConcatMerger;

impl MergeStrategy for ConcatMerger {
    fn name(&self) -> &'static str {
        MergeTier::Concat.as_str()
    }

    fn merge(&self, existing: &str, incoming: &str, _ctx: &MergeContext<'_>) -> Result<MergedText> {
        Ok(MergedText {
            text: concatenate(existing, incoming),
            degraded: true,
        })
    }
}

fn concatenate(existing: &str, incoming: &str) -> String {
    let mut text = String::with_capacity(existing.len() + incoming.len() + 1);
    text.push_str(existing);
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str(incoming);
    text
}

fn write_scratch(dir: &Path, name: &str, content: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, content).map_err(|e| KubepullError::io(&path, e))?;
    Ok(path)
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Ordered list of merge strategies.
pub struct MergeEngine {
    strategies: Vec<Box<dyn MergeStrategy>>,
    local_path: Option<PathBuf>,
}

impl MergeEngine {
    pub fn new(strategies: Vec<Box<dyn MergeStrategy>>) -> Self {
        Self {
            strategies,
            local_path: None,
        }
    }

    /// Record the file the existing document is read from.
    pub fn with_local_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_path = Some(path.into());
        self
    }

    /// Build the engine for the configured tier order.
    pub fn from_tiers(tiers: &[MergeTier], kubectl_program: &str) -> Self {
        let strategies = tiers
            .iter()
            .map(|tier| -> Box<dyn MergeStrategy> {
                match tier {
                    MergeTier::Kubectl => Box::new(KubectlMerger {
                        program: kubectl_program.to_string(),
                    }),
                    MergeTier::Yaml => Box::new(YamlMerger),
                    MergeTier::Concat => Box::new(ConcatMerger),
                }
            })
            .collect();
        Self::new(strategies)
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Merge `incoming` (already rewritten for `cluster`) into `existing`.
    ///
    /// A missing or blank `existing` skips merging entirely.
    #[instrument(skip_all, fields(cluster = %cluster, strategies = ?self.strategy_names()))]
    pub fn merge(
        &self,
        existing: Option<&str>,
        incoming: &str,
        cluster: &ClusterName,
    ) -> Result<MergeOutcome> {
        let existing = match existing {
            Some(text) if !text.trim().is_empty() => text,
            _ => {
                info!("no local kubeconfig; using fetched document as-is");
                return Ok(MergeOutcome {
                    text: incoming.to_string(),
                    kind: MergeKind::Fresh,
                    degraded: false,
                    failures: Vec::new(),
                });
            }
        };

        let workdir = tempfile::Builder::new()
            .prefix("kubepull-merge-")
            .tempdir()
            .map_err(|e| KubepullError::io(std::env::temp_dir(), e))?;
        let ctx = MergeContext {
            cluster,
            workdir: workdir.path(),
            local_path: self.local_path.as_deref(),
        };

        let mut failures: Vec<String> = Vec::new();

        for strategy in &self.strategies {
            let merged = match strategy.merge(existing, incoming, &ctx) {
                Ok(merged) => merged,
                Err(e) => {
                    debug!(strategy = strategy.name(), error = %e, "merge strategy unavailable");
                    failures.push(format!("{}: {e}", strategy.name()));
                    continue;
                }
            };

            if merged.degraded {
                warn!(
                    strategy = strategy.name(),
                    "degraded merge: fetched document appended to local kubeconfig; \
                     entries named '{cluster}' may now be duplicated"
                );
                return Ok(MergeOutcome {
                    text: merged.text,
                    kind: MergeKind::Fallback,
                    degraded: true,
                    failures,
                });
            }

            if let Err(problem) = check_merged(&merged.text, cluster) {
                debug!(strategy = strategy.name(), %problem, "merge result rejected");
                failures.push(format!("{}: {problem}", strategy.name()));
                continue;
            }

            info!(strategy = strategy.name(), "kubeconfig merged");
            return Ok(MergeOutcome {
                text: merged.text,
                kind: MergeKind::Structured {
                    strategy: strategy.name(),
                },
                degraded: false,
                failures,
            });
        }

        Err(KubepullError::merge(if failures.is_empty() {
            "no merge strategies configured".to_string()
        } else {
            failures.join("; ")
        }))
    }
}

/// Accept a structured result only if the new cluster's entries are usable.
fn check_merged(text: &str, cluster: &ClusterName) -> std::result::Result<(), String> {
    let doc = Kubeconfig::parse(text).map_err(|e| e.to_string())?;

    let problems = doc.entry_problems(cluster.as_str());
    if !problems.is_empty() {
        return Err(problems.join(", "));
    }

    let dangling = doc.dangling_references();
    if !dangling.is_empty() {
        warn!(
            count = dangling.len(),
            refs = %dangling.join(", "),
            "local kubeconfig has contexts with unresolved references"
        );
    }
    Ok(())
}
