//! Post-write check that the new context actually works.
//!
//! Verification never fails a run; its outcome is reported as a warning.

use std::ffi::OsStr;
use std::path::Path;

use serde_json::Value;
use tracing::{info, instrument, warn};

use kubepull_kubeconfig::Kubeconfig;
use kubepull_shared::{ClusterName, require_tool, run_tool};

/// Result of [`verify_context`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// The cluster answered through the new context.
    Verified { nodes: usize, ready: usize },
    /// Not attempted (disabled, dry run, or kubectl missing).
    Skipped { reason: String },
    Failed { reason: String },
}

impl Verification {
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified { .. })
    }
}

impl std::fmt::Display for Verification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Verified { nodes, ready } => write!(f, "ok ({ready}/{nodes} nodes ready)"),
            Self::Skipped { reason } => write!(f, "skipped ({reason})"),
            Self::Failed { reason } => write!(f, "failed ({reason})"),
        }
    }
}

/// Check the written file resolves `context` and, if kubectl is available,
/// that the cluster answers a node listing through it.
#[instrument(skip_all, fields(context = %context, path = %kubeconfig.display()))]
pub fn verify_context(kubectl: &str, kubeconfig: &Path, context: &ClusterName) -> Verification {
    let outcome = check(kubectl, kubeconfig, context);
    match &outcome {
        Verification::Verified { nodes, ready } => info!(nodes, ready, "context verified"),
        Verification::Skipped { reason } => info!(%reason, "verification skipped"),
        Verification::Failed { reason } => warn!(%reason, "verification failed"),
    }
    outcome
}

fn check(kubectl: &str, kubeconfig: &Path, context: &ClusterName) -> Verification {
    let text = match std::fs::read_to_string(kubeconfig) {
        Ok(text) => text,
        Err(e) => {
            return Verification::Failed {
                reason: format!("cannot read {}: {e}", kubeconfig.display()),
            };
        }
    };

    match Kubeconfig::parse(&text) {
        Ok(doc) => {
            let problems = doc.entry_problems(context.as_str());
            if !problems.is_empty() {
                return Verification::Failed {
                    reason: problems.join(", "),
                };
            }
        }
        Err(e) => {
            return Verification::Failed {
                reason: format!("written file does not parse: {e}"),
            };
        }
    }

    if let Err(e) = require_tool(kubectl, &["version", "--client"]) {
        return Verification::Skipped {
            reason: e.to_string(),
        };
    }

    let mut args: Vec<&OsStr> = vec![OsStr::new("--kubeconfig"), kubeconfig.as_os_str()];
    args.extend(
        [
            "--context",
            context.as_str(),
            "get",
            "nodes",
            "--request-timeout=10s",
            "-o",
            "json",
        ]
        .map(OsStr::new),
    );

    match run_tool(kubectl, args, &[]) {
        Ok(out) if out.success() => match count_nodes(&out.stdout) {
            Some((nodes, ready)) => Verification::Verified { nodes, ready },
            None => Verification::Failed {
                reason: "unexpected `kubectl get nodes` output".to_string(),
            },
        },
        Ok(out) => Verification::Failed {
            reason: out.failure_detail(),
        },
        Err(e) => Verification::Failed {
            reason: e.to_string(),
        },
    }
}

/// `(total, ready)` node counts from `kubectl get nodes -o json`.
fn count_nodes(json: &str) -> Option<(usize, usize)> {
    let list: Value = serde_json::from_str(json).ok()?;
    let items = list.get("items")?.as_array()?;

    let ready = items
        .iter()
        .filter(|node| {
            node.pointer("/status/conditions")
                .and_then(Value::as_array)
                .is_some_and(|conds| {
                    conds.iter().any(|c| {
                        c.get("type").and_then(Value::as_str) == Some("Ready")
                            && c.get("status").and_then(Value::as_str) == Some("True")
                    })
                })
        })
        .count();

    Some((items.len(), ready))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::TWO_CLUSTERS;

    const MISSING_KUBECTL: &str = "kubepull-test-missing-kubectl";

    #[test]
    fn counts_ready_nodes() {
        let json = r#"{"items":[
            {"metadata":{"name":"a"},"status":{"conditions":[{"type":"Ready","status":"True"}]}},
            {"metadata":{"name":"b"},"status":{"conditions":[{"type":"Ready","status":"False"}]}},
            {"metadata":{"name":"c"}}
        ]}"#;
        assert_eq!(count_nodes(json), Some((3, 1)));
        assert_eq!(count_nodes(r#"{"items":[]}"#), Some((0, 0)));
        assert_eq!(count_nodes("not json"), None);
    }

    #[test]
    fn only_verified_counts_as_verified() {
        assert!(Verification::Verified { nodes: 1, ready: 0 }.is_verified());
        assert!(!Verification::Skipped { reason: "off".into() }.is_verified());
        assert!(!Verification::Failed { reason: "down".into() }.is_verified());
    }

    #[test]
    fn consistent_file_without_kubectl_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config");
        std::fs::write(&path, TWO_CLUSTERS).unwrap();

        let out = verify_context(MISSING_KUBECTL, &path, &ClusterName::parse("prod").unwrap());
        assert!(matches!(out, Verification::Skipped { .. }), "{out:?}");
    }

    #[test]
    fn missing_context_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config");
        std::fs::write(&path, TWO_CLUSTERS).unwrap();

        let out = verify_context(MISSING_KUBECTL, &path, &ClusterName::parse("nope").unwrap());
        match out {
            Verification::Failed { reason } => assert!(reason.contains("'nope' is missing")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn unreadable_file_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let out = verify_context(
            MISSING_KUBECTL,
            &tmp.path().join("absent"),
            &ClusterName::parse("prod").unwrap(),
        );
        assert!(matches!(out, Verification::Failed { .. }));
    }
}
