//! Field rewriting: point a freshly fetched kubeconfig at the node's address
//! and rename its single cluster/context/user to the caller's cluster name.
//!
//! Two strategies are tried in order. [`StructuredRewriter`] parses the
//! document and sets fields directly. [`TextualRewriter`] only runs when the
//! text cannot be parsed as a kubeconfig; it substitutes the placeholder name
//! `default` and loopback hosts line by line, and cannot rewrite documents
//! that use other conventions.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};
use url::Url;

use kubepull_shared::{ClusterName, KubepullError, Result, ServerAddress};

use crate::document::Kubeconfig;

/// What the fetched document should be rewritten to.
#[derive(Debug, Clone)]
pub struct RewriteTarget {
    pub name: ClusterName,
    pub address: ServerAddress,
    /// Port for a server URL built from scratch.
    pub api_port: u16,
}

impl RewriteTarget {
    /// Server URL to use when the document has none worth keeping.
    pub fn fallback_server(&self) -> Result<String> {
        Ok(trim_root_slash(self.address.endpoint(self.api_port)?.as_str(), false))
    }
}

/// A rewritten document and how it was produced.
#[derive(Debug, Clone)]
pub struct Rewritten {
    pub text: String,
    /// Name of the strategy that produced `text`.
    pub strategy: &'static str,
    /// Non-fatal issues the caller should surface.
    pub warnings: Vec<String>,
}

/// One way of rewriting a document.
pub trait RewriteStrategy {
    fn name(&self) -> &'static str;
    fn rewrite(&self, doc: &str, target: &RewriteTarget) -> Result<Rewritten>;
}

/// The strategies in order of preference.
pub fn default_rewriters() -> Vec<Box<dyn RewriteStrategy>> {
    vec![Box::new(StructuredRewriter), Box::new(TextualRewriter)]
}

/// Try each strategy in turn and return the first success.
///
/// Failures of earlier strategies are carried into the winner's warnings.
pub fn rewrite_with(
    strategies: &[Box<dyn RewriteStrategy>],
    doc: &str,
    target: &RewriteTarget,
) -> Result<Rewritten> {
    let mut failures: Vec<String> = Vec::new();

    for strategy in strategies {
        match strategy.rewrite(doc, target) {
            Ok(mut rewritten) => {
                if !failures.is_empty() {
                    let mut warnings = failures
                        .iter()
                        .map(|f| format!("fell back to {} rewrite: {f}", rewritten.strategy))
                        .collect::<Vec<_>>();
                    warnings.append(&mut rewritten.warnings);
                    rewritten.warnings = warnings;
                }
                for w in &rewritten.warnings {
                    warn!(strategy = rewritten.strategy, "{w}");
                }
                info!(strategy = rewritten.strategy, name = %target.name, "document rewritten");
                return Ok(rewritten);
            }
            Err(e) => {
                debug!(strategy = strategy.name(), error = %e, "rewrite strategy failed");
                failures.push(format!("{} rewrite failed: {e}", strategy.name()));
            }
        }
    }

    Err(KubepullError::parse(format!(
        "could not rewrite fetched document ({})",
        failures.join("; ")
    )))
}

/// Rewrite with the default strategy order.
pub fn rewrite(doc: &str, target: &RewriteTarget) -> Result<Rewritten> {
    rewrite_with(&default_rewriters(), doc, target)
}

// ---------------------------------------------------------------------------
// Structured
// ---------------------------------------------------------------------------

/// Parses the document and sets fields on the first entry of each collection.
pub struct StructuredRewriter;

impl RewriteStrategy for StructuredRewriter {
    fn name(&self) -> &'static str {
        "structured"
    }

    fn rewrite(&self, doc: &str, target: &RewriteTarget) -> Result<Rewritten> {
        let mut config = Kubeconfig::parse(doc)?;
        config.require_entries()?;

        let mut warnings = Vec::new();
        for (collection, len) in [
            ("clusters", config.clusters.len()),
            ("contexts", config.contexts.len()),
            ("users", config.users.len()),
        ] {
            if len > 1 {
                warnings.push(format!(
                    "fetched document has {len} {collection}; only the first is rewritten"
                ));
            }
        }

        let name = target.name.as_str();
        let user_name = target.name.user_name();

        let cluster = &mut config.clusters[0];
        cluster.name = name.to_string();
        cluster.cluster.server = rewrite_server(&cluster.cluster.server, target)?;

        let context = &mut config.contexts[0];
        context.name = name.to_string();
        context.context.cluster = name.to_string();
        context.context.user = user_name.clone();

        config.users[0].name = user_name;
        config.current_context = name.to_string();

        Ok(Rewritten {
            text: config.to_yaml()?,
            strategy: self.name(),
            warnings,
        })
    }
}

/// Swap the host of `server` for the target address, keeping scheme, port and path.
fn rewrite_server(server: &str, target: &RewriteTarget) -> Result<String> {
    let Ok(mut url) = Url::parse(server.trim()) else {
        return target.fallback_server();
    };
    if !url.has_host() || url.set_host(Some(&target.address.url_host())).is_err() {
        return target.fallback_server();
    }
    Ok(trim_root_slash(url.as_str(), server.trim().ends_with('/')))
}

/// `Url` always serializes an empty path as `/`; drop it unless the input had one.
fn trim_root_slash(url: &str, keep: bool) -> String {
    if keep {
        return url.to_string();
    }
    match url.strip_suffix('/') {
        Some(stripped) if !stripped.ends_with(':') && stripped.matches('/').count() == 2 => {
            stripped.to_string()
        }
        _ => url.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Textual
// ---------------------------------------------------------------------------

/// Line-based placeholder substitution for documents that do not parse.
pub struct TextualRewriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Clusters,
    Contexts,
    Users,
    Other,
}

impl RewriteStrategy for TextualRewriter {
    fn name(&self) -> &'static str {
        "textual"
    }

    fn rewrite(&self, doc: &str, target: &RewriteTarget) -> Result<Rewritten> {
        static TOP_KEY_RE: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"^([A-Za-z][A-Za-z0-9_-]*):").expect("valid regex"));
        static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r#"^(\s*(?:-\s+)?name:\s*)["']?default["']?\s*$"#).expect("valid regex")
        });
        static CTX_CLUSTER_RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r#"^(\s*(?:-\s+)?cluster:\s*)["']?default["']?\s*$"#).expect("valid regex")
        });
        static CTX_USER_RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r#"^(\s*(?:-\s+)?user:\s*)["']?default["']?\s*$"#).expect("valid regex")
        });
        static SERVER_RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(
                r"^(\s*(?:-\s+)?server:\s*https?://)(127\.0\.0\.1|localhost|0\.0\.0\.0|\[::1\])((?::\d+)?.*)$",
            )
            .expect("valid regex")
        });
        static CURRENT_RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r#"^(current-context:\s*)["']?default["']?\s*$"#).expect("valid regex")
        });

        let mut seen = (false, false, false);
        for line in doc.lines() {
            match TOP_KEY_RE.captures(line).as_ref().map(|c| &c[1]) {
                Some("clusters") => seen.0 = true,
                Some("contexts") => seen.1 = true,
                Some("users") => seen.2 = true,
                _ => {}
            }
        }
        if seen != (true, true, true) {
            return Err(KubepullError::parse(
                "document lacks top-level clusters/contexts/users keys",
            ));
        }

        let name = target.name.as_str();
        let user_name = target.name.user_name();
        let host = target.address.url_host();

        let mut section = Section::Other;
        let mut replaced = 0usize;
        let mut server_rewritten = false;
        let mut out: Vec<String> = Vec::new();

        for line in doc.lines() {
            if let Some(caps) = TOP_KEY_RE.captures(line) {
                section = match &caps[1] {
                    "clusters" => Section::Clusters,
                    "contexts" => Section::Contexts,
                    "users" => Section::Users,
                    _ => Section::Other,
                };
                if let Some(c) = CURRENT_RE.captures(line) {
                    out.push(format!("{}{name}", &c[1]));
                    replaced += 1;
                    continue;
                }
                out.push(line.to_string());
                continue;
            }

            let rewritten = match section {
                Section::Clusters => {
                    if let Some(c) = NAME_RE.captures(line) {
                        Some(format!("{}{name}", &c[1]))
                    } else if let Some(c) = SERVER_RE.captures(line) {
                        server_rewritten = true;
                        Some(format!("{}{host}{}", &c[1], &c[3]))
                    } else {
                        None
                    }
                }
                Section::Contexts => {
                    if let Some(c) = NAME_RE.captures(line) {
                        Some(format!("{}{name}", &c[1]))
                    } else if let Some(c) = CTX_CLUSTER_RE.captures(line) {
                        Some(format!("{}{name}", &c[1]))
                    } else {
                        CTX_USER_RE
                            .captures(line)
                            .map(|c| format!("{}{user_name}", &c[1]))
                    }
                }
                Section::Users => NAME_RE
                    .captures(line)
                    .map(|c| format!("{}{user_name}", &c[1])),
                Section::Other => None,
            };

            match rewritten {
                Some(new_line) => {
                    replaced += 1;
                    out.push(new_line);
                }
                None => out.push(line.to_string()),
            }
        }

        let mut warnings = vec![
            "structured rewrite unavailable; placeholder substitution only rewrites \
             entries named 'default' and loopback server addresses"
                .to_string(),
        ];
        if replaced == 0 {
            warnings.push("textual rewrite matched no placeholder tokens; document left unchanged".into());
        } else if !server_rewritten {
            warnings.push(format!(
                "no loopback server address found; server endpoint was not pointed at {host}"
            ));
        }

        let mut text = out.join("\n");
        if doc.ends_with('\n') {
            text.push('\n');
        }

        debug!(replaced, "textual rewrite complete");
        Ok(Rewritten {
            text,
            strategy: self.name(),
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::RKE2_TEMPLATE;

    fn target(addr: &str, name: &str) -> RewriteTarget {
        RewriteTarget {
            name: ClusterName::parse(name).unwrap(),
            address: ServerAddress::parse(addr).unwrap(),
            api_port: 6443,
        }
    }

    fn assert_rewritten(text: &str, host: &str) {
        let doc = Kubeconfig::parse(text).unwrap();
        assert_eq!(doc.clusters[0].name, "demo");
        assert!(doc.clusters[0].cluster.server.contains(host));
        assert_eq!(doc.contexts[0].name, "demo");
        assert_eq!(doc.contexts[0].context.cluster, "demo");
        assert_eq!(doc.contexts[0].context.user, "demo-user");
        assert_eq!(doc.users[0].name, "demo-user");
        assert_eq!(doc.current_context, "demo");
        assert!(doc.entry_problems("demo").is_empty());
    }

    #[test]
    fn structured_rewrites_template() {
        let out = StructuredRewriter
            .rewrite(RKE2_TEMPLATE, &target("10.0.0.5", "demo"))
            .unwrap();
        assert_eq!(out.strategy, "structured");
        assert!(out.warnings.is_empty());
        assert_rewritten(&out.text, "10.0.0.5");

        let doc = Kubeconfig::parse(&out.text).unwrap();
        assert_eq!(doc.clusters[0].cluster.server, "https://10.0.0.5:6443");
        assert!(doc.users[0].user.contains_key("client-certificate-data"));
    }

    #[test]
    fn textual_rewrites_template() {
        let out = TextualRewriter
            .rewrite(RKE2_TEMPLATE, &target("10.0.0.5", "demo"))
            .unwrap();
        assert_eq!(out.strategy, "textual");
        assert_eq!(out.warnings.len(), 1);
        assert_rewritten(&out.text, "10.0.0.5");
        assert!(out.text.contains("server: https://10.0.0.5:6443\n"));
    }

    #[test]
    fn strategies_agree_on_single_entry_template() {
        let t = target("10.0.0.5", "demo");
        let structured = Kubeconfig::parse(&StructuredRewriter.rewrite(RKE2_TEMPLATE, &t).unwrap().text)
            .unwrap();
        let textual =
            Kubeconfig::parse(&TextualRewriter.rewrite(RKE2_TEMPLATE, &t).unwrap().text).unwrap();
        assert_eq!(structured, textual);
    }

    #[test]
    fn structured_keeps_custom_port_and_handles_ipv6() {
        let doc = RKE2_TEMPLATE.replace("https://127.0.0.1:6443", "https://127.0.0.1:16443");
        let out = StructuredRewriter.rewrite(&doc, &target("fd00::5", "demo")).unwrap();
        let parsed = Kubeconfig::parse(&out.text).unwrap();
        assert_eq!(parsed.clusters[0].cluster.server, "https://[fd00::5]:16443");
    }

    #[test]
    fn structured_builds_server_when_missing() {
        let doc = RKE2_TEMPLATE.replace("server: https://127.0.0.1:6443", "server: \"\"");
        let out = StructuredRewriter.rewrite(&doc, &target("node1.example.com", "demo")).unwrap();
        let parsed = Kubeconfig::parse(&out.text).unwrap();
        assert_eq!(parsed.clusters[0].cluster.server, "https://node1.example.com:6443");
    }

    #[test]
    fn structured_warns_on_multiple_entries() {
        let doc = Kubeconfig::parse(RKE2_TEMPLATE).unwrap();
        let mut doubled = doc.clone();
        let mut extra = doc.clusters[0].clone();
        extra.name = "second".into();
        doubled.clusters.push(extra);

        let out = StructuredRewriter
            .rewrite(&doubled.to_yaml().unwrap(), &target("10.0.0.5", "demo"))
            .unwrap();
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].contains("2 clusters"));
        let parsed = Kubeconfig::parse(&out.text).unwrap();
        assert_eq!(parsed.clusters[1].name, "second");
    }

    #[test]
    fn falls_back_to_textual_on_unparseable_yaml() {
        // A stray tab-indented line breaks YAML parsing but not the line rewrite.
        let broken = format!("{RKE2_TEMPLATE}\tbogus: [\n");
        let out = rewrite(&broken, &target("10.0.0.5", "demo")).unwrap();
        assert_eq!(out.strategy, "textual");
        assert!(out.warnings[0].starts_with("fell back to textual rewrite"));
        assert!(out.text.contains("name: demo-user"));
        assert!(out.text.contains("current-context: demo"));
    }

    #[test]
    fn textual_without_placeholders_warns() {
        let doc = "clusters:\n- name: prod\n  cluster:\n    server: https://10.1.1.1:6443\ncontexts: []\nusers: []\n";
        let out = TextualRewriter.rewrite(doc, &target("10.0.0.5", "demo")).unwrap();
        assert_eq!(out.text, doc);
        assert!(out.warnings.iter().any(|w| w.contains("matched no placeholder")));
    }

    #[test]
    fn rewrite_rejects_document_without_collections() {
        let err = rewrite("hello: world\n", &target("10.0.0.5", "demo")).unwrap_err();
        assert!(matches!(err, KubepullError::Parse { .. }));
        assert!(err.to_string().contains("structured rewrite failed"));
        assert!(err.to_string().contains("textual rewrite failed"));
    }
}
