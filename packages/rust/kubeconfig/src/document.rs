//! Typed kubeconfig document.
//!
//! Only the fields kubepull reads or rewrites are modelled; everything else
//! (certificate data, exec plugins, extensions, unknown top-level keys) is
//! carried through `extra` maps so a rewrite or merge never drops it.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;

use kubepull_shared::{KubepullError, Result};

/// A kubeconfig ("credentials document").
///
/// Field order matches what `kubectl config view` emits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Kubeconfig {
    #[serde(rename = "apiVersion", default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub clusters: Vec<NamedCluster>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub contexts: Vec<NamedContext>,

    #[serde(rename = "current-context", default, deserialize_with = "null_as_default")]
    pub current_context: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<Value>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub users: Vec<NamedUser>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// `clusters[]` entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedCluster {
    pub name: String,
    #[serde(default)]
    pub cluster: Cluster,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    #[serde(default, deserialize_with = "null_as_default")]
    pub server: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// `contexts[]` entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedContext {
    pub name: String,
    #[serde(default)]
    pub context: Context,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    #[serde(default, deserialize_with = "null_as_default")]
    pub cluster: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// `users[]` entry. Auth material is opaque to kubepull.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedUser {
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub user: BTreeMap<String, Value>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Named entries
// ---------------------------------------------------------------------------

/// An entry identified by its `name` within a collection.
pub trait Named {
    fn name(&self) -> &str;
}

impl Named for NamedCluster {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for NamedContext {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Named for NamedUser {
    fn name(&self) -> &str {
        &self.name
    }
}

fn count_named<T: Named>(entries: &[T], name: &str) -> usize {
    entries.iter().filter(|e| e.name() == name).count()
}

fn duplicates<T: Named>(entries: &[T]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut dups = Vec::new();
    for entry in entries {
        if !seen.insert(entry.name()) && !dups.iter().any(|d| d == entry.name()) {
            dups.push(entry.name().to_string());
        }
    }
    dups
}

// ---------------------------------------------------------------------------
// Parse / serialize / queries
// ---------------------------------------------------------------------------

impl Kubeconfig {
    /// Parse a YAML kubeconfig.
    pub fn parse(text: &str) -> Result<Self> {
        serde_yaml::from_str(text)
            .map_err(|e| KubepullError::parse(format!("not a kubeconfig document: {e}")))
    }

    /// Serialize back to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| KubepullError::parse(format!("failed to serialize kubeconfig: {e}")))
    }

    /// Minimal field presence: at least one cluster, context and user.
    pub fn require_entries(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("clusters", self.clusters.is_empty()),
            ("contexts", self.contexts.is_empty()),
            ("users", self.users.is_empty()),
        ]
        .into_iter()
        .filter_map(|(key, empty)| empty.then_some(key))
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(KubepullError::parse(format!(
                "kubeconfig has no entries in: {}",
                missing.join(", ")
            )))
        }
    }

    pub fn cluster(&self, name: &str) -> Option<&NamedCluster> {
        self.clusters.iter().find(|c| c.name == name)
    }

    pub fn context(&self, name: &str) -> Option<&NamedContext> {
        self.contexts.iter().find(|c| c.name == name)
    }

    pub fn user(&self, name: &str) -> Option<&NamedUser> {
        self.users.iter().find(|u| u.name == name)
    }

    /// Problems that make `context_name` unusable after a merge.
    ///
    /// Checks the context exists exactly once, its cluster and user
    /// references resolve to exactly one entry each, and `current-context`
    /// names an existing context. An empty result means consistent.
    pub fn entry_problems(&self, context_name: &str) -> Vec<String> {
        let mut problems = Vec::new();

        match count_named(&self.contexts, context_name) {
            0 => problems.push(format!("context '{context_name}' is missing")),
            1 => {}
            n => problems.push(format!("context '{context_name}' appears {n} times")),
        }

        if let Some(ctx) = self.context(context_name) {
            match count_named(&self.clusters, &ctx.context.cluster) {
                0 => problems.push(format!(
                    "context '{context_name}' references missing cluster '{}'",
                    ctx.context.cluster
                )),
                1 => {}
                n => problems.push(format!(
                    "cluster '{}' appears {n} times",
                    ctx.context.cluster
                )),
            }
            match count_named(&self.users, &ctx.context.user) {
                0 => problems.push(format!(
                    "context '{context_name}' references missing user '{}'",
                    ctx.context.user
                )),
                1 => {}
                n => problems.push(format!("user '{}' appears {n} times", ctx.context.user)),
            }
        }

        if self.context(&self.current_context).is_none() {
            problems.push(format!(
                "current-context '{}' does not name a context",
                self.current_context
            ));
        }

        problems
    }

    /// Contexts anywhere in the document whose references do not resolve.
    pub fn dangling_references(&self) -> Vec<String> {
        let mut out = Vec::new();
        for ctx in &self.contexts {
            if self.cluster(&ctx.context.cluster).is_none() {
                out.push(format!(
                    "context '{}' -> cluster '{}'",
                    ctx.name, ctx.context.cluster
                ));
            }
            if self.user(&ctx.context.user).is_none() {
                out.push(format!("context '{}' -> user '{}'", ctx.name, ctx.context.user));
            }
        }
        out
    }

    /// Names that occur more than once in any collection.
    pub fn duplicate_names(&self) -> Vec<String> {
        let mut out = Vec::new();
        out.extend(duplicates(&self.clusters).into_iter().map(|n| format!("cluster '{n}'")));
        out.extend(duplicates(&self.contexts).into_iter().map(|n| format!("context '{n}'")));
        out.extend(duplicates(&self.users).into_iter().map(|n| format!("user '{n}'")));
        out
    }
}
