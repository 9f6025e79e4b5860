//! Kubeconfig handling for kubepull: typed document model, sanitizing of
//! fetched text, field rewriting, and the in-process structured merge.

pub mod document;
pub mod merge;
pub mod rewrite;
pub mod sanitize;

pub use document::{Cluster, Context, Kubeconfig, Named, NamedCluster, NamedContext, NamedUser};
pub use merge::{merge_documents, override_merge};
pub use rewrite::{
    RewriteStrategy, RewriteTarget, Rewritten, StructuredRewriter, TextualRewriter,
    default_rewriters, rewrite, rewrite_with,
};
pub use sanitize::sanitize;

#[cfg(test)]
pub(crate) mod test_fixtures {
    pub const RKE2_TEMPLATE: &str = include_str!("../../../../fixtures/kubeconfig/rke2.yaml");
    pub const TWO_CLUSTERS: &str =
        include_str!("../../../../fixtures/kubeconfig/two-clusters.yaml");
}
