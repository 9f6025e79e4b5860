//! Core pipeline orchestration for kubepull.
//!
//! Ties remote fetch, kubeconfig rewriting, the merge engine, persistence and
//! verification into the end-to-end [`pipeline::pull_kubeconfig`] run.

pub mod merge;
pub mod persist;
pub mod pipeline;
pub mod verify;

pub use merge::{MergeEngine, MergeKind, MergeOutcome, MergeStrategy};
pub use persist::PersistOutcome;
pub use pipeline::{
    ProgressReporter, PullConfig, PullReport, SilentProgress, Stage, pull_kubeconfig,
};
pub use verify::Verification;

#[cfg(test)]
pub(crate) mod test_fixtures {
    pub const RKE2_TEMPLATE: &str = include_str!("../../../../fixtures/kubeconfig/rke2.yaml");
    pub const TWO_CLUSTERS: &str =
        include_str!("../../../../fixtures/kubeconfig/two-clusters.yaml");
}
