//! Adapters between the reconcilers and the cluster: object store access,
//! template rendering, spec merging and object builders

pub mod cluster;
pub mod events;
pub mod labels;
pub mod merge;
pub mod secrets;
pub mod templates;

pub use cluster::{ClusterClient, CreateOutcome, KubeClusterClient, ResourceRef};
