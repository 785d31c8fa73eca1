//! Controllers of the Pulsar custom resources
//!
//! `cluster` drives the `PulsarCluster` parent, `components` holds one
//! reconciler per component resource and `reconciler` is the driver they
//! share. Everything that talks to the API server goes through
//! [`cluster_api::ClusterApi`].

pub mod affinity;
pub mod apply;
pub mod cluster;
pub mod cluster_api;
pub mod collaborators;
pub mod components;
pub mod conditions;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod reconciler;
pub mod resources;
pub mod spec_diff;

#[cfg(test)]
mod reconciler_test;
#[cfg(test)]
mod resources_test;

pub use cluster::{run_cluster_controller, ClusterReconciler};
pub use cluster_api::{ClusterApi, KubeClusterApi};
pub use collaborators::Collaborators;
pub use reconciler::{
    reconcile_pass, run_component_controller, ControllerState, RequeuePolicy,
};
