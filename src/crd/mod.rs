//! Custom Resource Definitions for pulsar-k8s
//!
//! One parent resource (`PulsarCluster`) and one resource per component.

mod autorecovery;
mod bastion;
mod bookkeeper;
mod broker;
mod cluster;
pub mod component;
pub mod defaults;
mod functions_worker;
mod proxy;
pub mod types;
pub mod validation;
mod zookeeper;

#[cfg(test)]
mod tests;

pub use autorecovery::{Autorecovery, AutorecoveryFullSpec, AutorecoverySetSpec};
pub use bastion::{Bastion, BastionFullSpec, BastionSetSpec};
pub use bookkeeper::{BookKeeper, BookKeeperFullSpec, BookKeeperSetSpec, BookKeeperVolumes};
pub use broker::{
    Broker, BrokerFullSpec, BrokerSetSpec, TransactionCoordinatorConfig,
    TransactionCoordinatorInitJobConfig,
};
pub use cluster::{PulsarCluster, PulsarClusterSpec};
pub use component::{ComponentResource, ResolvedSet, SetsSpec, WorkloadSetSpec};
pub use functions_worker::{
    FunctionsWorker, FunctionsWorkerFullSpec, FunctionsWorkerRbacConfig, FunctionsWorkerSetSpec,
};
pub use proxy::{Proxy, ProxyFullSpec, ProxySetSpec, ProxyWebSocketConfig};
pub use types::*;
pub use validation::SpecValidationError;
pub use zookeeper::{
    MetadataInitializationJobConfig, ZooKeeper, ZooKeeperFullSpec, ZooKeeperSetSpec,
};

/// Every CRD the operator serves, for `crdgen`
pub fn all_crds() -> Vec<k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition>
{
    use kube::CustomResourceExt;
    vec![
        PulsarCluster::crd(),
        ZooKeeper::crd(),
        BookKeeper::crd(),
        Broker::crd(),
        Proxy::crd(),
        Autorecovery::crd(),
        Bastion::crd(),
        FunctionsWorker::crd(),
    ]
}
