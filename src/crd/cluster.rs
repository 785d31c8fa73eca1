//! PulsarCluster Custom Resource Definition
//!
//! The parent resource. The operator derives one child resource per
//! component from it and rolls them out in dependency order.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::autorecovery::AutorecoverySetSpec;
use super::bastion::BastionSetSpec;
use super::bookkeeper::BookKeeperSetSpec;
use super::broker::BrokerSetSpec;
use super::component::SetsSpec;
use super::functions_worker::FunctionsWorkerSetSpec;
use super::proxy::ProxySetSpec;
use super::types::{GlobalSpec, ReconciliationStatus};
use super::zookeeper::ZooKeeperSetSpec;

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "pulsar.k8s.io",
    version = "v1alpha1",
    kind = "PulsarCluster",
    namespaced,
    status = "ReconciliationStatus",
    shortname = "pc",
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.global.name"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Reason","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].reason"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PulsarClusterSpec {
    pub global: GlobalSpec,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub zookeeper: Option<ZooKeeperSetSpec>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bookkeeper: Option<SetsSpec<BookKeeperSetSpec>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker: Option<SetsSpec<BrokerSetSpec>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<SetsSpec<ProxySetSpec>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub autorecovery: Option<AutorecoverySetSpec>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bastion: Option<BastionSetSpec>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub functions_worker: Option<FunctionsWorkerSetSpec>,
}
