//! Bastion Custom Resource Definition
//!
//! An admin pod with the Pulsar CLI tools preconfigured against the cluster.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::component::{ComponentResource, WorkloadSetSpec};
use super::types::{ComponentKind, GlobalSpec, PodTemplateConfig, ReconciliationStatus};
use super::zookeeper::requests;

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BastionSetSpec {
    #[serde(flatten)]
    pub pod: PodTemplateConfig,

    /// Point the admin tools at the proxy instead of the brokers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_proxy: Option<bool>,
}

impl WorkloadSetSpec for BastionSetSpec {
    fn pod(&self) -> &PodTemplateConfig {
        &self.pod
    }
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "pulsar.k8s.io",
    version = "v1alpha1",
    kind = "Bastion",
    namespaced,
    status = "ReconciliationStatus",
    shortname = "ba",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BastionFullSpec {
    pub global: GlobalSpec,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bastion: Option<BastionSetSpec>,
}

impl ComponentResource for Bastion {
    type Set = BastionSetSpec;

    const COMPONENT: ComponentKind = ComponentKind::Bastion;

    fn global(&self) -> &GlobalSpec {
        &self.spec.global
    }

    fn base(&self) -> Option<&BastionSetSpec> {
        self.spec.bastion.as_ref()
    }

    fn status(&self) -> Option<&ReconciliationStatus> {
        self.status.as_ref()
    }

    fn component_defaults() -> BastionSetSpec {
        BastionSetSpec {
            pod: PodTemplateConfig {
                replicas: Some(1),
                resources: Some(requests("250m", "256Mi")),
                grace_period: Some(60),
                pdb: Some(crate::crd::PodDisruptionBudgetConfig {
                    enabled: Some(false),
                    max_unavailable: None,
                }),
                ..Default::default()
            },
            target_proxy: None,
        }
    }

    fn spec_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(&self.spec)
    }
}
