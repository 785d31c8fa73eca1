//! Broker Custom Resource Definition

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements as K8sResources;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::component::{ComponentResource, SetsSpec, WorkloadSetSpec};
use super::types::{
    AutoscalerConfig, ComponentKind, GlobalSpec, PodDisruptionBudgetConfig, PodTemplateConfig,
    ReconciliationStatus,
};
use super::zookeeper::{default_probes, requests};

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionCoordinatorInitJobConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub resources: Option<K8sResources>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionCoordinatorConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partitions: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init_job: Option<TransactionCoordinatorInitJobConfig>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BrokerSetSpec {
    #[serde(flatten)]
    pub pod: PodTemplateConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transactions: Option<TransactionCoordinatorConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub autoscaler: Option<AutoscalerConfig>,
}

impl BrokerSetSpec {
    pub fn transactions_enabled(&self) -> bool {
        self.transactions
            .as_ref()
            .and_then(|t| t.enabled)
            .unwrap_or(false)
    }
}

impl WorkloadSetSpec for BrokerSetSpec {
    fn pod(&self) -> &PodTemplateConfig {
        &self.pod
    }

    fn autoscaler(&self) -> Option<&AutoscalerConfig> {
        self.autoscaler.as_ref()
    }
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "pulsar.k8s.io",
    version = "v1alpha1",
    kind = "Broker",
    namespaced,
    status = "ReconciliationStatus",
    shortname = "br",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.broker.replicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BrokerFullSpec {
    pub global: GlobalSpec,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker: Option<SetsSpec<BrokerSetSpec>>,
}

impl ComponentResource for Broker {
    type Set = BrokerSetSpec;

    const COMPONENT: ComponentKind = ComponentKind::Broker;

    fn global(&self) -> &GlobalSpec {
        &self.spec.global
    }

    fn base(&self) -> Option<&BrokerSetSpec> {
        self.spec.broker.as_ref().map(|b| &b.base)
    }

    fn sets(&self) -> Option<&BTreeMap<String, BrokerSetSpec>> {
        self.spec.broker.as_ref()?.sets.as_ref()
    }

    fn status(&self) -> Option<&ReconciliationStatus> {
        self.status.as_ref()
    }

    fn component_defaults() -> BrokerSetSpec {
        BrokerSetSpec {
            pod: PodTemplateConfig {
                replicas: Some(3),
                resources: Some(requests("1", "2Gi")),
                probes: Some(default_probes(10)),
                pdb: Some(PodDisruptionBudgetConfig {
                    enabled: Some(true),
                    max_unavailable: Some(1),
                }),
                grace_period: Some(60),
                config: Some(BTreeMap::from([
                    ("PULSAR_MEM".to_string(), serde_json::json!("-Xms1g -Xmx1g")),
                    ("managedLedgerDefaultEnsembleSize".to_string(), serde_json::json!(2)),
                    ("managedLedgerDefaultWriteQuorum".to_string(), serde_json::json!(2)),
                    ("managedLedgerDefaultAckQuorum".to_string(), serde_json::json!(2)),
                ])),
                ..Default::default()
            },
            transactions: Some(TransactionCoordinatorConfig {
                enabled: Some(false),
                partitions: Some(16),
                init_job: Some(TransactionCoordinatorInitJobConfig {
                    timeout: Some(60),
                    resources: Some(requests("100m", "256Mi")),
                }),
            }),
            autoscaler: Some(AutoscalerConfig {
                enabled: Some(false),
                ..Default::default()
            }),
        }
    }

    fn spec_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(&self.spec)
    }
}
