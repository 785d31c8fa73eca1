//! ZooKeeper Custom Resource Definition
//!
//! The coordination service every other component depends on.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements as K8sResources;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::component::{ComponentResource, WorkloadSetSpec};
use super::types::{
    ComponentKind, GlobalSpec, PodDisruptionBudgetConfig, PodTemplateConfig, ProbeConfig,
    ProbesConfig, ReconciliationStatus, VolumeConfig,
};

/// Settings for the one-shot cluster metadata initialization job
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetadataInitializationJobConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub resources: Option<K8sResources>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZooKeeperSetSpec {
    #[serde(flatten)]
    pub pod: PodTemplateConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_volume: Option<VolumeConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_initialization_job: Option<MetadataInitializationJobConfig>,
}

impl WorkloadSetSpec for ZooKeeperSetSpec {
    fn pod(&self) -> &PodTemplateConfig {
        &self.pod
    }
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "pulsar.k8s.io",
    version = "v1alpha1",
    kind = "ZooKeeper",
    namespaced,
    status = "ReconciliationStatus",
    shortname = "zk",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ZooKeeperFullSpec {
    pub global: GlobalSpec,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub zookeeper: Option<ZooKeeperSetSpec>,
}

impl ComponentResource for ZooKeeper {
    type Set = ZooKeeperSetSpec;

    const COMPONENT: ComponentKind = ComponentKind::ZooKeeper;

    fn global(&self) -> &GlobalSpec {
        &self.spec.global
    }

    fn base(&self) -> Option<&ZooKeeperSetSpec> {
        self.spec.zookeeper.as_ref()
    }

    fn status(&self) -> Option<&ReconciliationStatus> {
        self.status.as_ref()
    }

    fn component_defaults() -> ZooKeeperSetSpec {
        ZooKeeperSetSpec {
            pod: PodTemplateConfig {
                replicas: Some(3),
                resources: Some(requests("300m", "1Gi")),
                probes: Some(default_probes(20)),
                pdb: Some(PodDisruptionBudgetConfig {
                    enabled: Some(true),
                    max_unavailable: Some(1),
                }),
                grace_period: Some(60),
                config: Some(BTreeMap::from([
                    (
                        "PULSAR_MEM".to_string(),
                        serde_json::json!("-Xms512m -Xmx512m"),
                    ),
                    (
                        "PULSAR_GC".to_string(),
                        serde_json::json!("-XX:+UseG1GC"),
                    ),
                ])),
                ..Default::default()
            },
            data_volume: Some(VolumeConfig {
                name: Some("data".to_string()),
                size: Some("5Gi".to_string()),
                ..Default::default()
            }),
            metadata_initialization_job: Some(MetadataInitializationJobConfig {
                timeout: Some(60),
                resources: Some(requests("100m", "256Mi")),
            }),
        }
    }

    fn spec_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(&self.spec)
    }
}

pub(crate) fn requests(cpu: &str, memory: &str) -> K8sResources {
    K8sResources {
        requests: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity(cpu.to_string())),
            ("memory".to_string(), Quantity(memory.to_string())),
        ])),
        ..Default::default()
    }
}

pub(crate) fn default_probes(initial_delay_seconds: i32) -> ProbesConfig {
    let probe = ProbeConfig {
        enabled: Some(true),
        timeout_seconds: Some(5),
        initial_delay_seconds: Some(initial_delay_seconds),
        period_seconds: Some(30),
    };
    ProbesConfig {
        readiness: Some(probe.clone()),
        liveness: Some(probe),
    }
}
