//! FunctionsWorker Custom Resource Definition
//!
//! Runs Pulsar Functions outside the brokers. Disabled (0 replicas) unless
//! requested.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::component::{ComponentResource, WorkloadSetSpec};
use super::types::{
    ComponentKind, GlobalSpec, PodDisruptionBudgetConfig, PodTemplateConfig,
    ReconciliationStatus, VolumeConfig,
};
use super::zookeeper::{default_probes, requests};

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FunctionsWorkerRbacConfig {
    /// Create the ServiceAccount and role bindings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create: Option<bool>,
    /// Role/RoleBinding when true, ClusterRole/ClusterRoleBinding when false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespaced: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FunctionsWorkerSetSpec {
    #[serde(flatten)]
    pub pod: PodTemplateConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs_volume: Option<VolumeConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rbac: Option<FunctionsWorkerRbacConfig>,
}

impl FunctionsWorkerSetSpec {
    pub fn rbac_create(&self) -> bool {
        self.rbac.as_ref().and_then(|r| r.create).unwrap_or(true)
    }

    pub fn rbac_namespaced(&self) -> bool {
        self.rbac.as_ref().and_then(|r| r.namespaced).unwrap_or(true)
    }
}

impl WorkloadSetSpec for FunctionsWorkerSetSpec {
    fn pod(&self) -> &PodTemplateConfig {
        &self.pod
    }
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "pulsar.k8s.io",
    version = "v1alpha1",
    kind = "FunctionsWorker",
    namespaced,
    status = "ReconciliationStatus",
    shortname = "fw",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct FunctionsWorkerFullSpec {
    pub global: GlobalSpec,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub functions_worker: Option<FunctionsWorkerSetSpec>,
}

impl ComponentResource for FunctionsWorker {
    type Set = FunctionsWorkerSetSpec;

    const COMPONENT: ComponentKind = ComponentKind::FunctionsWorker;

    fn global(&self) -> &GlobalSpec {
        &self.spec.global
    }

    fn base(&self) -> Option<&FunctionsWorkerSetSpec> {
        self.spec.functions_worker.as_ref()
    }

    fn status(&self) -> Option<&ReconciliationStatus> {
        self.status.as_ref()
    }

    fn component_defaults() -> FunctionsWorkerSetSpec {
        FunctionsWorkerSetSpec {
            pod: PodTemplateConfig {
                replicas: Some(0),
                resources: Some(requests("1", "4Gi")),
                probes: Some(default_probes(10)),
                pdb: Some(PodDisruptionBudgetConfig {
                    enabled: Some(true),
                    max_unavailable: Some(1),
                }),
                grace_period: Some(60),
                config: Some(BTreeMap::from([
                    ("PULSAR_MEM".to_string(), serde_json::json!("-Xms2g -Xmx2g")),
                    ("numFunctionPackageReplicas".to_string(), serde_json::json!(2)),
                    ("functionRuntimeFactoryClassName".to_string(), serde_json::json!(
                        "org.apache.pulsar.functions.runtime.kubernetes.KubernetesRuntimeFactory"
                    )),
                ])),
                ..Default::default()
            },
            logs_volume: Some(VolumeConfig {
                name: Some("logs".to_string()),
                size: Some("5Gi".to_string()),
                ..Default::default()
            }),
            rbac: Some(FunctionsWorkerRbacConfig {
                create: Some(true),
                namespaced: Some(true),
            }),
        }
    }

    fn spec_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(&self.spec)
    }
}
