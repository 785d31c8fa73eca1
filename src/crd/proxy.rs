//! Proxy Custom Resource Definition

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements as K8sResources;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::component::{ComponentResource, SetsSpec, WorkloadSetSpec};
use super::types::{
    ComponentKind, GlobalSpec, PodDisruptionBudgetConfig, PodTemplateConfig,
    ReconciliationStatus,
};
use super::zookeeper::{default_probes, requests};

/// The web socket service runs as a second container in each proxy pod
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyWebSocketConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub resources: Option<K8sResources>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxySetSpec {
    #[serde(flatten)]
    pub pod: PodTemplateConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_socket: Option<ProxyWebSocketConfig>,
}

impl ProxySetSpec {
    pub fn web_socket_enabled(&self) -> bool {
        self.web_socket
            .as_ref()
            .and_then(|w| w.enabled)
            .unwrap_or(false)
    }
}

impl WorkloadSetSpec for ProxySetSpec {
    fn pod(&self) -> &PodTemplateConfig {
        &self.pod
    }
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "pulsar.k8s.io",
    version = "v1alpha1",
    kind = "Proxy",
    namespaced,
    status = "ReconciliationStatus",
    shortname = "px",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ProxyFullSpec {
    pub global: GlobalSpec,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<SetsSpec<ProxySetSpec>>,
}

impl ComponentResource for Proxy {
    type Set = ProxySetSpec;

    const COMPONENT: ComponentKind = ComponentKind::Proxy;

    fn global(&self) -> &GlobalSpec {
        &self.spec.global
    }

    fn base(&self) -> Option<&ProxySetSpec> {
        self.spec.proxy.as_ref().map(|p| &p.base)
    }

    fn sets(&self) -> Option<&BTreeMap<String, ProxySetSpec>> {
        self.spec.proxy.as_ref()?.sets.as_ref()
    }

    fn status(&self) -> Option<&ReconciliationStatus> {
        self.status.as_ref()
    }

    fn component_defaults() -> ProxySetSpec {
        ProxySetSpec {
            pod: PodTemplateConfig {
                replicas: Some(3),
                resources: Some(requests("1", "1Gi")),
                probes: Some(default_probes(10)),
                pdb: Some(PodDisruptionBudgetConfig {
                    enabled: Some(true),
                    max_unavailable: Some(1),
                }),
                grace_period: Some(60),
                config: Some(BTreeMap::from([(
                    "PULSAR_MEM".to_string(),
                    serde_json::json!("-Xms512m -Xmx512m"),
                )])),
                ..Default::default()
            },
            web_socket: Some(ProxyWebSocketConfig {
                enabled: Some(true),
                resources: Some(requests("500m", "512Mi")),
            }),
        }
    }

    fn spec_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(&self.spec)
    }
}
