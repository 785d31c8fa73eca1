//! Autorecovery Custom Resource Definition

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::component::{ComponentResource, WorkloadSetSpec};
use super::types::{ComponentKind, GlobalSpec, PodTemplateConfig, ReconciliationStatus};
use super::zookeeper::requests;

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AutorecoverySetSpec {
    #[serde(flatten)]
    pub pod: PodTemplateConfig,
}

impl WorkloadSetSpec for AutorecoverySetSpec {
    fn pod(&self) -> &PodTemplateConfig {
        &self.pod
    }
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "pulsar.k8s.io",
    version = "v1alpha1",
    kind = "Autorecovery",
    namespaced,
    status = "ReconciliationStatus",
    shortname = "ar",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AutorecoveryFullSpec {
    pub global: GlobalSpec,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub autorecovery: Option<AutorecoverySetSpec>,
}

impl ComponentResource for Autorecovery {
    type Set = AutorecoverySetSpec;

    const COMPONENT: ComponentKind = ComponentKind::Autorecovery;

    fn global(&self) -> &GlobalSpec {
        &self.spec.global
    }

    fn base(&self) -> Option<&AutorecoverySetSpec> {
        self.spec.autorecovery.as_ref()
    }

    fn status(&self) -> Option<&ReconciliationStatus> {
        self.status.as_ref()
    }

    fn component_defaults() -> AutorecoverySetSpec {
        AutorecoverySetSpec {
            pod: PodTemplateConfig {
                replicas: Some(1),
                resources: Some(requests("300m", "512Mi")),
                grace_period: Some(60),
                config: Some(BTreeMap::from([
                    ("BOOKIE_MEM".to_string(), serde_json::json!("-Xms512m -Xmx512m")),
                    ("ensemblePlacementPolicy".to_string(), serde_json::json!(
                        "org.apache.bookkeeper.client.RackawareEnsemblePlacementPolicy"
                    )),
                ])),
                ..Default::default()
            },
        }
    }

    fn spec_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(&self.spec)
    }
}
