//! BookKeeper Custom Resource Definition
//!
//! Storage bookies, optionally split into resource sets.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::component::{ComponentResource, SetsSpec, WorkloadSetSpec};
use super::types::{
    AutoscalerConfig, ComponentKind, GlobalSpec, PodDisruptionBudgetConfig, PodTemplateConfig,
    ReconciliationStatus, VolumeConfig,
};
use super::zookeeper::{default_probes, requests};

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookKeeperVolumes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal: Option<VolumeConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledgers: Option<VolumeConfig>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookKeeperSetSpec {
    #[serde(flatten)]
    pub pod: PodTemplateConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub volumes: Option<BookKeeperVolumes>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub autoscaler: Option<AutoscalerConfig>,
}

impl WorkloadSetSpec for BookKeeperSetSpec {
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
    kind = "BookKeeper",
    namespaced,
    status = "ReconciliationStatus",
    shortname = "bk",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BookKeeperFullSpec {
    pub global: GlobalSpec,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bookkeeper: Option<SetsSpec<BookKeeperSetSpec>>,
}

impl ComponentResource for BookKeeper {
    type Set = BookKeeperSetSpec;

    const COMPONENT: ComponentKind = ComponentKind::BookKeeper;

    fn global(&self) -> &GlobalSpec {
        &self.spec.global
    }

    fn base(&self) -> Option<&BookKeeperSetSpec> {
        self.spec.bookkeeper.as_ref().map(|b| &b.base)
    }

    fn sets(&self) -> Option<&BTreeMap<String, BookKeeperSetSpec>> {
        self.spec.bookkeeper.as_ref()?.sets.as_ref()
    }

    fn status(&self) -> Option<&ReconciliationStatus> {
        self.status.as_ref()
    }

    fn component_defaults() -> BookKeeperSetSpec {
        BookKeeperSetSpec {
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
                    ("BOOKIE_MEM".to_string(), serde_json::json!("-Xms1g -Xmx1g")),
                    ("journalDirectory".to_string(), serde_json::json!("data/bookkeeper/journal")),
                    ("ledgerDirectories".to_string(), serde_json::json!("data/bookkeeper/ledgers")),
                    ("useHostNameAsBookieID".to_string(), serde_json::json!(true)),
                ])),
                ..Default::default()
            },
            volumes: Some(BookKeeperVolumes {
                journal: Some(VolumeConfig {
                    name: Some("journal".to_string()),
                    size: Some("20Gi".to_string()),
                    ..Default::default()
                }),
                ledgers: Some(VolumeConfig {
                    name: Some("ledgers".to_string()),
                    size: Some("50Gi".to_string()),
                    ..Default::default()
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
