//! Capabilities shared by every component custom resource
//!
//! Each component (ZooKeeper, BookKeeper, Broker, ...) defines a *set spec*
//! type implementing [`WorkloadSetSpec`]. Components that can be split into
//! named resource sets wrap it in [`SetsSpec`].

use std::collections::BTreeMap;
use std::fmt::Debug;

use kube::Resource;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::types::{
    AutoscalerConfig, ComponentKind, GlobalSpec, PodTemplateConfig, ReconciliationStatus,
};

/// Capability set every component set spec provides to the resource builders
pub trait WorkloadSetSpec:
    Clone + Default + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn pod(&self) -> &PodTemplateConfig;

    fn replicas(&self) -> i32 {
        self.pod().replicas.unwrap_or(0)
    }

    fn is_enabled(&self) -> bool {
        self.replicas() > 0
    }

    fn config(&self) -> BTreeMap<String, serde_json::Value> {
        self.pod().config.clone().unwrap_or_default()
    }

    fn restart_on_config_map_change(&self) -> bool {
        self.pod().restart_on_config_map_change.unwrap_or(false)
    }

    fn autoscaler(&self) -> Option<&AutoscalerConfig> {
        None
    }
}

/// A component spec split into a default group plus named resource sets
///
/// Fields of the default group are inherited by every set; a set only
/// states what it overrides.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SetsSpec<S> {
    #[serde(flatten)]
    pub base: S,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sets: Option<BTreeMap<String, S>>,
}

/// A set spec after defaults and set overrides have been merged
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedSet<S> {
    /// `None` for a component deployed as a single group
    pub name: Option<String>,
    pub spec: S,
}

/// Custom resources managed by a component reconciler
pub trait ComponentResource:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    type Set: WorkloadSetSpec;

    const COMPONENT: ComponentKind;

    fn global(&self) -> &GlobalSpec;

    /// Default group, as written by the user
    fn base(&self) -> Option<&Self::Set>;

    /// Named resource sets, as written by the user
    fn sets(&self) -> Option<&BTreeMap<String, Self::Set>> {
        None
    }

    fn status(&self) -> Option<&ReconciliationStatus>;

    /// Defaults specific to the component, applied under the user's values
    fn component_defaults() -> Self::Set;

    /// Serialized `spec` used for last-applied comparisons
    fn spec_value(&self) -> serde_json::Result<serde_json::Value>;
}
