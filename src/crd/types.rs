//! Shared types for Pulsar cluster specifications
//!
//! These types are used across the CRD definitions and controller logic.
//!
//! # Type Hierarchy
//!
//! - [`GlobalSpec`] - cluster wide settings shared by every component
//! - [`PodTemplateConfig`] - pod level settings common to every component set
//! - [`AntiAffinityConfig`] / [`RackConfig`] - placement policies
//! - [`ReconciliationStatus`] / [`Condition`] - status reported by every CR

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, EnvVar, LocalObjectReference, NodeAffinity, PodDNSConfig,
    ResourceRequirements as K8sResources, ServicePort, Toleration,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The managed roles of a Pulsar cluster, in dependency order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentKind {
    ZooKeeper,
    BookKeeper,
    Broker,
    Proxy,
    Autorecovery,
    Bastion,
    FunctionsWorker,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 7] = [
        ComponentKind::ZooKeeper,
        ComponentKind::BookKeeper,
        ComponentKind::Broker,
        ComponentKind::Proxy,
        ComponentKind::Autorecovery,
        ComponentKind::Bastion,
        ComponentKind::FunctionsWorker,
    ];

    /// Base name used for resource names and the `component` label
    pub fn base_name(&self, global: &GlobalSpec) -> String {
        let names = global.components.clone().unwrap_or_default();
        let configured = match self {
            ComponentKind::ZooKeeper => names.zookeeper_base_name,
            ComponentKind::BookKeeper => names.bookkeeper_base_name,
            ComponentKind::Broker => names.broker_base_name,
            ComponentKind::Proxy => names.proxy_base_name,
            ComponentKind::Autorecovery => names.autorecovery_base_name,
            ComponentKind::Bastion => names.bastion_base_name,
            ComponentKind::FunctionsWorker => names.functions_worker_base_name,
        };
        configured.unwrap_or_else(|| self.default_base_name().to_string())
    }

    pub fn default_base_name(&self) -> &'static str {
        match self {
            ComponentKind::ZooKeeper => "zookeeper",
            ComponentKind::BookKeeper => "bookkeeper",
            ComponentKind::Broker => "broker",
            ComponentKind::Proxy => "proxy",
            ComponentKind::Autorecovery => "autorecovery",
            ComponentKind::Bastion => "bastion",
            ComponentKind::FunctionsWorker => "function",
        }
    }

    /// Field name of the component inside the cluster spec
    pub fn spec_field(&self) -> &'static str {
        match self {
            ComponentKind::ZooKeeper => "zookeeper",
            ComponentKind::BookKeeper => "bookkeeper",
            ComponentKind::Broker => "broker",
            ComponentKind::Proxy => "proxy",
            ComponentKind::Autorecovery => "autorecovery",
            ComponentKind::Bastion => "bastion",
            ComponentKind::FunctionsWorker => "functionsWorker",
        }
    }

    /// TLS entry for this component, if TLS is enabled globally
    pub fn tls_entry<'a>(&self, global: &'a GlobalSpec) -> Option<&'a TlsEntryConfig> {
        let tls = global.tls.as_ref()?;
        if !tls.enabled.unwrap_or(false) {
            return None;
        }
        let entry = match self {
            ComponentKind::ZooKeeper => tls.zookeeper.as_ref(),
            ComponentKind::BookKeeper => tls.bookkeeper.as_ref(),
            ComponentKind::Broker => tls.broker.as_ref(),
            ComponentKind::Proxy => tls.proxy.as_ref(),
            ComponentKind::Autorecovery => tls.autorecovery.as_ref(),
            ComponentKind::Bastion => None,
            ComponentKind::FunctionsWorker => tls.functions_worker.as_ref(),
        }?;
        entry.enabled.unwrap_or(false).then_some(entry)
    }
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentKind::ZooKeeper => write!(f, "ZooKeeper"),
            ComponentKind::BookKeeper => write!(f, "BookKeeper"),
            ComponentKind::Broker => write!(f, "Broker"),
            ComponentKind::Proxy => write!(f, "Proxy"),
            ComponentKind::Autorecovery => write!(f, "Autorecovery"),
            ComponentKind::Bastion => write!(f, "Bastion"),
            ComponentKind::FunctionsWorker => write!(f, "FunctionsWorker"),
        }
    }
}

/// Overrides for the per component base names
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentBaseNames {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zookeeper_base_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bookkeeper_base_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker_base_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_base_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autorecovery_base_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bastion_base_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub functions_worker_base_name: Option<String>,
}

// ============================================================================
// Global spec
// ============================================================================

/// Cluster wide settings shared by every component
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSpec {
    /// Pulsar cluster name, prefix of every managed resource name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// Use persistent volumes for stateful components (default true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistence: Option<bool>,

    /// Roll pods when their generated configuration changes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_on_config_map_change: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_domain: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<ComponentBaseNames>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_selectors: Option<BTreeMap<String, String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub dns_config: Option<PodDNSConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub anti_affinity: Option<AntiAffinityConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<GlobalStorageConfig>,

    /// Named resource sets; components may deploy one group per set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_sets: Option<BTreeMap<String, ResourceSetConfig>>,

    /// Named placement policies that resource sets can be pinned to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub racks: Option<BTreeMap<String, RackConfig>>,
}

impl GlobalSpec {
    pub fn persistence_enabled(&self) -> bool {
        self.persistence.unwrap_or(true)
    }

    pub fn cluster_domain(&self) -> &str {
        self.cluster_domain.as_deref().unwrap_or("cluster.local")
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls
            .as_ref()
            .and_then(|t| t.enabled)
            .unwrap_or(false)
    }

    pub fn auth_enabled(&self) -> bool {
        self.auth
            .as_ref()
            .and_then(|a| a.enabled)
            .unwrap_or(false)
    }

    /// Rack a resource set is pinned to
    pub fn rack_of(&self, set_name: &str) -> Option<&str> {
        self.resource_sets
            .as_ref()?
            .get(set_name)?
            .rack
            .as_deref()
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSetConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rack: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TlsEntryConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_secret_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zookeeper: Option<TlsEntryConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bookkeeper: Option<TlsEntryConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker: Option<TlsEntryConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<TlsEntryConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autorecovery: Option<TlsEntryConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub functions_worker: Option<TlsEntryConfig>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenAuthConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub super_user_roles: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_roles: Option<Vec<String>>,
    /// Generate the signing key and role tokens when missing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initialize_secrets: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<TokenAuthConfig>,
}

// ============================================================================
// Placement
// ============================================================================

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AntiAffinityTypeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Required (hard) rule when true, preferred (soft) rule when false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
}

/// Pod anti-affinity between pods of the same component set
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AntiAffinityConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<AntiAffinityTypeConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<AntiAffinityTypeConfig>,
}

impl AntiAffinityConfig {
    /// Defaults applied under any user supplied value
    pub fn defaults() -> Self {
        Self {
            host: Some(AntiAffinityTypeConfig {
                enabled: Some(true),
                required: Some(true),
            }),
            zone: Some(AntiAffinityTypeConfig {
                enabled: Some(false),
                required: Some(false),
            }),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostRackConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_rack_affinity: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_rack_anti_affinity: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_host_anti_affinity: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_rack_host_anti_affinity: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZoneRackConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_rack_affinity: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_rack_anti_affinity: Option<bool>,
}

/// A named placement policy combining host and zone level rules
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RackConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<HostRackConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<ZoneRackConfig>,
}

impl RackConfig {
    pub fn defaults() -> Self {
        Self {
            host: Some(HostRackConfig {
                enabled: Some(false),
                require_rack_affinity: Some(false),
                require_rack_anti_affinity: Some(true),
                enable_host_anti_affinity: Some(true),
                require_rack_host_anti_affinity: Some(true),
            }),
            zone: Some(ZoneRackConfig {
                enabled: Some(false),
                require_rack_affinity: Some(false),
                require_rack_anti_affinity: Some(true),
            }),
        }
    }
}

// ============================================================================
// Storage
// ============================================================================

/// Template for a StorageClass the operator creates itself
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageClassConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reclaim_policy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioner: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fs_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_params: Option<BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStorageConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_storage_class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<StorageClassConfig>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_storage_class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<StorageClassConfig>,
}

// ============================================================================
// Pod level settings
// ============================================================================

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProbeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_delay_seconds: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_seconds: Option<i32>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProbesConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readiness: Option<ProbeConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub liveness: Option<ProbeConfig>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodDisruptionBudgetConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<i32>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<Vec<serde_json::Value>>")]
    pub additional_ports: Option<Vec<ServicePort>>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

/// Settings read by the external autoscaler daemons
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_ms: Option<i64>,
}

impl AutoscalerConfig {
    pub fn is_enabled(config: &Option<AutoscalerConfig>) -> bool {
        config
            .as_ref()
            .and_then(|c| c.enabled)
            .unwrap_or(false)
    }
}

/// Pod level settings shared by every component set
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplateConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_selectors: Option<BTreeMap<String, String>>,

    /// Annotations on the workload object itself
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_annotations: Option<BTreeMap<String, String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod_labels: Option<BTreeMap<String, String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub resources: Option<K8sResources>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub probes: Option<ProbesConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<Vec<serde_json::Value>>")]
    pub env: Option<Vec<EnvVar>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<Vec<serde_json::Value>>")]
    pub init_containers: Option<Vec<Container>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<Vec<serde_json::Value>>")]
    pub sidecars: Option<Vec<Container>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<Vec<serde_json::Value>>")]
    pub tolerations: Option<Vec<Toleration>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub node_affinity: Option<NodeAffinity>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub anti_affinity: Option<AntiAffinityConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdb: Option<PodDisruptionBudgetConfig>,

    /// Workload configuration entries, rendered into the ConfigMap
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<BTreeMap<String, serde_json::Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_on_config_map_change: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub grace_period: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub dns_config: Option<PodDNSConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceConfig>,

    /// Use this name instead of the derived `{cluster}-{component}` name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_resource_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<Vec<serde_json::Value>>")]
    pub image_pull_secrets: Option<Vec<LocalObjectReference>>,
}

impl PodTemplateConfig {
    pub fn pdb_enabled(&self) -> bool {
        self.pdb
            .as_ref()
            .and_then(|p| p.enabled)
            .unwrap_or(true)
    }

    pub fn pdb_max_unavailable(&self) -> i32 {
        self.pdb
            .as_ref()
            .and_then(|p| p.max_unavailable)
            .unwrap_or(1)
    }
}

// ============================================================================
// Status
// ============================================================================

/// Kubernetes-style condition
///
/// # Examples
///
/// ```rust,no_run
/// use pulsar_k8s::crd::Condition;
///
/// let condition = Condition::ready(true, "Ready", "Component is ready");
/// ```
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., "Ready")
    #[serde(rename = "type")]
    pub type_: String,
    /// Status of the condition: "True", "False", or "Unknown"
    pub status: String,
    /// Last time the condition transitioned
    pub last_transition_time: String,
    /// Machine-readable reason for the condition
    pub reason: String,
    /// Human-readable message
    pub message: String,
    /// The .metadata.generation the condition was set based upon
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new Ready condition
    pub fn ready(status: bool, reason: &str, message: &str) -> Self {
        Self {
            type_: "Ready".to_string(),
            status: if status { "True" } else { "False" }.to_string(),
            last_transition_time: chrono::Utc::now().to_rfc3339(),
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation: None,
        }
    }

    /// Set the observed generation for this condition
    pub fn with_observed_generation(mut self, generation: i64) -> Self {
        self.observed_generation = Some(generation);
        self
    }
}

/// Status shared by the cluster and every component resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Canonical JSON of the last spec that converged successfully
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_applied: Option<String>,
}

impl ReconciliationStatus {
    pub fn is_ready(&self) -> bool {
        self.conditions
            .iter()
            .any(|c| c.type_ == "Ready" && c.status == "True")
    }
}
