//! Kubernetes resource builders for Pulsar components
//!
//! Every builder is a pure function of the normalized component spec: it
//! never reads the cluster. The apply engine in [`super::apply`] decides
//! whether the result gets created, patched or left alone.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Affinity, ConfigMap, ConfigMapEnvSource, ConfigMapVolumeSource, Container, ContainerPort,
    EmptyDirVolumeSource, EnvFromSource, ExecAction, HTTPGetAction, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, Probe, SecretVolumeSource, Service,
    ServiceAccount, ServicePort, ServiceSpec, TCPSocketAction, Volume, VolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::crd::defaults::DEFAULT_IMAGE;
use crate::crd::{
    ComponentKind, GlobalSpec, PodTemplateConfig, ProbeConfig, ServiceConfig, StorageClassConfig,
    VolumeConfig,
};
use crate::error::{Error, Result};

pub const LABEL_APP: &str = "app";
pub const LABEL_CLUSTER: &str = "cluster";
pub const LABEL_COMPONENT: &str = "component";
pub const LABEL_RESOURCE_SET: &str = "resource-set";
pub const LABEL_RACK: &str = "rack";

pub const APP_NAME: &str = "pulsar";

/// Prefix that makes the image's entrypoint copy an entry into the config file
pub const CONFIG_PREFIX: &str = "PULSAR_PREFIX_";

/// Pod annotation carrying the checksum of a ConfigMap, `{prefix}{configmap}`
pub const CONFIG_CHECKSUM_ANNOTATION_PREFIX: &str = "pulsar.k8s.io/configmap-";

/// Job annotation recording the spec the job was created for
pub const SPEC_CHECKSUM_ANNOTATION: &str = "pulsar.k8s.io/spec-checksum";

// ============================================================================
// Identity
// ============================================================================

/// Name and labels of the objects generated for one component set
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceIdentity {
    pub name: String,
    pub base_name: String,
    pub labels: BTreeMap<String, String>,
}

impl ResourceIdentity {
    /// `override`, else `{cluster}-{base}`, else `{cluster}-{base}-{set}`
    pub fn new(
        global: &GlobalSpec,
        component: ComponentKind,
        set: Option<&str>,
        override_name: Option<&str>,
    ) -> Self {
        let base_name = component.base_name(global);
        let name = match (override_name, set) {
            (Some(name), _) => name.to_string(),
            (None, None) => format!("{}-{}", global.name, base_name),
            (None, Some(set)) => format!("{}-{}-{}", global.name, base_name, set),
        };

        let mut labels = BTreeMap::from([
            (LABEL_APP.to_string(), APP_NAME.to_string()),
            (LABEL_CLUSTER.to_string(), global.name.clone()),
            (LABEL_COMPONENT.to_string(), base_name.clone()),
        ]);
        if let Some(set) = set {
            labels.insert(LABEL_RESOURCE_SET.to_string(), set.to_string());
            if let Some(rack) = global.rack_of(set) {
                labels.insert(LABEL_RACK.to_string(), rack.to_string());
            }
        }

        Self {
            name,
            base_name,
            labels,
        }
    }

    /// Labels used in selectors; the rack may change without replacing pods
    pub fn selector_labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.labels.clone();
        labels.remove(LABEL_RACK);
        labels
    }

    /// Name of an auxiliary object, e.g. `-ca` or `-metadata`
    pub fn suffixed(&self, suffix: &str) -> String {
        format!("{}-{}", self.name, suffix)
    }

    pub fn rack(&self) -> Option<&str> {
        self.labels.get(LABEL_RACK).map(String::as_str)
    }

    fn metadata(&self, name: String, namespace: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name),
            namespace: Some(namespace.to_string()),
            labels: Some(self.labels.clone()),
            ..Default::default()
        }
    }
}

/// Create an OwnerReference for garbage collection
pub fn owner_reference<K: Resource<DynamicType = ()>>(owner: &K) -> OwnerReference {
    OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: owner.name_any(),
        uid: owner.meta().uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

fn non_empty<K: Ord, V>(map: BTreeMap<K, V>) -> Option<BTreeMap<K, V>> {
    (!map.is_empty()).then_some(map)
}

// ============================================================================
// Configuration
// ============================================================================

/// Key as written into the ConfigMap
pub fn prefix_config_key(key: &str) -> String {
    if key.starts_with("PULSAR_") || key.starts_with("BOOKIE_") {
        key.to_string()
    } else {
        format!("{CONFIG_PREFIX}{key}")
    }
}

/// Render a scalar config value; strings are copied verbatim
pub fn config_value_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// ConfigMap data for a workload configuration map
pub fn to_config_map_data(config: &BTreeMap<String, Value>) -> BTreeMap<String, String> {
    config
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (prefix_config_key(k), config_value_string(v)))
        .collect()
}

/// Inverse of the key prefixing applied by [`to_config_map_data`]
pub fn strip_config_prefix(data: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    data.iter()
        .map(|(k, v)| {
            let key = k.strip_prefix(CONFIG_PREFIX).unwrap_or(k);
            (key.to_string(), v.clone())
        })
        .collect()
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Checksum of a ConfigMap's data map (canonical JSON, sorted keys)
pub fn config_checksum(data: &BTreeMap<String, String>) -> Result<String> {
    Ok(sha256_hex(serde_json::to_string(data)?.as_bytes()))
}

/// Checksum of a spec value, used as the job marker
pub fn spec_checksum(value: &Value) -> Result<String> {
    let canonical = super::spec_diff::prune_nulls(value).unwrap_or(Value::Null);
    Ok(sha256_hex(serde_json::to_string(&canonical)?.as_bytes()))
}

pub fn checksum_annotation_key(config_map_name: &str) -> String {
    format!("{CONFIG_CHECKSUM_ANNOTATION_PREFIX}{config_map_name}")
}

pub fn build_config_map(
    identity: &ResourceIdentity,
    name: String,
    namespace: &str,
    data: BTreeMap<String, String>,
) -> ConfigMap {
    ConfigMap {
        metadata: identity.metadata(name, namespace),
        data: Some(data),
        ..Default::default()
    }
}

/// Addresses of the cluster's services, as seen from inside the namespace
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterEndpoints {
    pub zookeeper_connect: String,
    pub bookkeeper_metadata_uri: String,
    pub broker_service_url: String,
    pub broker_web_url: String,
    pub proxy_service_url: String,
    pub proxy_web_url: String,
    pub functions_worker_url: String,
}

impl ClusterEndpoints {
    pub fn new(global: &GlobalSpec, namespace: &str) -> Self {
        let domain = global.cluster_domain();
        let host = |component: ComponentKind, suffix: &str| {
            format!(
                "{}-{}{}.{}.svc.{}",
                global.name,
                component.base_name(global),
                suffix,
                namespace,
                domain
            )
        };
        let broker_tls = ComponentKind::Broker.tls_entry(global).is_some();
        let proxy_tls = ComponentKind::Proxy.tls_entry(global).is_some();
        let zookeeper = host(ComponentKind::ZooKeeper, "-ca");
        let broker = host(ComponentKind::Broker, "");
        let proxy = host(ComponentKind::Proxy, "");

        Self {
            zookeeper_connect: format!("{zookeeper}:2181"),
            bookkeeper_metadata_uri: format!("zk+hierarchical://{zookeeper}:2181/ledgers"),
            broker_service_url: service_url(&broker, broker_tls),
            broker_web_url: web_url(&broker, broker_tls),
            proxy_service_url: service_url(&proxy, proxy_tls),
            proxy_web_url: web_url(&proxy, proxy_tls),
            functions_worker_url: functions_worker_url(
                &host(ComponentKind::FunctionsWorker, "-ca"),
                ComponentKind::FunctionsWorker.tls_entry(global).is_some(),
            ),
        }
    }
}

fn service_url(host: &str, tls: bool) -> String {
    if tls {
        format!("pulsar+ssl://{host}:6651")
    } else {
        format!("pulsar://{host}:6650")
    }
}

fn functions_worker_url(host: &str, tls: bool) -> String {
    if tls {
        format!("https://{host}:6751")
    } else {
        format!("http://{host}:6750")
    }
}

fn web_url(host: &str, tls: bool) -> String {
    if tls {
        format!("https://{host}:8443")
    } else {
        format!("http://{host}:8080")
    }
}

// ============================================================================
// Containers
// ============================================================================

pub fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        ..Default::default()
    }
}

pub fn service_port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(port)),
        ..Default::default()
    }
}

/// How a probe checks the container
#[derive(Clone, Debug)]
pub enum ProbeAction {
    Http { path: String, port: i32 },
    Exec(Vec<String>),
    Tcp(i32),
}

/// Probe from its settings; `None` when disabled
pub fn build_probe(config: Option<&ProbeConfig>, action: ProbeAction) -> Option<Probe> {
    let config = config.cloned().unwrap_or_default();
    if !config.enabled.unwrap_or(true) {
        return None;
    }
    let mut probe = Probe {
        initial_delay_seconds: config.initial_delay_seconds,
        period_seconds: config.period_seconds,
        timeout_seconds: config.timeout_seconds,
        ..Default::default()
    };
    match action {
        ProbeAction::Http { path, port } => {
            probe.http_get = Some(HTTPGetAction {
                path: Some(path),
                port: IntOrString::Int(port),
                ..Default::default()
            })
        }
        ProbeAction::Exec(command) => {
            probe.exec = Some(ExecAction {
                command: Some(command),
            })
        }
        ProbeAction::Tcp(port) => {
            probe.tcp_socket = Some(TCPSocketAction {
                port: IntOrString::Int(port),
                ..Default::default()
            })
        }
    }
    Some(probe)
}

/// Main container of a component pod
pub struct ContainerInput<'a> {
    pub name: &'a str,
    pub pod: &'a PodTemplateConfig,
    /// Shell script run with `sh -c`
    pub script: String,
    pub ports: Vec<ContainerPort>,
    /// ConfigMaps exposed as environment
    pub config_maps: Vec<String>,
    pub volume_mounts: Vec<VolumeMount>,
    pub probe: Option<ProbeAction>,
}

pub fn build_container(input: ContainerInput<'_>) -> Container {
    let probes = input.pod.probes.clone().unwrap_or_default();
    let env_from: Vec<EnvFromSource> = input
        .config_maps
        .into_iter()
        .map(|name| EnvFromSource {
            config_map_ref: Some(ConfigMapEnvSource {
                name: Some(name),
                ..Default::default()
            }),
            ..Default::default()
        })
        .collect();

    Container {
        name: input.name.to_string(),
        image: Some(
            input
                .pod
                .image
                .clone()
                .unwrap_or_else(|| DEFAULT_IMAGE.to_string()),
        ),
        image_pull_policy: input.pod.image_pull_policy.clone(),
        command: Some(vec!["sh".to_string(), "-c".to_string()]),
        args: Some(vec![input.script]),
        env: input.pod.env.clone(),
        env_from: (!env_from.is_empty()).then_some(env_from),
        ports: (!input.ports.is_empty()).then_some(input.ports),
        resources: input.pod.resources.clone(),
        volume_mounts: (!input.volume_mounts.is_empty()).then_some(input.volume_mounts),
        readiness_probe: input
            .probe
            .clone()
            .and_then(|action| build_probe(probes.readiness.as_ref(), action)),
        liveness_probe: input
            .probe
            .and_then(|action| build_probe(probes.liveness.as_ref(), action)),
        ..Default::default()
    }
}

pub fn volume_mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

pub fn secret_volume(name: &str, secret_name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn config_map_volume(name: &str, config_map: &str) -> Volume {
    Volume {
        name: name.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: Some(config_map.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn empty_dir_volume(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

// ============================================================================
// Pod template
// ============================================================================

pub struct PodInput<'a> {
    pub identity: &'a ResourceIdentity,
    pub pod: &'a PodTemplateConfig,
    /// Main containers; the pod's sidecars are appended
    pub containers: Vec<Container>,
    pub volumes: Vec<Volume>,
    pub affinity: Option<Affinity>,
    /// ConfigMap name -> checksum of its data
    pub config_checksums: BTreeMap<String, String>,
    pub restart_on_config_map_change: bool,
    pub service_account_name: Option<String>,
}

pub fn build_pod_template(input: PodInput<'_>) -> PodTemplateSpec {
    let pod = input.pod;

    let mut labels = input.identity.labels.clone();
    labels.extend(pod.pod_labels.clone().unwrap_or_default());

    let mut annotations = pod.pod_annotations.clone().unwrap_or_default();
    if input.restart_on_config_map_change {
        for (config_map, checksum) in &input.config_checksums {
            annotations.insert(checksum_annotation_key(config_map), checksum.clone());
        }
    }

    let mut containers = input.containers;
    containers.extend(pod.sidecars.clone().unwrap_or_default());

    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels),
            annotations: non_empty(annotations),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers,
            init_containers: pod.init_containers.clone(),
            volumes: (!input.volumes.is_empty()).then_some(input.volumes),
            affinity: input.affinity,
            node_selector: pod.node_selectors.clone(),
            tolerations: pod.tolerations.clone(),
            image_pull_secrets: pod.image_pull_secrets.clone(),
            priority_class_name: pod.priority_class_name.clone(),
            dns_config: pod.dns_config.clone(),
            termination_grace_period_seconds: pod.grace_period,
            service_account_name: input.service_account_name,
            ..Default::default()
        }),
    }
}

fn workload_metadata(identity: &ResourceIdentity, namespace: &str, pod: &PodTemplateConfig) -> ObjectMeta {
    let mut labels = identity.labels.clone();
    labels.extend(pod.labels.clone().unwrap_or_default());
    ObjectMeta {
        name: Some(identity.name.clone()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels),
        annotations: pod.annotations.clone().and_then(non_empty),
        ..Default::default()
    }
}

// ============================================================================
// Storage
// ============================================================================

/// How a volume of a stateful component is provided
#[derive(Clone, Debug, PartialEq)]
pub enum VolumeProvision {
    /// Persistence disabled
    EmptyDir,
    /// PVC template referencing a class (or the cluster default when `None`)
    Claim {
        storage_class_name: Option<String>,
        /// Class the operator must create itself
        synthesized: Option<StorageClass>,
    },
}

/// Decide the storage of one named volume
///
/// Existing class names win over templates; volume level settings win over
/// the global ones.
pub fn plan_volume(
    global: &GlobalSpec,
    component: ComponentKind,
    volume_name: &str,
    volume: &VolumeConfig,
) -> Result<VolumeProvision> {
    if !global.persistence_enabled() {
        return Ok(VolumeProvision::EmptyDir);
    }
    let global_storage = global.storage.clone().unwrap_or_default();

    let existing = volume
        .existing_storage_class_name
        .clone()
        .or(global_storage.existing_storage_class_name);
    if existing.is_some() {
        return Ok(VolumeProvision::Claim {
            storage_class_name: existing,
            synthesized: None,
        });
    }

    match volume.storage_class.as_ref().or(global_storage.storage_class.as_ref()) {
        Some(template) => {
            let name = format!(
                "{}-{}-{}",
                global.name,
                component.base_name(global),
                volume_name
            );
            let class = build_storage_class(&name, global, component, template)?;
            Ok(VolumeProvision::Claim {
                storage_class_name: Some(name),
                synthesized: Some(class),
            })
        }
        None => Ok(VolumeProvision::Claim {
            storage_class_name: None,
            synthesized: None,
        }),
    }
}

pub fn build_storage_class(
    name: &str,
    global: &GlobalSpec,
    component: ComponentKind,
    template: &StorageClassConfig,
) -> Result<StorageClass> {
    let provisioner = template.provisioner.clone().ok_or_else(|| {
        Error::ConfigurationConflict(format!(
            "storage class template for {name} does not name a provisioner"
        ))
    })?;

    let mut parameters = BTreeMap::new();
    if let Some(type_) = &template.type_ {
        parameters.insert("type".to_string(), type_.clone());
    }
    if let Some(fs_type) = &template.fs_type {
        parameters.insert("fsType".to_string(), fs_type.clone());
    }
    parameters.extend(template.extra_params.clone().unwrap_or_default());

    Ok(StorageClass {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([
                (LABEL_APP.to_string(), APP_NAME.to_string()),
                (LABEL_CLUSTER.to_string(), global.name.clone()),
                (LABEL_COMPONENT.to_string(), component.base_name(global)),
            ])),
            ..Default::default()
        },
        provisioner,
        parameters: non_empty(parameters),
        reclaim_policy: Some(
            template
                .reclaim_policy
                .clone()
                .unwrap_or_else(|| "Retain".to_string()),
        ),
        volume_binding_mode: Some("WaitForFirstConsumer".to_string()),
        allow_volume_expansion: Some(true),
        ..Default::default()
    })
}

pub fn build_volume_claim(
    identity: &ResourceIdentity,
    claim_name: &str,
    size: &str,
    storage_class_name: Option<String>,
) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(claim_name.to_string()),
            labels: Some(identity.labels.clone()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(size.to_string()),
                )])),
                ..Default::default()
            }),
            storage_class_name,
            ..Default::default()
        }),
        status: None,
    }
}

// ============================================================================
// Workloads
// ============================================================================

pub fn build_statefulset(
    identity: &ResourceIdentity,
    namespace: &str,
    pod: &PodTemplateConfig,
    replicas: i32,
    service_name: String,
    template: PodTemplateSpec,
    claims: Vec<PersistentVolumeClaim>,
) -> StatefulSet {
    StatefulSet {
        metadata: workload_metadata(identity, namespace, pod),
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(identity.selector_labels()),
                ..Default::default()
            },
            service_name,
            pod_management_policy: Some("Parallel".to_string()),
            template,
            volume_claim_templates: (!claims.is_empty()).then_some(claims),
            ..Default::default()
        }),
        status: None,
    }
}

pub fn build_deployment(
    identity: &ResourceIdentity,
    namespace: &str,
    pod: &PodTemplateConfig,
    replicas: i32,
    template: PodTemplateSpec,
) -> Deployment {
    Deployment {
        metadata: workload_metadata(identity, namespace, pod),
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(identity.selector_labels()),
                ..Default::default()
            },
            template,
            ..Default::default()
        }),
        status: None,
    }
}

// ============================================================================
// Services
// ============================================================================

/// Headless service giving each pod a stable DNS name
pub fn build_headless_service(
    identity: &ResourceIdentity,
    namespace: &str,
    ports: Vec<ServicePort>,
    config: Option<&ServiceConfig>,
) -> Service {
    let mut service = build_client_service(identity, identity.name.clone(), namespace, ports, config);
    if let Some(spec) = service.spec.as_mut() {
        spec.cluster_ip = Some("None".to_string());
        spec.publish_not_ready_addresses = Some(true);
        spec.type_ = None;
    }
    service
}

pub fn build_client_service(
    identity: &ResourceIdentity,
    name: String,
    namespace: &str,
    mut ports: Vec<ServicePort>,
    config: Option<&ServiceConfig>,
) -> Service {
    let mut metadata = identity.metadata(name, namespace);
    if let Some(config) = config {
        ports.extend(config.additional_ports.clone().unwrap_or_default());
        metadata.annotations = config.annotations.clone().and_then(non_empty);
    }
    Service {
        metadata,
        spec: Some(ServiceSpec {
            ports: Some(ports),
            selector: Some(identity.selector_labels()),
            type_: config.and_then(|c| c.type_.clone()),
            ..Default::default()
        }),
        status: None,
    }
}

// ============================================================================
// PodDisruptionBudget (PDB)
// ============================================================================

pub fn build_pdb(identity: &ResourceIdentity, namespace: &str, max_unavailable: i32) -> PodDisruptionBudget {
    PodDisruptionBudget {
        metadata: identity.metadata(identity.name.clone(), namespace),
        spec: Some(PodDisruptionBudgetSpec {
            selector: Some(LabelSelector {
                match_labels: Some(identity.selector_labels()),
                ..Default::default()
            }),
            max_unavailable: Some(IntOrString::Int(max_unavailable)),
            ..Default::default()
        }),
        status: None,
    }
}

// ============================================================================
// RBAC
// ============================================================================

pub fn build_service_account(identity: &ResourceIdentity, namespace: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: identity.metadata(identity.name.clone(), namespace),
        ..Default::default()
    }
}

pub fn build_role(identity: &ResourceIdentity, namespace: &str, rules: Vec<PolicyRule>) -> Role {
    Role {
        metadata: identity.metadata(identity.name.clone(), namespace),
        rules: Some(rules),
    }
}

/// Cluster scoped roles are shared across namespaces, so the name carries it
pub fn build_cluster_role(identity: &ResourceIdentity, namespace: &str, rules: Vec<PolicyRule>) -> ClusterRole {
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(format!("{}-{}", namespace, identity.name)),
            labels: Some(identity.labels.clone()),
            ..Default::default()
        },
        rules: Some(rules),
        ..Default::default()
    }
}

fn service_account_subject(identity: &ResourceIdentity, namespace: &str) -> Subject {
    Subject {
        kind: "ServiceAccount".to_string(),
        name: identity.name.clone(),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

pub fn build_role_binding(identity: &ResourceIdentity, namespace: &str) -> RoleBinding {
    RoleBinding {
        metadata: identity.metadata(identity.name.clone(), namespace),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: identity.name.clone(),
        },
        subjects: Some(vec![service_account_subject(identity, namespace)]),
    }
}

pub fn build_cluster_role_binding(identity: &ResourceIdentity, namespace: &str) -> ClusterRoleBinding {
    let name = format!("{}-{}", namespace, identity.name);
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            labels: Some(identity.labels.clone()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name,
        },
        subjects: Some(vec![service_account_subject(identity, namespace)]),
    }
}

pub fn policy_rule(api_groups: &[&str], resources: &[&str], verbs: &[&str]) -> PolicyRule {
    let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    PolicyRule {
        api_groups: Some(strings(api_groups)),
        resources: Some(strings(resources)),
        verbs: strings(verbs),
        ..Default::default()
    }
}

// ============================================================================
// Jobs
// ============================================================================

/// One-shot job; `checksum` is stored in the spec-checksum annotation
pub fn build_job(
    identity: &ResourceIdentity,
    name: String,
    namespace: &str,
    pod: &PodTemplateConfig,
    container: Container,
    timeout_seconds: Option<i64>,
    checksum: &str,
) -> Job {
    let mut metadata = identity.metadata(name, namespace);
    metadata.annotations = Some(BTreeMap::from([(
        SPEC_CHECKSUM_ANNOTATION.to_string(),
        checksum.to_string(),
    )]));

    Job {
        metadata,
        spec: Some(JobSpec {
            active_deadline_seconds: timeout_seconds,
            backoff_limit: Some(6),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(identity.labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    restart_policy: Some("OnFailure".to_string()),
                    node_selector: pod.node_selectors.clone(),
                    tolerations: pod.tolerations.clone(),
                    image_pull_secrets: pod.image_pull_secrets.clone(),
                    dns_config: pod.dns_config.clone(),
                    priority_class_name: pod.priority_class_name.clone(),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// Checksum a live job was created for
pub fn job_checksum(job: &kube::api::DynamicObject) -> Option<&str> {
    job.metadata
        .annotations
        .as_ref()?
        .get(SPEC_CHECKSUM_ANNOTATION)
        .map(String::as_str)
}

// ============================================================================
// Readiness
// ============================================================================

fn int_at(object: &kube::api::DynamicObject, path: &[&str]) -> Option<i64> {
    let mut value = &object.data;
    for key in path {
        value = value.get(key)?;
    }
    value.as_i64()
}

fn generation_observed(object: &kube::api::DynamicObject) -> bool {
    match (object.metadata.generation, int_at(object, &["status", "observedGeneration"])) {
        (Some(generation), Some(observed)) => observed >= generation,
        _ => true,
    }
}

/// All desired replicas of a StatefulSet or Deployment are ready
pub fn workload_ready(object: &kube::api::DynamicObject) -> bool {
    let desired = int_at(object, &["spec", "replicas"]).unwrap_or(1);
    let ready = int_at(object, &["status", "readyReplicas"]).unwrap_or(0);
    generation_observed(object) && ready >= desired
}

pub fn job_succeeded(object: &kube::api::DynamicObject) -> bool {
    int_at(object, &["status", "succeeded"]).unwrap_or(0) >= 1
}
