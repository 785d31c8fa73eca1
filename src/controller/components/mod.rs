//! Reconcilers of the individual Pulsar components
//!
//! Each submodule implements [`ComponentReconciler`](super::reconciler::ComponentReconciler)
//! for one custom resource. The helpers below are shared between them.

pub mod autorecovery;
pub mod bastion;
pub mod bookkeeper;
pub mod broker;
pub mod functions_worker;
pub mod proxy;
pub mod zookeeper;

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{
    Affinity, ConfigMap, Container, PersistentVolumeClaim, ResourceRequirements, Volume,
    VolumeMount,
};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::affinity::{plan_affinity, AffinityInput};
use super::apply::ApplyOutcome;
use super::reconciler::{workloads_ready, PassContext, ReconciliationResult, WorkloadRef};
use super::resources::{
    build_config_map, build_container, build_pdb, build_volume_claim, config_checksum,
    empty_dir_volume, job_checksum, job_succeeded, plan_volume, secret_volume, spec_checksum,
    to_config_map_data, volume_mount, ContainerInput, ResourceIdentity, VolumeProvision,
};
use crate::crd::defaults::NormalizedComponent;
use crate::crd::{ComponentKind, GlobalSpec, PodTemplateConfig, ResolvedSet, VolumeConfig, WorkloadSetSpec};
use crate::error::Result;

pub const CERTS_VOLUME: &str = "certs";
pub const CERTS_PATH: &str = "/pulsar/certs";
const DEFAULT_TLS_SECRET: &str = "pulsar-tls";

pub const TOKEN_PUBLIC_KEY_VOLUME: &str = "token-public-key";
pub const TOKEN_PUBLIC_KEY_PATH: &str = "/pulsar/token-public-key";
pub const TOKEN_SUPERUSER_VOLUME: &str = "token-superuser";
pub const TOKEN_SUPERUSER_PATH: &str = "/pulsar/token-superuser";

/// JVM flag appended to every Pulsar process
pub const JAVA_OPTS: &str = "-Dlog4j2.formatMsgNoLookups=true";

pub fn set_identity<S: WorkloadSetSpec>(
    global: &GlobalSpec,
    component: ComponentKind,
    set: &ResolvedSet<S>,
) -> ResourceIdentity {
    ResourceIdentity::new(
        global,
        component,
        set.name.as_deref(),
        set.spec.pod().override_resource_name.as_deref(),
    )
}

/// The only group of a component deployed without resource sets
pub fn single_group<S: WorkloadSetSpec>(normalized: &NormalizedComponent<S>) -> ResolvedSet<S> {
    normalized.sets.first().cloned().unwrap_or_else(|| ResolvedSet {
        name: None,
        spec: normalized.base.clone(),
    })
}

pub fn set_affinity(
    global: &GlobalSpec,
    identity: &ResourceIdentity,
    pod: &PodTemplateConfig,
) -> Result<Option<Affinity>> {
    let match_labels = identity.selector_labels();
    plan_affinity(&AffinityInput {
        cluster: &global.name,
        anti_affinity: pod.anti_affinity.as_ref(),
        racks: global.racks.as_ref(),
        rack: identity.rack(),
        match_labels: &match_labels,
        node_affinity: pod.node_affinity.as_ref(),
    })
}

/// Certificate secret volume of a component with TLS enabled
pub fn tls_volume(global: &GlobalSpec, component: ComponentKind) -> Option<(Volume, VolumeMount)> {
    let entry = component.tls_entry(global)?;
    let secret = entry
        .secret_name
        .clone()
        .or_else(|| global.tls.as_ref()?.default_secret_name.clone())
        .unwrap_or_else(|| DEFAULT_TLS_SECRET.to_string());
    Some((
        secret_volume(CERTS_VOLUME, &secret),
        volume_mount(CERTS_VOLUME, CERTS_PATH),
    ))
}

/// File locations of the mounted certificate, keyed as in the Pulsar config files
pub fn tls_file_config() -> BTreeMap<String, Value> {
    BTreeMap::from([
        ("tlsCertificateFilePath".to_string(), json!(format!("{CERTS_PATH}/tls.crt"))),
        ("tlsKeyFilePath".to_string(), json!(format!("{CERTS_PATH}/tls.key"))),
        ("tlsTrustCertsFilePath".to_string(), json!(format!("{CERTS_PATH}/ca.crt"))),
    ])
}

/// Token authentication settings of a server side component
pub fn token_auth_config(global: &GlobalSpec) -> BTreeMap<String, Value> {
    if !global.auth_enabled() {
        return BTreeMap::new();
    }
    let token = global
        .auth
        .as_ref()
        .and_then(|a| a.token.clone())
        .unwrap_or_default();
    let mut roles = token.super_user_roles.unwrap_or_default();
    roles.extend(token.proxy_roles.unwrap_or_default());
    roles.sort();
    roles.dedup();

    BTreeMap::from([
        ("authenticationEnabled".to_string(), json!("true")),
        ("authorizationEnabled".to_string(), json!("true")),
        (
            "authenticationProviders".to_string(),
            json!("org.apache.pulsar.broker.authentication.AuthenticationProviderToken"),
        ),
        (
            "tokenPublicKey".to_string(),
            json!(format!("file://{TOKEN_PUBLIC_KEY_PATH}/my-public.key")),
        ),
        ("superUserRoles".to_string(), json!(roles.join(","))),
        (
            "brokerClientAuthenticationPlugin".to_string(),
            json!("org.apache.pulsar.client.impl.auth.AuthenticationToken"),
        ),
        (
            "brokerClientAuthenticationParameters".to_string(),
            json!(format!("file://{TOKEN_SUPERUSER_PATH}/superuser.jwt")),
        ),
    ])
}

/// Secret volumes holding the token public key and the superuser token
pub fn token_auth_volumes(global: &GlobalSpec) -> Vec<(Volume, VolumeMount)> {
    if !global.auth_enabled() {
        return Vec::new();
    }
    vec![
        (
            secret_volume(TOKEN_PUBLIC_KEY_VOLUME, "token-public-key"),
            volume_mount(TOKEN_PUBLIC_KEY_VOLUME, TOKEN_PUBLIC_KEY_PATH),
        ),
        (
            secret_volume(TOKEN_SUPERUSER_VOLUME, "token-superuser"),
            volume_mount(TOKEN_SUPERUSER_VOLUME, TOKEN_SUPERUSER_PATH),
        ),
    ]
}

/// A ConfigMap and the checksum of its data
pub struct RenderedConfigMap {
    pub config_map: ConfigMap,
    pub name: String,
    pub checksum: String,
}

/// Render operator computed entries overlaid with the user's config
///
/// User supplied keys win over computed ones.
pub fn render_config_map(
    identity: &ResourceIdentity,
    name: String,
    namespace: &str,
    computed: BTreeMap<String, Value>,
    user: BTreeMap<String, Value>,
) -> Result<RenderedConfigMap> {
    let mut config = computed;
    config.extend(user);
    render_raw_config_map(identity, name, namespace, to_config_map_data(&config))
}

/// ConfigMap whose data is written as given
pub fn render_raw_config_map(
    identity: &ResourceIdentity,
    name: String,
    namespace: &str,
    data: BTreeMap<String, String>,
) -> Result<RenderedConfigMap> {
    let checksum = config_checksum(&data)?;
    Ok(RenderedConfigMap {
        config_map: build_config_map(identity, name.clone(), namespace, data),
        name,
        checksum,
    })
}

/// A data volume after its storage has been decided
pub enum ProvisionedVolume {
    Claim(PersistentVolumeClaim),
    EmptyDir(Volume),
}

/// Decide the storage of a volume and converge the StorageClass it needs
///
/// The volume and its mount are both called `{base}-{volume}`.
pub async fn provision_volume(
    ctx: &PassContext<'_>,
    global: &GlobalSpec,
    component: ComponentKind,
    identity: &ResourceIdentity,
    volume: &VolumeConfig,
    default_name: &str,
    enabled: bool,
) -> Result<(ProvisionedVolume, String)> {
    let volume_name = volume.name.clone().unwrap_or_else(|| default_name.to_string());
    let claim_name = format!("{}-{}", identity.base_name, volume_name);

    let provisioned = match plan_volume(global, component, &volume_name, volume)? {
        VolumeProvision::EmptyDir => {
            debug!("Persistence disabled, {} uses emptyDir", claim_name);
            ProvisionedVolume::EmptyDir(empty_dir_volume(&claim_name))
        }
        VolumeProvision::Claim {
            storage_class_name,
            synthesized,
        } => {
            if let Some(class) = synthesized {
                ctx.patcher.apply(&class, enabled).await?;
            }
            let size = volume.size.clone().unwrap_or_else(|| "1Gi".to_string());
            ProvisionedVolume::Claim(build_volume_claim(
                identity,
                &claim_name,
                &size,
                storage_class_name,
            ))
        }
    };
    Ok((provisioned, claim_name))
}

/// Split provisioned volumes into claim templates and pod volumes
pub fn split_volumes(volumes: Vec<ProvisionedVolume>) -> (Vec<PersistentVolumeClaim>, Vec<Volume>) {
    let mut claims = Vec::new();
    let mut pod_volumes = Vec::new();
    for volume in volumes {
        match volume {
            ProvisionedVolume::Claim(claim) => claims.push(claim),
            ProvisionedVolume::EmptyDir(volume) => pod_volumes.push(volume),
        }
    }
    (claims, pod_volumes)
}

/// PodDisruptionBudget of a set; removed when the set or the budget is disabled
pub async fn ensure_pdb(
    ctx: &PassContext<'_>,
    identity: &ResourceIdentity,
    pod: &PodTemplateConfig,
    enabled: bool,
) -> Result<ApplyOutcome> {
    let pdb = build_pdb(identity, ctx.namespace(), pod.pdb_max_unavailable());
    ctx.patcher.apply_pdb(&pdb, enabled && pod.pdb_enabled()).await
}

/// Run a script after the image rendered `conf_file` from the environment
pub fn apply_config_script(conf_file: &str, command: &str) -> String {
    format!(
        "bin/apply-config-from-env.py {conf_file} && OPTS=\"${{OPTS}} {JAVA_OPTS}\" exec {command}"
    )
}

/// Ready once every workload is; a component without workloads is ready
pub async fn report_readiness(
    ctx: &PassContext<'_>,
    component: ComponentKind,
    workloads: &[WorkloadRef],
) -> Result<ReconciliationResult> {
    if workloads_ready(&ctx.patcher, workloads).await? {
        Ok(ReconciliationResult::ready(&format!("{component} is ready")))
    } else {
        Ok(ReconciliationResult::initializing(&format!(
            "Waiting for the {component} workloads to become ready"
        )))
    }
}

/// Container of a one-shot job, sharing the image of the component
pub fn job_container(
    name: &str,
    pod: &PodTemplateConfig,
    resources: Option<ResourceRequirements>,
    script: String,
) -> Container {
    let job_pod = PodTemplateConfig {
        image: pod.image.clone(),
        image_pull_policy: pod.image_pull_policy.clone(),
        resources,
        ..Default::default()
    };
    build_container(ContainerInput {
        name,
        pod: &job_pod,
        script,
        ports: Vec::new(),
        config_maps: Vec::new(),
        volume_mounts: Vec::new(),
        probe: None,
    })
}

/// Marker stored on a job: what it runs and for how long
pub fn job_spec_checksum(container: &Container, timeout_seconds: Option<i64>) -> Result<String> {
    spec_checksum(&json!({ "container": container, "timeout": timeout_seconds }))
}

/// Converge a one-shot job and report whether it succeeded
///
/// A job whose checksum marker differs from `checksum` is deleted and
/// created again.
pub async fn ensure_job(ctx: &PassContext<'_>, job: &Job, checksum: &str) -> Result<bool> {
    let name = job.metadata.name.as_deref().unwrap_or_default();
    match ctx.patcher.get::<Job>(name).await? {
        Some(current) if job_checksum(&current) == Some(checksum) => Ok(job_succeeded(&current)),
        current => {
            if current.is_some() {
                info!("Job {} was created for another spec, recreating", name);
            }
            ctx.patcher.replace_immutable(job, true).await?;
            Ok(false)
        }
    }
}
