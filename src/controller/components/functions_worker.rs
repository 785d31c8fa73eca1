//! FunctionsWorker reconciler
//!
//! The worker reads `functions_worker.yml` rather than environment
//! overrides, so its configuration is rendered as a YAML file. Settings
//! meant for the launcher scripts (`PULSAR_MEM`, `PULSAR_GC`, ...) go to the
//! `-extra` ConfigMap and reach the container as environment.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ServicePort;
use serde_json::{json, Value};

use super::{
    ensure_pdb, provision_volume, render_raw_config_map, report_readiness, set_affinity,
    set_identity, single_group, split_volumes, tls_volume, token_auth_config,
    token_auth_volumes, CERTS_PATH, JAVA_OPTS,
};
use crate::controller::reconciler::{
    ComponentReconciler, PassContext, ReconciliationResult, WorkloadRef,
};
use crate::controller::resources::{
    build_client_service, build_cluster_role, build_cluster_role_binding, build_container,
    build_headless_service, build_pod_template, build_role, build_role_binding,
    build_service_account, build_statefulset, config_map_volume, config_value_string,
    container_port, policy_rule, service_port, volume_mount, ClusterEndpoints, ContainerInput,
    PodInput, ProbeAction, ResourceIdentity,
};
use crate::crd::defaults::{NormalizedComponent, DEFAULT_IMAGE};
use crate::crd::{
    ComponentKind, FunctionsWorker, FunctionsWorkerSetSpec, GlobalSpec, WorkloadSetSpec,
};
use crate::error::Result;

pub const WORKER_PORT: i32 = 6750;
pub const WORKER_TLS_PORT: i32 = 6751;

pub const CONFIG_FILE: &str = "functions_worker.yml";
const CUSTOM_CONF_VOLUME: &str = "custom-conf";
const CUSTOM_CONF_PATH: &str = "/pulsar/custom-conf";
const LOGS_PATH: &str = "/pulsar/logs";

pub fn extra_config_map_name(identity: &ResourceIdentity) -> String {
    identity.suffixed("extra")
}

pub fn client_service_name(identity: &ResourceIdentity) -> String {
    identity.suffixed("ca")
}

fn is_env_key(key: &str) -> bool {
    key.starts_with("PULSAR_") || key.starts_with("BOOKIE_")
}

fn worker_config(
    global: &GlobalSpec,
    namespace: &str,
    image: &str,
    endpoints: &ClusterEndpoints,
) -> BTreeMap<String, Value> {
    let broker_tls = ComponentKind::Broker.tls_entry(global).is_some();
    let mut config = BTreeMap::from([
        ("pulsarFunctionsCluster".to_string(), json!(global.name)),
        (
            "configurationMetadataStoreUrl".to_string(),
            json!(format!("zk:{}", endpoints.zookeeper_connect)),
        ),
        ("workerPort".to_string(), json!(WORKER_PORT)),
        ("pulsarServiceUrl".to_string(), json!(endpoints.broker_service_url)),
        ("pulsarWebServiceUrl".to_string(), json!(endpoints.broker_web_url)),
        ("pulsarFunctionsNamespace".to_string(), json!("public/functions")),
        ("downloadDirectory".to_string(), json!("/tmp/pulsar_functions")),
        ("useTls".to_string(), json!(broker_tls)),
        (
            "kubernetesContainerFactory".to_string(),
            json!({
                "jobNamespace": namespace,
                "pulsarDockerImageName": image,
                "pulsarRootDir": "/pulsar",
                "submittingInsidePod": true,
                "pulsarServiceUrl": endpoints.broker_service_url,
                "pulsarAdminUrl": endpoints.broker_web_url,
                "percentMemoryPadding": 10,
            }),
        ),
    ]);
    if broker_tls {
        config.insert(
            "brokerClientTrustCertsFilePath".to_string(),
            json!(format!("{CERTS_PATH}/ca.crt")),
        );
    }
    if ComponentKind::FunctionsWorker.tls_entry(global).is_some() {
        config.extend([
            ("tlsEnabled".to_string(), json!(true)),
            ("workerPortTls".to_string(), json!(WORKER_TLS_PORT)),
            ("tlsCertificateFilePath".to_string(), json!(format!("{CERTS_PATH}/tls.crt"))),
            ("tlsKeyFilePath".to_string(), json!(format!("{CERTS_PATH}/tls.key"))),
            ("tlsTrustCertsFilePath".to_string(), json!(format!("{CERTS_PATH}/ca.crt"))),
        ]);
    }
    config.extend(token_auth_config(global));
    config
}

/// Split the merged configuration into the YAML file and the environment
fn split_config(
    config: BTreeMap<String, Value>,
) -> (BTreeMap<String, Value>, BTreeMap<String, String>) {
    let mut file = BTreeMap::new();
    let mut env = BTreeMap::new();
    for (key, value) in config {
        if value.is_null() {
            continue;
        }
        if is_env_key(&key) {
            env.insert(key, config_value_string(&value));
        } else {
            file.insert(key, value);
        }
    }
    (file, env)
}

fn service_ports(global: &GlobalSpec) -> Vec<ServicePort> {
    let mut ports = vec![service_port("http", WORKER_PORT)];
    if ComponentKind::FunctionsWorker.tls_entry(global).is_some() {
        ports.push(service_port("https", WORKER_TLS_PORT));
    }
    ports
}

async fn ensure_rbac(
    ctx: &PassContext<'_>,
    identity: &ResourceIdentity,
    spec: &FunctionsWorkerSetSpec,
    enabled: bool,
) -> Result<Option<String>> {
    let namespace = ctx.namespace();
    let create = enabled && spec.rbac_create();
    let namespaced = spec.rbac_namespaced();
    let rules = vec![
        policy_rule(
            &[""],
            &["pods", "services", "configmaps", "secrets"],
            &["get", "list", "watch", "create", "update", "patch", "delete"],
        ),
        policy_rule(
            &["apps"],
            &["statefulsets"],
            &["get", "list", "watch", "create", "update", "patch", "delete"],
        ),
    ];

    ctx.patcher
        .apply(&build_service_account(identity, namespace), create)
        .await?;
    ctx.patcher
        .apply(&build_role(identity, namespace, rules.clone()), create && namespaced)
        .await?;
    ctx.patcher
        .apply(&build_role_binding(identity, namespace), create && namespaced)
        .await?;
    ctx.patcher
        .apply(&build_cluster_role(identity, namespace, rules), create && !namespaced)
        .await?;
    ctx.patcher
        .apply(&build_cluster_role_binding(identity, namespace), create && !namespaced)
        .await?;

    Ok(create.then(|| identity.name.clone()))
}

#[async_trait]
impl ComponentReconciler for FunctionsWorker {
    fn workloads(normalized: &NormalizedComponent<FunctionsWorkerSetSpec>) -> Vec<WorkloadRef> {
        let group = single_group(normalized);
        if !group.spec.is_enabled() {
            return Vec::new();
        }
        vec![WorkloadRef::stateful_set(
            set_identity(&normalized.global, ComponentKind::FunctionsWorker, &group).name,
        )]
    }

    async fn ensure_resources(
        &self,
        normalized: &NormalizedComponent<FunctionsWorkerSetSpec>,
        ctx: &PassContext<'_>,
    ) -> Result<ReconciliationResult> {
        let global = &normalized.global;
        let group = single_group(normalized);
        let spec = &group.spec;
        let pod = spec.pod();
        let enabled = spec.is_enabled();
        let identity = set_identity(global, ComponentKind::FunctionsWorker, &group);
        let namespace = ctx.namespace();

        let image = pod
            .image
            .clone()
            .unwrap_or_else(|| DEFAULT_IMAGE.to_string());
        let mut merged = worker_config(global, namespace, &image, &ctx.endpoints);
        merged.extend(spec.config());
        let (file, env) = split_config(merged);

        let config = render_raw_config_map(
            &identity,
            identity.name.clone(),
            namespace,
            BTreeMap::from([(CONFIG_FILE.to_string(), serde_yaml::to_string(&file)?)]),
        )?;
        ctx.patcher.apply(&config.config_map, enabled).await?;
        let extra = render_raw_config_map(
            &identity,
            extra_config_map_name(&identity),
            namespace,
            env,
        )?;
        ctx.patcher.apply(&extra.config_map, enabled).await?;

        ctx.patcher
            .apply(
                &build_headless_service(&identity, namespace, service_ports(global), None),
                enabled,
            )
            .await?;
        ctx.patcher
            .apply(
                &build_client_service(
                    &identity,
                    client_service_name(&identity),
                    namespace,
                    service_ports(global),
                    pod.service.as_ref(),
                ),
                enabled,
            )
            .await?;
        ensure_pdb(ctx, &identity, pod, enabled).await?;
        let service_account = ensure_rbac(ctx, &identity, spec, enabled).await?;

        let (logs, logs_name) = provision_volume(
            ctx,
            global,
            ComponentKind::FunctionsWorker,
            &identity,
            &spec.logs_volume.clone().unwrap_or_default(),
            "logs",
            enabled,
        )
        .await?;
        let (claims, mut volumes) = split_volumes(vec![logs]);
        volumes.push(config_map_volume(CUSTOM_CONF_VOLUME, &config.name));
        let mut mounts = vec![
            volume_mount(&logs_name, LOGS_PATH),
            volume_mount(CUSTOM_CONF_VOLUME, CUSTOM_CONF_PATH),
        ];
        for (volume, mount) in tls_volume(global, ComponentKind::FunctionsWorker)
            .into_iter()
            .chain(token_auth_volumes(global))
        {
            volumes.push(volume);
            mounts.push(mount);
        }

        let mut ports = vec![container_port("http", WORKER_PORT)];
        if ComponentKind::FunctionsWorker.tls_entry(global).is_some() {
            ports.push(container_port("https", WORKER_TLS_PORT));
        }
        let container = build_container(ContainerInput {
            name: &identity.base_name,
            pod,
            script: format!(
                "cp {CUSTOM_CONF_PATH}/{CONFIG_FILE} conf/{CONFIG_FILE} && \
                 OPTS=\"${{OPTS}} {JAVA_OPTS}\" exec bin/pulsar functions-worker"
            ),
            ports,
            config_maps: vec![extra.name.clone()],
            volume_mounts: mounts,
            probe: Some(ProbeAction::Http {
                path: "/metrics".to_string(),
                port: WORKER_PORT,
            }),
        });
        let template = build_pod_template(PodInput {
            identity: &identity,
            pod,
            containers: vec![container],
            volumes,
            affinity: set_affinity(global, &identity, pod)?,
            config_checksums: BTreeMap::from([
                (config.name.clone(), config.checksum),
                (extra.name.clone(), extra.checksum),
            ]),
            restart_on_config_map_change: spec.restart_on_config_map_change(),
            service_account_name: service_account,
        });
        let statefulset = build_statefulset(
            &identity,
            namespace,
            pod,
            spec.replicas(),
            identity.name.clone(),
            template,
            claims,
        );
        ctx.patcher.apply(&statefulset, enabled).await?;

        report_readiness(ctx, ComponentKind::FunctionsWorker, &Self::workloads(normalized)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::cluster_api::testing::FakeClusterApi;
    use crate::controller::components::test_support::*;
    use crate::crd::{FunctionsWorkerFullSpec, FunctionsWorkerRbacConfig, PodTemplateConfig};

    fn functions_worker(namespaced: bool) -> FunctionsWorker {
        with_metadata(FunctionsWorker::new(
            "pulsar-function",
            FunctionsWorkerFullSpec {
                global: global(),
                functions_worker: Some(FunctionsWorkerSetSpec {
                    pod: PodTemplateConfig {
                        replicas: Some(2),
                        ..Default::default()
                    },
                    rbac: Some(FunctionsWorkerRbacConfig {
                        create: None,
                        namespaced: Some(namespaced),
                    }),
                    ..Default::default()
                }),
            },
        ))
    }

    #[test]
    fn test_split_config_routes_launcher_settings_to_env() {
        let (file, env) = split_config(BTreeMap::from([
            ("PULSAR_MEM".to_string(), json!("-Xmx1g")),
            ("numFunctionPackageReplicas".to_string(), json!(2)),
            ("ignored".to_string(), Value::Null),
        ]));
        assert_eq!(env.get("PULSAR_MEM").map(String::as_str), Some("-Xmx1g"));
        assert_eq!(file.get("numFunctionPackageReplicas"), Some(&json!(2)));
        assert!(!file.contains_key("ignored"));
    }

    #[tokio::test]
    async fn test_yaml_config_extra_env_and_namespaced_rbac() {
        let api = FakeClusterApi::default();
        let fw = functions_worker(true);
        let normalized = normalize(&fw);
        let ctx = context(&api, &fw, &normalized.global);

        assert!(fw.ensure_resources(&normalized, &ctx).await.unwrap().reschedule);

        let config = api.get("ConfigMap", Some(NAMESPACE), "pulsar-function").unwrap();
        let yaml = config.data["data"][CONFIG_FILE].as_str().unwrap();
        let parsed: BTreeMap<String, serde_yaml::Value> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            parsed["pulsarServiceUrl"],
            serde_yaml::Value::from("pulsar://pulsar-broker.pulsar-ns.svc.cluster.local:6650")
        );
        assert!(!parsed.contains_key("PULSAR_MEM"));

        let extra = api.get("ConfigMap", Some(NAMESPACE), "pulsar-function-extra").unwrap();
        assert_eq!(extra.data["data"]["PULSAR_MEM"], json!("-Xms2g -Xmx2g"));

        assert!(api.get("Service", Some(NAMESPACE), "pulsar-function-ca").is_some());
        assert!(api.get("ServiceAccount", Some(NAMESPACE), "pulsar-function").is_some());
        assert!(api.get("Role", Some(NAMESPACE), "pulsar-function").is_some());
        assert!(api.get("RoleBinding", Some(NAMESPACE), "pulsar-function").is_some());
        assert!(api.objects_of_kind("ClusterRole").is_empty());

        let sts = api.get("StatefulSet", Some(NAMESPACE), "pulsar-function").unwrap();
        assert_eq!(
            sts.data["spec"]["template"]["spec"]["serviceAccountName"],
            json!("pulsar-function")
        );

        mark_ready(&api, "StatefulSet", "pulsar-function");
        assert!(!fw.ensure_resources(&normalized, &ctx).await.unwrap().reschedule);
    }

    #[tokio::test]
    async fn test_cluster_scoped_rbac() {
        let api = FakeClusterApi::default();
        let fw = functions_worker(false);
        let normalized = normalize(&fw);
        let ctx = context(&api, &fw, &normalized.global);
        fw.ensure_resources(&normalized, &ctx).await.unwrap();

        assert!(api.get("Role", Some(NAMESPACE), "pulsar-function").is_none());
        let role = api.get("ClusterRole", None, "pulsar-ns-pulsar-function").unwrap();
        assert!(role.metadata.owner_references.is_none());
        assert!(api
            .get("ClusterRoleBinding", None, "pulsar-ns-pulsar-function")
            .is_some());
    }

    #[tokio::test]
    async fn test_zero_replicas_creates_nothing() {
        let api = FakeClusterApi::default();
        let fw = with_metadata(FunctionsWorker::new(
            "pulsar-function",
            FunctionsWorkerFullSpec {
                global: global(),
                functions_worker: None,
            },
        ));
        let normalized = normalize(&fw);
        let ctx = context(&api, &fw, &normalized.global);

        let result = fw.ensure_resources(&normalized, &ctx).await.unwrap();
        assert!(!result.reschedule);
        assert!(api.objects_of_kind("StatefulSet").is_empty());
        assert!(api.objects_of_kind("ServiceAccount").is_empty());
    }
}
