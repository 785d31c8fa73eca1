//! Proxy reconciler
//!
//! Stateless proxies in front of the brokers, one Deployment per resource
//! set. The web socket service runs as a second container of the same pod
//! with its own ConfigMap.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ServicePort;
use serde_json::{json, Value};

use super::{
    apply_config_script, ensure_pdb, render_config_map, report_readiness, set_affinity,
    set_identity, tls_file_config, tls_volume, token_auth_config, token_auth_volumes,
};
use crate::controller::reconciler::{
    ComponentReconciler, PassContext, ReconciliationResult, WorkloadRef,
};
use crate::controller::resources::{
    build_client_service, build_container, build_deployment, build_pod_template, container_port,
    service_port, ClusterEndpoints, ContainerInput, PodInput, ProbeAction, ResourceIdentity,
};
use crate::crd::defaults::NormalizedComponent;
use crate::crd::{
    ComponentKind, GlobalSpec, PodTemplateConfig, Proxy, ProxySetSpec, ResolvedSet,
    WorkloadSetSpec,
};
use crate::error::Result;

pub const SERVICE_PORT: i32 = 6650;
pub const SERVICE_TLS_PORT: i32 = 6651;
pub const WEB_PORT: i32 = 8080;
pub const WEB_TLS_PORT: i32 = 8443;
pub const WEB_SOCKET_PORT: i32 = 8000;

pub fn web_socket_config_map_name(identity: &ResourceIdentity) -> String {
    identity.suffixed("ws")
}

fn metadata_store(endpoints: &ClusterEndpoints) -> Value {
    json!(format!("zk:{}", endpoints.zookeeper_connect))
}

fn proxy_config(global: &GlobalSpec, endpoints: &ClusterEndpoints) -> BTreeMap<String, Value> {
    let mut config = BTreeMap::from([
        ("clusterName".to_string(), json!(global.name)),
        ("configurationMetadataStoreUrl".to_string(), metadata_store(endpoints)),
        ("servicePort".to_string(), json!(SERVICE_PORT)),
        ("webServicePort".to_string(), json!(WEB_PORT)),
    ]);
    if ComponentKind::Broker.tls_entry(global).is_some() {
        config.insert("brokerServiceURLTLS".to_string(), json!(endpoints.broker_service_url));
        config.insert("brokerWebServiceURLTLS".to_string(), json!(endpoints.broker_web_url));
        config.insert("tlsEnabledWithBroker".to_string(), json!(true));
    } else {
        config.insert("brokerServiceURL".to_string(), json!(endpoints.broker_service_url));
        config.insert("brokerWebServiceURL".to_string(), json!(endpoints.broker_web_url));
    }
    if ComponentKind::Proxy.tls_entry(global).is_some() {
        config.insert("servicePortTls".to_string(), json!(SERVICE_TLS_PORT));
        config.insert("webServicePortTls".to_string(), json!(WEB_TLS_PORT));
        config.extend(tls_file_config());
    }
    config.extend(token_auth_config(global));
    config
}

fn web_socket_config(global: &GlobalSpec, endpoints: &ClusterEndpoints) -> BTreeMap<String, Value> {
    let mut config = BTreeMap::from([
        ("clusterName".to_string(), json!(global.name)),
        ("configurationMetadataStoreUrl".to_string(), metadata_store(endpoints)),
        ("webServicePort".to_string(), json!(WEB_SOCKET_PORT)),
        ("serviceUrl".to_string(), json!(endpoints.broker_web_url)),
        ("brokerServiceUrl".to_string(), json!(endpoints.broker_service_url)),
        ("PULSAR_MEM".to_string(), json!("-Xms256m -Xmx256m")),
    ]);
    config.extend(token_auth_config(global));
    config
}

fn service_ports(global: &GlobalSpec, web_socket: bool) -> Vec<ServicePort> {
    let mut ports = vec![
        service_port("pulsar", SERVICE_PORT),
        service_port("http", WEB_PORT),
    ];
    if ComponentKind::Proxy.tls_entry(global).is_some() {
        ports.push(service_port("pulsarssl", SERVICE_TLS_PORT));
        ports.push(service_port("https", WEB_TLS_PORT));
    }
    if web_socket {
        ports.push(service_port("ws", WEB_SOCKET_PORT));
    }
    ports
}

async fn ensure_set(
    global: &GlobalSpec,
    set: &ResolvedSet<ProxySetSpec>,
    ctx: &PassContext<'_>,
) -> Result<()> {
    let spec = &set.spec;
    let pod = spec.pod();
    let enabled = spec.is_enabled();
    let web_socket = spec.web_socket_enabled();
    let identity = set_identity(global, ComponentKind::Proxy, set);
    let namespace = ctx.namespace();
    let tls = ComponentKind::Proxy.tls_entry(global).is_some();

    let config = render_config_map(
        &identity,
        identity.name.clone(),
        namespace,
        proxy_config(global, &ctx.endpoints),
        spec.config(),
    )?;
    ctx.patcher.apply(&config.config_map, enabled).await?;

    let ws_config = render_config_map(
        &identity,
        web_socket_config_map_name(&identity),
        namespace,
        web_socket_config(global, &ctx.endpoints),
        BTreeMap::new(),
    )?;
    ctx.patcher
        .apply(&ws_config.config_map, enabled && web_socket)
        .await?;

    ctx.patcher
        .apply(
            &build_client_service(
                &identity,
                identity.name.clone(),
                namespace,
                service_ports(global, web_socket),
                pod.service.as_ref(),
            ),
            enabled,
        )
        .await?;
    ensure_pdb(ctx, &identity, pod, enabled).await?;

    let mut volumes = Vec::new();
    let mut mounts = Vec::new();
    for (volume, mount) in tls_volume(global, ComponentKind::Proxy)
        .into_iter()
        .chain(token_auth_volumes(global))
    {
        volumes.push(volume);
        mounts.push(mount);
    }

    let mut ports = vec![
        container_port("pulsar", SERVICE_PORT),
        container_port("http", WEB_PORT),
    ];
    if tls {
        ports.push(container_port("pulsarssl", SERVICE_TLS_PORT));
        ports.push(container_port("https", WEB_TLS_PORT));
    }
    let mut containers = vec![build_container(ContainerInput {
        name: &identity.base_name,
        pod,
        script: apply_config_script("conf/proxy.conf", "bin/pulsar proxy"),
        ports,
        config_maps: vec![config.name.clone()],
        volume_mounts: mounts.clone(),
        probe: Some(ProbeAction::Http {
            path: "/metrics/".to_string(),
            port: WEB_PORT,
        }),
    })];

    let mut checksums = BTreeMap::from([(config.name.clone(), config.checksum)]);
    if web_socket {
        let ws_pod = PodTemplateConfig {
            resources: spec.web_socket.as_ref().and_then(|w| w.resources.clone()),
            env: None,
            ..pod.clone()
        };
        containers.push(build_container(ContainerInput {
            name: "ws",
            pod: &ws_pod,
            script: apply_config_script("conf/websocket.conf", "bin/pulsar websocket"),
            ports: vec![container_port("ws", WEB_SOCKET_PORT)],
            config_maps: vec![ws_config.name.clone()],
            volume_mounts: mounts,
            probe: Some(ProbeAction::Tcp(WEB_SOCKET_PORT)),
        }));
        checksums.insert(ws_config.name.clone(), ws_config.checksum);
    }

    let template = build_pod_template(PodInput {
        identity: &identity,
        pod,
        containers,
        volumes,
        affinity: set_affinity(global, &identity, pod)?,
        config_checksums: checksums,
        restart_on_config_map_change: spec.restart_on_config_map_change(),
        service_account_name: None,
    });
    let deployment = build_deployment(&identity, namespace, pod, spec.replicas(), template);
    ctx.patcher.apply(&deployment, enabled).await?;
    Ok(())
}

#[async_trait]
impl ComponentReconciler for Proxy {
    fn workloads(normalized: &NormalizedComponent<ProxySetSpec>) -> Vec<WorkloadRef> {
        normalized
            .sets
            .iter()
            .filter(|set| set.spec.is_enabled())
            .map(|set| {
                WorkloadRef::deployment(
                    set_identity(&normalized.global, ComponentKind::Proxy, set).name,
                )
            })
            .collect()
    }

    async fn ensure_resources(
        &self,
        normalized: &NormalizedComponent<ProxySetSpec>,
        ctx: &PassContext<'_>,
    ) -> Result<ReconciliationResult> {
        let global = &normalized.global;
        for set in &normalized.sets {
            ensure_set(global, set, ctx).await?;
        }

        if normalized.sets.iter().any(|s| s.name.is_some()) {
            let shared = ResourceIdentity::new(global, ComponentKind::Proxy, None, None);
            ctx.patcher
                .apply(
                    &build_client_service(
                        &shared,
                        shared.name.clone(),
                        ctx.namespace(),
                        service_ports(global, normalized.base.web_socket_enabled()),
                        normalized.base.pod().service.as_ref(),
                    ),
                    normalized.any_enabled(),
                )
                .await?;
        }

        report_readiness(ctx, ComponentKind::Proxy, &Self::workloads(normalized)).await
    }
}
