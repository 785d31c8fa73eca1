//! ZooKeeper reconciler
//!
//! The ensemble runs as a StatefulSet behind a headless service. Once every
//! member is ready, a one-shot job writes the cluster metadata the brokers
//! and bookies expect to find.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ServicePort;
use serde_json::{json, Value};

use super::{
    ensure_job, ensure_pdb, job_container, job_spec_checksum, provision_volume,
    render_config_map, set_affinity, set_identity, single_group, split_volumes, tls_volume,
    JAVA_OPTS,
};
use crate::controller::reconciler::{
    workloads_ready, ComponentReconciler, PassContext, ReconciliationResult, WorkloadRef,
};
use crate::controller::resources::{
    build_client_service, build_container, build_headless_service, build_job, build_pod_template,
    build_statefulset, container_port, service_port, volume_mount, ClusterEndpoints,
    ContainerInput, PodInput, ProbeAction, ResourceIdentity,
};
use crate::crd::defaults::NormalizedComponent;
use crate::crd::{ComponentKind, GlobalSpec, WorkloadSetSpec, ZooKeeper, ZooKeeperSetSpec};
use crate::error::Result;

pub const CLIENT_PORT: i32 = 2181;
pub const CLIENT_TLS_PORT: i32 = 2281;
const SERVER_PORT: i32 = 2888;
const LEADER_ELECTION_PORT: i32 = 3888;

const DATA_PATH: &str = "/pulsar/data";

pub fn metadata_job_name(identity: &ResourceIdentity) -> String {
    identity.suffixed("metadata")
}

/// Pod DNS names of the ensemble members
pub fn ensemble_servers(identity: &ResourceIdentity, namespace: &str, domain: &str, replicas: i32) -> String {
    (0..replicas)
        .map(|i| format!("{0}-{i}.{0}.{namespace}.svc.{domain}", identity.name))
        .collect::<Vec<_>>()
        .join(",")
}

fn zookeeper_config(global: &GlobalSpec) -> BTreeMap<String, Value> {
    let mut config = BTreeMap::from([
        ("dataDir".to_string(), json!(format!("{DATA_PATH}/zookeeper"))),
        ("clientPort".to_string(), json!(CLIENT_PORT)),
        ("autopurge.purgeInterval".to_string(), json!(1)),
        ("autopurge.snapRetainCount".to_string(), json!(3)),
    ]);
    if ComponentKind::ZooKeeper.tls_entry(global).is_some() {
        config.insert("secureClientPort".to_string(), json!(CLIENT_TLS_PORT));
        config.insert(
            "serverCnxnFactory".to_string(),
            json!("org.apache.zookeeper.server.NettyServerCnxnFactory"),
        );
    }
    config
}

fn client_ports(tls: bool) -> Vec<ServicePort> {
    let mut ports = vec![service_port("client", CLIENT_PORT)];
    if tls {
        ports.push(service_port("client-tls", CLIENT_TLS_PORT));
    }
    ports
}

fn metadata_script(global: &GlobalSpec, endpoints: &ClusterEndpoints) -> String {
    let tls = ComponentKind::Broker.tls_entry(global).is_some();
    let (web_flag, broker_flag) = if tls {
        ("--web-service-url-tls", "--broker-service-url-tls")
    } else {
        ("--web-service-url", "--broker-service-url")
    };
    format!(
        "bin/pulsar initialize-cluster-metadata --cluster {} --zookeeper {zk} \
         --configuration-store {zk} {web_flag} {} {broker_flag} {}",
        global.name, endpoints.broker_web_url, endpoints.broker_service_url,
        zk = endpoints.zookeeper_connect,
    )
}

#[async_trait]
impl ComponentReconciler for ZooKeeper {
    fn workloads(normalized: &NormalizedComponent<ZooKeeperSetSpec>) -> Vec<WorkloadRef> {
        let group = single_group(normalized);
        if !group.spec.is_enabled() {
            return Vec::new();
        }
        let identity = set_identity(&normalized.global, ComponentKind::ZooKeeper, &group);
        vec![
            WorkloadRef::stateful_set(&identity.name),
            WorkloadRef::job(metadata_job_name(&identity)),
        ]
    }

    async fn ensure_resources(
        &self,
        normalized: &NormalizedComponent<ZooKeeperSetSpec>,
        ctx: &PassContext<'_>,
    ) -> Result<ReconciliationResult> {
        let global = &normalized.global;
        let group = single_group(normalized);
        let spec = &group.spec;
        let pod = spec.pod();
        let enabled = spec.is_enabled();
        let identity = set_identity(global, ComponentKind::ZooKeeper, &group);
        let namespace = ctx.namespace();
        let tls = ComponentKind::ZooKeeper.tls_entry(global).is_some();

        let config = render_config_map(
            &identity,
            identity.name.clone(),
            namespace,
            zookeeper_config(global),
            spec.config(),
        )?;
        ctx.patcher.apply(&config.config_map, enabled).await?;

        let mut peer_ports = client_ports(tls);
        peer_ports.push(service_port("server", SERVER_PORT));
        peer_ports.push(service_port("leader-election", LEADER_ELECTION_PORT));
        ctx.patcher
            .apply(
                &build_headless_service(&identity, namespace, peer_ports, None),
                enabled,
            )
            .await?;
        ctx.patcher
            .apply(
                &build_client_service(
                    &identity,
                    identity.suffixed("ca"),
                    namespace,
                    client_ports(tls),
                    pod.service.as_ref(),
                ),
                enabled,
            )
            .await?;
        ensure_pdb(ctx, &identity, pod, enabled).await?;

        let data_volume = spec.data_volume.clone().unwrap_or_default();
        let (volume, volume_name) = provision_volume(
            ctx,
            global,
            ComponentKind::ZooKeeper,
            &identity,
            &data_volume,
            "data",
            enabled,
        )
        .await?;
        let (claims, mut volumes) = split_volumes(vec![volume]);
        let mut mounts = vec![volume_mount(&volume_name, DATA_PATH)];
        if let Some((volume, mount)) = tls_volume(global, ComponentKind::ZooKeeper) {
            volumes.push(volume);
            mounts.push(mount);
        }

        let servers = ensemble_servers(&identity, namespace, global.cluster_domain(), spec.replicas());
        let script = format!(
            "export ZOOKEEPER_SERVERS={servers} && \
             bin/apply-config-from-env.py conf/zookeeper.conf && \
             bin/generate-zookeeper-config.sh conf/zookeeper.conf && \
             OPTS=\"${{OPTS}} {JAVA_OPTS}\" exec bin/pulsar zookeeper"
        );
        let mut ports = vec![
            container_port("client", CLIENT_PORT),
            container_port("server", SERVER_PORT),
            container_port("leader-election", LEADER_ELECTION_PORT),
        ];
        if tls {
            ports.push(container_port("client-tls", CLIENT_TLS_PORT));
        }
        let container = build_container(ContainerInput {
            name: &identity.base_name,
            pod,
            script,
            ports,
            config_maps: vec![config.name.clone()],
            volume_mounts: mounts,
            probe: Some(ProbeAction::Exec(vec![
                "timeout".to_string(),
                "30".to_string(),
                "bin/pulsar-zookeeper-ruok.sh".to_string(),
            ])),
        });
        let template = build_pod_template(PodInput {
            identity: &identity,
            pod,
            containers: vec![container],
            volumes,
            affinity: set_affinity(global, &identity, pod)?,
            config_checksums: BTreeMap::from([(config.name.clone(), config.checksum.clone())]),
            restart_on_config_map_change: spec.restart_on_config_map_change(),
            service_account_name: None,
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

        let job_config = spec.metadata_initialization_job.clone().unwrap_or_default();
        let container = job_container(
            "metadata",
            pod,
            job_config.resources.clone(),
            metadata_script(global, &ctx.endpoints),
        );
        let checksum = job_spec_checksum(&container, job_config.timeout)?;
        let job = build_job(
            &identity,
            metadata_job_name(&identity),
            namespace,
            pod,
            container,
            job_config.timeout,
            &checksum,
        );

        if !enabled {
            ctx.patcher.replace_immutable(&job, false).await?;
            return Ok(ReconciliationResult::ready("ZooKeeper is disabled"));
        }

        if !workloads_ready(&ctx.patcher, &[WorkloadRef::stateful_set(&identity.name)]).await? {
            return Ok(ReconciliationResult::initializing(
                "Waiting for the ZooKeeper ensemble to become ready",
            ));
        }
        if !ensure_job(ctx, &job, &checksum).await? {
            return Ok(ReconciliationResult::initializing(
                "Waiting for the cluster metadata initialization",
            ));
        }
        Ok(ReconciliationResult::ready("ZooKeeper is ready"))
    }
}
