//! Broker reconciler
//!
//! One StatefulSet per resource set. With transactions enabled, the
//! transaction coordinator metadata is initialized once the brokers are up.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ContainerPort, ServicePort};
use serde_json::{json, Value};

use super::{
    apply_config_script, ensure_job, ensure_pdb, job_container, job_spec_checksum,
    render_config_map, report_readiness, set_affinity, set_identity, tls_file_config,
    tls_volume, token_auth_config, token_auth_volumes,
};
use crate::controller::reconciler::{
    workloads_ready, ComponentReconciler, PassContext, ReconciliationResult, WorkloadRef,
};
use crate::controller::resources::{
    build_client_service, build_container, build_headless_service, build_job, build_pod_template,
    build_statefulset, container_port, service_port, ClusterEndpoints, ContainerInput, PodInput,
    ProbeAction, ResourceIdentity,
};
use crate::crd::defaults::NormalizedComponent;
use crate::crd::{Broker, BrokerSetSpec, ComponentKind, GlobalSpec, ResolvedSet, WorkloadSetSpec};
use crate::error::Result;

pub const SERVICE_PORT: i32 = 6650;
pub const SERVICE_TLS_PORT: i32 = 6651;
pub const WEB_PORT: i32 = 8080;
pub const WEB_TLS_PORT: i32 = 8443;

/// Service selecting the brokers of every set
pub fn component_identity(global: &GlobalSpec) -> ResourceIdentity {
    ResourceIdentity::new(global, ComponentKind::Broker, None, None)
}

pub fn txn_init_job_name(global: &GlobalSpec) -> String {
    component_identity(global).suffixed("txn-init")
}

fn broker_config(
    global: &GlobalSpec,
    spec: &BrokerSetSpec,
    endpoints: &ClusterEndpoints,
) -> BTreeMap<String, Value> {
    let zookeeper = &endpoints.zookeeper_connect;
    let mut config = BTreeMap::from([
        ("clusterName".to_string(), json!(global.name)),
        ("zookeeperServers".to_string(), json!(zookeeper)),
        ("configurationStoreServers".to_string(), json!(zookeeper)),
        ("metadataStoreUrl".to_string(), json!(format!("zk:{zookeeper}"))),
        (
            "configurationMetadataStoreUrl".to_string(),
            json!(format!("zk:{zookeeper}")),
        ),
        ("brokerServicePort".to_string(), json!(SERVICE_PORT)),
        ("webServicePort".to_string(), json!(WEB_PORT)),
        ("functionsWorkerEnabled".to_string(), json!(false)),
    ]);
    if ComponentKind::Broker.tls_entry(global).is_some() {
        config.insert("brokerServicePortTls".to_string(), json!(SERVICE_TLS_PORT));
        config.insert("webServicePortTls".to_string(), json!(WEB_TLS_PORT));
        config.insert("brokerClientTlsEnabled".to_string(), json!(true));
        config.extend(tls_file_config());
    }
    if spec.transactions_enabled() {
        config.insert("transactionCoordinatorEnabled".to_string(), json!(true));
    }
    config.extend(token_auth_config(global));
    config
}

fn ports(tls: bool) -> (Vec<ContainerPort>, Vec<ServicePort>) {
    let mut named = vec![("pulsar", SERVICE_PORT), ("http", WEB_PORT)];
    if tls {
        named.push(("pulsarssl", SERVICE_TLS_PORT));
        named.push(("https", WEB_TLS_PORT));
    }
    (
        named.iter().map(|(n, p)| container_port(n, *p)).collect(),
        named.iter().map(|(n, p)| service_port(n, *p)).collect(),
    )
}

async fn ensure_set(
    global: &GlobalSpec,
    set: &ResolvedSet<BrokerSetSpec>,
    ctx: &PassContext<'_>,
) -> Result<()> {
    let spec = &set.spec;
    let pod = spec.pod();
    let enabled = spec.is_enabled();
    let identity = set_identity(global, ComponentKind::Broker, set);
    let namespace = ctx.namespace();
    let (container_ports, service_ports) = ports(ComponentKind::Broker.tls_entry(global).is_some());

    let config = render_config_map(
        &identity,
        identity.name.clone(),
        namespace,
        broker_config(global, spec, &ctx.endpoints),
        spec.config(),
    )?;
    ctx.patcher.apply(&config.config_map, enabled).await?;

    ctx.patcher
        .apply(
            &build_headless_service(&identity, namespace, service_ports, pod.service.as_ref()),
            enabled,
        )
        .await?;
    ensure_pdb(ctx, &identity, pod, enabled).await?;

    let mut volumes = Vec::new();
    let mut mounts = Vec::new();
    for (volume, mount) in tls_volume(global, ComponentKind::Broker)
        .into_iter()
        .chain(token_auth_volumes(global))
    {
        volumes.push(volume);
        mounts.push(mount);
    }

    let container = build_container(ContainerInput {
        name: &identity.base_name,
        pod,
        script: apply_config_script("conf/broker.conf", "bin/pulsar broker"),
        ports: container_ports,
        config_maps: vec![config.name.clone()],
        volume_mounts: mounts,
        probe: Some(ProbeAction::Http {
            path: "/status.html".to_string(),
            port: WEB_PORT,
        }),
    });
    let template = build_pod_template(PodInput {
        identity: &identity,
        pod,
        containers: vec![container],
        volumes,
        affinity: set_affinity(global, &identity, pod)?,
        config_checksums: BTreeMap::from([(config.name.clone(), config.checksum)]),
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
        Vec::new(),
    );
    ctx.patcher.apply(&statefulset, enabled).await?;
    Ok(())
}

fn statefulsets(normalized: &NormalizedComponent<BrokerSetSpec>) -> Vec<WorkloadRef> {
    normalized
        .sets
        .iter()
        .filter(|set| set.spec.is_enabled())
        .map(|set| {
            WorkloadRef::stateful_set(set_identity(&normalized.global, ComponentKind::Broker, set).name)
        })
        .collect()
}

fn transactions_enabled(normalized: &NormalizedComponent<BrokerSetSpec>) -> bool {
    normalized.any_enabled() && normalized.base.transactions_enabled()
}

#[async_trait]
impl ComponentReconciler for Broker {
    fn workloads(normalized: &NormalizedComponent<BrokerSetSpec>) -> Vec<WorkloadRef> {
        let mut workloads = statefulsets(normalized);
        if transactions_enabled(normalized) {
            workloads.push(WorkloadRef::job(txn_init_job_name(&normalized.global)));
        }
        workloads
    }

    async fn ensure_resources(
        &self,
        normalized: &NormalizedComponent<BrokerSetSpec>,
        ctx: &PassContext<'_>,
    ) -> Result<ReconciliationResult> {
        let global = &normalized.global;
        for set in &normalized.sets {
            ensure_set(global, set, ctx).await?;
        }

        // Named sets each get their own service; clients use the shared one
        let shared = component_identity(global);
        if normalized.sets.iter().any(|s| s.name.is_some()) {
            let (_, service_ports) = ports(ComponentKind::Broker.tls_entry(global).is_some());
            ctx.patcher
                .apply(
                    &build_client_service(
                        &shared,
                        shared.name.clone(),
                        ctx.namespace(),
                        service_ports,
                        normalized.base.pod().service.as_ref(),
                    ),
                    normalized.any_enabled(),
                )
                .await?;
        }

        let transactions = normalized.base.transactions.clone().unwrap_or_default();
        let init_job = transactions.init_job.clone().unwrap_or_default();
        let script = format!(
            "bin/pulsar initialize-transaction-coordinator-metadata --cluster {} \
             --configuration-store {} --initial-num-transaction-coordinators {}",
            global.name,
            ctx.endpoints.zookeeper_connect,
            transactions.partitions.unwrap_or(16)
        );
        let container = job_container("txn-init", normalized.base.pod(), init_job.resources, script);
        let checksum = job_spec_checksum(&container, init_job.timeout)?;
        let job = build_job(
            &shared,
            txn_init_job_name(global),
            ctx.namespace(),
            normalized.base.pod(),
            container,
            init_job.timeout,
            &checksum,
        );

        if !transactions_enabled(normalized) {
            ctx.patcher.replace_immutable(&job, false).await?;
            return report_readiness(ctx, ComponentKind::Broker, &statefulsets(normalized)).await;
        }

        if !workloads_ready(&ctx.patcher, &statefulsets(normalized)).await? {
            return Ok(ReconciliationResult::initializing(
                "Waiting for the brokers to become ready",
            ));
        }
        if !ensure_job(ctx, &job, &checksum).await? {
            return Ok(ReconciliationResult::initializing(
                "Waiting for the transaction coordinator initialization",
            ));
        }
        Ok(ReconciliationResult::ready("Broker is ready"))
    }
}
