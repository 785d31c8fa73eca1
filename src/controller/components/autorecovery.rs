//! Autorecovery reconciler

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    apply_config_script, render_config_map, report_readiness, set_affinity, set_identity,
    single_group, tls_volume,
};
use crate::controller::reconciler::{
    ComponentReconciler, PassContext, ReconciliationResult, WorkloadRef,
};
use crate::controller::resources::{
    build_container, build_deployment, build_pod_template, ClusterEndpoints, ContainerInput,
    PodInput,
};
use crate::crd::defaults::NormalizedComponent;
use crate::crd::{Autorecovery, AutorecoverySetSpec, ComponentKind, WorkloadSetSpec};
use crate::error::Result;

fn autorecovery_config(endpoints: &ClusterEndpoints) -> BTreeMap<String, Value> {
    BTreeMap::from([
        ("zkServers".to_string(), json!(endpoints.zookeeper_connect)),
        ("metadataServiceUri".to_string(), json!(endpoints.bookkeeper_metadata_uri)),
        ("httpServerEnabled".to_string(), json!(false)),
    ])
}

#[async_trait]
impl ComponentReconciler for Autorecovery {
    fn workloads(normalized: &NormalizedComponent<AutorecoverySetSpec>) -> Vec<WorkloadRef> {
        let group = single_group(normalized);
        if !group.spec.is_enabled() {
            return Vec::new();
        }
        vec![WorkloadRef::deployment(
            set_identity(&normalized.global, ComponentKind::Autorecovery, &group).name,
        )]
    }

    async fn ensure_resources(
        &self,
        normalized: &NormalizedComponent<AutorecoverySetSpec>,
        ctx: &PassContext<'_>,
    ) -> Result<ReconciliationResult> {
        let global = &normalized.global;
        let group = single_group(normalized);
        let spec = &group.spec;
        let pod = spec.pod();
        let enabled = spec.is_enabled();
        let identity = set_identity(global, ComponentKind::Autorecovery, &group);
        let namespace = ctx.namespace();

        let config = render_config_map(
            &identity,
            identity.name.clone(),
            namespace,
            autorecovery_config(&ctx.endpoints),
            spec.config(),
        )?;
        ctx.patcher.apply(&config.config_map, enabled).await?;

        let (volumes, mounts) = tls_volume(global, ComponentKind::Autorecovery)
            .map(|(v, m)| (vec![v], vec![m]))
            .unwrap_or_default();
        let container = build_container(ContainerInput {
            name: &identity.base_name,
            pod,
            script: apply_config_script("conf/bookkeeper.conf", "bin/bookkeeper autorecovery"),
            ports: Vec::new(),
            config_maps: vec![config.name.clone()],
            volume_mounts: mounts,
            probe: None,
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
        ctx.patcher
            .apply(
                &build_deployment(&identity, namespace, pod, spec.replicas(), template),
                enabled,
            )
            .await?;

        report_readiness(ctx, ComponentKind::Autorecovery, &Self::workloads(normalized)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::cluster_api::testing::FakeClusterApi;
    use crate::controller::components::test_support::*;
    use crate::crd::AutorecoveryFullSpec;

    #[tokio::test]
    async fn test_deployment_with_bookkeeper_settings() {
        let api = FakeClusterApi::default();
        let ar = with_metadata(Autorecovery::new(
            "pulsar-autorecovery",
            AutorecoveryFullSpec {
                global: global(),
                autorecovery: None,
            },
        ));
        let normalized = normalize(&ar);
        let ctx = context(&api, &ar, &normalized.global);

        assert!(ar.ensure_resources(&normalized, &ctx).await.unwrap().reschedule);
        let config = api.get("ConfigMap", Some(NAMESPACE), "pulsar-autorecovery").unwrap();
        assert_eq!(
            config.data["data"]["PULSAR_PREFIX_metadataServiceUri"],
            json!("zk+hierarchical://pulsar-zookeeper-ca.pulsar-ns.svc.cluster.local:2181/ledgers")
        );
        assert_eq!(config.data["data"]["BOOKIE_MEM"], json!("-Xms512m -Xmx512m"));
        assert!(api.objects_of_kind("PodDisruptionBudget").is_empty());

        mark_ready(&api, "Deployment", "pulsar-autorecovery");
        assert!(!ar.ensure_resources(&normalized, &ctx).await.unwrap().reschedule);
    }
}
