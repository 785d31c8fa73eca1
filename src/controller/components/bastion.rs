//! Bastion reconciler
//!
//! A pod with the admin tools configured against either the proxy or the
//! brokers.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    render_config_map, report_readiness, set_affinity, set_identity, single_group, tls_volume,
    CERTS_PATH, TOKEN_SUPERUSER_PATH, TOKEN_SUPERUSER_VOLUME,
};
use crate::controller::reconciler::{
    ComponentReconciler, PassContext, ReconciliationResult, WorkloadRef,
};
use crate::controller::resources::{
    build_container, build_deployment, build_pod_template, secret_volume, volume_mount,
    ClusterEndpoints, ContainerInput, PodInput,
};
use crate::crd::defaults::NormalizedComponent;
use crate::crd::{Bastion, BastionSetSpec, ComponentKind, GlobalSpec, WorkloadSetSpec};
use crate::error::Result;

/// Component the admin tools talk to
pub fn target_component(spec: &BastionSetSpec) -> ComponentKind {
    if spec.target_proxy.unwrap_or(false) {
        ComponentKind::Proxy
    } else {
        ComponentKind::Broker
    }
}

fn client_config(
    global: &GlobalSpec,
    spec: &BastionSetSpec,
    endpoints: &ClusterEndpoints,
) -> BTreeMap<String, Value> {
    let target = target_component(spec);
    let (service_url, web_url) = match target {
        ComponentKind::Proxy => (&endpoints.proxy_service_url, &endpoints.proxy_web_url),
        _ => (&endpoints.broker_service_url, &endpoints.broker_web_url),
    };
    let mut config = BTreeMap::from([
        ("webServiceUrl".to_string(), json!(web_url)),
        ("brokerServiceUrl".to_string(), json!(service_url)),
    ]);
    if target.tls_entry(global).is_some() {
        config.insert("tlsAllowInsecureConnection".to_string(), json!(false));
        config.insert("tlsEnableHostnameVerification".to_string(), json!(false));
        config.insert(
            "tlsTrustCertsFilePath".to_string(),
            json!(format!("{CERTS_PATH}/ca.crt")),
        );
    }
    if global.auth_enabled() {
        config.insert(
            "authPlugin".to_string(),
            json!("org.apache.pulsar.client.impl.auth.AuthenticationToken"),
        );
        config.insert(
            "authParams".to_string(),
            json!(format!("file://{TOKEN_SUPERUSER_PATH}/superuser.jwt")),
        );
    }
    config
}

#[async_trait]
impl ComponentReconciler for Bastion {
    fn workloads(normalized: &NormalizedComponent<BastionSetSpec>) -> Vec<WorkloadRef> {
        let group = single_group(normalized);
        if !group.spec.is_enabled() {
            return Vec::new();
        }
        vec![WorkloadRef::deployment(
            set_identity(&normalized.global, ComponentKind::Bastion, &group).name,
        )]
    }

    async fn ensure_resources(
        &self,
        normalized: &NormalizedComponent<BastionSetSpec>,
        ctx: &PassContext<'_>,
    ) -> Result<ReconciliationResult> {
        let global = &normalized.global;
        let group = single_group(normalized);
        let spec = &group.spec;
        let pod = spec.pod();
        let enabled = spec.is_enabled();
        let identity = set_identity(global, ComponentKind::Bastion, &group);
        let namespace = ctx.namespace();

        let config = render_config_map(
            &identity,
            identity.name.clone(),
            namespace,
            client_config(global, spec, &ctx.endpoints),
            spec.config(),
        )?;
        ctx.patcher.apply(&config.config_map, enabled).await?;

        let mut volumes = Vec::new();
        let mut mounts = Vec::new();
        if let Some((volume, mount)) = tls_volume(global, target_component(spec)) {
            volumes.push(volume);
            mounts.push(mount);
        }
        if global.auth_enabled() {
            volumes.push(secret_volume(TOKEN_SUPERUSER_VOLUME, "token-superuser"));
            mounts.push(volume_mount(TOKEN_SUPERUSER_VOLUME, TOKEN_SUPERUSER_PATH));
        }

        let container = build_container(ContainerInput {
            name: &identity.base_name,
            pod,
            script: "bin/apply-config-from-env.py conf/client.conf && \
                     exec /bin/bash -c \"trap : TERM INT; sleep infinity & wait\""
                .to_string(),
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

        report_readiness(ctx, ComponentKind::Bastion, &Self::workloads(normalized)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::cluster_api::testing::FakeClusterApi;
    use crate::controller::components::test_support::*;
    use crate::crd::BastionFullSpec;

    fn bastion(target_proxy: Option<bool>) -> Bastion {
        with_metadata(Bastion::new(
            "pulsar-bastion",
            BastionFullSpec {
                global: global(),
                bastion: Some(BastionSetSpec {
                    target_proxy,
                    ..Default::default()
                }),
            },
        ))
    }

    async fn web_service_url(target_proxy: Option<bool>) -> Value {
        let api = FakeClusterApi::default();
        let ba = bastion(target_proxy);
        let normalized = normalize(&ba);
        let ctx = context(&api, &ba, &normalized.global);
        ba.ensure_resources(&normalized, &ctx).await.unwrap();
        api.get("ConfigMap", Some(NAMESPACE), "pulsar-bastion").unwrap().data["data"]
            ["PULSAR_PREFIX_webServiceUrl"]
            .clone()
    }

    #[tokio::test]
    async fn test_target_selects_web_service_url() {
        assert_eq!(
            web_service_url(Some(true)).await,
            json!("http://pulsar-proxy.pulsar-ns.svc.cluster.local:8080")
        );
        assert_eq!(
            web_service_url(Some(false)).await,
            json!("http://pulsar-broker.pulsar-ns.svc.cluster.local:8080")
        );
        assert_eq!(
            web_service_url(None).await,
            json!("http://pulsar-broker.pulsar-ns.svc.cluster.local:8080")
        );
    }
}
