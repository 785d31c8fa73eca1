//! BookKeeper reconciler
//!
//! One StatefulSet per resource set, each with a journal and a ledgers
//! volume.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    apply_config_script, ensure_pdb, provision_volume, render_config_map, report_readiness,
    set_affinity, set_identity, split_volumes, tls_volume, CERTS_PATH,
};
use crate::controller::reconciler::{
    ComponentReconciler, PassContext, ReconciliationResult, WorkloadRef,
};
use crate::controller::resources::{
    build_container, build_headless_service, build_pod_template, build_statefulset,
    container_port, service_port, volume_mount, ClusterEndpoints, ContainerInput, PodInput,
    ProbeAction,
};
use crate::crd::defaults::NormalizedComponent;
use crate::crd::{
    BookKeeper, BookKeeperSetSpec, ComponentKind, GlobalSpec, ResolvedSet, WorkloadSetSpec,
};
use crate::error::Result;

pub const BOOKIE_PORT: i32 = 3181;
pub const HTTP_PORT: i32 = 8000;

const JOURNAL_PATH: &str = "/pulsar/data/bookkeeper/journal";
const LEDGERS_PATH: &str = "/pulsar/data/bookkeeper/ledgers";

fn bookie_config(global: &GlobalSpec, endpoints: &ClusterEndpoints) -> BTreeMap<String, Value> {
    let mut config = BTreeMap::from([
        ("zkServers".to_string(), json!(endpoints.zookeeper_connect)),
        ("metadataServiceUri".to_string(), json!(endpoints.bookkeeper_metadata_uri)),
        ("bookiePort".to_string(), json!(BOOKIE_PORT)),
        ("httpServerEnabled".to_string(), json!(true)),
        ("httpServerPort".to_string(), json!(HTTP_PORT)),
        (
            "statsProviderClass".to_string(),
            json!("org.apache.bookkeeper.stats.prometheus.PrometheusMetricsProvider"),
        ),
    ]);
    if ComponentKind::BookKeeper.tls_entry(global).is_some() {
        config.extend([
            ("tlsProvider".to_string(), json!("OpenSSL")),
            (
                "tlsProviderFactoryClass".to_string(),
                json!("org.apache.bookkeeper.tls.TLSContextFactory"),
            ),
            ("tlsCertificatePath".to_string(), json!(format!("{CERTS_PATH}/tls.crt"))),
            ("tlsKeyStoreType".to_string(), json!("PEM")),
            ("tlsKeyStore".to_string(), json!(format!("{CERTS_PATH}/tls.key"))),
            ("tlsTrustStoreType".to_string(), json!("PEM")),
            ("tlsTrustStore".to_string(), json!(format!("{CERTS_PATH}/ca.crt"))),
        ]);
    }
    config
}

async fn ensure_set(
    global: &GlobalSpec,
    set: &ResolvedSet<BookKeeperSetSpec>,
    ctx: &PassContext<'_>,
) -> Result<()> {
    let spec = &set.spec;
    let pod = spec.pod();
    let enabled = spec.is_enabled();
    let identity = set_identity(global, ComponentKind::BookKeeper, set);
    let namespace = ctx.namespace();

    let config = render_config_map(
        &identity,
        identity.name.clone(),
        namespace,
        bookie_config(global, &ctx.endpoints),
        spec.config(),
    )?;
    ctx.patcher.apply(&config.config_map, enabled).await?;

    ctx.patcher
        .apply(
            &build_headless_service(
                &identity,
                namespace,
                vec![
                    service_port("bookie", BOOKIE_PORT),
                    service_port("http", HTTP_PORT),
                ],
                pod.service.as_ref(),
            ),
            enabled,
        )
        .await?;
    ensure_pdb(ctx, &identity, pod, enabled).await?;

    let volumes_config = spec.volumes.clone().unwrap_or_default();
    let (journal, journal_name) = provision_volume(
        ctx,
        global,
        ComponentKind::BookKeeper,
        &identity,
        &volumes_config.journal.unwrap_or_default(),
        "journal",
        enabled,
    )
    .await?;
    let (ledgers, ledgers_name) = provision_volume(
        ctx,
        global,
        ComponentKind::BookKeeper,
        &identity,
        &volumes_config.ledgers.unwrap_or_default(),
        "ledgers",
        enabled,
    )
    .await?;
    let (claims, mut volumes) = split_volumes(vec![journal, ledgers]);
    let mut mounts = vec![
        volume_mount(&journal_name, JOURNAL_PATH),
        volume_mount(&ledgers_name, LEDGERS_PATH),
    ];
    if let Some((volume, mount)) = tls_volume(global, ComponentKind::BookKeeper) {
        volumes.push(volume);
        mounts.push(mount);
    }

    let container = build_container(ContainerInput {
        name: &identity.base_name,
        pod,
        script: apply_config_script("conf/bookkeeper.conf", "bin/pulsar bookie"),
        ports: vec![
            container_port("bookie", BOOKIE_PORT),
            container_port("http", HTTP_PORT),
        ],
        config_maps: vec![config.name.clone()],
        volume_mounts: mounts,
        probe: Some(ProbeAction::Http {
            path: "/api/v1/bookie/is_ready".to_string(),
            port: HTTP_PORT,
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
        claims,
    );
    ctx.patcher.apply(&statefulset, enabled).await?;
    Ok(())
}

#[async_trait]
impl ComponentReconciler for BookKeeper {
    fn workloads(normalized: &NormalizedComponent<BookKeeperSetSpec>) -> Vec<WorkloadRef> {
        normalized
            .sets
            .iter()
            .filter(|set| set.spec.is_enabled())
            .map(|set| {
                WorkloadRef::stateful_set(
                    set_identity(&normalized.global, ComponentKind::BookKeeper, set).name,
                )
            })
            .collect()
    }

    async fn ensure_resources(
        &self,
        normalized: &NormalizedComponent<BookKeeperSetSpec>,
        ctx: &PassContext<'_>,
    ) -> Result<ReconciliationResult> {
        for set in &normalized.sets {
            ensure_set(&normalized.global, set, ctx).await?;
        }
        report_readiness(ctx, ComponentKind::BookKeeper, &Self::workloads(normalized)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::cluster_api::testing::FakeClusterApi;
    use crate::controller::components::test_support::*;
    use crate::crd::{
        BookKeeperFullSpec, GlobalStorageConfig, PodTemplateConfig, ResourceSetConfig, SetsSpec,
        StorageClassConfig,
    };

    fn bookkeeper(global: GlobalSpec, sets: Option<BTreeMap<String, BookKeeperSetSpec>>) -> BookKeeper {
        with_metadata(BookKeeper::new(
            "pulsar-bookkeeper",
            BookKeeperFullSpec {
                global,
                bookkeeper: Some(SetsSpec {
                    base: BookKeeperSetSpec::default(),
                    sets,
                }),
            },
        ))
    }

    #[tokio::test]
    async fn test_one_statefulset_per_set() {
        let api = FakeClusterApi::default();
        let mut global = global();
        global.resource_sets = Some(BTreeMap::from([
            ("a".to_string(), ResourceSetConfig { rack: None }),
            ("b".to_string(), ResourceSetConfig { rack: None }),
        ]));
        let bk = bookkeeper(
            global,
            Some(BTreeMap::from([
                ("a".to_string(), BookKeeperSetSpec::default()),
                (
                    "b".to_string(),
                    BookKeeperSetSpec {
                        pod: PodTemplateConfig {
                            replicas: Some(5),
                            ..Default::default()
                        },
                        ..Default::default()
                    },
                ),
            ])),
        );
        let normalized = normalize(&bk);
        let ctx = context(&api, &bk, &normalized.global);

        let result = bk.ensure_resources(&normalized, &ctx).await.unwrap();
        assert!(result.reschedule);

        let a = api.get("StatefulSet", Some(NAMESPACE), "pulsar-bookkeeper-a").unwrap();
        let b = api.get("StatefulSet", Some(NAMESPACE), "pulsar-bookkeeper-b").unwrap();
        assert_eq!(a.data["spec"]["replicas"], json!(3));
        assert_eq!(b.data["spec"]["replicas"], json!(5));
        assert_eq!(
            b.data["spec"]["selector"]["matchLabels"]["resource-set"],
            json!("b")
        );

        let config = api.get("ConfigMap", Some(NAMESPACE), "pulsar-bookkeeper-a").unwrap();
        assert_eq!(
            config.data["data"]["PULSAR_PREFIX_zkServers"],
            json!("pulsar-zookeeper-ca.pulsar-ns.svc.cluster.local:2181")
        );
        assert_eq!(config.data["data"]["BOOKIE_MEM"], json!("-Xms1g -Xmx1g"));

        mark_ready(&api, "StatefulSet", "pulsar-bookkeeper-a");
        assert!(bk.ensure_resources(&normalized, &ctx).await.unwrap().reschedule);
        mark_ready(&api, "StatefulSet", "pulsar-bookkeeper-b");
        assert!(!bk.ensure_resources(&normalized, &ctx).await.unwrap().reschedule);
    }

    #[tokio::test]
    async fn test_storage_class_template_is_synthesized() {
        let api = FakeClusterApi::default();
        let mut global = global();
        global.storage = Some(GlobalStorageConfig {
            existing_storage_class_name: None,
            storage_class: Some(StorageClassConfig {
                provisioner: Some("kubernetes.io/aws-ebs".to_string()),
                type_: Some("gp3".to_string()),
                ..Default::default()
            }),
        });
        let bk = bookkeeper(global, None);
        let normalized = normalize(&bk);
        let ctx = context(&api, &bk, &normalized.global);
        bk.ensure_resources(&normalized, &ctx).await.unwrap();

        let journal = api.get("StorageClass", None, "pulsar-bookkeeper-journal").unwrap();
        assert!(journal.metadata.owner_references.is_none());
        assert!(api.get("StorageClass", None, "pulsar-bookkeeper-ledgers").is_some());

        let sts = api.get("StatefulSet", Some(NAMESPACE), "pulsar-bookkeeper").unwrap();
        let claims = sts.data["spec"]["volumeClaimTemplates"].as_array().unwrap();
        assert_eq!(claims.len(), 2);
        assert_eq!(
            claims[0]["spec"]["storageClassName"],
            json!("pulsar-bookkeeper-journal")
        );
    }

    #[tokio::test]
    async fn test_persistence_off_uses_empty_dir() {
        let api = FakeClusterApi::default();
        let mut global = global();
        global.persistence = Some(false);
        let bk = bookkeeper(global, None);
        let normalized = normalize(&bk);
        let ctx = context(&api, &bk, &normalized.global);
        bk.ensure_resources(&normalized, &ctx).await.unwrap();

        let sts = api.get("StatefulSet", Some(NAMESPACE), "pulsar-bookkeeper").unwrap();
        assert!(sts.data["spec"].get("volumeClaimTemplates").is_none());
        let volumes = sts.data["spec"]["template"]["spec"]["volumes"].as_array().unwrap();
        assert!(volumes.iter().all(|v| v.get("emptyDir").is_some()));
    }
}
