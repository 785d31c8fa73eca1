//! Unit tests for the Kubernetes resource builders

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::{json, Value};

    use crate::controller::resources::*;
    use crate::crd::{
        ComponentBaseNames, ComponentKind, GlobalSpec, GlobalStorageConfig, PodTemplateConfig,
        ProbeConfig, ResourceSetConfig, StorageClassConfig, TlsConfig, VolumeConfig,
    };

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn global() -> GlobalSpec {
        GlobalSpec {
            name: "pulsar".to_string(),
            ..Default::default()
        }
    }

    fn pod_template(identity: &ResourceIdentity, restart: bool) -> k8s_openapi::api::core::v1::PodTemplateSpec {
        let pod = PodTemplateConfig::default();
        build_pod_template(PodInput {
            identity,
            pod: &pod,
            containers: vec![build_container(ContainerInput {
                name: "broker",
                pod: &pod,
                script: "exec bin/pulsar broker".to_string(),
                ports: vec![container_port("http", 8080)],
                config_maps: vec!["pulsar-broker".to_string()],
                volume_mounts: Vec::new(),
                probe: None,
            })],
            volumes: Vec::new(),
            affinity: None,
            config_checksums: BTreeMap::from([("pulsar-broker".to_string(), "abc".to_string())]),
            restart_on_config_map_change: restart,
            service_account_name: None,
        })
    }

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------

    #[test]
    fn test_config_prefix_round_trip() {
        let config = BTreeMap::from([
            ("managedLedgerDefaultEnsembleSize".to_string(), json!(2)),
            ("brokerDeleteInactiveTopicsEnabled".to_string(), json!(false)),
            ("clusterName".to_string(), json!("pulsar")),
            ("PULSAR_MEM".to_string(), json!("-Xmx1g")),
            ("BOOKIE_MEM".to_string(), json!("-Xmx2g")),
        ]);

        let data = to_config_map_data(&config);
        assert_eq!(data["PULSAR_PREFIX_managedLedgerDefaultEnsembleSize"], "2");
        assert_eq!(data["PULSAR_PREFIX_brokerDeleteInactiveTopicsEnabled"], "false");
        assert_eq!(data["PULSAR_PREFIX_clusterName"], "pulsar");
        assert_eq!(data["PULSAR_MEM"], "-Xmx1g");
        assert_eq!(data["BOOKIE_MEM"], "-Xmx2g");

        let stripped = strip_config_prefix(&data);
        let expected: BTreeMap<String, String> = config
            .iter()
            .map(|(k, v)| (k.clone(), config_value_string(v)))
            .collect();
        assert_eq!(stripped, expected);
    }

    #[test]
    fn test_null_config_values_are_dropped() {
        let data = to_config_map_data(&BTreeMap::from([("unset".to_string(), Value::Null)]));
        assert!(data.is_empty());
    }

    #[test]
    fn test_config_checksum_depends_only_on_data() {
        let a = BTreeMap::from([("k".to_string(), "v".to_string())]);
        let b = BTreeMap::from([("k".to_string(), "w".to_string())]);
        assert_eq!(config_checksum(&a).unwrap(), config_checksum(&a.clone()).unwrap());
        assert_ne!(config_checksum(&a).unwrap(), config_checksum(&b).unwrap());
        assert_eq!(config_checksum(&a).unwrap().len(), 64);
    }

    #[test]
    fn test_checksum_annotation_only_when_restart_requested() {
        let identity = ResourceIdentity::new(&global(), ComponentKind::Broker, None, None);

        let template = pod_template(&identity, true);
        let annotations = template.metadata.unwrap().annotations.unwrap();
        assert_eq!(
            annotations.get("pulsar.k8s.io/configmap-pulsar-broker"),
            Some(&"abc".to_string())
        );

        let template = pod_template(&identity, false);
        assert!(template.metadata.unwrap().annotations.is_none());
    }

    #[test]
    fn test_sidecars_follow_main_container() {
        let identity = ResourceIdentity::new(&global(), ComponentKind::Proxy, None, None);
        let pod = PodTemplateConfig {
            sidecars: Some(vec![k8s_openapi::api::core::v1::Container {
                name: "log-shipper".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        };
        let template = build_pod_template(PodInput {
            identity: &identity,
            pod: &pod,
            containers: vec![k8s_openapi::api::core::v1::Container {
                name: "proxy".to_string(),
                ..Default::default()
            }],
            volumes: Vec::new(),
            affinity: None,
            config_checksums: BTreeMap::new(),
            restart_on_config_map_change: true,
            service_account_name: None,
        });

        let names: Vec<_> = template
            .spec
            .unwrap()
            .containers
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["proxy", "log-shipper"]);
    }

    // -----------------------------------------------------------------------
    // Naming and labels
    // -----------------------------------------------------------------------

    #[test]
    fn test_identity_names_and_selector_without_rack() {
        let mut global = global();
        global.resource_sets = Some(BTreeMap::from([(
            "east".to_string(),
            ResourceSetConfig {
                rack: Some("r1".to_string()),
            },
        )]));
        global.components = Some(ComponentBaseNames {
            broker_base_name: Some("brk".to_string()),
            ..Default::default()
        });

        let identity = ResourceIdentity::new(&global, ComponentKind::Broker, Some("east"), None);
        assert_eq!(identity.name, "pulsar-brk-east");
        assert_eq!(identity.labels["component"], "brk");
        assert_eq!(identity.labels["resource-set"], "east");
        assert_eq!(identity.rack(), Some("r1"));
        assert!(!identity.selector_labels().contains_key("rack"));

        let overridden =
            ResourceIdentity::new(&global, ComponentKind::Broker, Some("east"), Some("custom"));
        assert_eq!(overridden.name, "custom");
    }

    #[test]
    fn test_endpoints_follow_tls_settings() {
        let plain = ClusterEndpoints::new(&global(), "ns");
        assert_eq!(
            plain.zookeeper_connect,
            "pulsar-zookeeper-ca.ns.svc.cluster.local:2181"
        );
        assert_eq!(
            plain.broker_service_url,
            "pulsar://pulsar-broker.ns.svc.cluster.local:6650"
        );

        let mut tls = global();
        tls.tls = Some(TlsConfig {
            enabled: Some(true),
            broker: Some(crate::crd::TlsEntryConfig {
                enabled: Some(true),
                secret_name: None,
            }),
            ..Default::default()
        });
        tls.cluster_domain = Some("example.org".to_string());
        let secure = ClusterEndpoints::new(&tls, "ns");
        assert_eq!(
            secure.broker_service_url,
            "pulsar+ssl://pulsar-broker.ns.svc.example.org:6651"
        );
        assert_eq!(secure.broker_web_url, "https://pulsar-broker.ns.svc.example.org:8443");
        assert_eq!(secure.proxy_web_url, "http://pulsar-proxy.ns.svc.example.org:8080");
    }

    // -----------------------------------------------------------------------
    // Probes
    // -----------------------------------------------------------------------

    #[test]
    fn test_disabled_probe_is_omitted() {
        let disabled = ProbeConfig {
            enabled: Some(false),
            ..Default::default()
        };
        assert!(build_probe(Some(&disabled), ProbeAction::Tcp(8000)).is_none());

        let probe = build_probe(
            None,
            ProbeAction::Http {
                path: "/status.html".to_string(),
                port: 8080,
            },
        )
        .unwrap();
        assert_eq!(probe.http_get.unwrap().path.as_deref(), Some("/status.html"));
    }

    // -----------------------------------------------------------------------
    // Storage
    // -----------------------------------------------------------------------

    fn template() -> StorageClassConfig {
        StorageClassConfig {
            provisioner: Some("ebs.csi.aws.com".to_string()),
            type_: Some("gp3".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_existing_class_wins_over_template() {
        let mut global = global();
        global.storage = Some(GlobalStorageConfig {
            existing_storage_class_name: Some("fast".to_string()),
            storage_class: Some(template()),
        });

        let plan = plan_volume(&global, ComponentKind::BookKeeper, "journal", &VolumeConfig::default())
            .unwrap();
        assert_eq!(
            plan,
            VolumeProvision::Claim {
                storage_class_name: Some("fast".to_string()),
                synthesized: None,
            }
        );
    }

    #[test]
    fn test_volume_template_is_synthesized_with_retain_policy() {
        let volume = VolumeConfig {
            storage_class: Some(template()),
            ..Default::default()
        };
        let plan = plan_volume(&global(), ComponentKind::ZooKeeper, "data", &volume).unwrap();

        let VolumeProvision::Claim {
            storage_class_name,
            synthesized: Some(class),
        } = plan
        else {
            panic!("expected a synthesized storage class");
        };
        assert_eq!(storage_class_name.as_deref(), Some("pulsar-zookeeper-data"));
        assert_eq!(class.provisioner, "ebs.csi.aws.com");
        assert_eq!(class.reclaim_policy.as_deref(), Some("Retain"));
        assert_eq!(class.parameters.unwrap()["type"], "gp3");
    }

    #[test]
    fn test_template_without_provisioner_is_a_conflict() {
        let volume = VolumeConfig {
            storage_class: Some(StorageClassConfig::default()),
            ..Default::default()
        };
        assert!(plan_volume(&global(), ComponentKind::ZooKeeper, "data", &volume).is_err());
    }

    #[test]
    fn test_no_persistence_means_empty_dir() {
        let mut global = global();
        global.persistence = Some(false);
        let volume = VolumeConfig {
            storage_class: Some(template()),
            ..Default::default()
        };
        assert_eq!(
            plan_volume(&global, ComponentKind::ZooKeeper, "data", &volume).unwrap(),
            VolumeProvision::EmptyDir
        );
    }

    // -----------------------------------------------------------------------
    // Readiness
    // -----------------------------------------------------------------------

    #[test]
    fn test_workload_ready_requires_observed_generation() {
        let mut sts = kube::api::DynamicObject::new(
            "pulsar-broker",
            &kube::api::ApiResource::erase::<k8s_openapi::api::apps::v1::StatefulSet>(&()),
        )
        .data(json!({
            "spec": {"replicas": 3},
            "status": {"readyReplicas": 3, "observedGeneration": 1}
        }));
        sts.metadata.generation = Some(2);
        assert!(!workload_ready(&sts));

        sts.metadata.generation = Some(1);
        assert!(workload_ready(&sts));

        sts.data["status"]["readyReplicas"] = json!(2);
        assert!(!workload_ready(&sts));
    }
}
