//! Unit tests for the custom resource types
//!
//! Manifests are parsed from YAML the way a user writes them, then run
//! through defaulting, set resolution and validation.

#[cfg(test)]
mod cluster_manifest {
    use crate::crd::{ComponentKind, PulsarCluster, PulsarClusterSpec};

    const CLUSTER_YAML: &str = r#"
apiVersion: pulsar.k8s.io/v1alpha1
kind: PulsarCluster
metadata:
  name: pulsar
  namespace: messaging
spec:
  global:
    name: pulsar
    image: apachepulsar/pulsar:3.0.2
    restartOnConfigMapChange: true
    components:
      brokerBaseName: brk
    resourceSets:
      east:
        rack: zone-a
    tls:
      enabled: true
      broker:
        enabled: true
  zookeeper:
    replicas: 5
  broker:
    replicas: 2
    config:
      managedLedgerDefaultEnsembleSize: 2
      brokerDeleteInactiveTopicsEnabled: false
    sets:
      east:
        replicas: 1
  proxy:
    replicas: 0
"#;

    fn parse() -> PulsarCluster {
        serde_yaml::from_str(CLUSTER_YAML).unwrap()
    }

    #[test]
    fn test_parses_user_manifest() {
        let cluster = parse();
        let spec = &cluster.spec;

        assert_eq!(spec.global.name, "pulsar");
        assert_eq!(spec.global.restart_on_config_map_change, Some(true));
        assert_eq!(spec.global.rack_of("east"), Some("zone-a"));
        assert_eq!(ComponentKind::Broker.base_name(&spec.global), "brk");
        assert_eq!(ComponentKind::Proxy.base_name(&spec.global), "proxy");
        assert!(ComponentKind::Broker.tls_entry(&spec.global).is_some());
        assert!(ComponentKind::Proxy.tls_entry(&spec.global).is_none());

        assert_eq!(spec.zookeeper.as_ref().unwrap().pod.replicas, Some(5));
        let broker = spec.broker.as_ref().unwrap();
        assert_eq!(broker.base.pod.replicas, Some(2));
        assert_eq!(
            broker.base.pod.config.as_ref().unwrap()["managedLedgerDefaultEnsembleSize"],
            serde_json::json!(2)
        );
        assert_eq!(broker.sets.as_ref().unwrap()["east"].pod.replicas, Some(1));
        assert!(spec.bookkeeper.is_none());
    }

    #[test]
    fn test_absent_fields_are_not_serialized() {
        let spec: PulsarClusterSpec = serde_yaml::from_str("global:\n  name: tiny\n").unwrap();
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value, serde_json::json!({"global": {"name": "tiny"}}));
    }

    #[test]
    fn test_missing_cluster_name_is_rejected() {
        let result: Result<PulsarClusterSpec, _> = serde_yaml::from_str("global: {}\n");
        assert!(result.is_err());
    }
}

#[cfg(test)]
mod component_normalization {
    use std::collections::BTreeMap;

    use crate::crd::component::WorkloadSetSpec;
    use crate::crd::defaults::normalize_component;
    use crate::crd::{
        Autorecovery, AutorecoveryFullSpec, Bastion, BastionFullSpec, BookKeeper,
        BookKeeperFullSpec, Broker, BrokerFullSpec, FunctionsWorker, FunctionsWorkerFullSpec,
        GlobalSpec, Proxy, ProxyFullSpec, ZooKeeper, ZooKeeperFullSpec,
    };

    fn global() -> GlobalSpec {
        GlobalSpec {
            name: "pulsar".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_replicas_per_component() {
        let zk = ZooKeeper::new("zk", ZooKeeperFullSpec { global: global(), zookeeper: None });
        let bk = BookKeeper::new("bk", BookKeeperFullSpec { global: global(), bookkeeper: None });
        let broker = Broker::new("br", BrokerFullSpec { global: global(), broker: None });
        let proxy = Proxy::new("px", ProxyFullSpec { global: global(), proxy: None });
        let ar = Autorecovery::new(
            "ar",
            AutorecoveryFullSpec {
                global: global(),
                autorecovery: None,
            },
        );
        let bastion = Bastion::new("ba", BastionFullSpec { global: global(), bastion: None });
        let fw = FunctionsWorker::new(
            "fw",
            FunctionsWorkerFullSpec {
                global: global(),
                functions_worker: None,
            },
        );

        assert_eq!(normalize_component(&zk).unwrap().base.replicas(), 3);
        assert_eq!(normalize_component(&bk).unwrap().base.replicas(), 3);
        assert_eq!(normalize_component(&broker).unwrap().base.replicas(), 3);
        assert_eq!(normalize_component(&proxy).unwrap().base.replicas(), 3);
        assert_eq!(normalize_component(&ar).unwrap().base.replicas(), 1);
        assert_eq!(normalize_component(&bastion).unwrap().base.replicas(), 1);

        let fw = normalize_component(&fw).unwrap();
        assert_eq!(fw.base.replicas(), 0);
        assert!(!fw.any_enabled());
    }

    #[test]
    fn test_sets_inherit_base_and_override_fields() {
        let spec: BrokerFullSpec = serde_yaml::from_str(
            r#"
global:
  name: pulsar
  resourceSets:
    east: {}
    west: {}
broker:
  replicas: 4
  config:
    clusterName: pulsar
    numIOThreads: 8
  sets:
    east:
      replicas: 1
    west:
      config:
        numIOThreads: 16
"#,
        )
        .unwrap();
        let normalized = normalize_component(&Broker::new("pulsar-broker", spec)).unwrap();

        let sets: BTreeMap<_, _> = normalized
            .sets
            .iter()
            .map(|s| (s.name.clone().unwrap(), &s.spec))
            .collect();
        assert_eq!(sets.len(), 2);

        assert_eq!(sets["east"].replicas(), 1);
        assert_eq!(sets["east"].config()["numIOThreads"], serde_json::json!(8));

        assert_eq!(sets["west"].replicas(), 4);
        assert_eq!(sets["west"].config()["numIOThreads"], serde_json::json!(16));
        assert_eq!(sets["west"].config()["clusterName"], serde_json::json!("pulsar"));
    }

    #[test]
    fn test_component_without_sets_is_a_single_unnamed_group() {
        let broker = Broker::new("br", BrokerFullSpec { global: global(), broker: None });
        let normalized = normalize_component(&broker).unwrap();
        assert_eq!(normalized.sets.len(), 1);
        assert!(normalized.sets[0].name.is_none());
        assert_eq!(normalized.sets[0].spec, normalized.base);
    }
}

#[cfg(test)]
mod spec_validation {
    use crate::crd::defaults::normalize_component;
    use crate::crd::validation::{validate_component, validate_global};
    use crate::crd::{Broker, BrokerFullSpec, ComponentKind, GlobalSpec};

    fn violations(yaml: &str) -> Vec<String> {
        let spec: BrokerFullSpec = serde_yaml::from_str(yaml).unwrap();
        let broker = Broker::new("pulsar-broker", spec);
        let normalized = normalize_component(&broker).unwrap();
        validate_component(ComponentKind::Broker, &normalized.global, &normalized.sets)
            .into_iter()
            .map(|v| v.field)
            .collect()
    }

    #[test]
    fn test_valid_broker_has_no_violations() {
        assert!(violations("global:\n  name: pulsar\nbroker:\n  replicas: 2\n").is_empty());
    }

    #[test]
    fn test_undeclared_set_is_reported() {
        let fields = violations(
            r#"
global:
  name: pulsar
broker:
  sets:
    ghost:
      replicas: 1
"#,
        );
        assert_eq!(fields, vec!["spec.broker.sets.ghost".to_string()]);
    }

    #[test]
    fn test_autoscaler_bounds_and_config_shape() {
        let fields = violations(
            r#"
global:
  name: pulsar
broker:
  autoscaler:
    enabled: true
    min: 5
    max: 2
  config:
    nested:
      a: 1
"#,
        );
        assert!(fields.contains(&"spec.broker.autoscaler.min".to_string()));
        assert!(fields.contains(&"spec.broker.config.nested".to_string()));
    }

    #[test]
    fn test_pdb_and_pull_policy() {
        let fields = violations(
            r#"
global:
  name: pulsar
broker:
  imagePullPolicy: Sometimes
  pdb:
    maxUnavailable: 0
"#,
        );
        assert!(fields.contains(&"spec.broker.imagePullPolicy".to_string()));
        assert!(fields.contains(&"spec.broker.pdb.maxUnavailable".to_string()));
    }

    #[test]
    fn test_cluster_name_must_be_a_dns_label() {
        let global = GlobalSpec {
            name: "Pulsar_Prod".to_string(),
            ..Default::default()
        };
        let errors = validate_global(&global);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "spec.global.name");
    }
}

#[cfg(test)]
mod crd_generation {
    use crate::crd::all_crds;

    #[test]
    fn test_every_kind_is_served_in_the_pulsar_group() {
        let crds = all_crds();
        let kinds: Vec<_> = crds.iter().map(|c| c.spec.names.kind.as_str()).collect();
        assert_eq!(
            kinds,
            vec![
                "PulsarCluster",
                "ZooKeeper",
                "BookKeeper",
                "Broker",
                "Proxy",
                "Autorecovery",
                "Bastion",
                "FunctionsWorker"
            ]
        );
        for crd in &crds {
            assert_eq!(crd.spec.group, "pulsar.k8s.io");
            assert_eq!(crd.spec.scope, "Namespaced");
            let version = &crd.spec.versions[0];
            assert_eq!(version.name, "v1alpha1");
            assert!(version.subresources.as_ref().unwrap().status.is_some());
        }
    }

    #[test]
    fn test_crds_render_as_yaml() {
        for crd in all_crds() {
            let yaml = serde_yaml::to_string(&crd).unwrap();
            assert!(yaml.contains("openAPIV3Schema"));
        }
    }
}
