//! Tests for the generic reconcile driver
//!
//! A Broker resource is driven through `reconcile_pass` against the
//! in-memory cluster:
//! - fresh state, workloads still rolling out
//! - convergence to Ready and the steady state without writes
//! - spec validation failures
//! - errors raised while converging resources
//! - a disabled broker

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use kube::api::{ApiResource, DynamicObject};
    use kube::runtime::controller::Action;
    use serde_json::json;

    use super::super::reconciler::*;
    use crate::controller::cluster_api::testing::{FakeClusterApi, WriteOp};
    use crate::controller::collaborators::{Collaborators, SpecValidator};
    use crate::controller::conditions::{REASON_GENERIC_ERROR, REASON_INITIALIZING, REASON_INVALID_SPEC};
    use crate::crd::{
        Broker, BrokerFullSpec, BrokerSetSpec, ComponentKind, GlobalSpec, PodTemplateConfig,
        ResourceSetConfig, SetsSpec, SpecValidationError,
    };

    const NAMESPACE: &str = "pulsar-ns";
    const GENERATION: i64 = 3;

    fn broker(global: GlobalSpec, replicas: i32, sets: Option<BTreeMap<String, BrokerSetSpec>>) -> Broker {
        let mut broker = Broker::new(
            "pulsar-broker",
            BrokerFullSpec {
                global,
                broker: Some(SetsSpec {
                    base: BrokerSetSpec {
                        pod: PodTemplateConfig {
                            replicas: Some(replicas),
                            ..Default::default()
                        },
                        ..Default::default()
                    },
                    sets,
                }),
            },
        );
        broker.metadata.namespace = Some(NAMESPACE.to_string());
        broker.metadata.uid = Some("uid-broker".to_string());
        broker.metadata.generation = Some(GENERATION);
        broker
    }

    fn global() -> GlobalSpec {
        GlobalSpec {
            name: "pulsar".to_string(),
            ..Default::default()
        }
    }

    /// Store the resource itself so status writes have a target
    fn seed(api: &FakeClusterApi, broker: &Broker) {
        api.insert(
            "Broker",
            DynamicObject::new("pulsar-broker", &ApiResource::erase::<Broker>(&()))
                .within(NAMESPACE)
                .data(json!({ "spec": broker.spec })),
        );
    }

    /// Read back the status the driver wrote, as the watcher would deliver it
    fn refresh(api: &FakeClusterApi, broker: &mut Broker) {
        let stored = api.get("Broker", Some(NAMESPACE), "pulsar-broker").unwrap();
        broker.status = serde_json::from_value(stored.data["status"].clone()).ok();
    }

    fn mark_ready(api: &FakeClusterApi, kind: &str, name: &str) {
        let replicas = api
            .get(kind, Some(NAMESPACE), name)
            .and_then(|o| o.data["spec"]["replicas"].as_i64())
            .unwrap_or(1);
        api.update(
            kind,
            Some(NAMESPACE),
            name,
            json!({"status": {"readyReplicas": replicas}}),
        );
    }

    #[tokio::test]
    async fn test_broker_with_five_replicas_converges() {
        let api = FakeClusterApi::default();
        let collaborators = Collaborators::default();
        let requeue = RequeuePolicy::default();
        let mut br = broker(global(), 5, None);
        seed(&api, &br);

        let report = reconcile_pass(&br, &api, &collaborators, &requeue).await.unwrap();
        assert_eq!(report.action, Action::requeue(Duration::from_secs(10)));
        assert!(!report.is_ready());
        assert_eq!(report.status.conditions[0].reason, REASON_INITIALIZING);
        assert_eq!(report.status.conditions[0].observed_generation, Some(GENERATION));
        assert!(report.status.last_applied.is_none());

        let sts = api.get("StatefulSet", Some(NAMESPACE), "pulsar-broker").unwrap();
        assert_eq!(sts.data["spec"]["replicas"], json!(5));
        assert_eq!(sts.data["spec"]["serviceName"], json!("pulsar-broker"));

        // Default placement: one broker per host, enforced
        let anti_affinity = &sts.data["spec"]["template"]["spec"]["affinity"]["podAntiAffinity"];
        let required = anti_affinity["requiredDuringSchedulingIgnoredDuringExecution"]
            .as_array()
            .unwrap();
        assert_eq!(required.len(), 1);
        assert_eq!(required[0]["topologyKey"], json!("kubernetes.io/hostname"));
        assert_eq!(
            required[0]["labelSelector"]["matchLabels"],
            json!({"app": "pulsar", "cluster": "pulsar", "component": "broker"})
        );
        assert!(anti_affinity
            .get("preferredDuringSchedulingIgnoredDuringExecution")
            .is_none());

        let config = api.get("ConfigMap", Some(NAMESPACE), "pulsar-broker").unwrap();
        assert_eq!(config.data["data"]["PULSAR_PREFIX_clusterName"], json!("pulsar"));
        assert!(api.get("Service", Some(NAMESPACE), "pulsar-broker").is_some());
        let pdb = api
            .get("PodDisruptionBudget", Some(NAMESPACE), "pulsar-broker")
            .unwrap();
        assert_eq!(pdb.data["spec"]["maxUnavailable"], json!(1));

        refresh(&api, &mut br);
        mark_ready(&api, "StatefulSet", "pulsar-broker");
        let report = reconcile_pass(&br, &api, &collaborators, &requeue).await.unwrap();
        assert!(report.is_ready());
        assert_eq!(report.action, Action::requeue(Duration::from_secs(60)));
        assert_eq!(report.status.conditions[0].observed_generation, Some(GENERATION));
        assert_eq!(
            report.status.last_applied,
            Some(canonical_spec(&serde_json::to_value(&br.spec).unwrap()).unwrap())
        );

        refresh(&api, &mut br);
        api.clear_writes();
        let report = reconcile_pass(&br, &api, &collaborators, &requeue).await.unwrap();
        assert!(report.is_ready());
        assert!(api.writes().is_empty(), "steady state wrote {:?}", api.writes());
    }

    #[tokio::test]
    async fn test_disabled_broker_is_ready_without_workloads() {
        let api = FakeClusterApi::default();
        let br = broker(global(), 0, None);
        seed(&api, &br);

        let report = reconcile_pass(&br, &api, &Collaborators::default(), &RequeuePolicy::default())
            .await
            .unwrap();

        assert!(report.is_ready());
        assert!(api.objects_of_kind("PodDisruptionBudget").is_empty());
        assert!(api.objects_of_kind("StatefulSet").is_empty());
    }

    #[tokio::test]
    async fn test_failed_readiness_check_falls_back_to_converging() {
        let api = FakeClusterApi::default();
        let collaborators = Collaborators::default();
        let requeue = RequeuePolicy::default();
        let mut br = broker(global(), 1, None);
        seed(&api, &br);

        reconcile_pass(&br, &api, &collaborators, &requeue).await.unwrap();
        mark_ready(&api, "StatefulSet", "pulsar-broker");
        reconcile_pass(&br, &api, &collaborators, &requeue).await.unwrap();
        refresh(&api, &mut br);
        assert!(br.status.as_ref().unwrap().is_ready());

        api.fail_reads("StatefulSet");
        let report = reconcile_pass(&br, &api, &collaborators, &requeue).await.unwrap();

        assert!(!report.is_ready());
        assert_eq!(report.status.conditions[0].reason, REASON_GENERIC_ERROR);
        assert!(report.status.conditions[0].message.contains("unavailable"));
        assert_eq!(report.action, Action::requeue(Duration::from_secs(15)));
    }

    #[tokio::test]
    async fn test_second_pass_without_status_makes_no_object_writes() {
        let api = FakeClusterApi::default();
        let collaborators = Collaborators::default();
        let requeue = RequeuePolicy::default();
        let br = broker(global(), 3, None);
        seed(&api, &br);

        reconcile_pass(&br, &api, &collaborators, &requeue).await.unwrap();
        api.clear_writes();
        reconcile_pass(&br, &api, &collaborators, &requeue).await.unwrap();

        assert!(api
            .writes()
            .iter()
            .all(|w| w.op == WriteOp::PatchStatus && w.kind == "Broker"));
    }

    #[tokio::test]
    async fn test_scaling_up_patches_only_the_statefulset() {
        let api = FakeClusterApi::default();
        let collaborators = Collaborators::default();
        let requeue = RequeuePolicy::default();
        let br = broker(global(), 3, None);
        seed(&api, &br);
        reconcile_pass(&br, &api, &collaborators, &requeue).await.unwrap();

        api.clear_writes();
        let scaled = broker(global(), 5, None);
        reconcile_pass(&scaled, &api, &collaborators, &requeue).await.unwrap();

        let object_writes: Vec<_> = api
            .writes()
            .into_iter()
            .filter(|w| w.op != WriteOp::PatchStatus)
            .collect();
        assert_eq!(object_writes.len(), 1);
        assert_eq!(object_writes[0].op, WriteOp::Patch);
        assert_eq!(object_writes[0].kind, "StatefulSet");
    }

    #[tokio::test]
    async fn test_negative_replicas_are_rejected_without_requeue() {
        let api = FakeClusterApi::default();
        let br = broker(global(), -1, None);
        seed(&api, &br);

        let report = reconcile_pass(&br, &api, &Collaborators::default(), &RequeuePolicy::default())
            .await
            .unwrap();

        assert_eq!(report.action, Action::await_change());
        let condition = &report.status.conditions[0];
        assert_eq!(condition.status, "False");
        assert_eq!(condition.reason, REASON_INVALID_SPEC);
        assert_eq!(condition.observed_generation, Some(GENERATION));
        assert!(condition.message.contains("spec.broker.replicas"));
        assert!(api.objects_of_kind("StatefulSet").is_empty());
    }

    struct RejectEverything;

    impl SpecValidator for RejectEverything {
        fn validate(
            &self,
            component: Option<ComponentKind>,
            _spec: &serde_json::Value,
        ) -> Vec<SpecValidationError> {
            vec![SpecValidationError::new(
                "spec",
                format!("{component:?}"),
                "rejected by policy",
            )]
        }
    }

    #[tokio::test]
    async fn test_external_validator_runs_after_builtin_rules() {
        let api = FakeClusterApi::default();
        let br = broker(global(), 1, None);
        seed(&api, &br);
        let collaborators = Collaborators {
            validator: std::sync::Arc::new(RejectEverything),
            ..Default::default()
        };

        let report = reconcile_pass(&br, &api, &collaborators, &RequeuePolicy::default())
            .await
            .unwrap();

        assert_eq!(report.status.conditions[0].reason, REASON_INVALID_SPEC);
        assert!(report.status.conditions[0].message.contains("Some(Broker)"));
    }

    #[tokio::test]
    async fn test_unknown_rack_becomes_generic_error() {
        let api = FakeClusterApi::default();
        let mut global = global();
        global.resource_sets = Some(BTreeMap::from([(
            "a".to_string(),
            ResourceSetConfig {
                rack: Some("missing".to_string()),
            },
        )]));
        let br = broker(
            global,
            1,
            Some(BTreeMap::from([("a".to_string(), BrokerSetSpec::default())])),
        );
        seed(&api, &br);

        let report = reconcile_pass(&br, &api, &Collaborators::default(), &RequeuePolicy::default())
            .await
            .unwrap();

        assert_eq!(report.action, Action::requeue(Duration::from_secs(15)));
        assert_eq!(report.status.conditions[0].reason, REASON_GENERIC_ERROR);
        assert!(report.status.conditions[0].message.contains("missing"));
    }

    #[test]
    fn test_spec_unchanged_ignores_key_order_and_nulls() {
        assert!(spec_unchanged(Some(r#"{"a":1,"b":{"c":2}}"#), r#"{"b":{"c":2,"d":null},"a":1}"#));
        assert!(!spec_unchanged(Some(r#"{"a":1}"#), r#"{"a":2}"#));
        assert!(!spec_unchanged(None, r#"{"a":1}"#));
        assert!(!spec_unchanged(Some("not json"), r#"{"a":1}"#));
    }
}
