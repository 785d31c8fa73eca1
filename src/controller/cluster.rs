//! PulsarCluster orchestrator
//!
//! The parent resource never creates workloads itself. It derives one child
//! resource per component, writes it when it differs from the live one and
//! rolls the children out in dependency order:
//! ZooKeeper, BookKeeper, then Broker/Autorecovery/Proxy/Bastion, and the
//! functions worker once the brokers are up.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, ApiResource, DynamicObject};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config;
use kube::ResourceExt;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::cluster_api::ClusterApi;
use super::collaborators::Collaborators;
use super::reconciler::{
    canonical_spec, complete_pass, ensure_crd_installed, error_policy, report_invalid_spec,
    spec_unchanged, ControllerState, PassReport, ReconciliationResult, RequeuePolicy,
    StatusTarget,
};
use super::resources::{owner_reference, ResourceIdentity};
use super::spec_diff::diff;
use crate::crd::defaults::{normalize_component, normalize_global};
use crate::crd::validation::validate_global;
use crate::crd::{
    Autorecovery, AutorecoveryFullSpec, AutoscalerConfig, Bastion, BastionFullSpec, BookKeeper,
    BookKeeperFullSpec, Broker, BrokerFullSpec, ComponentKind, ComponentResource,
    FunctionsWorker, FunctionsWorkerFullSpec, GlobalSpec, Proxy, ProxyFullSpec, PulsarCluster,
    PulsarClusterSpec, ReconciliationStatus, ZooKeeper, ZooKeeperFullSpec,
};
use crate::error::{Error, Result};

/// Desired state of one child resource
#[derive(Clone, Debug, PartialEq)]
pub struct ChildSpec {
    pub component: ComponentKind,
    pub resource: ApiResource,
    /// `{cluster}-{base}`
    pub name: String,
    pub spec: Value,
}

fn child<C: ComponentResource>(
    global: &GlobalSpec,
    spec: &impl Serialize,
) -> Result<ChildSpec> {
    Ok(ChildSpec {
        component: C::COMPONENT,
        resource: ApiResource::erase::<C>(&()),
        name: format!("{}-{}", global.name, C::COMPONENT.base_name(global)),
        spec: serde_json::to_value(spec)?,
    })
}

fn proxy_enabled(spec: &PulsarClusterSpec) -> Result<bool> {
    let proxy = Proxy::new(
        "proxy",
        ProxyFullSpec {
            global: spec.global.clone(),
            proxy: spec.proxy.clone(),
        },
    );
    Ok(normalize_component(&proxy)?.any_enabled())
}

/// Split the cluster spec into one `{global, <component>}` spec per child
///
/// The bastion targets the proxy unless told otherwise, as long as proxies
/// are deployed.
pub fn child_specs(spec: &PulsarClusterSpec) -> Result<Vec<ChildSpec>> {
    let global = spec.global.clone();

    let mut bastion = spec.bastion.clone().unwrap_or_default();
    if bastion.target_proxy.is_none() {
        bastion.target_proxy = Some(proxy_enabled(spec)?);
    }

    Ok(vec![
        child::<ZooKeeper>(
            &global,
            &ZooKeeperFullSpec {
                global: global.clone(),
                zookeeper: spec.zookeeper.clone(),
            },
        )?,
        child::<BookKeeper>(
            &global,
            &BookKeeperFullSpec {
                global: global.clone(),
                bookkeeper: spec.bookkeeper.clone(),
            },
        )?,
        child::<Broker>(
            &global,
            &BrokerFullSpec {
                global: global.clone(),
                broker: spec.broker.clone(),
            },
        )?,
        child::<Proxy>(
            &global,
            &ProxyFullSpec {
                global: global.clone(),
                proxy: spec.proxy.clone(),
            },
        )?,
        child::<Autorecovery>(
            &global,
            &AutorecoveryFullSpec {
                global: global.clone(),
                autorecovery: spec.autorecovery.clone(),
            },
        )?,
        child::<Bastion>(
            &global,
            &BastionFullSpec {
                global: global.clone(),
                bastion: Some(bastion),
            },
        )?,
        child::<FunctionsWorker>(
            &global,
            &FunctionsWorkerFullSpec {
                global: global.clone(),
                functions_worker: spec.functions_worker.clone(),
            },
        )?,
    ])
}

fn autoscaler_flag(group: &Value) -> Option<bool> {
    group.get("autoscaler")?.get("enabled")?.as_bool()
}

/// Keep the replica counts an autoscaler wrote into the live child
///
/// A set inherits the autoscaler of the default group unless it configures
/// its own.
pub fn preserve_autoscaled_replicas(component: ComponentKind, desired: &mut Value, live: &Value) {
    if !matches!(component, ComponentKind::BookKeeper | ComponentKind::Broker) {
        return;
    }
    let field = component.spec_field();
    let base_enabled = desired.get(field).and_then(autoscaler_flag).unwrap_or(false);
    let Some(group) = desired.get_mut(field).and_then(Value::as_object_mut) else {
        return;
    };
    let live_group = &live[field];

    if base_enabled {
        if let Some(replicas) = live_group.get("replicas") {
            debug!("Keeping autoscaled {} replicas {}", component, replicas);
            group.insert("replicas".to_string(), replicas.clone());
        }
    }

    if let Some(sets) = group.get_mut("sets").and_then(Value::as_object_mut) {
        for (name, set) in sets.iter_mut() {
            if !autoscaler_flag(set).unwrap_or(base_enabled) {
                continue;
            }
            let Some(replicas) = live_group
                .get("sets")
                .and_then(|s| s.get(name))
                .and_then(|s| s.get("replicas"))
            else {
                continue;
            };
            if let Some(set) = set.as_object_mut() {
                debug!("Keeping autoscaled {} set {} replicas {}", component, name, replicas);
                set.insert("replicas".to_string(), replicas.clone());
            }
        }
    }
}

/// A group of children rolled out together once `after` is ready
struct Stage {
    components: &'static [ComponentKind],
    after: &'static [ComponentKind],
}

const ROLLOUT: &[Stage] = &[
    Stage {
        components: &[ComponentKind::ZooKeeper],
        after: &[],
    },
    Stage {
        components: &[ComponentKind::BookKeeper],
        after: &[ComponentKind::ZooKeeper],
    },
    Stage {
        components: &[
            ComponentKind::Broker,
            ComponentKind::Autorecovery,
            ComponentKind::Proxy,
            ComponentKind::Bastion,
        ],
        after: &[ComponentKind::BookKeeper],
    },
    Stage {
        components: &[ComponentKind::FunctionsWorker],
        after: &[ComponentKind::Broker],
    },
];

fn child_status(live: &DynamicObject) -> Result<ReconciliationStatus> {
    match live.data.get("status") {
        Some(status) if !status.is_null() => Ok(serde_json::from_value(status.clone())?),
        _ => Ok(ReconciliationStatus::default()),
    }
}

/// Drives the children of one PulsarCluster
pub struct ClusterReconciler<'a> {
    pub api: &'a dyn ClusterApi,
    pub collaborators: &'a Collaborators,
}

impl ClusterReconciler<'_> {
    /// Write the child when it differs; report whether it is ready
    ///
    /// A child only counts as ready when its own controller converged the
    /// spec written here, i.e. its `lastApplied` matches.
    async fn converge_child(
        &self,
        namespace: &str,
        owner: &OwnerReference,
        global: &GlobalSpec,
        child: &ChildSpec,
    ) -> Result<bool> {
        let live = self
            .api
            .get_optional(&child.resource, Some(namespace), &child.name)
            .await?;

        let mut desired = child.spec.clone();
        let live_spec = live
            .as_ref()
            .and_then(|l| l.data.get("spec").cloned())
            .unwrap_or(Value::Null);
        preserve_autoscaled_replicas(child.component, &mut desired, &live_spec);

        let mut object = DynamicObject::new(&child.name, &child.resource)
            .within(namespace)
            .data(serde_json::json!({ "spec": desired }));
        object.metadata.owner_references = Some(vec![owner.clone()]);
        object.metadata.labels =
            Some(ResourceIdentity::new(global, child.component, None, None).labels);

        let Some(live) = live else {
            info!("Creating {} {}", child.resource.kind, child.name);
            self.api.create(&child.resource, &object).await?;
            return Ok(false);
        };

        let difference = diff(&live_spec, &desired);
        if !difference.are_equal() {
            info!(
                "Updating {} {}:\n{}",
                child.resource.kind, child.name, difference
            );
            self.api.patch(&child.resource, &object).await?;
            return Ok(false);
        }

        let status = child_status(&live)?;
        Ok(status.is_ready()
            && spec_unchanged(status.last_applied.as_deref(), &canonical_spec(&desired)?))
    }

    /// Converge the children in rollout order
    pub async fn reconcile(&self, cluster: &PulsarCluster) -> Result<ReconciliationResult> {
        let namespace = cluster
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let spec = &cluster.spec;

        if spec.global.tls_enabled() {
            self.collaborators
                .certificates
                .ensure_certificates(&namespace, spec)
                .await?;
        }
        if let Some(auth) = spec.global.auth.as_ref().filter(|_| spec.global.auth_enabled()) {
            self.collaborators
                .secrets
                .generate_secrets_if_absent(&namespace, auth)
                .await?;
        }

        let children: BTreeMap<ComponentKind, ChildSpec> = child_specs(spec)?
            .into_iter()
            .map(|c| (c.component, c))
            .collect();
        let owner = owner_reference(cluster);
        let mut ready: BTreeMap<ComponentKind, bool> = BTreeMap::new();

        for stage in ROLLOUT {
            if let Some(blocking) = stage
                .after
                .iter()
                .find(|kind| !ready.get(*kind).copied().unwrap_or(false))
            {
                return Ok(ReconciliationResult::initializing(&format!(
                    "Waiting for {blocking} to become ready"
                )));
            }
            for kind in stage.components {
                let Some(child) = children.get(kind) else {
                    continue;
                };
                let child_ready = self
                    .converge_child(&namespace, &owner, &spec.global, child)
                    .await?;
                ready.insert(*kind, child_ready);
            }
        }

        let pending: Vec<String> = ready
            .iter()
            .filter(|(_, r)| !**r)
            .map(|(k, _)| k.to_string())
            .collect();
        if pending.is_empty() {
            Ok(ReconciliationResult::ready("All components are ready"))
        } else {
            Ok(ReconciliationResult::initializing(&format!(
                "Waiting for {} to become ready",
                pending.join(", ")
            )))
        }
    }

    async fn notify_autoscalers(&self, namespace: &str, spec: &PulsarClusterSpec) -> Result<()> {
        let bookkeeper = spec
            .bookkeeper
            .as_ref()
            .map(|b| AutoscalerConfig::is_enabled(&b.base.autoscaler))
            .unwrap_or(false);
        let broker = spec
            .broker
            .as_ref()
            .map(|b| AutoscalerConfig::is_enabled(&b.base.autoscaler))
            .unwrap_or(false);
        for (component, enabled) in [
            (ComponentKind::BookKeeper, bookkeeper),
            (ComponentKind::Broker, broker),
        ] {
            if enabled {
                self.collaborators
                    .autoscalers
                    .on_spec_change(component, namespace, spec)
                    .await?;
            }
        }
        Ok(())
    }

    /// One pass over a PulsarCluster, including the status write
    pub async fn pass(&self, cluster: &PulsarCluster, requeue: &RequeuePolicy) -> Result<PassReport> {
        let namespace = cluster
            .namespace()
            .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let name = cluster.name_any();
        let target = StatusTarget {
            api: self.api,
            resource: ApiResource::erase::<PulsarCluster>(&()),
            namespace: &namespace,
            name: &name,
            generation: cluster.metadata.generation,
        };
        let old = cluster.status.clone().unwrap_or_default();
        let spec_value = serde_json::to_value(&cluster.spec)?;
        let spec = canonical_spec(&spec_value)?;

        let mut violations = match normalize_global(&cluster.spec.global) {
            Ok(global) => validate_global(&global),
            Err(e) => return complete_pass(&target, &old, spec, Err(e), requeue).await,
        };
        violations.extend(self.collaborators.validator.validate(None, &spec_value));
        if !violations.is_empty() {
            return report_invalid_spec(&target, &old, &violations).await;
        }

        let changed = !spec_unchanged(old.last_applied.as_deref(), &spec);
        let mut outcome = self.reconcile(cluster).await;
        if changed {
            if let Ok(result) = &outcome {
                if !result.reschedule {
                    if let Err(e) = self.notify_autoscalers(&namespace, &cluster.spec).await {
                        outcome = Err(e);
                    }
                }
            }
        }

        complete_pass(&target, &old, spec, outcome, requeue).await
    }
}

#[instrument(skip(obj, ctx), fields(name = %obj.name_any(), namespace = ?obj.namespace()))]
async fn reconcile_cluster(obj: Arc<PulsarCluster>, ctx: Arc<ControllerState>) -> Result<Action> {
    if !ctx.is_leader() {
        debug!("Not the leader, skipping");
        return Ok(Action::requeue(ctx.requeue.dependency));
    }

    let started = std::time::Instant::now();
    let reconciler = ClusterReconciler {
        api: ctx.api.as_ref(),
        collaborators: &ctx.collaborators,
    };
    let report = reconciler.pass(obj.as_ref(), &ctx.requeue).await;

    #[cfg(feature = "metrics")]
    {
        super::metrics::observe_reconcile_duration_seconds("pulsarcluster", started.elapsed().as_secs_f64());
        if let Ok(report) = &report {
            super::metrics::set_resource_ready(
                "pulsarcluster",
                &obj.namespace().unwrap_or_default(),
                &obj.name_any(),
                report.is_ready(),
            );
        }
    }
    #[cfg(not(feature = "metrics"))]
    let _ = started;

    report.map(|r| r.action)
}

/// Run the PulsarCluster controller until shutdown
pub async fn run_cluster_controller(state: Arc<ControllerState>) -> Result<()> {
    let clusters: Api<PulsarCluster> = state.api_for();
    ensure_crd_installed(&clusters).await?;
    info!("Starting PulsarCluster controller");

    Controller::new(clusters, Config::default())
        .owns::<ZooKeeper>(state.api_for(), Config::default())
        .owns::<BookKeeper>(state.api_for(), Config::default())
        .owns::<Broker>(state.api_for(), Config::default())
        .owns::<Proxy>(state.api_for(), Config::default())
        .owns::<Autorecovery>(state.api_for(), Config::default())
        .owns::<Bastion>(state.api_for(), Config::default())
        .owns::<FunctionsWorker>(state.api_for(), Config::default())
        .shutdown_on_signal()
        .run(reconcile_cluster, error_policy::<PulsarCluster>, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("Reconciled: {:?}", obj),
                Err(e) => warn!("Reconcile error: {:?}", e),
            }
        })
        .await;

    Ok(())
}
