//! Generic reconcile driver shared by every component resource
//!
//! A pass normalizes the spec, validates it, converges the generated objects
//! and writes the status subresource. The status write is the only direct
//! write the driver performs; everything else goes through the component's
//! `ensure_resources`.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::api::{Api, ApiResource, ListParams};
use kube::client::Client;
use kube::core::NamespaceResourceScope;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, instrument, warn};

use super::apply::ResourcePatcher;
use super::cluster_api::ClusterApi;
use super::collaborators::Collaborators;
use super::conditions::{
    merge_conditions, not_ready_condition, ready_condition, REASON_GENERIC_ERROR,
    REASON_INVALID_SPEC,
};
use super::resources::{job_succeeded, owner_reference, workload_ready, ClusterEndpoints};
use super::spec_diff::{diff_serialized, prune_nulls};
use crate::crd::defaults::{normalize_component, NormalizedComponent};
use crate::crd::validation::validate_component;
use crate::crd::{ComponentResource, Condition, ReconciliationStatus, SpecValidationError};
use crate::error::{join_violations, Error, Result};

/// Outcome of `ensure_resources`
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReconciliationResult {
    /// Not converged yet; come back soon and keep `lastApplied`
    pub reschedule: bool,
    pub conditions: Vec<Condition>,
    pub skip_last_applied_update: bool,
    /// Record this instead of the current spec as `lastApplied`
    pub override_last_applied: Option<String>,
}

impl ReconciliationResult {
    pub fn ready(message: &str) -> Self {
        Self {
            conditions: vec![ready_condition(message)],
            ..Default::default()
        }
    }

    /// Ready=False/Initializing and reschedule
    pub fn initializing(message: &str) -> Self {
        Self {
            reschedule: true,
            conditions: vec![super::conditions::initializing_condition(message)],
            ..Default::default()
        }
    }
}

/// Requeue delays of the controllers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequeuePolicy {
    /// Waiting for a dependency or a workload rollout
    pub dependency: Duration,
    pub error: Duration,
    /// Converged and Ready
    pub steady: Duration,
}

impl Default for RequeuePolicy {
    fn default() -> Self {
        Self {
            dependency: Duration::from_secs(10),
            error: Duration::from_secs(15),
            steady: Duration::from_secs(60),
        }
    }
}

/// Shared state for the controllers
pub struct ControllerState {
    pub client: Client,
    pub api: Arc<dyn ClusterApi>,
    pub collaborators: Collaborators,
    pub requeue: RequeuePolicy,
    /// Namespace to watch; all namespaces when `None`
    pub watch_namespace: Option<String>,
    pub is_leader: Arc<AtomicBool>,
}

impl ControllerState {
    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::Relaxed)
    }

    pub fn api_for<K>(&self) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        match &self.watch_namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

/// Everything `ensure_resources` needs for one pass
pub struct PassContext<'a> {
    pub patcher: ResourcePatcher<'a>,
    pub endpoints: ClusterEndpoints,
}

impl PassContext<'_> {
    pub fn namespace(&self) -> &str {
        self.patcher.namespace()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkloadKind {
    StatefulSet,
    Deployment,
    /// A job counts as ready once it succeeded
    Job,
}

/// A workload whose readiness the component's readiness depends on
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadRef {
    pub kind: WorkloadKind,
    pub name: String,
}

impl WorkloadRef {
    pub fn stateful_set(name: impl Into<String>) -> Self {
        Self {
            kind: WorkloadKind::StatefulSet,
            name: name.into(),
        }
    }

    pub fn deployment(name: impl Into<String>) -> Self {
        Self {
            kind: WorkloadKind::Deployment,
            name: name.into(),
        }
    }

    pub fn job(name: impl Into<String>) -> Self {
        Self {
            kind: WorkloadKind::Job,
            name: name.into(),
        }
    }
}

/// Check every workload; a missing one is not ready
pub async fn workloads_ready(patcher: &ResourcePatcher<'_>, workloads: &[WorkloadRef]) -> Result<bool> {
    for workload in workloads {
        let ready = match workload.kind {
            WorkloadKind::StatefulSet => patcher
                .get::<StatefulSet>(&workload.name)
                .await?
                .is_some_and(|o| workload_ready(&o)),
            WorkloadKind::Deployment => patcher
                .get::<Deployment>(&workload.name)
                .await?
                .is_some_and(|o| workload_ready(&o)),
            WorkloadKind::Job => patcher
                .get::<Job>(&workload.name)
                .await?
                .is_some_and(|o| job_succeeded(&o)),
        };
        if !ready {
            debug!("{:?} {} is not ready", workload.kind, workload.name);
            return Ok(false);
        }
    }
    Ok(true)
}

/// Component specific part of a reconcile pass
#[async_trait]
pub trait ComponentReconciler: ComponentResource {
    /// Workloads that must be ready for the component to be ready
    fn workloads(normalized: &NormalizedComponent<Self::Set>) -> Vec<WorkloadRef>;

    /// Converge every generated object of the component
    async fn ensure_resources(
        &self,
        normalized: &NormalizedComponent<Self::Set>,
        ctx: &PassContext<'_>,
    ) -> Result<ReconciliationResult>;
}

/// What a pass decided, returned for the controller and for tests
#[derive(Clone, Debug, PartialEq)]
pub struct PassReport {
    pub action: Action,
    pub status: ReconciliationStatus,
}

impl PassReport {
    pub fn is_ready(&self) -> bool {
        self.status.is_ready()
    }
}

/// Canonical form of a spec, as stored in `lastApplied`
pub fn canonical_spec(value: &serde_json::Value) -> Result<String> {
    let pruned = prune_nulls(value).unwrap_or(serde_json::Value::Null);
    Ok(serde_json::to_string(&pruned)?)
}

/// The stored snapshot matches `spec`; an unreadable snapshot never matches
pub fn spec_unchanged(last_applied: Option<&str>, spec: &str) -> bool {
    match last_applied {
        Some(last) => match diff_serialized(last, spec) {
            Ok(diff) => {
                if !diff.are_equal() {
                    debug!("Spec changed since last applied:\n{}", diff);
                }
                diff.are_equal()
            }
            Err(e) => {
                warn!("Ignoring unreadable lastApplied: {}", e);
                false
            }
        },
        None => false,
    }
}

/// Target of a status write
pub struct StatusTarget<'a> {
    pub api: &'a dyn ClusterApi,
    pub resource: ApiResource,
    pub namespace: &'a str,
    pub name: &'a str,
    /// `.metadata.generation` of the resource being reported on
    pub generation: Option<i64>,
}

impl StatusTarget<'_> {
    async fn write(&self, old: &ReconciliationStatus, new: &ReconciliationStatus) -> Result<()> {
        if old == new {
            debug!("Status of {} {} unchanged", self.resource.kind, self.name);
            return Ok(());
        }
        self.api
            .patch_status(
                &self.resource,
                self.namespace,
                self.name,
                &serde_json::to_value(new)?,
            )
            .await
    }
}

/// Record a validation failure; the resource waits for a spec change
pub async fn report_invalid_spec(
    target: &StatusTarget<'_>,
    old: &ReconciliationStatus,
    violations: &[SpecValidationError],
) -> Result<PassReport> {
    warn!(
        "Invalid spec for {} {}: {}",
        target.resource.kind,
        target.name,
        join_violations(violations)
    );
    let status = ReconciliationStatus {
        conditions: merge_conditions(
            &old.conditions,
            &[not_ready_condition(REASON_INVALID_SPEC, &join_violations(violations))],
            target.generation,
        ),
        last_applied: old.last_applied.clone(),
    };
    target.write(old, &status).await?;
    Ok(PassReport {
        action: Action::await_change(),
        status,
    })
}

/// Turn the outcome of `ensure_resources` into a status write and a requeue
///
/// Errors are caught here: they become `Ready=False/GenericError` and the
/// resource is always requeued.
pub async fn complete_pass(
    target: &StatusTarget<'_>,
    old: &ReconciliationStatus,
    spec: String,
    outcome: Result<ReconciliationResult>,
    requeue: &RequeuePolicy,
) -> Result<PassReport> {
    let (status, action) = match outcome {
        Ok(result) => {
            let last_applied = if result.reschedule || result.skip_last_applied_update {
                old.last_applied.clone()
            } else {
                Some(result.override_last_applied.unwrap_or(spec))
            };
            let action = if result.reschedule {
                Action::requeue(requeue.dependency)
            } else {
                Action::requeue(requeue.steady)
            };
            (
                ReconciliationStatus {
                    conditions: merge_conditions(
                        &old.conditions,
                        &result.conditions,
                        target.generation,
                    ),
                    last_applied,
                },
                action,
            )
        }
        Err(e) => {
            error!(
                "Reconciliation of {} {} failed: {}",
                target.resource.kind, target.name, e
            );
            #[cfg(feature = "metrics")]
            super::metrics::inc_reconcile_error(&target.resource.kind.to_lowercase(), e.metric_label());
            (
                ReconciliationStatus {
                    conditions: merge_conditions(
                        &old.conditions,
                        &[not_ready_condition(REASON_GENERIC_ERROR, &e.to_string())],
                        target.generation,
                    ),
                    last_applied: old.last_applied.clone(),
                },
                Action::requeue(requeue.error),
            )
        }
    };

    target.write(old, &status).await?;
    Ok(PassReport { action, status })
}

/// One reconcile pass of a component resource
pub async fn reconcile_pass<C: ComponentReconciler>(
    obj: &C,
    api: &dyn ClusterApi,
    collaborators: &Collaborators,
    requeue: &RequeuePolicy,
) -> Result<PassReport> {
    let namespace = obj
        .namespace()
        .ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
    let name = obj.name_any();
    let target = StatusTarget {
        api,
        resource: ApiResource::erase::<C>(&()),
        namespace: &namespace,
        name: &name,
        generation: obj.meta().generation,
    };
    let old = obj.status().cloned().unwrap_or_default();
    let spec_value = obj.spec_value()?;
    let spec = canonical_spec(&spec_value)?;

    let normalized = match normalize_component(obj) {
        Ok(normalized) => normalized,
        Err(e) => return complete_pass(&target, &old, spec, Err(e), requeue).await,
    };

    let mut violations = validate_component(C::COMPONENT, &normalized.global, &normalized.sets);
    violations.extend(
        collaborators
            .validator
            .validate(Some(C::COMPONENT), &spec_value),
    );
    if !violations.is_empty() {
        return report_invalid_spec(&target, &old, &violations).await;
    }

    let ctx = PassContext {
        patcher: ResourcePatcher::new(api, namespace.clone(), owner_reference(obj)),
        endpoints: ClusterEndpoints::new(&normalized.global, &namespace),
    };

    // Ready can be trusted when nothing changed and the workloads still are
    let trusted = old.is_ready()
        && spec_unchanged(old.last_applied.as_deref(), &spec)
        && match workloads_ready(&ctx.patcher, &C::workloads(&normalized)).await {
            Ok(ready) => ready,
            Err(e) => {
                warn!("Could not read workloads of {} {}, converging: {}", C::COMPONENT, name, e);
                false
            }
        };

    let outcome = if trusted {
        debug!("{} {} unchanged and ready", C::COMPONENT, name);
        Ok(ReconciliationResult::ready(&format!("{} is ready", C::COMPONENT)))
    } else {
        obj.ensure_resources(&normalized, &ctx).await
    };

    complete_pass(&target, &old, spec, outcome, requeue).await
}

/// kube-runtime entry point for every component controller
#[instrument(skip(obj, ctx), fields(component = %C::COMPONENT, name = %obj.name_any(), namespace = ?obj.namespace()))]
pub async fn reconcile_component<C: ComponentReconciler>(
    obj: Arc<C>,
    ctx: Arc<ControllerState>,
) -> Result<Action> {
    if !ctx.is_leader() {
        debug!("Not the leader, skipping");
        return Ok(Action::requeue(ctx.requeue.dependency));
    }

    let started = std::time::Instant::now();
    let report = reconcile_pass(obj.as_ref(), ctx.api.as_ref(), &ctx.collaborators, &ctx.requeue).await;

    #[cfg(feature = "metrics")]
    {
        let controller = C::COMPONENT.to_string().to_lowercase();
        super::metrics::observe_reconcile_duration_seconds(&controller, started.elapsed().as_secs_f64());
        if let Ok(report) = &report {
            super::metrics::set_resource_ready(
                &controller,
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

/// Called when a pass itself failed (status could not be written)
pub fn error_policy<K: Resource<DynamicType = ()>>(
    obj: Arc<K>,
    error: &Error,
    ctx: Arc<ControllerState>,
) -> Action {
    error!("Reconciliation error for {}: {:?}", obj.name_any(), error);

    #[cfg(feature = "metrics")]
    super::metrics::inc_reconcile_error(&K::kind(&()).to_lowercase(), error.metric_label());

    if error.is_retriable() {
        Action::requeue(ctx.requeue.error)
    } else {
        Action::requeue(ctx.requeue.steady)
    }
}

/// Fail fast when a CRD is not installed
pub async fn ensure_crd_installed<K>(api: &Api<K>) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Debug,
    <K as Resource>::DynamicType: Default,
{
    let kind = K::kind(&Default::default()).to_string();
    match api.list(&ListParams::default().limit(1)).await {
        Ok(_) => {
            info!("{} CRD is available", kind);
            Ok(())
        }
        Err(e) => {
            error!("{} CRD not found. Please install the CRDs first: {:?}", kind, e);
            Err(Error::ConfigError(format!("{kind} CRD not installed")))
        }
    }
}

/// Run the controller of one component kind until shutdown
pub async fn run_component_controller<C>(state: Arc<ControllerState>) -> Result<()>
where
    C: ComponentReconciler + Resource<Scope = NamespaceResourceScope>,
{
    let resources: Api<C> = state.api_for();
    ensure_crd_installed(&resources).await?;
    info!("Starting {} controller", C::COMPONENT);

    Controller::new(resources, Config::default())
        .owns::<StatefulSet>(state.api_for(), Config::default())
        .owns::<Deployment>(state.api_for(), Config::default())
        .owns::<Service>(state.api_for(), Config::default())
        .owns::<ConfigMap>(state.api_for(), Config::default())
        .owns::<Job>(state.api_for(), Config::default())
        .shutdown_on_signal()
        .run(reconcile_component::<C>, error_policy::<C>, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("Reconciled: {:?}", obj),
                Err(e) => warn!("Reconcile error: {:?}", e),
            }
        })
        .await;

    Ok(())
}
