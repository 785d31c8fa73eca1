//! Idempotent create / patch / delete of generated objects
//!
//! [`ResourcePatcher`] is built once per reconcile pass. It attaches the
//! owner reference, skips patches that would not change anything, replaces
//! immutable objects, and caches the server version for the pass.

use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{ApiResource, DynamicObject};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::cluster_api::{ClusterApi, KubeVersion};
use super::spec_diff::is_subset;
use crate::error::{Error, Result};

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "pulsar-operator";

/// Annotations written by tools other than the operator
const TOOL_ANNOTATIONS: &[&str] = &[
    "kubectl.kubernetes.io/last-applied-configuration",
    "deployment.kubernetes.io/revision",
];
const TOOL_ANNOTATION_PREFIXES: &[&str] = &["meta.helm.sh/"];

/// Objects without a namespace never get an owner reference
const CLUSTER_SCOPED_KINDS: &[&str] = &["StorageClass", "ClusterRole", "ClusterRoleBinding"];

/// What the patcher did with one object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Created,
    Patched,
    Unchanged,
    Replaced,
    Deleted,
    Skipped,
}

/// Per pass facts fetched lazily from the API server
#[derive(Default)]
pub struct ApplyContext {
    version: OnceCell<KubeVersion>,
}

impl ApplyContext {
    pub async fn kubernetes_version(&self, api: &dyn ClusterApi) -> Result<KubeVersion> {
        self.version
            .get_or_try_init(|| api.kubernetes_version())
            .await
            .copied()
    }
}

/// Remove annotations owned by other tools, in place
pub fn strip_tool_annotations(object: &mut DynamicObject) {
    if let Some(annotations) = object.metadata.annotations.as_mut() {
        annotations.retain(|key, _| {
            !TOOL_ANNOTATIONS.contains(&key.as_str())
                && !TOOL_ANNOTATION_PREFIXES.iter().any(|p| key.starts_with(p))
        });
        if annotations.is_empty() {
            object.metadata.annotations = None;
        }
    }
}

pub fn to_dynamic<K: Serialize>(object: &K) -> Result<DynamicObject> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

pub fn from_dynamic<K: DeserializeOwned>(object: DynamicObject) -> Result<K> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

fn pdb_v1beta1() -> ApiResource {
    ApiResource {
        group: "policy".to_string(),
        version: "v1beta1".to_string(),
        api_version: "policy/v1beta1".to_string(),
        kind: "PodDisruptionBudget".to_string(),
        plural: "poddisruptionbudgets".to_string(),
    }
}

pub struct ResourcePatcher<'a> {
    api: &'a dyn ClusterApi,
    namespace: String,
    owner: OwnerReference,
    context: ApplyContext,
}

impl<'a> ResourcePatcher<'a> {
    pub fn new(api: &'a dyn ClusterApi, namespace: impl Into<String>, owner: OwnerReference) -> Self {
        Self {
            api,
            namespace: namespace.into(),
            owner,
            context: ApplyContext::default(),
        }
    }

    pub fn api(&self) -> &'a dyn ClusterApi {
        self.api
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub async fn kubernetes_version(&self) -> Result<KubeVersion> {
        self.context.kubernetes_version(self.api).await
    }

    /// Read a namespaced object of a typed kind
    pub async fn get<K>(&self, name: &str) -> Result<Option<DynamicObject>>
    where
        K: Resource<DynamicType = ()>,
    {
        let resource = ApiResource::erase::<K>(&());
        let mut object = self
            .api
            .get_optional(&resource, Some(&self.namespace), name)
            .await?;
        if let Some(object) = object.as_mut() {
            strip_tool_annotations(object);
        }
        Ok(object)
    }

    /// Converge a typed object: create, patch, delete or leave it
    ///
    /// `enabled = false` deletes the object when it exists.
    pub async fn apply<K>(&self, desired: &K, enabled: bool) -> Result<ApplyOutcome>
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let resource = ApiResource::erase::<K>(&());
        self.apply_dynamic(&resource, to_dynamic(desired)?, enabled)
            .await
    }

    /// PodDisruptionBudget, falling back to `policy/v1beta1` before 1.21
    pub async fn apply_pdb(&self, desired: &PodDisruptionBudget, enabled: bool) -> Result<ApplyOutcome> {
        if self.kubernetes_version().await?.at_least(1, 21) {
            return self.apply(desired, enabled).await;
        }
        let resource = pdb_v1beta1();
        let mut object = to_dynamic(desired)?;
        if let Some(types) = object.types.as_mut() {
            types.api_version = resource.api_version.clone();
        }
        self.apply_dynamic(&resource, object, enabled).await
    }

    pub async fn apply_dynamic(
        &self,
        resource: &ApiResource,
        mut desired: DynamicObject,
        enabled: bool,
    ) -> Result<ApplyOutcome> {
        let name = desired
            .metadata
            .name
            .clone()
            .ok_or(Error::MissingObjectKey(".metadata.name"))?;
        let namespace = self.scope_of(resource, &mut desired);

        let current = self
            .api
            .get_optional(resource, namespace.as_deref(), &name)
            .await?;

        match (current, enabled) {
            (None, false) => {
                debug!("{} {} disabled and absent, skipping", resource.kind, name);
                Ok(ApplyOutcome::Skipped)
            }
            (Some(_), false) => {
                info!("Deleting disabled {} {}", resource.kind, name);
                self.api
                    .delete_background(resource, namespace.as_deref(), &name)
                    .await?;
                Ok(ApplyOutcome::Deleted)
            }
            (None, true) => {
                info!("Creating {} {}", resource.kind, name);
                self.api.create(resource, &desired).await?;
                Ok(ApplyOutcome::Created)
            }
            (Some(mut current), true) => {
                strip_tool_annotations(&mut current);
                if is_subset(&serde_json::to_value(&desired)?, &serde_json::to_value(&current)?) {
                    debug!("{} {} up to date", resource.kind, name);
                    return Ok(ApplyOutcome::Unchanged);
                }
                info!("Patching {} {}", resource.kind, name);
                self.api.patch(resource, &desired).await?;
                Ok(ApplyOutcome::Patched)
            }
        }
    }

    /// Replace an object whose spec cannot be patched (Jobs)
    ///
    /// The current object is deleted with background propagation, then the
    /// desired one is created when enabled.
    pub async fn replace_immutable<K>(&self, desired: &K, enabled: bool) -> Result<ApplyOutcome>
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let resource = ApiResource::erase::<K>(&());
        let mut desired = to_dynamic(desired)?;
        let name = desired
            .metadata
            .name
            .clone()
            .ok_or(Error::MissingObjectKey(".metadata.name"))?;
        let namespace = self.scope_of(&resource, &mut desired);

        let existed = self
            .api
            .get_optional(&resource, namespace.as_deref(), &name)
            .await?
            .is_some();
        if existed {
            info!("Deleting immutable {} {} before recreation", resource.kind, name);
            self.api
                .delete_background(&resource, namespace.as_deref(), &name)
                .await?;
        }
        if !enabled {
            return Ok(if existed {
                ApplyOutcome::Deleted
            } else {
                ApplyOutcome::Skipped
            });
        }
        info!("Creating {} {}", resource.kind, name);
        self.api.create(&resource, &desired).await?;
        Ok(if existed {
            ApplyOutcome::Replaced
        } else {
            ApplyOutcome::Created
        })
    }

    /// Namespace of the object; attaches the owner to namespaced objects
    fn scope_of(&self, resource: &ApiResource, object: &mut DynamicObject) -> Option<String> {
        if CLUSTER_SCOPED_KINDS.contains(&resource.kind.as_str()) {
            object.metadata.namespace = None;
            return None;
        }
        object.metadata.owner_references = Some(vec![self.owner.clone()]);
        Some(
            object
                .metadata
                .namespace
                .get_or_insert_with(|| self.namespace.clone())
                .clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::batch::v1::Job;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::api::storage::v1::StorageClass;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::*;
    use crate::controller::cluster_api::testing::{FakeClusterApi, WriteOp};

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: "pulsar.k8s.io/v1alpha1".to_string(),
            kind: "Broker".to_string(),
            name: "pulsar-broker".to_string(),
            uid: "uid-1".to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    fn config_map(value: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some("pulsar-broker".to_string()),
                namespace: Some("ns".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("k".to_string(), value.to_string())])),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_then_noop_then_patch() {
        let api = FakeClusterApi::default();
        let patcher = ResourcePatcher::new(&api, "ns", owner());

        assert_eq!(patcher.apply(&config_map("a"), true).await.unwrap(), ApplyOutcome::Created);
        assert_eq!(patcher.apply(&config_map("a"), true).await.unwrap(), ApplyOutcome::Unchanged);
        assert_eq!(patcher.apply(&config_map("b"), true).await.unwrap(), ApplyOutcome::Patched);

        let ops: Vec<_> = api.writes().into_iter().map(|w| w.op).collect();
        assert_eq!(ops, vec![WriteOp::Create, WriteOp::Patch]);

        let stored = api.get("ConfigMap", Some("ns"), "pulsar-broker").unwrap();
        assert_eq!(stored.metadata.owner_references.unwrap()[0].uid, "uid-1");
    }

    #[tokio::test]
    async fn test_disabled_absent_is_skipped_and_present_is_deleted() {
        let api = FakeClusterApi::default();
        let patcher = ResourcePatcher::new(&api, "ns", owner());

        assert_eq!(patcher.apply(&config_map("a"), false).await.unwrap(), ApplyOutcome::Skipped);
        assert!(api.writes().is_empty());

        patcher.apply(&config_map("a"), true).await.unwrap();
        assert_eq!(patcher.apply(&config_map("a"), false).await.unwrap(), ApplyOutcome::Deleted);
        assert!(api.get("ConfigMap", Some("ns"), "pulsar-broker").is_none());
    }

    #[tokio::test]
    async fn test_tool_annotations_do_not_trigger_patch() {
        let api = FakeClusterApi::default();
        let patcher = ResourcePatcher::new(&api, "ns", owner());
        patcher.apply(&config_map("a"), true).await.unwrap();

        let mut stored = api.get("ConfigMap", Some("ns"), "pulsar-broker").unwrap();
        stored.metadata.annotations = Some(BTreeMap::from([(
            "meta.helm.sh/release-name".to_string(),
            "pulsar".to_string(),
        )]));
        api.insert("ConfigMap", stored);
        api.clear_writes();

        assert_eq!(patcher.apply(&config_map("a"), true).await.unwrap(), ApplyOutcome::Unchanged);
        let read = patcher.get::<ConfigMap>("pulsar-broker").await.unwrap().unwrap();
        assert!(read.metadata.annotations.is_none());
    }

    #[tokio::test]
    async fn test_immutable_job_is_deleted_then_created() {
        let api = FakeClusterApi::default();
        let patcher = ResourcePatcher::new(&api, "ns", owner());
        let job = Job {
            metadata: ObjectMeta {
                name: Some("pulsar-zookeeper-metadata".to_string()),
                namespace: Some("ns".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        assert_eq!(patcher.replace_immutable(&job, true).await.unwrap(), ApplyOutcome::Created);
        api.clear_writes();
        assert_eq!(patcher.replace_immutable(&job, true).await.unwrap(), ApplyOutcome::Replaced);

        let ops: Vec<_> = api.writes().into_iter().map(|w| w.op).collect();
        assert_eq!(ops, vec![WriteOp::Delete, WriteOp::Create]);
    }

    #[tokio::test]
    async fn test_cluster_scoped_objects_have_no_owner() {
        let api = FakeClusterApi::default();
        let patcher = ResourcePatcher::new(&api, "ns", owner());
        let class = StorageClass {
            metadata: ObjectMeta {
                name: Some("pulsar-bookkeeper-journal".to_string()),
                ..Default::default()
            },
            provisioner: "ebs.csi.aws.com".to_string(),
            ..Default::default()
        };
        patcher.apply(&class, true).await.unwrap();
        let stored = api.get("StorageClass", None, "pulsar-bookkeeper-journal").unwrap();
        assert!(stored.metadata.owner_references.is_none());
    }

    #[tokio::test]
    async fn test_pdb_api_version_follows_server() {
        use crate::controller::cluster_api::KubeVersion;
        use k8s_openapi::api::policy::v1::PodDisruptionBudget;

        let pdb = PodDisruptionBudget {
            metadata: ObjectMeta {
                name: Some("pulsar-broker".to_string()),
                namespace: Some("ns".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let old = FakeClusterApi::with_version(KubeVersion::new(1, 20));
        ResourcePatcher::new(&old, "ns", owner())
            .apply_pdb(&pdb, true)
            .await
            .unwrap();
        let stored = old.get("PodDisruptionBudget", Some("ns"), "pulsar-broker").unwrap();
        assert_eq!(stored.types.unwrap().api_version, "policy/v1beta1");

        let new = FakeClusterApi::default();
        ResourcePatcher::new(&new, "ns", owner())
            .apply_pdb(&pdb, true)
            .await
            .unwrap();
        let stored = new.get("PodDisruptionBudget", Some("ns"), "pulsar-broker").unwrap();
        assert_eq!(stored.types.unwrap().api_version, "policy/v1");
    }
}
