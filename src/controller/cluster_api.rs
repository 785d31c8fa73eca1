//! Narrow view of the Kubernetes API used by the reconcilers
//!
//! Every read and write the reconcilers perform goes through [`ClusterApi`],
//! on [`DynamicObject`]s described by an [`ApiResource`]. The production
//! implementation wraps a [`kube::Client`]; tests use the in-memory
//! [`testing::FakeClusterApi`].

use async_trait::async_trait;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, Patch, PatchParams, PostParams,
};
use kube::Client;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::error::{Error, Result};

/// Kubernetes server version as `(major, minor)`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct KubeVersion {
    pub major: u32,
    pub minor: u32,
}

impl KubeVersion {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Parse the `major`/`minor` strings reported by `/version`
    ///
    /// Managed offerings append suffixes such as `27+`, which are ignored.
    pub fn parse(major: &str, minor: &str) -> Result<Self> {
        let number = |s: &str| -> Result<u32> {
            let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits
                .parse()
                .map_err(|_| Error::ConfigError(format!("unparsable server version {major}.{minor}")))
        };
        Ok(Self::new(number(major)?, number(minor)?))
    }

    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        *self >= KubeVersion::new(major, minor)
    }
}

#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch an object; absence is `Ok(None)`
    async fn get_optional(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>>;

    /// Fetch an object that must exist
    async fn get_required(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject> {
        self.get_optional(resource, namespace, name)
            .await?
            .ok_or_else(|| Error::NotFound {
                kind: resource.kind.clone(),
                namespace: namespace.unwrap_or_default().to_string(),
                name: name.to_string(),
            })
    }

    async fn create(&self, resource: &ApiResource, object: &DynamicObject)
        -> Result<DynamicObject>;

    /// Server-side apply with forced ownership
    async fn patch(&self, resource: &ApiResource, object: &DynamicObject)
        -> Result<DynamicObject>;

    /// Delete with background propagation; a missing object is not an error
    async fn delete_background(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<()>;

    /// Replace the status subresource of a custom resource
    async fn patch_status(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        status: &Value,
    ) -> Result<()>;

    async fn kubernetes_version(&self) -> Result<KubeVersion>;
}

/// [`ClusterApi`] backed by the API server
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
    field_manager: String,
    dry_run: bool,
}

impl KubeClusterApi {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
            dry_run: false,
        }
    }

    /// Send every write with `dryRun=All`
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn api(&self, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, resource),
            None => Api::all_with(self.client.clone(), resource),
        }
    }

    fn patch_params(&self) -> PatchParams {
        let params = PatchParams::apply(&self.field_manager).force();
        if self.dry_run {
            params.dry_run()
        } else {
            params
        }
    }
}

fn object_name(object: &DynamicObject) -> Result<&str> {
    object
        .metadata
        .name
        .as_deref()
        .ok_or(Error::MissingObjectKey(".metadata.name"))
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_optional(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        Ok(self.api(resource, namespace).get_opt(name).await?)
    }

    #[instrument(skip(self, object), fields(kind = %resource.kind, name = ?object.metadata.name))]
    async fn create(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        let params = PostParams {
            dry_run: self.dry_run,
            field_manager: Some(self.field_manager.clone()),
        };
        let api = self.api(resource, object.metadata.namespace.as_deref());
        Ok(api.create(&params, object).await?)
    }

    #[instrument(skip(self, object), fields(kind = %resource.kind, name = ?object.metadata.name))]
    async fn patch(
        &self,
        resource: &ApiResource,
        object: &DynamicObject,
    ) -> Result<DynamicObject> {
        let name = object_name(object)?;
        let api = self.api(resource, object.metadata.namespace.as_deref());
        Ok(api
            .patch(name, &self.patch_params(), &Patch::Apply(object))
            .await?)
    }

    #[instrument(skip(self), fields(kind = %resource.kind))]
    async fn delete_background(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<()> {
        let params = DeleteParams {
            dry_run: self.dry_run,
            ..DeleteParams::background()
        };
        match self.api(resource, namespace).delete(name, &params).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!("{} {} already gone", resource.kind, name);
                Ok(())
            }
            Err(e) => Err(Error::KubeError(e)),
        }
    }

    async fn patch_status(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        status: &Value,
    ) -> Result<()> {
        let mut params = PatchParams::default();
        params.dry_run = self.dry_run;
        let patch = json!({ "status": status });
        self.api(resource, Some(namespace))
            .patch_status(name, &params, &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn kubernetes_version(&self) -> Result<KubeVersion> {
        let info = self.client.apiserver_version().await?;
        KubeVersion::parse(&info.major, &info.minor)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_with_suffix() {
        let v = KubeVersion::parse("1", "27+").unwrap();
        assert_eq!(v, KubeVersion::new(1, 27));
        assert!(v.at_least(1, 21));
        assert!(!KubeVersion::new(1, 20).at_least(1, 21));
        assert!(KubeVersion::parse("x", "1").is_err());
    }
}
