//! Capabilities the reconcilers consume but do not implement
//!
//! Certificate issuance, secret provisioning and the autoscaler daemons live
//! outside the operator. The defaults log what they would have done and
//! succeed.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::crd::{AuthConfig, ComponentKind, PulsarClusterSpec, SpecValidationError};
use crate::error::Result;

/// Extra validation rules, run after the built-in ones
pub trait SpecValidator: Send + Sync {
    /// `component` is `None` for the cluster resource
    fn validate(&self, component: Option<ComponentKind>, spec: &Value) -> Vec<SpecValidationError>;
}

#[async_trait]
pub trait CertificateProvisioner: Send + Sync {
    async fn ensure_certificates(&self, namespace: &str, spec: &PulsarClusterSpec) -> Result<()>;
}

#[async_trait]
pub trait SecretGenerator: Send + Sync {
    async fn generate_secrets_if_absent(&self, namespace: &str, auth: &AuthConfig) -> Result<()>;
}

#[async_trait]
pub trait AutoscalerHooks: Send + Sync {
    /// Called after a successful pass that changed the cluster spec
    async fn on_spec_change(
        &self,
        component: ComponentKind,
        namespace: &str,
        spec: &PulsarClusterSpec,
    ) -> Result<()>;
}

/// Default implementation of every collaborator
#[derive(Clone, Copy, Debug, Default)]
pub struct Noop;

impl SpecValidator for Noop {
    fn validate(&self, _component: Option<ComponentKind>, _spec: &Value) -> Vec<SpecValidationError> {
        Vec::new()
    }
}

#[async_trait]
impl CertificateProvisioner for Noop {
    async fn ensure_certificates(&self, namespace: &str, spec: &PulsarClusterSpec) -> Result<()> {
        debug!(
            "TLS enabled for {}/{}, certificates are expected to be provisioned externally",
            namespace, spec.global.name
        );
        Ok(())
    }
}

#[async_trait]
impl SecretGenerator for Noop {
    async fn generate_secrets_if_absent(&self, namespace: &str, _auth: &AuthConfig) -> Result<()> {
        debug!("Auth enabled in {}, secrets are expected to exist", namespace);
        Ok(())
    }
}

#[async_trait]
impl AutoscalerHooks for Noop {
    async fn on_spec_change(
        &self,
        component: ComponentKind,
        namespace: &str,
        _spec: &PulsarClusterSpec,
    ) -> Result<()> {
        debug!("No autoscaler registered for {} in {}", component, namespace);
        Ok(())
    }
}

#[derive(Clone)]
pub struct Collaborators {
    pub validator: Arc<dyn SpecValidator>,
    pub certificates: Arc<dyn CertificateProvisioner>,
    pub secrets: Arc<dyn SecretGenerator>,
    pub autoscalers: Arc<dyn AutoscalerHooks>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            validator: Arc::new(Noop),
            certificates: Arc::new(Noop),
            secrets: Arc::new(Noop),
            autoscalers: Arc::new(Noop),
        }
    }
}
