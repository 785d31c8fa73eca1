//! Error types for the Pulsar operator

use thiserror::Error;

use crate::crd::SpecValidationError;

/// Errors surfaced by the reconcilers and the resource engine
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// The user supplied spec failed validation
    #[error("Invalid spec: {}", join_violations(.0))]
    InvalidSpec(Vec<SpecValidationError>),

    /// Internally detected contradiction (unknown rack, unknown topology key, ...)
    #[error("Configuration conflict: {0}")]
    ConfigurationConflict(String),

    /// Operator level misconfiguration (missing CRD, bad flags)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A required object does not exist
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Rendering a YAML configuration file failed
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Object without name or namespace
    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),
}

/// Result type for operator operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether the controller should retry quickly
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::KubeError(_) | Error::NotFound { .. } | Error::ConfigurationConflict(_)
        )
    }

    /// Short machine readable category, used as a metrics label
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "kube",
            Error::InvalidSpec(_) => "invalid_spec",
            Error::ConfigurationConflict(_) => "configuration_conflict",
            Error::ConfigError(_) => "config",
            Error::NotFound { .. } => "not_found",
            Error::SerializationError(_) => "serialization",
            Error::YamlError(_) => "yaml",
            Error::MissingObjectKey(_) => "missing_object_key",
        }
    }
}

/// Render violations as one line each: `field: message (value)`
pub fn join_violations(violations: &[SpecValidationError]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_spec_is_not_retriable() {
        let err = Error::InvalidSpec(vec![SpecValidationError::new(
            "spec.broker.replicas",
            "-1",
            "replicas must not be negative",
        )]);
        assert!(!err.is_retriable());
        assert!(err.to_string().contains("spec.broker.replicas"));
    }

    #[test]
    fn test_conflict_is_retriable() {
        let err = Error::ConfigurationConflict("rack r9 is not defined".to_string());
        assert!(err.is_retriable());
        assert_eq!(err.metric_label(), "configuration_conflict");
    }
}
