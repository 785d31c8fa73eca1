//! Built-in spec validation
//!
//! Runs on the normalized spec. Every violation names the field path and the
//! offending value so the Ready condition can be acted upon directly.

use std::collections::BTreeMap;

use super::component::{ResolvedSet, WorkloadSetSpec};
use super::types::{ComponentKind, GlobalSpec, PodTemplateConfig};

/// Structured validation error
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecValidationError {
    pub field: String,
    pub value: String,
    pub message: String,
}

impl SpecValidationError {
    pub fn new(
        field: impl Into<String>,
        value: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SpecValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} (value: {})", self.field, self.message, self.value)
    }
}

/// Lowercase RFC 1123 label: alphanumerics and '-', alphanumeric at both ends
pub fn is_dns_label(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 63
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !value.starts_with('-')
        && !value.ends_with('-')
}

pub fn validate_global(global: &GlobalSpec) -> Vec<SpecValidationError> {
    let mut errors = Vec::new();

    if !is_dns_label(&global.name) {
        errors.push(SpecValidationError::new(
            "spec.global.name",
            &global.name,
            "must be a lowercase RFC 1123 label",
        ));
    }

    if let Some(resource_sets) = &global.resource_sets {
        for name in resource_sets.keys() {
            if !is_dns_label(name) {
                errors.push(SpecValidationError::new(
                    format!("spec.global.resourceSets.{name}"),
                    name,
                    "resource set names must be lowercase RFC 1123 labels",
                ));
            }
        }
    }

    errors
}

fn validate_pod(field: &str, pod: &PodTemplateConfig, errors: &mut Vec<SpecValidationError>) {
    if let Some(replicas) = pod.replicas {
        if replicas < 0 {
            errors.push(SpecValidationError::new(
                format!("{field}.replicas"),
                replicas.to_string(),
                "replicas must not be negative",
            ));
        }
    }

    if let Some(pdb) = &pod.pdb {
        if let Some(max_unavailable) = pdb.max_unavailable {
            if max_unavailable < 1 {
                errors.push(SpecValidationError::new(
                    format!("{field}.pdb.maxUnavailable"),
                    max_unavailable.to_string(),
                    "maxUnavailable must be at least 1",
                ));
            }
        }
    }

    if let Some(config) = &pod.config {
        for (key, value) in config {
            let scalar = matches!(
                value,
                serde_json::Value::String(_)
                    | serde_json::Value::Number(_)
                    | serde_json::Value::Bool(_)
            );
            if !scalar {
                errors.push(SpecValidationError::new(
                    format!("{field}.config.{key}"),
                    value.to_string(),
                    "config values must be strings, numbers or booleans",
                ));
            }
        }
    }

    if let Some(policy) = &pod.image_pull_policy {
        if !matches!(policy.as_str(), "Always" | "IfNotPresent" | "Never") {
            errors.push(SpecValidationError::new(
                format!("{field}.imagePullPolicy"),
                policy,
                "must be one of Always, IfNotPresent, Never",
            ));
        }
    }
}

/// Validate the resolved groups of one component
pub fn validate_component<S: WorkloadSetSpec>(
    component: ComponentKind,
    global: &GlobalSpec,
    sets: &[ResolvedSet<S>],
) -> Vec<SpecValidationError> {
    let mut errors = validate_global(global);
    let declared: BTreeMap<String, ()> = global
        .resource_sets
        .as_ref()
        .map(|sets| sets.keys().map(|k| (k.clone(), ())).collect())
        .unwrap_or_default();

    for set in sets {
        let field = match &set.name {
            Some(name) => format!("spec.{}.sets.{}", component.spec_field(), name),
            None => format!("spec.{}", component.spec_field()),
        };

        if let Some(name) = &set.name {
            if !declared.contains_key(name) {
                errors.push(SpecValidationError::new(
                    &field,
                    name,
                    "set is not declared in spec.global.resourceSets",
                ));
            }
        }

        validate_pod(&field, set.spec.pod(), &mut errors);

        if let Some(autoscaler) = set.spec.autoscaler() {
            if let (Some(min), Some(max)) = (autoscaler.min, autoscaler.max) {
                if min > max {
                    errors.push(SpecValidationError::new(
                        format!("{field}.autoscaler.min"),
                        min.to_string(),
                        "autoscaler.min must be <= autoscaler.max",
                    ));
                }
            }
        }
    }

    errors
}
