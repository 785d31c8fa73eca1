//! Default values and spec normalization
//!
//! Normalization is pure: every function returns a new value and never
//! touches the custom resource it was given. Layers are merged as JSON,
//! later layers win, `null` in a later layer never clears an earlier value.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::component::{ComponentResource, ResolvedSet, WorkloadSetSpec};
use super::types::{AntiAffinityConfig, GlobalSpec, PodTemplateConfig, RackConfig};
use crate::error::Result;

pub const DEFAULT_IMAGE: &str = "apachepulsar/pulsar:3.0.0";
pub const DEFAULT_IMAGE_PULL_POLICY: &str = "IfNotPresent";

/// Deep-merge `overlay` into `base`
///
/// Objects merge key by key, anything else (arrays included) is replaced.
pub fn merge_json(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Merge serializable layers, lowest precedence first
pub fn merge_layers<T: Serialize + DeserializeOwned>(layers: &[&T]) -> Result<T> {
    let mut merged = Value::Object(Default::default());
    for layer in layers {
        merge_json(&mut merged, &serde_json::to_value(layer)?);
    }
    Ok(serde_json::from_value(merged)?)
}

/// Global spec with every operator default filled in
pub fn normalize_global(global: &GlobalSpec) -> Result<GlobalSpec> {
    let defaults = GlobalSpec {
        name: String::new(),
        image: Some(DEFAULT_IMAGE.to_string()),
        image_pull_policy: Some(DEFAULT_IMAGE_PULL_POLICY.to_string()),
        persistence: Some(true),
        restart_on_config_map_change: Some(false),
        cluster_domain: Some("cluster.local".to_string()),
        anti_affinity: Some(AntiAffinityConfig::defaults()),
        ..Default::default()
    };
    let mut normalized = merge_layers(&[&defaults, global])?;

    if let Some(racks) = &global.racks {
        let rack_defaults = RackConfig::defaults();
        let mut resolved = BTreeMap::new();
        for (name, rack) in racks {
            resolved.insert(name.clone(), merge_layers(&[&rack_defaults, rack])?);
        }
        normalized.racks = Some(resolved);
    }

    Ok(normalized)
}

/// Pod settings a component inherits from the global spec
fn pod_defaults_from_global(global: &GlobalSpec) -> PodTemplateConfig {
    PodTemplateConfig {
        image: global.image.clone(),
        image_pull_policy: global.image_pull_policy.clone(),
        node_selectors: global.node_selectors.clone(),
        anti_affinity: global.anti_affinity.clone(),
        restart_on_config_map_change: global.restart_on_config_map_change,
        dns_config: global.dns_config.clone(),
        priority_class_name: global.priority_class_name.clone(),
        ..Default::default()
    }
}

/// Normalized view of a component resource
#[derive(Clone, Debug)]
pub struct NormalizedComponent<S> {
    pub global: GlobalSpec,
    pub base: S,
    pub sets: Vec<ResolvedSet<S>>,
}

/// Merge component defaults, global defaults and the user's values, then
/// expand resource sets
///
/// Without a `sets` map the component is a single group with `name: None`.
pub fn normalize_component<C: ComponentResource>(
    resource: &C,
) -> Result<NormalizedComponent<C::Set>> {
    let global = normalize_global(resource.global())?;

    let component_defaults = serde_json::to_value(C::component_defaults())?;
    let inherited = serde_json::to_value(pod_defaults_from_global(&global))?;

    let mut base_value = component_defaults;
    merge_json(&mut base_value, &inherited);
    if let Some(user) = resource.base() {
        merge_json(&mut base_value, &serde_json::to_value(user)?);
    }
    let base: C::Set = serde_json::from_value(base_value.clone())?;

    let sets = match resource.sets() {
        Some(sets) if !sets.is_empty() => {
            let mut resolved = Vec::with_capacity(sets.len());
            for (name, overrides) in sets {
                let mut set_value = base_value.clone();
                merge_json(&mut set_value, &serde_json::to_value(overrides)?);
                resolved.push(ResolvedSet {
                    name: Some(name.clone()),
                    spec: serde_json::from_value(set_value)?,
                });
            }
            resolved
        }
        _ => vec![ResolvedSet {
            name: None,
            spec: base.clone(),
        }],
    };

    Ok(NormalizedComponent { global, base, sets })
}

impl<S: WorkloadSetSpec> NormalizedComponent<S> {
    /// At least one group has replicas
    pub fn any_enabled(&self) -> bool {
        self.sets.iter().any(|s| s.spec.is_enabled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_json_overlay_wins_and_null_keeps_base() {
        let mut base = json!({"a": 1, "b": {"c": 2, "d": 3}, "e": [1, 2]});
        merge_json(&mut base, &json!({"a": null, "b": {"c": 5}, "e": [9]}));
        assert_eq!(base, json!({"a": 1, "b": {"c": 5, "d": 3}, "e": [9]}));
    }

    #[test]
    fn test_normalize_global_fills_anti_affinity_defaults() {
        let global = GlobalSpec {
            name: "pulsar".to_string(),
            anti_affinity: Some(AntiAffinityConfig {
                zone: Some(crate::crd::AntiAffinityTypeConfig {
                    enabled: Some(true),
                    required: None,
                }),
                host: None,
            }),
            ..Default::default()
        };

        let normalized = normalize_global(&global).unwrap();
        let aa = normalized.anti_affinity.unwrap();
        assert_eq!(aa.host.as_ref().unwrap().enabled, Some(true));
        assert_eq!(aa.host.as_ref().unwrap().required, Some(true));
        assert_eq!(aa.zone.as_ref().unwrap().enabled, Some(true));
        assert_eq!(aa.zone.as_ref().unwrap().required, Some(false));
        assert_eq!(normalized.image.as_deref(), Some(DEFAULT_IMAGE));
    }

    #[test]
    fn test_normalize_global_fills_rack_defaults() {
        let global = GlobalSpec {
            name: "pulsar".to_string(),
            racks: Some(BTreeMap::from([(
                "rack1".to_string(),
                RackConfig {
                    host: Some(crate::crd::HostRackConfig {
                        enabled: Some(true),
                        ..Default::default()
                    }),
                    zone: None,
                },
            )])),
            ..Default::default()
        };

        let normalized = normalize_global(&global).unwrap();
        let rack = &normalized.racks.unwrap()["rack1"];
        let host = rack.host.as_ref().unwrap();
        assert_eq!(host.enabled, Some(true));
        assert_eq!(host.require_rack_anti_affinity, Some(true));
        assert_eq!(host.enable_host_anti_affinity, Some(true));
        assert_eq!(rack.zone.as_ref().unwrap().enabled, Some(false));
    }
}
