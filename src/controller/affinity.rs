//! Pod placement planning
//!
//! Turns the anti-affinity settings of a component set, or the rack the set
//! is pinned to, into a Kubernetes [`Affinity`]. Rack placement takes
//! precedence: when a set names a rack, its plain anti-affinity settings are
//! ignored.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, NodeAffinity, PodAffinity, PodAffinityTerm, PodAntiAffinity,
    WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};

use super::resources::{LABEL_CLUSTER, LABEL_RACK};
use crate::crd::{AntiAffinityConfig, AntiAffinityTypeConfig, RackConfig};
use crate::error::{Error, Result};

pub const HOST_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";
pub const ZONE_TOPOLOGY_KEY: &str = "topology.kubernetes.io/zone";

/// Weight of every preferred scheduling term
pub const PREFERRED_WEIGHT: i32 = 100;

/// Placement domains; the settings name them as the `host` and `zone` fields
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopologyDomain {
    Host,
    Zone,
}

impl TopologyDomain {
    pub fn key(&self) -> &'static str {
        match self {
            TopologyDomain::Host => HOST_TOPOLOGY_KEY,
            TopologyDomain::Zone => ZONE_TOPOLOGY_KEY,
        }
    }
}

/// Everything the planner needs to know about one component set
#[derive(Clone, Debug)]
pub struct AffinityInput<'a> {
    pub cluster: &'a str,
    /// Effective anti-affinity (component value merged over the global one)
    pub anti_affinity: Option<&'a AntiAffinityConfig>,
    pub racks: Option<&'a BTreeMap<String, RackConfig>>,
    /// Rack the resource set is pinned to
    pub rack: Option<&'a str>,
    /// Labels selecting the pods of this set
    pub match_labels: &'a BTreeMap<String, String>,
    pub node_affinity: Option<&'a NodeAffinity>,
}

#[derive(Default)]
struct Terms {
    required: Vec<PodAffinityTerm>,
    preferred: Vec<WeightedPodAffinityTerm>,
}

impl Terms {
    fn push(&mut self, term: PodAffinityTerm, required: bool) {
        if required {
            self.required.push(term);
        } else {
            self.preferred.push(WeightedPodAffinityTerm {
                pod_affinity_term: term,
                weight: PREFERRED_WEIGHT,
            });
        }
    }

    fn is_empty(&self) -> bool {
        self.required.is_empty() && self.preferred.is_empty()
    }

    fn into_parts(
        self,
    ) -> (
        Option<Vec<PodAffinityTerm>>,
        Option<Vec<WeightedPodAffinityTerm>>,
    ) {
        (
            (!self.required.is_empty()).then_some(self.required),
            (!self.preferred.is_empty()).then_some(self.preferred),
        )
    }
}

fn term(selector: LabelSelector, domain: TopologyDomain) -> PodAffinityTerm {
    PodAffinityTerm {
        label_selector: Some(selector),
        topology_key: domain.key().to_string(),
        ..Default::default()
    }
}

fn same_set_selector(match_labels: &BTreeMap<String, String>) -> LabelSelector {
    LabelSelector {
        match_labels: Some(match_labels.clone()),
        ..Default::default()
    }
}

fn same_rack_selector(cluster: &str, rack: &str) -> LabelSelector {
    LabelSelector {
        match_labels: Some(BTreeMap::from([
            (LABEL_CLUSTER.to_string(), cluster.to_string()),
            (LABEL_RACK.to_string(), rack.to_string()),
        ])),
        ..Default::default()
    }
}

/// Pods of the same cluster sitting in any rack but `rack`
///
/// With a single rack defined the value list is empty; the expression is
/// still emitted and matches nothing.
fn other_racks_selector(
    cluster: &str,
    rack: &str,
    racks: &BTreeMap<String, RackConfig>,
) -> LabelSelector {
    let others: Vec<String> = racks.keys().filter(|r| *r != rack).cloned().collect();
    LabelSelector {
        match_labels: Some(BTreeMap::from([(
            LABEL_CLUSTER.to_string(),
            cluster.to_string(),
        )])),
        match_expressions: Some(vec![LabelSelectorRequirement {
            key: LABEL_RACK.to_string(),
            operator: "In".to_string(),
            values: Some(others),
        }]),
    }
}

fn plan_anti_affinity(
    config: &AntiAffinityConfig,
    match_labels: &BTreeMap<String, String>,
    anti: &mut Terms,
) {
    let domains: [(Option<&AntiAffinityTypeConfig>, TopologyDomain); 2] = [
        (config.host.as_ref(), TopologyDomain::Host),
        (config.zone.as_ref(), TopologyDomain::Zone),
    ];
    for (setting, domain) in domains {
        let Some(setting) = setting else { continue };
        if !setting.enabled.unwrap_or(false) {
            continue;
        }
        anti.push(
            term(same_set_selector(match_labels), domain),
            setting.required.unwrap_or(true),
        );
    }
}

fn plan_rack(
    input: &AffinityInput<'_>,
    rack: &str,
    affinity: &mut Terms,
    anti: &mut Terms,
) -> Result<()> {
    let racks = input.racks.ok_or_else(|| {
        Error::ConfigurationConflict(format!("rack {rack} is referenced but no racks are defined"))
    })?;
    let config = racks
        .get(rack)
        .ok_or_else(|| Error::ConfigurationConflict(format!("rack {rack} is not defined")))?;

    if let Some(host) = config.host.as_ref().filter(|h| h.enabled.unwrap_or(false)) {
        affinity.push(
            term(same_rack_selector(input.cluster, rack), TopologyDomain::Host),
            host.require_rack_affinity.unwrap_or(false),
        );
        anti.push(
            term(
                other_racks_selector(input.cluster, rack, racks),
                TopologyDomain::Host,
            ),
            host.require_rack_anti_affinity.unwrap_or(true),
        );
        if host.enable_host_anti_affinity.unwrap_or(true) {
            anti.push(
                term(same_set_selector(input.match_labels), TopologyDomain::Host),
                host.require_rack_host_anti_affinity.unwrap_or(true),
            );
        }
    }

    if let Some(zone) = config.zone.as_ref().filter(|z| z.enabled.unwrap_or(false)) {
        affinity.push(
            term(same_rack_selector(input.cluster, rack), TopologyDomain::Zone),
            zone.require_rack_affinity.unwrap_or(false),
        );
        anti.push(
            term(
                other_racks_selector(input.cluster, rack, racks),
                TopologyDomain::Zone,
            ),
            zone.require_rack_anti_affinity.unwrap_or(true),
        );
    }

    Ok(())
}

/// Compute the pod affinity of a component set
///
/// Returns `Ok(None)` when there is nothing to constrain. An unknown rack is
/// a [`Error::ConfigurationConflict`].
pub fn plan_affinity(input: &AffinityInput<'_>) -> Result<Option<Affinity>> {
    let mut affinity_terms = Terms::default();
    let mut anti_terms = Terms::default();

    match input.rack {
        Some(rack) => plan_rack(input, rack, &mut affinity_terms, &mut anti_terms)?,
        None => {
            if let Some(config) = input.anti_affinity {
                plan_anti_affinity(config, input.match_labels, &mut anti_terms);
            }
        }
    }

    if input.node_affinity.is_none() && affinity_terms.is_empty() && anti_terms.is_empty() {
        return Ok(None);
    }

    let pod_affinity = (!affinity_terms.is_empty()).then(|| {
        let (required, preferred) = affinity_terms.into_parts();
        PodAffinity {
            required_during_scheduling_ignored_during_execution: required,
            preferred_during_scheduling_ignored_during_execution: preferred,
        }
    });
    let pod_anti_affinity = (!anti_terms.is_empty()).then(|| {
        let (required, preferred) = anti_terms.into_parts();
        PodAntiAffinity {
            required_during_scheduling_ignored_during_execution: required,
            preferred_during_scheduling_ignored_during_execution: preferred,
        }
    });

    Ok(Some(Affinity {
        node_affinity: input.node_affinity.cloned(),
        pod_affinity,
        pod_anti_affinity,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{HostRackConfig, ZoneRackConfig};

    fn labels() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("app".to_string(), "pulsar".to_string()),
            ("cluster".to_string(), "pulsar".to_string()),
            ("component".to_string(), "broker".to_string()),
        ])
    }

    fn input<'a>(
        labels: &'a BTreeMap<String, String>,
        anti: Option<&'a AntiAffinityConfig>,
    ) -> AffinityInput<'a> {
        AffinityInput {
            cluster: "pulsar",
            anti_affinity: anti,
            racks: None,
            rack: None,
            match_labels: labels,
            node_affinity: None,
        }
    }

    #[test]
    fn test_default_host_anti_affinity_is_required() {
        let labels = labels();
        let config = AntiAffinityConfig::defaults();
        let affinity = plan_affinity(&input(&labels, Some(&config))).unwrap().unwrap();

        let anti = affinity.pod_anti_affinity.unwrap();
        let required = anti.required_during_scheduling_ignored_during_execution.unwrap();
        assert_eq!(required.len(), 1);
        assert_eq!(required[0].topology_key, HOST_TOPOLOGY_KEY);
        assert_eq!(
            required[0].label_selector.as_ref().unwrap().match_labels,
            Some(labels.clone())
        );
        assert!(anti.preferred_during_scheduling_ignored_during_execution.is_none());
        assert!(affinity.pod_affinity.is_none());
    }

    #[test]
    fn test_preferred_zone_anti_affinity_has_weight_100() {
        let labels = labels();
        let config = AntiAffinityConfig {
            host: Some(AntiAffinityTypeConfig {
                enabled: Some(false),
                required: None,
            }),
            zone: Some(AntiAffinityTypeConfig {
                enabled: Some(true),
                required: Some(false),
            }),
        };
        let affinity = plan_affinity(&input(&labels, Some(&config))).unwrap().unwrap();
        let anti = affinity.pod_anti_affinity.unwrap();
        assert!(anti.required_during_scheduling_ignored_during_execution.is_none());
        let preferred = anti.preferred_during_scheduling_ignored_during_execution.unwrap();
        assert_eq!(preferred.len(), 1);
        assert_eq!(preferred[0].weight, PREFERRED_WEIGHT);
        assert_eq!(preferred[0].pod_affinity_term.topology_key, ZONE_TOPOLOGY_KEY);
    }

    #[test]
    fn test_nothing_enabled_returns_none() {
        let labels = labels();
        let config = AntiAffinityConfig {
            host: Some(AntiAffinityTypeConfig {
                enabled: Some(false),
                required: Some(true),
            }),
            zone: None,
        };
        assert!(plan_affinity(&input(&labels, Some(&config))).unwrap().is_none());
        assert!(plan_affinity(&input(&labels, None)).unwrap().is_none());
    }

    #[test]
    fn test_node_affinity_alone_is_kept() {
        let labels = labels();
        let node = NodeAffinity::default();
        let mut i = input(&labels, None);
        i.node_affinity = Some(&node);
        let affinity = plan_affinity(&i).unwrap().unwrap();
        assert!(affinity.node_affinity.is_some());
        assert!(affinity.pod_anti_affinity.is_none());
    }

    fn host_rack() -> RackConfig {
        RackConfig {
            host: Some(HostRackConfig {
                enabled: Some(true),
                require_rack_affinity: Some(false),
                require_rack_anti_affinity: Some(true),
                enable_host_anti_affinity: Some(true),
                require_rack_host_anti_affinity: Some(true),
            }),
            zone: Some(ZoneRackConfig {
                enabled: Some(false),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_rack_mode_excludes_other_racks() {
        let racks = BTreeMap::from([
            ("r1".to_string(), host_rack()),
            ("r2".to_string(), host_rack()),
            ("r3".to_string(), host_rack()),
        ]);
        let labels = labels();
        let config = AntiAffinityConfig::defaults();
        let i = AffinityInput {
            cluster: "pulsar",
            anti_affinity: Some(&config),
            racks: Some(&racks),
            rack: Some("r1"),
            match_labels: &labels,
            node_affinity: None,
        };
        let affinity = plan_affinity(&i).unwrap().unwrap();

        let pod_affinity = affinity.pod_affinity.unwrap();
        let same_rack = &pod_affinity
            .preferred_during_scheduling_ignored_during_execution
            .unwrap()[0];
        assert_eq!(same_rack.weight, 100);
        let selector = same_rack.pod_affinity_term.label_selector.as_ref().unwrap();
        assert_eq!(
            selector.match_labels.as_ref().unwrap().get("rack"),
            Some(&"r1".to_string())
        );

        let anti = affinity.pod_anti_affinity.unwrap();
        let required = anti.required_during_scheduling_ignored_during_execution.unwrap();
        assert_eq!(required.len(), 2);
        let others = &required[0].label_selector.as_ref().unwrap();
        let expr = &others.match_expressions.as_ref().unwrap()[0];
        assert_eq!(expr.key, "rack");
        assert_eq!(expr.operator, "In");
        assert_eq!(
            expr.values,
            Some(vec!["r2".to_string(), "r3".to_string()])
        );
        assert_eq!(
            others.match_labels.as_ref().unwrap().get("cluster"),
            Some(&"pulsar".to_string())
        );
        // Same-set host anti-affinity
        assert_eq!(
            required[1].label_selector.as_ref().unwrap().match_labels,
            Some(labels.clone())
        );
    }

    #[test]
    fn test_single_rack_keeps_empty_expression() {
        let racks = BTreeMap::from([("r1".to_string(), host_rack())]);
        let labels = labels();
        let i = AffinityInput {
            cluster: "pulsar",
            anti_affinity: None,
            racks: Some(&racks),
            rack: Some("r1"),
            match_labels: &labels,
            node_affinity: None,
        };
        let affinity = plan_affinity(&i).unwrap().unwrap();
        let required = affinity
            .pod_anti_affinity
            .unwrap()
            .required_during_scheduling_ignored_during_execution
            .unwrap();
        let expr = &required[0]
            .label_selector
            .as_ref()
            .unwrap()
            .match_expressions
            .as_ref()
            .unwrap()[0];
        assert_eq!(expr.values, Some(vec![]));
    }

    #[test]
    fn test_unknown_rack_is_a_conflict() {
        let racks = BTreeMap::from([("r1".to_string(), host_rack())]);
        let labels = labels();
        let mut i = input(&labels, None);
        i.racks = Some(&racks);
        i.rack = Some("r9");
        let err = plan_affinity(&i).unwrap_err();
        assert!(matches!(err, Error::ConfigurationConflict(_)));

        i.racks = None;
        assert!(plan_affinity(&i).is_err());
    }

    fn zone_rack() -> RackConfig {
        RackConfig {
            host: Some(HostRackConfig {
                enabled: Some(false),
                ..Default::default()
            }),
            zone: Some(ZoneRackConfig {
                enabled: Some(true),
                require_rack_affinity: Some(true),
                require_rack_anti_affinity: Some(true),
            }),
        }
    }

    #[test]
    fn test_zone_rack_mode_uses_zone_key_without_host_term() {
        let racks = BTreeMap::from([
            ("r1".to_string(), zone_rack()),
            ("r2".to_string(), zone_rack()),
            ("r3".to_string(), zone_rack()),
        ]);
        let labels = labels();
        let i = AffinityInput {
            cluster: "pulsar",
            anti_affinity: None,
            racks: Some(&racks),
            rack: Some("r1"),
            match_labels: &labels,
            node_affinity: None,
        };
        let affinity = plan_affinity(&i).unwrap().unwrap();

        let pod_affinity = affinity.pod_affinity.unwrap();
        assert!(pod_affinity
            .preferred_during_scheduling_ignored_during_execution
            .is_none());
        let same_rack = pod_affinity
            .required_during_scheduling_ignored_during_execution
            .unwrap();
        assert_eq!(same_rack.len(), 1);
        assert_eq!(same_rack[0].topology_key, ZONE_TOPOLOGY_KEY);
        assert_eq!(
            same_rack[0].label_selector.as_ref().unwrap().match_labels,
            Some(BTreeMap::from([
                ("cluster".to_string(), "pulsar".to_string()),
                ("rack".to_string(), "r1".to_string()),
            ]))
        );

        let anti = affinity.pod_anti_affinity.unwrap();
        assert!(anti.preferred_during_scheduling_ignored_during_execution.is_none());
        let required = anti.required_during_scheduling_ignored_during_execution.unwrap();
        assert_eq!(required.len(), 1);
        assert_eq!(required[0].topology_key, ZONE_TOPOLOGY_KEY);
        let expr = &required[0]
            .label_selector
            .as_ref()
            .unwrap()
            .match_expressions
            .as_ref()
            .unwrap()[0];
        assert_eq!(expr.key, "rack");
        assert_eq!(expr.operator, "In");
        assert_eq!(expr.values, Some(vec!["r2".to_string(), "r3".to_string()]));
    }
}
