//! Structural comparison of serialized specs
//!
//! Key order and formatting never count as a difference. An explicit `null`
//! and a missing key are treated the same (both "absent"), and objects that
//! become empty once their nulls are removed are absent too.

use std::fmt;

use serde_json::{Map, Value};

use crate::error::Result;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DifferenceKind {
    /// Present only on the right side
    Added,
    /// Present only on the left side
    Removed,
    Changed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldDifference {
    /// JSON pointer style path, e.g. `/broker/replicas`
    pub path: String,
    pub kind: DifferenceKind,
    pub left: Option<Value>,
    pub right: Option<Value>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpecDiff {
    pub differences: Vec<FieldDifference>,
}

impl SpecDiff {
    pub fn are_equal(&self) -> bool {
        self.differences.is_empty()
    }
}

impl fmt::Display for SpecDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.differences.is_empty() {
            return write!(f, "no differences");
        }
        for (i, d) in self.differences.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            let render = |v: &Option<Value>| {
                v.as_ref()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "<absent>".to_string())
            };
            match d.kind {
                DifferenceKind::Added => write!(f, "+ {}: {}", d.path, render(&d.right))?,
                DifferenceKind::Removed => write!(f, "- {}: {}", d.path, render(&d.left))?,
                DifferenceKind::Changed => write!(
                    f,
                    "~ {}: {} -> {}",
                    d.path,
                    render(&d.left),
                    render(&d.right)
                )?,
            }
        }
        Ok(())
    }
}

/// Drop nulls and the empty objects they leave behind
pub fn prune_nulls(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let pruned: Map<String, Value> = map
                .iter()
                .filter_map(|(k, v)| prune_nulls(v).map(|v| (k.clone(), v)))
                .collect();
            if pruned.is_empty() {
                None
            } else {
                Some(Value::Object(pruned))
            }
        }
        Value::Array(items) => Some(Value::Array(
            items
                .iter()
                .map(|v| prune_nulls(v).unwrap_or(Value::Null))
                .collect(),
        )),
        other => Some(other.clone()),
    }
}

/// Compare two spec values
pub fn diff(left: &Value, right: &Value) -> SpecDiff {
    let mut differences = Vec::new();
    diff_into(
        "",
        prune_nulls(left).as_ref(),
        prune_nulls(right).as_ref(),
        &mut differences,
    );
    SpecDiff { differences }
}

/// Compare two serialized specs; an unparsable snapshot is an error
pub fn diff_serialized(left: &str, right: &str) -> Result<SpecDiff> {
    let left: Value = serde_json::from_str(left)?;
    let right: Value = serde_json::from_str(right)?;
    Ok(diff(&left, &right))
}

fn diff_into(
    path: &str,
    left: Option<&Value>,
    right: Option<&Value>,
    out: &mut Vec<FieldDifference>,
) {
    match (left, right) {
        (None, None) => {}
        (Some(l), None) => out.push(FieldDifference {
            path: path_or_root(path),
            kind: DifferenceKind::Removed,
            left: Some(l.clone()),
            right: None,
        }),
        (None, Some(r)) => out.push(FieldDifference {
            path: path_or_root(path),
            kind: DifferenceKind::Added,
            left: None,
            right: Some(r.clone()),
        }),
        (Some(Value::Object(l)), Some(Value::Object(r))) => {
            let mut keys: Vec<&String> = l.keys().chain(r.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                let child = format!("{}/{}", path, escape(key));
                diff_into(&child, l.get(key), r.get(key), out);
            }
        }
        (Some(Value::Array(l)), Some(Value::Array(r))) if l.len() == r.len() => {
            for (i, (lv, rv)) in l.iter().zip(r.iter()).enumerate() {
                let child = format!("{}/{}", path, i);
                diff_into(&child, non_null(lv), non_null(rv), out);
            }
        }
        (Some(l), Some(r)) => {
            if !numbers_equal(l, r) && l != r {
                out.push(FieldDifference {
                    path: path_or_root(path),
                    kind: DifferenceKind::Changed,
                    left: Some(l.clone()),
                    right: Some(r.clone()),
                });
            }
        }
    }
}

fn non_null(v: &Value) -> Option<&Value> {
    (!v.is_null()).then_some(v)
}

/// `1` and `1.0` are the same number once serialized through different paths
fn numbers_equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => false,
    }
}

fn escape(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

fn path_or_root(path: &str) -> String {
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

/// Every field set in `desired` has the same value in `current`
///
/// Fields that only exist in `current` (server defaults, status, managed
/// fields) are ignored. Used to skip patches that would not change anything.
pub fn is_subset(desired: &Value, current: &Value) -> bool {
    match (desired, current) {
        (Value::Null, _) => true,
        (Value::Object(d), Value::Object(c)) => d.iter().all(|(k, dv)| match c.get(k) {
            Some(cv) => is_subset(dv, cv),
            None => prune_nulls(dv).is_none(),
        }),
        (Value::Object(d), Value::Null) => prune_nulls(&Value::Object(d.clone())).is_none(),
        (Value::Array(d), Value::Array(c)) => {
            d.len() == c.len() && d.iter().zip(c.iter()).all(|(dv, cv)| is_subset(dv, cv))
        }
        (d, c) => d == c || numbers_equal(d, c),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_is_ignored() {
        let a = r#"{"global":{"name":"pulsar","image":"x"},"broker":{"replicas":3}}"#;
        let b = r#"{ "broker": {"replicas": 3}, "global": {"image": "x", "name": "pulsar"} }"#;
        assert!(diff_serialized(a, b).unwrap().are_equal());
    }

    #[test]
    fn test_null_and_absent_are_equal() {
        let a = json!({"broker": {"replicas": 3, "config": null}});
        let b = json!({"broker": {"replicas": 3}});
        assert!(diff(&a, &b).are_equal());

        let c = json!({"broker": {"replicas": 3, "pdb": {"enabled": null}}});
        assert!(diff(&c, &b).are_equal());
    }

    #[test]
    fn test_reports_changed_field_path() {
        let a = json!({"broker": {"replicas": 3}});
        let b = json!({"broker": {"replicas": 5}});
        let d = diff(&a, &b);
        assert!(!d.are_equal());
        assert_eq!(d.differences.len(), 1);
        assert_eq!(d.differences[0].path, "/broker/replicas");
        assert_eq!(d.differences[0].kind, DifferenceKind::Changed);
        assert_eq!(d.to_string(), "~ /broker/replicas: 3 -> 5");
    }

    #[test]
    fn test_added_and_removed() {
        let a = json!({"proxy": {"replicas": 1}});
        let b = json!({"bastion": {"replicas": 1}});
        let d = diff(&a, &b);
        let kinds: Vec<_> = d.differences.iter().map(|d| d.kind.clone()).collect();
        assert_eq!(kinds, vec![DifferenceKind::Added, DifferenceKind::Removed]);
    }

    #[test]
    fn test_is_subset_ignores_server_fields() {
        let desired = json!({"metadata": {"name": "a", "labels": {"app": "pulsar"}}, "spec": {"replicas": 3}});
        let current = json!({
            "metadata": {"name": "a", "uid": "123", "labels": {"app": "pulsar"}},
            "spec": {"replicas": 3, "revisionHistoryLimit": 10},
            "status": {"readyReplicas": 3}
        });
        assert!(is_subset(&desired, &current));

        let changed = json!({"spec": {"replicas": 4}});
        assert!(!is_subset(&changed, &current));
    }
}
