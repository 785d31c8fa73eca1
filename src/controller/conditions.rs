//! Condition management helpers following Kubernetes API conventions

use chrono::Utc;

use crate::crd::Condition;

pub const CONDITION_TYPE_READY: &str = "Ready";

pub const CONDITION_STATUS_TRUE: &str = "True";
pub const CONDITION_STATUS_FALSE: &str = "False";

/// Reasons reported on the Ready condition
pub const REASON_READY: &str = "Ready";
pub const REASON_INITIALIZING: &str = "Initializing";
pub const REASON_INVALID_SPEC: &str = "InvalidSpec";
pub const REASON_GENERIC_ERROR: &str = "GenericError";

fn condition(type_: &str, status: &str, reason: &str, message: &str) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: status.to_string(),
        last_transition_time: Utc::now().to_rfc3339(),
        reason: reason.to_string(),
        message: message.to_string(),
        observed_generation: None,
    }
}

/// Create a Ready=True condition
pub fn ready_condition(message: &str) -> Condition {
    condition(CONDITION_TYPE_READY, CONDITION_STATUS_TRUE, REASON_READY, message)
}

/// Create a Ready=False condition
pub fn not_ready_condition(reason: &str, message: &str) -> Condition {
    condition(CONDITION_TYPE_READY, CONDITION_STATUS_FALSE, reason, message)
}

/// Ready=False while a dependency or a workload is still coming up
pub fn initializing_condition(message: &str) -> Condition {
    not_ready_condition(REASON_INITIALIZING, message)
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Check if a condition is true
pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_)
        .map(|c| c.status == CONDITION_STATUS_TRUE)
        .unwrap_or(false)
}

/// Merge the conditions computed by a pass into the stored ones
///
/// The result holds exactly the types present in `new`, in `new`'s order.
/// A condition whose status did not change keeps its stored
/// `lastTransitionTime`; reason and message always take the new values.
/// Every merged condition records `generation` as its observed generation.
pub fn merge_conditions(old: &[Condition], new: &[Condition], generation: Option<i64>) -> Vec<Condition> {
    new.iter()
        .map(|incoming| {
            let last_transition_time = match find_condition(old, &incoming.type_) {
                Some(existing) if existing.status == incoming.status => {
                    existing.last_transition_time.clone()
                }
                _ => Utc::now().to_rfc3339(),
            };
            Condition {
                last_transition_time,
                observed_generation: generation,
                ..incoming.clone()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(status: &str, time: &str) -> Condition {
        Condition {
            type_: CONDITION_TYPE_READY.to_string(),
            status: status.to_string(),
            last_transition_time: time.to_string(),
            reason: "Old".to_string(),
            message: "old message".to_string(),
            observed_generation: None,
        }
    }

    #[test]
    fn test_merge_keeps_time_when_status_unchanged() {
        let old = vec![stored(CONDITION_STATUS_TRUE, "2024-01-01T00:00:00+00:00")];
        let merged = merge_conditions(&old, &[ready_condition("all good")], Some(4));

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].last_transition_time, "2024-01-01T00:00:00+00:00");
        assert_eq!(merged[0].reason, REASON_READY);
        assert_eq!(merged[0].message, "all good");
        assert_eq!(merged[0].observed_generation, Some(4));
    }

    #[test]
    fn test_merge_refreshes_time_when_status_flips() {
        let old = vec![stored(CONDITION_STATUS_TRUE, "2024-01-01T00:00:00+00:00")];
        let merged = merge_conditions(&old, &[initializing_condition("waiting")], Some(4));

        assert_eq!(merged[0].status, CONDITION_STATUS_FALSE);
        assert_ne!(merged[0].last_transition_time, "2024-01-01T00:00:00+00:00");
        assert_eq!(merged[0].reason, REASON_INITIALIZING);
    }

    #[test]
    fn test_merge_drops_conditions_not_reported_again() {
        let mut degraded = stored(CONDITION_STATUS_TRUE, "2024-01-01T00:00:00+00:00");
        degraded.type_ = "Degraded".to_string();
        let old = vec![degraded];

        let merged = merge_conditions(&old, &[ready_condition("ok")], None);
        assert_eq!(merged.len(), 1);
        assert!(find_condition(&merged, "Degraded").is_none());
        assert!(is_condition_true(&merged, CONDITION_TYPE_READY));
    }

    #[test]
    fn test_is_condition_true_missing() {
        assert!(!is_condition_true(&[], CONDITION_TYPE_READY));
    }
}
