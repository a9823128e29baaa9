//! Status conditions shared by the node-level resources
//!
//! Mirrors the Kubernetes `metav1.Condition` shape. Node agents own exactly one
//! condition type per resource (`Configured` for SR-IOV FEC, `Flashed` for N3000).

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Condition type reported on `SriovFecNodeConfig`.
pub const CONFIGURED_CONDITION: &str = "Configured";

/// Condition type reported on `N3000Node`.
pub const FLASHED_CONDITION: &str = "Flashed";

/// Tri-state condition status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

/// Machine-readable reason attached to a condition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum ConditionReason {
    /// Spec is empty; nothing to apply.
    NotRequested,
    /// Node agent is applying the spec.
    InProgress,
    /// Spec applied and verified against inventory.
    Succeeded,
    /// Host configuration step failed.
    Failed,
    /// Outcome could not be determined (inventory, drain or lease failure).
    #[default]
    Unknown,
}

impl fmt::Display for ConditionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotRequested => "NotRequested",
            Self::InProgress => "InProgress",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,

    pub status: ConditionStatus,

    pub reason: ConditionReason,

    #[serde(default)]
    pub message: String,

    /// Generation of the resource the condition was computed against
    #[serde(default)]
    pub observed_generation: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    /// Builds a condition stamped with the current time.
    pub fn new(
        type_: &str,
        status: ConditionStatus,
        reason: ConditionReason,
        message: impl Into<String>,
        observed_generation: i64,
    ) -> Self {
        Self {
            type_: type_.to_string(),
            status,
            reason,
            message: message.into(),
            observed_generation,
            last_transition_time: Some(Utc::now()),
        }
    }
}

/// Returns the condition of the given type, if present.
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Inserts or updates a condition in place.
///
/// `lastTransitionTime` only moves when the status flips, matching
/// `meta.SetStatusCondition` semantics. Returns true if anything changed.
pub fn set_condition(conditions: &mut Vec<Condition>, mut new: Condition) -> bool {
    match conditions.iter_mut().find(|c| c.type_ == new.type_) {
        Some(existing) => {
            if existing.status == new.status {
                new.last_transition_time = existing.last_transition_time;
            }
            if *existing == new {
                return false;
            }
            *existing = new;
            true
        }
        None => {
            if new.last_transition_time.is_none() {
                new.last_transition_time = Some(Utc::now());
            }
            conditions.push(new);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_condition_keeps_transition_time_when_status_unchanged() {
        let mut conditions = vec![];
        set_condition(
            &mut conditions,
            Condition::new(CONFIGURED_CONDITION, ConditionStatus::False, ConditionReason::InProgress, "", 1),
        );
        let first = conditions[0].last_transition_time;

        let changed = set_condition(
            &mut conditions,
            Condition::new(CONFIGURED_CONDITION, ConditionStatus::False, ConditionReason::Failed, "boom", 1),
        );

        assert!(changed);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].reason, ConditionReason::Failed);
        assert_eq!(conditions[0].last_transition_time, first);
    }

    #[test]
    fn test_set_condition_reports_no_change() {
        let mut conditions = vec![];
        let c = Condition::new(CONFIGURED_CONDITION, ConditionStatus::True, ConditionReason::Succeeded, "", 2);
        assert!(set_condition(&mut conditions, c.clone()));
        assert!(!set_condition(&mut conditions, c));
    }

    #[test]
    fn test_condition_serializes_type_field() {
        let c = Condition::new(FLASHED_CONDITION, ConditionStatus::Unknown, ConditionReason::Unknown, "", 0);
        let value = serde_json::to_value(&c).unwrap();
        assert_eq!(value["type"], "Flashed");
        assert_eq!(value["observedGeneration"], 0);
        assert_eq!(value["reason"], "Unknown");
    }
}
