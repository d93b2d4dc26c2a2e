use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use std::fmt;

/// The single condition type that gates readiness of every record
pub const ACTIVE: &str = "Active";

/// Set on ControlPlanes only: whether the bootstrap sequence has finished.
/// Active there means the infrastructure has converged.
pub const BOOTSTRAPPED: &str = "Bootstrapped";

/// Reason recorded when a reconcile pass completes
pub const REASON_RECONCILED: &str = "Reconciled";

/// Tri-state condition status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Whether the condition of the given type is present and True
pub fn is_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_).is_some_and(|c| c.status == ConditionStatus::True.as_str())
}

/// Insert or replace a condition.
///
/// `lastTransitionTime` only moves when the status changes; reason and
/// message are always overwritten.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: ConditionStatus,
    reason: &str,
    message: &str,
    now: DateTime<Utc>,
) {
    let status = status.as_str();
    match conditions.iter_mut().find(|c| c.type_ == type_) {
        Some(existing) => {
            if existing.status != status {
                existing.last_transition_time = Time(now);
            }
            existing.status = status.to_string();
            existing.reason = reason.to_string();
            existing.message = message.to_string();
        }
        None => conditions.push(Condition {
            type_: type_.to_string(),
            status: status.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: Time(now),
            observed_generation: None,
        }),
    }
}

/// Mark the Active condition True
pub fn mark_active(conditions: &mut Vec<Condition>, now: DateTime<Utc>) {
    set_condition(
        conditions,
        ACTIVE,
        ConditionStatus::True,
        REASON_RECONCILED,
        "",
        now,
    );
}

/// Mark the Active condition False with the failure reason and message
pub fn mark_inactive(conditions: &mut Vec<Condition>, reason: &str, message: &str, now: DateTime<Utc>) {
    set_condition(conditions, ACTIVE, ConditionStatus::False, reason, message, now);
}
