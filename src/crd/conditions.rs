//! Status conditions for the ProvisionerConfig resource

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Overall reconcile outcome for the latest pass
pub const CONDITION_RECONCILE_COMPLETED: &str = "ReconcileCompleted";

/// Health of the synchronized hub workload
pub const CONDITION_DEPLOYMENTS_HEALTHY: &str = "DeploymentsHealthy";

/// Reason for a successful reconcile
pub const REASON_RECONCILE_SUCCEEDED: &str = "ReconcileSucceeded";

/// Reason for a failed reconcile
pub const REASON_RECONCILE_FAILED: &str = "ReconcileFailed";

/// Reason when the workload reports all replicas ready
pub const REASON_DEPLOYMENT_HEALTHY: &str = "DeploymentHealthy";

/// Reason when the workload exists but is not fully available
pub const REASON_DEPLOYMENT_UNAVAILABLE: &str = "DeploymentUnavailable";

/// Reason when the workload cannot be read yet
pub const REASON_DEPLOYMENT_NOT_FOUND: &str = "DeploymentNotFound";

/// Status condition
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type
    #[serde(rename = "type")]
    pub type_: String,

    /// Status (True, False, Unknown)
    pub status: ConditionStatus,

    /// Last transition time
    pub last_transition_time: DateTime<Utc>,

    /// Machine-readable reason for the condition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Tri-state condition status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl Condition {
    /// Build a condition stamped with the current time
    pub fn new(
        type_: &str,
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
    ) -> Self {
        Condition {
            type_: type_.to_string(),
            status,
            last_transition_time: Utc::now(),
            reason: Some(reason.to_string()),
            message: Some(message.into()),
        }
    }
}

/// Insert or replace a condition by type.
///
/// Replacement preserves the condition's position in the list, and the
/// transition time is carried over unless the status actually changed.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            let transition_time = if existing.status == condition.status {
                existing.last_transition_time
            } else {
                condition.last_transition_time
            };
            *existing = Condition {
                last_transition_time: transition_time,
                ..condition
            };
        }
        None => conditions.push(condition),
    }
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replacement_preserves_position() {
        let mut conditions = vec![
            Condition::new("A", ConditionStatus::True, "r", "m"),
            Condition::new("B", ConditionStatus::True, "r", "m"),
        ];
        set_condition(
            &mut conditions,
            Condition::new("A", ConditionStatus::False, "r2", "m2"),
        );
        assert_eq!(conditions[0].type_, "A");
        assert_eq!(conditions[0].status, ConditionStatus::False);
        assert_eq!(conditions[1].type_, "B");
    }

    #[test]
    fn transition_time_kept_when_status_unchanged() {
        let first = Condition::new("A", ConditionStatus::True, "r", "m");
        let stamp = first.last_transition_time;
        let mut conditions = vec![first];

        let mut later = Condition::new("A", ConditionStatus::True, "r2", "m2");
        later.last_transition_time = stamp + chrono::Duration::seconds(30);
        set_condition(&mut conditions, later);

        assert_eq!(conditions[0].last_transition_time, stamp);
        assert_eq!(conditions[0].reason.as_deref(), Some("r2"));
    }

    #[test]
    fn transition_time_updated_on_status_change() {
        let first = Condition::new("A", ConditionStatus::True, "r", "m");
        let stamp = first.last_transition_time;
        let mut conditions = vec![first];

        let mut later = Condition::new("A", ConditionStatus::False, "r", "m");
        later.last_transition_time = stamp + chrono::Duration::seconds(30);
        set_condition(&mut conditions, later);

        assert!(conditions[0].last_transition_time > stamp);
    }
}
