//! Status conditions.
//!
//! Conditions are typed, timestamped entries surfaced on a managed object's
//! status for observability. One condition exists per type; writing a
//! condition with the same status only refreshes reason and message, while a
//! status flip also refreshes the transition timestamp.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Maximum length of a condition or sticky error message.
pub const MAX_MESSAGE_LEN: usize = 256;

/// Status of a condition (True, False, Unknown).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    /// The condition holds.
    True,
    /// The condition does not hold.
    False,
    /// The condition state is unknown.
    Unknown,
}

impl Default for ConditionStatus {
    fn default() -> Self {
        ConditionStatus::Unknown
    }
}

/// Condition representing one aspect of an object's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (Ready, or a phase name).
    #[serde(rename = "type")]
    pub condition_type: String,

    /// Status of the condition.
    pub status: ConditionStatus,

    /// Reason for the condition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition status flipped (RFC3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl Condition {
    /// Create a condition with the transition time set to now.
    pub fn new(
        condition_type: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: Option<String>,
    ) -> Self {
        Self {
            condition_type: condition_type.into(),
            status,
            reason: Some(reason.into()),
            message: message.map(|m| truncate_message(&m)),
            last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
        }
    }
}

/// Find a condition by type.
pub fn find_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.condition_type == condition_type)
}

/// Whether a condition of the given type exists and is True.
pub fn condition_is_true(conditions: &[Condition], condition_type: &str) -> bool {
    find_condition(conditions, condition_type)
        .map(|c| c.status == ConditionStatus::True)
        .unwrap_or(false)
}

/// Insert or update a condition, keyed by type.
///
/// Last write wins for reason and message. The transition time is refreshed
/// only when the status actually flips.
pub fn upsert_condition(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    status: ConditionStatus,
    reason: &str,
    message: Option<String>,
) {
    let message = message.map(|m| truncate_message(&m));
    match conditions
        .iter_mut()
        .find(|c| c.condition_type == condition_type)
    {
        Some(existing) => {
            if existing.status != status {
                existing.last_transition_time = Some(chrono::Utc::now().to_rfc3339());
            }
            existing.status = status;
            existing.reason = Some(reason.to_string());
            existing.message = message;
        }
        None => {
            conditions.push(Condition::new(condition_type, status, reason, message));
        }
    }
}

/// Truncate a message to [`MAX_MESSAGE_LEN`] characters.
pub fn truncate_message(message: &str) -> String {
    if message.chars().count() <= MAX_MESSAGE_LEN {
        message.to_string()
    } else {
        message.chars().take(MAX_MESSAGE_LEN).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_creates_condition_once_per_type() {
        let mut conditions = Vec::new();
        upsert_condition(&mut conditions, "Ready", ConditionStatus::False, "Initialize", None);
        upsert_condition(&mut conditions, "Ready", ConditionStatus::False, "Pending", None);
        upsert_condition(&mut conditions, "Config", ConditionStatus::False, "Initialize", None);

        assert_eq!(conditions.len(), 2);
        assert_eq!(
            find_condition(&conditions, "Ready").unwrap().reason.as_deref(),
            Some("Pending")
        );
    }

    #[test]
    fn transition_time_only_moves_on_status_flip() {
        let mut conditions = Vec::new();
        upsert_condition(&mut conditions, "Ready", ConditionStatus::False, "Initialize", None);
        let t0 = conditions[0].last_transition_time.clone();

        // Same status: timestamp untouched.
        upsert_condition(&mut conditions, "Ready", ConditionStatus::False, "Retrying", None);
        assert_eq!(conditions[0].last_transition_time, t0);

        // Flip: timestamp refreshed.
        upsert_condition(&mut conditions, "Ready", ConditionStatus::True, "Success", None);
        assert_eq!(conditions[0].status, ConditionStatus::True);
        assert!(conditions[0].last_transition_time.is_some());
    }

    #[test]
    fn messages_are_truncated() {
        let long = "x".repeat(MAX_MESSAGE_LEN * 2);
        let mut conditions = Vec::new();
        upsert_condition(
            &mut conditions,
            "Ready",
            ConditionStatus::False,
            "Failed",
            Some(long),
        );
        assert_eq!(
            conditions[0].message.as_ref().unwrap().len(),
            MAX_MESSAGE_LEN
        );
    }

    #[test]
    fn condition_is_true_requires_true_status() {
        let mut conditions = Vec::new();
        assert!(!condition_is_true(&conditions, "Ready"));
        upsert_condition(&mut conditions, "Ready", ConditionStatus::False, "Init", None);
        assert!(!condition_is_true(&conditions, "Ready"));
        upsert_condition(&mut conditions, "Ready", ConditionStatus::True, "Success", None);
        assert!(condition_is_true(&conditions, "Ready"));
    }

    #[test]
    fn serializes_with_kubernetes_field_names() {
        let c = Condition::new("Ready", ConditionStatus::True, "Success", None);
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["type"], "Ready");
        assert_eq!(v["status"], "True");
        assert!(v["lastTransitionTime"].is_string());
    }
}
