//! Shared types used across CRD definitions

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type reporting overall readiness of an infrastructure object
pub const READY_CONDITION: &str = "Ready";

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., Ready)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// True when both conditions say the same thing, ignoring the timestamp
    pub fn same_state(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Insert or replace a condition by type
///
/// An existing condition that already says the same thing is left untouched,
/// so its transition time survives and repeated reconciles write nothing.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) if existing.same_state(&condition) => {}
        Some(existing) => *existing = condition,
        None => conditions.push(condition),
    }
}

/// Look up a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Reference to another object, as used by Cluster API `infrastructureRef`
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    /// API version of the referent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Kind of the referent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Name of the referent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Namespace of the referent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Host and port of an API server endpoint
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ApiEndpoint {
    /// Hostname or IP address
    pub host: String,

    /// TCP port
    pub port: i32,
}

impl ApiEndpoint {
    /// An endpoint is usable once it has a host and a valid port
    pub fn is_valid(&self) -> bool {
        !self.host.is_empty() && self.port > 0 && self.port <= 65535
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod conditions {
        use super::*;

        #[test]
        fn unchanged_condition_keeps_its_transition_time() {
            let original = Condition::new(READY_CONDITION, ConditionStatus::True, "Provisioned", "");
            let stamp = original.last_transition_time;
            let mut conditions = vec![original];

            set_condition(
                &mut conditions,
                Condition::new(READY_CONDITION, ConditionStatus::True, "Provisioned", ""),
            );

            assert_eq!(conditions.len(), 1);
            assert_eq!(conditions[0].last_transition_time, stamp);
        }

        #[test]
        fn changed_condition_is_replaced_in_place() {
            let mut conditions = vec![
                Condition::new("Other", ConditionStatus::True, "Fine", ""),
                Condition::new(READY_CONDITION, ConditionStatus::True, "Provisioned", ""),
            ];

            set_condition(
                &mut conditions,
                Condition::new(
                    READY_CONDITION,
                    ConditionStatus::False,
                    "OwnerResolutionFailed",
                    "store unavailable",
                ),
            );

            assert_eq!(conditions.len(), 2);
            let ready = find_condition(&conditions, READY_CONDITION).expect("ready condition");
            assert_eq!(ready.status, ConditionStatus::False);
            assert_eq!(ready.reason, "OwnerResolutionFailed");
        }

        #[test]
        fn new_condition_is_appended() {
            let mut conditions = Vec::new();
            set_condition(
                &mut conditions,
                Condition::new(READY_CONDITION, ConditionStatus::Unknown, "Pending", ""),
            );
            assert_eq!(conditions.len(), 1);
        }

        #[test]
        fn condition_serializes_with_kubernetes_field_names() {
            let c = Condition::new(READY_CONDITION, ConditionStatus::True, "Provisioned", "ok");
            let json = serde_json::to_value(&c).expect("serialize");
            assert_eq!(json["type"], "Ready");
            assert_eq!(json["status"], "True");
            assert!(json.get("lastTransitionTime").is_some());
        }
    }

    #[test]
    fn api_endpoint_validity() {
        assert!(ApiEndpoint {
            host: "10.0.0.1".to_string(),
            port: 6443
        }
        .is_valid());
        assert!(!ApiEndpoint::default().is_valid());
        assert!(!ApiEndpoint {
            host: "h".to_string(),
            port: 70000
        }
        .is_valid());
    }
}
