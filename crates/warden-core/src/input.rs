//! The document evaluated by policies.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::resource::{Action, Resource};
use crate::subject::Subject;

/// Environment keys that change on every request and therefore never take
/// part in decision caching.
pub const VOLATILE_ENVIRONMENT_KEYS: [&str; 3] = ["request_id", "timestamp", "trace_id"];

/// Input handed to the policy engine.
///
/// Serializes to `{subject, resource, action, environment}`. Unauthenticated
/// callers carry the anonymous subject (`type == "anonymous"`); `subject` is
/// `null` only when the input is built without one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyInput {
    /// The caller, if any.
    pub subject: Option<Subject>,
    /// The resource being accessed.
    pub resource: Resource,
    /// The requested action.
    pub action: Action,
    /// Request environment: ids, timestamps and caller-supplied context.
    #[serde(default)]
    pub environment: Map<String, Value>,
}

impl PolicyInput {
    /// Creates an input with an empty environment.
    pub fn new(subject: Option<Subject>, resource: Resource, action: Action) -> Self {
        Self {
            subject,
            resource,
            action,
            environment: Map::new(),
        }
    }

    /// Adds one environment entry.
    pub fn with_environment(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// JSON form of the input as seen by policies.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// JSON form of the input with the volatile environment keys removed.
    ///
    /// Two inputs that differ only in volatile keys have equal stable views.
    pub fn stable_value(&self) -> Value {
        let mut value = self.to_value();
        if let Some(Value::Object(environment)) = value.get_mut("environment") {
            for key in VOLATILE_ENVIRONMENT_KEYS {
                environment.remove(key);
            }
        }
        value
    }

    /// The subject's id, or `None` for unauthenticated callers.
    pub fn subject_id(&self) -> Option<&str> {
        self.subject.as_ref().map(|s| s.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceType;
    use serde_json::json;

    fn input() -> PolicyInput {
        PolicyInput::new(
            Some(Subject::user("u1")),
            Resource::new(ResourceType::Dataset, "ds-1"),
            Action::new("read"),
        )
    }

    #[test]
    fn test_stable_value_drops_volatile_keys() {
        let a = input()
            .with_environment("request_id", "r-1")
            .with_environment("timestamp", 1.5)
            .with_environment("trace_id", "t-1")
            .with_environment("tenant", "acme");
        let b = input()
            .with_environment("request_id", "r-2")
            .with_environment("timestamp", 2.5)
            .with_environment("tenant", "acme");

        assert_ne!(a.to_value(), b.to_value());
        assert_eq!(a.stable_value(), b.stable_value());
        assert_eq!(a.stable_value()["environment"], json!({"tenant": "acme"}));
    }

    #[test]
    fn test_missing_subject_serializes_as_null() {
        let mut anonymous = input();
        anonymous.subject = None;
        assert_eq!(anonymous.to_value()["subject"], Value::Null);
        assert_eq!(anonymous.subject_id(), None);
    }
}
