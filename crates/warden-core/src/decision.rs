//! Policy decisions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A row-level restriction a policy attaches to an allowed decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterPredicate {
    /// Field the predicate applies to.
    pub field: String,
    /// Comparison operator, e.g. `eq`, `in`.
    pub operator: String,
    /// Operand.
    pub value: Value,
}

impl FilterPredicate {
    /// Creates a predicate.
    pub fn new(field: impl Into<String>, operator: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }
}

/// Outcome of evaluating one policy package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Whether access is granted.
    pub allowed: bool,
    /// Human-readable explanation; empty when the policy gives none.
    #[serde(default)]
    pub reason: String,
    /// Package that produced the decision.
    pub policy: String,
    /// Row-level restrictions.
    #[serde(default)]
    pub filters: Vec<FilterPredicate>,
    /// Extra policy-provided metadata.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Decision {
    /// An allow decision with no reason.
    pub fn allow(policy: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: String::new(),
            policy: policy.into(),
            filters: Vec::new(),
            metadata: Map::new(),
        }
    }

    /// A deny decision.
    pub fn deny(policy: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            policy: policy.into(),
            filters: Vec::new(),
            metadata: Map::new(),
        }
    }

    /// Sets the reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Sets the filters.
    pub fn with_filters(mut self, filters: Vec<FilterPredicate>) -> Self {
        self.filters = filters;
        self
    }

    /// Adds one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
