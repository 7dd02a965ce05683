//! Audit records.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::decision::Decision;
use crate::input::PolicyInput;

/// One audited authorization decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    /// When the decision was recorded.
    pub timestamp: DateTime<Utc>,
    /// Request correlation id.
    pub request_id: String,
    /// The decision.
    pub decision: Decision,
    /// The input the decision was made on.
    pub input: PolicyInput,
    /// End-to-end latency in milliseconds.
    pub latency_ms: f64,
    /// Whether the decision was served from cache.
    pub cached: bool,
    /// Calling service, when known.
    pub source_service: Option<String>,
}

impl AuditRecord {
    /// Id of the subject, or `None` for unauthenticated callers.
    pub fn subject_id(&self) -> Option<&str> {
        self.input.subject_id()
    }

    /// Kind of the subject, or `None` for unauthenticated callers.
    pub fn subject_type(&self) -> Option<&'static str> {
        self.input.subject.as_ref().map(|s| s.kind.as_str())
    }
}
