//! Audit trail of authorization decisions.
//!
//! Every pipeline invocation produces exactly one audit event: a decision
//! record when a decision was reached, an error event otherwise. Events go
//! to an [`AuditSink`]; [`TracingAuditSink`] writes them as structured
//! `tracing` events on the [`AUDIT_TARGET`] target so they can be routed
//! apart from operational logs.
//!
//! Sinks never fail the request. A sink that cannot write drops the event.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::Level;
use warden_core::{AuditRecord, Claims, Decision, PolicyInput};
use warden_telemetry::AUDIT_TARGET;

/// A request that ended without a decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditFailure {
    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
    /// Request correlation id.
    pub request_id: String,
    /// What went wrong.
    pub error: String,
    /// The input, when the request got far enough to build one.
    pub input: Option<PolicyInput>,
    /// Calling service, when known.
    pub source_service: Option<String>,
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync + fmt::Debug {
    /// Write a decision. `include_input` asks for the full policy input.
    fn decision(&self, record: &AuditRecord, include_input: bool);

    /// Write a failed request.
    fn failure(&self, failure: &AuditFailure);
}

macro_rules! decision_event {
    ($level:expr, $record:expr, $input:expr) => {
        tracing::event!(
            target: AUDIT_TARGET,
            $level,
            event = "policy_decision",
            request_id = %$record.request_id,
            allowed = $record.decision.allowed,
            policy = %$record.decision.policy,
            reason = %$record.decision.reason,
            latency_ms = $record.latency_ms,
            cached = $record.cached,
            subject_id = $record.subject_id(),
            subject_type = $record.subject_type(),
            resource_type = %$record.input.resource.resource_type,
            resource_id = %$record.input.resource.id,
            action = %$record.input.action.name,
            source_service = $record.source_service.as_deref(),
            input = $input,
        )
    };
}

/// Writes audit events through `tracing`.
///
/// Allowed decisions are logged at `INFO`, denials at `WARN` and failures at
/// `ERROR`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn decision(&self, record: &AuditRecord, include_input: bool) {
        let input = include_input
            .then(|| serde_json::to_string(&record.input).ok())
            .flatten();
        let input = input.as_deref();

        if record.decision.allowed {
            decision_event!(Level::INFO, record, input);
        } else {
            decision_event!(Level::WARN, record, input);
        }
    }

    fn failure(&self, failure: &AuditFailure) {
        let input = failure.input.as_ref();
        tracing::error!(
            target: AUDIT_TARGET,
            event = "policy_error",
            request_id = %failure.request_id,
            error = %failure.error,
            resource_type = input.map(|i| i.resource.resource_type.as_str()),
            resource_id = input.map(|i| i.resource.id.as_str()),
            action = input.map(|i| i.action.name.as_str()),
            source_service = failure.source_service.as_deref(),
        );
    }
}

/// One captured audit event.
#[derive(Debug, Clone, PartialEq)]
pub enum AuditEvent {
    /// A decision was reached.
    Decision(AuditRecord),
    /// The request failed.
    Failure(AuditFailure),
}

/// Keeps audit events in memory, for embedders and tests.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// All captured events, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Captured decision records, oldest first.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                AuditEvent::Decision(record) => Some(record.clone()),
                AuditEvent::Failure(_) => None,
            })
            .collect()
    }

    /// Captured failures, oldest first.
    pub fn failures(&self) -> Vec<AuditFailure> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                AuditEvent::Failure(failure) => Some(failure.clone()),
                AuditEvent::Decision(_) => None,
            })
            .collect()
    }

    /// Number of captured events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl AuditSink for MemoryAuditSink {
    fn decision(&self, record: &AuditRecord, include_input: bool) {
        let mut record = record.clone();
        if !include_input {
            record.input.subject = record.input.subject.map(|mut s| {
                s.claims = Claims::default();
                s
            });
        }
        self.events.lock().push(AuditEvent::Decision(record));
    }

    fn failure(&self, failure: &AuditFailure) {
        self.events.lock().push(AuditEvent::Failure(failure.clone()));
    }
}

/// Builds audit events and hands them to a sink.
#[derive(Debug, Clone)]
pub struct AuditLogger {
    enabled: bool,
    log_inputs: bool,
    sink: Arc<dyn AuditSink>,
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new(Arc::new(TracingAuditSink))
    }
}

impl AuditLogger {
    /// An enabled logger that includes inputs.
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            enabled: true,
            log_inputs: true,
            sink,
        }
    }

    /// A logger that records nothing.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Turn auditing on or off.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Include or omit the full policy input.
    pub fn with_log_inputs(mut self, log_inputs: bool) -> Self {
        self.log_inputs = log_inputs;
        self
    }

    /// Whether events are written.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record a decision and return the record that was built.
    ///
    /// The record is returned even when auditing is disabled.
    pub fn log_decision(
        &self,
        request_id: &str,
        decision: &Decision,
        input: &PolicyInput,
        latency_ms: f64,
        cached: bool,
        source_service: Option<&str>,
    ) -> AuditRecord {
        let record = AuditRecord {
            timestamp: Utc::now(),
            request_id: request_id.to_string(),
            decision: decision.clone(),
            input: input.clone(),
            latency_ms: (latency_ms * 100.0).round() / 100.0,
            cached,
            source_service: source_service.map(ToString::to_string),
        };

        if self.enabled {
            self.sink.decision(&record, self.log_inputs);
        }
        record
    }

    /// Record a request that ended in an error.
    pub fn log_error(
        &self,
        request_id: &str,
        error: &str,
        input: Option<&PolicyInput>,
        source_service: Option<&str>,
    ) {
        if !self.enabled {
            return;
        }
        self.sink.failure(&AuditFailure {
            timestamp: Utc::now(),
            request_id: request_id.to_string(),
            error: error.to_string(),
            input: input.cloned(),
            source_service: source_service.map(ToString::to_string),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::{Action, Resource, ResourceType, Subject};

    fn input() -> PolicyInput {
        let mut claims = serde_json::Map::new();
        claims.insert("sub".to_string(), "user-1".into());
        PolicyInput::new(
            Some(Subject::user("user-1").with_claims(Claims::new(claims))),
            Resource::new(ResourceType::Dataset, "ds-1"),
            Action::new("read"),
        )
    }

    #[test]
    fn test_log_decision_returns_record() {
        let sink = Arc::new(MemoryAuditSink::new());
        let logger = AuditLogger::new(sink.clone());

        let record = logger.log_decision(
            "req-1",
            &Decision::allow("warden.dataset.access"),
            &input(),
            1.23456,
            false,
            Some("gateway"),
        );

        assert_eq!(record.request_id, "req-1");
        assert!((record.latency_ms - 1.23).abs() < f64::EPSILON);
        assert_eq!(record.subject_id(), Some("user-1"));
        assert_eq!(record.source_service.as_deref(), Some("gateway"));
        assert_eq!(sink.records(), vec![record]);
    }

    #[test]
    fn test_disabled_logger_writes_nothing() {
        let sink = Arc::new(MemoryAuditSink::new());
        let logger = AuditLogger::new(sink.clone()).with_enabled(false);

        let record = logger.log_decision(
            "req-1",
            &Decision::deny("warden.authz", "no"),
            &input(),
            0.5,
            true,
            None,
        );
        logger.log_error("req-2", "boom", None, None);

        assert!(record.cached);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_inputs_omitted_drop_claims() {
        let sink = Arc::new(MemoryAuditSink::new());
        let logger = AuditLogger::new(sink.clone()).with_log_inputs(false);

        logger.log_decision("req-1", &Decision::allow("p"), &input(), 0.1, false, None);

        let stored = &sink.records()[0];
        assert!(stored.input.subject.as_ref().unwrap().claims.is_empty());
        assert_eq!(stored.subject_id(), Some("user-1"));
    }

    #[test]
    fn test_log_error() {
        let sink = Arc::new(MemoryAuditSink::new());
        let logger = AuditLogger::new(sink.clone());

        logger.log_error("req-9", "policy evaluation failed", Some(&input()), Some("broker"));

        let failures = sink.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].request_id, "req-9");
        assert_eq!(failures[0].source_service.as_deref(), Some("broker"));
        assert!(sink.records().is_empty());
    }

    #[test]
    fn test_tracing_sink_does_not_panic() {
        let logger = AuditLogger::default();
        logger.log_decision("req-1", &Decision::allow("p"), &input(), 0.1, false, None);
        logger.log_decision("req-2", &Decision::deny("p", "no"), &input(), 0.1, true, None);
        logger.log_error("req-3", "boom", None, None);
    }
}
