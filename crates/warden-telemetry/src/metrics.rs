//! Prometheus metrics for Warden.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `warden_decisions_total` | Counter | `policy`, `allowed`, `cached` | Authorization decisions |
//! | `warden_decision_duration_seconds` | Histogram | `policy` | End-to-end decision latency |
//! | `warden_evaluation_errors_total` | Counter | `kind` | Requests that failed closed |
//! | `warden_token_failures_total` | Counter | `kind` | Rejected bearer tokens |
//! | `warden_policy_reloads_total` | Counter | `outcome` | Policy store reloads |
//! | `warden_jwks_fetches_total` | Counter | `outcome` | Signing key set fetches |
//!
//! Recording functions are safe to call before [`init_metrics`]; without an
//! installed recorder they do nothing.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Global metrics handle for rendering.
static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Decision counter.
pub const DECISIONS_TOTAL: &str = "warden_decisions_total";
/// Decision latency histogram.
pub const DECISION_DURATION_SECONDS: &str = "warden_decision_duration_seconds";
/// Fail-closed error counter.
pub const EVALUATION_ERRORS_TOTAL: &str = "warden_evaluation_errors_total";
/// Token rejection counter.
pub const TOKEN_FAILURES_TOTAL: &str = "warden_token_failures_total";
/// Policy reload counter.
pub const POLICY_RELOADS_TOTAL: &str = "warden_policy_reloads_total";
/// Key set fetch counter.
pub const JWKS_FETCHES_TOTAL: &str = "warden_jwks_fetches_total";

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    /// Whether metrics are recorded at all.
    pub enabled: bool,

    /// Address for the Prometheus scrape listener; no listener when `None`.
    pub listen_addr: Option<String>,

    /// Histogram buckets for decision latency, in seconds.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: None,
            // 0.5ms .. 1s; most decisions are cache hits in the sub-millisecond range
            duration_buckets: vec![
                0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ],
        }
    }
}

impl MetricsConfig {
    /// Parsed listener address, if one is configured.
    pub fn socket_addr(&self) -> TelemetryResult<Option<SocketAddr>> {
        self.listen_addr
            .as_deref()
            .map(|addr| {
                addr.parse()
                    .map_err(|e| TelemetryError::InvalidAddress(format!("{addr}: {e}")))
            })
            .transpose()
    }
}

/// Installs the global Prometheus recorder.
///
/// With a listen address the scrape endpoint is served from a task on the
/// current tokio runtime, so this must then be called from inside one.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(DECISION_DURATION_SECONDS.to_string()),
            &config.duration_buckets,
        )
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    let handle = match config.socket_addr()? {
        Some(addr) => {
            let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
                TelemetryError::MetricsInit(format!("metrics listener needs a tokio runtime: {e}"))
            })?;
            let (recorder, exporter) = builder
                .with_http_listener(addr)
                .build()
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
            let handle = recorder.handle();
            metrics::set_global_recorder(recorder).map_err(|_| {
                TelemetryError::MetricsInit("a global metrics recorder is already installed".to_string())
            })?;
            runtime.spawn(async move {
                if exporter.await.is_err() {
                    tracing::error!("metrics listener stopped");
                }
            });
            info!(%addr, "metrics listener started");
            handle
        }
        None => builder
            .install_recorder()
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?,
    };

    let _ = METRICS_HANDLE.set(handle);
    register_metric_descriptions();
    Ok(())
}

/// Renders metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
#[must_use]
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

fn register_metric_descriptions() {
    describe_counter!(DECISIONS_TOTAL, "Authorization decisions by policy and result");
    describe_histogram!(
        DECISION_DURATION_SECONDS,
        "End-to-end authorization latency in seconds"
    );
    describe_counter!(
        EVALUATION_ERRORS_TOTAL,
        "Authorization requests that failed closed, by error kind"
    );
    describe_counter!(TOKEN_FAILURES_TOTAL, "Rejected bearer tokens by reason");
    describe_counter!(POLICY_RELOADS_TOTAL, "Policy store reloads by outcome");
    describe_counter!(JWKS_FETCHES_TOTAL, "Signing key set fetches by outcome");
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Records a completed decision.
pub fn record_decision(policy: &str, allowed: bool, cached: bool, duration: Duration) {
    counter!(
        DECISIONS_TOTAL,
        "policy" => policy.to_string(),
        "allowed" => allowed.to_string(),
        "cached" => cached.to_string()
    )
    .increment(1);

    histogram!(DECISION_DURATION_SECONDS, "policy" => policy.to_string())
        .record(duration.as_secs_f64());
}

/// Records a request that failed closed.
pub fn record_evaluation_error(kind: &'static str) {
    counter!(EVALUATION_ERRORS_TOTAL, "kind" => kind).increment(1);
}

/// Records a rejected token.
pub fn record_token_failure(kind: &'static str) {
    counter!(TOKEN_FAILURES_TOTAL, "kind" => kind).increment(1);
}

/// Records a policy reload attempt.
pub fn record_policy_reload(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!(POLICY_RELOADS_TOTAL, "outcome" => outcome).increment(1);
}

/// Records a key set fetch (`success`, `failure` or `timeout`).
pub fn record_jwks_fetch(outcome: &'static str) {
    counter!(JWKS_FETCHES_TOTAL, "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MetricsConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.socket_addr().unwrap(), None);
        assert!(!config.duration_buckets.is_empty());
    }

    #[test]
    fn test_invalid_listen_addr() {
        let config = MetricsConfig {
            listen_addr: Some("not-an-address".to_string()),
            ..MetricsConfig::default()
        };
        assert!(matches!(
            config.socket_addr(),
            Err(TelemetryError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_disabled_metrics_is_noop() {
        assert!(init_metrics(&MetricsConfig::default()).is_ok());
    }

    #[test]
    fn test_record_functions_dont_panic_without_recorder() {
        record_decision("warden.authz", true, false, Duration::from_millis(2));
        record_evaluation_error("evaluation");
        record_token_failure("expired");
        record_policy_reload(true);
        record_jwks_fetch("success");
    }

    #[test]
    fn test_recorded_metrics_render() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_decision("warden.dataset.access", false, true, Duration::from_millis(1));
            record_policy_reload(false);
        });

        let rendered = handle.render();
        assert!(rendered.contains("warden_decisions_total"));
        assert!(rendered.contains(r#"policy="warden.dataset.access""#));
        assert!(rendered.contains(r#"cached="true""#));
        assert!(rendered.contains(r#"warden_policy_reloads_total{outcome="failure"} 1"#));
    }
}
