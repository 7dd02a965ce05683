//! Observability for Warden.
//!
//! - **Logging**: structured JSON (or human-readable) logs via
//!   `tracing-subscriber`, with audit records on their own target
//! - **Metrics**: Prometheus counters and histograms via the `metrics` crate
//!
//! # Example
//!
//! ```rust,ignore
//! use warden_telemetry::{init_telemetry, LogConfig, MetricsConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     init_telemetry(&LogConfig::production(), &MetricsConfig::default())?;
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/warden-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig, LogFormat, AUDIT_TARGET};
pub use crate::metrics::{init_metrics, render_metrics, MetricsConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Initializes logging, then metrics.
pub fn init_telemetry(logging: &LogConfig, metrics: &MetricsConfig) -> TelemetryResult<()> {
    init_logging(logging)?;
    init_metrics(metrics)
}
