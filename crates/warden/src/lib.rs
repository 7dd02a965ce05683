//! # Warden
//!
//! **Authorization decision service**
//!
//! Warden answers "may this caller perform this action on this resource"
//! for HTTP APIs, MQTT brokers and internal services:
//!
//! - **Token validation** – signed bearer tokens checked against the identity
//!   provider's rotating signing keys
//! - **Policy routing** – each resource type is decided by its own Rego
//!   package, with a generic fallback
//! - **Decision caching** – identical questions are answered from a bounded,
//!   time-limited cache that is reset on every policy reload
//! - **Audit** – one structured audit event per request
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use warden::{AppContext, AuthorizeRequest};
//! use warden_config::ConfigLoader;
//! use warden_core::{Action, Resource};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::new().with_optional_file("warden.toml")?.load()?;
//!     let context = AppContext::from_config(&config)?;
//!
//!     let request = AuthorizeRequest::new(
//!         Resource::new("dataset", "ds-1").with_attribute("access_level", "open"),
//!         Action::new("read"),
//!     );
//!     let response = context.pipeline().authorize(request).await?;
//!     println!("allowed: {}", response.decision.allowed);
//!     Ok(())
//! }
//! ```
//!
//! ## Crates
//!
//! | Crate | Purpose |
//! |-------|---------|
//! | `warden-core` | Subjects, resources, inputs, decisions |
//! | `warden-auth` | Signing keys, token validation, subject resolution |
//! | `warden-authz` | Policy store, evaluation, routing, decision cache |
//! | `warden-config` | Configuration loading and policy watching |
//! | `warden-telemetry` | Logging and metrics |

#![doc(html_root_url = "https://docs.rs/warden/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod audit;
pub mod context;
pub mod error;
pub mod mqtt;
pub mod pipeline;

pub use audit::{AuditEvent, AuditFailure, AuditLogger, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use context::AppContext;
pub use error::{PipelineError, PipelineResult};
pub use mqtt::{bearer_token, AccessMask, MqttAction, SuperuserCheck, AUTHORIZED_REASON};
pub use pipeline::{
    AuthorizationPipeline, AuthorizeRequest, AuthorizeResponse, PipelineBuilder, PipelineStats,
    DEFAULT_MQTT_PACKAGE,
};

// Re-export the member crates
pub use warden_auth as auth;
pub use warden_authz as authz;
pub use warden_config as config;
pub use warden_core as core;
pub use warden_telemetry as telemetry;

/// Version of the warden crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
