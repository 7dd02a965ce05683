//! Typed configuration for Warden.
//!
//! - TOML and JSON configuration files
//! - Environment variable overrides (`WARDEN__SECTION__KEY`)
//! - Strict validation (unknown fields are rejected)
//! - Policy tree watching for hot reload
//!
//! # Example
//!
//! ```no_run
//! use warden_config::ConfigLoader;
//!
//! # fn main() -> Result<(), warden_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_optional_file("warden.toml")?
//!     .with_dotenv()
//!     .with_env_prefix("WARDEN")
//!     .load()?;
//!
//! println!("policies from {}", config.policies.dir.display());
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [service]
//! name = "warden"
//! request_timeout_ms = 2000
//!
//! [policies]
//! dir = "/etc/warden/policies"
//! data_dir = "/etc/warden/data"
//! namespace = "warden"
//! fallback_package = "warden.authz"
//! watch = true
//!
//! [policies.packages]
//! dataset = "warden.dataset.access"
//! topic = "warden.mqtt.acl"
//!
//! [oidc]
//! issuer = "https://idp.example.com/realms/main"
//! audience = "warden"
//! algorithms = ["RS256"]
//! invalid_token = "reject"
//!
//! [cache]
//! max_entries = 10000
//! ttl_secs = 300
//!
//! [mqtt]
//! superuser = "scope"
//! superuser_scope = "mqtt.admin"
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

#![doc(html_root_url = "https://docs.rs/warden-config/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;
mod watcher;

pub use config::{WardenConfig, SUPPORTED_ALGORITHMS};
pub use error::ConfigError;
pub use loader::{ConfigLoader, DEFAULT_ENV_PREFIX};
pub use schema::*;
pub use watcher::{is_policy_file, PolicyChange, PolicyWatcher, PolicyWatcherBuilder};
