//! Main configuration types.
//!
//! This module provides the top-level [`WardenConfig`] struct.

use serde::{Deserialize, Serialize};
use warden_telemetry::{LogConfig, MetricsConfig};

use crate::{
    AuditConfig, CacheSection, ClaimsConfig, ConfigError, MqttConfig, OidcConfig, PolicyConfig,
    ServiceConfig, SuperuserSource,
};

/// Signing algorithms accepted in `oidc.algorithms`.
pub const SUPPORTED_ALGORITHMS: [&str; 12] = [
    "HS256", "HS384", "HS512", "RS256", "RS384", "RS512", "PS256", "PS384", "PS512", "ES256",
    "ES384", "EdDSA",
];

/// Complete Warden configuration.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load configuration from files
/// and environment variables.
///
/// # Example
///
/// ```
/// use warden_config::WardenConfig;
///
/// let config = WardenConfig::default();
/// assert_eq!(config.mqtt.package, "warden.mqtt.acl");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct WardenConfig {
    /// Service identity and request limits.
    #[serde(default)]
    pub service: ServiceConfig,

    /// Policy sources and routing.
    #[serde(default)]
    pub policies: PolicyConfig,

    /// Identity provider.
    #[serde(default)]
    pub oidc: OidcConfig,

    /// Claim names.
    #[serde(default)]
    pub claims: ClaimsConfig,

    /// Decision cache.
    #[serde(default)]
    pub cache: CacheSection,

    /// Audit log.
    #[serde(default)]
    pub audit: AuditConfig,

    /// MQTT broker hooks.
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Logging.
    #[serde(default)]
    pub logging: LogConfig,

    /// Metrics.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl WardenConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `oidc.issuer` is empty
    /// - `oidc.algorithms` is empty or names an unsupported algorithm
    /// - `policies.namespace` is empty
    /// - the cache is enabled with zero capacity
    /// - the scope superuser check has no scope
    /// - the metrics listen address does not parse
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.oidc.issuer.trim().is_empty() {
            return Err(ConfigError::missing_field("oidc.issuer"));
        }

        if self.oidc.algorithms.is_empty() {
            return Err(ConfigError::invalid_value(
                "oidc.algorithms",
                "at least one algorithm is required",
            ));
        }
        if let Some(unknown) = self
            .oidc
            .algorithms
            .iter()
            .find(|a| !SUPPORTED_ALGORITHMS.contains(&a.as_str()))
        {
            return Err(ConfigError::invalid_value(
                "oidc.algorithms",
                format!("unsupported algorithm {unknown}"),
            ));
        }

        if self.policies.namespace.trim().is_empty() {
            return Err(ConfigError::invalid_value(
                "policies.namespace",
                "must not be empty",
            ));
        }

        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err(ConfigError::invalid_value(
                "cache.max_entries",
                "must be positive when the cache is enabled",
            ));
        }

        if self.mqtt.superuser == SuperuserSource::Scope && self.mqtt.superuser_scope.is_empty() {
            return Err(ConfigError::invalid_value(
                "mqtt.superuser_scope",
                "required when mqtt.superuser is 'scope'",
            ));
        }

        if self.metrics.enabled {
            self.metrics
                .socket_addr()
                .map_err(|e| ConfigError::invalid_value("metrics.listen_addr", e.to_string()))?;
        }

        Ok(())
    }

    /// Development preset: readable debug logs, short cache lifetime,
    /// automatic policy reload.
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();

        config.service.environment = "development".to_string();
        config.logging = LogConfig::development();

        config.cache.max_entries = 1_000;
        config.cache.ttl_secs = 10;

        config.policies.watch = true;

        config
    }

    /// Production preset: JSON logs, metrics listener, full-size cache.
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();

        config.service.environment = "production".to_string();
        config.logging = LogConfig::production();

        config.metrics.enabled = true;
        config.metrics.listen_addr = Some("0.0.0.0:9090".to_string());

        config
    }
}
