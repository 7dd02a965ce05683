//! Configuration loader with layered approach.
//!
//! This module provides the [`ConfigLoader`] for loading configuration from
//! multiple sources: defaults, files, and environment variables.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use warden_telemetry::LogFormat;

use crate::{ConfigError, InvalidTokenPolicy, SuperuserSource, WardenConfig};

/// Default environment variable prefix.
pub const DEFAULT_ENV_PREFIX: &str = "WARDEN";

/// Configuration loader with layered approach.
///
/// The loader applies configuration in layers, with later layers overriding
/// earlier ones:
/// 1. Default values (built into the code)
/// 2. Configuration file (TOML or JSON)
/// 3. `.env` file, if requested
/// 4. Environment variables (`PREFIX__SECTION__KEY`)
///
/// # Example
///
/// ```no_run
/// use warden_config::ConfigLoader;
///
/// # fn main() -> Result<(), warden_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_file("warden.toml")?
///     .with_dotenv()
///     .with_env_prefix("WARDEN")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: WardenConfig,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader starting from defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: WardenConfig::default(),
            env_prefix: None,
        }
    }

    /// Start with development preset configuration.
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = WardenConfig::development();
        self
    }

    /// Start with production preset configuration.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = WardenConfig::production();
        self
    }

    /// Load configuration from a file.
    ///
    /// Supports TOML (.toml) and JSON (.json) formats, chosen by extension.
    /// Sections missing from the file take their default values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - The file does not exist
    /// - The file cannot be read
    /// - The file contains invalid TOML/JSON
    /// - The file contains unknown fields
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;

        self.config = Self::parse_file(&content, path)?;
        debug!(path = %path.display(), "configuration file loaded");
        Ok(self)
    }

    /// Load configuration from a file if it exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be read or parsed.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load configuration from a string in `"toml"` or `"json"` format.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing fails.
    ///
    /// # Example
    ///
    /// ```
    /// use warden_config::ConfigLoader;
    ///
    /// let toml = r#"
    ///     [oidc]
    ///     issuer = "https://idp.example.com/realms/main"
    /// "#;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string(toml, "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.oidc.issuer, "https://idp.example.com/realms/main");
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content)?,
            "json" => serde_json::from_str(content)?,
            _ => {
                return Err(ConfigError::validation_error(format!(
                    "unsupported configuration format: {format}"
                )))
            }
        };
        Ok(self)
    }

    /// Set environment variable prefix for overrides.
    ///
    /// Variables use the format `PREFIX__SECTION__KEY`, e.g.
    /// `WARDEN__OIDC__ISSUER` or `WARDEN__CACHE__TTL_SECS`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Load a `.env` file from the working directory, if present.
    #[must_use]
    pub fn with_dotenv(self) -> Self {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), ".env loaded");
        }
        self
    }

    /// Apply environment overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an override cannot be parsed or validation
    /// fails.
    pub fn load(mut self) -> Result<WardenConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            let vars: BTreeMap<String, String> = env::vars()
                .filter(|(k, _)| k.starts_with(&format!("{prefix}__")))
                .collect();
            for (key, value) in vars {
                self.apply_env_var(&key, &value, &prefix)?;
            }
        }

        self.config.validate()?;
        Ok(self.config)
    }

    /// Finalize without environment overrides or validation.
    #[must_use]
    pub fn load_unvalidated(self) -> WardenConfig {
        self.config
    }

    fn parse_file(content: &str, path: &Path) -> Result<WardenConfig, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some("toml") => Ok(toml::from_str(content)?),
            Some("json") => Ok(serde_json::from_str(content)?),
            _ => Err(ConfigError::validation_error(format!(
                "unsupported configuration file format: {}",
                path.display()
            ))),
        }
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let key_without_prefix = key
            .strip_prefix(prefix)
            .and_then(|k| k.strip_prefix("__"))
            .ok_or_else(|| ConfigError::env_parse_error(key, "invalid key format"))?;

        let parts: Vec<&str> = key_without_prefix.split("__").collect();
        let config = &mut self.config;

        match parts.as_slice() {
            // Service
            ["SERVICE", "NAME"] => config.service.name = value.to_string(),
            ["SERVICE", "ENVIRONMENT"] => config.service.environment = value.to_string(),
            ["SERVICE", "REQUEST_TIMEOUT_MS"] => {
                config.service.request_timeout_ms = if value.eq_ignore_ascii_case("none") {
                    None
                } else {
                    Some(parse_number(key, value)?)
                };
            }

            // Policies
            ["POLICIES", "DIR"] => config.policies.dir = PathBuf::from(value),
            ["POLICIES", "DATA_DIR"] => config.policies.data_dir = optional_path(value),
            ["POLICIES", "NAMESPACE"] => config.policies.namespace = value.to_string(),
            ["POLICIES", "FALLBACK_PACKAGE"] => {
                config.policies.fallback_package = optional_string(value);
            }
            ["POLICIES", "PACKAGES", resource_type] => {
                config
                    .policies
                    .packages
                    .insert(resource_type.to_lowercase(), value.to_string());
            }
            ["POLICIES", "STRICT_BUILTINS"] => {
                config.policies.strict_builtins = parse_flag(key, value)?;
            }
            ["POLICIES", "WATCH"] => config.policies.watch = parse_flag(key, value)?,
            ["POLICIES", "WATCH_DEBOUNCE_MS"] => {
                config.policies.watch_debounce_ms = parse_number(key, value)?;
            }

            // Identity provider
            ["OIDC", "ISSUER"] => config.oidc.issuer = value.to_string(),
            ["OIDC", "JWKS_URI"] => config.oidc.jwks_uri = optional_string(value),
            ["OIDC", "JWKS_FILE"] => config.oidc.jwks_file = optional_path(value),
            ["OIDC", "AUDIENCE"] => config.oidc.audience = optional_string(value),
            ["OIDC", "ALGORITHMS"] => {
                config.oidc.algorithms = value
                    .split(',')
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .map(ToString::to_string)
                    .collect();
            }
            ["OIDC", "JWKS_CACHE_TTL_SECS"] => {
                config.oidc.jwks_cache_ttl_secs = parse_number(key, value)?;
            }
            ["OIDC", "FETCH_TIMEOUT_MS"] => config.oidc.fetch_timeout_ms = parse_number(key, value)?,
            ["OIDC", "LEEWAY_SECS"] => config.oidc.leeway_secs = parse_number(key, value)?,
            ["OIDC", "INVALID_TOKEN"] => {
                config.oidc.invalid_token = match value.to_lowercase().as_str() {
                    "reject" => InvalidTokenPolicy::Reject,
                    "anonymous" => InvalidTokenPolicy::Anonymous,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'reject' or 'anonymous'",
                        ))
                    }
                };
            }

            // Claim names
            ["CLAIMS", "SUBJECT"] => config.claims.subject = value.to_string(),
            ["CLAIMS", "USERNAME"] => config.claims.username = value.to_string(),
            ["CLAIMS", "CLIENT_ID"] => config.claims.client_id = value.to_string(),
            ["CLAIMS", "AUTHORIZED_PARTY"] => config.claims.authorized_party = value.to_string(),
            ["CLAIMS", "ROLES"] => config.claims.roles = value.to_string(),
            ["CLAIMS", "GROUPS"] => config.claims.groups = value.to_string(),
            ["CLAIMS", "SCOPE"] => config.claims.scope = value.to_string(),
            ["CLAIMS", "SERVICE_ACCOUNT_PREFIX"] => {
                config.claims.service_account_prefix = value.to_string();
            }

            // Cache
            ["CACHE", "ENABLED"] => config.cache.enabled = parse_flag(key, value)?,
            ["CACHE", "MAX_ENTRIES"] => config.cache.max_entries = parse_number(key, value)?,
            ["CACHE", "TTL_SECS"] => config.cache.ttl_secs = parse_number(key, value)?,

            // Audit
            ["AUDIT", "ENABLED"] => config.audit.enabled = parse_flag(key, value)?,
            ["AUDIT", "LOG_INPUTS"] => config.audit.log_inputs = parse_flag(key, value)?,

            // MQTT
            ["MQTT", "PACKAGE"] => config.mqtt.package = value.to_string(),
            ["MQTT", "SUPERUSER"] => {
                config.mqtt.superuser = match value.to_lowercase().as_str() {
                    "rule" => SuperuserSource::Rule,
                    "scope" => SuperuserSource::Scope,
                    _ => return Err(ConfigError::env_parse_error(key, "expected 'rule' or 'scope'")),
                };
            }
            ["MQTT", "SUPERUSER_SCOPE"] => config.mqtt.superuser_scope = value.to_string(),

            // Logging
            ["LOGGING", "ENABLED"] => config.logging.enabled = parse_flag(key, value)?,
            ["LOGGING", "LEVEL"] => config.logging.level = value.to_string(),
            ["LOGGING", "FORMAT"] => {
                config.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    "compact" => LogFormat::Compact,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'json', 'pretty' or 'compact'",
                        ))
                    }
                };
            }
            ["LOGGING", "ANSI"] => config.logging.ansi = parse_flag(key, value)?,

            // Metrics
            ["METRICS", "ENABLED"] => config.metrics.enabled = parse_flag(key, value)?,
            ["METRICS", "LISTEN_ADDR"] => config.metrics.listen_addr = optional_string(value),

            _ => debug!(var = key, "ignoring unknown configuration variable"),
        }

        Ok(())
    }
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))
}

fn optional_string(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn optional_path(value: &str) -> Option<PathBuf> {
    (!value.is_empty()).then(|| PathBuf::from(value))
}
