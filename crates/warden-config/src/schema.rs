//! Configuration schema types.
//!
//! This module defines the structure of all configuration sections.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Service identity and request limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Name reported in logs and audit records.
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Deployment environment (production, staging, development).
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Per-request deadline in milliseconds. None disables the deadline.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: Option<u64>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            environment: default_environment(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl ServiceConfig {
    /// Per-request deadline, if any.
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

fn default_service_name() -> String {
    "warden".to_string()
}

fn default_environment() -> String {
    "production".to_string()
}

#[allow(clippy::unnecessary_wraps)]
fn default_request_timeout() -> Option<u64> {
    Some(2000)
}

/// Where policies live and how resource types map to packages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Directory of `.rego` rule files.
    #[serde(default = "default_policy_dir")]
    pub dir: PathBuf,

    /// Directory of `.json` data documents. None disables data loading.
    #[serde(default = "default_data_dir")]
    pub data_dir: Option<PathBuf>,

    /// Package prefix for resource types without an override.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Package used when a type has no loaded package. Empty disables the fallback.
    #[serde(default = "default_fallback_package")]
    pub fallback_package: Option<String>,

    /// Resource type → package overrides.
    #[serde(default = "default_package_overrides")]
    pub packages: BTreeMap<String, String>,

    /// Fail evaluation on builtin errors instead of treating them as undefined.
    #[serde(default = "default_true")]
    pub strict_builtins: bool,

    /// Reload automatically when policy or data files change.
    #[serde(default)]
    pub watch: bool,

    /// Quiet period before a burst of file changes triggers one reload.
    #[serde(default = "default_watch_debounce")]
    pub watch_debounce_ms: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            dir: default_policy_dir(),
            data_dir: default_data_dir(),
            namespace: default_namespace(),
            fallback_package: default_fallback_package(),
            packages: default_package_overrides(),
            strict_builtins: true,
            watch: false,
            watch_debounce_ms: default_watch_debounce(),
        }
    }
}

impl PolicyConfig {
    /// Debounce window for the policy watcher.
    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }
}

fn default_policy_dir() -> PathBuf {
    PathBuf::from("policies")
}

#[allow(clippy::unnecessary_wraps)]
fn default_data_dir() -> Option<PathBuf> {
    Some(PathBuf::from("data"))
}

fn default_namespace() -> String {
    "warden".to_string()
}

#[allow(clippy::unnecessary_wraps)]
fn default_fallback_package() -> Option<String> {
    Some("warden.authz".to_string())
}

fn default_package_overrides() -> BTreeMap<String, String> {
    [
        ("dataset", "warden.dataset.access"),
        ("pipeline", "warden.pipeline.state"),
        ("topic", "warden.mqtt.acl"),
        ("userdata", "warden.userdata.access"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_watch_debounce() -> u64 {
    500
}

/// What to do when a request carries a token that fails validation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InvalidTokenPolicy {
    /// Fail the request with an authentication error.
    #[default]
    Reject,
    /// Continue as the anonymous subject.
    Anonymous,
}

/// Identity provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct OidcConfig {
    /// Expected token issuer, e.g. `https://idp/realms/main`.
    #[serde(default)]
    pub issuer: String,

    /// Key set URL. Derived from the issuer when unset.
    #[serde(default)]
    pub jwks_uri: Option<String>,

    /// Local key set document, used instead of fetching when set.
    #[serde(default)]
    pub jwks_file: Option<PathBuf>,

    /// Required audience. None disables the audience check.
    #[serde(default)]
    pub audience: Option<String>,

    /// Accepted signing algorithms.
    #[serde(default = "default_algorithms")]
    pub algorithms: Vec<String>,

    /// How long fetched signing keys are trusted.
    #[serde(default = "default_jwks_cache_ttl")]
    pub jwks_cache_ttl_secs: u64,

    /// Upper bound for one key set fetch.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_ms: u64,

    /// Clock skew tolerated for `exp` and `iat`.
    #[serde(default = "default_leeway")]
    pub leeway_secs: u64,

    /// Handling of tokens that fail validation.
    #[serde(default)]
    pub invalid_token: InvalidTokenPolicy,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            issuer: String::new(),
            jwks_uri: None,
            jwks_file: None,
            audience: None,
            algorithms: default_algorithms(),
            jwks_cache_ttl_secs: default_jwks_cache_ttl(),
            fetch_timeout_ms: default_fetch_timeout(),
            leeway_secs: default_leeway(),
            invalid_token: InvalidTokenPolicy::default(),
        }
    }
}

impl OidcConfig {
    /// Explicit key set URL, or the provider's conventional certs endpoint.
    pub fn jwks_uri(&self) -> String {
        self.jwks_uri.clone().unwrap_or_else(|| {
            format!(
                "{}/protocol/openid-connect/certs",
                self.issuer.trim_end_matches('/')
            )
        })
    }

    /// Signing key TTL.
    pub fn jwks_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.jwks_cache_ttl_secs)
    }

    /// Key set fetch timeout.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Clock skew leeway.
    pub fn leeway(&self) -> Duration {
        Duration::from_secs(self.leeway_secs)
    }
}

fn default_algorithms() -> Vec<String> {
    vec!["RS256".to_string()]
}

fn default_jwks_cache_ttl() -> u64 {
    3600
}

fn default_fetch_timeout() -> u64 {
    5000
}

fn default_leeway() -> u64 {
    60
}

/// Claim names read when resolving a subject.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ClaimsConfig {
    /// Subject identifier claim.
    pub subject: String,
    /// Login name claim.
    pub username: String,
    /// Client id claim.
    pub client_id: String,
    /// Authorized party claim.
    pub authorized_party: String,
    /// Dotted path to role names.
    pub roles: String,
    /// Group membership claim.
    pub groups: String,
    /// Scope claim.
    pub scope: String,
    /// Username prefix marking service accounts.
    pub service_account_prefix: String,
}

impl Default for ClaimsConfig {
    fn default() -> Self {
        Self {
            subject: "sub".to_string(),
            username: "preferred_username".to_string(),
            client_id: "client_id".to_string(),
            authorized_party: "azp".to_string(),
            roles: "realm_access.roles".to_string(),
            groups: "groups".to_string(),
            scope: "scope".to_string(),
            service_account_prefix: "service-account-".to_string(),
        }
    }
}

/// Decision cache settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CacheSection {
    /// Enable decision caching.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum cached decisions.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Lifetime of a cached decision.
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_max_entries(),
            ttl_secs: default_cache_ttl(),
        }
    }
}

impl CacheSection {
    /// Lifetime of a cached decision.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

fn default_max_entries() -> usize {
    10_000
}

fn default_cache_ttl() -> u64 {
    300
}

/// Audit log settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    /// Emit audit records.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Include the full policy input in each record.
    #[serde(default = "default_true")]
    pub log_inputs: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_inputs: true,
        }
    }
}

/// How MQTT superusers are recognized.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SuperuserSource {
    /// The MQTT package's `superuser` rule decides.
    #[default]
    Rule,
    /// Holding `superuser_scope` makes a subject superuser.
    Scope,
}

/// MQTT broker hook settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MqttConfig {
    /// Package holding the topic ACL.
    #[serde(default = "default_mqtt_package")]
    pub package: String,

    /// Superuser check.
    #[serde(default)]
    pub superuser: SuperuserSource,

    /// Scope checked when `superuser = "scope"`.
    #[serde(default = "default_superuser_scope")]
    pub superuser_scope: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            package: default_mqtt_package(),
            superuser: SuperuserSource::default(),
            superuser_scope: default_superuser_scope(),
        }
    }
}

fn default_mqtt_package() -> String {
    "warden.mqtt.acl".to_string()
}

fn default_superuser_scope() -> String {
    "mqtt.admin".to_string()
}

fn default_true() -> bool {
    true
}
