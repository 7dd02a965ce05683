//! Configuration for evaluation and routing.

use std::collections::BTreeMap;
use std::time::Duration;

/// Configuration for the policy evaluator.
///
/// Rule names are resolved inside the package chosen for a request, so
/// `allow_rule = "allow"` queries `data.<package>.allow`.
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Boolean rule deciding access.
    pub allow_rule: String,
    /// Optional string rule explaining the decision.
    pub reason_rule: String,
    /// Optional list rule of row-level filters.
    pub filters_rule: String,
    /// Optional object rule of extra decision metadata.
    pub metadata_rule: String,
    /// Boolean rule marking a subject as superuser.
    pub superuser_rule: String,
    /// Evaluations slower than this are logged as slow.
    pub max_eval_time: Duration,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            allow_rule: "allow".to_string(),
            reason_rule: "reason".to_string(),
            filters_rule: "filters".to_string(),
            metadata_rule: "metadata".to_string(),
            superuser_rule: "superuser".to_string(),
            max_eval_time: Duration::from_millis(100),
        }
    }
}

impl EvaluatorConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the superuser rule name.
    pub fn with_superuser_rule(mut self, rule: impl Into<String>) -> Self {
        self.superuser_rule = rule.into();
        self
    }

    /// Set the slow-evaluation threshold.
    pub fn with_max_eval_time(mut self, max: Duration) -> Self {
        self.max_eval_time = max;
        self
    }

    /// Create a production configuration.
    pub fn production() -> Self {
        Self {
            max_eval_time: Duration::from_millis(50),
            ..Self::default()
        }
    }

    /// Create a development configuration.
    pub fn development() -> Self {
        Self {
            max_eval_time: Duration::from_millis(500),
            ..Self::default()
        }
    }
}

/// Options applied when compiling a policy store.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreOptions {
    /// Treat builtin errors as evaluation errors instead of undefined.
    pub strict_builtins: bool,
}

/// Package routing configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Namespace joined with the resource type to form a package name.
    pub namespace: String,
    /// Package used when no specialized package is loaded.
    pub fallback_package: Option<String>,
    /// Explicit resource type → package mappings, checked before the namespace.
    pub overrides: BTreeMap<String, String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        let overrides = [
            ("dataset", "warden.dataset.access"),
            ("pipeline", "warden.pipeline.state"),
            ("topic", "warden.mqtt.acl"),
            ("userdata", "warden.userdata.access"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            namespace: "warden".to_string(),
            fallback_package: Some("warden.authz".to_string()),
            overrides,
        }
    }
}

impl RouterConfig {
    /// A router with only a namespace: no overrides, no fallback.
    pub fn namespaced(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            fallback_package: None,
            overrides: BTreeMap::new(),
        }
    }

    /// Set the fallback package.
    pub fn with_fallback(mut self, package: impl Into<String>) -> Self {
        self.fallback_package = Some(package.into());
        self
    }

    /// Remove the fallback package.
    pub fn without_fallback(mut self) -> Self {
        self.fallback_package = None;
        self
    }

    /// Map a resource type to a specific package.
    pub fn with_override(mut self, resource_type: impl Into<String>, package: impl Into<String>) -> Self {
        self.overrides.insert(resource_type.into(), package.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_evaluator_config() {
        let config = EvaluatorConfig::default();
        assert_eq!(config.allow_rule, "allow");
        assert_eq!(config.superuser_rule, "superuser");
    }

    #[test]
    fn test_presets() {
        assert!(EvaluatorConfig::production().max_eval_time < EvaluatorConfig::development().max_eval_time);
    }

    #[test]
    fn test_default_router_config() {
        let config = RouterConfig::default();
        assert_eq!(config.overrides["topic"], "warden.mqtt.acl");
        assert_eq!(config.fallback_package.as_deref(), Some("warden.authz"));
    }

    #[test]
    fn test_router_builder() {
        let config = RouterConfig::namespaced("acme")
            .with_override("twin", "acme.twins")
            .with_fallback("acme.generic");
        assert_eq!(config.namespace, "acme");
        assert_eq!(config.overrides.len(), 1);
        assert!(config.without_fallback().fallback_package.is_none());
    }
}
