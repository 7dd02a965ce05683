//! Resource type → policy package routing.

use tracing::debug;
use warden_core::ResourceType;

use crate::config::RouterConfig;
use crate::error::{AuthzError, AuthzResult};
use crate::store::PolicyStore;

/// Picks the package that decides requests for a resource type.
#[derive(Debug, Clone, Default)]
pub struct PolicyRouter {
    config: RouterConfig,
}

impl PolicyRouter {
    /// Create a router.
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    /// The package dedicated to `resource_type`, whether or not it is loaded.
    pub fn specialized_package(&self, resource_type: &ResourceType) -> String {
        self.config
            .overrides
            .get(resource_type.as_str())
            .cloned()
            .unwrap_or_else(|| format!("{}.{}", self.config.namespace, resource_type.as_str()))
    }

    /// The package to evaluate for `resource_type` against `store`.
    ///
    /// The specialized package wins when `store` declares it; otherwise the
    /// fallback package is used. Without a fallback the type is rejected.
    pub fn resolve(&self, store: &PolicyStore, resource_type: &ResourceType) -> AuthzResult<String> {
        let specialized = self.specialized_package(resource_type);
        if store.has_package(&specialized) {
            return Ok(specialized);
        }

        match &self.config.fallback_package {
            Some(fallback) => {
                debug!(
                    resource_type = %resource_type,
                    specialized = %specialized,
                    fallback = %fallback,
                    "no specialized package loaded, using fallback"
                );
                Ok(fallback.clone())
            }
            None => Err(AuthzError::UnknownResourceType(resource_type.as_str().to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(packages: &[&str]) -> PolicyStore {
        packages
            .iter()
            .enumerate()
            .fold(PolicyStore::builder(), |builder, (i, package)| {
                builder.policy(format!("p{}.rego", i), format!("package {}\nallow := true", package))
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_override_takes_precedence() {
        let router = PolicyRouter::default();
        assert_eq!(router.specialized_package(&ResourceType::Topic), "warden.mqtt.acl");
        assert_eq!(
            router.specialized_package(&ResourceType::Other("twin".into())),
            "warden.twin"
        );
    }

    #[test]
    fn test_specialized_package_is_preferred() {
        let router = PolicyRouter::default();
        let store = store(&["warden.dataset.access", "warden.authz"]);
        assert_eq!(
            router.resolve(&store, &ResourceType::Dataset).unwrap(),
            "warden.dataset.access"
        );
    }

    #[test]
    fn test_falls_back_when_specialized_missing() {
        let router = PolicyRouter::default();
        let store = store(&["warden.authz"]);
        assert_eq!(
            router.resolve(&store, &ResourceType::Pipeline).unwrap(),
            "warden.authz"
        );
    }

    #[test]
    fn test_unknown_type_without_fallback() {
        let router = PolicyRouter::new(RouterConfig::namespaced("warden"));
        let store = store(&["warden.dataset"]);

        assert_eq!(router.resolve(&store, &ResourceType::Dataset).unwrap(), "warden.dataset");
        let err = router
            .resolve(&store, &ResourceType::Other("twin".into()))
            .unwrap_err();
        assert!(matches!(err, AuthzError::UnknownResourceType(t) if t == "twin"));
    }
}
