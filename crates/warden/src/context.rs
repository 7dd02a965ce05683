//! Application assembly.
//!
//! [`AppContext`] turns a validated [`WardenConfig`] into a ready
//! [`AuthorizationPipeline`]. Every collaborator is constructed here, once,
//! and handed to the pipeline.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};
use warden_auth::{
    ClaimMapping, JwksClient, KeyRing, KeyRingConfig, KeySource, StaticKeySource, SubjectResolver,
    TokenValidator, ValidatorConfig,
};
use warden_authz::{
    CacheConfig, DecisionCache, PolicyRouter, PolicySource, RouterConfig, SharedPolicyStore,
    StoreOptions,
};
use warden_config::{PolicyWatcher, SuperuserSource, WardenConfig};

use crate::audit::AuditLogger;
use crate::error::{PipelineError, PipelineResult};
use crate::mqtt::SuperuserCheck;
use crate::pipeline::AuthorizationPipeline;

/// A running Warden instance.
#[derive(Debug, Clone)]
pub struct AppContext {
    config: Arc<WardenConfig>,
    pipeline: Arc<AuthorizationPipeline>,
}

impl AppContext {
    /// Build every collaborator from `config`.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid, the policies do not compile or
    /// the key source cannot be set up. The service must not serve traffic
    /// in that case.
    pub fn from_config(config: &WardenConfig) -> PipelineResult<Self> {
        config.validate()?;

        let store = Arc::new(load_policies(config)?);
        let validator = Arc::new(token_validator(config)?);

        let cache = Arc::new(DecisionCache::new(CacheConfig {
            enabled: config.cache.enabled,
            max_entries: config.cache.max_entries,
            ttl: config.cache.ttl(),
        }));

        let audit = AuditLogger::default()
            .with_enabled(config.audit.enabled)
            .with_log_inputs(config.audit.log_inputs);

        let superuser = match config.mqtt.superuser {
            SuperuserSource::Rule => SuperuserCheck::Rule,
            SuperuserSource::Scope => SuperuserCheck::Scope(config.mqtt.superuser_scope.clone()),
        };

        let pipeline = AuthorizationPipeline::builder(store, validator)
            .cache(cache)
            .router(PolicyRouter::new(router_config(config)))
            .resolver(SubjectResolver::new(claim_mapping(config)))
            .audit(audit)
            .invalid_token(config.oidc.invalid_token)
            .mqtt_package(config.mqtt.package.clone())
            .superuser(superuser)
            .request_timeout(config.service.request_timeout())
            .build();

        Ok(Self {
            config: Arc::new(config.clone()),
            pipeline: Arc::new(pipeline),
        })
    }

    /// The configuration this context was built from.
    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    /// The shared pipeline.
    pub fn pipeline(&self) -> &Arc<AuthorizationPipeline> {
        &self.pipeline
    }

    /// Reload policies whenever the policy tree changes.
    ///
    /// Returns `None` when `policies.watch` is off. Must be called from
    /// within a tokio runtime.
    pub fn spawn_policy_watcher(&self) -> PipelineResult<Option<JoinHandle<()>>> {
        if !self.config.policies.watch {
            return Ok(None);
        }

        let policies = &self.config.policies;
        let mut builder = PolicyWatcher::builder()
            .with_debounce(policies.watch_debounce())
            .watch_path(&policies.dir)?;
        if let Some(data_dir) = &policies.data_dir {
            builder = builder.watch_path_optional(data_dir);
        }
        let mut watcher = builder.build()?;

        let pipeline = Arc::clone(&self.pipeline);
        let handle = tokio::spawn(async move {
            while let Some(change) = watcher.next_change().await {
                info!(files = change.paths.len(), "policy files changed, reloading");
                if let Err(e) = pipeline.reload() {
                    warn!(error = %e, "keeping previous policies");
                }
            }
        });

        info!(dir = %policies.dir.display(), "watching policies for changes");
        Ok(Some(handle))
    }
}

fn load_policies(config: &WardenConfig) -> PipelineResult<SharedPolicyStore> {
    let policies = &config.policies;
    let mut source = PolicySource::new(&policies.dir);
    if let Some(data_dir) = policies.data_dir.as_ref().filter(|d| !d.as_os_str().is_empty()) {
        if data_dir.exists() {
            source = source.with_data_dir(data_dir);
        } else {
            warn!(dir = %data_dir.display(), "data directory not found, loading policies without data");
        }
    }

    let options = StoreOptions {
        strict_builtins: policies.strict_builtins,
    };
    let store = SharedPolicyStore::load(source, options)
        .map_err(|e| PipelineError::Config(e.to_string()))?;

    let snapshot = store.current();
    info!(
        packages = snapshot.list_packages().len(),
        policies = snapshot.policy_count(),
        data_documents = snapshot.data_documents(),
        "policies loaded"
    );
    Ok(store)
}

fn token_validator(config: &WardenConfig) -> PipelineResult<TokenValidator> {
    let oidc = &config.oidc;

    let source: Arc<dyn KeySource> = match &oidc.jwks_file {
        Some(path) => Arc::new(StaticKeySource::from_file(path)?),
        None => Arc::new(JwksClient::new(oidc.jwks_uri(), oidc.fetch_timeout())?),
    };
    let keys = KeyRing::new(
        source,
        KeyRingConfig {
            ttl: oidc.jwks_cache_ttl(),
            fetch_timeout: oidc.fetch_timeout(),
        },
    );

    let mut validator = ValidatorConfig::new(&oidc.issuer)
        .with_algorithms(ValidatorConfig::parse_algorithms(&oidc.algorithms)?);
    if let Some(audience) = oidc.audience.as_deref().filter(|a| !a.is_empty()) {
        validator = validator.with_audience(audience);
    }
    validator.leeway = oidc.leeway();

    Ok(TokenValidator::new(Arc::new(keys), validator))
}

fn router_config(config: &WardenConfig) -> RouterConfig {
    let policies = &config.policies;
    RouterConfig {
        namespace: policies.namespace.clone(),
        fallback_package: policies.fallback_package.clone().filter(|p| !p.is_empty()),
        overrides: policies.packages.clone(),
    }
}

fn claim_mapping(config: &WardenConfig) -> ClaimMapping {
    let claims = &config.claims;
    ClaimMapping {
        subject: claims.subject.clone(),
        username: claims.username.clone(),
        client_id: claims.client_id.clone(),
        authorized_party: claims.authorized_party.clone(),
        roles: claims.roles.clone(),
        groups: claims.groups.clone(),
        scope: claims.scope.clone(),
        service_account_prefix: claims.service_account_prefix.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const JWKS: &str = r#"{"keys":[{"kty":"oct","kid":"k1","alg":"HS256","k":"d2FyZGVuLXRlc3QtaG1hYy1zZWNyZXQtMDEyMzQ1Njc4OWFiY2RlZmdo"}]}"#;

    fn config(dir: &TempDir) -> WardenConfig {
        let policies = dir.path().join("policies");
        fs::create_dir_all(&policies).unwrap();
        fs::write(
            policies.join("authz.rego"),
            "package warden.authz\n\nimport rego.v1\n\ndefault allow := false\n",
        )
        .unwrap();
        let jwks = dir.path().join("jwks.json");
        fs::write(&jwks, JWKS).unwrap();

        let mut config = WardenConfig::default();
        config.oidc.issuer = "https://idp.example.com/realms/main".to_string();
        config.oidc.algorithms = vec!["HS256".to_string()];
        config.oidc.jwks_file = Some(jwks);
        config.policies.dir = policies;
        config.policies.data_dir = Some(dir.path().join("missing-data"));
        config
    }

    #[test]
    fn test_from_config() {
        let dir = TempDir::new().unwrap();
        let context = AppContext::from_config(&config(&dir)).unwrap();

        let stats = context.pipeline().stats();
        assert_eq!(stats.packages, vec!["warden.authz".to_string()]);
        assert_eq!(stats.revision, 1);
        assert_eq!(stats.key_fetch_attempts, 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.oidc.issuer = String::new();

        let err = AppContext::from_config(&config).unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_broken_policy_prevents_startup() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        fs::write(config.policies.dir.join("broken.rego"), "package warden.broken\n\nallow if {").unwrap();

        assert!(AppContext::from_config(&config).is_err());
    }

    #[test]
    fn test_empty_fallback_disables_it() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.policies.fallback_package = Some(String::new());

        assert!(router_config(&config).fallback_package.is_none());
    }

    #[tokio::test]
    async fn test_watcher_only_when_enabled() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);

        let context = AppContext::from_config(&config).unwrap();
        assert!(context.spawn_policy_watcher().unwrap().is_none());

        config.policies.watch = true;
        let context = AppContext::from_config(&config).unwrap();
        let handle = context.spawn_policy_watcher().unwrap().unwrap();
        handle.abort();
    }
}
