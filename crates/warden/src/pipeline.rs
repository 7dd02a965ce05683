//! The authorization pipeline.
//!
//! ```text
//! token ──► TokenValidator ──► SubjectResolver ──► PolicyInput
//!                                                      │
//!        Decision ◄── CachedEvaluator ◄── PolicyRouter ◄┘
//!            │
//!            └──► AuditLogger ──► caller
//! ```
//!
//! Every invocation ends with exactly one audit event, whether a decision
//! was reached or not. Errors are never turned into an allow.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};
use warden_auth::{SubjectResolver, TokenError, TokenValidator};
use warden_authz::{
    CacheConfig, CacheStats, CachedEvaluator, DecisionCache, EvalOptions, Evaluation, Evaluator,
    PolicyEvaluator, PolicyRouter, PolicyStore, ReloadSummary, SharedPolicyStore,
};
use warden_config::InvalidTokenPolicy;
use warden_core::{
    Action, AuditRecord, Deadline, Decision, PolicyInput, RequestId, Resource, Subject,
};
use warden_telemetry::metrics::{
    record_decision, record_evaluation_error, record_policy_reload, record_token_failure,
};

use crate::audit::AuditLogger;
use crate::error::{PipelineError, PipelineResult};
use crate::mqtt::{bearer_token, SuperuserCheck};

/// Default MQTT policy package.
pub const DEFAULT_MQTT_PACKAGE: &str = "warden.mqtt.acl";

/// One generic authorization question.
///
/// Deserializes from `{resource, action, context?, request_id?,
/// source_service?, skip_cache?}`; the token and deadline are set in code.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeRequest {
    /// Bearer token, with or without the `Bearer ` prefix.
    #[serde(skip)]
    pub token: Option<String>,
    /// The resource being accessed.
    pub resource: Resource,
    /// The requested action.
    pub action: Action,
    /// Caller-supplied environment entries.
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Correlation id; generated when absent.
    #[serde(default)]
    pub request_id: Option<String>,
    /// Calling service.
    #[serde(default)]
    pub source_service: Option<String>,
    /// Bypass the decision cache (no read, no write).
    #[serde(default)]
    pub skip_cache: bool,
    /// Overrides the pipeline's request timeout.
    #[serde(skip)]
    pub deadline: Option<Deadline>,
}

impl AuthorizeRequest {
    /// A request for `action` on `resource` without a token.
    pub fn new(resource: Resource, action: Action) -> Self {
        Self {
            token: None,
            resource,
            action,
            context: Map::new(),
            request_id: None,
            source_service: None,
            skip_cache: false,
            deadline: None,
        }
    }

    /// Set the bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Add one context entry.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Set the correlation id.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Set the calling service.
    pub fn with_source_service(mut self, service: impl Into<String>) -> Self {
        self.source_service = Some(service.into());
        self
    }

    /// Bypass the decision cache.
    pub fn skip_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }

    /// Abandon the request at `deadline`.
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// The answer to an [`AuthorizeRequest`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthorizeResponse {
    /// The decision.
    pub decision: Decision,
    /// Whether it came from the decision cache.
    pub cached: bool,
    /// Correlation id of the request.
    pub request_id: String,
    /// End-to-end latency in milliseconds.
    pub latency_ms: f64,
}

impl From<AuditRecord> for AuthorizeResponse {
    fn from(record: AuditRecord) -> Self {
        Self {
            decision: record.decision,
            cached: record.cached,
            request_id: record.request_id,
            latency_ms: record.latency_ms,
        }
    }
}

/// Pipeline state for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    /// Decision cache counters.
    pub cache: CacheStats,
    /// Packages in the served store, sorted.
    pub packages: Vec<String>,
    /// Policy modules in the served store.
    pub policy_count: usize,
    /// Data documents in the served store.
    pub data_documents: usize,
    /// Revision of the served store.
    pub revision: u64,
    /// When the served store was compiled.
    pub loaded_at: DateTime<Utc>,
    /// Signing key set fetches attempted so far.
    pub key_fetch_attempts: u64,
    /// Signing keys currently held.
    pub signing_keys: usize,
}

/// Builder for an [`AuthorizationPipeline`].
#[derive(Debug)]
pub struct PipelineBuilder {
    store: Arc<SharedPolicyStore>,
    validator: Arc<TokenValidator>,
    evaluator: PolicyEvaluator,
    cache: Option<Arc<DecisionCache>>,
    router: PolicyRouter,
    resolver: SubjectResolver,
    audit: AuditLogger,
    invalid_token: InvalidTokenPolicy,
    mqtt_package: String,
    superuser: SuperuserCheck,
    request_timeout: Option<Duration>,
}

impl PipelineBuilder {
    /// Use `evaluator` for fresh evaluations.
    pub fn evaluator(mut self, evaluator: PolicyEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Share `cache` instead of creating a default one.
    pub fn cache(mut self, cache: Arc<DecisionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Route resource types with `router`.
    pub fn router(mut self, router: PolicyRouter) -> Self {
        self.router = router;
        self
    }

    /// Map claims with `resolver`.
    pub fn resolver(mut self, resolver: SubjectResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Write audit events through `audit`.
    pub fn audit(mut self, audit: AuditLogger) -> Self {
        self.audit = audit;
        self
    }

    /// What an invalid token means on the generic path.
    pub fn invalid_token(mut self, policy: InvalidTokenPolicy) -> Self {
        self.invalid_token = policy;
        self
    }

    /// Package deciding MQTT topic access.
    pub fn mqtt_package(mut self, package: impl Into<String>) -> Self {
        self.mqtt_package = package.into();
        self
    }

    /// How MQTT superusers are recognized.
    pub fn superuser(mut self, check: SuperuserCheck) -> Self {
        self.superuser = check;
        self
    }

    /// Deadline applied to requests that do not bring their own.
    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Assemble the pipeline.
    pub fn build(self) -> AuthorizationPipeline {
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(DecisionCache::new(CacheConfig::default())));
        cache.reset(self.store.revision());

        AuthorizationPipeline {
            store: self.store,
            validator: self.validator,
            evaluator: CachedEvaluator::new(self.evaluator, cache),
            router: self.router,
            resolver: self.resolver,
            audit: self.audit,
            invalid_token: self.invalid_token,
            mqtt_package: self.mqtt_package,
            superuser: self.superuser,
            request_timeout: self.request_timeout,
        }
    }
}

/// Answers authorization questions end to end.
///
/// All collaborators are injected at construction; the pipeline holds no
/// global state and is shared across tasks behind an `Arc`.
#[derive(Debug)]
pub struct AuthorizationPipeline {
    store: Arc<SharedPolicyStore>,
    validator: Arc<TokenValidator>,
    evaluator: CachedEvaluator<PolicyEvaluator>,
    router: PolicyRouter,
    resolver: SubjectResolver,
    audit: AuditLogger,
    invalid_token: InvalidTokenPolicy,
    mqtt_package: String,
    superuser: SuperuserCheck,
    request_timeout: Option<Duration>,
}

impl AuthorizationPipeline {
    /// Start building a pipeline over `store`, verifying tokens with
    /// `validator`.
    pub fn builder(store: Arc<SharedPolicyStore>, validator: Arc<TokenValidator>) -> PipelineBuilder {
        PipelineBuilder {
            store,
            validator,
            evaluator: PolicyEvaluator::default(),
            cache: None,
            router: PolicyRouter::default(),
            resolver: SubjectResolver::default(),
            audit: AuditLogger::default(),
            invalid_token: InvalidTokenPolicy::default(),
            mqtt_package: DEFAULT_MQTT_PACKAGE.to_string(),
            superuser: SuperuserCheck::default(),
            request_timeout: None,
        }
    }

    /// Decide a generic authorization request.
    ///
    /// An absent token means the anonymous subject. An invalid token is
    /// rejected or treated as anonymous according to the configured
    /// [`InvalidTokenPolicy`]. Any error means "not authorized".
    #[instrument(skip_all, fields(
        resource_type = %request.resource.resource_type,
        action = %request.action.name
    ))]
    pub async fn authorize(&self, request: AuthorizeRequest) -> PipelineResult<AuthorizeResponse> {
        let start = Instant::now();
        let request_id = RequestId::or_generate(request.request_id.as_deref());
        let deadline = request.deadline.unwrap_or_else(|| self.default_deadline());
        let source_service = request.source_service.as_deref();

        let subject = match self.subject_for(request.token.as_deref(), deadline).await {
            Ok(subject) => subject,
            Err(err) => {
                self.fail(&request_id, &err, None, source_service);
                return Err(err);
            }
        };

        let mut environment = request.context;
        environment.extend(Self::request_environment(&request_id));
        let input = PolicyInput {
            subject: Some(subject),
            resource: request.resource,
            action: request.action,
            environment,
        };

        let snapshot = self.store.current();
        let options = EvalOptions {
            skip_cache: request.skip_cache,
            deadline,
        };
        let evaluation = self
            .router
            .resolve(&snapshot, &input.resource.resource_type)
            .map_err(PipelineError::from)
            .and_then(|package| self.evaluate(&snapshot, &package, &input, options));

        match evaluation {
            Ok(evaluation) => {
                let record = self.record(&evaluation, &input, &request_id, start, source_service);
                Ok(record.into())
            }
            Err(err) => {
                self.fail(&request_id, &err, Some(&input), source_service);
                Err(err)
            }
        }
    }

    /// Recompile policies from disk, swap them in and drop cached decisions.
    ///
    /// On failure the previous policies keep serving and the cache is left
    /// untouched.
    pub fn reload(&self) -> PipelineResult<ReloadSummary> {
        match self.store.reload() {
            Ok(summary) => {
                let dropped = self.evaluator.cache().reset(summary.revision);
                record_policy_reload(true);
                info!(
                    revision = summary.revision,
                    packages = summary.packages,
                    dropped_decisions = dropped,
                    "policies reloaded"
                );
                Ok(summary)
            }
            Err(err) => {
                record_policy_reload(false);
                warn!(error = %err, "policy reload failed");
                Err(PipelineError::Reload(err.to_string()))
            }
        }
    }

    /// Cache, store and key ring state.
    pub fn stats(&self) -> PipelineStats {
        let snapshot = self.store.current();
        let keys = self.validator.key_ring();
        PipelineStats {
            cache: self.evaluator.cache().stats(),
            packages: snapshot.list_packages(),
            policy_count: snapshot.policy_count(),
            data_documents: snapshot.data_documents(),
            revision: snapshot.revision(),
            loaded_at: snapshot.loaded_at(),
            key_fetch_attempts: keys.fetch_attempts(),
            signing_keys: keys.key_count(),
        }
    }

    /// Drop cached decisions, for one package or all of them.
    pub fn invalidate_cache(&self, package: Option<&str>) -> usize {
        self.evaluator.cache().invalidate(package)
    }

    /// The shared policy store.
    pub fn store(&self) -> &Arc<SharedPolicyStore> {
        &self.store
    }

    /// The decision cache.
    pub fn cache(&self) -> &Arc<DecisionCache> {
        self.evaluator.cache()
    }

    pub(crate) fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    pub(crate) fn policy_evaluator(&self) -> &PolicyEvaluator {
        self.evaluator.inner()
    }

    pub(crate) fn mqtt_package(&self) -> &str {
        &self.mqtt_package
    }

    pub(crate) fn superuser_check(&self) -> &SuperuserCheck {
        &self.superuser
    }

    pub(crate) fn default_deadline(&self) -> Deadline {
        self.request_timeout.map_or_else(Deadline::none, Deadline::after)
    }

    /// Verify `token` and resolve its subject.
    pub(crate) async fn verify_token(&self, token: &str, deadline: Deadline) -> PipelineResult<Subject> {
        match self.validator.validate(token, deadline).await {
            Ok(claims) => Ok(self.resolver.resolve(&claims)),
            Err(TokenError::DeadlineExceeded) => {
                record_token_failure(TokenError::DeadlineExceeded.kind());
                Err(PipelineError::DeadlineExceeded)
            }
            Err(err) => {
                record_token_failure(err.kind());
                debug!(error = %err, "token rejected");
                Err(err.into())
            }
        }
    }

    async fn subject_for(&self, token: Option<&str>, deadline: Deadline) -> PipelineResult<Subject> {
        let Some(token) = token.and_then(bearer_token) else {
            return Ok(Subject::anonymous());
        };

        match self.verify_token(token, deadline).await {
            Err(PipelineError::Authentication(err))
                if self.invalid_token == InvalidTokenPolicy::Anonymous =>
            {
                warn!(reason = err.kind(), "invalid token, continuing as anonymous");
                Ok(Subject::anonymous())
            }
            other => other,
        }
    }

    /// Evaluate `package` for `input` through the cache.
    pub(crate) fn evaluate(
        &self,
        store: &PolicyStore,
        package: &str,
        input: &PolicyInput,
        options: EvalOptions,
    ) -> PipelineResult<Evaluation> {
        self.evaluator
            .evaluate(store, package, input, &options)
            .map_err(PipelineError::from)
    }

    /// Audit and count a decision.
    pub(crate) fn record(
        &self,
        evaluation: &Evaluation,
        input: &PolicyInput,
        request_id: &RequestId,
        start: Instant,
        source_service: Option<&str>,
    ) -> AuditRecord {
        let elapsed = start.elapsed();
        record_decision(
            &evaluation.decision.policy,
            evaluation.decision.allowed,
            evaluation.cached,
            elapsed,
        );
        self.audit.log_decision(
            request_id.as_str(),
            &evaluation.decision,
            input,
            elapsed.as_secs_f64() * 1000.0,
            evaluation.cached,
            source_service,
        )
    }

    fn fail(
        &self,
        request_id: &RequestId,
        err: &PipelineError,
        input: Option<&PolicyInput>,
        source_service: Option<&str>,
    ) {
        if !err.is_client_error() {
            record_evaluation_error(err.kind());
        }
        self.audit
            .log_error(request_id.as_str(), &err.to_string(), input, source_service);
    }

    /// Attach the request id and current time to `input`.
    pub(crate) fn with_request_environment(mut input: PolicyInput, request_id: &RequestId) -> PolicyInput {
        input.environment.extend(Self::request_environment(request_id));
        input
    }

    fn request_environment(request_id: &RequestId) -> [(String, Value); 2] {
        let now = Utc::now().timestamp_micros() as f64 / 1_000_000.0;
        [
            ("request_id".to_string(), Value::from(request_id.as_str())),
            ("timestamp".to_string(), Value::from(now)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use warden_auth::{JwkSet, KeyRing, KeyRingConfig, StaticKeySource, ValidatorConfig};
    use warden_authz::RouterConfig;
    use warden_core::ResourceType;

    const AUTHZ_POLICY: &str = r#"
package warden.authz

import rego.v1

default allow := false

allow if input.action.name == "read"

reason := "reads are open" if input.action.name == "read"
"#;

    fn pipeline(router: PolicyRouter) -> AuthorizationPipeline {
        let store = PolicyStore::builder()
            .policy("authz.rego", AUTHZ_POLICY)
            .build()
            .unwrap();
        let keys = KeyRing::new(
            Arc::new(StaticKeySource::new(JwkSet::default())),
            KeyRingConfig::default(),
        );
        let validator = TokenValidator::new(Arc::new(keys), ValidatorConfig::new("https://idp"));
        AuthorizationPipeline::builder(Arc::new(SharedPolicyStore::new(store)), Arc::new(validator))
            .router(router)
            .audit(AuditLogger::disabled())
            .build()
    }

    #[test]
    fn test_request_builder() {
        let request = AuthorizeRequest::new(Resource::new("dataset", "ds-1"), Action::new("read"))
            .with_token("abc")
            .with_context("purpose", "analytics")
            .with_request_id("req-1")
            .with_source_service("gateway")
            .skip_cache();

        assert_eq!(request.token.as_deref(), Some("abc"));
        assert_eq!(request.context["purpose"], json!("analytics"));
        assert_eq!(request.request_id.as_deref(), Some("req-1"));
        assert!(request.skip_cache);
    }

    #[test]
    fn test_request_deserializes_without_optional_fields() {
        let request: AuthorizeRequest = serde_json::from_value(json!({
            "resource": {"type": "dataset", "id": "ds-1", "attributes": {"access_level": "open"}},
            "action": {"name": "read"}
        }))
        .unwrap();

        assert_eq!(request.resource.resource_type, ResourceType::Dataset);
        assert!(request.token.is_none());
        assert!(request.context.is_empty());
        assert!(!request.skip_cache);
    }

    #[test]
    fn test_request_environment_wins_over_context() {
        let request_id = RequestId::from("req-1");
        let input = PolicyInput::new(None, Resource::new("dataset", "ds-1"), Action::new("read"))
            .with_environment("request_id", "spoofed")
            .with_environment("purpose", "analytics");

        let input = AuthorizationPipeline::with_request_environment(input, &request_id);

        assert_eq!(input.environment["request_id"], json!("req-1"));
        assert_eq!(input.environment["purpose"], json!("analytics"));
        assert!(input.environment["timestamp"].as_f64().unwrap() > 0.0);
    }

    #[tokio::test]
    async fn test_anonymous_request_uses_fallback() {
        let pipeline = pipeline(PolicyRouter::default());
        let request = AuthorizeRequest::new(Resource::new("widget", "w-1"), Action::new("read"))
            .with_request_id("req-7");

        let response = pipeline.authorize(request).await.unwrap();

        assert!(response.decision.allowed);
        assert_eq!(response.decision.policy, "warden.authz");
        assert_eq!(response.decision.reason, "reads are open");
        assert_eq!(response.request_id, "req-7");
        assert!(!response.cached);
    }

    #[tokio::test]
    async fn test_unknown_resource_type_without_fallback() {
        let pipeline = pipeline(PolicyRouter::new(RouterConfig::namespaced("warden")));
        let request = AuthorizeRequest::new(Resource::new("widget", "w-1"), Action::new("read"));

        let err = pipeline.authorize(request).await.unwrap_err();

        assert!(matches!(err, PipelineError::UnknownResourceType(ref t) if t == "widget"));
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_expired_deadline_fails_closed() {
        let pipeline = pipeline(PolicyRouter::default());
        let request = AuthorizeRequest::new(Resource::new("widget", "w-1"), Action::new("read"))
            .with_deadline(Deadline::at(Instant::now()));

        let err = pipeline.authorize(request).await.unwrap_err();

        assert!(matches!(err, PipelineError::DeadlineExceeded));
    }

    #[test]
    fn test_reload_without_source_keeps_serving() {
        let pipeline = pipeline(PolicyRouter::default());

        let err = pipeline.reload().unwrap_err();

        assert_eq!(err.kind(), "reload");
        assert_eq!(pipeline.stats().revision, 1);
        assert_eq!(pipeline.stats().packages, vec!["warden.authz".to_string()]);
    }
}
