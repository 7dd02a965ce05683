//! Policy evaluation using OPA/Rego.
//!
//! This module turns a package and a [`PolicyInput`] into a [`Decision`] by
//! querying a handful of well-known rules with the `regorus` engine.

use std::sync::Arc;
use std::time::Instant;

use regorus::Engine;
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};
use warden_core::{Deadline, Decision, FilterPredicate, PolicyInput};

use crate::cache::DecisionCache;
use crate::config::EvaluatorConfig;
use crate::error::{AuthzError, AuthzResult};
use crate::store::PolicyStore;

/// Per-call evaluation options.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvalOptions {
    /// Bypass the decision cache for this call (no read, no write).
    pub skip_cache: bool,
    /// Abandon evaluation once this passes.
    pub deadline: Deadline,
}

impl EvalOptions {
    /// Options with the given deadline.
    pub fn with_deadline(deadline: Deadline) -> Self {
        Self {
            skip_cache: false,
            deadline,
        }
    }
}

/// A decision plus where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// The decision.
    pub decision: Decision,
    /// Whether it was served from the decision cache.
    pub cached: bool,
}

/// Anything that can answer "what does `package` decide for `input`".
pub trait Evaluator: Send + Sync {
    /// Evaluate `package` against `store` for `input`.
    fn evaluate(
        &self,
        store: &PolicyStore,
        package: &str,
        input: &PolicyInput,
        options: &EvalOptions,
    ) -> AuthzResult<Evaluation>;
}

/// Result of querying a single rule.
///
/// Keeps "the rule does not exist or is undefined" apart from "the engine
/// failed", which a plain `Option` would conflate.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleLookup {
    /// The rule produced a value.
    Present(Value),
    /// The rule is not defined for this input.
    Absent,
    /// The engine failed while evaluating the rule.
    Failed(String),
}

/// Rego policy evaluator backed by `regorus`.
#[derive(Debug, Clone, Default)]
pub struct PolicyEvaluator {
    config: EvaluatorConfig,
}

impl PolicyEvaluator {
    /// Create a new policy evaluator with the given configuration.
    pub fn new(config: EvaluatorConfig) -> Self {
        Self { config }
    }

    /// The evaluator configuration.
    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Evaluate the decision rules of `package`.
    ///
    /// `allow` decides access (absent or non-boolean means deny). `reason`,
    /// `filters` and `metadata` are optional. Any rule that fails to evaluate
    /// fails the whole decision.
    #[instrument(skip(self, store, input, deadline), fields(
        resource_type = %input.resource.resource_type,
        action = %input.action.name
    ))]
    pub fn decide(
        &self,
        store: &PolicyStore,
        package: &str,
        input: &PolicyInput,
        deadline: Deadline,
    ) -> AuthzResult<Decision> {
        let start = Instant::now();
        let mut engine = store.engine_for(input.to_value());

        let allowed = match self.rule(&mut engine, package, &self.config.allow_rule, deadline)? {
            RuleLookup::Present(Value::Bool(allowed)) => allowed,
            RuleLookup::Present(other) => {
                warn!(package, value = %other, "allow rule is not a boolean, denying");
                false
            }
            RuleLookup::Absent => false,
            RuleLookup::Failed(message) => {
                return Err(rule_failure(package, &self.config.allow_rule, &message));
            }
        };

        let reason = match self.rule(&mut engine, package, &self.config.reason_rule, deadline)? {
            RuleLookup::Present(Value::String(reason)) => reason,
            RuleLookup::Present(other) => other.to_string(),
            RuleLookup::Absent => String::new(),
            RuleLookup::Failed(message) => {
                return Err(rule_failure(package, &self.config.reason_rule, &message));
            }
        };

        let filters = match self.rule(&mut engine, package, &self.config.filters_rule, deadline)? {
            RuleLookup::Present(value) => parse_filters(package, value),
            RuleLookup::Absent => Vec::new(),
            RuleLookup::Failed(message) => {
                return Err(rule_failure(package, &self.config.filters_rule, &message));
            }
        };

        let metadata = match self.rule(&mut engine, package, &self.config.metadata_rule, deadline)? {
            RuleLookup::Present(Value::Object(metadata)) => metadata,
            RuleLookup::Present(_) | RuleLookup::Absent => Map::new(),
            RuleLookup::Failed(message) => {
                return Err(rule_failure(package, &self.config.metadata_rule, &message));
            }
        };

        let elapsed = start.elapsed();
        if elapsed > self.config.max_eval_time {
            warn!(package, elapsed_ms = elapsed.as_millis(), "slow policy evaluation");
        }
        debug!(package, allowed, elapsed_ms = elapsed.as_millis(), "policy evaluation complete");

        Ok(Decision {
            allowed,
            reason,
            policy: package.to_string(),
            filters,
            metadata,
        })
    }

    /// Evaluate the boolean superuser rule of `package`. Absent means `false`.
    pub fn superuser(
        &self,
        store: &PolicyStore,
        package: &str,
        input: &PolicyInput,
        deadline: Deadline,
    ) -> AuthzResult<bool> {
        let mut engine = store.engine_for(input.to_value());
        match self.rule(&mut engine, package, &self.config.superuser_rule, deadline)? {
            RuleLookup::Present(Value::Bool(granted)) => Ok(granted),
            RuleLookup::Present(_) | RuleLookup::Absent => Ok(false),
            RuleLookup::Failed(message) => {
                Err(rule_failure(package, &self.config.superuser_rule, &message))
            }
        }
    }

    /// Query `data.<package>.<rule>` on a primed engine.
    pub fn lookup(engine: &mut Engine, package: &str, rule: &str) -> RuleLookup {
        let query = format!("data.{}.{}", package, rule);
        let results = match engine.eval_query(query, false) {
            Ok(results) => results,
            Err(e) => return RuleLookup::Failed(e.to_string()),
        };

        for result in &results.result {
            for expr in &result.expressions {
                if expr.value == regorus::Value::Undefined {
                    continue;
                }
                return match serde_json::to_value(&expr.value) {
                    Ok(value) => RuleLookup::Present(value),
                    Err(e) => RuleLookup::Failed(format!("unrepresentable value: {}", e)),
                };
            }
        }
        RuleLookup::Absent
    }

    fn rule(
        &self,
        engine: &mut Engine,
        package: &str,
        rule: &str,
        deadline: Deadline,
    ) -> AuthzResult<RuleLookup> {
        deadline.check()?;
        Ok(Self::lookup(engine, package, rule))
    }
}

impl Evaluator for PolicyEvaluator {
    fn evaluate(
        &self,
        store: &PolicyStore,
        package: &str,
        input: &PolicyInput,
        options: &EvalOptions,
    ) -> AuthzResult<Evaluation> {
        let decision = self.decide(store, package, input, options.deadline)?;
        Ok(Evaluation {
            decision,
            cached: false,
        })
    }
}

fn rule_failure(package: &str, rule: &str, message: &str) -> AuthzError {
    AuthzError::Evaluation(format!("data.{}.{}: {}", package, rule, message))
}

/// Turn the `filters` rule value into predicates, skipping malformed entries.
fn parse_filters(package: &str, value: Value) -> Vec<FilterPredicate> {
    let Value::Array(items) = value else {
        warn!(package, "filters rule is not a list, ignoring");
        return Vec::new();
    };

    items
        .into_iter()
        .filter_map(|item| {
            let Value::Object(mut fields) = item else {
                return None;
            };
            let field = fields.remove("field")?;
            let operator = fields.remove("operator")?;
            let value = fields.remove("value")?;
            match (field, operator) {
                (Value::String(field), Value::String(operator)) => Some(FilterPredicate {
                    field,
                    operator,
                    value,
                }),
                _ => None,
            }
        })
        .collect()
}

/// An [`Evaluator`] that consults a [`DecisionCache`] before delegating.
#[derive(Debug, Clone)]
pub struct CachedEvaluator<E> {
    inner: E,
    cache: Arc<DecisionCache>,
}

impl<E: Evaluator> CachedEvaluator<E> {
    /// Wrap `inner` with `cache`.
    pub fn new(inner: E, cache: Arc<DecisionCache>) -> Self {
        Self { inner, cache }
    }

    /// The wrapped evaluator.
    pub fn inner(&self) -> &E {
        &self.inner
    }

    /// The shared cache.
    pub fn cache(&self) -> &Arc<DecisionCache> {
        &self.cache
    }
}

impl<E: Evaluator> Evaluator for CachedEvaluator<E> {
    fn evaluate(
        &self,
        store: &PolicyStore,
        package: &str,
        input: &PolicyInput,
        options: &EvalOptions,
    ) -> AuthzResult<Evaluation> {
        if options.skip_cache {
            return self.inner.evaluate(store, package, input, options);
        }

        if let Some(decision) = self.cache.get_for_revision(package, input, store.revision()) {
            debug!(package, cached = true, "returning cached decision");
            return Ok(Evaluation {
                decision,
                cached: true,
            });
        }

        let evaluation = self.inner.evaluate(store, package, input, options)?;
        self.cache
            .insert_for_revision(package, input, &evaluation.decision, store.revision());
        Ok(evaluation)
    }
}
