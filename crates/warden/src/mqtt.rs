//! MQTT broker hooks.
//!
//! Brokers such as mosquitto with a go-auth style plugin ask three questions:
//! may this client connect, may it access this topic, and is it a superuser.
//! Topic access arrives as an access bitmask:
//!
//! | bit    | action      |
//! |--------|-------------|
//! | `0x01` | `read`      |
//! | `0x02` | `publish`   |
//! | `0x04` | `subscribe` |
//!
//! A combined mask is checked one action at a time in the fixed order
//! subscribe, publish, read, stopping at the first denial.

use std::fmt;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};
use warden_auth::TokenError;
use warden_authz::EvalOptions;
use warden_core::{Action, Decision, PolicyInput, RequestId, Resource, ResourceType, Subject};

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::AuthorizationPipeline;

/// Calling service recorded on audit events of broker checks.
pub const MQTT_SOURCE_SERVICE: &str = "mqtt-broker";

/// Reason on the decision returned when every requested action is allowed.
pub const AUTHORIZED_REASON: &str = "authorized";

/// One action of an MQTT access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MqttAction {
    /// Subscribe to a topic filter.
    Subscribe,
    /// Publish to a topic.
    Publish,
    /// Receive a message on a topic.
    Read,
    /// The broker sent an empty mask.
    Unknown,
}

impl MqttAction {
    /// Action name as seen by policies.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Publish => "publish",
            Self::Read => "read",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MqttAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// MQTT access bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessMask(u32);

impl AccessMask {
    /// Read access.
    pub const READ: u32 = 0x01;
    /// Publish access.
    pub const PUBLISH: u32 = 0x02;
    /// Subscribe access.
    pub const SUBSCRIBE: u32 = 0x04;

    /// Wrap a raw mask. Bits other than the three known ones are ignored.
    pub const fn new(bits: u32) -> Self {
        Self(bits)
    }

    /// The raw mask.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Actions to check, in evaluation order. Never empty: a mask without
    /// known bits decodes to [`MqttAction::Unknown`].
    pub fn actions(self) -> Vec<MqttAction> {
        let mut actions = Vec::with_capacity(3);
        if self.0 & Self::SUBSCRIBE != 0 {
            actions.push(MqttAction::Subscribe);
        }
        if self.0 & Self::PUBLISH != 0 {
            actions.push(MqttAction::Publish);
        }
        if self.0 & Self::READ != 0 {
            actions.push(MqttAction::Read);
        }
        if actions.is_empty() {
            actions.push(MqttAction::Unknown);
        }
        actions
    }
}

impl From<u32> for AccessMask {
    fn from(bits: u32) -> Self {
        Self::new(bits)
    }
}

/// How superusers are recognized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SuperuserCheck {
    /// Ask the `superuser` rule of the MQTT package.
    #[default]
    Rule,
    /// Require a scope on the token, e.g. `mqtt.admin`.
    Scope(String),
}

/// Strip an optional `Bearer ` prefix from an authorization value.
pub fn bearer_token(value: &str) -> Option<&str> {
    let value = value.trim();
    let token = match value.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        _ if value.eq_ignore_ascii_case("bearer") => "",
        _ => value,
    };
    (!token.is_empty()).then_some(token)
}

impl AuthorizationPipeline {
    /// Authenticate a connecting MQTT client.
    ///
    /// Unlike the generic path, a token is required and an invalid token is
    /// always an error.
    pub async fn authenticate_mqtt(&self, token: Option<&str>) -> PipelineResult<Subject> {
        let deadline = self.default_deadline();
        let token = token.and_then(bearer_token).ok_or(TokenError::Missing)?;
        let subject = self.verify_token(token, deadline).await?;
        debug!(subject_id = %subject.id, "mqtt client authenticated");
        Ok(subject)
    }

    /// Decide whether the token holder may access `topic` with `acc`.
    ///
    /// Each decoded action is evaluated against the MQTT package with the
    /// topic as resource id. The first denial is returned as is; when every
    /// action is allowed a single decision with reason `"authorized"` is
    /// returned.
    pub async fn authorize_mqtt(
        &self,
        token: Option<&str>,
        topic: &str,
        acc: impl Into<AccessMask>,
        request_id: Option<&str>,
    ) -> PipelineResult<Decision> {
        let request_id = RequestId::or_generate(request_id);
        let deadline = self.default_deadline();
        let package = self.mqtt_package();
        let actions = acc.into().actions();

        let subject = match self.authenticate_mqtt(token).await {
            Ok(subject) => subject,
            Err(err) => {
                self.audit()
                    .log_error(request_id.as_str(), &err.to_string(), None, Some(MQTT_SOURCE_SERVICE));
                return Err(err);
            }
        };

        let snapshot = self.store().current();
        for action in actions {
            let start = Instant::now();
            let input = PolicyInput::new(
                Some(subject.clone()),
                Resource::new(ResourceType::Topic, topic),
                Action::new(action.as_str()),
            );
            let input = Self::with_request_environment(input, &request_id);

            let evaluation = self
                .evaluate(&snapshot, package, &input, EvalOptions::with_deadline(deadline))
                .map_err(|err| {
                    self.audit().log_error(
                        request_id.as_str(),
                        &err.to_string(),
                        Some(&input),
                        Some(MQTT_SOURCE_SERVICE),
                    );
                    err
                })?;
            self.record(&evaluation, &input, &request_id, start, Some(MQTT_SOURCE_SERVICE));

            if !evaluation.decision.allowed {
                warn!(
                    request_id = %request_id,
                    topic,
                    action = %action,
                    reason = %evaluation.decision.reason,
                    "mqtt access denied"
                );
                return Ok(evaluation.decision);
            }
        }

        Ok(Decision::allow(package).with_reason(AUTHORIZED_REASON))
    }

    /// Whether the token holder is an MQTT superuser.
    ///
    /// Superuser checks skip the decision cache and the audit trail.
    pub async fn is_superuser(&self, token: Option<&str>) -> PipelineResult<bool> {
        let deadline = self.default_deadline();
        let subject = self.authenticate_mqtt(token).await?;

        let granted = match self.superuser_check() {
            SuperuserCheck::Scope(scope) => subject.has_scope(scope),
            SuperuserCheck::Rule => {
                let input = PolicyInput::new(
                    Some(subject.clone()),
                    Resource::new(ResourceType::Topic, ""),
                    Action::new("superuser"),
                );
                let snapshot = self.store().current();
                self.policy_evaluator()
                    .superuser(&snapshot, self.mqtt_package(), &input, deadline)
                    .map_err(PipelineError::from)?
            }
        };

        info!(subject_id = %subject.id, superuser = granted, "mqtt superuser check");
        Ok(granted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(bits: u32) -> Vec<&'static str> {
        AccessMask::new(bits)
            .actions()
            .into_iter()
            .map(MqttAction::as_str)
            .collect()
    }

    #[test]
    fn test_mask_decoding() {
        assert_eq!(names(0), vec!["unknown"]);
        assert_eq!(names(1), vec!["read"]);
        assert_eq!(names(2), vec!["publish"]);
        assert_eq!(names(4), vec!["subscribe"]);
        assert_eq!(names(3), vec!["publish", "read"]);
        assert_eq!(names(7), vec!["subscribe", "publish", "read"]);
    }

    #[test]
    fn test_unknown_bits_are_ignored() {
        assert_eq!(names(0x08), vec!["unknown"]);
        assert_eq!(names(0x09), vec!["read"]);
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(bearer_token("bearer  abc"), Some("abc"));
        assert_eq!(bearer_token("abc.def.ghi"), Some("abc.def.ghi"));
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("   "), None);
    }

    #[test]
    fn test_default_superuser_check() {
        assert_eq!(SuperuserCheck::default(), SuperuserCheck::Rule);
    }

    #[test]
    fn test_action_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(MqttAction::Subscribe).unwrap(),
            serde_json::json!("subscribe")
        );
    }
}
