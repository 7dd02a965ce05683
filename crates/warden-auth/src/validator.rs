//! Bearer token validation.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde_json::{Map, Value};
use tracing::debug;
use warden_core::{Claims, Deadline};

use crate::error::{AuthError, AuthResult, KeyLookupError, TokenError};
use crate::keyring::KeyRing;

/// What a token must satisfy.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Required `iss` value.
    pub issuer: String,
    /// Required `aud` value; audience is not checked when `None`.
    pub audience: Option<String>,
    /// Accepted signing algorithms.
    pub algorithms: Vec<Algorithm>,
    /// Clock skew tolerated for `exp` and `iat`.
    pub leeway: Duration,
}

impl ValidatorConfig {
    /// Require `issuer`, accept RS256, no audience check, 60 s leeway.
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: None,
            algorithms: vec![Algorithm::RS256],
            leeway: Duration::from_secs(60),
        }
    }

    /// Require an audience.
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Replace the accepted algorithms.
    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.algorithms = algorithms;
        self
    }

    /// Parse algorithm names such as `"RS256"`.
    pub fn parse_algorithms<S: AsRef<str>>(names: &[S]) -> AuthResult<Vec<Algorithm>> {
        names
            .iter()
            .map(|name| {
                Algorithm::from_str(name.as_ref())
                    .map_err(|_| AuthError::Config(format!("unknown algorithm {}", name.as_ref())))
            })
            .collect()
    }
}

/// Verifies signed tokens and returns their claims.
#[derive(Debug)]
pub struct TokenValidator {
    keys: Arc<KeyRing>,
    config: ValidatorConfig,
}

impl TokenValidator {
    /// Create a validator.
    pub fn new(keys: Arc<KeyRing>, config: ValidatorConfig) -> Self {
        Self { keys, config }
    }

    /// The key ring backing this validator.
    pub fn key_ring(&self) -> &Arc<KeyRing> {
        &self.keys
    }

    /// Verify `token` and return its claims.
    ///
    /// Signature, issuer, `exp` and `iat` are always checked; the audience
    /// only when configured.
    pub async fn validate(&self, token: &str, deadline: Deadline) -> Result<Claims, TokenError> {
        let header = decode_header(token).map_err(|e| TokenError::Malformed(e.to_string()))?;
        if !self.config.algorithms.contains(&header.alg) {
            return Err(TokenError::Malformed(format!(
                "algorithm {:?} is not accepted",
                header.alg
            )));
        }

        let key = self
            .keys
            .decoding_key(header.kid.as_deref(), deadline)
            .await
            .map_err(|e| match e {
                KeyLookupError::Timeout if deadline.is_expired() => TokenError::DeadlineExceeded,
                other => TokenError::from(other),
            })?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[self.config.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.leeway = self.config.leeway.as_secs();
        match &self.config.audience {
            Some(audience) => validation.set_audience(&[audience.as_str()]),
            None => validation.validate_aud = false,
        }

        let data = decode::<Map<String, Value>>(token, &key, &validation).map_err(map_jwt_error)?;
        let claims = Claims::new(data.claims);
        self.check_issued_at(&claims)?;

        debug!(sub = ?claims.string("sub"), kid = ?header.kid, "token validated");
        Ok(claims)
    }

    fn check_issued_at(&self, claims: &Claims) -> Result<(), TokenError> {
        let issued_at = claims
            .get("iat")
            .and_then(Value::as_f64)
            .ok_or_else(|| TokenError::Invalid("missing required claim iat".to_string()))?;

        let now = chrono::Utc::now().timestamp() as f64;
        if issued_at > now + self.config.leeway.as_secs_f64() {
            return Err(TokenError::Invalid("token issued in the future".to_string()));
        }
        Ok(())
    }
}

fn map_jwt_error(error: jsonwebtoken::errors::Error) -> TokenError {
    match error.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::InvalidIssuer => TokenError::InvalidIssuer,
        ErrorKind::InvalidAudience => TokenError::InvalidAudience,
        ErrorKind::InvalidToken
        | ErrorKind::InvalidSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => TokenError::Malformed(error.to_string()),
        _ => TokenError::Invalid(error.to_string()),
    }
}
