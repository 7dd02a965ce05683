//! Error types for authentication.

use thiserror::Error;

/// Result type for setting up authentication components.
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors constructing authentication components.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Reading a key set document failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A key set document could not be parsed.
    #[error("invalid key set: {0}")]
    KeySet(#[from] serde_json::Error),
}

/// Failures obtaining a verification key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum KeyLookupError {
    /// The key set could not be fetched.
    #[error("failed to fetch signing keys from {source_name}: {message}")]
    Fetch {
        /// Where keys were fetched from.
        source_name: String,
        /// Error message.
        message: String,
    },

    /// Fetching keys took longer than allowed.
    #[error("timed out fetching signing keys")]
    Timeout,

    /// No key matches the token's key id, even after a refresh.
    #[error("no signing key found for kid {kid:?}")]
    KeyNotFound {
        /// The token's key id.
        kid: Option<String>,
    },

    /// A key was found but cannot be used for verification.
    #[error("unusable signing key: {0}")]
    UnusableKey(String),
}

impl KeyLookupError {
    /// Create a fetch error.
    pub fn fetch(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fetch {
            source_name: source_name.into(),
            message: message.into(),
        }
    }
}

/// Reasons a bearer token is rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum TokenError {
    /// No bearer token was presented where one is required.
    #[error("missing bearer token")]
    Missing,

    /// The token has expired.
    #[error("token expired")]
    Expired,

    /// The token was issued by an unexpected issuer.
    #[error("invalid token issuer")]
    InvalidIssuer,

    /// The token is not meant for this audience.
    #[error("invalid token audience")]
    InvalidAudience,

    /// The token is structurally broken or its signature does not verify.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// No usable verification key.
    #[error("signing key error: {0}")]
    SigningKey(#[from] KeyLookupError),

    /// Any other validation failure.
    #[error("invalid token: {0}")]
    Invalid(String),

    /// The request deadline passed during validation.
    #[error("deadline exceeded during token validation")]
    DeadlineExceeded,
}

impl TokenError {
    /// Short label for metrics and logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Expired => "expired",
            Self::InvalidIssuer => "invalid_issuer",
            Self::InvalidAudience => "invalid_audience",
            Self::Malformed(_) => "malformed",
            Self::SigningKey(_) => "signing_key",
            Self::Invalid(_) => "invalid",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_lookup_converts_to_token_error() {
        let err: TokenError = KeyLookupError::KeyNotFound {
            kid: Some("k2".to_string()),
        }
        .into();
        assert_eq!(err.kind(), "signing_key");
        assert!(err.to_string().contains("k2"));
    }

    #[test]
    fn test_fetch_error_display() {
        let err = KeyLookupError::fetch("https://idp/certs", "connection refused");
        assert_eq!(
            err.to_string(),
            "failed to fetch signing keys from https://idp/certs: connection refused"
        );
    }
}
