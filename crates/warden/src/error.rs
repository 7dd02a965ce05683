//! Errors surfaced by the authorization pipeline.

use thiserror::Error;
use warden_auth::{AuthError, TokenError};
use warden_authz::AuthzError;
use warden_config::ConfigError;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Why a request could not be decided.
///
/// Every variant means "not authorized" to the caller.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PipelineError {
    /// The bearer token was rejected.
    #[error("authentication failed: {0}")]
    Authentication(#[from] TokenError),

    /// No policy package handles the resource type.
    #[error("unknown resource type '{0}'")]
    UnknownResourceType(String),

    /// A policy could not be evaluated.
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// The caller's deadline passed before a decision was reached.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Reloading policies failed; the previous policies are still served.
    #[error("policy reload failed: {0}")]
    Reload(String),

    /// The service could not be assembled from its configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// Check if this error was caused by the request rather than the service.
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::Authentication(_) | Self::UnknownResourceType(_))
    }

    /// Short label for metrics and logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "authentication",
            Self::UnknownResourceType(_) => "unknown_resource_type",
            Self::Evaluation(_) => "evaluation",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Reload(_) => "reload",
            Self::Config(_) => "config",
        }
    }
}

impl From<AuthzError> for PipelineError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::UnknownResourceType(resource_type) => Self::UnknownResourceType(resource_type),
            AuthzError::DeadlineExceeded => Self::DeadlineExceeded,
            AuthzError::Evaluation(message) => Self::Evaluation(message),
            other => Self::Evaluation(other.to_string()),
        }
    }
}

impl From<AuthError> for PipelineError {
    fn from(err: AuthError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<ConfigError> for PipelineError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
