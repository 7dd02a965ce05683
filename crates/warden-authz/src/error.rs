//! Error types for the authorization crate.

use std::path::PathBuf;
use thiserror::Error;
use warden_core::DeadlineExceeded;

/// Result type for authorization operations.
pub type AuthzResult<T> = Result<T, AuthzError>;

/// Errors that can occur while loading or evaluating policies.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthzError {
    /// A policy or data file could not be loaded. The store is left untouched.
    #[error("failed to load policies from {path}: {message}")]
    PolicyLoad {
        /// File or directory that failed.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// The engine failed while answering a query.
    #[error("policy evaluation failed: {0}")]
    Evaluation(String),

    /// No package handles the resource type and no fallback is configured.
    #[error("no policy package for resource type '{0}'")]
    UnknownResourceType(String),

    /// The request deadline passed during evaluation.
    #[error("deadline exceeded during policy evaluation")]
    DeadlineExceeded,

    /// The store has no directory to reload from.
    #[error("policy store has no reload source")]
    NoReloadSource,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AuthzError {
    /// Create a policy load error.
    pub fn policy_load(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::PolicyLoad {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Check if this error was caused by the request rather than the service.
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::UnknownResourceType(_))
    }
}

impl From<DeadlineExceeded> for AuthzError {
    fn from(_: DeadlineExceeded) -> Self {
        Self::DeadlineExceeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_load_error() {
        let err = AuthzError::policy_load("/policies/broken.rego", "missing package header");
        assert!(err.to_string().contains("broken.rego"));
        assert!(err.to_string().contains("missing package header"));
    }

    #[test]
    fn test_client_error_classification() {
        assert!(AuthzError::UnknownResourceType("twin".to_string()).is_client_error());
        assert!(!AuthzError::Evaluation("boom".to_string()).is_client_error());
    }

    #[test]
    fn test_error_display() {
        let err = AuthzError::UnknownResourceType("twin".to_string());
        assert_eq!(err.to_string(), "no policy package for resource type 'twin'");
    }
}
