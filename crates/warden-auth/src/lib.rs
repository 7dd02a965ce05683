//! # Warden Auth
//!
//! Turns a bearer token into a [`Subject`](warden_core::Subject).
//!
//! - [`KeyRing`] caches the identity provider's signing keys and refreshes
//!   them on expiry or rotation, one fetch at a time.
//! - [`TokenValidator`] verifies signature, issuer, expiry and (optionally)
//!   audience.
//! - [`SubjectResolver`] maps verified claims to a user or service subject.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use warden_auth::{JwksClient, KeyRing, KeyRingConfig, SubjectResolver, TokenValidator, ValidatorConfig};
//! use warden_core::Deadline;
//!
//! let source = JwksClient::new("https://idp/realms/main/protocol/openid-connect/certs", Duration::from_secs(5))?;
//! let keys = Arc::new(KeyRing::new(Arc::new(source), KeyRingConfig::default()));
//! let validator = TokenValidator::new(keys, ValidatorConfig::new("https://idp/realms/main"));
//!
//! let claims = validator.validate(token, Deadline::none()).await?;
//! let subject = SubjectResolver::default().resolve(&claims);
//! ```

#![doc(html_root_url = "https://docs.rs/warden-auth/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod jwks;
pub mod keyring;
pub mod subject;
pub mod validator;

pub use error::{AuthError, AuthResult, KeyLookupError, TokenError};
pub use jwks::{Jwk, JwkSet, JwksClient, KeySource, StaticKeySource};
pub use keyring::{KeyRing, KeyRingConfig};
pub use subject::{ClaimMapping, SubjectResolver};
pub use validator::{TokenValidator, ValidatorConfig};

// Re-exported so callers can name algorithms and implement key sources
// without depending on jsonwebtoken or futures-util.
pub use futures_util::future::BoxFuture;
pub use jsonwebtoken::Algorithm;
