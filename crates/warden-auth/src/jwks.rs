//! JSON Web Key Sets and where they come from.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use jsonwebtoken::DecodingKey;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AuthError, AuthResult, KeyLookupError};

/// A JSON Web Key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type (`RSA`, `EC`, `OKP`, `oct`).
    pub kty: String,

    /// Key ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Algorithm (e.g. `RS256`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    /// Public key use (`sig` or `enc`).
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub use_: Option<String>,

    /// RSA modulus (base64url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA public exponent (base64url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    /// Curve name for `EC`/`OKP` keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// Curve x coordinate (base64url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// Curve y coordinate (base64url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,

    /// Symmetric key value for `oct` keys (base64url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<String>,
}

impl Jwk {
    /// Check if this key can be used for signature verification.
    pub fn is_signing_key(&self) -> bool {
        self.use_.as_deref() != Some("enc")
    }

    /// Build a verification key.
    pub fn decoding_key(&self) -> Result<DecodingKey, KeyLookupError> {
        let unusable = |e: jsonwebtoken::errors::Error| KeyLookupError::UnusableKey(e.to_string());
        match self.kty.as_str() {
            "RSA" => {
                let n = self.component("n", self.n.as_deref())?;
                let e = self.component("e", self.e.as_deref())?;
                DecodingKey::from_rsa_components(n, e).map_err(unusable)
            }
            "EC" => {
                let x = self.component("x", self.x.as_deref())?;
                let y = self.component("y", self.y.as_deref())?;
                DecodingKey::from_ec_components(x, y).map_err(unusable)
            }
            "OKP" => {
                let x = self.component("x", self.x.as_deref())?;
                DecodingKey::from_ed_components(x).map_err(unusable)
            }
            "oct" => {
                let k = self.component("k", self.k.as_deref())?;
                DecodingKey::from_base64_secret(&standard_base64(k)).map_err(unusable)
            }
            other => Err(KeyLookupError::UnusableKey(format!(
                "unsupported key type {}",
                other
            ))),
        }
    }

    fn component<'a>(&self, name: &str, value: Option<&'a str>) -> Result<&'a str, KeyLookupError> {
        value.ok_or_else(|| {
            KeyLookupError::UnusableKey(format!(
                "{} key {:?} is missing '{}'",
                self.kty, self.kid, name
            ))
        })
    }
}

/// Re-encode unpadded base64url as padded standard base64.
fn standard_base64(url_safe: &str) -> String {
    let mut out: String = url_safe
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            c => c,
        })
        .collect();
    while out.len() % 4 != 0 {
        out.push('=');
    }
    out
}

/// A JSON Web Key Set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    /// The keys.
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    /// The key matching `kid`, or the first signing key when the token has
    /// no key id.
    pub fn find(&self, kid: Option<&str>) -> Option<&Jwk> {
        match kid {
            Some(kid) => self
                .keys
                .iter()
                .find(|k| k.kid.as_deref() == Some(kid) && k.is_signing_key()),
            None => self.keys.iter().find(|k| k.is_signing_key()),
        }
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if the set has no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Something that can produce the current key set.
pub trait KeySource: Send + Sync + fmt::Debug {
    /// Fetch the current key set.
    fn fetch(&self) -> BoxFuture<'_, Result<JwkSet, KeyLookupError>>;

    /// Human-readable origin for logs.
    fn describe(&self) -> String;
}

/// Fetches a key set over HTTP from an identity provider.
#[derive(Debug, Clone)]
pub struct JwksClient {
    uri: String,
    client: reqwest::Client,
}

impl JwksClient {
    /// Create a client for `uri` whose requests give up after `timeout`.
    pub fn new(uri: impl Into<String>, timeout: Duration) -> AuthResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(uri, client))
    }

    /// Create a client with a custom HTTP client.
    pub fn with_client(uri: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            uri: uri.into(),
            client,
        }
    }

    async fn fetch_keys(&self) -> Result<JwkSet, KeyLookupError> {
        debug!(jwks_uri = %self.uri, "fetching signing keys");

        let response = self
            .client
            .get(&self.uri)
            .send()
            .await
            .map_err(|e| KeyLookupError::fetch(&self.uri, e.to_string()))?;

        if !response.status().is_success() {
            return Err(KeyLookupError::fetch(
                &self.uri,
                format!("HTTP {}", response.status()),
            ));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| KeyLookupError::fetch(&self.uri, format!("invalid key set: {}", e)))
    }
}

impl KeySource for JwksClient {
    fn fetch(&self) -> BoxFuture<'_, Result<JwkSet, KeyLookupError>> {
        self.fetch_keys().boxed()
    }

    fn describe(&self) -> String {
        self.uri.clone()
    }
}

/// A fixed key set, e.g. loaded from a file for offline deployments.
#[derive(Debug, Clone)]
pub struct StaticKeySource {
    keys: JwkSet,
    origin: String,
}

impl StaticKeySource {
    /// Serve `keys`.
    pub fn new(keys: JwkSet) -> Self {
        Self {
            keys,
            origin: "static".to_string(),
        }
    }

    /// Parse a key set document.
    pub fn from_json(json: &str) -> AuthResult<Self> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    /// Read a key set document from disk.
    pub fn from_file(path: impl AsRef<Path>) -> AuthResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut source = Self::from_json(&content)?;
        source.origin = path.display().to_string();
        Ok(source)
    }
}

impl KeySource for StaticKeySource {
    fn fetch(&self) -> BoxFuture<'_, Result<JwkSet, KeyLookupError>> {
        let keys = self.keys.clone();
        async move { Ok(keys) }.boxed()
    }

    fn describe(&self) -> String {
        self.origin.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_SET: &str = r#"{
        "keys": [
            {"kty": "RSA", "kid": "enc-1", "use": "enc", "n": "AQAB", "e": "AQAB"},
            {"kty": "oct", "kid": "k1", "alg": "HS256", "k": "d2FyZGVuLXRlc3QtaG1hYy1zZWNyZXQtMDEyMzQ1Njc4OWFiY2RlZmdo"}
        ]
    }"#;

    #[test]
    fn test_find_by_kid_skips_encryption_keys() {
        let set: JwkSet = serde_json::from_str(KEY_SET).unwrap();
        assert!(set.find(Some("enc-1")).is_none());
        assert_eq!(set.find(Some("k1")).unwrap().kty, "oct");
        assert_eq!(set.find(None).unwrap().kid.as_deref(), Some("k1"));
        assert!(set.find(Some("missing")).is_none());
    }

    #[test]
    fn test_oct_key_builds_decoding_key() {
        let set: JwkSet = serde_json::from_str(KEY_SET).unwrap();
        assert!(set.find(Some("k1")).unwrap().decoding_key().is_ok());
    }

    #[test]
    fn test_missing_component_is_unusable() {
        let jwk = Jwk {
            kty: "RSA".to_string(),
            kid: Some("r1".to_string()),
            alg: None,
            use_: None,
            n: None,
            e: Some("AQAB".to_string()),
            crv: None,
            x: None,
            y: None,
            k: None,
        };
        assert!(matches!(jwk.decoding_key(), Err(KeyLookupError::UnusableKey(_))));
    }

    #[test]
    fn test_standard_base64() {
        assert_eq!(standard_base64("ab-_cd"), "ab+/cd==");
        assert_eq!(standard_base64("abcd"), "abcd");
    }

    #[tokio::test]
    async fn test_static_source_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jwks.json");
        std::fs::write(&path, KEY_SET).unwrap();

        let source = StaticKeySource::from_file(&path).unwrap();
        assert!(source.describe().ends_with("jwks.json"));
        assert_eq!(source.fetch().await.unwrap().len(), 2);
    }
}
