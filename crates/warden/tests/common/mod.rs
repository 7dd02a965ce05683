//! Shared setup for pipeline integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use tempfile::TempDir;
use warden::{AuditLogger, AuthorizationPipeline, MemoryAuditSink, PipelineBuilder};
use warden_auth::{KeyRing, KeyRingConfig, StaticKeySource, TokenValidator, ValidatorConfig};
use warden_authz::{CacheConfig, DecisionCache, PolicySource, SharedPolicyStore, StoreOptions};

pub const ISSUER: &str = "https://idp.example.com/realms/main";

const SECRET: &[u8] = b"warden-test-hmac-secret-0123456789abcdefgh";
const OTHER_SECRET: &[u8] = b"rotated-hmac-secret-for-warden-key-two!!!!";

const JWKS: &str = r#"{"keys":[{"kty":"oct","kid":"k1","alg":"HS256","use":"sig","k":"d2FyZGVuLXRlc3QtaG1hYy1zZWNyZXQtMDEyMzQ1Njc4OWFiY2RlZmdo"}]}"#;

/// A pipeline over a private copy of the fixture policy tree.
pub struct Harness {
    pub dir: TempDir,
    pub pipeline: AuthorizationPipeline,
    pub audit: Arc<MemoryAuditSink>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(|builder| builder)
    }

    pub fn with(configure: impl FnOnce(PipelineBuilder) -> PipelineBuilder) -> Self {
        let dir = TempDir::new().unwrap();
        let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
        copy_tree(&fixtures, dir.path());

        let source = PolicySource::new(dir.path().join("policies"))
            .with_data_dir(dir.path().join("data"));
        let store = SharedPolicyStore::load(source, StoreOptions::default()).unwrap();

        let keys = KeyRing::new(
            Arc::new(StaticKeySource::from_json(JWKS).unwrap()),
            KeyRingConfig::default(),
        );
        let validator = TokenValidator::new(
            Arc::new(keys),
            ValidatorConfig::new(ISSUER).with_algorithms(vec![Algorithm::HS256]),
        );

        let audit = Arc::new(MemoryAuditSink::new());
        let builder = AuthorizationPipeline::builder(Arc::new(store), Arc::new(validator))
            .cache(Arc::new(DecisionCache::new(CacheConfig::default())))
            .audit(AuditLogger::new(audit.clone()));

        Self {
            pipeline: configure(builder).build(),
            dir,
            audit,
        }
    }

    /// Write `content` to `relative` under the policy tree copy.
    pub fn write(&self, relative: &str, content: &str) {
        let path = self.dir.path().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}

fn copy_tree(from: &Path, to: &Path) {
    fs::create_dir_all(to).unwrap();
    for entry in fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        let target = to.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            copy_tree(&entry.path(), &target);
        } else {
            fs::copy(entry.path(), target).unwrap();
        }
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn sign(claims: &Value) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some("k1".to_string());
    encode(&header, claims, &EncodingKey::from_secret(SECRET)).unwrap()
}

/// Signed with a key the identity provider never published under `k1`.
pub fn forged(claims: &Value) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some("k1".to_string());
    encode(&header, claims, &EncodingKey::from_secret(OTHER_SECRET)).unwrap()
}

pub fn user_claims(sub: &str, groups: &[&str]) -> Value {
    json!({
        "iss": ISSUER,
        "sub": sub,
        "iat": now(),
        "exp": now() + 300,
        "preferred_username": sub,
        "groups": groups,
    })
}

pub fn service_claims(client_id: &str, scopes: &[&str]) -> Value {
    json!({
        "iss": ISSUER,
        "sub": format!("sa-{client_id}"),
        "iat": now(),
        "exp": now() + 300,
        "preferred_username": format!("service-account-{client_id}"),
        "client_id": client_id,
        "scope": scopes.join(" "),
    })
}

pub fn user_token(sub: &str, groups: &[&str]) -> String {
    sign(&user_claims(sub, groups))
}

pub fn service_token(client_id: &str, scopes: &[&str]) -> String {
    sign(&service_claims(client_id, scopes))
}

pub fn expired_token(sub: &str) -> String {
    let mut claims = user_claims(sub, &[]);
    claims["iat"] = json!(now() - 7200);
    claims["exp"] = json!(now() - 3600);
    sign(&claims)
}
