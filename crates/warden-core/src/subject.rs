//! Callers and the claims they were resolved from.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifier used for the anonymous subject.
const ANONYMOUS_ID: &str = "anonymous";

/// Kind of caller behind a [`Subject`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    /// A human user.
    User,
    /// A machine client (service account).
    Service,
    /// An unauthenticated caller.
    Anonymous,
}

impl SubjectKind {
    /// Wire name of the kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Service => "service",
            Self::Anonymous => "anonymous",
        }
    }
}

impl std::fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verified token claims.
///
/// Claims are an open map on the wire. Code that needs a claim goes through
/// one of the typed accessors instead of indexing the map directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims(Map<String, Value>);

impl Claims {
    /// Wraps a claim map.
    pub fn new(claims: Map<String, Value>) -> Self {
        Self(claims)
    }

    /// Returns `true` if the claim is present (even when `null`).
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Raw claim value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Claim value when it is a non-empty string.
    pub fn string(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Claim value when it is an integer (e.g. `exp`, `iat`).
    pub fn integer(&self, name: &str) -> Option<i64> {
        self.0.get(name).and_then(Value::as_i64)
    }

    /// Value at a dotted path of nested objects, e.g. `realm_access.roles`.
    pub fn path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.0.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// String elements of the list at `path`; non-string elements are ignored.
    ///
    /// A single string value is treated as a one-element list.
    pub fn strings_at(&self, path: &str) -> Vec<&str> {
        match self.path(path) {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            Some(Value::String(s)) => vec![s.as_str()],
            _ => Vec::new(),
        }
    }

    /// Number of claims.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when there are no claims.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the underlying map.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for Claims {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// The caller an authorization question is asked about.
///
/// Groups and scopes are kept as sorted sets: duplicates collapse and the
/// serialized form is stable regardless of claim order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    /// Stable identifier of the caller.
    pub id: String,
    /// User, service or anonymous.
    #[serde(rename = "type")]
    pub kind: SubjectKind,
    /// Group memberships (leaf names, no path separators).
    #[serde(default)]
    pub groups: BTreeSet<String>,
    /// Granted OAuth scopes.
    #[serde(default)]
    pub scopes: BTreeSet<String>,
    /// The verified claims the subject was resolved from.
    #[serde(default)]
    pub claims: Claims,
}

impl Subject {
    /// Creates a subject with no groups, scopes or claims.
    pub fn new(id: impl Into<String>, kind: SubjectKind) -> Self {
        Self {
            id: id.into(),
            kind,
            groups: BTreeSet::new(),
            scopes: BTreeSet::new(),
            claims: Claims::default(),
        }
    }

    /// The anonymous sentinel subject.
    pub fn anonymous() -> Self {
        Self::new(ANONYMOUS_ID, SubjectKind::Anonymous)
    }

    /// Creates a user subject.
    pub fn user(id: impl Into<String>) -> Self {
        Self::new(id, SubjectKind::User)
    }

    /// Creates a service subject.
    pub fn service(id: impl Into<String>) -> Self {
        Self::new(id, SubjectKind::Service)
    }

    /// Adds group memberships.
    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.extend(groups.into_iter().map(Into::into));
        self
    }

    /// Adds scopes.
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes.extend(scopes.into_iter().map(Into::into));
        self
    }

    /// Attaches the claims the subject was resolved from.
    pub fn with_claims(mut self, claims: Claims) -> Self {
        self.claims = claims;
        self
    }

    /// Returns `true` if the subject holds `scope`.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    /// Returns `true` if the subject belongs to `group`.
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }

    /// Returns `true` for the anonymous sentinel.
    pub fn is_anonymous(&self) -> bool {
        self.kind == SubjectKind::Anonymous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(value: Value) -> Claims {
        match value {
            Value::Object(map) => Claims::new(map),
            _ => panic!("claims must be an object"),
        }
    }

    #[test]
    fn test_anonymous_subject() {
        let subject = Subject::anonymous();
        assert_eq!(subject.id, "anonymous");
        assert!(subject.is_anonymous());
        assert!(subject.groups.is_empty());
    }

    #[test]
    fn test_subject_serializes_kind_as_type() {
        let subject = Subject::service("svc-forecast").with_scopes(["dataset.query"]);
        let json = serde_json::to_value(&subject).unwrap();
        assert_eq!(json["type"], "service");
        assert_eq!(json["scopes"], json!(["dataset.query"]));
    }

    #[test]
    fn test_groups_are_deduplicated_and_sorted() {
        let subject = Subject::user("u1").with_groups(["viewers", "admins", "viewers"]);
        let groups: Vec<_> = subject.groups.iter().cloned().collect();
        assert_eq!(groups, vec!["admins", "viewers"]);
        assert!(subject.in_group("admins"));
    }

    #[test]
    fn test_claims_path_lookup() {
        let claims = claims(json!({
            "realm_access": { "roles": ["viewers", 7, "editors"] },
            "sub": "user-123"
        }));
        assert_eq!(claims.strings_at("realm_access.roles"), vec!["viewers", "editors"]);
        assert_eq!(claims.string("sub"), Some("user-123"));
        assert!(claims.path("realm_access.missing").is_none());
    }

    #[test]
    fn test_claims_empty_string_is_absent() {
        let claims = claims(json!({ "azp": "" }));
        assert!(claims.contains("azp"));
        assert_eq!(claims.string("azp"), None);
    }
}
