//! Mapping verified claims to a [`Subject`].

use std::collections::BTreeSet;

use serde_json::Value;
use warden_core::{Claims, Subject, SubjectKind};

/// Names of the claims the resolver reads.
#[derive(Debug, Clone)]
pub struct ClaimMapping {
    /// Subject identifier.
    pub subject: String,
    /// Login name.
    pub username: String,
    /// Client id, present on client-credentials tokens.
    pub client_id: String,
    /// Authorized party.
    pub authorized_party: String,
    /// Dotted path to realm roles.
    pub roles: String,
    /// Group memberships (possibly path-like, e.g. `/org/admins`).
    pub groups: String,
    /// Space-separated or list-valued scopes.
    pub scope: String,
    /// Username prefix identifying service accounts.
    pub service_account_prefix: String,
}

impl Default for ClaimMapping {
    fn default() -> Self {
        Self {
            subject: "sub".to_string(),
            username: "preferred_username".to_string(),
            client_id: "client_id".to_string(),
            authorized_party: "azp".to_string(),
            roles: "realm_access.roles".to_string(),
            groups: "groups".to_string(),
            scope: "scope".to_string(),
            service_account_prefix: "service-account-".to_string(),
        }
    }
}

/// Turns verified claims into a [`Subject`].
#[derive(Debug, Clone, Default)]
pub struct SubjectResolver {
    mapping: ClaimMapping,
}

impl SubjectResolver {
    /// Create a resolver.
    pub fn new(mapping: ClaimMapping) -> Self {
        Self { mapping }
    }

    /// Resolve a subject. Never fails: missing claims degrade to defaults.
    ///
    /// A token with a client id claim, or whose username carries the
    /// service-account prefix, is a service. Its id is the first of client
    /// id, authorized party, prefix-stripped username and subject. Users are
    /// identified by subject, then username, then `"unknown"`.
    pub fn resolve(&self, claims: &Claims) -> Subject {
        let m = &self.mapping;
        let username = claims.string(&m.username);
        let service_account = username.and_then(|u| u.strip_prefix(m.service_account_prefix.as_str()));
        let is_service = claims.contains(&m.client_id) || service_account.is_some();

        let (id, kind) = if is_service {
            let id = claims
                .string(&m.client_id)
                .or_else(|| claims.string(&m.authorized_party))
                .or(service_account.filter(|s| !s.is_empty()))
                .or_else(|| claims.string(&m.subject))
                .unwrap_or("unknown");
            (id, SubjectKind::Service)
        } else {
            let id = claims
                .string(&m.subject)
                .or(username)
                .unwrap_or("unknown");
            (id, SubjectKind::User)
        };

        Subject {
            id: id.to_string(),
            kind,
            groups: self.groups(claims),
            scopes: self.scopes(claims),
            claims: claims.clone(),
        }
    }

    fn groups(&self, claims: &Claims) -> BTreeSet<String> {
        claims
            .strings_at(&self.mapping.roles)
            .into_iter()
            .chain(claims.strings_at(&self.mapping.groups))
            .filter_map(normalize_group)
            .collect()
    }

    fn scopes(&self, claims: &Claims) -> BTreeSet<String> {
        match claims.get(&self.mapping.scope) {
            Some(Value::String(scopes)) => scopes.split_whitespace().map(ToString::to_string).collect(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .flat_map(str::split_whitespace)
                .map(ToString::to_string)
                .collect(),
            _ => BTreeSet::new(),
        }
    }
}

/// Leaf segment of a path-like group name: `/org/admins` → `admins`.
fn normalize_group(group: &str) -> Option<String> {
    group
        .trim_matches('/')
        .rsplit('/')
        .next()
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(ToString::to_string)
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

    fn sorted(set: &BTreeSet<String>) -> Vec<&str> {
        set.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_user_token() {
        let subject = SubjectResolver::default().resolve(&claims(json!({
            "sub": "user-123",
            "preferred_username": "alice",
            "realm_access": {"roles": ["viewers", "editors"]},
            "groups": ["/extra-group"],
            "scope": "dataset.query pipeline.execute",
            "azp": "frontend-client"
        })));

        assert_eq!(subject.kind, SubjectKind::User);
        assert_eq!(subject.id, "user-123");
        assert_eq!(sorted(&subject.groups), vec!["editors", "extra-group", "viewers"]);
        assert_eq!(sorted(&subject.scopes), vec!["dataset.query", "pipeline.execute"]);
        assert_eq!(subject.claims.string("azp"), Some("frontend-client"));
    }

    #[test]
    fn test_service_account_by_username_prefix() {
        let subject = SubjectResolver::default().resolve(&claims(json!({
            "sub": "b5d6c1e4",
            "preferred_username": "service-account-svc-forecast",
            "azp": "svc-forecast",
            "scope": "dataset.query"
        })));

        assert_eq!(subject.kind, SubjectKind::Service);
        assert_eq!(subject.id, "svc-forecast");
        assert!(subject.groups.is_empty());
        assert!(subject.has_scope("dataset.query"));
    }

    #[test]
    fn test_service_by_client_id_claim() {
        let subject = SubjectResolver::default().resolve(&claims(json!({
            "sub": "abc",
            "client_id": "svc-ingest",
            "azp": "other"
        })));
        assert_eq!(subject.kind, SubjectKind::Service);
        assert_eq!(subject.id, "svc-ingest");
    }

    #[test]
    fn test_service_id_falls_back_to_stripped_username() {
        let subject = SubjectResolver::default().resolve(&claims(json!({
            "preferred_username": "service-account-svc-export"
        })));
        assert_eq!(subject.id, "svc-export");
    }

    #[test]
    fn test_user_id_fallbacks() {
        let resolver = SubjectResolver::default();
        assert_eq!(resolver.resolve(&claims(json!({"preferred_username": "bob"}))).id, "bob");
        assert_eq!(resolver.resolve(&claims(json!({}))).id, "unknown");
    }

    #[test]
    fn test_groups_are_normalized_and_deduplicated() {
        let subject = SubjectResolver::default().resolve(&claims(json!({
            "sub": "u1",
            "realm_access": {"roles": ["admins"]},
            "groups": ["/org/admins", "/org/dev/", "//", "plain"]
        })));
        assert_eq!(sorted(&subject.groups), vec!["admins", "dev", "plain"]);
    }

    #[test]
    fn test_list_scopes() {
        let subject = SubjectResolver::default().resolve(&claims(json!({
            "sub": "u1",
            "scope": ["b", "a", "b"]
        })));
        assert_eq!(sorted(&subject.scopes), vec!["a", "b"]);
    }

    #[test]
    fn test_custom_claim_names() {
        let resolver = SubjectResolver::new(ClaimMapping {
            groups: "memberOf".to_string(),
            scope: "scp".to_string(),
            ..ClaimMapping::default()
        });
        let subject = resolver.resolve(&claims(json!({
            "sub": "u1",
            "memberOf": ["/team/ops"],
            "scp": "mqtt.admin"
        })));
        assert!(subject.in_group("ops"));
        assert!(subject.has_scope("mqtt.admin"));
    }
}
