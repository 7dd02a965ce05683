//! Integration tests for loading policy trees from disk, routing, and
//! swapping stores while evaluations are in flight.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use warden_authz::{
    AuthzError, CacheConfig, CachedEvaluator, DecisionCache, EvalOptions, Evaluator,
    PolicyEvaluator, PolicyRouter, PolicySource, PolicyStore, SharedPolicyStore, StoreOptions,
};
use warden_core::{Action, PolicyInput, Resource, ResourceType, Subject};

const DATASET_POLICY: &str = r#"
package warden.dataset.access

import rego.v1

default allow := false

allow if {
    input.subject.groups[_] == data.directory.groups.dataset_readers[_]
}

reason := "member of a reader group" if {
    allow
}
"#;

const GENERIC_POLICY: &str = r#"
package warden.authz

import rego.v1

default allow := false

allow if {
    input.subject.groups[_] == "admins"
}
"#;

const POLICY_TEST: &str = r#"
package warden.dataset.access_test

this is not valid rego
"#;

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// A policy tree with nested directories, a test file and a data document.
fn policy_tree() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "policies/dataset/access.rego", DATASET_POLICY);
    write(dir.path(), "policies/dataset/access_test.rego", POLICY_TEST);
    write(dir.path(), "policies/authz.rego", GENERIC_POLICY);
    write(
        dir.path(),
        "data/directory/groups.json",
        r#"{"dataset_readers": ["analysts", "viewers"]}"#,
    );
    dir
}

fn source(dir: &TempDir) -> PolicySource {
    PolicySource::new(dir.path().join("policies")).with_data_dir(dir.path().join("data"))
}

fn dataset_input(groups: &[&str]) -> PolicyInput {
    PolicyInput::new(
        Some(Subject::user("user-123").with_groups(groups.iter().copied())),
        Resource::new(ResourceType::Dataset, "ds-1"),
        Action::new("read"),
    )
}

#[test]
fn test_load_tree_skips_test_files_and_mounts_data() {
    let dir = policy_tree();
    let store = PolicyStore::load(
        &dir.path().join("policies"),
        Some(&dir.path().join("data")),
        StoreOptions::default(),
    )
    .unwrap();

    assert_eq!(store.list_packages(), vec!["warden.authz", "warden.dataset.access"]);
    assert_eq!(store.policy_count(), 2);
    assert_eq!(store.data_documents(), 1);

    let decision = PolicyEvaluator::default()
        .decide(
            &store,
            "warden.dataset.access",
            &dataset_input(&["viewers"]),
            warden_core::Deadline::none(),
        )
        .unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.reason, "member of a reader group");
}

#[test]
fn test_missing_data_dir_is_tolerated() {
    let dir = policy_tree();
    let store = PolicyStore::load(
        &dir.path().join("policies"),
        Some(&dir.path().join("no-such-dir")),
        StoreOptions::default(),
    )
    .unwrap();
    assert_eq!(store.data_documents(), 0);
}

#[test]
fn test_missing_policy_dir_fails() {
    let dir = TempDir::new().unwrap();
    let err = PolicyStore::load(&dir.path().join("absent"), None, StoreOptions::default())
        .unwrap_err();
    assert!(matches!(err, AuthzError::PolicyLoad { .. }));
}

#[test]
fn test_one_bad_file_fails_the_whole_load() {
    let dir = policy_tree();
    write(dir.path(), "policies/broken.rego", "package warden.broken\nallow if {");

    let result = PolicyStore::load(&dir.path().join("policies"), None, StoreOptions::default());
    match result {
        Err(AuthzError::PolicyLoad { path, .. }) => {
            assert!(path.to_string_lossy().contains("broken.rego"));
        }
        other => panic!("expected PolicyLoad, got {:?}", other.map(|s| s.list_packages())),
    }
}

#[test]
fn test_invalid_data_json_fails() {
    let dir = policy_tree();
    write(dir.path(), "data/directory/broken.json", "{not json");
    let result = PolicyStore::load(
        &dir.path().join("policies"),
        Some(&dir.path().join("data")),
        StoreOptions::default(),
    );
    assert!(matches!(result, Err(AuthzError::PolicyLoad { .. })));
}

#[test]
fn test_failed_reload_keeps_previous_store() {
    let dir = policy_tree();
    let shared = SharedPolicyStore::load(source(&dir), StoreOptions::default()).unwrap();

    write(dir.path(), "policies/broken.rego", "package");
    assert!(shared.reload().is_err());

    let current = shared.current();
    assert_eq!(current.revision(), 1);
    assert!(current.has_package("warden.dataset.access"));
}

#[test]
fn test_reload_publishes_new_packages_and_old_snapshot_is_untouched() {
    let dir = policy_tree();
    let shared = SharedPolicyStore::load(source(&dir), StoreOptions::default()).unwrap();
    let router = PolicyRouter::default();

    let before = shared.current();
    assert_eq!(
        router.resolve(&before, &ResourceType::Pipeline).unwrap(),
        "warden.authz"
    );

    write(
        dir.path(),
        "policies/pipeline/state.rego",
        "package warden.pipeline.state\n\nimport rego.v1\n\nallow if input.action.name == \"run\"\n",
    );
    let summary = shared.reload().unwrap();
    assert_eq!(summary.previous_revision, 1);
    assert_eq!(summary.revision, 2);
    assert_eq!(summary.packages, 3);

    // The in-flight snapshot still answers with the old package set.
    assert!(!before.has_package("warden.pipeline.state"));
    assert_eq!(
        router.resolve(&before, &ResourceType::Pipeline).unwrap(),
        "warden.authz"
    );

    let after = shared.current();
    assert_eq!(
        router.resolve(&after, &ResourceType::Pipeline).unwrap(),
        "warden.pipeline.state"
    );
}

#[test]
fn test_cache_reset_on_reload_discards_stale_decisions() {
    let dir = policy_tree();
    let shared = SharedPolicyStore::load(source(&dir), StoreOptions::default()).unwrap();
    let cache = Arc::new(DecisionCache::new(CacheConfig::default()));
    let evaluator = CachedEvaluator::new(PolicyEvaluator::default(), Arc::clone(&cache));
    let input = dataset_input(&["viewers"]);

    let old = shared.current();
    let first = evaluator
        .evaluate(&old, "warden.dataset.access", &input, &EvalOptions::default())
        .unwrap();
    assert!(first.decision.allowed);

    write(
        dir.path(),
        "data/directory/groups.json",
        r#"{"dataset_readers": ["analysts"]}"#,
    );
    let summary = shared.reload().unwrap();
    cache.reset(summary.revision);

    // A request still holding the old snapshot must not repopulate the cache.
    evaluator
        .evaluate(&old, "warden.dataset.access", &input, &EvalOptions::default())
        .unwrap();
    assert_eq!(cache.stats().size, 0);

    let fresh = evaluator
        .evaluate(&shared.current(), "warden.dataset.access", &input, &EvalOptions::default())
        .unwrap();
    assert!(!fresh.cached);
    assert!(!fresh.decision.allowed);
}
