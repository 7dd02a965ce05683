//! Compiled policy stores.
//!
//! A [`PolicyStore`] is an immutable, fully compiled set of Rego modules plus
//! the data document they evaluate against. Stores are built in one go; a
//! single bad file fails the whole load and nothing is published.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use regorus::Engine;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::StoreOptions;
use crate::error::{AuthzError, AuthzResult};

const POLICY_EXTENSION: &str = "rego";
const DATA_EXTENSION: &str = "json";
const TEST_POLICY_SUFFIX: &str = "_test.rego";

/// An immutable compiled policy set.
#[derive(Debug, Clone)]
pub struct PolicyStore {
    engine: Engine,
    packages: BTreeSet<String>,
    policy_files: usize,
    data_documents: usize,
    revision: u64,
    loaded_at: DateTime<Utc>,
}

impl PolicyStore {
    /// Start building a store from in-memory sources.
    pub fn builder() -> PolicyStoreBuilder {
        PolicyStoreBuilder::default()
    }

    /// Load every `.rego` file under `policies_dir` and every `.json` file
    /// under `data_dir`.
    ///
    /// Files ending in `_test.rego` are skipped. A data file at
    /// `<data_dir>/a/b/c.json` is mounted at `data.a.b.c`.
    pub fn load(
        policies_dir: &Path,
        data_dir: Option<&Path>,
        options: StoreOptions,
    ) -> AuthzResult<Self> {
        info!(
            policies_dir = %policies_dir.display(),
            data_dir = ?data_dir.map(Path::display),
            "loading policies"
        );

        if !policies_dir.is_dir() {
            return Err(AuthzError::policy_load(
                policies_dir,
                "policy directory does not exist",
            ));
        }

        let mut builder = Self::builder().strict_builtins(options.strict_builtins);

        for path in collect_files(policies_dir, POLICY_EXTENSION)? {
            if is_test_policy(&path) {
                debug!(path = %path.display(), "skipping policy test file");
                continue;
            }
            let source = fs::read_to_string(&path)
                .map_err(|e| AuthzError::policy_load(&path, format!("failed to read file: {}", e)))?;
            builder = builder.policy(path.display().to_string(), source);
        }

        match data_dir {
            Some(dir) if dir.is_dir() => {
                for path in collect_files(dir, DATA_EXTENSION)? {
                    let content = fs::read_to_string(&path).map_err(|e| {
                        AuthzError::policy_load(&path, format!("failed to read file: {}", e))
                    })?;
                    let value: Value = serde_json::from_str(&content).map_err(|e| {
                        AuthzError::policy_load(&path, format!("invalid JSON: {}", e))
                    })?;
                    let mount = data_mount_path(dir, &path);
                    builder = builder.data_at(&mount, value);
                }
            }
            Some(dir) => {
                warn!(data_dir = %dir.display(), "data directory does not exist, loading policies without data");
            }
            None => {}
        }

        let store = builder.build()?;
        info!(
            packages = store.packages.len(),
            policy_files = store.policy_files,
            data_documents = store.data_documents,
            "policies loaded"
        );
        Ok(store)
    }

    /// Returns `true` if a loaded module declares `package`.
    pub fn has_package(&self, package: &str) -> bool {
        self.packages.contains(package)
    }

    /// Declared packages in sorted order.
    pub fn list_packages(&self) -> Vec<String> {
        self.packages.iter().cloned().collect()
    }

    /// Number of policy modules compiled into the store.
    pub fn policy_count(&self) -> usize {
        self.policy_files
    }

    /// Number of data documents merged into the store.
    pub fn data_documents(&self) -> usize {
        self.data_documents
    }

    /// Revision assigned when the store was published.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// When the store was compiled.
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub(crate) fn with_revision(mut self, revision: u64) -> Self {
        self.revision = revision;
        self
    }

    /// A private engine instance primed with `input`.
    ///
    /// Each evaluation works on its own copy so concurrent requests never
    /// share mutable engine state.
    pub(crate) fn engine_for(&self, input: Value) -> Engine {
        let mut engine = self.engine.clone();
        engine.set_input(input.into());
        engine
    }
}

/// Builds a [`PolicyStore`] from in-memory policy sources and data.
#[derive(Debug, Default)]
pub struct PolicyStoreBuilder {
    policies: Vec<(String, String)>,
    data: Vec<(Vec<String>, Value)>,
    strict_builtins: bool,
}

impl PolicyStoreBuilder {
    /// Add a Rego module. `name` is used in error messages.
    pub fn policy(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.policies.push((name.into(), source.into()));
        self
    }

    /// Mount a data document at a dotted path (`""` for the root).
    pub fn data_at(mut self, path: &str, value: Value) -> Self {
        let segments = path
            .split('.')
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect();
        self.data.push((segments, value));
        self
    }

    /// Treat builtin errors as evaluation errors.
    pub fn strict_builtins(mut self, strict: bool) -> Self {
        self.strict_builtins = strict;
        self
    }

    /// Compile everything into a store.
    pub fn build(self) -> AuthzResult<PolicyStore> {
        let mut engine = Engine::new();
        if self.strict_builtins {
            engine.set_strict_builtin_errors(true);
        }

        let mut packages = BTreeSet::new();
        for (name, source) in &self.policies {
            let package = declared_package(name, source)?;
            debug!(path = %name, package = %package, "adding policy");
            engine
                .add_policy(name.clone(), source.clone())
                .map_err(|e| AuthzError::policy_load(name, e.to_string()))?;
            packages.insert(package);
        }

        let data_documents = self.data.len();
        if data_documents > 0 {
            let mut root = Map::new();
            for (segments, value) in self.data {
                merge_at(&mut root, &segments, value);
            }
            engine
                .add_data(Value::Object(root).into())
                .map_err(|e| AuthzError::policy_load("data", e.to_string()))?;
        }

        Ok(PolicyStore {
            engine,
            packages,
            policy_files: self.policies.len(),
            data_documents,
            revision: 0,
            loaded_at: Utc::now(),
        })
    }
}

/// The single package a module declares.
fn declared_package(name: &str, source: &str) -> AuthzResult<String> {
    let mut declared = source.lines().filter_map(|line| {
        let line = line.trim();
        let rest = line.strip_prefix("package")?;
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        rest.split_whitespace().next().map(ToString::to_string)
    });

    match (declared.next(), declared.next()) {
        (Some(package), None) => Ok(package),
        (None, _) => Err(AuthzError::policy_load(name, "missing package declaration")),
        (Some(_), Some(_)) => Err(AuthzError::policy_load(
            name,
            "module declares more than one package",
        )),
    }
}

fn is_test_policy(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(TEST_POLICY_SUFFIX))
}

/// Files with `extension` under `dir`, recursively, in path order.
fn collect_files(dir: &Path, extension: &str) -> AuthzResult<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let entries = fs::read_dir(&current)
            .map_err(|e| AuthzError::policy_load(&current, format!("failed to read directory: {}", e)))?;
        for entry in entries {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().and_then(|e| e.to_str()) == Some(extension) {
                found.push(path);
            }
        }
    }

    found.sort();
    Ok(found)
}

/// Dotted mount path for a data file: directory segments plus the file stem.
fn data_mount_path(root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file);
    let mut segments: Vec<String> = relative
        .parent()
        .into_iter()
        .flat_map(Path::components)
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if let Some(stem) = relative.file_stem() {
        segments.push(stem.to_string_lossy().into_owned());
    }
    segments.join(".")
}

/// Deep-merge `value` into `root` under `segments`.
fn merge_at(root: &mut Map<String, Value>, segments: &[String], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        if let Value::Object(map) = value {
            merge_objects(root, map);
        }
        return;
    };

    let mut node = root;
    for segment in parents {
        let slot = node
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        node = match slot {
            Value::Object(map) => map,
            _ => return,
        };
    }

    merge_value(node, last.clone(), value);
}

fn merge_objects(target: &mut Map<String, Value>, incoming: Map<String, Value>) {
    for (key, value) in incoming {
        merge_value(target, key, value);
    }
}

fn merge_value(target: &mut Map<String, Value>, key: String, value: Value) {
    match (target.get_mut(&key), value) {
        (Some(Value::Object(existing)), Value::Object(nested)) => merge_objects(existing, nested),
        (_, value) => {
            target.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_declared_package() {
        let source = "# comment\npackage warden.dataset.access\n\ndefault allow := false\n";
        assert_eq!(
            declared_package("a.rego", source).unwrap(),
            "warden.dataset.access"
        );
    }

    #[test]
    fn test_missing_package_is_rejected() {
        let err = declared_package("a.rego", "allow := true").unwrap_err();
        assert!(err.to_string().contains("missing package"));
    }

    #[test]
    fn test_multiple_packages_are_rejected() {
        let err = declared_package("a.rego", "package a\npackage b\n").unwrap_err();
        assert!(err.to_string().contains("more than one"));
    }

    #[test]
    fn test_package_prefixed_identifiers_are_not_headers() {
        let source = "package a\npackages := [1]\n";
        assert_eq!(declared_package("a.rego", source).unwrap(), "a");
    }

    #[test]
    fn test_test_policy_detection() {
        assert!(is_test_policy(Path::new("/p/dataset_test.rego")));
        assert!(!is_test_policy(Path::new("/p/dataset.rego")));
    }

    #[test]
    fn test_data_mount_path() {
        let root = Path::new("/data");
        assert_eq!(data_mount_path(root, Path::new("/data/org/groups.json")), "org.groups");
        assert_eq!(data_mount_path(root, Path::new("/data/roles.json")), "roles");
    }

    #[test]
    fn test_merge_at_nests_and_merges() {
        let mut root = Map::new();
        merge_at(&mut root, &["org".into(), "groups".into()], json!({"a": 1}));
        merge_at(&mut root, &["org".into(), "groups".into()], json!({"b": 2}));
        merge_at(&mut root, &["org".into(), "roles".into()], json!(["x"]));
        assert_eq!(
            Value::Object(root),
            json!({"org": {"groups": {"a": 1, "b": 2}, "roles": ["x"]}})
        );
    }

    #[test]
    fn test_builder_collects_packages() {
        let store = PolicyStore::builder()
            .policy("a.rego", "package warden.a\nallow := true")
            .policy("b.rego", "package warden.b\nallow := false")
            .build()
            .unwrap();

        assert!(store.has_package("warden.a"));
        assert!(!store.has_package("warden.c"));
        assert_eq!(store.list_packages(), vec!["warden.a", "warden.b"]);
        assert_eq!(store.policy_count(), 2);
    }

    #[test]
    fn test_builder_rejects_invalid_rego() {
        let result = PolicyStore::builder()
            .policy("bad.rego", "package warden.bad\nallow if {")
            .build();
        assert!(matches!(result, Err(AuthzError::PolicyLoad { .. })));
    }
}
