//! Policy tree watching for hot reload.
//!
//! [`PolicyWatcher`] monitors the policy and data directories and reports
//! debounced batches of changes to `.rego` and `.json` files. Rule test
//! files (`*_test.rego`) never trigger a reload.
//!
//! The watcher uses the `notify` crate for cross-platform file system events,
//! bridged into a tokio channel.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use warden_config::PolicyWatcher;
//!
//! # async fn example() -> Result<(), warden_config::ConfigError> {
//! let mut watcher = PolicyWatcher::builder()
//!     .with_debounce(Duration::from_millis(500))
//!     .watch_path("policies")?
//!     .watch_path_optional("data")
//!     .build()?;
//!
//! while let Some(change) = watcher.next_change().await {
//!     println!("{} policy files changed", change.paths.len());
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::ConfigError;

/// File extensions that belong to a policy tree.
const POLICY_EXTENSIONS: [&str; 2] = ["rego", "json"];

/// One debounced batch of policy file changes.
#[derive(Debug, Clone)]
pub struct PolicyChange {
    /// Changed files, deduplicated.
    pub paths: BTreeSet<PathBuf>,
    /// When the first change of the batch was seen.
    pub first_seen: Instant,
}

/// Builder for a [`PolicyWatcher`].
#[derive(Debug)]
pub struct PolicyWatcherBuilder {
    paths: Vec<PathBuf>,
    debounce: Duration,
}

impl Default for PolicyWatcherBuilder {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            debounce: Duration::from_millis(500),
        }
    }
}

impl PolicyWatcherBuilder {
    /// Set the quiet period that ends a batch. Default is 500ms.
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Watch a directory recursively.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not exist.
    pub fn watch_path<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }
        self.paths.push(path.to_path_buf());
        Ok(self)
    }

    /// Watch a directory if it exists.
    #[must_use]
    pub fn watch_path_optional<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref();
        if path.exists() {
            self.paths.push(path.to_path_buf());
        }
        self
    }

    /// Start watching.
    ///
    /// # Errors
    ///
    /// Returns an error if no paths are configured or the platform watcher
    /// cannot be created.
    pub fn build(self) -> Result<PolicyWatcher, ConfigError> {
        if self.paths.is_empty() {
            return Err(ConfigError::validation_error(
                "no paths configured for policy watcher",
            ));
        }

        let (tx, rx) = mpsc::channel(256);

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                // Only send if the receiving side is still alive.
                Ok(event) => {
                    let _ = tx.blocking_send(event);
                }
                Err(e) => warn!(error = %e, "policy watcher error"),
            }
        })
        .map_err(|e| ConfigError::watch(&self.paths[0], e.to_string()))?;

        for path in &self.paths {
            watcher
                .watch(path, RecursiveMode::Recursive)
                .map_err(|e| ConfigError::watch(path, e.to_string()))?;
            debug!(path = %path.display(), "watching policy path");
        }

        Ok(PolicyWatcher {
            _watcher: watcher,
            rx,
            debounce: self.debounce,
        })
    }
}

/// Watches policy and data directories for changes.
pub struct PolicyWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<Event>,
    debounce: Duration,
}

impl PolicyWatcher {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> PolicyWatcherBuilder {
        PolicyWatcherBuilder::default()
    }

    /// Wait for the next batch of relevant changes.
    ///
    /// A batch starts at the first relevant event and ends once no further
    /// relevant event arrives for the debounce period. Returns `None` when the
    /// underlying watcher has shut down.
    pub async fn next_change(&mut self) -> Option<PolicyChange> {
        let mut paths = BTreeSet::new();

        while paths.is_empty() {
            let event = self.rx.recv().await?;
            paths.extend(relevant_paths(&event));
        }
        let first_seen = Instant::now();

        loop {
            match tokio::time::timeout(self.debounce, self.rx.recv()).await {
                Ok(Some(event)) => paths.extend(relevant_paths(&event)),
                Ok(None) | Err(_) => break,
            }
        }

        debug!(files = paths.len(), "policy change batch");
        Some(PolicyChange { paths, first_seen })
    }
}

/// Paths of `event` that should trigger a policy reload.
fn relevant_paths(event: &Event) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => event
            .paths
            .iter()
            .filter(|p| is_policy_file(p))
            .cloned()
            .collect(),
        _ => Vec::new(),
    }
}

/// Returns `true` for `.rego` and `.json` files that are not rule tests.
pub fn is_policy_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.ends_with("_test.rego") {
        return false;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| POLICY_EXTENSIONS.contains(&ext))
}
