//! Hot-swappable access to the current policy store.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::StoreOptions;
use crate::error::{AuthzError, AuthzResult};
use crate::store::PolicyStore;

/// Where a store is (re)loaded from.
#[derive(Debug, Clone)]
pub struct PolicySource {
    /// Directory of `.rego` modules.
    pub policies_dir: PathBuf,
    /// Optional directory of `.json` data documents.
    pub data_dir: Option<PathBuf>,
}

impl PolicySource {
    /// Creates a source without a data directory.
    pub fn new(policies_dir: impl Into<PathBuf>) -> Self {
        Self {
            policies_dir: policies_dir.into(),
            data_dir: None,
        }
    }

    /// Sets the data directory.
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }
}

/// Outcome of publishing a new store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReloadSummary {
    /// Revision of the store that was replaced.
    pub previous_revision: u64,
    /// Revision of the store now being served.
    pub revision: u64,
    /// Packages in the new store.
    pub packages: usize,
    /// Policy modules in the new store.
    pub policy_files: usize,
    /// Data documents in the new store.
    pub data_documents: usize,
}

/// The store currently being served, replaceable while requests run.
///
/// Readers take a snapshot with [`current`](Self::current) and keep using it
/// for the whole request. A reload compiles the replacement before taking
/// the write lock, so readers are only ever blocked for a pointer swap.
#[derive(Debug)]
pub struct SharedPolicyStore {
    current: RwLock<Arc<PolicyStore>>,
    source: Option<PolicySource>,
    options: StoreOptions,
    reload_lock: Mutex<()>,
    last_revision: AtomicU64,
}

impl SharedPolicyStore {
    /// Serve a fixed store that cannot be reloaded from disk.
    pub fn new(store: PolicyStore) -> Self {
        Self::publish_first(store, None, StoreOptions::default())
    }

    /// Load from `source` and remember it for later reloads.
    pub fn load(source: PolicySource, options: StoreOptions) -> AuthzResult<Self> {
        let store = PolicyStore::load(&source.policies_dir, source.data_dir.as_deref(), options)?;
        Ok(Self::publish_first(store, Some(source), options))
    }

    fn publish_first(store: PolicyStore, source: Option<PolicySource>, options: StoreOptions) -> Self {
        Self {
            current: RwLock::new(Arc::new(store.with_revision(1))),
            source,
            options,
            reload_lock: Mutex::new(()),
            last_revision: AtomicU64::new(1),
        }
    }

    /// Snapshot of the store being served.
    pub fn current(&self) -> Arc<PolicyStore> {
        Arc::clone(&*self.current.read())
    }

    /// Revision of the store being served.
    pub fn revision(&self) -> u64 {
        self.current.read().revision()
    }

    /// Recompile from the configured source and swap it in.
    ///
    /// On failure the previous store keeps serving.
    pub fn reload(&self) -> AuthzResult<ReloadSummary> {
        let source = self.source.as_ref().ok_or(AuthzError::NoReloadSource)?;
        let _guard = self.reload_lock.lock();

        let store = PolicyStore::load(&source.policies_dir, source.data_dir.as_deref(), self.options)
            .map_err(|e| {
                warn!(error = %e, "policy reload failed, keeping previous policies");
                e
            })?;
        Ok(self.publish(store))
    }

    /// Swap in an already compiled store.
    pub fn replace(&self, store: PolicyStore) -> ReloadSummary {
        let _guard = self.reload_lock.lock();
        self.publish(store)
    }

    fn publish(&self, store: PolicyStore) -> ReloadSummary {
        let revision = self.last_revision.fetch_add(1, Ordering::SeqCst) + 1;
        let store = Arc::new(store.with_revision(revision));

        let packages = store.list_packages().len();
        let policy_files = store.policy_count();
        let data_documents = store.data_documents();

        let previous = std::mem::replace(&mut *self.current.write(), store);
        let summary = ReloadSummary {
            previous_revision: previous.revision(),
            revision,
            packages,
            policy_files,
            data_documents,
        };

        info!(
            previous_revision = summary.previous_revision,
            revision = summary.revision,
            packages = summary.packages,
            "policy store swapped"
        );
        summary
    }
}
