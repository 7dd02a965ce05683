//! Decision caching for authorization.
//!
//! Caches policy decisions keyed by package and the stable part of the
//! input, so identical questions asked under different request ids share
//! one evaluation.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;
use warden_core::{Decision, PolicyInput};

/// Hex digits of the input digest kept in a cache key.
const KEY_DIGEST_LEN: usize = 32;

/// Configuration for the decision cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Whether decisions are cached at all.
    pub enabled: bool,
    /// Maximum number of entries in the cache.
    pub max_entries: usize,
    /// Time-to-live for cached decisions.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10_000,
            ttl: Duration::from_secs(300), // 5 minutes
        }
    }
}

impl CacheConfig {
    /// Create a production cache configuration.
    pub fn production() -> Self {
        Self {
            enabled: true,
            max_entries: 50_000,
            ttl: Duration::from_secs(60),
        }
    }

    /// Create a development cache configuration.
    pub fn development() -> Self {
        Self {
            enabled: true,
            max_entries: 1_000,
            ttl: Duration::from_secs(30),
        }
    }

    /// Disable caching.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_entries: 0,
            ttl: Duration::ZERO,
        }
    }

    fn is_active(&self) -> bool {
        self.enabled && self.max_entries > 0
    }
}

/// Cache key for `input` evaluated against `package`.
///
/// The key is `"<package>:<digest>"` where the digest covers the package and
/// the canonical JSON of the input without its volatile environment keys.
pub fn cache_key(package: &str, input: &PolicyInput) -> String {
    let mut material = String::with_capacity(256);
    material.push_str(package);
    material.push(':');
    write_canonical(&input.stable_value(), &mut material);

    let digest = Sha256::digest(material.as_bytes());
    let mut hex = format!("{:x}", digest);
    hex.truncate(KEY_DIGEST_LEN);
    format!("{}:{}", package, hex)
}

/// JSON with object keys in sorted order, independent of map insertion order.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}", Value::String(key.clone()));
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{}", scalar);
        }
    }
}

/// Cached decision entry.
#[derive(Debug, Clone)]
struct CacheEntry {
    decision: Decision,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Entries in recency order (least recently used first) plus the store
/// revision they were computed against.
#[derive(Debug, Default)]
struct CacheState {
    entries: IndexMap<String, CacheEntry>,
    revision: Option<u64>,
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Whether caching is active.
    pub enabled: bool,
    /// Number of entries currently in cache.
    pub size: usize,
    /// Maximum number of entries.
    pub capacity: usize,
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of evictions due to capacity.
    pub evictions: u64,
    /// `hits / (hits + misses)`, rounded to three decimals.
    pub hit_rate: f64,
}

/// Bounded, TTL-limited, least-recently-used decision cache.
#[derive(Debug)]
pub struct DecisionCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl DecisionCache {
    /// Create a new decision cache.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CacheState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// The cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Cached decision for `input` under `package`, if present and fresh.
    ///
    /// Ignores store revisions; [`DecisionCache::get_for_revision`] is the
    /// lookup to use when decisions come from a swappable store.
    pub fn get(&self, package: &str, input: &PolicyInput) -> Option<Decision> {
        if !self.config.is_active() {
            return None;
        }
        let key = cache_key(package, input);
        let mut state = self.state.lock();
        self.lookup_locked(&mut state, &key)
    }

    /// Cached decision for `input` under `package`, valid for the store at
    /// `revision`.
    ///
    /// A newer revision than the one the cache is bound to drops every entry
    /// and rebinds the cache, so a store swap that bypassed
    /// [`DecisionCache::reset`] never serves decisions of the old policies.
    /// A lookup from an older snapshot is a miss.
    pub fn get_for_revision(&self, package: &str, input: &PolicyInput, revision: u64) -> Option<Decision> {
        if !self.config.is_active() {
            return None;
        }
        let key = cache_key(package, input);
        let mut state = self.state.lock();
        if !Self::bind_locked(&mut state, revision) {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        self.lookup_locked(&mut state, &key)
    }

    fn lookup_locked(&self, state: &mut CacheState, key: &str) -> Option<Decision> {
        let now = Instant::now();
        let Some(index) = state.entries.get_index_of(key) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let expired = state
            .entries
            .get_index(index)
            .map_or(true, |(_, entry)| entry.is_expired(now));
        if expired {
            state.entries.shift_remove_index(index);
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "cached decision expired");
            return None;
        }

        let last = state.entries.len() - 1;
        state.entries.move_index(index, last);
        self.hits.fetch_add(1, Ordering::Relaxed);
        state.entries.get_index(last).map(|(_, entry)| entry.decision.clone())
    }

    /// Bind the cache to `revision` if it is not older than the current one.
    ///
    /// Returns `false` when `revision` belongs to a superseded store.
    fn bind_locked(state: &mut CacheState, revision: u64) -> bool {
        match state.revision {
            Some(current) if revision < current => false,
            Some(current) if revision == current => true,
            Some(current) => {
                debug!(
                    current,
                    revision,
                    dropped = state.entries.len(),
                    "policy store changed, dropping cached decisions"
                );
                state.entries.clear();
                state.revision = Some(revision);
                true
            }
            None => {
                state.revision = Some(revision);
                true
            }
        }
    }

    /// Cache `decision` for `input` under `package`.
    pub fn set(&self, package: &str, input: &PolicyInput, decision: &Decision) {
        if !self.config.is_active() {
            return;
        }
        let key = cache_key(package, input);
        let mut state = self.state.lock();
        self.insert_locked(&mut state, key, decision);
    }

    /// Cache `decision` only if it was computed against the store revision
    /// this cache belongs to, or a newer one.
    ///
    /// Returns `false` when the decision was dropped as stale. A newer
    /// revision rebinds the cache as in [`DecisionCache::get_for_revision`].
    pub fn insert_for_revision(
        &self,
        package: &str,
        input: &PolicyInput,
        decision: &Decision,
        revision: u64,
    ) -> bool {
        if !self.config.is_active() {
            return false;
        }
        let key = cache_key(package, input);
        let mut state = self.state.lock();
        if !Self::bind_locked(&mut state, revision) {
            debug!(revision, "dropping decision computed against superseded policies");
            return false;
        }
        self.insert_locked(&mut state, key, decision);
        true
    }

    fn insert_locked(&self, state: &mut CacheState, key: String, decision: &Decision) {
        let now = Instant::now();
        let entry = CacheEntry {
            decision: decision.clone(),
            expires_at: now + self.config.ttl,
        };

        if let Some(index) = state.entries.get_index_of(&key) {
            let last = state.entries.len() - 1;
            state.entries.move_index(index, last);
            if let Some((_, slot)) = state.entries.get_index_mut(last) {
                *slot = entry;
            }
            return;
        }

        if state.entries.len() >= self.config.max_entries {
            state.entries.retain(|_, e| !e.is_expired(now));
        }
        while state.entries.len() >= self.config.max_entries {
            if state.entries.shift_remove_index(0).is_none() {
                break;
            }
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }

        state.entries.insert(key, entry);
    }

    /// Drop every entry, or only those under `package`. Returns how many
    /// entries were removed.
    pub fn invalidate(&self, package: Option<&str>) -> usize {
        let mut state = self.state.lock();
        let before = state.entries.len();
        match package {
            None => state.entries.clear(),
            Some(package) => {
                let prefix = format!("{}:", package);
                state.entries.retain(|key, _| !key.starts_with(&prefix));
            }
        }
        before - state.entries.len()
    }

    /// Drop every entry and bind the cache to a new store revision.
    ///
    /// The bound revision never moves backwards.
    pub fn reset(&self, revision: u64) -> usize {
        let mut state = self.state.lock();
        let removed = state.entries.len();
        state.entries.clear();
        state.revision = Some(state.revision.map_or(revision, |current| current.max(revision)));
        removed
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let size = self.state.lock().entries.len();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64 * 1000.0).round() / 1000.0
        };

        CacheStats {
            enabled: self.config.is_active(),
            size,
            capacity: self.config.max_entries,
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate,
        }
    }
}
