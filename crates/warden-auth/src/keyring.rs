//! Cached signing keys with single-flight refresh.
//!
//! The ring serves an immutable snapshot of the current key set. A snapshot
//! older than the TTL, or a token signed with a key id the snapshot does not
//! know, triggers a refresh. Concurrent callers that hit the same stale or
//! rotated snapshot share one fetch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::DecodingKey;
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use warden_core::Deadline;
use warden_telemetry::metrics::record_jwks_fetch;

use crate::error::KeyLookupError;
use crate::jwks::{JwkSet, KeySource};

/// Default time a fetched key set is trusted (1 hour).
const DEFAULT_KEY_TTL: Duration = Duration::from_secs(3600);

/// Default upper bound for one key set fetch.
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Key ring tuning.
#[derive(Debug, Clone, Copy)]
pub struct KeyRingConfig {
    /// How long a fetched key set is used before refreshing.
    pub ttl: Duration,
    /// Upper bound for one fetch; the request deadline may shorten it.
    pub fetch_timeout: Duration,
}

impl Default for KeyRingConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_KEY_TTL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

/// One fetched key set.
#[derive(Debug)]
struct KeySnapshot {
    keys: JwkSet,
    fetched_at: Instant,
    generation: u64,
}

impl KeySnapshot {
    fn key(&self, kid: Option<&str>) -> Result<DecodingKey, KeyLookupError> {
        self.keys
            .find(kid)
            .ok_or_else(|| KeyLookupError::KeyNotFound {
                kid: kid.map(ToString::to_string),
            })?
            .decoding_key()
    }
}

/// Signing keys of one identity provider.
#[derive(Debug)]
pub struct KeyRing {
    source: Arc<dyn KeySource>,
    config: KeyRingConfig,
    snapshot: RwLock<Option<Arc<KeySnapshot>>>,
    refresh_gate: tokio::sync::Mutex<()>,
    fetch_attempts: AtomicU64,
}

impl KeyRing {
    /// Create an empty ring; keys are fetched on first use.
    pub fn new(source: Arc<dyn KeySource>, config: KeyRingConfig) -> Self {
        Self {
            source,
            config,
            snapshot: RwLock::new(None),
            refresh_gate: tokio::sync::Mutex::new(()),
            fetch_attempts: AtomicU64::new(0),
        }
    }

    /// Verification key for `kid`.
    ///
    /// An unknown `kid` forces exactly one refresh and one retry; if the key
    /// is still missing the lookup fails.
    pub async fn decoding_key(
        &self,
        kid: Option<&str>,
        deadline: Deadline,
    ) -> Result<DecodingKey, KeyLookupError> {
        let snapshot = self.fresh_snapshot(deadline).await?;
        match snapshot.key(kid) {
            Err(KeyLookupError::KeyNotFound { .. }) => {
                warn!(kid = ?kid, generation = snapshot.generation, "unknown key id, refreshing signing keys");
                let refreshed = self.refresh_after(Some(snapshot.generation), deadline).await?;
                refreshed.key(kid)
            }
            result => result,
        }
    }

    /// Fetch a new key set now, regardless of age.
    pub async fn refresh(&self, deadline: Deadline) -> Result<(), KeyLookupError> {
        let observed = self.current().map(|s| s.generation);
        self.refresh_after(observed, deadline).await.map(|_| ())
    }

    /// Number of fetches attempted so far.
    pub fn fetch_attempts(&self) -> u64 {
        self.fetch_attempts.load(Ordering::Relaxed)
    }

    /// Number of keys in the current snapshot.
    pub fn key_count(&self) -> usize {
        self.current().map_or(0, |s| s.keys.len())
    }

    fn current(&self) -> Option<Arc<KeySnapshot>> {
        self.snapshot.read().clone()
    }

    async fn fresh_snapshot(&self, deadline: Deadline) -> Result<Arc<KeySnapshot>, KeyLookupError> {
        match self.current() {
            Some(snapshot) if snapshot.fetched_at.elapsed() < self.config.ttl => Ok(snapshot),
            stale => {
                if stale.is_some() {
                    debug!("signing keys expired, refreshing");
                }
                self.refresh_after(stale.map(|s| s.generation), deadline).await
            }
        }
    }

    /// Replace the snapshot whose generation the caller saw.
    ///
    /// If another caller already replaced it while we waited for the gate,
    /// its result is reused instead of fetching again.
    async fn refresh_after(
        &self,
        observed: Option<u64>,
        deadline: Deadline,
    ) -> Result<Arc<KeySnapshot>, KeyLookupError> {
        let budget = deadline.clamp(self.config.fetch_timeout);
        let _gate = tokio::time::timeout(budget, self.refresh_gate.lock())
            .await
            .map_err(|_| KeyLookupError::Timeout)?;

        let current = self.current();
        if let Some(snapshot) = current {
            if Some(snapshot.generation) != observed {
                debug!(generation = snapshot.generation, "signing keys refreshed by another caller");
                return Ok(snapshot);
            }
        }

        self.fetch_attempts.fetch_add(1, Ordering::Relaxed);
        let budget = deadline.clamp(self.config.fetch_timeout);
        let keys = match tokio::time::timeout(budget, self.source.fetch()).await {
            Ok(Ok(keys)) => {
                record_jwks_fetch("success");
                keys
            }
            Ok(Err(e)) => {
                record_jwks_fetch("failure");
                warn!(source = %self.source.describe(), error = %e, "signing key fetch failed");
                return Err(e);
            }
            Err(_) => {
                record_jwks_fetch("timeout");
                warn!(source = %self.source.describe(), timeout_ms = budget.as_millis(), "signing key fetch timed out");
                return Err(KeyLookupError::Timeout);
            }
        };

        let snapshot = Arc::new(KeySnapshot {
            generation: observed.map_or(1, |g| g + 1),
            fetched_at: Instant::now(),
            keys,
        });
        *self.snapshot.write() = Some(Arc::clone(&snapshot));

        info!(
            source = %self.source.describe(),
            keys = snapshot.keys.len(),
            generation = snapshot.generation,
            "signing keys loaded"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwks::Jwk;
    use futures_util::future::BoxFuture;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    fn oct(kid: &str) -> Jwk {
        Jwk {
            kty: "oct".to_string(),
            kid: Some(kid.to_string()),
            alg: Some("HS256".to_string()),
            use_: None,
            n: None,
            e: None,
            crv: None,
            x: None,
            y: None,
            k: Some("d2FyZGVuLXRlc3QtaG1hYy1zZWNyZXQtMDEyMzQ1Njc4OWFiY2RlZmdo".to_string()),
        }
    }

    /// Serves queued key sets in order, repeating the last one, after a delay.
    #[derive(Debug)]
    struct ScriptedSource {
        sets: Mutex<VecDeque<Result<JwkSet, KeyLookupError>>>,
        delay: Duration,
    }

    impl ScriptedSource {
        fn new(sets: Vec<Result<JwkSet, KeyLookupError>>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                sets: Mutex::new(sets.into()),
                delay,
            })
        }
    }

    impl KeySource for ScriptedSource {
        fn fetch(&self) -> BoxFuture<'_, Result<JwkSet, KeyLookupError>> {
            let next = {
                let mut sets = self.sets.lock();
                if sets.len() > 1 {
                    sets.pop_front()
                } else {
                    sets.front().cloned()
                }
            };
            let delay = self.delay;
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                next.unwrap_or_else(|| Err(KeyLookupError::fetch("scripted", "exhausted")))
            })
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    fn set(kids: &[&str]) -> JwkSet {
        JwkSet {
            keys: kids.iter().map(|k| oct(k)).collect(),
        }
    }

    #[tokio::test]
    async fn test_first_use_fetches_once() {
        let ring = KeyRing::new(
            ScriptedSource::new(vec![Ok(set(&["k1"]))], Duration::ZERO),
            KeyRingConfig::default(),
        );

        assert!(ring.decoding_key(Some("k1"), Deadline::none()).await.is_ok());
        assert!(ring.decoding_key(Some("k1"), Deadline::none()).await.is_ok());
        assert_eq!(ring.fetch_attempts(), 1);
        assert_eq!(ring.key_count(), 1);
    }

    #[tokio::test]
    async fn test_rotated_key_is_found_after_one_refresh() {
        let ring = KeyRing::new(
            ScriptedSource::new(vec![Ok(set(&["k1"])), Ok(set(&["k1", "k2"]))], Duration::ZERO),
            KeyRingConfig::default(),
        );

        assert!(ring.decoding_key(Some("k1"), Deadline::none()).await.is_ok());
        assert!(ring.decoding_key(Some("k2"), Deadline::none()).await.is_ok());
        assert_eq!(ring.fetch_attempts(), 2);
    }

    #[tokio::test]
    async fn test_unknown_key_fails_after_single_retry() {
        let ring = KeyRing::new(
            ScriptedSource::new(vec![Ok(set(&["k1"]))], Duration::ZERO),
            KeyRingConfig::default(),
        );

        let Err(err) = ring.decoding_key(Some("k9"), Deadline::none()).await else {
            panic!("unknown key id resolved");
        };
        assert_eq!(err, KeyLookupError::KeyNotFound { kid: Some("k9".to_string()) });
        // Initial load plus exactly one forced refresh.
        assert_eq!(ring.fetch_attempts(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_share_one_fetch() {
        let ring = KeyRing::new(
            ScriptedSource::new(vec![Ok(set(&["k1"]))], Duration::from_millis(50)),
            KeyRingConfig::default(),
        );

        let (a, b, c) = tokio::join!(
            ring.decoding_key(Some("k1"), Deadline::none()),
            ring.decoding_key(Some("k1"), Deadline::none()),
            ring.decoding_key(None, Deadline::none()),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(ring.fetch_attempts(), 1);
    }

    #[tokio::test]
    async fn test_expired_snapshot_is_refreshed() {
        let ring = KeyRing::new(
            ScriptedSource::new(vec![Ok(set(&["k1"]))], Duration::ZERO),
            KeyRingConfig {
                ttl: Duration::ZERO,
                ..KeyRingConfig::default()
            },
        );

        ring.decoding_key(Some("k1"), Deadline::none()).await.unwrap();
        ring.decoding_key(Some("k1"), Deadline::none()).await.unwrap();
        assert_eq!(ring.fetch_attempts(), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_propagates() {
        let ring = KeyRing::new(
            ScriptedSource::new(
                vec![Err(KeyLookupError::fetch("scripted", "connection refused"))],
                Duration::ZERO,
            ),
            KeyRingConfig::default(),
        );

        let Err(err) = ring.decoding_key(Some("k1"), Deadline::none()).await else {
            panic!("key resolved despite failing source");
        };
        assert!(matches!(err, KeyLookupError::Fetch { .. }));
    }

    #[tokio::test]
    async fn test_slow_fetch_is_bounded_by_deadline() {
        let ring = KeyRing::new(
            ScriptedSource::new(vec![Ok(set(&["k1"]))], Duration::from_secs(5)),
            KeyRingConfig::default(),
        );

        let Err(err) = ring
            .decoding_key(Some("k1"), Deadline::after(Duration::from_millis(20)))
            .await
        else {
            panic!("slow fetch was not cut off");
        };
        assert_eq!(err, KeyLookupError::Timeout);
    }
}
