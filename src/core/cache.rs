//! Per-worker response cache.
//!
//! Stores fully transformed response bodies for a short TTL so repeated
//! navigation to the same page skips the upstream fetch and the transform
//! entirely. The cache is private to one worker; siblings each keep their
//! own and no cross-worker consistency is attempted. Time is injected
//! through [`Clock`] so expiry is deterministic in tests.
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use scc::HashMap;

/// Source of monotonic time for expiry decisions.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// Wall-clock backed [`Clock`] used outside of tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A cached, already-transformed response.
///
/// The final content type is stored alongside the body so a cache hit
/// reproduces the transformed `content-type` (e.g. `image/webp` after a
/// transcode) instead of losing it.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub body: Bytes,
    pub content_type: Option<String>,
    expires_at: Instant,
}

/// Short-TTL store keyed by the full original inbound URL.
pub struct ResponseCache {
    entries: HashMap<String, CachedResponse>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ResponseCache {
    /// Create a cache with the given TTL, backed by the system clock.
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    /// Create a cache with an explicit clock (tests use a manual clock).
    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            clock,
        }
    }

    /// Look up an unexpired entry. An expired entry is removed on contact
    /// and reported as absent.
    pub async fn get(&self, key: &str) -> Option<CachedResponse> {
        let now = self.clock.now();

        let expired = {
            let entry = self.entries.get_async(key).await?;
            if entry.get().expires_at > now {
                return Some(entry.get().clone());
            }
            true
        };

        if expired {
            let _ = self.entries.remove_async(key).await;
        }
        None
    }

    /// Store a transformed body under `key` with an absolute expiry of
    /// now + TTL, replacing any previous entry.
    pub async fn put(&self, key: String, body: Bytes, content_type: Option<String>) {
        let entry = CachedResponse {
            body,
            content_type,
            expires_at: self.clock.now() + self.ttl,
        };

        let _ = self.entries.remove_async(&key).await;
        let _ = self.entries.insert_async(key, entry).await;
    }

    /// Drop every expired entry. Run periodically by the worker so entries
    /// that are never touched again do not accumulate.
    pub async fn purge_expired(&self) {
        let now = self.clock.now();
        self.entries
            .retain_async(|_, entry| entry.expires_at > now)
            .await;
    }

    /// Number of entries currently stored (expired but unpurged included).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The configured TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
