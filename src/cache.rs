//! Verdict caching layer using moka.
//!
//! Repeat identical messages (copy-paste spam, reposted links) skip the
//! classifier call entirely. Keys are content hashes so message text is
//! never used as a cache key directly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::classifier::ClassifierVerdict;

/// Default entries held before eviction.
const DEFAULT_CAPACITY: u64 = 10_000;

/// Default TTL; verdicts are context-sensitive, so keep it short.
const DEFAULT_TTL_SECS: u64 = 300;

/// Statistics about cache performance.
#[derive(Debug, Clone, Serialize)]
pub struct VerdictCacheStats {
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// Cache of classifier verdicts keyed by content hash.
pub struct VerdictCache {
    verdicts: Cache<String, ClassifierVerdict>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl Default for VerdictCache {
    fn default() -> Self {
        Self::new()
    }
}

impl VerdictCache {
    /// Create a cache with default capacity and TTL.
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(DEFAULT_TTL_SECS))
    }

    /// Create a cache with a custom TTL.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            verdicts: Cache::builder()
                .max_capacity(DEFAULT_CAPACITY)
                .time_to_live(ttl)
                .build(),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Look up a cached verdict for message content.
    pub async fn get(&self, content: &str) -> Option<ClassifierVerdict> {
        let result = self.verdicts.get(&hash_content(content)).await;

        if result.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }

        result
    }

    /// Store a verdict for message content.
    pub async fn insert(&self, content: &str, verdict: ClassifierVerdict) {
        self.verdicts.insert(hash_content(content), verdict).await;
    }

    /// Cache statistics for monitoring.
    pub fn stats(&self) -> VerdictCacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        VerdictCacheStats {
            entries: self.verdicts.entry_count(),
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }

    /// Sync pending cache operations (for tests).
    pub async fn sync(&self) {
        self.verdicts.run_pending_tasks().await;
    }
}

/// SHA-256 hex digest of message content.
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}
