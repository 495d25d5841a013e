use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::kv::KvStore;
use crate::feed::Post;

/// Default freshness window for cached feeds (30 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Prefix of every cache key.
const KEY_PREFIX: &str = "feed:";

/// Source of "now" for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock for expiry tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        if let Ok(delta) = chrono::Duration::from_std(by) {
            *now += delta;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// What is persisted per feed URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub posts: Vec<Post>,
    pub timestamp: DateTime<Utc>,
}

/// Time-bounded feed cache over any [`KvStore`].
///
/// Reads never fail: a missing, expired, unreadable or corrupt entry is a
/// miss, and the latter three are removed on sight. Writes are best-effort;
/// a storage failure (quota, locked database) is logged and otherwise ignored.
#[derive(Clone)]
pub struct FeedCache {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl FeedCache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Storage key for a feed URL: `feed:` followed by the SHA-256 of the URL.
    ///
    /// ```
    /// use relayfeed::storage::FeedCache;
    ///
    /// let key = FeedCache::key_for("https://example.com/rss");
    /// assert!(key.starts_with("feed:"));
    /// assert_eq!(key.len(), 5 + 64);
    /// assert_eq!(key, FeedCache::key_for("https://example.com/rss"));
    /// ```
    pub fn key_for(feed_url: &str) -> String {
        let hash = Sha256::digest(feed_url.as_bytes());
        format!("{KEY_PREFIX}{hash:x}")
    }

    /// Returns the cached posts for `feed_url` if present and fresh.
    pub async fn get(&self, feed_url: &str) -> Option<Vec<Post>> {
        let key = Self::key_for(feed_url);

        let raw = match self.store.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(feed = %feed_url, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(feed = %feed_url, error = %e, "Discarding corrupt cache entry");
                self.remove(&key).await;
                return None;
            }
        };

        if self.is_expired(entry.timestamp) {
            tracing::debug!(feed = %feed_url, cached_at = %entry.timestamp, "Cache entry expired");
            self.remove(&key).await;
            return None;
        }

        Some(entry.posts)
    }

    /// Stores `posts` for `feed_url`, stamped with the current time.
    pub async fn set(&self, feed_url: &str, posts: &[Post]) {
        let entry = CacheEntry {
            posts: posts.to_vec(),
            timestamp: self.clock.now(),
        };
        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(feed = %feed_url, error = %e, "Failed to serialize cache entry");
                return;
            }
        };

        if let Err(e) = self.store.set(&Self::key_for(feed_url), raw).await {
            tracing::warn!(feed = %feed_url, error = %e, "Cache write failed, continuing without caching");
        }
    }

    /// An entry is stale once `now - timestamp >= ttl`. Entries stamped in the
    /// future (clock moved backwards) count as fresh.
    fn is_expired(&self, timestamp: DateTime<Utc>) -> bool {
        self.clock
            .now()
            .signed_duration_since(timestamp)
            .to_std()
            .is_ok_and(|age| age >= self.ttl)
    }

    async fn remove(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            tracing::debug!(key = %key, error = %e, "Failed to remove cache entry");
        }
    }
}
