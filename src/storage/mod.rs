//! Feed cache persistence.
//!
//! [`FeedCache`] stores the posts last acquired for each feed URL together
//! with a timestamp, on top of a pluggable [`KvStore`]:
//!
//! - [`MemoryStore`] - process-local, optional byte quota
//! - [`SqliteStore`] - on-disk SQLite database via `sqlx`

mod cache;
mod kv;
mod sqlite;

pub use cache::{CacheEntry, Clock, FeedCache, ManualClock, SystemClock, DEFAULT_TTL};
pub use kv::{KvStore, MemoryStore, StoreError};
pub use sqlite::{SqliteStore, MEMORY_PATH};
