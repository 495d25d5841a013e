//! Feed acquisition through public relay services.
//!
//! Given a feed URL, [`coordinator::Coordinator`] returns a short list of
//! normalized posts. It serves fresh results from a cache, otherwise races
//! several relays that fetch the feed on its behalf, falls back to trying
//! them one by one, and reports every relay's error when all of them fail.
//!
//! ```no_run
//! use std::sync::Arc;
//! use relayfeed::config::Config;
//! use relayfeed::coordinator::Coordinator;
//! use relayfeed::storage::MemoryStore;
//!
//! # async fn demo() {
//! let coordinator = Coordinator::from_config(
//!     &Config::default(),
//!     reqwest::Client::new(),
//!     Arc::new(MemoryStore::new()),
//! );
//! let outcome = coordinator.query("https://blog.example.com/rss.xml", Some(5)).await;
//! println!("{}", outcome.summary());
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod feed;
pub mod relay;
pub mod storage;
pub mod util;
