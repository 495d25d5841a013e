//! Acquisition coordinator: cache check, relay race, sequential fallback.
//!
//! A query moves through these phases:
//!
//! 1. **Cache check** - a fresh cache entry is returned with source `"cache"`
//! 2. **Race** - every relay runs its retry-wrapped attempt concurrently; the
//!    first success wins and the rest are cancelled
//! 3. **Fallback** - if the whole race failed, relays are retried one at a
//!    time in declared order, collecting each relay's final error
//! 4. **Terminal** - successes are cached and truncated to `max_posts`;
//!    failures never touch the cache
//!
//! Concurrent queries for the same URL share one in-flight acquisition.

mod outcome;
mod session;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::{self, BoxFuture, Shared, WeakShared};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::feed::Post;
use crate::relay::{with_retries, HttpRelay, Relay, RetryPolicy};
use crate::storage::{FeedCache, KvStore};

pub use outcome::{AcquisitionOutcome, AttemptError, CACHE_SOURCE, COORDINATOR_SOURCE};
pub use session::{FeedConfig, FeedSession};

/// Default quiet period before a reconfigured session queries again.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

type InFlight = Shared<BoxFuture<'static, AcquisitionOutcome>>;

/// Owns the relays, the cache and the in-flight registry.
///
/// Cloning is cheap; clones share all state, including cancellation.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

struct Inner {
    relays: Vec<Arc<dyn Relay>>,
    cache: FeedCache,
    retry: RetryPolicy,
    debounce: Duration,
    in_flight: Mutex<HashMap<String, WeakShared<BoxFuture<'static, AcquisitionOutcome>>>>,
    shutdown: CancellationToken,
}

pub struct CoordinatorBuilder {
    relays: Vec<Arc<dyn Relay>>,
    cache: FeedCache,
    retry: RetryPolicy,
    debounce: Duration,
}

impl CoordinatorBuilder {
    /// Appends a relay; declaration order is fallback order.
    pub fn relay(mut self, relay: Arc<dyn Relay>) -> Self {
        self.relays.push(relay);
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn build(self) -> Coordinator {
        Coordinator {
            inner: Arc::new(Inner {
                relays: self.relays,
                cache: self.cache,
                retry: self.retry,
                debounce: self.debounce,
                in_flight: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }
}

impl Coordinator {
    pub fn builder(cache: FeedCache) -> CoordinatorBuilder {
        CoordinatorBuilder {
            relays: Vec::new(),
            cache,
            retry: RetryPolicy::default(),
            debounce: DEFAULT_DEBOUNCE,
        }
    }

    /// Wires HTTP relays, retry policy, cache TTL and debounce from `config`.
    pub fn from_config(config: &Config, client: reqwest::Client, store: Arc<dyn KvStore>) -> Self {
        let cache = FeedCache::new(store).with_ttl(config.cache_ttl());
        config
            .relays
            .iter()
            .map(|descriptor| {
                HttpRelay::new(descriptor.clone(), client.clone())
                    .with_max_response_bytes(config.max_response_bytes)
            })
            .fold(Self::builder(cache), |builder, relay| {
                builder.relay(Arc::new(relay))
            })
            .retry_policy(config.retry_policy())
            .debounce(config.debounce())
            .build()
    }

    pub fn relay_names(&self) -> Vec<&str> {
        self.inner.relays.iter().map(|r| r.name()).collect()
    }

    /// Acquires posts for `feed_url`, keeping at most `max_posts`.
    ///
    /// Never fails: every error path ends in [`AcquisitionOutcome::Failure`].
    /// Joining callers share the running acquisition; each applies its own
    /// `max_posts` to the shared result.
    pub async fn query(&self, feed_url: &str, max_posts: Option<usize>) -> AcquisitionOutcome {
        self.in_flight(feed_url).await.limited(max_posts)
    }

    /// Starts a debounced session bound to `config`.
    pub fn start(&self, config: FeedConfig) -> FeedSession {
        FeedSession::spawn(
            self.clone(),
            config,
            self.inner.debounce,
            self.inner.shutdown.child_token(),
        )
    }

    /// Cancels every outstanding query and session. Terminal: later queries
    /// return the cancelled failure immediately.
    pub fn cancel(&self) {
        tracing::debug!("Cancelling coordinator");
        self.inner.shutdown.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    fn in_flight(&self, feed_url: &str) -> InFlight {
        let mut in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(running) = in_flight.get(feed_url).and_then(WeakShared::upgrade) {
            tracing::debug!(feed = %feed_url, "Joining in-flight query");
            return running;
        }

        // Acquisitions dropped by every caller never reach `forget`
        in_flight.retain(|_, weak| weak.upgrade().is_some());

        let inner = Arc::clone(&self.inner);
        let key = feed_url.to_owned();
        let acquisition = async move {
            let outcome = inner.acquire(&key).await;
            inner.forget(&key);
            outcome
        }
        .boxed()
        .shared();

        if let Some(weak) = acquisition.downgrade() {
            in_flight.insert(feed_url.to_owned(), weak);
        }
        acquisition
    }
}

impl Inner {
    async fn acquire(&self, feed_url: &str) -> AcquisitionOutcome {
        let token = self.shutdown.child_token();
        tokio::select! {
            biased;
            _ = token.cancelled() => AcquisitionOutcome::cancelled(),
            outcome = self.run(feed_url, &token) => outcome,
        }
    }

    async fn run(&self, feed_url: &str, token: &CancellationToken) -> AcquisitionOutcome {
        if let Some(posts) = self.cache.get(feed_url).await {
            tracing::debug!(feed = %feed_url, posts = posts.len(), "Serving feed from cache");
            return AcquisitionOutcome::Success {
                posts,
                source: CACHE_SOURCE.to_owned(),
            };
        }

        if self.relays.is_empty() {
            tracing::warn!(feed = %feed_url, "No relays configured");
            return AcquisitionOutcome::Failure { errors: Vec::new() };
        }

        let outcome = match self.race(feed_url, token).await {
            Some((source, posts)) => AcquisitionOutcome::Success { posts, source },
            None => self.fallback(feed_url, token).await,
        };

        match &outcome {
            AcquisitionOutcome::Success { posts, source } => {
                tracing::info!(feed = %feed_url, relay = %source, posts = posts.len(), "Feed acquired");
                self.cache.set(feed_url, posts).await;
            }
            AcquisitionOutcome::Failure { errors } => {
                tracing::warn!(feed = %feed_url, relays = errors.len(), "All relays failed");
            }
        }
        outcome
    }

    /// Races every relay; returns the winner's name and posts.
    async fn race(&self, feed_url: &str, token: &CancellationToken) -> Option<(String, Vec<Post>)> {
        let race = token.child_token();

        let attempts = self.relays.iter().map(|relay| {
            let race = race.clone();
            async move {
                with_retries(relay.as_ref(), feed_url, self.retry, &race)
                    .await
                    .map(|posts| (relay.name().to_owned(), posts))
                    .map_err(|e| {
                        tracing::debug!(relay = %relay.name(), error = %e, "Relay lost the race");
                        e
                    })
            }
            .boxed()
        });

        let result = future::select_ok(attempts).await;
        // Losers still pending observe this before being dropped with `rest`
        race.cancel();

        match result {
            Ok((winner, _rest)) => {
                tracing::debug!(feed = %feed_url, relay = %winner.0, "Relay won the race");
                Some(winner)
            }
            Err(e) => {
                tracing::info!(feed = %feed_url, error = %e, "Every relay failed the race, falling back");
                None
            }
        }
    }

    /// Tries relays one at a time in declared order.
    async fn fallback(&self, feed_url: &str, token: &CancellationToken) -> AcquisitionOutcome {
        let mut errors = Vec::with_capacity(self.relays.len());

        for relay in &self.relays {
            match with_retries(relay.as_ref(), feed_url, self.retry, token).await {
                Ok(posts) => {
                    tracing::debug!(
                        relay = %relay.name(),
                        failed_before = errors.len(),
                        "Fallback relay succeeded"
                    );
                    return AcquisitionOutcome::Success {
                        posts,
                        source: relay.name().to_owned(),
                    };
                }
                Err(e) => {
                    tracing::warn!(relay = %relay.name(), error = %e, "Fallback relay failed");
                    errors.push(AttemptError {
                        relay: relay.name().to_owned(),
                        message: e.to_string(),
                    });
                }
            }
        }

        AcquisitionOutcome::Failure { errors }
    }

    fn forget(&self, feed_url: &str) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(feed_url);
    }
}
