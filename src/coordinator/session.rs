use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{AcquisitionOutcome, Coordinator};

/// What a host binds a session to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    pub url: String,
    pub max_posts: Option<usize>,
}

impl FeedConfig {
    pub fn new(url: impl Into<String>, max_posts: Option<usize>) -> Self {
        Self {
            url: url.into(),
            max_posts,
        }
    }
}

/// A long-lived binding between a changing [`FeedConfig`] and its latest
/// [`AcquisitionOutcome`].
///
/// The first configuration is queried immediately. Later changes are
/// debounced: the query runs once the configuration has been stable for the
/// debounce period, and a query still running when the configuration changes
/// is abandoned. Outcomes replace each other atomically in a `watch` channel.
///
/// Dropping the session stops it.
pub struct FeedSession {
    config_tx: watch::Sender<FeedConfig>,
    outcome_rx: watch::Receiver<Option<AcquisitionOutcome>>,
    token: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Query right away (initial configuration)
    Immediate,
    /// Wait for the configuration to change
    Idle,
    /// A change arrived; wait for it to settle
    Settling,
}

impl FeedSession {
    pub(super) fn spawn(
        coordinator: Coordinator,
        config: FeedConfig,
        debounce: Duration,
        token: CancellationToken,
    ) -> Self {
        let (config_tx, config_rx) = watch::channel(config);
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let task = tokio::spawn(run(
            coordinator,
            config_rx,
            outcome_tx,
            debounce,
            token.clone(),
        ));
        Self {
            config_tx,
            outcome_rx,
            token,
            task,
        }
    }

    /// Replaces the configuration. Identical configurations are ignored.
    pub fn reconfigure(&self, config: FeedConfig) {
        self.config_tx.send_if_modified(|current| {
            if *current == config {
                false
            } else {
                *current = config;
                true
            }
        });
    }

    pub fn config(&self) -> FeedConfig {
        self.config_tx.borrow().clone()
    }

    /// Receiver that sees every published outcome.
    pub fn subscribe(&self) -> watch::Receiver<Option<AcquisitionOutcome>> {
        self.outcome_rx.clone()
    }

    /// Most recently published outcome, if any query has finished.
    pub fn latest(&self) -> Option<AcquisitionOutcome> {
        self.outcome_rx.borrow().clone()
    }

    /// Stops the session, abandoning any running query.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for FeedSession {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run(
    coordinator: Coordinator,
    mut config_rx: watch::Receiver<FeedConfig>,
    outcome_tx: watch::Sender<Option<AcquisitionOutcome>>,
    debounce: Duration,
    token: CancellationToken,
) {
    let mut phase = Phase::Immediate;

    loop {
        if phase == Phase::Idle {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                changed = config_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            phase = Phase::Settling;
        }

        if phase == Phase::Settling {
            // Each further change restarts the quiet period
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    changed = config_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    _ = tokio::time::sleep(debounce) => break,
                }
            }
        }

        let config = config_rx.borrow_and_update().clone();
        tracing::debug!(feed = %config.url, max_posts = ?config.max_posts, "Session querying feed");

        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            changed = config_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                tracing::debug!(feed = %config.url, "Configuration changed mid-query, abandoning it");
                phase = Phase::Settling;
            }
            outcome = coordinator.query(&config.url, config.max_posts) => {
                outcome_tx.send_replace(Some(outcome));
                phase = Phase::Idle;
            }
        }
    }

    tracing::debug!("Feed session stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::Post;
    use crate::relay::{Relay, RelayError, RetryPolicy};
    use crate::storage::{FeedCache, MemoryStore};
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::sync::{Arc, Mutex};

    /// Records every URL it is asked for; answers after `latency`.
    struct Recording {
        latency: Duration,
        urls: Mutex<Vec<String>>,
    }

    impl Relay for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn attempt<'a>(&'a self, feed_url: &'a str) -> BoxFuture<'a, Result<Vec<Post>, RelayError>> {
            async move {
                self.urls.lock().unwrap().push(feed_url.to_owned());
                tokio::time::sleep(self.latency).await;
                Ok(vec![Post {
                    domain: "example.com".into(),
                    date: "No date".into(),
                    title: format!("Latest from {feed_url}"),
                    link: "#".into(),
                }])
            }
            .boxed()
        }
    }

    fn setup(latency_ms: u64) -> (Arc<Recording>, Coordinator) {
        let relay = Arc::new(Recording {
            latency: Duration::from_millis(latency_ms),
            urls: Mutex::new(Vec::new()),
        });
        let coordinator = Coordinator::builder(FeedCache::new(Arc::new(MemoryStore::new())))
            .relay(relay.clone())
            .retry_policy(RetryPolicy {
                max_retries: 0,
                delay: Duration::ZERO,
            })
            .debounce(Duration::from_millis(300))
            .build();
        (relay, coordinator)
    }

    fn title(outcome: &Option<AcquisitionOutcome>) -> Option<String> {
        outcome
            .as_ref()
            .and_then(AcquisitionOutcome::posts)
            .and_then(|posts| posts.first())
            .map(|p| p.title.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_query_is_immediate() {
        let (relay, coordinator) = setup(10);
        let session = coordinator.start(FeedConfig::new("https://a.example/feed", None));
        let mut rx = session.subscribe();

        rx.changed().await.unwrap();
        assert_eq!(
            title(&rx.borrow()).as_deref(),
            Some("Latest from https://a.example/feed")
        );
        assert_eq!(relay.urls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_changes_coalesce_into_one_query() {
        let (relay, coordinator) = setup(10);
        let session = coordinator.start(FeedConfig::new("https://a.example/feed", None));
        let mut rx = session.subscribe();
        rx.changed().await.unwrap();

        session.reconfigure(FeedConfig::new("https://b.example/feed", None));
        tokio::time::sleep(Duration::from_millis(100)).await;
        session.reconfigure(FeedConfig::new("https://c.example/feed", None));
        tokio::time::sleep(Duration::from_millis(100)).await;
        session.reconfigure(FeedConfig::new("https://d.example/feed", None));

        rx.changed().await.unwrap();
        assert_eq!(
            title(&rx.borrow()).as_deref(),
            Some("Latest from https://d.example/feed")
        );
        assert_eq!(
            *relay.urls.lock().unwrap(),
            vec!["https://a.example/feed", "https://d.example/feed"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_mid_query_abandons_it() {
        let (relay, coordinator) = setup(1_000);
        let session = coordinator.start(FeedConfig::new("https://slow.example/feed", None));
        let mut rx = session.subscribe();

        tokio::time::sleep(Duration::from_millis(200)).await;
        session.reconfigure(FeedConfig::new("https://next.example/feed", None));

        rx.changed().await.unwrap();
        assert_eq!(
            title(&rx.borrow()).as_deref(),
            Some("Latest from https://next.example/feed")
        );
        assert_eq!(relay.urls.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_config_is_ignored() {
        let (relay, coordinator) = setup(10);
        let config = FeedConfig::new("https://a.example/feed", Some(5));
        let session = coordinator.start(config.clone());
        let mut rx = session.subscribe();
        rx.changed().await.unwrap();

        session.reconfigure(config);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(relay.urls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_session() {
        let (_, coordinator) = setup(10_000);
        let session = coordinator.start(FeedConfig::new("https://a.example/feed", None));
        tokio::time::sleep(Duration::from_millis(10)).await;

        session.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(session.is_finished());
        assert!(session.latest().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_coordinator_cancel_stops_sessions() {
        let (_, coordinator) = setup(10_000);
        let session = coordinator.start(FeedConfig::new("https://a.example/feed", None));
        tokio::time::sleep(Duration::from_millis(10)).await;

        coordinator.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(session.is_finished());
    }
}
