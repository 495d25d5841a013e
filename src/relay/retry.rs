use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{Relay, RelayError};
use crate::feed::Post;

/// Retry budget applied to every relay attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one fails
    pub max_retries: u32,
    /// Fixed pause between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            delay: Duration::from_millis(500),
        }
    }
}

/// Runs `relay` up to `1 + max_retries` times, pausing `delay` between
/// failures.
///
/// Returns the first success, or the last attempt's error unchanged. Every
/// error class is retried. When `cancel` fires the in-flight attempt or pause
/// is abandoned and [`RelayError::Cancelled`] is returned immediately.
pub async fn with_retries(
    relay: &dyn Relay,
    feed_url: &str,
    policy: RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Vec<Post>, RelayError> {
    let mut attempt: u32 = 0;

    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RelayError::Cancelled),
            result = relay.attempt(feed_url) => result,
        };

        match result {
            Ok(posts) => return Ok(posts),
            Err(e) if attempt < policy.max_retries => {
                attempt += 1;
                tracing::debug!(
                    relay = %relay.name(),
                    error = %e,
                    retry = attempt,
                    delay_ms = policy.delay.as_millis(),
                    "Relay attempt failed, retrying"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(RelayError::Cancelled),
                    _ = tokio::time::sleep(policy.delay) => {}
                }
            }
            Err(e) => return Err(e),
        }
    }
}
