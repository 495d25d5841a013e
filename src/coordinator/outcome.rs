use serde::Serialize;

use crate::feed::Post;

/// Source label for results served from the cache.
pub const CACHE_SOURCE: &str = "cache";

/// Relay label used when the coordinator itself ends a query.
pub const COORDINATOR_SOURCE: &str = "coordinator";

/// One relay's final error after its retries ran out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptError {
    pub relay: String,
    pub message: String,
}

/// Result of one acquisition query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AcquisitionOutcome {
    /// Non-empty post list plus where it came from (relay name or [`CACHE_SOURCE`])
    Success { posts: Vec<Post>, source: String },
    /// Every relay failed; one entry per relay tried, in order
    Failure { errors: Vec<AttemptError> },
}

impl AcquisitionOutcome {
    pub(crate) fn cancelled() -> Self {
        AcquisitionOutcome::Failure {
            errors: vec![AttemptError {
                relay: COORDINATOR_SOURCE.to_owned(),
                message: "Query cancelled".to_owned(),
            }],
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AcquisitionOutcome::Success { .. })
    }

    pub fn posts(&self) -> Option<&[Post]> {
        match self {
            AcquisitionOutcome::Success { posts, .. } => Some(posts),
            AcquisitionOutcome::Failure { .. } => None,
        }
    }

    pub fn source(&self) -> Option<&str> {
        match self {
            AcquisitionOutcome::Success { source, .. } => Some(source),
            AcquisitionOutcome::Failure { .. } => None,
        }
    }

    /// Keeps at most `max` posts. Filtering already happened at parse time.
    pub(crate) fn limited(self, max: Option<usize>) -> Self {
        match (self, max) {
            (AcquisitionOutcome::Success { mut posts, source }, Some(max)) => {
                posts.truncate(max);
                AcquisitionOutcome::Success { posts, source }
            }
            (outcome, _) => outcome,
        }
    }

    /// One-line human-readable description.
    ///
    /// ```
    /// use relayfeed::coordinator::{AcquisitionOutcome, AttemptError};
    ///
    /// let failure = AcquisitionOutcome::Failure {
    ///     errors: vec![
    ///         AttemptError { relay: "a".into(), message: "HTTP error: status 502".into() },
    ///         AttemptError { relay: "b".into(), message: "Request timed out after 2000ms".into() },
    ///     ],
    /// };
    /// assert_eq!(
    ///     failure.summary(),
    ///     "All relays failed: a: HTTP error: status 502; b: Request timed out after 2000ms"
    /// );
    /// ```
    pub fn summary(&self) -> String {
        match self {
            AcquisitionOutcome::Success { posts, source } => {
                format!("{} posts from {source}", posts.len())
            }
            AcquisitionOutcome::Failure { errors } if errors.is_empty() => {
                "All relays failed: no relays configured".to_owned()
            }
            AcquisitionOutcome::Failure { errors } => {
                let details: Vec<String> = errors
                    .iter()
                    .map(|e| format!("{}: {}", e.relay, e.message))
                    .collect();
                format!("All relays failed: {}", details.join("; "))
            }
        }
    }
}
