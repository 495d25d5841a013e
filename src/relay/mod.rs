//! Relay services: third-party endpoints that fetch a cross-origin feed on
//! our behalf and hand it back in one of a few transport envelopes.
//!
//! - [`RelayDescriptor`] - static configuration for one relay (name, endpoint
//!   template, deadline, envelope shape)
//! - [`Relay`] - the seam the coordinator races over; [`HttpRelay`] is the
//!   network implementation, tests plug in their own
//! - [`with_retries`] - bounded retry with a fixed delay and cooperative cancellation

mod client;
mod retry;

use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::form_urlencoded;

use crate::feed::{ParseError, Post};

pub use client::{decode_payload, HttpRelay, MAX_RESPONSE_SIZE};
pub use retry::{with_retries, RetryPolicy};

/// Placeholder in endpoint templates replaced by the percent-encoded feed URL.
pub const URL_PLACEHOLDER: &str = "{url}";

/// Transport envelope a relay wraps the feed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseShape {
    /// Body is the feed document itself
    RawXml,
    /// `{"contents": "<feed text or data: URI>"}`
    WrappedJson,
    /// Feed already converted to JSON: `{"status": "ok", "items": [...]}`
    JsonFeed,
}

/// Static configuration for one relay service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayDescriptor {
    /// Name used in logs and failure reports
    pub name: String,
    /// URL template containing `{url}`
    pub endpoint: String,
    /// Hard deadline for one attempt, in milliseconds
    pub timeout_ms: u64,
    /// Envelope the relay responds with
    pub shape: ResponseShape,
}

impl RelayDescriptor {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        timeout_ms: u64,
        shape: ResponseShape,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            timeout_ms,
            shape,
        }
    }

    /// Builds the relay request URL for `feed_url`.
    ///
    /// ```
    /// use relayfeed::relay::{RelayDescriptor, ResponseShape};
    ///
    /// let relay = RelayDescriptor::new("proxy", "https://proxy.example/?url={url}", 2000, ResponseShape::RawXml);
    /// assert_eq!(
    ///     relay.request_url("https://blog.example.com/rss.xml?x=1"),
    ///     "https://proxy.example/?url=https%3A%2F%2Fblog.example.com%2Frss.xml%3Fx%3D1"
    /// );
    /// ```
    pub fn request_url(&self, feed_url: &str) -> String {
        let encoded: String = form_urlencoded::byte_serialize(feed_url.as_bytes()).collect();
        self.endpoint.replace(URL_PLACEHOLDER, &encoded)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The three public relays used when no configuration overrides them.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new(
                "allorigins",
                "https://api.allorigins.win/get?url={url}",
                3000,
                ResponseShape::WrappedJson,
            ),
            Self::new(
                "corsproxy",
                "https://corsproxy.io/?url={url}",
                2000,
                ResponseShape::RawXml,
            ),
            Self::new(
                "rss2json",
                "https://api.rss2json.com/v1/api.json?rss_url={url}",
                3500,
                ResponseShape::JsonFeed,
            ),
        ]
    }
}

/// Coarse error classes; all of them are recoverable by retry and fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unreachable, non-success status, timeout or abort
    Network,
    /// A response arrived but is not the expected envelope
    Shape,
    /// Envelope recognized but no usable posts inside
    Parse,
}

/// Errors from a single relay attempt.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Attempt exceeded the relay's deadline
    #[error("Request timed out after {0}ms")]
    Timeout(u64),
    /// Response body exceeded the configured size limit
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    /// The surrounding query was abandoned
    #[error("Attempt cancelled")]
    Cancelled,
    /// Response does not resemble the expected envelope
    #[error("Unexpected response: {0}")]
    Shape(String),
    /// Feed payload yielded no usable posts
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::Network(_)
            | RelayError::HttpStatus(_)
            | RelayError::Timeout(_)
            | RelayError::ResponseTooLarge(_)
            | RelayError::Cancelled => ErrorKind::Network,
            RelayError::Shape(_) => ErrorKind::Shape,
            RelayError::Parse(_) => ErrorKind::Parse,
        }
    }
}

/// One relay the coordinator can race.
///
/// Implementations perform a single bounded attempt; retries, racing and
/// cancellation are layered on top by [`with_retries`] and the coordinator.
pub trait Relay: Send + Sync {
    fn name(&self) -> &str;

    fn attempt<'a>(&'a self, feed_url: &'a str) -> BoxFuture<'a, Result<Vec<Post>, RelayError>>;
}
