use std::borrow::Cow;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use percent_encoding::percent_decode_str;
use serde_json::Value;

use super::{Relay, RelayDescriptor, RelayError, ResponseShape};
use crate::feed::{json_entries, parse_json, parse_xml, Post};

/// Default cap on a relay response body (5MB).
pub const MAX_RESPONSE_SIZE: usize = 5 * 1024 * 1024;

/// Bodies shorter than this cannot hold a feed and are treated as relay noise.
const MIN_PAYLOAD_LEN: usize = 100;

/// At least one of these must appear (case-insensitively) in an XML payload.
const FEED_MARKERS: &[&str] = &["<rss", "<feed", "<channel"];

/// A relay reached over HTTP.
///
/// Requests carry no custom headers; adding any would turn simple
/// cross-origin requests into preflighted ones on the relays' side.
pub struct HttpRelay {
    descriptor: RelayDescriptor,
    client: reqwest::Client,
    max_response_bytes: usize,
}

impl HttpRelay {
    pub fn new(descriptor: RelayDescriptor, client: reqwest::Client) -> Self {
        Self {
            descriptor,
            client,
            max_response_bytes: MAX_RESPONSE_SIZE,
        }
    }

    pub fn with_max_response_bytes(mut self, limit: usize) -> Self {
        self.max_response_bytes = limit;
        self
    }

    pub fn descriptor(&self) -> &RelayDescriptor {
        &self.descriptor
    }

    /// Performs one attempt: request, validate the envelope, parse the feed.
    ///
    /// The relay's deadline covers the whole exchange, body included.
    pub async fn fetch(&self, feed_url: &str) -> Result<Vec<Post>, RelayError> {
        let request_url = self.descriptor.request_url(feed_url);
        tracing::debug!(relay = %self.descriptor.name, url = %request_url, "Requesting feed through relay");

        let body = tokio::time::timeout(self.descriptor.timeout(), self.fetch_body(&request_url))
            .await
            .map_err(|_| RelayError::Timeout(self.descriptor.timeout_ms))??;

        let posts = decode_payload(self.descriptor.shape, &body, feed_url)?;
        tracing::debug!(
            relay = %self.descriptor.name,
            posts = posts.len(),
            "Relay returned usable posts"
        );
        Ok(posts)
    }

    async fn fetch_body(&self, request_url: &str) -> Result<String, RelayError> {
        let response = self.client.get(request_url).send().await?;

        if !response.status().is_success() {
            return Err(RelayError::HttpStatus(response.status().as_u16()));
        }

        read_limited_text(response, self.max_response_bytes).await
    }
}

impl Relay for HttpRelay {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn attempt<'a>(&'a self, feed_url: &'a str) -> BoxFuture<'a, Result<Vec<Post>, RelayError>> {
        self.fetch(feed_url).boxed()
    }
}

/// Validates a relay response body against its envelope shape and parses the
/// feed inside it.
///
/// # Errors
///
/// - [`RelayError::Shape`] if the body is too short, not the expected JSON
///   envelope, reports a non-ok status, or lacks any feed root marker
/// - [`RelayError::Parse`] if the feed yields no usable posts
pub fn decode_payload(
    shape: ResponseShape,
    body: &str,
    feed_url: &str,
) -> Result<Vec<Post>, RelayError> {
    match shape {
        ResponseShape::RawXml => {
            require_min_len(body, "response body")?;
            require_feed_marker(body)?;
            Ok(parse_xml(body, feed_url, None)?)
        }
        ResponseShape::WrappedJson => {
            let envelope = parse_envelope(body)?;
            let contents = envelope
                .get("contents")
                .and_then(Value::as_str)
                .ok_or_else(|| RelayError::Shape("missing \"contents\" field".to_owned()))?;
            require_min_len(contents, "contents")?;

            let document = decode_data_uri(contents)?;
            require_feed_marker(&document)?;
            Ok(parse_xml(&document, feed_url, None)?)
        }
        ResponseShape::JsonFeed => {
            let envelope = parse_envelope(body)?;
            if let Some(status) = envelope.get("status") {
                if status.as_str() != Some("ok") {
                    return Err(RelayError::Shape(format!("relay reported status {status}")));
                }
            }
            if json_entries(&envelope).is_none() {
                return Err(RelayError::Shape(
                    "JSON response has no items or entries array".to_owned(),
                ));
            }
            Ok(parse_json(&envelope, feed_url, None)?)
        }
    }
}

fn parse_envelope(body: &str) -> Result<Value, RelayError> {
    serde_json::from_str(body).map_err(|e| RelayError::Shape(format!("invalid JSON: {e}")))
}

fn require_min_len(text: &str, what: &str) -> Result<(), RelayError> {
    if text.len() < MIN_PAYLOAD_LEN {
        return Err(RelayError::Shape(format!(
            "{what} too short ({} bytes)",
            text.len()
        )));
    }
    Ok(())
}

fn require_feed_marker(document: &str) -> Result<(), RelayError> {
    let lower = document.to_ascii_lowercase();
    if FEED_MARKERS.iter().any(|marker| lower.contains(marker)) {
        Ok(())
    } else {
        Err(RelayError::Shape("no RSS, Atom or RDF root element".to_owned()))
    }
}

/// Unwraps `data:` URIs (`data:<mime>[;base64],<payload>`); other text passes
/// through untouched.
fn decode_data_uri(contents: &str) -> Result<Cow<'_, str>, RelayError> {
    let Some(rest) = contents.strip_prefix("data:") else {
        return Ok(Cow::Borrowed(contents));
    };
    let (header, data) = rest
        .split_once(',')
        .ok_or_else(|| RelayError::Shape("data URI without payload separator".to_owned()))?;

    let is_base64 = header
        .split(';')
        .any(|param| param.trim().eq_ignore_ascii_case("base64"));

    if is_base64 {
        let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let bytes = STANDARD
            .decode(compact)
            .map_err(|e| RelayError::Shape(format!("invalid base64 data URI: {e}")))?;
        Ok(Cow::Owned(String::from_utf8_lossy(&bytes).into_owned()))
    } else {
        let decoded = percent_decode_str(data).decode_utf8_lossy();
        Ok(Cow::Owned(decoded.into_owned()))
    }
}

/// Reads the body with a size limit, rejecting oversized responses both by
/// Content-Length and while streaming.
async fn read_limited_text(
    response: reqwest::Response,
    limit: usize,
) -> Result<String, RelayError> {
    if let Some(len) = response.content_length() {
        if len > limit as u64 {
            return Err(RelayError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(RelayError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    // Feeds in legacy encodings still parse; only titles lose a few characters
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
