//! JSON-family feed parsing.
//!
//! Accepts the output of feed-to-JSON converters (`{status, items: [...]}`),
//! JSON Feed style documents (`{items: [...]}`), `{entries: [...]}` wrappers
//! and bare arrays of entries.

use serde_json::Value;

use super::parser::{build_post, finalize, parse_date, permalink_id, ParseError, Post};
use crate::util::feed_domain;

/// Date fields in priority order.
const DATE_FIELDS: &[&str] = &["pubDate", "published", "date_published", "updated"];

/// Returns the entry list if `payload` has a recognized top-level shape.
///
/// Recognized shapes, tried in order: an `items` array, an `entries` array,
/// or the payload itself being an array.
pub fn json_entries(payload: &Value) -> Option<&[Value]> {
    if let Some(items) = payload.get("items").and_then(Value::as_array) {
        return Some(items);
    }
    if let Some(entries) = payload.get("entries").and_then(Value::as_array) {
        return Some(entries);
    }
    payload.as_array().map(Vec::as_slice)
}

/// Parses a JSON feed payload into posts.
///
/// Field resolution mirrors the XML parser: `title` for the title, the first
/// parseable of `pubDate`/`published`/`date_published`/`updated` for the date,
/// and `link` (string, `{href}`/`{url}` object or array of those), then `url`,
/// then a permalink-style `guid` for the link.
///
/// # Errors
///
/// - [`ParseError::UnknownShape`] if no recognized top-level shape matches
/// - [`ParseError::NoItems`] if the entry list is empty
/// - [`ParseError::AllFiltered`] if every entry has a placeholder title
pub fn parse_json(
    payload: &Value,
    source_url: &str,
    max: Option<usize>,
) -> Result<Vec<Post>, ParseError> {
    let entries = json_entries(payload).ok_or(ParseError::UnknownShape)?;
    let domain = feed_domain(source_url);

    let posts = entries
        .iter()
        .map(|entry| {
            let title = entry.get("title").and_then(Value::as_str);

            let published = DATE_FIELDS
                .iter()
                .filter_map(|name| entry.get(*name).and_then(Value::as_str))
                .find_map(parse_date);

            let link = entry
                .get("link")
                .and_then(link_value)
                .or_else(|| entry.get("url").and_then(Value::as_str))
                .or_else(|| {
                    entry
                        .get("guid")
                        .and_then(Value::as_str)
                        .and_then(permalink_id)
                });

            build_post(&domain, source_url, title, published, link)
        })
        .collect();

    finalize(posts, max, "JSON")
}

/// Extracts a link from a `link` field that may be a string, an object with
/// an `href`/`url` member, or an array of either.
fn link_value(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.as_str()),
        Value::Object(obj) => obj
            .get("href")
            .and_then(Value::as_str)
            .or_else(|| obj.get("url").and_then(Value::as_str)),
        Value::Array(items) => items.iter().find_map(link_value),
        _ => None,
    }
}
