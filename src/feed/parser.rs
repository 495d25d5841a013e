use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::{resolve_link, strip_html};

/// Title assigned to entries without one. Such entries are always dropped.
pub const NO_TITLE: &str = "No title";
/// Date shown for entries without a parseable date.
pub const NO_DATE: &str = "No date";
/// Link used when an entry carries no usable link or identifier.
pub const NO_LINK: &str = "#";

/// Titles this short (in characters) are treated as placeholders.
const MIN_TITLE_CHARS: usize = 4;

/// Display format for post dates, e.g. "Mar 5, 2024".
const DATE_FORMAT: &str = "%b %-d, %Y";

/// Naive timestamp layouts seen in the wild (feed-to-JSON converters emit the
/// first one). Interpreted as UTC.
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// One normalized feed entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// Source hostname, common subdomain prefixes stripped
    pub domain: String,
    /// Human-readable date, or [`NO_DATE`]
    pub date: String,
    /// Plain-text title
    pub title: String,
    /// Absolute URL, or [`NO_LINK`]
    pub link: String,
}

/// Errors produced when a payload yields no usable posts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The XML parser reported a well-formedness error
    #[error("XML syntax error: {0}")]
    Syntax(String),
    /// JSON payload is neither `{items: [...]}`, `{entries: [...]}` nor an array
    #[error("Unrecognized JSON feed shape: expected an items array, an entries array or a top-level array")]
    UnknownShape,
    /// Document parsed but contained no item or entry elements
    #[error("No feed items found in {0} document")]
    NoItems(&'static str),
    /// Every entry was dropped by the title filter
    #[error("No usable posts: all {0} entries had placeholder titles")]
    AllFiltered(usize),
}

/// Builds a [`Post`] from raw field values, applying the shared normalization
/// rules: HTML-stripped title, formatted date, resolved link.
pub(crate) fn build_post(
    domain: &str,
    source_url: &str,
    raw_title: Option<&str>,
    published: Option<DateTime<FixedOffset>>,
    raw_link: Option<&str>,
) -> Post {
    let title = raw_title
        .map(strip_html)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| NO_TITLE.to_owned());

    let date = published
        .map(|dt| dt.format(DATE_FORMAT).to_string())
        .unwrap_or_else(|| NO_DATE.to_owned());

    let link = raw_link
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| resolve_link(l, source_url))
        .unwrap_or_else(|| NO_LINK.to_owned());

    Post {
        domain: domain.to_owned(),
        date,
        title,
        link,
    }
}

/// Truncates to `max` entries (when given), then drops placeholder titles.
///
/// Truncation happens first, so a feed whose leading entries are placeholders
/// can legitimately produce fewer than `max` posts.
pub(crate) fn finalize(
    mut posts: Vec<Post>,
    max: Option<usize>,
    format: &'static str,
) -> Result<Vec<Post>, ParseError> {
    if posts.is_empty() {
        return Err(ParseError::NoItems(format));
    }

    if let Some(max) = max {
        posts.truncate(max);
    }

    let found = posts.len();
    posts.retain(|p| !is_placeholder_title(&p.title));

    if posts.is_empty() {
        return Err(ParseError::AllFiltered(found));
    }
    Ok(posts)
}

/// Returns true for titles that should never be shown.
pub fn is_placeholder_title(title: &str) -> bool {
    title == NO_TITLE || title.chars().count() < MIN_TITLE_CHARS
}

/// Parses the date formats found in RSS, Atom, Dublin Core and JSON feeds.
pub(crate) fn parse_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(dt);
    }

    let utc = FixedOffset::east_opt(0)?;
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive).with_timezone(&utc));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let naive = date.and_hms_opt(0, 0, 0)?;
        return Some(Utc.from_utc_datetime(&naive).with_timezone(&utc));
    }

    None
}

/// Identifier fields only count as links when they are absolute http(s) URLs
/// (RSS `<guid isPermaLink="true">`); opaque ids such as `urn:uuid:...` do not.
pub(crate) fn permalink_id(id: &str) -> Option<&str> {
    let id = id.trim();
    (id.starts_with("http://") || id.starts_with("https://")).then_some(id)
}
