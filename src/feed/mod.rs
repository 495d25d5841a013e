//! Feed document parsing into normalized [`Post`] records.
//!
//! Two pure entry points cover the payloads relays hand back:
//!
//! - [`parse_xml`] - RSS 2.0, RSS 1.0/RDF and Atom documents (`quick-xml`)
//! - [`parse_json`] - feed-to-JSON conversions, JSON Feed, bare entry arrays
//!
//! Both apply the same normalization: titles are HTML-stripped, dates are
//! formatted for display (or [`NO_DATE`]), links are absolute (or [`NO_LINK`]),
//! and entries with placeholder titles are dropped after truncation.
//!
//! # Example
//!
//! ```
//! use relayfeed::feed::parse_xml;
//!
//! let rss = r#"<rss version="2.0"><channel>
//!     <item><title>Hello world</title><link>https://example.com/1</link></item>
//! </channel></rss>"#;
//!
//! let posts = parse_xml(rss, "https://www.example.com/rss.xml", None).unwrap();
//! assert_eq!(posts[0].domain, "example.com");
//! assert_eq!(posts[0].title, "Hello world");
//! ```

mod json;
mod parser;
mod xml;

pub use json::{json_entries, parse_json};
pub use parser::{is_placeholder_title, ParseError, Post, NO_DATE, NO_LINK, NO_TITLE};
pub use xml::parse_xml;
