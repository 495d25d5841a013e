//! Utility functions shared by the parsers, relays and CLI.
//!
//! - **URL handling**: feed URL validation, source domain extraction, link resolution
//! - **Text processing**: HTML stripping and entity decoding for post titles
//!
//! # Examples
//!
//! ```
//! use relayfeed::util::{feed_domain, strip_html};
//!
//! assert_eq!(feed_domain("https://www.example.com/rss.xml"), "example.com");
//! assert_eq!(strip_html("<b>Hello</b> &amp; welcome"), "Hello & welcome");
//! ```

mod text;
mod url_validator;

pub use text::{strip_control_chars, strip_html};
pub use url_validator::{feed_domain, resolve_link, validate_feed_url, UrlValidationError};
