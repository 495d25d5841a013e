use thiserror::Error;
use url::Url;

/// Subdomain labels that carry no information about the publisher.
const STRIPPED_PREFIXES: &[&str] = &["www.", "rss.", "feeds.", "api."];

/// Errors that can occur during feed URL validation.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
}

/// Validates a URL string for use as a feed source.
///
/// The feed itself is fetched by third-party relays, never by us, so only the
/// shape is checked: it must parse, use `http`/`https` and name a host.
///
/// # Examples
///
/// ```
/// use relayfeed::util::validate_feed_url;
///
/// let url = validate_feed_url("https://blog.example.com/rss.xml").unwrap();
/// assert_eq!(url.host_str(), Some("blog.example.com"));
///
/// assert!(validate_feed_url("file:///etc/passwd").is_err());
/// assert!(validate_feed_url("not a url").is_err());
/// ```
pub fn validate_feed_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(UrlValidationError::MissingHost),
    }
}

/// Returns the display domain for a feed URL.
///
/// One leading `www.`, `rss.`, `feeds.` or `api.` label is removed. Unparsable
/// input yields an empty string rather than an error since the domain is
/// purely cosmetic.
pub fn feed_domain(source_url: &str) -> String {
    let host = match Url::parse(source_url) {
        Ok(url) => url.host_str().unwrap_or_default().to_lowercase(),
        Err(_) => return String::new(),
    };

    for prefix in STRIPPED_PREFIXES {
        if let Some(stripped) = host.strip_prefix(prefix) {
            if !stripped.is_empty() {
                return stripped.to_owned();
            }
        }
    }
    host
}

/// Resolves an item link against the feed URL.
///
/// Absolute links are returned as-is, relative and protocol-relative links are
/// joined onto `base`. The `"#"` sentinel, and anything that cannot be
/// resolved, is passed through unchanged.
pub fn resolve_link(href: &str, base: &str) -> String {
    if href == "#" || href.starts_with("http://") || href.starts_with("https://") {
        return href.to_owned();
    }

    // Protocol-relative: use the URL parser to normalize
    if href.starts_with("//") {
        if let Ok(parsed) = Url::parse(&format!("https:{href}")) {
            return parsed.to_string();
        }
    }

    if let Ok(base) = Url::parse(base) {
        if let Ok(resolved) = base.join(href) {
            return resolved.to_string();
        }
    }

    href.to_owned()
}
