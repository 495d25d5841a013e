//! Configuration file parser for ~/.config/relayfeed/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde but logged as a warning, since they are
//! usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::relay::{RelayDescriptor, RetryPolicy, URL_PLACEHOLDER};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// Parsed fine but describes an unusable setup.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// A `[[relays]]` array, when present, replaces the built-in relay list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Minutes a cached feed stays fresh.
    pub cache_ttl_minutes: u64,

    /// Extra attempts per relay after the first failure.
    pub max_retries: u32,

    /// Pause between attempts on the same relay, in milliseconds.
    pub retry_delay_ms: u64,

    /// Quiet period before a changed feed session configuration is queried.
    pub debounce_ms: u64,

    /// Cap on a single relay response body.
    pub max_response_bytes: usize,

    /// SQLite file for a persistent cache. `None` keeps the cache in memory.
    pub cache_path: Option<PathBuf>,

    /// Relay services, in fallback order.
    pub relays: Vec<RelayDescriptor>,
}

impl Default for Config {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            cache_ttl_minutes: 30,
            max_retries: retry.max_retries,
            retry_delay_ms: retry.delay.as_millis() as u64,
            debounce_ms: 300,
            max_response_bytes: crate::relay::MAX_RESPONSE_SIZE,
            cache_path: None,
            relays: RelayDescriptor::defaults(),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 7] = [
        "cache_ttl_minutes",
        "max_retries",
        "retry_delay_ms",
        "debounce_ms",
        "max_response_bytes",
        "cache_path",
        "relays",
    ];

    /// Default location: `$HOME/.config/relayfeed/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        let home = std::env::var_os("HOME")?;
        Some(
            PathBuf::from(home)
                .join(".config")
                .join("relayfeed")
                .join("config.toml"),
        )
    }

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    /// - Unusable values → `Err(ConfigError::Invalid)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to avoid pulling a huge file into memory
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        let config = Self::from_toml(&content)?;
        tracing::info!(
            path = %path.display(),
            relays = config.relays.len(),
            cache_ttl_minutes = config.cache_ttl_minutes,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse and validate configuration text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the coordinator cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relays.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one relay must be configured".to_owned(),
            ));
        }
        for relay in &self.relays {
            if relay.name.trim().is_empty() {
                return Err(ConfigError::Invalid("relay name must not be empty".to_owned()));
            }
            if !relay.endpoint.contains(URL_PLACEHOLDER) {
                return Err(ConfigError::Invalid(format!(
                    "relay '{}' endpoint must contain the {URL_PLACEHOLDER} placeholder",
                    relay.name
                )));
            }
            if relay.timeout_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "relay '{}' timeout_ms must be greater than zero",
                    relay.name
                )));
            }
        }
        if self.max_response_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_response_bytes must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_minutes.saturating_mul(60))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::ResponseShape;

    fn write_config(test: &str, content: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("relayfeed_config_test_{test}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.cache_ttl(), Duration::from_secs(30 * 60));
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.retry_policy().delay, Duration::from_millis(500));
        assert_eq!(config.debounce(), Duration::from_millis(300));
        assert_eq!(config.max_response_bytes, 5 * 1024 * 1024);
        assert!(config.cache_path.is_none());
        assert_eq!(config.relays.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/relayfeed_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_empty_file_returns_default() {
        let (dir, path) = write_config("empty", "   \n  \n  ");
        let config = Config::load(&path).unwrap();
        assert_eq!(config, Config::default());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (dir, path) = write_config("partial", "max_retries = 0\ncache_ttl_minutes = 5\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.debounce_ms, 300); // default
        assert_eq!(config.relays, RelayDescriptor::defaults()); // default
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let content = r#"
cache_ttl_minutes = 10
max_retries = 1
retry_delay_ms = 250
debounce_ms = 100
max_response_bytes = 1048576
cache_path = "/var/tmp/relayfeed.db"

[[relays]]
name = "local"
endpoint = "http://127.0.0.1:8080/raw?u={url}"
timeout_ms = 1500
shape = "raw-xml"

[[relays]]
name = "converter"
endpoint = "https://conv.example/api.json?rss_url={url}"
timeout_ms = 3000
shape = "json-feed"
"#;
        let (dir, path) = write_config("full", content);
        let config = Config::load(&path).unwrap();
        assert_eq!(config.retry_policy().delay, Duration::from_millis(250));
        assert_eq!(config.max_response_bytes, 1_048_576);
        assert_eq!(
            config.cache_path.as_deref(),
            Some(Path::new("/var/tmp/relayfeed.db"))
        );
        assert_eq!(config.relays.len(), 2);
        assert_eq!(config.relays[0].name, "local");
        assert_eq!(config.relays[0].shape, ResponseShape::RawXml);
        assert_eq!(config.relays[1].shape, ResponseShape::JsonFeed);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (dir, path) = write_config("invalid", "this is not [valid toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let config = Config::from_toml("max_retries = 3\ntheme = \"dark\"\n").unwrap();
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_unknown_shape_rejected() {
        let content = r#"
[[relays]]
name = "odd"
endpoint = "https://odd.example/?u={url}"
timeout_ms = 1000
shape = "yaml"
"#;
        assert!(matches!(Config::from_toml(content), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_empty_relay_list_rejected() {
        let err = Config::from_toml("relays = []\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("at least one relay")));
    }

    #[test]
    fn test_endpoint_without_placeholder_rejected() {
        let content = r#"
[[relays]]
name = "broken"
endpoint = "https://proxy.example/fetch"
timeout_ms = 1000
shape = "raw-xml"
"#;
        let err = Config::from_toml(content).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("broken")));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let content = r#"
[[relays]]
name = "instant"
endpoint = "https://proxy.example/?u={url}"
timeout_ms = 0
shape = "raw-xml"
"#;
        assert!(matches!(
            Config::from_toml(content),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_wrong_type_returns_error() {
        assert!(Config::from_toml("max_retries = \"two\"\n").is_err());
    }

    #[test]
    fn test_too_large_file_rejected() {
        let (dir, path) = write_config("too_large", &"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
