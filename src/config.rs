//! Configuration file parser for ~/.config/photofeed/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning for each one
//! since they are usually typos.
use crate::orchestrator::SwitchPolicy;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Environment variable that overrides `access_token`.
pub const ACCESS_TOKEN_ENV: &str = "UNSPLASH_ACCESS_TOKEN";

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
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// The custom Debug impl masks `access_token`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Records requested per page.
    pub page_size: usize,

    /// Trailing records dropped from every page to paper over upstream duplicates.
    pub dedupe_trailing_count: usize,

    /// What happens to the source being switched away from.
    pub switch_policy: SwitchPolicy,

    /// Roll the page counter back after a failed fetch so a retry re-requests it.
    pub retry_same_page_on_failure: bool,

    /// Buffer size of the state and hydration broadcast channels.
    pub event_capacity: usize,

    pub api_base_url: String,

    /// API access token (alternative to the UNSPLASH_ACCESS_TOKEN env var).
    /// Env var takes precedence over config file.
    pub access_token: Option<String>,

    pub request_timeout_secs: u64,

    /// Retries for transient HTTP failures (5xx, 429, timeouts).
    pub max_retries: u32,

    /// Thumbnails kept in memory. 0 disables the cache.
    pub image_cache_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: 20,
            dedupe_trailing_count: 3,
            switch_policy: SwitchPolicy::Preserve,
            retry_same_page_on_failure: false,
            event_capacity: 64,
            api_base_url: "https://api.unsplash.com".to_string(),
            access_token: None,
            request_timeout_secs: 20,
            max_retries: 3,
            image_cache_capacity: 128,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("page_size", &self.page_size)
            .field("dedupe_trailing_count", &self.dedupe_trailing_count)
            .field("switch_policy", &self.switch_policy)
            .field(
                "retry_same_page_on_failure",
                &self.retry_same_page_on_failure,
            )
            .field("event_capacity", &self.event_capacity)
            .field("api_base_url", &self.api_base_url)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("image_cache_capacity", &self.image_cache_capacity)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 10] = [
        "page_size",
        "dedupe_trailing_count",
        "switch_policy",
        "retry_same_page_on_failure",
        "event_capacity",
        "api_base_url",
        "access_token",
        "request_timeout_secs",
        "max_retries",
        "image_cache_capacity",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
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
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            tracing::debug!("Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        tracing::info!(
            page_size = config.page_size,
            switch_policy = ?config.switch_policy,
            "Loaded configuration"
        );
        Ok(config)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.page_size, 20);
        assert_eq!(config.dedupe_trailing_count, 3);
        assert_eq!(config.switch_policy, SwitchPolicy::Preserve);
        assert!(!config.retry_same_page_on_failure);
        assert_eq!(config.api_base_url, "https://api.unsplash.com");
        assert!(config.access_token.is_none());
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/photofeed_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.page_size, 20);
    }

    #[test]
    fn test_whitespace_only_returns_default() {
        let config = Config::parse("   \n  \n  ").unwrap();
        assert_eq!(config.page_size, 20);
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let config = Config::parse("page_size = 30\n").unwrap();
        assert_eq!(config.page_size, 30);
        assert_eq!(config.dedupe_trailing_count, 3);
        assert_eq!(config.image_cache_capacity, 128);
    }

    #[test]
    fn test_full_config() {
        let content = r#"
page_size = 10
dedupe_trailing_count = 0
switch_policy = "reset"
retry_same_page_on_failure = true
event_capacity = 8
api_base_url = "https://photos.example.com"
access_token = "test-token-123"
request_timeout_secs = 5
max_retries = 1
image_cache_capacity = 0
"#;
        let config = Config::parse(content).unwrap();
        assert_eq!(config.page_size, 10);
        assert_eq!(config.dedupe_trailing_count, 0);
        assert_eq!(config.switch_policy, SwitchPolicy::Reset);
        assert!(config.retry_same_page_on_failure);
        assert_eq!(config.event_capacity, 8);
        assert_eq!(config.api_base_url, "https://photos.example.com");
        assert_eq!(config.access_token.as_deref(), Some("test-token-123"));
        assert_eq!(config.request_timeout_secs, 5);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.image_cache_capacity, 0);
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let err = Config::parse("this is not [valid toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_unknown_switch_policy_rejected() {
        assert!(Config::parse("switch_policy = \"sometimes\"\n").is_err());
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let config = Config::parse("page_size = 5\ntotally_fake_key = 1\n").unwrap();
        assert_eq!(config.page_size, 5);
    }

    #[test]
    fn test_too_large_file_rejected() {
        let dir = std::env::temp_dir().join("photofeed_config_test_too_large");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "a".repeat(1_048_577)).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join("photofeed_config_test_load");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "switch_policy = \"preserve\"\npage_size = 12\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.page_size, 12);
        assert_eq!(config.switch_policy, SwitchPolicy::Preserve);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_debug_masks_access_token() {
        let config = Config::parse("access_token = \"super-secret-token\"\n").unwrap();
        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("super-secret-token"));
        assert!(debug_output.contains("[REDACTED]"));
    }
}
