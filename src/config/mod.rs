//! Configuration management for voxchat

pub mod file;

use std::path::PathBuf;

use url::Url;

use crate::{Error, Result};

use file::VoxchatConfigFile;

/// Backend base URL used when nothing else is configured
pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:5012/api_12";

/// Separator placed between reply fragments by default
pub const DEFAULT_REPLY_DELIMITER: &str = " ";

/// Default capacity of the conversation event broadcast
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Client configuration
///
/// Built once at startup and shared read-only (usually behind an `Arc`).
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the conversational backend, without trailing slash
    pub api_base_url: String,

    /// Directory for persisted client state (user identity)
    pub data_dir: PathBuf,

    /// Text substituted when a recording is finalized with a blank transcript.
    /// `None` rejects blank turns instead.
    pub blank_fallback: Option<String>,

    /// Separator placed between streamed reply fragments
    pub reply_delimiter: String,

    /// Capacity of the conversation event broadcast
    pub event_capacity: usize,
}

impl Config {
    /// Create a configuration for `api_base_url` with defaults for everything else
    ///
    /// # Errors
    ///
    /// Returns error if the URL is not an absolute http(s) URL
    pub fn new(api_base_url: &str) -> Result<Self> {
        Ok(Self {
            api_base_url: normalize_base_url(api_base_url)?,
            data_dir: default_data_dir(),
            blank_fallback: None,
            reply_delimiter: DEFAULT_REPLY_DELIMITER.to_string(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        })
    }

    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if the resolved base URL is invalid
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if the resolved base URL is invalid
    pub fn resolve<F>(fc: VoxchatConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_base_url = env("VOXCHAT_API_URL")
            .or(fc.server.api_url)
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());

        let data_dir = env("VOXCHAT_DATA_DIR")
            .or(fc.storage.data_dir)
            .map_or_else(default_data_dir, PathBuf::from);

        let blank_fallback = env("VOXCHAT_BLANK_FALLBACK")
            .or(fc.conversation.blank_fallback)
            .filter(|s| !s.trim().is_empty());

        let event_capacity = fc
            .conversation
            .event_capacity
            .filter(|&c| c > 0)
            .unwrap_or(DEFAULT_EVENT_CAPACITY);

        Ok(Self {
            api_base_url: normalize_base_url(&api_base_url)?,
            data_dir,
            blank_fallback,
            reply_delimiter: fc
                .conversation
                .reply_delimiter
                .unwrap_or_else(|| DEFAULT_REPLY_DELIMITER.to_string()),
            event_capacity,
        })
    }

    /// Replace the backend base URL (command-line override)
    ///
    /// # Errors
    ///
    /// Returns error if the URL is not an absolute http(s) URL
    pub fn with_api_url(mut self, api_base_url: &str) -> Result<Self> {
        self.api_base_url = normalize_base_url(api_base_url)?;
        Ok(self)
    }

    /// Path of the persisted user identity file
    #[must_use]
    pub fn identity_path(&self) -> PathBuf {
        self.data_dir.join("identity.json")
    }
}

/// Return the data directory for client state
///
/// Uses `~/.local/share/voxchat/` on Linux
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "voxchat", "voxchat").map_or_else(
        || PathBuf::from(".local/share/voxchat"),
        |d| d.data_dir().to_path_buf(),
    )
}

fn normalize_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    let url = Url::parse(trimmed)?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Config(format!(
            "api base url must be http or https, got {}",
            url.scheme()
        )));
    }

    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults() {
        let config = Config::resolve(VoxchatConfigFile::default(), no_env).unwrap();
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.reply_delimiter, " ");
        assert!(config.blank_fallback.is_none());
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut fc = VoxchatConfigFile::default();
        fc.server.api_url = Some("http://file.test/api".to_string());
        fc.conversation.blank_fallback = Some("hello".to_string());

        let config = Config::resolve(fc, |key| match key {
            "VOXCHAT_API_URL" => Some("https://env.test/api_12/".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(config.api_base_url, "https://env.test/api_12");
        assert_eq!(config.blank_fallback.as_deref(), Some("hello"));
    }

    #[test]
    fn test_blank_fallback_ignored_when_blank() {
        let config = Config::resolve(VoxchatConfigFile::default(), |key| {
            (key == "VOXCHAT_BLANK_FALLBACK").then(|| "   ".to_string())
        })
        .unwrap();
        assert!(config.blank_fallback.is_none());
    }

    #[test]
    fn test_rejects_non_http_url() {
        assert!(matches!(Config::new("ftp://example.test"), Err(Error::Config(_))));
        assert!(matches!(Config::new("not a url"), Err(Error::Url(_))));
    }

    #[test]
    fn test_cli_url_override() {
        let config = Config::new(DEFAULT_API_BASE_URL)
            .unwrap()
            .with_api_url("http://10.0.0.2:5012/api_12/")
            .unwrap();
        assert_eq!(config.api_base_url, "http://10.0.0.2:5012/api_12");
    }

    #[test]
    fn test_identity_path_in_data_dir() {
        let mut config = Config::new("http://localhost:5012").unwrap();
        config.data_dir = PathBuf::from("/tmp/voxchat-test");
        assert_eq!(
            config.identity_path(),
            PathBuf::from("/tmp/voxchat-test/identity.json")
        );
    }
}
