//! TOML configuration file loading
//!
//! Supports `~/.config/voxchat/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct VoxchatConfigFile {
    /// Backend connection
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Local storage
    #[serde(default)]
    pub storage: StorageFileConfig,

    /// Turn-taking behaviour
    #[serde(default)]
    pub conversation: ConversationFileConfig,
}

/// Backend connection configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Base URL of the conversational backend (e.g. `http://host:5012/api_12`)
    pub api_url: Option<String>,
}

/// Local storage configuration
#[derive(Debug, Default, Deserialize)]
pub struct StorageFileConfig {
    /// Directory holding the persisted user identity
    pub data_dir: Option<String>,
}

/// Turn-taking configuration
#[derive(Debug, Default, Deserialize)]
pub struct ConversationFileConfig {
    /// Text sent when a recording is finalized with a blank transcript
    pub blank_fallback: Option<String>,

    /// Separator placed between streamed reply fragments
    pub reply_delimiter: Option<String>,

    /// Capacity of the conversation event broadcast
    pub event_capacity: Option<usize>,
}

/// Load the TOML config file from the standard path
///
/// Returns `VoxchatConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> VoxchatConfigFile {
    config_file_path().map_or_else(VoxchatConfigFile::default, |path| load_from(&path))
}

/// Load a TOML config file from an explicit path, falling back to defaults
pub fn load_from(path: &Path) -> VoxchatConfigFile {
    if !path.exists() {
        return VoxchatConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                VoxchatConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            VoxchatConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/voxchat/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voxchat").join("config.toml"))
}
