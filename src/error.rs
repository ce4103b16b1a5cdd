//! Error types for voxchat

use thiserror::Error;

use crate::conversation::TurnState;

/// Result type alias for voxchat operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice chat client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Speech recognition error
    #[error("transcription error: {0}")]
    Transcription(String),

    /// Reply stream error
    #[error("reply stream error: {0}")]
    Reply(String),

    /// Audio fetch, decode or output error
    #[error("audio error: {0}")]
    Audio(String),

    /// Text was empty or whitespace-only
    #[error("refusing to send blank text")]
    BlankInput,

    /// Command not allowed in the current turn state
    #[error("cannot {action} while {state:?}")]
    InvalidState {
        /// Rejected operation
        action: &'static str,
        /// State the controller was in
        state: TurnState,
    },

    /// The controller task has shut down
    #[error("conversation controller is closed")]
    ControllerClosed,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Invalid URL
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}
