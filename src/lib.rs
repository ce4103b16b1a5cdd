//! voxchat - Voice chat client core
//!
//! Hold-to-talk conversation with a remote assistant backend:
//! - Streaming speech transcription with re-record support
//! - Reply text streamed over server-sent events
//! - Spoken reply fetched and played as streamed audio
//! - One controller task coordinating the turn state machine
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │          Presentation (CLI, UI, ...)                │
//! │      ConversationHandle  ◄── state / events         │
//! └────────────────────┬────────────────────────────────┘
//!                      │ commands
//! ┌────────────────────▼────────────────────────────────┐
//! │             ConversationController                  │
//! │ TranscriptionSession │ ReplyStream │ RemoteAudio    │
//! └──────────┬───────────────────┬──────────────┬───────┘
//!            │                   │              │
//!      SpeechRecognizer     GET /sse/{id}   GET /think_and_reply
//!                                           GET /speech
//! ```

pub mod audio;
pub mod backend;
pub mod config;
pub mod conversation;
pub mod error;
pub mod identity;
pub mod reply;
pub mod session;
pub mod transcription;

pub use audio::{AudioPhase, AudioPlayback, HttpMediaPlayer, MediaPlayer, RemoteAudioSession};
pub use backend::Backend;
pub use config::Config;
pub use conversation::{
    ConversationController, ConversationEvent, ConversationHandle, ConversationState, Turn,
    TurnState,
};
pub use error::{Error, Result};
pub use identity::UserIdentity;
pub use reply::{ReplyStatus, ReplyStream};
pub use transcription::{
    ChannelRecognizer, RecognizerEvent, RecognizerFeed, RecognizerSink, SpeechRecognizer,
    TranscriptionSession,
};
