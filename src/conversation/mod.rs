//! Turn-taking conversation core
//!
//! One [`ConversationController`] task owns the turn state machine:
//!
//! ```text
//! Idle ──begin──► Recording ──finalize──► AwaitingReply ──► Thinking
//!  ▲                                                           │ first audio
//!  │                                                           ▼
//!  └──────────── Done ◄──── audio done / stop_playback ──── Playing
//! ```
//!
//! Presentation code talks to it through a [`ConversationHandle`] and renders
//! from the published [`ConversationState`] and [`ConversationEvent`]s.

mod controller;
mod handle;

use uuid::Uuid;

use crate::audio::AudioPhase;
use crate::reply::ReplyStatus;

pub use controller::ConversationController;
pub use handle::ConversationHandle;

/// Interaction state of the conversation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TurnState {
    /// Ready to record
    #[default]
    Idle,
    /// Capturing and transcribing speech
    Recording,
    /// Turn finalized, reply requests being issued
    AwaitingReply,
    /// Waiting for the first audio of the reply
    Thinking,
    /// Playing the spoken reply
    Playing,
    /// Reply finished or stopped
    Done,
}

impl TurnState {
    /// Whether a new recording may start
    #[must_use]
    pub const fn can_record(self) -> bool {
        matches!(self, Self::Idle | Self::Done)
    }

    /// Whether reply playback is in progress
    #[must_use]
    pub const fn is_replying(self) -> bool {
        matches!(self, Self::Thinking | Self::Playing)
    }
}

/// Accumulated transcript with a re-record boundary
///
/// Only the text after `cancelled_len` counts as the live transcript.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    text: String,
    cancelled_len: usize,
}

impl Transcript {
    /// Clear text and boundary
    pub fn reset(&mut self) {
        self.text.clear();
        self.cancelled_len = 0;
    }

    /// Replace the text with the latest recognizer value
    ///
    /// If the recognizer revised the text to something shorter than the
    /// boundary, the boundary moves back so it never exceeds the text.
    pub fn update(&mut self, text: &str) {
        self.text.clear();
        self.text.push_str(text);

        let mut boundary = self.cancelled_len.min(self.text.len());
        while !self.text.is_char_boundary(boundary) {
            boundary -= 1;
        }
        self.cancelled_len = boundary;
    }

    /// Discard everything said so far; later text still counts
    pub fn mark_cancelled(&mut self) {
        self.cancelled_len = self.text.len();
    }

    /// Text spoken after the last cancellation
    #[must_use]
    pub fn effective(&self) -> &str {
        &self.text[self.cancelled_len..]
    }

    /// Full text including the cancelled prefix
    #[must_use]
    pub fn full(&self) -> &str {
        &self.text
    }

    /// Byte offset of the re-record boundary
    #[must_use]
    pub const fn cancelled_len(&self) -> usize {
        self.cancelled_len
    }
}

/// One finalized recording sent to the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    /// Stable per-installation user id
    pub user_id: String,
    /// Fresh id of this turn
    pub message_id: String,
    /// Final transcript
    pub text: String,
}

impl Turn {
    /// Create a turn with a freshly generated message id
    #[must_use]
    pub fn new(user_id: &str, text: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            message_id: Uuid::new_v4().to_string(),
            text: text.to_string(),
        }
    }
}

/// Snapshot of everything a presentation layer renders
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationState {
    /// Interaction state
    pub turn_state: TurnState,
    /// Effective transcript of the current recording
    pub transcript: String,
    /// Reply text of the current turn, including inline playback errors
    pub reply: String,
    /// Message id of the current turn
    pub message_id: Option<String>,
}

/// Change notification published by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationEvent {
    /// Turn state changed
    StateChanged(TurnState),
    /// Effective transcript changed
    TranscriptUpdated(String),
    /// A recording was finalized into a turn
    TurnStarted(Turn),
    /// Reply subscription opened
    ReplyOpened {
        /// Message the subscription belongs to
        message_id: String,
    },
    /// Reply text changed (full text so far)
    ReplyUpdated(String),
    /// Reply subscription reached a terminal status
    ReplyFinished {
        /// Message the subscription belonged to
        message_id: String,
        /// How it ended
        status: ReplyStatus,
    },
    /// Audio session phase changed
    AudioPhaseChanged(AudioPhase),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_transcript_after_cancel() {
        let mut transcript = Transcript::default();
        transcript.update("turn off the");
        transcript.mark_cancelled();
        assert_eq!(transcript.effective(), "");

        transcript.update("turn off the lights please");
        assert_eq!(transcript.effective(), " lights please");
        assert_eq!(transcript.full(), "turn off the lights please");
    }

    #[test]
    fn test_effective_independent_of_prefix_length() {
        for prefix in ["", "a", "a much longer sentence spoken before the user changed their mind"] {
            let mut transcript = Transcript::default();
            transcript.update(prefix);
            transcript.mark_cancelled();
            transcript.update(&format!("{prefix}lights"));
            assert_eq!(transcript.effective(), "lights");
        }
    }

    #[test]
    fn test_boundary_follows_shorter_revision() {
        let mut transcript = Transcript::default();
        transcript.update("hello world");
        transcript.mark_cancelled();

        transcript.update("hello");
        assert_eq!(transcript.cancelled_len(), 5);
        assert_eq!(transcript.effective(), "");
    }

    #[test]
    fn test_boundary_lands_on_char_boundary() {
        let mut transcript = Transcript::default();
        transcript.update("开灯吧");
        transcript.mark_cancelled();

        // Revised to a shorter string whose byte length splits a character
        transcript.update("开x");
        assert!(transcript.cancelled_len() <= transcript.full().len());
        assert_eq!(transcript.effective(), "");

        transcript.update("开");
        transcript.update("开灯");
        assert_eq!(transcript.effective(), "灯");
    }

    #[test]
    fn test_message_ids_unique_for_identical_turns() {
        let a = Turn::new("user", "same words");
        let b = Turn::new("user", "same words");
        assert_ne!(a.message_id, b.message_id);
        assert_eq!(a.text, b.text);
    }

    #[test]
    fn test_state_predicates() {
        assert!(TurnState::Idle.can_record());
        assert!(TurnState::Done.can_record());
        assert!(!TurnState::Thinking.can_record());
        assert!(TurnState::Playing.is_replying());
        assert!(!TurnState::Recording.is_replying());
    }
}
