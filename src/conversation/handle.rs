//! Client handle to a running conversation controller

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};

use super::controller::{Command, Responder};
use super::{ConversationEvent, ConversationState, Turn};
use crate::{Error, Result};

/// Cloneable handle for driving a conversation and observing its state
#[derive(Clone)]
pub struct ConversationHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConversationState>,
    events: broadcast::Sender<ConversationEvent>,
}

impl ConversationHandle {
    pub(super) const fn new(
        commands: mpsc::Sender<Command>,
        state: watch::Receiver<ConversationState>,
        events: broadcast::Sender<ConversationEvent>,
    ) -> Self {
        Self {
            commands,
            state,
            events,
        }
    }

    /// Start recording a new turn, superseding any reply still in progress
    ///
    /// # Errors
    ///
    /// Returns error if not idle, or the recognizer cannot start
    pub async fn begin_recording(&self) -> Result<()> {
        self.request(Command::BeginRecording).await
    }

    /// Discard what was said so far in this recording
    ///
    /// # Errors
    ///
    /// Returns error if not recording
    pub async fn cancel_and_rerecord(&self) -> Result<()> {
        self.request(Command::CancelAndRerecord).await
    }

    /// Finish recording and send the transcript as a new turn
    ///
    /// # Errors
    ///
    /// Returns error if not recording, or the transcript is blank and no
    /// fallback is configured
    pub async fn finalize_recording(&self) -> Result<Turn> {
        self.request(Command::FinalizeRecording).await
    }

    /// Stop the spoken reply and close its text stream
    ///
    /// # Errors
    ///
    /// Returns error if no reply is playing
    pub async fn stop_playback(&self) -> Result<()> {
        self.request(Command::StopPlayback).await
    }

    /// Speak `text` with the backend voice, without a reply turn
    ///
    /// # Errors
    ///
    /// Returns error if not idle or `text` is blank
    pub async fn speak(&self, text: &str) -> Result<()> {
        let text = text.to_string();
        self.request(|tx| Command::Speak(text, tx)).await
    }

    /// Stop every session and end the controller task
    ///
    /// # Errors
    ///
    /// Returns error if the controller already stopped
    pub async fn shutdown(&self) -> Result<()> {
        self.request(Command::Shutdown).await
    }

    /// Current state snapshot
    #[must_use]
    pub fn state(&self) -> ConversationState {
        self.state.borrow().clone()
    }

    /// Receiver that is notified on every state change
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConversationState> {
        self.state.clone()
    }

    /// Subscribe to change events from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events.subscribe()
    }

    /// Change events as a stream; events missed by a slow consumer are skipped
    #[must_use]
    pub fn events(&self) -> impl Stream<Item = ConversationEvent> + Send + 'static {
        BroadcastStream::new(self.events.subscribe()).filter_map(|event| match event {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "conversation event consumer lagged");
                None
            }
        })
    }

    /// Whether the controller task has stopped
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn request<T>(&self, command: impl FnOnce(Responder<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| Error::ControllerClosed)?;
        rx.await.map_err(|_| Error::ControllerClosed)?
    }
}
