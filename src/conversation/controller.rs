//! Conversation controller task
//!
//! The controller owns every session of the current turn. Commands from the
//! handle and signals from the sessions' background tasks are processed one
//! at a time on a single task, so state transitions never interleave.

use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};

use super::handle::ConversationHandle;
use super::{ConversationEvent, ConversationState, Transcript, Turn, TurnState};
use crate::audio::{AudioPhase, DoneReason, MediaPlayer, MediaSignal, PhaseChange, RemoteAudioSession};
use crate::backend::Backend;
use crate::config::Config;
use crate::reply::{ReplySignal, ReplyStatus, ReplyStream, append_with_delimiter};
use crate::session::Tagged;
use crate::transcription::{
    RecognizerEvent, RecognizerInbox, SpeechRecognizer, TranscriptEvent, TranscriptionSession,
};
use crate::{Error, Result};

/// Pending commands before senders wait
const COMMAND_CAPACITY: usize = 32;

/// Where a command's outcome is sent
pub(super) type Responder<T> = oneshot::Sender<Result<T>>;

/// Request from a [`ConversationHandle`]
pub(super) enum Command {
    BeginRecording(Responder<()>),
    CancelAndRerecord(Responder<()>),
    FinalizeRecording(Responder<Turn>),
    StopPlayback(Responder<()>),
    Speak(String, Responder<()>),
    Shutdown(Responder<()>),
}

/// Receiving ends of the session signal channels
struct Inbox {
    transcript: RecognizerInbox,
    reply: mpsc::UnboundedReceiver<Tagged<ReplySignal>>,
    media: mpsc::UnboundedReceiver<Tagged<MediaSignal>>,
}

/// Turn-taking state machine over transcription, reply and audio sessions
pub struct ConversationController {
    config: Arc<Config>,
    backend: Backend,
    user_id: String,
    player: Arc<dyn MediaPlayer>,
    transcription: TranscriptionSession,
    transcript: Transcript,
    turn_state: TurnState,
    turn: Option<Turn>,
    reply: Option<ReplyStream>,
    audio: Option<RemoteAudioSession>,
    state_tx: watch::Sender<ConversationState>,
    events_tx: broadcast::Sender<ConversationEvent>,
    transcript_tx: mpsc::UnboundedSender<Tagged<RecognizerEvent>>,
    reply_tx: mpsc::UnboundedSender<Tagged<ReplySignal>>,
    media_tx: mpsc::UnboundedSender<Tagged<MediaSignal>>,
}

impl ConversationController {
    /// Start a controller task and return a handle to it
    ///
    /// The task runs until [`ConversationHandle::shutdown`] is called or every
    /// handle has been dropped. Must be called within a tokio runtime.
    #[must_use]
    pub fn spawn(
        config: Arc<Config>,
        user_id: &str,
        recognizer: Arc<dyn SpeechRecognizer>,
        player: Arc<dyn MediaPlayer>,
    ) -> ConversationHandle {
        let (controller, inbox) = Self::new(config, user_id, recognizer, player);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAPACITY);

        let handle = ConversationHandle::new(
            commands_tx,
            controller.state_tx.subscribe(),
            controller.events_tx.clone(),
        );

        tokio::spawn(controller.run(commands_rx, inbox));
        handle
    }

    fn new(
        config: Arc<Config>,
        user_id: &str,
        recognizer: Arc<dyn SpeechRecognizer>,
        player: Arc<dyn MediaPlayer>,
    ) -> (Self, Inbox) {
        let (transcript_tx, transcript_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let (media_tx, media_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConversationState::default());
        let (events_tx, _) = broadcast::channel(config.event_capacity.max(1));

        let controller = Self {
            backend: Backend::from_config(&config),
            config,
            user_id: user_id.to_string(),
            player,
            transcription: TranscriptionSession::new(recognizer),
            transcript: Transcript::default(),
            turn_state: TurnState::Idle,
            turn: None,
            reply: None,
            audio: None,
            state_tx,
            events_tx,
            transcript_tx,
            reply_tx,
            media_tx,
        };
        let inbox = Inbox {
            transcript: transcript_rx,
            reply: reply_rx,
            media: media_rx,
        };

        (controller, inbox)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>, mut inbox: Inbox) {
        tracing::info!(user_id = %self.user_id, backend = %self.backend.base_url(), "conversation started");

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        self.shutdown();
                        break;
                    };
                    if self.dispatch(command, &mut inbox.transcript).is_break() {
                        break;
                    }
                }
                Some(event) = inbox.transcript.recv() => self.on_transcript(event),
                Some(signal) = inbox.reply.recv() => self.on_reply(signal),
                Some(signal) = inbox.media.recv() => self.on_media(signal),
            }
        }

        tracing::info!("conversation stopped");
    }

    /// Run one command; recognizer results already delivered in `pending` are
    /// applied before any command that ends or cuts the recording
    fn dispatch(&mut self, command: Command, pending: &mut RecognizerInbox) -> ControlFlow<()> {
        match command {
            Command::BeginRecording(tx) => {
                let _ = tx.send(self.begin_recording());
            }
            Command::CancelAndRerecord(tx) => {
                let _ = tx.send(self.cancel_and_rerecord(pending));
            }
            Command::FinalizeRecording(tx) => {
                let _ = tx.send(self.finalize_recording(pending));
            }
            Command::StopPlayback(tx) => {
                let _ = tx.send(self.stop_playback());
            }
            Command::Speak(text, tx) => {
                let _ = tx.send(self.speak(&text));
            }
            Command::Shutdown(tx) => {
                self.shutdown();
                let _ = tx.send(Ok(()));
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    // Commands

    fn begin_recording(&mut self) -> Result<()> {
        self.require("begin recording", TurnState::can_record)?;

        self.retire_turn();
        self.transcript.reset();
        self.transcription.start(self.transcript_tx.clone())?;

        self.state_tx.send_modify(|s| {
            s.transcript.clear();
            s.reply.clear();
            s.message_id = None;
        });
        self.set_state(TurnState::Recording);
        Ok(())
    }

    fn cancel_and_rerecord(&mut self, pending: &mut RecognizerInbox) -> Result<()> {
        self.require("re-record", |s| s == TurnState::Recording)?;

        // Speech reported before the cancel belongs to the discarded part
        while let Ok(tagged) = pending.try_recv() {
            self.on_transcript(tagged);
        }

        if self.transcription.is_active() {
            self.transcript.mark_cancelled();
        } else {
            // Recognizer already ended on its own; listen again from scratch
            self.transcript.reset();
            self.transcription.start(self.transcript_tx.clone())?;
        }

        tracing::debug!(discarded = self.transcript.cancelled_len(), "transcript cancelled");
        self.publish_transcript();
        Ok(())
    }

    fn finalize_recording(&mut self, pending: &mut RecognizerInbox) -> Result<Turn> {
        self.require("finalize recording", |s| s == TurnState::Recording)?;

        if let Some(latest) = self.transcription.stop(pending) {
            self.transcript.update(&latest);
        }

        let mut text = self.transcript.effective().trim().to_string();
        if text.is_empty() {
            if let Some(fallback) = &self.config.blank_fallback {
                tracing::warn!(fallback = %fallback, "blank transcript, sending fallback text");
                text.clone_from(fallback);
            } else {
                tracing::warn!("blank transcript, turn discarded");
                self.set_state(TurnState::Idle);
                return Err(Error::BlankInput);
            }
        }

        let turn = Turn::new(&self.user_id, &text);
        let url = match self
            .backend
            .think_and_reply_url(&turn.user_id, &turn.message_id, &turn.text)
        {
            Ok(url) => url,
            Err(e) => {
                self.set_state(TurnState::Idle);
                return Err(e);
            }
        };

        self.state_tx.send_modify(|s| {
            s.message_id = Some(turn.message_id.clone());
            s.reply.clear();
        });
        self.set_state(TurnState::AwaitingReply);
        self.emit(ConversationEvent::TurnStarted(turn.clone()));
        tracing::info!(message_id = %turn.message_id, chars = turn.text.chars().count(), "turn finalized");

        self.reply = Some(ReplyStream::open(
            &self.backend,
            &turn.message_id,
            &self.config.reply_delimiter,
            self.reply_tx.clone(),
        ));
        self.emit(ConversationEvent::ReplyOpened {
            message_id: turn.message_id.clone(),
        });

        self.audio = Some(RemoteAudioSession::play(
            Arc::clone(&self.player),
            &url,
            self.media_tx.clone(),
        ));
        self.emit(ConversationEvent::AudioPhaseChanged(AudioPhase::Thinking));

        self.turn = Some(turn.clone());
        self.set_state(TurnState::Thinking);
        Ok(turn)
    }

    fn stop_playback(&mut self) -> Result<()> {
        self.require("stop playback", TurnState::is_replying)?;

        self.close_reply();
        match self.audio.as_mut().and_then(RemoteAudioSession::stop) {
            Some(change) => self.on_phase_change(change),
            None => {
                self.set_state(TurnState::Done);
                self.set_state(TurnState::Idle);
                self.retire_if_settled();
            }
        }

        tracing::info!("playback stopped by user");
        Ok(())
    }

    fn speak(&mut self, text: &str) -> Result<()> {
        self.require("speak", TurnState::can_record)?;
        let url = self.backend.speech_url(text)?;

        self.retire_turn();
        let spoken = text.trim().to_string();
        self.state_tx.send_modify(|s| {
            s.transcript.clear();
            s.message_id = None;
        });
        self.publish_reply(spoken);

        self.audio = Some(RemoteAudioSession::play(
            Arc::clone(&self.player),
            &url,
            self.media_tx.clone(),
        ));
        self.emit(ConversationEvent::AudioPhaseChanged(AudioPhase::Thinking));
        self.set_state(TurnState::Thinking);
        Ok(())
    }

    fn shutdown(&mut self) {
        self.transcription.abandon();
        self.retire_turn();
        self.set_state(TurnState::Idle);
    }

    // Session signals

    fn on_transcript(&mut self, tagged: Tagged<RecognizerEvent>) {
        let Some(event) = self.transcription.apply(tagged) else {
            return;
        };
        if self.turn_state != TurnState::Recording {
            return;
        }

        self.transcript.update(event.text());
        self.publish_transcript();

        if matches!(event, TranscriptEvent::Final(_)) {
            tracing::debug!("recognizer finished, waiting for finalize");
        }
    }

    fn on_reply(&mut self, tagged: Tagged<ReplySignal>) {
        let Some(reply) = self.reply.as_mut() else {
            tracing::trace!(session = %tagged.session, "reply signal without a live stream");
            return;
        };
        let Some(signal) = reply.apply(tagged) else {
            return;
        };

        let message_id = reply.message_id().to_string();
        let status = reply.status();
        let text = reply.text().to_string();

        match signal {
            ReplySignal::Fragment(_) => self.publish_reply(text),
            ReplySignal::Done | ReplySignal::Failed(_) => {
                self.emit(ConversationEvent::ReplyFinished { message_id, status });
                self.retire_if_settled();
            }
        }
    }

    fn on_media(&mut self, tagged: Tagged<MediaSignal>) {
        let Some(audio) = self.audio.as_mut() else {
            tracing::trace!(session = %tagged.session, "media signal without a live session");
            return;
        };
        if let Some(change) = audio.apply(tagged) {
            self.on_phase_change(change);
        }
    }

    fn on_phase_change(&mut self, change: PhaseChange) {
        match change {
            PhaseChange::Playing => {
                self.emit(ConversationEvent::AudioPhaseChanged(AudioPhase::Playing));
                if self.turn_state == TurnState::Thinking {
                    self.set_state(TurnState::Playing);
                }
            }
            PhaseChange::Done(reason) => {
                self.emit(ConversationEvent::AudioPhaseChanged(AudioPhase::Done));
                if let DoneReason::Failed(message) = reason {
                    self.report_playback_error(&message);
                }
                if self.turn_state.is_replying() {
                    self.set_state(TurnState::Done);
                    self.set_state(TurnState::Idle);
                }
                self.retire_if_settled();
            }
        }
    }

    /// Show a playback failure inline with the reply text
    fn report_playback_error(&mut self, message: &str) {
        tracing::warn!(error = %message, "reply playback failed");

        let text = if let Some(reply) = self.reply.as_mut() {
            reply.push_notice(message);
            reply.text().to_string()
        } else {
            let mut text = self.state_tx.borrow().reply.clone();
            append_with_delimiter(&mut text, &self.config.reply_delimiter, message);
            text
        };
        self.publish_reply(text);
    }

    // Turn bookkeeping

    fn close_reply(&mut self) {
        let Some(reply) = self.reply.as_mut() else {
            return;
        };
        if reply.close() {
            let message_id = reply.message_id().to_string();
            self.emit(ConversationEvent::ReplyFinished {
                message_id,
                status: ReplyStatus::Closed,
            });
        }
    }

    /// Tear down every session of the current turn
    fn retire_turn(&mut self) {
        self.close_reply();
        self.reply = None;

        if let Some(mut audio) = self.audio.take() {
            if audio.stop().is_some() {
                self.emit(ConversationEvent::AudioPhaseChanged(AudioPhase::Done));
            }
        }

        if let Some(turn) = self.turn.take() {
            tracing::debug!(message_id = %turn.message_id, "turn superseded");
        }
    }

    /// Drop the turn's sessions once both have finished on their own
    fn retire_if_settled(&mut self) {
        let reply_settled = self
            .reply
            .as_ref()
            .is_none_or(|r| r.status().is_terminal());
        let audio_settled = self
            .audio
            .as_ref()
            .is_none_or(|a| a.phase() == AudioPhase::Done);

        if !(reply_settled && audio_settled) {
            return;
        }

        self.reply = None;
        self.audio = None;
        if let Some(turn) = self.turn.take() {
            tracing::info!(message_id = %turn.message_id, "turn complete");
        }
    }

    // Publishing

    fn require(&self, action: &'static str, allowed: impl Fn(TurnState) -> bool) -> Result<()> {
        if allowed(self.turn_state) {
            return Ok(());
        }
        tracing::debug!(action, state = ?self.turn_state, "command rejected");
        Err(Error::InvalidState {
            action,
            state: self.turn_state,
        })
    }

    fn set_state(&mut self, next: TurnState) {
        if self.turn_state == next {
            return;
        }
        tracing::debug!(from = ?self.turn_state, to = ?next, "turn state changed");
        self.turn_state = next;
        self.state_tx.send_modify(|s| s.turn_state = next);
        self.emit(ConversationEvent::StateChanged(next));
    }

    fn publish_transcript(&self) {
        let text = self.transcript.effective().to_string();
        self.state_tx.send_modify(|s| s.transcript.clone_from(&text));
        self.emit(ConversationEvent::TranscriptUpdated(text));
    }

    fn publish_reply(&self, text: String) {
        self.state_tx.send_modify(|s| s.reply.clone_from(&text));
        self.emit(ConversationEvent::ReplyUpdated(text));
    }

    fn emit(&self, event: ConversationEvent) {
        // No subscribers is fine
        let _ = self.events_tx.send(event);
    }
}
