//! Streaming speech-to-text session
//!
//! The recognition engine itself is an external capability behind
//! [`SpeechRecognizer`]. Engines push raw results into a [`RecognizerSink`]
//! that tags them with the recognition they belong to; [`TranscriptionSession`]
//! turns them into [`TranscriptEvent`]s and keeps the latest transcript.

mod channel;

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::session::{SessionId, Tagged};
use crate::{Error, Result};

pub use channel::{ChannelRecognizer, RecognizerFeed};

/// Raw result reported by a recognition engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerEvent {
    /// Best transcription so far (full text, not a delta)
    Partial(String),
    /// Engine finished with this transcription
    Final(String),
    /// Engine failed
    Error(String),
}

/// Where an engine delivers the results of one recognition
#[derive(Debug)]
pub struct RecognizerSink {
    session: SessionId,
    events: mpsc::UnboundedSender<Tagged<RecognizerEvent>>,
}

impl RecognizerSink {
    pub(crate) const fn new(
        session: SessionId,
        events: mpsc::UnboundedSender<Tagged<RecognizerEvent>>,
    ) -> Self {
        Self { session, events }
    }

    /// Deliver a result; returns false once nobody is listening
    pub fn send(&self, event: RecognizerEvent) -> bool {
        self.events.send(Tagged::new(self.session, event)).is_ok()
    }

    /// Whether the receiving side has gone away
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }

    /// Recognition this sink belongs to
    #[must_use]
    pub const fn session(&self) -> SessionId {
        self.session
    }
}

/// On-device speech recognition capability
pub trait SpeechRecognizer: Send + Sync {
    /// Begin recognizing; results go to `events`
    ///
    /// The engine ends a recognition by sending `Final` or `Error`.
    ///
    /// # Errors
    ///
    /// Returns error if the engine cannot start
    fn start(&self, events: RecognizerSink) -> Result<()>;

    /// Stop feeding audio to the engine and drop the sink
    fn stop(&self);
}

/// Transcript update produced by a [`TranscriptionSession`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    /// Supersedes the previous partial value
    Partial(String),
    /// Last emission of the session
    Final(String),
}

impl TranscriptEvent {
    /// Transcript text carried by the event
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Partial(text) | Self::Final(text) => text,
        }
    }
}

/// Delivered recognizer results, tagged by recognition
pub type RecognizerInbox = mpsc::UnboundedReceiver<Tagged<RecognizerEvent>>;

/// One recognizer, at most one active recognition at a time
pub struct TranscriptionSession {
    recognizer: Arc<dyn SpeechRecognizer>,
    active: Option<SessionId>,
    transcript: String,
}

impl TranscriptionSession {
    /// Wrap a recognition engine
    #[must_use]
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>) -> Self {
        Self {
            recognizer,
            active: None,
            transcript: String::new(),
        }
    }

    /// Start a new recognition, delivering its results tagged on `events`
    ///
    /// # Errors
    ///
    /// Returns error if a recognition is already active (call [`stop`](Self::stop)
    /// first) or the engine fails to start
    pub fn start(
        &mut self,
        events: mpsc::UnboundedSender<Tagged<RecognizerEvent>>,
    ) -> Result<SessionId> {
        if let Some(active) = self.active {
            return Err(Error::Transcription(format!(
                "session {active} already active"
            )));
        }

        let id = SessionId::next();
        self.recognizer.start(RecognizerSink::new(id, events))?;
        self.transcript.clear();
        self.active = Some(id);

        tracing::debug!(session = %id, "transcription started");
        Ok(id)
    }

    /// Stop the active recognition, returning the latest transcript as final
    ///
    /// Results already delivered on `delivered` are applied first, so nothing
    /// the engine reported before this call is lost. Returns `None` if nothing
    /// was active. Safe to call repeatedly.
    pub fn stop(&mut self, delivered: &mut RecognizerInbox) -> Option<String> {
        while let Ok(tagged) = delivered.try_recv() {
            self.apply(tagged);
        }

        let id = self.active.take()?;
        self.recognizer.stop();

        tracing::debug!(session = %id, chars = self.transcript.len(), "transcription stopped");
        Some(self.transcript.clone())
    }

    /// Stop without waiting for delivered results (teardown)
    pub fn abandon(&mut self) {
        if let Some(id) = self.active.take() {
            self.recognizer.stop();
            tracing::debug!(session = %id, "transcription abandoned");
        }
    }

    /// Apply a delivered result
    ///
    /// Returns the transcript event it produced if it belongs to the active
    /// recognition; results of stopped or superseded recognitions are dropped.
    /// An engine error ends the recognition like a final result carrying the
    /// latest partial.
    pub fn apply(&mut self, tagged: Tagged<RecognizerEvent>) -> Option<TranscriptEvent> {
        let active = self.active?;
        if active != tagged.session {
            tracing::trace!(session = %tagged.session, "dropping stale transcript event");
            return None;
        }

        let event = match tagged.signal {
            RecognizerEvent::Partial(text) => TranscriptEvent::Partial(text),
            RecognizerEvent::Final(text) => TranscriptEvent::Final(text),
            RecognizerEvent::Error(e) => {
                tracing::warn!(session = %active, error = %e, "recognizer failed, closing with last partial");
                TranscriptEvent::Final(self.transcript.clone())
            }
        };

        self.transcript.clear();
        self.transcript.push_str(event.text());

        if matches!(event, TranscriptEvent::Final(_)) {
            self.active = None;
            self.recognizer.stop();
        }

        Some(event)
    }

    /// Whether a recognition is running
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Id of the running recognition
    #[must_use]
    pub const fn current(&self) -> Option<SessionId> {
        self.active
    }

    /// Latest transcript value
    #[must_use]
    pub fn transcript(&self) -> &str {
        &self.transcript
    }
}

impl Drop for TranscriptionSession {
    fn drop(&mut self) {
        self.abandon();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> (TranscriptionSession, RecognizerFeed) {
        let (recognizer, feed) = ChannelRecognizer::new();
        (TranscriptionSession::new(Arc::new(recognizer)), feed)
    }

    #[test]
    fn test_start_twice_fails() {
        let (mut session, _feed) = session();
        let (tx, _rx) = mpsc::unbounded_channel();

        let id = session.start(tx.clone()).unwrap();
        assert!(matches!(session.start(tx), Err(Error::Transcription(_))));
        assert_eq!(session.current(), Some(id));
    }

    #[test]
    fn test_partials_supersede() {
        let (mut session, feed) = session();
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.start(tx).unwrap();

        assert!(feed.partial("turn"));
        assert!(feed.partial("turn on"));

        let first = rx.try_recv().unwrap();
        assert_eq!(session.apply(first), Some(TranscriptEvent::Partial("turn".into())));
        let second = rx.try_recv().unwrap();
        session.apply(second);

        assert_eq!(session.transcript(), "turn on");
        assert!(session.is_active());
    }

    #[test]
    fn test_stop_flushes_delivered_partials() {
        let (mut session, feed) = session();
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.start(tx).unwrap();

        feed.partial("hello");
        feed.partial("hello there");

        // Nothing applied yet; stop still sees what the engine reported
        assert_eq!(session.stop(&mut rx).as_deref(), Some("hello there"));
        assert_eq!(session.stop(&mut rx), None);
        assert!(!feed.partial("ignored"));
    }

    #[test]
    fn test_error_closes_like_final() {
        let (mut session, feed) = session();
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.start(tx).unwrap();

        feed.partial("half a sent");
        feed.fail("audio route lost");

        let partial = rx.try_recv().unwrap();
        session.apply(partial);
        let last = rx.try_recv().unwrap();
        assert_eq!(
            session.apply(last),
            Some(TranscriptEvent::Final("half a sent".into()))
        );
        assert!(!session.is_active());
    }

    #[test]
    fn test_stale_events_dropped_after_restart() {
        let (mut session, feed) = session();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let first = session.start(tx.clone()).unwrap();

        feed.partial("old words");
        let stale = rx.try_recv().unwrap();
        assert_eq!(stale.session, first);

        session.abandon();
        session.start(tx).unwrap();

        assert_eq!(session.apply(stale), None);
        assert_eq!(session.transcript(), "");
    }

    #[test]
    fn test_stop_skips_results_of_older_recognition() {
        let (mut session, feed) = session();
        let (tx, mut rx) = mpsc::unbounded_channel();
        session.start(tx.clone()).unwrap();
        feed.partial("from before");

        session.abandon();
        session.start(tx).unwrap();
        feed.partial("current words");

        assert_eq!(session.stop(&mut rx).as_deref(), Some("current words"));
    }
}
