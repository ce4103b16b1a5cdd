//! Recognizer fed through a handle
//!
//! Adapter for push-based engines: whatever owns the engine callbacks holds a
//! [`RecognizerFeed`] and pushes results into the running recognition.

use std::sync::{Arc, Mutex, PoisonError};

use super::{RecognizerEvent, RecognizerSink, SpeechRecognizer};
use crate::Result;

type Slot = Arc<Mutex<Option<RecognizerSink>>>;

/// [`SpeechRecognizer`] whose results come from a [`RecognizerFeed`]
pub struct ChannelRecognizer {
    slot: Slot,
}

/// Pushes results into the recognition currently running on a [`ChannelRecognizer`]
#[derive(Clone)]
pub struct RecognizerFeed {
    slot: Slot,
}

impl ChannelRecognizer {
    /// Create a recognizer and the feed that drives it
    #[must_use]
    pub fn new() -> (Self, RecognizerFeed) {
        let slot: Slot = Arc::new(Mutex::new(None));
        (
            Self {
                slot: Arc::clone(&slot),
            },
            RecognizerFeed { slot },
        )
    }
}

impl SpeechRecognizer for ChannelRecognizer {
    fn start(&self, events: RecognizerSink) -> Result<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(events);
        Ok(())
    }

    fn stop(&self) {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

impl RecognizerFeed {
    /// Report the best transcription so far
    ///
    /// Returns false if no recognition is running
    pub fn partial(&self, text: impl Into<String>) -> bool {
        self.send(RecognizerEvent::Partial(text.into()), false)
    }

    /// Report the final transcription and end the recognition
    pub fn finish(&self, text: impl Into<String>) -> bool {
        self.send(RecognizerEvent::Final(text.into()), true)
    }

    /// Report an engine failure and end the recognition
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.send(RecognizerEvent::Error(message.into()), true)
    }

    /// Whether a recognition is currently accepting results
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|sink| !sink.is_closed())
    }

    fn send(&self, event: RecognizerEvent, last: bool) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let sent = slot.as_ref().is_some_and(|sink| sink.send(event));
        if last {
            slot.take();
        }
        sent
    }
}
