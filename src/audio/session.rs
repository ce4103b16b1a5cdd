//! Remote audio session state machine
//!
//! ```text
//!   play() ──► Thinking ──first buffered data──► Playing
//!                 │                                 │
//!                 └──── end / stop() / error ───────┴──► Done
//! ```
//!
//! `Done` is terminal for the instance; a new `play()` creates a new session.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::Result;
use crate::session::{SessionId, Tagged};

/// Observable phase of a remote audio session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioPhase {
    /// Request issued, no media data yet
    Thinking,
    /// Media data has arrived and is playing
    Playing,
    /// Finished, stopped or failed
    Done,
}

/// Signal reported by the media pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSignal {
    /// Total bytes of media loaded so far
    Buffered(u64),
    /// Playback reached the end of the media
    Ended,
    /// Loading or playback failed
    Failed(String),
}

/// Why a session reached [`AudioPhase::Done`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DoneReason {
    /// Natural end of media
    Ended,
    /// Explicit `stop()`
    Stopped,
    /// Loading or playback error
    Failed(String),
}

/// Phase transition caused by a signal or a stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseChange {
    /// Thinking → Playing
    Playing,
    /// Any → Done
    Done(DoneReason),
}

impl fmt::Display for AudioPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Thinking => "thinking",
            Self::Playing => "playing",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Buffering progress reporter handed to a [`MediaPlayer`]
pub struct BufferProgress {
    session: SessionId,
    sink: mpsc::UnboundedSender<Tagged<MediaSignal>>,
}

impl BufferProgress {
    /// Report `total` bytes of media loaded
    ///
    /// Returns false once nobody is listening any more
    pub fn loaded(&self, total: u64) -> bool {
        self.sink
            .send(Tagged::new(self.session, MediaSignal::Buffered(total)))
            .is_ok()
    }
}

/// Fetches and plays a remote audio resource
#[async_trait]
pub trait MediaPlayer: Send + Sync {
    /// Load and play `url`, reporting buffering on `progress`
    ///
    /// Resolves once the media has finished playing. Dropping the future
    /// stops playback.
    ///
    /// # Errors
    ///
    /// Returns error if loading, decoding or output fails
    async fn play(&self, url: &str, progress: &BufferProgress) -> Result<()>;
}

/// One remote audio playback and its observable phase
pub struct RemoteAudioSession {
    id: SessionId,
    url: String,
    phase: AudioPhase,
    observers: Option<JoinHandle<()>>,
}

impl RemoteAudioSession {
    /// Start playing `url`; the session begins in [`AudioPhase::Thinking`]
    ///
    /// Signals are published on `sink` tagged with the new session's id.
    /// Playback starts in the background; this never blocks.
    pub fn play(
        player: Arc<dyn MediaPlayer>,
        url: &str,
        sink: mpsc::UnboundedSender<Tagged<MediaSignal>>,
    ) -> Self {
        let id = SessionId::next();
        let task_url = url.to_string();

        let observers = tokio::spawn(async move {
            let progress = BufferProgress {
                session: id,
                sink: sink.clone(),
            };
            let signal = match player.play(&task_url, &progress).await {
                Ok(()) => MediaSignal::Ended,
                Err(e) => MediaSignal::Failed(e.to_string()),
            };
            let _ = sink.send(Tagged::new(id, signal));
        });

        tracing::debug!(session = %id, %url, "remote playback requested");

        Self {
            id,
            url: url.to_string(),
            phase: AudioPhase::Thinking,
            observers: Some(observers),
        }
    }

    /// Apply a media signal
    ///
    /// Returns the transition it caused, if any. Signals from other sessions
    /// and anything arriving after `Done` are dropped.
    pub fn apply(&mut self, tagged: Tagged<MediaSignal>) -> Option<PhaseChange> {
        if tagged.session != self.id {
            tracing::trace!(session = %tagged.session, "dropping signal from superseded session");
            return None;
        }

        match (self.phase, tagged.signal) {
            (AudioPhase::Done, signal) => {
                tracing::trace!(session = %self.id, ?signal, "dropping signal after done");
                None
            }
            (AudioPhase::Thinking, MediaSignal::Buffered(loaded)) if loaded > 0 => {
                self.phase = AudioPhase::Playing;
                tracing::debug!(session = %self.id, loaded, "audio data arrived");
                Some(PhaseChange::Playing)
            }
            (_, MediaSignal::Buffered(_)) => None,
            (_, MediaSignal::Ended) => Some(self.finish(DoneReason::Ended)),
            (_, MediaSignal::Failed(e)) => Some(self.finish(DoneReason::Failed(e))),
        }
    }

    /// Stop playback from any phase
    ///
    /// Returns the transition to `Done`, or `None` if already done.
    pub fn stop(&mut self) -> Option<PhaseChange> {
        if self.phase == AudioPhase::Done {
            return None;
        }
        Some(self.finish(DoneReason::Stopped))
    }

    fn finish(&mut self, reason: DoneReason) -> PhaseChange {
        self.phase = AudioPhase::Done;
        self.release_observers();
        tracing::debug!(session = %self.id, ?reason, "remote playback done");
        PhaseChange::Done(reason)
    }

    /// Release the playback task and its signal sender; no-op after the first call
    fn release_observers(&mut self) {
        if let Some(observers) = self.observers.take() {
            observers.abort();
        }
    }

    /// Current phase
    #[must_use]
    pub const fn phase(&self) -> AudioPhase {
        self.phase
    }

    /// Id of this session instance
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// URL being played
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the playback task and its observers have been released
    #[must_use]
    pub const fn observers_released(&self) -> bool {
        self.observers.is_none()
    }
}

impl Drop for RemoteAudioSession {
    fn drop(&mut self) {
        self.release_observers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::Notify;

    /// Reports one chunk, then waits until told to finish
    struct GatedPlayer {
        finish: Arc<Notify>,
        fail: bool,
    }

    #[async_trait]
    impl MediaPlayer for GatedPlayer {
        async fn play(&self, _url: &str, progress: &BufferProgress) -> Result<()> {
            progress.loaded(1024);
            self.finish.notified().await;
            if self.fail {
                return Err(crate::Error::Audio("decoder hiccup".to_string()));
            }
            Ok(())
        }
    }

    fn gated(fail: bool) -> (Arc<dyn MediaPlayer>, Arc<Notify>) {
        let finish = Arc::new(Notify::new());
        let player = GatedPlayer {
            finish: Arc::clone(&finish),
            fail,
        };
        (Arc::new(player), finish)
    }

    #[tokio::test]
    async fn test_thinking_playing_done() {
        let (player, finish) = gated(false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = RemoteAudioSession::play(player, "http://host/speech?text=hi", tx);
        assert_eq!(session.phase(), AudioPhase::Thinking);

        let buffered = rx.recv().await.unwrap();
        assert_eq!(session.apply(buffered), Some(PhaseChange::Playing));

        // Repeated buffering is a no-op
        let again = Tagged::new(session.id(), MediaSignal::Buffered(4096));
        assert_eq!(session.apply(again), None);
        assert_eq!(session.phase(), AudioPhase::Playing);

        finish.notify_one();
        let ended = rx.recv().await.unwrap();
        assert_eq!(
            session.apply(ended),
            Some(PhaseChange::Done(DoneReason::Ended))
        );
        assert!(session.observers_released());
    }

    #[tokio::test]
    async fn test_empty_buffer_does_not_start_playing() {
        let (player, _finish) = gated(false);
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut session = RemoteAudioSession::play(player, "http://host/a", tx);

        let empty = Tagged::new(session.id(), MediaSignal::Buffered(0));
        assert_eq!(session.apply(empty), None);
        assert_eq!(session.phase(), AudioPhase::Thinking);
    }

    #[tokio::test]
    async fn test_stop_before_any_signal() {
        let (player, _finish) = gated(false);
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut session = RemoteAudioSession::play(player, "http://host/a", tx);

        assert_eq!(session.stop(), Some(PhaseChange::Done(DoneReason::Stopped)));
        assert!(session.observers_released());
        assert_eq!(session.stop(), None);
    }

    #[tokio::test]
    async fn test_stale_buffering_after_stop_is_dropped() {
        let (player, _finish) = gated(false);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = RemoteAudioSession::play(player, "http://host/a", tx);

        let buffered = rx.recv().await.unwrap();
        session.apply(buffered);
        session.stop();

        let stale = Tagged::new(session.id(), MediaSignal::Buffered(8192));
        assert_eq!(session.apply(stale), None);
        let late_end = Tagged::new(session.id(), MediaSignal::Ended);
        assert_eq!(session.apply(late_end), None);
        assert_eq!(session.phase(), AudioPhase::Done);
    }

    #[tokio::test]
    async fn test_failure_reports_reason() {
        let (player, finish) = gated(true);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = RemoteAudioSession::play(player, "http://host/a", tx);

        session.apply(rx.recv().await.unwrap());
        finish.notify_one();

        match session.apply(rx.recv().await.unwrap()) {
            Some(PhaseChange::Done(DoneReason::Failed(message))) => {
                assert!(message.contains("decoder hiccup"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_signal_from_other_session_dropped() {
        let (player, _finish) = gated(false);
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut session = RemoteAudioSession::play(player, "http://host/a", tx);

        let foreign = Tagged::new(SessionId::next(), MediaSignal::Buffered(10));
        assert_eq!(session.apply(foreign), None);
        assert_eq!(session.phase(), AudioPhase::Thinking);
    }
}
