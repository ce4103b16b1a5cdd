//! Remote audio playback
//!
//! [`RemoteAudioSession`] is the observable state machine; [`MediaPlayer`] is
//! the pipeline that actually fetches and plays. [`HttpMediaPlayer`] plus
//! [`AudioPlayback`] is the production pipeline.

mod playback;
mod player;
mod session;

pub use playback::{AudioOutput, AudioPlayback, AudioSink};
pub use player::HttpMediaPlayer;
pub use session::{
    AudioPhase, BufferProgress, DoneReason, MediaPlayer, MediaSignal, PhaseChange,
    RemoteAudioSession,
};
