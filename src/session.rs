//! Session instance identity
//!
//! Every transcription, reply stream and audio session gets a fresh
//! [`SessionId`]. Signals produced by a session's background task carry that
//! id, so the owner can drop anything that arrives after the session was
//! stopped or superseded.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique id of one session instance, never reused within a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocate the next id
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A signal tagged with the session instance that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tagged<T> {
    /// Producing session
    pub session: SessionId,
    /// Payload
    pub signal: T,
}

impl<T> Tagged<T> {
    /// Tag `signal` with `session`
    pub const fn new(session: SessionId, signal: T) -> Self {
        Self { session, signal }
    }
}
