//! Streamed reply text
//!
//! A [`ReplyStream`] subscribes to `GET {base}/sse/{message_id}` and
//! accumulates the text fragments it delivers. The fragment `done` is the end
//! sentinel and never becomes part of the text.

mod sse;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backend::Backend;
use crate::session::{SessionId, Tagged};

pub use sse::{SseDecoder, SseEvent};

/// Payload that marks the end of a reply stream
pub const DONE_SENTINEL: &str = "done";

/// Signal produced by a reply subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplySignal {
    /// A text fragment to append
    Fragment(String),
    /// The done sentinel arrived
    Done,
    /// The transport failed or the stream ended without the sentinel
    Failed(String),
}

/// Lifecycle of a reply stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    /// Subscription open, fragments may still arrive
    Streaming,
    /// Done sentinel received
    Completed,
    /// Transport error; text so far is kept
    Failed,
    /// Closed by the owner before completion
    Closed,
}

impl ReplyStatus {
    /// Whether no more fragments will be accepted
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Streaming)
    }
}

/// One reply subscription and the text it has accumulated
pub struct ReplyStream {
    id: SessionId,
    message_id: String,
    delimiter: String,
    text: String,
    status: ReplyStatus,
    task: Option<JoinHandle<()>>,
}

impl ReplyStream {
    /// Subscribe to the reply for `message_id`
    ///
    /// Signals are published on `sink` tagged with the new stream's id. The
    /// connection is made in the background; this never blocks.
    pub fn open(
        backend: &Backend,
        message_id: &str,
        delimiter: &str,
        sink: mpsc::UnboundedSender<Tagged<ReplySignal>>,
    ) -> Self {
        let id = SessionId::next();
        let task = tokio::spawn(run_subscription(
            backend.clone(),
            message_id.to_string(),
            id,
            sink,
        ));

        tracing::debug!(session = %id, message_id, "reply stream opened");

        Self {
            id,
            message_id: message_id.to_string(),
            delimiter: delimiter.to_string(),
            text: String::new(),
            status: ReplyStatus::Streaming,
            task: Some(task),
        }
    }

    /// Apply a signal from the sink
    ///
    /// Returns the signal if it was accepted. Signals from other streams, or
    /// arriving after this stream reached a terminal status, are dropped.
    pub fn apply(&mut self, tagged: Tagged<ReplySignal>) -> Option<ReplySignal> {
        if tagged.session != self.id || self.status.is_terminal() {
            tracing::trace!(session = %tagged.session, "dropping stale reply signal");
            return None;
        }

        match &tagged.signal {
            ReplySignal::Fragment(fragment) => {
                append_with_delimiter(&mut self.text, &self.delimiter, fragment);
            }
            ReplySignal::Done => {
                self.status = ReplyStatus::Completed;
                self.task = None;
                tracing::debug!(session = %self.id, message_id = %self.message_id, "reply complete");
            }
            ReplySignal::Failed(e) => {
                self.status = ReplyStatus::Failed;
                self.task = None;
                tracing::warn!(session = %self.id, message_id = %self.message_id, error = %e, "reply stream failed");
            }
        }

        Some(tagged.signal)
    }

    /// Close the subscription
    ///
    /// Returns true if the stream was still open. Safe to call repeatedly and
    /// after natural completion.
    pub fn close(&mut self) -> bool {
        if let Some(task) = self.task.take() {
            task.abort();
        }

        if self.status.is_terminal() {
            return false;
        }

        self.status = ReplyStatus::Closed;
        tracing::debug!(session = %self.id, message_id = %self.message_id, "reply stream closed");
        true
    }

    /// Append text that did not come from the stream (e.g. a playback error)
    pub fn push_notice(&mut self, notice: &str) {
        append_with_delimiter(&mut self.text, &self.delimiter, notice);
    }

    /// Id of this stream instance
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Message this stream belongs to
    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Reply text accumulated so far
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Current status
    #[must_use]
    pub const fn status(&self) -> ReplyStatus {
        self.status
    }
}

impl Drop for ReplyStream {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Append `fragment` to `text`, separated by `delimiter` unless `text` is empty
pub fn append_with_delimiter(text: &mut String, delimiter: &str, fragment: &str) {
    if fragment.is_empty() {
        return;
    }
    if !text.is_empty() {
        text.push_str(delimiter);
    }
    text.push_str(fragment);
}

/// Read the event stream until the sentinel, an error or the end of the body
async fn run_subscription(
    backend: Backend,
    message_id: String,
    id: SessionId,
    sink: mpsc::UnboundedSender<Tagged<ReplySignal>>,
) {
    let send = |signal| sink.send(Tagged::new(id, signal)).is_ok();

    let response = match backend.subscribe(&message_id).await {
        Ok(response) => response,
        Err(e) => {
            send(ReplySignal::Failed(e.to_string()));
            return;
        }
    };

    let mut decoder = SseDecoder::new();
    let mut body = Box::pin(response.bytes_stream());

    while let Some(chunk) = body.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                send(ReplySignal::Failed(e.to_string()));
                return;
            }
        };

        for event in decoder.feed(&bytes) {
            if !forward(&send, event) {
                return;
            }
        }
    }

    if let Some(event) = decoder.finish() {
        if !forward(&send, event) {
            return;
        }
    }

    send(ReplySignal::Failed("stream ended before done".to_string()));
}

/// Forward one event; returns false once the subscription should stop
fn forward(send: &impl Fn(ReplySignal) -> bool, event: SseEvent) -> bool {
    if event.data == DONE_SENTINEL {
        send(ReplySignal::Done);
        return false;
    }
    if event.data.is_empty() {
        return true;
    }
    send(ReplySignal::Fragment(event.data))
}
