//! Shared test utilities
#![allow(dead_code)]

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::{Notify, broadcast};

use voxchat::audio::{AudioOutput, AudioSink};
use voxchat::{Config, ConversationEvent};

/// Format one server-sent event carrying `data`
pub fn sse_event(data: &str) -> String {
    format!("data: {data}\n\n")
}

/// Event stream body for a complete reply: fragments then the done sentinel
pub fn sse_reply(fragments: &[&str]) -> Vec<String> {
    fragments
        .iter()
        .map(|f| sse_event(f))
        .chain(std::iter::once(sse_event("done")))
        .collect()
}

/// What the fake backend answers
#[derive(Clone)]
pub struct Script {
    pub sse_chunks: Vec<String>,
    /// Keep the event stream open after the last chunk
    pub sse_hangs: bool,
    pub sse_status: StatusCode,
    pub audio: Vec<u8>,
    pub audio_status: StatusCode,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            sse_chunks: sse_reply(&["The lights", "are on."]),
            sse_hangs: false,
            sse_status: StatusCode::OK,
            audio: vec![0xFF; 4096],
            audio_status: StatusCode::OK,
        }
    }
}

/// Request received by the fake backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    Sse(String),
    ThinkAndReply(HashMap<String, String>),
    Speech(String),
}

#[derive(Clone)]
struct Shared {
    script: Arc<Mutex<Script>>,
    seen: Arc<Mutex<Vec<Seen>>>,
}

/// In-process backend serving the `/api_12` routes
pub struct TestBackend {
    pub base_url: String,
    script: Arc<Mutex<Script>>,
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl TestBackend {
    /// Start a backend on an ephemeral port
    pub async fn start(script: Script) -> Self {
        let shared = Shared {
            script: Arc::new(Mutex::new(script)),
            seen: Arc::new(Mutex::new(Vec::new())),
        };

        let app = Router::new()
            .route("/api_12/sse/{message_id}", get(sse))
            .route("/api_12/think_and_reply", get(think_and_reply))
            .route("/api_12/speech", get(speech))
            .with_state(shared.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind test backend");
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}/api_12"),
            script: shared.script,
            seen: shared.seen,
        }
    }

    /// Client configuration pointing at this backend
    pub fn config(&self) -> Config {
        Config::new(&self.base_url).expect("test backend url is valid")
    }

    /// Replace what the backend answers from now on
    pub fn set_script(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    /// Requests received so far
    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

async fn sse(State(shared): State<Shared>, Path(message_id): Path<String>) -> Response {
    shared.seen.lock().unwrap().push(Seen::Sse(message_id));
    let script = shared.script.lock().unwrap().clone();

    if !script.sse_status.is_success() {
        return (script.sse_status, "no such message").into_response();
    }

    let chunks = stream::iter(script.sse_chunks.into_iter().map(Ok::<_, Infallible>));
    let body: BoxStream<'static, Result<String, Infallible>> = if script.sse_hangs {
        chunks.chain(stream::pending()).boxed()
    } else {
        chunks.boxed()
    };

    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(body),
    )
        .into_response()
}

async fn think_and_reply(
    State(shared): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    shared.seen.lock().unwrap().push(Seen::ThinkAndReply(params));
    audio_response(&shared)
}

async fn speech(
    State(shared): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let text = params.get("text").cloned().unwrap_or_default();
    shared.seen.lock().unwrap().push(Seen::Speech(text));
    audio_response(&shared)
}

fn audio_response(shared: &Shared) -> Response {
    let script = shared.script.lock().unwrap().clone();
    if !script.audio_status.is_success() {
        return (script.audio_status, "synthesis failed").into_response();
    }
    (
        script.audio_status,
        [(header::CONTENT_TYPE, "audio/mpeg")],
        script.audio,
    )
        .into_response()
}

/// Audio output that records what it was given instead of playing it
#[derive(Clone, Default)]
pub struct RecordingOutput {
    pub written: Arc<Mutex<Vec<u8>>>,
    pub finished: Arc<AtomicBool>,
    /// When set, playback lasts until notified
    pub hold: Option<Arc<Notify>>,
}

impl RecordingOutput {
    /// Output whose playback lasts until `release` is notified
    pub fn held() -> (Self, Arc<Notify>) {
        let release = Arc::new(Notify::new());
        let output = Self {
            hold: Some(Arc::clone(&release)),
            ..Self::default()
        };
        (output, release)
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

impl AudioOutput for RecordingOutput {
    fn open(&self) -> voxchat::Result<Box<dyn AudioSink>> {
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl AudioSink for RecordingOutput {
    fn write(&mut self, chunk: &[u8]) -> voxchat::Result<()> {
        self.written.lock().unwrap().extend_from_slice(chunk);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> voxchat::Result<()> {
        if let Some(hold) = &self.hold {
            hold.notified().await;
        }
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Collect events until one matches `done`; panics after five seconds
pub async fn wait_for(
    events: &mut broadcast::Receiver<ConversationEvent>,
    mut done: impl FnMut(&ConversationEvent) -> bool,
) -> Vec<ConversationEvent> {
    let mut seen = Vec::new();
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            let matched = done(&event);
            seen.push(event);
            if matched {
                return;
            }
        }
    })
    .await;

    assert!(result.is_ok(), "timed out waiting for event, saw {seen:?}");
    seen
}
