//! HTTP media player
//!
//! Streams an audio resource from the backend into an [`AudioOutput`],
//! reporting buffering progress as chunks arrive.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;

use super::playback::AudioOutput;
use super::session::{BufferProgress, MediaPlayer};
use crate::backend::Backend;
use crate::{Error, Result};

/// [`MediaPlayer`] that fetches over HTTP and plays through an [`AudioOutput`]
pub struct HttpMediaPlayer {
    backend: Backend,
    output: Arc<dyn AudioOutput>,
}

impl HttpMediaPlayer {
    /// Create a player that fetches through `backend` and plays on `output`
    #[must_use]
    pub fn new(backend: Backend, output: Arc<dyn AudioOutput>) -> Self {
        Self { backend, output }
    }
}

#[async_trait]
impl MediaPlayer for HttpMediaPlayer {
    async fn play(&self, url: &str, progress: &BufferProgress) -> Result<()> {
        let response = self.backend.fetch_audio(url).await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        tracing::debug!(%url, content_type, "audio response started");

        let mut sink = self.output.open()?;
        let mut body = Box::pin(response.bytes_stream());
        let mut loaded: u64 = 0;

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            if chunk.is_empty() {
                continue;
            }

            sink.write(&chunk)?;
            loaded += chunk.len() as u64;
            progress.loaded(loaded);
        }

        if loaded == 0 {
            return Err(Error::Audio("empty audio response".to_string()));
        }

        tracing::debug!(%url, bytes = loaded, "audio download complete");
        sink.finish().await
    }
}
