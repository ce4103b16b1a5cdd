//! HTTP contract with the conversational backend
//!
//! Three endpoints hang off the configured base URL:
//! - `GET /think_and_reply?user=…&message_id=…&message=…` starts the reply job
//!   and streams back its spoken rendition (`audio/mpeg`)
//! - `GET /speech?text=…` synthesizes arbitrary text
//! - `GET /sse/{message_id}` streams the reply text as server-sent events

use reqwest::header::{ACCEPT, CACHE_CONTROL};

use crate::config::Config;
use crate::{Error, Result};

/// Client for the conversational backend
#[derive(Debug, Clone)]
pub struct Backend {
    base_url: String,
    client: reqwest::Client,
}

impl Backend {
    /// Create a backend client for `base_url`
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Create a backend client from the client configuration
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.api_base_url)
    }

    /// Base URL without trailing slash
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of the think-and-reply request for one turn
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlankInput`] if `text` is blank
    pub fn think_and_reply_url(&self, user_id: &str, message_id: &str, text: &str) -> Result<String> {
        ensure_not_blank(text)?;
        Ok(format!(
            "{}/think_and_reply?user={}&message_id={}&message={}",
            self.base_url,
            urlencoding::encode(user_id),
            urlencoding::encode(message_id),
            urlencoding::encode(text),
        ))
    }

    /// URL of the speech synthesis request for `text`
    ///
    /// # Errors
    ///
    /// Returns [`Error::BlankInput`] if `text` is blank
    pub fn speech_url(&self, text: &str) -> Result<String> {
        ensure_not_blank(text)?;
        Ok(format!(
            "{}/speech?text={}",
            self.base_url,
            urlencoding::encode(text)
        ))
    }

    /// URL of the reply event stream for `message_id`
    #[must_use]
    pub fn sse_url(&self, message_id: &str) -> String {
        format!("{}/sse/{}", self.base_url, urlencoding::encode(message_id))
    }

    /// Open the reply event stream for `message_id`
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the server answers non-2xx
    pub async fn subscribe(&self, message_id: &str) -> Result<reqwest::Response> {
        let url = self.sse_url(message_id);
        tracing::debug!(%url, "opening reply stream");

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Reply(format!("{status}: {body}")));
        }

        Ok(response)
    }

    /// Start streaming the audio resource at `url`
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the server answers non-2xx
    pub async fn fetch_audio(&self, url: &str) -> Result<reqwest::Response> {
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Audio(format!("request failed with {status}: {body}")));
        }

        Ok(response)
    }
}

/// Reject empty or whitespace-only text before any network call
///
/// # Errors
///
/// Returns [`Error::BlankInput`] if `text` is blank
pub fn ensure_not_blank(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(Error::BlankInput);
    }
    Ok(())
}
