//! HTTP client for the external RAG backend.
//!
//! The backend exposes two endpoints, both `POST` with query parameters:
//!
//! | Endpoint | Parameters | Response |
//! |----------|------------|----------|
//! | `/add` | `text`, `chat_id`, `user_id` | JSON acknowledgement |
//! | `/query` | `q`, `user_id`, `chat_id` (optional) | chunked `text/plain` answer |
//!
//! Empty parameters are omitted. A non-success status is an error before any
//! stream is handed out, so callers never read an error page as an answer.

use std::time::Duration;

use futures::StreamExt;
use thiserror::Error;
use tracing::{debug, error};

use crate::config::Config;
use crate::stream::{ByteStream, StreamError};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("RAG_API_URL not configured")]
    Unavailable,

    #[error("backend error: {status}")]
    Status { status: u16, body: String },

    #[error("backend request failed: {0}")]
    Transport(String),
}

impl BackendError {
    /// HTTP status to relay to a caller of the proxy API.
    pub fn status_code(&self) -> u16 {
        match self {
            BackendError::Status { status, .. } => *status,
            _ => 500,
        }
    }
}

/// Client for the RAG backend.
#[derive(Debug, Clone)]
pub struct RagClient {
    http: reqwest::Client,
    base_url: Option<String>,
    add_timeout: Duration,
    query_timeout: Duration,
}

impl RagClient {
    pub fn new(base_url: Option<String>, add_timeout: Duration, query_timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
            add_timeout,
            query_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.backend_url().map(str::to_string),
            Duration::from_secs(config.backend.add_timeout_secs),
            Duration::from_secs(config.backend.query_timeout_secs),
        )
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    fn endpoint(&self, path: &str) -> Result<String, BackendError> {
        let base = self.base_url.as_deref().ok_or(BackendError::Unavailable)?;
        Ok(format!("{}/{}", base, path))
    }

    /// Sends document text to be indexed for `chat_id`.
    pub async fn add(
        &self,
        text: &str,
        chat_id: &str,
        user_id: &str,
    ) -> Result<serde_json::Value, BackendError> {
        let url = self.endpoint("add")?;
        let params = non_empty_params(&[("text", text), ("chat_id", chat_id), ("user_id", user_id)]);
        debug!(chat_id, user_id, chars = text.chars().count(), "indexing document");

        let response = self
            .http
            .post(&url)
            .query(&params)
            .timeout(self.add_timeout)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "RAG add request failed");
                BackendError::Transport(e.to_string())
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        if !status.is_success() {
            error!(status = status.as_u16(), body = %body, "RAG add rejected");
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&body).unwrap_or(serde_json::Value::String(body)))
    }

    /// Asks a question; returns the answer body as a byte stream.
    pub async fn query(
        &self,
        q: &str,
        user_id: &str,
        chat_id: Option<&str>,
    ) -> Result<ByteStream, BackendError> {
        let url = self.endpoint("query")?;
        let params = non_empty_params(&[
            ("q", q),
            ("user_id", user_id),
            ("chat_id", chat_id.unwrap_or_default()),
        ]);
        debug!(url = %url, user_id, chat_id = chat_id.unwrap_or_default(), "querying backend");

        let response = self
            .http
            .post(&url)
            .query(&params)
            .timeout(self.query_timeout)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "RAG query request failed");
                BackendError::Transport(e.to_string())
            })?;

        let status = response.status();
        debug!(status = status.as_u16(), "backend status");
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body = %body, "RAG query rejected");
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| StreamError::Transport(e.to_string())));
        Ok(Box::pin(body))
    }
}

fn non_empty_params<'a>(pairs: &[(&'a str, &'a str)]) -> Vec<(&'a str, &'a str)> {
    pairs
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .copied()
        .collect()
}
