//! [`MessageStore`] backed by a hosted Postgres exposed through PostgREST.
//!
//! Tables used: `messages (chat_id, role, content, created_at)` and
//! `chats (id, user_id, title)`. Authentication is the service key sent as
//! both `apikey` and bearer token.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use serde::Deserialize;
use tracing::error;

use crate::models::{ChatMessage, ChatSummary, NewChat, Role, StoredMessage};

use super::{validate_message, MessageStore, StoreError};

pub struct PostgrestStore {
    http: reqwest::Client,
    base_url: String,
    service_key: String,
}

/// PostgREST error body (`{ "message": ..., "code": ... }`).
#[derive(Deserialize)]
struct PgError {
    message: String,
}

impl PostgrestStore {
    pub fn new(base_url: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_key: service_key.into(),
        }
    }

    fn table(&self, name: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, name)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        let response = self
            .authed(request)
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<PgError>(&body)
            .map(|e| e.message)
            .unwrap_or(body);
        error!(status = status.as_u16(), message = %message, "store error");
        Err(StoreError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl MessageStore for PostgrestStore {
    async fn insert_message(
        &self,
        chat_id: &str,
        role: Role,
        content: &str,
    ) -> Result<StoredMessage, StoreError> {
        validate_message(chat_id, content)?;
        let request = self
            .http
            .post(self.table("messages"))
            .header("Prefer", "return=representation")
            .header("Accept", "application/vnd.pgrst.object+json")
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "role": role,
                "content": content,
            }));
        self.send(request)
            .await?
            .json::<StoredMessage>()
            .await
            .map_err(|e| StoreError::InvalidResponse(e.to_string()))
    }

    async fn list_messages(&self, chat_id: &str) -> Result<Vec<ChatMessage>, StoreError> {
        let request = self.http.get(self.table("messages")).query(&[
            ("select", "role,content".to_string()),
            ("chat_id", format!("eq.{}", chat_id)),
            ("order", "created_at.asc".to_string()),
        ]);
        self.send(request)
            .await?
            .json::<Vec<ChatMessage>>()
            .await
            .map_err(|e| StoreError::InvalidResponse(e.to_string()))
    }

    async fn list_chat_titles(&self, user_id: &str) -> Result<Vec<ChatSummary>, StoreError> {
        let request = self.http.get(self.table("chats")).query(&[
            ("select", "id,title".to_string()),
            ("user_id", format!("eq.{}", user_id)),
        ]);
        self.send(request)
            .await?
            .json::<Vec<ChatSummary>>()
            .await
            .map_err(|e| StoreError::InvalidResponse(e.to_string()))
    }

    async fn create_chat(&self, chat: &NewChat) -> Result<(), StoreError> {
        let request = self
            .http
            .post(self.table("chats"))
            .header("Prefer", "return=minimal")
            .json(chat);
        self.send(request).await?;
        Ok(())
    }
}
