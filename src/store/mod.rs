//! Message store collaborator.
//!
//! Chats and their messages live in an external database. The [`MessageStore`]
//! trait is the boundary: the session flow and the HTTP API only talk to it.
//!
//! | Implementation | Backing |
//! |----------------|---------|
//! | [`memory::MemoryStore`] | process memory; tests and offline CLI use |
//! | [`postgrest::PostgrestStore`] | hosted Postgres behind a PostgREST API |
//!
//! Implementations must be `Send + Sync` to be shared across handlers.

pub mod memory;
pub mod postgrest;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::config::{Config, ENV_STORE_KEY};
use crate::models::{ChatMessage, ChatSummary, NewChat, Role, StoredMessage};

pub use memory::MemoryStore;
pub use postgrest::PostgrestStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Missing required fields: chat_id, role, content")]
    MissingFields,

    #[error("store returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("store request failed: {0}")]
    Transport(String),

    #[error("unexpected store response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persists one message and returns the stored row.
    async fn insert_message(
        &self,
        chat_id: &str,
        role: Role,
        content: &str,
    ) -> Result<StoredMessage, StoreError>;

    /// All messages of a chat, oldest first.
    async fn list_messages(&self, chat_id: &str) -> Result<Vec<ChatMessage>, StoreError>;

    /// The user's chats, for the sidebar.
    async fn list_chat_titles(&self, user_id: &str) -> Result<Vec<ChatSummary>, StoreError>;

    /// Registers a new chat owned by `chat.user_id`.
    async fn create_chat(&self, chat: &NewChat) -> Result<(), StoreError>;
}

/// Rejects a message with any empty field.
pub fn validate_message(chat_id: &str, content: &str) -> Result<(), StoreError> {
    if chat_id.trim().is_empty() || content.is_empty() {
        return Err(StoreError::MissingFields);
    }
    Ok(())
}

/// Builds the store selected by `[store].provider`.
pub fn open_store(config: &Config) -> Result<Arc<dyn MessageStore>> {
    match config.store.provider.as_str() {
        "postgrest" => {
            let url = config
                .store
                .url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("store.url required for postgrest provider"))?;
            let key = std::env::var(ENV_STORE_KEY)
                .map_err(|_| anyhow::anyhow!("{} environment variable not set", ENV_STORE_KEY))?;
            Ok(Arc::new(PostgrestStore::new(url, key)))
        }
        _ => Ok(Arc::new(MemoryStore::new())),
    }
}
