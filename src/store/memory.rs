//! In-memory [`MessageStore`] for tests and offline use.
//!
//! Rows live in `Vec`s behind `std::sync::RwLock`. Listing order follows an
//! insertion sequence, which stands in for `created_at` ordering.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use crate::models::{ChatMessage, ChatSummary, NewChat, Role, StoredMessage};

use super::{validate_message, MessageStore, StoreError};

struct Row {
    seq: u64,
    message: StoredMessage,
}

#[derive(Default)]
struct Inner {
    next_seq: u64,
    messages: Vec<Row>,
    chats: Vec<NewChat>,
}

pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Total number of stored messages across all chats.
    pub fn message_count(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .messages
            .len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert_message(
        &self,
        chat_id: &str,
        role: Role,
        content: &str,
    ) -> Result<StoredMessage, StoreError> {
        validate_message(chat_id, content)?;
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.next_seq += 1;
        let seq = inner.next_seq;
        let message = StoredMessage {
            id: Some(serde_json::Value::from(seq)),
            chat_id: chat_id.to_string(),
            role,
            content: content.to_string(),
            created_at: Some(Utc::now()),
        };
        inner.messages.push(Row {
            seq,
            message: message.clone(),
        });
        Ok(message)
    }

    async fn list_messages(&self, chat_id: &str) -> Result<Vec<ChatMessage>, StoreError> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut rows: Vec<&Row> = inner
            .messages
            .iter()
            .filter(|r| r.message.chat_id == chat_id)
            .collect();
        rows.sort_by_key(|r| r.seq);
        Ok(rows
            .into_iter()
            .map(|r| ChatMessage {
                role: r.message.role,
                content: r.message.content.clone(),
            })
            .collect())
    }

    async fn list_chat_titles(&self, user_id: &str) -> Result<Vec<ChatSummary>, StoreError> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .chats
            .iter()
            .filter(|c| c.user_id == user_id)
            .map(|c| ChatSummary {
                id: Some(c.id.clone()),
                title: c.title.clone(),
            })
            .collect())
    }

    async fn create_chat(&self, chat: &NewChat) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.chats.iter().any(|c| c.id == chat.id) {
            return Err(StoreError::Status {
                status: 409,
                message: format!("chat {} already exists", chat.id),
            });
        }
        inner.chats.push(chat.clone());
        Ok(())
    }
}
