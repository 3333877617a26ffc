//! Core data models shared by the extraction, session, store, and server layers.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// A file the user selected for upload.
///
/// Immutable once built. The bytes are reference counted, so cloning a file
/// to hand it to an extraction does not copy its contents.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub raw_bytes: Bytes,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, raw_bytes: Vec<u8>) -> Self {
        Self::from_bytes(name, Bytes::from(raw_bytes))
    }

    pub fn from_bytes(name: impl Into<String>, raw_bytes: Bytes) -> Self {
        Self {
            name: name.into(),
            raw_bytes,
        }
    }

    /// Reads a file from disk, using its file name (not the full path) as `name`.
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let raw_bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(Self::new(name, raw_bytes))
    }

    pub fn size_bytes(&self) -> u64 {
        self.raw_bytes.len() as u64
    }
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message as listed from the message store: `{ role, content }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// A persisted message row, as returned by an insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    pub chat_id: String,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A new chat row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewChat {
    pub id: String,
    pub user_id: String,
    pub title: String,
}

/// Sidebar entry for a user's chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSummary {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
}
