//! One user's chat session: the question submission flow.
//!
//! [`ChatSession::ask`] runs the whole round trip for one question:
//!
//! ```text
//! attach? ─▶ extract ─▶ create chat? ─▶ persist question ─▶ index document?
//!                                                              │
//!            persist answer ◀─ drain answer stream ◀─ query ◀──┘
//! ```
//!
//! Submission needs a signed-in user. Extraction failures stop the send
//! before anything is persisted or sent. Stream failures never propagate:
//! they end in a terminal assistant message, and only a completed, non-empty
//! answer is persisted.
//!
//! `ask` takes `&mut self`, so one session has at most one answer in flight.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::{BackendError, RagClient};
use crate::extract::ExtractError;
use crate::extraction::ExtractionFacade;
use crate::models::{ChatSummary, NewChat, Role, UploadedFile};
use crate::store::{MessageStore, StoreError};
use crate::stream::{AnswerReader, StreamOutcome};

/// Terminal assistant message shown when an answer could not be produced.
pub const FAILURE_REPLY: &str = "Something went wrong. Please try again.";
/// Notice shown when the selected extractor could not read the file.
pub const READ_FAILURE_NOTICE: &str = "Failed to read document. Try another file.";
/// How long a notice stays visible.
pub const NOTICE_TTL: Duration = Duration::from_secs(5);
/// New chats are titled with this many leading characters of the question.
pub const TITLE_CHARS: usize = 40;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Please sign in to send messages")]
    SignedOut,

    #[error("Type a question or attach a document")]
    EmptySubmission,

    #[error(transparent)]
    Extraction(#[from] ExtractError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// A transient, auto-dismissing message for the user.
#[derive(Debug, Clone)]
pub struct Notice {
    pub message: String,
    raised_at: Instant,
}

impl Notice {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            raised_at: Instant::now(),
        }
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.duration_since(self.raised_at) >= NOTICE_TTL
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }
}

/// A transcript entry as displayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMessage {
    pub role: Role,
    pub content: String,
    /// Name of the document attached to a user message.
    pub file: Option<String>,
}

impl DisplayMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            file: None,
        }
    }
}

/// Result of one [`ChatSession::ask`].
#[derive(Debug, Clone)]
pub struct AskOutcome {
    pub chat_id: String,
    pub stream: StreamOutcome,
    /// Whether the answer was written to the message store.
    pub persisted: bool,
}

pub struct ChatSession {
    user_id: Option<String>,
    extraction: Arc<ExtractionFacade>,
    store: Arc<dyn MessageStore>,
    backend: RagClient,
    current_chat: Option<String>,
    attachment: Option<UploadedFile>,
    messages: Vec<DisplayMessage>,
    notice: Option<Notice>,
}

impl ChatSession {
    /// `user_id` comes from the auth provider; `None` means signed out.
    pub fn new(
        user_id: Option<String>,
        extraction: Arc<ExtractionFacade>,
        store: Arc<dyn MessageStore>,
        backend: RagClient,
    ) -> Self {
        Self {
            user_id: user_id.filter(|u| !u.is_empty()),
            extraction,
            store,
            backend,
            current_chat: None,
            attachment: None,
            messages: Vec::new(),
            notice: None,
        }
    }

    pub fn is_signed_in(&self) -> bool {
        self.user_id.is_some()
    }

    pub fn current_chat(&self) -> Option<&str> {
        self.current_chat.as_deref()
    }

    pub fn messages(&self) -> &[DisplayMessage] {
        &self.messages
    }

    pub fn attachment(&self) -> Option<&UploadedFile> {
        self.attachment.as_ref()
    }

    /// The current notice, dropping it once it has expired.
    pub fn notice(&mut self) -> Option<&Notice> {
        if self.notice.as_ref().is_some_and(Notice::is_expired) {
            self.notice = None;
        }
        self.notice.as_ref()
    }

    pub fn dismiss_notice(&mut self) {
        self.notice = None;
    }

    fn raise(&mut self, message: impl Into<String>) {
        self.notice = Some(Notice::new(message));
    }

    /// Selects a file to send with the next question. Oversized files are
    /// rejected here, before any extraction.
    pub fn attach(&mut self, file: UploadedFile) -> Result<(), SessionError> {
        if let Err(e) = self.extraction.check_size(&file) {
            self.raise(e.to_string());
            return Err(e.into());
        }
        self.attachment = Some(file);
        Ok(())
    }

    pub fn remove_attachment(&mut self) {
        self.attachment = None;
    }

    /// Starts a fresh conversation.
    pub fn new_chat(&mut self) {
        self.current_chat = None;
        self.messages.clear();
    }

    /// Switches to an existing chat and loads its history.
    pub async fn load_chat(&mut self, chat_id: &str) -> Result<(), SessionError> {
        let history = self.store.list_messages(chat_id).await?;
        self.current_chat = Some(chat_id.to_string());
        self.messages = history
            .into_iter()
            .map(|m| DisplayMessage::new(m.role, m.content))
            .collect();
        Ok(())
    }

    /// The signed-in user's chats.
    pub async fn recent_chats(&self) -> Result<Vec<ChatSummary>, SessionError> {
        let user_id = self.user_id.as_deref().ok_or(SessionError::SignedOut)?;
        Ok(self.store.list_chat_titles(user_id).await?)
    }

    /// Sends `question` (and the attachment, if any) and streams the answer.
    pub async fn ask<F>(&mut self, question: &str, on_update: F) -> Result<AskOutcome, SessionError>
    where
        F: FnMut(&str),
    {
        self.ask_with_cancel(question, CancellationToken::new(), on_update)
            .await
    }

    /// Like [`ask`](Self::ask); firing `cancel` stops the answer stream.
    pub async fn ask_with_cancel<F>(
        &mut self,
        question: &str,
        cancel: CancellationToken,
        mut on_update: F,
    ) -> Result<AskOutcome, SessionError>
    where
        F: FnMut(&str),
    {
        let user_id = self.user_id.clone().ok_or(SessionError::SignedOut)?;
        if question.trim().is_empty() && self.attachment.is_none() {
            return Err(SessionError::EmptySubmission);
        }

        let mut file_text = None;
        // shares the attachment's buffer; it stays attached if extraction fails
        if let Some(file) = self.attachment.clone() {
            let name = file.name.clone();
            match self.extraction.extract_text(file).await {
                Ok(text) => file_text = Some(text),
                Err(e) => {
                    warn!(file = %name, error = %e, "document extraction failed");
                    if e.is_extraction_failure() {
                        self.raise(READ_FAILURE_NOTICE);
                    } else {
                        self.raise(e.to_string());
                    }
                    return Err(e.into());
                }
            }
        }

        let chat_id = match self.current_chat.clone() {
            Some(id) => id,
            None => {
                let chat = NewChat {
                    id: Uuid::new_v4().to_string(),
                    user_id: user_id.clone(),
                    title: question.chars().take(TITLE_CHARS).collect(),
                };
                self.store.create_chat(&chat).await?;
                info!(chat_id = %chat.id, "created chat");
                self.current_chat = Some(chat.id.clone());
                chat.id
            }
        };

        self.messages.push(DisplayMessage {
            role: Role::User,
            content: question.to_string(),
            file: self.attachment.as_ref().map(|f| f.name.clone()),
        });
        if !question.is_empty() {
            self.store
                .insert_message(&chat_id, Role::User, question)
                .await?;
        }
        self.remove_attachment();

        if let Some(text) = file_text.as_deref().filter(|t| !t.is_empty()) {
            if let Err(e) = self.backend.add(text, &chat_id, &user_id).await {
                self.raise(e.to_string());
                return Err(e.into());
            }
        }

        let body = match self.backend.query(question, &user_id, Some(&chat_id)).await {
            Ok(body) => body,
            Err(e) => {
                self.messages
                    .push(DisplayMessage::new(Role::Assistant, FAILURE_REPLY));
                self.raise(e.to_string());
                return Err(e.into());
            }
        };

        self.messages.push(DisplayMessage::new(Role::Assistant, ""));
        let reader = AnswerReader::with_cancellation(body, cancel);
        let messages = &mut self.messages;
        let outcome = reader
            .run(|text| {
                if let Some(last) = messages.last_mut() {
                    last.content.clear();
                    last.content.push_str(text);
                }
                on_update(text);
            })
            .await;

        let mut persisted = false;
        match &outcome {
            StreamOutcome::Completed(answer) if !answer.is_empty() => {
                self.store
                    .insert_message(&chat_id, Role::Assistant, answer)
                    .await?;
                persisted = true;
            }
            StreamOutcome::Completed(_) => {}
            StreamOutcome::Failed { .. } | StreamOutcome::Cancelled { .. } => {
                self.messages
                    .push(DisplayMessage::new(Role::Assistant, FAILURE_REPLY));
            }
        }
        info!(chat_id = %chat_id, persisted, completed = outcome.is_completed(), "answer finished");

        Ok(AskOutcome {
            chat_id,
            stream: outcome,
            persisted,
        })
    }
}
