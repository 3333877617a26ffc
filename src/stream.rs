//! Incremental ingestion of a streamed answer.
//!
//! The RAG backend answers with a chunked `text/plain` body. [`AnswerReader`]
//! drains that body one chunk at a time, decodes it with a stateful UTF-8
//! decoder (chunk boundaries may split a character), and publishes the
//! cumulative answer after every chunk.
//!
//! A reader is single-use:
//!
//! ```text
//! Idle ──▶ Streaming ──▶ Completed
//!                   ├──▶ Failed
//!                   └──▶ Cancelled
//! ```
//!
//! No transition leaves a terminal state; a new question needs a new reader.

use std::fmt;
use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Boxed response body as handed out by [`crate::backend::RagClient::query`].
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StreamError>> + Send>>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("answer stream failed: {0}")]
    Transport(String),

    #[error("answer stream cancelled")]
    Cancelled,
}

// ============ Decoder ============

/// UTF-8 decoder that carries incomplete multi-byte sequences across calls.
///
/// Invalid sequences decode to U+FFFD, the same policy a browser
/// `TextDecoder` applies in its default (non-fatal) mode.
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes `chunk`, holding back a trailing incomplete sequence.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.pending);
        input.extend_from_slice(chunk);

        let mut out = String::with_capacity(input.len());
        let mut rest = input.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // valid_up_to guarantees this prefix is well-formed.
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        None => {
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Number of bytes held back waiting for the rest of a character.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Ends the stream: a dangling partial character becomes U+FFFD.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            char::REPLACEMENT_CHARACTER.to_string()
        }
    }
}

// ============ Reader ============

/// Lifecycle of one [`AnswerReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Idle,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl ReaderState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReaderState::Completed | ReaderState::Failed | ReaderState::Cancelled
        )
    }
}

/// How a drained stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The body closed normally; the text is the authoritative answer.
    Completed(String),
    /// The connection broke; `partial` is what had been published.
    Failed { partial: String, error: StreamError },
    /// The caller cancelled; `partial` is what had been published.
    Cancelled { partial: String },
}

impl StreamOutcome {
    /// The text published before the stream ended, however it ended.
    pub fn text(&self) -> &str {
        match self {
            StreamOutcome::Completed(text) => text,
            StreamOutcome::Failed { partial, .. } | StreamOutcome::Cancelled { partial } => partial,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, StreamOutcome::Completed(_))
    }
}

/// Drains a chunked body into a growing answer.
pub struct AnswerReader<S = ByteStream> {
    body: S,
    decoder: Utf8StreamDecoder,
    text: String,
    state: ReaderState,
    cancel: CancellationToken,
    chunks: usize,
}

impl<S> fmt::Debug for AnswerReader<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnswerReader")
            .field("state", &self.state)
            .field("chunks", &self.chunks)
            .field("text_len", &self.text.len())
            .finish()
    }
}

impl<S, E> AnswerReader<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: fmt::Display,
{
    pub fn new(body: S) -> Self {
        Self::with_cancellation(body, CancellationToken::new())
    }

    /// Builds a reader that stops as soon as `cancel` fires.
    pub fn with_cancellation(body: S, cancel: CancellationToken) -> Self {
        Self {
            body,
            decoder: Utf8StreamDecoder::new(),
            text: String::new(),
            state: ReaderState::Idle,
            cancel,
            chunks: 0,
        }
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// The cumulative decoded answer so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// A handle the caller can use to cancel this reader from elsewhere.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Reads the next chunk and returns the cumulative text.
    ///
    /// Returns `None` once the stream has reached a terminal state. When the
    /// body ends on a dangling partial character, one last update carrying
    /// the U+FFFD tail is published before that. A failure
    /// or cancellation is reported once as `Some(Err(..))`; the text published
    /// before it stays available through [`text`](Self::text).
    pub async fn next_update(&mut self) -> Option<Result<&str, StreamError>> {
        if self.state.is_terminal() {
            return None;
        }
        self.state = ReaderState::Streaming;

        let next = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!(chunks = self.chunks, "answer stream cancelled");
                self.state = ReaderState::Cancelled;
                return Some(Err(StreamError::Cancelled));
            }
            next = self.body.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                self.chunks += 1;
                let decoded = self.decoder.decode(&chunk);
                self.text.push_str(&decoded);
                Some(Ok(self.text.as_str()))
            }
            Some(Err(e)) => {
                warn!(chunks = self.chunks, error = %e, "answer stream failed");
                self.state = ReaderState::Failed;
                Some(Err(StreamError::Transport(e.to_string())))
            }
            None => {
                let tail = self.decoder.finish();
                self.state = ReaderState::Completed;
                debug!(
                    chunks = self.chunks,
                    chars = self.text.chars().count() + tail.chars().count(),
                    "answer stream completed"
                );
                if tail.is_empty() {
                    None
                } else {
                    // flushed partial character: publish it so the last
                    // update equals the final answer
                    self.text.push_str(&tail);
                    Some(Ok(self.text.as_str()))
                }
            }
        }
    }

    /// Drains the stream, calling `on_update` with the cumulative text after
    /// every chunk, and reports how the stream ended.
    pub async fn run<F>(mut self, mut on_update: F) -> StreamOutcome
    where
        F: FnMut(&str),
    {
        while let Some(update) = self.next_update().await {
            match update {
                Ok(text) => on_update(text),
                Err(error) => {
                    let partial = std::mem::take(&mut self.text);
                    return match error {
                        StreamError::Cancelled => StreamOutcome::Cancelled { partial },
                        error => StreamOutcome::Failed { partial, error },
                    };
                }
            }
        }
        StreamOutcome::Completed(std::mem::take(&mut self.text))
    }

    /// Turns the reader into a lazy, finite sequence of cumulative snapshots.
    pub fn into_snapshots(self) -> impl Stream<Item = Result<String, StreamError>> {
        futures::stream::unfold(self, |mut reader| async move {
            let item = match reader.next_update().await {
                Some(update) => update.map(str::to_string),
                None => return None,
            };
            Some((item, reader))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn chunks(parts: &[&[u8]]) -> impl Stream<Item = Result<Bytes, StreamError>> + Unpin {
        let items: Vec<Result<Bytes, StreamError>> = parts
            .iter()
            .map(|p| Ok(Bytes::copy_from_slice(p)))
            .collect();
        futures::stream::iter(items)
    }

    #[test]
    fn decoder_joins_split_two_byte_character() {
        let mut d = Utf8StreamDecoder::new();
        // "é" is C3 A9
        assert_eq!(d.decode(&[b'c', b'a', b'f', 0xC3]), "caf");
        assert_eq!(d.pending_len(), 1);
        assert_eq!(d.decode(&[0xA9, b'!']), "é!");
        assert_eq!(d.finish(), "");
    }

    #[test]
    fn decoder_handles_four_byte_character_in_single_bytes() {
        let mut d = Utf8StreamDecoder::new();
        let rocket = "🚀".as_bytes();
        let mut out = String::new();
        for b in rocket {
            out.push_str(&d.decode(&[*b]));
        }
        assert_eq!(out, "🚀");
    }

    #[test]
    fn decoder_replaces_invalid_bytes_and_keeps_going() {
        let mut d = Utf8StreamDecoder::new();
        assert_eq!(d.decode(&[b'a', 0xFF, b'b']), "a\u{FFFD}b");
    }

    #[test]
    fn decoder_flushes_dangling_sequence_as_replacement() {
        let mut d = Utf8StreamDecoder::new();
        assert_eq!(d.decode(&[b'x', 0xE2, 0x82]), "x");
        assert_eq!(d.finish(), "\u{FFFD}");
        assert_eq!(d.pending_len(), 0);
    }

    #[tokio::test]
    async fn updates_are_cumulative_and_ordered() {
        let reader = AnswerReader::new(chunks(&[b"Hel", b"lo, ", b"world"]));
        let mut seen = Vec::new();
        let outcome = reader.run(|text| seen.push(text.to_string())).await;
        assert_eq!(seen, vec!["Hel", "Hello, ", "Hello, world"]);
        assert_eq!(outcome, StreamOutcome::Completed("Hello, world".to_string()));
    }

    #[tokio::test]
    async fn dangling_tail_is_published_before_completion() {
        let reader = AnswerReader::new(chunks(&[b"ok", &[0xE2, 0x82]]));
        let mut seen = Vec::new();
        let outcome = reader.run(|text| seen.push(text.to_string())).await;
        assert_eq!(seen, vec!["ok", "ok", "ok\u{FFFD}"]);
        assert_eq!(seen.last().map(String::as_str), Some(outcome.text()));
        assert!(outcome.is_completed());
    }

    #[tokio::test]
    async fn split_multibyte_character_decodes_once() {
        let reader = AnswerReader::new(chunks(&[b"na\xC3", b"\xAFve"]));
        let outcome = reader.run(|_| {}).await;
        assert_eq!(outcome.text(), "naïve");
    }

    #[tokio::test]
    async fn state_machine_reaches_completed_and_stays_there() {
        let mut reader = AnswerReader::new(chunks(&[b"a"]));
        assert_eq!(reader.state(), ReaderState::Idle);
        assert_eq!(reader.next_update().await, Some(Ok("a")));
        assert_eq!(reader.state(), ReaderState::Streaming);
        assert_eq!(reader.next_update().await, None);
        assert_eq!(reader.state(), ReaderState::Completed);
        assert_eq!(reader.next_update().await, None);
        assert_eq!(reader.text(), "a");
    }

    #[tokio::test]
    async fn transport_error_keeps_partial_text() {
        let items = vec![
            Ok(Bytes::from_static(b"partial ")),
            Err(StreamError::Transport("connection reset".to_string())),
            Ok(Bytes::from_static(b"never seen")),
        ];
        let mut reader = AnswerReader::new(futures::stream::iter(items));
        assert_eq!(reader.next_update().await, Some(Ok("partial ")));
        assert!(matches!(reader.next_update().await, Some(Err(StreamError::Transport(_)))));
        assert_eq!(reader.state(), ReaderState::Failed);
        assert_eq!(reader.next_update().await, None);
        assert_eq!(reader.text(), "partial ");
    }

    #[tokio::test]
    async fn cancelling_from_the_callback_stops_updates() {
        let reader = AnswerReader::new(chunks(&[b"one ", b"two ", b"three"]));
        let token = reader.cancellation_token();
        let mut seen = Vec::new();
        let outcome = reader
            .run(|text| {
                seen.push(text.to_string());
                if seen.len() == 2 {
                    token.cancel();
                }
            })
            .await;
        assert_eq!(seen, vec!["one ", "one two "]);
        assert_eq!(
            outcome,
            StreamOutcome::Cancelled {
                partial: "one two ".to_string()
            }
        );
    }

    #[tokio::test]
    async fn cancelling_a_stalled_stream_unblocks_the_reader() {
        let body = chunks(&[b"waiting"]).chain(futures::stream::pending());
        let token = CancellationToken::new();
        let reader = AnswerReader::with_cancellation(body, token.clone());

        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            let outcome = reader.run(|t| seen.push(t.to_string())).await;
            (seen, outcome)
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let (seen, outcome) = handle.await.unwrap();
        assert_eq!(seen, vec!["waiting"]);
        assert!(matches!(outcome, StreamOutcome::Cancelled { ref partial } if partial == "waiting"));
    }

    #[tokio::test]
    async fn snapshots_stream_yields_one_item_per_chunk() {
        let reader = AnswerReader::new(chunks(&[b"a", b"b", b"c"]));
        let snaps: Vec<_> = reader.into_snapshots().collect().await;
        assert_eq!(
            snaps,
            vec![Ok("a".to_string()), Ok("ab".to_string()), Ok("abc".to_string())]
        );
    }
}
