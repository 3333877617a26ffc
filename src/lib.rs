//! # AskYourDocs
//!
//! Document-grounded chat: a user attaches a Markdown, Word or PDF file, its
//! text is extracted and sent to a RAG backend, and the backend's answer is
//! streamed back and shown as it grows.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌──────────────┐
//! │ UploadedFile │──▶│ ExtractionFacade │──▶│  RAG /add    │
//! │ .md/.docx/.pdf│  │ detect + extract │   └──────────────┘
//! └──────────────┘   └──────────────────┘
//!                                            ┌──────────────┐
//!   question ───────────────────────────────▶│  RAG /query  │
//!                                            └──────┬───────┘
//!                                                   ▼ chunked bytes
//!                     ┌──────────────┐   ┌──────────────────┐
//!                     │ MessageStore │◀──│   AnswerReader   │
//!                     └──────────────┘   └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`detect`] | File kind detection from the file name |
//! | [`extract`] | Per-format text extractors |
//! | [`extraction`] | Validation, dispatch and the PDF worker pool |
//! | [`stream`] | Incremental reading of the streamed answer |
//! | [`backend`] | RAG backend client |
//! | [`store`] | Chat and message persistence |
//! | [`session`] | The chat submission flow |
//! | [`server`] | HTTP API |
//! | [`logging`] | Tracing subscriber setup |

pub mod backend;
pub mod config;
pub mod detect;
pub mod extract;
pub mod extraction;
pub mod logging;
pub mod models;
pub mod server;
pub mod session;
pub mod store;
pub mod stream;
