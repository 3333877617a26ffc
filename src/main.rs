//! # AskYourDocs CLI (`askdocs`)
//!
//! ## Usage
//!
//! ```bash
//! askdocs --config ./config/askdocs.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `askdocs extract <file>` | Print the text extracted from a .md, .docx or .pdf file |
//! | `askdocs ask "<question>" --user <id>` | Ask the RAG backend, streaming the answer |
//! | `askdocs history <chat_id>` | Print a chat's messages |
//! | `askdocs chats --user <id>` | List a user's chats |
//! | `askdocs serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! # Check what will be sent to the backend for a document
//! askdocs extract ./handbook.pdf
//!
//! # Ask about a document, continuing an existing chat
//! RAG_API_URL=http://localhost:8000 \
//!   askdocs ask "What is the leave policy?" --user u1 --file ./handbook.pdf --chat 3f1c...
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use askyourdocs::backend::RagClient;
use askyourdocs::config::{self, Config};
use askyourdocs::extraction::ExtractionFacade;
use askyourdocs::logging;
use askyourdocs::models::UploadedFile;
use askyourdocs::server;
use askyourdocs::session::ChatSession;
use askyourdocs::store::open_store;

/// AskYourDocs CLI: extract documents and ask questions about them.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. When the file does not exist, defaults plus environment overrides
/// (`RAG_API_URL`, `STORE_URL`) are used.
#[derive(Parser)]
#[command(
    name = "askdocs",
    about = "AskYourDocs: ask questions about your documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/askdocs.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract and print the text of a document.
    Extract {
        /// Path to a .md, .docx or .pdf file.
        file: PathBuf,
    },

    /// Ask a question, optionally about an attached document.
    ///
    /// The answer is printed as it streams in. Ctrl-C stops the stream.
    Ask {
        /// The question.
        question: String,

        /// Id of the signed-in user.
        #[arg(long)]
        user: String,

        /// Document to attach to the question.
        #[arg(long)]
        file: Option<PathBuf>,

        /// Continue an existing chat instead of starting a new one.
        #[arg(long)]
        chat: Option<String>,
    },

    /// Print the messages of a chat, oldest first.
    History {
        /// Chat id.
        chat_id: String,
    },

    /// List the chats of a user.
    Chats {
        /// User id.
        #[arg(long)]
        user: String,
    },

    /// Start the HTTP API server.
    Serve,
}

/// Loads `path` when it exists, otherwise falls back to defaults.
fn load_or_default(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::minimal())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(cli.log_json);

    let cfg = load_or_default(&cli.config)?;

    match cli.command {
        Commands::Extract { file } => {
            let upload = UploadedFile::from_path(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let facade = ExtractionFacade::from_config(&cfg);
            facade.init().await;
            let text = facade.extract_text(upload).await?;
            println!("{}", text);
        }
        Commands::Ask {
            question,
            user,
            file,
            chat,
        } => {
            run_ask(&cfg, question, user, file, chat).await?;
        }
        Commands::History { chat_id } => {
            let store = open_store(&cfg)?;
            let messages = store.list_messages(&chat_id).await?;
            if messages.is_empty() {
                println!("No messages.");
            }
            for m in messages {
                println!("[{}] {}", m.role, m.content);
            }
        }
        Commands::Chats { user } => {
            let store = open_store(&cfg)?;
            let chats = store.list_chat_titles(&user).await?;
            if chats.is_empty() {
                println!("No chats.");
            }
            for c in chats {
                println!("{}  {}", c.id.as_deref().unwrap_or("-"), c.title);
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

async fn run_ask(
    cfg: &Config,
    question: String,
    user: String,
    file: Option<PathBuf>,
    chat: Option<String>,
) -> anyhow::Result<()> {
    let extraction = Arc::new(ExtractionFacade::from_config(cfg));
    extraction.init().await;

    let mut session = ChatSession::new(
        Some(user),
        extraction,
        open_store(cfg)?,
        RagClient::from_config(cfg),
    );
    if let Some(chat_id) = chat {
        session.load_chat(&chat_id).await?;
    }
    if let Some(path) = file {
        let upload = UploadedFile::from_path(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        session.attach(upload)?;
    }

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let mut printer = AnswerPrinter::new(std::io::stdout(), cancel.clone());
    let outcome = session
        .ask_with_cancel(&question, cancel, |text| printer.publish(text))
        .await?;
    if let Some(e) = printer.error {
        return Err(e).context("Failed to write answer to stdout");
    }
    println!();

    if !outcome.stream.is_completed() {
        anyhow::bail!("answer did not complete: {}", askyourdocs::session::FAILURE_REPLY);
    }
    eprintln!("chat: {}", outcome.chat_id);
    Ok(())
}

/// Writes only the new part of each cumulative answer update. The first
/// write error is kept and cancels the answer stream.
struct AnswerPrinter<W: Write> {
    out: W,
    printed: usize,
    cancel: CancellationToken,
    error: Option<std::io::Error>,
}

impl<W: Write> AnswerPrinter<W> {
    fn new(out: W, cancel: CancellationToken) -> Self {
        Self {
            out,
            printed: 0,
            cancel,
            error: None,
        }
    }

    fn publish(&mut self, text: &str) {
        if self.error.is_some() {
            return;
        }
        let delta = text.get(self.printed..).unwrap_or_default();
        match self
            .out
            .write_all(delta.as_bytes())
            .and_then(|()| self.out.flush())
        {
            Ok(()) => self.printed = text.len(),
            Err(e) => {
                self.error = Some(e);
                self.cancel.cancel();
            }
        }
    }
}
