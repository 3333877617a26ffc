//! Extraction facade: boundary checks, kind detection, and dispatch.
//!
//! [`ExtractionFacade::extract_text`] is the single entry point used by the
//! chat session and the HTTP API:
//!
//! 1. detect the [`FileKind`]; unsupported names fail before any I/O;
//! 2. enforce the upload size limit;
//! 3. run the matching [`Extractor`] and return its result unchanged.
//!
//! Office and PDF parsing are CPU-bound and run on the blocking pool. PDF
//! parses additionally take a permit from a small parser pool, which is the
//! facade's one piece of lazily initialised shared state. The pool is created
//! at most once per facade, either by [`ExtractionFacade::init`] at startup or
//! on the first PDF.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{OnceCell, Semaphore};
use tracing::{debug, info};

use crate::config::Config;
use crate::detect::{detect, extension, FileKind};
use crate::extract::{
    ExtractError, Extractor, OfficeExtractor, PaginatedExtractor, PlainTextExtractor,
    DEFAULT_MAX_XML_ENTRY_BYTES,
};
use crate::models::UploadedFile;

/// Upload limit applied at the boundary: 5 MB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;

/// Default number of PDFs parsed at once.
pub const DEFAULT_PDF_WORKERS: usize = 2;

/// Dispatches uploaded files to the right extractor.
pub struct ExtractionFacade {
    plain: Arc<dyn Extractor>,
    office: Arc<dyn Extractor>,
    paginated: Arc<dyn Extractor>,
    max_upload_bytes: u64,
    pdf_workers: usize,
    pdf_pool: OnceCell<Arc<Semaphore>>,
    pool_inits: AtomicUsize,
}

impl ExtractionFacade {
    /// Facade with the built-in extractors and default limits.
    pub fn new() -> Self {
        Self::with_extractors(
            Arc::new(PlainTextExtractor),
            Arc::new(OfficeExtractor::new(DEFAULT_MAX_XML_ENTRY_BYTES)),
            Arc::new(PaginatedExtractor),
        )
    }

    /// Facade configured from `[upload]` and `[pdf]`.
    pub fn from_config(config: &Config) -> Self {
        Self::with_extractors(
            Arc::new(PlainTextExtractor),
            Arc::new(OfficeExtractor::new(config.upload.max_xml_entry_bytes)),
            Arc::new(PaginatedExtractor),
        )
        .with_max_upload_bytes(config.upload.max_bytes)
        .with_pdf_workers(config.pdf.workers)
    }

    /// Facade with caller-supplied extractors (one per supported kind).
    pub fn with_extractors(
        plain: Arc<dyn Extractor>,
        office: Arc<dyn Extractor>,
        paginated: Arc<dyn Extractor>,
    ) -> Self {
        Self {
            plain,
            office,
            paginated,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            pdf_workers: DEFAULT_PDF_WORKERS,
            pdf_pool: OnceCell::new(),
            pool_inits: AtomicUsize::new(0),
        }
    }

    pub fn with_max_upload_bytes(mut self, max: u64) -> Self {
        self.max_upload_bytes = max;
        self
    }

    pub fn with_pdf_workers(mut self, workers: usize) -> Self {
        self.pdf_workers = workers.max(1);
        self
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    /// Creates the PDF parser pool if it does not exist yet. Idempotent, and
    /// safe to call from concurrent tasks: only one of them builds the pool.
    pub async fn init(&self) {
        self.pdf_pool().await;
    }

    /// How many times the parser pool has been built (0 or 1).
    pub fn pool_initializations(&self) -> usize {
        self.pool_inits.load(Ordering::SeqCst)
    }

    async fn pdf_pool(&self) -> Arc<Semaphore> {
        self.pdf_pool
            .get_or_init(|| async {
                self.pool_inits.fetch_add(1, Ordering::SeqCst);
                info!(workers = self.pdf_workers, "PDF parser pool ready");
                Arc::new(Semaphore::new(self.pdf_workers))
            })
            .await
            .clone()
    }

    /// Checks the name and size of `file` without extracting anything.
    pub fn validate(&self, file: &UploadedFile) -> Result<FileKind, ExtractError> {
        let kind = detect(&file.name);
        if kind == FileKind::Unsupported {
            let ext = extension(&file.name);
            return Err(ExtractError::UnsupportedFormat {
                extension: if ext.is_empty() {
                    "unknown".to_string()
                } else {
                    ext
                },
            });
        }
        self.check_size(file)?;
        Ok(kind)
    }

    /// Rejects files over the upload limit. A file of exactly the limit passes.
    pub fn check_size(&self, file: &UploadedFile) -> Result<(), ExtractError> {
        let size = file.size_bytes();
        if size > self.max_upload_bytes {
            return Err(ExtractError::OversizeFile {
                name: file.name.clone(),
                size,
                limit: self.max_upload_bytes,
            });
        }
        Ok(())
    }

    fn extractor_for(&self, kind: FileKind) -> Option<Arc<dyn Extractor>> {
        match kind {
            FileKind::PlainText => Some(self.plain.clone()),
            FileKind::OfficeDocument => Some(self.office.clone()),
            FileKind::PaginatedDocument => Some(self.paginated.clone()),
            FileKind::Unsupported => None,
        }
    }

    /// Extracts the text of `file`, or fails without partial output.
    pub async fn extract_text(&self, file: UploadedFile) -> Result<String, ExtractError> {
        let kind = self.validate(&file)?;
        let extractor = self.extractor_for(kind).ok_or_else(|| ExtractError::UnsupportedFormat {
            extension: extension(&file.name),
        })?;
        debug!(file = %file.name, kind = %kind, bytes = file.size_bytes(), "extracting text");

        let UploadedFile { name, raw_bytes } = file;
        let text = match kind {
            FileKind::PlainText => extractor.extract(&raw_bytes, &name)?,
            FileKind::OfficeDocument => run_blocking(extractor, raw_bytes, name.clone()).await?,
            _ => {
                let pool = self.pdf_pool().await;
                let _permit = pool.acquire_owned().await.map_err(|e| ExtractError::Worker {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
                run_blocking(extractor, raw_bytes, name.clone()).await?
            }
        };

        debug!(file = %name, chars = text.chars().count(), "extraction finished");
        Ok(text)
    }
}

impl Default for ExtractionFacade {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_blocking(
    extractor: Arc<dyn Extractor>,
    bytes: Bytes,
    name: String,
) -> Result<String, ExtractError> {
    let worker_name = name.clone();
    tokio::task::spawn_blocking(move || extractor.extract(&bytes, &worker_name))
        .await
        .map_err(|e| ExtractError::Worker {
            name,
            reason: e.to_string(),
        })?
}
