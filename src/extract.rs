//! Text extraction strategies for uploaded documents.
//!
//! Each strategy turns raw bytes into one UTF-8 string and implements
//! [`Extractor`]. The [`crate::extraction`] facade picks the strategy from the
//! file's [`FileKind`]; extractors never see unsupported files.
//!
//! | Kind | Strategy |
//! |------|----------|
//! | `.md` | strict UTF-8 decode, no transformation |
//! | `.docx` | text runs of `word/document.xml`, one paragraph per block |
//! | `.pdf` | page-by-page text items, pages joined by a blank line, trimmed |

use std::io::Read;

use quick_xml::events::Event;
use thiserror::Error;

use crate::detect::FileKind;

/// Default bound on a single decompressed ZIP entry (zip-bomb protection).
pub const DEFAULT_MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// The part of a WordprocessingML package holding the main body.
const DOCX_BODY_PART: &str = "word/document.xml";

/// Everything that can go wrong between "file selected" and "text ready".
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Unsupported file type: {extension}. Use .md, .docx, or .pdf.")]
    UnsupportedFormat { extension: String },

    #[error("File size exceeds {}MB limit ({name}: {size} bytes).", .limit / (1024 * 1024))]
    OversizeFile { name: String, size: u64, limit: u64 },

    #[error("failed to read plain text '{name}': {reason}")]
    PlainText { name: String, reason: String },

    #[error("failed to read office document '{name}': {reason}")]
    Office { name: String, reason: String },

    #[error("failed to read PDF '{name}': {reason}")]
    Paginated { name: String, reason: String },

    #[error("extraction worker for '{name}' did not finish: {reason}")]
    Worker { name: String, reason: String },
}

impl ExtractError {
    /// Builds the extractor-specific failure for `kind`.
    pub fn failed(kind: FileKind, name: &str, reason: impl Into<String>) -> Self {
        let name = name.to_string();
        let reason = reason.into();
        match kind {
            FileKind::PlainText => ExtractError::PlainText { name, reason },
            FileKind::OfficeDocument => ExtractError::Office { name, reason },
            FileKind::PaginatedDocument => ExtractError::Paginated { name, reason },
            FileKind::Unsupported => ExtractError::UnsupportedFormat {
                extension: crate::detect::extension(&name),
            },
        }
    }

    /// True when a selected extractor ran and could not produce text.
    pub fn is_extraction_failure(&self) -> bool {
        matches!(
            self,
            ExtractError::PlainText { .. }
                | ExtractError::Office { .. }
                | ExtractError::Paginated { .. }
                | ExtractError::Worker { .. }
        )
    }
}

/// A strategy converting the raw bytes of one file kind into text.
///
/// `filename` is only used for diagnostics.
pub trait Extractor: Send + Sync {
    /// The kind this extractor handles.
    fn kind(&self) -> FileKind;

    fn extract(&self, bytes: &[u8], filename: &str) -> Result<String, ExtractError>;
}

// ============ Plain text ============

/// Decodes bytes as UTF-8, verbatim.
///
/// Malformed input is a hard failure rather than replacement-character
/// substitution, so a mis-labelled binary never reaches the backend as noise.
#[derive(Debug, Default, Clone)]
pub struct PlainTextExtractor;

impl Extractor for PlainTextExtractor {
    fn kind(&self) -> FileKind {
        FileKind::PlainText
    }

    fn extract(&self, bytes: &[u8], filename: &str) -> Result<String, ExtractError> {
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|e| {
                ExtractError::failed(
                    FileKind::PlainText,
                    filename,
                    format!("invalid UTF-8 at byte {}", e.valid_up_to()),
                )
            })
    }
}

// ============ Office documents ============

/// Extracts the raw text runs of a `.docx` package.
///
/// Formatting, images, and tables-as-structure are dropped. Each paragraph
/// is followed by a blank line; `<w:tab/>` becomes a tab and `<w:br/>` /
/// `<w:cr/>` a newline. Text inside `mc:Fallback` is skipped because it
/// duplicates the preferred `mc:Choice` content.
#[derive(Debug, Clone)]
pub struct OfficeExtractor {
    max_entry_bytes: u64,
}

impl OfficeExtractor {
    pub fn new(max_entry_bytes: u64) -> Self {
        Self { max_entry_bytes }
    }
}

impl Default for OfficeExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_XML_ENTRY_BYTES)
    }
}

impl Extractor for OfficeExtractor {
    fn kind(&self) -> FileKind {
        FileKind::OfficeDocument
    }

    fn extract(&self, bytes: &[u8], filename: &str) -> Result<String, ExtractError> {
        let fail = |reason: String| ExtractError::failed(FileKind::OfficeDocument, filename, reason);

        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
            .map_err(|e| fail(format!("not a valid document container: {}", e)))?;
        let xml = read_zip_entry_bounded(&mut archive, DOCX_BODY_PART, self.max_entry_bytes)
            .map_err(fail)?;
        extract_docx_runs(&xml).map_err(fail)
    }
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, String> {
    let entry = archive.by_name(name).map_err(|e| match e {
        zip::result::ZipError::FileNotFound => format!("{} not found", name),
        other => other.to_string(),
    })?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| e.to_string())?;
    if out.len() as u64 >= max_bytes {
        return Err(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        ));
    }
    Ok(out)
}

fn extract_docx_runs(xml: &[u8]) -> Result<String, String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    let mut fallback_depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"Fallback" => fallback_depth += 1,
                b"t" if fallback_depth == 0 => in_text = true,
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"Fallback" => fallback_depth = fallback_depth.saturating_sub(1),
                b"t" => in_text = false,
                b"p" if fallback_depth == 0 => out.push_str("\n\n"),
                _ => {}
            },
            Ok(Event::Empty(e)) if fallback_depth == 0 => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" | b"cr" => out.push('\n'),
                b"p" => out.push_str("\n\n"),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(|e| e.to_string())?;
                out.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(format!(
                    "malformed XML at position {}: {}",
                    reader.error_position(),
                    e
                ))
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

// ============ Paginated documents ============

/// Extracts PDF text page by page, in page order.
///
/// Every text-showing operation (`Tj`, `TJ`, `'`, `"`) on a page is one
/// content item, so runs inside one text object or across a font switch
/// stay separate. Items on a page are joined with a single space, pages
/// with `"\n\n"`, and the result is trimmed. Any page that fails to parse
/// aborts the whole extraction.
#[derive(Debug, Default, Clone)]
pub struct PaginatedExtractor;

impl PaginatedExtractor {
    /// Text items of each page, in page order (page 1 first).
    pub fn page_items(&self, bytes: &[u8], filename: &str) -> Result<Vec<Vec<String>>, ExtractError> {
        let fail =
            |reason: String| ExtractError::failed(FileKind::PaginatedDocument, filename, reason);

        let doc = lopdf::Document::load_mem(bytes)
            .map_err(|e| fail(format!("cannot open document: {}", e)))?;
        if doc.is_encrypted() {
            return Err(fail("encrypted documents are not supported".to_string()));
        }

        // BTreeMap keyed by 1-based page number, so iteration is page order.
        let pages = doc.get_pages();
        let mut out = Vec::with_capacity(pages.len());
        for (&number, &page_id) in &pages {
            let items = page_text_items(&doc, page_id)
                .map_err(|e| fail(format!("page {} of {}: {}", number, pages.len(), e)))?;
            out.push(items);
        }
        Ok(out)
    }
}

/// One trimmed, non-empty string per text-showing operator on the page.
fn page_text_items(doc: &lopdf::Document, page_id: lopdf::ObjectId) -> lopdf::Result<Vec<String>> {
    let encodings = doc
        .get_page_fonts(page_id)?
        .into_iter()
        .map(|(name, font)| font.get_font_encoding(doc).map(|enc| (name, enc)))
        .collect::<lopdf::Result<std::collections::BTreeMap<_, _>>>()?;
    let content = lopdf::content::Content::decode(&doc.get_page_content(page_id)?)?;

    let mut items = Vec::new();
    let mut encoding = None;
    for op in &content.operations {
        match op.operator.as_str() {
            "Tf" => {
                encoding = match op.operands.first() {
                    Some(font) => encodings.get(font.as_name()?),
                    None => None,
                };
            }
            "Tj" | "TJ" | "'" | "\"" => {
                // text shown before any font is selected cannot be decoded
                let Some(enc) = encoding else { continue };
                let mut text = String::new();
                show_text(&mut text, enc, &op.operands)?;
                let text = text.trim();
                if !text.is_empty() {
                    items.push(text.to_string());
                }
            }
            _ => {}
        }
    }
    Ok(items)
}

/// Decodes the string operands of one show-text operator. Large negative
/// `TJ` adjustments are word gaps and become a space.
fn show_text(
    text: &mut String,
    encoding: &lopdf::Encoding,
    operands: &[lopdf::Object],
) -> lopdf::Result<()> {
    for operand in operands {
        match operand {
            lopdf::Object::String(bytes, _) => {
                text.push_str(&lopdf::Document::decode_text(encoding, bytes)?)
            }
            lopdf::Object::Array(parts) => show_text(text, encoding, parts)?,
            lopdf::Object::Integer(gap) if *gap < -100 => text.push(' '),
            lopdf::Object::Real(gap) if *gap < -100.0 => text.push(' '),
            _ => {}
        }
    }
    Ok(())
}

impl Extractor for PaginatedExtractor {
    fn kind(&self) -> FileKind {
        FileKind::PaginatedDocument
    }

    fn extract(&self, bytes: &[u8], filename: &str) -> Result<String, ExtractError> {
        let pages = self.page_items(bytes, filename)?;
        Ok(join_pages(&pages))
    }
}

/// Joins page items with a space, pages with a blank line, then trims.
pub fn join_pages(pages: &[Vec<String>]) -> String {
    pages
        .iter()
        .map(|items| items.join(" "))
        .collect::<Vec<_>>()
        .join("\n\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with_body(body: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file(DOCX_BODY_PART, zip::write::SimpleFileOptions::default())
                .unwrap();
            let xml = format!(
                "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\" xmlns:mc=\"http://schemas.openxmlformats.org/markup-compatibility/2006\"><w:body>{}</w:body></w:document>",
                body
            );
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn plain_text_is_verbatim() {
        let input = "# Title\n\n  indented ünïcödé 🚀\r\n";
        let out = PlainTextExtractor
            .extract(input.as_bytes(), "notes.md")
            .unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn plain_text_rejects_malformed_utf8() {
        let err = PlainTextExtractor
            .extract(&[b'o', b'k', 0xC3, 0x28], "bad.md")
            .unwrap_err();
        assert!(matches!(err, ExtractError::PlainText { .. }));
        assert!(err.to_string().contains("bad.md"));
        assert!(err.is_extraction_failure());
    }

    #[test]
    fn docx_runs_are_concatenated() {
        let bytes = docx_with_body(
            "<w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t xml:space=\"preserve\"> world</w:t></w:r></w:p>",
        );
        let out = OfficeExtractor::default().extract(&bytes, "a.docx").unwrap();
        assert_eq!(out, "Hello world\n\n");
    }

    #[test]
    fn docx_paragraphs_tabs_and_breaks() {
        let bytes = docx_with_body(
            "<w:p><w:r><w:t>one</w:t><w:tab/><w:t>two</w:t></w:r></w:p><w:p><w:r><w:t>three</w:t><w:br/><w:t>four &amp; five</w:t></w:r></w:p>",
        );
        let out = OfficeExtractor::default().extract(&bytes, "a.docx").unwrap();
        assert_eq!(out, "one\ttwo\n\nthree\nfour & five\n\n");
    }

    #[test]
    fn docx_skips_fallback_content() {
        let bytes = docx_with_body(
            "<w:p><w:r><mc:AlternateContent><mc:Choice><w:t>shape</w:t></mc:Choice><mc:Fallback><w:p><w:r><w:t>shape</w:t></w:r></w:p></mc:Fallback></mc:AlternateContent></w:r></w:p>",
        );
        let out = OfficeExtractor::default().extract(&bytes, "a.docx").unwrap();
        assert_eq!(out, "shape\n\n");
    }

    #[test]
    fn docx_invalid_zip_is_an_office_error() {
        let err = OfficeExtractor::default()
            .extract(b"not a zip", "broken.docx")
            .unwrap_err();
        assert!(matches!(err, ExtractError::Office { .. }));
    }

    #[test]
    fn docx_missing_body_part_is_reported() {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("docProps/core.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"<x/>").unwrap();
            zip.finish().unwrap();
        }
        let err = OfficeExtractor::default().extract(&buf, "empty.docx").unwrap_err();
        assert!(err.to_string().contains("word/document.xml not found"));
    }

    #[test]
    fn docx_entry_over_limit_is_rejected() {
        let bytes = docx_with_body("<w:p><w:r><w:t>this body is longer than the limit</w:t></w:r></w:p>");
        let err = OfficeExtractor::new(64).extract(&bytes, "big.docx").unwrap_err();
        assert!(err.to_string().contains("exceeds size limit"));
    }

    #[test]
    fn invalid_pdf_is_a_paginated_error() {
        let err = PaginatedExtractor.extract(b"not a pdf", "scan.pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Paginated { .. }));
        assert!(err.to_string().contains("scan.pdf"));
    }

    #[test]
    fn pages_join_with_blank_line_and_trim() {
        let pages = vec![
            vec!["  A".to_string()],
            vec!["B".to_string(), "b2".to_string()],
            vec!["C  ".to_string()],
        ];
        assert_eq!(join_pages(&pages), "A\n\nB b2\n\nC");
    }

    #[test]
    fn empty_page_list_joins_to_empty_string() {
        assert_eq!(join_pages(&[]), "");
    }

    #[test]
    fn unsupported_error_lists_accepted_extensions() {
        let err = ExtractError::UnsupportedFormat {
            extension: ".png".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Unsupported file type: .png. Use .md, .docx, or .pdf."
        );
    }
}
