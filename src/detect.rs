//! File kind detection from a filename.
//!
//! The kind selects which extractor the [`crate::extraction`] facade runs.
//! Detection looks only at the last extension, compared case-insensitively.

use std::fmt;

/// Extensions accepted at the upload boundary, in display order.
pub const ACCEPTED_EXTENSIONS: [&str; 3] = [".md", ".docx", ".pdf"];

/// The extraction strategy a file maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// Markdown / plain UTF-8 text (`.md`).
    PlainText,
    /// WordprocessingML container (`.docx`).
    OfficeDocument,
    /// Page-described document (`.pdf`).
    PaginatedDocument,
    /// Anything else.
    Unsupported,
}

impl FileKind {
    /// Short label used in error messages and logs.
    pub fn label(&self) -> &'static str {
        match self {
            FileKind::PlainText => "plain text",
            FileKind::OfficeDocument => "office document",
            FileKind::PaginatedDocument => "PDF",
            FileKind::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Returns the lower-cased extension of `filename`, including the leading dot.
///
/// Returns an empty string when the name has no `.` at all.
pub fn extension(filename: &str) -> String {
    match filename.rfind('.') {
        Some(idx) => filename[idx..].to_lowercase(),
        None => String::new(),
    }
}

/// Maps a filename to its [`FileKind`]. Total: never fails.
pub fn detect(filename: &str) -> FileKind {
    match extension(filename).as_str() {
        ".md" => FileKind::PlainText,
        ".docx" => FileKind::OfficeDocument,
        ".pdf" => FileKind::PaginatedDocument,
        _ => FileKind::Unsupported,
    }
}
