use std::path::Path;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("failed to open PDF: {0}")]
    OpenError(String),
    #[error("failed to extract text: {0}")]
    ExtractionError(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait for PDF text extraction backends.
///
/// Implementors only need to read the first page; metadata extraction
/// never looks further into a document.
pub trait PdfBackend: Send + Sync {
    /// Text of the first page. A document with no pages, or a first page
    /// without a text layer, yields an empty string.
    fn first_page_text(&self, path: &Path) -> Result<String, BackendError>;
}

/// First-page text of `path`, or an empty string if it cannot be read.
pub fn extract_first_page(backend: &dyn PdfBackend, path: &Path) -> String {
    match backend.first_page_text(path) {
        Ok(text) => {
            if text.trim().is_empty() {
                tracing::warn!(file = %path.display(), "no text on first page");
            }
            text
        }
        Err(e) => {
            tracing::warn!(file = %path.display(), error = %e, "could not extract first page");
            String::new()
        }
    }
}
