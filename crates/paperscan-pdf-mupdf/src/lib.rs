use std::path::Path;

use mupdf::{Document, TextPageFlags};

use paperscan_core::{BackendError, PdfBackend};

/// MuPDF-based implementation of [`PdfBackend`].
///
/// This crate isolates the mupdf dependency (AGPL-3.0) so that the core
/// crate and its tests do not transitively depend on it.
#[derive(Debug, Clone, Copy, Default)]
pub struct MupdfBackend;

impl MupdfBackend {
    pub fn new() -> Self {
        Self
    }
}

impl PdfBackend for MupdfBackend {
    fn first_page_text(&self, path: &Path) -> Result<String, BackendError> {
        if !path.exists() {
            return Err(BackendError::OpenError(format!(
                "file not found: {}",
                path.display()
            )));
        }
        let path_str = path
            .to_str()
            .ok_or_else(|| BackendError::OpenError("invalid path encoding".into()))?;

        let document =
            Document::open(path_str).map_err(|e| BackendError::OpenError(e.to_string()))?;

        let page_count = document
            .page_count()
            .map_err(|e| BackendError::ExtractionError(e.to_string()))?;
        if page_count == 0 {
            return Ok(String::new());
        }

        let page = document
            .load_page(0)
            .map_err(|e| BackendError::ExtractionError(e.to_string()))?;
        let text_page = page
            .to_text_page(TextPageFlags::empty())
            .map_err(|e| BackendError::ExtractionError(e.to_string()))?;

        // Block/line iteration keeps reading order and line breaks.
        let mut text = String::new();
        for block in text_page.blocks() {
            for line in block.lines() {
                let line_text: String = line
                    .chars()
                    .map(|c| c.char().unwrap_or('\u{FFFD}'))
                    .collect();
                text.push_str(&line_text);
                text.push('\n');
            }
        }

        Ok(text)
    }
}
