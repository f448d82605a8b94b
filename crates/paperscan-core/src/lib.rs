use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod backend;
pub mod client;
pub mod config_file;
pub mod keys;
pub mod ledger;
pub mod model;
pub mod orchestrator;
pub mod response;

// Re-export for convenience
pub use backend::{BackendError, PdfBackend, extract_first_page};
pub use client::{CALL_BUDGET, MAX_INPUT_CHARS, MetadataExtractionClient, RotationState};
pub use config_file::{ConfigFile, PromptConfig};
pub use keys::{ApiKeyPool, DEFAULT_KEY_PREFIX};
pub use ledger::{LedgerError, ResultLedger};
pub use model::{BindError, Generation, GenerativeModel, ModelBinder, RequestError};
pub use orchestrator::{
    AlwaysContinue, BatchOrchestrator, ContinuePolicy, ProcessingUnit, RunOutcome, RunSummary,
};

/// Placeholder written for any metadata field that could not be extracted.
pub const NOT_FOUND: &str = "not found";

/// The four metadata fields extracted from a paper's first page.
///
/// Every field holds either real content or [`NOT_FOUND`]; use
/// [`PaperFields::normalized`] after building one by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperFields {
    pub author: String,
    pub year: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
}

impl PaperFields {
    /// The empty-sentinel record: every field set to [`NOT_FOUND`].
    pub fn not_found() -> Self {
        Self {
            author: NOT_FOUND.to_string(),
            year: NOT_FOUND.to_string(),
            title: NOT_FOUND.to_string(),
            abstract_text: NOT_FOUND.to_string(),
        }
    }

    /// Trim every field and replace blanks with [`NOT_FOUND`].
    pub fn normalized(self) -> Self {
        Self {
            author: or_not_found(self.author),
            year: or_not_found(self.year),
            title: or_not_found(self.title),
            abstract_text: or_not_found(self.abstract_text),
        }
    }

    /// True when no field carries real content.
    pub fn is_not_found(&self) -> bool {
        [&self.author, &self.year, &self.title, &self.abstract_text]
            .iter()
            .all(|f| f.as_str() == NOT_FOUND)
    }
}

impl Default for PaperFields {
    fn default() -> Self {
        Self::not_found()
    }
}

/// Trim `value`, substituting [`NOT_FOUND`] when nothing is left.
pub fn or_not_found(value: String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        NOT_FOUND.to_string()
    } else if trimmed.len() == value.len() {
        value
    } else {
        trimmed.to_string()
    }
}

/// One row of the output table.
///
/// Field order is the column order of the persisted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    pub item: u64,
    pub file_name: String,
    pub author: String,
    pub year: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
}

impl ExtractedRecord {
    pub fn new(item: u64, file_name: impl Into<String>, fields: PaperFields) -> Self {
        let fields = fields.normalized();
        Self {
            item,
            file_name: or_not_found(file_name.into()),
            author: fields.author,
            year: fields.year,
            title: fields.title,
            abstract_text: fields.abstract_text,
        }
    }

    pub fn fields(&self) -> PaperFields {
        PaperFields {
            author: self.author.clone(),
            year: self.year.clone(),
            title: self.title.clone(),
            abstract_text: self.abstract_text.clone(),
        }
    }
}

/// Fatal configuration problems, raised before any document is processed.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no API keys found: set {prefix}_1 (and optionally {prefix}_2, ...)")]
    NoApiKeys { prefix: String },
    #[error("config file not found at {}", .0.display())]
    Missing(PathBuf),
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed config file {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Progress events emitted while a batch runs.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    UnitsDiscovered {
        units: Vec<String>,
    },
    UnitStarted {
        index: usize,
        total: usize,
        name: String,
        documents: usize,
    },
    DocumentStarted {
        item: u64,
        file_name: String,
    },
    DocumentFinished {
        record: ExtractedRecord,
    },
    UnitFinished {
        index: usize,
        total: usize,
        name: String,
        rows: usize,
    },
    /// The operator declined to continue after `after`.
    Aborted {
        after: String,
    },
    Saved {
        path: PathBuf,
        rows: usize,
    },
    SaveFailed {
        path: PathBuf,
        message: String,
    },
}
