//! In-memory result table persisted as CSV.
//!
//! A run loads the existing file, appends rows, and rewrites the whole file.
//! Item numbers continue from the highest one already present.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::{ExtractedRecord, PaperFields};

/// Fixed column order of the persisted table.
pub const COLUMNS: [&str; 6] = ["item", "file_name", "author", "year", "title", "abstract"];

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("CSV error in {}: {source}", path.display())]
    Csv { path: PathBuf, source: csv::Error },
    #[error("invalid item number 0 in {}, row {row}", path.display())]
    ZeroItem { path: PathBuf, row: usize },
}

/// A persisted row; every column except `item` may be missing or blank.
#[derive(Debug, Deserialize)]
struct StoredRow {
    item: u64,
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    year: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default, rename = "abstract")]
    abstract_text: Option<String>,
}

impl From<StoredRow> for ExtractedRecord {
    fn from(row: StoredRow) -> Self {
        ExtractedRecord::new(
            row.item,
            row.file_name.unwrap_or_default(),
            PaperFields {
                author: row.author.unwrap_or_default(),
                year: row.year.unwrap_or_default(),
                title: row.title.unwrap_or_default(),
                abstract_text: row.abstract_text.unwrap_or_default(),
            },
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResultLedger {
    records: Vec<ExtractedRecord>,
}

impl ResultLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rows from `path`. A missing file gives an empty ledger; so does a
    /// file that cannot be read, after logging the error.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::new();
        }
        match read_records(path) {
            Ok(records) => {
                tracing::info!(path = %path.display(), rows = records.len(), "loaded existing results");
                Self { records }
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to load existing results, starting empty");
                Self::new()
            }
        }
    }

    pub fn records(&self) -> &[ExtractedRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 1 for an empty ledger, otherwise one past the highest item number.
    pub fn next_item_number(&self) -> u64 {
        self.records.iter().map(|r| r.item).max().map_or(1, |m| m + 1)
    }

    /// Append a row, filling blank fields with the sentinel.
    pub fn add_row(
        &mut self,
        item: u64,
        file_name: impl Into<String>,
        fields: PaperFields,
    ) -> &ExtractedRecord {
        self.records
            .push(ExtractedRecord::new(item, file_name, fields));
        &self.records[self.records.len() - 1]
    }

    /// Overwrite `path` with every row, via a temporary file renamed into place.
    pub fn save(&self, path: &Path) -> Result<(), LedgerError> {
        let io_err = |source| LedgerError::Io {
            path: path.to_path_buf(),
            source,
        };
        let csv_err = |source| LedgerError::Csv {
            path: path.to_path_buf(),
            source,
        };

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(io_err)?;

        let tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(tmp);
        writer.write_record(COLUMNS).map_err(csv_err)?;
        for record in &self.records {
            writer.serialize(record).map_err(csv_err)?;
        }
        let tmp = writer.into_inner().map_err(|e| io_err(e.into_error()))?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;

        tracing::debug!(path = %path.display(), rows = self.records.len(), "saved results");
        Ok(())
    }
}

/// Read every row of a persisted table.
pub fn read_records(path: &Path) -> Result<Vec<ExtractedRecord>, LedgerError> {
    let mut reader = csv::Reader::from_path(path).map_err(|source| LedgerError::Csv {
        path: path.to_path_buf(),
        source,
    })?;
    reader
        .deserialize::<StoredRow>()
        .enumerate()
        .map(|(index, row)| {
            let row = row.map_err(|source| LedgerError::Csv {
                path: path.to_path_buf(),
                source,
            })?;
            if row.item == 0 {
                return Err(LedgerError::ZeroItem {
                    path: path.to_path_buf(),
                    row: index + 1,
                });
            }
            Ok(ExtractedRecord::from(row))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NOT_FOUND;

    fn fields(author: &str, title: &str) -> PaperFields {
        PaperFields {
            author: author.into(),
            year: "2021".into(),
            title: title.into(),
            abstract_text: "Abstract text.".into(),
        }
    }

    #[test]
    fn next_item_on_empty_is_one() {
        assert_eq!(ResultLedger::new().next_item_number(), 1);
    }

    #[test]
    fn next_item_follows_max() {
        let mut ledger = ResultLedger::new();
        for item in [1, 2, 5] {
            ledger.add_row(item, format!("{item}.pdf"), PaperFields::not_found());
        }
        assert_eq!(ledger.next_item_number(), 6);
    }

    #[test]
    fn add_row_fills_missing_fields() {
        let mut ledger = ResultLedger::new();
        let record = ledger.add_row(
            1,
            "a.pdf",
            PaperFields {
                author: String::new(),
                ..fields("x", "T")
            },
        );
        assert_eq!(record.author, NOT_FOUND);
        assert_eq!(record.title, "T");
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");

        let mut ledger = ResultLedger::new();
        ledger.add_row(1, "first.pdf", fields("Doe, J.", "Commas, \"quotes\"\nand newlines"));
        ledger.add_row(2, "second.PDF", PaperFields::not_found());
        ledger.add_row(3, "third.pdf", fields("Ñúñez", "Ünïcode"));
        ledger.save(&path).unwrap();

        let loaded = ResultLedger::load(&path);
        assert_eq!(loaded.records(), ledger.records());
        assert_eq!(
            loaded.records().iter().map(|r| r.item).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(loaded.next_item_number(), 4);
    }

    #[test]
    fn save_writes_fixed_header_even_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.csv");
        ResultLedger::new().save(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.trim_end(), "item,file_name,author,year,title,abstract");
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ResultLedger::load(&dir.path().join("absent.csv")).is_empty());
    }

    #[test]
    fn load_corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "item,file_name\nnot-a-number,a.pdf\n").unwrap();
        assert!(ResultLedger::load(&path).is_empty());
    }

    #[test]
    fn load_fills_absent_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.csv");
        std::fs::write(&path, "item,file_name,author\n7,a.pdf,\n").unwrap();
        let ledger = ResultLedger::load(&path);
        let record = &ledger.records()[0];
        assert_eq!(record.item, 7);
        assert_eq!(record.author, NOT_FOUND);
        assert_eq!(record.abstract_text, NOT_FOUND);
        assert_eq!(ledger.next_item_number(), 8);
    }

    #[test]
    fn table_without_item_column_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no_items.csv");
        std::fs::write(&path, "file_name,author\na.pdf,X\nb.pdf,Y\n").unwrap();
        assert!(matches!(read_records(&path), Err(LedgerError::Csv { .. })));
        let ledger = ResultLedger::load(&path);
        assert!(ledger.is_empty());
        assert_eq!(ledger.next_item_number(), 1);
    }

    #[test]
    fn zero_item_number_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zero.csv");
        std::fs::write(&path, "item,file_name\n1,a.pdf\n0,b.pdf\n").unwrap();
        assert!(matches!(
            read_records(&path),
            Err(LedgerError::ZeroItem { row: 2, .. })
        ));
        assert!(ResultLedger::load(&path).is_empty());
    }
}
