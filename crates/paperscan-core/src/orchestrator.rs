//! Sequential batch driver over `part_<N>` folders.
//!
//! Units run in numeric order, documents one at a time. Every PDF found
//! yields exactly one ledger row; anything that goes wrong for a document
//! produces the empty-sentinel row instead of stopping the run.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::backend::{PdfBackend, extract_first_page};
use crate::client::MetadataExtractionClient;
use crate::ledger::ResultLedger;
use crate::{ExtractedRecord, PaperFields, ProgressEvent};

static UNIT_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^part_(\d+)$").unwrap());

/// One `part_<N>` folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingUnit {
    pub number: u64,
    pub name: String,
    pub path: PathBuf,
}

/// Immediate subdirectories of `base` named `part_<N>`, sorted by `N`.
pub fn discover_units(base: &Path) -> std::io::Result<Vec<ProcessingUnit>> {
    let mut units = Vec::new();
    for entry in std::fs::read_dir(base)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(number) = UNIT_NAME_RE
            .captures(&name)
            .and_then(|c| c[1].parse::<u64>().ok())
        else {
            continue;
        };
        if !entry.path().is_dir() {
            continue;
        }
        units.push(ProcessingUnit {
            number,
            name,
            path: entry.path(),
        });
    }
    units.sort_by(|a, b| a.number.cmp(&b.number).then_with(|| a.name.cmp(&b.name)));
    Ok(units)
}

/// Files in `dir` ending in `.pdf` (any case), sorted by file name.
pub fn list_pdfs(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
        if is_pdf && path.is_file() {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Decides whether to go on after a unit finishes.
pub trait ContinuePolicy {
    fn should_continue(&mut self, finished: &ProcessingUnit, next: &ProcessingUnit) -> bool;
}

/// Non-interactive policy: always run every unit.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysContinue;

impl ContinuePolicy for AlwaysContinue {
    fn should_continue(&mut self, _finished: &ProcessingUnit, _next: &ProcessingUnit) -> bool {
        true
    }
}

impl<F> ContinuePolicy for F
where
    F: FnMut(&ProcessingUnit, &ProcessingUnit) -> bool,
{
    fn should_continue(&mut self, finished: &ProcessingUnit, next: &ProcessingUnit) -> bool {
        self(finished, next)
    }
}

/// Totals for a finished (or aborted) run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub units_total: usize,
    pub units_processed: usize,
    pub rows_added: usize,
    /// Rows where every metadata field is the sentinel.
    pub rows_not_found: usize,
    pub aborted: bool,
    pub saved: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// No `part_<N>` folders were found; nothing was written.
    NoUnits,
    Completed(RunSummary),
}

pub struct BatchOrchestrator {
    client: MetadataExtractionClient,
    backend: Box<dyn PdfBackend>,
    ledger: ResultLedger,
    output_path: PathBuf,
    checkpoint_each_unit: bool,
}

impl BatchOrchestrator {
    pub fn new(
        client: MetadataExtractionClient,
        backend: Box<dyn PdfBackend>,
        ledger: ResultLedger,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            backend,
            ledger,
            output_path: output_path.into(),
            checkpoint_each_unit: false,
        }
    }

    /// Save the ledger after every unit as well as at the end.
    pub fn with_checkpoints(mut self, enabled: bool) -> Self {
        self.checkpoint_each_unit = enabled;
        self
    }

    pub fn ledger(&self) -> &ResultLedger {
        &self.ledger
    }

    /// Process every unit under `base`, then persist the ledger.
    pub async fn run(
        &mut self,
        base: &Path,
        policy: &mut dyn ContinuePolicy,
        progress: &(dyn Fn(ProgressEvent) + Send + Sync),
    ) -> RunOutcome {
        let units = match discover_units(base) {
            Ok(units) => units,
            Err(e) => {
                tracing::error!(path = %base.display(), error = %e, "cannot list input directory");
                Vec::new()
            }
        };
        if units.is_empty() {
            return RunOutcome::NoUnits;
        }
        progress(ProgressEvent::UnitsDiscovered {
            units: units.iter().map(|u| u.name.clone()).collect(),
        });

        let mut summary = RunSummary {
            units_total: units.len(),
            ..RunSummary::default()
        };
        let mut next_item = self.ledger.next_item_number();

        for (index, unit) in units.iter().enumerate() {
            self.client.reset_rotation();

            let files = list_pdfs(&unit.path).unwrap_or_else(|e| {
                tracing::warn!(unit = %unit.name, error = %e, "cannot list unit, skipping its files");
                Vec::new()
            });
            progress(ProgressEvent::UnitStarted {
                index,
                total: units.len(),
                name: unit.name.clone(),
                documents: files.len(),
            });

            for path in &files {
                let record = self.process_document(path, next_item, progress).await;
                next_item += 1;
                summary.rows_added += 1;
                if record.fields().is_not_found() {
                    summary.rows_not_found += 1;
                }
                progress(ProgressEvent::DocumentFinished { record });
            }

            summary.units_processed += 1;
            progress(ProgressEvent::UnitFinished {
                index,
                total: units.len(),
                name: unit.name.clone(),
                rows: files.len(),
            });

            if let Some(next) = units.get(index + 1) {
                if self.checkpoint_each_unit {
                    self.persist(progress);
                }
                if !policy.should_continue(unit, next) {
                    tracing::info!(unit = %unit.name, "run stopped by operator");
                    progress(ProgressEvent::Aborted {
                        after: unit.name.clone(),
                    });
                    summary.aborted = true;
                    break;
                }
            }
        }

        summary.saved = self.persist(progress);
        RunOutcome::Completed(summary)
    }

    async fn process_document(
        &mut self,
        path: &Path,
        item: u64,
        progress: &(dyn Fn(ProgressEvent) + Send + Sync),
    ) -> ExtractedRecord {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        progress(ProgressEvent::DocumentStarted {
            item,
            file_name: file_name.clone(),
        });

        let text = extract_first_page(&*self.backend, path);
        let fields = if text.trim().is_empty() {
            PaperFields::not_found()
        } else {
            self.client.extract(&text).await
        };

        self.ledger.add_row(item, file_name, fields).clone()
    }

    fn persist(&self, progress: &(dyn Fn(ProgressEvent) + Send + Sync)) -> bool {
        match self.ledger.save(&self.output_path) {
            Ok(()) => {
                progress(ProgressEvent::Saved {
                    path: self.output_path.clone(),
                    rows: self.ledger.len(),
                });
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to save results");
                progress(ProgressEvent::SaveFailed {
                    path: self.output_path.clone(),
                    message: e.to_string(),
                });
                false
            }
        }
    }
}
