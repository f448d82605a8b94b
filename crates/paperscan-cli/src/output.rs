use std::io::Write;
use std::path::Path;

use owo_colors::OwoColorize;
use paperscan_core::{ExtractedRecord, ProgressEvent, RunSummary};

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

fn shorten(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        format!("{}...", s.chars().take(max).collect::<String>())
    } else {
        s.to_string()
    }
}

fn describe(record: &ExtractedRecord) -> String {
    format!("{} ({})", shorten(&record.author, 60), record.year)
}

/// Print a real-time progress event.
pub fn print_progress(
    w: &mut dyn Write,
    event: &ProgressEvent,
    color: ColorMode,
) -> std::io::Result<()> {
    match event {
        ProgressEvent::UnitsDiscovered { units } => {
            writeln!(w, "Found {} folders: {}", units.len(), units.join(", "))?;
        }
        ProgressEvent::UnitStarted {
            index,
            total,
            name,
            documents,
        } => {
            let header = format!(
                "=== {} ({}/{}): {} PDFs ===",
                name,
                index + 1,
                total,
                documents
            );
            writeln!(w)?;
            if color.enabled() {
                writeln!(w, "{}", header.bold())?;
            } else {
                writeln!(w, "{}", header)?;
            }
        }
        ProgressEvent::DocumentStarted { .. } => {}
        ProgressEvent::DocumentFinished { record } => {
            if record.fields().is_not_found() {
                let line = format!(
                    "  [{}] {}: no metadata extracted",
                    record.item, record.file_name
                );
                if color.enabled() {
                    writeln!(w, "{}", line.yellow())?;
                } else {
                    writeln!(w, "{}", line)?;
                }
            } else if color.enabled() {
                writeln!(
                    w,
                    "  [{}] {}: {}",
                    record.item,
                    record.file_name,
                    describe(record).green()
                )?;
            } else {
                writeln!(
                    w,
                    "  [{}] {}: {}",
                    record.item,
                    record.file_name,
                    describe(record)
                )?;
            }
        }
        ProgressEvent::UnitFinished { name, rows, .. } => {
            let line = format!("Finished {}: {} rows", name, rows);
            if color.enabled() {
                writeln!(w, "{}", line.dimmed())?;
            } else {
                writeln!(w, "{}", line)?;
            }
        }
        ProgressEvent::Aborted { after } => {
            let line = format!("Stopped by user after {}", after);
            if color.enabled() {
                writeln!(w, "{}", line.yellow())?;
            } else {
                writeln!(w, "{}", line)?;
            }
        }
        ProgressEvent::Saved { path, rows } => {
            let line = format!("Saved {} rows to {}", rows, path.display());
            if color.enabled() {
                writeln!(w, "{}", line.green())?;
            } else {
                writeln!(w, "{}", line)?;
            }
        }
        ProgressEvent::SaveFailed { path, message } => {
            let line = format!("Failed to save results to {}: {}", path.display(), message);
            if color.enabled() {
                writeln!(w, "{}", line.red().bold())?;
            } else {
                writeln!(w, "{}", line)?;
            }
        }
    }
    Ok(())
}

/// Print the end-of-run totals.
pub fn print_summary(
    w: &mut dyn Write,
    summary: &RunSummary,
    output: &Path,
    color: ColorMode,
) -> std::io::Result<()> {
    writeln!(w)?;
    if color.enabled() {
        writeln!(w, "{}", "Summary".bold().underline())?;
    } else {
        writeln!(w, "Summary")?;
        writeln!(w, "-------")?;
    }
    writeln!(
        w,
        "  Folders processed: {}/{}",
        summary.units_processed, summary.units_total
    )?;
    writeln!(w, "  Rows added:        {}", summary.rows_added)?;
    writeln!(w, "  Without metadata:  {}", summary.rows_not_found)?;

    if summary.saved {
        writeln!(w, "  Results:           {}", output.display())?;
    } else if color.enabled() {
        writeln!(
            w,
            "  {}",
            "Results were NOT saved; see the log for details.".red()
        )?;
    } else {
        writeln!(w, "  Results were NOT saved; see the log for details.")?;
    }
    Ok(())
}
