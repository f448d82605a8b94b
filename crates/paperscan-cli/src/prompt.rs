use std::io::{BufRead, Write};

use paperscan_core::{ContinuePolicy, ProcessingUnit};

/// Asks on the terminal before moving on to the next folder.
///
/// Anything other than an explicit yes stops the run, including end of input.
pub struct StdinConfirm<R, W> {
    input: R,
    output: W,
}

impl StdinConfirm<std::io::StdinLock<'static>, std::io::Stderr> {
    pub fn terminal() -> Self {
        Self::new(std::io::stdin().lock(), std::io::stderr())
    }
}

impl<R: BufRead, W: Write> StdinConfirm<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

impl<R: BufRead, W: Write> ContinuePolicy for StdinConfirm<R, W> {
    fn should_continue(&mut self, finished: &ProcessingUnit, next: &ProcessingUnit) -> bool {
        let _ = write!(
            self.output,
            "\n{} completed. Continue with {}? [y/N] ",
            finished.name, next.name
        );
        let _ = self.output.flush();

        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) => false,
            Ok(_) => is_yes(&line),
            Err(e) => {
                tracing::warn!(error = %e, "could not read answer, stopping");
                false
            }
        }
    }
}
