use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use paperscan_core::config_file::{self, DEFAULT_CONFIG_PATH, ModelConfig, PathsConfig, RunConfig};
use paperscan_core::{
    AlwaysContinue, BatchOrchestrator, ConfigFile, ContinuePolicy, MetadataExtractionClient,
    ProgressEvent, ResultLedger, RunOutcome, extract_first_page,
};
use paperscan_pdf_mupdf::MupdfBackend;

mod output;
mod prompt;

use output::ColorMode;
use prompt::StdinConfirm;

/// Batch metadata extraction for academic PDFs
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log debug details to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract author, year, title and abstract from every part_<N> folder
    Run {
        /// Path to the TOML prompt config
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Directory holding the part_<N> folders
        #[arg(long)]
        input: Option<PathBuf>,

        /// Result table to load and rewrite
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Model name
        #[arg(long)]
        model: Option<String>,

        /// Request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Environment variable prefix for API keys (<PREFIX>_1, <PREFIX>_2, ...)
        #[arg(long)]
        key_prefix: Option<String>,

        /// Process every folder without asking between them
        #[arg(short = 'y', long)]
        yes: bool,

        /// Save the results after every folder
        #[arg(long)]
        checkpoint: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Print the text of a PDF's first page
    FirstPage {
        /// Path to the PDF
        file_path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::FirstPage { file_path } => {
            let text = extract_first_page(&MupdfBackend::new(), &file_path);
            if text.trim().is_empty() {
                anyhow::bail!("no text extracted from {}", file_path.display());
            }
            print!("{}", text);
            Ok(())
        }
        Command::Run {
            config,
            input,
            output,
            model,
            timeout,
            key_prefix,
            yes,
            checkpoint,
            no_color,
        } => {
            let mut config = config_file::load_from_path(&config)
                .with_context(|| format!("cannot load config {}", config.display()))?;
            apply_overrides(&mut config, input, output, model, timeout, key_prefix);
            run(config, yes, checkpoint, ColorMode(!no_color)).await
        }
    }
}

/// Targets raised to debug by `--verbose`, on top of `RUST_LOG`.
const VERBOSE_DIRECTIVES: [&str; 3] = [
    "paperscan=debug",
    "paperscan_core=debug",
    "paperscan_pdf_mupdf=debug",
];

fn log_filter(verbose: bool, rust_log: Option<&str>) -> EnvFilter {
    let mut filter = rust_log
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"));
    if verbose {
        for directive in VERBOSE_DIRECTIVES {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }
    }
    filter
}

fn init_tracing(verbose: bool) {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(log_filter(verbose, rust_log.as_deref()))
        .init();
}

/// Command-line flags take precedence over the config file.
fn apply_overrides(
    config: &mut ConfigFile,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    model: Option<String>,
    timeout: Option<u64>,
    key_prefix: Option<String>,
) {
    if model.is_some() || timeout.is_some() {
        let section = config.model.get_or_insert_with(ModelConfig::default);
        if model.is_some() {
            section.name = model;
        }
        if timeout.is_some() {
            section.timeout_secs = timeout;
        }
    }
    if input.is_some() || output.is_some() {
        let section = config.paths.get_or_insert_with(PathsConfig::default);
        if let Some(input) = input {
            section.input_dir = Some(input.to_string_lossy().into_owned());
        }
        if let Some(output) = output {
            section.output_file = Some(output.to_string_lossy().into_owned());
        }
    }
    if key_prefix.is_some() {
        config.run.get_or_insert_with(RunConfig::default).key_prefix = key_prefix;
    }
}

fn ensure_dirs(input: &Path, output: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(input)
        .with_context(|| format!("cannot create input directory {}", input.display()))?;
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create output directory {}", parent.display()))?;
    }
    Ok(())
}

async fn run(config: ConfigFile, yes: bool, checkpoint: bool, color: ColorMode) -> anyhow::Result<()> {
    let client = MetadataExtractionClient::gemini(&config)?;

    let input = config.input_dir();
    let output = config.output_file();
    ensure_dirs(&input, &output)?;

    let mut stdout = std::io::stdout();
    writeln!(
        stdout,
        "Using {} API key(s), results in {}",
        client.pool_size(),
        output.display()
    )?;
    let ledger = ResultLedger::load(&output);
    let mut orchestrator = BatchOrchestrator::new(
        client,
        Box::new(MupdfBackend::new()),
        ledger,
        output.clone(),
    )
    .with_checkpoints(checkpoint || config.checkpoint_each_unit());

    let mut policy: Box<dyn ContinuePolicy> = if yes {
        Box::new(AlwaysContinue)
    } else {
        Box::new(StdinConfirm::terminal())
    };

    let reporter = Reporter::new(color);
    let outcome = orchestrator
        .run(&input, policy.as_mut(), &|event| reporter.handle(event))
        .await;

    match outcome {
        RunOutcome::NoUnits => {
            writeln!(
                stdout,
                "No part_<N> folders found in {}. Nothing to do.",
                input.display()
            )?;
        }
        RunOutcome::Completed(summary) => {
            output::print_summary(&mut stdout, &summary, &output, color)?;
        }
    }
    Ok(())
}

/// Prints progress events and drives one bar per folder.
struct Reporter {
    color: ColorMode,
    bar: Mutex<Option<ProgressBar>>,
}

impl Reporter {
    fn new(color: ColorMode) -> Self {
        Self {
            color,
            bar: Mutex::new(None),
        }
    }

    fn handle(&self, event: ProgressEvent) {
        let Ok(mut bar) = self.bar.lock() else {
            return;
        };

        if let ProgressEvent::UnitStarted {
            name, documents, ..
        } = &event
        {
            self.print(None, &event);
            let pb = ProgressBar::new(*documents as u64);
            pb.set_style(
                ProgressStyle::with_template(
                    "{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
            );
            pb.set_message(name.clone());
            *bar = Some(pb);
            return;
        }

        if let ProgressEvent::DocumentStarted { file_name, .. } = &event {
            if let Some(pb) = bar.as_ref() {
                pb.set_message(file_name.clone());
            }
        }

        self.print(bar.as_ref(), &event);

        match &event {
            ProgressEvent::DocumentFinished { .. } => {
                if let Some(pb) = bar.as_ref() {
                    pb.inc(1);
                }
            }
            ProgressEvent::UnitFinished { .. } => {
                if let Some(pb) = bar.take() {
                    pb.finish_and_clear();
                }
            }
            _ => {}
        }
    }

    fn print(&self, bar: Option<&ProgressBar>, event: &ProgressEvent) {
        let write = || {
            let mut stdout = std::io::stdout();
            if let Err(e) = output::print_progress(&mut stdout, event, self.color) {
                tracing::debug!(error = %e, "failed to write progress");
            }
        };
        match bar {
            Some(pb) => pb.suspend(write),
            None => write(),
        }
    }
}
