// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Schriftwerk — OCR for scanned PDFs
//
// Entry point. Initialises logging, loads configuration, runs one job and
// reports it as JSON.

mod services;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use schriftwerk_core::error::Result;
use schriftwerk_core::{DocumentRequest, JobResult, JobStatus, LanguageSet, OutputMode, PageStatus};
use schriftwerk_pipeline::{DEFAULT_STALE_AGE, JobProgress, ResourceManager};
use tokio::sync::watch;
use tracing::{error, info, warn};

use services::config_file::load_config;
use services::engines::{BackendChoice, EngineOptions, RasterizerChoice, build_orchestrator};
use services::work_dir::work_dir;

/// Exit status when the job ran but failed.
const EXIT_FAILED: u8 = 1;
/// Exit status for bad input, configuration or I/O before or after the job.
const EXIT_ERROR: u8 = 2;
/// Exit status when the job deadline passed.
const EXIT_TIMED_OUT: u8 = 3;

#[derive(Debug, Parser)]
#[command(name = "schriftwerk")]
#[command(version)]
#[command(about = "Recognise text in scanned PDFs", long_about = None)]
struct Cli {
    /// Input PDF
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Output kind
    #[arg(short, long, value_enum, default_value = "text")]
    mode: ModeArg,

    /// Languages, joined with '+' (e.g. eng+deu)
    #[arg(short, long, value_name = "LANGS")]
    lang: Option<LanguageSet>,

    /// Where to write the artifact [default: next to the input]
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Write the JSON job report here instead of stdout
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// JSON pipeline configuration; SCHRIFTWERK_* variables override it
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Scratch directory for job transients
    #[arg(long, value_name = "DIR", env = "SCHRIFTWERK_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Page rasterizer
    #[arg(long, value_enum, default_value = "embedded")]
    rasterizer: RasterizerChoice,

    /// Recognition engine
    #[arg(long, value_enum, default_value = "tesseract")]
    backend: BackendChoice,

    /// Path to the tesseract binary
    #[arg(long, value_name = "PATH", env = "SCHRIFTWERK_TESSERACT")]
    tesseract: Option<PathBuf>,

    /// Directory holding the ocrs model files
    #[arg(long, value_name = "DIR")]
    models: Option<PathBuf>,

    /// Despeckle and binarize pages before recognition
    #[arg(long)]
    enhance: bool,

    /// Run OCR on every page, ignoring any text the PDF already carries
    #[arg(long)]
    force_ocr: bool,

    /// Expected page count; the job is rejected when the PDF disagrees
    #[arg(long, value_name = "N")]
    pages: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum ModeArg {
    /// Plain text, one form feed between pages
    Text,
    /// The original PDF with an invisible text layer
    Searchable,
}

impl From<ModeArg> for OutputMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Text => OutputMode::Text,
            ModeArg::Searchable => OutputMode::Searchable,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Schriftwerk starting");

    let cli = Cli::parse();
    match run(cli).await {
        Ok(status) => ExitCode::from(exit_code(status)),
        Err(err) => {
            error!(error = %err, "Schriftwerk failed");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

async fn run(cli: Cli) -> Result<JobStatus> {
    let config = load_config(cli.config.as_deref(), |key| std::env::var(key).ok())?;

    let resources = Arc::new(ResourceManager::new(work_dir(cli.work_dir.as_deref()))?);
    match resources.sweep_stale(DEFAULT_STALE_AGE) {
        Ok(0) => {}
        Ok(swept) => info!(swept, "Removed stale job directories"),
        Err(err) => warn!(error = %err, "Stale sweep failed"),
    }

    let options = EngineOptions {
        rasterizer: cli.rasterizer,
        backend: cli.backend,
        tesseract: cli.tesseract.clone(),
        models: cli.models.clone(),
        enhance: cli.enhance,
        force_ocr: cli.force_ocr,
    };
    let orchestrator = build_orchestrator(config, resources, &options)?;

    let mode = OutputMode::from(cli.mode);
    let mut request = DocumentRequest::from_path(&cli.input, mode);
    if let Some(languages) = cli.lang.clone() {
        request = request.with_languages(languages);
    }
    if let Some(pages) = cli.pages {
        request = request.with_page_count(pages);
    }

    let (progress_tx, progress_rx) = watch::channel(JobProgress::default());
    let watcher = tokio::spawn(log_progress(progress_rx));
    let outcome = orchestrator
        .run_with_progress(request, Some(&progress_tx))
        .await;
    drop(progress_tx);
    let _ = watcher.await;
    let result = outcome?;

    if let Some(artifact) = &result.artifact {
        let target = cli
            .output
            .clone()
            .unwrap_or_else(|| default_output(&cli.input, mode));
        tokio::fs::write(&target, &artifact.bytes).await?;
        info!(path = %target.display(), bytes = artifact.byte_len, "Artifact written");
    }
    write_report(&result, cli.report.as_deref()).await?;

    info!(
        status = ?result.status,
        done = result.done_pages(),
        failed = result.failed_pages(),
        "Schriftwerk finished"
    );
    Ok(result.status)
}

/// Log page counts each time the job's progress changes.
async fn log_progress(mut progress: watch::Receiver<JobProgress>) {
    while progress.changed().await.is_ok() {
        let snapshot = progress.borrow_and_update().clone();
        info!(
            done = snapshot.count(PageStatus::Done),
            failed = snapshot.count(PageStatus::Failed),
            total = snapshot.pages.len(),
            "Progress"
        );
    }
}

async fn write_report(result: &JobResult, target: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(result)?;
    match target {
        Some(path) => tokio::fs::write(path, json).await?,
        None => println!("{json}"),
    }
    Ok(())
}

/// `scan.pdf` becomes `scan.txt` or `scan.ocr.pdf`.
fn default_output(input: &Path, mode: OutputMode) -> PathBuf {
    match mode {
        OutputMode::Text => input.with_extension(mode.extension()),
        OutputMode::Searchable => input.with_extension(format!("ocr.{}", mode.extension())),
    }
}

fn exit_code(status: JobStatus) -> u8 {
    match status {
        JobStatus::Completed | JobStatus::CompletedWithErrors => 0,
        JobStatus::TimedOut => EXIT_TIMED_OUT,
        JobStatus::Running | JobStatus::Failed => EXIT_FAILED,
    }
}
