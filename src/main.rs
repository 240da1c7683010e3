//! # Lesson-dl CLI
//!
//! Command-line interface for the lesson-dl library.
//! Reads a JSON catalog and downloads every lesson it lists.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use lesson_dl::{
    ConcatMethod, DownloadConfig, JsonCatalog, Orchestrator, DEFAULT_CHUNK_SIZE,
    MAX_CONCURRENT_DOWNLOADS, MAX_RETRIES, RETRY_DURATION,
};
use log::error;

mod cli;

/// Command-line interface for lesson-dl
#[derive(Parser)]
#[command(name = "lesson-dl")]
#[command(about = "Bulk lesson video downloader with HLS support")]
#[command(long_about = "Downloads every link of a JSON catalog:
  lesson-dl catalog.json                     # Download into ./lessons
  lesson-dl catalog.json -o ~/Videos/course  # Choose the output folder
  lesson-dl catalog.json --dry-run           # Show where each file would go

Catalog format:
  {\"sections\": [{\"category\": \"Lesson 1\", \"links\": [{\"name\": \"Intro\", \"locator\": \"https://...\"}]}]}

Files already on disk are skipped, so re-running after a partial batch
only fetches what is missing.")]
#[command(version = env!("LESSON_DL_VERSION"))]
struct Cli {
    /// JSON catalog listing the links to download
    catalog: PathBuf,

    /// Folder everything is written under
    #[arg(short, long, default_value = "lessons")]
    output_dir: PathBuf,

    /// Maximum number of transfers running at once
    #[arg(long, default_value_t = MAX_CONCURRENT_DOWNLOADS)]
    max_concurrent: usize,

    /// Retries per file after the first failed attempt
    #[arg(long, default_value_t = MAX_RETRIES)]
    max_retries: u32,

    /// Seconds to wait before retrying a failed file
    #[arg(long, default_value_t = RETRY_DURATION.as_secs())]
    retry_delay: u64,

    /// Bytes read per chunk while writing to disk
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Join stream segments with ffmpeg instead of plain concatenation
    #[arg(long, value_name = "PROGRAM", num_args = 0..=1, default_missing_value = "ffmpeg")]
    ffmpeg: Option<PathBuf>,

    /// Leave stream segments as separate part files
    #[arg(long)]
    no_merge: bool,

    /// Enable dry-run mode (show what would be downloaded without downloading)
    #[arg(long)]
    dry_run: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn config(&self) -> DownloadConfig {
        DownloadConfig {
            max_concurrent_downloads: self.max_concurrent,
            max_retries: self.max_retries,
            retry_delay: Duration::from_secs(self.retry_delay),
            chunk_size: self.chunk_size,
            ..Default::default()
        }
    }

    fn concat_method(&self) -> ConcatMethod {
        match &self.ffmpeg {
            Some(program) => ConcatMethod::Ffmpeg {
                program: program.clone(),
            },
            None => ConcatMethod::Bytes,
        }
    }
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("❌ Error: {e:#}");
            std::process::exit(1);
        }
    }
}

/// Returns whether the batch finished without failures
async fn run() -> anyhow::Result<bool> {
    let cli = Cli::parse();

    // Initialize logging to stderr
    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .target(env_logger::Target::Stderr)
        .init();

    if cli.verbose {
        eprintln!("🎸 Lesson-dl v{} starting...", env!("LESSON_DL_VERSION"));
    }

    let catalog = JsonCatalog::load(&cli.catalog)
        .await
        .with_context(|| format!("Could not load catalog {}", cli.catalog.display()))?;

    let orchestrator = Orchestrator::new(cli.config())?
        .with_concat_method(cli.concat_method())
        .with_merge(!cli.no_merge);

    if cli.dry_run {
        let planned = orchestrator.plan_destinations(&catalog.sections, &cli.output_dir)?;
        for entry in &planned {
            let status = if tokio::fs::try_exists(&entry.destination).await.unwrap_or(false) {
                "skip (exists)"
            } else if entry.is_segmented() {
                "stream"
            } else {
                "file"
            };
            eprintln!("🔍 [DRY RUN] {:<13} {} -> {}", status, entry.name, entry.destination.display());
        }
        eprintln!("🔍 [DRY RUN] {} links", planned.len());
        return Ok(true);
    }

    eprintln!("📁 Saving to: {}", cli.output_dir.display());
    let progress = cli::ProgressManager::new(&format!("🌐 Downloading {} links", catalog.len()));
    let orchestrator = orchestrator.with_progress(progress.callback());

    let report = orchestrator.run_catalog(&catalog, &cli.output_dir).await;
    progress.finish();
    let report = report?;

    eprintln!(
        "✅ {} succeeded, ❌ {} failed, ⏭  {} skipped",
        report.succeeded(),
        report.failed(),
        report.skipped()
    );
    for name in report.failed_names() {
        eprintln!("   failed: {name}");
    }
    for (group, err) in &report.merge.failed {
        eprintln!("   not merged: {group} ({err})");
    }

    Ok(report.is_clean())
}
