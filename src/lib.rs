//! # Lesson-dl Library
//!
//! A bulk media downloader for lesson catalogs: plain video files and
//! segmented HLS streams are fetched concurrently, retried when the network
//! misbehaves, and segmented streams are reassembled into single files.
//!
//! ## Features
//!
//! - **Bounded concurrency**: a shared gate caps how many transfers run at once
//! - **Fixed-delay retries**: failed transfers are retried without holding a slot
//! - **HLS support**: the highest-resolution variant is fetched segment by segment
//! - **Idempotent re-runs**: files already on disk are never fetched again
//! - **Progress tracking**: optional callbacks for custom UIs
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let catalog = lesson_dl::JsonCatalog::load("catalog.json").await?;
//!     let report = lesson_dl::download(&catalog, "./lessons").await?;
//!
//!     println!(
//!         "{} succeeded, {} failed, {} skipped",
//!         report.succeeded(),
//!         report.failed(),
//!         report.skipped()
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Progress Tracking
//!
//! ```rust,no_run
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let catalog = lesson_dl::JsonCatalog::load("catalog.json").await?;
//!     lesson_dl::download_with_progress(&catalog, "./lessons", |finished, total| {
//!         println!("Progress: {}/{} files", finished, total);
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

// Re-export core types that users might need
pub use crate::core::catalog::{CatalogProvider, CatalogSection, DownloadLink, JsonCatalog};
pub use crate::core::config::{
    build_client, DownloadConfig, DEFAULT_CHUNK_SIZE, MAX_CONCURRENT_DOWNLOADS, MAX_RETRIES,
    RETRY_DURATION,
};
pub use crate::core::error::{Error, Result};
pub use crate::core::fetch::fetch_to_file;
pub use crate::core::gate::{ConcurrencyGate, GatePermit};
pub use crate::core::merge::{
    find_segment_groups, parse_part_name, ConcatMethod, MergeReport, SegmentGroup, SegmentMerger,
};
pub use crate::core::orchestrator::{Orchestrator, PlannedLink};
pub use crate::core::playlist::{select_highest_resolution, PlaylistResolver};
pub use crate::core::report::{BatchReport, DownloadOutcome, LinkReport, SkipReason};
pub use crate::core::retry::{ResolvedTarget, RetryPolicy, RetrySupervisor, TargetState};
pub use crate::core::sanitize::sanitize;
pub use crate::core::source::{resolve_output_filename, resolve_source, DownloadSource};
pub use crate::core::stream::ProgressCallback;

// Internal modules
mod core;

/// Download every link of `catalog` under `output_root` with default settings
///
/// # Arguments
/// * `catalog` - Links grouped into sections; each section's category becomes a sub-folder
/// * `output_root` - Folder everything is written under
pub async fn download(catalog: &JsonCatalog, output_root: impl AsRef<Path>) -> Result<BatchReport> {
    download_with_config(catalog, output_root, DownloadConfig::default()).await
}

/// Download with custom settings
///
/// # Examples
/// ```rust,no_run
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use std::time::Duration;
/// use lesson_dl::DownloadConfig;
///
/// let config = DownloadConfig {
///     max_concurrent_downloads: 2,
///     retry_delay: Duration::from_secs(10),
///     ..Default::default()
/// };
/// let catalog = lesson_dl::JsonCatalog::load("catalog.json").await?;
/// lesson_dl::download_with_config(&catalog, "./lessons", config).await?;
/// # Ok(())
/// # }
/// ```
pub async fn download_with_config(
    catalog: &JsonCatalog,
    output_root: impl AsRef<Path>,
    config: DownloadConfig,
) -> Result<BatchReport> {
    Orchestrator::new(config)?
        .run_catalog(catalog, output_root.as_ref())
        .await
}

/// Download with a progress callback receiving `(finished, total)` file counts
pub async fn download_with_progress<F>(
    catalog: &JsonCatalog,
    output_root: impl AsRef<Path>,
    progress: F,
) -> Result<BatchReport>
where
    F: Fn(usize, usize) + Send + Sync + 'static,
{
    Orchestrator::new(DownloadConfig::default())?
        .with_progress(Arc::new(progress))
        .run_catalog(catalog, output_root.as_ref())
        .await
}
