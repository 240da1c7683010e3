//! Batch coordinator
//!
//! Turns a catalog into fetch targets, runs them through the retry supervisor
//! and the shared concurrency gate on a single control flow, then sweeps the
//! output tree for segment groups to merge.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, error, info, warn};
use reqwest::Client;

use crate::core::catalog::{CatalogProvider, DownloadLink, JsonCatalog};
use crate::core::config::{build_client, DownloadConfig};
use crate::core::error::{Error, Result};
use crate::core::gate::ConcurrencyGate;
use crate::core::merge::{ConcatMethod, MergeReport, MergeScope, SegmentMerger};
use crate::core::playlist::PlaylistResolver;
use crate::core::report::{BatchReport, DownloadOutcome, LinkReport, SkipReason};
use crate::core::retry::{ResolvedTarget, RetryPolicy, RetrySupervisor};
use crate::core::sanitize::sanitize;
use crate::core::source::{
    part_filename, resolve_output_filename, resolve_output_stem, resolve_source, DownloadSource,
};
use crate::core::stream::ProgressCallback;

/// Where one catalog entry will land
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedLink {
    pub name: String,
    pub source: DownloadSource,
    /// Folder the file (or its parts) is written to
    pub folder: PathBuf,
    /// Sanitized stem shared by the final file and any parts
    pub stem: String,
    /// The final artifact; for segmented links, the merged file
    pub destination: PathBuf,
}

impl PlannedLink {
    pub fn is_segmented(&self) -> bool {
        matches!(self.source, DownloadSource::Playlist { .. })
    }
}

/// Work decided for one link before anything is fetched
enum Plan {
    Skip(SkipReason),
    Fail(Error),
    Fetch {
        targets: Vec<ResolvedTarget>,
        /// Segment count of a resolved stream; `None` for direct files
        segments: Option<usize>,
    },
}

/// Drives a whole batch
pub struct Orchestrator {
    config: DownloadConfig,
    client: Client,
    gate: ConcurrencyGate,
    merger: SegmentMerger,
    merge_enabled: bool,
    progress: Option<ProgressCallback>,
}

impl Orchestrator {
    /// Create an orchestrator with its own client and gate sized from `config`
    pub fn new(config: DownloadConfig) -> Result<Self> {
        config.validate()?;
        let client = build_client(&config)?;
        let gate = ConcurrencyGate::new(config.max_concurrent_downloads)?;
        Ok(Self {
            config,
            client,
            gate,
            merger: SegmentMerger::default(),
            merge_enabled: true,
            progress: None,
        })
    }

    /// Share an existing gate, e.g. across several orchestrators
    pub fn with_gate(mut self, gate: ConcurrencyGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_concat_method(mut self, method: ConcatMethod) -> Self {
        self.merger = SegmentMerger::new(method);
        self
    }

    pub fn with_merge(mut self, enabled: bool) -> Self {
        self.merge_enabled = enabled;
        self
    }

    /// Called with `(finished targets, total targets)` as targets terminate
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Compute every destination in catalog order, refusing duplicates.
    ///
    /// Touches neither the network nor the filesystem.
    pub fn plan_destinations<P: CatalogProvider>(
        &self,
        providers: &[P],
        output_root: &Path,
    ) -> Result<Vec<PlannedLink>> {
        let mut planned = Vec::new();
        let mut seen = HashSet::new();

        for provider in providers {
            let folder = match provider.category().map(sanitize) {
                // "." and ".." survive sanitizing but must not leave the root
                Some(category) if !category.is_empty() && !category.chars().all(|c| c == '.') => {
                    output_root.join(category)
                }
                _ => output_root.to_path_buf(),
            };

            for link in provider.get_links()? {
                let entry = plan_link(&link, &folder);
                if !seen.insert(entry.destination.clone()) {
                    return Err(Error::DuplicateDestination(entry.destination));
                }
                planned.push(entry);
            }
        }
        Ok(planned)
    }

    /// Run every section of a JSON catalog
    pub async fn run_catalog(&self, catalog: &JsonCatalog, output_root: &Path) -> Result<BatchReport> {
        self.run(&catalog.sections, output_root).await
    }

    /// Fetch everything `providers` list into `output_root`, then merge segments.
    ///
    /// Per-link failures end up in the report; only catalog problems (such as
    /// duplicate destinations) fail the whole call, and they do so before any
    /// request is made.
    pub async fn run<P: CatalogProvider>(
        &self,
        providers: &[P],
        output_root: &Path,
    ) -> Result<BatchReport> {
        let planned = self.plan_destinations(providers, output_root)?;
        info!("Planned {} links under {}", planned.len(), output_root.display());

        let mut plans = Vec::with_capacity(planned.len());
        for entry in &planned {
            plans.push(self.plan_fetch(entry).await);
        }

        let failures = self.execute(&planned, &mut plans).await;

        let mut scope = MergeScope::default();
        let mut links = Vec::with_capacity(planned.len());
        for ((entry, plan), failure) in planned.into_iter().zip(plans).zip(failures) {
            let outcome = match (plan, failure) {
                (Plan::Skip(reason), _) => DownloadOutcome::Skipped(reason),
                (Plan::Fail(err), _) => {
                    // Parts from an earlier run cannot be checked without the manifest
                    if entry.is_segmented() {
                        scope.exclude(&entry.folder, &entry.stem);
                    }
                    DownloadOutcome::Failed(err)
                }
                (Plan::Fetch { segments, .. }, Some(err)) => {
                    if segments.is_some() {
                        scope.exclude(&entry.folder, &entry.stem);
                    }
                    DownloadOutcome::Failed(err)
                }
                (Plan::Fetch { segments, .. }, None) => {
                    if let Some(count) = segments {
                        scope.expect_parts(&entry.folder, &entry.stem, count);
                    }
                    DownloadOutcome::Success
                }
            };
            links.push(LinkReport {
                name: entry.name,
                destination: entry.destination,
                outcome,
            });
        }

        let merge = if self.merge_enabled {
            match self.merger.merge_tree_scoped(output_root, &scope).await {
                Ok(report) => report,
                Err(err) => {
                    error!("Merge pass over {} failed: {}", output_root.display(), err);
                    MergeReport::default()
                }
            }
        } else {
            debug!("Merging disabled, leaving parts in place");
            MergeReport::default()
        };

        let report = BatchReport { links, merge };
        info!(
            "Batch finished: {} succeeded, {} failed, {} skipped",
            report.succeeded(),
            report.failed(),
            report.skipped()
        );
        Ok(report)
    }

    /// Decide what one link needs. Segmented links resolve their manifest here.
    async fn plan_fetch(&self, entry: &PlannedLink) -> Plan {
        if tokio::fs::try_exists(&entry.destination).await.unwrap_or(false) {
            info!("{} already exists, skipping", entry.destination.display());
            return Plan::Skip(SkipReason::AlreadyExists);
        }

        match &entry.source {
            DownloadSource::Direct { url } => Plan::Fetch {
                targets: vec![ResolvedTarget::new(&entry.destination, url.clone())],
                segments: None,
            },
            DownloadSource::Playlist { url } => {
                let resolver = PlaylistResolver::new(self.client.clone(), &self.config);
                let segments = match resolver.resolve(url).await {
                    Ok(segments) => segments,
                    Err(err) => {
                        error!("Could not resolve {}: {}", entry.name, err);
                        return Plan::Fail(err);
                    }
                };

                let total = segments.len();
                let mut targets = Vec::with_capacity(total);
                for (index, segment) in segments.into_iter().enumerate() {
                    let part = entry.folder.join(part_filename(&entry.stem, index, &segment));
                    if !tokio::fs::try_exists(&part).await.unwrap_or(false) {
                        targets.push(ResolvedTarget::new(part, segment));
                    }
                }

                if targets.len() < total {
                    debug!(
                        "{}: {} of {} parts already on disk",
                        entry.name,
                        total - targets.len(),
                        total
                    );
                }
                Plan::Fetch {
                    targets,
                    segments: Some(total),
                }
            }
        }
    }

    /// Run every scheduled target to a terminal state.
    ///
    /// Returns the first error seen per link, indexed like `planned`.
    async fn execute(&self, planned: &[PlannedLink], plans: &mut [Plan]) -> Vec<Option<Error>> {
        let mut failures: Vec<Option<Error>> = planned.iter().map(|_| None).collect();
        let supervisor = RetrySupervisor::new(RetryPolicy::from_config(&self.config), self.gate.clone());
        let client = &self.client;
        let chunk_size = self.config.chunk_size;

        let mut jobs = FuturesUnordered::new();
        for (index, plan) in plans.iter_mut().enumerate() {
            if let Plan::Fetch { targets, .. } = plan {
                for target in targets.iter_mut() {
                    let supervisor = &supervisor;
                    jobs.push(async move {
                        let result = supervisor.fetch(client, chunk_size, target).await;
                        (index, result)
                    });
                }
            }
        }

        let total = jobs.len();
        let mut finished = 0;
        info!("Scheduled {} fetches", total);

        while let Some((index, result)) = jobs.next().await {
            finished += 1;
            if let Err(err) = result {
                let name = &planned[index].name;
                if failures[index].is_none() {
                    error!("{} failed: {}", name, err);
                    failures[index] = Some(err);
                } else {
                    warn!("{}: another part failed: {}", name, err);
                }
            }
            if let Some(progress) = &self.progress {
                progress(finished, total);
            }
        }

        failures
    }
}

fn plan_link(link: &DownloadLink, folder: &Path) -> PlannedLink {
    PlannedLink {
        name: link.name.clone(),
        source: resolve_source(&link.locator),
        folder: folder.to_path_buf(),
        stem: resolve_output_stem(link),
        destination: folder.join(resolve_output_filename(link)),
    }
}
