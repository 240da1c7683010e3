//! Per-link outcomes and the batch summary

use std::fmt;
use std::path::PathBuf;

use crate::core::error::Error;
use crate::core::merge::MergeReport;

/// Why a link was not fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The destination file is already on disk
    AlreadyExists,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyExists => write!(f, "already exists"),
        }
    }
}

/// Terminal state of one link
#[derive(Debug)]
pub enum DownloadOutcome {
    Success,
    Failed(Error),
    Skipped(SkipReason),
}

impl DownloadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DownloadOutcome::Success)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, DownloadOutcome::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, DownloadOutcome::Skipped(_))
    }
}

impl fmt::Display for DownloadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadOutcome::Success => write!(f, "ok"),
            DownloadOutcome::Failed(err) => write!(f, "failed: {}", err),
            DownloadOutcome::Skipped(reason) => write!(f, "skipped: {}", reason),
        }
    }
}

/// What happened to one catalog entry
#[derive(Debug)]
pub struct LinkReport {
    pub name: String,
    pub destination: PathBuf,
    pub outcome: DownloadOutcome,
}

/// Everything a batch run produced, links in catalog order
#[derive(Debug, Default)]
pub struct BatchReport {
    pub links: Vec<LinkReport>,
    pub merge: MergeReport,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.links.iter().filter(|l| l.outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.links.iter().filter(|l| l.outcome.is_failed()).count()
    }

    pub fn skipped(&self) -> usize {
        self.links.iter().filter(|l| l.outcome.is_skipped()).count()
    }

    /// Names to retry by hand on a later run
    pub fn failed_names(&self) -> Vec<&str> {
        self.links
            .iter()
            .filter(|l| l.outcome.is_failed())
            .map(|l| l.name.as_str())
            .collect()
    }

    /// True when no link failed and every segment group merged
    pub fn is_clean(&self) -> bool {
        self.failed() == 0 && self.merge.failed.is_empty()
    }
}
