//! Source classification and output naming for lesson-dl
//!
//! Decides whether a locator points at a plain media file or at a segmented
//! stream manifest, and derives the on-disk names used for each.

use url::Url;

use crate::core::catalog::DownloadLink;
use crate::core::sanitize::sanitize;

/// Extension given to merged segmented downloads
pub const MERGED_EXTENSION: &str = "mp4";

/// Extension used when a locator carries none
const FALLBACK_EXTENSION: &str = "mp4";

/// Extension used for segments whose locator carries none
const FALLBACK_SEGMENT_EXTENSION: &str = "ts";

/// Represents the two kinds of remote resources
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadSource {
    /// A single file fetched as-is
    Direct { url: Url },

    /// A manifest that must be resolved into segments first
    Playlist { url: Url },
}

/// Classifies a locator by the suffix of its path
pub fn resolve_source(locator: &Url) -> DownloadSource {
    let is_manifest = locator
        .path()
        .to_ascii_lowercase()
        .ends_with(".m3u8");

    if is_manifest {
        DownloadSource::Playlist { url: locator.clone() }
    } else {
        DownloadSource::Direct { url: locator.clone() }
    }
}

/// Extension of the last path segment, if it has one
pub fn locator_extension(locator: &Url) -> Option<String> {
    let last = locator.path_segments()?.next_back()?;
    let (stem, ext) = last.rsplit_once('.')?;
    let ext = sanitize(ext);
    if stem.is_empty() || ext.is_empty() {
        None
    } else {
        Some(ext)
    }
}

/// File stem for a link: its sanitized name, else the locator's own stem
pub fn resolve_output_stem(link: &DownloadLink) -> String {
    let from_name = sanitize(&link.name);
    if !from_name.is_empty() {
        return from_name;
    }

    let from_locator = link
        .locator
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .map(|last| last.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(last))
        .map(sanitize)
        .unwrap_or_default();

    if from_locator.is_empty() {
        "untitled".to_string()
    } else {
        from_locator
    }
}

/// Final file name for a link, including extension
pub fn resolve_output_filename(link: &DownloadLink) -> String {
    let stem = resolve_output_stem(link);
    let ext = match resolve_source(&link.locator) {
        DownloadSource::Playlist { .. } => MERGED_EXTENSION.to_string(),
        DownloadSource::Direct { url } => {
            locator_extension(&url).unwrap_or_else(|| FALLBACK_EXTENSION.to_string())
        }
    };
    format!("{stem}.{ext}")
}

/// File name for segment `index` of the stream named `stem`
pub fn part_filename(stem: &str, index: usize, segment: &Url) -> String {
    let ext = locator_extension(segment).unwrap_or_else(|| FALLBACK_SEGMENT_EXTENSION.to_string());
    format!("{stem}_part{index}.{ext}")
}
