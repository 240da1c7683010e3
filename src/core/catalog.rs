//! Catalog of work handed to the engine
//!
//! Links are discovered elsewhere (a scraper, a cache of earlier scrapes, a
//! hand-written file); the engine only sees ordered `(name, locator)` pairs,
//! optionally grouped under a category that becomes a sub-folder.

use std::path::Path;

use serde::Deserialize;
use url::Url;

use crate::core::error::Result;

/// One named remote resource
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DownloadLink {
    /// Human-readable label, not necessarily safe as a file name
    pub name: String,

    /// Where the resource (or its manifest) lives
    pub locator: Url,
}

impl DownloadLink {
    pub fn new(name: impl Into<String>, locator: Url) -> Self {
        Self {
            name: name.into(),
            locator,
        }
    }
}

/// Anything that can hand the orchestrator an ordered list of links
pub trait CatalogProvider {
    /// Sub-folder of the output root the links are written to
    fn category(&self) -> Option<&str> {
        None
    }

    fn get_links(&self) -> Result<Vec<DownloadLink>>;
}

impl CatalogProvider for Vec<DownloadLink> {
    fn get_links(&self) -> Result<Vec<DownloadLink>> {
        Ok(self.clone())
    }
}

/// Links sharing one output folder
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogSection {
    #[serde(default)]
    pub category: Option<String>,
    pub links: Vec<DownloadLink>,
}

impl CatalogProvider for CatalogSection {
    fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    fn get_links(&self) -> Result<Vec<DownloadLink>> {
        Ok(self.links.clone())
    }
}

/// A catalog stored as JSON:
///
/// ```json
/// {"sections": [{"category": "Lesson 1", "links": [{"name": "Intro", "locator": "http://x/intro.mp4"}]}]}
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonCatalog {
    pub sections: Vec<CatalogSection>,
}

impl JsonCatalog {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_json(&text)
    }

    /// Total number of links across all sections
    pub fn len(&self) -> usize {
        self.sections.iter().map(|s| s.links.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
