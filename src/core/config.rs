//! Configuration for the download engine
//!
//! All tunables live in one plain struct so callers can override a single
//! field and keep the rest at their defaults.

use std::time::Duration;

use reqwest::{Client, ClientBuilder};

use crate::core::error::{Error, Result};

/// Default number of transfers allowed in flight at once
pub const MAX_CONCURRENT_DOWNLOADS: usize = 5;

/// Default number of retries after the first failed attempt
pub const MAX_RETRIES: u32 = 5;

/// Default fixed wait between attempts at the same target
pub const RETRY_DURATION: Duration = Duration::from_secs(60);

/// Default read size for streaming a response body to disk
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Tunables consumed by the orchestrator and everything beneath it
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Upper bound on concurrently running fetches
    pub max_concurrent_downloads: usize,

    /// Retries per target before it is reported as exhausted
    pub max_retries: u32,

    /// Fixed delay between attempts at the same target
    pub retry_delay: Duration,

    /// Bytes requested per read while streaming to disk
    pub chunk_size: usize,

    /// Retries for manifest and variant retrieval
    pub manifest_retries: u32,

    /// Base delay between manifest attempts
    pub manifest_retry_delay: Duration,

    /// Upper bound of the random jitter added to `manifest_retry_delay`
    pub manifest_retry_jitter: Duration,

    /// TCP connect timeout for every request
    pub connect_timeout: Duration,

    /// User-Agent header sent with every request
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: MAX_CONCURRENT_DOWNLOADS,
            max_retries: MAX_RETRIES,
            retry_delay: RETRY_DURATION,
            chunk_size: DEFAULT_CHUNK_SIZE,
            manifest_retries: 10,
            manifest_retry_delay: Duration::from_secs(5),
            manifest_retry_jitter: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("lesson-dl/{}", env!("LESSON_DL_VERSION")),
        }
    }
}

impl DownloadConfig {
    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_downloads == 0 {
            return Err(Error::InvalidInput(
                "max_concurrent_downloads must be at least 1".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(Error::InvalidInput("chunk_size must be at least 1 byte".to_string()));
        }
        Ok(())
    }
}

/// Build the HTTP client shared by every fetch in a batch.
///
/// No overall request timeout is set: lesson videos can take far longer than
/// any sensible fixed limit, so only connection establishment is bounded.
pub fn build_client(config: &DownloadConfig) -> Result<Client> {
    ClientBuilder::new()
        .tcp_keepalive(Duration::from_secs(60))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(config.max_concurrent_downloads.max(1))
        .connect_timeout(config.connect_timeout)
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(|e| Error::InvalidInput(format!("Failed to create HTTP client: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = DownloadConfig::default();
        assert_eq!(config.max_concurrent_downloads, 5);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_delay, Duration::from_secs(60));
        assert_eq!(config.chunk_size, 1024);
        assert!(config.user_agent.starts_with("lesson-dl/"));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = DownloadConfig {
            max_concurrent_downloads: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_validate_rejects_zero_chunk() {
        let config = DownloadConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(DownloadConfig::default().validate().is_ok());
    }

    #[test]
    fn test_build_client() {
        assert!(build_client(&DownloadConfig::default()).is_ok());
    }
}
