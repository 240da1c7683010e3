//! Bounded retry around single-resource fetches
//!
//! Each target walks `Pending -> Attempting -> (Succeeded | Retrying ->
//! Attempting | ExhaustedFailed)`. The gate permit is held for one attempt
//! only; a target waiting out its retry delay holds nothing, so other work
//! keeps flowing while a flaky resource cools down.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, error, info, warn};
use reqwest::Client;
use url::Url;

use crate::core::config::DownloadConfig;
use crate::core::error::{Error, Result};
use crate::core::fetch::fetch_to_file;
use crate::core::gate::ConcurrencyGate;

/// How often and how patiently a target is retried
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Fixed wait before each retry
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &DownloadConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            delay: config.retry_delay,
        }
    }
}

/// Lifecycle of one fetch target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    Pending,
    Attempting,
    Retrying,
    Succeeded,
    /// Terminal failure, either out of retries or not worth retrying
    ExhaustedFailed,
}

impl TargetState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TargetState::Succeeded | TargetState::ExhaustedFailed)
    }
}

/// One file to produce from one locator
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub destination_path: PathBuf,
    pub locator: Url,
    pub retry_count: u32,
    state: TargetState,
}

impl ResolvedTarget {
    pub fn new(destination_path: impl Into<PathBuf>, locator: Url) -> Self {
        Self {
            destination_path: destination_path.into(),
            locator,
            retry_count: 0,
            state: TargetState::Pending,
        }
    }

    pub fn state(&self) -> TargetState {
        self.state
    }

    fn transition(&mut self, next: TargetState) {
        debug!(
            "{}: {:?} -> {:?}",
            self.destination_path.display(),
            self.state,
            next
        );
        self.state = next;
    }
}

/// Split a destination into the folder and file name the fetch unit expects
fn split_destination(destination: &Path) -> Result<(&Path, &str)> {
    let folder = destination.parent().unwrap_or_else(|| Path::new("."));
    let filename = destination
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            Error::InvalidInput(format!("Bad destination path: {}", destination.display()))
        })?;
    Ok((folder, filename))
}

/// Remove whatever a failed attempt left at `path`
async fn remove_partial_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove partial file {}: {}", path.display(), e),
    }
}

/// Drives targets through their retry state machine, one gate permit per attempt
#[derive(Debug, Clone)]
pub struct RetrySupervisor {
    policy: RetryPolicy,
    gate: ConcurrencyGate,
}

impl RetrySupervisor {
    pub fn new(policy: RetryPolicy, gate: ConcurrencyGate) -> Self {
        Self { policy, gate }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `attempt` until it succeeds, fails permanently, or the retry budget
    /// is spent. `attempt` receives the locator and destination path.
    pub async fn run<F, Fut>(&self, target: &mut ResolvedTarget, mut attempt: F) -> Result<u64>
    where
        F: FnMut(Url, PathBuf) -> Fut,
        Fut: Future<Output = Result<u64>>,
    {
        loop {
            if target.retry_count > 0 {
                info!(
                    "Retrying {} (retry {} of {})",
                    target.locator, target.retry_count, self.policy.max_retries
                );
            }

            let result = {
                let _permit = self.gate.acquire().await;
                target.transition(TargetState::Attempting);
                attempt(target.locator.clone(), target.destination_path.clone()).await
            };

            let err = match result {
                Ok(written) => {
                    target.transition(TargetState::Succeeded);
                    info!("Finished downloading {}", target.destination_path.display());
                    return Ok(written);
                }
                Err(err) => err,
            };

            if err.may_leave_partial() {
                remove_partial_file(&target.destination_path).await;
            }

            if !err.is_transient() {
                target.transition(TargetState::ExhaustedFailed);
                error!("Giving up on {}: {}", target.locator, err);
                return Err(err);
            }

            if target.retry_count >= self.policy.max_retries {
                target.transition(TargetState::ExhaustedFailed);
                error!("Max retries reached for {}: {}", target.locator, err);
                return Err(Error::ExhaustedRetries {
                    locator: target.locator.to_string(),
                    attempts: target.retry_count + 1,
                    last: Box::new(err),
                });
            }

            target.transition(TargetState::Retrying);
            warn!(
                "Failure downloading {}, retrying in {:?}: {}",
                target.locator, self.policy.delay, err
            );
            tokio::time::sleep(self.policy.delay).await;
            target.retry_count += 1;
        }
    }

    /// Fetch `target` over HTTP with retries
    pub async fn fetch(
        &self,
        client: &Client,
        chunk_size: usize,
        target: &mut ResolvedTarget,
    ) -> Result<u64> {
        self.run(target, move |locator, destination| async move {
            let (folder, filename) = split_destination(&destination)?;
            fetch_to_file(client, &locator, folder, filename, chunk_size).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use tempfile::tempdir;

    fn supervisor(max_retries: u32, delay_ms: u64, permits: usize) -> RetrySupervisor {
        RetrySupervisor::new(
            RetryPolicy {
                max_retries,
                delay: Duration::from_millis(delay_ms),
            },
            ConcurrencyGate::new(permits).unwrap(),
        )
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_connect_failures_attempted_max_retries_plus_one() {
        let sup = supervisor(5, 1, 2);
        let attempts = AtomicU32::new(0);
        let mut target = ResolvedTarget::new("/tmp/never.mp4", url("http://x/never.mp4"));

        let result = sup
            .run(&mut target, |locator, _| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move { Err(Error::connect(locator, "connection refused")) }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 6);
        assert_eq!(target.retry_count, 5);
        assert_eq!(target.state(), TargetState::ExhaustedFailed);
        match result {
            Err(Error::ExhaustedRetries { attempts, last, .. }) => {
                assert_eq!(attempts, 6);
                assert!(matches!(*last, Error::ConnectFailed { .. }));
            }
            other => panic!("Expected ExhaustedRetries, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_partial_file_removed_before_retry() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("flaky.mp4");
        let sup = supervisor(3, 1, 1);
        let attempts = AtomicU32::new(0);
        let mut target = ResolvedTarget::new(&dest, url("http://x/flaky.mp4"));

        let result = sup
            .run(&mut target, |locator, destination| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    // A fresh attempt must never see the previous attempt's bytes.
                    assert!(!destination.exists());
                    if n < 2 {
                        std::fs::write(&destination, b"trunc").unwrap();
                        Err(Error::read(locator, "connection reset"))
                    } else {
                        std::fs::write(&destination, b"complete").unwrap();
                        Ok(8)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 8);
        assert_eq!(target.retry_count, 2);
        assert_eq!(target.state(), TargetState::Succeeded);
        assert_eq!(std::fs::read(&dest).unwrap(), b"complete");
    }

    #[tokio::test]
    async fn test_exhausted_read_failures_leave_no_partial() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("broken.mp4");
        let sup = supervisor(2, 1, 1);
        let mut target = ResolvedTarget::new(&dest, url("http://x/broken.mp4"));

        let result = sup
            .run(&mut target, |locator, destination| async move {
                std::fs::write(&destination, b"half").unwrap();
                Err(Error::read(locator, "eof"))
            })
            .await;

        assert!(matches!(result, Err(Error::ExhaustedRetries { attempts: 3, .. })));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_non_transient_error_not_retried() {
        let sup = supervisor(5, 1, 1);
        let attempts = AtomicU32::new(0);
        let mut target = ResolvedTarget::new("/tmp/x.mp4", url("http://x/x.mp4"));

        let result = sup
            .run(&mut target, |_, _| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::InvalidInput("bad target".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(target.state(), TargetState::ExhaustedFailed);
    }

    #[tokio::test]
    async fn test_permit_released_while_waiting_to_retry() {
        let sup = supervisor(1, 100, 1);
        let other_done = &AtomicBool::new(false);
        let flaky_attempts = &AtomicU32::new(0);

        let mut flaky = ResolvedTarget::new("/tmp/flaky.mp4", url("http://x/flaky.mp4"));
        let mut steady = ResolvedTarget::new("/tmp/steady.mp4", url("http://x/steady.mp4"));

        let flaky_run = sup.run(&mut flaky, move |locator, _| {
            let n = flaky_attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(Error::connect(locator, "timeout"))
                } else {
                    // The steady target ran during our back-off.
                    assert!(other_done.load(Ordering::SeqCst));
                    Ok(1)
                }
            }
        });
        let steady_run = sup.run(&mut steady, move |_, _| async move {
            other_done.store(true, Ordering::SeqCst);
            Ok(2)
        });

        let (a, b) = tokio::join!(flaky_run, steady_run);
        assert_eq!(a.unwrap(), 1);
        assert_eq!(b.unwrap(), 2);
        assert_eq!(sup.gate.peak_in_flight(), 1);
    }

    #[test]
    fn test_split_destination() {
        let (folder, name) = split_destination(Path::new("/out/Lesson/Intro.mp4")).unwrap();
        assert_eq!(folder, Path::new("/out/Lesson"));
        assert_eq!(name, "Intro.mp4");
        assert!(split_destination(Path::new("/")).is_err());
    }
}
