//! CLI-specific progress handling for lesson-dl
//!
//! Provides the progress bar shown while a batch runs.

use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use lesson_dl::ProgressCallback;

/// Creates a progress bar counting finished files
pub fn create_progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} files ({percent}%) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}

/// Progress manager for a batch run
pub struct ProgressManager {
    pub pb: ProgressBar,
}

impl ProgressManager {
    /// Create a new progress manager; the length is set once the batch is scheduled
    pub fn new(message: &str) -> Self {
        let pb = create_progress_bar(0);

        // Print initial message to stderr
        eprintln!("{}", message);

        Self { pb }
    }

    /// Callback to hand to the orchestrator
    pub fn callback(&self) -> ProgressCallback {
        let pb = self.pb.clone();
        Arc::new(move |finished: usize, total: usize| {
            let total = total as u64;
            if pb.length().unwrap_or(0) != total {
                pb.set_length(total);
            }
            pb.set_position(finished as u64);
            if finished as u64 >= total {
                pb.finish_with_message("✅ Transfers completed!");
            }
        })
    }

    /// Close the bar if the batch never scheduled anything
    pub fn finish(&self) {
        if !self.pb.is_finished() {
            self.pb.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_progress_bar_template() {
        let pb = create_progress_bar(10);
        assert_eq!(pb.length().unwrap(), 10);
        pb.set_position(3);
        pb.finish();
    }

    #[test]
    fn test_callback_tracks_counts() {
        let manager = ProgressManager::new("Test batch");
        let callback = manager.callback();

        callback(1, 4);
        assert_eq!(manager.pb.length().unwrap(), 4);
        assert_eq!(manager.pb.position(), 1);

        callback(4, 4);
        assert!(manager.pb.is_finished());
    }
}
