//! Core library modules for lesson-dl
//!
//! This module contains the internal implementation details of the lesson-dl library.

pub mod catalog;
pub mod config;
pub mod error;
pub mod fetch;
pub mod gate;
pub mod merge;
pub mod orchestrator;
pub mod playlist;
pub mod report;
pub mod retry;
pub mod sanitize;
pub mod source;
pub mod stream;

// Re-export main types for internal use
pub use orchestrator::{Orchestrator, PlannedLink};
pub use source::{resolve_output_filename, resolve_source, DownloadSource};
