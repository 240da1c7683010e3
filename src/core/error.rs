//! Error types for lesson-dl
//!
//! Every failure the download engine can report maps onto one variant here.
//! Transient network failures are distinguished from everything else so the
//! retry supervisor can decide whether another attempt is worthwhile.

use std::fmt;
use std::path::PathBuf;

/// Main error type for lesson-dl operations
#[derive(Debug)]
pub enum Error {
    /// The remote stream could not be opened (connect error or non-success status)
    ConnectFailed { locator: String, reason: String },

    /// The remote stream broke after headers were received
    ReadFailed { locator: String, reason: String },

    /// A stream manifest or its selected variant could not be retrieved or parsed
    ManifestUnavailable { locator: String, reason: String },

    /// A target kept failing until the retry budget ran out
    ExhaustedRetries {
        locator: String,
        attempts: u32,
        last: Box<Error>,
    },

    /// Concatenating a segment group failed; its parts were left in place
    MergeFailed { group: String, reason: String },

    /// Two catalog entries would write to the same file
    DuplicateDestination(PathBuf),

    /// Invalid configuration or parameters
    InvalidInput(String),

    /// File I/O error
    IoError(std::io::Error),
}

impl Error {
    /// Whether another attempt at the same target could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::ConnectFailed { .. } | Error::ReadFailed { .. })
    }

    /// Whether the failed attempt may have left bytes on disk
    pub fn may_leave_partial(&self) -> bool {
        matches!(self, Error::ReadFailed { .. } | Error::IoError(_))
    }

    pub(crate) fn connect(locator: impl fmt::Display, reason: impl fmt::Display) -> Self {
        Error::ConnectFailed {
            locator: locator.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn read(locator: impl fmt::Display, reason: impl fmt::Display) -> Self {
        Error::ReadFailed {
            locator: locator.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn manifest(locator: impl fmt::Display, reason: impl fmt::Display) -> Self {
        Error::ManifestUnavailable {
            locator: locator.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConnectFailed { locator, reason } => {
                write!(f, "Could not open {}: {}", locator, reason)
            }
            Error::ReadFailed { locator, reason } => {
                write!(f, "Stream from {} broke mid-transfer: {}", locator, reason)
            }
            Error::ManifestUnavailable { locator, reason } => {
                write!(f, "Manifest {} unavailable: {}", locator, reason)
            }
            Error::ExhaustedRetries { locator, attempts, last } => {
                write!(f, "Gave up on {} after {} attempts: {}", locator, attempts, last)
            }
            Error::MergeFailed { group, reason } => {
                write!(f, "Merging segments of '{}' failed: {}", group, reason)
            }
            Error::DuplicateDestination(path) => {
                write!(f, "Catalog contains more than one entry for {}", path.display())
            }
            Error::InvalidInput(msg) => {
                write!(f, "Invalid input: {}", msg)
            }
            Error::IoError(err) => {
                write!(f, "I/O error: {}", err)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            Error::ExhaustedRetries { last, .. } => Some(last.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let locator = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        if err.is_body() || err.is_decode() {
            Error::read(locator, err)
        } else {
            Error::connect(locator, err)
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidInput(format!("Malformed catalog: {}", err))
    }
}

/// Convenience result type for lesson-dl operations
pub type Result<T> = std::result::Result<T, Error>;
