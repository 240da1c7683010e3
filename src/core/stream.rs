//! Response body adapters
//!
//! The fetch unit pulls bodies through `AsyncRead` in fixed-size chunks.

use std::sync::Arc;

use futures::TryStreamExt;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

/// Batch progress callback: `(terminated targets, total targets)`
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Expose the body of a success response as a reader.
///
/// Transport errors surface as `std::io::Error` from `poll_read`.
pub fn body_reader(response: reqwest::Response) -> impl AsyncRead + Send + Unpin {
    let chunks = response
        .bytes_stream()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
    StreamReader::new(Box::pin(chunks))
}
