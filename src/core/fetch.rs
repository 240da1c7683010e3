//! Single-resource transfer
//!
//! Streams one remote resource into one file, chunk by chunk. The destination
//! file is only created once the server has answered with a success status,
//! so a `ConnectFailed` never leaves anything behind; a `ReadFailed` may leave
//! a truncated file which the caller is responsible for removing.

use std::path::{Path, PathBuf};

use log::debug;
use reqwest::Client;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use url::Url;

use crate::core::error::{Error, Result};
use crate::core::stream::body_reader;

/// Open the remote stream for `locator`
async fn open_stream(client: &Client, locator: &Url) -> Result<impl AsyncRead + Unpin> {
    let response = client
        .get(locator.clone())
        .send()
        .await
        .map_err(|e| Error::connect(locator, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::connect(locator, format!("HTTP {status}")));
    }

    Ok(body_reader(response))
}

/// Copy `body` into `file`, `chunk_size` bytes at a time, until a
/// zero-length read signals the end of the body
async fn stream_to_file<R: AsyncRead + Unpin>(
    locator: &Url,
    mut body: R,
    file: &mut tokio::fs::File,
    chunk_size: usize,
) -> Result<u64> {
    let mut buffer = vec![0u8; chunk_size];
    let mut written = 0u64;

    loop {
        let bytes_read = body
            .read(&mut buffer)
            .await
            .map_err(|e| Error::read(locator, e))?;

        if bytes_read == 0 {
            break;
        }

        file.write_all(&buffer[..bytes_read]).await?;
        written += bytes_read as u64;
    }

    file.flush().await?;
    Ok(written)
}

/// Fetch `locator` into `folder/filename`.
///
/// Returns the number of bytes written. The folder is created if needed.
pub async fn fetch_to_file(
    client: &Client,
    locator: &Url,
    folder: &Path,
    filename: &str,
    chunk_size: usize,
) -> Result<u64> {
    if chunk_size == 0 {
        return Err(Error::InvalidInput("chunk_size must be at least 1 byte".to_string()));
    }

    let body = open_stream(client, locator).await?;

    tokio::fs::create_dir_all(folder).await?;
    let destination: PathBuf = folder.join(filename);
    let mut file = tokio::fs::File::create(&destination).await?;

    let written = stream_to_file(locator, body, &mut file, chunk_size).await?;
    debug!("Wrote {} bytes from {} to {}", written, locator, destination.display());
    Ok(written)
}
