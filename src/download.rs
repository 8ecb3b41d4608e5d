//! Streaming file download with progress and cancellation

use crate::error::Result;
use crate::progress::{ProgressSink, TransferReporter};
use futures::StreamExt;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Download `url` to `dest`, reporting byte progress and honoring
/// cooperative cancellation.
///
/// Returns `Ok(false)` on cancellation; partial writes are left on disk for
/// the caller to reuse or clean up. Transport and filesystem errors
/// propagate.
pub async fn download_file(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    cancel: &CancellationToken,
    sink: &dyn ProgressSink,
) -> Result<bool> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let response = client.get(url).send().await?.error_for_status()?;
    let total = response.content_length().unwrap_or(0);

    let mut reporter = TransferReporter::begin(sink, "Downloading Ollama", total);
    let mut file = tokio::fs::File::create(dest).await?;
    let mut stream = response.bytes_stream();

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(url = %url, "Download cancelled");
                return Ok(false);
            }
            chunk = stream.next() => chunk,
        };

        match chunk {
            None => break,
            Some(chunk) => {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                reporter.update(chunk.len() as u64, "downloading");
            }
        }
    }

    file.flush().await?;
    reporter.done();

    tracing::info!(url = %url, dest = ?dest, "Download complete");
    Ok(true)
}
