use std::io;
use bytes::Bytes;
use futures::Stream;
use log::{error, info, warn};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use crate::error::DeliveryError;
use crate::render::RenderedArtifact;
use crate::storage::ObjectStore;
use crate::workspace::Workspace;

pub const VIDEO_CONTENT_TYPE: &str = "video/mp4";

const STREAM_CHUNK_BYTES: usize = 64 * 1024;

/// How a rendered video reached (or failed to reach) the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Uploaded { public_url: String, storage_key: String },
    Streamed { byte_count: u64 },
    Failed { reason: String },
}

/// Object key and download file name for a job's video
pub fn storage_key(job_id: &str) -> String {
    format!("{}.mp4", job_id)
}

/// Choose between upload and direct streaming.
///
/// With a store configured the artifact is uploaded; any failure on that path
/// is logged and turns into the streaming fallback, never into an error.
/// `Streamed` tells the caller to send the bytes itself. `Failed` means the
/// artifact is no longer there to send, so the caller must answer with an
/// error before any response bytes go out.
pub async fn deliver(
    artifact: &RenderedArtifact,
    job_id: &str,
    store: Option<&dyn ObjectStore>,
) -> DeliveryOutcome {
    if let Some(store) = store {
        info!("Uploading to object storage...");
        match upload(artifact, job_id, store).await {
            Ok(outcome) => return outcome,
            Err(e) => error!("Upload failed, falling back to direct file response: {}", e),
        }
    }

    match tokio::fs::metadata(&artifact.path).await {
        Ok(meta) if meta.is_file() => DeliveryOutcome::Streamed {
            byte_count: meta.len(),
        },
        Ok(_) => DeliveryOutcome::Failed {
            reason: format!("{} is not a regular file", artifact.path.display()),
        },
        Err(e) => {
            error!("Rendered video for job {} is unavailable: {}", job_id, e);
            DeliveryOutcome::Failed { reason: e.to_string() }
        }
    }
}

async fn upload(
    artifact: &RenderedArtifact,
    job_id: &str,
    store: &dyn ObjectStore,
) -> Result<DeliveryOutcome, DeliveryError> {
    // Whole file in memory: simple, but bounds how many large uploads can run at once
    let bytes = tokio::fs::read(&artifact.path)
        .await
        .map_err(DeliveryError::ReadArtifact)?;

    let storage_key = storage_key(job_id);
    store.put(&storage_key, bytes, VIDEO_CONTENT_TYPE).await?;
    let public_url = store.public_url(&storage_key)?;

    info!("Video uploaded successfully: {}", public_url);
    Ok(DeliveryOutcome::Uploaded { public_url, storage_key })
}

/// Stream an opened artifact, releasing the workspace before the stream
/// finishes.
///
/// The transport stops polling once it has sent `expected_bytes` (the
/// Content-Length), so the workspace is released as soon as the chunk that
/// reaches that count has been read, before it is handed out. A read error
/// releases the workspace and ends the stream with that error. If the stream
/// is dropped early (client disconnect) the workspace's `Drop` removes it.
pub fn stream_artifact(
    mut file: File,
    workspace: Workspace,
    job_id: String,
    expected_bytes: u64,
) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
    async_stream::stream! {
        let mut buf = vec![0u8; STREAM_CHUNK_BYTES];
        let mut sent: u64 = 0;
        let mut last: Option<Bytes> = None;

        loop {
            match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    sent += n as u64;
                    let chunk = Bytes::copy_from_slice(&buf[..n]);
                    if sent >= expected_bytes {
                        last = Some(chunk);
                        break;
                    }
                    yield Ok(chunk);
                }
                Err(e) => {
                    error!("File stream error for job {}: {}", job_id, e);
                    drop(file);
                    workspace.release().await;
                    yield Err(e);
                    return;
                }
            }
        }

        if sent != expected_bytes {
            warn!("Job {} streamed {} bytes, expected {}", job_id, sent, expected_bytes);
        }
        drop(file);
        workspace.release().await;
        info!("Job {} delivered: {:?}", job_id, DeliveryOutcome::Streamed { byte_count: sent });

        if let Some(chunk) = last {
            yield Ok(chunk);
        }
    }
}
