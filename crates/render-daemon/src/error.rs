//! Error types for render jobs and their HTTP mapping

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Anything that ends a job before its response has started
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid JSON body required")]
    InvalidBody,

    #[error("Render capacity exhausted, retry later")]
    AtCapacity,

    #[error("Failed to create workspace {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize edit spec: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to write edit spec {path}: {source}")]
    SpecWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

/// Why a render attempt did not yield a trusted artifact
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("Render timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Output video file was not created")]
    OutputMissing,

    #[error("editly exited with {0}")]
    ExitStatus(String),

    #[error("Failed to launch editly: {0}")]
    Launch(String),

    #[error("Failed to inspect render output: {0}")]
    Inspect(String),
}

/// Failures from the remote object store
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid storage endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Storage request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Storage rejected upload ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Always absorbed by falling back to streaming
    #[error("Upload failed: {0}")]
    Upload(#[from] StorageError),

    #[error("Failed to read artifact for upload: {0}")]
    ReadArtifact(#[source] io::Error),

    /// Surfaced only while no response bytes have been sent
    #[error("Failed to stream video file: {0}")]
    Stream(#[source] io::Error),
}

/// A job that ended before any response bytes were written
#[derive(Debug)]
pub struct FailedJob {
    pub job_id: Option<String>,
    pub error: JobError,
    /// None when the request was refused before a job existed
    pub elapsed: Option<Duration>,
}

impl FailedJob {
    /// Refusal that happens before any job or workspace exists
    pub fn rejected(error: JobError) -> Self {
        FailedJob {
            job_id: None,
            error,
            elapsed: None,
        }
    }
}

impl From<JobError> for FailedJob {
    fn from(error: JobError) -> Self {
        FailedJob::rejected(error)
    }
}

impl IntoResponse for FailedJob {
    fn into_response(self) -> Response {
        let body = match &self.error {
            JobError::InvalidBody => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": self.error.to_string() })),
                )
                    .into_response();
            }
            JobError::AtCapacity => {
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({ "error": self.error.to_string() })),
                )
                    .into_response();
            }
            JobError::Delivery(DeliveryError::Stream(_)) => json!({
                "error": "Failed to stream video file",
                "details": self.error.to_string(),
                "renderTime": self.elapsed.map(|d| d.as_millis() as u64),
            }),
            _ => json!({
                "error": "Video rendering failed",
                "details": self.error.to_string(),
                "renderTime": self.elapsed.map(|d| d.as_millis() as u64),
            }),
        };

        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}
