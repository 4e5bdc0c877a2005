use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use log::{debug, error, info};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use crate::config::ServiceConfig;
use crate::delivery::{self, DeliveryOutcome};
use crate::error::{DeliveryError, FailedJob, JobError};
use crate::render::{EditlyInvoker, RenderResult, RenderedArtifact};
use crate::spec_file;
use crate::storage::ObjectStore;
use crate::workspace::{self, Workspace};

/// Lifecycle of a single render job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Init,
    SpecWritten,
    Rendered,
    Delivering,
    Done(JobStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Success,
    Failure,
}

/// One request's render-and-deliver run. Lives only as long as the request.
#[derive(Debug)]
pub struct RenderJob {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub artifact: Option<RenderedArtifact>,
    started: Instant,
    state: JobState,
}

impl RenderJob {
    pub fn new() -> Self {
        RenderJob {
            id: workspace::new_job_id(),
            started_at: Utc::now(),
            artifact: None,
            started: Instant::now(),
            state: JobState::Init,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn advance(&mut self, next: JobState) {
        debug!("Job {}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }

    /// Mark the job failed and build the error the transport will report
    fn fail(&mut self, error: JobError) -> FailedJob {
        self.advance(JobState::Done(JobStatus::Failure));
        error!("Render error for job {}: {}", self.id, error);
        FailedJob {
            job_id: Some(self.id.clone()),
            error,
            elapsed: Some(self.elapsed()),
        }
    }
}

impl Default for RenderJob {
    fn default() -> Self {
        Self::new()
    }
}

/// JSON body returned when the video was uploaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedVideo {
    pub success: bool,
    pub url: String,
    pub file_name: String,
    pub size: u64,
    pub render_time: u64,
}

pub type VideoBody = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Video bytes to send directly. The body releases the workspace once it
/// has read `size_bytes` from the artifact.
pub struct VideoStream {
    pub file_name: String,
    pub size_bytes: u64,
    pub render_time: Duration,
    pub body: VideoBody,
}

/// What the transport should send for a job that reached delivery
pub enum JobResponse {
    Uploaded(UploadedVideo),
    Stream(VideoStream),
}

/// Drives jobs from spec to delivered video
#[derive(Clone)]
pub struct JobRunner {
    scratch_root: PathBuf,
    invoker: EditlyInvoker,
    store: Option<Arc<dyn ObjectStore>>,
    permits: Option<Arc<Semaphore>>,
}

impl JobRunner {
    pub fn new(cfg: &ServiceConfig, store: Option<Arc<dyn ObjectStore>>) -> Self {
        JobRunner {
            scratch_root: cfg.scratch_root.clone(),
            invoker: EditlyInvoker::from_config(cfg),
            store,
            permits: cfg
                .max_concurrent_renders
                .map(|n| Arc::new(Semaphore::new(n.max(1)))),
        }
    }

    pub fn upload_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Run one job. `spec` must already be validated as a JSON object.
    ///
    /// Every path out of here releases the workspace, except the streaming
    /// one, which hands the workspace to the response body.
    pub async fn run(&self, spec: Value) -> Result<JobResponse, FailedJob> {
        let permit = match &self.permits {
            Some(permits) => match permits.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => return Err(FailedJob::rejected(JobError::AtCapacity)),
            },
            None => None,
        };

        let mut job = RenderJob::new();
        info!("Received render request, job {}", job.id);

        let workspace = match Workspace::acquire(&self.scratch_root, &job.id).await {
            Ok(workspace) => workspace,
            Err(e) => return Err(job.fail(e)),
        };

        let spec_path = match spec_file::write_spec(&workspace, &spec).await {
            Ok(path) => path,
            Err(e) => {
                workspace.release().await;
                return Err(job.fail(e));
            }
        };
        job.advance(JobState::SpecWritten);

        info!("Starting video render...");
        let artifact = match self.invoker.render(&spec_path, workspace.path()).await {
            RenderResult::Success(artifact) => artifact,
            RenderResult::Failure { reason, .. } => {
                workspace.release().await;
                return Err(job.fail(reason.into()));
            }
        };
        job.artifact = Some(artifact.clone());
        job.advance(JobState::Rendered);

        job.advance(JobState::Delivering);
        match delivery::deliver(&artifact, &job.id, self.store.as_deref()).await {
            DeliveryOutcome::Uploaded { public_url, storage_key } => {
                workspace.release().await;
                job.advance(JobState::Done(JobStatus::Success));
                Ok(JobResponse::Uploaded(UploadedVideo {
                    success: true,
                    url: public_url,
                    file_name: storage_key,
                    size: artifact.size_bytes,
                    render_time: job.elapsed().as_millis() as u64,
                }))
            }
            DeliveryOutcome::Streamed { byte_count } => {
                let file = match tokio::fs::File::open(&artifact.path).await {
                    Ok(file) => file,
                    Err(e) => {
                        workspace.release().await;
                        return Err(job.fail(DeliveryError::Stream(e).into()));
                    }
                };

                info!("Sending video file directly...");
                let body = delivery::stream_artifact(file, workspace, job.id.clone(), byte_count);
                // The permit rides along with the body so streaming counts as in flight
                let body = body.map(move |chunk| {
                    let _held = &permit;
                    chunk
                });

                Ok(JobResponse::Stream(VideoStream {
                    file_name: delivery::storage_key(&job.id),
                    size_bytes: byte_count,
                    render_time: job.elapsed(),
                    body: Box::pin(body),
                }))
            }
            DeliveryOutcome::Failed { reason } => {
                workspace.release().await;
                Err(job.fail(DeliveryError::Stream(io::Error::other(reason)).into()))
            }
        }
    }
}
