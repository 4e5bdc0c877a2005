pub mod config;
pub mod error;
pub mod workspace;
pub mod spec_file;
pub mod render;
pub mod storage;
pub mod delivery;
pub mod job;
pub mod http;

#[cfg(test)]
mod test_support;

pub use config::{ServiceConfig, StorageConfig};
pub use error::{FailedJob, JobError, RenderError};
pub use job::{JobResponse, JobRunner, RenderJob};
pub use render::{EditlyInvoker, RenderResult, RenderedArtifact};
pub use delivery::DeliveryOutcome;
pub use http::{router, AppState};
