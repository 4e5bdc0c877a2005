//! HTTP surface: `POST /render`, `GET /health` and a JSON 404

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{rejection::BytesRejection, DefaultBodyLimit, State},
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
        HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{error, info, warn};
use serde_json::{json, Value};

use crate::config::ServiceConfig;
use crate::delivery::VIDEO_CONTENT_TYPE;
use crate::error::{FailedJob, JobError};
use crate::job::{JobResponse, JobRunner, VideoStream};
use crate::storage::{ObjectStore, SupabaseStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub runner: JobRunner,
}

impl AppState {
    pub fn from_config(cfg: &ServiceConfig) -> Self {
        AppState {
            runner: JobRunner::new(cfg, build_store(cfg)),
        }
    }
}

/// Object store for the configured triple; None unless all three parts are set
pub fn build_store(cfg: &ServiceConfig) -> Option<Arc<dyn ObjectStore>> {
    let target = cfg.storage.target()?;
    match SupabaseStore::new(target) {
        Ok(store) => {
            info!("Object storage upload enabled (bucket {})", store.bucket());
            Some(Arc::new(store))
        }
        Err(e) => {
            error!("Failed to initialise object storage client, uploads disabled: {}", e);
            None
        }
    }
}

pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/render", post(handle_render))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .fallback(handle_not_found)
        .with_state(state)
}

/// Handler: GET /health
pub async fn handle_health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "editly-renderer" }))
}

async fn handle_not_found() -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Endpoint not found" })))
}

/// Handler: POST /render
pub async fn handle_render(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, FailedJob> {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!("Rejected render request body: {}", rejection.body_text());
            let status = rejection.status();
            return Ok((status, Json(json!({ "error": rejection.body_text() }))).into_response());
        }
    };

    let spec = parse_spec(&body)?;

    match state.runner.run(spec).await? {
        JobResponse::Uploaded(video) => Ok(Json(video).into_response()),
        JobResponse::Stream(stream) => Ok(video_response(stream)),
    }
}

/// The body must be a JSON object; anything else is refused before a job exists
pub fn parse_spec(body: &[u8]) -> Result<Value, JobError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(spec) if spec.is_object() => Ok(spec),
        Ok(_) => {
            warn!("Render request body is not a JSON object");
            Err(JobError::InvalidBody)
        }
        Err(e) => {
            warn!("Render request body is not valid JSON: {}", e);
            Err(JobError::InvalidBody)
        }
    }
}

fn video_response(stream: VideoStream) -> Response {
    let mut response = Response::new(Body::from_stream(stream.body));
    let headers = response.headers_mut();

    headers.insert(CONTENT_TYPE, HeaderValue::from_static(VIDEO_CONTENT_TYPE));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(stream.size_bytes));
    if let Ok(disposition) =
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", stream.file_name))
    {
        headers.insert(CONTENT_DISPOSITION, disposition);
    }
    headers.insert(
        "x-render-time",
        HeaderValue::from(stream.render_time.as_millis() as u64),
    );

    response
}
