//! Remote object storage for rendered videos
//!
//! The service needs exactly two operations: store bytes under a key without
//! overwriting, and turn a key into a public URL. [`SupabaseStore`] speaks
//! the Supabase Storage REST API.

use async_trait::async_trait;
use log::debug;
use reqwest::header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE};
use url::Url;
use crate::config::StorageTarget;
use crate::error::StorageError;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key`; fails if the key already exists
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), StorageError>;

    /// Publicly retrievable URL for `key`
    fn public_url(&self, key: &str) -> Result<String, StorageError>;
}

/// Supabase Storage client
#[derive(Debug, Clone)]
pub struct SupabaseStore {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    bucket: String,
}

impl SupabaseStore {
    /// The endpoint is validated lazily so a bad URL only costs the upload,
    /// which then falls back to streaming.
    pub fn new(target: StorageTarget) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("renderd/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(SupabaseStore {
            client,
            endpoint: target.url,
            api_key: target.key,
            bucket: target.bucket,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// `<endpoint>/storage/v1/object[/public]/<bucket>/<key>`
    fn object_url(&self, public: bool, key: &str) -> Result<Url, StorageError> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| StorageError::InvalidEndpoint(format!("{}: {}", self.endpoint, e)))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(StorageError::InvalidEndpoint(format!(
                "{}: unsupported scheme {}",
                self.endpoint,
                url.scheme()
            )));
        }

        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                StorageError::InvalidEndpoint(format!("{}: cannot be a base URL", self.endpoint))
            })?;
            segments.pop_if_empty().extend(["storage", "v1", "object"]);
            if public {
                segments.push("public");
            }
            segments.push(&self.bucket).push(key);
        }

        Ok(url)
    }
}

#[async_trait]
impl ObjectStore for SupabaseStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), StorageError> {
        let url = self.object_url(false, key)?;
        debug!("Uploading {} bytes to {}", bytes.len(), url);

        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header("apikey", &self.api_key)
            .header(CONTENT_TYPE, content_type)
            .header(CACHE_CONTROL, "max-age=3600")
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }

    fn public_url(&self, key: &str) -> Result<String, StorageError> {
        Ok(self.object_url(true, key)?.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::{Path, State},
        http::{HeaderMap, StatusCode},
        routing::post,
        Router,
    };
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    type Objects = Arc<Mutex<HashMap<String, (String, Vec<u8>)>>>;

    async fn upload(
        State(objects): State<Objects>,
        Path((bucket, key)): Path<(String, String)>,
        headers: HeaderMap,
        body: Bytes,
    ) -> StatusCode {
        if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer test-key") {
            return StatusCode::UNAUTHORIZED;
        }
        if headers.get("x-upsert").and_then(|v| v.to_str().ok()) != Some("false") {
            return StatusCode::BAD_REQUEST;
        }
        let content_type = headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let mut objects = objects.lock().unwrap();
        let id = format!("{}/{}", bucket, key);
        if objects.contains_key(&id) {
            return StatusCode::CONFLICT;
        }
        objects.insert(id, (content_type, body.to_vec()));
        StatusCode::OK
    }

    async fn spawn_storage() -> (String, Objects) {
        let objects: Objects = Arc::default();
        let app = Router::new()
            .route("/storage/v1/object/:bucket/:key", post(upload))
            .with_state(objects.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), objects)
    }

    fn store(endpoint: &str) -> SupabaseStore {
        SupabaseStore::new(StorageTarget {
            url: endpoint.to_string(),
            key: "test-key".to_string(),
            bucket: "videos".to_string(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_put_stores_object() {
        let (endpoint, objects) = spawn_storage().await;
        let store = store(&endpoint);

        store.put("render_1_a.mp4", b"video".to_vec(), "video/mp4").await.unwrap();

        let objects = objects.lock().unwrap();
        let (content_type, bytes) = objects.get("videos/render_1_a.mp4").unwrap();
        assert_eq!(content_type, "video/mp4");
        assert_eq!(bytes, b"video");
    }

    #[tokio::test]
    async fn test_put_does_not_overwrite() {
        let (endpoint, objects) = spawn_storage().await;
        let store = store(&endpoint);

        store.put("dup.mp4", b"first".to_vec(), "video/mp4").await.unwrap();
        let second = store.put("dup.mp4", b"second".to_vec(), "video/mp4").await;

        assert!(matches!(second, Err(StorageError::Rejected { status: 409, .. })));
        assert_eq!(objects.lock().unwrap().get("videos/dup.mp4").unwrap().1, b"first");
    }

    #[tokio::test]
    async fn test_put_reports_unreachable_endpoint() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = store(&format!("http://{}", addr)).put("x.mp4", vec![1], "video/mp4").await;
        assert!(matches!(result, Err(StorageError::Request(_))));
    }

    #[test]
    fn test_public_url() {
        let store = store("https://abc.supabase.co");
        assert_eq!(
            store.public_url("render_1_a.mp4").unwrap(),
            "https://abc.supabase.co/storage/v1/object/public/videos/render_1_a.mp4"
        );

        let trailing = self::store("https://abc.supabase.co/");
        assert_eq!(
            trailing.public_url("k.mp4").unwrap(),
            "https://abc.supabase.co/storage/v1/object/public/videos/k.mp4"
        );
    }

    #[test]
    fn test_invalid_endpoint() {
        assert!(matches!(
            store("not a url").public_url("k.mp4"),
            Err(StorageError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            store("ftp://files.example.com").public_url("k.mp4"),
            Err(StorageError::InvalidEndpoint(_))
        ));
    }
}
