//! Test doubles and server harness shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, LOCATION};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::future::BoxFuture;
use serde_json::json;

use tiny_squeeze::app_state::AppState;
use tiny_squeeze::models::api::ImageInfo;
use tiny_squeeze::models::credential::Credential;
use tiny_squeeze::models::history::ArtifactRef;
use tiny_squeeze::routes;
use tiny_squeeze::services::artifacts::ArtifactStore;
use tiny_squeeze::services::compression::{
    basic_auth_value, CompressionBackend, CompressionError, CompressionPointer, ImageSource,
};
use tiny_squeeze::services::kv::{KeyValueStore, StoreError};
use tiny_squeeze::services::tinify::TinifyClient;

use crate::fixtures::{COMPRESSED_ARTIFACT, REJECT_MARKER};

pub const GOOD_KEY: &str = "good-key";

// ---------------------------------------------------------------------------
// In-process compression backend
// ---------------------------------------------------------------------------

/// Scripted backend keyed by image name.
#[derive(Default)]
pub struct FakeBackend {
    compressed_sizes: Mutex<HashMap<String, u64>>,
    failing_submit: Mutex<HashMap<String, String>>,
    failing_fetch: Mutex<HashSet<String>>,
    submissions: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn compress_to(&self, name: &str, size: u64) {
        self.compressed_sizes
            .lock()
            .unwrap()
            .insert(name.to_string(), size);
    }

    pub fn fail_submit(&self, name: &str, message: &str) {
        self.failing_submit
            .lock()
            .unwrap()
            .insert(name.to_string(), message.to_string());
    }

    pub fn fail_fetch(&self, name: &str) {
        self.failing_fetch.lock().unwrap().insert(name.to_string());
    }

    pub fn recover(&self, name: &str) {
        self.failing_submit.lock().unwrap().remove(name);
        self.failing_fetch.lock().unwrap().remove(name);
    }

    pub fn submissions(&self) -> Vec<String> {
        self.submissions.lock().unwrap().clone()
    }
}

impl CompressionBackend for FakeBackend {
    fn submit<'a>(
        &'a self,
        source: ImageSource<'a>,
        _credential: &'a Credential,
    ) -> BoxFuture<'a, Result<CompressionPointer, CompressionError>> {
        Box::pin(async move {
            let (name, original) = match source {
                ImageSource::Bytes { name, data, .. } => (name.to_string(), data.len() as u64),
                ImageSource::Url(url) => (url.to_string(), 0),
            };
            self.submissions.lock().unwrap().push(name.clone());

            // Let sibling pipelines interleave at the network boundary.
            tokio::task::yield_now().await;

            if let Some(message) = self.failing_submit.lock().unwrap().get(&name) {
                return Err(CompressionError::Remote {
                    status: 400,
                    message: message.clone(),
                });
            }
            let size = self
                .compressed_sizes
                .lock()
                .unwrap()
                .get(&name)
                .copied()
                .unwrap_or(original / 2);
            Ok(CompressionPointer {
                location: format!("https://api.tinify.com/output/{name}"),
                compressed_size: size,
                output: ImageInfo {
                    size,
                    content_type: Some("image/png".to_string()),
                    ..ImageInfo::default()
                },
                input: None,
            })
        })
    }

    fn fetch_artifact<'a>(
        &'a self,
        _pointer: &'a CompressionPointer,
        name: &'a str,
        _credential: &'a Credential,
    ) -> BoxFuture<'a, Result<ArtifactRef, CompressionError>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            if self.failing_fetch.lock().unwrap().contains(name) {
                return Err(CompressionError::Remote {
                    status: 500,
                    message: "Failed to download compressed image".to_string(),
                });
            }
            Ok(ArtifactRef::Inline {
                bytes: COMPRESSED_ARTIFACT.to_vec(),
                content_type: "image/png".to_string(),
            })
        })
    }
}

/// Store whose writes always fail, for history-failure isolation tests.
#[derive(Default)]
pub struct ReadOnlyStore;

impl KeyValueStore for ReadOnlyStore {
    fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Ok(None)
    }

    fn set(&self, key: &str, _value: &str) -> Result<(), StoreError> {
        Err(StoreError::Io {
            key: key.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        })
    }

    fn remove(&self, _key: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HTTP harness: fake upstream + real proxy
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Upstream {
    base: String,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == basic_auth_value(GOOD_KEY))
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "Unauthorized", "message": "Credentials are invalid." })),
    )
        .into_response()
}

async fn upstream_shrink(
    State(upstream): State<Upstream>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let is_url_source = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    if !is_url_source && body.ends_with(REJECT_MARKER) {
        return (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Json(json!({ "error": "Unsupported media type", "message": "File type is not supported." })),
        )
            .into_response();
    }
    let input_size = if is_url_source { 2048 } else { body.len() };
    let location = format!("{}/output/abc123", upstream.base);
    (
        StatusCode::CREATED,
        [(LOCATION, location.clone())],
        Json(json!({
            "input": { "size": input_size, "type": "image/png" },
            "output": {
                "size": COMPRESSED_ARTIFACT.len(),
                "type": "image/png",
                "width": 1,
                "height": 1,
                "ratio": 0.5,
                "url": location,
            }
        })),
    )
        .into_response()
}

async fn upstream_output(headers: HeaderMap, Path(id): Path<String>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    if id != "abc123" {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" }))).into_response();
    }
    ([(CONTENT_TYPE, "image/png")], COMPRESSED_ARTIFACT.to_vec()).into_response()
}

/// Serve `router` on an ephemeral local port and return its base URL.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// A stand-in for the Tinify API that accepts only [`GOOD_KEY`].
pub async fn spawn_fake_upstream() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let router = Router::new()
        .route("/shrink", post(upstream_shrink))
        .route("/output/{id}", get(upstream_output))
        .with_state(Upstream { base: base.clone() });
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    base
}

#[derive(Default)]
pub struct ProxyOptions {
    pub env_api_key: Option<String>,
    pub artifact_dir: Option<PathBuf>,
}

async fn proxy_router(upstream: &str, options: ProxyOptions) -> Router {
    let tinify = TinifyClient::new(upstream, Duration::from_secs(10)).unwrap();
    let artifacts = match options.artifact_dir {
        Some(dir) => Some(ArtifactStore::open(dir).await.unwrap()),
        None => None,
    };
    let state = AppState::new(tinify, artifacts, options.env_api_key);
    routes::router(state, None)
}

/// Start the real proxy router in front of `upstream`.
pub async fn spawn_proxy(upstream: &str, options: ProxyOptions) -> String {
    serve(proxy_router(upstream, options).await).await
}

/// Like [`spawn_proxy`], but mounted under `prefix` (e.g. `/tiny`), as
/// behind a reverse proxy. Returns the base URL including the prefix.
pub async fn spawn_proxy_under(prefix: &str, upstream: &str, options: ProxyOptions) -> String {
    let app = Router::new().nest(prefix, proxy_router(upstream, options).await);
    format!("{}{prefix}", serve(app).await)
}

pub fn scratch_dir(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("squeeze-{label}-{}", uuid::Uuid::new_v4()))
}
