use axum::extract::{Multipart, Query, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine;
use garde::Validate;

use crate::app_state::AppState;
use crate::models::api::{
    ErrorBody, OutputQuery, PersistRequest, PersistResponse, ShrinkResponse, ShrinkUrlRequest,
};
use crate::services::artifacts::{public_path, ArtifactStoreError};
use crate::services::tinify::{ShrinkOutcome, TinifyError};

/// Errors rendered as `{ "error": "..." }`, except upstream failures which
/// are forwarded with the upstream status and body.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    UnsupportedMedia(String),

    #[error("{0}")]
    NotFound(String),

    #[error("upstream returned HTTP {status}")]
    Upstream { status: StatusCode, body: Vec<u8> },

    #[error("{0}")]
    Transport(String),

    #[error("{0}")]
    Internal(String),
}

impl From<TinifyError> for ProxyError {
    fn from(e: TinifyError) -> Self {
        match e {
            TinifyError::Upstream { status, body } => Self::Upstream { status, body },
            TinifyError::Http(e) => Self::Transport(e.to_string()),
            TinifyError::ForeignOutputUrl(_) => Self::BadRequest(e.to_string()),
            TinifyError::BaseUrl(_) => Self::Internal(e.to_string()),
        }
    }
}

impl From<ArtifactStoreError> for ProxyError {
    fn from(e: ArtifactStoreError) -> Self {
        match e {
            ArtifactStoreError::InvalidName(_) => Self::BadRequest(e.to_string()),
            ArtifactStoreError::NotFound(_) => Self::NotFound(e.to_string()),
            ArtifactStoreError::Io(_) => Self::Internal(e.to_string()),
        }
    }
}

fn error_json(status: StatusCode, message: String) -> Response {
    let body = ErrorBody {
        error: Some(message),
        message: None,
    };
    (status, Json(body)).into_response()
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(m) => error_json(StatusCode::BAD_REQUEST, m),
            Self::UnsupportedMedia(m) => error_json(StatusCode::UNSUPPORTED_MEDIA_TYPE, m),
            Self::NotFound(m) => error_json(StatusCode::NOT_FOUND, m),
            Self::Transport(m) => error_json(StatusCode::BAD_GATEWAY, m),
            Self::Internal(m) => {
                tracing::error!(error = %m, "Proxy internal error");
                error_json(StatusCode::INTERNAL_SERVER_ERROR, m)
            }
            Self::Upstream { status, body } => {
                if serde_json::from_slice::<serde_json::Value>(&body).is_ok() {
                    (status, [(CONTENT_TYPE, "application/json")], body).into_response()
                } else {
                    let message = String::from_utf8_lossy(&body).trim().to_string();
                    let message = if message.is_empty() {
                        format!("Compression service returned HTTP {}", status.as_u16())
                    } else {
                        message
                    };
                    error_json(status, message)
                }
            }
        }
    }
}

/// Credential precedence: `Authorization: Basic` header, then the explicit
/// `apiKey` value, then the server's own key.
fn resolve_api_key(
    headers: &HeaderMap,
    explicit: Option<String>,
    state: &AppState,
) -> Result<String, ProxyError> {
    if let Some(value) = headers.get(AUTHORIZATION) {
        return decode_basic(value.to_str().unwrap_or_default())
            .ok_or_else(|| ProxyError::BadRequest("Malformed Authorization header".to_string()));
    }
    explicit
        .filter(|key| !key.trim().is_empty())
        .or_else(|| state.env_api_key().map(str::to_string))
        .ok_or_else(|| ProxyError::BadRequest("API key is required".to_string()))
}

/// Inverse of `basic_auth_value`: `Basic base64("api:" + key)` -> key.
fn decode_basic(header: &str) -> Option<String> {
    let token = header.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(token.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (_, key) = decoded.split_once(':')?;
    (!key.is_empty()).then(|| key.to_string())
}

fn shrink_response(outcome: ShrinkOutcome) -> Json<ShrinkResponse> {
    Json(ShrinkResponse {
        input: outcome.input,
        output: Some(outcome.output),
        location: outcome.location,
    })
}

fn count_failure(kind: &'static str, result: &Result<ShrinkOutcome, TinifyError>) {
    if let Err(e) = result {
        tracing::warn!(kind, error = %e, "Upstream shrink failed");
        metrics::counter!("shrink_failures_total", "kind" => kind).increment(1);
    }
}

/// POST /api/tinypng/shrink/file: multipart upload (`image`, optional `apiKey`).
pub async fn shrink_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<ShrinkResponse>, ProxyError> {
    metrics::counter!("shrink_requests_total", "kind" => "file").increment(1);

    let mut image: Option<Vec<u8>> = None;
    let mut form_key: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ProxyError::BadRequest(e.to_string()))?
    {
        match field.name() {
            Some("image") => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ProxyError::BadRequest(e.to_string()))?;
                image = Some(data.to_vec());
            }
            Some("apiKey") => {
                form_key = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ProxyError::BadRequest(e.to_string()))?,
                );
            }
            _ => {}
        }
    }

    let api_key = resolve_api_key(&headers, form_key, &state)?;
    let image = image
        .filter(|data| !data.is_empty())
        .ok_or_else(|| ProxyError::BadRequest("Image file is required".to_string()))?;
    image::guess_format(&image)
        .map_err(|_| ProxyError::UnsupportedMedia("Unsupported image format".to_string()))?;

    tracing::info!(size = image.len(), "Forwarding image to compression service");
    let result = state.tinify.shrink_bytes(image, &api_key).await;
    count_failure("file", &result);
    Ok(shrink_response(result?))
}

/// POST /api/tinypng/shrink/url: compress an image the service fetches itself.
pub async fn shrink_url(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ShrinkUrlRequest>,
) -> Result<Json<ShrinkResponse>, ProxyError> {
    metrics::counter!("shrink_requests_total", "kind" => "url").increment(1);

    let api_key = resolve_api_key(&headers, request.api_key.clone(), &state)?;
    request
        .validate()
        .map_err(|_| ProxyError::BadRequest("Image URL is required".to_string()))?;

    let result = state.tinify.shrink_remote(&request.image_url, &api_key).await;
    count_failure("url", &result);
    Ok(shrink_response(result?))
}

/// GET /api/tinypng/output: stream a compressed artifact back to the client.
pub async fn output(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<OutputQuery>,
) -> Result<Response, ProxyError> {
    let api_key = resolve_api_key(&headers, query.api_key, &state)?;
    let download = state.tinify.download(&query.url, &api_key).await?;
    metrics::counter!("artifact_downloads_total").increment(1);

    Ok(([(CONTENT_TYPE, download.content_type)], download.bytes).into_response())
}

/// POST /api/tinypng/persist: download an artifact and keep it server side.
pub async fn persist(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<PersistRequest>,
) -> Result<Json<PersistResponse>, ProxyError> {
    let store = state
        .artifacts
        .clone()
        .ok_or_else(|| ProxyError::NotFound("artifact persistence is disabled".to_string()))?;
    let api_key = resolve_api_key(&headers, request.api_key.clone(), &state)?;
    request
        .validate()
        .map_err(|e| ProxyError::BadRequest(e.to_string()))?;

    let download = state.tinify.download(&request.url, &api_key).await?;
    let name = store
        .save(&request.name, &download.content_type, &download.bytes)
        .await?;
    metrics::counter!("artifacts_persisted_total").increment(1);

    Ok(Json(PersistResponse {
        path: public_path(&name),
        size: download.bytes.len() as u64,
        content_type: download.content_type,
    }))
}
