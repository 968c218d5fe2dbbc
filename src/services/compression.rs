//! Remote Compression Client: the two-phase call through the proxy.
//!
//! `submit` uploads image bytes (or a source URL) and returns a pointer to
//! the compressed artifact; `fetch_artifact` makes the second round trip
//! that turns the pointer into something usable.

use std::time::Duration;

use base64::Engine;
use futures::future::BoxFuture;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{multipart, Client, Response};

use crate::config::ArtifactMode;
use crate::models::api::{
    ErrorBody, ImageInfo, OutputQuery, PersistRequest, PersistResponse, ShrinkResponse,
    ShrinkUrlRequest,
};
use crate::models::credential::Credential;
use crate::models::history::ArtifactRef;

const SUBMIT_FAILED: &str = "Failed to compress image";
const FETCH_FAILED: &str = "Failed to download compressed image";

/// What to compress. Exactly one of bytes or URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource<'a> {
    Bytes {
        name: &'a str,
        content_type: &'a str,
        data: &'a [u8],
    },
    Url(&'a str),
}

impl<'a> ImageSource<'a> {
    /// Build a source from the two optional inputs; supplying both or
    /// neither is a caller error.
    pub fn from_parts(
        bytes: Option<(&'a str, &'a [u8])>,
        url: Option<&'a str>,
    ) -> Result<Self, CompressionError> {
        match (bytes, url) {
            (Some((name, data)), None) => Ok(Self::Bytes {
                name,
                content_type: "application/octet-stream",
                data,
            }),
            (None, Some(url)) => Ok(Self::Url(url)),
            (Some(_), Some(_)) => Err(CompressionError::InvalidSource(
                "provide image bytes or a URL, not both",
            )),
            (None, None) => Err(CompressionError::InvalidSource(
                "an image file or URL is required",
            )),
        }
    }
}

/// Handle to a compressed artifact held by the remote service.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionPointer {
    pub location: String,
    pub compressed_size: u64,
    pub output: ImageInfo,
    pub input: Option<ImageInfo>,
}

#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    #[error("{0}")]
    InvalidSource(&'static str),

    /// Non-success response; carries the remote message when there was one.
    #[error("{message}")]
    Remote { status: u16, message: String },

    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("No output URL received from the compression service")]
    MissingPointer,

    #[error("Compression service returned an empty artifact")]
    EmptyArtifact,
}

/// Seam between the orchestrator and the network.
pub trait CompressionBackend: Send + Sync {
    fn submit<'a>(
        &'a self,
        source: ImageSource<'a>,
        credential: &'a Credential,
    ) -> BoxFuture<'a, Result<CompressionPointer, CompressionError>>;

    fn fetch_artifact<'a>(
        &'a self,
        pointer: &'a CompressionPointer,
        name: &'a str,
        credential: &'a Credential,
    ) -> BoxFuture<'a, Result<ArtifactRef, CompressionError>>;
}

/// `Basic base64("api:" + secret)`
pub fn basic_auth_value(secret: &str) -> String {
    let token = base64::engine::general_purpose::STANDARD.encode(format!("api:{secret}"));
    format!("Basic {token}")
}

/// Talks to the companion proxy server over HTTP.
pub struct ProxyCompressionClient {
    http: Client,
    base_url: String,
    mode: ArtifactMode,
}

impl ProxyCompressionClient {
    pub fn new(
        base_url: impl Into<String>,
        mode: ArtifactMode,
        timeout: Duration,
    ) -> Result<Self, CompressionError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            mode,
        })
    }

    fn authorize(
        &self,
        request: reqwest::RequestBuilder,
        credential: &Credential,
    ) -> reqwest::RequestBuilder {
        match credential.secret() {
            Some(secret) => request.header(AUTHORIZATION, basic_auth_value(secret)),
            None => request,
        }
    }

    async fn submit_inner(
        &self,
        source: ImageSource<'_>,
        credential: &Credential,
    ) -> Result<CompressionPointer, CompressionError> {
        let request = match source {
            ImageSource::Bytes {
                name,
                content_type,
                data,
            } => {
                let part = multipart::Part::bytes(data.to_vec())
                    .file_name(name.to_string())
                    .mime_str(content_type)?;
                self.http
                    .post(format!("{}/api/tinypng/shrink/file", self.base_url))
                    .multipart(multipart::Form::new().part("image", part))
            }
            ImageSource::Url(url) => self
                .http
                .post(format!("{}/api/tinypng/shrink/url", self.base_url))
                .json(&ShrinkUrlRequest {
                    image_url: url.to_string(),
                    api_key: None,
                }),
        };

        let response = self.authorize(request, credential).send().await?;
        let response = ensure_success(response, SUBMIT_FAILED).await?;
        let body: ShrinkResponse = response.json().await?;

        let location = body
            .location
            .filter(|l| !l.is_empty())
            .or_else(|| body.output.as_ref().and_then(|o| o.url.clone()))
            .ok_or(CompressionError::MissingPointer)?;
        let output = body.output.ok_or(CompressionError::MissingPointer)?;

        Ok(CompressionPointer {
            location,
            compressed_size: output.size,
            output,
            input: body.input,
        })
    }

    async fn fetch_inline(
        &self,
        pointer: &CompressionPointer,
        credential: &Credential,
    ) -> Result<ArtifactRef, CompressionError> {
        let request = self
            .http
            .get(format!("{}/api/tinypng/output", self.base_url))
            .query(&OutputQuery {
                url: pointer.location.clone(),
                api_key: None,
            });
        let response = self.authorize(request, credential).send().await?;
        let response = ensure_success(response, FETCH_FAILED).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| pointer.output.content_type.clone())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let bytes = response.bytes().await?.to_vec();
        if bytes.is_empty() {
            return Err(CompressionError::EmptyArtifact);
        }

        Ok(ArtifactRef::Inline {
            bytes,
            content_type,
        })
    }

    async fn fetch_persisted(
        &self,
        pointer: &CompressionPointer,
        name: &str,
        credential: &Credential,
    ) -> Result<ArtifactRef, CompressionError> {
        let request = self
            .http
            .post(format!("{}/api/tinypng/persist", self.base_url))
            .json(&PersistRequest {
                url: pointer.location.clone(),
                name: name.to_string(),
                api_key: None,
            });
        let response = self.authorize(request, credential).send().await?;
        let response = ensure_success(response, FETCH_FAILED).await?;
        let persisted: PersistResponse = response.json().await?;

        Ok(ArtifactRef::External {
            url: format!("{}{}", self.base_url, persisted.path),
        })
    }
}

/// Map a non-success response to `CompressionError::Remote`, preferring the
/// message the remote side put in its JSON body.
async fn ensure_success(response: Response, fallback: &str) -> Result<Response, CompressionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .and_then(|body| body.best_message().map(str::to_string))
        .unwrap_or_else(|| fallback.to_string());

    tracing::debug!(status = status.as_u16(), %message, "Remote call failed");
    Err(CompressionError::Remote {
        status: status.as_u16(),
        message,
    })
}

impl CompressionBackend for ProxyCompressionClient {
    fn submit<'a>(
        &'a self,
        source: ImageSource<'a>,
        credential: &'a Credential,
    ) -> BoxFuture<'a, Result<CompressionPointer, CompressionError>> {
        Box::pin(self.submit_inner(source, credential))
    }

    fn fetch_artifact<'a>(
        &'a self,
        pointer: &'a CompressionPointer,
        name: &'a str,
        credential: &'a Credential,
    ) -> BoxFuture<'a, Result<ArtifactRef, CompressionError>> {
        match self.mode {
            ArtifactMode::Inline => Box::pin(self.fetch_inline(pointer, credential)),
            ArtifactMode::Server => Box::pin(self.fetch_persisted(pointer, name, credential)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_auth_value() {
        // base64("api:abc123")
        assert_eq!(basic_auth_value("abc123"), "Basic YXBpOmFiYzEyMw==");
    }

    #[test]
    fn test_source_requires_exactly_one_input() {
        let data = [1u8, 2, 3];
        assert!(matches!(
            ImageSource::from_parts(Some(("a.png", &data)), None),
            Ok(ImageSource::Bytes { .. })
        ));
        assert_eq!(
            ImageSource::from_parts(None, Some("https://example.com/a.png")).unwrap(),
            ImageSource::Url("https://example.com/a.png")
        );
        assert!(matches!(
            ImageSource::from_parts(Some(("a.png", &data)), Some("https://example.com/a.png")),
            Err(CompressionError::InvalidSource(_))
        ));
        assert!(matches!(
            ImageSource::from_parts(None, None),
            Err(CompressionError::InvalidSource(_))
        ));
    }

    #[test]
    fn test_remote_error_displays_message() {
        let err = CompressionError::Remote {
            status: 401,
            message: "Credentials are invalid.".to_string(),
        };
        assert_eq!(err.to_string(), "Credentials are invalid.");
    }
}
