//! HTTP client for the Cytomine REST API.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::error::{FetchError, SlideError};
use crate::slide::{
    Annotation, ImageInstance, ImagingServerList, SliceInstance, Slide, SlideSource,
};
use crate::tile::TileIdentity;

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Client for a Cytomine instance.
///
/// Cloning is cheap: clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct CytomineClient {
    http: Client,
    host: Url,
}

impl CytomineClient {
    /// Create a client for `host` with the default timeout.
    ///
    /// `host` may omit the scheme, in which case HTTPS is assumed.
    pub fn new(host: &str) -> Result<Self, SlideError> {
        Self::with_timeout(host, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a client with a custom request timeout.
    pub fn with_timeout(host: &str, timeout: Duration) -> Result<Self, SlideError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SlideError::Api(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            host: parse_host(host)?,
        })
    }

    /// Base URL of the Cytomine instance, always ending with a slash.
    pub fn host(&self) -> &Url {
        &self.host
    }

    /// Resolve `path` against the host.
    pub fn endpoint(&self, path: &str) -> Result<Url, SlideError> {
        self.host
            .join(path.trim_start_matches('/'))
            .map_err(|e| SlideError::Api(format!("Invalid endpoint '{}': {}", path, e)))
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    /// Fetch an image instance.
    pub async fn image_instance(&self, image_id: u64) -> Result<ImageInstance, SlideError> {
        let url = self.endpoint(&format!("api/imageinstance/{}.json", image_id))?;
        self.get_json(url, "image instance")
            .await?
            .ok_or(SlideError::NotFound(image_id))
    }

    /// Fetch the reference slice of an image instance.
    ///
    /// Legacy servers have no slices and answer 404, reported as `None`.
    pub async fn reference_slice(&self, image_id: u64) -> Result<Option<SliceInstance>, SlideError> {
        let url = self.endpoint(&format!(
            "api/imageinstance/{}/sliceinstance/reference.json",
            image_id
        ))?;
        self.get_json(url, "reference slice").await
    }

    /// Fetch an annotation.
    pub async fn annotation(&self, annotation_id: u64) -> Result<Annotation, SlideError> {
        let url = self.endpoint(&format!("api/annotation/{}.json", annotation_id))?;
        self.get_json(url, "annotation")
            .await?
            .ok_or(SlideError::AnnotationNotFound(annotation_id))
    }

    /// URL of the first imaging server registered on the instance.
    pub async fn imaging_server_url(&self) -> Result<String, SlideError> {
        let url = self.endpoint("api/imaging_server.json")?;
        let servers: ImagingServerList = self
            .get_json(url, "imaging server list")
            .await?
            .ok_or_else(|| SlideError::Api("imaging server list not found".to_string()))?;

        servers
            .collection
            .into_iter()
            .next()
            .map(|server| server.url)
            .ok_or_else(|| SlideError::Api("no imaging server registered".to_string()))
    }

    /// GET a JSON document. A 404 yields `Ok(None)`.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        what: &'static str,
    ) -> Result<Option<T>, SlideError> {
        debug!(%url, "GET {}", what);

        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| SlideError::Api(format!("Request to {} failed: {}", url, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            warn!(%url, %status, "Unexpected status fetching {}", what);
            return Err(SlideError::Api(format!("HTTP {} from {}", status, url)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| SlideError::Api(format!("Failed to read response: {}", e)))?;

        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| SlideError::Decode {
                what,
                message: e.to_string(),
            })
    }

    // =========================================================================
    // Tile Downloads
    // =========================================================================

    /// Download the payload of a tile.
    ///
    /// HTTP 400 and 404 mean the server rejected the region itself and map to
    /// `InvalidIdentity`. Every other failure is transient.
    pub async fn download(&self, url: Url, identity: &TileIdentity) -> Result<Bytes, FetchError> {
        debug!(%identity, %url, "Downloading tile");

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Failure(format!("Request for tile {} failed: {}", identity, e)))?;

        let status = response.status();
        match status {
            s if s.is_success() => {}
            StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => {
                return Err(identity.invalid(format!("server answered {}", status)));
            }
            _ => {
                warn!(%identity, %status, "Tile download failed");
                return Err(FetchError::Failure(format!(
                    "HTTP {} for tile {}",
                    status, identity
                )));
            }
        }

        response
            .bytes()
            .await
            .map_err(|e| FetchError::Failure(format!("Failed to read tile {}: {}", identity, e)))
    }
}

#[async_trait]
impl SlideSource for CytomineClient {
    async fn fetch_slide(&self, image_id: u64) -> Result<Slide, SlideError> {
        let instance = self.image_instance(image_id).await?;
        let slice = self.reference_slice(image_id).await?;
        Ok(Slide::new(instance, slice))
    }
}

fn parse_host(host: &str) -> Result<Url, SlideError> {
    let with_scheme = if host.contains("://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    };

    let mut url = Url::parse(&with_scheme)
        .map_err(|e| SlideError::Api(format!("Invalid host '{}': {}", host, e)))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
