//! Fetch provider downloading tiles from a Cytomine instance.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

use crate::error::FetchError;
use crate::slide::SlideRegistry;
use crate::tile::{FetchProvider, TileIdentity};

use super::client::CytomineClient;
use super::protocol::{
    check_native_cell, iip_url, resolve_view, slide_error, window_url, zoomify_url, TileProtocol,
};

/// [`FetchProvider`] backed by the Cytomine API.
///
/// Slide metadata is resolved through a [`SlideRegistry`] so that it is
/// looked up once per image, not once per tile. Identities are validated
/// against the slide before any tile request is sent.
pub struct RemoteTileProvider {
    client: CytomineClient,
    registry: Arc<SlideRegistry<CytomineClient>>,
    protocol: TileProtocol,

    /// Imaging server URL, resolved on first Zoomify download
    imaging_server: OnceCell<String>,
}

impl RemoteTileProvider {
    /// Create a provider with its own slide registry.
    pub fn new(client: CytomineClient, protocol: TileProtocol) -> Self {
        let registry = Arc::new(SlideRegistry::new(client.clone()));
        Self::with_registry(client, registry, protocol)
    }

    /// Create a provider sharing an existing slide registry.
    pub fn with_registry(
        client: CytomineClient,
        registry: Arc<SlideRegistry<CytomineClient>>,
        protocol: TileProtocol,
    ) -> Self {
        Self {
            client,
            registry,
            protocol,
            imaging_server: OnceCell::new(),
        }
    }

    pub fn protocol(&self) -> TileProtocol {
        self.protocol
    }

    pub fn client(&self) -> &CytomineClient {
        &self.client
    }

    pub fn registry(&self) -> &Arc<SlideRegistry<CytomineClient>> {
        &self.registry
    }

    async fn imaging_server(&self) -> Result<&str, FetchError> {
        self.imaging_server
            .get_or_try_init(|| self.client.imaging_server_url())
            .await
            .map(String::as_str)
            .map_err(|e| FetchError::Failure(e.to_string()))
    }
}

#[async_trait]
impl FetchProvider for RemoteTileProvider {
    #[instrument(skip(self), fields(protocol = %self.protocol))]
    async fn fetch(&self, identity: &TileIdentity) -> Result<Bytes, FetchError> {
        let slide = self
            .registry
            .get_slide(identity.slide_id())
            .await
            .map_err(|e| slide_error(identity, e))?;
        let view = resolve_view(&slide, identity)?;

        if self.protocol.is_grid_aligned() {
            check_native_cell(&view, identity)?;
        }

        let url = match self.protocol {
            TileProtocol::Iip => iip_url(&view, identity)?,
            TileProtocol::Zoomify => zoomify_url(self.imaging_server().await?, &view, identity)?,
            TileProtocol::Window => window_url(&self.client, &view, identity)?,
        };

        let data = self.client.download(url, identity).await?;
        debug!(bytes = data.len(), "Tile downloaded");
        Ok(data)
    }
}
