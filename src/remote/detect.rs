//! Protocol auto-detection.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{SlideError, TileError};
use crate::slide::{ServerGeneration, Slide, SlideSource, SlideView};
use crate::tile::{codec, TileIdentity, NATIVE_TILE_SIZE};

use super::client::CytomineClient;
use super::protocol::{iip_url, TileProtocol};

/// Pick the server generation and tile protocol for `image_id`.
///
/// Images without a reference slice live on a legacy server, which only
/// speaks Zoomify. Otherwise the first native tile is requested over IIP and
/// decoded; if it cannot be downloaded, decoded, or has the wrong size,
/// Zoomify is used.
pub async fn infer_protocol(
    client: &CytomineClient,
    image_id: u64,
) -> Result<(ServerGeneration, TileProtocol), SlideError> {
    let slide = Arc::new(client.fetch_slide(image_id).await?);
    infer_protocol_for(client, &slide).await
}

/// Same as [`infer_protocol`] for an already resolved slide.
pub async fn infer_protocol_for(
    client: &CytomineClient,
    slide: &Arc<Slide>,
) -> Result<(ServerGeneration, TileProtocol), SlideError> {
    let generation = slide.generation();
    if generation == ServerGeneration::Legacy {
        debug!(image_id = slide.id(), "No reference slice, using zoomify");
        return Ok((generation, TileProtocol::Zoomify));
    }

    let view = slide.view(0)?;
    let identity = TileIdentity::new(
        slide.id(),
        0,
        0,
        0,
        NATIVE_TILE_SIZE.min(view.width()),
        NATIVE_TILE_SIZE.min(view.height()),
    )
    .map_err(|e| SlideError::Api(e.to_string()))?;

    let protocol = match check_iip(client, &view, &identity).await {
        Ok(()) => TileProtocol::Iip,
        Err(e) => {
            debug!(image_id = slide.id(), error = %e, "IIP unusable, falling back to zoomify");
            TileProtocol::Zoomify
        }
    };

    info!(image_id = slide.id(), %protocol, "Detected tile protocol");
    Ok((generation, protocol))
}

/// Download the first native tile over IIP and check it is a usable image.
async fn check_iip(
    client: &CytomineClient,
    view: &SlideView,
    identity: &TileIdentity,
) -> Result<(), TileError> {
    let url = iip_url(view, identity)?;
    let data = client.download(url, identity).await?;
    codec::decode_tile(&data, identity.width(), identity.height())?;
    Ok(())
}
