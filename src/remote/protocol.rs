//! Tile download protocols supported by Cytomine image servers.
//!
//! | Protocol  | Servers          | Regions                       |
//! |-----------|------------------|-------------------------------|
//! | `iip`     | current          | native 256x256 grid cells     |
//! | `zoomify` | current & legacy | native 256x256 grid cells     |
//! | `window`  | current & legacy | any region (rendered as PNG)  |

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use url::Url;

use crate::error::{FetchError, SlideError};
use crate::slide::{Slide, SlideView};
use crate::tile::{TileIdentity, TileTopology, NATIVE_TILE_SIZE};

use super::client::CytomineClient;

/// How tiles are downloaded from the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TileProtocol {
    /// IIP through the slice's image server (current servers only)
    Iip,
    /// Zoomify through the imaging server
    Zoomify,
    /// Arbitrary windows rendered by the core API
    Window,
}

impl TileProtocol {
    /// Whether the protocol only serves cells of the native tile grid.
    pub fn is_grid_aligned(&self) -> bool {
        matches!(self, TileProtocol::Iip | TileProtocol::Zoomify)
    }
}

impl fmt::Display for TileProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TileProtocol::Iip => "iip",
            TileProtocol::Zoomify => "zoomify",
            TileProtocol::Window => "window",
        };
        f.write_str(name)
    }
}

impl FromStr for TileProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "iip" => Ok(TileProtocol::Iip),
            "zoomify" => Ok(TileProtocol::Zoomify),
            "window" => Ok(TileProtocol::Window),
            other => Err(format!(
                "unknown tile protocol '{}' (expected iip, zoomify or window)",
                other
            )),
        }
    }
}

// =============================================================================
// URL Construction
// =============================================================================

/// Column and row of a grid-aligned identity in the native tile grid.
fn grid_cell(identity: &TileIdentity) -> (u32, u32) {
    (identity.x() / NATIVE_TILE_SIZE, identity.y() / NATIVE_TILE_SIZE)
}

fn parse_server_url(base: &str, path: &str) -> Result<Url, FetchError> {
    let raw = format!("{}/{}", base.trim_end_matches('/'), path);
    Url::parse(&raw).map_err(|e| FetchError::Failure(format!("Invalid server URL '{}': {}", raw, e)))
}

/// IIP tile URL. Needs the slide's reference slice.
pub(crate) fn iip_url(view: &SlideView, identity: &TileIdentity) -> Result<Url, FetchError> {
    let slice = view
        .slide()
        .slice()
        .ok_or_else(|| identity.invalid("IIP requires a reference slice"))?;

    let topology = TileTopology::new(
        view.width(),
        view.height(),
        NATIVE_TILE_SIZE,
        NATIVE_TILE_SIZE,
        0,
    )
    .map_err(|e| identity.invalid(e.to_string()))?;
    let (col, row) = grid_cell(identity);

    let mut url = parse_server_url(&slice.image_server_url, "slice/tile")?;
    url.query_pairs_mut()
        .append_pair("fif", &slice.path)
        .append_pair("mimeType", &slice.mime)
        .append_pair("tileIndex", &topology.index_of(col, row).to_string())
        .append_pair("z", &view.api_zoom_level().to_string());
    Ok(url)
}

/// Zoomify tile URL on the imaging server.
pub(crate) fn zoomify_url(
    imaging_server: &str,
    view: &SlideView,
    identity: &TileIdentity,
) -> Result<Url, FetchError> {
    let instance = view.slide().instance();
    let full_path = instance
        .require(&instance.full_path, "fullPath")
        .map_err(|e| identity.invalid(e.to_string()))?;
    let mime = instance
        .require(&instance.mime, "mime")
        .map_err(|e| identity.invalid(e.to_string()))?;
    let (col, row) = grid_cell(identity);

    let mut url = parse_server_url(imaging_server, "image/tile")?;
    url.query_pairs_mut()
        .append_pair("zoomify", full_path)
        .append_pair("mimeType", mime)
        .append_pair("x", &col.to_string())
        .append_pair("y", &row.to_string())
        .append_pair("z", &view.api_zoom_level().to_string());
    Ok(url)
}

/// Window URL on the core API. The region is expressed at full resolution.
pub(crate) fn window_url(
    client: &CytomineClient,
    view: &SlideView,
    identity: &TileIdentity,
) -> Result<Url, FetchError> {
    let path = format!(
        "api/imageinstance/{}/window-{}-{}-{}-{}.png",
        view.slide().id(),
        view.to_full_resolution(identity.x()),
        view.to_full_resolution(identity.y()),
        view.to_full_resolution(identity.width()),
        view.to_full_resolution(identity.height()),
    );
    let mut url = client
        .endpoint(&path)
        .map_err(|e| FetchError::Failure(e.to_string()))?;
    if view.zoom_level() > 0 {
        url.query_pairs_mut()
            .append_pair("zoom", &view.zoom_level().to_string());
    }
    Ok(url)
}

/// Map a metadata failure seen while fetching `identity`.
///
/// Missing images and unusable metadata are permanent; API errors are not.
pub(crate) fn slide_error(identity: &TileIdentity, error: SlideError) -> FetchError {
    match error {
        SlideError::Api(message) => FetchError::Failure(message),
        other => identity.invalid(other.to_string()),
    }
}

/// Check that `identity` is a cell of the native grid of `view`, clipped to
/// the view bounds.
pub(crate) fn check_native_cell(view: &SlideView, identity: &TileIdentity) -> Result<(), FetchError> {
    if identity.x() % NATIVE_TILE_SIZE != 0 || identity.y() % NATIVE_TILE_SIZE != 0 {
        return Err(identity.invalid(format!(
            "origin is not aligned on the {} pixel tile grid",
            NATIVE_TILE_SIZE
        )));
    }

    let expected_width = NATIVE_TILE_SIZE.min(view.width() - identity.x());
    let expected_height = NATIVE_TILE_SIZE.min(view.height() - identity.y());
    if identity.width() != expected_width || identity.height() != expected_height {
        return Err(identity.invalid(format!(
            "size must be {}x{} for this grid cell",
            expected_width, expected_height
        )));
    }
    Ok(())
}

/// Resolve the view `identity` lives in, rejecting anything outside it.
pub(crate) fn resolve_view(slide: &Arc<Slide>, identity: &TileIdentity) -> Result<SlideView, FetchError> {
    let view = slide
        .view(identity.zoom_level())
        .map_err(|e| slide_error(identity, e))?;
    if !view.contains(identity) {
        return Err(identity.invalid(format!(
            "region exceeds slide bounds {}x{} at zoom level {}",
            view.width(),
            view.height(),
            identity.zoom_level()
        )));
    }
    Ok(view)
}
