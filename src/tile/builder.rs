//! Tiles of arbitrary size, assembled from native tiles.
//!
//! The remote service serves a fixed 256x256 grid per zoom level. A [`Tile`]
//! covering any region of a [`SlideWindow`] is reconstructed by fetching the
//! native tiles it overlaps through the shared [`TileCache`], then stitching
//! and cropping them:
//!
//! ```text
//!   native grid (256 px)        requested tile
//!   ┌─────┬─────┬─────┐
//!   │     │  ┌──┼──┐  │         ┌─────┐
//!   ├─────┼──┼──┼──┼──┤   ──►   │     │
//!   │     │  └──┼──┘  │         └─────┘
//!   └─────┴─────┴─────┘
//! ```
//!
//! Overlapping tiles share their native tiles, which the cache fetches once.

use futures::stream::{self, StreamExt, TryStreamExt};
use image::{imageops, RgbImage};
use tracing::{debug, instrument};

use crate::error::TileError;
use crate::slide::{SlideView, SlideWindow};

use super::cache::{FetchProvider, TileCache};
use super::codec::decode_tile;
use super::identity::TileIdentity;
use super::topology::TileTopology;

/// Size of the remote service's native tiles.
pub const NATIVE_TILE_SIZE: u32 = 256;

/// Default number of native tiles downloaded in parallel per tile.
pub const DEFAULT_JOBS: usize = 4;

// =============================================================================
// TileBuilder
// =============================================================================

/// Creates [`Tile`]s backed by a shared tile cache.
pub struct TileBuilder<P> {
    cache: TileCache<P>,
    jobs: usize,
}

impl<P> Clone for TileBuilder<P> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            jobs: self.jobs,
        }
    }
}

impl<P: FetchProvider + 'static> TileBuilder<P> {
    /// Create a builder fetching through `cache`.
    pub fn new(cache: TileCache<P>) -> Self {
        Self {
            cache,
            jobs: DEFAULT_JOBS,
        }
    }

    /// Set the number of parallel native tile downloads per tile (at least 1).
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    pub fn cache(&self) -> &TileCache<P> {
        &self.cache
    }

    /// Canonical identity of the region (`x`, `y`, `width`, `height`) of `view`.
    pub fn identity_for(
        view: &SlideView,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<TileIdentity, TileError> {
        let identity =
            TileIdentity::new(view.slide().id(), view.zoom_level(), x, y, width, height)?;
        if !view.contains(&identity) {
            return Err(TileError::InvalidRegion {
                x,
                y,
                width,
                height,
                reason: format!("outside view of {}x{}", view.width(), view.height()),
            });
        }
        Ok(identity)
    }

    /// Build the tile at (`offset_x`, `offset_y`) relative to `window`.
    ///
    /// The tile must fit inside the window.
    pub fn build(
        &self,
        window: &SlideWindow,
        offset_x: u32,
        offset_y: u32,
        width: u32,
        height: u32,
    ) -> Result<Tile<P>, TileError> {
        let fits = offset_x
            .checked_add(width)
            .is_some_and(|right| right <= window.width())
            && offset_y
                .checked_add(height)
                .is_some_and(|bottom| bottom <= window.height());
        if !fits {
            return Err(TileError::InvalidRegion {
                x: offset_x,
                y: offset_y,
                width,
                height,
                reason: format!("outside window of {}x{}", window.width(), window.height()),
            });
        }

        let identity = Self::identity_for(
            window.view(),
            window.x() + offset_x,
            window.y() + offset_y,
            width,
            height,
        )?;

        Ok(Tile {
            identity,
            index: None,
            view: window.view().clone(),
            cache: self.cache.clone(),
            jobs: self.jobs,
        })
    }

    /// Build every tile of the topology covering `window`, in row-major order.
    pub fn build_all(
        &self,
        window: &SlideWindow,
        max_width: u32,
        max_height: u32,
        overlap: u32,
    ) -> Result<Vec<Tile<P>>, TileError> {
        let topology = TileTopology::new(
            window.width(),
            window.height(),
            max_width,
            max_height,
            overlap,
        )?;
        topology
            .iter()
            .map(|position| {
                let mut tile = self.build(
                    window,
                    position.offset_x,
                    position.offset_y,
                    position.width,
                    position.height,
                )?;
                tile.index = Some(position.index);
                Ok(tile)
            })
            .collect()
    }
}

// =============================================================================
// Tile
// =============================================================================

/// A region of a slide view whose pixels are fetched on demand.
pub struct Tile<P> {
    identity: TileIdentity,
    index: Option<u32>,
    view: SlideView,
    cache: TileCache<P>,
    jobs: usize,
}

impl<P> Clone for Tile<P> {
    fn clone(&self) -> Self {
        Self {
            identity: self.identity,
            index: self.index,
            view: self.view.clone(),
            cache: self.cache.clone(),
            jobs: self.jobs,
        }
    }
}

impl<P> std::fmt::Debug for Tile<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tile")
            .field("identity", &self.identity)
            .field("index", &self.index)
            .field("jobs", &self.jobs)
            .finish()
    }
}

impl<P: FetchProvider + 'static> Tile<P> {
    pub fn identity(&self) -> &TileIdentity {
        &self.identity
    }

    /// Index in the topology the tile was built from, if any.
    pub fn index(&self) -> Option<u32> {
        self.index
    }

    pub fn view(&self) -> &SlideView {
        &self.view
    }

    pub fn width(&self) -> u32 {
        self.identity.width()
    }

    pub fn height(&self) -> u32 {
        self.identity.height()
    }

    /// Native tiles overlapping this tile, in row-major order.
    pub fn native_identities(&self) -> Vec<TileIdentity> {
        let (col_start, col_end) = cell_range(self.identity.x(), self.identity.width());
        let (row_start, row_end) = cell_range(self.identity.y(), self.identity.height());

        let mut identities = Vec::new();
        for row in row_start..=row_end {
            for col in col_start..=col_end {
                let x = col * NATIVE_TILE_SIZE;
                let y = row * NATIVE_TILE_SIZE;
                // Cells overlap the tile, which lies inside the view
                if let Ok(identity) = TileIdentity::new(
                    self.identity.slide_id(),
                    self.identity.zoom_level(),
                    x,
                    y,
                    NATIVE_TILE_SIZE.min(self.view.width() - x),
                    NATIVE_TILE_SIZE.min(self.view.height() - y),
                ) {
                    identities.push(identity);
                }
            }
        }
        identities
    }

    /// Fetch the native tiles and assemble the tile's RGB image.
    #[instrument(skip(self), fields(tile = %self.identity))]
    pub async fn image(&self) -> Result<RgbImage, TileError> {
        let natives = self.native_identities();
        debug!(natives = natives.len(), jobs = self.jobs, "Assembling tile");

        let cells: Vec<(TileIdentity, RgbImage)> = stream::iter(natives)
            .map(|native| fetch_native(&self.cache, native))
            .buffer_unordered(self.jobs)
            .try_collect()
            .await?;

        let origin_x = self.identity.x() - self.identity.x() % NATIVE_TILE_SIZE;
        let origin_y = self.identity.y() - self.identity.y() % NATIVE_TILE_SIZE;
        let canvas_width = cells
            .iter()
            .map(|(native, _)| native.right() - origin_x)
            .max()
            .unwrap_or(0);
        let canvas_height = cells
            .iter()
            .map(|(native, _)| native.bottom() - origin_y)
            .max()
            .unwrap_or(0);

        let mut canvas = RgbImage::new(canvas_width, canvas_height);
        for (native, image) in &cells {
            imageops::replace(
                &mut canvas,
                image,
                i64::from(native.x() - origin_x),
                i64::from(native.y() - origin_y),
            );
        }

        Ok(imageops::crop_imm(
            &canvas,
            self.identity.x() - origin_x,
            self.identity.y() - origin_y,
            self.identity.width(),
            self.identity.height(),
        )
        .to_image())
    }
}

/// Fetch and decode one native tile, checking its dimensions.
async fn fetch_native<P: FetchProvider + 'static>(
    cache: &TileCache<P>,
    native: TileIdentity,
) -> Result<(TileIdentity, RgbImage), TileError> {
    let data = cache.get_or_fetch(&native).await?;
    let image = decode_tile(&data, native.width(), native.height())?;
    Ok((native, image))
}

/// First and last native cell index covering [`start`, `start + length`).
fn cell_range(start: u32, length: u32) -> (u32, u32) {
    let last = start + length.max(1) - 1;
    (start / NATIVE_TILE_SIZE, last / NATIVE_TILE_SIZE)
}
