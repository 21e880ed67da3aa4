//! Tile topology: a regular grid of tiles over an image.
//!
//! Tiles are laid out row-major with a fixed stride of `max - overlap` in
//! each direction. Tiles in the last row/column are clipped to the image.

use crate::error::TileError;

/// Position and size of a tile within a topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilePosition {
    /// Linear index, `col + row * horizontal_count`
    pub index: u32,
    pub col: u32,
    pub row: u32,

    /// Offset of the tile relative to the image origin
    pub offset_x: u32,
    pub offset_y: u32,

    pub width: u32,
    pub height: u32,
}

/// Grid of tiles covering a `width` x `height` image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileTopology {
    width: u32,
    height: u32,
    max_width: u32,
    max_height: u32,
    overlap: u32,
}

impl TileTopology {
    /// Create a topology.
    ///
    /// Fails unless `overlap` is smaller than both `max_width` and
    /// `max_height`, as the stride would otherwise be zero.
    pub fn new(
        width: u32,
        height: u32,
        max_width: u32,
        max_height: u32,
        overlap: u32,
    ) -> Result<Self, TileError> {
        if overlap >= max_width || overlap >= max_height {
            return Err(TileError::InvalidRegion {
                x: 0,
                y: 0,
                width: max_width,
                height: max_height,
                reason: format!("overlap {} must be smaller than the tile size", overlap),
            });
        }
        Ok(Self {
            width,
            height,
            max_width,
            max_height,
            overlap,
        })
    }

    pub fn image_width(&self) -> u32 {
        self.width
    }

    pub fn image_height(&self) -> u32 {
        self.height
    }

    /// Number of tiles along the X axis.
    pub fn horizontal_count(&self) -> u32 {
        axis_count(self.width, self.max_width, self.overlap)
    }

    /// Number of tiles along the Y axis.
    pub fn vertical_count(&self) -> u32 {
        axis_count(self.height, self.max_height, self.overlap)
    }

    /// Total number of tiles.
    pub fn tile_count(&self) -> u32 {
        self.horizontal_count() * self.vertical_count()
    }

    /// Linear index of the tile at (`col`, `row`).
    pub fn index_of(&self, col: u32, row: u32) -> u32 {
        col + row * self.horizontal_count()
    }

    /// Tile at (`col`, `row`), or `None` if outside the grid.
    pub fn position(&self, col: u32, row: u32) -> Option<TilePosition> {
        if col >= self.horizontal_count() || row >= self.vertical_count() {
            return None;
        }

        let offset_x = col * (self.max_width - self.overlap);
        let offset_y = row * (self.max_height - self.overlap);

        Some(TilePosition {
            index: self.index_of(col, row),
            col,
            row,
            offset_x,
            offset_y,
            width: self.max_width.min(self.width - offset_x),
            height: self.max_height.min(self.height - offset_y),
        })
    }

    /// Tile with linear index `index`, or `None` if out of range.
    pub fn position_at(&self, index: u32) -> Option<TilePosition> {
        let cols = self.horizontal_count();
        if cols == 0 {
            return None;
        }
        self.position(index % cols, index / cols)
    }

    /// Iterate over all tiles in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = TilePosition> + '_ {
        (0..self.tile_count()).filter_map(move |index| self.position_at(index))
    }
}

fn axis_count(size: u32, max: u32, overlap: u32) -> u32 {
    if size == 0 {
        return 0;
    }
    if size <= max {
        return 1;
    }
    let stride = max - overlap;
    1 + (size - max).div_ceil(stride)
}
