//! Tile identity: the cache key of a tile request.

use std::fmt;

use crate::error::FetchError;

/// Uniquely identifies a tile request.
///
/// Two identities with equal fields are the same cache key. Coordinates are
/// absolute pixel coordinates in the slide read at `zoom_level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileIdentity {
    /// Image instance identifier on the remote service
    slide_id: u64,

    /// Zoom level (0 = most zoomed in)
    zoom_level: u32,

    /// X coordinate of the top-left pixel
    x: u32,

    /// Y coordinate of the top-left pixel
    y: u32,

    /// Region width in pixels (> 0)
    width: u32,

    /// Region height in pixels (> 0)
    height: u32,
}

impl TileIdentity {
    /// Create a new identity, rejecting empty regions.
    pub fn new(
        slide_id: u64,
        zoom_level: u32,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<Self, FetchError> {
        let identity = Self {
            slide_id,
            zoom_level,
            x,
            y,
            width,
            height,
        };
        if width == 0 || height == 0 {
            return Err(FetchError::InvalidIdentity {
                identity: identity.to_string(),
                reason: "width and height must be greater than 0".to_string(),
            });
        }
        Ok(identity)
    }

    pub fn slide_id(&self) -> u64 {
        self.slide_id
    }

    pub fn zoom_level(&self) -> u32 {
        self.zoom_level
    }

    pub fn x(&self) -> u32 {
        self.x
    }

    pub fn y(&self) -> u32 {
        self.y
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Exclusive right edge. Saturates instead of overflowing.
    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    /// Exclusive bottom edge. Saturates instead of overflowing.
    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    /// Build an `InvalidIdentity` error for this identity.
    pub fn invalid(&self, reason: impl Into<String>) -> FetchError {
        FetchError::InvalidIdentity {
            identity: self.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for TileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}-{}-{}",
            self.slide_id, self.zoom_level, self.x, self.y, self.width, self.height
        )
    }
}
