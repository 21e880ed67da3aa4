//! Slides read at a zoom level, and windows over them.

use std::sync::Arc;

use serde::Serialize;

use crate::error::SlideError;
use crate::tile::TileIdentity;

use super::metadata::{ImageInstance, SliceInstance};

/// Number of channels of the tiles served by the remote service.
pub const SLIDE_CHANNELS: u32 = 3;

/// Generation of the remote server a slide lives on.
///
/// Current servers expose a reference slice per image and number zoom levels
/// with `zoom`; legacy ones have no slices and use `depth`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerGeneration {
    Current,
    Legacy,
}

// =============================================================================
// Slide
// =============================================================================

/// Metadata of a remote image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Slide {
    instance: ImageInstance,
    slice: Option<SliceInstance>,
}

impl Slide {
    pub fn new(instance: ImageInstance, slice: Option<SliceInstance>) -> Self {
        Self { instance, slice }
    }

    pub fn id(&self) -> u64 {
        self.instance.id
    }

    pub fn instance(&self) -> &ImageInstance {
        &self.instance
    }

    pub fn slice(&self) -> Option<&SliceInstance> {
        self.slice.as_ref()
    }

    pub fn generation(&self) -> ServerGeneration {
        if self.slice.is_some() {
            ServerGeneration::Current
        } else {
            ServerGeneration::Legacy
        }
    }

    /// Highest valid zoom level (the most zoomed out one).
    pub fn max_zoom(&self) -> Result<u32, SlideError> {
        let (value, field) = match self.generation() {
            ServerGeneration::Current => (self.instance.zoom, "zoom"),
            ServerGeneration::Legacy => (self.instance.depth, "depth"),
        };
        value.ok_or(SlideError::MissingField {
            image_id: self.id(),
            field,
        })
    }

    /// Read the slide at `zoom_level` (0 = most zoomed in).
    pub fn view(self: &Arc<Self>, zoom_level: u32) -> Result<SlideView, SlideError> {
        let max_zoom = self.max_zoom()?;
        if zoom_level > max_zoom {
            return Err(SlideError::InvalidZoomLevel {
                requested: zoom_level,
                max: max_zoom,
            });
        }
        Ok(SlideView {
            slide: Arc::clone(self),
            zoom_level,
            max_zoom,
        })
    }
}

// =============================================================================
// SlideView
// =============================================================================

/// A slide read at a given zoom level.
#[derive(Debug, Clone)]
pub struct SlideView {
    slide: Arc<Slide>,
    zoom_level: u32,
    max_zoom: u32,
}

impl SlideView {
    pub fn slide(&self) -> &Arc<Slide> {
        &self.slide
    }

    pub fn zoom_level(&self) -> u32 {
        self.zoom_level
    }

    /// Zoom level in the remote service's numbering, where 0 is the most
    /// zoomed out level.
    pub fn api_zoom_level(&self) -> u32 {
        self.max_zoom - self.zoom_level
    }

    pub fn width(&self) -> u32 {
        scale_down(self.slide.instance.width, self.zoom_level)
    }

    pub fn height(&self) -> u32 {
        scale_down(self.slide.instance.height, self.zoom_level)
    }

    pub fn channels(&self) -> u32 {
        SLIDE_CHANNELS
    }

    /// Convert a coordinate at this zoom level to full resolution.
    pub fn to_full_resolution(&self, value: u32) -> u64 {
        u64::from(value) << self.zoom_level
    }

    /// Window covering the whole view.
    pub fn full_window(&self) -> SlideWindow {
        SlideWindow {
            view: self.clone(),
            x: 0,
            y: 0,
            width: self.width(),
            height: self.height(),
        }
    }

    /// Window at (`x`, `y`) of at most `max_width` x `max_height`, clipped to
    /// the view. Fails if the origin is outside the view or the window is empty.
    pub fn window(
        &self,
        x: u32,
        y: u32,
        max_width: u32,
        max_height: u32,
    ) -> Result<SlideWindow, SlideError> {
        self.full_window().window(x, y, max_width, max_height)
    }

    /// Whether `identity` designates a region of this view.
    pub fn contains(&self, identity: &TileIdentity) -> bool {
        identity.slide_id() == self.slide.id()
            && identity.zoom_level() == self.zoom_level
            && identity.right() <= self.width()
            && identity.bottom() <= self.height()
    }
}

fn scale_down(value: u32, zoom_level: u32) -> u32 {
    value.checked_shr(zoom_level).unwrap_or(0)
}

// =============================================================================
// SlideWindow
// =============================================================================

/// Rectangular window of a [`SlideView`], in absolute view coordinates.
#[derive(Debug, Clone)]
pub struct SlideWindow {
    view: SlideView,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

impl SlideWindow {
    pub fn view(&self) -> &SlideView {
        &self.view
    }

    /// Absolute X offset in the view
    pub fn x(&self) -> u32 {
        self.x
    }

    /// Absolute Y offset in the view
    pub fn y(&self) -> u32 {
        self.y
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Nested window at (`x`, `y`) relative to this window, clipped to it.
    pub fn window(
        &self,
        x: u32,
        y: u32,
        max_width: u32,
        max_height: u32,
    ) -> Result<SlideWindow, SlideError> {
        if x >= self.width || y >= self.height || max_width == 0 || max_height == 0 {
            return Err(SlideError::WindowOutOfBounds {
                x,
                y,
                width: max_width,
                height: max_height,
                max_width: self.width,
                max_height: self.height,
            });
        }
        Ok(SlideWindow {
            view: self.view.clone(),
            x: self.x + x,
            y: self.y + y,
            width: max_width.min(self.width - x),
            height: max_height.min(self.height - y),
        })
    }
}
