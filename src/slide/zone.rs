//! Annotation zones.
//!
//! Cytomine stores annotation geometries as WKT in full-resolution image
//! coordinates with the origin at the bottom-left corner. Slide views use a
//! top-left origin and are scaled down by `2^zoom_level`, so a geometry is
//! flipped and scaled before its bounding box is turned into a window.

use geo::{AffineOps, AffineTransform, BoundingRect, Geometry};
use wkt::TryFromWkt;

use crate::error::SlideError;

use super::metadata::Annotation;
use super::view::{SlideView, SlideWindow};

/// Window of `view` bounding the geometry of `annotation`.
///
/// The bounding box is expanded to whole pixels and clipped to the view.
pub fn annotation_window(
    view: &SlideView,
    annotation: &Annotation,
) -> Result<SlideWindow, SlideError> {
    let invalid = |message: String| SlideError::InvalidGeometry {
        annotation_id: annotation.id,
        message,
    };

    if annotation.image != view.slide().id() {
        return Err(invalid(format!(
            "drawn on image {}, not {}",
            annotation.image,
            view.slide().id()
        )));
    }

    let geometry = Geometry::<f64>::try_from_wkt_str(&annotation.location)
        .map_err(|e| invalid(e.to_string()))?;
    let geometry = to_view_coordinates(view, &geometry);

    let bounds = geometry
        .bounding_rect()
        .ok_or_else(|| invalid("empty geometry".to_string()))?;
    let (min, max) = (bounds.min(), bounds.max());

    if max.x < 0.0 || max.y < 0.0 {
        return Err(SlideError::WindowOutOfBounds {
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            max_width: view.width(),
            max_height: view.height(),
        });
    }

    let left = min.x.floor().max(0.0);
    let top = min.y.floor().max(0.0);
    let width = (max.x.ceil() - left).max(1.0);
    let height = (max.y.ceil() - top).max(1.0);

    view.window(left as u32, top as u32, width as u32, height as u32)
}

/// Flip a geometry to a top-left origin and scale it to the view's zoom level.
fn to_view_coordinates(view: &SlideView, geometry: &Geometry<f64>) -> Geometry<f64> {
    let image_height = f64::from(view.slide().instance().height);
    let scale = 0.5f64.powi(view.zoom_level() as i32);

    let flip = AffineTransform::new(1.0, 0.0, 0.0, 0.0, -1.0, image_height);
    let shrink = AffineTransform::new(scale, 0.0, 0.0, 0.0, scale, 0.0);
    geometry.affine_transform(&flip).affine_transform(&shrink)
}
