//! Remote image metadata as returned by the Cytomine API.

use serde::{Deserialize, Serialize};

use crate::error::SlideError;

/// An image instance (`GET /api/imageinstance/{id}.json`).
///
/// Only the fields used by the binding are modeled; unknown fields are
/// ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageInstance {
    pub id: u64,

    /// Full-resolution width in pixels
    pub width: u32,

    /// Full-resolution height in pixels
    pub height: u32,

    /// Number of zoom levels (current servers)
    #[serde(default)]
    pub zoom: Option<u32>,

    /// Number of zoom levels (legacy servers)
    #[serde(default)]
    pub depth: Option<u32>,

    /// Path of the image on the image server (legacy servers)
    #[serde(default)]
    pub full_path: Option<String>,

    #[serde(default)]
    pub mime: Option<String>,

    #[serde(default)]
    pub original_filename: Option<String>,
}

impl ImageInstance {
    /// Minimal instance, mostly useful for tests and offline tooling.
    pub fn new(id: u64, width: u32, height: u32) -> Self {
        Self {
            id,
            width,
            height,
            zoom: None,
            depth: None,
            full_path: None,
            mime: None,
            original_filename: None,
        }
    }

    pub(crate) fn require<'a>(
        &self,
        value: &'a Option<String>,
        field: &'static str,
    ) -> Result<&'a str, SlideError> {
        value.as_deref().ok_or(SlideError::MissingField {
            image_id: self.id,
            field,
        })
    }
}

/// Reference slice of an image instance
/// (`GET /api/imageinstance/{id}/sliceinstance/reference.json`).
///
/// Only exists on current servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SliceInstance {
    /// Base URL of the image server holding the slice
    pub image_server_url: String,

    /// Path of the slice file on the image server
    pub path: String,

    pub mime: String,
}

/// An annotation (`GET /api/annotation/{id}.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub id: u64,

    /// Image instance the annotation was drawn on
    pub image: u64,

    /// WKT geometry in full-resolution image coordinates, origin at the
    /// bottom-left corner
    pub location: String,
}

/// `GET /api/imaging_server.json`
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ImagingServerList {
    pub collection: Vec<ImagingServer>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ImagingServer {
    pub url: String,
}
