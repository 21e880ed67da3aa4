use thiserror::Error;

/// Errors produced while fetching a tile from the remote service.
///
/// The type is `Clone` so that a single failed fetch can be handed to every
/// caller that was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The tile could not be retrieved (network error, timeout, service
    /// unavailable). Safe to retry.
    #[error("Fetch failed: {0}")]
    Failure(String),

    /// The requested region is malformed or outside the slide. Retrying the
    /// same identity fails identically.
    #[error("Invalid tile identity {identity}: {reason}")]
    InvalidIdentity { identity: String, reason: String },
}

impl FetchError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Failure(_))
    }
}

/// Errors raised when constructing a tile cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// A capacity bound was zero.
    #[error("Invalid cache capacity: {reason}")]
    CapacityMisconfiguration { reason: String },
}

/// Errors related to slide metadata lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlideError {
    /// The API request failed or returned an unexpected status
    #[error("API error: {0}")]
    Api(String),

    /// Image instance does not exist
    #[error("Image instance not found: {0}")]
    NotFound(u64),

    /// Annotation does not exist
    #[error("Annotation not found: {0}")]
    AnnotationNotFound(u64),

    /// An annotation location is not a usable geometry
    #[error("Invalid geometry for annotation {annotation_id}: {message}")]
    InvalidGeometry { annotation_id: u64, message: String },

    /// Requested zoom level exceeds the number of levels of the slide
    #[error("Invalid zoom level {requested} (max: {max})")]
    InvalidZoomLevel { requested: u32, max: u32 },

    /// The response body could not be parsed
    #[error("Failed to decode {what}: {message}")]
    Decode { what: &'static str, message: String },

    /// A field required by the selected protocol is absent
    #[error("Missing field `{field}` for image instance {image_id}")]
    MissingField { image_id: u64, field: &'static str },

    /// A window does not fit inside the slide
    #[error("Window ({x}, {y}, {width}x{height}) exceeds slide bounds {max_width}x{max_height}")]
    WindowOutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        max_width: u32,
        max_height: u32,
    },
}

/// Errors that can occur when building or assembling tiles.
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// A native tile could not be fetched
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Slide metadata could not be resolved
    #[error(transparent)]
    Slide(#[from] SlideError),

    /// The tile cache could not be created
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Fetched bytes are not a decodable image
    #[error("Failed to decode tile: {message}")]
    DecodeError { message: String },

    /// Assembled image could not be encoded
    #[error("Failed to encode image: {message}")]
    EncodeError { message: String },

    /// A fetched tile does not have the expected dimensions
    #[error("Fetched tile has invalid size: {actual_width}x{actual_height} instead of {expected_width}x{expected_height}")]
    InvalidSize {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    /// Requested region is empty or outside the slide
    #[error("Invalid region ({x}, {y}, {width}x{height}): {reason}")]
    InvalidRegion {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        reason: String,
    },

    /// Filesystem error while writing output
    #[error("I/O error: {0}")]
    Io(String),

    /// Destination pattern could not be resolved
    #[error("Invalid destination pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },
}
