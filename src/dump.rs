//! Dump a slide, or a region of it, to an image file.
//!
//! The region is assembled as a single tile from native tiles downloaded in
//! parallel through a [`TileCache`], then encoded according to the
//! destination's extension.
//!
//! # Destination patterns
//!
//! The destination may contain placeholders resolved from the image
//! instance:
//!
//! | Placeholder          | Value                                      |
//! |----------------------|--------------------------------------------|
//! | `{id}`               | annotation id when dumping one, else image |
//! | `{image}`            | image instance id                          |
//! | `{zoom}`             | requested zoom level                       |
//! | `{width}`            | full-resolution width                      |
//! | `{height}`           | full-resolution height                     |
//! | `{originalFilename}` | name of the uploaded file                  |

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::TileError;
use crate::remote::{infer_protocol_for, CytomineClient, RemoteTileProvider, TileProtocol};
use crate::slide::{annotation_window, Annotation, ImageInstance, ServerGeneration, SlideRegistry};
use crate::tile::{codec, CacheConfig, CacheStats, TileBuilder, TileCache, DEFAULT_JOBS};

/// A rectangular region at the dump's zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FromStr for Region {
    type Err = String;

    /// Parse `x,y,width,height`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values = s
            .split(',')
            .map(|part| part.trim().parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("invalid region '{}': {}", s, e))?;

        match values[..] {
            [x, y, width, height] if width > 0 && height > 0 => Ok(Region {
                x,
                y,
                width,
                height,
            }),
            [_, _, _, _] => Err(format!("invalid region '{}': empty width or height", s)),
            _ => Err(format!(
                "invalid region '{}': expected x,y,width,height",
                s
            )),
        }
    }
}

/// What part of which image to dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DumpZone {
    /// The whole view
    Image { image_id: u64 },

    /// A region of the view, clipped to it
    Region { image_id: u64, region: Region },

    /// The window bounding an annotation's geometry
    Annotation { annotation_id: u64 },
}

impl From<u64> for DumpZone {
    fn from(image_id: u64) -> Self {
        DumpZone::Image { image_id }
    }
}

impl std::fmt::Display for DumpZone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DumpZone::Image { image_id } => write!(f, "image {}", image_id),
            DumpZone::Region { image_id, region } => write!(
                f,
                "image {} region {},{},{},{}",
                image_id, region.x, region.y, region.width, region.height
            ),
            DumpZone::Annotation { annotation_id } => write!(f, "annotation {}", annotation_id),
        }
    }
}

/// Parameters of [`dump_region`].
#[derive(Debug, Clone)]
pub struct DumpRequest {
    pub zone: DumpZone,

    /// Destination path, possibly with placeholders
    pub pattern: String,

    pub zoom_level: u32,

    /// Protocol to use; detected from the server when `None`
    pub protocol: Option<TileProtocol>,

    /// Parallel native tile downloads
    pub jobs: usize,

    pub cache: CacheConfig,

    /// JPEG quality, ignored for PNG output
    pub quality: u8,
}

impl DumpRequest {
    /// Dump `zone` at full resolution to `pattern`.
    pub fn new(zone: impl Into<DumpZone>, pattern: impl Into<String>) -> Self {
        Self {
            zone: zone.into(),
            pattern: pattern.into(),
            zoom_level: 0,
            protocol: None,
            jobs: DEFAULT_JOBS,
            cache: CacheConfig::default(),
            quality: codec::DEFAULT_JPEG_QUALITY,
        }
    }
}

/// What [`dump_region`] wrote.
#[derive(Debug, Clone, Serialize)]
pub struct DumpOutcome {
    pub path: PathBuf,
    pub image_id: u64,

    /// Set for annotation zones
    pub annotation_id: Option<u64>,

    pub generation: ServerGeneration,
    pub protocol: TileProtocol,

    /// Dumped region, in view coordinates
    pub region: Region,

    /// Number of native tiles the region was assembled from
    pub native_tiles: usize,

    pub cache: CacheStats,
}

/// Download a region of an image and write it to disk.
pub async fn dump_region(
    client: &CytomineClient,
    request: &DumpRequest,
) -> Result<DumpOutcome, TileError> {
    let (image_id, annotation) = match request.zone {
        DumpZone::Image { image_id } | DumpZone::Region { image_id, .. } => (image_id, None),
        DumpZone::Annotation { annotation_id } => {
            let annotation = client.annotation(annotation_id).await?;
            (annotation.image, Some(annotation))
        }
    };

    let registry = Arc::new(SlideRegistry::new(client.clone()));
    let slide = registry.get_slide(image_id).await?;

    let path = resolve_pattern(
        &request.pattern,
        slide.instance(),
        annotation.as_ref(),
        request.zoom_level,
    )?;
    let format = codec::output_format(&path)?;

    let (generation, protocol) = match request.protocol {
        Some(protocol) => (slide.generation(), protocol),
        None => infer_protocol_for(client, &slide).await?,
    };

    let view = slide.view(request.zoom_level)?;
    let window = match (&request.zone, &annotation) {
        (DumpZone::Region { region, .. }, _) => {
            view.window(region.x, region.y, region.width, region.height)?
        }
        (_, Some(annotation)) => annotation_window(&view, annotation)?,
        _ => view.full_window(),
    };
    debug!(
        image_id,
        zone = %request.zone,
        x = window.x(),
        y = window.y(),
        width = window.width(),
        height = window.height(),
        "Dump window"
    );

    let provider = RemoteTileProvider::with_registry(client.clone(), registry, protocol);
    let cache = TileCache::with_config(provider, request.cache)?;
    let builder = TileBuilder::new(cache).with_jobs(request.jobs);

    let tile = builder.build(&window, 0, 0, window.width(), window.height())?;
    let image = tile.image().await?;
    let encoded = codec::encode(&image, format, request.quality)?;

    write_file(&path, &encoded).await?;

    let outcome = DumpOutcome {
        path,
        image_id,
        annotation_id: annotation.as_ref().map(|a| a.id),
        generation,
        protocol,
        region: Region {
            x: window.x(),
            y: window.y(),
            width: window.width(),
            height: window.height(),
        },
        native_tiles: tile.native_identities().len(),
        cache: builder.cache().stats(),
    };
    info!(
        path = %outcome.path.display(),
        %protocol,
        native_tiles = outcome.native_tiles,
        "Region dumped"
    );
    Ok(outcome)
}

async fn write_file(path: &Path, data: &[u8]) -> Result<(), TileError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| TileError::Io(format!("{}: {}", parent.display(), e)))?;
    }
    tokio::fs::write(path, data)
        .await
        .map_err(|e| TileError::Io(format!("{}: {}", path.display(), e)))
}

/// Replace the placeholders of `pattern` with properties of `instance`, and
/// of `annotation` when dumping an annotation zone.
pub fn resolve_pattern(
    pattern: &str,
    instance: &ImageInstance,
    annotation: Option<&Annotation>,
    zoom_level: u32,
) -> Result<PathBuf, TileError> {
    let error = |reason: String| TileError::Pattern {
        pattern: pattern.to_string(),
        reason,
    };

    let mut resolved = String::with_capacity(pattern.len());
    let mut rest = pattern;
    while let Some(start) = rest.find('{') {
        resolved.push_str(&rest[..start]);
        let end = rest[start..]
            .find('}')
            .ok_or_else(|| error("unclosed '{'".to_string()))?;
        let name = &rest[start + 1..start + end];

        match name {
            "id" => {
                let id = annotation.map_or(instance.id, |a| a.id);
                resolved.push_str(&id.to_string())
            }
            "image" => resolved.push_str(&instance.id.to_string()),
            "zoom" => resolved.push_str(&zoom_level.to_string()),
            "width" => resolved.push_str(&instance.width.to_string()),
            "height" => resolved.push_str(&instance.height.to_string()),
            "originalFilename" => resolved.push_str(
                instance
                    .original_filename
                    .as_deref()
                    .ok_or_else(|| error("image has no original filename".to_string()))?,
            ),
            other => return Err(error(format!("unknown placeholder '{{{}}}'", other))),
        }
        rest = &rest[start + end + 1..];
    }
    resolved.push_str(rest);

    if resolved.is_empty() {
        return Err(error("resolves to an empty path".to_string()));
    }
    Ok(PathBuf::from(resolved))
}
