//! Configuration management for sldc-cytomine.
//!
//! This module provides the command-line interface, which supports:
//! - Subcommands via clap (`dump`, `probe`)
//! - Environment variables with `SLDC_` prefix
//! - Sensible defaults for all optional settings
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use sldc_cytomine::config::{Cli, Command};
//!
//! match Cli::parse().into_command() {
//!     Command::Dump(config) => println!("Dumping {:?}", config.to_request()),
//!     Command::Probe(config) => println!("Probing image {}", config.image),
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `SLDC_HOST` - Cytomine host (required)
//! - `SLDC_TIMEOUT` - HTTP request timeout in seconds (default: 30)
//! - `SLDC_IMAGE` - Image instance id
//! - `SLDC_ANNOTATION` - Annotation id (dump only)
//! - `SLDC_JOBS` - Parallel native tile downloads (default: 4)
//! - `SLDC_CACHE_TILES` - Max tiles to cache (default: 10000)
//! - `SLDC_CACHE_SIZE` - Max total size of cached tiles (default: 256MB)

use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::dump::{DumpRequest, DumpZone, Region};
use crate::error::SlideError;
use crate::remote::{CytomineClient, TileProtocol, DEFAULT_TIMEOUT_SECS};
use crate::tile::codec::{is_valid_quality, DEFAULT_JPEG_QUALITY};
use crate::tile::{CacheConfig, DEFAULT_JOBS, DEFAULT_MAX_ENTRIES};

// =============================================================================
// Default Values
// =============================================================================

/// Default maximum total size of cached tiles.
pub const DEFAULT_CACHE_SIZE: &str = "256MB";

/// Upper bound on parallel downloads per tile.
pub const MAX_JOBS: usize = 64;

// =============================================================================
// CLI Arguments
// =============================================================================

/// sldc-cytomine - Cytomine whole slide images as cached tiles.
///
/// Downloads regions of remote slides tile by tile, fetching each native
/// tile at most once.
#[derive(Parser, Debug, Clone)]
#[command(name = "sldc-cytomine")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Consume the CLI and return the selected command.
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Dump a slide, or a region of it, to an image file.
    Dump(DumpConfig),

    /// Print slide metadata and the detected tile protocol.
    Probe(ProbeConfig),
}

/// Connection settings shared by all commands.
#[derive(Args, Debug, Clone)]
pub struct RemoteArgs {
    /// Cytomine host, e.g. https://demo.cytomine.be
    #[arg(long, env = "SLDC_HOST")]
    pub host: String,

    /// HTTP request timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, env = "SLDC_TIMEOUT")]
    pub timeout: u64,
}

impl RemoteArgs {
    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("Cytomine host is required. Set --host or SLDC_HOST".to_string());
        }
        if self.timeout == 0 {
            return Err("timeout must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Build the API client.
    pub fn client(&self) -> Result<CytomineClient, SlideError> {
        CytomineClient::with_timeout(&self.host, Duration::from_secs(self.timeout))
    }
}

/// Protocol selection on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolArg {
    /// Detect from the server
    #[default]
    Auto,
    Iip,
    Zoomify,
    Window,
}

impl ProtocolArg {
    /// The forced protocol, or `None` for auto-detection.
    pub fn protocol(self) -> Option<TileProtocol> {
        match self {
            ProtocolArg::Auto => None,
            ProtocolArg::Iip => Some(TileProtocol::Iip),
            ProtocolArg::Zoomify => Some(TileProtocol::Zoomify),
            ProtocolArg::Window => Some(TileProtocol::Window),
        }
    }
}

// =============================================================================
// Dump Command
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct DumpConfig {
    #[command(flatten)]
    pub remote: RemoteArgs,

    /// Image instance id.
    #[arg(long, env = "SLDC_IMAGE")]
    pub image: Option<u64>,

    /// Annotation id. Dumps the window bounding the annotation, on the image
    /// it was drawn on.
    #[arg(long, env = "SLDC_ANNOTATION")]
    pub annotation: Option<u64>,

    /// Destination path. May contain {id}, {image}, {zoom}, {width}, {height}
    /// and {originalFilename}. The extension selects the format (png, jpg).
    #[arg(short, long)]
    pub output: String,

    /// Zoom level (0 = full resolution).
    #[arg(short, long, default_value_t = 0)]
    pub zoom: u32,

    /// Tile download protocol.
    #[arg(long, value_enum, default_value_t = ProtocolArg::Auto)]
    pub protocol: ProtocolArg,

    /// Region to dump as x,y,width,height at the selected zoom level.
    #[arg(long)]
    pub region: Option<Region>,

    /// Number of native tiles downloaded in parallel.
    #[arg(short, long, default_value_t = DEFAULT_JOBS, env = "SLDC_JOBS")]
    pub jobs: usize,

    /// Maximum number of tiles kept in memory.
    #[arg(long, default_value_t = DEFAULT_MAX_ENTRIES, env = "SLDC_CACHE_TILES")]
    pub cache_tiles: usize,

    /// Maximum total size of tiles kept in memory (e.g. 512KB, 256MB, 1GB).
    #[arg(long, default_value = DEFAULT_CACHE_SIZE, env = "SLDC_CACHE_SIZE")]
    pub cache_size: String,

    /// JPEG quality (1-100), ignored for PNG output.
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY)]
    pub quality: u8,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl DumpConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        self.remote.validate()?;

        match (self.image, self.annotation) {
            (None, None) => return Err("either image or annotation is required".to_string()),
            (Some(_), Some(_)) => {
                return Err("image and annotation are mutually exclusive".to_string())
            }
            (None, Some(_)) if self.region.is_some() => {
                return Err("region cannot be combined with annotation".to_string())
            }
            _ => {}
        }
        if self.output.trim().is_empty() {
            return Err("output path must not be empty".to_string());
        }
        if self.jobs == 0 || self.jobs > MAX_JOBS {
            return Err(format!("jobs must be between 1 and {}", MAX_JOBS));
        }
        if self.cache_tiles == 0 {
            return Err("cache_tiles must be greater than 0".to_string());
        }
        if parse_byte_size(&self.cache_size)? == 0 {
            return Err("cache_size must be greater than 0".to_string());
        }
        if !is_valid_quality(self.quality) {
            return Err("quality must be between 1 and 100".to_string());
        }

        Ok(())
    }

    /// Cache bounds from `cache_tiles` and `cache_size`.
    pub fn cache_config(&self) -> Result<CacheConfig, String> {
        Ok(CacheConfig::new(
            Some(self.cache_tiles),
            Some(parse_byte_size(&self.cache_size)?),
        ))
    }

    /// What to dump, from `image`, `annotation` and `region`.
    pub fn zone(&self) -> Result<DumpZone, String> {
        match (self.annotation, self.image, self.region) {
            (Some(annotation_id), None, None) => Ok(DumpZone::Annotation { annotation_id }),
            (None, Some(image_id), Some(region)) => Ok(DumpZone::Region { image_id, region }),
            (None, Some(image_id), None) => Ok(DumpZone::Image { image_id }),
            _ => Err("invalid combination of image, region and annotation".to_string()),
        }
    }

    /// Build the dump request. Call [`validate`](Self::validate) first.
    pub fn to_request(&self) -> Result<DumpRequest, String> {
        Ok(DumpRequest {
            zone: self.zone()?,
            pattern: self.output.clone(),
            zoom_level: self.zoom,
            protocol: self.protocol.protocol(),
            jobs: self.jobs,
            cache: self.cache_config()?,
            quality: self.quality,
        })
    }
}

// =============================================================================
// Probe Command
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct ProbeConfig {
    #[command(flatten)]
    pub remote: RemoteArgs,

    /// Image instance id.
    #[arg(long, env = "SLDC_IMAGE")]
    pub image: u64,

    /// Print the result as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl ProbeConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.remote.validate()
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Parse a human readable byte size such as `1024`, `512KB`, `256MB` or `1GB`.
///
/// Units are binary (1KB = 1024 bytes) and case-insensitive.
pub fn parse_byte_size(value: &str) -> Result<usize, String> {
    let trimmed = value.trim();
    let upper = trimmed.to_ascii_uppercase();
    let split = upper
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(upper.len());
    let (digits, unit) = upper.split_at(split);

    let multiplier: usize = match unit.trim() {
        "" | "B" => 1,
        "K" | "KB" => 1024,
        "M" | "MB" => 1024 * 1024,
        "G" | "GB" => 1024 * 1024 * 1024,
        other => return Err(format!("invalid size unit '{}' in '{}'", other, trimmed)),
    };

    let number: usize = digits
        .parse()
        .map_err(|_| format!("invalid size '{}'", trimmed))?;
    number
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size '{}' is too large", trimmed))
}

// =============================================================================
// Tests
// =============================================================================
