//! # sldc-cytomine
//!
//! Remote Cytomine whole slide images exposed as tiles for tile-based
//! processing pipelines.
//!
//! Tiles of any size are assembled from the 256x256 native tiles of the
//! remote image server. Native tiles go through a shared in-memory cache that
//! fetches each of them at most once at a time, however many tiles overlap
//! it, and keeps memory bounded.
//!
//! ## Features
//!
//! - **Request coalescing**: concurrent requests for one tile share a single download
//! - **Bounded LRU cache**: by entry count, total bytes, or both
//! - **Three protocols**: IIP, Zoomify and rendered windows, with auto-detection
//! - **Region dumps**: write any region of a slide to PNG or JPEG
//!
//! ## Architecture
//!
//! - [`tile`] - Tile identities, the coalescing cache, topologies and tile assembly
//! - [`slide`] - Slide metadata, views, windows and the slide registry
//! - [`remote`] - Cytomine API client, protocols and the remote fetch provider
//! - [`dump`] - Dumping regions to image files
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use sldc_cytomine::{
//!     CacheConfig, CytomineClient, RemoteTileProvider, SlideRegistry, TileBuilder, TileCache,
//!     TileProtocol,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = CytomineClient::new("https://demo.cytomine.be")?;
//!     let registry = SlideRegistry::new(client.clone());
//!     let slide = registry.get_slide(77150623).await?;
//!
//!     let provider = RemoteTileProvider::new(client, TileProtocol::Iip);
//!     let cache = TileCache::with_config(provider, CacheConfig::default())?;
//!     let builder = TileBuilder::new(cache).with_jobs(8);
//!
//!     let window = slide.view(2)?.full_window();
//!     for tile in builder.build_all(&window, 512, 512, 32)? {
//!         let image = tile.image().await?;
//!         println!("{}: {}x{}", tile.identity(), image.width(), image.height());
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dump;
pub mod error;
pub mod remote;
pub mod slide;
pub mod tile;

// Re-export commonly used types
pub use config::{Cli, Command, DumpConfig, ProbeConfig};
pub use dump::{dump_region, resolve_pattern, DumpOutcome, DumpRequest, DumpZone, Region};
pub use error::{CacheError, FetchError, SlideError, TileError};
pub use remote::{infer_protocol, CytomineClient, RemoteTileProvider, TileProtocol};
pub use slide::{
    annotation_window, Annotation, ImageInstance, ServerGeneration, SliceInstance, Slide,
    SlideRegistry, SlideSource, SlideView, SlideWindow,
};
pub use tile::{
    CacheConfig, CacheStats, CachedTile, FetchProvider, Tile, TileBuilder, TileCache,
    TileIdentity, TilePosition, TileTopology,
};
