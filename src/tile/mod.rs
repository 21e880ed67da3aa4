//! Tile layer.
//!
//! This module turns slide regions into cached, fetched-once tile images.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │      Tiling pipeline / dump_region      │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              TileBuilder                │
//! │  (regions → native tile identities,     │
//! │   parallel fetch, decode, stitch)       │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │               TileCache                 │
//! │  (LRU entries + in-flight markers)      │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │          FetchProvider Trait            │
//! │   (RemoteTileProvider, test doubles)    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileIdentity`]: Structural cache key (slide, zoom level, region)
//! - [`TileCache`]: LRU payload cache with at most one fetch in flight per identity
//! - [`TileTopology`]: Regular grid of tiles over an image, with overlap
//! - [`TileBuilder`] and [`Tile`]: Arbitrary regions assembled from native tiles
//! - [`codec`]: Decoding of fetched payloads and encoding of assembled images
//!
//! # Example
//!
//! ```
//! use async_trait::async_trait;
//! use bytes::Bytes;
//! use sldc_cytomine::tile::{FetchProvider, TileCache, TileIdentity};
//! use sldc_cytomine::FetchError;
//!
//! struct Zeros;
//!
//! #[async_trait]
//! impl FetchProvider for Zeros {
//!     async fn fetch(&self, identity: &TileIdentity) -> Result<Bytes, FetchError> {
//!         Ok(Bytes::from(vec![0u8; identity.width() as usize]))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), FetchError> {
//!     let cache = TileCache::new(Zeros);
//!     let identity = TileIdentity::new(1, 0, 0, 0, 256, 256)?;
//!
//!     let first = cache.lookup(&identity).await?;
//!     let second = cache.lookup(&identity).await?;
//!     assert!(!first.cache_hit && second.cache_hit);
//!     Ok(())
//! }
//! ```

mod builder;
mod cache;
pub mod codec;
mod identity;
mod topology;

pub use builder::{Tile, TileBuilder, DEFAULT_JOBS, NATIVE_TILE_SIZE};
pub use cache::{
    CacheConfig, CacheStats, CachedTile, FetchProvider, TileCache, DEFAULT_MAX_BYTES,
    DEFAULT_MAX_ENTRIES,
};
pub use identity::TileIdentity;
pub use topology::{TilePosition, TileTopology};
