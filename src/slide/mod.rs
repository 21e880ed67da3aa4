//! Slide metadata layer.
//!
//! This module describes remote images and how they are read at a given zoom
//! level, independently of how tiles are fetched.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │      TileBuilder / RemoteTileProvider   │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │            SlideRegistry                │
//! │  (caches slides, coalesces lookups)     │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │          SlideSource Trait              │
//! │  (CytomineClient, or a test double)     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! A [`Slide`] is read through a [`SlideView`] (one zoom level), which is
//! split into [`SlideWindow`]s by the tile builder. Annotation zones map to
//! the window bounding their geometry (see [`annotation_window`]).

mod metadata;
mod registry;
mod view;
mod zone;

pub(crate) use metadata::ImagingServerList;
pub use metadata::{Annotation, ImageInstance, SliceInstance};
pub use registry::{SlideRegistry, SlideSource, DEFAULT_SLIDE_CACHE_CAPACITY};
pub use view::{ServerGeneration, Slide, SlideView, SlideWindow, SLIDE_CHANNELS};
pub use zone::annotation_window;
