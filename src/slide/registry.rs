//! Slide Registry for caching remote slide metadata.
//!
//! Resolving a slide costs one or two API round trips (image instance, then
//! reference slice). The registry keeps resolved slides in an LRU cache and
//! coalesces concurrent lookups of the same image so that only one of them
//! reaches the remote API.
//!
//! # Example
//!
//! ```ignore
//! use sldc_cytomine::remote::CytomineClient;
//! use sldc_cytomine::slide::SlideRegistry;
//!
//! let client = CytomineClient::new("https://demo.cytomine.be")?;
//! let registry = SlideRegistry::new(client);
//!
//! // Resolves on first access, cached afterwards
//! let slide = registry.get_slide(77150623).await?;
//! let view = slide.view(2)?;
//! ```

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::SlideError;

use super::view::Slide;

// =============================================================================
// Configuration
// =============================================================================

/// Default capacity for slide cache (number of slides).
pub const DEFAULT_SLIDE_CACHE_CAPACITY: usize = 100;

// =============================================================================
// SlideSource Trait
// =============================================================================

/// Trait for resolving slide metadata from an image instance identifier.
///
/// This abstraction allows the registry to work against the real API or an
/// in-memory source in tests.
#[async_trait]
pub trait SlideSource: Send + Sync {
    /// Fetch the metadata of image instance `image_id`.
    async fn fetch_slide(&self, image_id: u64) -> Result<Slide, SlideError>;
}

#[async_trait]
impl<S: SlideSource + ?Sized> SlideSource for Arc<S> {
    async fn fetch_slide(&self, image_id: u64) -> Result<Slide, SlideError> {
        (**self).fetch_slide(image_id).await
    }
}

// =============================================================================
// SlideRegistry
// =============================================================================

/// Registry for caching slide metadata.
///
/// The registry:
/// - Caches resolved slides with LRU eviction
/// - Coalesces concurrent lookups of the same image
/// - Does not cache failures
pub struct SlideRegistry<S: SlideSource> {
    /// The source for resolving slides
    source: S,

    /// Cached slides indexed by image instance id
    cache: Mutex<LruCache<u64, Arc<Slide>>>,

    /// In-flight lookups, one cell per image
    in_flight: Mutex<HashMap<u64, Arc<OnceCell<Arc<Slide>>>>>,
}

impl<S: SlideSource> SlideRegistry<S> {
    /// Create a new SlideRegistry caching up to 100 slides.
    pub fn new(source: S) -> Self {
        Self::with_capacity(source, DEFAULT_SLIDE_CACHE_CAPACITY)
    }

    /// Create a new SlideRegistry with a custom capacity.
    ///
    /// A capacity of zero is treated as one.
    pub fn with_capacity(source: S, capacity: usize) -> Self {
        Self {
            source,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Get the underlying slide source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Get a slide, resolving it if not already cached.
    ///
    /// Concurrent calls for the same image share one lookup. If that lookup
    /// fails, each waiting caller retries on its own in turn.
    pub async fn get_slide(&self, image_id: u64) -> Result<Arc<Slide>, SlideError> {
        let cell = {
            let mut in_flight = self.in_flight.lock();
            if let Some(slide) = self.cache.lock().get(&image_id) {
                return Ok(Arc::clone(slide));
            }
            Arc::clone(
                in_flight
                    .entry(image_id)
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        let result = cell
            .get_or_try_init(|| async {
                debug!(image_id, "Resolving slide metadata");
                self.source.fetch_slide(image_id).await.map(Arc::new)
            })
            .await
            .cloned();

        if let Ok(slide) = &result {
            self.cache.lock().put(image_id, Arc::clone(slide));
        }

        let mut in_flight = self.in_flight.lock();
        if in_flight
            .get(&image_id)
            .is_some_and(|current| Arc::ptr_eq(current, &cell))
        {
            in_flight.remove(&image_id);
        }

        result
    }

    /// Remove a slide from the cache.
    ///
    /// This can be useful for forcing a reload of a slide's metadata.
    pub fn invalidate(&self, image_id: u64) -> bool {
        self.cache.lock().pop(&image_id).is_some()
    }

    /// Clear all cached slides.
    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    /// Get the number of cached slides.
    pub fn cached_count(&self) -> usize {
        self.cache.lock().len()
    }
}

// =============================================================================
// Tests
// =============================================================================
