//! Tile cache with request coalescing.
//!
//! This module provides an in-memory LRU cache for raw tile payloads that
//! sits in front of a [`FetchProvider`]. It guarantees that at most one fetch
//! per [`TileIdentity`] is outstanding at any instant: concurrent callers for
//! the same identity wait on the fetch that is already running instead of
//! issuing their own.
//!
//! # Coalescing
//!
//! The cache keeps two maps behind a single mutex:
//! - resolved entries, in LRU order
//! - in-flight markers, one per identity currently being fetched
//!
//! A caller that finds neither creates the marker and starts the fetch in the
//! same critical section. The fetch runs on its own task, so dropping any
//! caller (including the one that started it) never cancels it. When it
//! completes, the entry is stored and the marker removed, again under the
//! lock, and only then is the outcome published to waiters.
//!
//! # Size-Based Eviction
//!
//! The cache can be bounded by entry count, total payload bytes, or both.
//! Least-recently-used entries are evicted after each insertion until every
//! bound holds. Evicting an entry only drops the cache's reference; callers
//! holding the payload keep it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::error::{CacheError, FetchError};

use super::identity::TileIdentity;

/// Default maximum number of cached tiles.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Default maximum total payload size: 256MB
pub const DEFAULT_MAX_BYTES: usize = 256 * 1024 * 1024;

// =============================================================================
// FetchProvider Trait
// =============================================================================

/// Source of raw tile bytes.
///
/// Implementations perform the actual network call. Fetching the same
/// identity twice must return equivalent bytes (or fail both times).
#[async_trait]
pub trait FetchProvider: Send + Sync {
    /// Fetch the payload of a tile.
    async fn fetch(&self, identity: &TileIdentity) -> Result<Bytes, FetchError>;
}

#[async_trait]
impl<P: FetchProvider + ?Sized> FetchProvider for Arc<P> {
    async fn fetch(&self, identity: &TileIdentity) -> Result<Bytes, FetchError> {
        (**self).fetch(identity).await
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Capacity bounds of a [`TileCache`]. `None` means no bound on that axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheConfig {
    /// Maximum number of cached tiles
    pub max_entries: Option<usize>,

    /// Maximum total payload size in bytes
    pub max_bytes: Option<usize>,
}

impl CacheConfig {
    pub fn new(max_entries: Option<usize>, max_bytes: Option<usize>) -> Self {
        Self {
            max_entries,
            max_bytes,
        }
    }

    /// Bound by entry count only.
    pub fn entries(max_entries: usize) -> Self {
        Self::new(Some(max_entries), None)
    }

    /// Bound by total payload size only.
    pub fn bytes(max_bytes: usize) -> Self {
        Self::new(None, Some(max_bytes))
    }

    /// No eviction at all. Entries live until invalidated or cleared.
    pub fn unbounded() -> Self {
        Self::new(None, None)
    }

    /// Reject zero bounds.
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.max_entries == Some(0) {
            return Err(CacheError::CapacityMisconfiguration {
                reason: "max_entries must be greater than 0".to_string(),
            });
        }
        if self.max_bytes == Some(0) {
            return Err(CacheError::CapacityMisconfiguration {
                reason: "max_bytes must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(Some(DEFAULT_MAX_ENTRIES), Some(DEFAULT_MAX_BYTES))
    }
}

// =============================================================================
// Results and Statistics
// =============================================================================

/// A resolved tile payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedTile {
    /// The raw tile bytes
    pub data: Bytes,

    /// Whether the payload was already cached when requested
    pub cache_hit: bool,
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Requests served from a cached entry
    pub hits: u64,

    /// Requests that started a fetch
    pub misses: u64,

    /// Requests that joined a fetch already in flight
    pub coalesced: u64,

    /// Fetches that completed with an error
    pub fetch_failures: u64,

    /// Entries removed under capacity pressure
    pub evictions: u64,

    /// Current number of entries
    pub entries: usize,

    /// Current total payload size in bytes
    pub size_bytes: usize,

    /// Configured entry bound
    pub max_entries: Option<usize>,

    /// Configured byte bound
    pub max_bytes: Option<usize>,
}

// =============================================================================
// Tile Cache
// =============================================================================

/// Outcome slot shared between a fetch task and its waiters.
type Outcome = Option<Result<Bytes, FetchError>>;

/// Mutable state. Always accessed under `Shared::state`, never across an
/// `.await`.
struct CacheState {
    entries: LruCache<TileIdentity, Bytes>,
    size: usize,
    in_flight: HashMap<TileIdentity, watch::Receiver<Outcome>>,
    hits: u64,
    misses: u64,
    coalesced: u64,
    fetch_failures: u64,
    evictions: u64,
}

struct Shared {
    state: Mutex<CacheState>,
    config: CacheConfig,
}

/// LRU tile cache that coalesces concurrent fetches of the same tile.
///
/// Cloning the cache is cheap and yields another handle to the same entries.
///
/// # Example
///
/// ```ignore
/// use sldc_cytomine::tile::{CacheConfig, TileCache, TileIdentity};
///
/// let cache = TileCache::with_config(provider, CacheConfig::entries(1000))?;
/// let identity = TileIdentity::new(77150623, 0, 0, 0, 256, 256)?;
///
/// // First call fetches, later calls are served from memory
/// let payload = cache.get_or_fetch(&identity).await?;
/// ```
pub struct TileCache<P> {
    shared: Arc<Shared>,
    provider: Arc<P>,
}

impl<P> Clone for TileCache<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            provider: Arc::clone(&self.provider),
        }
    }
}

impl<P: FetchProvider + 'static> TileCache<P> {
    /// Create a cache with the default bounds.
    pub fn new(provider: P) -> Self {
        Self::build(Arc::new(provider), CacheConfig::default())
    }

    /// Create a cache with custom bounds.
    ///
    /// Fails if a bound is zero.
    pub fn with_config(provider: P, config: CacheConfig) -> Result<Self, CacheError> {
        Self::with_shared_provider(Arc::new(provider), config)
    }

    /// Create a cache around a provider that is also used elsewhere.
    pub fn with_shared_provider(provider: Arc<P>, config: CacheConfig) -> Result<Self, CacheError> {
        config.validate()?;
        Ok(Self::build(provider, config))
    }

    fn build(provider: Arc<P>, config: CacheConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(CacheState {
                    entries: LruCache::unbounded(),
                    size: 0,
                    in_flight: HashMap::new(),
                    hits: 0,
                    misses: 0,
                    coalesced: 0,
                    fetch_failures: 0,
                    evictions: 0,
                }),
                config,
            }),
            provider,
        }
    }

    /// Return the payload for `identity`, fetching it if needed.
    ///
    /// All callers that arrive while a fetch for `identity` is running get
    /// that fetch's outcome. Failures are not cached.
    pub async fn get_or_fetch(&self, identity: &TileIdentity) -> Result<Bytes, FetchError> {
        self.lookup(identity).await.map(|tile| tile.data)
    }

    /// Like [`get_or_fetch`](Self::get_or_fetch), also reporting whether the
    /// payload came from the cache.
    pub async fn lookup(&self, identity: &TileIdentity) -> Result<CachedTile, FetchError> {
        let mut outcome = {
            let mut state = self.shared.state.lock();

            if let Some(data) = state.entries.get(identity) {
                let data = data.clone();
                state.hits += 1;
                trace!(%identity, "tile cache hit");
                return Ok(CachedTile {
                    data,
                    cache_hit: true,
                });
            }

            if let Some(pending) = state.in_flight.get(identity) {
                let pending = pending.clone();
                state.coalesced += 1;
                debug!(%identity, "joining in-flight tile fetch");
                pending
            } else {
                let (tx, rx) = watch::channel(None);
                state.in_flight.insert(*identity, rx.clone());
                state.misses += 1;
                debug!(%identity, "tile cache miss, fetching");
                self.spawn_fetch(*identity, tx);
                rx
            }
        };

        let result = match outcome.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };

        match result {
            Some(Ok(data)) => Ok(CachedTile {
                data,
                cache_hit: false,
            }),
            Some(Err(e)) => Err(e),
            None => Err(FetchError::Failure(format!(
                "fetch of tile {} ended without a result",
                identity
            ))),
        }
    }

    /// Run the fetch on its own task and publish its outcome.
    fn spawn_fetch(&self, identity: TileIdentity, tx: watch::Sender<Outcome>) {
        let shared = Arc::clone(&self.shared);
        let provider = Arc::clone(&self.provider);

        tokio::spawn(async move {
            let mut marker = MarkerGuard {
                shared: Arc::clone(&shared),
                identity,
                armed: true,
            };

            let result = provider.fetch(&identity).await;

            {
                let mut state = shared.state.lock();
                match &result {
                    Ok(data) => shared.insert_locked(&mut state, identity, data.clone()),
                    Err(e) => {
                        state.fetch_failures += 1;
                        warn!(%identity, error = %e, "tile fetch failed");
                    }
                }
                state.in_flight.remove(&identity);
                marker.armed = false;
                tx.send_replace(Some(result));
            }
        });
    }

    /// Get a cached payload without fetching. Marks the entry as recently used.
    pub fn get(&self, identity: &TileIdentity) -> Option<Bytes> {
        self.shared.state.lock().entries.get(identity).cloned()
    }

    /// Check whether an entry exists without updating LRU order.
    pub fn contains(&self, identity: &TileIdentity) -> bool {
        self.shared.state.lock().entries.contains(identity)
    }

    /// Remove the entry for `identity`, if any.
    ///
    /// A fetch already in flight for `identity` is not cancelled and its
    /// result is stored when it completes. Returns whether an entry was removed.
    pub fn invalidate(&self, identity: &TileIdentity) -> bool {
        let mut state = self.shared.state.lock();
        match state.entries.pop(identity) {
            Some(data) => {
                state.size = state.size.saturating_sub(data.len());
                debug!(%identity, "tile invalidated");
                true
            }
            None => false,
        }
    }

    /// Remove all entries. In-flight fetches are unaffected.
    pub fn clear(&self) {
        let mut state = self.shared.state.lock();
        state.entries.clear();
        state.size = 0;
    }

    /// Number of cached tiles.
    pub fn len(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().entries.is_empty()
    }

    /// Total payload size of cached tiles in bytes.
    pub fn size(&self) -> usize {
        self.shared.state.lock().size
    }

    /// Number of fetches currently in flight.
    pub fn in_flight(&self) -> usize {
        self.shared.state.lock().in_flight.len()
    }

    /// Capacity bounds this cache was built with.
    pub fn config(&self) -> CacheConfig {
        self.shared.config
    }

    /// Snapshot of the cache counters.
    pub fn stats(&self) -> CacheStats {
        let state = self.shared.state.lock();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            coalesced: state.coalesced,
            fetch_failures: state.fetch_failures,
            evictions: state.evictions,
            entries: state.entries.len(),
            size_bytes: state.size,
            max_entries: self.shared.config.max_entries,
            max_bytes: self.shared.config.max_bytes,
        }
    }

    /// The provider used on cache misses.
    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }
}

impl Shared {
    /// Store a payload and evict until every bound holds.
    fn insert_locked(&self, state: &mut CacheState, identity: TileIdentity, data: Bytes) {
        let data_size = data.len();

        if self.config.max_bytes.is_some_and(|max| data_size > max) {
            if let Some(old) = state.entries.pop(&identity) {
                state.size = state.size.saturating_sub(old.len());
            }
            debug!(%identity, bytes = data_size, "tile larger than cache, not retained");
            return;
        }

        if let Some(old) = state.entries.put(identity, data) {
            state.size = state.size.saturating_sub(old.len());
        }
        state.size += data_size;

        while self.over_capacity(state) {
            match state.entries.pop_lru() {
                Some((evicted, evicted_data)) => {
                    state.size = state.size.saturating_sub(evicted_data.len());
                    state.evictions += 1;
                    debug!(identity = %evicted, bytes = evicted_data.len(), "evicted tile");
                }
                None => break,
            }
        }
    }

    fn over_capacity(&self, state: &CacheState) -> bool {
        let over_entries = self
            .config
            .max_entries
            .is_some_and(|max| state.entries.len() > max);
        let over_bytes = self.config.max_bytes.is_some_and(|max| state.size > max);
        over_entries || over_bytes
    }
}

/// Removes the in-flight marker if the fetch task dies before publishing.
///
/// Waiters then observe a closed channel and fail with `FetchError::Failure`.
struct MarkerGuard {
    shared: Arc<Shared>,
    identity: TileIdentity,
    armed: bool,
}

impl Drop for MarkerGuard {
    fn drop(&mut self) {
        if self.armed {
            self.shared.state.lock().in_flight.remove(&self.identity);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
