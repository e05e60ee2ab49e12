//! Memory-mapped resource engine.
//!
//! Zero-copy, cached access to on-disk media and binary data. Mappings are
//! created lazily on first access, cached by `(path, mode)` and evicted in
//! least-recently-used order once the cache exceeds its capacity. An entry is
//! only evicted when no [`MappedView`] of it is alive.
//!
//! The engine does not notice when a mapped file changes on disk after it was
//! mapped. Truncating a mapped file from elsewhere is an unguarded hazard;
//! call [`MmapEngine::unmap`] before rewriting a file you mapped earlier.

mod array;
mod frames;
mod view;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tracing::{debug, warn};

use crate::error::MediaResult;
use crate::metrics;

pub use array::{DiskArray, Element, ElementType};
pub use frames::{FrameLayout, FrameRange};
pub use view::{MapMode, MappedView, ViewGuard, ViewGuardMut};

use view::Mapping;

/// Default number of cached mappings.
pub const DEFAULT_CACHE_CAPACITY: usize = 32;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct MmapConfig {
    /// Maximum number of cached mappings before LRU eviction kicks in.
    pub capacity: usize,
}

impl Default for MmapConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MmapStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

type CacheKey = (PathBuf, MapMode);

struct CacheEntry {
    path: Arc<Path>,
    mapping: Arc<Mapping>,
    last_access: Instant,
}

impl CacheEntry {
    /// Views alive outside the cache.
    fn outstanding(&self) -> usize {
        Arc::strong_count(&self.mapping) - 1
    }
}

#[derive(Default)]
struct MmapCache {
    entries: HashMap<CacheKey, CacheEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Cached memory-mapping service.
///
/// Cheap to clone; clones share one cache guarded by a single lock that
/// covers insert/evict bookkeeping only. Views themselves are not
/// synchronized across processes.
#[derive(Clone)]
pub struct MmapEngine {
    cache: Arc<Mutex<MmapCache>>,
    capacity: usize,
}

impl Default for MmapEngine {
    fn default() -> Self {
        Self::with_config(MmapConfig::default())
    }
}

impl MmapEngine {
    /// Create an engine holding at most `capacity` idle mappings.
    pub fn new(capacity: usize) -> Self {
        Self::with_config(MmapConfig { capacity })
    }

    pub fn with_config(config: MmapConfig) -> Self {
        Self {
            cache: Arc::new(Mutex::new(MmapCache::default())),
            capacity: config.capacity.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MmapCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Map a file, reusing a cached mapping for the same `(path, mode)`.
    pub fn map_file(&self, path: impl AsRef<Path>, mode: MapMode) -> MediaResult<MappedView> {
        let path = path.as_ref();
        let key: CacheKey = (path.to_path_buf(), mode);

        {
            let mut cache = self.lock();
            if let Some(entry) = cache.entries.get_mut(&key) {
                entry.last_access = Instant::now();
                let view = MappedView::new(entry.path.clone(), mode, entry.mapping.clone());
                cache.hits += 1;
                metrics::record_mmap_hit();
                return Ok(view);
            }
        }

        // Map outside the lock; if another thread won the race, use its entry.
        let mapping = Arc::new(Mapping::open(path, mode)?);
        debug!(path = %path.display(), ?mode, len = mapping.len(), "Mapped file");

        let mut cache = self.lock();
        cache.misses += 1;
        metrics::record_mmap_miss();

        let entry = cache.entries.entry(key.clone()).or_insert_with(|| CacheEntry {
            path: Arc::from(path),
            mapping,
            last_access: Instant::now(),
        });
        entry.last_access = Instant::now();
        let view = MappedView::new(entry.path.clone(), mode, entry.mapping.clone());

        self.evict_to_capacity(&mut cache, &key);
        Ok(view)
    }

    /// Evict idle entries, oldest first, until the cache fits its capacity.
    fn evict_to_capacity(&self, cache: &mut MmapCache, keep: &CacheKey) {
        while cache.entries.len() > self.capacity {
            let victim = cache
                .entries
                .iter()
                .filter(|(key, entry)| *key != keep && entry.outstanding() == 0)
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(key, _)| key.clone());

            match victim {
                Some(key) => {
                    cache.entries.remove(&key);
                    cache.evictions += 1;
                    metrics::record_mmap_eviction();
                    debug!(path = %key.0.display(), mode = ?key.1, "Evicted mapping");
                }
                None => {
                    warn!(
                        entries = cache.entries.len(),
                        capacity = self.capacity,
                        "All cached mappings are in use; cache temporarily over capacity"
                    );
                    break;
                }
            }
        }
    }

    /// Map `frame_count` frames starting at `start_frame` from a raw frame file.
    ///
    /// Returns fewer frames than requested (possibly zero) when the file
    /// ends early; that is not an error.
    pub fn map_frames(
        &self,
        path: impl AsRef<Path>,
        layout: FrameLayout,
        start_frame: usize,
        frame_count: usize,
    ) -> MediaResult<FrameRange> {
        let path = path.as_ref();
        layout.validate(path)?;
        let view = self.map_file(path, MapMode::ReadOnly)?;
        FrameRange::new(view, layout, start_frame, frame_count)
    }

    /// Open or create a disk-backed array of `shape` elements.
    ///
    /// In [`MapMode::WriteCreate`] the file is resized to fit the shape.
    /// Writes are not durable until [`DiskArray::flush`].
    pub fn create_array(
        &self,
        path: impl AsRef<Path>,
        shape: &[usize],
        element_type: ElementType,
        mode: MapMode,
    ) -> MediaResult<DiskArray> {
        let path = path.as_ref();
        let byte_len = array::byte_len(shape, element_type)?;

        if mode == MapMode::WriteCreate {
            // Any cached mapping predates the resize.
            self.unmap(path);
            let file = std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)?;
            file.set_len(byte_len as u64)?;
        }

        let view = self.map_file(path, mode)?;
        DiskArray::new(view, shape.to_vec(), element_type, byte_len)
    }

    /// Drop the cached mappings of `path` in every mode.
    ///
    /// Live views keep their mapping until they are dropped. Returns the
    /// number of cache entries removed; 0 when nothing was mapped.
    pub fn unmap(&self, path: impl AsRef<Path>) -> usize {
        let path = path.as_ref();
        let mut cache = self.lock();
        let before = cache.entries.len();
        cache.entries.retain(|(p, _), _| p != path);
        before - cache.entries.len()
    }

    /// Drop every cached mapping. Returns the number of entries removed.
    pub fn clear_all(&self) -> usize {
        let mut cache = self.lock();
        let removed = cache.entries.len();
        cache.entries.clear();
        removed
    }

    /// Whether `(path, mode)` currently has a cache entry.
    pub fn is_cached(&self, path: impl AsRef<Path>, mode: MapMode) -> bool {
        self.lock()
            .entries
            .contains_key(&(path.as_ref().to_path_buf(), mode))
    }

    /// Live views of a cached mapping, or `None` if it is not cached.
    pub fn ref_count(&self, path: impl AsRef<Path>, mode: MapMode) -> Option<usize> {
        self.lock()
            .entries
            .get(&(path.as_ref().to_path_buf(), mode))
            .map(CacheEntry::outstanding)
    }

    pub fn stats(&self) -> MmapStats {
        let cache = self.lock();
        MmapStats {
            entries: cache.entries.len(),
            capacity: self.capacity,
            hits: cache.hits,
            misses: cache.misses,
            evictions: cache.evictions,
        }
    }
}
