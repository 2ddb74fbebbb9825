//! A per-thread LRU of open provider read handles (spec §4.6, "I/O library
//! handles are strictly per-thread; a worker may keep at most K open
//! readers at once").
//!
//! Each worker thread owns exactly one of these. It is never shared, never
//! wrapped in a mutex — that's the whole point: GDAL/provider handles stay
//! confined to the thread that opened them.

use indexmap::IndexMap;

use crate::config::ResamplingMethod;
use crate::provider::{RasterProvider, RasterReader};
use crate::types::{GridSpec, ImageInfo, InputId};
use anyhow::Result;

/// Bounded LRU, capacity `K`. Insertion order in the underlying
/// [`IndexMap`] doubles as recency order: the front is least-recently
/// used, the back is most-recently used, so eviction is "shift off the
/// front" and a cache hit is "move to the back".
pub struct HandleCache<'p> {
    provider: &'p dyn RasterProvider,
    capacity: usize,
    entries: IndexMap<InputId, Box<dyn RasterReader>>,
}

impl<'p> HandleCache<'p> {
    pub fn new(provider: &'p dyn RasterProvider, capacity: usize) -> Self {
        assert!(capacity > 0, "handle cache capacity must be positive");
        HandleCache {
            provider,
            capacity,
            entries: IndexMap::new(),
        }
    }

    /// Get a reader for `info`, opening (and evicting if necessary) on a
    /// miss. `target_grid`/`resampling` are forwarded to
    /// `RasterProvider::open_read` verbatim on open; they have no effect
    /// on an existing cached handle, since every call in one run uses the
    /// same target grid and resampling method.
    pub fn get_or_open(
        &mut self,
        info: &ImageInfo,
        target_grid: Option<&GridSpec>,
        resampling: ResamplingMethod,
    ) -> Result<&mut Box<dyn RasterReader>> {
        if self.entries.contains_key(&info.id) {
            self.touch(info.id);
        } else {
            if self.entries.len() >= self.capacity {
                // Evict the least-recently-used entry (front of the map).
                // Dropping the boxed reader closes its underlying handle.
                self.entries.shift_remove_index(0);
            }
            let reader = self.provider.open_read(info, target_grid, resampling)?;
            self.entries.insert(info.id, reader);
        }

        Ok(self.entries.get_mut(&info.id).expect("just inserted or already present"))
    }

    fn touch(&mut self, id: InputId) {
        // `shift_remove` + re-`insert` moves the entry to the back (most
        // recently used) without disturbing the relative order of the rest.
        if let Some(reader) = self.entries.shift_remove(&id) {
            self.entries.insert(id, reader);
        }
    }

    pub fn contains(&self, id: InputId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRaster, InMemoryProvider};
    use crate::types::{DataType, PixelBuffer};

    fn grid() -> GridSpec {
        GridSpec {
            projection: "EPSG:4326".to_string(),
            geo_transform: [0.0, 1.0, 0.0, 0.0, 0.0, -1.0],
            width: 2,
            height: 2,
            datatype: DataType::U8,
            nodata: Some(0.0),
            band_count: 1,
        }
    }

    fn provider_with(n: usize) -> InMemoryProvider {
        let mut provider = InMemoryProvider::new();
        for i in 0..n {
            provider = provider.with_input(
                &format!("in{i}.tif"),
                FakeRaster::new(grid(), vec![PixelBuffer::U8(vec![0, 0, 0, 0])]),
            );
        }
        provider
    }

    fn info(id: usize) -> ImageInfo {
        ImageInfo {
            id,
            path: format!("in{id}.tif"),
            grid: grid(),
            block_size: (256, 256),
        }
    }

    #[test]
    fn test_cache_hit_does_not_grow_len() {
        let provider = provider_with(1);
        let mut cache = HandleCache::new(&provider, 4);
        cache.get_or_open(&info(0), None, ResamplingMethod::NearestNeighbor).unwrap();
        cache.get_or_open(&info(0), None, ResamplingMethod::NearestNeighbor).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_eviction_past_capacity() {
        let provider = provider_with(3);
        let mut cache = HandleCache::new(&provider, 2);
        cache.get_or_open(&info(0), None, ResamplingMethod::NearestNeighbor).unwrap();
        cache.get_or_open(&info(1), None, ResamplingMethod::NearestNeighbor).unwrap();
        cache.get_or_open(&info(2), None, ResamplingMethod::NearestNeighbor).unwrap();
        assert_eq!(cache.len(), 2);
        // input 0 was least-recently-used and should have been evicted;
        // reopening it should succeed (not panic) and keep len at capacity.
        cache.get_or_open(&info(0), None, ResamplingMethod::NearestNeighbor).unwrap();
        assert_eq!(cache.len(), 2);
    }
}
