//! Counters exposed to the host's profiler

use crate::tile_cache::TileCacheStats;
use std::collections::BTreeMap;

/// Destination of named per-frame values
pub trait StatsSink {
    fn set_attribute(&mut self, frame: u64, name: &str, value: f64);
}

impl StatsSink for BTreeMap<String, f64> {
    fn set_attribute(&mut self, _frame: u64, name: &str, value: f64) {
        self.insert(name.to_string(), value);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdaterStats {
    /// Queued plus in-flight jobs
    pub jobs: usize,
    pub waiting: usize,
    /// Waiting jobs held back by the minimum update interval
    pub delayed: usize,
    /// Jobs posted since start
    pub pushed: usize,
    pub processing: usize,
    pub db_get_tile_hits: usize,
    pub cache: TileCacheStats,
}

impl UpdaterStats {
    pub fn report(&self, frame: u64, sink: &mut dyn StatsSink) {
        let values = [
            ("NavMesh Jobs", self.jobs),
            ("NavMesh Waiting", self.waiting),
            ("NavMesh Delayed", self.delayed),
            ("NavMesh Pushed", self.pushed),
            ("NavMesh Processing", self.processing),
            ("NavMesh DbGetTileHits", self.db_get_tile_hits),
            ("NavMesh CacheSize", self.cache.size),
            ("NavMesh UsedTiles", self.cache.used_tiles),
            ("NavMesh CachedTiles", self.cache.cached_tiles),
            ("NavMesh Cache Get", self.cache.get_count),
            ("NavMesh Cache Hit", self.cache.hit_count),
        ];
        for (name, value) in values {
            sink.set_attribute(frame, name, value as f64);
        }
    }
}
