//! Prometheus-compatible metrics for the host allocator
//!
//! Occupancy is exported as gauges, cumulative activity as counters.
//! Values come from [`HostAllocatorStats`] snapshots, so the allocator's
//! hot path never touches the registry.

use prometheus_client::{
    encoding::text::encode,
    metrics::counter::Counter,
    metrics::gauge::Gauge,
    registry::Registry,
};

use crate::host_alloc::HostAllocatorStats;

/// Metrics registry for one allocator
#[derive(Debug)]
pub struct HostAllocatorMetrics {
    /// Registry containing all metrics
    pub registry: Registry,

    tracked_blocks: Gauge,
    allocated_blocks: Gauge,
    pending_blocks: Gauge,
    cached_blocks: Gauge,
    tracked_bytes: Gauge,
    cached_bytes: Gauge,

    cache_hits: Counter,
    cache_misses: Counter,
    allocation_failures: Counter,
    drains: Counter,
    blocks_freed: Counter,
}

impl HostAllocatorMetrics {
    /// Create a new metrics collection
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let tracked_blocks = Gauge::default();
        registry.register(
            "pinforge_tracked_blocks",
            "Pinned blocks tracked by the allocator",
            tracked_blocks.clone(),
        );

        let allocated_blocks = Gauge::default();
        registry.register(
            "pinforge_allocated_blocks",
            "Pinned blocks currently held by callers",
            allocated_blocks.clone(),
        );

        let pending_blocks = Gauge::default();
        registry.register(
            "pinforge_pending_blocks",
            "Released blocks waiting on device events",
            pending_blocks.clone(),
        );

        let cached_blocks = Gauge::default();
        registry.register(
            "pinforge_cached_blocks",
            "Blocks ready for reuse",
            cached_blocks.clone(),
        );

        let tracked_bytes = Gauge::default();
        registry.register(
            "pinforge_tracked_bytes",
            "Pinned bytes tracked by the allocator",
            tracked_bytes.clone(),
        );

        let cached_bytes = Gauge::default();
        registry.register(
            "pinforge_cached_bytes",
            "Pinned bytes ready for reuse",
            cached_bytes.clone(),
        );

        let cache_hits = Counter::default();
        registry.register(
            "pinforge_cache_hits",
            "Allocations served from the cache",
            cache_hits.clone(),
        );

        let cache_misses = Counter::default();
        registry.register(
            "pinforge_cache_misses",
            "Allocations that went to the device",
            cache_misses.clone(),
        );

        let allocation_failures = Counter::default();
        registry.register(
            "pinforge_allocation_failures",
            "Allocations that failed after the retry",
            allocation_failures.clone(),
        );

        let drains = Counter::default();
        registry.register("pinforge_drains", "Cache drain passes", drains.clone());

        let blocks_freed = Counter::default();
        registry.register(
            "pinforge_blocks_freed",
            "Blocks returned to the device",
            blocks_freed.clone(),
        );

        Self {
            registry,
            tracked_blocks,
            allocated_blocks,
            pending_blocks,
            cached_blocks,
            tracked_bytes,
            cached_bytes,
            cache_hits,
            cache_misses,
            allocation_failures,
            drains,
            blocks_freed,
        }
    }

    /// Update every metric from a stats snapshot
    ///
    /// Counters only move forward; a snapshot older than the last one
    /// observed leaves them unchanged.
    pub fn observe(&self, stats: &HostAllocatorStats) {
        self.tracked_blocks.set(stats.tracked_blocks as i64);
        self.allocated_blocks.set(stats.allocated_blocks as i64);
        self.pending_blocks.set(stats.pending_blocks as i64);
        self.cached_blocks.set(stats.cached_blocks as i64);
        self.tracked_bytes.set(stats.tracked_bytes as i64);
        self.cached_bytes.set(stats.cached_bytes as i64);

        advance(&self.cache_hits, stats.cache_hits);
        advance(&self.cache_misses, stats.cache_misses);
        advance(&self.allocation_failures, stats.allocation_failures);
        advance(&self.drains, stats.drains);
        advance(&self.blocks_freed, stats.blocks_freed);
    }

    /// Render the registry in Prometheus text format
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}

impl Default for HostAllocatorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn advance(counter: &Counter, total: u64) {
    let current = counter.get();
    if total > current {
        counter.inc_by(total - current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_and_encode() {
        let metrics = HostAllocatorMetrics::new();
        let stats = HostAllocatorStats {
            tracked_blocks: 3,
            cached_blocks: 1,
            cache_hits: 7,
            cache_misses: 2,
            ..Default::default()
        };
        metrics.observe(&stats);

        let text = metrics.encode().unwrap();
        assert!(text.contains("pinforge_tracked_blocks 3"));
        assert!(text.contains("pinforge_cached_blocks 1"));
        assert!(text.contains("pinforge_cache_hits_total 7"));
        assert!(text.contains("pinforge_cache_misses_total 2"));
    }

    #[test]
    fn test_counters_do_not_go_backwards() {
        let metrics = HostAllocatorMetrics::new();
        metrics.observe(&HostAllocatorStats {
            cache_hits: 10,
            ..Default::default()
        });
        metrics.observe(&HostAllocatorStats {
            cache_hits: 4,
            ..Default::default()
        });
        assert_eq!(metrics.cache_hits.get(), 10);

        metrics.observe(&HostAllocatorStats {
            cache_hits: 12,
            ..Default::default()
        });
        assert_eq!(metrics.cache_hits.get(), 12);
    }
}
