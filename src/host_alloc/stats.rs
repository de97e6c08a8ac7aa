//! Allocator statistics

use serde::Serialize;

/// Cumulative event counters, updated under the pool lock
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Counters {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub fresh_allocations: u64,
    pub retries: u64,
    pub allocation_failures: u64,
    pub drains: u64,
    pub blocks_freed: u64,
}

/// Point-in-time view of the pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HostAllocatorStats {
    /// Blocks currently tracked in the registry
    pub tracked_blocks: usize,
    /// Blocks held by callers
    pub allocated_blocks: usize,
    /// Released blocks still waiting on device events
    pub pending_blocks: usize,
    /// Blocks in the available index
    pub cached_blocks: usize,

    /// Bytes across all tracked blocks
    pub tracked_bytes: usize,
    /// Bytes held by callers
    pub allocated_bytes: usize,
    /// Bytes ready for reuse
    pub cached_bytes: usize,

    /// Requests served from the available index
    pub cache_hits: u64,
    /// Requests that went to the device
    pub cache_misses: u64,
    /// Successful fresh pinned allocations
    pub fresh_allocations: u64,
    /// Second attempts after a failed fresh allocation
    pub retries: u64,
    /// Requests that failed on both attempts
    pub allocation_failures: u64,
    /// Drain passes, including the ones run before a retry
    pub drains: u64,
    /// Blocks returned to the device
    pub blocks_freed: u64,
}

impl HostAllocatorStats {
    /// Fraction of non-empty requests served from cache
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    pub(crate) fn apply_counters(&mut self, counters: &Counters) {
        self.cache_hits = counters.cache_hits;
        self.cache_misses = counters.cache_misses;
        self.fresh_allocations = counters.fresh_allocations;
        self.retries = counters.retries;
        self.allocation_failures = counters.allocation_failures;
        self.drains = counters.drains;
        self.blocks_freed = counters.blocks_freed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let mut stats = HostAllocatorStats::default();
        assert_eq!(stats.hit_rate(), 0.0);

        stats.cache_hits = 3;
        stats.cache_misses = 1;
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_serializes_to_json() {
        let stats = HostAllocatorStats {
            tracked_blocks: 2,
            cache_hits: 5,
            ..Default::default()
        };
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["tracked_blocks"], 2);
        assert_eq!(json["cache_hits"], 5);
    }
}
