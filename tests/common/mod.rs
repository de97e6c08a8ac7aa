//! Shared fixtures for allocator integration tests
//!
//! Every fixture owns its device through an `Arc` so tests can inspect
//! device-side counters (live allocations, alloc/free calls) after the
//! allocator has been dropped.

#![allow(dead_code)]

use std::sync::Arc;

use pinforge::backend::SimHostDevice;
use pinforge::{CachingHostAllocator, HostAllocatorConfig};

/// Allocator plus a handle on its device
pub struct AllocatorFixture {
    pub device: Arc<SimHostDevice>,
    pub allocator: CachingHostAllocator<Arc<SimHostDevice>>,
}

impl AllocatorFixture {
    /// Unbounded device, default configuration
    pub fn new() -> Self {
        Self::with_device(SimHostDevice::new(), HostAllocatorConfig::default())
    }

    /// Device that refuses allocations beyond `capacity` live bytes
    pub fn with_capacity(capacity: usize, config: HostAllocatorConfig) -> Self {
        Self::with_device(SimHostDevice::with_capacity(capacity), config)
    }

    fn with_device(device: SimHostDevice, config: HostAllocatorConfig) -> Self {
        let device = Arc::new(device);
        let allocator = CachingHostAllocator::with_config(Arc::clone(&device), config)
            .expect("default-derived config is valid");
        Self { device, allocator }
    }

    /// Number of fresh allocations the device has been asked for
    pub fn device_allocs(&self) -> usize {
        self.device.alloc_calls()
    }

    /// Assert that nothing the allocator pinned is still live on the device
    pub fn assert_no_leak(&self) {
        assert_eq!(
            self.device.live_allocations(),
            0,
            "device still holds {} allocations ({} bytes)",
            self.device.live_allocations(),
            self.device.live_bytes()
        );
    }
}
