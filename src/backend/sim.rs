//! In-process host device
//!
//! Stands in for the HIP runtime on machines without a GPU. Memory comes
//! from the global heap with the requested alignment; nothing is actually
//! page-locked. The device remembers every live allocation so pointer
//! classification and leak checks behave like the real runtime.
//!
//! Freed memory is held in a bounded quarantine before it goes back to the
//! heap, so a recently freed address is not handed out again by the next
//! allocation.

use std::alloc::{self, Layout};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::{CompletionEvent, DeviceError, DeviceResult, HostDevice, PointerKind};
use crate::host_alloc::HostPtr;

/// Completion handle driven by the test or the caller
///
/// Clones share the same status.
#[derive(Debug, Clone, Default)]
pub struct SimEvent {
    done: Arc<AtomicBool>,
}

impl SimEvent {
    /// Create an event for an operation that is still in flight
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an event that has already completed
    pub fn completed() -> Self {
        let event = Self::new();
        event.complete();
        event
    }

    /// Mark the operation as finished
    pub fn complete(&self) {
        self.done.store(true, Ordering::Release);
    }
}

impl CompletionEvent for SimEvent {
    fn is_complete(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

/// Heap-backed stand-in for a pinned host memory runtime
#[derive(Debug)]
pub struct SimHostDevice {
    live: Mutex<HashMap<usize, Layout>>,
    live_bytes: AtomicUsize,
    /// Upper bound on live bytes; 0 means unbounded
    capacity: usize,
    /// Freed allocations not yet returned to the heap, oldest first
    quarantine: Mutex<VecDeque<(usize, Layout)>>,
    quarantine_limit: usize,
    fail_next: AtomicUsize,
    alloc_calls: AtomicUsize,
    free_calls: AtomicUsize,
}

impl Default for SimHostDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimHostDevice {
    /// Freed allocations held back from the heap by default
    pub const DEFAULT_QUARANTINE: usize = 16;

    /// Create an unbounded device
    pub fn new() -> Self {
        Self {
            live: Mutex::new(HashMap::new()),
            live_bytes: AtomicUsize::new(0),
            capacity: 0,
            quarantine: Mutex::new(VecDeque::new()),
            quarantine_limit: Self::DEFAULT_QUARANTINE,
            fail_next: AtomicUsize::new(0),
            alloc_calls: AtomicUsize::new(0),
            free_calls: AtomicUsize::new(0),
        }
    }

    /// Create a device that refuses allocations beyond `capacity` live bytes
    pub fn with_capacity(capacity: usize) -> Self {
        let mut device = Self::new();
        device.capacity = capacity;
        device
    }

    /// Hold the last `limit` freed allocations back from the heap
    ///
    /// Quarantined memory does not count toward the capacity. 0 returns
    /// memory to the heap on every free.
    pub fn with_quarantine(mut self, limit: usize) -> Self {
        self.quarantine_limit = limit;
        self
    }

    /// Number of freed allocations currently held in quarantine
    pub fn quarantined(&self) -> usize {
        self.quarantine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Make the next `n` allocation attempts fail
    pub fn fail_next_allocs(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Number of `alloc_pinned` calls, including failed ones
    pub fn alloc_calls(&self) -> usize {
        self.alloc_calls.load(Ordering::SeqCst)
    }

    /// Number of `free_pinned` calls
    pub fn free_calls(&self) -> usize {
        self.free_calls.load(Ordering::SeqCst)
    }

    /// Number of allocations not yet freed
    pub fn live_allocations(&self) -> usize {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Bytes held by allocations not yet freed
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::SeqCst)
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn quarantine_or_dealloc(&self, addr: usize, layout: Layout) {
        if self.quarantine_limit == 0 {
            // SAFETY: addr was produced by alloc::alloc with this layout
            unsafe { alloc::dealloc(addr as *mut u8, layout) };
            return;
        }

        let mut quarantine = self.quarantine.lock().unwrap_or_else(PoisonError::into_inner);
        quarantine.push_back((addr, layout));
        while quarantine.len() > self.quarantine_limit {
            if let Some((old, old_layout)) = quarantine.pop_front() {
                // SAFETY: quarantined entries are unreachable allocations
                // produced by alloc::alloc with their recorded layout
                unsafe { alloc::dealloc(old as *mut u8, old_layout) };
            }
        }
    }
}

impl HostDevice for SimHostDevice {
    type Event = SimEvent;

    fn alloc_pinned(&self, size: usize, alignment: usize) -> DeviceResult<HostPtr> {
        self.alloc_calls.fetch_add(1, Ordering::SeqCst);

        if self.take_injected_failure() {
            return Err(DeviceError::AllocationFailed(format!(
                "injected failure for {} bytes",
                size
            )));
        }

        if self.capacity > 0 && self.live_bytes().saturating_add(size) > self.capacity {
            return Err(DeviceError::AllocationFailed(format!(
                "{} bytes requested, {} of {} bytes in use",
                size,
                self.live_bytes(),
                self.capacity
            )));
        }

        let layout = Layout::from_size_align(size.max(1), alignment).map_err(|e| {
            DeviceError::AllocationFailed(format!(
                "invalid layout size={} alignment={}: {}",
                size, alignment, e
            ))
        })?;

        // SAFETY: layout has non-zero size
        let raw = unsafe { alloc::alloc(layout) };
        if raw.is_null() {
            return Err(DeviceError::AllocationFailed(format!(
                "heap returned null for {} bytes",
                size
            )));
        }

        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(raw as usize, layout);
        self.live_bytes.fetch_add(layout.size(), Ordering::SeqCst);

        tracing::trace!("SimHostDevice: allocated {} bytes at {:p}", size, raw);
        Ok(HostPtr::from_raw(raw))
    }

    unsafe fn free_pinned(&self, ptr: HostPtr) {
        self.free_calls.fetch_add(1, Ordering::SeqCst);

        let layout = self
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&ptr.addr());

        match layout {
            Some(layout) => {
                self.live_bytes.fetch_sub(layout.size(), Ordering::SeqCst);
                self.quarantine_or_dealloc(ptr.addr(), layout);
                tracing::trace!("SimHostDevice: freed {:?}", ptr);
            }
            None => {
                tracing::error!("SimHostDevice: free of unknown pointer {:?}", ptr);
            }
        }
    }

    fn pointer_kind(&self, ptr: HostPtr) -> PointerKind {
        let live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        if live.contains_key(&ptr.addr()) {
            PointerKind::PinnedHost
        } else {
            PointerKind::Pageable
        }
    }
}

impl Drop for SimHostDevice {
    fn drop(&mut self) {
        let live = self.live.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !live.is_empty() {
            tracing::debug!(
                "SimHostDevice: releasing {} allocations still live at teardown",
                live.len()
            );
        }
        for (addr, layout) in live.drain() {
            // SAFETY: every entry was produced by alloc::alloc with this layout
            unsafe { alloc::dealloc(addr as *mut u8, layout) };
        }

        let quarantine = self
            .quarantine
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for (addr, layout) in quarantine.drain(..) {
            // SAFETY: as above
            unsafe { alloc::dealloc(addr as *mut u8, layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_respects_alignment() {
        let device = SimHostDevice::new();
        let ptr = device.alloc_pinned(100, 512).unwrap();
        assert!(!ptr.is_null());
        assert!(ptr.is_aligned_to(512));
        assert_eq!(device.live_allocations(), 1);
        unsafe { device.free_pinned(ptr) };
        assert_eq!(device.live_allocations(), 0);
        assert_eq!(device.live_bytes(), 0);
    }

    #[test]
    fn test_pointer_kind_tracks_live_allocations() {
        let device = SimHostDevice::new();
        let ptr = device.alloc_pinned(64, 512).unwrap();
        assert_eq!(device.pointer_kind(ptr), PointerKind::PinnedHost);

        let local = 0u8;
        let stack = HostPtr::from_raw(&local as *const u8 as *mut u8);
        assert_eq!(device.pointer_kind(stack), PointerKind::Pageable);

        unsafe { device.free_pinned(ptr) };
        assert_eq!(device.pointer_kind(ptr), PointerKind::Pageable);
    }

    #[test]
    fn test_injected_failures_are_consumed() {
        let device = SimHostDevice::new();
        device.fail_next_allocs(2);
        assert!(device.alloc_pinned(16, 512).is_err());
        assert!(device.alloc_pinned(16, 512).is_err());
        let ptr = device.alloc_pinned(16, 512).unwrap();
        assert_eq!(device.alloc_calls(), 3);
        unsafe { device.free_pinned(ptr) };
    }

    #[test]
    fn test_capacity_limit() {
        let device = SimHostDevice::with_capacity(1024);
        let a = device.alloc_pinned(1024, 512).unwrap();
        let err = device.alloc_pinned(1, 512).unwrap_err();
        assert!(matches!(err, DeviceError::AllocationFailed(_)));
        unsafe { device.free_pinned(a) };
        let b = device.alloc_pinned(512, 512).unwrap();
        unsafe { device.free_pinned(b) };
    }

    #[test]
    fn test_freed_addresses_are_not_reissued_while_quarantined() {
        let device = SimHostDevice::new();
        let first = device.alloc_pinned(1024, 512).unwrap();
        unsafe { device.free_pinned(first) };
        assert_eq!(device.quarantined(), 1);
        assert_eq!(device.pointer_kind(first), PointerKind::Pageable);

        let second = device.alloc_pinned(1024, 512).unwrap();
        assert_ne!(second, first);
        unsafe { device.free_pinned(second) };
    }

    #[test]
    fn test_quarantine_is_bounded() {
        let device = SimHostDevice::new().with_quarantine(2);
        for _ in 0..5 {
            let ptr = device.alloc_pinned(64, 512).unwrap();
            unsafe { device.free_pinned(ptr) };
        }
        assert_eq!(device.quarantined(), 2);
        assert_eq!(device.live_bytes(), 0);

        let disabled = SimHostDevice::new().with_quarantine(0);
        let ptr = disabled.alloc_pinned(64, 512).unwrap();
        unsafe { disabled.free_pinned(ptr) };
        assert_eq!(disabled.quarantined(), 0);
    }

    #[test]
    fn test_event_clones_share_status() {
        let event = SimEvent::new();
        let clone = event.clone();
        assert!(!clone.is_complete());
        event.complete();
        assert!(clone.is_complete());
        assert!(SimEvent::completed().is_complete());
    }
}
