//! Caching allocator for pinned host memory
//!
//! Pinning is a driver call plus page locking, so freed buffers are kept
//! and handed out again for requests of equal or smaller size. A block
//! that device work still references cannot be reused: callers attach the
//! completion events of that work, and a block only re-enters the pool
//! once every event on it has been observed complete.
//!
//! # Locking
//!
//! One mutex guards the registry, the available index and every event
//! queue. All public operations are mutually exclusive. Nothing under the
//! lock waits on the device; event status is polled, never awaited.
//!
//! # Cost
//!
//! Every `allocate` and `release` sweeps all tracked blocks, so they are
//! O(tracked blocks). Reclamation is lazy: a block whose last event
//! finished between sweeps shows up as a cache miss until the next call.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::block::{Block, BlockState};
use super::buffer::PinnedBuffer;
use super::config::HostAllocatorConfig;
use super::stats::{Counters, HostAllocatorStats};
use super::HostPtr;
use crate::backend::{CompletionEvent, HostDevice, PointerKind};
use crate::error::{HostAllocError, HostResult};

/// Registry, available index and counters, all under one lock
#[derive(Debug)]
struct PoolState<E> {
    /// address -> block
    blocks: HashMap<usize, Block<E>>,
    /// (size, address) of every free, event-free block
    available: BTreeSet<(usize, usize)>,
    counters: Counters,
}

impl<E: CompletionEvent> PoolState<E> {
    fn new() -> Self {
        Self {
            blocks: HashMap::new(),
            available: BTreeSet::new(),
            counters: Counters::default(),
        }
    }

    /// Retire completed events on every block and index the blocks that
    /// became reusable
    fn process_events(&mut self) {
        for block in self.blocks.values_mut() {
            block.process_events();
            if block.is_reusable() {
                self.available.insert(block.key());
            }
        }
    }

    /// Smallest available block with `size` or more bytes
    fn take_best_fit(&mut self, size: usize) -> Option<(HostPtr, usize)> {
        let key = *self.available.range((size, 0)..).next()?;
        self.available.remove(&key);

        let block = match self.blocks.get_mut(&key.1) {
            Some(block) => block,
            None => panic!("available index references untracked block {:#x}", key.1),
        };
        assert!(
            block.is_reusable(),
            "available index references busy block {:?}",
            block.ptr()
        );

        block.set_allocated(true);
        Some((block.ptr(), block.size()))
    }

    fn snapshot(&self) -> HostAllocatorStats {
        let mut stats = HostAllocatorStats::default();
        for block in self.blocks.values() {
            stats.tracked_blocks += 1;
            stats.tracked_bytes += block.size();
            match block.state() {
                BlockState::Allocated => {
                    stats.allocated_blocks += 1;
                    stats.allocated_bytes += block.size();
                }
                BlockState::FreePending => stats.pending_blocks += 1,
                BlockState::FreeAvailable => {}
            }
        }
        for &(size, _) in &self.available {
            stats.cached_blocks += 1;
            stats.cached_bytes += size;
        }
        stats.apply_counters(&self.counters);
        stats
    }
}

/// Caching allocator for page-locked host memory
///
/// Construct one per process or session and share it by reference (or
/// `Arc`) with every component that stages transfers. Dropping it drains
/// the cache back to the device; blocks still held by callers at that
/// point are not reclaimed.
///
/// # Example
///
/// ```rust
/// use pinforge::backend::{SimEvent, SimHostDevice};
/// use pinforge::CachingHostAllocator;
///
/// let allocator = CachingHostAllocator::new(SimHostDevice::new());
///
/// let a = allocator.allocate(1024)?;
/// let transfer = SimEvent::new();
/// allocator.record_completion(a, transfer.clone());
/// allocator.release(a);
///
/// // Still referenced by the transfer: a fresh block is handed out
/// let b = allocator.allocate(1024)?;
/// assert_ne!(a, b);
///
/// transfer.complete();
/// allocator.release(b);
/// assert_eq!(allocator.stats().cached_blocks, 2);
/// # Ok::<(), pinforge::HostAllocError>(())
/// ```
pub struct CachingHostAllocator<D: HostDevice> {
    device: D,
    config: HostAllocatorConfig,
    state: Mutex<PoolState<D::Event>>,
}

impl<D: HostDevice> CachingHostAllocator<D> {
    /// Create an allocator with the default configuration
    pub fn new(device: D) -> Self {
        Self {
            device,
            config: HostAllocatorConfig::default(),
            state: Mutex::new(PoolState::new()),
        }
    }

    /// Create an allocator with a custom configuration
    pub fn with_config(device: D, config: HostAllocatorConfig) -> HostResult<Self> {
        config.validate()?;
        tracing::debug!(
            "CachingHostAllocator: alignment={} drain_before_retry={}",
            config.alignment,
            config.drain_before_retry
        );
        Ok(Self {
            device,
            config,
            state: Mutex::new(PoolState::new()),
        })
    }

    /// Device collaborator
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Active configuration
    pub fn config(&self) -> &HostAllocatorConfig {
        &self.config
    }

    /// Get a pinned buffer of at least `size` bytes
    ///
    /// A zero-byte request returns the null address. The returned block may
    /// be larger than requested; see [`block_size`](Self::block_size).
    ///
    /// # Errors
    ///
    /// [`HostAllocError::OutOfMemory`] when the device refuses the fresh
    /// allocation twice.
    pub fn allocate(&self, size: usize) -> HostResult<HostPtr> {
        self.allocate_block(size).map(|(ptr, _)| ptr)
    }

    /// Like [`allocate`](Self::allocate), but the buffer goes back to the
    /// pool when the guard drops
    pub fn allocate_buffer(&self, size: usize) -> HostResult<PinnedBuffer<'_, D>> {
        let (ptr, capacity) = self.allocate_block(size)?;
        Ok(PinnedBuffer::new(self, ptr, size, capacity))
    }

    fn allocate_block(&self, size: usize) -> HostResult<(HostPtr, usize)> {
        let mut state = self.lock_state();
        state.process_events();

        if size == 0 {
            return Ok((HostPtr::null(), 0));
        }

        if let Some((ptr, capacity)) = state.take_best_fit(size) {
            state.counters.cache_hits += 1;
            tracing::trace!(
                "CachingHostAllocator: cache hit for {} bytes -> {:?} ({} bytes)",
                size,
                ptr,
                capacity
            );
            return Ok((ptr, capacity));
        }

        state.counters.cache_misses += 1;
        let ptr = self.alloc_fresh(&mut state, size)?;

        let previous = state.blocks.insert(ptr.addr(), Block::new(ptr, size));
        assert!(
            previous.is_none(),
            "device returned address {:?} that is already tracked",
            ptr
        );
        state.counters.fresh_allocations += 1;

        tracing::debug!(
            "CachingHostAllocator: pinned {} bytes at {:?} ({} blocks tracked)",
            size,
            ptr,
            state.blocks.len()
        );
        Ok((ptr, size))
    }

    /// Fresh pinned allocation with exactly one retry
    fn alloc_fresh(&self, state: &mut PoolState<D::Event>, size: usize) -> HostResult<HostPtr> {
        let alignment = self.config.alignment;

        let first = match self.device.alloc_pinned(size, alignment) {
            Ok(ptr) => return Ok(ptr),
            Err(e) => e,
        };

        tracing::warn!(
            "CachingHostAllocator: pinned allocation of {} bytes failed ({}), retrying",
            size,
            first
        );
        state.counters.retries += 1;
        if self.config.drain_before_retry {
            self.drain_locked(state);
        }

        match self.device.alloc_pinned(size, alignment) {
            Ok(ptr) => Ok(ptr),
            Err(source) => {
                state.counters.allocation_failures += 1;
                tracing::error!(
                    "CachingHostAllocator: pinned allocation of {} bytes failed twice: {}",
                    size,
                    source
                );
                Err(HostAllocError::OutOfMemory {
                    size,
                    attempts: 2,
                    source,
                })
            }
        }
    }

    /// Give a buffer back to the pool
    ///
    /// The block becomes reusable right away if no recorded events are
    /// outstanding, otherwise on a later sweep. Null is ignored.
    ///
    /// # Panics
    ///
    /// If `ptr` was not returned by this allocator or is already released.
    pub fn release(&self, ptr: HostPtr) {
        if ptr.is_null() {
            return;
        }

        let mut state = self.lock_state();

        let block = match state.blocks.get_mut(&ptr.addr()) {
            Some(block) => block,
            None => panic!("release of {:?}, which this allocator does not track", ptr),
        };
        assert!(block.is_allocated(), "double release of {:?}", ptr);

        block.set_allocated(false);
        tracing::trace!(
            "CachingHostAllocator: released {:?} with {} pending events",
            ptr,
            block.pending_events()
        );

        state.process_events();
    }

    /// Attach the completion event of device work that touches `ptr`
    ///
    /// The block will not be reused until the event reports complete.
    /// Untracked addresses (including ones a drain already freed) are
    /// ignored.
    pub fn record_completion(&self, ptr: HostPtr, event: D::Event) {
        let mut state = self.lock_state();
        let PoolState {
            blocks, available, ..
        } = &mut *state;

        let block = match blocks.get_mut(&ptr.addr()) {
            Some(block) => block,
            None => {
                tracing::trace!(
                    "CachingHostAllocator: ignoring event for untracked {:?}",
                    ptr
                );
                return;
            }
        };

        // A cached block picking up an event leaves the available index
        if block.is_reusable() {
            available.remove(&block.key());
        }
        block.push_event(event);
    }

    /// Retire completed events and index newly reusable blocks
    pub fn process_events(&self) {
        self.lock_state().process_events();
    }

    /// Return every cached block to the device
    ///
    /// Blocks held by callers or still waiting on events stay tracked.
    pub fn drain(&self) {
        let mut state = self.lock_state();
        self.drain_locked(&mut state);
    }

    fn drain_locked(&self, state: &mut PoolState<D::Event>) {
        state.process_events();

        let available = std::mem::take(&mut state.available);
        let mut freed_bytes = 0;
        for &(size, addr) in &available {
            let block = match state.blocks.remove(&addr) {
                Some(block) => block,
                None => panic!("available index references untracked block {:#x}", addr),
            };
            assert!(block.is_reusable(), "draining busy block {:?}", block.ptr());

            // SAFETY: the block came from alloc_pinned, is free, has no
            // outstanding device work, and is no longer reachable from the pool
            unsafe { self.device.free_pinned(block.ptr()) };
            freed_bytes += size;
        }

        state.counters.drains += 1;
        state.counters.blocks_freed += available.len() as u64;

        if !available.is_empty() {
            tracing::debug!(
                "CachingHostAllocator: drained {} blocks ({} bytes), {} still tracked",
                available.len(),
                freed_bytes,
                state.blocks.len()
            );
        }
    }

    /// Whether the device classifies `ptr` as pinned host memory
    ///
    /// Does not consult the pool.
    pub fn is_pinned(&self, ptr: HostPtr) -> bool {
        !ptr.is_null() && self.device.pointer_kind(ptr) == PointerKind::PinnedHost
    }

    /// Lifecycle state of the block at `ptr`; `None` if untracked
    pub fn block_state(&self, ptr: HostPtr) -> Option<BlockState> {
        self.lock_state().blocks.get(&ptr.addr()).map(Block::state)
    }

    /// Capacity of the block at `ptr`; `None` if untracked
    pub fn block_size(&self, ptr: HostPtr) -> Option<usize> {
        self.lock_state().blocks.get(&ptr.addr()).map(Block::size)
    }

    /// Snapshot of pool occupancy and counters
    pub fn stats(&self) -> HostAllocatorStats {
        self.lock_state().snapshot()
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState<D::Event>> {
        // Only contract assertions panic while the lock is held
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::error!("CachingHostAllocator: recovering poisoned pool lock");
            poisoned.into_inner()
        })
    }
}

impl<D: HostDevice> Drop for CachingHostAllocator<D> {
    fn drop(&mut self) {
        self.drain();
        let stats = self.stats();
        if stats.tracked_blocks > 0 {
            tracing::debug!(
                "CachingHostAllocator: {} blocks ({} bytes) still tracked at teardown",
                stats.tracked_blocks,
                stats.tracked_bytes
            );
        }
    }
}

impl<D: HostDevice + std::fmt::Debug> std::fmt::Debug for CachingHostAllocator<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingHostAllocator")
            .field("device", &self.device)
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
