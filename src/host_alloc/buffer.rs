//! RAII guard over a cached pinned block

use std::fmt;
use std::ptr;

use super::{CachingHostAllocator, HostPtr};
use crate::backend::HostDevice;
use crate::error::{HostAllocError, HostResult};

/// Pinned host buffer that returns to its allocator on drop
///
/// `len` is the size that was requested; `capacity` is the size of the
/// block behind it and may be larger. Staging copies are bounded by `len`.
pub struct PinnedBuffer<'a, D: HostDevice> {
    allocator: &'a CachingHostAllocator<D>,
    ptr: HostPtr,
    len: usize,
    capacity: usize,
    /// Bytes written through `copy_from_slice`; reads stay below this mark
    initialized: usize,
}

impl<'a, D: HostDevice> PinnedBuffer<'a, D> {
    pub(crate) fn new(
        allocator: &'a CachingHostAllocator<D>,
        ptr: HostPtr,
        len: usize,
        capacity: usize,
    ) -> Self {
        Self {
            allocator,
            ptr,
            len,
            capacity,
            initialized: 0,
        }
    }

    /// Address of the block (null for an empty buffer)
    pub fn host_ptr(&self) -> HostPtr {
        self.ptr
    }

    /// Raw pointer for device copy calls
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Requested size in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of the underlying block in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy `src` to the start of the buffer
    pub fn copy_from_slice(&mut self, src: &[u8]) -> HostResult<()> {
        if src.len() > self.len {
            return Err(HostAllocError::CopyOutOfBounds {
                requested: src.len(),
                available: self.len,
            });
        }
        if src.is_empty() {
            return Ok(());
        }

        // SAFETY: the block is held by this guard and holds at least `len` bytes
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.as_ptr(), src.len()) };
        self.initialized = self.initialized.max(src.len());
        Ok(())
    }

    /// Copy the start of the buffer into `dst`
    ///
    /// Only bytes previously written with `copy_from_slice` can be read.
    pub fn copy_to_slice(&self, dst: &mut [u8]) -> HostResult<()> {
        if dst.len() > self.initialized {
            return Err(HostAllocError::CopyOutOfBounds {
                requested: dst.len(),
                available: self.initialized,
            });
        }
        if dst.is_empty() {
            return Ok(());
        }

        // SAFETY: the first `initialized` bytes were written by copy_from_slice
        unsafe { ptr::copy_nonoverlapping(self.ptr.as_ptr(), dst.as_mut_ptr(), dst.len()) };
        Ok(())
    }

    /// Attach the completion event of device work that uses this buffer
    pub fn record_event(&self, event: D::Event) {
        self.allocator.record_completion(self.ptr, event);
    }

    /// Give up the guard without releasing; the caller must pass the
    /// address to `release` later
    pub fn into_raw(self) -> HostPtr {
        let ptr = self.ptr;
        std::mem::forget(self);
        ptr
    }
}

impl<D: HostDevice> Drop for PinnedBuffer<'_, D> {
    fn drop(&mut self) {
        self.allocator.release(self.ptr);
    }
}

impl<D: HostDevice> fmt::Debug for PinnedBuffer<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinnedBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SimEvent, SimHostDevice};
    use crate::host_alloc::BlockState;

    #[test]
    fn test_drop_releases_block() {
        let alloc = CachingHostAllocator::new(SimHostDevice::new());
        let ptr = {
            let buf = alloc.allocate_buffer(256).unwrap();
            assert_eq!(buf.len(), 256);
            assert_eq!(buf.capacity(), 256);
            buf.host_ptr()
        };
        assert_eq!(alloc.block_state(ptr), Some(BlockState::FreeAvailable));
    }

    #[test]
    fn test_reused_buffer_reports_block_capacity() {
        let alloc = CachingHostAllocator::new(SimHostDevice::new());
        drop(alloc.allocate_buffer(4096).unwrap());
        let buf = alloc.allocate_buffer(100).unwrap();
        assert_eq!(buf.len(), 100);
        assert_eq!(buf.capacity(), 4096);
    }

    #[test]
    fn test_staging_copy_roundtrip() {
        let alloc = CachingHostAllocator::new(SimHostDevice::new());
        let mut buf = alloc.allocate_buffer(8).unwrap();
        buf.copy_from_slice(&[1, 2, 3, 4, 5]).unwrap();

        let mut out = [0u8; 5];
        buf.copy_to_slice(&mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_copy_bounds() {
        let alloc = CachingHostAllocator::new(SimHostDevice::new());
        let mut buf = alloc.allocate_buffer(4).unwrap();
        assert!(matches!(
            buf.copy_from_slice(&[0; 5]),
            Err(HostAllocError::CopyOutOfBounds {
                requested: 5,
                available: 4
            })
        ));

        // Nothing written yet, nothing readable
        let mut out = [0u8; 1];
        assert!(buf.copy_to_slice(&mut out).is_err());
    }

    #[test]
    fn test_record_event_defers_reuse_after_drop() {
        let alloc = CachingHostAllocator::new(SimHostDevice::new());
        let event = SimEvent::new();
        let ptr = {
            let buf = alloc.allocate_buffer(64).unwrap();
            buf.record_event(event.clone());
            buf.host_ptr()
        };
        assert_eq!(alloc.block_state(ptr), Some(BlockState::FreePending));
        event.complete();
        alloc.process_events();
        assert_eq!(alloc.block_state(ptr), Some(BlockState::FreeAvailable));
    }

    #[test]
    fn test_into_raw_keeps_block_allocated() {
        let alloc = CachingHostAllocator::new(SimHostDevice::new());
        let ptr = alloc.allocate_buffer(64).unwrap().into_raw();
        assert_eq!(alloc.block_state(ptr), Some(BlockState::Allocated));
        alloc.release(ptr);
    }

    #[test]
    fn test_empty_buffer() {
        let alloc = CachingHostAllocator::new(SimHostDevice::new());
        let buf = alloc.allocate_buffer(0).unwrap();
        assert!(buf.is_empty());
        assert!(buf.host_ptr().is_null());
    }
}
