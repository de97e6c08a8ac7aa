//! Device collaborator seam for the host allocator
//!
//! The allocator never talks to a driver directly. Everything it needs from
//! the device runtime goes through [`HostDevice`]:
//! - aligned pinned allocation and free
//! - pointer classification
//! - non-blocking completion polling for the events callers attach
//!
//! Two implementations ship with the crate: [`SimHostDevice`] (always
//! available, used by tests and CPU-only hosts) and `HipHostDevice`
//! (feature `rocm`).

pub mod error;
#[cfg(feature = "rocm")]
pub mod hip_backend;
pub mod sim;

use std::sync::Arc;

use crate::host_alloc::HostPtr;

pub use error::{DeviceError, DeviceResult};
#[cfg(feature = "rocm")]
pub use hip_backend::*;
pub use sim::{SimEvent, SimHostDevice};

/// Memory classification reported by the device runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerKind {
    /// Page-locked host memory registered with the device
    PinnedHost,
    /// Device-resident memory
    Device,
    /// Managed (unified) memory
    Managed,
    /// Ordinary pageable host memory the runtime does not know about
    Pageable,
    /// The runtime could not classify the pointer
    Unknown,
}

/// Completion handle for an in-flight device operation
///
/// `is_complete` must never block. Within a single block's queue the
/// allocator assumes handles complete in submission order.
pub trait CompletionEvent: Send {
    /// Poll whether the operation behind this handle has finished
    fn is_complete(&self) -> bool;
}

impl<E: CompletionEvent + Sync> CompletionEvent for Arc<E> {
    fn is_complete(&self) -> bool {
        (**self).is_complete()
    }
}

/// Device runtime operations consumed by the caching host allocator
pub trait HostDevice: Send + Sync {
    /// Completion handle type callers attach via `record_completion`
    type Event: CompletionEvent;

    /// Allocate `size` bytes of pinned host memory aligned to `alignment`
    ///
    /// Returns a non-null pointer on success.
    fn alloc_pinned(&self, size: usize, alignment: usize) -> DeviceResult<HostPtr>;

    /// Return pinned memory to the runtime
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `alloc_pinned` on this device and
    /// must not be used after this call.
    unsafe fn free_pinned(&self, ptr: HostPtr);

    /// Classify a pointer
    fn pointer_kind(&self, ptr: HostPtr) -> PointerKind;
}

impl<D: HostDevice> HostDevice for Arc<D> {
    type Event = D::Event;

    fn alloc_pinned(&self, size: usize, alignment: usize) -> DeviceResult<HostPtr> {
        (**self).alloc_pinned(size, alignment)
    }

    unsafe fn free_pinned(&self, ptr: HostPtr) {
        (**self).free_pinned(ptr)
    }

    fn pointer_kind(&self, ptr: HostPtr) -> PointerKind {
        (**self).pointer_kind(ptr)
    }
}
