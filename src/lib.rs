//! pinforge - caching allocator for page-locked host memory
//!
//! Staging buffers for host/device transfers must be pinned, and pinning is
//! a driver call plus page locking. [`CachingHostAllocator`] keeps released
//! buffers and hands them out again, holding back any buffer that in-flight
//! device work still references until the completion events attached to it
//! report done.
//!
//! The device runtime sits behind [`backend::HostDevice`]. Enable the
//! `rocm` feature for the HIP implementation; [`backend::SimHostDevice`]
//! covers CPU-only hosts and tests.

pub mod backend;
pub mod error;
pub mod host_alloc;
pub mod logging;
pub mod metrics;

pub use backend::{CompletionEvent, HostDevice, PointerKind};
pub use error::{ErrorCategory, HostAllocError, HostResult};
pub use host_alloc::{
    BlockState, CachingHostAllocator, HostAllocatorConfig, HostAllocatorStats, HostPtr,
    PinnedBuffer,
};
pub use metrics::HostAllocatorMetrics;
