//! Caching allocator for page-locked host memory
//!
//! Blocks move through three tracked states:
//!
//! ```text
//!   allocate (miss) ──► Allocated ──release──► FreePending ──events done──► FreeAvailable
//!                           ▲            └─────────release (no events)──────────┘  │  │
//!                           └──────────────────allocate (hit)──────────────────────┘  │
//!                                                                        drain ──► freed
//! ```

mod allocator;
mod block;
mod buffer;
mod config;
mod ptr;
mod stats;

pub use allocator::CachingHostAllocator;
pub use block::BlockState;
pub use buffer::PinnedBuffer;
pub use config::HostAllocatorConfig;
pub use ptr::HostPtr;
pub use stats::HostAllocatorStats;
