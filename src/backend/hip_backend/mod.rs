//! ROCm/HIP implementation of the host device collaborator

pub mod ffi;

mod event;
mod host_device;
mod stream;

pub use event::HipEvent;
pub use host_device::HipHostDevice;
pub use stream::HipStream;
