//! HIP stream wrapper

use std::ptr;

use super::ffi;
use crate::backend::{DeviceError, DeviceResult};

// SAFETY: HipStream only holds the runtime handle; HIP streams may be used
// from any thread.
// NOTE: HipStream does NOT implement Clone, a clone would double-destroy the handle.
unsafe impl Send for HipStream {}
unsafe impl Sync for HipStream {}

/// HIP stream wrapper
#[derive(Debug)]
pub struct HipStream {
    stream: *mut std::ffi::c_void,
}

impl HipStream {
    /// Create a new HIP stream
    pub fn new() -> DeviceResult<Self> {
        let mut stream: *mut std::ffi::c_void = ptr::null_mut();

        let result = unsafe { ffi::hipStreamCreate(&mut stream) };
        tracing::debug!(
            "HipStream::new: hipStreamCreate returned result={}, stream={:?}",
            result,
            stream
        );

        if result != ffi::HIP_SUCCESS {
            return Err(DeviceError::DeviceError(format!(
                "Failed to create HIP stream: {}",
                ffi::error_string(result)
            )));
        }

        if stream.is_null() {
            return Err(DeviceError::DeviceError(
                "hipStreamCreate returned null pointer".to_string(),
            ));
        }

        Ok(HipStream { stream })
    }

    /// Block until all work queued on the stream has finished
    pub fn synchronize(&self) -> DeviceResult<()> {
        let result = unsafe { ffi::hipStreamSynchronize(self.stream) };
        if result != ffi::HIP_SUCCESS {
            Err(DeviceError::DeviceError(format!(
                "Stream synchronization failed: {}",
                ffi::error_string(result)
            )))
        } else {
            Ok(())
        }
    }

    /// Get raw stream pointer (for FFI calls)
    pub fn as_ptr(&self) -> *mut std::ffi::c_void {
        self.stream
    }
}

impl Drop for HipStream {
    fn drop(&mut self) {
        if !self.stream.is_null() {
            unsafe {
                ffi::hipStreamDestroy(self.stream);
            }
        }
    }
}
