//! HIP event wrapper used as a completion handle for pinned host blocks

use std::ptr;

use super::ffi;
use super::stream::HipStream;
use crate::backend::{CompletionEvent, DeviceError, DeviceResult};

// SAFETY: HipEvent only holds the runtime handle; hipEventQuery and
// hipEventRecord are thread-safe.
// NOTE: HipEvent does NOT implement Clone, a clone would double-destroy the
// handle. Share it through Arc<HipEvent> instead.
unsafe impl Send for HipEvent {}
unsafe impl Sync for HipEvent {}

/// HIP event wrapper
///
/// Record it on the stream that reads or writes a pinned block, then hand
/// an `Arc<HipEvent>` to `CachingHostAllocator::record_completion`.
#[derive(Debug)]
pub struct HipEvent {
    event: *mut std::ffi::c_void,
}

impl HipEvent {
    /// Create a synchronization-only event (timing disabled)
    pub fn new() -> DeviceResult<Self> {
        let mut event: *mut std::ffi::c_void = ptr::null_mut();

        let result =
            unsafe { ffi::hipEventCreateWithFlags(&mut event, ffi::HIP_EVENT_DISABLE_TIMING) };
        tracing::debug!(
            "HipEvent::new: hipEventCreateWithFlags returned result={}, event={:?}",
            result,
            event
        );

        if result != ffi::HIP_SUCCESS {
            return Err(DeviceError::DeviceError(format!(
                "Failed to create HIP event: {}",
                ffi::error_string(result)
            )));
        }

        if event.is_null() {
            return Err(DeviceError::DeviceError(
                "hipEventCreateWithFlags returned null pointer".to_string(),
            ));
        }

        Ok(HipEvent { event })
    }

    /// Capture all work queued on `stream` so far
    pub fn record(&self, stream: &HipStream) -> DeviceResult<()> {
        let result = unsafe { ffi::hipEventRecord(self.event, stream.as_ptr()) };

        if result != ffi::HIP_SUCCESS {
            Err(DeviceError::DeviceError(format!(
                "Event record failed: {}",
                ffi::error_string(result)
            )))
        } else {
            tracing::trace!("HipEvent::record: event recorded");
            Ok(())
        }
    }

    /// Non-blocking status poll
    ///
    /// `Ok(true)` once the captured work has finished, `Ok(false)` while it
    /// is still running.
    pub fn query(&self) -> DeviceResult<bool> {
        let result = unsafe { ffi::hipEventQuery(self.event) };
        match result {
            ffi::HIP_SUCCESS => Ok(true),
            ffi::HIP_ERROR_NOT_READY => Ok(false),
            code => Err(DeviceError::EventQueryFailed(format!(
                "hipEventQuery failed: {}",
                ffi::error_string(code)
            ))),
        }
    }

    /// Block the host until the captured work has finished
    pub fn synchronize(&self) -> DeviceResult<()> {
        let result = unsafe { ffi::hipEventSynchronize(self.event) };

        if result != ffi::HIP_SUCCESS {
            Err(DeviceError::DeviceError(format!(
                "Event synchronization failed: {}",
                ffi::error_string(result)
            )))
        } else {
            Ok(())
        }
    }

    /// Get raw event pointer (for FFI calls)
    pub fn as_ptr(&self) -> *mut std::ffi::c_void {
        self.event
    }
}

impl CompletionEvent for HipEvent {
    fn is_complete(&self) -> bool {
        match self.query() {
            Ok(done) => done,
            Err(e) => {
                // Unknown status counts as in flight
                tracing::warn!("HipEvent: {}; keeping block pending", e);
                false
            }
        }
    }
}

impl Drop for HipEvent {
    fn drop(&mut self) {
        if !self.event.is_null() {
            tracing::trace!("HipEvent::drop: destroying HIP event");
            unsafe {
                ffi::hipEventDestroy(self.event);
            }
        }
    }
}
