//! Pinned host memory through the HIP runtime

use std::ptr;
use std::sync::Arc;

use super::event::HipEvent;
use super::ffi;
use crate::backend::{DeviceError, DeviceResult, HostDevice, PointerKind};
use crate::host_alloc::HostPtr;

/// HIP runtime bound to one device
///
/// `hipHostMalloc` has no alignment parameter; it returns page-aligned
/// memory, which covers any power-of-two alignment up to the page size.
/// Larger alignments are rejected as an allocation failure.
#[derive(Debug)]
pub struct HipHostDevice {
    device_id: i32,
}

impl HipHostDevice {
    /// Host page size guaranteed by hipHostMalloc
    pub const PAGE_ALIGNMENT: usize = 4096;

    /// Initialize the HIP runtime and select `device_id`
    pub fn new(device_id: i32) -> DeviceResult<Self> {
        let result = unsafe { ffi::hipInit(0) };
        if result != ffi::HIP_SUCCESS {
            return Err(DeviceError::InitializationFailed(format!(
                "hipInit failed: {}",
                ffi::error_string(result)
            )));
        }

        let mut count: i32 = 0;
        let result = unsafe { ffi::hipGetDeviceCount(&mut count) };
        if result != ffi::HIP_SUCCESS || count <= device_id {
            return Err(DeviceError::InitializationFailed(format!(
                "device {} not available ({} devices, status {})",
                device_id, count, result
            )));
        }

        let result = unsafe { ffi::hipSetDevice(device_id) };
        if result != ffi::HIP_SUCCESS {
            return Err(DeviceError::InitializationFailed(format!(
                "hipSetDevice({}) failed: {}",
                device_id,
                ffi::error_string(result)
            )));
        }

        tracing::info!("HipHostDevice: using device {}", device_id);
        Ok(Self { device_id })
    }

    /// Whether a HIP device can be opened on this machine
    pub fn gpu_available() -> bool {
        let mut count: i32 = 0;
        let init = unsafe { ffi::hipInit(0) };
        let result = unsafe { ffi::hipGetDeviceCount(&mut count) };
        init == ffi::HIP_SUCCESS && result == ffi::HIP_SUCCESS && count > 0
    }

    /// Selected device ordinal
    pub fn device_id(&self) -> i32 {
        self.device_id
    }
}

impl HostDevice for HipHostDevice {
    type Event = Arc<HipEvent>;

    fn alloc_pinned(&self, size: usize, alignment: usize) -> DeviceResult<HostPtr> {
        if alignment > Self::PAGE_ALIGNMENT {
            return Err(DeviceError::AllocationFailed(format!(
                "alignment {} exceeds page alignment {}",
                alignment,
                Self::PAGE_ALIGNMENT
            )));
        }

        let mut raw: *mut std::ffi::c_void = ptr::null_mut();
        let result = unsafe { ffi::hipHostMalloc(&mut raw, size, ffi::HIP_HOST_MALLOC_DEFAULT) };

        if result != ffi::HIP_SUCCESS {
            return Err(DeviceError::AllocationFailed(format!(
                "hipHostMalloc failed for {} bytes: {}",
                size,
                ffi::error_string(result)
            )));
        }

        if raw.is_null() {
            return Err(DeviceError::AllocationFailed(format!(
                "hipHostMalloc returned null pointer for {} bytes",
                size
            )));
        }

        let ptr = HostPtr::from_raw(raw.cast());
        if !ptr.is_aligned_to(alignment) {
            unsafe { ffi::hipHostFree(raw) };
            return Err(DeviceError::AllocationFailed(format!(
                "hipHostMalloc returned {:?}, not aligned to {}",
                ptr, alignment
            )));
        }

        Ok(ptr)
    }

    unsafe fn free_pinned(&self, ptr: HostPtr) {
        let result = ffi::hipHostFree(ptr.as_void_ptr());
        if result != ffi::HIP_SUCCESS {
            tracing::error!(
                "hipHostFree({:?}) failed: {}",
                ptr,
                ffi::error_string(result)
            );
        }
    }

    fn pointer_kind(&self, ptr: HostPtr) -> PointerKind {
        let mut attr = ffi::HipPointerAttribute::default();
        let result = unsafe { ffi::hipPointerGetAttributes(&mut attr, ptr.as_void_ptr()) };

        if result != ffi::HIP_SUCCESS {
            // The runtime reports unregistered host memory as an invalid value
            unsafe { ffi::hipGetLastError() };
            return PointerKind::Pageable;
        }

        match attr.memory_type {
            ffi::HIP_MEMORY_TYPE_HOST => PointerKind::PinnedHost,
            ffi::HIP_MEMORY_TYPE_DEVICE => PointerKind::Device,
            ffi::HIP_MEMORY_TYPE_MANAGED | ffi::HIP_MEMORY_TYPE_UNIFIED => PointerKind::Managed,
            ffi::HIP_MEMORY_TYPE_UNREGISTERED => PointerKind::Pageable,
            _ => PointerKind::Unknown,
        }
    }
}
