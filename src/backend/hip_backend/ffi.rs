//! HIP FFI bindings
//!
//! Only the runtime calls the pinned host path needs: host allocation,
//! pointer attributes, streams and events. Device allocation and async
//! copies are bound for the integration tests that stage real transfers.

use std::ffi::c_void;

#[link(name = "amdhip64")]
#[allow(dead_code)]
extern "C" {
    pub fn hipInit(flags: u32) -> i32;
    pub fn hipGetDeviceCount(count: *mut i32) -> i32;
    pub fn hipSetDevice(deviceId: i32) -> i32;
    pub fn hipHostMalloc(ptr: *mut *mut c_void, size: usize, flags: u32) -> i32;
    pub fn hipHostFree(ptr: *mut c_void) -> i32;
    pub fn hipPointerGetAttributes(attributes: *mut HipPointerAttribute, ptr: *const c_void)
        -> i32;
    pub fn hipMalloc(ptr: *mut *mut c_void, size: usize) -> i32;
    pub fn hipFree(ptr: *mut c_void) -> i32;
    pub fn hipMemcpyAsync(
        dst: *mut c_void,
        src: *const c_void,
        count: usize,
        kind: i32,
        stream: *mut c_void,
    ) -> i32;
    pub fn hipStreamCreate(stream: *mut *mut c_void) -> i32;
    pub fn hipStreamDestroy(stream: *mut c_void) -> i32;
    pub fn hipStreamSynchronize(stream: *mut c_void) -> i32;
    pub fn hipEventCreateWithFlags(event: *mut *mut c_void, flags: u32) -> i32;
    pub fn hipEventDestroy(event: *mut c_void) -> i32;
    pub fn hipEventRecord(event: *mut c_void, stream: *mut c_void) -> i32;
    pub fn hipEventQuery(event: *mut c_void) -> i32;
    pub fn hipEventSynchronize(event: *mut c_void) -> i32;
    pub fn hipGetLastError() -> i32;
    pub fn hipGetErrorString(error: i32) -> *const i8;
}

/// Mirror of `hipPointerAttribute_t` (ROCm 6 layout)
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct HipPointerAttribute {
    pub memory_type: i32,
    pub device: i32,
    pub device_pointer: *mut c_void,
    pub host_pointer: *mut c_void,
    pub is_managed: i32,
    pub allocation_flags: u32,
}

impl Default for HipPointerAttribute {
    fn default() -> Self {
        Self {
            memory_type: HIP_MEMORY_TYPE_UNREGISTERED,
            device: -1,
            device_pointer: std::ptr::null_mut(),
            host_pointer: std::ptr::null_mut(),
            is_managed: 0,
            allocation_flags: 0,
        }
    }
}

/// HIP memory copy kinds
pub const HIP_MEMCPY_HOST_TO_DEVICE: i32 = 1;
pub const HIP_MEMCPY_DEVICE_TO_HOST: i32 = 2;

/// HIP success code
pub const HIP_SUCCESS: i32 = 0;

/// Returned by hipEventQuery while the captured work is still running
pub const HIP_ERROR_NOT_READY: i32 = 600;

/// hipHostMalloc flags
pub const HIP_HOST_MALLOC_DEFAULT: u32 = 0x0;

/// Event flag to disable timing data collection
pub const HIP_EVENT_DISABLE_TIMING: u32 = 0x2;

// hipMemoryType values
pub const HIP_MEMORY_TYPE_UNREGISTERED: i32 = 0;
pub const HIP_MEMORY_TYPE_HOST: i32 = 1;
pub const HIP_MEMORY_TYPE_DEVICE: i32 = 2;
pub const HIP_MEMORY_TYPE_MANAGED: i32 = 3;
pub const HIP_MEMORY_TYPE_UNIFIED: i32 = 11;

/// Human-readable HIP error string
pub fn error_string(code: i32) -> String {
    // SAFETY: hipGetErrorString returns a static NUL-terminated string
    unsafe {
        let ptr = hipGetErrorString(code);
        if ptr.is_null() {
            return format!("unknown HIP error {}", code);
        }
        std::ffi::CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}
