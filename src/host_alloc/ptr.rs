//! Host address handle

use std::fmt;
use std::ptr;

/// Address of a host buffer handed out by the allocator
///
/// A plain address: copying it does not duplicate ownership. Null is the
/// answer to a zero-byte request and is accepted (and ignored) by `release`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostPtr(*mut u8);

// SAFETY: HostPtr is only an address. Access to the memory behind it is
// governed by the allocator's allocate/release protocol, not by this type.
unsafe impl Send for HostPtr {}
unsafe impl Sync for HostPtr {}

impl HostPtr {
    /// The null address
    pub const fn null() -> Self {
        HostPtr(ptr::null_mut())
    }

    /// Wrap a raw pointer
    pub const fn from_raw(ptr: *mut u8) -> Self {
        HostPtr(ptr)
    }

    /// Whether this is the null address
    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    /// Raw byte pointer
    pub fn as_ptr(&self) -> *mut u8 {
        self.0
    }

    /// Raw untyped pointer (for FFI calls)
    pub fn as_void_ptr(&self) -> *mut std::ffi::c_void {
        self.0.cast()
    }

    /// Integer address, used as the registry key
    pub fn addr(&self) -> usize {
        self.0 as usize
    }

    /// Whether the address is a multiple of `alignment`
    pub fn is_aligned_to(&self, alignment: usize) -> bool {
        alignment != 0 && self.addr() % alignment == 0
    }
}

impl Default for HostPtr {
    fn default() -> Self {
        HostPtr::null()
    }
}

impl fmt::Debug for HostPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostPtr({:p})", self.0)
    }
}

impl fmt::Pointer for HostPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.0, f)
    }
}
