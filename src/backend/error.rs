//! Device collaborator error types

use thiserror::Error;

/// Errors reported by a [`HostDevice`](super::HostDevice) implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Device initialization failed: {0}")]
    InitializationFailed(String),
    #[error("Pinned host allocation failed: {0}")]
    AllocationFailed(String),
    #[error("Event query failed: {0}")]
    EventQueryFailed(String),
    #[error("Device error: {0}")]
    DeviceError(String),
}

/// Device result type
pub type DeviceResult<T> = Result<T, DeviceError>;

impl DeviceError {
    /// Check if this error is recoverable (temporary condition)
    ///
    /// Allocation failures usually mean host memory is exhausted or the
    /// page-lock limit was hit; both may clear once cached blocks are
    /// returned to the driver. Initialization failures never clear.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DeviceError::AllocationFailed(_)
                | DeviceError::EventQueryFailed(_)
                | DeviceError::DeviceError(_)
        )
    }

    /// Check if this error is permanent (should never retry)
    pub fn is_permanent(&self) -> bool {
        !self.is_recoverable()
    }
}
