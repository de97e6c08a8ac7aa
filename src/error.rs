//! Error handling for pinforge
//!
//! Two kinds of failure exist in the allocator:
//! - Resource exhaustion: fresh pinned allocation failed on both attempts.
//!   Surfaced as [`HostAllocError::OutOfMemory`]; the caller may retry,
//!   fall back to pageable memory, or give up.
//! - Contract violations: releasing an unknown or already-free address.
//!   These are programming errors and panic; they never show up here.

use std::fmt;

use crate::backend::DeviceError;

/// Error type for the caching host allocator
#[derive(Debug, thiserror::Error)]
pub enum HostAllocError {
    /// Fresh pinned allocation failed after the retry
    #[error("Pinned host allocation of {size} bytes failed after {attempts} attempts: {source}")]
    OutOfMemory {
        size: usize,
        attempts: usize,
        #[source]
        source: DeviceError,
    },

    /// Rejected allocator configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Staging copy larger than the accessible part of a buffer
    #[error("Copy of {requested} bytes exceeds {available} accessible bytes")]
    CopyOutOfBounds { requested: usize, available: usize },
}

impl HostAllocError {
    /// Categorize the error for handling decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            HostAllocError::OutOfMemory { .. } => ErrorCategory::Recoverable,
            HostAllocError::InvalidConfiguration(_) | HostAllocError::CopyOutOfBounds { .. } => {
                ErrorCategory::User
            }
        }
    }

    /// Check if this error is recoverable (temporary condition)
    pub fn is_recoverable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Recoverable)
    }

    /// Check if this is a user-facing error (actionable by users)
    pub fn is_user_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::User)
    }
}

/// Error category for handling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// User error - invalid input or configuration
    User,
    /// Recoverable error - temporary condition
    Recoverable,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::User => write!(f, "User"),
            ErrorCategory::Recoverable => write!(f, "Recoverable"),
        }
    }
}

/// Result type using [`HostAllocError`]
pub type HostResult<T> = std::result::Result<T, HostAllocError>;

/// Create a configuration error with context
///
/// # Examples
/// ```ignore
/// return Err(config_error!("alignment {} is not a power of two", alignment));
/// ```
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::HostAllocError::InvalidConfiguration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::HostAllocError::InvalidConfiguration(format!($fmt, $($arg)*))
    };
}
