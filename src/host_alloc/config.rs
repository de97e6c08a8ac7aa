//! Configuration for the caching host allocator

use crate::config_error;
use crate::error::HostResult;

/// Configuration for [`CachingHostAllocator`](super::CachingHostAllocator)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAllocatorConfig {
    /// Alignment of every fresh pinned allocation (power of two)
    pub alignment: usize,

    /// Drain cached blocks back to the device before retrying a failed
    /// fresh allocation
    pub drain_before_retry: bool,
}

impl Default for HostAllocatorConfig {
    fn default() -> Self {
        HostAllocatorConfig {
            alignment: Self::DEFAULT_ALIGNMENT,
            drain_before_retry: true,
        }
    }
}

impl HostAllocatorConfig {
    /// Default host alignment in bytes
    pub const DEFAULT_ALIGNMENT: usize = 512;

    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set allocation alignment
    pub fn with_alignment(mut self, alignment: usize) -> Self {
        self.alignment = alignment;
        self
    }

    /// Enable or disable draining the cache before the retry
    pub fn with_drain_before_retry(mut self, drain_before_retry: bool) -> Self {
        self.drain_before_retry = drain_before_retry;
        self
    }

    /// Check the configuration
    pub fn validate(&self) -> HostResult<()> {
        if !self.alignment.is_power_of_two() {
            return Err(config_error!(
                "alignment must be a power of two, got {}",
                self.alignment
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HostAllocatorConfig::default();
        assert_eq!(config.alignment, 512);
        assert!(config.drain_before_retry);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = HostAllocatorConfig::new()
            .with_alignment(4096)
            .with_drain_before_retry(false);
        assert_eq!(config.alignment, 4096);
        assert!(!config.drain_before_retry);
    }

    #[test]
    fn test_invalid_alignment() {
        assert!(HostAllocatorConfig::new().with_alignment(0).validate().is_err());
        let err = HostAllocatorConfig::new()
            .with_alignment(100)
            .validate()
            .unwrap_err();
        assert!(err.is_user_error());
    }
}
