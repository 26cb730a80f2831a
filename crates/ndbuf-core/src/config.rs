//! Memory-system configuration.

use crate::location::MemoryLocation;

/// Default shared-memory budget per block, in bytes.
pub const DEFAULT_SHARED_CAPACITY: usize = 48 * 1024;

/// Configuration for a [`crate::memory::MemorySystem`].
///
/// Every memory space can carry a capacity limit; allocations that would push
/// a space past its limit fail instead of being served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConfig {
    capacities: [Option<usize>; 5],
}

impl Default for MemoryConfig {
    fn default() -> Self {
        let mut capacities = [None; 5];
        capacities[MemoryLocation::Shared.index()] = Some(DEFAULT_SHARED_CAPACITY);
        Self { capacities }
    }
}

impl MemoryConfig {
    /// Create a configuration with default limits (only shared memory is bounded).
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit a memory space to `bytes` live bytes.
    pub fn with_capacity(mut self, location: MemoryLocation, bytes: usize) -> Self {
        self.capacities[location.index()] = Some(bytes);
        self
    }

    /// Remove the limit on a memory space.
    pub fn unlimited(mut self, location: MemoryLocation) -> Self {
        self.capacities[location.index()] = None;
        self
    }

    /// Capacity limit of a memory space, if any.
    pub fn capacity(&self, location: MemoryLocation) -> Option<usize> {
        self.capacities[location.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_config_default() {
        let config = MemoryConfig::default();
        assert_eq!(config.capacity(MemoryLocation::Shared), Some(DEFAULT_SHARED_CAPACITY));
        assert_eq!(config.capacity(MemoryLocation::Device), None);
        assert_eq!(config.capacity(MemoryLocation::Host), None);
    }

    #[test]
    fn test_memory_config_builder() {
        let config = MemoryConfig::new()
            .with_capacity(MemoryLocation::Device, 1024)
            .unlimited(MemoryLocation::Shared);

        assert_eq!(config.capacity(MemoryLocation::Device), Some(1024));
        assert_eq!(config.capacity(MemoryLocation::Shared), None);
    }
}
