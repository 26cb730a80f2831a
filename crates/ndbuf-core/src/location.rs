use std::fmt;

use crate::error::{BufferError, BufferResult};

/// Memory spaces a descriptor's storage can live in.
///
/// Each space has its own allocate/free pair in [`crate::memory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum MemoryLocation {
    /// Unified memory addressable from host and device
    Managed = 0,
    /// Page-locked host memory
    PinnedHost = 1,
    /// Device global memory
    Device = 2,
    /// Ordinary host heap
    Host = 3,
    /// Per-block device shared memory
    Shared = 4,
}

impl MemoryLocation {
    /// Every memory space, in tag order.
    pub const ALL: [MemoryLocation; 5] = [
        MemoryLocation::Managed,
        MemoryLocation::PinnedHost,
        MemoryLocation::Device,
        MemoryLocation::Host,
        MemoryLocation::Shared,
    ];

    /// Resolve a tag received from generated code.
    pub fn from_tag(tag: i32) -> BufferResult<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|location| *location as i32 == tag)
            .ok_or(BufferError::InvalidMemoryLocation(tag))
    }

    pub fn tag(&self) -> i32 {
        *self as i32
    }

    /// Position in per-space tables.
    pub(crate) fn index(&self) -> usize {
        match self {
            MemoryLocation::Managed => 0,
            MemoryLocation::PinnedHost => 1,
            MemoryLocation::Device => 2,
            MemoryLocation::Host => 3,
            MemoryLocation::Shared => 4,
        }
    }

    /// Storage lives in host memory (heap or pinned).
    pub fn is_host_resident(&self) -> bool {
        matches!(self, MemoryLocation::Host | MemoryLocation::PinnedHost)
    }

    /// Host code may read and write the storage directly.
    pub fn is_host_accessible(&self) -> bool {
        matches!(
            self,
            MemoryLocation::Host | MemoryLocation::PinnedHost | MemoryLocation::Managed
        )
    }

    /// Storage is ordinary process memory that runtime threads can write.
    ///
    /// Holds for every space unless the `cuda` feature hands device
    /// allocations to the CUDA driver.
    pub fn is_process_addressable(&self) -> bool {
        !(cfg!(feature = "cuda") && *self == MemoryLocation::Device)
    }

    pub fn name(&self) -> &'static str {
        match self {
            MemoryLocation::Managed => "managed",
            MemoryLocation::PinnedHost => "pinned host",
            MemoryLocation::Device => "device",
            MemoryLocation::Host => "host",
            MemoryLocation::Shared => "shared",
        }
    }
}

impl TryFrom<i32> for MemoryLocation {
    type Error = BufferError;

    fn try_from(tag: i32) -> BufferResult<Self> {
        MemoryLocation::from_tag(tag)
    }
}

impl fmt::Display for MemoryLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
