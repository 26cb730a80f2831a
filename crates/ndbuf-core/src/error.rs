//! Error types for descriptor creation, slicing and release.
//!
//! ## Error Categories
//!
//! - Invalid tags coming from generated code (element kind, memory location)
//! - Allocation failures in a memory space
//! - Structural slicing errors (selector count, rank)
//! - Release calls that do not match the descriptor's memory space

use thiserror::Error;

use crate::location::MemoryLocation;

/// Result type for buffer operations
pub type BufferResult<T> = Result<T, BufferError>;

/// Buffer error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// An element-kind tag outside the registry reached the layout engine
    #[error("invalid element kind tag {0}")]
    InvalidElementKind(i32),

    /// A memory-location tag outside the known memory spaces
    #[error("invalid memory location tag {0}")]
    InvalidMemoryLocation(i32),

    /// A memory space could not satisfy an allocation request
    #[error("allocation of {size} bytes in {location} memory failed: {reason}")]
    AllocationFailed {
        /// Memory space the request was made in
        location: MemoryLocation,
        /// Requested size in bytes
        size: usize,
        /// Why the memory space refused the request
        reason: String,
    },

    /// A host-only release was attempted on storage living elsewhere
    #[error("host release called on {actual} storage")]
    LocationMismatch {
        /// Where the descriptor's storage actually lives
        actual: MemoryLocation,
    },

    /// More selectors than the source descriptor has dimensions
    #[error("{selectors} selectors given for a rank-{rank} array")]
    TooManySelectors {
        /// Rank of the source descriptor
        rank: usize,
        /// Number of selectors supplied
        selectors: usize,
    },

    /// Requested view rank disagrees with the number of range selectors
    #[error("requested rank {requested} but selectors produce rank {actual}")]
    RankMismatch {
        /// Rank the caller asked for
        requested: usize,
        /// Rank implied by the range selectors
        actual: usize,
    },

    /// The descriptor's metadata or storage has already been released
    #[error("descriptor has already been released")]
    Released,

    /// A shape extent received over the C ABI was negative
    #[error("negative extent {extent} in dimension {dim}")]
    NegativeExtent {
        /// Offending dimension
        dim: usize,
        /// Value received
        extent: i64,
    },

    /// Shape or byte-size arithmetic overflowed
    #[error("size overflow computing layout for shape {shape:?}")]
    SizeOverflow {
        /// Offending shape
        shape: Vec<usize>,
    },

    /// An owning descriptor was asked to alias another buffer
    #[error("descriptor owns its storage and cannot alias another buffer")]
    OwnsStorage,

    /// A view reaches outside the allocation its storage belongs to
    #[error("view reaches outside its {allocation_size}-byte allocation")]
    OutOfBounds {
        /// Byte size of the underlying allocation
        allocation_size: usize,
    },

    /// Host-side access to storage the host cannot address
    #[error("{location} memory is not host accessible")]
    NotHostAccessible {
        /// Memory space of the storage
        location: MemoryLocation,
    },

    /// Host-side element transfer with the wrong number of values
    #[error("expected {expected} elements, got {actual}")]
    LengthMismatch {
        /// Element count of the descriptor
        expected: usize,
        /// Element count supplied
        actual: usize,
    },

    /// Element type requested does not match the descriptor's element kind
    #[error("element type mismatch: descriptor holds {expected}, requested {requested}")]
    ElementMismatch {
        /// Element kind of the descriptor
        expected: crate::dtype::ElementKind,
        /// Element kind requested by the caller
        requested: crate::dtype::ElementKind,
    },
}

impl BufferError {
    /// Create an allocation failure
    pub fn allocation_failed(location: MemoryLocation, size: usize, reason: impl Into<String>) -> Self {
        BufferError::AllocationFailed {
            location,
            size,
            reason: reason.into(),
        }
    }

    /// Whether this error signals a defect in the calling code rather than
    /// a request the memory system could not satisfy
    pub fn is_caller_defect(&self) -> bool {
        !matches!(
            self,
            BufferError::AllocationFailed { .. } | BufferError::SizeOverflow { .. }
        )
    }
}
