//! ndbuf-core - N-dimensional array descriptors for generated accelerator code
//!
//! This crate provides the data model shared by generated host and kernel
//! code:
//! - `ArrayDescriptor` - shape, strides, element kind, memory location and
//!   ownership of one array buffer or view
//! - `MemorySystem` - allocate/free entry points for every memory space
//! - `Selector` - per-dimension range or index used to derive views
//! - `ReleaseStatus` - outcome of the lifecycle release operations
//!
//! # Layout
//!
//! Owning buffers are dense and row-major. Views alias the storage of their
//! source with their own strides and starting offset, and can themselves be
//! sliced again; offsets and strides compose.
//!
//! # Memory Spaces
//!
//! Descriptors are tagged with a [`MemoryLocation`]. Storage is always
//! released through the free call of the space it was allocated in, and only
//! by the descriptor that owns it.
//!
//! # Features
//!
//! - `cuda`: serve device, managed and pinned host storage through the CUDA
//!   driver (`cudarc`) instead of host memory

pub mod config;
pub mod descriptor;
pub mod dtype;
pub mod element;
pub mod error;
pub mod layout;
pub mod lifecycle;
pub mod location;
pub mod memory;
pub mod slice;

pub use config::{MemoryConfig, DEFAULT_SHARED_CAPACITY};
pub use descriptor::{ArrayDescriptor, ElementOffsets, Ownership};
pub use dtype::ElementKind;
pub use element::ArrayElement;
pub use error::{BufferError, BufferResult};
pub use layout::{element_count, is_row_major, row_major_strides, strided_offset};
pub use lifecycle::ReleaseStatus;
pub use location::MemoryLocation;
pub use memory::{MemorySystem, SpaceUsage};
pub use slice::{range_extent, Selector};
