//! The array descriptor: shape, strides, element kind, memory location,
//! ownership and the raw storage pointer.
//!
//! ## Ownership
//!
//! A descriptor records two independent facts:
//!
//! - whether it owns its storage (and must release it), and
//! - whether it owns its shape/stride arrays.
//!
//! Owning buffers own both. Views own only their metadata, as do
//! descriptors built over storage someone else manages (shared-memory
//! arrays declared by kernel code). `is_view()` is "does not own storage".

use std::fmt;
use std::ptr::NonNull;

use tracing::warn;

use crate::dtype::ElementKind;
use crate::element::ArrayElement;
use crate::error::{BufferError, BufferResult};
use crate::layout;
use crate::location::MemoryLocation;

/// Ownership tags of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ownership {
    /// The descriptor must release `raw_data`
    pub owns_storage: bool,
    /// The descriptor must release its shape/stride arrays
    pub owns_metadata: bool,
}

impl Ownership {
    /// An owning buffer.
    pub const OWNER: Ownership = Ownership {
        owns_storage: true,
        owns_metadata: true,
    };

    /// A view over storage owned elsewhere.
    pub const VIEW: Ownership = Ownership {
        owns_storage: false,
        owns_metadata: true,
    };
}

/// Start and byte size of the allocation a descriptor's elements live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Allocation {
    pub(crate) base: NonNull<u8>,
    pub(crate) size: usize,
}

/// Descriptor of one n-dimensional array buffer or of a view into one.
pub struct ArrayDescriptor {
    pub(crate) rank: usize,
    pub(crate) shape: Option<Box<[usize]>>,
    pub(crate) strides: Option<Box<[isize]>>,
    pub(crate) kind: ElementKind,
    pub(crate) element_size: usize,
    pub(crate) length: usize,
    pub(crate) buffer_size: usize,
    pub(crate) raw_data: Option<NonNull<u8>>,
    /// Allocation `raw_data` points into; views inherit their source's
    pub(crate) allocation: Option<Allocation>,
    pub(crate) ownership: Ownership,
    pub(crate) location: MemoryLocation,
}

// SAFETY: the descriptor only carries the storage address; every access
// through it is an explicit unsafe read or write whose synchronization is
// the caller's responsibility.
unsafe impl Send for ArrayDescriptor {}
unsafe impl Sync for ArrayDescriptor {}

impl ArrayDescriptor {
    /// Metadata-only descriptor with its layout computed and no storage.
    pub(crate) fn unbound(
        shape: &[usize],
        kind: ElementKind,
        location: MemoryLocation,
        ownership: Ownership,
    ) -> BufferResult<Self> {
        let mut descriptor = Self {
            rank: shape.len(),
            shape: Some(shape.into()),
            strides: None,
            kind,
            element_size: 0,
            length: 0,
            buffer_size: 0,
            raw_data: None,
            allocation: None,
            ownership,
            location,
        };
        descriptor.initialize_layout()?;
        Ok(descriptor)
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Extent of each dimension. Empty once the metadata has been released.
    pub fn shape(&self) -> &[usize] {
        self.shape.as_deref().unwrap_or(&[])
    }

    /// Element-count stride of each dimension. Empty once the metadata has
    /// been released.
    pub fn strides(&self) -> &[isize] {
        self.strides.as_deref().unwrap_or(&[])
    }

    pub fn element_kind(&self) -> ElementKind {
        self.kind
    }

    /// Size in bytes of one element.
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    /// Total number of elements.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Total size in bytes (`length * element_size`).
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Start of the descriptor's elements, or null if there is no storage.
    pub fn raw_data(&self) -> *mut u8 {
        self.raw_data
            .map(NonNull::as_ptr)
            .unwrap_or(std::ptr::null_mut())
    }

    pub fn data_ptr(&self) -> Option<NonNull<u8>> {
        self.raw_data
    }

    pub fn location(&self) -> MemoryLocation {
        self.location
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// The descriptor does not own its storage.
    pub fn is_view(&self) -> bool {
        !self.ownership.owns_storage
    }

    /// Shape and strides are still present.
    pub fn has_metadata(&self) -> bool {
        self.shape.is_some() && self.strides.is_some()
    }

    /// Strides are the row-major strides of the shape.
    pub fn is_contiguous(&self) -> bool {
        self.has_metadata() && layout::is_row_major(self.shape(), self.strides())
    }

    /// Element offset (in elements, relative to `raw_data`) of the element at
    /// row-major position `flat` of this descriptor's shape.
    pub fn element_offset(&self, flat: usize) -> isize {
        layout::strided_offset(self.shape(), self.strides(), flat)
    }

    /// Element offsets of every element, in row-major order of the shape.
    pub fn element_offsets(&self) -> ElementOffsets<'_> {
        ElementOffsets::new(self.shape(), self.strides(), self.length)
    }

    fn check_host_access<T: ArrayElement>(&self) -> BufferResult<NonNull<u8>> {
        if !self.location.is_host_accessible() {
            return Err(BufferError::NotHostAccessible {
                location: self.location,
            });
        }
        if T::KIND != self.kind {
            return Err(BufferError::ElementMismatch {
                expected: self.kind,
                requested: T::KIND,
            });
        }
        self.check_bounds()?;
        self.raw_data.ok_or(BufferError::Released)
    }

    /// Check that every element lies inside the allocation the descriptor's
    /// storage was derived from.
    ///
    /// Slicing does not validate selectors, so a view built from
    /// out-of-range selectors fails here instead of being dereferenced.
    pub fn check_bounds(&self) -> BufferResult<()> {
        let (data, allocation) = match (self.raw_data, self.allocation, self.has_metadata()) {
            (Some(data), Some(allocation), true) => (data, allocation),
            _ => return Err(BufferError::Released),
        };
        if self.length == 0 {
            return Ok(());
        }

        let out_of_bounds = || BufferError::OutOfBounds {
            allocation_size: allocation.size,
        };
        let element_size = self.element_size as isize;
        let start = (data.as_ptr() as usize).wrapping_sub(allocation.base.as_ptr() as usize) as isize;

        // Lowest and highest byte offset any element starts at
        let (mut low, mut high) = (start, start);
        for (&dim, &stride) in self.shape().iter().zip(self.strides()) {
            let reach = isize::try_from(dim - 1)
                .ok()
                .and_then(|last| last.checked_mul(stride))
                .and_then(|elements| elements.checked_mul(element_size))
                .ok_or_else(out_of_bounds)?;
            if reach < 0 {
                low = low.checked_add(reach).ok_or_else(out_of_bounds)?;
            } else {
                high = high.checked_add(reach).ok_or_else(out_of_bounds)?;
            }
        }
        let end = high.checked_add(element_size).ok_or_else(out_of_bounds)?;

        if low < 0 || end as usize > allocation.size {
            return Err(out_of_bounds());
        }
        Ok(())
    }

    /// Copy the descriptor's elements to a vector, in row-major order.
    ///
    /// Only host-accessible storage can be read. Any accelerator work writing
    /// to the storage must have been synchronized first, and the owner of
    /// the storage must not have released it.
    pub fn read_elements<T: ArrayElement>(&self) -> BufferResult<Vec<T>> {
        let base = self.check_host_access::<T>()?.as_ptr() as *const T;
        Ok(self
            .element_offsets()
            // SAFETY: `check_bounds` placed every offset inside the allocation
            .map(|offset| unsafe { base.offset(offset).read_unaligned() })
            .collect())
    }

    /// Overwrite the descriptor's elements from `values`, in row-major order.
    pub fn write_elements<T: ArrayElement>(&self, values: &[T]) -> BufferResult<()> {
        let base = self.check_host_access::<T>()?.as_ptr() as *mut T;
        if values.len() != self.length {
            return Err(BufferError::LengthMismatch {
                expected: self.length,
                actual: values.len(),
            });
        }
        for (offset, value) in self.element_offsets().zip(values) {
            // SAFETY: `check_bounds` placed every offset inside the allocation
            unsafe { base.offset(offset).write_unaligned(*value) };
        }
        Ok(())
    }
}

impl fmt::Debug for ArrayDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayDescriptor")
            .field("rank", &self.rank)
            .field("shape", &self.shape)
            .field("strides", &self.strides)
            .field("kind", &self.kind)
            .field("length", &self.length)
            .field("buffer_size", &self.buffer_size)
            .field("raw_data", &self.raw_data())
            .field("allocation", &self.allocation)
            .field("ownership", &self.ownership)
            .field("location", &self.location)
            .finish()
    }
}

impl Drop for ArrayDescriptor {
    fn drop(&mut self) {
        if self.ownership.owns_storage && self.raw_data.is_some() {
            warn!(
                location = %self.location,
                buffer_size = self.buffer_size,
                "owning descriptor dropped without release; storage leaked"
            );
        }
    }
}

/// Iterator over the element offsets of a strided shape.
#[derive(Debug, Clone)]
pub struct ElementOffsets<'a> {
    shape: &'a [usize],
    strides: &'a [isize],
    index: Vec<usize>,
    offset: isize,
    remaining: usize,
}

impl<'a> ElementOffsets<'a> {
    fn new(shape: &'a [usize], strides: &'a [isize], length: usize) -> Self {
        Self {
            shape,
            strides,
            index: vec![0; shape.len()],
            offset: 0,
            remaining: length,
        }
    }
}

impl Iterator for ElementOffsets<'_> {
    type Item = isize;

    fn next(&mut self) -> Option<isize> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let current = self.offset;

        // Advance the multi-index like an odometer, last dimension fastest
        for dim in (0..self.shape.len()).rev() {
            self.index[dim] += 1;
            self.offset = self.offset.wrapping_add(self.strides[dim]);
            if self.index[dim] < self.shape[dim] {
                break;
            }
            self.offset = self
                .offset
                .wrapping_sub(self.strides[dim].wrapping_mul(self.shape[dim] as isize));
            self.index[dim] = 0;
        }

        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for ElementOffsets<'_> {}
