//! Lifecycle manager: creating descriptors and releasing them according to
//! their ownership and memory space.
//!
//! Every descriptor obtained from this module (or from slicing) is released
//! exactly once by its holder. Release operations null what they free, so a
//! repeated call finds nothing left and reports
//! [`ReleaseStatus::NothingToRelease`] instead of freeing twice.

use std::ptr::NonNull;

use tracing::debug;

use crate::descriptor::{Allocation, ArrayDescriptor, Ownership};
use crate::dtype::ElementKind;
use crate::error::{BufferError, BufferResult};
use crate::location::MemoryLocation;
use crate::memory::MemorySystem;

/// Outcome of a release operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseStatus {
    /// Something was freed
    Released,
    /// The descriptor had nothing this operation is allowed to free
    NothingToRelease,
}

impl ReleaseStatus {
    /// Status code returned across the C ABI.
    pub fn code(&self) -> i32 {
        match self {
            ReleaseStatus::Released => 1,
            ReleaseStatus::NothingToRelease => 0,
        }
    }

    pub fn is_released(&self) -> bool {
        matches!(self, ReleaseStatus::Released)
    }

    fn or(self, other: ReleaseStatus) -> ReleaseStatus {
        if self.is_released() || other.is_released() {
            ReleaseStatus::Released
        } else {
            ReleaseStatus::NothingToRelease
        }
    }
}

impl MemorySystem {
    /// Create a descriptor for an array of `shape` holding `kind` elements in
    /// `location`.
    ///
    /// With `is_view == false` the descriptor owns freshly allocated, zeroed
    /// storage of `buffer_size` bytes.
    ///
    /// With `is_view == true` no storage is allocated and `raw_data` is null.
    /// A view never releases storage, so anything allocated here would have
    /// no owner. The descriptor is a placeholder until generated code points
    /// it at another buffer with [`ArrayDescriptor::bind_alias`]; the shape
    /// given here only describes it until then.
    pub fn create_buffer(
        &self,
        shape: &[usize],
        kind: ElementKind,
        is_view: bool,
        location: MemoryLocation,
    ) -> BufferResult<ArrayDescriptor> {
        let ownership = if is_view { Ownership::VIEW } else { Ownership::OWNER };
        let mut descriptor = ArrayDescriptor::unbound(shape, kind, location, ownership)?;

        if !is_view {
            let storage = self.allocate(location, descriptor.buffer_size)?;
            descriptor.raw_data = Some(storage);
            descriptor.allocation = Some(Allocation {
                base: storage,
                size: descriptor.buffer_size,
            });
        }

        debug!(
            shape = ?shape,
            %kind,
            %location,
            is_view,
            buffer_size = descriptor.buffer_size,
            "created descriptor"
        );
        Ok(descriptor)
    }

    /// Release the storage owned by `descriptor` with the free call of its
    /// memory space.
    pub fn release_storage(&self, descriptor: &mut ArrayDescriptor) -> ReleaseStatus {
        if !descriptor.ownership.owns_storage {
            return ReleaseStatus::NothingToRelease;
        }
        descriptor.allocation = None;
        match descriptor.raw_data.take() {
            Some(ptr) => {
                // SAFETY: an owning descriptor's pointer came from `allocate`
                // with this location and size, and `take` guarantees it is
                // freed once.
                unsafe { self.deallocate(descriptor.location, ptr, descriptor.buffer_size) };
                ReleaseStatus::Released
            }
            None => ReleaseStatus::NothingToRelease,
        }
    }

    /// Release the storage of a host-resident owning descriptor.
    ///
    /// Storage in any other memory space is rejected.
    pub fn release_host_storage(
        &self,
        descriptor: &mut ArrayDescriptor,
    ) -> BufferResult<ReleaseStatus> {
        if !descriptor.location.is_host_resident() {
            return Err(BufferError::LocationMismatch {
                actual: descriptor.location,
            });
        }
        Ok(self.release_storage(descriptor))
    }

    /// Release everything `descriptor` owns.
    ///
    /// Owning descriptors give back their storage and metadata; views give
    /// back only their metadata and leave the aliased storage untouched.
    pub fn release(&self, descriptor: &mut ArrayDescriptor) -> ReleaseStatus {
        if descriptor.ownership.owns_storage {
            let storage = self.release_storage(descriptor);
            storage.or(descriptor.drop_metadata())
        } else {
            descriptor.release_metadata()
        }
    }
}

impl ArrayDescriptor {
    /// Build a descriptor over storage managed by someone else, such as a
    /// block's shared-memory buffer declared by kernel code.
    ///
    /// The descriptor owns its metadata only; releasing it never frees
    /// `storage`.
    ///
    /// # Safety
    /// `storage` must be valid for `buffer_size` bytes of the resulting
    /// layout, suitably aligned for `kind`, and outlive the descriptor's use.
    pub unsafe fn create_borrowed(
        shape: &[usize],
        kind: ElementKind,
        location: MemoryLocation,
        storage: NonNull<u8>,
    ) -> BufferResult<ArrayDescriptor> {
        let mut descriptor = ArrayDescriptor::unbound(shape, kind, location, Ownership::VIEW)?;
        descriptor.raw_data = Some(storage);
        descriptor.allocation = Some(Allocation {
            base: storage,
            size: descriptor.buffer_size,
        });
        Ok(descriptor)
    }

    /// Make this placeholder view an alias of `source`.
    ///
    /// The view adopts `source`'s storage, location and full layout (rank,
    /// shape, strides, length), taking its own copies of the shape and
    /// stride arrays. Whatever shape the placeholder was created with is
    /// discarded.
    pub fn bind_alias(&mut self, source: &ArrayDescriptor) -> BufferResult<()> {
        if self.ownership.owns_storage {
            return Err(BufferError::OwnsStorage);
        }
        if self.kind != source.kind {
            return Err(BufferError::ElementMismatch {
                expected: self.kind,
                requested: source.kind,
            });
        }
        let (shape, strides) = match (&source.shape, &source.strides, source.raw_data) {
            (Some(shape), Some(strides), Some(_)) => (shape.clone(), strides.clone()),
            _ => return Err(BufferError::Released),
        };

        self.rank = source.rank;
        self.shape = Some(shape);
        self.strides = Some(strides);
        self.element_size = source.element_size;
        self.length = source.length;
        self.buffer_size = source.buffer_size;
        self.raw_data = source.raw_data;
        self.allocation = source.allocation;
        self.location = source.location;

        debug!(
            shape = ?self.shape(),
            strides = ?self.strides(),
            location = %self.location,
            "bound alias"
        );
        Ok(())
    }

    /// Release the shape/stride arrays of a view.
    ///
    /// Does nothing for descriptors that own their storage (those are released
    /// as a whole through [`MemorySystem::release`]) or whose metadata is
    /// already gone.
    pub fn release_metadata(&mut self) -> ReleaseStatus {
        if self.ownership.owns_storage {
            return ReleaseStatus::NothingToRelease;
        }
        self.drop_metadata()
    }

    fn drop_metadata(&mut self) -> ReleaseStatus {
        if !self.ownership.owns_metadata {
            return ReleaseStatus::NothingToRelease;
        }
        let shape = self.shape.take();
        let strides = self.strides.take();
        if shape.is_some() || strides.is_some() {
            ReleaseStatus::Released
        } else {
            ReleaseStatus::NothingToRelease
        }
    }
}
