//! Layout engine: element counts, byte sizes and row-major strides.

use crate::descriptor::ArrayDescriptor;
use crate::error::{BufferError, BufferResult};

/// Number of elements described by `shape`.
///
/// An empty shape is a 0-dimensional scalar and holds one element.
/// Returns `None` if the product overflows.
pub fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}

/// Row-major (C order) strides, in elements, for `shape`.
///
/// The last dimension has stride 1 and each earlier dimension strides over
/// the product of all later extents.
pub fn row_major_strides(shape: &[usize]) -> Box<[isize]> {
    let mut strides = vec![0isize; shape.len()];
    let mut running = 1isize;
    for (stride, &dim) in strides.iter_mut().zip(shape.iter()).rev() {
        *stride = running;
        running = running.wrapping_mul(dim as isize);
    }
    strides.into_boxed_slice()
}

/// Whether `strides` are the row-major strides of `shape`.
pub fn is_row_major(shape: &[usize], strides: &[isize]) -> bool {
    shape.len() == strides.len() && *row_major_strides(shape) == *strides
}

/// Element offset of row-major position `flat` within a strided layout.
///
/// `flat` must be below the element count of `shape`.
pub fn strided_offset(shape: &[usize], strides: &[isize], flat: usize) -> isize {
    let mut remaining = flat;
    let mut offset = 0isize;
    for (&dim, &stride) in shape.iter().zip(strides).rev() {
        if dim == 0 {
            return 0;
        }
        offset = offset.wrapping_add(((remaining % dim) as isize).wrapping_mul(stride));
        remaining /= dim;
    }
    offset
}

/// Element count and byte size for `shape` with `element_size`-byte elements.
pub(crate) fn sizes(shape: &[usize], element_size: usize) -> BufferResult<(usize, usize)> {
    let overflow = || BufferError::SizeOverflow {
        shape: shape.to_vec(),
    };
    let length = element_count(shape).ok_or_else(overflow)?;
    let buffer_size = length.checked_mul(element_size).ok_or_else(overflow)?;
    if buffer_size > isize::MAX as usize {
        return Err(overflow());
    }
    Ok((length, buffer_size))
}

impl ArrayDescriptor {
    /// Recompute `element_size`, `length`, `buffer_size` and row-major
    /// strides from the descriptor's shape and element kind.
    ///
    /// This is the only mutation a descriptor sees after construction. Kernel
    /// code uses it for arrays whose shape is only known at run time, such
    /// as per-block shared arrays.
    pub fn initialize_layout(&mut self) -> BufferResult<()> {
        let shape = self.shape.as_deref().ok_or(BufferError::Released)?;
        let element_size = self.kind.size();
        let (length, buffer_size) = sizes(shape, element_size)?;
        let strides = row_major_strides(shape);

        self.rank = shape.len();
        self.element_size = element_size;
        self.length = length;
        self.buffer_size = buffer_size;
        self.strides = Some(strides);
        Ok(())
    }
}
