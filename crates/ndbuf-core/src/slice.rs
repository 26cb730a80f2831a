//! View/slicing engine.
//!
//! A view is derived from a source descriptor by applying one selector per
//! source dimension:
//!
//! - `Selector::Range { start, end, step }` keeps the dimension with
//!   `ceil((end - start) / step)` entries and stride `source_stride * step`
//! - `Selector::Index(i)` fixes the dimension at `i` and removes it from the
//!   view
//!
//! Every selector adds `start * source_stride` to the view's starting offset.
//! No element data is copied. Selector values are a caller precondition: an
//! out-of-range selector yields a view that points outside the storage, and
//! the offset arithmetic wraps rather than traps. Such a view is rejected by
//! [`ArrayDescriptor::check_bounds`] before any element access.

use std::ptr::NonNull;

use tracing::trace;

use crate::descriptor::{ArrayDescriptor, Ownership};
use crate::error::{BufferError, BufferResult};
use crate::layout;

/// Per-dimension selection applied by [`ArrayDescriptor::slice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    /// Keep positions `start, start + step, ...` below `end` (above `end`
    /// for negative steps)
    Range {
        start: isize,
        end: isize,
        step: isize,
    },
    /// Select one position and drop the dimension
    Index(isize),
}

impl Selector {
    /// Unit-step range `start..end`.
    pub fn range(start: isize, end: isize) -> Self {
        Selector::Range { start, end, step: 1 }
    }

    /// Strided range.
    pub fn range_step(start: isize, end: isize, step: isize) -> Self {
        Selector::Range { start, end, step }
    }

    /// Whole dimension of extent `dim`.
    pub fn full(dim: usize) -> Self {
        Selector::range(0, dim as isize)
    }

    pub fn index(position: isize) -> Self {
        Selector::Index(position)
    }

    pub fn is_range(&self) -> bool {
        matches!(self, Selector::Range { .. })
    }

    /// First selected position.
    pub fn start(&self) -> isize {
        match *self {
            Selector::Range { start, .. } => start,
            Selector::Index(position) => position,
        }
    }
}

/// Number of positions selected by a range, `ceil((end - start) / step)`.
///
/// Empty ranges and a zero step select nothing.
pub fn range_extent(start: isize, end: isize, step: isize) -> usize {
    let span = match step {
        s if s > 0 => end.wrapping_sub(start),
        s if s < 0 => start.wrapping_sub(end),
        _ => return 0,
    };
    if span <= 0 {
        return 0;
    }
    let (span, step) = (span as usize, step.unsigned_abs());
    span / step + usize::from(span % step != 0)
}

impl ArrayDescriptor {
    /// Derive a view aliasing this descriptor's storage.
    ///
    /// Dimensions without a selector are kept whole. The view's rank is the
    /// number of range selectors plus the number of unselected dimensions.
    pub fn slice(&self, selectors: &[Selector]) -> BufferResult<ArrayDescriptor> {
        let (source_shape, source_strides) = match (&self.shape, &self.strides) {
            (Some(shape), Some(strides)) => (shape, strides),
            _ => return Err(BufferError::Released),
        };
        if selectors.len() > self.rank {
            return Err(BufferError::TooManySelectors {
                rank: self.rank,
                selectors: selectors.len(),
            });
        }

        let mut shape = Vec::with_capacity(self.rank);
        let mut strides = Vec::with_capacity(self.rank);
        let mut start_offset = 0isize;

        for (dim, &source_stride) in source_strides.iter().enumerate() {
            match selectors.get(dim) {
                Some(&Selector::Range { start, end, step }) => {
                    shape.push(range_extent(start, end, step));
                    strides.push(source_stride.wrapping_mul(step));
                    start_offset = start_offset.wrapping_add(start.wrapping_mul(source_stride));
                }
                Some(&Selector::Index(position)) => {
                    start_offset = start_offset.wrapping_add(position.wrapping_mul(source_stride));
                }
                None => {
                    shape.push(source_shape[dim]);
                    strides.push(source_stride);
                }
            }
        }

        let (length, buffer_size) = layout::sizes(&shape, self.element_size)?;
        let byte_offset = start_offset.wrapping_mul(self.element_size as isize);
        let raw_data = self
            .raw_data
            .and_then(|ptr| NonNull::new(ptr.as_ptr().wrapping_offset(byte_offset)));

        trace!(
            source_rank = self.rank,
            view_shape = ?shape,
            view_strides = ?strides,
            start_offset,
            "derived view"
        );

        Ok(ArrayDescriptor {
            rank: shape.len(),
            shape: Some(shape.into_boxed_slice()),
            strides: Some(strides.into_boxed_slice()),
            kind: self.kind,
            element_size: self.element_size,
            length,
            buffer_size,
            raw_data,
            allocation: self.allocation,
            ownership: Ownership::VIEW,
            location: self.location,
        })
    }

    /// Derive a view and check that it has `requested_rank` dimensions.
    ///
    /// Generated code states the rank it expects; a disagreement with the
    /// selectors is a code-generation defect.
    pub fn slice_with_rank(
        &self,
        requested_rank: usize,
        selectors: &[Selector],
    ) -> BufferResult<ArrayDescriptor> {
        let unselected = self.rank.saturating_sub(selectors.len());
        let actual = selectors.iter().filter(|s| s.is_range()).count() + unselected;
        if actual != requested_rank {
            return Err(BufferError::RankMismatch {
                requested: requested_rank,
                actual,
            });
        }
        self.slice(selectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::ElementKind;
    use crate::location::MemoryLocation;
    use pretty_assertions::assert_eq;

    fn unbound(shape: &[usize]) -> ArrayDescriptor {
        ArrayDescriptor::unbound(shape, ElementKind::Float32, MemoryLocation::Host, Ownership::VIEW)
            .unwrap()
    }

    #[test]
    fn test_range_extent() {
        assert_eq!(range_extent(1, 3, 1), 2);
        assert_eq!(range_extent(0, 6, 2), 3);
        assert_eq!(range_extent(0, 7, 2), 4);
        assert_eq!(range_extent(5, 5, 1), 0);
        assert_eq!(range_extent(5, 2, 1), 0);
        assert_eq!(range_extent(5, 0, -2), 3);
        assert_eq!(range_extent(0, 5, 0), 0);
    }

    #[test]
    fn test_range_extent_extreme_values() {
        assert_eq!(range_extent(0, -4, isize::MIN), 1);
        assert_eq!(range_extent(0, isize::MAX, isize::MAX), 1);
        assert_eq!(range_extent(0, isize::MAX, 1), isize::MAX as usize);
        assert_eq!(range_extent(0, isize::MIN, 1), 0);
        // The span wraps; the result is meaningless but computed
        assert_eq!(range_extent(isize::MIN, isize::MAX, 1), 0);
    }

    #[test]
    fn test_extreme_selectors_do_not_trap() {
        let source = unbound(&[4, 4]);
        let view = source
            .slice(&[
                Selector::range_step(isize::MAX, 0, isize::MIN),
                Selector::index(isize::MIN),
            ])
            .unwrap();
        assert_eq!(view.shape(), &[1]);
        assert_eq!(view.strides(), &[4isize.wrapping_mul(isize::MIN)]);

        let err = source
            .slice(&[Selector::range(0, isize::MAX), Selector::full(4)])
            .unwrap_err();
        assert!(matches!(err, BufferError::SizeOverflow { .. }));
    }

    #[test]
    fn test_slice_metadata() {
        let source = unbound(&[4, 6]);
        let view = source
            .slice(&[Selector::range(1, 3), Selector::range_step(0, 6, 2)])
            .unwrap();

        assert_eq!(view.rank(), 2);
        assert_eq!(view.shape(), &[2, 3]);
        assert_eq!(view.strides(), &[6, 2]);
        assert_eq!(view.length(), 6);
        assert_eq!(view.buffer_size(), 24);
        assert!(view.is_view());
        assert!(!view.is_contiguous());
    }

    #[test]
    fn test_missing_selectors_keep_dimension() {
        let source = unbound(&[2, 3, 4]);
        let view = source.slice(&[Selector::index(1)]).unwrap();
        assert_eq!(view.shape(), &[3, 4]);
        assert_eq!(view.strides(), &[4, 1]);
    }

    #[test]
    fn test_too_many_selectors() {
        let source = unbound(&[3]);
        let err = source
            .slice(&[Selector::full(3), Selector::full(3)])
            .unwrap_err();
        assert_eq!(err, BufferError::TooManySelectors { rank: 1, selectors: 2 });
    }

    #[test]
    fn test_slice_with_rank_mismatch() {
        let source = unbound(&[3, 3]);
        let err = source
            .slice_with_rank(2, &[Selector::index(0), Selector::full(3)])
            .unwrap_err();
        assert_eq!(err, BufferError::RankMismatch { requested: 2, actual: 1 });
    }

    #[test]
    fn test_negative_step_stride() {
        let source = unbound(&[6]);
        let view = source.slice(&[Selector::range_step(5, -1, -1)]).unwrap();
        assert_eq!(view.shape(), &[6]);
        assert_eq!(view.strides(), &[-1]);
    }
}
