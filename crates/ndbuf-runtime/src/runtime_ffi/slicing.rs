//! View derivation for generated code

use std::slice;

use ndbuf_core::{ArrayDescriptor, Selector};
use tracing::trace;

use super::panic::fatal;
use super::{descriptor_ref, into_handle};

/// `NdSlice::kind` of a range selector.
pub const NDSLICE_RANGE: i32 = 0;
/// `NdSlice::kind` of a single-position selector.
pub const NDSLICE_ELEMENT: i32 = 1;

/// One selector as passed by generated code.
///
/// For `NDSLICE_ELEMENT` only `start` is meaningful.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdSlice {
    pub start: i64,
    pub end: i64,
    pub step: i64,
    pub kind: i32,
}

impl NdSlice {
    /// Convert to a [`Selector`], or `None` for an unknown kind.
    pub fn to_selector(&self) -> Option<Selector> {
        match self.kind {
            NDSLICE_RANGE => Some(Selector::range_step(
                self.start as isize,
                self.end as isize,
                self.step as isize,
            )),
            NDSLICE_ELEMENT => Some(Selector::index(self.start as isize)),
            _ => None,
        }
    }
}

/// Build a selector value.
#[no_mangle]
pub extern "C" fn ndbuf_new_slice(start: i64, end: i64, step: i64, kind: i32) -> NdSlice {
    NdSlice {
        start,
        end,
        step,
        kind,
    }
}

/// Derive a rank-`nd` view of `arr` from `count` selectors.
///
/// The view aliases `arr`'s storage and must be destroyed with
/// `ndbuf_array_destroy` before that storage is released. Structural
/// errors (unknown selector kind, too many selectors, `nd` not matching the
/// range selectors) terminate the program.
///
/// # Safety
/// `arr` must be a live handle from this runtime and `slices` must point to
/// `count` selectors.
#[no_mangle]
pub unsafe extern "C" fn ndbuf_array_slicing(
    arr: *const ArrayDescriptor,
    nd: i32,
    slices: *const NdSlice,
    count: usize,
) -> *mut ArrayDescriptor {
    let source = descriptor_ref(arr, "ndbuf_array_slicing");
    if nd < 0 {
        fatal(&format!("ndbuf_array_slicing: negative rank {}", nd));
    }
    let raw = if count == 0 {
        &[][..]
    } else if slices.is_null() {
        fatal("ndbuf_array_slicing: null selector array");
    } else {
        slice::from_raw_parts(slices, count)
    };

    let mut selectors = Vec::with_capacity(raw.len());
    for (dim, nd_slice) in raw.iter().enumerate() {
        match nd_slice.to_selector() {
            Some(selector) => selectors.push(selector),
            None => fatal(&format!(
                "ndbuf_array_slicing: unknown selector kind {} for dimension {}",
                nd_slice.kind, dim
            )),
        }
    }
    trace!(nd, selectors = ?selectors, "ndbuf_array_slicing");

    match source.slice_with_rank(nd as usize, &selectors) {
        Ok(view) => into_handle(view),
        Err(err) => fatal(&format!("ndbuf_array_slicing: {}", err)),
    }
}
