//! Elementwise initialization kernels.
//!
//! `fill` writes one value to every element of a descriptor and `arange`
//! writes `start + i` to its `i`-th element in row-major order. Both treat
//! each element as an independent task, so they work unchanged on strided
//! views and touch only the view's elements.

use std::sync::Arc;

use ndbuf_core::{strided_offset, ArrayDescriptor, ArrayElement, BufferError};
use tracing::debug;

use crate::error::KernelResult;
use crate::pool::{KernelLaunch, KernelPool};

/// Raw element pointer handed to worker threads.
#[derive(Clone, Copy)]
struct SendPtr<T>(*mut T);

// SAFETY: chunks of one launch write disjoint elements, and the launcher
// guarantees the storage outlives the launch.
unsafe impl<T> Send for SendPtr<T> {}
unsafe impl<T> Sync for SendPtr<T> {}

/// Layout of the descriptor a kernel writes to, detached from the
/// descriptor so chunks can own it.
struct KernelTarget<T> {
    base: SendPtr<T>,
    shape: Arc<[usize]>,
    strides: Arc<[isize]>,
    contiguous: bool,
    length: usize,
}

impl<T: ArrayElement> KernelTarget<T> {
    fn new(descriptor: &ArrayDescriptor) -> KernelResult<Self> {
        if descriptor.element_kind() != T::KIND {
            return Err(BufferError::ElementMismatch {
                expected: descriptor.element_kind(),
                requested: T::KIND,
            }
            .into());
        }
        if !descriptor.location().is_process_addressable() {
            return Err(BufferError::NotHostAccessible {
                location: descriptor.location(),
            }
            .into());
        }
        descriptor.check_bounds()?;
        let base = match descriptor.data_ptr() {
            Some(ptr) => ptr.as_ptr() as *mut T,
            None => return Err(BufferError::Released.into()),
        };
        Ok(Self {
            base: SendPtr(base),
            shape: descriptor.shape().into(),
            strides: descriptor.strides().into(),
            contiguous: descriptor.is_contiguous(),
            length: descriptor.length(),
        })
    }

    /// # Safety
    /// `flat` must be below `length` and the storage must still be alive.
    unsafe fn write(&self, flat: usize, value: T) {
        let offset = if self.contiguous {
            flat as isize
        } else {
            strided_offset(&self.shape, &self.strides, flat)
        };
        self.base.0.offset(offset).write_unaligned(value);
    }
}

fn launch_elementwise<T, F>(
    pool: &KernelPool,
    descriptor: &ArrayDescriptor,
    value_at: F,
) -> KernelResult<KernelLaunch>
where
    T: ArrayElement,
    F: Fn(usize) -> T + Send + Sync + 'static,
{
    let target = KernelTarget::<T>::new(descriptor)?;
    debug!(
        kind = %T::KIND,
        location = %descriptor.location(),
        length = target.length,
        contiguous = target.contiguous,
        "launching elementwise kernel"
    );

    let elements = target.length;
    Ok(pool.launch(elements, pool.chunk_size(), move |range| {
        for flat in range {
            // SAFETY: the pool only hands out indices below `elements`
            unsafe { target.write(flat, value_at(flat)) };
        }
    }))
}

/// Launch a kernel writing `value` to every element of `descriptor`.
///
/// # Safety
/// The descriptor's storage must stay allocated, and must not be accessed by
/// anyone else, until the returned launch has completed.
pub unsafe fn launch_fill<T: ArrayElement>(
    pool: &KernelPool,
    descriptor: &ArrayDescriptor,
    value: T,
) -> KernelResult<KernelLaunch> {
    launch_elementwise(pool, descriptor, move |_| value)
}

/// Launch a kernel writing `start + i` to the `i`-th element of
/// `descriptor`, counting in row-major order.
///
/// Values are converted to the element type like a C cast.
///
/// # Safety
/// Same contract as [`launch_fill`].
pub unsafe fn launch_arange<T: ArrayElement>(
    pool: &KernelPool,
    descriptor: &ArrayDescriptor,
    start: i64,
) -> KernelResult<KernelLaunch> {
    launch_elementwise(pool, descriptor, move |flat| {
        T::from_i64(start.wrapping_add(flat as i64))
    })
}

/// Write `value` to every element of `descriptor` and wait for completion.
pub fn fill<T: ArrayElement>(
    pool: &KernelPool,
    descriptor: &ArrayDescriptor,
    value: T,
) -> KernelResult<()> {
    // SAFETY: the launch is awaited while `descriptor` is borrowed
    let launch = unsafe { launch_fill(pool, descriptor, value)? };
    launch.wait()
}

/// Write `start + i` to every element of `descriptor` and wait for
/// completion.
pub fn arange<T: ArrayElement>(
    pool: &KernelPool,
    descriptor: &ArrayDescriptor,
    start: i64,
) -> KernelResult<()> {
    // SAFETY: the launch is awaited while `descriptor` is borrowed
    let launch = unsafe { launch_arange::<T>(pool, descriptor, start)? };
    launch.wait()
}
