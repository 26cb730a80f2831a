//! Elementwise initialization entry points for generated code
//!
//! Launches run asynchronously on the global kernel pool; generated code
//! calls `ndbuf_device_synchronize` before the host touches the results.

use ndbuf_core::ArrayDescriptor;
use tracing::error;

use super::descriptor_ref;
use super::panic::fatal;
use crate::kernels::{launch_arange, launch_fill};
use crate::pool::global_pool;

macro_rules! elementwise_entry_points {
    ($($fill:ident, $arange:ident => $ty:ty),* $(,)?) => {
        $(
            /// Launch a fill of every element of `arr`.
            ///
            /// # Safety
            /// `arr` must be a live handle whose storage stays allocated
            /// until the next `ndbuf_device_synchronize`.
            #[no_mangle]
            pub unsafe extern "C" fn $fill(arr: *const ArrayDescriptor, value: $ty) {
                let descriptor = descriptor_ref(arr, stringify!($fill));
                if let Err(err) = launch_fill(global_pool(), descriptor, value) {
                    fatal(&format!("{}: {}", stringify!($fill), err));
                }
            }

            /// Launch a write of `start + i` to the `i`-th element of `arr`.
            ///
            /// # Safety
            /// Same contract as the matching fill entry point.
            #[no_mangle]
            pub unsafe extern "C" fn $arange(arr: *const ArrayDescriptor, start: i64) {
                let descriptor = descriptor_ref(arr, stringify!($arange));
                if let Err(err) = launch_arange::<$ty>(global_pool(), descriptor, start) {
                    fatal(&format!("{}: {}", stringify!($arange), err));
                }
            }
        )*
    };
}

elementwise_entry_points!(
    ndbuf_array_fill_int8, ndbuf_array_arange_int8 => i8,
    ndbuf_array_fill_int32, ndbuf_array_arange_int32 => i32,
    ndbuf_array_fill_int64, ndbuf_array_arange_int64 => i64,
    ndbuf_array_fill_double, ndbuf_array_arange_double => f64,
);

/// Wait for every kernel launched so far.
///
/// Returns `0` on success and `-1` if a launch failed since the previous
/// synchronization.
#[no_mangle]
pub extern "C" fn ndbuf_device_synchronize() -> i32 {
    match global_pool().synchronize() {
        Ok(()) => 0,
        Err(err) => {
            error!(error = %err, "kernel launch failed");
            -1
        }
    }
}
