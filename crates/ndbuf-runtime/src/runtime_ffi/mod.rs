//! C ABI used by generated code
//!
//! Descriptors cross the ABI as opaque `*mut ArrayDescriptor` handles. A
//! handle stays valid after its descriptor has been released and is freed
//! with `ndbuf_array_destroy`. Codegen defects (invalid tags, malformed
//! selectors, null handles where one is required) terminate the program
//! through `ndbuf_panic`.

pub mod kernels;
pub mod memory;
pub mod panic;
pub mod slicing;

pub use kernels::*;
pub use memory::*;
pub use panic::*;
pub use slicing::*;

use ndbuf_core::ArrayDescriptor;

use self::panic::fatal;

/// Borrow the descriptor behind a handle, terminating on null.
///
/// # Safety
/// A non-null `handle` must come from this runtime and not be destroyed.
pub(crate) unsafe fn descriptor_ref<'a>(handle: *const ArrayDescriptor, caller: &str) -> &'a ArrayDescriptor {
    match handle.as_ref() {
        Some(descriptor) => descriptor,
        None => fatal(&format!("{}: null array handle", caller)),
    }
}

/// Hand a descriptor to C code.
pub(crate) fn into_handle(descriptor: ArrayDescriptor) -> *mut ArrayDescriptor {
    Box::into_raw(Box::new(descriptor))
}
