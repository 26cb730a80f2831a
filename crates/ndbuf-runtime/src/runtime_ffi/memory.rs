//! Descriptor creation, release and accessors for generated code
//!
//! All storage goes through the process-wide [`MemorySystem`]. Release
//! entry points return `1` when something was freed and `0` when there was
//! nothing to free, so generated code may call them more than once.

use std::ptr::{self, NonNull};
use std::slice;

use ndbuf_core::{
    ArrayDescriptor, BufferError, BufferResult, ElementKind, MemoryLocation, MemorySystem,
};
use tracing::warn;

use super::panic::fatal;
use super::{descriptor_ref, into_handle};

/// Read a C shape array.
///
/// # Safety
/// `shape` must point to `nd` readable values when `nd > 0`.
unsafe fn read_shape(nd: i32, shape: *const i64, caller: &str) -> BufferResult<Vec<usize>> {
    if nd < 0 {
        fatal(&format!("{}: negative rank {}", caller, nd));
    }
    if nd == 0 {
        return Ok(Vec::new());
    }
    if shape.is_null() {
        fatal(&format!("{}: null shape for rank {}", caller, nd));
    }
    slice::from_raw_parts(shape, nd as usize)
        .iter()
        .enumerate()
        .map(|(dim, &extent)| {
            usize::try_from(extent).map_err(|_| BufferError::NegativeExtent { dim, extent })
        })
        .collect()
}

unsafe fn create(
    nd: i32,
    shape: *const i64,
    kind: i32,
    is_view: bool,
    location: i32,
    caller: &str,
) -> BufferResult<ArrayDescriptor> {
    let kind = ElementKind::from_tag(kind)?;
    let location = MemoryLocation::from_tag(location)?;
    let shape = read_shape(nd, shape, caller)?;
    MemorySystem::global().create_buffer(&shape, kind, is_view, location)
}

/// Create a descriptor of rank `nd`.
///
/// With `is_view` the descriptor gets no storage and must be pointed at a
/// buffer with `ndbuf_array_bind_alias`. Any failure, including an
/// exhausted memory space, terminates the program.
///
/// # Safety
/// `shape` must point to `nd` extents. The returned handle must be passed to
/// `ndbuf_array_destroy` exactly once.
#[no_mangle]
pub unsafe extern "C" fn ndbuf_array_create(
    nd: i32,
    shape: *const i64,
    kind: i32,
    is_view: bool,
    location: i32,
) -> *mut ArrayDescriptor {
    match create(nd, shape, kind, is_view, location, "ndbuf_array_create") {
        Ok(descriptor) => into_handle(descriptor),
        Err(err) => fatal(&format!("ndbuf_array_create: {}", err)),
    }
}

/// Like `ndbuf_array_create`, but returns null when the memory space cannot
/// satisfy the request.
///
/// Invalid tags or shapes still terminate the program.
///
/// # Safety
/// Same contract as `ndbuf_array_create`.
#[no_mangle]
pub unsafe extern "C" fn ndbuf_try_array_create(
    nd: i32,
    shape: *const i64,
    kind: i32,
    is_view: bool,
    location: i32,
) -> *mut ArrayDescriptor {
    match create(nd, shape, kind, is_view, location, "ndbuf_try_array_create") {
        Ok(descriptor) => into_handle(descriptor),
        Err(err) if !err.is_caller_defect() => {
            warn!(error = %err, "array allocation failed");
            ptr::null_mut()
        }
        Err(err) => fatal(&format!("ndbuf_try_array_create: {}", err)),
    }
}

/// Create a descriptor over storage managed by the caller, such as a
/// block's shared-memory array. Releasing it never frees `data`.
///
/// # Safety
/// `shape` must point to `nd` extents; `data` must be valid for the
/// resulting buffer size for as long as the descriptor is used.
#[no_mangle]
pub unsafe extern "C" fn ndbuf_array_create_borrowed(
    nd: i32,
    shape: *const i64,
    kind: i32,
    location: i32,
    data: *mut u8,
) -> *mut ArrayDescriptor {
    let caller = "ndbuf_array_create_borrowed";
    let Some(storage) = NonNull::new(data) else {
        fatal(&format!("{}: null storage", caller));
    };
    let result = ElementKind::from_tag(kind).and_then(|kind| {
        let location = MemoryLocation::from_tag(location)?;
        let shape = read_shape(nd, shape, caller)?;
        ArrayDescriptor::create_borrowed(&shape, kind, location, storage)
    });
    match result {
        Ok(descriptor) => into_handle(descriptor),
        Err(err) => fatal(&format!("{}: {}", caller, err)),
    }
}

/// Point a storage-less view at the storage of `source`.
///
/// # Safety
/// Both handles must be live descriptors from this runtime.
#[no_mangle]
pub unsafe extern "C" fn ndbuf_array_bind_alias(
    target: *mut ArrayDescriptor,
    source: *const ArrayDescriptor,
) {
    let source = descriptor_ref(source, "ndbuf_array_bind_alias");
    let Some(target) = target.as_mut() else {
        fatal("ndbuf_array_bind_alias: null array handle");
    };
    if let Err(err) = target.bind_alias(source) {
        fatal(&format!("ndbuf_array_bind_alias: {}", err));
    }
}

/// Release everything the descriptor owns: storage and metadata for an
/// owning buffer, metadata only for a view.
///
/// # Safety
/// `arr` must be null or a live handle from this runtime.
#[no_mangle]
pub unsafe extern "C" fn ndbuf_free(arr: *mut ArrayDescriptor) -> i32 {
    match arr.as_mut() {
        Some(descriptor) => MemorySystem::global().release(descriptor).code(),
        None => 0,
    }
}

/// Release the storage of an owning descriptor through the free call of its
/// memory space.
///
/// # Safety
/// `arr` must be null or a live handle from this runtime.
#[no_mangle]
pub unsafe extern "C" fn ndbuf_free_array(arr: *mut ArrayDescriptor) -> i32 {
    match arr.as_mut() {
        Some(descriptor) => MemorySystem::global().release_storage(descriptor).code(),
        None => 0,
    }
}

/// Release the storage of a host-resident owning descriptor.
///
/// Returns `-1` without freeing anything if the storage lives in another
/// memory space.
///
/// # Safety
/// `arr` must be null or a live handle from this runtime.
#[no_mangle]
pub unsafe extern "C" fn ndbuf_free_host(arr: *mut ArrayDescriptor) -> i32 {
    let Some(descriptor) = arr.as_mut() else {
        return 0;
    };
    match MemorySystem::global().release_host_storage(descriptor) {
        Ok(status) => status.code(),
        Err(err) => {
            warn!(error = %err, "ndbuf_free_host rejected");
            -1
        }
    }
}

/// Release the shape/stride arrays of a view.
///
/// # Safety
/// `arr` must be null or a live handle from this runtime.
#[no_mangle]
pub unsafe extern "C" fn ndbuf_free_pointer(arr: *mut ArrayDescriptor) -> i32 {
    match arr.as_mut() {
        Some(descriptor) => descriptor.release_metadata().code(),
        None => 0,
    }
}

/// Release whatever the descriptor still owns and free the handle itself.
///
/// # Safety
/// `arr` must be null or a live handle from this runtime; it is invalid
/// afterwards.
#[no_mangle]
pub unsafe extern "C" fn ndbuf_array_destroy(arr: *mut ArrayDescriptor) {
    if arr.is_null() {
        return;
    }
    let mut descriptor = Box::from_raw(arr);
    MemorySystem::global().release(&mut descriptor);
}

// ============================================================================
// Accessors
// ============================================================================

// Extents and strides cross the ABI as `int64_t`, the type
// `ndbuf_array_create` reads shapes in; the descriptor's arrays are handed
// out in place, which needs word-sized integers of the same width.
const _: () = assert!(std::mem::size_of::<usize>() == std::mem::size_of::<i64>());
const _: () = assert!(std::mem::size_of::<isize>() == std::mem::size_of::<i64>());

/// # Safety
/// `arr` must be a live handle from this runtime.
#[no_mangle]
pub unsafe extern "C" fn ndbuf_array_rank(arr: *const ArrayDescriptor) -> i32 {
    descriptor_ref(arr, "ndbuf_array_rank").rank() as i32
}

/// Shape array of `rank` extents, or null once the metadata has been
/// released.
///
/// # Safety
/// `arr` must be a live handle from this runtime.
#[no_mangle]
pub unsafe extern "C" fn ndbuf_array_shape(arr: *const ArrayDescriptor) -> *const i64 {
    let descriptor = descriptor_ref(arr, "ndbuf_array_shape");
    if descriptor.has_metadata() {
        // Extents never exceed `isize::MAX`, so they read back unchanged
        descriptor.shape().as_ptr() as *const i64
    } else {
        ptr::null()
    }
}

/// Stride array (in elements), or null once the metadata has been released.
///
/// # Safety
/// `arr` must be a live handle from this runtime.
#[no_mangle]
pub unsafe extern "C" fn ndbuf_array_strides(arr: *const ArrayDescriptor) -> *const i64 {
    let descriptor = descriptor_ref(arr, "ndbuf_array_strides");
    if descriptor.has_metadata() {
        descriptor.strides().as_ptr() as *const i64
    } else {
        ptr::null()
    }
}

/// # Safety
/// `arr` must be a live handle from this runtime.
#[no_mangle]
pub unsafe extern "C" fn ndbuf_array_length(arr: *const ArrayDescriptor) -> usize {
    descriptor_ref(arr, "ndbuf_array_length").length()
}

/// # Safety
/// `arr` must be a live handle from this runtime.
#[no_mangle]
pub unsafe extern "C" fn ndbuf_array_buffer_size(arr: *const ArrayDescriptor) -> usize {
    descriptor_ref(arr, "ndbuf_array_buffer_size").buffer_size()
}

/// Start of the descriptor's elements, or null if it has no storage.
///
/// # Safety
/// `arr` must be a live handle from this runtime.
#[no_mangle]
pub unsafe extern "C" fn ndbuf_array_data(arr: *const ArrayDescriptor) -> *mut u8 {
    descriptor_ref(arr, "ndbuf_array_data").raw_data()
}

/// # Safety
/// `arr` must be a live handle from this runtime.
#[no_mangle]
pub unsafe extern "C" fn ndbuf_array_is_view(arr: *const ArrayDescriptor) -> bool {
    descriptor_ref(arr, "ndbuf_array_is_view").is_view()
}

/// # Safety
/// `arr` must be a live handle from this runtime.
#[no_mangle]
pub unsafe extern "C" fn ndbuf_array_location(arr: *const ArrayDescriptor) -> i32 {
    descriptor_ref(arr, "ndbuf_array_location").location().tag()
}

/// # Safety
/// `arr` must be a live handle from this runtime.
#[no_mangle]
pub unsafe extern "C" fn ndbuf_array_kind(arr: *const ArrayDescriptor) -> i32 {
    descriptor_ref(arr, "ndbuf_array_kind").element_kind().tag()
}
