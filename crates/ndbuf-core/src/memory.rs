//! Memory spaces and their allocate/free entry points.
//!
//! Every [`MemoryLocation`] has its own allocate/free pair. The
//! [`MemorySystem`] dispatches to the right pair with a `match` on the
//! location tag and keeps per-space accounting so callers (and tests) can
//! observe that storage is released exactly once.
//!
//! ## Memory spaces
//!
//! - `Host`: the C heap (`calloc`/`free`), so generated C code may share it
//! - `PinnedHost`: page-aligned host allocations
//! - `Device`, `Managed`, `Shared`: accelerator spaces, served from host
//!   memory with the alignment each space guarantees on real hardware
//!
//! With the `cuda` feature, `Device`, `Managed` and `PinnedHost` go through
//! the CUDA driver instead. `Shared` is always served from
//! host memory; real shared memory is declared by kernel code.
//!
//! All spaces hand out zeroed memory.

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::OnceLock;

use tracing::debug;

use crate::config::MemoryConfig;
use crate::error::{BufferError, BufferResult};
use crate::location::MemoryLocation;

/// Alignment of page-locked host allocations.
pub const PINNED_ALIGN: usize = 4096;
/// Alignment of device global allocations.
pub const DEVICE_ALIGN: usize = 256;
/// Alignment of managed allocations.
pub const MANAGED_ALIGN: usize = 4096;
/// Alignment of shared-memory allocations.
pub const SHARED_ALIGN: usize = 16;
/// Alignment `calloc` guarantees for host heap allocations.
pub const HOST_ALIGN: usize = 16;

/// Snapshot of one memory space's accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpaceUsage {
    /// Bytes currently allocated
    pub live_bytes: usize,
    /// Allocations not yet released
    pub live_allocations: usize,
    /// Allocations served since the system was created
    pub total_allocations: u64,
}

#[derive(Debug, Default)]
struct SpaceCounters {
    live_bytes: AtomicUsize,
    live_allocations: AtomicUsize,
    total_allocations: AtomicU64,
}

impl SpaceCounters {
    fn snapshot(&self) -> SpaceUsage {
        SpaceUsage {
            live_bytes: self.live_bytes.load(Ordering::Acquire),
            live_allocations: self.live_allocations.load(Ordering::Acquire),
            total_allocations: self.total_allocations.load(Ordering::Relaxed),
        }
    }
}

/// Allocator front-end for every memory space.
#[derive(Debug)]
pub struct MemorySystem {
    config: MemoryConfig,
    counters: [SpaceCounters; 5],
}

impl Default for MemorySystem {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

static GLOBAL_MEMORY: OnceLock<MemorySystem> = OnceLock::new();

impl MemorySystem {
    /// Create a memory system with the given limits.
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            counters: Default::default(),
        }
    }

    /// The process-wide memory system used by the C ABI.
    ///
    /// Lazily initialized with the default configuration on first access.
    pub fn global() -> &'static MemorySystem {
        GLOBAL_MEMORY.get_or_init(MemorySystem::default)
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Accounting snapshot for one memory space.
    pub fn usage(&self, location: MemoryLocation) -> SpaceUsage {
        self.counters[location.index()].snapshot()
    }

    /// Allocate `size` zeroed bytes in `location`.
    pub fn allocate(&self, location: MemoryLocation, size: usize) -> BufferResult<NonNull<u8>> {
        self.reserve(location, size)?;

        let result = match location {
            MemoryLocation::Host => host_alloc(size),
            MemoryLocation::PinnedHost => pinned_alloc(size),
            MemoryLocation::Device => device_alloc(size),
            MemoryLocation::Managed => managed_alloc(size),
            MemoryLocation::Shared => shared_alloc(size),
        };

        match result {
            Ok(ptr) => {
                debug!(%location, size, ptr = ?ptr, "allocated storage");
                Ok(ptr)
            }
            Err(err) => {
                self.unreserve(location, size);
                Err(err)
            }
        }
    }

    /// Release storage obtained from [`MemorySystem::allocate`].
    ///
    /// # Safety
    /// `ptr` must come from `allocate` on this system with the same
    /// `location` and `size`, and must not have been released already.
    pub unsafe fn deallocate(&self, location: MemoryLocation, ptr: NonNull<u8>, size: usize) {
        match location {
            MemoryLocation::Host => host_free(ptr, size),
            MemoryLocation::PinnedHost => pinned_free(ptr, size),
            MemoryLocation::Device => device_free(ptr, size),
            MemoryLocation::Managed => managed_free(ptr, size),
            MemoryLocation::Shared => shared_free(ptr, size),
        }
        self.unreserve(location, size);
        debug!(%location, size, ptr = ?ptr, "released storage");
    }

    fn reserve(&self, location: MemoryLocation, size: usize) -> BufferResult<()> {
        let counters = &self.counters[location.index()];

        match self.config.capacity(location) {
            Some(capacity) => {
                let mut current = counters.live_bytes.load(Ordering::Acquire);
                loop {
                    let next = current
                        .checked_add(size)
                        .filter(|next| *next <= capacity)
                        .ok_or_else(|| {
                            BufferError::allocation_failed(
                                location,
                                size,
                                format!("capacity of {} bytes exhausted ({} in use)", capacity, current),
                            )
                        })?;
                    match counters.live_bytes.compare_exchange_weak(
                        current,
                        next,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => break,
                        Err(actual) => current = actual,
                    }
                }
            }
            None => {
                counters.live_bytes.fetch_add(size, Ordering::AcqRel);
            }
        }

        counters.live_allocations.fetch_add(1, Ordering::AcqRel);
        counters.total_allocations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn unreserve(&self, location: MemoryLocation, size: usize) {
        let counters = &self.counters[location.index()];
        counters.live_bytes.fetch_sub(size, Ordering::AcqRel);
        counters.live_allocations.fetch_sub(1, Ordering::AcqRel);
    }
}

// ============================================================================
// Per-space entry points
// ============================================================================

/// Non-null, aligned pointer handed out for zero-byte requests.
fn empty_allocation(align: usize) -> NonNull<u8> {
    // `align` is a non-zero power of two
    NonNull::new(align as *mut u8).unwrap_or(NonNull::dangling())
}

fn aligned_alloc(location: MemoryLocation, size: usize, align: usize) -> BufferResult<NonNull<u8>> {
    if size == 0 {
        return Ok(empty_allocation(align));
    }
    let layout = Layout::from_size_align(size, align)
        .map_err(|e| BufferError::allocation_failed(location, size, e.to_string()))?;
    // SAFETY: layout has a non-zero size
    let ptr = unsafe { alloc::alloc_zeroed(layout) };
    NonNull::new(ptr).ok_or_else(|| BufferError::allocation_failed(location, size, "out of memory"))
}

unsafe fn aligned_free(ptr: NonNull<u8>, size: usize, align: usize) {
    if size == 0 {
        return;
    }
    let layout = Layout::from_size_align_unchecked(size, align);
    alloc::dealloc(ptr.as_ptr(), layout);
}

fn host_alloc(size: usize) -> BufferResult<NonNull<u8>> {
    if size == 0 {
        return Ok(empty_allocation(HOST_ALIGN));
    }
    // SAFETY: calloc has no preconditions; a null return is handled below
    let ptr = unsafe { libc::calloc(1, size) } as *mut u8;
    NonNull::new(ptr)
        .ok_or_else(|| BufferError::allocation_failed(MemoryLocation::Host, size, "out of memory"))
}

unsafe fn host_free(ptr: NonNull<u8>, size: usize) {
    if size == 0 {
        return;
    }
    libc::free(ptr.as_ptr() as *mut libc::c_void);
}

#[cfg(not(feature = "cuda"))]
fn pinned_alloc(size: usize) -> BufferResult<NonNull<u8>> {
    aligned_alloc(MemoryLocation::PinnedHost, size, PINNED_ALIGN)
}

#[cfg(not(feature = "cuda"))]
unsafe fn pinned_free(ptr: NonNull<u8>, size: usize) {
    aligned_free(ptr, size, PINNED_ALIGN)
}

#[cfg(not(feature = "cuda"))]
fn device_alloc(size: usize) -> BufferResult<NonNull<u8>> {
    aligned_alloc(MemoryLocation::Device, size, DEVICE_ALIGN)
}

#[cfg(not(feature = "cuda"))]
unsafe fn device_free(ptr: NonNull<u8>, size: usize) {
    aligned_free(ptr, size, DEVICE_ALIGN)
}

#[cfg(not(feature = "cuda"))]
fn managed_alloc(size: usize) -> BufferResult<NonNull<u8>> {
    aligned_alloc(MemoryLocation::Managed, size, MANAGED_ALIGN)
}

#[cfg(not(feature = "cuda"))]
unsafe fn managed_free(ptr: NonNull<u8>, size: usize) {
    aligned_free(ptr, size, MANAGED_ALIGN)
}

#[cfg(feature = "cuda")]
fn pinned_alloc(size: usize) -> BufferResult<NonNull<u8>> {
    if size == 0 {
        return Ok(empty_allocation(PINNED_ALIGN));
    }
    cuda::pinned_alloc(size)
}

#[cfg(feature = "cuda")]
unsafe fn pinned_free(ptr: NonNull<u8>, size: usize) {
    if size > 0 {
        cuda::pinned_free(ptr);
    }
}

#[cfg(feature = "cuda")]
fn device_alloc(size: usize) -> BufferResult<NonNull<u8>> {
    if size == 0 {
        return Ok(empty_allocation(DEVICE_ALIGN));
    }
    cuda::device_alloc(size)
}

#[cfg(feature = "cuda")]
unsafe fn device_free(ptr: NonNull<u8>, size: usize) {
    if size > 0 {
        cuda::device_free(ptr);
    }
}

#[cfg(feature = "cuda")]
fn managed_alloc(size: usize) -> BufferResult<NonNull<u8>> {
    if size == 0 {
        return Ok(empty_allocation(MANAGED_ALIGN));
    }
    cuda::managed_alloc(size)
}

#[cfg(feature = "cuda")]
unsafe fn managed_free(ptr: NonNull<u8>, size: usize) {
    if size > 0 {
        cuda::managed_free(ptr);
    }
}

fn shared_alloc(size: usize) -> BufferResult<NonNull<u8>> {
    aligned_alloc(MemoryLocation::Shared, size, SHARED_ALIGN)
}

unsafe fn shared_free(ptr: NonNull<u8>, size: usize) {
    aligned_free(ptr, size, SHARED_ALIGN)
}

/// Accelerator memory served by the CUDA driver.
///
/// Device allocations are `CudaSlice`s kept alive in a registry keyed by
/// their device address until released. Managed and pinned allocations are
/// host addressable and come from the driver's raw allocation calls.
#[cfg(feature = "cuda")]
pub mod cuda {
    use std::collections::HashMap;
    use std::ffi::c_void;
    use std::ptr::NonNull;
    use std::sync::{Arc, OnceLock};

    use cudarc::driver::{result, sys, CudaDevice, CudaSlice, DevicePtr};
    use parking_lot::Mutex;
    use tracing::warn;

    use crate::error::{BufferError, BufferResult};
    use crate::location::MemoryLocation;

    /// Ordinal of the device all allocations are made on.
    pub const DEVICE_ORDINAL: usize = 0;

    static DEVICE: OnceLock<Arc<CudaDevice>> = OnceLock::new();
    static DEVICE_SLICES: OnceLock<Mutex<HashMap<usize, CudaSlice<u8>>>> = OnceLock::new();

    fn device_slices() -> &'static Mutex<HashMap<usize, CudaSlice<u8>>> {
        DEVICE_SLICES.get_or_init(|| Mutex::new(HashMap::new()))
    }

    /// The device handle, initialized on first use and bound to the
    /// calling thread.
    fn device(location: MemoryLocation, size: usize) -> BufferResult<Arc<CudaDevice>> {
        let failed = |e: cudarc::driver::DriverError| {
            BufferError::allocation_failed(location, size, format!("device {}: {}", DEVICE_ORDINAL, e))
        };
        let dev = match DEVICE.get() {
            Some(dev) => Arc::clone(dev),
            None => {
                let dev = CudaDevice::new(DEVICE_ORDINAL).map_err(failed)?;
                Arc::clone(DEVICE.get_or_init(|| dev))
            }
        };
        dev.bind_to_thread().map_err(failed)?;
        Ok(dev)
    }

    fn non_null(location: MemoryLocation, size: usize, address: usize) -> BufferResult<NonNull<u8>> {
        NonNull::new(address as *mut u8)
            .ok_or_else(|| BufferError::allocation_failed(location, size, "driver returned null"))
    }

    pub(super) fn device_alloc(size: usize) -> BufferResult<NonNull<u8>> {
        let location = MemoryLocation::Device;
        let slice = device(location, size)?
            .alloc_zeros::<u8>(size)
            .map_err(|e| BufferError::allocation_failed(location, size, format!("alloc_zeros: {}", e)))?;
        let address = *slice.device_ptr() as usize;
        let ptr = non_null(location, size, address)?;
        device_slices().lock().insert(address, slice);
        Ok(ptr)
    }

    pub(super) unsafe fn device_free(ptr: NonNull<u8>) {
        // Dropping the slice hands it back to the driver
        if device_slices().lock().remove(&(ptr.as_ptr() as usize)).is_none() {
            warn!(ptr = ?ptr, "device free of an address the driver never handed out");
        }
    }

    pub(super) fn managed_alloc(size: usize) -> BufferResult<NonNull<u8>> {
        let location = MemoryLocation::Managed;
        device(location, size)?;
        // SAFETY: a context is bound to this thread by `device`
        let address = unsafe {
            result::malloc_managed(size, sys::CUmemAttach_flags::CU_MEM_ATTACH_GLOBAL)
        }
        .map_err(|e| BufferError::allocation_failed(location, size, format!("malloc_managed: {}", e)))?;
        let ptr = non_null(location, size, address as usize)?;
        // SAFETY: managed memory is host addressable for `size` bytes
        unsafe { ptr.as_ptr().write_bytes(0, size) };
        Ok(ptr)
    }

    pub(super) unsafe fn managed_free(ptr: NonNull<u8>) {
        if let Err(err) = result::free_sync(ptr.as_ptr() as sys::CUdeviceptr) {
            warn!(ptr = ?ptr, error = %err, "managed free failed");
        }
    }

    pub(super) fn pinned_alloc(size: usize) -> BufferResult<NonNull<u8>> {
        let location = MemoryLocation::PinnedHost;
        device(location, size)?;
        // SAFETY: a context is bound to this thread by `device`
        let host = unsafe { result::malloc_host(size, 0) }
            .map_err(|e| BufferError::allocation_failed(location, size, format!("malloc_host: {}", e)))?;
        let ptr = non_null(location, size, host as usize)?;
        // SAFETY: the driver returned `size` bytes of page-locked host memory
        unsafe { ptr.as_ptr().write_bytes(0, size) };
        Ok(ptr)
    }

    pub(super) unsafe fn pinned_free(ptr: NonNull<u8>) {
        if let Err(err) = result::free_host(ptr.as_ptr() as *mut c_void) {
            warn!(ptr = ?ptr, error = %err, "pinned free failed");
        }
    }
}
