//! ndbuf Runtime - Kernel execution and C ABI for ndbuf descriptors
//!
//! This crate provides what generated accelerator code links against:
//! - `KernelPool` - work-stealing pool running elementwise kernel launches
//! - `KernelLaunch` - handle for awaiting one launch
//! - `fill` / `arange` - elementwise initialization of (possibly strided)
//!   descriptors
//! - `runtime_ffi` - `extern "C"` entry points for creating, slicing,
//!   releasing and initializing descriptors
//!
//! # Synchronization
//!
//! Kernel launches are asynchronous. Host code may only read storage written
//! by a launch after waiting on it or after `KernelPool::synchronize`
//! (`ndbuf_device_synchronize` at the C ABI).

pub mod error;
pub mod kernels;
pub mod pool;
pub mod runtime_ffi;

pub use error::{KernelError, KernelResult};
pub use kernels::{arange, fill, launch_arange, launch_fill};
pub use pool::{global_pool, KernelLaunch, KernelPool};

use tracing::warn;

/// Environment variable overriding the number of kernel workers.
pub const WORKERS_ENV: &str = "NDBUF_WORKERS";

/// Default number of elements handled by one chunk of a kernel launch.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Configuration for the kernel runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Number of kernel worker threads
    pub workers: usize,
    /// Name prefix for worker threads
    pub thread_name_prefix: String,
    /// Stack size for worker threads (bytes)
    pub stack_size: Option<usize>,
    /// Elements per chunk of a kernel launch
    pub chunk_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            thread_name_prefix: "ndbuf-kernel".to_string(),
            stack_size: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl RuntimeConfig {
    /// Create a new runtime configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Default configuration with the worker count taken from
    /// `NDBUF_WORKERS` when it holds a positive integer.
    pub fn from_env() -> Self {
        let config = Self::default();
        match std::env::var(WORKERS_ENV) {
            Ok(value) => match value.trim().parse::<usize>() {
                Ok(workers) if workers > 0 => config.with_workers(workers),
                _ => {
                    warn!(value = %value, "ignoring invalid {}", WORKERS_ENV);
                    config
                }
            },
            Err(_) => config,
        }
    }

    /// Set the number of worker threads.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the thread name prefix.
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set the stack size for worker threads.
    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Set the number of elements per chunk.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}
