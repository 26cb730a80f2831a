//! Kernel pool for elementwise accelerator work.
//!
//! A kernel launch splits `elements` logical per-element tasks into chunks
//! and runs them on a work-stealing pool. Launches complete asynchronously:
//! callers observe their effects only after [`KernelLaunch::wait`] or
//! [`KernelPool::synchronize`].
//!
//! # Design
//!
//! - Fixed number of worker threads (from [`RuntimeConfig`])
//! - Global injector queue with per-worker local queues and stealing
//! - A panicking chunk fails its launch, never the worker
//! - Graceful shutdown on drop: queued chunks finish before workers exit
//!
//! # Example
//!
//! ```rust
//! use ndbufruntime::pool::KernelPool;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let pool = KernelPool::with_workers(2);
//! let visited = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&visited);
//! let launch = pool.launch(100, 16, move |range| {
//!     counter.fetch_add(range.len(), Ordering::Relaxed);
//! });
//! launch.wait().unwrap();
//! assert_eq!(visited.load(Ordering::Relaxed), 100);
//! ```

use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle as StdJoinHandle};
use std::time::Duration;

use crossbeam_deque::{Injector, Steal, Stealer, Worker};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::error::{KernelError, KernelResult};
use crate::RuntimeConfig;

/// A chunk of kernel work.
type BoxedChunk = Box<dyn FnOnce() + Send + 'static>;

/// Completion state shared by the chunks of one launch.
struct LaunchState {
    progress: Mutex<LaunchProgress>,
    completed: Condvar,
}

struct LaunchProgress {
    remaining: usize,
    failure: Option<KernelError>,
}

impl LaunchState {
    fn new(chunks: usize) -> Self {
        Self {
            progress: Mutex::new(LaunchProgress {
                remaining: chunks,
                failure: None,
            }),
            completed: Condvar::new(),
        }
    }

    fn finish_chunk(&self, result: KernelResult<()>) {
        let mut progress = self.progress.lock();
        if let Err(err) = result {
            // Keep the first failure
            progress.failure.get_or_insert(err);
        }
        progress.remaining -= 1;
        if progress.remaining == 0 {
            self.completed.notify_all();
        }
    }

    fn wait(&self) -> KernelResult<()> {
        let mut progress = self.progress.lock();
        while progress.remaining > 0 {
            self.completed.wait(&mut progress);
        }
        match &progress.failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn is_complete(&self) -> bool {
        self.progress.lock().remaining == 0
    }
}

/// Handle for awaiting one kernel launch.
#[derive(Clone)]
pub struct KernelLaunch {
    chunks: usize,
    state: Arc<LaunchState>,
}

impl KernelLaunch {
    /// Number of chunks the launch was split into.
    pub fn chunks(&self) -> usize {
        self.chunks
    }

    /// Check if every chunk has run.
    pub fn is_complete(&self) -> bool {
        self.state.is_complete()
    }

    /// Block until every chunk has run.
    ///
    /// Returns the first chunk failure, if any.
    pub fn wait(&self) -> KernelResult<()> {
        self.state.wait()
    }
}

impl std::fmt::Debug for KernelLaunch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelLaunch")
            .field("chunks", &self.chunks)
            .field("complete", &self.is_complete())
            .finish()
    }
}

/// Shared state for the kernel pool.
struct PoolInner {
    /// Global queue for launched chunks.
    global_queue: Injector<BoxedChunk>,
    /// Stealers for each worker's local queue.
    stealers: Vec<Stealer<BoxedChunk>>,
    /// Chunks queued or running.
    pending: AtomicUsize,
    /// Shutdown flag.
    shutdown: AtomicBool,
    /// Signalled when a chunk is queued or on shutdown.
    work_available: Condvar,
    work_mutex: Mutex<()>,
    /// Signalled when `pending` drops to zero.
    idle: Condvar,
    idle_mutex: Mutex<()>,
    /// First chunk failure since the last `synchronize`.
    failure: Mutex<Option<KernelError>>,
    num_workers: usize,
    chunk_size: usize,
}

impl PoolInner {
    /// Pop from the local queue, then the global queue, then steal.
    fn find_chunk(&self, local: &Worker<BoxedChunk>, worker_id: usize) -> Option<BoxedChunk> {
        if let Some(chunk) = local.pop() {
            return Some(chunk);
        }

        loop {
            match self.global_queue.steal_batch_and_pop(local) {
                Steal::Success(chunk) => return Some(chunk),
                Steal::Empty => break,
                Steal::Retry => continue,
            }
        }

        for i in 1..self.stealers.len() {
            let idx = (worker_id + i) % self.stealers.len();
            loop {
                match self.stealers[idx].steal() {
                    Steal::Success(chunk) => return Some(chunk),
                    Steal::Empty => break,
                    Steal::Retry => continue,
                }
            }
        }

        None
    }

    fn run_chunk(&self, chunk: BoxedChunk) {
        chunk();
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _guard = self.idle_mutex.lock();
            self.idle.notify_all();
        }
    }
}

/// A work-stealing pool that runs kernel launches.
///
/// # Shutdown
///
/// When the pool is dropped, it signals all workers to shut down and waits
/// for them to drain the queued chunks.
pub struct KernelPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<StdJoinHandle<()>>>,
}

impl KernelPool {
    /// Create a kernel pool from a runtime configuration.
    pub fn new(config: &RuntimeConfig) -> Self {
        let num_workers = config.workers.max(1);

        let local_queues: Vec<Worker<BoxedChunk>> =
            (0..num_workers).map(|_| Worker::new_fifo()).collect();
        let stealers: Vec<Stealer<BoxedChunk>> =
            local_queues.iter().map(|w| w.stealer()).collect();

        let inner = Arc::new(PoolInner {
            global_queue: Injector::new(),
            stealers,
            pending: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            work_available: Condvar::new(),
            work_mutex: Mutex::new(()),
            idle: Condvar::new(),
            idle_mutex: Mutex::new(()),
            failure: Mutex::new(None),
            num_workers,
            chunk_size: config.chunk_size.max(1),
        });

        let mut workers = Vec::with_capacity(num_workers);
        for (worker_id, local_queue) in local_queues.into_iter().enumerate() {
            let inner = Arc::clone(&inner);
            let mut builder =
                thread::Builder::new().name(format!("{}-{}", config.thread_name_prefix, worker_id));
            if let Some(stack_size) = config.stack_size {
                builder = builder.stack_size(stack_size);
            }
            let worker = builder
                .spawn(move || worker_loop(inner, local_queue, worker_id))
                .expect("failed to spawn kernel worker thread");
            workers.push(worker);
        }

        debug!(workers = num_workers, "kernel pool started");

        Self {
            inner,
            workers: Mutex::new(workers),
        }
    }

    /// Create a kernel pool with a specific number of workers and otherwise
    /// default configuration.
    pub fn with_workers(num_workers: usize) -> Self {
        Self::new(&RuntimeConfig::new().with_workers(num_workers))
    }

    /// Launch `kernel` over `elements` logical tasks, `chunk_size` at a time.
    ///
    /// Each chunk calls `kernel` with its range of element indices. Chunks
    /// run in no particular order and possibly in parallel.
    pub fn launch<F>(&self, elements: usize, chunk_size: usize, kernel: F) -> KernelLaunch
    where
        F: Fn(Range<usize>) + Send + Sync + 'static,
    {
        let chunk_size = chunk_size.max(1);
        let chunks = elements.div_ceil(chunk_size);
        let state = Arc::new(LaunchState::new(chunks));
        let kernel = Arc::new(kernel);

        trace!(elements, chunk_size, chunks, "launching kernel");

        for chunk_index in 0..chunks {
            let start = chunk_index * chunk_size;
            let range = start..(start + chunk_size).min(elements);
            let kernel = Arc::clone(&kernel);
            let state = Arc::clone(&state);
            let pool = Arc::clone(&self.inner);

            let chunk: BoxedChunk = Box::new(move || {
                let outcome =
                    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (*kernel)(range)));
                let result = outcome.map_err(|panic| {
                    let msg = panic
                        .downcast_ref::<String>()
                        .cloned()
                        .or_else(|| panic.downcast_ref::<&str>().map(|s| s.to_string()))
                        .unwrap_or_else(|| "unknown panic".to_string());
                    KernelError::Panicked(msg)
                });
                if let Err(err) = &result {
                    pool.failure.lock().get_or_insert_with(|| err.clone());
                }
                state.finish_chunk(result);
            });

            self.inner.pending.fetch_add(1, Ordering::AcqRel);
            self.inner.global_queue.push(chunk);
        }

        if chunks > 0 {
            self.inner.work_available.notify_all();
        }

        KernelLaunch { chunks, state }
    }

    /// Block until every chunk launched on this pool so far has run.
    ///
    /// Reports (and clears) the first chunk failure seen since the previous
    /// call, so failures of launches nobody waited on are not lost.
    pub fn synchronize(&self) -> KernelResult<()> {
        {
            let mut guard = self.inner.idle_mutex.lock();
            while self.inner.pending.load(Ordering::Acquire) > 0 {
                self.inner
                    .idle
                    .wait_for(&mut guard, Duration::from_millis(1));
            }
        }
        match self.inner.failure.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Get the number of worker threads.
    pub fn num_workers(&self) -> usize {
        self.inner.num_workers
    }

    /// Default number of elements per chunk.
    pub fn chunk_size(&self) -> usize {
        self.inner.chunk_size
    }

    /// Check if the pool is shutting down.
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }
}

impl Default for KernelPool {
    fn default() -> Self {
        Self::new(&RuntimeConfig::default())
    }
}

impl Drop for KernelPool {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.work_available.notify_all();

        let mut workers = self.workers.lock();
        for worker in workers.drain(..) {
            let _ = worker.join();
        }
        debug!("kernel pool stopped");
    }
}

/// Worker thread loop.
fn worker_loop(inner: Arc<PoolInner>, local: Worker<BoxedChunk>, worker_id: usize) {
    loop {
        if let Some(chunk) = inner.find_chunk(&local, worker_id) {
            inner.run_chunk(chunk);
            continue;
        }

        // Queued chunks are drained before honouring shutdown
        if inner.shutdown.load(Ordering::Acquire) {
            break;
        }

        let mut guard = inner.work_mutex.lock();
        if inner.shutdown.load(Ordering::Acquire) {
            continue;
        }
        if let Some(chunk) = inner.find_chunk(&local, worker_id) {
            drop(guard);
            inner.run_chunk(chunk);
            continue;
        }
        inner
            .work_available
            .wait_for(&mut guard, Duration::from_millis(1));
    }
}

/// Global kernel pool instance.
static GLOBAL_POOL: OnceLock<KernelPool> = OnceLock::new();

/// Get the global kernel pool.
///
/// The pool is lazily initialized on first access from
/// [`RuntimeConfig::from_env`].
pub fn global_pool() -> &'static KernelPool {
    GLOBAL_POOL.get_or_init(|| KernelPool::new(&RuntimeConfig::from_env()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI64;

    #[test]
    fn test_launch_covers_every_element() {
        let pool = KernelPool::with_workers(4);
        let sum = Arc::new(AtomicI64::new(0));
        let total = Arc::clone(&sum);

        let launch = pool.launch(1000, 7, move |range| {
            for i in range {
                total.fetch_add(i as i64, Ordering::Relaxed);
            }
        });
        assert_eq!(launch.chunks(), 143);
        launch.wait().unwrap();

        assert_eq!(sum.load(Ordering::Relaxed), (0..1000).sum::<i64>());
    }

    #[test]
    fn test_empty_launch_is_complete() {
        let pool = KernelPool::with_workers(1);
        let launch = pool.launch(0, 16, |_| panic!("no chunk should run"));
        assert_eq!(launch.chunks(), 0);
        assert!(launch.is_complete());
        assert_eq!(launch.wait(), Ok(()));
    }

    #[test]
    fn test_panicking_chunk_fails_launch() {
        let pool = KernelPool::with_workers(2);
        let launch = pool.launch(10, 5, |range| {
            if range.start == 5 {
                panic!("bad chunk");
            }
        });

        match launch.wait() {
            Err(KernelError::Panicked(msg)) => assert!(msg.contains("bad chunk")),
            other => panic!("expected Panicked error, got {:?}", other),
        }
        assert!(matches!(pool.synchronize(), Err(KernelError::Panicked(_))));

        // Workers survive the panic
        let again = pool.launch(4, 1, |_| {});
        assert_eq!(again.wait(), Ok(()));
        assert_eq!(pool.synchronize(), Ok(()));
    }

    #[test]
    fn test_synchronize_waits_for_all_launches() {
        let pool = KernelPool::with_workers(3);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            pool.launch(20, 3, move |range| {
                thread::sleep(Duration::from_millis(1));
                counter.fetch_add(range.len(), Ordering::Relaxed);
            });
        }

        pool.synchronize().unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn test_drop_drains_queued_chunks() {
        let pool = KernelPool::with_workers(1);
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counter);
        pool.launch(8, 1, move |_| {
            thread::sleep(Duration::from_millis(2));
            seen.fetch_add(1, Ordering::Relaxed);
        });

        drop(pool);
        assert_eq!(counter.load(Ordering::Relaxed), 8);
    }

    #[test]
    fn test_pool_num_workers() {
        let pool = KernelPool::with_workers(3);
        assert_eq!(pool.num_workers(), 3);
        assert_eq!(pool.chunk_size(), RuntimeConfig::default().chunk_size);
        assert!(!pool.is_shutdown());
    }

    #[test]
    fn test_global_pool() {
        let launch = global_pool().launch(3, 1, |_| {});
        launch.wait().unwrap();
        global_pool().synchronize().unwrap();
    }
}
