//! Decode worker pools.
//!
//! [`Workers`] uses work-stealing deques:
//! - New jobs go to the global injector (checked before stealing)
//! - Idle workers steal from each other
//!
//! [`InlinePool`] runs every job on the caller's thread. Useful for hosts
//! without threads and for deterministic tests.
//!
//! Epoch checks (see `WorkerPool::execute_with_epoch`) let the frame buffer
//! drop decodes queued before a `clear()`.

use crossbeam::deque::{Injector, Stealer, Worker};
use log::trace;
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::entities::{Job, WorkerPool};

static SHARED: Lazy<Arc<Workers>> = Lazy::new(|| Arc::new(Workers::new(Workers::default_threads())));

/// Background worker pool with work-stealing.
///
/// # Example
/// ```ignore
/// let workers = Workers::new(4);
/// workers.execute(Box::new(move || {
///     let frame = source.frame(index);
/// }));
/// ```
pub struct Workers {
    injector: Arc<Injector<Job>>,         // Global queue for external jobs
    handles: Vec<thread::JoinHandle<()>>, // Thread handles for proper shutdown
    shutdown: Arc<AtomicBool>,
}

impl Workers {
    /// Create worker pool with `num_threads` threads (min 1).
    pub fn new(num_threads: usize) -> Self {
        let num_threads = num_threads.max(1);
        let injector: Arc<Injector<Job>> = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers_local: Vec<Worker<Job>> = Vec::new();
        let mut stealers: Vec<Stealer<Job>> = Vec::new();
        let mut handles = Vec::new();

        for _ in 0..num_threads {
            let worker: Worker<Job> = Worker::new_fifo();
            stealers.push(worker.stealer());
            workers_local.push(worker);
        }

        for (worker_id, worker) in workers_local.into_iter().enumerate() {
            let injector = Arc::clone(&injector);
            let shutdown = Arc::clone(&shutdown);
            let stealers = stealers.clone();

            let spawned = thread::Builder::new()
                .name(format!("animplay-decode-{}", worker_id))
                .spawn(move || {
                    trace!("Worker {} started", worker_id);

                    loop {
                        // 1. Own queue
                        if let Some(job) = worker.pop() {
                            job();
                            continue;
                        }

                        // 2. Global injector (batch into own queue)
                        if let Some(job) = injector.steal_batch_and_pop(&worker).success() {
                            job();
                            continue;
                        }

                        // 3. Steal from other workers
                        if let Some(job) = stealers.iter().find_map(|s| s.steal().success()) {
                            job();
                            continue;
                        }

                        if shutdown.load(Ordering::Relaxed) {
                            break;
                        }

                        // No work - short sleep to avoid CPU spin
                        thread::sleep(Duration::from_millis(1));
                    }

                    trace!("Worker {} stopped", worker_id);
                });

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => log::error!("Failed to spawn decode worker {}: {}", worker_id, e),
            }
        }

        trace!("Workers initialized: {} threads (work-stealing)", handles.len());

        Self {
            injector,
            handles,
            shutdown,
        }
    }

    /// Leave a quarter of the cores for the UI/host thread
    pub fn default_threads() -> usize {
        (num_cpus::get() * 3 / 4).max(1)
    }

    /// Process-wide pool, created on first use
    pub fn shared() -> Arc<Workers> {
        Arc::clone(&SHARED)
    }

    pub fn num_threads(&self) -> usize {
        self.handles.len()
    }
}

impl WorkerPool for Workers {
    fn execute(&self, job: Job) {
        if self.handles.is_empty() {
            // No thread could be spawned: degrade to inline execution
            job();
            return;
        }
        self.injector.push(job);
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        let num_threads = self.handles.len();
        trace!("Workers shutting down ({} threads)...", num_threads);

        self.shutdown.store(true, Ordering::SeqCst);

        // Decodes can be slow; do not block the host forever
        let deadline = Instant::now() + Duration::from_millis(500);

        let handles = std::mem::take(&mut self.handles);
        for handle in handles {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    trace!("Shutdown timeout reached, exiting anyway");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }

        trace!("All {} workers stopped gracefully", num_threads);
    }
}

/// Runs jobs synchronously on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlinePool;

impl WorkerPool for InlinePool {
    fn execute(&self, job: Job) {
        job();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, AtomicUsize};

    fn wait_for(counter: &AtomicUsize, expected: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if counter.load(Ordering::SeqCst) == expected {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_workers_run_all_jobs() {
        let workers = Workers::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..32 {
            let c = Arc::clone(&counter);
            workers.execute(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert!(wait_for(&counter, 32));
    }

    #[test]
    fn test_stale_epoch_skips_job() {
        let epoch = Arc::new(AtomicU64::new(3));
        let counter = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&counter);
        InlinePool.execute_with_epoch(
            Arc::clone(&epoch),
            3,
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let c = Arc::clone(&counter);
        InlinePool.execute_with_epoch(
            Arc::clone(&epoch),
            2,
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
