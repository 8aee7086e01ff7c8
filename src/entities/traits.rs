//! Abstract traits for dependency inversion.
//!
//! The frame buffer needs somewhere to run decodes without knowing whether
//! that is a thread pool or the caller's own thread. Implementations live in
//! `core/workers.rs`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Boxed background job
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Abstract worker pool interface.
pub trait WorkerPool: Send + Sync {
    /// Execute job (possibly on another thread).
    fn execute(&self, job: Job);

    /// Execute job with epoch-based cancellation.
    ///
    /// The epoch is compared when the job starts running, not when it is
    /// queued: if it changed in between, the job is skipped.
    fn execute_with_epoch(&self, epoch: Arc<AtomicU64>, expected: u64, job: Job) {
        self.execute(Box::new(move || {
            if epoch.load(Ordering::Acquire) == expected {
                job();
            }
        }));
    }
}

/// Blanket impl: Arc<T> implements WorkerPool if T does
impl<T: WorkerPool + ?Sized> WorkerPool for Arc<T> {
    fn execute(&self, job: Job) {
        (**self).execute(job)
    }

    fn execute_with_epoch(&self, epoch: Arc<AtomicU64>, expected: u64, job: Job) {
        (**self).execute_with_epoch(epoch, expected, job)
    }
}
