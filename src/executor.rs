//! Deferred-work executor abstraction.
//!
//! Maintenance drains, refresh loads, and batched removal notifications are
//! handed to an [`Executor`] instead of being run on a dedicated thread the
//! cache would have to own. The default [`CallerRunsExecutor`] runs each job
//! inline on the submitting thread, which keeps the cache dependency-free;
//! applications with a thread pool implement the trait and submit to it.

/// Runs deferred cache work.
///
/// Jobs must be executed eventually and must not be dropped; an executor
/// that discards jobs stalls maintenance until the next cache operation
/// schedules a new one. Executing inline on the submitting thread is
/// always correct.
pub trait Executor: Send + Sync + 'static {
    fn execute(&self, job: Box<dyn FnOnce() + Send>);
}

/// The default executor: runs every job on the thread that submitted it.
pub struct CallerRunsExecutor;

impl Executor for CallerRunsExecutor {
    #[inline]
    fn execute(&self, job: Box<dyn FnOnce() + Send>) {
        job();
    }
}

/// An [`Executor`] backed by a closure taking the boxed job.
///
/// # Example
/// ```
/// use cortado::executor::{Executor, FnExecutor};
///
/// // Spawn each job on a fresh thread (illustration only).
/// let exec = FnExecutor(|job| {
///     std::thread::spawn(job).join().ok();
/// });
/// exec.execute(Box::new(|| {}));
/// ```
pub struct FnExecutor<F>(pub F);

impl<F> Executor for FnExecutor<F>
where
    F: Fn(Box<dyn FnOnce() + Send>) + Send + Sync + 'static,
{
    #[inline]
    fn execute(&self, job: Box<dyn FnOnce() + Send>) {
        (self.0)(job)
    }
}
