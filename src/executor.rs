//! Thread-pool executor.
//!
//! A multi-producer FIFO of nullary jobs served by a fixed set of worker
//! threads. The reactor posts task resumptions here, and blocking fallbacks
//! (file open/close, `getaddrinfo`) run here so they never occupy the
//! reactor thread.
//!
//! # Ordering
//!
//! Jobs submitted by a single thread are dequeued in submission order; jobs
//! from different submitters interleave arbitrarily and may run concurrently
//! on distinct workers. There are no priorities and no cancellation of
//! queued jobs; [`stop`](Executor::stop) lets workers drain everything
//! already queued before they exit.
//!
//! # Panics
//!
//! A panicking job is caught at the worker boundary and logged; the worker
//! survives. Panics never propagate through the executor.

use crossbeam_queue::SegQueue;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Inner {
    queue: SegQueue<Job>,
    shutdown: AtomicBool,
    pending: AtomicUsize,
    /// Condvar pair for worker parking.
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl Inner {
    fn post(&self, job: Job) {
        if self.shutdown.load(Ordering::Acquire) {
            tracing::warn!("job posted to a stopped executor; dropping");
            return;
        }
        self.queue.push(job);
        self.pending.fetch_add(1, Ordering::Relaxed);
        let _guard = self.mutex.lock().expect("executor lock poisoned");
        self.condvar.notify_one();
    }
}

/// FIFO thread-pool executor.
pub struct Executor {
    inner: Arc<Inner>,
    workers: usize,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Executor {
    /// Creates an executor that will run `workers` threads once started.
    ///
    /// # Panics
    ///
    /// Panics if `workers` is zero.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        assert!(workers > 0, "executor needs at least one worker");
        Self {
            inner: Arc::new(Inner {
                queue: SegQueue::new(),
                shutdown: AtomicBool::new(false),
                pending: AtomicUsize::new(0),
                mutex: Mutex::new(()),
                condvar: Condvar::new(),
            }),
            workers,
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Spawns the configured worker threads. Idempotent.
    pub fn start_threads(&self) {
        let mut threads = self.threads.lock().expect("executor lock poisoned");
        if !threads.is_empty() {
            return;
        }
        for i in 0..self.workers {
            let inner = Arc::clone(&self.inner);
            let handle = thread::Builder::new()
                .name(format!("riptide-worker-{i}"))
                .spawn(move || worker_loop(&inner))
                .expect("failed to spawn executor worker");
            threads.push(handle);
        }
        tracing::debug!(workers = self.workers, "executor workers started");
    }

    /// Enqueues a job.
    pub fn post<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.post(Box::new(job));
    }

    /// Returns a cloneable handle for posting from other threads.
    #[must_use]
    pub fn handle(&self) -> ExecutorHandle {
        ExecutorHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Number of jobs queued but not yet dequeued.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Relaxed)
    }

    /// Signals workers to stop and joins them.
    ///
    /// Workers finish every job already in the queue before exiting.
    /// Idempotent.
    pub fn stop(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        {
            let _guard = self.inner.mutex.lock().expect("executor lock poisoned");
            self.inner.condvar.notify_all();
        }
        let mut threads = self.threads.lock().expect("executor lock poisoned");
        for handle in threads.drain(..) {
            let _ = handle.join();
        }
        tracing::debug!("executor workers stopped");
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("workers", &self.workers)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

/// Cloneable posting handle to an [`Executor`].
#[derive(Clone)]
pub struct ExecutorHandle {
    inner: Arc<Inner>,
}

impl ExecutorHandle {
    /// Enqueues a job.
    pub fn post<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.post(Box::new(job));
    }
}

impl std::fmt::Debug for ExecutorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorHandle")
            .field("pending", &self.inner.pending.load(Ordering::Relaxed))
            .finish()
    }
}

fn worker_loop(inner: &Inner) {
    loop {
        if let Some(job) = inner.queue.pop() {
            inner.pending.fetch_sub(1, Ordering::Relaxed);
            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                tracing::error!("executor job panicked");
            }
            continue;
        }

        if inner.shutdown.load(Ordering::Acquire) {
            return;
        }

        let guard = inner.mutex.lock().expect("executor lock poisoned");
        // Re-check with the lock held so a post between the pop and the
        // park cannot be missed.
        if !inner.queue.is_empty() || inner.shutdown.load(Ordering::Acquire) {
            continue;
        }
        let _guard = inner.condvar.wait(guard).expect("executor lock poisoned");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;
    use std::time::Duration;

    #[test]
    fn runs_posted_jobs() {
        let exec = Executor::new(2);
        exec.start_threads();

        let counter = Arc::new(AtomicI32::new(0));
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            exec.post(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }

        exec.stop();
        assert_eq!(counter.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn stop_drains_pending_jobs() {
        let exec = Executor::new(1);
        let counter = Arc::new(AtomicI32::new(0));
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            exec.post(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        // Workers start after the queue is already populated.
        exec.start_threads();
        exec.stop();
        assert_eq!(counter.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn single_producer_order_is_preserved() {
        let exec = Executor::new(1);
        exec.start_threads();

        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..50 {
            let seen = Arc::clone(&seen);
            exec.post(move || {
                seen.lock().unwrap().push(i);
            });
        }
        exec.stop();

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn worker_survives_job_panic() {
        let exec = Executor::new(1);
        exec.start_threads();

        exec.post(|| panic!("intentional"));

        let counter = Arc::new(AtomicI32::new(0));
        let c = Arc::clone(&counter);
        exec.post(move || {
            c.fetch_add(1, Ordering::Relaxed);
        });

        exec.stop();
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn post_after_stop_is_dropped() {
        let exec = Executor::new(1);
        exec.start_threads();
        exec.stop();

        let counter = Arc::new(AtomicI32::new(0));
        let c = Arc::clone(&counter);
        exec.post(move || {
            c.fetch_add(1, Ordering::Relaxed);
        });
        thread::sleep(Duration::from_millis(20));
        assert_eq!(counter.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn handle_posts_from_other_threads() {
        let exec = Executor::new(2);
        exec.start_threads();
        let counter = Arc::new(AtomicI32::new(0));

        let mut producers = Vec::new();
        for _ in 0..4 {
            let handle = exec.handle();
            let counter = Arc::clone(&counter);
            producers.push(thread::spawn(move || {
                for _ in 0..25 {
                    let counter = Arc::clone(&counter);
                    handle.post(move || {
                        counter.fetch_add(1, Ordering::Relaxed);
                    });
                }
            }));
        }
        for p in producers {
            p.join().unwrap();
        }

        exec.stop();
        assert_eq!(counter.load(Ordering::Relaxed), 100);
    }
}
