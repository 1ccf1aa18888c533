//! The cooperative task primitive.
//!
//! A [`Task`] is a lazy, one-shot computation: nothing runs until it is
//! first polled, it runs to completion exactly once, and its result is
//! observed by exactly one consumer (the type is move-only and not
//! cloneable). Awaiting a task from another task resumes it in place, so
//! within one task program order is preserved.
//!
//! Two bridges connect tasks to the non-async world:
//!
//! - [`wait`] blocks the calling thread until a future completes. It is the
//!   entry point for external callers and must not be called from an
//!   executor worker: if every worker blocks in `wait` there is nobody left
//!   to run the resumptions they are waiting for.
//! - [`detach`] hands a task to the executor. The executor owns the frame
//!   from then on and drops it after completion. A panic inside a detached
//!   task is caught at the executor boundary and logged; it never unwinds
//!   through the reactor or the executor.
//!
//! A panic inside an awaited task propagates to the awaiter at the await
//! point, the same place a stored error would surface.

use crate::executor::ExecutorHandle;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};
use std::thread::{self, Thread};

/// A lazy, one-shot cooperative computation producing a `T`.
pub struct Task<T> {
    fut: Pin<Box<dyn Future<Output = T> + Send + 'static>>,
}

impl<T> Task<T> {
    /// Wraps a future as a task. The future does not run until the task is
    /// awaited, waited on, or detached.
    #[must_use]
    pub fn new<F>(fut: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self { fut: Box::pin(fut) }
    }
}

impl<T> Future for Task<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.fut.as_mut().poll(cx)
    }
}

impl<T> std::fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}

struct Parker {
    thread: Thread,
    notified: AtomicBool,
}

impl Wake for Parker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.notified.store(true, Ordering::Release);
        self.thread.unpark();
    }
}

/// Runs a future to completion on the calling thread, parking between polls.
///
/// This is the bridge from synchronous code into the async world. Calling it
/// from an executor worker is forbidden by contract: nested waits can park
/// every worker and starve the executor.
pub fn wait<F: Future>(fut: F) -> F::Output {
    let mut fut = std::pin::pin!(fut);
    let parker = Arc::new(Parker {
        thread: thread::current(),
        notified: AtomicBool::new(false),
    });
    let waker = Waker::from(Arc::clone(&parker));
    let mut cx = Context::from_waker(&waker);

    loop {
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(value) => return value,
            Poll::Pending => {
                while !parker.notified.swap(false, Ordering::Acquire) {
                    thread::park();
                }
            }
        }
    }
}

// Detached task states. Exactly one `run` job is in flight per SCHEDULED
// transition, so the frame is never polled from two workers at once.
const IDLE: u8 = 0;
const SCHEDULED: u8 = 1;
const RUNNING: u8 = 2;
const RUNNING_NOTIFIED: u8 = 3;
const DONE: u8 = 4;

struct Detached {
    state: AtomicU8,
    fut: Mutex<Option<Pin<Box<dyn Future<Output = ()> + Send + 'static>>>>,
    exec: ExecutorHandle,
}

impl Detached {
    fn schedule(this: &Arc<Self>) {
        let task = Arc::clone(this);
        this.exec.post(move || Self::run(&task));
    }

    fn run(this: &Arc<Self>) {
        this.state.store(RUNNING, Ordering::Release);
        let Some(mut fut) = this.fut.lock().take() else {
            return;
        };

        let waker = Waker::from(Arc::clone(this));
        let mut cx = Context::from_waker(&waker);
        match catch_unwind(AssertUnwindSafe(|| fut.as_mut().poll(&mut cx))) {
            Ok(Poll::Pending) => {
                *this.fut.lock() = Some(fut);
                if this
                    .state
                    .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    // Woken while running; go again.
                    this.state.store(SCHEDULED, Ordering::Release);
                    Self::schedule(this);
                }
            }
            Ok(Poll::Ready(())) => {
                this.state.store(DONE, Ordering::Release);
            }
            Err(_) => {
                this.state.store(DONE, Ordering::Release);
                tracing::error!("detached task panicked");
            }
        }
    }
}

impl Wake for Detached {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        loop {
            let state = self.state.load(Ordering::Acquire);
            match state {
                IDLE => {
                    if self
                        .state
                        .compare_exchange(IDLE, SCHEDULED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        Self::schedule(self);
                        return;
                    }
                }
                RUNNING => {
                    if self
                        .state
                        .compare_exchange(
                            RUNNING,
                            RUNNING_NOTIFIED,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        return;
                    }
                }
                SCHEDULED | RUNNING_NOTIFIED | DONE => return,
                _ => unreachable!("invalid detached task state"),
            }
        }
    }
}

/// Hands a task to the executor and forgets about it.
///
/// The executor owns the task frame from this point; it is dropped after the
/// task runs to completion. There is no way to observe the result — use an
/// explicit side channel if one is needed.
pub fn detach(task: Task<()>, exec: &ExecutorHandle) {
    let detached = Arc::new(Detached {
        state: AtomicU8::new(SCHEDULED),
        fut: Mutex::new(Some(task.fut)),
        exec: exec.clone(),
    });
    Detached::schedule(&detached);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn wait_returns_ready_value() {
        assert_eq!(wait(async { 41 + 1 }), 42);
    }

    #[test]
    fn task_is_lazy() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let task = Task::new(async move {
            flag.store(true, Ordering::SeqCst);
        });
        assert!(!ran.load(Ordering::SeqCst));
        wait(task);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn task_awaited_by_task_completes_first() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let inner_order = Arc::clone(&order);
        let inner = Task::new(async move {
            inner_order.lock().push("inner");
            7
        });
        let outer_order = Arc::clone(&order);
        let outer = Task::new(async move {
            let value = inner.await;
            outer_order.lock().push("outer");
            value
        });
        assert_eq!(wait(outer), 7);
        assert_eq!(*order.lock(), ["inner", "outer"]);
    }

    #[test]
    fn wait_crosses_threads() {
        struct Handoff {
            value: Mutex<Option<u32>>,
            waker: Mutex<Option<Waker>>,
        }

        let shared = Arc::new(Handoff {
            value: Mutex::new(None),
            waker: Mutex::new(None),
        });

        let producer = Arc::clone(&shared);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            *producer.value.lock() = Some(99);
            if let Some(waker) = producer.waker.lock().take() {
                waker.wake();
            }
        });

        let consumer = Arc::clone(&shared);
        let value = wait(std::future::poll_fn(move |cx| {
            if let Some(v) = *consumer.value.lock() {
                Poll::Ready(v)
            } else {
                *consumer.waker.lock() = Some(cx.waker().clone());
                Poll::Pending
            }
        }));

        assert_eq!(value, 99);
        handle.join().unwrap();
    }

    #[test]
    fn detach_runs_to_completion_and_drops_frame() {
        struct DropFlag(Arc<AtomicBool>);
        impl Drop for DropFlag {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let exec = Executor::new(2);
        exec.start_threads();

        let dropped = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();
        let flag = DropFlag(Arc::clone(&dropped));
        detach(
            Task::new(async move {
                let _flag = flag;
                tx.send(()).unwrap();
            }),
            &exec.handle(),
        );

        rx.recv_timeout(Duration::from_secs(5)).expect("task ran");
        exec.stop();
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn detached_panic_is_contained() {
        let exec = Executor::new(1);
        exec.start_threads();

        detach(Task::new(async { panic!("intentional") }), &exec.handle());

        // The worker must survive to run the next task.
        let (tx, rx) = mpsc::channel();
        detach(
            Task::new(async move {
                tx.send(()).unwrap();
            }),
            &exec.handle(),
        );
        rx.recv_timeout(Duration::from_secs(5)).expect("worker alive");
        exec.stop();
    }

    #[test]
    fn detached_task_reschedules_after_pending() {
        let exec = Executor::new(1);
        exec.start_threads();

        let polls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();
        let counter = Arc::clone(&polls);
        detach(
            Task::new(async move {
                std::future::poll_fn(move |cx| {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < 3 {
                        cx.waker().wake_by_ref();
                        Poll::Pending
                    } else {
                        Poll::Ready(())
                    }
                })
                .await;
                tx.send(()).unwrap();
            }),
            &exec.handle(),
        );

        rx.recv_timeout(Duration::from_secs(5)).expect("completed");
        assert_eq!(polls.load(Ordering::SeqCst), 4);
        exec.stop();
    }
}
