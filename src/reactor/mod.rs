//! The reactor: OS event multiplexing behind a process-wide handle.
//!
//! One backend is selected at build time:
//!
//! | Platform | Backend | Module |
//! |----------|---------|--------|
//! | Unix | readiness (epoll) | `readiness` |
//! | Windows | completion ports (IOCP) | `completion` |
//!
//! Both expose the same operation surface: associate/deassociate a native
//! handle, asynchronous socket operations (connect, accept, send, recv) and
//! asynchronous file operations (open, close, read-at, write-at), plus an
//! executor for blocking fallbacks. The reactor runs one dedicated thread
//! that translates OS events into executor posts; user code never runs on
//! it.
//!
//! # Lifetime
//!
//! The reactor is a process-wide singleton reachable through
//! [`ReactorHandle`]. Acquiring the first handle creates and starts it
//! (event-loop thread plus executor workers); dropping the last handle
//! stops it. Handles are move-only and their acquisition and release are
//! serialized by a global mutex. Channels hold a handle for as long as they
//! are open, so the reactor outlives every open channel.

#[cfg(windows)]
pub mod completion;
#[cfg(unix)]
pub mod readiness;
#[cfg(unix)]
pub(crate) mod sys;

#[cfg(unix)]
pub(crate) use readiness::ReadinessReactor as SystemReactor;

#[cfg(windows)]
pub(crate) use completion::CompletionReactor as SystemReactor;

/// Synchronous platform operations with a uniform surface, so the channel
/// layer compiles unchanged on both backends. Sockets associated with the
/// readiness reactor are non-blocking, so the Unix variants wait with
/// poll(2) between retries.
#[cfg(unix)]
pub(crate) mod os {
    use super::sys;
    use crate::handle::RawHandle;
    use std::io;
    use std::path::Path;

    pub(crate) use super::sys::OpenSpec as OsOpenSpec;

    pub(crate) fn open_sync(path: &Path, spec: OsOpenSpec) -> io::Result<RawHandle> {
        sys::open(path, spec)
    }

    pub(crate) fn read_at_sync(raw: RawHandle, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        sys::pread(raw, buf, offset)
    }

    pub(crate) fn write_sync(raw: RawHandle, buf: &[u8]) -> io::Result<usize> {
        sys::write(raw, buf)
    }

    pub(crate) fn write_at_sync(raw: RawHandle, buf: &[u8], offset: u64) -> io::Result<usize> {
        sys::pwrite(raw, buf, offset)
    }

    pub(crate) fn recv_sync(raw: RawHandle, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match sys::recv(raw, buf) {
                Err(err) if sys::is_would_block(&err) => {
                    sys::wait_ready(raw, sys::Direction::Read)?;
                }
                other => return other,
            }
        }
    }

    pub(crate) fn send_sync(raw: RawHandle, buf: &[u8]) -> io::Result<usize> {
        loop {
            match sys::send(raw, buf) {
                Err(err) if sys::is_would_block(&err) => {
                    sys::wait_ready(raw, sys::Direction::Write)?;
                }
                other => return other,
            }
        }
    }

    pub(crate) fn connect_sync(raw: RawHandle, addr: &socket2::SockAddr) -> io::Result<()> {
        match sys::connect(raw, addr) {
            Ok(()) => Ok(()),
            Err(err)
                if err.raw_os_error() == Some(libc::EINPROGRESS) || sys::is_would_block(&err) =>
            {
                sys::wait_ready(raw, sys::Direction::Write)?;
                sys::take_socket_error(raw)
            }
            Err(err) => Err(err),
        }
    }

    pub(crate) fn accept_sync(raw: RawHandle) -> io::Result<RawHandle> {
        loop {
            match sys::accept(raw) {
                Err(err) if sys::is_would_block(&err) => {
                    sys::wait_ready(raw, sys::Direction::Read)?;
                }
                other => return other,
            }
        }
    }

    pub(crate) fn local_addr(raw: RawHandle) -> io::Result<socket2::SockAddr> {
        sys::local_addr(raw)
    }
}

#[cfg(windows)]
pub(crate) use completion::os;

use crate::config::ReactorConfig;
use crate::error::Result;
use crate::executor::{Executor, ExecutorHandle};
use parking_lot::Mutex as PlMutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

/// Per-operation state surviving across a suspension.
///
/// The reactor thread publishes the wakeup under the mutex; the resuming
/// worker observes `woken` under the same mutex discipline. One `OpState`
/// serves exactly one wait.
#[derive(Debug, Default)]
pub(crate) struct OpState {
    pub(crate) woken: AtomicBool,
    pub(crate) waker: PlMutex<Option<Waker>>,
}

impl OpState {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

/// Runs `f` on the executor and suspends the caller until it finishes.
///
/// This is how blocking syscalls (file open/close/read/write, getaddrinfo)
/// stay off the reactor thread: the work runs on a worker, and the task
/// resumes from a worker, exactly like a readiness wakeup.
pub(crate) fn invoke_blocking<T, F>(executor: &Executor, f: F) -> InvokeBlocking<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let shared = Arc::new(PlMutex::new(JobSlot {
        value: None,
        waker: None,
    }));
    let job_shared = Arc::clone(&shared);
    executor.post(move || {
        let value = f();
        let waker = {
            let mut slot = job_shared.lock();
            slot.value = Some(value);
            slot.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    });
    InvokeBlocking { shared }
}

struct JobSlot<T> {
    value: Option<T>,
    waker: Option<Waker>,
}

/// Future returned by [`invoke_blocking`].
pub(crate) struct InvokeBlocking<T> {
    shared: Arc<PlMutex<JobSlot<T>>>,
}

impl<T> Future for InvokeBlocking<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.shared.lock();
        if let Some(value) = slot.value.take() {
            Poll::Ready(value)
        } else {
            slot.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

struct Global {
    refs: usize,
    reactor: Option<Arc<SystemReactor>>,
}

static GLOBAL: Mutex<Global> = Mutex::new(Global {
    refs: 0,
    reactor: None,
});

/// Scoped, move-only handle to the process-wide reactor.
///
/// The first live handle starts the reactor; the last one to drop stops it
/// (the shutdown signal ends the event loop, the executor drains, both
/// threads are joined). Stopping joins the executor, so the last handle
/// must not be dropped from an executor worker — the same discipline that
/// forbids [`wait`](crate::task::wait) on a worker.
#[derive(Debug)]
pub struct ReactorHandle {
    reactor: Arc<SystemReactor>,
}

impl ReactorHandle {
    /// Acquires the global reactor, starting it if this is the first
    /// handle. Configuration comes from the environment, falling back to
    /// defaults if the override variables are unparseable.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be created (for example, the
    /// process is out of file descriptors).
    pub fn acquire() -> Result<Self> {
        let config = ReactorConfig::from_env().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "ignoring invalid reactor configuration");
            ReactorConfig::new()
        });
        Self::acquire_with(&config)
    }

    /// Acquires the global reactor with an explicit configuration.
    ///
    /// The configuration only takes effect if this call starts the reactor;
    /// otherwise the running instance is shared as-is.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be created.
    pub fn acquire_with(config: &ReactorConfig) -> Result<Self> {
        let mut global = GLOBAL.lock().expect("reactor registry poisoned");
        if global.refs == 0 {
            let reactor = Arc::new(SystemReactor::new(config)?);
            SystemReactor::start(&reactor);
            global.reactor = Some(reactor);
        }
        global.refs += 1;
        let reactor = Arc::clone(global.reactor.as_ref().expect("reactor missing"));
        Ok(Self { reactor })
    }

    /// The reactor backend this handle keeps alive.
    pub(crate) fn get(&self) -> &SystemReactor {
        &self.reactor
    }

    /// A posting handle to the reactor's executor, for [`detach`] and other
    /// off-thread work.
    ///
    /// [`detach`]: crate::task::detach
    #[must_use]
    pub fn executor(&self) -> ExecutorHandle {
        self.reactor.executor().handle()
    }
}

impl Drop for ReactorHandle {
    fn drop(&mut self) {
        let last = {
            let mut global = GLOBAL.lock().expect("reactor registry poisoned");
            global.refs -= 1;
            if global.refs == 0 {
                global.reactor.take()
            } else {
                None
            }
        };
        if let Some(reactor) = last {
            if on_runtime_thread() {
                // Stopping joins the runtime threads; a worker cannot join
                // itself, so the shutdown moves to a dedicated thread.
                let _ = std::thread::Builder::new()
                    .name("riptide-shutdown".into())
                    .spawn(move || reactor.stop());
            } else {
                reactor.stop();
            }
        }
    }
}

fn on_runtime_thread() -> bool {
    std::thread::current()
        .name()
        .is_some_and(|name| name.starts_with("riptide-worker") || name == "riptide-reactor")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::wait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn invoke_blocking_returns_the_value() {
        let executor = Executor::new(1);
        executor.start_threads();
        let value = wait(invoke_blocking(&executor, || 6 * 7));
        assert_eq!(value, 42);
        executor.stop();
    }

    #[test]
    fn invoke_blocking_runs_on_a_worker() {
        let executor = Executor::new(1);
        executor.start_threads();
        let name = wait(invoke_blocking(&executor, || {
            std::thread::current().name().map(String::from)
        }));
        assert!(name.unwrap_or_default().starts_with("riptide-worker"));
        executor.stop();
    }

    #[test]
    fn handle_refcounting_starts_and_stops_once() {
        let first = ReactorHandle::acquire().expect("acquire");
        let second = ReactorHandle::acquire().expect("acquire");

        let counter = Arc::new(AtomicUsize::new(0));
        let tick = Arc::clone(&counter);
        wait(invoke_blocking(first.get().executor(), move || {
            tick.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        drop(first);
        // Still running through the second handle.
        let tick = Arc::clone(&counter);
        wait(invoke_blocking(second.get().executor(), move || {
            tick.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        drop(second);

        // A fresh acquisition starts a fresh instance.
        let third = ReactorHandle::acquire().expect("acquire");
        drop(third);
    }
}
