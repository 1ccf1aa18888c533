//! Readiness-based reactor backend (epoll).
//!
//! The OS reports when a descriptor can be read or written without blocking;
//! the task then retries the syscall from an executor worker. Registrations
//! are oneshot: after an event fires the descriptor is disarmed until the
//! next waiter re-arms it, so a wakeup is delivered to exactly one waiter
//! per direction.
//!
//! ```text
//!  task (worker)            reactor thread              OS
//!    syscall ──EWOULDBLOCK─▶ install waiter ──arm───▶ epoll
//!    suspend                                            │
//!                            take waiter ◀──readable────┘
//!    resume  ◀──post wake────┘
//!    retry syscall
//! ```
//!
//! File operations (`open`, `close`, `pread`, `write`, `pwrite`) have no
//! readiness story; they run on the executor via
//! [`invoke_blocking`](super::invoke_blocking) and resume the task from a
//! worker exactly like the socket path does.
//!
//! One reactor thread runs the poll loop and executes no user code: it only
//! publishes per-operation state and posts wakes to the executor.

use super::{invoke_blocking, OpState};
use crate::cancel::StopToken;
use crate::config::ReactorConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::executor::Executor;
use crate::reactor::sys::{self, Direction};
use parking_lot::Mutex;
use polling::{Event, Poller};
use std::future::Future;
use std::io;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread::JoinHandle;

/// Per-descriptor record: one waiter slot per direction, each behind its
/// own mutex. A direction is armed in the poller exactly when its slot is
/// occupied.
struct FdState {
    fd: RawFd,
    read: Mutex<Option<Arc<OpState>>>,
    write: Mutex<Option<Arc<OpState>>>,
}

impl FdState {
    fn slot(&self, direction: Direction) -> &Mutex<Option<Arc<OpState>>> {
        match direction {
            Direction::Read => &self.read,
            Direction::Write => &self.write,
        }
    }
}

/// Readiness reactor over epoll.
pub struct ReadinessReactor {
    poller: Poller,
    /// Descriptor table, indexed by fd. Guarded for table mutation; the
    /// records themselves carry their own per-direction locks.
    state: Mutex<Vec<Option<Arc<FdState>>>>,
    executor: Executor,
    shutdown: AtomicBool,
    poll_batch: usize,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ReadinessReactor {
    /// Creates a stopped reactor with the given configuration.
    pub(crate) fn new(config: &ReactorConfig) -> Result<Self> {
        let poller = Poller::new().map_err(Error::from_os)?;
        Ok(Self {
            poller,
            state: Mutex::new(Vec::new()),
            executor: Executor::new(config.effective_workers()),
            shutdown: AtomicBool::new(false),
            poll_batch: config.poll_batch.max(1),
            thread: Mutex::new(None),
        })
    }

    /// Starts the poll loop thread and the executor workers. Idempotent.
    pub(crate) fn start(this: &Arc<Self>) {
        let mut thread = this.thread.lock();
        if thread.is_some() {
            return;
        }
        this.executor.start_threads();
        let reactor = Arc::clone(this);
        *thread = Some(
            std::thread::Builder::new()
                .name("riptide-reactor".into())
                .spawn(move || reactor.poll_loop())
                .expect("failed to spawn reactor thread"),
        );
        tracing::debug!("readiness reactor started");
    }

    /// Stops the poll loop and the executor, joining both.
    ///
    /// Pending executor jobs are drained first, so in-flight blocking
    /// fallbacks complete. After this returns no new operation may be
    /// submitted.
    pub(crate) fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        let _ = self.poller.notify();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
        self.executor.stop();
        tracing::debug!("readiness reactor stopped");
    }

    /// The executor that runs task resumptions and blocking fallbacks.
    pub(crate) fn executor(&self) -> &Executor {
        &self.executor
    }

    fn check_running(&self) -> Result<()> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::from_os(io::Error::new(
                io::ErrorKind::NotConnected,
                "reactor is stopped",
            )));
        }
        Ok(())
    }

    /// Adds `fd` to the poller, disarmed, and makes it non-blocking.
    pub(crate) fn associate(&self, fd: RawFd) -> Result<()> {
        self.check_running()?;
        assert!(fd >= 0, "attempt to associate a negative fd");

        let mut state = self.state.lock();
        let index = fd as usize;
        if state.len() <= index {
            state.resize_with(index + 1, || None);
        }
        if state[index].is_some() {
            return Ok(());
        }

        sys::set_nonblocking(fd).map_err(Error::from_os)?;
        self.poller
            .add(fd, Event::none(index))
            .map_err(Error::from_os)?;
        state[index] = Some(Arc::new(FdState {
            fd,
            read: Mutex::new(None),
            write: Mutex::new(None),
        }));
        tracing::trace!(fd, "fd associated");
        Ok(())
    }

    /// Removes `fd` from the poller and drops its record.
    pub(crate) fn deassociate(&self, fd: RawFd) {
        assert!(fd >= 0, "attempt to deassociate a negative fd");
        let mut state = self.state.lock();
        let index = fd as usize;
        if state.get_mut(index).and_then(Option::take).is_some() {
            let _ = self.poller.delete(fd);
            tracing::trace!(fd, "fd deassociated");
        }
    }

    fn record(&self, fd: RawFd) -> Option<Arc<FdState>> {
        self.state.lock().get(fd as usize).cloned().flatten()
    }

    /// Installs `op` as the waiter for `fd` in `direction` and arms the
    /// poller.
    ///
    /// # Panics
    ///
    /// Panics if a waiter is already pending for this fd and direction —
    /// that is a contract violation, not a runtime condition.
    fn register_interest(&self, fd: RawFd, direction: Direction, op: &Arc<OpState>) -> Result<()> {
        self.check_running()?;
        let record = self
            .record(fd)
            .unwrap_or_else(|| panic!("fd {fd} is not associated with the reactor"));

        {
            let mut slot = record.slot(direction).lock();
            assert!(
                slot.is_none(),
                "a {direction:?} waiter is already pending on fd {fd}"
            );
            *slot = Some(Arc::clone(op));
        }
        self.rearm(&record).map_err(Error::from_os)
    }

    /// Removes `op` from the waiter slot if it is still installed, then
    /// disarms the direction. Used by cancellation and future drop.
    fn clear_interest(&self, fd: RawFd, direction: Direction, op: &Arc<OpState>) {
        let Some(record) = self.record(fd) else {
            return;
        };
        {
            let mut slot = record.slot(direction).lock();
            match slot.as_ref() {
                Some(current) if Arc::ptr_eq(current, op) => {
                    *slot = None;
                }
                _ => return,
            }
        }
        let _ = self.rearm(&record);
    }

    /// Re-arms the poller mask from the record's current waiter slots.
    ///
    /// Lock order is read then write; the poll loop uses the same order.
    fn rearm(&self, record: &FdState) -> io::Result<()> {
        let readable = record.read.lock().is_some();
        let writable = record.write.lock().is_some();
        let mut event = Event::none(record.fd as usize);
        event.readable = readable;
        event.writable = writable;
        self.poller.modify(record.fd, event)
    }

    fn poll_loop(self: Arc<Self>) {
        let mut events: Vec<Event> = Vec::with_capacity(self.poll_batch);
        loop {
            events.clear();
            match self.poller.wait(&mut events, None) {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    tracing::error!(error = %err, "reactor poll failed");
                    return;
                }
            }
            if self.shutdown.load(Ordering::Acquire) {
                return;
            }

            for event in &events {
                #[allow(clippy::cast_possible_wrap)]
                let Some(record) = self.record(event.key as RawFd) else {
                    continue;
                };
                if event.readable {
                    self.fire(&record, Direction::Read);
                }
                if event.writable {
                    self.fire(&record, Direction::Write);
                }
                // Oneshot delivery disarmed the fd; re-arm whatever waiter
                // remains in the other direction.
                let _ = self.rearm(&record);
            }
        }
    }

    /// Takes the direction's waiter, publishes the wakeup, and posts the
    /// resume to the executor. No user code runs on this thread.
    fn fire(&self, record: &FdState, direction: Direction) {
        let Some(op) = record.slot(direction).lock().take() else {
            return;
        };
        let waker = {
            let mut guard = op.waker.lock();
            op.woken.store(true, Ordering::Release);
            guard.take()
        };
        tracing::trace!(fd = record.fd, ?direction, "readiness delivered");
        if let Some(waker) = waker {
            self.executor.post(move || waker.wake());
        }
    }

    /// Suspends until `fd` is ready in `direction`, or the token fires.
    fn readiness<'a>(
        &'a self,
        fd: RawFd,
        direction: Direction,
        token: Option<&'a StopToken>,
    ) -> Readiness<'a> {
        Readiness {
            reactor: self,
            fd,
            direction,
            token,
            op: Arc::new(OpState::new()),
            registered: false,
        }
    }

    // === Async fd operations ===
    //
    // Socket operations retry the non-blocking syscall and wait for
    // readiness in between. File operations run on the executor.

    /// Receives into `buf`, suspending until the socket is readable.
    pub async fn async_recv(
        &self,
        fd: RawFd,
        buf: &mut [u8],
        token: Option<&StopToken>,
    ) -> Result<usize> {
        check_token(token)?;
        loop {
            match sys::recv(fd, buf) {
                Ok(n) => return Ok(n),
                Err(err) if sys::is_would_block(&err) => {
                    self.readiness(fd, Direction::Read, token).await?;
                }
                Err(err) => return Err(Error::from_os(err)),
            }
        }
    }

    /// Sends from `buf`, suspending until the socket is writable.
    pub async fn async_send(
        &self,
        fd: RawFd,
        buf: &[u8],
        token: Option<&StopToken>,
    ) -> Result<usize> {
        check_token(token)?;
        loop {
            match sys::send(fd, buf) {
                Ok(n) => return Ok(n),
                Err(err) if sys::is_would_block(&err) => {
                    self.readiness(fd, Direction::Write, token).await?;
                }
                Err(err) => return Err(Error::from_os(err)),
            }
        }
    }

    /// Connects `fd` to `addr`, suspending until the handshake resolves.
    pub async fn async_connect(
        &self,
        fd: RawFd,
        addr: &socket2::SockAddr,
        token: Option<&StopToken>,
    ) -> Result<()> {
        check_token(token)?;
        match sys::connect(fd, addr) {
            Ok(()) => Ok(()),
            Err(err)
                if err.raw_os_error() == Some(libc::EINPROGRESS) || sys::is_would_block(&err) =>
            {
                self.readiness(fd, Direction::Write, token).await?;
                sys::take_socket_error(fd).map_err(Error::from_os)
            }
            Err(err) => Err(Error::from_os(err)),
        }
    }

    /// Accepts one connection, suspending until the listener is readable.
    pub async fn async_accept(&self, fd: RawFd, token: Option<&StopToken>) -> Result<RawFd> {
        check_token(token)?;
        loop {
            match sys::accept(fd) {
                Ok(client) => return Ok(client),
                Err(err) if sys::is_would_block(&err) => {
                    self.readiness(fd, Direction::Read, token).await?;
                }
                Err(err) => return Err(Error::from_os(err)),
            }
        }
    }

    /// Opens a file on the executor.
    pub async fn async_open(&self, path: &Path, flags: sys::OpenSpec) -> Result<RawFd> {
        let path = path.to_owned();
        invoke_blocking(&self.executor, move || sys::open(&path, flags))
            .await
            .map_err(Error::from_os)
    }

    /// Closes a descriptor on the executor.
    pub async fn async_close(&self, fd: RawFd) -> Result<()> {
        invoke_blocking(&self.executor, move || sys::close(fd))
            .await
            .map_err(Error::from_os)
    }

    /// Reads up to `len` bytes at `offset`, on the executor.
    ///
    /// The data travels through an owned vector because the executor job
    /// outlives the caller's borrow on cancellation. Sequential file
    /// channels feed their cursor in as the offset, so there is no
    /// cursor-relative read variant.
    pub async fn async_read_at(&self, fd: RawFd, len: usize, offset: u64) -> Result<Vec<u8>> {
        invoke_blocking(&self.executor, move || {
            let mut data = vec![0u8; len];
            let n = sys::pread(fd, &mut data, offset)?;
            data.truncate(n);
            Ok::<_, io::Error>(data)
        })
        .await
        .map_err(Error::from_os)
    }

    /// Writes `data` at the file cursor, on the executor.
    pub async fn async_write(&self, fd: RawFd, data: Vec<u8>) -> Result<usize> {
        invoke_blocking(&self.executor, move || sys::write(fd, &data))
            .await
            .map_err(Error::from_os)
    }

    /// Writes `data` at `offset`, on the executor.
    pub async fn async_write_at(&self, fd: RawFd, data: Vec<u8>, offset: u64) -> Result<usize> {
        invoke_blocking(&self.executor, move || sys::pwrite(fd, &data, offset))
            .await
            .map_err(Error::from_os)
    }
}

impl std::fmt::Debug for ReadinessReactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let records = self.state.lock().iter().filter(|r| r.is_some()).count();
        f.debug_struct("ReadinessReactor")
            .field("associated_fds", &records)
            .field("shutdown", &self.shutdown.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn check_token(token: Option<&StopToken>) -> Result<()> {
    match token {
        Some(token) if token.stop_requested() => Err(Error::new(ErrorKind::Cancelled)),
        _ => Ok(()),
    }
}

/// One readiness wait: installs a waiter on first poll, resolves when the
/// reactor delivers the direction or the stop token fires. Dropping the
/// future mid-wait deregisters the waiter, so cancellation by drop leaves
/// no dangling registration.
struct Readiness<'a> {
    reactor: &'a ReadinessReactor,
    fd: RawFd,
    direction: Direction,
    token: Option<&'a StopToken>,
    op: Arc<OpState>,
    registered: bool,
}

impl Future for Readiness<'_> {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.op.woken.load(Ordering::Acquire) {
            this.registered = false;
            return Poll::Ready(Ok(()));
        }

        if let Some(token) = this.token {
            if token.stop_requested() {
                if this.registered {
                    this.reactor.clear_interest(this.fd, this.direction, &this.op);
                    this.registered = false;
                }
                return Poll::Ready(Err(Error::new(ErrorKind::Cancelled)));
            }
            token.register(cx.waker());
        }

        *this.op.waker.lock() = Some(cx.waker().clone());
        if this.registered {
            // The reactor may have fired between the check above and the
            // waker store; the published flag settles it.
            if this.op.woken.load(Ordering::Acquire) {
                this.registered = false;
                return Poll::Ready(Ok(()));
            }
        } else {
            if let Err(err) = this
                .reactor
                .register_interest(this.fd, this.direction, &this.op)
            {
                return Poll::Ready(Err(err));
            }
            this.registered = true;
        }
        Poll::Pending
    }
}

impl Drop for Readiness<'_> {
    fn drop(&mut self) {
        if self.registered && !self.op.woken.load(Ordering::Acquire) {
            self.reactor.clear_interest(self.fd, self.direction, &self.op);
        }
    }
}
