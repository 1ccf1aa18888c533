//! Completion-based reactor backend (Windows I/O completion ports).
//!
//! The OS performs the I/O and posts a completion packet; the reactor
//! thread records the result in the per-operation state and posts the
//! resume to the executor. The per-operation state embeds the `OVERLAPPED`
//! header as its first field, so the pointer the OS hands back in the
//! packet is the record itself.
//!
//! File open and close cannot be performed asynchronously and run on the
//! executor, as do socket connect and accept on this backend (the
//! extension-function path is not carried here; see DESIGN.md). Read/write
//! on files and send/recv on sockets are genuine overlapped submissions.
//!
//! Synchronous variants on overlapped handles use a per-call event whose
//! low bit is set in `OVERLAPPED.hEvent`, which tells the OS not to post a
//! packet for that operation; the caller blocks in `GetOverlappedResult`
//! instead. That is the only case in which completion packets are skipped.

#![allow(unsafe_code)]
#![allow(clippy::cast_possible_truncation)]

use super::{invoke_blocking, OpState};
use crate::cancel::StopToken;
use crate::config::ReactorConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::executor::Executor;
use crate::handle::RawHandle;
use parking_lot::Mutex;
use std::ffi::OsStr;
use std::future::Future;
use std::io;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::pin::Pin;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread::JoinHandle;

use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_HANDLE_EOF, ERROR_IO_PENDING, ERROR_OPERATION_ABORTED,
    HANDLE, INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::Networking::WinSock::{
    accept, connect, getsockname, recv, send, WSAGetLastError, WSARecv, WSASend, WSAStartup,
    SOCKADDR, SOCKET, SOCKET_ERROR, WSABUF, WSADATA,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, GetOverlappedResult, ReadFile, WriteFile, FILE_ATTRIBUTE_NORMAL,
    FILE_FLAG_OVERLAPPED, FILE_SHARE_READ, FILE_SHARE_WRITE,
};
use windows_sys::Win32::System::Threading::CreateEventW;
use windows_sys::Win32::System::IO::{
    CreateIoCompletionPort, GetQueuedCompletionStatus, PostQueuedCompletionStatus, CancelIoEx,
    OVERLAPPED,
};

/// Platform representation of validated open flags.
#[derive(Debug, Clone, Copy)]
pub struct OpenSpec {
    /// `dwDesiredAccess` for `CreateFileW`.
    pub access: u32,
    /// `dwCreationDisposition` for `CreateFileW`.
    pub disposition: u32,
}

/// Per-operation record. The OS owns one reference (via the raw pointer in
/// the submitted `OVERLAPPED`) from submission until the packet is
/// dequeued; the future owns the other.
#[repr(C)]
struct CompletionState {
    /// Must stay the first field: the packet's `OVERLAPPED` pointer is cast
    /// back to the whole record.
    overlapped: OVERLAPPED,
    result: Mutex<CompletionResult>,
    op: OpState,
}

#[derive(Default)]
struct CompletionResult {
    success: bool,
    error: u32,
    bytes: u32,
}

// SAFETY: the OVERLAPPED header is only touched by the OS between submit
// and completion; all other fields are lock-protected.
unsafe impl Send for CompletionState {}
unsafe impl Sync for CompletionState {}

impl CompletionState {
    fn new(offset: u64) -> Arc<Self> {
        let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
        overlapped.Anonymous.Anonymous.Offset = (offset & 0xFFFF_FFFF) as u32;
        overlapped.Anonymous.Anonymous.OffsetHigh = (offset >> 32) as u32;
        Arc::new(Self {
            overlapped,
            result: Mutex::new(CompletionResult::default()),
            op: OpState::new(),
        })
    }
}

/// Completion-port reactor.
pub struct CompletionReactor {
    port: HANDLE,
    executor: Executor,
    shutdown: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

// SAFETY: the port handle is used concurrently by design; completion ports
// are thread-safe by contract.
unsafe impl Send for CompletionReactor {}
unsafe impl Sync for CompletionReactor {}

impl CompletionReactor {
    /// Creates a stopped reactor with the given configuration.
    pub(crate) fn new(config: &ReactorConfig) -> Result<Self> {
        let port = unsafe { CreateIoCompletionPort(INVALID_HANDLE_VALUE, 0, 0, 0) };
        if port == 0 {
            return Err(Error::from_os(io::Error::last_os_error()));
        }
        Ok(Self {
            port,
            executor: Executor::new(config.effective_workers()),
            shutdown: AtomicBool::new(false),
            thread: Mutex::new(None),
        })
    }

    /// Starts the completion loop thread and the executor workers.
    pub(crate) fn start(this: &Arc<Self>) {
        let mut thread = this.thread.lock();
        if thread.is_some() {
            return;
        }
        unsafe {
            let mut wsadata: WSADATA = std::mem::zeroed();
            WSAStartup(0x0202, &mut wsadata);
        }
        this.executor.start_threads();
        let reactor = Arc::clone(this);
        *thread = Some(
            std::thread::Builder::new()
                .name("riptide-reactor".into())
                .spawn(move || reactor.completion_loop())
                .expect("failed to spawn reactor thread"),
        );
        tracing::debug!("completion reactor started");
    }

    /// Closes the port (which unblocks the loop with a null packet), joins
    /// the loop thread and stops the executor.
    pub(crate) fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        unsafe {
            // Wake the loop with a null-overlapped packet; it treats that
            // as the stop sentinel.
            PostQueuedCompletionStatus(self.port, 0, 0, ptr::null_mut());
        }
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
        unsafe {
            CloseHandle(self.port);
        }
        self.executor.stop();
        tracing::debug!("completion reactor stopped");
    }

    /// The executor that runs task resumptions and blocking fallbacks.
    pub(crate) fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Binds a native handle to the completion port.
    pub(crate) fn associate(&self, raw: RawHandle) -> Result<()> {
        let port = unsafe { CreateIoCompletionPort(raw as HANDLE, self.port, 0, 0) };
        if port == 0 {
            return Err(Error::from_os(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Completion ports have no per-handle removal; the association dies
    /// with the handle.
    pub(crate) fn deassociate(&self, _raw: RawHandle) {}

    fn completion_loop(self: Arc<Self>) {
        loop {
            let mut bytes: u32 = 0;
            let mut key: usize = 0;
            let mut overlapped: *mut OVERLAPPED = ptr::null_mut();
            let ok = unsafe {
                GetQueuedCompletionStatus(self.port, &mut bytes, &mut key, &mut overlapped, u32::MAX)
            };
            if overlapped.is_null() {
                // The stop sentinel, or the port itself was closed.
                return;
            }

            // SAFETY: the pointer is the raw reference handed to the OS at
            // submission; it is reclaimed exactly once, here.
            let state = unsafe { Arc::from_raw(overlapped.cast::<CompletionState>()) };
            let waker = {
                let mut result = state.result.lock();
                result.success = ok != 0;
                result.error = if ok == 0 { unsafe { GetLastError() } } else { 0 };
                result.bytes = bytes;
                state.op.woken.store(true, Ordering::Release);
                state.op.waker.lock().take()
            };
            if let Some(waker) = waker {
                self.executor.post(move || waker.wake());
            }
        }
    }

    /// Submits one overlapped transfer and waits for its packet.
    async fn overlapped_io(
        &self,
        raw: RawHandle,
        offset: u64,
        token: Option<&StopToken>,
        submit: impl FnOnce(*mut OVERLAPPED) -> (bool, u32),
    ) -> Result<u32> {
        check_token(token)?;
        let state = CompletionState::new(offset);

        // The OS borrows one reference for the lifetime of the operation.
        let os_ref = Arc::into_raw(Arc::clone(&state));
        let (accepted, error) = submit(os_ref.cast_mut().cast::<OVERLAPPED>());
        if !accepted && error != ERROR_IO_PENDING {
            // Nothing was submitted; take the OS reference back.
            unsafe { drop(Arc::from_raw(os_ref)) };
            return Err(Error::from_raw_os(error as i32));
        }

        // Even a synchronous success posts a packet once the handle is
        // associated with the port, so every submitted operation waits.
        CompletionWait {
            raw,
            state: &state,
            token,
            cancelled: false,
        }
        .await;

        let result = state.result.lock();
        if result.success {
            Ok(result.bytes)
        } else if result.error == ERROR_OPERATION_ABORTED {
            Err(Error::new(ErrorKind::Cancelled))
        } else {
            Err(Error::from_raw_os(result.error as i32))
        }
    }

    // === Async operations ===

    /// Opens a file for overlapped I/O on the executor and associates it.
    pub async fn async_open(&self, path: &Path, spec: OpenSpec) -> Result<RawHandle> {
        let wide = to_wide(path.as_os_str());
        let raw = invoke_blocking(&self.executor, move || {
            let handle = unsafe {
                CreateFileW(
                    wide.as_ptr(),
                    spec.access,
                    FILE_SHARE_READ | FILE_SHARE_WRITE,
                    ptr::null(),
                    spec.disposition,
                    FILE_ATTRIBUTE_NORMAL | FILE_FLAG_OVERLAPPED,
                    0,
                )
            };
            if handle == INVALID_HANDLE_VALUE {
                Err(io::Error::last_os_error())
            } else {
                Ok(handle as RawHandle)
            }
        })
        .await
        .map_err(Error::from_os)?;
        self.associate(raw)?;
        Ok(raw)
    }

    /// Closes a handle on the executor.
    pub async fn async_close(&self, raw: RawHandle) -> Result<()> {
        invoke_blocking(&self.executor, move || {
            if unsafe { CloseHandle(raw as HANDLE) } != 0 {
                Ok(())
            } else {
                Err(io::Error::last_os_error())
            }
        })
        .await
        .map_err(Error::from_os)
    }

    /// Reads up to `len` bytes at `offset` via an overlapped `ReadFile`.
    pub async fn async_read_at(&self, raw: RawHandle, len: usize, offset: u64) -> Result<Vec<u8>> {
        let mut data = vec![0u8; len];
        let n = self
            .overlapped_io(raw, offset, None, |overlapped| {
                let ok = unsafe {
                    ReadFile(
                        raw as HANDLE,
                        data.as_mut_ptr().cast(),
                        data.len() as u32,
                        ptr::null_mut(),
                        overlapped,
                    )
                };
                (ok != 0, unsafe { GetLastError() })
            })
            .await;
        match n {
            Ok(n) => {
                data.truncate(n as usize);
                Ok(data)
            }
            Err(err) if err.raw_os_error() == Some(ERROR_HANDLE_EOF as i32) => {
                data.truncate(0);
                Ok(data)
            }
            Err(err) => Err(err),
        }
    }

    /// Writes `data` at `offset` via an overlapped `WriteFile`.
    pub async fn async_write_at(&self, raw: RawHandle, data: Vec<u8>, offset: u64) -> Result<usize> {
        let n = self
            .overlapped_io(raw, offset, None, |overlapped| {
                let ok = unsafe {
                    WriteFile(
                        raw as HANDLE,
                        data.as_ptr(),
                        data.len() as u32,
                        ptr::null_mut(),
                        overlapped,
                    )
                };
                (ok != 0, unsafe { GetLastError() })
            })
            .await?;
        Ok(n as usize)
    }

    /// Appending/sequential write at the end-of-file offset.
    pub async fn async_write(&self, raw: RawHandle, data: Vec<u8>) -> Result<usize> {
        // OVERLAPPED offset of all-ones means append for WriteFile.
        self.async_write_at(raw, data, u64::MAX).await
    }

    /// Receives via an overlapped `WSARecv`.
    pub async fn async_recv(
        &self,
        raw: RawHandle,
        buf: &mut [u8],
        token: Option<&StopToken>,
    ) -> Result<usize> {
        let mut wsabuf = WSABUF {
            len: buf.len() as u32,
            buf: buf.as_mut_ptr(),
        };
        let mut flags: u32 = 0;
        let n = self
            .overlapped_io(raw, 0, token, |overlapped| {
                let rc = unsafe {
                    WSARecv(
                        raw as SOCKET,
                        &mut wsabuf,
                        1,
                        ptr::null_mut(),
                        &mut flags,
                        overlapped,
                        None,
                    )
                };
                (rc == 0, unsafe { WSAGetLastError() } as u32)
            })
            .await?;
        Ok(n as usize)
    }

    /// Sends via an overlapped `WSASend`.
    pub async fn async_send(
        &self,
        raw: RawHandle,
        buf: &[u8],
        token: Option<&StopToken>,
    ) -> Result<usize> {
        let mut wsabuf = WSABUF {
            len: buf.len() as u32,
            buf: buf.as_ptr().cast_mut(),
        };
        let n = self
            .overlapped_io(raw, 0, token, |overlapped| {
                let rc = unsafe {
                    WSASend(
                        raw as SOCKET,
                        &mut wsabuf,
                        1,
                        ptr::null_mut(),
                        0,
                        overlapped,
                        None,
                    )
                };
                (rc == 0, unsafe { WSAGetLastError() } as u32)
            })
            .await?;
        Ok(n as usize)
    }

    /// Connects on the executor; blocking connect cannot occupy the reactor
    /// thread.
    pub async fn async_connect(
        &self,
        raw: RawHandle,
        addr: &socket2::SockAddr,
        token: Option<&StopToken>,
    ) -> Result<()> {
        check_token(token)?;
        let addr = addr.clone();
        invoke_blocking(&self.executor, move || {
            let rc = unsafe {
                connect(
                    raw as SOCKET,
                    addr.as_ptr().cast::<SOCKADDR>(),
                    addr.len(),
                )
            };
            if rc == SOCKET_ERROR {
                Err(io::Error::from_raw_os_error(unsafe { WSAGetLastError() }))
            } else {
                Ok(())
            }
        })
        .await
        .map_err(Error::from_os)
    }

    /// Accepts on the executor.
    pub async fn async_accept(&self, raw: RawHandle, token: Option<&StopToken>) -> Result<RawHandle> {
        check_token(token)?;
        invoke_blocking(&self.executor, move || {
            let client = unsafe { accept(raw as SOCKET, ptr::null_mut(), ptr::null_mut()) };
            if client == SOCKET::MAX {
                Err(io::Error::from_raw_os_error(unsafe { WSAGetLastError() }))
            } else {
                Ok(client as RawHandle)
            }
        })
        .await
        .map_err(Error::from_os)
    }
}

impl std::fmt::Debug for CompletionReactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionReactor")
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

/// Waits for the completion packet of one submitted operation.
///
/// A stop token firing mid-wait issues `CancelIoEx`; the packet still
/// arrives (with `ERROR_OPERATION_ABORTED` unless the operation beat the
/// cancel) and resolves the wait, so the OS reference is always reclaimed.
struct CompletionWait<'a> {
    raw: RawHandle,
    state: &'a Arc<CompletionState>,
    token: Option<&'a StopToken>,
    cancelled: bool,
}

impl Future for CompletionWait<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.state.op.woken.load(Ordering::Acquire) {
            return Poll::Ready(());
        }
        if let Some(token) = this.token {
            token.register(cx.waker());
            if token.stop_requested() && !this.cancelled {
                this.cancelled = true;
                unsafe {
                    CancelIoEx(
                        this.raw as HANDLE,
                        std::ptr::addr_of!(this.state.overlapped),
                    );
                }
            }
        }
        *this.state.op.waker.lock() = Some(cx.waker().clone());
        if this.state.op.woken.load(Ordering::Acquire) {
            return Poll::Ready(());
        }
        Poll::Pending
    }
}

fn to_wide(s: &OsStr) -> Vec<u16> {
    s.encode_wide().chain(std::iter::once(0)).collect()
}

/// Synchronous platform operations for the completion backend.
pub(crate) mod os {
    use super::{
        to_wide, CreateEventW, CreateFileW, GetOverlappedResult, OpenSpec, ReadFile, WriteFile,
        CloseHandle, GetLastError, RawHandle, ERROR_HANDLE_EOF, ERROR_IO_PENDING,
        FILE_ATTRIBUTE_NORMAL, FILE_FLAG_OVERLAPPED, FILE_SHARE_READ, FILE_SHARE_WRITE, HANDLE,
        INVALID_HANDLE_VALUE, OVERLAPPED, SOCKADDR, SOCKET, SOCKET_ERROR,
    };
    use std::io;
    use std::path::Path;
    use std::ptr;

    pub(crate) use super::OpenSpec as OsOpenSpec;

    /// Opens a file for overlapped I/O without touching the reactor.
    pub(crate) fn open_sync(path: &Path, spec: OpenSpec) -> io::Result<RawHandle> {
        let wide = to_wide(path.as_os_str());
        let handle = unsafe {
            CreateFileW(
                wide.as_ptr(),
                spec.access,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                ptr::null(),
                spec.disposition,
                FILE_ATTRIBUTE_NORMAL | FILE_FLAG_OVERLAPPED,
                0,
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            Err(io::Error::last_os_error())
        } else {
            Ok(handle as RawHandle)
        }
    }

    /// One synchronous overlapped transfer using the tagged-event trick:
    /// the low bit of `hEvent` suppresses the completion packet, so the
    /// reactor never sees this operation.
    fn overlapped_sync(
        raw: RawHandle,
        offset: u64,
        submit: impl FnOnce(*mut OVERLAPPED) -> bool,
    ) -> io::Result<usize> {
        let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
        overlapped.Anonymous.Anonymous.Offset = (offset & 0xFFFF_FFFF) as u32;
        overlapped.Anonymous.Anonymous.OffsetHigh = (offset >> 32) as u32;
        let event = unsafe { CreateEventW(ptr::null(), 1, 0, ptr::null()) };
        if event == 0 {
            return Err(io::Error::last_os_error());
        }
        overlapped.hEvent = event | 1;

        let ok = submit(&mut overlapped);
        let result = if ok {
            let mut bytes: u32 = 0;
            let rc =
                unsafe { GetOverlappedResult(raw as HANDLE, &overlapped, &mut bytes, 1) };
            if rc != 0 {
                Ok(bytes as usize)
            } else {
                Err(io::Error::last_os_error())
            }
        } else {
            Err(io::Error::last_os_error())
        };
        unsafe { CloseHandle(event) };
        result
    }

    pub(crate) fn read_at_sync(raw: RawHandle, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let result = overlapped_sync(raw, offset, |overlapped| unsafe {
            let ok = ReadFile(
                raw as HANDLE,
                buf.as_mut_ptr().cast(),
                buf.len() as u32,
                ptr::null_mut(),
                overlapped,
            );
            ok != 0 || GetLastError() == ERROR_IO_PENDING
        });
        match result {
            Err(err) if err.raw_os_error() == Some(ERROR_HANDLE_EOF as i32) => Ok(0),
            other => other,
        }
    }

    pub(crate) fn write_at_sync(raw: RawHandle, buf: &[u8], offset: u64) -> io::Result<usize> {
        overlapped_sync(raw, offset, |overlapped| unsafe {
            let ok = WriteFile(
                raw as HANDLE,
                buf.as_ptr(),
                buf.len() as u32,
                ptr::null_mut(),
                overlapped,
            );
            ok != 0 || GetLastError() == ERROR_IO_PENDING
        })
    }

    pub(crate) fn write_sync(raw: RawHandle, buf: &[u8]) -> io::Result<usize> {
        write_at_sync(raw, buf, u64::MAX)
    }

    pub(crate) fn recv_sync(raw: RawHandle, buf: &mut [u8]) -> io::Result<usize> {
        let rc = unsafe {
            super::recv(raw as SOCKET, buf.as_mut_ptr(), buf.len() as i32, 0)
        };
        if rc == SOCKET_ERROR {
            Err(io::Error::from_raw_os_error(unsafe {
                super::WSAGetLastError()
            }))
        } else {
            Ok(rc as usize)
        }
    }

    pub(crate) fn send_sync(raw: RawHandle, buf: &[u8]) -> io::Result<usize> {
        let rc = unsafe { super::send(raw as SOCKET, buf.as_ptr(), buf.len() as i32, 0) };
        if rc == SOCKET_ERROR {
            Err(io::Error::from_raw_os_error(unsafe {
                super::WSAGetLastError()
            }))
        } else {
            Ok(rc as usize)
        }
    }

    pub(crate) fn connect_sync(raw: RawHandle, addr: &socket2::SockAddr) -> io::Result<()> {
        let rc = unsafe {
            super::connect(raw as SOCKET, addr.as_ptr().cast::<SOCKADDR>(), addr.len())
        };
        if rc == SOCKET_ERROR {
            Err(io::Error::from_raw_os_error(unsafe {
                super::WSAGetLastError()
            }))
        } else {
            Ok(())
        }
    }

    pub(crate) fn accept_sync(raw: RawHandle) -> io::Result<RawHandle> {
        let client = unsafe { super::accept(raw as SOCKET, ptr::null_mut(), ptr::null_mut()) };
        if client == SOCKET::MAX {
            Err(io::Error::from_raw_os_error(unsafe {
                super::WSAGetLastError()
            }))
        } else {
            Ok(client as RawHandle)
        }
    }

    pub(crate) fn local_addr(raw: RawHandle) -> io::Result<socket2::SockAddr> {
        let ((), addr) = unsafe {
            socket2::SockAddr::try_init(|storage, len| {
                let rc = super::getsockname(raw as SOCKET, storage.cast(), len);
                if rc == SOCKET_ERROR {
                    Err(io::Error::from_raw_os_error(super::WSAGetLastError()))
                } else {
                    Ok(())
                }
            })
        }?;
        Ok(addr)
    }
}
