//! Riptide: a portable asynchronous I/O core.
//!
//! # Overview
//!
//! Riptide is the core of an async I/O library: a reactor that waits on OS
//! notifications, a cooperative task primitive, a thread-pool executor, and
//! the channel façades that tie them together. Two platform backends sit
//! behind one surface:
//!
//! - **Readiness** (Linux epoll): the OS signals that a descriptor is ready
//!   and a worker retries the syscall.
//! - **Completion** (Windows I/O completion ports): the OS performs the I/O
//!   and posts the result; the reactor dispatches it to the waiting task.
//!
//! On both backends, blocking operations with no async story (file open and
//! close, hostname resolution) run on the executor so they never occupy the
//! reactor thread.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ channels (file / socket / mem)                             │
//! │   own a UniqueHandle + a ReactorHandle                     │
//! ├────────────────────────────────────────────────────────────┤
//! │ reactor (readiness | completion)        task / wait/detach │
//! │   one poll thread ──posts wakes──▶ executor (N workers)    │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Structure
//!
//! - [`buffer`]: the readable/writable window contract I/O operations consume
//! - [`cancel`]: stop tokens for cooperative cancellation
//! - [`channel`]: file, socket and in-memory channels
//! - [`config`]: reactor and executor configuration
//! - [`error`]: the closed error taxonomy
//! - [`executor`]: the FIFO worker pool
//! - [`handle`]: scoped ownership of native descriptors
//! - [`net`]: endpoint values and resolution
//! - [`reactor`]: the process-wide reactor and its backends
//! - [`task`]: the lazy one-shot task primitive, `wait` and `detach`
//!
//! # Example
//!
//! ```no_run
//! use riptide::buffer::FixedBuffer;
//! use riptide::channel::{DirectFileChannel, FileFlags};
//! use riptide::task::wait;
//!
//! fn main() -> riptide::Result<()> {
//!     wait(async {
//!         let mut file = DirectFileChannel::new();
//!         file.async_open("data.bin", FileFlags::READ).await?;
//!         let mut buf = FixedBuffer::<64>::new();
//!         let n = file.async_read_some_at(0, &mut buf).await?;
//!         println!("read {n} bytes");
//!         file.async_close().await
//!     })
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod buffer;
pub mod cancel;
pub mod channel;
pub mod config;
pub mod error;
pub mod executor;
pub mod handle;
pub mod net;
pub mod reactor;
pub mod task;

pub use cancel::{StopSource, StopToken};
pub use config::ReactorConfig;
pub use error::{Error, ErrorKind, Result};
pub use reactor::ReactorHandle;
pub use task::{detach, wait, Task};
