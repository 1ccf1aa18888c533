//! Error types for riptide operations.
//!
//! Every fallible operation in this crate returns [`Result`], whose error is
//! the crate-level [`Error`]: a closed [`ErrorKind`] taxonomy plus an
//! optional captured OS error as the source. Error handling follows these
//! principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Per-operation OS errors bubble out to the caller; they never abort
//! - Contract violations (double waiter registration, submitting to a
//!   stopped reactor) panic in checked builds rather than returning `Err`
//! - Errors from destructor close are swallowed

use core::fmt;
use std::io;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === I/O outcomes ===
    /// A read reached the end of the stream. The channel is still open,
    /// there is simply no more data.
    EndOfFile,
    /// Operation on a channel that is not open.
    ChannelNotOpen,
    /// Open called on a channel that is already open.
    ChannelAlreadyOpen,
    /// Illegal combination of file open flags.
    InvalidFileFlags,
    /// A write was requested but the supplied buffer has no readable data.
    NoDataInBuffer,
    /// The operation was terminated by a stop token.
    Cancelled,
    /// The endpoint's address family is not understood.
    AddressFamilyNotSupported,
    /// A transfer offset plus length would overflow.
    ValueTooLarge,

    // === Portable OS mappings ===
    /// The named file or path does not exist.
    NotFound,
    /// The operation was denied by the OS.
    PermissionDenied,
    /// The process or system is out of file descriptors.
    TooManyOpenFiles,
    /// The OS could not allocate memory for the operation.
    OutOfMemory,
    /// Any other OS error; the original error is kept as the source.
    Other,
}

impl ErrorKind {
    /// A short static description of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EndOfFile => "end of file",
            Self::ChannelNotOpen => "channel is not open",
            Self::ChannelAlreadyOpen => "channel is already open",
            Self::InvalidFileFlags => "invalid file open flags",
            Self::NoDataInBuffer => "no data in buffer",
            Self::Cancelled => "operation cancelled",
            Self::AddressFamilyNotSupported => "address family not supported",
            Self::ValueTooLarge => "offset or length too large",
            Self::NotFound => "not found",
            Self::PermissionDenied => "permission denied",
            Self::TooManyOpenFiles => "too many open files",
            Self::OutOfMemory => "out of memory",
            Self::Other => "I/O error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error type returned by riptide operations.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: Option<io::Error>,
}

impl Error {
    /// Creates a new error with the given kind and no source.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self { kind, source: None }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if this error represents cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if this error represents end of file.
    #[must_use]
    pub const fn is_eof(&self) -> bool {
        matches!(self.kind, ErrorKind::EndOfFile)
    }

    /// Wraps an OS error, remapping it to a portable kind where one exists.
    #[must_use]
    pub fn from_os(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            io::ErrorKind::OutOfMemory => ErrorKind::OutOfMemory,
            io::ErrorKind::UnexpectedEof => ErrorKind::EndOfFile,
            _ => match err.raw_os_error() {
                Some(code) if code == os_too_many_open_files() => ErrorKind::TooManyOpenFiles,
                _ => ErrorKind::Other,
            },
        };
        Self {
            kind,
            source: Some(err),
        }
    }

    /// Wraps a raw errno-style code from the OS.
    #[must_use]
    pub fn from_raw_os(code: i32) -> Self {
        Self::from_os(io::Error::from_raw_os_error(code))
    }

    /// Returns the raw OS error code, if this error carries one.
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        self.source.as_ref().and_then(io::Error::raw_os_error)
    }
}

#[cfg(unix)]
const fn os_too_many_open_files() -> i32 {
    libc::EMFILE
}

#[cfg(windows)]
const fn os_too_many_open_files() -> i32 {
    // ERROR_TOO_MANY_OPEN_FILES
    4
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(src) = &self.source {
            write!(f, ": {src}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as _)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::from_os(err)
    }
}

/// Specialized result type for riptide operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_error() {
        let err = Error::new(ErrorKind::ChannelNotOpen);
        assert_eq!(err.kind(), ErrorKind::ChannelNotOpen);
        assert!(!err.is_cancelled());
        assert!(!err.is_eof());
    }

    #[test]
    fn cancelled_and_eof_predicates() {
        assert!(Error::new(ErrorKind::Cancelled).is_cancelled());
        assert!(Error::new(ErrorKind::EndOfFile).is_eof());
    }

    #[test]
    fn os_not_found_is_remapped() {
        let err = Error::from_os(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn os_permission_denied_is_remapped() {
        let err = Error::from_os(io::Error::new(io::ErrorKind::PermissionDenied, "no"));
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn unknown_os_error_is_other_with_source() {
        let err = Error::from_os(io::Error::new(io::ErrorKind::ConnectionReset, "rst"));
        assert_eq!(err.kind(), ErrorKind::Other);
        let text = err.to_string();
        assert!(text.contains("I/O error"));
        assert!(text.contains("rst"));
    }

    #[cfg(unix)]
    #[test]
    fn raw_errno_round_trip() {
        let err = Error::from_raw_os(libc::ENOENT);
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }

    #[cfg(unix)]
    #[test]
    fn emfile_maps_to_too_many_open_files() {
        let err = Error::from_raw_os(libc::EMFILE);
        assert_eq!(err.kind(), ErrorKind::TooManyOpenFiles);
    }

    #[test]
    fn display_without_source() {
        let err = Error::new(ErrorKind::EndOfFile);
        assert_eq!(err.to_string(), "end of file");
    }
}
