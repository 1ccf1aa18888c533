//! File open flags and their mapping to the platform open call.

use crate::reactor::os::OsOpenSpec;

/// Configuration flags for opening a file channel.
///
/// Combine with `|`. The legal combinations are checked when the channel
/// opens:
///
/// - `READ` alone is valid; `READ` with `TRUNC`, `APPEND` or `CREATE_NEW`
///   is not.
/// - `WRITE` (alone or with `READ`) must carry at least one of
///   `CREATE_NEW` / `OPEN_EXISTING`:
///
/// | `CREATE_NEW` | `OPEN_EXISTING` | `TRUNC` | behaviour |
/// |---|---|---|---|
/// | ✓ | — | — | fail if exists; create |
/// | ✓ | ✓ | — | create or open |
/// | ✓ | ✓ | ✓ | create or truncate existing |
/// | — | ✓ | — | open existing (no create) |
/// | — | ✓ | ✓ | truncate existing (no create) |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFlags(u8);

impl FileFlags {
    /// No flags.
    pub const NONE: FileFlags = FileFlags(0);
    /// Open for reading.
    pub const READ: FileFlags = FileFlags(0b00_0001);
    /// Open for writing.
    pub const WRITE: FileFlags = FileFlags(0b00_0010);
    /// Writes go to the end of the file.
    pub const APPEND: FileFlags = FileFlags(0b00_0100);
    /// Truncate the file on open.
    pub const TRUNC: FileFlags = FileFlags(0b00_1000);
    /// The file may be created.
    pub const CREATE_NEW: FileFlags = FileFlags(0b01_0000);
    /// An existing file may be opened.
    pub const OPEN_EXISTING: FileFlags = FileFlags(0b10_0000);

    /// Returns true if every flag in `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: FileFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if any flag in `other` is set in `self`.
    #[must_use]
    pub const fn intersects(self, other: FileFlags) -> bool {
        self.0 & other.0 != 0
    }
}

impl std::ops::BitOr for FileFlags {
    type Output = FileFlags;

    fn bitor(self, rhs: FileFlags) -> FileFlags {
        FileFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for FileFlags {
    fn bitor_assign(&mut self, rhs: FileFlags) {
        self.0 |= rhs.0;
    }
}

/// Validates `flags` and maps them to the platform open call. `None` means
/// the combination is illegal.
#[cfg(unix)]
pub(crate) fn to_open_spec(flags: FileFlags) -> Option<OsOpenSpec> {
    // Must specify read or write.
    if !flags.intersects(FileFlags::READ | FileFlags::WRITE) {
        return None;
    }

    // Read-only access.
    if flags.contains(FileFlags::READ) && !flags.contains(FileFlags::WRITE) {
        if flags.intersects(FileFlags::TRUNC | FileFlags::APPEND | FileFlags::CREATE_NEW) {
            return None;
        }
        return Some(libc::O_RDONLY);
    }

    // Write or read-write access needs a disposition.
    if !flags.intersects(FileFlags::CREATE_NEW | FileFlags::OPEN_EXISTING) {
        return None;
    }

    let mut open_flags = if flags.contains(FileFlags::READ) {
        libc::O_RDWR
    } else {
        libc::O_WRONLY
    };

    if flags.contains(FileFlags::APPEND) {
        open_flags |= libc::O_APPEND;
    }

    let create_new = flags.contains(FileFlags::CREATE_NEW);
    let open_existing = flags.contains(FileFlags::OPEN_EXISTING);
    let trunc = flags.contains(FileFlags::TRUNC);

    if create_new && !open_existing {
        open_flags |= libc::O_CREAT | libc::O_EXCL;
    } else if create_new && open_existing {
        open_flags |= if trunc {
            libc::O_CREAT | libc::O_TRUNC
        } else {
            libc::O_CREAT
        };
    } else if trunc {
        open_flags |= libc::O_TRUNC;
    }

    Some(open_flags)
}

/// Validates `flags` and maps them to the platform open call. `None` means
/// the combination is illegal.
#[cfg(windows)]
pub(crate) fn to_open_spec(flags: FileFlags) -> Option<OsOpenSpec> {
    use windows_sys::Win32::Foundation::{GENERIC_READ, GENERIC_WRITE};
    use windows_sys::Win32::Storage::FileSystem::{
        CREATE_ALWAYS, CREATE_NEW, OPEN_ALWAYS, OPEN_EXISTING, TRUNCATE_EXISTING,
    };

    if !flags.intersects(FileFlags::READ | FileFlags::WRITE) {
        return None;
    }

    if flags.contains(FileFlags::READ) && !flags.contains(FileFlags::WRITE) {
        if flags.intersects(FileFlags::TRUNC | FileFlags::APPEND | FileFlags::CREATE_NEW) {
            return None;
        }
        return Some(OsOpenSpec {
            access: GENERIC_READ,
            disposition: OPEN_EXISTING,
        });
    }

    if !flags.intersects(FileFlags::CREATE_NEW | FileFlags::OPEN_EXISTING) {
        return None;
    }

    let mut access = GENERIC_WRITE;
    if flags.contains(FileFlags::READ) {
        access |= GENERIC_READ;
    }

    let create_new = flags.contains(FileFlags::CREATE_NEW);
    let open_existing = flags.contains(FileFlags::OPEN_EXISTING);
    let trunc = flags.contains(FileFlags::TRUNC);

    let disposition = if create_new && !open_existing {
        CREATE_NEW
    } else if create_new && open_existing {
        if trunc {
            CREATE_ALWAYS
        } else {
            OPEN_ALWAYS
        }
    } else if trunc {
        TRUNCATE_EXISTING
    } else {
        OPEN_EXISTING
    };

    Some(OsOpenSpec {
        access,
        disposition,
    })
}
