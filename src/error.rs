//! Uniform Ok-or-errno return value used across the core.
//!
//! Mirrors `include/error.hpp` / `include/dragonstash/cache/common.hpp`
//! in the original: a `Result<T>` is either a value or a POSIX errno.
//! Propagation is manual via `?` on the errno itself rather than via an
//! exception, and [`Errno::from_io`] transports a lower-level failure
//! into the errno slot without touching any payload.

use std::fmt;

/// A POSIX `errno` value. Always non-zero by construction except for
/// [`Errno::SUCCESS`], which callers use as the EOF sentinel for
/// `readdir` (spec §4.5.7: "EOF is represented as a Result with error
/// 0").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Errno(pub i32);

impl Errno {
    pub const SUCCESS: Errno = Errno(0);
    pub const NOENT: Errno = Errno(libc::ENOENT);
    pub const INVAL: Errno = Errno(libc::EINVAL);
    pub const NAMETOOLONG: Errno = Errno(libc::ENAMETOOLONG);
    pub const NOTCONN: Errno = Errno(libc::ENOTCONN);
    pub const IO: Errno = Errno(libc::EIO);
    pub const STALE: Errno = Errno(libc::ESTALE);
    pub const BUSY: Errno = Errno(libc::EBUSY);
    pub const DEADLK: Errno = Errno(libc::EDEADLK);
    pub const ALREADY: Errno = Errno(libc::EALREADY);
    pub const BADFD: Errno = Errno(libc::EBADFD);
    pub const NOTDIR: Errno = Errno(libc::ENOTDIR);
    pub const ISDIR: Errno = Errno(libc::EISDIR);
    pub const CANCELED: Errno = Errno(libc::ECANCELED);

    pub fn is_success(self) -> bool {
        self.0 == 0
    }

    /// Transport an `io::Error` into an errno, defaulting to `EIO` when
    /// the OS did not attach a raw code (e.g. a synthetic `io::Error`).
    pub fn from_io(err: &std::io::Error) -> Errno {
        Errno(err.raw_os_error().unwrap_or(libc::EIO))
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "errno {} ({})", self.0, unsafe {
            let p = libc::strerror(self.0);
            std::ffi::CStr::from_ptr(p).to_string_lossy()
        })
    }
}

impl std::error::Error for Errno {}

impl From<std::io::Error> for Errno {
    fn from(err: std::io::Error) -> Self {
        Errno::from_io(&err)
    }
}

/// The carrier type used everywhere in the core. `Result<()>` is the
/// "success/failure without a payload" case spec §4.1 calls `Result<void>`.
pub type Result<T> = std::result::Result<T, Errno>;

/// Non-errno failures: things that are fatal at the component level
/// (spec §4.3.5, §7) rather than a normal operational error. Corruption
/// found by [`crate::blocklist::Blocklist::fsck`] or a codec parse
/// failure surface as `DsError`; callers at the component boundary
/// convert them to `Errno::IO` (or discard-and-rebuild, per spec).
#[derive(Debug, thiserror::Error)]
pub enum DsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("metadata store error: {0}")]
    Store(#[from] redb::Error),
    #[error("metadata store database error: {0}")]
    Database(#[from] redb::DatabaseError),
    #[error("metadata store transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),
    #[error("metadata store table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("metadata store storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("metadata store commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("metadata store savepoint error: {0}")]
    Savepoint(#[from] redb::SavepointError),
    #[error("corrupt on-disk record: {0}")]
    Corrupt(&'static str),
    #[error("programming error: {0}")]
    Logic(&'static str),
}

impl From<DsError> for Errno {
    fn from(err: DsError) -> Self {
        match err {
            DsError::Io(e) => Errno::from_io(&e),
            DsError::Corrupt(_) | DsError::Logic(_) => Errno::IO,
            DsError::Store(_)
            | DsError::Database(_)
            | DsError::Transaction(_)
            | DsError::Table(_)
            | DsError::Storage(_)
            | DsError::Commit(_)
            | DsError::Savepoint(_) => Errno::IO,
        }
    }
}
