//! The backend collaborator (spec §6.3, §9): the abstraction over
//! whatever remote or local tree DragonStash is mirroring. Modeled as
//! a capability set rather than an inheritance hierarchy — a `Backend`
//! exposes only `lstat`/`readlink`/`opendir`/`open`, each returning its
//! own narrow handle type, instead of one fat `Filesystem` trait object
//! the way `include/backend.hpp`'s C++ `Filesystem` class does.
//!
//! [`Errno::NOTCONN`] is the distinguished "upstream unreachable"
//! error the Adapter (§4.6) treats specially, distinct from a genuine
//! not-found.

pub mod in_memory;
pub mod local;

use crate::codec::Timespec;
use crate::error::Result;

/// Attributes reported by a backend for one path (spec §6.3's `Stat`).
#[derive(Debug, Clone, Copy)]
pub struct BackendStat {
    pub mode: u32,
    pub size: u64,
    pub ino: u64,
    pub uid: u32,
    pub gid: u32,
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ctime: Timespec,
}

/// One entry yielded by a [`DirIter`] (spec §6.3's `DirEntry`, minus
/// the C++ `complete` flag — callers that need full attributes for
/// every entry call `lstat` explicitly, since `opendir`'s readdir step
/// is allowed to return partial stats).
#[derive(Debug, Clone)]
pub struct BackendDirEntry {
    pub name: Vec<u8>,
    pub stat: BackendStat,
}

/// A directory stream from [`Backend::opendir`]. `next()` returning
/// `Ok(None)` is EOF (spec §6.3: "`DirEntryStat|EOF|Error`").
pub trait DirIter: Send {
    fn next(&mut self) -> Result<Option<BackendDirEntry>>;
}

/// An open file from [`Backend::open`].
pub trait BackendFile: Send {
    fn fstat(&mut self) -> Result<BackendStat>;
    fn pread(&mut self, buf: &mut [u8], offset: u64) -> Result<usize>;
    fn pwrite(&mut self, buf: &[u8], offset: u64) -> Result<usize>;
    fn fsync(&mut self) -> Result<()>;
    fn close(self: Box<Self>) -> Result<()>;
}

/// The remote/local source tree DragonStash mirrors (spec §6.3, §9).
pub trait Backend: Send + Sync {
    fn lstat(&self, path: &[u8]) -> Result<BackendStat>;
    fn readlink(&self, path: &[u8]) -> Result<Vec<u8>>;
    fn opendir(&self, path: &[u8]) -> Result<Box<dyn DirIter>>;
    fn open(&self, path: &[u8], flags: i32, mode: u32) -> Result<Box<dyn BackendFile>>;
}
