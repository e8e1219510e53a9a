//! The kernel-interface collaborator (spec §6.3, §9): a
//! [`fuser::Filesystem`] implementation that does nothing but
//! translate each FUSE request into an [`Adapter`] call and marshal
//! the result into the matching `fuser::Reply*` call.
//!
//! Every reply is wrapped in [`Guard`], a move-only type that sends
//! `ECANCELED` on drop if the handler returns without having sent an
//! explicit reply (spec §6.3: "never replies twice... sends a default
//! CANCELED error"), grounded in `include/dragonstash/fuse/request.hpp`'s
//! `Request` move-only wrapper around `fuse_req_t`.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::time::Duration;

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyDirectoryPlus,
    ReplyEmpty, ReplyEntry, ReplyOpen, Request,
};
use tracing::warn;

use crate::adapter::Adapter;
use crate::codec::{mode_kind, S_IFBLK, S_IFCHR, S_IFDIR, S_IFIFO, S_IFLNK, S_IFREG, S_IFSOCK};
use crate::engine::Stat;
use crate::error::Errno;

const ATTR_TTL: Duration = Duration::from_secs(1);
const ENTRY_TTL: Duration = Duration::from_secs(1);
const GENERATION: u64 = 0;

fn file_type_of(mode: u32) -> FileType {
    match mode_kind(mode) {
        S_IFDIR => FileType::Directory,
        S_IFREG => FileType::RegularFile,
        S_IFLNK => FileType::Symlink,
        S_IFBLK => FileType::BlockDevice,
        S_IFCHR => FileType::CharDevice,
        S_IFIFO => FileType::NamedPipe,
        S_IFSOCK => FileType::Socket,
        _ => FileType::RegularFile,
    }
}

fn file_attr(st: &Stat) -> FileAttr {
    FileAttr {
        ino: st.ino,
        size: st.size,
        blocks: st.nblocks,
        atime: std::time::UNIX_EPOCH + Duration::new(st.atime.sec, st.atime.nsec as u32),
        mtime: std::time::UNIX_EPOCH + Duration::new(st.mtime.sec, st.mtime.nsec as u32),
        ctime: std::time::UNIX_EPOCH + Duration::new(st.ctime.sec, st.ctime.nsec as u32),
        crtime: std::time::UNIX_EPOCH,
        kind: file_type_of(st.mode),
        perm: (st.mode & 0o7777) as u16,
        nlink: 1,
        uid: st.uid,
        gid: st.gid,
        rdev: 0,
        blksize: 4096,
        flags: 0,
    }
}

/// Send `err.0` through whichever concrete `fuser::Reply*` a handler
/// holds, so [`Guard`] can stay generic over all of them.
trait ReplyError {
    fn send_error(self, err: Errno);
}

impl ReplyError for ReplyEntry {
    fn send_error(self, err: Errno) {
        self.error(err.0);
    }
}
impl ReplyError for ReplyAttr {
    fn send_error(self, err: Errno) {
        self.error(err.0);
    }
}
impl ReplyError for ReplyData {
    fn send_error(self, err: Errno) {
        self.error(err.0);
    }
}
impl ReplyError for ReplyEmpty {
    fn send_error(self, err: Errno) {
        self.error(err.0);
    }
}
impl ReplyError for ReplyOpen {
    fn send_error(self, err: Errno) {
        self.error(err.0);
    }
}
impl ReplyError for ReplyDirectory {
    fn send_error(self, err: Errno) {
        self.error(err.0);
    }
}
impl ReplyError for ReplyDirectoryPlus {
    fn send_error(self, err: Errno) {
        self.error(err.0);
    }
}

/// Move-only wrapper around a `fuser::Reply*`. `take()` hands back the
/// inner reply for the handler to answer with; if the guard is
/// dropped without `take()` having been called, it sends `ECANCELED`.
struct Guard<R: ReplyError>(Option<R>);

impl<R: ReplyError> Guard<R> {
    fn new(reply: R) -> Self {
        Guard(Some(reply))
    }

    fn take(mut self) -> R {
        self.0.take().expect("Guard replied twice")
    }
}

impl<R: ReplyError> Drop for Guard<R> {
    fn drop(&mut self) {
        if let Some(reply) = self.0.take() {
            reply.send_error(Errno::CANCELED);
        }
    }
}

/// `fuser::Filesystem` adapter; every method opens exactly one
/// [`Adapter`] call and marshals its result (spec §4.6, §6.3).
pub struct DragonStashFs {
    adapter: Adapter,
}

impl DragonStashFs {
    pub fn new(adapter: Adapter) -> Self {
        DragonStashFs { adapter }
    }
}

impl Filesystem for DragonStashFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let guard = Guard::new(reply);
        match self.adapter.lookup(parent, name.as_bytes()) {
            Ok(entry) => guard.take().entry(&ENTRY_TTL, &file_attr(&entry.stat), GENERATION),
            Err(e) => guard.take().send_error(e),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        if let Err(e) = self.adapter.forget(ino, nlookup) {
            warn!(ino, nlookup, %e, "forget failed");
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let guard = Guard::new(reply);
        match self.adapter.getattr(ino) {
            Ok(st) => guard.take().attr(&ATTR_TTL, &file_attr(&st)),
            Err(e) => guard.take().send_error(e),
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        let guard = Guard::new(reply);
        match self.adapter.readlink(ino) {
            Ok(target) => guard.take().data(&target),
            Err(e) => guard.take().send_error(e),
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let guard = Guard::new(reply);
        match self.adapter.opendir(ino) {
            Ok(()) => guard.take().opened(0, 0),
            Err(e) => guard.take().send_error(e),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let mut cursor = offset as u64;
        loop {
            match self.adapter.readdir(ino, cursor) {
                Ok(entry) => {
                    cursor = entry.ino;
                    let full = reply.add(
                        entry.ino,
                        cursor as i64,
                        file_type_of(entry.mode),
                        OsStr::from_bytes(&entry.name),
                    );
                    if full {
                        break;
                    }
                }
                Err(Errno::SUCCESS) => break,
                Err(e) => {
                    reply.error(e.0);
                    return;
                }
            }
        }
        reply.ok();
    }

    fn readdirplus(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectoryPlus,
    ) {
        let mut cursor = offset as u64;
        loop {
            match self.adapter.readdirplus(ino, cursor) {
                Ok((entry, Some(stat))) => {
                    cursor = entry.ino;
                    let full = reply.add(
                        entry.ino,
                        cursor as i64,
                        OsStr::from_bytes(&entry.name),
                        &ENTRY_TTL,
                        &file_attr(&stat),
                        GENERATION,
                    );
                    if full {
                        break;
                    }
                }
                Ok((entry, None)) => {
                    // doomed between readdir and lock; skip but resume after it.
                    cursor = entry.ino;
                }
                Err(Errno::SUCCESS) => break,
                Err(e) => {
                    reply.error(e.0);
                    return;
                }
            }
        }
        reply.ok();
    }
}
