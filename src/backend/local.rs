//! A backend mirroring a real local directory tree (spec §6.3, §9).
//!
//! Grounded in `include/local_backend.hpp`/`src/local_backend.cpp`,
//! which wraps raw `open`/`opendir`/`lstat`/`readlink`/`pread`/`pwrite`
//! syscalls under one root path. Here `std::fs` plus
//! `std::os::unix::fs::FileExt` (`read_at`/`write_at`, the safe-Rust
//! `pread`/`pwrite` equivalents) cover the same ground without
//! dropping to `libc` directly, the way `LocalFilesystem::map_path`
//! joins every request path onto its root before touching the OS.

use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::{FileExt, FileTypeExt, MetadataExt, OpenOptionsExt};
use std::path::PathBuf;

use crate::backend::{Backend, BackendDirEntry, BackendFile, BackendStat, DirIter};
use crate::codec::Timespec;
use crate::error::{Errno, Result};

fn timespec_from_secs_nanos(secs: i64, nanos: i64) -> Timespec {
    Timespec { sec: secs.max(0) as u64, nsec: nanos.max(0) as u64 }
}

fn stat_from_metadata(meta: &fs::Metadata) -> BackendStat {
    BackendStat {
        mode: meta.mode(),
        size: meta.size(),
        ino: meta.ino(),
        uid: meta.uid(),
        gid: meta.gid(),
        atime: timespec_from_secs_nanos(meta.atime(), meta.atime_nsec()),
        mtime: timespec_from_secs_nanos(meta.mtime(), meta.mtime_nsec()),
        ctime: timespec_from_secs_nanos(meta.ctime(), meta.ctime_nsec()),
    }
}

/// Mirrors a real directory tree rooted at `root` (spec §6.3,
/// `LocalFilesystem`). Every path handed to the trait methods is
/// expected to be absolute and is joined onto `root` with the leading
/// `/` stripped, matching `LocalFilesystem::map_path`.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalBackend { root: root.into() }
    }

    fn map_path(&self, path: &[u8]) -> Result<PathBuf> {
        if path.first() != Some(&b'/') {
            return Err(Errno::INVAL);
        }
        let rel = std::str::from_utf8(&path[1..]).map_err(|_| Errno::INVAL)?;
        Ok(self.root.join(rel))
    }
}

struct LocalFile {
    file: File,
}

impl BackendFile for LocalFile {
    fn fstat(&mut self) -> Result<BackendStat> {
        let meta = self.file.metadata()?;
        Ok(stat_from_metadata(&meta))
    }

    fn pread(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        match self.file.read_at(buf, offset) {
            Ok(n) => Ok(n),
            Err(e) => Err(e.into()),
        }
    }

    fn pwrite(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        self.file.write_at(buf, offset)?;
        Ok(buf.len())
    }

    fn fsync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        // `File::drop` closes the descriptor; nothing else to flush.
        Ok(())
    }
}

struct LocalDirIter {
    dot_state: u8,
    entries: std::vec::IntoIter<fs::DirEntry>,
}

fn mode_for_entry(entry: &fs::DirEntry) -> u32 {
    let Ok(file_type) = entry.file_type() else {
        return 0;
    };
    if file_type.is_dir() {
        libc::S_IFDIR
    } else if file_type.is_file() {
        libc::S_IFREG
    } else if file_type.is_symlink() {
        libc::S_IFLNK
    } else if file_type.is_block_device() {
        libc::S_IFBLK
    } else if file_type.is_char_device() {
        libc::S_IFCHR
    } else if file_type.is_fifo() {
        libc::S_IFIFO
    } else if file_type.is_socket() {
        libc::S_IFSOCK
    } else {
        0
    }
}

impl DirIter for LocalDirIter {
    fn next(&mut self) -> Result<Option<BackendDirEntry>> {
        let zero = Timespec { sec: 0, nsec: 0 };
        match self.dot_state {
            0 => {
                self.dot_state = 1;
                return Ok(Some(BackendDirEntry {
                    name: b".".to_vec(),
                    stat: BackendStat {
                        mode: libc::S_IFDIR,
                        size: 0,
                        ino: 0,
                        uid: 0,
                        gid: 0,
                        atime: zero,
                        mtime: zero,
                        ctime: zero,
                    },
                }));
            }
            1 => {
                self.dot_state = 2;
                return Ok(Some(BackendDirEntry {
                    name: b"..".to_vec(),
                    stat: BackendStat {
                        mode: libc::S_IFDIR,
                        size: 0,
                        ino: 0,
                        uid: 0,
                        gid: 0,
                        atime: zero,
                        mtime: zero,
                        ctime: zero,
                    },
                }));
            }
            _ => {}
        }
        match self.entries.next() {
            Some(entry) => {
                let mode = mode_for_entry(&entry);
                let ino = entry.metadata().map(|m| m.ino()).unwrap_or(0);
                Ok(Some(BackendDirEntry {
                    name: entry.file_name().into_vec(),
                    stat: BackendStat {
                        mode,
                        size: 0,
                        ino,
                        uid: 0,
                        gid: 0,
                        atime: zero,
                        mtime: zero,
                        ctime: zero,
                    },
                }))
            }
            None => Ok(None),
        }
    }
}

use std::os::unix::ffi::OsStringExt;

impl Backend for LocalBackend {
    fn lstat(&self, path: &[u8]) -> Result<BackendStat> {
        let mapped = self.map_path(path)?;
        let meta = fs::symlink_metadata(&mapped)?;
        Ok(stat_from_metadata(&meta))
    }

    fn readlink(&self, path: &[u8]) -> Result<Vec<u8>> {
        let mapped = self.map_path(path)?;
        let target = fs::read_link(&mapped)?;
        Ok(target.into_os_string().into_vec())
    }

    fn opendir(&self, path: &[u8]) -> Result<Box<dyn DirIter>> {
        let mapped = self.map_path(path)?;
        let entries: std::result::Result<Vec<fs::DirEntry>, std::io::Error> =
            fs::read_dir(&mapped)?.collect();
        let entries = entries?;
        Ok(Box::new(LocalDirIter { dot_state: 0, entries: entries.into_iter() }))
    }

    fn open(&self, path: &[u8], flags: i32, mode: u32) -> Result<Box<dyn BackendFile>> {
        let mapped = self.map_path(path)?;
        let mut options = OpenOptions::new();
        options.read(true);
        if flags & libc::O_WRONLY != 0 || flags & libc::O_RDWR != 0 {
            options.write(true);
        }
        if flags & libc::O_CREAT != 0 {
            options.create(true);
        }
        options.mode(mode);
        let file = options.open(&mapped)?;
        Ok(Box::new(LocalFile { file }))
    }
}
