//! Move-only owner of an OS file descriptor (spec §4.2).
//!
//! Used by [`crate::blocklist::Blocklist`]. On drop, a still-owned
//! descriptor is closed; [`FileHandle::release`] hands ownership to the
//! caller without running that close.

use std::fs::File;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};

#[derive(Debug)]
pub struct FileHandle(Option<File>);

impl FileHandle {
    pub fn new(file: File) -> Self {
        FileHandle(Some(file))
    }

    pub fn as_file(&self) -> &File {
        self.0.as_ref().expect("FileHandle used after release")
    }

    pub fn as_file_mut(&mut self) -> &mut File {
        self.0.as_mut().expect("FileHandle used after release")
    }

    /// Relinquish ownership of the descriptor without closing it. The
    /// caller becomes responsible for its lifetime.
    #[must_use]
    pub fn release(mut self) -> RawFd {
        self.0.take().expect("FileHandle used after release").into_raw_fd()
    }
}

impl AsRawFd for FileHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.as_file().as_raw_fd()
    }
}

impl From<File> for FileHandle {
    fn from(file: File) -> Self {
        FileHandle::new(file)
    }
}

/// Safety: the caller asserts `fd` is an open, otherwise-unowned descriptor.
pub unsafe fn from_raw_fd(fd: RawFd) -> FileHandle {
    FileHandle::new(File::from_raw_fd(fd))
}
