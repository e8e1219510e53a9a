//! Versioned, fixed-layout record codecs for inodes and directory
//! entries (spec §4.4, §6.1).
//!
//! Both record kinds store their version as the first byte. The only
//! currently-defined version (1) is a flat, little-endian, no-padding
//! layout. Decoding a buffer that is suitably aligned for the record
//! returns a [`Decoded::Borrowed`] view directly into it; otherwise the
//! bytes are copied into a [`Decoded::Owned`] value. [`zerocopy`] is
//! what makes this alias-or-copy decision mechanical rather than
//! `unsafe`-by-hand — it is already the tool two of the teacher pack's
//! sibling repos (`octox`, `xv6-public`) reach for on exactly this kind
//! of on-disk/wire record.

use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::error::Errno;

pub const INVALID_INO: u64 = 0;
pub const ROOT_INO: u64 = 1;

/// A value decoded from a byte buffer, aliasing it when possible.
/// Callers must keep the originating buffer alive for as long as a
/// `Borrowed` view is in use — enforced here by tying the lifetime of
/// the enum to the buffer's.
pub enum Decoded<'a, T> {
    Borrowed(&'a T),
    Owned(T),
}

impl<'a, T> std::ops::Deref for Decoded<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        match self {
            Decoded::Borrowed(r) => r,
            Decoded::Owned(v) => v,
        }
    }
}

bitflags::bitflags! {
    /// Inode flag bitset (spec §3.1). `SYNCED` is the only flag
    /// currently defined.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct InodeFlags: u16 {
        const SYNCED = 1 << 0;
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, FromBytes, FromZeroes, AsBytes)]
pub struct Timespec {
    pub sec: u64,
    pub nsec: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, FromBytes, FromZeroes, AsBytes)]
pub struct CommonFileAttributes {
    pub size: u64,
    pub nblocks: u64,
    pub uid: u32,
    pub gid: u32,
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ctime: Timespec,
}

/// POSIX format bits within `mode` (the high bits of `st_mode`), used
/// to tell the "kind" of an inode apart when deciding whether an
/// `emplace` replace is a same-kind update or a kind change.
pub const S_IFMT: u32 = 0o170000;
pub const S_IFIFO: u32 = 0o010000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFSOCK: u32 = 0o140000;

pub fn mode_kind(mode: u32) -> u32 {
    mode & S_IFMT
}

/// On-disk inode record (version 1): `u8 version=1; u8 reserved; u16
/// flags; u32 reserved; u64 parent; CommonFileAttributes; u32 mode;`.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, FromZeroes, AsBytes)]
pub struct RawInodeV1 {
    pub version: u8,
    pub reserved0: u8,
    pub flags: u16,
    pub reserved2: u32,
    pub parent: u64,
    pub attr: CommonFileAttributes,
    pub mode: u32,
}

pub const INODE_VERSION: u8 = 1;
pub const INODE_SIZE: usize = std::mem::size_of::<RawInodeV1>();

impl RawInodeV1 {
    pub fn new(parent: u64, attr: CommonFileAttributes, mode: u32) -> Self {
        RawInodeV1 {
            version: INODE_VERSION,
            reserved0: 0,
            flags: 0,
            reserved2: 0,
            parent,
            attr,
            mode,
        }
    }

    pub fn flags(&self) -> InodeFlags {
        InodeFlags::from_bits_truncate(self.flags)
    }

    pub fn set_flags(&mut self, flags: InodeFlags) {
        self.flags = flags.bits();
    }

    /// Decode a buffer, aliasing it when alignment permits.
    pub fn decode(buf: &[u8]) -> Result<Decoded<'_, RawInodeV1>, Errno> {
        if buf.is_empty() {
            return Err(Errno::INVAL);
        }
        if buf[0] != INODE_VERSION {
            return Err(Errno::INVAL);
        }
        if buf.len() < INODE_SIZE {
            return Err(Errno::INVAL);
        }
        if let Some(r) = RawInodeV1::ref_from_prefix(buf) {
            Ok(Decoded::Borrowed(r))
        } else {
            let owned = RawInodeV1::read_from_prefix(buf).ok_or(Errno::INVAL)?;
            Ok(Decoded::Owned(owned))
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

/// On-disk directory entry record (version 1): fixed fields followed
/// by the entry name as the remaining bytes of the buffer (spec §4.4,
/// §6.1).
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, FromZeroes, AsBytes)]
pub struct RawDirEntryV1 {
    pub version: u8,
    pub reserved0: u8,
    pub flags: u16,
    pub mode: u32,
    pub entry_ino: u64,
}

pub const DIRENTRY_VERSION: u8 = 1;
pub const DIRENTRY_HEADER_SIZE: usize = std::mem::size_of::<RawDirEntryV1>();

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DirEntryFlags: u16 {
        /// Marked by `start_dir_rewrite`; cleared by a matching `emplace`.
        const REWRITE_DELETE_CANDIDATE = 1 << 0;
    }
}

impl RawDirEntryV1 {
    pub fn new(entry_ino: u64, mode: u32) -> Self {
        RawDirEntryV1 {
            version: DIRENTRY_VERSION,
            reserved0: 0,
            flags: 0,
            mode,
            entry_ino,
        }
    }

    /// Decode a buffer into `(header, name)`, aliasing the header when
    /// alignment permits.
    pub fn decode(buf: &[u8]) -> Result<(Decoded<'_, RawDirEntryV1>, &[u8]), Errno> {
        if buf.is_empty() {
            return Err(Errno::INVAL);
        }
        if buf[0] != DIRENTRY_VERSION {
            return Err(Errno::INVAL);
        }
        if buf.len() < DIRENTRY_HEADER_SIZE {
            return Err(Errno::INVAL);
        }
        let name = &buf[DIRENTRY_HEADER_SIZE..];
        if let Some(r) = RawDirEntryV1::ref_from_prefix(buf) {
            Ok((Decoded::Borrowed(r), name))
        } else {
            let owned = RawDirEntryV1::read_from_prefix(buf).ok_or(Errno::INVAL)?;
            Ok((Decoded::Owned(owned), name))
        }
    }

    pub fn encode(&self, name: &[u8]) -> Vec<u8> {
        let mut buf = self.as_bytes().to_vec();
        buf.extend_from_slice(name);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_attr() -> CommonFileAttributes {
        CommonFileAttributes {
            size: 42,
            nblocks: 1,
            uid: 1000,
            gid: 1000,
            atime: Timespec { sec: 1, nsec: 0 },
            mtime: Timespec { sec: 2, nsec: 0 },
            ctime: Timespec { sec: 3, nsec: 0 },
        }
    }

    #[test]
    fn inode_roundtrip() {
        let inode = RawInodeV1::new(ROOT_INO, sample_attr(), S_IFDIR | 0o755);
        let bytes = inode.encode();
        let decoded = RawInodeV1::decode(&bytes).unwrap();
        assert_eq!(decoded.parent, ROOT_INO);
        assert_eq!(decoded.attr.size, 42);
        assert_eq!(mode_kind(decoded.mode), S_IFDIR);
    }

    #[test]
    fn inode_rejects_empty_and_short_and_bad_version() {
        assert_eq!(RawInodeV1::decode(&[]).unwrap_err(), Errno::INVAL);
        assert_eq!(RawInodeV1::decode(&[1, 2, 3]).unwrap_err(), Errno::INVAL);
        let mut bytes = RawInodeV1::new(0, sample_attr(), 0).encode();
        bytes[0] = 2;
        assert_eq!(RawInodeV1::decode(&bytes).unwrap_err(), Errno::INVAL);
    }

    #[test]
    fn direntry_roundtrip_with_name() {
        let entry = RawDirEntryV1::new(7, S_IFREG | 0o644);
        let bytes = entry.encode(b"hello.txt");
        let (decoded, name) = RawDirEntryV1::decode(&bytes).unwrap();
        assert_eq!(decoded.entry_ino, 7);
        assert_eq!(name, b"hello.txt");
    }
}
