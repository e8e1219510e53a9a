//! The Metadata Engine (spec §4.5): a transactional inode/directory
//! store layered on an embedded MVCC key-value database.
//!
//! ```text
//!            Engine
//!              |
//!       redb::Database  (single file, six logical partitions)
//!         /          \
//!   ReadTransaction   WriteTransaction  (nestable via savepoints)
//!                           |
//!                   TransactionHook queue ---- LockTable (process-wide)
//! ```
//!
//! `redb` stands in for the original's LMDB (`lmdb-safe`): both give
//! single-writer/multi-reader MVCC, and `redb`'s savepoints are what
//! make nested read-write transactions with per-level rollback
//! (§4.5.3) possible without a bespoke WAL.

pub mod hooks;
pub mod locks;
pub mod transaction;

use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use redb::TableDefinition;

use crate::codec::{CommonFileAttributes, RawInodeV1, Timespec, INODE_VERSION, ROOT_INO, S_IFDIR};
use crate::error::DsError;
use locks::{LockTable, SharedLockTable};
pub use transaction::{NestedTransaction, ReadTransaction, WriteTransaction};

pub(crate) const META: TableDefinition<&str, u64> = TableDefinition::new("meta");
pub(crate) const INODES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("inodes");
pub(crate) const TREE_BY_INO: TableDefinition<&[u8], &[u8]> = TableDefinition::new("tree_by_ino");
pub(crate) const TREE_BY_NAME: TableDefinition<&[u8], &[u8]> = TableDefinition::new("tree_by_name");
pub(crate) const ORPHANS: TableDefinition<&[u8], u8> = TableDefinition::new("orphans");
pub(crate) const LINKS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("links");

pub(crate) const NEXT_INO_KEY: &str = "next_ino";

/// Derived from a conservative page-sized key budget: 8 bytes of
/// `(parent, name)` prefix inside a 4096-byte logical page, per
/// spec §4.5.6 "derived from the KV store's max key size".
pub const MAX_NAME_LEN: usize = 4096 - 8;

pub(crate) fn ino_key(ino: u64) -> [u8; 8] {
    ino.to_be_bytes()
}

pub(crate) fn tree_by_ino_key(parent: u64, child: u64) -> [u8; 16] {
    let mut buf = [0u8; 16];
    buf[0..8].copy_from_slice(&parent.to_be_bytes());
    buf[8..16].copy_from_slice(&child.to_be_bytes());
    buf
}

pub(crate) fn split_tree_by_ino_key(key: &[u8]) -> (u64, u64) {
    let parent = u64::from_be_bytes(key[0..8].try_into().expect("tree_by_ino key"));
    let child = u64::from_be_bytes(key[8..16].try_into().expect("tree_by_ino key"));
    (parent, child)
}

pub(crate) fn tree_by_name_key(parent: u64, name: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + name.len());
    buf.extend_from_slice(&parent.to_be_bytes());
    buf.extend_from_slice(name);
    buf
}

pub(crate) fn split_tree_by_name_key(key: &[u8]) -> (u64, &[u8]) {
    let parent = u64::from_be_bytes(key[0..8].try_into().expect("tree_by_name key"));
    (parent, &key[8..])
}

/// Attributes supplied by a caller of `emplace` (spec §4.5.6).
#[derive(Debug, Clone, Copy)]
pub struct Attrs {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub nblocks: u64,
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ctime: Timespec,
}

/// What `getattr` hands back (spec §4.5.7).
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub ino: u64,
    pub parent: u64,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub nblocks: u64,
    pub atime: Timespec,
    pub mtime: Timespec,
    pub ctime: Timespec,
    pub flags: crate::codec::InodeFlags,
}

/// One entry yielded by `readdir` (spec §4.5.7), paired with its name.
#[derive(Debug, Clone)]
pub struct DirEntrySummary {
    pub name: Vec<u8>,
    pub ino: u64,
    pub mode: u32,
}

fn now_timespec() -> Timespec {
    let dur = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    Timespec { sec: dur.as_secs(), nsec: dur.subsec_nanos() as u64 }
}

pub struct Engine {
    db: redb::Database,
    locks: SharedLockTable,
}

impl Engine {
    /// Open (creating if absent) the database at `path`, ensure the
    /// root inode and `next_ino` counter exist, and sweep any orphans
    /// left over from a previous run (spec §4.5.2).
    pub fn open(path: &Path) -> std::result::Result<Engine, DsError> {
        let db = redb::Database::create(path)?;
        {
            let txn = db.begin_write()?;
            {
                let mut meta = txn.open_table(META)?;
                let mut inodes = txn.open_table(INODES)?;
                // Touch every table so a brand-new file has all six
                // partitions present even before anything is written
                // to them.
                let _ = txn.open_table(TREE_BY_INO)?;
                let _ = txn.open_table(TREE_BY_NAME)?;
                let _ = txn.open_table(ORPHANS)?;
                let _ = txn.open_table(LINKS)?;

                if meta.get(NEXT_INO_KEY)?.is_none() {
                    meta.insert(NEXT_INO_KEY, ROOT_INO + 1)?;
                    let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
                    let now = now_timespec();
                    let attr = CommonFileAttributes {
                        size: 0,
                        nblocks: 0,
                        uid,
                        gid,
                        atime: now,
                        mtime: now,
                        ctime: now,
                    };
                    let root = RawInodeV1::new(ROOT_INO, attr, S_IFDIR | 0o755);
                    debug_assert_eq!(root.version, INODE_VERSION);
                    inodes.insert(ino_key(ROOT_INO).as_slice(), root.encode().as_slice())?;
                }
            }
            txn.commit()?;
        }

        let engine = Engine { db, locks: Arc::new(Mutex::new(LockTable::default())) };
        {
            let mut write = engine.begin_write()?;
            write.cleanup_orphans()?;
            write.commit()?;
        }
        Ok(engine)
    }

    pub fn begin_read(&self) -> std::result::Result<ReadTransaction, DsError> {
        let txn = self.db.begin_read()?;
        Ok(ReadTransaction { txn })
    }

    pub fn begin_write(&self) -> std::result::Result<WriteTransaction<'_>, DsError> {
        let txn = self.db.begin_write()?;
        Ok(WriteTransaction::new(self, txn))
    }

    pub(crate) fn locks(&self) -> &SharedLockTable {
        &self.locks
    }
}
