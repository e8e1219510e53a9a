//! Read-only and read-write transaction handles (spec §4.5.3–§4.5.12).
//!
//! [`WriteTransaction`] tracks a stack of [`Frame`]s: the base frame is
//! the outermost transaction, and [`WriteTransaction::begin_nested`]
//! pushes one more, backed by a `redb::Savepoint`, for each level of
//! nesting (§4.5.3). Every mutating method always affects the
//! *top* frame, so a [`NestedTransaction`] — which `Deref`s straight
//! through to its parent — automatically operates on its own frame
//! without duplicating any of this transaction's methods.

use std::collections::{HashSet, VecDeque};

use parking_lot::{ArcMutexGuard, RawMutex};

use super::hooks::{self, TransactionHook};
use super::locks::LockTable;
use super::read;
use super::{
    ino_key, tree_by_ino_key, tree_by_name_key, split_tree_by_ino_key, Attrs, DirEntrySummary,
    Engine, Stat, INODES, LINKS, MAX_NAME_LEN, ORPHANS, TREE_BY_INO, TREE_BY_NAME,
};
use crate::codec::{
    mode_kind, CommonFileAttributes, InodeFlags, RawDirEntryV1, RawInodeV1, S_IFDIR, S_IFLNK,
};
use crate::error::{DsError, Errno, Result};

/// A read-only snapshot transaction (spec §4.5.3).
pub struct ReadTransaction {
    pub(crate) txn: redb::ReadTransaction,
}

impl ReadTransaction {
    pub fn lookup(&self, parent: u64, name: &[u8]) -> Result<u64> {
        let table = self.txn.open_table(TREE_BY_NAME).map_err(DsError::from)?;
        read::lookup(&table, parent, name)
    }

    pub fn name(&self, parent: u64, ino: u64) -> Result<Vec<u8>> {
        let table = self.txn.open_table(TREE_BY_INO).map_err(DsError::from)?;
        read::name(&table, parent, ino)
    }

    pub fn parent(&self, ino: u64) -> Result<u64> {
        let table = self.txn.open_table(INODES).map_err(DsError::from)?;
        read::parent(&table, ino)
    }

    pub fn getattr(&self, ino: u64) -> Result<Stat> {
        let table = self.txn.open_table(INODES).map_err(DsError::from)?;
        read::getattr(&table, ino)
    }

    pub fn readlink(&self, ino: u64) -> Result<Vec<u8>> {
        let inodes = self.txn.open_table(INODES).map_err(DsError::from)?;
        let links = self.txn.open_table(LINKS).map_err(DsError::from)?;
        read::readlink(&inodes, &links, ino)
    }

    pub fn readdir(&self, dir: u64, cursor: u64) -> Result<DirEntrySummary> {
        let inodes = self.txn.open_table(INODES).map_err(DsError::from)?;
        let tree_by_ino = self.txn.open_table(TREE_BY_INO).map_err(DsError::from)?;
        read::readdir(&inodes, &tree_by_ino, dir, cursor)
    }

    pub fn path(&self, ino: u64) -> Result<Vec<u8>> {
        let inodes = self.txn.open_table(INODES).map_err(DsError::from)?;
        let tree_by_ino = self.txn.open_table(TREE_BY_INO).map_err(DsError::from)?;
        read::path(&inodes, &tree_by_ino, ino)
    }
}

struct Frame {
    savepoint: Option<redb::Savepoint>,
    hooks: Vec<TransactionHook>,
}

struct RewriteState {
    dir: u64,
    candidates: HashSet<u64>,
}

/// A read-write transaction. Single-writer: the caller serializes
/// access to the only live instance for a given [`Engine`].
pub struct WriteTransaction<'env> {
    engine: &'env Engine,
    txn: redb::WriteTransaction,
    frames: Vec<Frame>,
    lock_hold: Option<ArcMutexGuard<RawMutex, LockTable>>,
    rewrite: Option<RewriteState>,
}

impl<'env> WriteTransaction<'env> {
    pub(crate) fn new(engine: &'env Engine, txn: redb::WriteTransaction) -> Self {
        WriteTransaction {
            engine,
            txn,
            frames: vec![Frame { savepoint: None, hooks: Vec::new() }],
            lock_hold: None,
            rewrite: None,
        }
    }

    fn lock_table_mut(&mut self) -> &mut LockTable {
        if self.lock_hold.is_none() {
            self.lock_hold = Some(self.engine.locks().lock_arc());
        }
        self.lock_hold.as_deref_mut().expect("just ensured")
    }

    fn push_hook(&mut self, hook: TransactionHook) {
        self.frames.last_mut().expect("at least one frame").hooks.push(hook);
    }

    // ---- read-only operations, mirroring `ReadTransaction` ----

    pub fn lookup(&self, parent: u64, name: &[u8]) -> Result<u64> {
        let table = self.txn.open_table(TREE_BY_NAME).map_err(DsError::from)?;
        read::lookup(&table, parent, name)
    }

    pub fn name(&self, parent: u64, ino: u64) -> Result<Vec<u8>> {
        let table = self.txn.open_table(TREE_BY_INO).map_err(DsError::from)?;
        read::name(&table, parent, ino)
    }

    pub fn parent(&self, ino: u64) -> Result<u64> {
        let table = self.txn.open_table(INODES).map_err(DsError::from)?;
        read::parent(&table, ino)
    }

    pub fn getattr(&self, ino: u64) -> Result<Stat> {
        let table = self.txn.open_table(INODES).map_err(DsError::from)?;
        read::getattr(&table, ino)
    }

    pub fn readlink(&self, ino: u64) -> Result<Vec<u8>> {
        let inodes = self.txn.open_table(INODES).map_err(DsError::from)?;
        let links = self.txn.open_table(LINKS).map_err(DsError::from)?;
        read::readlink(&inodes, &links, ino)
    }

    pub fn readdir(&self, dir: u64, cursor: u64) -> Result<DirEntrySummary> {
        let inodes = self.txn.open_table(INODES).map_err(DsError::from)?;
        let tree_by_ino = self.txn.open_table(TREE_BY_INO).map_err(DsError::from)?;
        read::readdir(&inodes, &tree_by_ino, dir, cursor)
    }

    pub fn path(&self, ino: u64) -> Result<Vec<u8>> {
        let inodes = self.txn.open_table(INODES).map_err(DsError::from)?;
        let tree_by_ino = self.txn.open_table(TREE_BY_INO).map_err(DsError::from)?;
        read::path(&inodes, &tree_by_ino, ino)
    }

    pub fn test_flag(&self, ino: u64, flag: InodeFlags) -> Result<bool> {
        Ok(self.getattr(ino)?.flags.contains(flag))
    }

    /// `writelink(ino, target)` (spec §3.3, §4.5.1): record a symlink's
    /// target in the `links` partition. `ino` must already name a
    /// symlink-kind inode; matches the original's
    /// `Cache::writelink(ino, dest)`.
    pub fn writelink(&mut self, ino: u64, target: &[u8]) -> Result<()> {
        if mode_kind(self.getattr(ino)?.mode) != S_IFLNK {
            return Err(Errno::INVAL);
        }
        let mut links = self.txn.open_table(LINKS).map_err(DsError::from)?;
        links.insert(ino_key(ino).as_slice(), target).map_err(DsError::from)?;
        Ok(())
    }

    // ---- inode allocation (§4.5.5) ----

    pub fn allocate_next_inode(&mut self) -> Result<u64> {
        let mut meta = self.txn.open_table(super::META).map_err(DsError::from)?;
        let current = meta
            .get(super::NEXT_INO_KEY)
            .map_err(DsError::from)?
            .map(|g| g.value())
            .ok_or(Errno::IO)?;
        meta.insert(super::NEXT_INO_KEY, current + 1).map_err(DsError::from)?;
        Ok(current)
    }

    // ---- emplace (§4.5.6) ----

    pub fn emplace(&mut self, parent: u64, name: &[u8], attrs: Attrs) -> Result<u64> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(Errno::NAMETOOLONG);
        }
        if name.contains(&0) || name.contains(&b'/') {
            return Err(Errno::INVAL);
        }

        let existing = match self.lookup(parent, name) {
            Ok(ino) => Some(ino),
            Err(Errno::NOENT) => None,
            Err(e) => return Err(e),
        };

        let ino = match existing {
            Some(existing_ino) => {
                let existing_mode = self.getattr(existing_ino)?.mode;
                if mode_kind(existing_mode) == mode_kind(attrs.mode) {
                    existing_ino
                } else {
                    self.orphan_ino(parent, existing_ino)?;
                    self.collect_if_unreferenced(existing_ino)?;
                    self.allocate_next_inode()?
                }
            }
            None => self.allocate_next_inode()?,
        };

        let attr = CommonFileAttributes {
            size: attrs.size,
            nblocks: attrs.nblocks,
            uid: attrs.uid,
            gid: attrs.gid,
            atime: attrs.atime,
            mtime: attrs.mtime,
            ctime: attrs.ctime,
        };
        let inode = RawInodeV1::new(parent, attr, attrs.mode);
        {
            let mut inodes = self.txn.open_table(INODES).map_err(DsError::from)?;
            inodes
                .insert(ino_key(ino).as_slice(), inode.encode().as_slice())
                .map_err(DsError::from)?;
        }

        let entry_bytes = RawDirEntryV1::new(ino, attrs.mode).encode(name);
        {
            let mut tree_by_ino = self.txn.open_table(TREE_BY_INO).map_err(DsError::from)?;
            tree_by_ino
                .insert(tree_by_ino_key(parent, ino).as_slice(), entry_bytes.as_slice())
                .map_err(DsError::from)?;
        }
        {
            let mut tree_by_name = self.txn.open_table(TREE_BY_NAME).map_err(DsError::from)?;
            tree_by_name
                .insert(tree_by_name_key(parent, name).as_slice(), entry_bytes.as_slice())
                .map_err(DsError::from)?;
        }

        if let Some(rewrite) = self.rewrite.as_mut() {
            if rewrite.dir == parent {
                rewrite.candidates.remove(&ino);
            }
        }

        Ok(ino)
    }

    // ---- unlink / make_orphan (§4.5.8) ----

    pub fn unlink(&mut self, parent: u64, name: &[u8]) -> Result<()> {
        let ino = self.lookup(parent, name)?;
        self.orphan_ino(parent, ino)?;
        self.collect_if_unreferenced(ino)?;
        Ok(())
    }

    fn orphan_ino(&mut self, parent: u64, ino: u64) -> Result<()> {
        let name = {
            let tree_by_ino = self.txn.open_table(TREE_BY_INO).map_err(DsError::from)?;
            let guard = tree_by_ino
                .get(tree_by_ino_key(parent, ino).as_slice())
                .map_err(DsError::from)?
                .ok_or(Errno::NOENT)?;
            let (_header, name) = RawDirEntryV1::decode(guard.value()).map_err(|_| Errno::IO)?;
            name.to_vec()
        };
        {
            let mut tree_by_ino = self.txn.open_table(TREE_BY_INO).map_err(DsError::from)?;
            tree_by_ino.remove(tree_by_ino_key(parent, ino).as_slice()).map_err(DsError::from)?;
        }
        {
            let mut tree_by_name = self.txn.open_table(TREE_BY_NAME).map_err(DsError::from)?;
            tree_by_name
                .remove(tree_by_name_key(parent, &name).as_slice())
                .map_err(DsError::from)?;
        }
        {
            let mut orphans = self.txn.open_table(ORPHANS).map_err(DsError::from)?;
            orphans.insert(ino_key(ino).as_slice(), 1u8).map_err(DsError::from)?;
        }
        {
            let mut inodes = self.txn.open_table(INODES).map_err(DsError::from)?;
            let mut record = {
                let guard =
                    inodes.get(ino_key(ino).as_slice()).map_err(DsError::from)?.ok_or(Errno::NOENT)?;
                *RawInodeV1::decode(guard.value()).map_err(|_| Errno::IO)?
            };
            record.parent = 0;
            inodes
                .insert(ino_key(ino).as_slice(), record.encode().as_slice())
                .map_err(DsError::from)?;
        }
        Ok(())
    }

    /// Try to GC a single just-orphaned inode immediately, without
    /// waiting for the next full sweep (§4.5.6 step 4, §4.5.10).
    fn collect_if_unreferenced(&mut self, ino: u64) -> Result<()> {
        let mut queue = VecDeque::new();
        queue.push_back(ino);
        while let Some(i) = queue.pop_front() {
            self.try_collect_orphan(i, &mut queue)?;
        }
        Ok(())
    }

    // ---- in-memory locks (§4.5.9) ----

    pub fn lock(&mut self, ino: u64) -> Result<()> {
        self.lock_table_mut().incref(ino)?;
        self.push_hook(TransactionHook::rollback_only(Box::new(move |locks| {
            locks.decref_unchecked(ino, 1)
        })));
        Ok(())
    }

    pub fn release(&mut self, ino: u64, n: u64) {
        self.lock_table_mut().decref(ino, n);
        self.push_hook(TransactionHook::rollback_only(Box::new(move |locks| {
            locks.incref_unchecked(ino, n)
        })));
    }

    // ---- orphan cleanup (§4.5.10) ----

    pub fn cleanup_orphans(&mut self) -> Result<()> {
        let candidates: Vec<u64> = {
            let orphans = self.txn.open_table(ORPHANS).map_err(DsError::from)?;
            let mut out = Vec::new();
            for item in orphans.iter().map_err(DsError::from)? {
                let (k, _v) = item.map_err(DsError::from)?;
                out.push(u64::from_be_bytes(k.value().try_into().expect("ino key")));
            }
            out
        };
        let mut queue: VecDeque<u64> = candidates.into();
        while let Some(ino) = queue.pop_front() {
            self.try_collect_orphan(ino, &mut queue)?;
        }
        Ok(())
    }

    fn try_collect_orphan(&mut self, ino: u64, queue: &mut VecDeque<u64>) -> Result<()> {
        if !self.lock_table_mut().try_doom(ino) {
            return Ok(());
        }

        let mode = match self.getattr(ino) {
            Ok(st) => st.mode,
            Err(Errno::NOENT) => {
                // already collected by an earlier pass through the same queue
                self.lock_table_mut().forget_entry(ino);
                let mut orphans = self.txn.open_table(ORPHANS).map_err(DsError::from)?;
                orphans.remove(ino_key(ino).as_slice()).map_err(DsError::from)?;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        match mode_kind(mode) {
            S_IFLNK => {
                let mut links = self.txn.open_table(LINKS).map_err(DsError::from)?;
                links.remove(ino_key(ino).as_slice()).map_err(DsError::from)?;
            }
            S_IFDIR => {
                let children: Vec<u64> = {
                    let tree_by_ino = self.txn.open_table(TREE_BY_INO).map_err(DsError::from)?;
                    let start = tree_by_ino_key(ino, 0);
                    let end = tree_by_ino_key(ino, u64::MAX);
                    let range =
                        tree_by_ino.range(start.as_slice()..=end.as_slice()).map_err(DsError::from)?;
                    let mut out = Vec::new();
                    for item in range {
                        let (k, _v) = item.map_err(DsError::from)?;
                        out.push(split_tree_by_ino_key(k.value()).1);
                    }
                    out
                };
                for child in children {
                    self.orphan_ino(ino, child)?;
                    queue.push_back(child);
                }
            }
            _ => {
                // regular file: data-file/blocklist deletion is a
                // sibling subsystem (non-goal), only metadata goes here.
            }
        }

        {
            let mut inodes = self.txn.open_table(INODES).map_err(DsError::from)?;
            inodes.remove(ino_key(ino).as_slice()).map_err(DsError::from)?;
        }
        {
            let mut orphans = self.txn.open_table(ORPHANS).map_err(DsError::from)?;
            orphans.remove(ino_key(ino).as_slice()).map_err(DsError::from)?;
        }
        self.lock_table_mut().forget_entry(ino);
        Ok(())
    }

    // ---- directory rewrite (§4.5.11) ----

    pub fn start_dir_rewrite(&mut self, dir: u64) -> Result<()> {
        if self.rewrite.is_some() {
            return Err(Errno::ALREADY);
        }
        let st = self.getattr(dir)?;
        if mode_kind(st.mode) != S_IFDIR {
            return Err(Errno::NOTDIR);
        }
        let candidates: HashSet<u64> = {
            let tree_by_ino = self.txn.open_table(TREE_BY_INO).map_err(DsError::from)?;
            let start = tree_by_ino_key(dir, 0);
            let end = tree_by_ino_key(dir, u64::MAX);
            let range = tree_by_ino.range(start.as_slice()..=end.as_slice()).map_err(DsError::from)?;
            let mut out = HashSet::new();
            for item in range {
                let (k, _v) = item.map_err(DsError::from)?;
                out.insert(split_tree_by_ino_key(k.value()).1);
            }
            out
        };
        self.rewrite = Some(RewriteState { dir, candidates });
        Ok(())
    }

    pub fn finish_dir_rewrite(&mut self) -> Result<()> {
        let rewrite = self.rewrite.take().ok_or(Errno::BADFD)?;
        for child in rewrite.candidates {
            self.orphan_ino(rewrite.dir, child)?;
            self.collect_if_unreferenced(child)?;
        }
        Ok(())
    }

    // ---- flags (§4.5.12) ----

    pub fn update_flags(&mut self, ino: u64, to_set: InodeFlags, to_clear: InodeFlags) -> Result<()> {
        let mut inodes = self.txn.open_table(INODES).map_err(DsError::from)?;
        let mut record = {
            let guard =
                inodes.get(ino_key(ino).as_slice()).map_err(DsError::from)?.ok_or(Errno::NOENT)?;
            *RawInodeV1::decode(guard.value()).map_err(|_| Errno::IO)?
        };
        let mut flags = record.flags();
        flags.remove(to_clear);
        flags.insert(to_set);
        record.set_flags(flags);
        inodes.insert(ino_key(ino).as_slice(), record.encode().as_slice()).map_err(DsError::from)?;
        Ok(())
    }

    // ---- nesting (§4.5.3, §4.5.4, §9) ----

    pub fn begin_nested(&mut self) -> Result<NestedTransaction<'_, 'env>> {
        let savepoint = self.txn.ephemeral_savepoint().map_err(DsError::from)?;
        self.frames.push(Frame { savepoint: Some(savepoint), hooks: Vec::new() });
        Ok(NestedTransaction { parent: self, finished: false })
    }

    fn commit_top_frame(&mut self) {
        debug_assert!(self.frames.len() >= 2, "commit_top_frame on the base frame");
        let frame = self.frames.pop().expect("checked by caller");
        self.frames.last_mut().expect("base frame always present").hooks.extend(frame.hooks);
        // Keep the savepoint's writes; nothing to restore.
        drop(frame.savepoint);
    }

    fn abort_top_frame(&mut self) -> Result<()> {
        debug_assert!(self.frames.len() >= 2, "abort_top_frame on the base frame");
        let frame = self.frames.pop().expect("checked by caller");
        if let Some(savepoint) = &frame.savepoint {
            self.txn.restore_savepoint(savepoint).map_err(DsError::from)?;
        }
        if !frame.hooks.is_empty() {
            hooks::drive_abort(frame.hooks, self.lock_table_mut());
        }
        Ok(())
    }

    // ---- top-level commit / abort ----

    pub fn commit(mut self) -> Result<()> {
        if self.frames.len() != 1 {
            return Err(Errno::BUSY);
        }
        self.cleanup_orphans()?;
        let frame = self.frames.pop().expect("base frame");
        if !frame.hooks.is_empty() {
            let mut hold = self.lock_hold.take().unwrap_or_else(|| self.engine.locks().lock_arc());
            let result = hooks::drive_commit(frame.hooks, &mut hold);
            self.lock_hold = Some(hold);
            result?;
        }
        self.txn.commit().map_err(DsError::from)?;
        Ok(())
    }

    pub fn abort(mut self) -> Result<()> {
        if self.frames.len() != 1 {
            return Err(Errno::BUSY);
        }
        let frame = self.frames.pop().expect("base frame");
        if !frame.hooks.is_empty() {
            hooks::drive_abort(frame.hooks, self.lock_table_mut());
        }
        Ok(())
        // `self.txn` is dropped here without a commit; redb rolls it back.
    }
}

/// A nested read-write transaction (spec §4.5.3). `Deref`/`DerefMut`
/// to the parent, so every `WriteTransaction` method is usable
/// directly — it always targets this transaction's own frame because
/// mutating methods always act on `frames.last_mut()`.
pub struct NestedTransaction<'p, 'env> {
    parent: &'p mut WriteTransaction<'env>,
    finished: bool,
}

impl<'p, 'env> NestedTransaction<'p, 'env> {
    /// Commit: moves this frame's hooks onto the parent's, unexecuted
    /// (§4.5.4: "a nested transaction that commits successfully moves
    /// its hooks to its parent without executing any of them yet").
    pub fn commit(mut self) {
        self.finished = true;
        self.parent.commit_top_frame();
    }

    /// Abort: restores the parent's savepoint and runs this frame's
    /// `rollback` hooks immediately, in reverse order.
    pub fn abort(mut self) -> Result<()> {
        self.finished = true;
        self.parent.abort_top_frame()
    }
}

impl Drop for NestedTransaction<'_, '_> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.parent.abort_top_frame();
        }
    }
}

impl<'env> std::ops::Deref for NestedTransaction<'_, 'env> {
    type Target = WriteTransaction<'env>;
    fn deref(&self) -> &Self::Target {
        self.parent
    }
}

impl<'env> std::ops::DerefMut for NestedTransaction<'_, 'env> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.parent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Timespec, S_IFDIR, S_IFLNK, S_IFREG};

    fn attrs(mode: u32) -> Attrs {
        let now = Timespec { sec: 0, nsec: 0 };
        Attrs { mode, uid: 0, gid: 0, size: 0, nblocks: 0, atime: now, mtime: now, ctime: now }
    }

    fn open_engine(dir: &tempfile::TempDir) -> Engine {
        Engine::open(&dir.path().join("meta.redb")).expect("open engine")
    }

    #[test]
    fn kind_change_replace() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(&dir);

        let mut txn = engine.begin_write().unwrap();
        let ino1 = txn.emplace(crate::codec::ROOT_INO, b"a", attrs(S_IFDIR | 0o755)).unwrap();
        let ino2 = txn.emplace(crate::codec::ROOT_INO, b"a", attrs(S_IFREG | 0o644)).unwrap();
        assert_ne!(ino1, ino2);
        txn.commit().unwrap();

        let read = engine.begin_read().unwrap();
        assert_eq!(read.getattr(ino1).unwrap_err(), Errno::NOENT);
        assert_eq!(mode_kind(read.getattr(ino2).unwrap().mode), S_IFREG);
    }

    #[test]
    fn pinned_replace_survives_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(&dir);

        let mut txn = engine.begin_write().unwrap();
        let ino1 = txn.emplace(crate::codec::ROOT_INO, b"a", attrs(S_IFDIR | 0o755)).unwrap();
        txn.lock(ino1).unwrap();
        let _ino2 = txn.emplace(crate::codec::ROOT_INO, b"a", attrs(S_IFREG | 0o644)).unwrap();
        assert!(txn.getattr(ino1).is_ok());
        txn.commit().unwrap();

        let read = engine.begin_read().unwrap();
        assert!(read.getattr(ino1).is_ok());

        let mut txn = engine.begin_write().unwrap();
        txn.release(ino1, 1);
        txn.commit().unwrap();

        let read = engine.begin_read().unwrap();
        assert_eq!(read.getattr(ino1).unwrap_err(), Errno::NOENT);
    }

    #[test]
    fn directory_rewrite_drops_unmentioned_entries() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(&dir);

        let mut txn = engine.begin_write().unwrap();
        txn.emplace(crate::codec::ROOT_INO, b"e1", attrs(S_IFREG | 0o644)).unwrap();
        txn.emplace(crate::codec::ROOT_INO, b"e2", attrs(S_IFREG | 0o644)).unwrap();
        txn.emplace(crate::codec::ROOT_INO, b"e3", attrs(S_IFREG | 0o644)).unwrap();
        txn.commit().unwrap();

        let mut txn = engine.begin_write().unwrap();
        txn.start_dir_rewrite(crate::codec::ROOT_INO).unwrap();
        txn.emplace(crate::codec::ROOT_INO, b"e1", attrs(S_IFREG | 0o644)).unwrap();
        txn.emplace(crate::codec::ROOT_INO, b"e3", attrs(S_IFREG | 0o644)).unwrap();
        txn.finish_dir_rewrite().unwrap();
        txn.commit().unwrap();

        let read = engine.begin_read().unwrap();
        assert_eq!(read.lookup(crate::codec::ROOT_INO, b"e2").unwrap_err(), Errno::NOENT);
        assert!(read.lookup(crate::codec::ROOT_INO, b"e1").is_ok());
        assert!(read.lookup(crate::codec::ROOT_INO, b"e3").is_ok());
    }

    #[test]
    fn readdir_synthesizes_dot_and_dotdot() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(&dir);
        let mut txn = engine.begin_write().unwrap();
        let sub = txn.emplace(crate::codec::ROOT_INO, b"sub", attrs(S_IFDIR | 0o755)).unwrap();
        let child = txn.emplace(sub, b"child", attrs(S_IFREG | 0o644)).unwrap();
        txn.commit().unwrap();

        let read = engine.begin_read().unwrap();

        // The root is its own parent, so it never synthesizes "..": "."
        // goes straight into the child scan.
        let dot = read.readdir(crate::codec::ROOT_INO, 0).unwrap();
        assert_eq!(dot.name, b".");
        let first = read.readdir(crate::codec::ROOT_INO, dot.ino).unwrap();
        assert_eq!(first.ino, sub);
        assert_eq!(read.readdir(crate::codec::ROOT_INO, first.ino).unwrap_err(), Errno::SUCCESS);

        // A non-root directory does synthesize "..".
        let dot = read.readdir(sub, 0).unwrap();
        assert_eq!(dot.name, b".");
        let dotdot = read.readdir(sub, dot.ino).unwrap();
        assert_eq!(dotdot.name, b"..");
        assert_eq!(dotdot.ino, crate::codec::ROOT_INO);
        let first = read.readdir(sub, dotdot.ino).unwrap();
        assert_eq!(first.ino, child);
        assert_eq!(read.readdir(sub, first.ino).unwrap_err(), Errno::SUCCESS);
    }

    #[test]
    fn nested_abort_restores_lock_count() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(&dir);
        let mut txn = engine.begin_write().unwrap();
        let ino = txn.emplace(crate::codec::ROOT_INO, b"a", attrs(S_IFREG | 0o644)).unwrap();
        txn.commit().unwrap();

        let mut txn = engine.begin_write().unwrap();
        {
            let mut nested = txn.begin_nested().unwrap();
            nested.lock(ino).unwrap();
            nested.abort().unwrap();
        }
        // the lock's rollback hook ran immediately on nested abort
        txn.lock(ino).unwrap();
        txn.release(ino, 1);
        txn.commit().unwrap();
    }

    /// Scenario 6 from spec §8: a reader's `readdirplus` locks each
    /// entry right after reading it; if a concurrent writer has already
    /// doomed that ino (its refcount having dropped to zero as part of
    /// a replace that is still racing the reader's lock attempt), the
    /// lock must fail with STALE rather than succeed against a
    /// half-collected inode.
    #[test]
    fn readdirplus_lock_observes_stale_after_concurrent_doom() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(&dir);

        let mut txn = engine.begin_write().unwrap();
        let ino = txn.emplace(crate::codec::ROOT_INO, b"a", attrs(S_IFREG | 0o644)).unwrap();
        txn.commit().unwrap();

        let mut txn = engine.begin_write().unwrap();
        // Simulates the writer's orphan sweep having reached `try_doom`
        // on `ino` (refcount already zero) a moment before the reader's
        // own `lock` call lands.
        assert!(txn.lock_table_mut().try_doom(ino));
        assert_eq!(txn.lock(ino).unwrap_err(), Errno::STALE);
    }

    #[test]
    fn readlink_rejects_non_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(&dir);
        let mut txn = engine.begin_write().unwrap();
        let ino = txn.emplace(crate::codec::ROOT_INO, b"f", attrs(S_IFREG | 0o644)).unwrap();
        txn.commit().unwrap();

        let read = engine.begin_read().unwrap();
        assert_eq!(read.readlink(ino).unwrap_err(), Errno::INVAL);
        let _ = S_IFLNK;
    }

    #[test]
    fn writelink_then_readlink_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(&dir);
        let mut txn = engine.begin_write().unwrap();
        let ino = txn.emplace(crate::codec::ROOT_INO, b"l", attrs(S_IFLNK | 0o777)).unwrap();
        txn.writelink(ino, b"target").unwrap();
        txn.commit().unwrap();

        let read = engine.begin_read().unwrap();
        assert_eq!(read.readlink(ino).unwrap(), b"target");
    }

    #[test]
    fn writelink_rejects_non_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let engine = open_engine(&dir);
        let mut txn = engine.begin_write().unwrap();
        let ino = txn.emplace(crate::codec::ROOT_INO, b"f", attrs(S_IFREG | 0o644)).unwrap();
        assert_eq!(txn.writelink(ino, b"target").unwrap_err(), Errno::INVAL);
    }
}
