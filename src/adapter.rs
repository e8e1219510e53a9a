//! The Filesystem Adapter (spec §4.6): orchestrates the Metadata
//! Engine and a [`Backend`] collaborator, translating kernel-level
//! requests into cache transactions and backend calls.
//!
//! Grounded in `include/dragonstash/fs.hpp` / `src/fs.cpp`'s
//! `Filesystem` class — one method per supported FUSE operation,
//! each opening exactly one transaction. This module returns plain
//! data (no `fuser` types); `dragonstash::fuse_glue` is what maps
//! these results onto `fuser::Reply*`.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::backend::Backend;
use crate::codec::{mode_kind, InodeFlags, S_IFLNK};
use crate::engine::{Attrs, DirEntrySummary, Engine, Stat};
use crate::error::{Errno, Result};

fn attrs_from_backend_stat(st: &crate::backend::BackendStat) -> Attrs {
    Attrs {
        mode: st.mode,
        uid: st.uid,
        gid: st.gid,
        size: st.size,
        nblocks: st.size.div_ceil(4096),
        atime: st.atime,
        mtime: st.mtime,
        ctime: st.ctime,
    }
}

fn join_backend_path(parent: &[u8], name: &[u8]) -> Vec<u8> {
    let mut out = parent.to_vec();
    if out.last() != Some(&b'/') {
        out.push(b'/');
    }
    out.extend_from_slice(name);
    out
}

/// The result of a successful `lookup` (spec §4.6): the child's inode
/// number and current attributes, already reflected by a lock held on
/// the kernel's behalf.
#[derive(Debug, Clone, Copy)]
pub struct EntryReply {
    pub ino: u64,
    pub stat: Stat,
}

pub struct Adapter {
    engine: Engine,
    backend: Arc<dyn Backend>,
}

impl Adapter {
    pub fn new(engine: Engine, backend: Arc<dyn Backend>) -> Self {
        Adapter { engine, backend }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// spec §4.6 `lookup(parent, name)`.
    pub fn lookup(&self, parent: u64, name: &[u8]) -> Result<EntryReply> {
        let mut txn = self.engine.begin_write()?;
        let parent_path = txn.path(parent)?;
        let backend_path = join_backend_path(&parent_path, name);

        let ino = match self.backend.lstat(&backend_path) {
            Ok(st) => {
                let attrs = attrs_from_backend_stat(&st);
                let ino = txn.emplace(parent, name, attrs)?;
                self.sync_symlink_target(&mut txn, ino, st.mode, &backend_path);
                ino
            }
            Err(Errno::NOTCONN) => match txn.lookup(parent, name) {
                Ok(ino) => ino,
                Err(Errno::NOENT) => {
                    if txn.test_flag(parent, InodeFlags::SYNCED)? {
                        return Err(Errno::NOENT);
                    }
                    return Err(Errno::IO);
                }
                Err(e) => return Err(e),
            },
            Err(e) => {
                let _ = txn.unlink(parent, name);
                let _ = txn.commit();
                return Err(e);
            }
        };

        txn.lock(ino)?;
        let stat = txn.getattr(ino)?;
        txn.commit()?;
        trace!(parent, ino, "lookup");
        Ok(EntryReply { ino, stat })
    }

    /// spec §4.6 `forget(ino, n)`.
    pub fn forget(&self, ino: u64, n: u64) -> Result<()> {
        let mut txn = self.engine.begin_write()?;
        txn.release(ino, n);
        txn.commit()?;
        Ok(())
    }

    /// spec §4.6 `forget_multi`.
    pub fn forget_multi(&self, entries: &[(u64, u64)]) -> Result<()> {
        let mut txn = self.engine.begin_write()?;
        for &(ino, n) in entries {
            txn.release(ino, n);
        }
        txn.commit()?;
        Ok(())
    }

    /// spec §4.6 `getattr`.
    pub fn getattr(&self, ino: u64) -> Result<Stat> {
        let txn = self.engine.begin_read()?;
        txn.getattr(ino)
    }

    /// spec §4.6 `opendir(ino)`.
    pub fn opendir(&self, ino: u64) -> Result<()> {
        let mut txn = self.engine.begin_write()?;
        let path = txn.path(ino)?;
        let backend_path = if path.is_empty() { b"/".to_vec() } else { path };

        match self.backend.opendir(&backend_path) {
            Ok(mut dir) => {
                txn.start_dir_rewrite(ino)?;
                while let Some(entry) = dir.next()? {
                    if entry.name == b"." || entry.name == b".." {
                        continue;
                    }
                    let mut entry_path = backend_path.clone();
                    if entry_path.last() != Some(&b'/') {
                        entry_path.push(b'/');
                    }
                    entry_path.extend_from_slice(&entry.name);
                    let Ok(st) = self.backend.lstat(&entry_path) else { continue };
                    let attrs = attrs_from_backend_stat(&st);
                    if let Ok(child_ino) = txn.emplace(ino, &entry.name, attrs) {
                        self.sync_symlink_target(&mut txn, child_ino, st.mode, &entry_path);
                    }
                }
                txn.update_flags(ino, InodeFlags::SYNCED, InodeFlags::empty())?;
                txn.finish_dir_rewrite()?;
            }
            Err(Errno::NOTCONN) => {
                debug!(ino, "opendir: backend unreachable, serving stale cache");
            }
            Err(e) => return Err(e),
        }

        txn.commit()?;
        Ok(())
    }

    /// Refresh a symlink's target from the backend into the `links`
    /// partition (spec §4.6's "refresh policy depends on backend
    /// availability"): best-effort, since a backend that raced the
    /// stat with an unlink may no longer be able to answer `readlink`.
    fn sync_symlink_target(
        &self,
        txn: &mut crate::engine::WriteTransaction<'_>,
        ino: u64,
        mode: u32,
        backend_path: &[u8],
    ) {
        if mode_kind(mode) != S_IFLNK {
            return;
        }
        if let Ok(target) = self.backend.readlink(backend_path) {
            let _ = txn.writelink(ino, &target);
        }
    }

    fn translate_eof(&self, dir: u64, result: Result<DirEntrySummary>) -> Result<DirEntrySummary> {
        match result {
            Err(Errno::SUCCESS) => {
                let txn = self.engine.begin_read()?;
                if txn.getattr(dir)?.flags.contains(InodeFlags::SYNCED) {
                    Err(Errno::SUCCESS)
                } else {
                    Err(Errno::IO)
                }
            }
            other => other,
        }
    }

    /// spec §4.6 `readdir`.
    pub fn readdir(&self, dir: u64, cursor: u64) -> Result<DirEntrySummary> {
        let txn = self.engine.begin_read()?;
        self.translate_eof(dir, txn.readdir(dir, cursor))
    }

    /// spec §4.6 `readdirplus`: additionally locks each non-dot entry
    /// on the kernel's behalf. The second element is `None` when the
    /// entry was doomed between `readdir` and `lock` (STALE): the
    /// caller must skip it from the result set, but the entry's ino is
    /// still the correct cursor to resume from.
    pub fn readdirplus(&self, dir: u64, cursor: u64) -> Result<(DirEntrySummary, Option<Stat>)> {
        let mut txn = self.engine.begin_write()?;
        let entry = self.translate_eof(dir, txn.readdir(dir, cursor))?;

        if entry.name == b"." || entry.name == b".." {
            txn.commit()?;
            let stat = self.getattr(entry.ino)?;
            return Ok((entry, Some(stat)));
        }

        match txn.lock(entry.ino) {
            Ok(()) => {
                let stat = txn.getattr(entry.ino)?;
                txn.commit()?;
                Ok((entry, Some(stat)))
            }
            Err(Errno::STALE) => {
                txn.commit()?;
                Ok((entry, None))
            }
            Err(e) => Err(e),
        }
    }

    /// spec §4.6 `readlink`.
    pub fn readlink(&self, ino: u64) -> Result<Vec<u8>> {
        let txn = self.engine.begin_read()?;
        txn.readlink(ino)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::in_memory::InMemoryBackend;
    use crate::codec::{mode_kind, ROOT_INO, S_IFREG};

    fn adapter(dir: &tempfile::TempDir) -> (Adapter, Arc<InMemoryBackend>) {
        let engine = Engine::open(&dir.path().join("meta.redb")).unwrap();
        let backend = Arc::new(InMemoryBackend::new());
        (Adapter::new(engine, backend.clone()), backend)
    }

    #[test]
    fn lookup_emplaces_from_backend() {
        let dir = tempfile::tempdir().unwrap();
        let (adapter, backend) = adapter(&dir);
        backend.put_file(b"/hello", b"hi".to_vec());

        let entry = adapter.lookup(ROOT_INO, b"hello").unwrap();
        assert_eq!(mode_kind(entry.stat.mode), S_IFREG);
    }

    #[test]
    fn lookup_falls_back_to_cache_when_disconnected() {
        let dir = tempfile::tempdir().unwrap();
        let (adapter, backend) = adapter(&dir);
        backend.put_file(b"/hello", b"hi".to_vec());
        let first = adapter.lookup(ROOT_INO, b"hello").unwrap();

        backend.set_connected(false);
        let second = adapter.lookup(ROOT_INO, b"hello").unwrap();
        assert_eq!(first.ino, second.ino);
    }

    #[test]
    fn lookup_disconnected_unsynced_noent_is_io() {
        let dir = tempfile::tempdir().unwrap();
        let (adapter, backend) = adapter(&dir);
        backend.set_connected(false);
        assert_eq!(adapter.lookup(ROOT_INO, b"missing").unwrap_err(), Errno::IO);
    }

    #[test]
    fn opendir_syncs_and_sets_flag() {
        let dir = tempfile::tempdir().unwrap();
        let (adapter, backend) = adapter(&dir);
        backend.put_file(b"/a", Vec::new());
        backend.put_dir(b"/sub");

        adapter.opendir(ROOT_INO).unwrap();
        let st = adapter.getattr(ROOT_INO).unwrap();
        assert!(st.flags.contains(InodeFlags::SYNCED));

        let entry = adapter.lookup(ROOT_INO, b"a").unwrap();
        assert_eq!(mode_kind(entry.stat.mode), S_IFREG);
    }

    #[test]
    fn readdir_incomplete_without_sync_is_io() {
        let dir = tempfile::tempdir().unwrap();
        let (adapter, _backend) = adapter(&dir);
        let mut cursor = 0;
        loop {
            match adapter.readdir(ROOT_INO, cursor) {
                Ok(entry) => cursor = entry.ino,
                Err(e) => {
                    assert_eq!(e, Errno::IO);
                    break;
                }
            }
        }
    }

    #[test]
    fn lookup_populates_symlink_target_from_backend() {
        let dir = tempfile::tempdir().unwrap();
        let (adapter, backend) = adapter(&dir);
        backend.put_link(b"/link", b"target".to_vec());

        let entry = adapter.lookup(ROOT_INO, b"link").unwrap();
        assert_eq!(adapter.readlink(entry.ino).unwrap(), b"target");
    }

    #[test]
    fn opendir_populates_symlink_targets_from_backend() {
        let dir = tempfile::tempdir().unwrap();
        let (adapter, backend) = adapter(&dir);
        backend.put_link(b"/link", b"elsewhere".to_vec());

        adapter.opendir(ROOT_INO).unwrap();
        let entry = adapter.lookup(ROOT_INO, b"link").unwrap();
        assert_eq!(adapter.readlink(entry.ino).unwrap(), b"elsewhere");
    }

    #[test]
    fn readdir_complete_after_sync_reaches_success_eof() {
        let dir = tempfile::tempdir().unwrap();
        let (adapter, _backend) = adapter(&dir);
        adapter.opendir(ROOT_INO).unwrap();
        let mut cursor = 0;
        loop {
            match adapter.readdir(ROOT_INO, cursor) {
                Ok(entry) => cursor = entry.ino,
                Err(e) => {
                    assert_eq!(e, Errno::SUCCESS);
                    break;
                }
            }
        }
    }
}
