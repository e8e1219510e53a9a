//! The process-wide in-memory lock table (spec §3.5, §4.5.9, §5).
//!
//! One [`LockTable`] exists per [`super::Engine`] and is shared by every
//! transaction through a single `parking_lot` mutex
//! (`in_memory_lock_mutex` in the original). A transaction acquires the
//! mutex the first time it touches the table and keeps holding it until
//! it commits or aborts — see [`super::transaction::WriteTransaction`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Errno, Result};

#[derive(Debug, Default, Clone, Copy)]
pub struct LockEntry {
    pub refs: u64,
    pub doomed: bool,
}

#[derive(Default)]
pub struct LockTable {
    entries: HashMap<u64, LockEntry>,
}

pub type SharedLockTable = Arc<Mutex<LockTable>>;

impl LockTable {
    pub fn refs(&self, ino: u64) -> u64 {
        self.entries.get(&ino).map(|e| e.refs).unwrap_or(0)
    }

    pub fn is_doomed(&self, ino: u64) -> bool {
        self.entries.get(&ino).map(|e| e.doomed).unwrap_or(false)
    }

    /// `lock(ino)`: fails with STALE on a doomed inode (§3.5 invariant).
    pub fn incref(&mut self, ino: u64) -> Result<()> {
        let entry = self.entries.entry(ino).or_default();
        if entry.doomed {
            return Err(Errno::STALE);
        }
        entry.refs += 1;
        Ok(())
    }

    /// Undo of a successful `incref`, used by rollback hooks.
    pub fn decref_unchecked(&mut self, ino: u64, n: u64) {
        let entry = self.entries.entry(ino).or_default();
        debug_assert!(entry.refs >= n, "in-memory lock rollback underflow for ino {ino}");
        entry.refs = entry.refs.saturating_sub(n);
    }

    /// Undo of a successful `decref` (by a `release` rollback hook),
    /// bypassing the doomed check — rollback must be infallible.
    pub fn incref_unchecked(&mut self, ino: u64, n: u64) {
        let entry = self.entries.entry(ino).or_default();
        entry.refs += n;
    }

    /// `release(ino, n)`: a decref-below-zero is a programming error —
    /// the source treats it as fatal rather than returning an error
    /// (spec §7).
    pub fn decref(&mut self, ino: u64, n: u64) {
        match self.entries.get_mut(&ino) {
            Some(entry) if entry.refs >= n => {
                entry.refs -= n;
                if entry.refs == 0 && !entry.doomed {
                    self.entries.remove(&ino);
                }
            }
            _ => panic!("in-memory lock refcount underflow for ino {ino}"),
        }
    }

    /// Attempt to doom `ino`: succeeds (and marks it) only if unreferenced.
    pub fn try_doom(&mut self, ino: u64) -> bool {
        match self.entries.get_mut(&ino) {
            Some(entry) if entry.refs == 0 => {
                entry.doomed = true;
                true
            }
            Some(_) => false,
            None => {
                self.entries.insert(ino, LockEntry { refs: 0, doomed: true });
                true
            }
        }
    }

    pub fn undoom(&mut self, ino: u64) {
        if let Some(entry) = self.entries.get_mut(&ino) {
            entry.doomed = false;
        }
    }

    /// Drop all bookkeeping for an inode whose record has been deleted.
    pub fn forget_entry(&mut self, ino: u64) {
        self.entries.remove(&ino);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doomed_inode_rejects_lock() {
        let mut table = LockTable::default();
        assert!(table.try_doom(5));
        assert_eq!(table.incref(5).unwrap_err(), Errno::STALE);
    }

    #[test]
    fn doom_fails_while_referenced() {
        let mut table = LockTable::default();
        table.incref(5).unwrap();
        assert!(!table.try_doom(5));
    }
}
