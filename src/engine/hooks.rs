//! Two-phase commit hooks (spec §4.5.4, §9).
//!
//! A transaction side effect that lives outside the KV store — so far,
//! only in-memory lock-count changes — registers a [`TransactionHook`].
//! Each slot is independently optional; [`drive_commit`] and
//! [`drive_abort`] give the four slots the ordering spec §4.5.4
//! describes. Every closure takes the already-locked [`LockTable`] as
//! its argument rather than re-acquiring the process mutex itself —
//! the caller holds it for the whole commit/abort, and `parking_lot`'s
//! mutex is not reentrant.

use crate::engine::locks::LockTable;
use crate::error::{Errno, Result};

type Stage1Commit = Box<dyn FnOnce(&mut LockTable) -> Result<()> + Send>;
type Stage2Commit = Box<dyn FnOnce(&mut LockTable) + Send>;
type Rollback = Box<dyn FnOnce(&mut LockTable) + Send>;

#[derive(Default)]
pub struct TransactionHook {
    pub stage_1_commit: Option<Stage1Commit>,
    pub stage_1_rollback: Option<Rollback>,
    pub stage_2_commit: Option<Stage2Commit>,
    pub rollback: Option<Rollback>,
}

impl TransactionHook {
    /// The shape `lock`/`release` register: an immediate in-memory
    /// mutation with a single rollback closure undoing it.
    pub fn rollback_only(f: Rollback) -> Self {
        TransactionHook { rollback: Some(f), ..Default::default() }
    }
}

/// Drive a transaction's pending hooks through commit. On success, every
/// `stage_2_commit` has run, in order. On a veto, every hook whose
/// `stage_1_commit` already ran gets its `stage_1_rollback` (reverse
/// order of having run), and then *every* hook's `rollback` runs
/// (reverse order) — `rollback` undoes whatever each hook already did
/// eagerly at call time, independent of whether it staged anything.
pub fn drive_commit(mut hooks: Vec<TransactionHook>, locks: &mut LockTable) -> Result<()> {
    let mut passed_stage1: Vec<usize> = Vec::with_capacity(hooks.len());
    let mut veto: Option<Errno> = None;

    for i in 0..hooks.len() {
        match hooks[i].stage_1_commit.take() {
            Some(commit) => match commit(locks) {
                Ok(()) => passed_stage1.push(i),
                Err(e) => {
                    veto = Some(e);
                    break;
                }
            },
            None => passed_stage1.push(i),
        }
    }

    if let Some(e) = veto {
        for &i in passed_stage1.iter().rev() {
            if let Some(rb) = hooks[i].stage_1_rollback.take() {
                rb(locks);
            }
        }
        for hook in hooks.into_iter().rev() {
            if let Some(rb) = hook.rollback {
                rb(locks);
            }
        }
        return Err(e);
    }

    for i in passed_stage1 {
        if let Some(commit) = hooks[i].stage_2_commit.take() {
            commit(locks);
        }
    }
    Ok(())
}

/// Run every hook's `rollback` in reverse order — used both for an
/// outright abort and for a nested transaction's abort.
pub fn drive_abort(hooks: Vec<TransactionHook>, locks: &mut LockTable) {
    for hook in hooks.into_iter().rev() {
        if let Some(rb) = hook.rollback {
            rb(locks);
        }
    }
}
