//! Property tests for `Blocklist::mark`/`state` (spec §8): monotonicity,
//! no redundant adjacency, tally correctness, mark-query idempotence,
//! and persistence across a reopen.

use dragonstash::blocklist::{Blocklist, State, LOGICAL_BLOCK_SIZE};
use proptest::prelude::*;

fn state_from_index(i: u8) -> State {
    match i % 4 {
        0 => State::Readahead,
        1 => State::Read,
        2 => State::Pinned,
        _ => State::Written,
    }
}

fn open_fresh() -> (tempfile::TempDir, Blocklist) {
    let dir = tempfile::tempdir().unwrap();
    let bl = Blocklist::open(&dir.path().join("blocks")).unwrap();
    (dir, bl)
}

/// `(start, count, state_index)` with small bounds so proptest can
/// shrink to something human-readable and so the resulting entry count
/// stays within the initial chunk's capacity.
fn mark_op() -> impl Strategy<Value = (u64, u16, u8)> {
    (0u64..200, 1u16..20, 0u8..4)
}

proptest! {
    #[test]
    fn monotonic_and_non_redundant_after_random_marks(ops in proptest::collection::vec(mark_op(), 1..40)) {
        let (_dir, mut bl) = open_fresh();
        for (start, count, state_idx) in &ops {
            bl.mark(*start, *count as u64, state_from_index(*state_idx)).unwrap();
        }

        let entries = bl.dump_entries();
        for w in entries.windows(2) {
            let (a, b) = (w[0], w[1]);
            prop_assert!(a.start + a.count <= b.start, "entries overlap: {:?} {:?}", a, b);
            if a.start + a.count == b.start {
                prop_assert!(
                    a.state != b.state || a.count + b.count > u16::MAX as u64,
                    "adjacent entries with equal state were not merged: {:?} {:?}", a, b
                );
            }
        }

        let mut tallies = [0u64; 4];
        for e in &entries {
            let idx = match e.state {
                State::Readahead => 0,
                State::Read => 1,
                State::Pinned => 2,
                State::Written => 3,
                State::Absent => unreachable!(),
            };
            tallies[idx] += e.count;
        }
        prop_assert_eq!(tallies[0], bl.blocks(State::Readahead));
        prop_assert_eq!(tallies[1], bl.blocks(State::Read));
        prop_assert_eq!(tallies[2], bl.blocks(State::Pinned));
        prop_assert_eq!(tallies[3], bl.blocks(State::Written));
    }

    #[test]
    fn mark_query_idempotence(start in 0u64..100, count in 1u16..50, state_idx in 0u8..4) {
        let (_dir, mut bl) = open_fresh();
        let state = state_from_index(state_idx);
        bl.mark(start, count as u64, state).unwrap();

        for b in start..start + count as u64 {
            prop_assert_eq!(bl.state(b).unwrap(), state);
        }
        if start > 0 {
            prop_assert_eq!(bl.state(start - 1).unwrap(), State::Absent);
        }
        prop_assert_eq!(bl.state(start + count as u64).unwrap(), State::Absent);
    }

    #[test]
    fn persists_across_reopen(ops in proptest::collection::vec(mark_op(), 1..20)) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks");
        let before = {
            let mut bl = Blocklist::open(&path).unwrap();
            for (start, count, state_idx) in &ops {
                bl.mark(*start, *count as u64, state_from_index(*state_idx)).unwrap();
            }
            bl.dump_entries()
        };

        let reopened = Blocklist::open(&path).unwrap();
        prop_assert_eq!(reopened.dump_entries(), before);
    }
}

#[test]
fn truncate_access_prefix_matches_a_single_run() {
    let (_dir, mut bl) = open_fresh();
    bl.mark(1, 3, State::Read).unwrap();
    assert_eq!(
        bl.truncate_access(LOGICAL_BLOCK_SIZE, LOGICAL_BLOCK_SIZE).unwrap(),
        LOGICAL_BLOCK_SIZE as usize
    );
    assert_eq!(bl.truncate_access(0, LOGICAL_BLOCK_SIZE).unwrap(), 0);
}
