//! # Blocklist — per-file block-residency tracking.
//!
//! A cached regular file is split into 512-byte **internal blocks**. The
//! first internal block is a [`Superblock`] carrying a magic, a version,
//! the file's logical size, the current entry count and a per-state
//! block tally. Every internal block after that holds an array of
//! [`Entry`] records (16 bytes each): a sorted, non-overlapping sequence
//! of half-open block ranges `[start, start+count)` tagged with a
//! [`State`].
//!
//! ```text
//!  byte 0        512                 512 + 16*N
//!  +------------+-------------------+-----...
//!  | Superblock | Entry[0..N]       |
//!  +------------+-------------------+-----...
//! ```
//!
//! The file is memory-mapped read/write as a whole while "mapped"
//! ([`Blocklist::ensure_mapped`]); only the superblock is read on demand
//! while "unmapped". Growing the file ([`Blocklist::grow`]) always
//! unmaps first — the mapping is a single [`memmap2::MmapMut`] owned for
//! the lifetime of one mapped *epoch*; every grow starts a new epoch,
//! invalidating any previously escaped index. Callers never hold an
//! iterator across a call that may grow; everything is expressed as an
//! index re-resolved against a freshly borrowed slice.
//!
//! The core algorithm is [`Blocklist::mark_internal`], ported
//! case-for-case from the original `mark_internal()` (see
//! `examples/original_source/src/cache/blocklist.cpp`): locate the
//! entries overlapping the start and end of the new range, split/trim/
//! delete as needed, insert the new entry, then try to merge it with
//! its neighbors.

use std::fs::{File, OpenOptions};
use std::path::Path;

use memmap2::MmapMut;
use zerocopy::{FromBytes, FromZeroes, AsBytes};

use crate::error::{DsError, Result};
use crate::fd::FileHandle;

pub const INTERNAL_BLOCK_SIZE: u64 = 512;
pub const GROW_SIZE: u64 = 4096;
pub const INITIAL_BLOCK_COUNT: u64 = GROW_SIZE / INTERNAL_BLOCK_SIZE;
/// The logical page size callers address via [`Blocklist::truncate_access`].
pub const LOGICAL_BLOCK_SIZE: u64 = 4096;

const MAGIC: u32 = 0x4c42_7344; // b"DsBL"
const VERSION: u8 = 1;
const NUM_STATES: usize = 4;

/// Residency state of a range of blocks. `ABSENT` is implicit: it is
/// never stored as an entry, only returned/accepted as a query/mark
/// argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Absent,
    Readahead,
    Read,
    Pinned,
    Written,
}

impl State {
    fn to_raw(self) -> u8 {
        match self {
            State::Absent => unreachable!("ABSENT is never stored"),
            State::Readahead => 0,
            State::Read => 1,
            State::Pinned => 2,
            State::Written => 3,
        }
    }

    fn from_raw(raw: u8) -> Result<State> {
        match raw {
            0 => Ok(State::Readahead),
            1 => Ok(State::Read),
            2 => Ok(State::Pinned),
            3 => Ok(State::Written),
            _ => Err(crate::error::Errno::IO),
        }
    }

    fn index(self) -> usize {
        self.to_raw() as usize
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, FromZeroes, AsBytes)]
struct RawSuperblock {
    magic: u32,
    version: u8,
    reserved1: [u8; 3],
    size: u64,
    entries: u64,
    blocks_by_state: [u64; NUM_STATES],
    reserved_fin: [u8; 512 - 56],
}

const _: () = assert!(std::mem::size_of::<RawSuperblock>() == INTERNAL_BLOCK_SIZE as usize);

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, FromZeroes, AsBytes)]
struct RawEntry {
    start: u64,
    count: u16,
    state: u8,
    reserved1: u8,
    reserved2: u32,
}

const _: () = assert!(std::mem::size_of::<RawEntry>() == 16);

impl RawEntry {
    fn end(&self) -> u64 {
        self.start + self.count as u64
    }

    fn contains(&self, block: u64) -> bool {
        self.start <= block && block < self.end()
    }
}

/// A decoded entry, as returned by read-only accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub start: u64,
    pub count: u64,
    pub state: State,
}

/// Mmap-backed sorted interval set of block residency for one regular
/// file's cached data. Not thread-safe (spec §5): callers serialize
/// access per-inode externally.
pub struct Blocklist {
    fd: FileHandle,
    mapping: Option<MmapMut>,
}

impl Blocklist {
    /// Open (creating if necessary) the blocklist file at `path`.
    pub fn open(path: &Path) -> Result<Blocklist> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(DsError::Io)?;
        Blocklist::from_file(file)
    }

    pub fn from_file(file: File) -> Result<Blocklist> {
        let meta = file.metadata().map_err(DsError::Io)?;
        let len = meta.len();
        if len % INTERNAL_BLOCK_SIZE != 0 {
            return Err(crate::error::Errno::IO);
        }
        if len == 0 {
            file.set_len(INITIAL_BLOCK_COUNT * INTERNAL_BLOCK_SIZE)
                .map_err(DsError::Io)?;
            let sb = RawSuperblock {
                magic: MAGIC,
                version: VERSION,
                reserved1: [0; 3],
                size: 0,
                entries: 0,
                blocks_by_state: [0; NUM_STATES],
                reserved_fin: [0; 512 - 56],
            };
            use std::os::unix::fs::FileExt;
            file.write_at(sb.as_bytes(), 0).map_err(DsError::Io)?;
        } else {
            let mut buf = [0u8; INTERNAL_BLOCK_SIZE as usize];
            use std::os::unix::fs::FileExt;
            file.read_exact_at(&mut buf, 0).map_err(DsError::Io)?;
            let sb = RawSuperblock::read_from(&buf[..]).ok_or(crate::error::Errno::IO)?;
            if sb.magic != MAGIC {
                return Err(crate::error::Errno::IO);
            }
            if sb.version != VERSION {
                return Err(crate::error::Errno::IO);
            }
        }

        let mut bl = Blocklist {
            fd: FileHandle::new(file),
            mapping: None,
        };
        bl.ensure_mapped()?;
        Ok(bl)
    }

    fn file_len(&self) -> Result<u64> {
        Ok(self.fd.as_file().metadata().map_err(DsError::Io)?.len())
    }

    fn ensure_mapped(&mut self) -> Result<()> {
        if self.mapping.is_some() {
            return Ok(());
        }
        let map = unsafe { MmapMut::map_mut(self.fd.as_file()).map_err(DsError::Io)? };
        self.mapping = Some(map);
        Ok(())
    }

    fn ensure_unmapped(&mut self) {
        self.mapping = None;
    }

    fn superblock(&self) -> &RawSuperblock {
        let map = self.mapping.as_ref().expect("mapped");
        RawSuperblock::ref_from_prefix(&map[..]).expect("superblock aligned")
    }

    fn superblock_mut(&mut self) -> &mut RawSuperblock {
        let map = self.mapping.as_mut().expect("mapped");
        RawSuperblock::mut_from_prefix(&mut map[..]).expect("superblock aligned")
    }

    fn nentries(&self) -> usize {
        self.superblock().entries as usize
    }

    fn capacity(&self) -> usize {
        let map_len = self.mapping.as_ref().expect("mapped").len();
        (map_len - INTERNAL_BLOCK_SIZE as usize) / std::mem::size_of::<RawEntry>()
    }

    fn entries(&self) -> &[RawEntry] {
        let map = self.mapping.as_ref().expect("mapped");
        let n = self.nentries();
        let bytes = &map[INTERNAL_BLOCK_SIZE as usize..];
        let (slice, _) = <[RawEntry]>::slice_from_prefix(bytes, n).expect("entries region");
        slice
    }

    fn entries_mut(&mut self) -> &mut [RawEntry] {
        let n = self.nentries();
        let map = self.mapping.as_mut().expect("mapped");
        let bytes = &mut map[INTERNAL_BLOCK_SIZE as usize..];
        let (slice, _) = <[RawEntry]>::mut_slice_from_prefix(bytes, n).expect("entries region");
        slice
    }

    /// Grow the file by one chunk. Invalidates any previously escaped
    /// index — callers must re-resolve positions afterwards.
    fn grow(&mut self) -> Result<()> {
        self.ensure_unmapped();
        let new_len = self.file_len()? + GROW_SIZE;
        self.fd.as_file().set_len(new_len).map_err(DsError::Io)?;
        self.ensure_mapped()
    }

    fn require_space(&mut self) -> Result<()> {
        if self.capacity() == self.nentries() {
            self.grow()?;
        }
        debug_assert!(self.capacity() > self.nentries());
        Ok(())
    }

    /// Delete entries `[begin, end)` by index, shifting the tail down.
    /// Adjusts the per-state tallies for every deleted entry.
    fn delete_range(&mut self, begin: usize, end: usize) -> usize {
        debug_assert!(begin <= end);
        let n = self.nentries();
        {
            let entries = self.entries();
            let mut removed = [0u64; NUM_STATES];
            for e in &entries[begin..end] {
                removed[e.state as usize] += e.count as u64;
            }
            let sb = self.superblock_mut();
            for (i, r) in removed.iter().enumerate() {
                sb.blocks_by_state[i] -= r;
            }
        }
        let deleted = end - begin;
        let entries = self.entries_mut();
        entries.copy_within(end..n, begin);
        let sb = self.superblock_mut();
        sb.entries -= deleted as u64;
        begin
    }

    fn delete_entry(&mut self, index: usize) -> usize {
        if index >= self.nentries() {
            return index;
        }
        self.delete_range(index, index + 1)
    }

    /// Try to merge the entry at `index` into its immediate predecessor.
    /// Returns the index of the (possibly merged) entry.
    fn try_merge_with_previous(&mut self, index: usize) -> (bool, usize) {
        if index == 0 || index >= self.nentries() {
            return (false, index);
        }
        let prev = index - 1;
        let (prev_end, prev_state, prev_count) = {
            let e = &self.entries()[prev];
            (e.end(), e.state, e.count)
        };
        let (cur_start, cur_state, cur_count) = {
            let e = &self.entries()[index];
            (e.start, e.state, e.count)
        };
        if prev_end != cur_start || prev_state != cur_state {
            return (false, index);
        }
        let new_count = prev_count as u64 + cur_count as u64;
        if new_count > u16::MAX as u64 {
            return (false, index);
        }
        self.entries_mut()[prev].count = new_count as u16;
        let sb = self.superblock_mut();
        sb.blocks_by_state[prev_state as usize] += cur_count as u64;
        let merged_at = self.delete_entry(index);
        (true, merged_at - 1)
    }

    /// Insert `entry` before index `dest`, shifting the tail up.
    fn insert_before(&mut self, dest: usize, entry: RawEntry) -> Result<usize> {
        self.require_space()?;
        let n = self.nentries();
        let entries = self.entries_mut();
        entries.copy_within(dest..n, dest + 1);
        entries[dest] = entry;
        let sb = self.superblock_mut();
        sb.entries += 1;
        Ok(dest)
    }

    /// Split the entry at `at` into two adjacent entries of the same
    /// state summing to the original count, at `split_point`.
    fn split_entry(&mut self, at: usize, split_point: u64) -> Result<usize> {
        let (old_end, old_count, mut new_entry) = {
            let e = self.entries()[at];
            (e.end(), e.count, e)
        };
        debug_assert!(self.entries()[at].start <= split_point && old_end > split_point);
        new_entry.start = split_point;
        new_entry.count = (old_end - split_point) as u16;
        self.entries_mut()[at].count = (split_point - self.entries()[at].start) as u16;
        debug_assert_eq!(
            self.entries()[at].count as u64 + new_entry.count as u64,
            old_count as u64
        );
        let inserted = self.insert_before(at + 1, new_entry)?;
        Ok(inserted - 1)
    }

    /// First entry index whose end is strictly greater than `block`
    /// (i.e. the entry containing `block`, or the nearest one after it).
    fn search_entry(&self, block: u64) -> usize {
        let entries = self.entries();
        entries.partition_point(|e| e.end() <= block)
    }

    /// Returns `(start_overlap, end_overlap)` per the original's
    /// `find_overlapping_entries`: `start_overlap` is the entry
    /// overlapping `start`, or the last entry ending at-or-before
    /// `start` (as index, or `n` if none); `end_overlap` is the entry
    /// overlapping `end - 1`, or the first entry starting after `end`.
    fn find_overlapping_entries(&self, start: u64, count: u16) -> (usize, usize) {
        let n = self.nentries();
        if n == 0 {
            return (n, n);
        }
        let end = start + count as u64;
        let mut start_overlap = self.search_entry(start);
        if start_overlap == n || !self.entries()[start_overlap].contains(start) {
            if start_overlap == 0 {
                start_overlap = n;
            } else {
                start_overlap -= 1;
            }
        }
        let end_overlap = self.search_entry(end);
        (start_overlap, end_overlap)
    }

    fn mark_internal(&mut self, start: u64, count: u16, state: State) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let new_entry = RawEntry {
            start,
            count,
            state: if state == State::Absent { 0 } else { state.to_raw() },
            reserved1: 0,
            reserved2: 0,
        };
        let end = start + count as u64;
        let (mut start_overlap, mut end_overlap) = self.find_overlapping_entries(start, count);
        let none = self.nentries(); // sentinel value meaning "one-past-the-end" (== n at time of check)

        // Case 5: a single entry fully contains the new range: split it at
        // `start` and pretend the two halves are (before, after).
        if start_overlap != none && start_overlap == end_overlap {
            start_overlap = self.split_entry(start_overlap, start)?;
            end_overlap = start_overlap + 1;
        }

        let n = self.nentries();
        let start_contains = start_overlap != n && self.entries()[start_overlap].contains(start);
        let end_contains = end_overlap != n && self.entries()[end_overlap].contains(end - 1);

        // Case 2: start overlaps, end does not (yet handled generally below).
        if start_contains {
            let (so_start, so_count) = {
                let e = &self.entries()[start_overlap];
                (e.start, e.count)
            };
            if so_start == start && so_count as u64 <= count as u64 {
                if state == State::Absent {
                    self.delete_range(start_overlap, end_overlap);
                    return Ok(());
                }
                let old_state = self.entries()[start_overlap].state;
                {
                    let sb = self.superblock_mut();
                    sb.blocks_by_state[old_state as usize] -= so_count as u64;
                }
                self.entries_mut()[start_overlap] = new_entry;
                {
                    let sb = self.superblock_mut();
                    sb.blocks_by_state[state.index()] += count as u64;
                }
                let mut item = self.delete_range(start_overlap + 1, end_overlap);
                if item > 0 {
                    item -= 1;
                }
                let next = item + 1;
                if next < self.nentries() {
                    let (success, merged) = self.try_merge_with_previous(next);
                    if success {
                        item = merged;
                    }
                }
                self.try_merge_with_previous(item);
                return Ok(());
            }
            let old_count = self.entries()[start_overlap].count;
            let new_count = (start - self.entries()[start_overlap].start) as u16;
            self.entries_mut()[start_overlap].count = new_count;
            let st = self.entries()[start_overlap].state;
            let sb = self.superblock_mut();
            sb.blocks_by_state[st as usize] -= (old_count - new_count) as u64;
        }

        // Case 4: end overlaps, start does not.
        if end_contains {
            let (old_end, old_count, st) = {
                let e = &self.entries()[end_overlap];
                (e.end(), e.count, e.state)
            };
            let e = &mut self.entries_mut()[end_overlap];
            e.start = end;
            e.count = (old_end - end) as u16;
            let new_count = e.count;
            let sb = self.superblock_mut();
            sb.blocks_by_state[st as usize] -= (old_count - new_count) as u64;
        }

        // Case 1: neither overlaps (also the fallthrough path for 2-4):
        // delete everything strictly between, insert the new entry.
        let n = self.nentries();
        let delete_begin = if start_overlap == n { 0 } else { start_overlap + 1 };
        let delete_end = end_overlap;

        let insert_at = self.delete_range(delete_begin, delete_end);

        if state == State::Absent {
            return Ok(());
        }

        let mut inserted = self.insert_before(insert_at, new_entry)?;
        {
            let st = self.entries()[inserted].state;
            let cnt = self.entries()[inserted].count;
            let sb = self.superblock_mut();
            sb.blocks_by_state[st as usize] += cnt as u64;
        }

        let next = inserted + 1;
        if next < self.nentries() {
            let (success, merged) = self.try_merge_with_previous(next);
            if success {
                inserted = merged;
            }
        }
        if inserted != 0 {
            self.try_merge_with_previous(inserted);
        }
        Ok(())
    }

    /// Mark `[start, start+count)` as `state`. `state = State::Absent`
    /// erases coverage. Counts beyond the 16-bit per-entry limit are
    /// split into successive internal calls.
    pub fn mark(&mut self, mut start: u64, mut count: u64, state: State) -> Result<()> {
        self.ensure_mapped()?;
        while count > u16::MAX as u64 {
            self.mark_internal(start, u16::MAX, state)?;
            start += u16::MAX as u64;
            count -= u16::MAX as u64;
        }
        if count > 0 {
            self.mark_internal(start, count as u16, state)?;
        }
        Ok(())
    }

    /// O(log n) query of the residency state of a single block.
    pub fn state(&self, block: u64) -> Result<State> {
        let entries = self.entries();
        let idx = entries.partition_point(|e| e.end() <= block);
        if idx < entries.len() && entries[idx].contains(block) {
            State::from_raw(entries[idx].state)
        } else {
            Ok(State::Absent)
        }
    }

    /// O(1) tally lookup. `blocks(Absent)` returns `u64::MAX`, a
    /// preserved sentinel meaning "not tracked" (spec §9, open question
    /// resolved for bug-for-bug parity with the original).
    pub fn blocks(&self, state: State) -> u64 {
        if state == State::Absent {
            return u64::MAX;
        }
        self.superblock().blocks_by_state[state.index()]
    }

    pub fn present_blocks(&self) -> u64 {
        self.superblock().blocks_by_state.iter().sum()
    }

    pub fn size(&self) -> u64 {
        self.superblock().size
    }

    pub fn set_size(&mut self, size: u64) {
        self.superblock_mut().size = size;
    }

    pub fn nentries_pub(&self) -> u64 {
        self.superblock().entries
    }

    pub fn capacity_pub(&self) -> u64 {
        self.capacity() as u64
    }

    /// Largest prefix of `[start, start+size)` whose 4096-byte logical
    /// blocks are all present; 0 if the first logical block is absent.
    pub fn truncate_access(&self, start: u64, size: u64) -> Result<usize> {
        if size == 0 {
            return Ok(0);
        }
        let first_block = start / LOGICAL_BLOCK_SIZE;
        let last_block = (start + size - 1) / LOGICAL_BLOCK_SIZE;
        let mut safe = 0u64;
        for block in first_block..=last_block {
            if self.state(block)? == State::Absent {
                break;
            }
            let block_end = (block + 1) * LOGICAL_BLOCK_SIZE;
            safe = block_end.min(start + size) - start;
            if block == last_block {
                break;
            }
        }
        Ok(safe as usize)
    }

    /// Recompute tallies, verify monotonicity/no-overlap/non-zero
    /// counts, and that tallies match the entries. Any violation is
    /// fatal per spec §4.3.5. Also invokes [`Blocklist::shrink`].
    pub fn fsck(&mut self) -> Result<()> {
        {
            let entries = self.entries();
            let mut tallies = [0u64; NUM_STATES];
            let mut prev_end: Option<u64> = None;
            for e in entries {
                if e.count == 0 {
                    return Err(crate::error::Errno::IO);
                }
                if let Some(pe) = prev_end {
                    if e.start < pe {
                        return Err(crate::error::Errno::IO);
                    }
                }
                State::from_raw(e.state)?;
                tallies[e.state as usize] += e.count as u64;
                prev_end = Some(e.end());
            }
            if tallies != self.superblock().blocks_by_state {
                return Err(crate::error::Errno::IO);
            }
        }
        self.shrink()
    }

    /// Truncate the file if grown chunks beyond what the entries need
    /// are unused. Never shrinks below what the entries require.
    pub fn shrink(&mut self) -> Result<()> {
        let needed_entry_bytes = self.nentries() * std::mem::size_of::<RawEntry>();
        let needed_internal_blocks =
            (needed_entry_bytes as u64).div_ceil(INTERNAL_BLOCK_SIZE).max(INITIAL_BLOCK_COUNT);
        let target_len = INTERNAL_BLOCK_SIZE + needed_internal_blocks * INTERNAL_BLOCK_SIZE;
        let current_len = self.file_len()?;
        if target_len < current_len {
            self.ensure_unmapped();
            self.fd.as_file().set_len(target_len).map_err(DsError::Io)?;
            self.ensure_mapped()?;
        }
        Ok(())
    }

    /// Decode the full sorted entry list (test/debug use).
    pub fn dump_entries(&self) -> Vec<Entry> {
        self.entries()
            .iter()
            .map(|e| Entry {
                start: e.start,
                count: e.count as u64,
                state: State::from_raw(e.state).unwrap_or(State::Absent),
            })
            .collect()
    }
}

impl Drop for Blocklist {
    fn drop(&mut self) {
        self.ensure_unmapped();
        let _ = self.fd.as_file().sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn fresh() -> Blocklist {
        let f = NamedTempFile::new().unwrap();
        Blocklist::open(f.path()).unwrap()
    }

    #[test]
    fn empty_is_absent_everywhere() {
        let bl = fresh();
        assert_eq!(bl.state(0).unwrap(), State::Absent);
        assert_eq!(bl.blocks(State::Absent), u64::MAX);
        assert_eq!(bl.present_blocks(), 0);
    }

    #[test]
    fn mark_query_roundtrip() {
        let mut bl = fresh();
        bl.mark(10, 5, State::Read).unwrap();
        for b in 10..15 {
            assert_eq!(bl.state(b).unwrap(), State::Read);
        }
        assert_eq!(bl.state(9).unwrap(), State::Absent);
        assert_eq!(bl.state(15).unwrap(), State::Absent);
        assert_eq!(bl.blocks(State::Read), 5);
    }

    /// Scenario 3 from spec §8: starting from `[1..4)=READ,
    /// [7..10)=READ`, `mark(3, 5, READAHEAD)` must produce exactly
    /// three entries: `[1..3)=READ, [3..8)=READAHEAD, [8..10)=READ`.
    #[test]
    fn spec_scenario_blocklist_case_analysis() {
        let mut bl = fresh();
        bl.mark(1, 3, State::Read).unwrap();
        bl.mark(7, 3, State::Read).unwrap();
        bl.mark(3, 5, State::Readahead).unwrap();

        let entries = bl.dump_entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], Entry { start: 1, count: 2, state: State::Read });
        assert_eq!(entries[1], Entry { start: 3, count: 5, state: State::Readahead });
        assert_eq!(entries[2], Entry { start: 8, count: 2, state: State::Read });

        assert_eq!(bl.blocks(State::Read), 4);
        assert_eq!(bl.blocks(State::Readahead), 5);
    }

    /// Scenario 4 from spec §8.
    #[test]
    fn spec_scenario_truncate_access() {
        let mut bl = fresh();
        bl.mark(1, 3, State::Read).unwrap();
        assert_eq!(bl.truncate_access(LOGICAL_BLOCK_SIZE, LOGICAL_BLOCK_SIZE).unwrap(), LOGICAL_BLOCK_SIZE as usize);
        assert_eq!(bl.truncate_access(0, LOGICAL_BLOCK_SIZE).unwrap(), 0);
        assert_eq!(
            bl.truncate_access(LOGICAL_BLOCK_SIZE, 3 * LOGICAL_BLOCK_SIZE + 1).unwrap(),
            3 * LOGICAL_BLOCK_SIZE as usize
        );
    }

    #[test]
    fn mark_absent_erases() {
        let mut bl = fresh();
        bl.mark(0, 10, State::Read).unwrap();
        bl.mark(3, 4, State::Absent).unwrap();
        assert_eq!(bl.state(2).unwrap(), State::Read);
        assert_eq!(bl.state(3).unwrap(), State::Absent);
        assert_eq!(bl.state(6).unwrap(), State::Absent);
        assert_eq!(bl.state(7).unwrap(), State::Read);
        assert_eq!(bl.blocks(State::Read), 6);
    }

    #[test]
    fn adjacent_equal_state_merges() {
        let mut bl = fresh();
        bl.mark(0, 5, State::Read).unwrap();
        bl.mark(5, 5, State::Read).unwrap();
        assert_eq!(bl.dump_entries().len(), 1);
        assert_eq!(bl.blocks(State::Read), 10);
    }

    #[test]
    fn grow_beyond_initial_capacity() {
        let mut bl = fresh();
        // Force enough distinct, non-adjacent-equal entries to exceed
        // the initial chunk's capacity and exercise `grow`.
        for i in 0..600u64 {
            let state = if i % 2 == 0 { State::Read } else { State::Written };
            bl.mark(i * 2, 1, state).unwrap();
        }
        assert!(bl.capacity_pub() >= bl.nentries_pub());
        for i in 0..600u64 {
            let expect = if i % 2 == 0 { State::Read } else { State::Written };
            assert_eq!(bl.state(i * 2).unwrap(), expect);
        }
    }

    #[test]
    fn fsck_passes_on_consistent_list() {
        let mut bl = fresh();
        bl.mark(0, 10, State::Read).unwrap();
        bl.mark(20, 10, State::Pinned).unwrap();
        bl.fsck().unwrap();
    }

    #[test]
    fn persistence_across_reopen() {
        let f = NamedTempFile::new().unwrap();
        {
            let mut bl = Blocklist::open(f.path()).unwrap();
            bl.mark(0, 10, State::Read).unwrap();
            bl.mark(20, 5, State::Pinned).unwrap();
        }
        let bl2 = Blocklist::open(f.path()).unwrap();
        assert_eq!(bl2.blocks(State::Read), 10);
        assert_eq!(bl2.blocks(State::Pinned), 5);
        for b in 0..10 {
            assert_eq!(bl2.state(b).unwrap(), State::Read);
        }
    }
}
