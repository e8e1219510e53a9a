//! Read-only query logic shared between [`super::ReadTransaction`] and
//! [`super::WriteTransaction`] (spec §4.5.7), written generically over
//! `redb`'s `ReadableTable` so the same code runs against a read-only
//! snapshot's tables and a write transaction's tables alike.

use redb::ReadableTable;

use super::{
    ino_key, split_tree_by_ino_key, tree_by_ino_key, tree_by_name_key, DirEntrySummary, Stat,
};
use crate::codec::{mode_kind, RawDirEntryV1, RawInodeV1, ROOT_INO, S_IFLNK};
use crate::error::{DsError, Errno, Result};

pub(super) fn lookup<R>(tree_by_name: &R, parent: u64, name: &[u8]) -> Result<u64>
where
    R: ReadableTable<&'static [u8], &'static [u8]>,
{
    let key = tree_by_name_key(parent, name);
    let guard = tree_by_name.get(key.as_slice()).map_err(DsError::from)?;
    match guard {
        Some(g) => {
            let (header, _name) = RawDirEntryV1::decode(g.value()).map_err(|_| Errno::IO)?;
            Ok(header.entry_ino)
        }
        None => Err(Errno::NOENT),
    }
}

pub(super) fn name<R>(tree_by_ino: &R, parent: u64, ino: u64) -> Result<Vec<u8>>
where
    R: ReadableTable<&'static [u8], &'static [u8]>,
{
    if ino == ROOT_INO {
        return Ok(Vec::new());
    }
    let key = tree_by_ino_key(parent, ino);
    let guard = tree_by_ino.get(key.as_slice()).map_err(DsError::from)?;
    match guard {
        Some(g) => {
            let (_header, name) = RawDirEntryV1::decode(g.value()).map_err(|_| Errno::IO)?;
            Ok(name.to_vec())
        }
        None => Ok(Vec::new()),
    }
}

pub(super) fn getattr<R>(inodes: &R, ino: u64) -> Result<Stat>
where
    R: ReadableTable<&'static [u8], &'static [u8]>,
{
    let key = ino_key(ino);
    let guard = inodes.get(key.as_slice()).map_err(DsError::from)?.ok_or(Errno::NOENT)?;
    let decoded = RawInodeV1::decode(guard.value()).map_err(|_| Errno::IO)?;
    Ok(Stat {
        ino,
        parent: decoded.parent,
        mode: decoded.mode,
        uid: decoded.attr.uid,
        gid: decoded.attr.gid,
        size: decoded.attr.size,
        nblocks: decoded.attr.nblocks,
        atime: decoded.attr.atime,
        mtime: decoded.attr.mtime,
        ctime: decoded.attr.ctime,
        flags: decoded.flags(),
    })
}

pub(super) fn parent<R>(inodes: &R, ino: u64) -> Result<u64>
where
    R: ReadableTable<&'static [u8], &'static [u8]>,
{
    Ok(getattr(inodes, ino)?.parent)
}

pub(super) fn readlink<R>(inodes: &R, links: &R, ino: u64) -> Result<Vec<u8>>
where
    R: ReadableTable<&'static [u8], &'static [u8]>,
{
    let st = getattr(inodes, ino)?;
    if mode_kind(st.mode) != S_IFLNK {
        return Err(Errno::INVAL);
    }
    let key = ino_key(ino);
    let guard = links.get(key.as_slice()).map_err(DsError::from)?.ok_or(Errno::NOENT)?;
    Ok(guard.value().to_vec())
}

pub(super) fn next_child_after<R>(
    tree_by_ino: &R,
    dir: u64,
    after: u64,
) -> Result<Option<DirEntrySummary>>
where
    R: ReadableTable<&'static [u8], &'static [u8]>,
{
    let Some(start_child) = after.checked_add(1) else {
        return Ok(None);
    };
    let start = tree_by_ino_key(dir, start_child);
    let end = tree_by_ino_key(dir, u64::MAX);
    let mut range = tree_by_ino.range(start.as_slice()..=end.as_slice()).map_err(DsError::from)?;
    match range.next() {
        Some(Ok((k, v))) => {
            let (found_parent, child) = split_tree_by_ino_key(k.value());
            debug_assert_eq!(found_parent, dir);
            let (header, name) = RawDirEntryV1::decode(v.value()).map_err(|_| Errno::IO)?;
            Ok(Some(DirEntrySummary { name: name.to_vec(), ino: child, mode: header.mode }))
        }
        Some(Err(e)) => Err(DsError::from(e).into()),
        None => Ok(None),
    }
}

/// `readdir(dir, cursor)`: cursor `0` synthesizes `.`; the ino it
/// returns (`dir` itself) is fed back as the next cursor and
/// synthesizes `..` (for non-root directories); the ino `..` returns
/// (`dir`'s parent) is fed back to start the natural-order child scan.
/// EOF is `Err(Errno::SUCCESS)` per spec §4.5.7.
///
/// The root is its own parent (`dir == dir_parent == ROOT_INO`), so for
/// the root the `..` step is skipped entirely: cursor `dir` goes
/// straight into the child scan rather than colliding with the
/// `cursor == dir` check meant for non-root `..` synthesis.
pub(super) fn readdir<R>(inodes: &R, tree_by_ino: &R, dir: u64, cursor: u64) -> Result<DirEntrySummary>
where
    R: ReadableTable<&'static [u8], &'static [u8]>,
{
    if cursor == 0 {
        let st = getattr(inodes, dir)?;
        return Ok(DirEntrySummary { name: b".".to_vec(), ino: dir, mode: st.mode });
    }
    if dir == ROOT_INO {
        let after = if cursor == dir { 0 } else { cursor };
        return match next_child_after(tree_by_ino, dir, after)? {
            Some(entry) => Ok(entry),
            None => Err(Errno::SUCCESS),
        };
    }
    let dir_parent = getattr(inodes, dir)?.parent;
    if cursor == dir {
        let st = getattr(inodes, dir_parent)?;
        return Ok(DirEntrySummary { name: b"..".to_vec(), ino: dir_parent, mode: st.mode });
    }
    let after = if cursor == dir_parent { 0 } else { cursor };
    match next_child_after(tree_by_ino, dir, after)? {
        Some(entry) => Ok(entry),
        None => Err(Errno::SUCCESS),
    }
}

pub(super) fn path<R>(inodes: &R, tree_by_ino: &R, ino: u64) -> Result<Vec<u8>>
where
    R: ReadableTable<&'static [u8], &'static [u8]>,
{
    if ino == ROOT_INO {
        return Ok(b"/".to_vec());
    }
    let mut components = Vec::new();
    let mut cur = ino;
    loop {
        let p = parent(inodes, cur)?;
        let n = name(tree_by_ino, p, cur)?;
        components.push(n);
        if p == ROOT_INO {
            break;
        }
        cur = p;
    }
    let mut out = Vec::new();
    for component in components.into_iter().rev() {
        out.push(b'/');
        out.extend_from_slice(&component);
    }
    Ok(out)
}
