//! An in-memory backend tree used by tests (spec §6.3, §9).
//!
//! Grounded in `include/in_memory_backend.hpp`/`src/in_memory_backend.cpp`:
//! a `Node` tree (`File`/`Link`/`Directory`) reachable by splitting a
//! path on `/`, with a `connected` flag tests flip to exercise the
//! Adapter's NOTCONN handling (spec §4.6).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use crate::backend::{Backend, BackendDirEntry, BackendFile, BackendStat, DirIter};
use crate::codec::{Timespec, S_IFDIR, S_IFLNK, S_IFREG};
use crate::error::{Errno, Result};

#[derive(Debug, Clone)]
enum Node {
    File(Vec<u8>),
    Link(Vec<u8>),
    Dir(BTreeMap<Vec<u8>, Node>),
}

impl Node {
    fn mode(&self) -> u32 {
        match self {
            Node::File(_) => S_IFREG | 0o644,
            Node::Link(_) => S_IFLNK | 0o777,
            Node::Dir(_) => S_IFDIR | 0o755,
        }
    }

    fn size(&self) -> u64 {
        match self {
            Node::File(data) => data.len() as u64,
            Node::Link(target) => target.len() as u64,
            Node::Dir(_) => 0,
        }
    }

    fn find<'a>(&'a self, path: &[u8]) -> Result<&'a Node> {
        let mut cur = self;
        for component in split_path(path)? {
            match cur {
                Node::Dir(children) => {
                    cur = children.get(component).ok_or(Errno::NOENT)?;
                }
                _ => return Err(Errno::NOTDIR),
            }
        }
        Ok(cur)
    }

    fn find_mut<'a>(&'a mut self, path: &[u8]) -> Result<&'a mut Node> {
        let mut cur = self;
        for component in split_path(path)? {
            match cur {
                Node::Dir(children) => {
                    cur = children.get_mut(component).ok_or(Errno::NOENT)?;
                }
                _ => return Err(Errno::NOTDIR),
            }
        }
        Ok(cur)
    }
}

fn split_path(path: &[u8]) -> Result<Vec<&[u8]>> {
    if path.first() != Some(&b'/') {
        return Err(Errno::INVAL);
    }
    let rest = &path[1..];
    if rest.is_empty() {
        return Ok(Vec::new());
    }
    Ok(rest.split(|b| *b == b'/').collect())
}

fn stat_of(node: &Node, ino: u64) -> BackendStat {
    let zero = Timespec { sec: 0, nsec: 0 };
    BackendStat {
        mode: node.mode(),
        size: node.size(),
        ino,
        uid: 0,
        gid: 0,
        atime: zero,
        mtime: zero,
        ctime: zero,
    }
}

/// The in-memory filesystem tree exposed as a [`Backend`].
pub struct InMemoryBackend {
    root: RwLock<Node>,
    connected: AtomicBool,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        InMemoryBackend {
            root: RwLock::new(Node::Dir(BTreeMap::new())),
            connected: AtomicBool::new(true),
        }
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Insert a file/link/directory at `path`, creating no intermediate
    /// directories (test fixture convenience, not part of the spec).
    pub fn put_file(&self, path: &[u8], data: Vec<u8>) {
        self.put(path, Node::File(data));
    }

    pub fn put_link(&self, path: &[u8], target: Vec<u8>) {
        self.put(path, Node::Link(target));
    }

    pub fn put_dir(&self, path: &[u8]) {
        self.put(path, Node::Dir(BTreeMap::new()));
    }

    fn put(&self, path: &[u8], node: Node) {
        let components = split_path(path).expect("fixture path must be absolute");
        let (name, parent_components) = components.split_last().expect("fixture path must name an entry");
        let mut root = self.root.write().expect("lock poisoned");
        let mut cur = &mut *root;
        for component in parent_components {
            cur = match cur {
                Node::Dir(children) => children.get_mut(*component).expect("fixture parent must exist"),
                _ => panic!("fixture parent is not a directory"),
            };
        }
        match cur {
            Node::Dir(children) => {
                children.insert(name.to_vec(), node);
            }
            _ => panic!("fixture parent is not a directory"),
        }
    }

    fn check_connected(&self) -> Result<()> {
        if self.connected() {
            Ok(())
        } else {
            Err(Errno::NOTCONN)
        }
    }
}

struct InMemoryDirIter {
    dot_state: u8,
    names: std::vec::IntoIter<(Vec<u8>, Node)>,
}

impl DirIter for InMemoryDirIter {
    fn next(&mut self) -> Result<Option<BackendDirEntry>> {
        match self.dot_state {
            0 => {
                self.dot_state = 1;
                return Ok(Some(BackendDirEntry {
                    name: b".".to_vec(),
                    stat: stat_of(&Node::Dir(BTreeMap::new()), 0),
                }));
            }
            1 => {
                self.dot_state = 2;
                return Ok(Some(BackendDirEntry {
                    name: b"..".to_vec(),
                    stat: stat_of(&Node::Dir(BTreeMap::new()), 0),
                }));
            }
            _ => {}
        }
        match self.names.next() {
            Some((name, node)) => Ok(Some(BackendDirEntry { name, stat: stat_of(&node, 0) })),
            None => Ok(None),
        }
    }
}

struct InMemoryFile {
    data: Vec<u8>,
}

impl BackendFile for InMemoryFile {
    fn fstat(&mut self) -> Result<BackendStat> {
        Ok(stat_of(&Node::File(self.data.clone()), 0))
    }

    fn pread(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let offset = offset as usize;
        if offset >= self.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.data.len() - offset);
        buf[..n].copy_from_slice(&self.data[offset..offset + n]);
        Ok(n)
    }

    fn pwrite(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        let offset = offset as usize;
        let end = offset + buf.len();
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[offset..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn fsync(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

impl Backend for InMemoryBackend {
    fn lstat(&self, path: &[u8]) -> Result<BackendStat> {
        self.check_connected()?;
        let root = self.root.read().expect("lock poisoned");
        let node = root.find(path)?;
        Ok(stat_of(node, 0))
    }

    fn readlink(&self, path: &[u8]) -> Result<Vec<u8>> {
        self.check_connected()?;
        let root = self.root.read().expect("lock poisoned");
        match root.find(path)? {
            Node::Link(target) => Ok(target.clone()),
            _ => Err(Errno::INVAL),
        }
    }

    fn opendir(&self, path: &[u8]) -> Result<Box<dyn DirIter>> {
        self.check_connected()?;
        let root = self.root.read().expect("lock poisoned");
        match root.find(path)? {
            Node::Dir(children) => {
                let names: Vec<(Vec<u8>, Node)> =
                    children.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                Ok(Box::new(InMemoryDirIter { dot_state: 0, names: names.into_iter() }))
            }
            _ => Err(Errno::NOTDIR),
        }
    }

    fn open(&self, path: &[u8], _flags: i32, _mode: u32) -> Result<Box<dyn BackendFile>> {
        self.check_connected()?;
        let mut root = self.root.write().expect("lock poisoned");
        match root.find_mut(path)? {
            Node::File(data) => Ok(Box::new(InMemoryFile { data: data.clone() })),
            Node::Dir(_) => Err(Errno::ISDIR),
            Node::Link(_) => Err(Errno::INVAL),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lstat_reports_directory() {
        let backend = InMemoryBackend::new();
        let st = backend.lstat(b"/").unwrap();
        assert_eq!(crate::codec::mode_kind(st.mode), S_IFDIR);
    }

    #[test]
    fn notconn_short_circuits_every_operation() {
        let backend = InMemoryBackend::new();
        backend.set_connected(false);
        assert_eq!(backend.lstat(b"/").unwrap_err(), Errno::NOTCONN);
        assert_eq!(backend.readlink(b"/x").unwrap_err(), Errno::NOTCONN);
        assert_eq!(backend.opendir(b"/").unwrap_err(), Errno::NOTCONN);
    }

    #[test]
    fn readlink_rejects_non_symlink() {
        let backend = InMemoryBackend::new();
        backend.put_file(b"/f", b"hi".to_vec());
        assert_eq!(backend.readlink(b"/f").unwrap_err(), Errno::INVAL);
    }

    #[test]
    fn opendir_yields_dot_dotdot_then_children() {
        let backend = InMemoryBackend::new();
        backend.put_file(b"/a", Vec::new());
        let mut iter = backend.opendir(b"/").unwrap();
        assert_eq!(iter.next().unwrap().unwrap().name, b".");
        assert_eq!(iter.next().unwrap().unwrap().name, b"..");
        assert_eq!(iter.next().unwrap().unwrap().name, b"a");
        assert!(iter.next().unwrap().is_none());
    }
}
