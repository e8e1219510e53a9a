//! Property tests for the Metadata Engine (spec §8): inode uniqueness,
//! name uniqueness, cross-index agreement, reverse lookup, and lock
//! safety, each checked against a sequence of random `emplace` calls
//! under the root directory.

use std::collections::HashSet;

use dragonstash::codec::{ROOT_INO, S_IFDIR, S_IFREG, Timespec};
use dragonstash::engine::{Attrs, Engine};
use dragonstash::error::Errno;
use proptest::prelude::*;

fn attrs(mode: u32) -> Attrs {
    let zero = Timespec { sec: 0, nsec: 0 };
    Attrs { mode, uid: 0, gid: 0, size: 0, nblocks: 0, atime: zero, mtime: zero, ctime: zero }
}

fn open_engine() -> (tempfile::TempDir, Engine) {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(&dir.path().join("meta.redb")).unwrap();
    (dir, engine)
}

fn unique_names() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::hash_set(proptest::string::string_regex("[a-z]{1,8}").unwrap(), 1..12)
        .map(|set| set.into_iter().collect())
}

proptest! {
    #[test]
    fn emplace_sequence_is_internally_consistent(
        names in unique_names(),
        kinds in proptest::collection::vec(any::<bool>(), 0..12),
    ) {
        let (_dir, engine) = open_engine();
        let mut txn = engine.begin_write().unwrap();

        let mut inos = Vec::new();
        for (i, name) in names.iter().enumerate() {
            let is_dir = *kinds.get(i).unwrap_or(&false);
            let mode = if is_dir { S_IFDIR | 0o755 } else { S_IFREG | 0o644 };
            let ino = txn.emplace(ROOT_INO, name.as_bytes(), attrs(mode)).unwrap();
            inos.push(ino);
        }
        txn.commit().unwrap();

        // Inode uniqueness.
        let unique: HashSet<u64> = inos.iter().copied().collect();
        prop_assert_eq!(unique.len(), inos.len());

        let read = engine.begin_read().unwrap();

        // Name uniqueness + reverse lookup.
        for (name, &ino) in names.iter().zip(inos.iter()) {
            let looked_up = read.lookup(ROOT_INO, name.as_bytes()).unwrap();
            prop_assert_eq!(looked_up, ino);
            prop_assert_eq!(read.name(ROOT_INO, ino).unwrap(), name.as_bytes());
            prop_assert_eq!(read.parent(ino).unwrap(), ROOT_INO);
        }

        // Cross-index agreement: readdir enumerates exactly the
        // emplaced set (plus "." and "..").
        let mut seen_names: HashSet<Vec<u8>> = HashSet::new();
        let mut cursor = 0u64;
        loop {
            match read.readdir(ROOT_INO, cursor) {
                Ok(entry) => {
                    cursor = entry.ino;
                    seen_names.insert(entry.name.clone());
                }
                Err(Errno::SUCCESS) => break,
                Err(e) => panic!("unexpected readdir error: {e}"),
            }
        }
        // The root is its own parent, so readdir on it never
        // synthesizes "..", only ".".
        let mut expected: HashSet<Vec<u8>> = names.iter().map(|n| n.as_bytes().to_vec()).collect();
        expected.insert(b".".to_vec());
        prop_assert_eq!(seen_names, expected);
    }
}

#[test]
fn lock_safety_keeps_orphan_readable_until_released() {
    let (_dir, engine) = open_engine();

    let mut txn = engine.begin_write().unwrap();
    let ino = txn.emplace(ROOT_INO, b"pinned", attrs(S_IFREG | 0o644)).unwrap();
    txn.lock(ino).unwrap();
    txn.unlink(ROOT_INO, b"pinned").unwrap();
    // Still referenced: getattr succeeds even though it has been
    // unlinked from its directory.
    assert!(txn.getattr(ino).is_ok());
    txn.commit().unwrap();

    let read = engine.begin_read().unwrap();
    assert!(read.getattr(ino).is_ok());
    assert_eq!(read.lookup(ROOT_INO, b"pinned").unwrap_err(), Errno::NOENT);

    let mut txn = engine.begin_write().unwrap();
    txn.release(ino, 1);
    txn.commit().unwrap();

    let read = engine.begin_read().unwrap();
    assert_eq!(read.getattr(ino).unwrap_err(), Errno::NOENT);
}
