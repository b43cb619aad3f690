//! Per-branch in-memory indices rebuilt from a branch's delta log.
//!
//! Two maps per branch: an inode index (ino -> latest known state) and a
//! dirent index (directory entry -> the inode it currently names, or a
//! tombstone), plus a per-inode write-extent map used to resolve reads.
//! Each is guarded by its own short-held `parking_lot::Mutex` — never held
//! across I/O, matching the spinlock-style critical sections spec §5
//! describes for the per-branch index.
//!
//! The dirent index is keyed directly by `(parent_ino, name)` rather than
//! by the jenkins32 hash from [`crate::delta::hash`]. The hash is cheap but
//! collision-prone at the table sizes a single directory reaches, and
//! resolving a collision still requires the byte-exact name anyway; keying
//! the map by `(parent_ino, name)` gets an exact, totally ordered key for
//! free out of `BTreeMap` and skips the tie-break path entirely.

use crate::ids::{Ino, Timestamp};
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// What the inode index remembers about a file as of the latest record
/// that touched it.
#[derive(Debug, Clone, Copy)]
pub struct InodeEntry {
    /// Byte offset, within the branch's delta-log sub-range, of the record
    /// that most recently established this inode's metadata (its CREATE or
    /// its latest SETATTR/TRUNCATE, whichever is later).
    pub record_offset: u64,
    /// True if a DELETE record removed every entry naming this inode.
    pub deleted: bool,
    /// Current size in bytes.
    pub size: u64,
    /// Current mode bits.
    pub mode: u32,
    /// Current uid.
    pub uid: u32,
    /// Current gid.
    pub gid: u32,
    /// Last-modified timestamp.
    pub mtime: Timestamp,
}

/// What the dirent index remembers about a single directory entry.
#[derive(Debug, Clone, Copy)]
pub struct DirentEntry {
    /// Inode the entry currently names. Meaningless if `deleted`.
    pub ino: Ino,
    /// True if a DELETE or the "old" side of a RENAME removed this entry.
    pub deleted: bool,
}

/// A single WRITE record's footprint: where its payload bytes live (the
/// record's offset within the branch's delta-log sub-range) and how long
/// they are, so [`crate::delta::log::DeltaLog::resolve_data`] can re-read
/// them without rescanning the whole log.
#[derive(Debug, Clone, Copy)]
pub struct WriteExtent {
    /// Offset, within the branch's delta-log sub-range, of the WRITE
    /// record's payload bytes (i.e. past its header and offset/len fields).
    pub record_offset: u64,
    /// Length of the written payload.
    pub len: u64,
}

/// A branch's rebuilt in-memory index.
pub struct BranchIndex {
    inodes: Mutex<BTreeMap<Ino, InodeEntry>>,
    dirents: Mutex<BTreeMap<(Ino, String), DirentEntry>>,
    /// Per-inode WRITE extents, keyed by file offset. Kept non-overlapping
    /// by [`Self::apply_write`], which trims or splits any extent a new
    /// write's byte range touches — so at most one extent ever covers a
    /// given file offset and callers never need to break overlap ties.
    writes: Mutex<BTreeMap<Ino, BTreeMap<u64, WriteExtent>>>,
    /// Effective parent of each inode this branch has created or renamed,
    /// used only to answer `..` during directory enumeration. Not part of
    /// spec.md's index description; a small supplement, since a
    /// resolvable `..` is needed for `iterate` to be usable.
    parents: Mutex<BTreeMap<Ino, Ino>>,
}

impl BranchIndex {
    /// An empty index, as a freshly forked branch starts with.
    pub fn new() -> Self {
        Self {
            inodes: Mutex::new(BTreeMap::new()),
            dirents: Mutex::new(BTreeMap::new()),
            writes: Mutex::new(BTreeMap::new()),
            parents: Mutex::new(BTreeMap::new()),
        }
    }

    /// Record a WRITE: bumps size if the write extended the file, and
    /// remembers where to find the written bytes for later reads.
    ///
    /// `record_offset` is the header's offset (used for size-affecting
    /// metadata); `payload_offset` is where the actual written bytes start.
    ///
    /// The per-inode extent map is kept non-overlapping: any existing
    /// extent this write's byte range touches is trimmed (or split, if the
    /// new write lands in its middle) before the new extent is inserted, so
    /// a later, partially-overlapping write wins on exactly the bytes it
    /// covers and the older write still answers the bytes it doesn't
    /// (spec.md §8 "overlapping writes" — `write(0,"AAAA")` then
    /// `write(2,"BB")` must yield `"AABB"`, not `"AAAA"` or `"BB"`).
    pub fn apply_write(
        &self,
        ino: Ino,
        record_offset: u64,
        payload_offset: u64,
        write_offset: u64,
        write_len: u64,
        timestamp: Timestamp,
    ) {
        let end_offset = write_offset + write_len;
        let mut inodes = self.inodes.lock();
        let entry = inodes.entry(ino).or_insert(InodeEntry {
            record_offset,
            deleted: false,
            size: 0,
            mode: 0o100644,
            uid: 0,
            gid: 0,
            mtime: timestamp,
        });
        entry.record_offset = record_offset;
        entry.mtime = timestamp;
        if end_offset > entry.size {
            entry.size = end_offset;
        }
        drop(inodes);

        let mut writes = self.writes.lock();
        let map = writes.entry(ino).or_default();

        let mut to_remove = Vec::new();
        let mut to_insert = Vec::new();
        for (&start, ext) in map.range(..end_offset) {
            let end = start + ext.len;
            if end <= write_offset {
                continue;
            }
            to_remove.push(start);
            if start < write_offset {
                to_insert.push((start, WriteExtent { record_offset: ext.record_offset, len: write_offset - start }));
            }
            if end > end_offset {
                let shift = end_offset - start;
                to_insert.push((end_offset, WriteExtent { record_offset: ext.record_offset + shift, len: end - end_offset }));
            }
        }
        for start in to_remove {
            map.remove(&start);
        }
        for (start, ext) in to_insert {
            map.insert(start, ext);
        }
        map.insert(write_offset, WriteExtent { record_offset: payload_offset, len: write_len });
    }

    /// All known WRITE extents for `ino`, as non-overlapping `(file_offset,
    /// extent)` pairs in offset order.
    pub fn write_extents_for(&self, ino: Ino) -> Vec<(u64, WriteExtent)> {
        self.writes
            .lock()
            .get(&ino)
            .map(|m| m.iter().map(|(&off, &ext)| (off, ext)).collect())
            .unwrap_or_default()
    }

    /// Record a CREATE/MKDIR: seeds the inode entry and adds the dirent.
    pub fn apply_create(
        &self,
        parent_ino: Ino,
        new_ino: Ino,
        name: &str,
        mode: u32,
        record_offset: u64,
        timestamp: Timestamp,
    ) {
        self.inodes.lock().insert(
            new_ino,
            InodeEntry {
                record_offset,
                deleted: false,
                size: 0,
                mode,
                uid: 0,
                gid: 0,
                mtime: timestamp,
            },
        );
        self.dirents.lock().insert(
            (parent_ino, name.to_string()),
            DirentEntry { ino: new_ino, deleted: false },
        );
        self.parents.lock().insert(new_ino, parent_ino);
    }

    /// Record a DELETE: tombstones the dirent. The inode entry is left
    /// alone here; callers decide inode-level deletion based on whether any
    /// dirent across the whole branch chain still names it (link count 1
    /// in this format, so in practice this is the only name).
    pub fn apply_delete(&self, parent_ino: Ino, name: &str, ino: Ino) {
        self.dirents
            .lock()
            .insert((parent_ino, name.to_string()), DirentEntry { ino, deleted: true });
        if let Some(entry) = self.inodes.lock().get_mut(&ino) {
            entry.deleted = true;
        }
    }

    /// Record a TRUNCATE.
    pub fn apply_truncate(&self, ino: Ino, new_size: u64, record_offset: u64, timestamp: Timestamp) {
        let mut inodes = self.inodes.lock();
        let entry = inodes.entry(ino).or_insert(InodeEntry {
            record_offset,
            deleted: false,
            size: 0,
            mode: 0o100644,
            uid: 0,
            gid: 0,
            mtime: timestamp,
        });
        entry.record_offset = record_offset;
        entry.size = new_size;
        entry.mtime = timestamp;
    }

    /// Record a RENAME: tombstone the old dirent, add the new one.
    pub fn apply_rename(&self, old_parent: Ino, old_name: &str, new_parent: Ino, new_name: &str, ino: Ino) {
        let mut dirents = self.dirents.lock();
        dirents.insert((old_parent, old_name.to_string()), DirentEntry { ino, deleted: true });
        dirents.insert((new_parent, new_name.to_string()), DirentEntry { ino, deleted: false });
        drop(dirents);
        self.parents.lock().insert(ino, new_parent);
    }

    /// Record a SETATTR.
    pub fn apply_setattr(
        &self,
        ino: Ino,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        record_offset: u64,
        timestamp: Timestamp,
    ) {
        let mut inodes = self.inodes.lock();
        let entry = inodes.entry(ino).or_insert(InodeEntry {
            record_offset,
            deleted: false,
            size: 0,
            mode: 0o100644,
            uid: 0,
            gid: 0,
            mtime: timestamp,
        });
        entry.record_offset = record_offset;
        entry.mtime = timestamp;
        if let Some(mode) = mode {
            entry.mode = mode;
        }
        if let Some(uid) = uid {
            entry.uid = uid;
        }
        if let Some(gid) = gid {
            entry.gid = gid;
        }
        if let Some(size) = size {
            entry.size = size;
        }
    }

    /// Look up an inode's current state in this branch's index alone (does
    /// not walk ancestors).
    pub fn lookup_inode(&self, ino: Ino) -> Option<InodeEntry> {
        self.inodes.lock().get(&ino).copied()
    }

    /// Look up a directory entry in this branch's index alone.
    pub fn lookup_dirent(&self, parent_ino: Ino, name: &str) -> Option<DirentEntry> {
        self.dirents.lock().get(&(parent_ino, name.to_string())).copied()
    }

    /// This branch's recorded parent of `ino`, if it created or renamed it.
    pub fn parent_of(&self, ino: Ino) -> Option<Ino> {
        self.parents.lock().get(&ino).copied()
    }

    /// Empty out every map, for a from-scratch rebuild (see
    /// [`crate::delta::log::DeltaLog::build_index`]).
    pub fn clear(&self) {
        self.inodes.lock().clear();
        self.dirents.lock().clear();
        self.writes.lock().clear();
        self.parents.lock().clear();
    }

    /// All entries recorded for `parent_ino` in this branch's index alone,
    /// in name order. Includes tombstones so a caller fusing several
    /// branches' indices can tell a delete from "never mentioned".
    pub fn dirents_under(&self, parent_ino: Ino) -> Vec<(String, DirentEntry)> {
        self.dirents
            .lock()
            .range((parent_ino, String::new())..(parent_ino + 1, String::new()))
            .map(|((_, name), entry)| (name.clone(), *entry))
            .collect()
    }
}

impl Default for BranchIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_delete_tombstones() {
        let idx = BranchIndex::new();
        idx.apply_create(1, 2, "a.txt", 0o100644, 0, 1);
        assert!(!idx.lookup_dirent(1, "a.txt").unwrap().deleted);
        idx.apply_delete(1, "a.txt", 2);
        assert!(idx.lookup_dirent(1, "a.txt").unwrap().deleted);
        assert!(idx.lookup_inode(2).unwrap().deleted);
    }

    #[test]
    fn write_extends_size_but_not_shrinks() {
        let idx = BranchIndex::new();
        idx.apply_create(1, 2, "a.txt", 0o100644, 0, 1);
        idx.apply_write(2, 10, 20, 0, 100, 2);
        assert_eq!(idx.lookup_inode(2).unwrap().size, 100);
        idx.apply_write(2, 30, 40, 20, 50, 3);
        assert_eq!(idx.lookup_inode(2).unwrap().size, 100);
    }

    #[test]
    fn rename_moves_the_dirent() {
        let idx = BranchIndex::new();
        idx.apply_create(1, 2, "a.txt", 0o100644, 0, 1);
        idx.apply_rename(1, "a.txt", 3, "b.txt", 2);
        assert!(idx.lookup_dirent(1, "a.txt").unwrap().deleted);
        assert!(!idx.lookup_dirent(3, "b.txt").unwrap().deleted);
    }

    #[test]
    fn dirents_under_is_scoped_to_parent() {
        let idx = BranchIndex::new();
        idx.apply_create(1, 2, "a.txt", 0o100644, 0, 1);
        idx.apply_create(9, 3, "z.txt", 0o100644, 0, 1);
        let under_one = idx.dirents_under(1);
        assert_eq!(under_one.len(), 1);
        assert_eq!(under_one[0].0, "a.txt");
    }
}
