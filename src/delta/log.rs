//! A single branch's delta log: append-only bytes inside its reserved
//! sub-range of the delta region, plus the [`BranchIndex`] rebuilt from
//! them.
//!
//! Appends are serialized by `append_lock`; the published size lives in a
//! separate `AtomicU64` so readers can observe it with a plain acquire load
//! and scan the corresponding byte prefix without taking any lock, per the
//! release/acquire discipline in spec §5.

use crate::core::error::{AllocError, Error, Result};
use crate::delta::index::BranchIndex;
use crate::delta::record::{AttrMask, Record, RecordBody, RecordType, HEADER_SIZE};
use crate::ids::Ino;
use crate::storage::window::StorageWindow;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Bytes preceding a WRITE record's payload, within its body: `offset` (8)
/// + `len` (4).
const WRITE_BODY_PREFIX: u64 = 12;

/// A branch's append-only record stream and the index rebuilt from it.
pub struct DeltaLog {
    window: Arc<StorageWindow>,
    base_offset: u64,
    capacity: u64,
    size: AtomicU64,
    append_lock: Mutex<()>,
    index: BranchIndex,
}

impl DeltaLog {
    /// Open a log over an already-reserved sub-range of `window`.
    /// `initial_size` is whatever the branch table currently records (0 for
    /// a freshly forked branch); call [`Self::build_index`] to trust the
    /// raw bytes instead of this value.
    pub fn open(window: Arc<StorageWindow>, base_offset: u64, capacity: u64, initial_size: u64) -> Self {
        Self {
            window,
            base_offset,
            capacity,
            size: AtomicU64::new(initial_size),
            append_lock: Mutex::new(()),
            index: BranchIndex::new(),
        }
    }

    /// Bytes published so far (acquire load: safe to scan up to this many
    /// bytes from `base_offset` without holding any lock).
    pub fn used_size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    /// Size of this branch's reserved sub-range.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// This branch's rebuilt index.
    pub fn index(&self) -> &BranchIndex {
        &self.index
    }

    /// Encode `record`, append it, and apply it to the index, all under
    /// the append lock. The published size only advances after both the
    /// bytes and the index entry are in place (§4.4: "no index observer
    /// may see a record without a matching index entry").
    pub fn append(&self, record: &Record) -> Result<u64> {
        let bytes = record.encode();
        let len = bytes.len() as u64;
        let _guard = self.append_lock.lock();
        let start = self.size.load(Ordering::Relaxed);
        let available = self.capacity.saturating_sub(start);
        if len > available {
            return Err(Error::Alloc(AllocError::NoSpace { requested: len, available }));
        }
        self.window.write(self.base_offset + start, &bytes)?;
        apply_record(&self.index, start, record);
        self.size.store(start + len, Ordering::Release);
        Ok(start + len)
    }

    /// Append already-encoded bytes without touching the index (used by
    /// branch commit, which copies a child's log verbatim and then rebuilds
    /// the parent's index from scratch).
    pub fn append_raw(&self, bytes: &[u8]) -> Result<u64> {
        let len = bytes.len() as u64;
        let _guard = self.append_lock.lock();
        let start = self.size.load(Ordering::Relaxed);
        let available = self.capacity.saturating_sub(start);
        if len > available {
            return Err(Error::Alloc(AllocError::NoSpace { requested: len, available }));
        }
        self.window.write(self.base_offset + start, bytes)?;
        self.size.store(start + len, Ordering::Release);
        Ok(start + len)
    }

    /// This log's published bytes, for a verbatim copy into another log.
    pub fn raw_bytes(&self) -> Result<&[u8]> {
        self.window.read(self.base_offset, self.used_size())
    }

    /// Rebuild the index from scratch by scanning the reserved sub-range
    /// from its start until a zero-sized record header (or the end of the
    /// capacity) is reached. Returns the recovered used size, which also
    /// becomes the new published size. Idempotent: calling this twice in a
    /// row with no intervening append yields the same index contents.
    pub fn build_index(&self) -> Result<u64> {
        self.index.clear();
        let mut offset = 0u64;
        while offset < self.capacity {
            let remaining = self.window.read(self.base_offset + offset, self.capacity - offset)?;
            match Record::decode(remaining)? {
                None => break,
                Some((record, len)) => {
                    apply_record(&self.index, offset, &record);
                    offset += len as u64;
                }
            }
        }
        self.size.store(offset, Ordering::Release);
        Ok(offset)
    }

    /// The inode index's current state for `ino`, if this branch's log
    /// mentions it.
    pub fn lookup_inode(&self, ino: Ino) -> Option<crate::delta::index::InodeEntry> {
        self.index.lookup_inode(ino)
    }

    /// The dirent index's current state for `(parent, name)`, if this
    /// branch's log mentions it.
    pub fn lookup_dirent(&self, parent: Ino, name: &str) -> Option<crate::delta::index::DirentEntry> {
        self.index.lookup_dirent(parent, name)
    }

    /// True if this branch's log tombstoned `ino`.
    pub fn is_deleted(&self, ino: Ino) -> bool {
        self.index.lookup_inode(ino).map(|e| e.deleted).unwrap_or(false)
    }

    /// This branch's view of `ino`'s size, if it has one.
    pub fn get_size(&self, ino: Ino) -> Option<u64> {
        self.index.lookup_inode(ino).map(|e| e.size)
    }

    /// This branch's recorded parent of `ino` (from a CREATE/MKDIR or the
    /// latest RENAME it applied), used to answer `..` during enumeration.
    pub fn parent_of(&self, ino: Ino) -> Option<Ino> {
        self.index.parent_of(ino)
    }

    /// Every dirent this branch's log recorded for `parent`, `.`/`..`
    /// excluded, tombstones included so a caller fusing branches can
    /// distinguish "deleted here" from "never mentioned here".
    pub fn dirents_under(&self, parent: Ino) -> Vec<(String, crate::delta::index::DirentEntry)> {
        self.index.dirents_under(parent)
    }

    /// Find the most recent WRITE this branch recorded for `ino` that
    /// covers byte `pos`, and return `(data, avail)` where `avail =
    /// min(len, write_end - pos)`. `None` if no WRITE in this branch's log
    /// covers `pos`.
    pub fn resolve_data(&self, ino: Ino, pos: u64, len: u64) -> Result<Option<(&[u8], u64)>> {
        let extents = self.index.write_extents_for(ino);
        let hit = extents
            .into_iter()
            .filter(|(write_offset, ext)| *write_offset <= pos && pos < write_offset + ext.len)
            .max_by_key(|(_, ext)| ext.record_offset);

        let Some((write_offset, ext)) = hit else {
            return Ok(None);
        };
        let skip = pos - write_offset;
        let avail = (ext.len - skip).min(len);
        let payload_start = self.base_offset + ext.record_offset + skip;
        let data = self.window.read(payload_start, avail)?;
        Ok(Some((data, avail)))
    }
}

/// Apply a decoded record to `index`, at `rel_offset` bytes into the
/// branch's log (i.e. relative to the log's `base_offset`, not the window).
fn apply_record(index: &BranchIndex, rel_offset: u64, record: &Record) {
    let ts = record.header.timestamp;
    let ino = record.header.ino;
    match &record.body {
        RecordBody::Write { offset, data } => {
            let payload_offset = rel_offset + HEADER_SIZE as u64 + WRITE_BODY_PREFIX;
            index.apply_write(ino, rel_offset, payload_offset, *offset, data.len() as u64, ts);
        }
        RecordBody::Create { parent_ino, mode, name } => {
            debug_assert!(matches!(record.header.record_type, RecordType::Create | RecordType::Mkdir));
            index.apply_create(*parent_ino, ino, name, *mode, rel_offset, ts);
        }
        RecordBody::Delete { parent_ino, name } => {
            index.apply_delete(*parent_ino, name, ino);
        }
        RecordBody::Truncate { new_size } => {
            index.apply_truncate(ino, *new_size, rel_offset, ts);
        }
        RecordBody::Rename { old_parent, new_parent, old_name, new_name, .. } => {
            index.apply_rename(*old_parent, old_name, *new_parent, new_name, ino);
        }
        RecordBody::SetAttr { mask, mode, uid, gid, size } => {
            index.apply_setattr(
                ino,
                mask.contains(AttrMask::MODE).then_some(*mode),
                mask.contains(AttrMask::UID).then_some(*uid),
                mask.contains(AttrMask::GID).then_some(*gid),
                mask.contains(AttrMask::SIZE).then_some(*size),
                rel_offset,
                ts,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ImageConfig;
    use crate::layout::format;
    use tempfile::tempdir;

    fn test_log(capacity: u64) -> (tempfile::TempDir, DeltaLog) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("img.daxfs");
        let cfg = ImageConfig {
            path: path.clone(),
            total_size: 1 << 20,
            branch_table_entries: 16,
            base_image_path: None,
        };
        let layout = format::plan(&cfg, 0, 0);
        let window = Arc::new(StorageWindow::open(&path, cfg.total_size).unwrap());
        format::write_fresh(&window, &layout).unwrap();
        let base = layout.superblock.delta_region_offset;
        let log = DeltaLog::open(window, base, capacity, 0);
        (dir, log)
    }

    #[test]
    fn append_updates_index_and_size() {
        let (_d, log) = test_log(4096);
        let rec = Record::new(RecordType::Create, 2, 1, RecordBody::Create {
            parent_ino: 1,
            mode: 0o100644,
            name: "a.txt".into(),
        });
        let new_size = log.append(&rec).unwrap();
        assert_eq!(log.used_size(), new_size);
        assert!(log.lookup_dirent(1, "a.txt").is_some());
        assert!(!log.lookup_dirent(1, "a.txt").unwrap().deleted);
    }

    #[test]
    fn append_past_capacity_is_nospc() {
        let (_d, log) = test_log(32);
        let rec = Record::new(RecordType::Create, 2, 1, RecordBody::Create {
            parent_ino: 1,
            mode: 0o100644,
            name: "a-name-long-enough-to-overflow".into(),
        });
        let err = log.append(&rec).unwrap_err();
        assert!(err.is_nospc());
        assert_eq!(log.used_size(), 0);
    }

    #[test]
    fn overlapping_writes_latest_wins() {
        let (_d, log) = test_log(4096);
        log.append(&Record::new(RecordType::Create, 2, 1, RecordBody::Create {
            parent_ino: 1,
            mode: 0o100644,
            name: "a.txt".into(),
        }))
        .unwrap();
        log.append(&Record::new(RecordType::Write, 2, 2, RecordBody::Write {
            offset: 0,
            data: b"AAAA".to_vec(),
        }))
        .unwrap();
        log.append(&Record::new(RecordType::Write, 2, 3, RecordBody::Write {
            offset: 2,
            data: b"BB".to_vec(),
        }))
        .unwrap();

        let (data, avail) = log.resolve_data(2, 0, 4).unwrap().unwrap();
        assert_eq!(avail, 2);
        assert_eq!(data, b"AA");
        let (data, avail) = log.resolve_data(2, 2, 2).unwrap().unwrap();
        assert_eq!(avail, 2);
        assert_eq!(data, b"BB");
    }

    #[test]
    fn build_index_is_idempotent() {
        let (_d, log) = test_log(4096);
        log.append(&Record::new(RecordType::Create, 2, 1, RecordBody::Create {
            parent_ino: 1,
            mode: 0o100644,
            name: "a.txt".into(),
        }))
        .unwrap();
        let size_before = log.used_size();
        log.build_index().unwrap();
        let first = log.lookup_inode(2);
        log.build_index().unwrap();
        let second = log.lookup_inode(2);
        assert_eq!(log.used_size(), size_before);
        assert_eq!(first.map(|e| e.size), second.map(|e| e.size));
    }
}
