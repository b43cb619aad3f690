//! The branch manager: owns the on-storage branch table, the live
//! [`DeltaLog`] for every non-FREE slot, and the mount registry used to
//! detect sibling invalidation.

use crate::core::error::{BranchError, Error, Result};
use crate::core::metrics::Metrics;
use crate::delta::log::DeltaLog;
use crate::ids::BranchId;
use crate::layout::branch_table::{BranchRecord, BranchState, RECORD_SIZE};
use crate::storage::allocator::DeltaAllocator;
use crate::storage::window::StorageWindow;
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// A live branch: its on-storage record mirrored in memory, its open
/// delta log, and the in-memory-only invalidation flag a sibling commit
/// sets (§4.5 — invalidation never changes the persisted `state`, only
/// whether mounts bound to this branch keep working).
pub struct BranchHandle {
    /// This branch's id.
    pub id: BranchId,
    /// Parent branch id (0 for the root/main branch).
    pub parent_id: BranchId,
    /// Branch name.
    pub name: String,
    state: Mutex<BranchState>,
    invalidated: AtomicBool,
    refcount: AtomicU32,
    /// This branch's append-only record stream and rebuilt index.
    pub log: DeltaLog,
}

impl BranchHandle {
    /// Current persisted lifecycle state.
    pub fn state(&self) -> BranchState {
        *self.state.lock()
    }

    /// Current refcount (children + active mounts).
    pub fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Acquire)
    }

    /// True if this branch is ACTIVE and no sibling commit has invalidated
    /// it.
    pub fn is_active(&self) -> bool {
        *self.state.lock() == BranchState::Active && !self.invalidated.load(Ordering::Acquire)
    }

    /// Validate this branch can accept an operation, returning `STALE` if
    /// not (§4.4: "writing to a branch whose state != ACTIVE fails with
    /// STALE"; §4.5: an invalidated branch reports the same error).
    pub fn check_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::Branch(BranchError::Stale))
        }
    }
}

/// A snapshot of a branch's state, for CLI/introspection use (SPEC_FULL
/// supplemental feature B.6).
#[derive(Debug, Clone)]
pub struct BranchInfo {
    /// Branch id.
    pub id: BranchId,
    /// Parent branch id (0 = root).
    pub parent_id: BranchId,
    /// Branch name.
    pub name: String,
    /// Persisted lifecycle state.
    pub state: BranchState,
    /// Refcount (children + active mounts).
    pub refcount: u32,
    /// Bytes used in this branch's delta log.
    pub delta_log_size: u64,
    /// Bytes reserved for this branch's delta log.
    pub delta_log_capacity: u64,
    /// Whether a sibling commit has invalidated this branch's mounts.
    pub invalidated: bool,
}

/// Owns the on-storage branch table and every open branch's delta log.
pub struct BranchManager {
    window: Arc<StorageWindow>,
    alloc: Arc<DeltaAllocator>,
    branch_table_offset: u64,
    default_delta_log_capacity: u64,
    table: Mutex<Vec<BranchRecord>>,
    handles: DashMap<BranchId, Arc<BranchHandle>>,
    mounts: DashMap<u64, BranchId>,
    next_mount_id: AtomicU64,
    /// Slots whose branch was aborted or committed, kept as a hint for a
    /// future slot-recycling pass. This crate does not reclaim slots (no
    /// space reclamation is a stated non-goal), so the queue is currently
    /// only drained by [`Self::retired_slot_hints`] for diagnostics.
    retired_slots: SegQueue<usize>,
}

impl BranchManager {
    /// Open the branch table at `branch_table_offset` (`capacity` slots)
    /// on `window`, rebuilding every non-FREE branch's index from its raw
    /// log bytes.
    pub fn open(
        window: Arc<StorageWindow>,
        alloc: Arc<DeltaAllocator>,
        branch_table_offset: u64,
        capacity: u32,
        default_delta_log_capacity: u64,
    ) -> Result<Self> {
        let mut table = Vec::with_capacity(capacity as usize);
        let handles = DashMap::new();
        for slot in 0..capacity as usize {
            let bytes = window.read(
                branch_table_offset + (slot * RECORD_SIZE) as u64,
                RECORD_SIZE as u64,
            )?;
            let record = BranchRecord::decode(bytes)?;
            if record.state != BranchState::Free {
                let log = DeltaLog::open(
                    window.clone(),
                    record.delta_log_offset,
                    record.delta_log_capacity,
                    record.delta_log_size,
                );
                log.build_index()?;
                handles.insert(
                    record.branch_id,
                    Arc::new(BranchHandle {
                        id: record.branch_id,
                        parent_id: record.parent_id,
                        name: record.name_string(),
                        state: Mutex::new(record.state),
                        invalidated: AtomicBool::new(false),
                        refcount: AtomicU32::new(record.refcount),
                        log,
                    }),
                );
            }
            table.push(record);
        }
        Ok(Self {
            window,
            alloc,
            branch_table_offset,
            default_delta_log_capacity,
            table: Mutex::new(table),
            handles,
            mounts: DashMap::new(),
            next_mount_id: AtomicU64::new(1),
            retired_slots: SegQueue::new(),
        })
    }

    /// Format and open the root/main branch, for a freshly formatted image
    /// that has no branches yet (SPEC_FULL B.1, `mkfs`).
    pub fn init_root(&self, name: &str) -> Result<BranchId> {
        let slot = self.find_free_slot()?;
        let id = self.alloc.next_branch_id()?;
        let offset = self.alloc.reserve(self.default_delta_log_capacity)?;
        let record = BranchRecord {
            branch_id: id,
            parent_id: 0,
            delta_log_offset: offset,
            delta_log_size: 0,
            delta_log_capacity: self.default_delta_log_capacity,
            state: BranchState::Active,
            refcount: 1,
            next_local_ino: 0,
            name: BranchRecord::name_bytes(name),
        };
        self.persist_slot(slot, &record)?;
        self.table.lock()[slot] = record.clone();
        let log = DeltaLog::open(self.window.clone(), offset, self.default_delta_log_capacity, 0);
        self.handles.insert(
            id,
            Arc::new(BranchHandle {
                id,
                parent_id: 0,
                name: name.to_string(),
                state: Mutex::new(BranchState::Active),
                invalidated: AtomicBool::new(false),
                refcount: AtomicU32::new(1),
                log,
            }),
        );
        Ok(id)
    }

    /// Look up a live branch handle.
    pub fn get(&self, id: BranchId) -> Result<Arc<BranchHandle>> {
        self.handles
            .get(&id)
            .map(|h| h.clone())
            .ok_or(Error::Branch(BranchError::NoSuchBranch(id)))
    }

    /// Fork a new child branch from `parent_id`, reserving
    /// `default_delta_log_capacity` bytes for it (§4.5 "Fork").
    pub fn fork(&self, name: &str, parent_id: BranchId) -> Result<BranchId> {
        let parent = self.get(parent_id)?;
        parent.check_active()?;

        let slot = self.find_free_slot()?;
        let id = self.alloc.next_branch_id()?;
        let offset = self.alloc.reserve(self.default_delta_log_capacity)?;
        let record = BranchRecord {
            branch_id: id,
            parent_id,
            delta_log_offset: offset,
            delta_log_size: 0,
            delta_log_capacity: self.default_delta_log_capacity,
            state: BranchState::Active,
            refcount: 1,
            next_local_ino: 0,
            name: BranchRecord::name_bytes(name),
        };
        self.persist_slot(slot, &record)?;
        self.table.lock()[slot] = record.clone();

        parent.refcount.fetch_add(1, Ordering::AcqRel);
        self.persist_refcount(parent_id, parent.refcount())?;

        let log = DeltaLog::open(self.window.clone(), offset, self.default_delta_log_capacity, 0);
        self.handles.insert(
            id,
            Arc::new(BranchHandle {
                id,
                parent_id,
                name: name.to_string(),
                state: Mutex::new(BranchState::Active),
                invalidated: AtomicBool::new(false),
                refcount: AtomicU32::new(1),
                log,
            }),
        );
        Metrics::global().branch.forked.inc();
        tracing::info!(branch = id, parent = parent_id, name, "forked branch");
        Ok(id)
    }

    /// Merge `child_id`'s delta log into its parent's, rebuild the
    /// parent's index, mark the child COMMITTED, and invalidate every
    /// sibling (§4.5 "Commit").
    pub fn commit(&self, child_id: BranchId) -> Result<()> {
        let child = self.get(child_id)?;
        child.check_active()?;
        if child.parent_id == 0 {
            return Err(Error::Branch(BranchError::NoParent(child_id)));
        }
        let parent = self.get(child.parent_id)?;
        if !parent.is_active() {
            return Err(Error::Branch(BranchError::ParentNotActive(child.parent_id)));
        }

        let needed = parent.log.used_size() + child.log.used_size();
        if needed > parent.log.capacity() {
            return Err(Error::Alloc(crate::core::error::AllocError::NoSpace {
                requested: needed,
                available: parent.log.capacity(),
            }));
        }

        let bytes = child.log.raw_bytes()?.to_vec();
        parent.log.append_raw(&bytes)?;
        parent.log.build_index()?;
        self.persist_delta_log_size(child.parent_id, parent.log.used_size())?;

        *child.state.lock() = BranchState::Committed;
        self.persist_state(child_id, BranchState::Committed)?;
        self.retired_slots.push(self.slot_of(child_id)?);

        self.invalidate_siblings(child.parent_id, child_id)?;

        Metrics::global().branch.committed.inc();
        tracing::info!(branch = child_id, parent = child.parent_id, "committed branch");
        Ok(())
    }

    /// Discard `branch_id`'s log, mark it ABORTED, and decrement its
    /// parent's refcount (§4.5 "Abort").
    pub fn abort(&self, branch_id: BranchId) -> Result<()> {
        let branch = self.get(branch_id)?;
        branch.check_active()?;

        *branch.state.lock() = BranchState::Aborted;
        self.persist_state(branch_id, BranchState::Aborted)?;
        branch.log.index().clear();
        self.retired_slots.push(self.slot_of(branch_id)?);

        if branch.parent_id != 0 {
            if let Ok(parent) = self.get(branch.parent_id) {
                parent.refcount.fetch_sub(1, Ordering::AcqRel);
                self.persist_refcount(branch.parent_id, parent.refcount())?;
            }
        }

        Metrics::global().branch.aborted.inc();
        tracing::info!(branch = branch_id, "aborted branch");
        Ok(())
    }

    /// Bind a new mount to `branch_id`, bumping its refcount, and return
    /// the mount id.
    pub fn mount(&self, branch_id: BranchId) -> Result<u64> {
        let branch = self.get(branch_id)?;
        branch.check_active()?;
        branch.refcount.fetch_add(1, Ordering::AcqRel);
        self.persist_refcount(branch_id, branch.refcount())?;
        let mount_id = self.next_mount_id.fetch_add(1, Ordering::Relaxed);
        self.mounts.insert(mount_id, branch_id);
        Ok(mount_id)
    }

    /// Release a mount, dropping its refcount on the bound branch.
    pub fn unmount(&self, mount_id: u64) -> Result<()> {
        let (_, branch_id) = self
            .mounts
            .remove(&mount_id)
            .ok_or(Error::Branch(BranchError::NoSuchMount(mount_id)))?;
        if let Ok(branch) = self.get(branch_id) {
            branch.refcount.fetch_sub(1, Ordering::AcqRel);
            self.persist_refcount(branch_id, branch.refcount())?;
        }
        Ok(())
    }

    /// Resolve a mount id to its bound branch, failing with `STALE` if the
    /// branch has been invalidated or is no longer active.
    pub fn branch_for_mount(&self, mount_id: u64) -> Result<Arc<BranchHandle>> {
        let branch_id = *self
            .mounts
            .get(&mount_id)
            .ok_or(Error::Branch(BranchError::NoSuchMount(mount_id)))?;
        let branch = self.get(branch_id)?;
        branch.check_active()?;
        Ok(branch)
    }

    /// Find a branch id by name (CLI convenience: `-p main` instead of a
    /// numeric id). Returns the first match; names are not enforced
    /// unique by the core.
    pub fn find_by_name(&self, name: &str) -> Option<BranchId> {
        self.handles.iter().find(|e| e.value().name == name).map(|e| *e.key())
    }

    /// Every known branch, for CLI listing.
    pub fn list(&self) -> Vec<BranchInfo> {
        self.handles
            .iter()
            .map(|entry| {
                let h = entry.value();
                BranchInfo {
                    id: h.id,
                    parent_id: h.parent_id,
                    name: h.name.clone(),
                    state: h.state(),
                    refcount: h.refcount(),
                    delta_log_size: h.log.used_size(),
                    delta_log_capacity: h.log.capacity(),
                    invalidated: !h.is_active() && h.state() == BranchState::Active,
                }
            })
            .collect()
    }

    fn invalidate_siblings(&self, parent_id: BranchId, committed_child: BranchId) -> Result<()> {
        for entry in self.handles.iter() {
            let h = entry.value();
            if h.parent_id == parent_id && h.id != committed_child && h.state() == BranchState::Active {
                h.invalidated.store(true, Ordering::Release);
                Metrics::global().branch.invalidated.inc();
                tracing::warn!(branch = h.id, committed = committed_child, "branch invalidated by sibling commit");
            }
        }
        Ok(())
    }

    fn find_free_slot(&self) -> Result<usize> {
        let table = self.table.lock();
        table
            .iter()
            .position(|r| r.state == BranchState::Free)
            .ok_or(Error::Branch(BranchError::TableFull { capacity: table.len() }))
    }

    fn slot_of(&self, id: BranchId) -> Result<usize> {
        let table = self.table.lock();
        table
            .iter()
            .position(|r| r.branch_id == id)
            .ok_or(Error::Branch(BranchError::NoSuchBranch(id)))
    }

    fn persist_slot(&self, slot: usize, record: &BranchRecord) -> Result<()> {
        self.window
            .write(self.branch_table_offset + (slot * RECORD_SIZE) as u64, &record.encode())
    }

    fn persist_state(&self, id: BranchId, state: BranchState) -> Result<()> {
        let slot = self.slot_of(id)?;
        let mut table = self.table.lock();
        table[slot].state = state;
        let record = table[slot].clone();
        drop(table);
        self.persist_slot(slot, &record)
    }

    fn persist_refcount(&self, id: BranchId, refcount: u32) -> Result<()> {
        let slot = self.slot_of(id)?;
        let mut table = self.table.lock();
        table[slot].refcount = refcount;
        let record = table[slot].clone();
        drop(table);
        self.persist_slot(slot, &record)
    }

    fn persist_delta_log_size(&self, id: BranchId, size: u64) -> Result<()> {
        let slot = self.slot_of(id)?;
        let mut table = self.table.lock();
        table[slot].delta_log_size = size;
        let record = table[slot].clone();
        drop(table);
        self.persist_slot(slot, &record)
    }

    /// Slots retired by commit or abort, drained for diagnostics (this
    /// crate does not recycle them — see struct docs on `retired_slots`).
    pub fn retired_slot_hints(&self) -> Vec<usize> {
        let mut out = Vec::new();
        while let Some(slot) = self.retired_slots.pop() {
            out.push(slot);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ImageConfig;
    use crate::layout::format;
    use tempfile::tempdir;

    fn test_manager(capacity: u32) -> (tempfile::TempDir, BranchManager) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("img.daxfs");
        let cfg = ImageConfig {
            path: path.clone(),
            total_size: 4 << 20,
            branch_table_entries: capacity,
            base_image_path: None,
        };
        let layout = format::plan(&cfg, 0, 0);
        let window = Arc::new(StorageWindow::open(&path, cfg.total_size).unwrap());
        format::write_fresh(&window, &layout).unwrap();
        let branch_table_offset = layout.superblock.branch_table_offset;
        let alloc = Arc::new(DeltaAllocator::new(window.clone(), layout.superblock));
        let mgr = BranchManager::open(window, alloc, branch_table_offset, capacity, 64 * 1024).unwrap();
        (dir, mgr)
    }

    #[test]
    fn fork_commit_invalidates_siblings() {
        let (_d, mgr) = test_manager(16);
        let main = mgr.init_root("main").unwrap();
        let b1 = mgr.fork("b1", main).unwrap();
        let b2 = mgr.fork("b2", main).unwrap();

        mgr.commit(b1).unwrap();

        let b2handle = mgr.get(b2).unwrap();
        assert!(!b2handle.is_active());
        assert!(b2handle.check_active().is_err());
    }

    #[test]
    fn abort_decrements_parent_refcount() {
        let (_d, mgr) = test_manager(16);
        let main = mgr.init_root("main").unwrap();
        let before = mgr.get(main).unwrap().refcount();
        let child = mgr.fork("child", main).unwrap();
        assert_eq!(mgr.get(main).unwrap().refcount(), before + 1);
        mgr.abort(child).unwrap();
        assert_eq!(mgr.get(main).unwrap().refcount(), before);
    }

    #[test]
    fn committing_root_fails() {
        let (_d, mgr) = test_manager(16);
        let main = mgr.init_root("main").unwrap();
        let err = mgr.commit(main).unwrap_err();
        assert!(matches!(err, Error::Branch(BranchError::NoParent(_))));
    }

    #[test]
    fn mount_unmount_round_trips_refcount() {
        let (_d, mgr) = test_manager(16);
        let main = mgr.init_root("main").unwrap();
        let before = mgr.get(main).unwrap().refcount();
        let mount_id = mgr.mount(main).unwrap();
        assert_eq!(mgr.get(main).unwrap().refcount(), before + 1);
        mgr.unmount(mount_id).unwrap();
        assert_eq!(mgr.get(main).unwrap().refcount(), before);
    }
}
