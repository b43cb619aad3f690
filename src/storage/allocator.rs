//! The delta-region bump allocator: one spinlock-guarded pointer handing
//! out sub-ranges of the delta region to branches at fork time, and the
//! superblock id counters (next branch id, next inode id) that share the
//! same lock since both are small, rare, and cheap to serialize.

use crate::core::error::{AllocError, Error, Result};
use crate::ids::{BranchId, Ino};
use crate::layout::Superblock;
use crate::storage::window::StorageWindow;
use parking_lot::Mutex;
use std::sync::Arc;

/// Guards the superblock's mutable counters and persists them to the
/// mapped image after every change. Holding the lock is the only way to
/// mutate `delta_alloc_offset`, `next_branch_id`, or `next_inode_id`; every
/// other reader of the superblock works from a cloned snapshot.
pub struct DeltaAllocator {
    window: Arc<StorageWindow>,
    superblock: Mutex<Superblock>,
}

impl DeltaAllocator {
    /// Wrap an already-opened window and its decoded superblock.
    pub fn new(window: Arc<StorageWindow>, superblock: Superblock) -> Self {
        Self {
            window,
            superblock: Mutex::new(superblock),
        }
    }

    /// A consistent snapshot of the superblock as of this call.
    pub fn snapshot(&self) -> Superblock {
        self.superblock.lock().clone()
    }

    /// Reserve `size` bytes inside the delta region and return the
    /// absolute offset of the reserved range. Used once per fork to hand a
    /// new branch its own sub-range.
    pub fn reserve(&self, size: u64) -> Result<u64> {
        let mut sb = self.superblock.lock();
        let region_end = sb.delta_region_offset + sb.delta_region_size;
        let start = sb.delta_region_offset + sb.delta_alloc_offset;
        let available = region_end.saturating_sub(start);
        if size > available {
            return Err(Error::Alloc(AllocError::NoSpace {
                requested: size,
                available,
            }));
        }
        sb.delta_alloc_offset += size;
        self.persist(&sb)?;
        Ok(start)
    }

    /// Hand out the next branch id.
    pub fn next_branch_id(&self) -> Result<BranchId> {
        let mut sb = self.superblock.lock();
        let id = sb.next_branch_id;
        sb.next_branch_id = sb
            .next_branch_id
            .checked_add(1)
            .ok_or(Error::Alloc(AllocError::NoMemory))?;
        self.persist(&sb)?;
        Ok(id)
    }

    /// Hand out the next global inode number.
    pub fn next_inode_id(&self) -> Result<Ino> {
        let mut sb = self.superblock.lock();
        let id = sb.next_inode_id;
        sb.next_inode_id = sb
            .next_inode_id
            .checked_add(1)
            .ok_or(Error::Alloc(AllocError::NoMemory))?;
        self.persist(&sb)?;
        Ok(id)
    }

    fn persist(&self, sb: &Superblock) -> Result<()> {
        self.window.write(0, &sb.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::format;
    use crate::core::config::ImageConfig;
    use tempfile::tempdir;

    fn test_allocator() -> (tempfile::TempDir, DeltaAllocator) {
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
        let alloc = DeltaAllocator::new(window, layout.superblock);
        (dir, alloc)
    }

    #[test]
    fn reserve_advances_bump_pointer() {
        let (_dir, alloc) = test_allocator();
        let a = alloc.reserve(4096).unwrap();
        let b = alloc.reserve(4096).unwrap();
        assert_eq!(b, a + 4096);
    }

    #[test]
    fn reserve_past_region_end_is_nospc() {
        let (_dir, alloc) = test_allocator();
        let region_size = alloc.snapshot().delta_region_size;
        let err = alloc.reserve(region_size + 1).unwrap_err();
        assert!(err.is_nospc());
    }

    #[test]
    fn ids_increase_monotonically() {
        let (_dir, alloc) = test_allocator();
        let b1 = alloc.next_branch_id().unwrap();
        let b2 = alloc.next_branch_id().unwrap();
        assert_eq!(b2, b1 + 1);
        let i1 = alloc.next_inode_id().unwrap();
        let i2 = alloc.next_inode_id().unwrap();
        assert_eq!(i2, i1 + 1);
    }
}
