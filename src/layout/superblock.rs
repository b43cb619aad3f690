//! The image superblock: a single fixed-offset page describing every other
//! region in the mapped file.

use crate::core::error::{Error, LayoutError, Result};
use crate::ids::BranchId;

/// Magic number stamped at offset 0 of every image (`"DAXFSv1\0"` as bytes).
pub const MAGIC: u64 = 0x0031_7346_5841_4400;
/// Layout version this build writes and understands.
pub const VERSION: u32 = 1;
/// On-disk encoded size of the superblock. The page is reserved in full even
/// though the struct itself is smaller, so the branch table can start at a
/// block-aligned offset.
pub const SUPERBLOCK_SIZE: usize = 4096;

/// Fixed-layout description of the image: where the base image, branch
/// table, and delta region live, plus the handful of counters that mutate
/// over the image's lifetime (next ids, delta bump pointer).
///
/// The mutable counters are guarded by [`crate::storage::allocator::DeltaAllocator`]'s
/// lock, not by atomics on the mapped bytes; `encode`/`decode` are plain
/// byte-level (de)serialization used to read the image at open time and to
/// persist counter updates afterward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    /// Total size of the mapped region, in bytes.
    pub total_size: u64,
    /// Absolute offset of the base image region, or 0 if the image has none.
    pub base_image_offset: u64,
    /// Size in bytes of the base image region.
    pub base_image_size: u64,
    /// Absolute offset of the branch table.
    pub branch_table_offset: u64,
    /// Number of branch-table slots (fixed at format time, max 256 per the
    /// 128-byte-record layout this crate writes).
    pub branch_table_capacity: u32,
    /// Absolute offset of the delta region (all branch sub-ranges live
    /// inside this one contiguous area).
    pub delta_region_offset: u64,
    /// Size in bytes of the delta region.
    pub delta_region_size: u64,
    /// Current bump offset within the delta region. Everything below this
    /// offset is owned by some branch's reserved sub-range; everything at or
    /// above it is unallocated.
    pub delta_alloc_offset: u64,
    /// Next branch id to hand out on fork.
    pub next_branch_id: BranchId,
    /// Next inode number to hand out on create/mkdir, across all branches.
    pub next_inode_id: u64,
}

impl Superblock {
    /// Build a fresh superblock for a newly formatted image.
    pub fn new(
        total_size: u64,
        base_image_offset: u64,
        base_image_size: u64,
        branch_table_offset: u64,
        branch_table_capacity: u32,
        delta_region_offset: u64,
        delta_region_size: u64,
        base_inode_count: u64,
    ) -> Self {
        Self {
            total_size,
            base_image_offset,
            base_image_size,
            branch_table_offset,
            branch_table_capacity,
            delta_region_offset,
            delta_region_size,
            delta_alloc_offset: 0,
            // Branch 0 is reserved ("no parent"); the first real fork gets 1.
            next_branch_id: 1,
            // Inode 0 is invalid, 1 is always the root (the base image's
            // root when one is embedded, or the synthetic root otherwise).
            // The base image (if any) occupies 1..=base_inode_count, so the
            // first id a branch hands out must start past all of it (§3:
            // "global next_inode_id monotonically bounds all issued ids").
            next_inode_id: base_inode_count.max(1) + 1,
        }
    }

    /// Encode into a zero-padded, block-sized byte buffer ready to be
    /// written at offset 0 of the image.
    pub fn encode(&self) -> [u8; SUPERBLOCK_SIZE] {
        let mut buf = [0u8; SUPERBLOCK_SIZE];
        let mut w = Writer(&mut buf);
        w.put_u64(MAGIC);
        w.put_u32(VERSION);
        w.put_u32(0); // reserved, keeps the counters 8-byte aligned
        w.put_u64(self.total_size);
        w.put_u64(self.base_image_offset);
        w.put_u64(self.base_image_size);
        w.put_u64(self.branch_table_offset);
        w.put_u32(self.branch_table_capacity);
        w.put_u32(0); // reserved
        w.put_u64(self.delta_region_offset);
        w.put_u64(self.delta_region_size);
        w.put_u64(self.delta_alloc_offset);
        w.put_u32(self.next_branch_id);
        w.put_u64(self.next_inode_id);
        buf
    }

    /// Decode from the first [`SUPERBLOCK_SIZE`] bytes of the image,
    /// validating the magic and version.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SUPERBLOCK_SIZE {
            return Err(Error::Layout(LayoutError::OutOfBounds {
                offset: 0,
                len: SUPERBLOCK_SIZE as u64,
                region_size: bytes.len() as u64,
            }));
        }
        let mut r = Reader(bytes);
        let magic = r.get_u64();
        if magic != MAGIC {
            return Err(Error::Layout(LayoutError::BadSuperblock(format!(
                "bad magic: {:#x}",
                magic
            ))));
        }
        let version = r.get_u32();
        if version != VERSION {
            return Err(Error::Layout(LayoutError::BadSuperblock(format!(
                "unsupported version: {}",
                version
            ))));
        }
        r.get_u32(); // reserved
        let total_size = r.get_u64();
        let base_image_offset = r.get_u64();
        let base_image_size = r.get_u64();
        let branch_table_offset = r.get_u64();
        let branch_table_capacity = r.get_u32();
        r.get_u32(); // reserved
        let delta_region_offset = r.get_u64();
        let delta_region_size = r.get_u64();
        let delta_alloc_offset = r.get_u64();
        let next_branch_id = r.get_u32();
        let next_inode_id = r.get_u64();

        Ok(Self {
            total_size,
            base_image_offset,
            base_image_size,
            branch_table_offset,
            branch_table_capacity,
            delta_region_offset,
            delta_region_size,
            delta_alloc_offset,
            next_branch_id,
            next_inode_id,
        })
    }
}

struct Writer<'a>(&'a mut [u8]);
impl<'a> Writer<'a> {
    fn put_u32(&mut self, v: u32) {
        let (head, tail) = std::mem::take(&mut self.0).split_at_mut(4);
        head.copy_from_slice(&v.to_le_bytes());
        self.0 = tail;
    }
    fn put_u64(&mut self, v: u64) {
        let (head, tail) = std::mem::take(&mut self.0).split_at_mut(8);
        head.copy_from_slice(&v.to_le_bytes());
        self.0 = tail;
    }
}

struct Reader<'a>(&'a [u8]);
impl<'a> Reader<'a> {
    fn get_u32(&mut self) -> u32 {
        let (head, tail) = self.0.split_at(4);
        self.0 = tail;
        u32::from_le_bytes(head.try_into().unwrap())
    }
    fn get_u64(&mut self) -> u64 {
        let (head, tail) = self.0.split_at(8);
        self.0 = tail;
        u64::from_le_bytes(head.try_into().unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let sb = Superblock::new(1 << 20, 4096, 8192, 12288, 256, 20480, 1 << 19, 3);
        let bytes = sb.encode();
        let decoded = Superblock::decode(&bytes).unwrap();
        assert_eq!(sb, decoded);
    }

    #[test]
    fn rejects_bad_magic() {
        let buf = [0u8; SUPERBLOCK_SIZE];
        assert!(Superblock::decode(&buf).is_err());
    }
}
