//! The branch table: a fixed array of 128-byte records directly following
//! the superblock, one per branch slot.

use crate::core::error::{Error, LayoutError, Result};
use crate::ids::BranchId;

/// On-storage size of a single branch record.
pub const RECORD_SIZE: usize = 128;
/// Maximum length of a branch name, not counting the null terminator.
pub const NAME_MAX: usize = 31;

/// Lifecycle state of a branch-table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BranchState {
    /// Slot is unused and may be handed out to a new fork.
    Free = 0,
    /// Branch is live and mountable.
    Active = 1,
    /// Branch's deltas have been folded into its parent; the slot is kept
    /// until refcount drops to zero, then recycled.
    Committed = 2,
    /// Branch was discarded; its deltas are dead and ignored by every
    /// resolver walk.
    Aborted = 3,
}

impl BranchState {
    fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => Self::Free,
            1 => Self::Active,
            2 => Self::Committed,
            3 => Self::Aborted,
            other => {
                return Err(Error::Layout(LayoutError::Corruption(format!(
                    "bad branch state byte: {other}"
                ))))
            }
        })
    }
}

/// A single branch-table record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRecord {
    /// This branch's id. 0 in a FREE slot.
    pub branch_id: BranchId,
    /// Parent branch id this branch forked from. 0 means "forked from the
    /// base image directly" (the main branch's parent).
    pub parent_id: BranchId,
    /// Absolute offset of this branch's reserved delta-log sub-range.
    pub delta_log_offset: u64,
    /// Bytes of the sub-range actually used so far. Published only after
    /// the corresponding bytes and index entry are committed, so a reader
    /// observing a given value may safely read up to that many bytes.
    pub delta_log_size: u64,
    /// Size of the reserved sub-range; `delta_log_size` never exceeds this.
    pub delta_log_capacity: u64,
    /// Lifecycle state.
    pub state: BranchState,
    /// Number of live mounts plus live children referencing this branch.
    /// A COMMITTED or ABORTED branch's slot is only recycled once this
    /// reaches zero.
    pub refcount: u32,
    /// Next local inode hint; branches mostly draw from the superblock's
    /// global counter, this is reserved for a future per-branch fast path.
    pub next_local_ino: u64,
    /// Human-readable branch name, for CLI listing, null-padded.
    pub name: [u8; NAME_MAX + 1],
}

impl BranchRecord {
    /// A zeroed, FREE record.
    pub fn free() -> Self {
        Self {
            branch_id: 0,
            parent_id: 0,
            delta_log_offset: 0,
            delta_log_size: 0,
            delta_log_capacity: 0,
            state: BranchState::Free,
            refcount: 0,
            next_local_ino: 0,
            name: [0u8; NAME_MAX + 1],
        }
    }

    /// Build the name field from a `&str`, truncating to [`NAME_MAX`] bytes.
    pub fn name_bytes(name: &str) -> [u8; NAME_MAX + 1] {
        let mut buf = [0u8; NAME_MAX + 1];
        let bytes = name.as_bytes();
        let len = bytes.len().min(NAME_MAX);
        buf[..len].copy_from_slice(&bytes[..len]);
        buf
    }

    /// Decode the name field back to a `String`, stopping at the first NUL.
    pub fn name_string(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    /// Encode this record into a [`RECORD_SIZE`]-byte buffer.
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0..4].copy_from_slice(&self.branch_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.parent_id.to_le_bytes());
        buf[8..16].copy_from_slice(&self.delta_log_offset.to_le_bytes());
        buf[16..24].copy_from_slice(&self.delta_log_size.to_le_bytes());
        buf[24..32].copy_from_slice(&self.delta_log_capacity.to_le_bytes());
        buf[32] = self.state as u8;
        buf[36..40].copy_from_slice(&self.refcount.to_le_bytes());
        buf[40..48].copy_from_slice(&self.next_local_ino.to_le_bytes());
        buf[48..48 + NAME_MAX + 1].copy_from_slice(&self.name);
        buf
    }

    /// Decode a record from a [`RECORD_SIZE`]-byte slice.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < RECORD_SIZE {
            return Err(Error::Layout(LayoutError::OutOfBounds {
                offset: 0,
                len: RECORD_SIZE as u64,
                region_size: bytes.len() as u64,
            }));
        }
        let branch_id = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let parent_id = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let delta_log_offset = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        let delta_log_size = u64::from_le_bytes(bytes[16..24].try_into().unwrap());
        let delta_log_capacity = u64::from_le_bytes(bytes[24..32].try_into().unwrap());
        let state = BranchState::from_u8(bytes[32])?;
        let refcount = u32::from_le_bytes(bytes[36..40].try_into().unwrap());
        let next_local_ino = u64::from_le_bytes(bytes[40..48].try_into().unwrap());
        let mut name = [0u8; NAME_MAX + 1];
        name.copy_from_slice(&bytes[48..48 + NAME_MAX + 1]);
        Ok(Self {
            branch_id,
            parent_id,
            delta_log_offset,
            delta_log_size,
            delta_log_capacity,
            state,
            refcount,
            next_local_ino,
            name,
        })
    }
}

const _: () = assert!(48 + NAME_MAX + 1 <= RECORD_SIZE);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_record() {
        let mut rec = BranchRecord::free();
        rec.branch_id = 3;
        rec.parent_id = 1;
        rec.delta_log_offset = 4096;
        rec.delta_log_size = 128;
        rec.delta_log_capacity = 1 << 20;
        rec.state = BranchState::Active;
        rec.refcount = 2;
        rec.name = BranchRecord::name_bytes("feature/x");

        let encoded = rec.encode();
        let decoded = BranchRecord::decode(&encoded).unwrap();
        assert_eq!(rec, decoded);
        assert_eq!(decoded.name_string(), "feature/x");
    }

    #[test]
    fn truncates_long_names() {
        let name = "a".repeat(100);
        let bytes = BranchRecord::name_bytes(&name);
        assert_eq!(bytes[NAME_MAX], 0);
    }
}
