//! Identifier and small value types shared across the engine.

/// Inode number. Global uniqueness is guaranteed across the whole filesystem
/// by the superblock's monotonic `next_inode_id` counter (§3 invariants);
/// uniqueness *within* a branch additionally follows from that same bound.
pub type Ino = u64;

/// Branch identifier. Nonzero; branch 0 is reserved to mean "no parent"
/// (the main/root branch).
pub type BranchId = u32;

/// Inode number of the base image's root directory.
pub const BASE_ROOT_INO: Ino = 1;

/// Nanosecond timestamp, as produced by [`crate::core::utils::current_timestamp`].
pub type Timestamp = u64;

/// Plain POSIX-ish mode bits (permissions + type bits packed as the caller
/// sees fit; the core does not interpret them beyond storing and returning
/// them, per this crate's read-side/write-side contract).
pub type Mode = u32;
