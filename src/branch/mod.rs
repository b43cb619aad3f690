//! Branch lifecycle: fork, commit, abort, and the mount registry that
//! binds a VFS mount to a specific branch so sibling invalidation can be
//! reported as `STALE` per spec §4.5.

/// The branch manager itself.
pub mod manager;

pub use manager::{BranchHandle, BranchInfo, BranchManager};
