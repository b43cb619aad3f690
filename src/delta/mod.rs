//! The per-branch delta log: a typed, append-only record stream plus the
//! in-memory indices rebuilt from it.
//!
//! [`record`] defines the on-storage record format, [`hash`] the (advisory,
//! non-authoritative) dirent fingerprint, [`index`] the rebuilt in-memory
//! maps, and [`log`] ties all three to a branch's reserved byte range of
//! the storage window.

/// Dirent hashing (advisory only; see module docs).
pub mod hash;
/// Record header/body encoding and decoding.
pub mod record;
/// Rebuilt in-memory inode/dirent/write indices.
pub mod index;
/// The append/scan/rebuild log itself.
pub mod log;

pub use index::BranchIndex;
pub use log::DeltaLog;
pub use record::{AttrMask, Record, RecordBody, RecordType};
