//! On-storage layout: the superblock, branch table, and optional base
//! image, plus the logic to plan and write a fresh layout.
//!
//! Everything here is plain byte-level encode/decode. None of these types
//! hold a lock or touch the mapped file directly; [`crate::storage`] owns
//! the mmap and calls into this module to interpret or produce bytes.

/// The image superblock.
pub mod superblock;
/// The branch table.
pub mod branch_table;
/// The optional read-only base image.
pub mod base_image;
/// Region planning and fresh-image formatting.
pub mod format;

pub use base_image::{BaseImageBuilder, BaseImageHeader, BaseImageReader, BaseInode};
pub use branch_table::{BranchRecord, BranchState};
pub use superblock::Superblock;
