//! daxfs-core: a memory-native, delta-log filesystem with speculative
//! branching.
//!
//! An image is a single mapped region holding an optional read-only base
//! image, a fixed branch table, and a delta region subdivided into one
//! append-only log per branch. Branches form a tree rooted at `main`;
//! forking a branch costs one allocation and no copy, writes to a branch
//! are invisible to its siblings, and a branch is resolved by merging its
//! log into its parent's (commit) or discarded outright (abort). See
//! [`vfs::Filesystem`] for the entry point.
#![warn(missing_docs)]

// Configure global allocator for maximum performance
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

/// Error handling, configuration, metrics, and small cross-cutting
/// utilities shared by every other module.
pub mod core;

/// The mapped storage window and the delta-region bump allocator.
pub mod storage;

/// On-disk layout: superblock, branch table, and base image encoding.
pub mod layout;

/// Delta-log records, the per-branch index rebuilt from them, and the
/// append-only log itself.
pub mod delta;

/// Branch lifecycle: fork, commit, abort, and the mount registry.
pub mod branch;

/// Shared identifier types (`Ino`, `BranchId`, ...).
pub mod ids;

/// The read-side resolver: branch-chain walks with base-image fallback.
pub mod resolver;

/// The VFS-facing surface: `Filesystem` and `Mount`.
pub mod vfs;

// Re-export commonly used items for convenience
pub use crate::core::{Error, Result};
pub use crate::core::config::Config;
pub use crate::core::error::{AllocError, BranchError, LayoutError, ResolveError};
pub use crate::resolver::{DirEntry, Resolver, Stat};
pub use crate::vfs::{Filesystem, Mount};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize tracing and the metrics registry. Call once at process
/// start, before opening or formatting any image.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    tracing::info!("initializing {} v{}", NAME, VERSION);
    core::metrics::init_registry();
}
