//! The VFS-facing surface: a [`Filesystem`] that owns the storage window,
//! allocator, branch manager, and optional base image, plus a [`Mount`]
//! bound to one branch that exposes the write path (§4.4) and every
//! read-side query (§4.3) as the operation set the VFS collaborator calls
//! (§6).

/// Write-path handlers and the `Filesystem`/`Mount` facade.
pub mod ops;

pub use ops::{Filesystem, Mount};
