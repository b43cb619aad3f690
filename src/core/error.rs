//! Error types and handling for daxfs-core
//!
//! This module defines all error types used throughout the system, grouped
//! along the taxonomy the engine distinguishes at the VFS boundary: resource
//! exhaustion, semantic mistakes, branch-state violations, and transient
//! copy failures.

use thiserror::Error;

/// Main result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for daxfs-core
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// On-storage layout errors
    #[error("layout error: {0}")]
    Layout(#[from] LayoutError),

    /// Delta-region allocator errors
    #[error("allocator error: {0}")]
    Alloc(#[from] AllocError),

    /// Branch lifecycle errors
    #[error("branch error: {0}")]
    Branch(#[from] BranchError),

    /// Delta-log and resolver errors
    #[error("resolve error: {0}")]
    Resolve(#[from] ResolveError),

    /// I/O errors from std (image file, mmap setup)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Prometheus metrics registration errors
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// On-storage layout errors (superblock, branch table, base image)
#[derive(Error, Debug)]
pub enum LayoutError {
    /// Superblock magic or version mismatch
    #[error("bad superblock: {0}")]
    BadSuperblock(String),

    /// Corruption detected during a log scan or index rebuild
    ///
    /// Maps to the `IO` error class in the VFS-facing taxonomy: the branch is
    /// marked ABORTED and every mount bound to it starts returning `STALE`.
    #[error("corruption detected: {0}")]
    Corruption(String),

    /// Requested offset or length would overrun the mapped region
    #[error("out of bounds: offset {offset} len {len} region size {region_size}")]
    OutOfBounds {
        /// Offset requested
        offset: u64,
        /// Length requested
        len: u64,
        /// Size of the backing region
        region_size: u64,
    },
}

/// Delta-region allocator errors
#[derive(Error, Debug)]
pub enum AllocError {
    /// The delta region (or a branch's reserved sub-range) is exhausted
    #[error("no space left: requested {requested} available {available}")]
    NoSpace {
        /// Bytes requested
        requested: u64,
        /// Bytes actually available
        available: u64,
    },

    /// Index-node allocation failed (non-blocking allocation inside a
    /// critical section is not permitted to succeed via blocking retry)
    #[error("out of memory allocating index node")]
    NoMemory,
}

/// Branch lifecycle errors
#[derive(Error, Debug)]
pub enum BranchError {
    /// Operation attempted on a branch that is not ACTIVE, or whose mount
    /// was invalidated by a sibling commit
    #[error("branch is stale")]
    Stale,

    /// No free branch-table slot and the table is at capacity
    #[error("branch table is full ({capacity} entries)")]
    TableFull {
        /// Branch-table capacity
        capacity: usize,
    },

    /// Referenced branch id does not exist
    #[error("no such branch: {0}")]
    NoSuchBranch(u32),

    /// Commit target parent is not ACTIVE
    #[error("commit target branch {0} is not active")]
    ParentNotActive(u32),

    /// A branch still has children or active mounts and cannot be reclaimed
    #[error("branch {0} still referenced (refcount {1})")]
    StillReferenced(u32, u32),

    /// The root/main branch has no parent and cannot be committed or
    /// aborted
    #[error("branch {0} is the root branch and has no parent")]
    NoParent(u32),

    /// Referenced mount id does not exist
    #[error("no such mount: {0}")]
    NoSuchMount(u64),
}

/// Semantic errors raised by lookup/stat/read/enumerate and the write path
#[derive(Error, Debug)]
pub enum ResolveError {
    /// Name does not exist under the given parent
    #[error("no such file or directory")]
    NotFound,

    /// Name already exists (create/mkdir/rename without replace)
    #[error("already exists")]
    AlreadyExists,

    /// Unsupported rename flags, or a rename target existed without
    /// `NOREPLACE`, or an otherwise malformed request
    #[error("invalid argument: {0}")]
    Invalid(String),

    /// Directory is not empty (rmdir)
    #[error("directory not empty")]
    NotEmpty,
}

impl Error {
    /// Construct a configuration error from any displayable message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True if this error corresponds to the VFS-facing `STALE` condition
    pub fn is_stale(&self) -> bool {
        matches!(self, Error::Branch(BranchError::Stale))
    }

    /// True if this error corresponds to the VFS-facing `NOSPC` condition
    pub fn is_nospc(&self) -> bool {
        matches!(self, Error::Alloc(AllocError::NoSpace { .. }))
    }
}
