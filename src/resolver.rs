//! The resolver: unified read-side queries that walk a branch chain from
//! leaf to root and, if nothing in the chain decides, fall through to the
//! optional base image (§4.3).
//!
//! Every method here is a pure read: none of them touch the delta log or
//! branch table, so they can run concurrently with writers on other
//! branches (and with writers on this branch's log past whatever prefix
//! [`crate::delta::log::DeltaLog::used_size`] has already published).

use crate::branch::{BranchHandle, BranchManager};
use crate::core::error::{Error, ResolveError, Result};
use crate::core::metrics::Metrics;
use crate::ids::{BranchId, Ino, Mode, Timestamp};
use crate::layout::base_image::BaseImageReader;
use std::sync::Arc;

/// A resolved inode's metadata, fused from whichever branch (or the base
/// image) last decided it.
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    /// Inode number.
    pub ino: Ino,
    /// Mode bits (type + permissions).
    pub mode: Mode,
    /// Size in bytes.
    pub size: u64,
    /// Last-modified timestamp.
    pub mtime: Timestamp,
    /// Owning uid.
    pub uid: u32,
    /// Owning gid.
    pub gid: u32,
}

impl Stat {
    /// True if this inode is a directory, per the standard S_IFDIR bit.
    pub fn is_dir(&self) -> bool {
        self.mode & 0o170000 == 0o040000
    }
}

/// A single resolved directory entry, as returned by [`Resolver::enumerate`].
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// Entry name (`.` and `..` included).
    pub name: String,
    /// Inode the entry names.
    pub ino: Ino,
    /// True if the named inode is a directory.
    pub is_dir: bool,
}

/// Fuses a branch chain with an optional base image to answer every
/// read-side VFS query.
pub struct Resolver {
    branches: Arc<BranchManager>,
    base: Option<Arc<BaseImageReader>>,
}

impl Resolver {
    /// Build a resolver over `branches` and an optional `base` image.
    pub fn new(branches: Arc<BranchManager>, base: Option<Arc<BaseImageReader>>) -> Self {
        Self { branches, base }
    }

    /// The branch chain from `leaf` to the root, leaf first. `leaf == 0`
    /// means "no branch" (a bare mount of the base image): the chain is
    /// empty and every query falls straight through to the base image.
    fn chain(&self, leaf: BranchId) -> Result<Vec<Arc<BranchHandle>>> {
        if leaf == 0 {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        let mut current = self.branches.get(leaf)?;
        loop {
            let parent_id = current.parent_id;
            out.push(current);
            if parent_id == 0 {
                break;
            }
            current = self.branches.get(parent_id)?;
        }
        let depth = out.len() as i64;
        Metrics::global().resolver.walk_depth.observe(depth as f64);
        if depth > 1 {
            Metrics::global().resolver.ancestor_walks.inc();
        }
        Ok(out)
    }

    /// `resolve_inode`: the leaf-most branch that mentions `ino` decides;
    /// if none does, the base image decides (§4.3).
    pub fn resolve_inode(&self, leaf: BranchId, ino: Ino) -> Result<Option<Stat>> {
        for branch in self.chain(leaf)? {
            if let Some(entry) = branch.log.lookup_inode(ino) {
                if entry.deleted {
                    return Ok(None);
                }
                return Ok(Some(Stat {
                    ino,
                    mode: entry.mode,
                    size: entry.size,
                    mtime: entry.mtime,
                    uid: entry.uid,
                    gid: entry.gid,
                }));
            }
        }
        Metrics::global().resolver.base_fallbacks.inc();
        self.resolve_inode_from_base(ino)
    }

    fn resolve_inode_from_base(&self, ino: Ino) -> Result<Option<Stat>> {
        let Some(base) = &self.base else {
            return Ok(None);
        };
        let Some(inode) = base.inode(ino)? else {
            return Ok(None);
        };
        Ok(Some(Stat {
            ino,
            mode: inode.mode,
            size: inode.size,
            mtime: base.created_at(),
            uid: inode.uid as u32,
            gid: inode.gid as u32,
        }))
    }

    /// `resolve_dirent`: the leaf-most branch that mentions `(parent,
    /// name)` decides; if none does, the base image decides, with every
    /// branch in the chain getting a veto via `is_deleted` (§4.3).
    pub fn resolve_dirent(&self, leaf: BranchId, parent: Ino, name: &str) -> Result<Option<Ino>> {
        let chain = self.chain(leaf)?;
        for branch in &chain {
            if let Some(entry) = branch.log.lookup_dirent(parent, name) {
                if entry.deleted {
                    return Ok(None);
                }
                return Ok(Some(entry.ino));
            }
        }
        let Some(base) = &self.base else {
            return Ok(None);
        };
        let Some(ino) = base.lookup_child(parent, name)? else {
            return Ok(None);
        };
        for branch in &chain {
            if branch.log.is_deleted(ino) {
                return Ok(None);
            }
        }
        Ok(Some(ino))
    }

    /// `resolve_data`: the leaf-most branch with a WRITE covering `pos`
    /// wins; otherwise the base image's data, clamped to its size (§4.3).
    pub fn resolve_data(&self, leaf: BranchId, ino: Ino, pos: u64, len: u64) -> Result<(Vec<u8>, u64)> {
        let chain = self.chain(leaf)?;
        for branch in &chain {
            if let Some((data, avail)) = branch.log.resolve_data(ino, pos, len)? {
                return Ok((data.to_vec(), avail));
            }
        }
        let Some(base) = &self.base else {
            return Ok((Vec::new(), 0));
        };
        let Some(inode) = base.inode(ino)? else {
            return Ok((Vec::new(), 0));
        };
        let (data, avail) = base.data(&inode, pos, len)?;
        Ok((data.to_vec(), avail))
    }

    /// The effective parent of `ino`, for answering `..`: the leaf-most
    /// branch that created or renamed it decides; otherwise the base
    /// image's fixed `parent_ino`.
    pub fn parent_of(&self, leaf: BranchId, ino: Ino) -> Result<Option<Ino>> {
        for branch in self.chain(leaf)? {
            if let Some(parent) = branch.log.parent_of(ino) {
                return Ok(Some(parent));
            }
        }
        let Some(base) = &self.base else {
            return Ok(None);
        };
        Ok(base.inode(ino)?.map(|i| i.parent_ino))
    }

    /// Directory enumeration (§4.3): `.` and `..`, then surviving base
    /// children, then every branch's still-live CREATE/MKDIR under
    /// `parent`, each re-decided through [`Self::resolve_dirent`] so a
    /// closer-to-leaf deletion or rename correctly shadows it.
    pub fn enumerate(&self, leaf: BranchId, parent: Ino) -> Result<Vec<DirEntry>> {
        let chain = self.chain(leaf)?;
        let mut names: Vec<String> = Vec::new();

        if let Some(base) = &self.base {
            for child in base.children(parent)? {
                if let Some(inode) = base.inode(child)? {
                    names.push(base.name(&inode)?);
                }
            }
        }
        for branch in &chain {
            for (name, entry) in branch.log.dirents_under(parent) {
                if !entry.deleted && !names.contains(&name) {
                    names.push(name);
                }
            }
        }

        let mut out = Vec::new();
        out.push(DirEntry { name: ".".into(), ino: parent, is_dir: true });
        let dotdot = self.parent_of(leaf, parent)?.unwrap_or(parent);
        out.push(DirEntry { name: "..".into(), ino: dotdot, is_dir: true });

        for name in names {
            if let Some(ino) = self.resolve_dirent(leaf, parent, &name)? {
                let is_dir = self
                    .resolve_inode(leaf, ino)?
                    .map(|s| s.is_dir())
                    .unwrap_or(false);
                out.push(DirEntry { name, ino, is_dir });
            }
        }
        Ok(out)
    }

    /// Fail with [`ResolveError::NotFound`] unless `resolve_inode` finds a
    /// live inode; small convenience for write-path handlers that need to
    /// validate existence before appending a record.
    pub fn require_inode(&self, leaf: BranchId, ino: Ino) -> Result<Stat> {
        self.resolve_inode(leaf, ino)?
            .ok_or_else(|| Error::Resolve(ResolveError::NotFound))
    }
}
