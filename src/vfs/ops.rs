//! The write path (§4.4): every VFS mutation handler validates its
//! precondition through the resolver, appends one record to the current
//! branch's delta log (`append` publishes bytes and index atomically, see
//! [`crate::delta::log::DeltaLog::append`]), and returns. Writes always
//! target the *current branch* — never the base image or an ancestor.

use crate::branch::{BranchHandle, BranchInfo, BranchManager};
use crate::core::config::Config;
use crate::core::error::{BranchError, Error, ResolveError, Result};
use crate::core::metrics::Metrics;
use crate::core::utils::current_timestamp;
use crate::delta::record::{AttrMask, Record, RecordBody, RecordType};
use crate::ids::{BranchId, Ino};
use crate::layout::base_image::BaseImageReader;
use crate::layout::format;
use crate::layout::superblock::{Superblock, SUPERBLOCK_SIZE};
use crate::resolver::{DirEntry, Resolver, Stat};
use crate::storage::allocator::DeltaAllocator;
use crate::storage::window::StorageWindow;
use std::path::Path;
use std::sync::Arc;

/// Owns every region of one mapped image: the storage window, the
/// allocator, the branch manager, and (if the image has one) the base
/// image reader. Created once per open image; mounts are cheap handles
/// borrowed from it.
pub struct Filesystem {
    window: Arc<StorageWindow>,
    alloc: Arc<DeltaAllocator>,
    branches: Arc<BranchManager>,
    base: Option<Arc<BaseImageReader>>,
}

impl Filesystem {
    /// Format a brand-new image at `config.image.path` and open the
    /// persistent root ("main") branch. `base` is pre-built base-image
    /// bytes (from [`crate::layout::base_image::BaseImageBuilder::build`]),
    /// written into the reserved base-image region before the branch
    /// table is brought up.
    pub fn format(config: &Config, base: Option<Vec<u8>>) -> Result<Arc<Self>> {
        let base_size = base.as_ref().map(|b| b.len() as u64).unwrap_or(0);
        let base_inode_count = match &base {
            Some(bytes) => crate::layout::base_image::BaseImageHeader::decode(bytes)?.inode_count,
            None => 0,
        };
        let layout = format::plan(&config.image, base_size, base_inode_count);
        let window = Arc::new(StorageWindow::open(&config.image.path, config.image.total_size)?);
        format::write_fresh(&window, &layout)?;

        let base_reader = if let Some(bytes) = base {
            window.write(layout.superblock.base_image_offset, &bytes)?;
            window.sync()?;
            Some(Arc::new(BaseImageReader::open(window.clone(), layout.superblock.base_image_offset)?))
        } else {
            None
        };

        let alloc = Arc::new(DeltaAllocator::new(window.clone(), layout.superblock.clone()));
        let branches = Arc::new(BranchManager::open(
            window.clone(),
            alloc.clone(),
            layout.superblock.branch_table_offset,
            layout.superblock.branch_table_capacity,
            config.branch.default_delta_log_capacity,
        )?);
        branches.init_root("main")?;

        Ok(Arc::new(Self { window, alloc, branches, base: base_reader }))
    }

    /// Open an already-formatted image at `path`, rebuilding every
    /// branch's index from its raw log bytes.
    pub fn open(path: &Path, default_delta_log_capacity: u64) -> Result<Arc<Self>> {
        let total_size = std::fs::metadata(path)?.len();
        let window = Arc::new(StorageWindow::open(path, total_size)?);
        let superblock = Superblock::decode(window.read(0, SUPERBLOCK_SIZE as u64)?)?;

        let base_reader = if superblock.base_image_offset != 0 {
            Some(Arc::new(BaseImageReader::open(window.clone(), superblock.base_image_offset)?))
        } else {
            None
        };

        let alloc = Arc::new(DeltaAllocator::new(window.clone(), superblock.clone()));
        let branches = Arc::new(BranchManager::open(
            window.clone(),
            alloc.clone(),
            superblock.branch_table_offset,
            superblock.branch_table_capacity,
            default_delta_log_capacity,
        )?);

        Ok(Arc::new(Self { window, alloc, branches, base: base_reader }))
    }

    /// A resolver fused over this image's current branch manager and base
    /// image.
    pub fn resolver(&self) -> Resolver {
        Resolver::new(self.branches.clone(), self.base.clone())
    }

    /// Fork a new child branch (§4.5 "Fork"). Branch-management interface
    /// `create_branch` (§6).
    pub fn create_branch(&self, name: &str, parent: BranchId) -> Result<BranchId> {
        self.branches.fork(name, parent)
    }

    /// Resolve a branch name (e.g. `"main"`) to its id, for CLI use.
    pub fn branch_by_name(&self, name: &str) -> Result<BranchId> {
        self.branches
            .find_by_name(name)
            .ok_or_else(|| Error::Branch(BranchError::NoSuchBranch(0)))
    }

    /// Merge a branch into its parent (§4.5 "Commit"). Branch-management
    /// interface `commit` (§6).
    pub fn commit(&self, branch: BranchId) -> Result<()> {
        self.branches.commit(branch)
    }

    /// Discard a branch (§4.5 "Abort"). Branch-management interface
    /// `abort` (§6).
    pub fn abort(&self, branch: BranchId) -> Result<()> {
        self.branches.abort(branch)
    }

    /// Every known branch, for CLI listing (SPEC_FULL B.6).
    pub fn list_branches(&self) -> Vec<BranchInfo> {
        self.branches.list()
    }

    /// Re-run `build_index` over every live branch's raw log bytes and
    /// report the first corruption found, mirroring the `fsck` CLI
    /// subcommand's contract (§7 "Log-scan corruption is reported once").
    /// On success, returns the number of branches checked.
    pub fn fsck(&self) -> Result<usize> {
        let mut checked = 0;
        for info in self.branches.list() {
            let handle = self.branches.get(info.id)?;
            if let Err(e) = handle.log.build_index() {
                tracing::error!(branch = info.id, error = %e, "corruption detected during fsck");
                if let Err(abort_err) = self.branches.abort(info.id) {
                    tracing::warn!(branch = info.id, error = %abort_err, "failed to abort corrupted branch");
                }
                return Err(e);
            }
            checked += 1;
        }
        Ok(checked)
    }

    /// Bind a mount to `branch`. `branch == 0` mounts the base image
    /// directly with no branch overlay at all — there is no delta log to
    /// append to, so every mutating call on such a mount fails with
    /// `INVAL` (this is how scenario §8.1's "mount main, no branch" reads
    /// the base image read-only).
    pub fn mount(self: &Arc<Self>, branch: BranchId) -> Result<Mount> {
        if branch == 0 {
            return Ok(Mount { fs: self.clone(), mount_id: None, branch_id: 0 });
        }
        let mount_id = self.branches.mount(branch)?;
        Ok(Mount { fs: self.clone(), mount_id: Some(mount_id), branch_id: branch })
    }

    /// Flush the mapped image to its backing file.
    pub fn sync(&self) -> Result<()> {
        self.window.sync()
    }
}

fn append_record(branch: &BranchHandle, record: &Record) -> Result<u64> {
    match branch.log.append(record) {
        Ok(offset) => {
            Metrics::global().delta.appended.inc();
            Ok(offset)
        }
        Err(e) => {
            if e.is_nospc() {
                Metrics::global().delta.nospc.inc();
            }
            Err(e)
        }
    }
}

/// A mount bound to one branch (or, for `branch_id == 0`, directly to the
/// base image with no branch at all). Every method re-validates the bound
/// branch is still active before doing anything, so an invalidated mount
/// uniformly reports `STALE` on read, write, lookup, and enumerate alike
/// (§4.5).
pub struct Mount {
    fs: Arc<Filesystem>,
    mount_id: Option<u64>,
    branch_id: BranchId,
}

impl Mount {
    /// The branch this mount is bound to (`0` for a bare base-image mount).
    pub fn branch_id(&self) -> BranchId {
        self.branch_id
    }

    /// Validate the mount is still usable, returning the live branch
    /// handle unless this is a bare base-image mount (`None`).
    fn active_branch(&self) -> Result<Option<Arc<BranchHandle>>> {
        match self.mount_id {
            Some(mount_id) => Ok(Some(self.fs.branches.branch_for_mount(mount_id)?)),
            None => Ok(None),
        }
    }

    /// Validate the mount can accept a mutation: fails with `INVAL` for a
    /// bare base-image mount (read-only by construction, per §8.1), or
    /// with `STALE` for an invalidated/non-active branch.
    fn writable_branch(&self) -> Result<Arc<BranchHandle>> {
        self.active_branch()?.ok_or_else(|| {
            Error::Resolve(ResolveError::Invalid("mount has no branch; read-only".into()))
        })
    }

    /// `lookup(parent_ino, name) -> option<ino>` (§6).
    pub fn lookup(&self, parent: Ino, name: &str) -> Result<Option<Ino>> {
        self.active_branch()?;
        self.fs.resolver().resolve_dirent(self.branch_id, parent, name)
    }

    /// `getattr(ino) -> {mode, size, mtime}` (§6).
    pub fn getattr(&self, ino: Ino) -> Result<Stat> {
        self.active_branch()?;
        self.fs.resolver().require_inode(self.branch_id, ino)
    }

    /// `setattr(ino, mask, values)` (§6). Only the fields named by `mask`
    /// are interpreted by readers; the others are carried but ignored.
    pub fn setattr(&self, ino: Ino, mask: AttrMask, mode: u32, uid: u32, gid: u32, size: u64) -> Result<()> {
        let branch = self.writable_branch()?;
        self.fs.resolver().require_inode(self.branch_id, ino)?;
        let record = Record::new(
            RecordType::SetAttr,
            ino,
            current_timestamp(),
            RecordBody::SetAttr { mask, mode, uid, gid, size },
        );
        append_record(&branch, &record)?;
        Ok(())
    }

    /// `create(parent, name, mode) -> ino` (§6).
    pub fn create(&self, parent: Ino, name: &str, mode: u32) -> Result<Ino> {
        let branch = self.writable_branch()?;
        let resolver = self.fs.resolver();
        if resolver.resolve_dirent(self.branch_id, parent, name)?.is_some() {
            return Err(Error::Resolve(ResolveError::AlreadyExists));
        }
        let ino = self.fs.alloc.next_inode_id()?;
        let record = Record::new(
            RecordType::Create,
            ino,
            current_timestamp(),
            RecordBody::Create { parent_ino: parent, mode, name: name.to_string() },
        );
        append_record(&branch, &record)?;
        Ok(ino)
    }

    /// `mkdir(parent, name, mode) -> ino` (§6).
    pub fn mkdir(&self, parent: Ino, name: &str, mode: u32) -> Result<Ino> {
        let branch = self.writable_branch()?;
        let resolver = self.fs.resolver();
        if resolver.resolve_dirent(self.branch_id, parent, name)?.is_some() {
            return Err(Error::Resolve(ResolveError::AlreadyExists));
        }
        let ino = self.fs.alloc.next_inode_id()?;
        let record = Record::new(
            RecordType::Mkdir,
            ino,
            current_timestamp(),
            RecordBody::Create { parent_ino: parent, mode, name: name.to_string() },
        );
        append_record(&branch, &record)?;
        Ok(ino)
    }

    /// `unlink(parent, name)` (§6): removes a directory entry naming a
    /// regular file.
    pub fn unlink(&self, parent: Ino, name: &str) -> Result<()> {
        let branch = self.writable_branch()?;
        let resolver = self.fs.resolver();
        let ino = resolver
            .resolve_dirent(self.branch_id, parent, name)?
            .ok_or(Error::Resolve(ResolveError::NotFound))?;
        let stat = resolver.require_inode(self.branch_id, ino)?;
        if stat.is_dir() {
            return Err(Error::Resolve(ResolveError::Invalid("is a directory".into())));
        }
        let record = Record::new(
            RecordType::Delete,
            ino,
            current_timestamp(),
            RecordBody::Delete { parent_ino: parent, name: name.to_string() },
        );
        append_record(&branch, &record)?;
        Ok(())
    }

    /// `rmdir(parent, name)` (§6). Directory-empty enforcement is a
    /// SPEC_FULL-resolved Open Question (§9): rmdir fails with `NotEmpty`
    /// unless the directory has no entries besides `.`/`..`.
    pub fn rmdir(&self, parent: Ino, name: &str) -> Result<()> {
        let branch = self.writable_branch()?;
        let resolver = self.fs.resolver();
        let ino = resolver
            .resolve_dirent(self.branch_id, parent, name)?
            .ok_or(Error::Resolve(ResolveError::NotFound))?;
        let stat = resolver.require_inode(self.branch_id, ino)?;
        if !stat.is_dir() {
            return Err(Error::Resolve(ResolveError::Invalid("not a directory".into())));
        }
        let entries = resolver.enumerate(self.branch_id, ino)?;
        if entries.iter().any(|e| e.name != "." && e.name != "..") {
            return Err(Error::Resolve(ResolveError::NotEmpty));
        }
        let record = Record::new(
            RecordType::Delete,
            ino,
            current_timestamp(),
            RecordBody::Delete { parent_ino: parent, name: name.to_string() },
        );
        append_record(&branch, &record)?;
        Ok(())
    }

    /// `rename(old_parent, old_name, new_parent, new_name, flags)` (§6).
    /// `no_replace` is the only flag the core accepts; a target that
    /// already exists fails with `EXIST` when set, or `INVAL` when unset
    /// (rename-overwrite is unsupported, §1 Non-goals / §9 Open Question).
    pub fn rename(&self, old_parent: Ino, old_name: &str, new_parent: Ino, new_name: &str, no_replace: bool) -> Result<()> {
        let branch = self.writable_branch()?;
        let resolver = self.fs.resolver();
        let ino = resolver
            .resolve_dirent(self.branch_id, old_parent, old_name)?
            .ok_or(Error::Resolve(ResolveError::NotFound))?;
        if resolver.resolve_dirent(self.branch_id, new_parent, new_name)?.is_some() {
            return Err(if no_replace {
                Error::Resolve(ResolveError::AlreadyExists)
            } else {
                Error::Resolve(ResolveError::Invalid("rename overwrite is not supported".into()))
            });
        }
        let record = Record::new(
            RecordType::Rename,
            ino,
            current_timestamp(),
            RecordBody::Rename {
                old_parent,
                new_parent,
                old_name: old_name.to_string(),
                new_name: new_name.to_string(),
                no_replace,
            },
        );
        append_record(&branch, &record)?;
        Ok(())
    }

    /// `read(ino, pos, len) -> bytes` (§6).
    pub fn read(&self, ino: Ino, pos: u64, len: u64) -> Result<(Vec<u8>, u64)> {
        self.active_branch()?;
        let resolver = self.fs.resolver();
        resolver.require_inode(self.branch_id, ino)?;
        resolver.resolve_data(self.branch_id, ino, pos, len)
    }

    /// `write(ino, pos, bytes) -> n` (§6). Returns bytes accepted.
    pub fn write(&self, ino: Ino, pos: u64, data: &[u8]) -> Result<u64> {
        let branch = self.writable_branch()?;
        self.fs.resolver().require_inode(self.branch_id, ino)?;
        let record = Record::new(
            RecordType::Write,
            ino,
            current_timestamp(),
            RecordBody::Write { offset: pos, data: data.to_vec() },
        );
        append_record(&branch, &record)?;
        Ok(data.len() as u64)
    }

    /// `truncate(ino, size)` (§6).
    pub fn truncate(&self, ino: Ino, size: u64) -> Result<()> {
        let branch = self.writable_branch()?;
        self.fs.resolver().require_inode(self.branch_id, ino)?;
        let record = Record::new(RecordType::Truncate, ino, current_timestamp(), RecordBody::Truncate { new_size: size });
        append_record(&branch, &record)?;
        Ok(())
    }

    /// `iterate(dir_ino, cursor) -> entries` (§6). This core hands back
    /// the whole resolved listing per call (position-stable only within
    /// that call, per §4.3); the VFS collaborator owns any cursor paging.
    pub fn iterate(&self, dir_ino: Ino) -> Result<Vec<DirEntry>> {
        self.active_branch()?;
        self.fs.resolver().enumerate(self.branch_id, dir_ino)
    }

    /// Release this mount, dropping its refcount on the bound branch.
    pub fn unmount(self) -> Result<()> {
        match self.mount_id {
            Some(mount_id) => self.fs.branches.unmount(mount_id),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ImageConfig;
    use crate::layout::base_image::BaseImageBuilder;
    use tempfile::tempdir;

    fn test_config(dir: &tempfile::TempDir) -> Config {
        let mut cfg = Config::default();
        cfg.image = ImageConfig {
            path: dir.path().join("img.daxfs"),
            total_size: 4 << 20,
            branch_table_entries: 16,
            base_image_path: None,
        };
        cfg.branch.default_delta_log_capacity = 64 * 1024;
        cfg
    }

    #[test]
    fn base_read_only_scenario() {
        let dir = tempdir().unwrap();
        let cfg = test_config(&dir);
        let mut builder = BaseImageBuilder::new();
        builder.add_file(crate::ids::BASE_ROOT_INO, "hello.txt", 0o100644, b"Hello from base image");
        let (_header, bytes) = builder.build(1_700_000_000);

        let fs = Filesystem::format(&cfg, Some(bytes)).unwrap();
        let mount = fs.mount(0).unwrap();

        let ino = mount.lookup(crate::ids::BASE_ROOT_INO, "hello.txt").unwrap().unwrap();
        let (data, avail) = mount.read(ino, 0, 64).unwrap();
        assert_eq!(avail, 21);
        assert_eq!(data, b"Hello from base image");

        let err = mount.create(crate::ids::BASE_ROOT_INO, "new.txt", 0o100644).unwrap_err();
        assert!(matches!(err, Error::Resolve(ResolveError::Invalid(_))));
    }

    #[test]
    fn branch_write_isolates_siblings() {
        let dir = tempdir().unwrap();
        let cfg = test_config(&dir);
        let fs = Filesystem::format(&cfg, None).unwrap();
        let main = fs.branch_by_name("main").unwrap();
        let b1 = fs.create_branch("b1", main).unwrap();
        let b2 = fs.create_branch("b2", main).unwrap();

        let mount1 = fs.mount(b1).unwrap();
        let ino = mount1.create(crate::ids::BASE_ROOT_INO, "a.txt", 0o100644).unwrap();
        mount1.write(ino, 0, b"X").unwrap();

        let mount2 = fs.mount(b2).unwrap();
        assert!(mount2.lookup(crate::ids::BASE_ROOT_INO, "a.txt").unwrap().is_none());
    }

    #[test]
    fn overwrite_inside_branch_latest_wins() {
        let dir = tempdir().unwrap();
        let cfg = test_config(&dir);
        let fs = Filesystem::format(&cfg, None).unwrap();
        let main = fs.branch_by_name("main").unwrap();
        let branch = fs.create_branch("feature", main).unwrap();
        let mount = fs.mount(branch).unwrap();

        let ino = mount.create(crate::ids::BASE_ROOT_INO, "a.txt", 0o100644).unwrap();
        mount.write(ino, 0, b"AAAA").unwrap();
        mount.write(ino, 2, b"BB").unwrap();

        let (data, avail) = mount.read(ino, 0, 4).unwrap();
        assert_eq!(avail, 4);
        assert_eq!(data, b"AABB");
    }

    #[test]
    fn rename_then_lookup_old_name_is_noent() {
        let dir = tempdir().unwrap();
        let cfg = test_config(&dir);
        let fs = Filesystem::format(&cfg, None).unwrap();
        let main = fs.branch_by_name("main").unwrap();
        let branch = fs.create_branch("feature", main).unwrap();
        let mount = fs.mount(branch).unwrap();

        let ino = mount.create(crate::ids::BASE_ROOT_INO, "foo", 0o100644).unwrap();
        mount.rename(crate::ids::BASE_ROOT_INO, "foo", crate::ids::BASE_ROOT_INO, "bar", true).unwrap();

        assert!(mount.lookup(crate::ids::BASE_ROOT_INO, "foo").unwrap().is_none());
        assert_eq!(mount.lookup(crate::ids::BASE_ROOT_INO, "bar").unwrap(), Some(ino));
    }

    #[test]
    fn rename_onto_existing_without_noreplace_is_invalid() {
        let dir = tempdir().unwrap();
        let cfg = test_config(&dir);
        let fs = Filesystem::format(&cfg, None).unwrap();
        let main = fs.branch_by_name("main").unwrap();
        let branch = fs.create_branch("feature", main).unwrap();
        let mount = fs.mount(branch).unwrap();

        mount.create(crate::ids::BASE_ROOT_INO, "foo", 0o100644).unwrap();
        mount.create(crate::ids::BASE_ROOT_INO, "bar", 0o100644).unwrap();

        let err = mount.rename(crate::ids::BASE_ROOT_INO, "foo", crate::ids::BASE_ROOT_INO, "bar", false).unwrap_err();
        assert!(matches!(err, Error::Resolve(ResolveError::Invalid(_))));

        let err = mount.rename(crate::ids::BASE_ROOT_INO, "foo", crate::ids::BASE_ROOT_INO, "bar", true).unwrap_err();
        assert!(matches!(err, Error::Resolve(ResolveError::AlreadyExists)));
    }

    #[test]
    fn rmdir_enforces_emptiness() {
        let dir = tempdir().unwrap();
        let cfg = test_config(&dir);
        let fs = Filesystem::format(&cfg, None).unwrap();
        let main = fs.branch_by_name("main").unwrap();
        let branch = fs.create_branch("feature", main).unwrap();
        let mount = fs.mount(branch).unwrap();

        let dir_ino = mount.mkdir(crate::ids::BASE_ROOT_INO, "subdir", 0o040755).unwrap();
        mount.create(dir_ino, "child.txt", 0o100644).unwrap();

        let err = mount.rmdir(crate::ids::BASE_ROOT_INO, "subdir").unwrap_err();
        assert!(matches!(err, Error::Resolve(ResolveError::NotEmpty)));

        mount.unlink(dir_ino, "child.txt").unwrap();
        mount.rmdir(crate::ids::BASE_ROOT_INO, "subdir").unwrap();
    }

    #[test]
    fn commit_merges_and_invalidates_siblings() {
        let dir = tempdir().unwrap();
        let cfg = test_config(&dir);
        let fs = Filesystem::format(&cfg, None).unwrap();
        let main = fs.branch_by_name("main").unwrap();
        let b1 = fs.create_branch("b1", main).unwrap();
        let b2 = fs.create_branch("b2", main).unwrap();

        let mount1 = fs.mount(b1).unwrap();
        let mount2 = fs.mount(b2).unwrap();
        mount1.create(crate::ids::BASE_ROOT_INO, "x", 0o100644).unwrap();
        fs.commit(b1).unwrap();

        let main_mount = fs.mount(main).unwrap();
        assert!(main_mount.lookup(crate::ids::BASE_ROOT_INO, "x").unwrap().is_some());

        let err = mount2.lookup(crate::ids::BASE_ROOT_INO, "x").unwrap_err();
        assert!(err.is_stale());
    }
}
