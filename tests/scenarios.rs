//! End-to-end scenarios against the public crate surface, one per
//! numbered scenario this filesystem's testable properties call out.

use daxfs_core::core::config::{BranchConfig, Config, ImageConfig};
use daxfs_core::layout::base_image::BaseImageBuilder;
use daxfs_core::vfs::Filesystem;
use daxfs_core::{Error, ResolveError};
use tempfile::tempdir;

fn config(dir: &tempfile::TempDir) -> Config {
    Config {
        image: ImageConfig {
            path: dir.path().join("img.daxfs"),
            total_size: 8 << 20,
            branch_table_entries: 32,
            base_image_path: None,
        },
        branch: BranchConfig { default_delta_log_capacity: 256 * 1024 },
        ..Config::default()
    }
}

#[test]
fn scenario_1_base_read_only() {
    let dir = tempdir().unwrap();
    let cfg = config(&dir);
    let mut builder = BaseImageBuilder::new();
    builder.add_file(daxfs_core::ids::BASE_ROOT_INO, "hello.txt", 0o100644, b"Hello from base image");
    let (_header, base_bytes) = builder.build(1_700_000_000);

    let fs = Filesystem::format(&cfg, Some(base_bytes)).unwrap();
    let mount = fs.mount(0).unwrap();

    let ino = mount.lookup(daxfs_core::ids::BASE_ROOT_INO, "hello.txt").unwrap().unwrap();
    let (data, avail) = mount.read(ino, 0, 64).unwrap();
    assert_eq!(avail, 21);
    assert_eq!(&data[..avail as usize], b"Hello from base image");

    let err = mount.create(daxfs_core::ids::BASE_ROOT_INO, "new.txt", 0o100644).unwrap_err();
    assert!(matches!(err, Error::Resolve(ResolveError::Invalid(_))));
}

#[test]
fn scenario_2_branch_write_isolates_siblings() {
    let dir = tempdir().unwrap();
    let cfg = config(&dir);
    let fs = Filesystem::format(&cfg, None).unwrap();
    let main = fs.branch_by_name("main").unwrap();
    let b1 = fs.create_branch("b1", main).unwrap();
    let b2 = fs.create_branch("b2", main).unwrap();

    let mount1 = fs.mount(b1).unwrap();
    let ino = mount1.create(daxfs_core::ids::BASE_ROOT_INO, "a.txt", 0o100644).unwrap();
    mount1.write(ino, 0, b"X").unwrap();

    let mount2 = fs.mount(b2).unwrap();
    assert!(mount2.lookup(daxfs_core::ids::BASE_ROOT_INO, "a.txt").unwrap().is_none());
}

#[test]
fn scenario_3_delete_shadows_base() {
    let dir = tempdir().unwrap();
    let cfg = config(&dir);
    let mut builder = BaseImageBuilder::new();
    let subdir = builder.add_dir(daxfs_core::ids::BASE_ROOT_INO, "subdir");
    builder.add_file(subdir, "nested.txt", 0o100644, b"nested contents");
    let (_header, base_bytes) = builder.build(1_700_000_000);

    let fs = Filesystem::format(&cfg, Some(base_bytes)).unwrap();
    let main = fs.branch_by_name("main").unwrap();
    let branch = fs.create_branch("feature", main).unwrap();

    let branch_mount = fs.mount(branch).unwrap();
    branch_mount.unlink(subdir, "nested.txt").unwrap();
    assert!(branch_mount.lookup(subdir, "nested.txt").unwrap().is_none());

    let main_mount = fs.mount(main).unwrap();
    assert!(main_mount.lookup(subdir, "nested.txt").unwrap().is_some());
}

#[test]
fn scenario_4_rename() {
    let dir = tempdir().unwrap();
    let cfg = config(&dir);
    let fs = Filesystem::format(&cfg, None).unwrap();
    let main = fs.branch_by_name("main").unwrap();
    let branch = fs.create_branch("feature", main).unwrap();
    let mount = fs.mount(branch).unwrap();

    let ino = mount.create(daxfs_core::ids::BASE_ROOT_INO, "foo", 0o100644).unwrap();
    mount.rename(daxfs_core::ids::BASE_ROOT_INO, "foo", daxfs_core::ids::BASE_ROOT_INO, "bar", true).unwrap();

    assert!(mount.lookup(daxfs_core::ids::BASE_ROOT_INO, "foo").unwrap().is_none());
    assert_eq!(mount.lookup(daxfs_core::ids::BASE_ROOT_INO, "bar").unwrap(), Some(ino));
}

#[test]
fn scenario_5_overlapping_writes_latest_wins() {
    let dir = tempdir().unwrap();
    let cfg = config(&dir);
    let fs = Filesystem::format(&cfg, None).unwrap();
    let main = fs.branch_by_name("main").unwrap();
    let branch = fs.create_branch("feature", main).unwrap();
    let mount = fs.mount(branch).unwrap();

    let ino = mount.create(daxfs_core::ids::BASE_ROOT_INO, "a.txt", 0o100644).unwrap();
    mount.write(ino, 0, b"AAAA").unwrap();
    mount.write(ino, 2, b"BB").unwrap();

    let (data, avail) = mount.read(ino, 0, 4).unwrap();
    assert_eq!(avail, 4);
    assert_eq!(&data[..4], b"AABB");
}

#[test]
fn scenario_6_commit_merges_and_invalidates_siblings() {
    let dir = tempdir().unwrap();
    let cfg = config(&dir);
    let fs = Filesystem::format(&cfg, None).unwrap();
    let main = fs.branch_by_name("main").unwrap();
    let b1 = fs.create_branch("b1", main).unwrap();
    let b2 = fs.create_branch("b2", main).unwrap();

    let mount1 = fs.mount(b1).unwrap();
    let mount2 = fs.mount(b2).unwrap();
    mount1.create(daxfs_core::ids::BASE_ROOT_INO, "x", 0o100644).unwrap();
    fs.commit(b1).unwrap();

    let main_mount = fs.mount(main).unwrap();
    assert!(main_mount.lookup(daxfs_core::ids::BASE_ROOT_INO, "x").unwrap().is_some());

    let err = mount2.lookup(daxfs_core::ids::BASE_ROOT_INO, "x").unwrap_err();
    assert!(err.is_stale());
}

#[test]
fn reopen_rebuilds_every_branch_index() {
    let dir = tempdir().unwrap();
    let cfg = config(&dir);
    let ino = {
        let fs = Filesystem::format(&cfg, None).unwrap();
        let main = fs.branch_by_name("main").unwrap();
        let branch = fs.create_branch("feature", main).unwrap();
        let mount = fs.mount(branch).unwrap();
        let ino = mount.create(daxfs_core::ids::BASE_ROOT_INO, "persisted.txt", 0o100644).unwrap();
        mount.write(ino, 0, b"durable").unwrap();
        fs.sync().unwrap();
        ino
    };

    let fs = Filesystem::open(&cfg.image.path, cfg.branch.default_delta_log_capacity).unwrap();
    let branch = fs.branch_by_name("feature").unwrap();
    let mount = fs.mount(branch).unwrap();
    let (data, avail) = mount.read(ino, 0, 16).unwrap();
    assert_eq!(&data[..avail as usize], b"durable");
}
