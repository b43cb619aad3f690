//! Cost of forking, committing, and aborting branches against a shared
//! root, the operations spec §4.5 calls out as needing to stay cheap
//! regardless of how much a branch has written.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use daxfs_core::branch::BranchManager;
use daxfs_core::core::config::ImageConfig;
use daxfs_core::layout::format;
use daxfs_core::storage::allocator::DeltaAllocator;
use daxfs_core::storage::window::StorageWindow;
use std::sync::Arc;
use tempfile::tempdir;

fn fresh_manager(capacity: u32) -> (tempfile::TempDir, BranchManager) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("img.daxfs");
    let cfg = ImageConfig {
        path: path.clone(),
        total_size: 256 << 20,
        branch_table_entries: capacity,
        base_image_path: None,
    };
    let layout = format::plan(&cfg, 0, 0);
    let window = Arc::new(StorageWindow::open(&path, cfg.total_size).unwrap());
    format::write_fresh(&window, &layout).unwrap();
    let branch_table_offset = layout.superblock.branch_table_offset;
    let alloc = Arc::new(DeltaAllocator::new(window.clone(), layout.superblock));
    let mgr = BranchManager::open(window, alloc, branch_table_offset, capacity, 1 << 20).unwrap();
    (dir, mgr)
}

fn bench_fork(c: &mut Criterion) {
    c.bench_function("branch_fork", |b| {
        b.iter_batched(
            || {
                let (dir, mgr) = fresh_manager(1024);
                let main = mgr.init_root("main").unwrap();
                (dir, mgr, main)
            },
            |(_dir, mgr, main)| black_box(mgr.fork("child", main).unwrap()),
            criterion::BatchSize::SmallInput,
        );
    });
}

fn bench_commit(c: &mut Criterion) {
    c.bench_function("branch_commit", |b| {
        b.iter_batched(
            || {
                let (dir, mgr) = fresh_manager(1024);
                let main = mgr.init_root("main").unwrap();
                let child = mgr.fork("child", main).unwrap();
                (dir, mgr, child)
            },
            |(_dir, mgr, child)| mgr.commit(child).unwrap(),
            criterion::BatchSize::SmallInput,
        );
    });
}

fn bench_abort(c: &mut Criterion) {
    c.bench_function("branch_abort", |b| {
        b.iter_batched(
            || {
                let (dir, mgr) = fresh_manager(1024);
                let main = mgr.init_root("main").unwrap();
                let child = mgr.fork("child", main).unwrap();
                (dir, mgr, child)
            },
            |(_dir, mgr, child)| mgr.abort(child).unwrap(),
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_fork, bench_commit, bench_abort);
criterion_main!(benches);
