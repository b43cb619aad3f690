//! Throughput of appending records to a single branch's delta log, and of
//! rebuilding its index from scratch once the log has some depth.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use daxfs_core::core::config::ImageConfig;
use daxfs_core::delta::log::DeltaLog;
use daxfs_core::delta::{Record, RecordBody, RecordType};
use daxfs_core::layout::format;
use daxfs_core::storage::window::StorageWindow;
use std::sync::Arc;
use tempfile::tempdir;

fn fresh_log(capacity: u64) -> (tempfile::TempDir, DeltaLog) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("img.daxfs");
    let cfg = ImageConfig {
        path: path.clone(),
        total_size: capacity + (1 << 20),
        branch_table_entries: 16,
        base_image_path: None,
    };
    let layout = format::plan(&cfg, 0, 0);
    let window = Arc::new(StorageWindow::open(&path, cfg.total_size).unwrap());
    format::write_fresh(&window, &layout).unwrap();
    let base = layout.superblock.delta_region_offset;
    (dir, DeltaLog::open(window, base, capacity, 0))
}

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("delta_append");
    for payload_size in [16usize, 256, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(payload_size), &payload_size, |b, &size| {
            let (_dir, log) = fresh_log(64 << 20);
            let data = vec![0xABu8; size];
            let mut ino = 2u64;
            b.iter(|| {
                let record = Record::new(RecordType::Write, ino, 1, RecordBody::Write { offset: 0, data: data.clone() });
                black_box(log.append(&record).unwrap());
                ino += 1;
            });
        });
    }
    group.finish();
}

fn bench_build_index(c: &mut Criterion) {
    c.bench_function("delta_build_index_10k_records", |b| {
        b.iter_batched(
            || {
                let (dir, log) = fresh_log(64 << 20);
                for i in 0..10_000u64 {
                    let record = Record::new(
                        RecordType::Create,
                        i + 2,
                        1,
                        RecordBody::Create { parent_ino: 1, mode: 0o100644, name: format!("f{i}") },
                    );
                    log.append(&record).unwrap();
                }
                (dir, log)
            },
            |(_dir, log)| black_box(log.build_index().unwrap()),
            criterion::BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, bench_append, bench_build_index);
criterion_main!(benches);
