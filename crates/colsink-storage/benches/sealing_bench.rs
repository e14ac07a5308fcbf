//! Write Path Benchmarks
//!
//! Measures how fast pages get from a writer into an inner sink, with and without parallel
//! sealing.
//!
//! ## What We Benchmark
//!
//! ### 1. Page Sealing (`bench_seal_page`)
//! - Seals a single page of the default size (64KB)
//! - Compares no compression vs LZ4
//!
//! ### 2. Cluster Commit (`bench_cluster_commit`)
//! - Writes one cluster of 8 columns x 16 pages and commits it
//! - Compares the unbuffered inner sink, buffering without a scheduler (per-page commit), and
//!   buffering with inline and thread pool schedulers (batched commit)
//!
//! ## Running Benchmarks
//!
//! ```bash
//! # Run all benchmarks
//! cargo bench -p colsink-storage
//!
//! # Run one group
//! cargo bench -p colsink-storage --bench sealing_bench cluster_commit
//! ```

use std::sync::Arc;

use bytes::BytesMut;
use colsink_core::{seal_page, ColumnElement, Compression, ElementKind, Field, Model, Page};
use colsink_storage::{
    BufferedPageSink, InlineScheduler, MemoryPageSink, PageSink, TaskScheduler,
    ThreadPoolScheduler, WriteOptions,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const N_COLUMNS: usize = 8;
const PAGES_PER_COLUMN: usize = 16;

fn compression_name(compression: Compression) -> &'static str {
    match compression {
        Compression::None => "none",
        Compression::Lz4 => "lz4",
        Compression::Zstd => "zstd",
    }
}

fn elements_per_page() -> usize {
    WriteOptions::default().page_capacity(8)
}

/// One default-sized page of slowly varying doubles; compresses like typical physics data
fn sample_page(column_id: u64) -> Page {
    let bytes: Vec<u8> = (0..elements_per_page())
        .flat_map(|i| ((i / 16) as f64 * 0.25 + column_id as f64).to_ne_bytes())
        .collect();
    Page::from_bytes(column_id, 8, &bytes).unwrap()
}

fn model() -> Model {
    let mut model = Model::new();
    for i in 0..N_COLUMNS {
        model
            .add_field(Field::leaf(format!("c{}", i), "double", ElementKind::Real64))
            .unwrap();
    }
    model
}

fn write_cluster(sink: &mut impl PageSink, pages: &[Page]) -> u64 {
    for _ in 0..PAGES_PER_COLUMN {
        for page in pages {
            let handle = sink.column_handle(page.column_id()).unwrap();
            sink.commit_page(&handle, page).unwrap();
        }
    }
    sink.commit_cluster((PAGES_PER_COLUMN * elements_per_page()) as u64)
        .unwrap()
}

fn bench_seal_page(c: &mut Criterion) {
    let mut group = c.benchmark_group("seal_page");
    let page = sample_page(0);
    let element = ColumnElement::new(ElementKind::Real64);

    for compression in [Compression::None, Compression::Lz4] {
        group.throughput(Throughput::Bytes(page.n_bytes() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(compression_name(compression)),
            &compression,
            |b, &compression| {
                b.iter(|| {
                    let scratch = BytesMut::with_capacity(page.n_bytes());
                    black_box(seal_page(&page, &element, compression, scratch).unwrap());
                });
            },
        );
    }

    group.finish();
}

fn bench_cluster_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("cluster_commit");
    group.sample_size(20);

    let pages: Vec<Page> = (0..N_COLUMNS as u64).map(sample_page).collect();
    let cluster_bytes = (N_COLUMNS * PAGES_PER_COLUMN * elements_per_page() * 8) as u64;
    let options = WriteOptions {
        compression: Compression::Lz4,
        ..Default::default()
    };
    group.throughput(Throughput::Bytes(cluster_bytes));

    group.bench_function("unbuffered", |b| {
        b.iter(|| {
            let mut sink = MemoryPageSink::new(options.clone()).unwrap();
            sink.create(&model()).unwrap();
            black_box(write_cluster(&mut sink, &pages));
        });
    });

    group.bench_function("buffered_per_page", |b| {
        b.iter(|| {
            let mut sink = BufferedPageSink::new(MemoryPageSink::new(options.clone()).unwrap())
                .unwrap();
            sink.create(&model()).unwrap();
            black_box(write_cluster(&mut sink, &pages));
        });
    });

    let inline: Arc<dyn TaskScheduler> = Arc::new(InlineScheduler::new());
    let pool_4: Arc<dyn TaskScheduler> = Arc::new(ThreadPoolScheduler::new(Some(4)).unwrap());
    let pool_default: Arc<dyn TaskScheduler> = Arc::new(ThreadPoolScheduler::new(None).unwrap());
    let schedulers = [
        ("buffered_inline", inline),
        ("buffered_pool_4", pool_4),
        ("buffered_pool_default", pool_default),
    ];
    for (name, scheduler) in schedulers {
        group.bench_function(name, |b| {
            b.iter(|| {
                let inner = MemoryPageSink::new(options.clone()).unwrap();
                let mut sink = BufferedPageSink::with_scheduler(inner, scheduler.clone()).unwrap();
                sink.create(&model()).unwrap();
                black_box(write_cluster(&mut sink, &pages));
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_seal_page, bench_cluster_commit);
criterion_main!(benches);
