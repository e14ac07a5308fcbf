//! Buffered write demo
//!
//! Writes a small table of particle hits, adds a column halfway through, and reads the result
//! back from the memory sink. Page and cluster sizes come from `WriteOptions`; set
//! `COLSINK_UNBUFFERED=1` to write straight to the memory sink instead of through a
//! `BufferedPageSink` with a sealing pool.
//!
//! ```bash
//! RUST_LOG=colsink_storage=debug cargo run -p colsink-storage --example buffered_write
//! ```

use std::error::Error;
use std::sync::Arc;

use colsink_core::{ColumnHandle, ElementKind, Field, Locator, Model, ModelChangeset, ProjectedField};
use colsink_storage::{
    BufferedPageSink, MemoryPageSink, PageSink, ThreadPoolScheduler, WriteOptions,
};
use tracing_subscriber::EnvFilter;

const N_PAGE_ROWS: usize = 32;
const ELEMENT_SIZE: usize = 8;

fn write_f64_page(
    sink: &mut impl PageSink,
    handle: &ColumnHandle,
    n_elements: usize,
    values: impl Iterator<Item = f64>,
) -> colsink_storage::Result<()> {
    let mut page = sink.reserve_page(handle, n_elements)?;
    for value in values.take(n_elements) {
        page.grow(1)?.copy_from_slice(&value.to_ne_bytes());
    }
    sink.commit_page(handle, &page)?;
    sink.release_page(page);
    Ok(())
}

/// Write the whole session; returns the locator of the page list
fn write_table(
    sink: &mut impl PageSink,
    options: &WriteOptions,
) -> Result<Locator, Box<dyn Error>> {
    let model = Model::new()
        .with_field(Field::leaf("energy", "double", ElementKind::Real64))?
        .with_field(Field::leaf("px", "double", ElementKind::Real64))?;
    sink.create(&model)?;
    println!("✓ Created session with 2 columns");

    let n_elements = options.page_capacity(ELEMENT_SIZE);
    let mut handles = vec![sink.column_handle(0)?, sink.column_handle(1)?];
    let mut cluster_bytes = 0usize;
    let mut cluster_entries = 0u64;
    let mut n_clusters = 0usize;

    for row in 0..N_PAGE_ROWS {
        if row == N_PAGE_ROWS / 2 {
            let changeset = ModelChangeset::new()
                .with_field(Field::leaf("pz", "double", ElementKind::Real64))
                .with_projected_field(ProjectedField::new(
                    Field::leaf("e", "double", ElementKind::Real64),
                    [("e", "energy")],
                ));
            sink.update_schema(&changeset)?;
            handles.push(sink.column_handle(2)?);
            println!("✓ Added column 'pz' and alias 'e' at page row {}", row);
        }

        let base = row as f64;
        write_f64_page(sink, &handles[0], n_elements, (0..).map(|i| base + (i / 64) as f64))?;
        write_f64_page(sink, &handles[1], n_elements, (0..).map(|i| ((i % 32) as f64) * 0.5))?;
        if let Some(pz) = handles.get(2) {
            write_f64_page(sink, pz, n_elements, std::iter::repeat(base))?;
        }
        cluster_bytes += handles.len() * n_elements * ELEMENT_SIZE;
        cluster_entries += n_elements as u64;

        // Without sealing feedback the raw size is the storage estimate
        if options.is_cluster_full(cluster_bytes, cluster_bytes) || row + 1 == N_PAGE_ROWS {
            let written = sink.commit_cluster(cluster_entries)?;
            println!(
                "  cluster {}: {} entries, {} bytes",
                n_clusters, cluster_entries, written
            );
            n_clusters += 1;
            cluster_bytes = 0;
            cluster_entries = 0;
        }
    }

    let page_list = sink.commit_cluster_group()?;
    sink.commit_dataset()?;
    Ok(page_list)
}

fn report(
    memory: &MemoryPageSink,
    page_list: Locator,
    n_elements: usize,
) -> Result<(), Box<dyn Error>> {
    let n_pages: usize = memory.clusters().iter().map(|c| c.pages.len()).sum();
    let raw_bytes = n_pages * n_elements * ELEMENT_SIZE;
    println!(
        "  {} pages, {} bytes stored for {} raw bytes ({:.1}%)",
        n_pages,
        memory.storage().len(),
        raw_bytes,
        100.0 * memory.storage().len() as f64 / raw_bytes as f64
    );

    // Read back
    let clusters = memory.decode_page_list(page_list)?;
    let first = &clusters[0].pages[0];
    let page = memory.read_page(first)?;
    let value = f64::from_ne_bytes(page.buffer()[..ELEMENT_SIZE].try_into()?);
    println!(
        "✓ Page list lists {} clusters; first energy value {}",
        clusters.len(),
        value
    );
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    println!("colsink buffered write demo");
    println!();

    let options = WriteOptions {
        approx_unzipped_page_size: 32 * 1024,
        approx_zipped_cluster_size: 1024 * 1024,
        max_unzipped_cluster_size: 4 * 1024 * 1024,
        use_buffered_write: std::env::var_os("COLSINK_UNBUFFERED").is_none(),
        ..Default::default()
    };
    options.validate()?;
    let n_elements = options.page_capacity(ELEMENT_SIZE);
    let inner = MemoryPageSink::new(options.clone())?;

    let start = std::time::Instant::now();
    if options.use_buffered_write {
        let scheduler = Arc::new(ThreadPoolScheduler::from_options(&options)?);
        println!("✓ Buffered writes, sealing pool with {} threads", scheduler.num_threads());

        let mut sink = BufferedPageSink::with_scheduler(inner, scheduler)?;
        let page_list = write_table(&mut sink, &options)?;
        println!();
        println!("✓ Wrote table in {:?}", start.elapsed());
        println!(
            "  batched commits: {}, per-page commits: {}",
            sink.metrics().batch_commits.get(),
            sink.metrics().per_page_commits.get()
        );
        report(sink.inner(), page_list, n_elements)?;
    } else {
        println!("✓ Unbuffered writes");

        let mut sink = inner;
        let page_list = write_table(&mut sink, &options)?;
        println!();
        println!("✓ Wrote table in {:?}", start.elapsed());
        report(&sink, page_list, n_elements)?;
    }

    Ok(())
}
