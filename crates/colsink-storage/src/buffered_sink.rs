//! Buffered Page Sink - Staging Pages Until Cluster Commit
//!
//! `BufferedPageSink` wraps another `PageSink` (the inner sink) and holds every committed page
//! in memory until the cluster it belongs to is committed. Meanwhile, if a task scheduler is
//! attached, each page is sealed (packed, compressed, checksummed) in the background.
//!
//! ## Why Buffer?
//!
//! An application produces pages column by column, interleaved, as its records fill them. The
//! inner sink prefers whole clusters: with every page of a cluster at hand it can write them
//! column-contiguously, and with every page already sealed it can do so in one vectored
//! batch instead of one write per page.
//!
//! ## Write Path
//!
//! ```text
//! commit_page(handle, page)
//!   ├─> copy into a page reserved from the inner sink
//!   ├─> append to the column's queue
//!   └─> (scheduler) submit a sealing task for it
//!
//! commit_cluster(n_entries)
//!   ├─> wait for every sealing task
//!   ├─> all non-empty columns sealed?
//!   │     yes: inner.commit_sealed_page_batch(one group per column)
//!   │     no:  page by page, in order: commit_sealed_page or commit_page
//!   └─> inner.commit_cluster(n_entries)
//! ```
//!
//! ## Guarantees
//!
//! - **Order**: within a column, pages reach the inner sink in the order they were committed
//! - **Barrier**: no page of a cluster is forwarded before every sealing task has finished
//! - **All or nothing**: sealing failures and inconsistent sealing state abort the cluster
//!   commit before anything is forwarded
//! - **No retries**: inner sink errors are returned unchanged
//! - **Fail-stop**: once forwarding a cluster has failed, the sink moves to `SinkState::Failed`
//!   and rejects every further operation; the pages not yet accepted stay buffered
//!
//! ## Schema Evolution
//!
//! The sink keeps a replica of the model it forwarded to the inner sink. Incremental schema
//! updates add the new fields (and projections, with their source mapping) to the replica and
//! forward the same changeset, so both sinks number their columns identically.
//!
//! ## Example
//!
//! ```ignore
//! let inner = MemoryPageSink::new(WriteOptions::default())?;
//! let scheduler = Arc::new(ThreadPoolScheduler::new(Some(4))?);
//! let mut sink = BufferedPageSink::with_scheduler(inner, scheduler)?;
//!
//! sink.create(&model)?;
//! let handle = sink.column_handle(0)?;
//! let mut page = sink.reserve_page(&handle, 1024)?;
//! // ... fill page ...
//! sink.commit_page(&handle, &page)?;
//! sink.release_page(page);
//! sink.commit_cluster(1024)?;
//! sink.commit_dataset()?;
//! ```

use std::sync::Arc;

use colsink_core::{
    seal_page, ColumnHandle, ColumnId, Locator, Model, ModelChangeset, Page, SchemaDescriptor,
    SealedPage,
};

use crate::buffered_column::{BufferedColumn, SealingStatus};
use crate::config::WriteOptions;
use crate::error::{Error, Result};
use crate::metrics::SinkMetrics;
use crate::scheduler::TaskScheduler;
use crate::sink::{PageSink, SealedPageGroup, SinkState};

/// How the buffered pages of a cluster will be forwarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommitPath {
    /// Every non-empty column is sealed: one sealed page batch
    Batched,
    /// Page by page, sealed or not
    PerPage,
}

pub struct BufferedPageSink<S: PageSink> {
    inner: S,
    options: WriteOptions,
    metrics: SinkMetrics,
    state: SinkState,

    scheduler: Option<Arc<dyn TaskScheduler>>,

    /// Local view of the schema; one buffered column per physical column
    descriptor: SchemaDescriptor,
    columns: Vec<BufferedColumn>,

    /// Replica of the model forwarded to the inner sink
    inner_model: Model,
}

impl<S: PageSink> BufferedPageSink<S> {
    /// Buffer pages without sealing them; they reach the inner sink unsealed
    pub fn new(inner: S) -> Result<Self> {
        let mut metrics = SinkMetrics::new("buffered_sink")?;
        metrics.observe(inner.metrics());

        Ok(Self {
            options: inner.write_options().clone(),
            inner,
            metrics,
            state: SinkState::Initialized,
            scheduler: None,
            descriptor: SchemaDescriptor::new(),
            columns: Vec::new(),
            inner_model: Model::new(),
        })
    }

    /// Buffer pages and seal them on `scheduler`
    pub fn with_scheduler(inner: S, scheduler: Arc<dyn TaskScheduler>) -> Result<Self> {
        let mut sink = Self::new(inner)?;
        sink.scheduler = Some(scheduler);
        Ok(sink)
    }

    /// Replace the task scheduler, after waiting for the tasks of the current one
    pub fn set_task_scheduler(&mut self, scheduler: Option<Arc<dyn TaskScheduler>>) -> Result<()> {
        if let Some(current) = &self.scheduler {
            current.wait()?;
        }
        self.scheduler = scheduler;
        Ok(())
    }

    pub fn has_task_scheduler(&self) -> bool {
        self.scheduler.is_some()
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Direct access to the inner sink. Writing through it bypasses the buffer.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// The model as forwarded to the inner sink
    pub fn inner_model(&self) -> &Model {
        &self.inner_model
    }

    pub fn descriptor(&self) -> &SchemaDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    pub fn n_buffered_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn n_buffered_pages(&self) -> usize {
        self.columns.iter().map(BufferedColumn::len).sum()
    }

    /// Uncompressed size of every buffered page
    pub fn buffered_bytes(&self) -> usize {
        self.columns.iter().map(BufferedColumn::buffered_bytes).sum()
    }

    /// Expected storage size of the buffered cluster: the sealed size of pages whose sealing
    /// has finished, the uncompressed size of the rest
    pub fn estimated_zipped_bytes(&self) -> usize {
        self.columns
            .iter()
            .flat_map(|column| column.iter())
            .map(|item| item.sealed_page().map_or(item.page().n_bytes(), SealedPage::size))
            .sum()
    }

    /// Whether the buffered cluster reached the configured cluster size
    pub fn is_cluster_full(&self) -> bool {
        self.options
            .is_cluster_full(self.buffered_bytes(), self.estimated_zipped_bytes())
    }

    pub fn buffered_column(&self, column_id: ColumnId) -> Option<&BufferedColumn> {
        self.columns.get(column_id as usize)
    }

    /// Add a buffered column for every physical column the descriptor gained
    fn sync_columns(&mut self) {
        let known = self.columns.len();
        self.columns.extend(
            self.descriptor.columns()[known..]
                .iter()
                .map(|c| BufferedColumn::new(c.handle())),
        );
    }

    fn column_index(&self, column_id: ColumnId) -> Result<usize> {
        let index = column_id as usize;
        if index >= self.columns.len() {
            return Err(Error::ColumnNotFound(column_id));
        }
        Ok(index)
    }

    /// Decide how the buffered pages can be forwarded. Only valid after the barrier.
    fn choose_commit_path(&self) -> Result<CommitPath> {
        let mut sealed = Vec::new();
        let mut unsealed = Vec::new();
        for column in &self.columns {
            match column.sealing_status()? {
                SealingStatus::Empty => {}
                SealingStatus::AllSealed => sealed.push(column.column_id()),
                SealingStatus::Unsealed => unsealed.push(column.column_id()),
            }
        }

        match (sealed.is_empty(), unsealed.is_empty()) {
            (false, true) => Ok(CommitPath::Batched),
            (true, _) => Ok(CommitPath::PerPage),
            (false, false) => Err(Error::InvariantViolation(format!(
                "only a few columns have all pages sealed: sealed {:?}, unsealed {:?}",
                sealed, unsealed
            ))),
        }
    }

    fn commit_batched(&mut self) -> Result<()> {
        let groups: Vec<SealedPageGroup> = self
            .columns
            .iter()
            .filter(|c| !c.is_empty())
            .map(|c| SealedPageGroup::new(c.column_id(), c.sealed_pages()))
            .collect();
        self.inner.commit_sealed_page_batch(&groups)?;

        for column in &mut self.columns {
            for item in column.drain_buffered_pages().items {
                self.inner.release_page(item.into_page()?);
            }
        }

        self.metrics.batch_commits.inc();
        tracing::debug!(
            columns = groups.len(),
            pages = groups.iter().map(SealedPageGroup::len).sum::<usize>(),
            "Committed sealed page batch"
        );
        Ok(())
    }

    fn commit_per_page(&mut self) -> Result<()> {
        let mut n_sealed = 0usize;
        let mut n_raw = 0usize;

        for column in &mut self.columns {
            let handle = *column.handle();
            for item in column.iter() {
                match item.sealed_page() {
                    Some(sealed) => {
                        self.inner.commit_sealed_page(handle.physical_id, sealed)?;
                        n_sealed += 1;
                    }
                    None => {
                        self.inner.commit_page(&handle, item.page())?;
                        n_raw += 1;
                    }
                }
            }
            // Drained only once every page of the column was accepted
            for item in column.drain_buffered_pages().items {
                self.inner.release_page(item.into_page()?);
            }
        }

        self.metrics.per_page_commits.inc();
        tracing::debug!(n_sealed, n_raw, "Committed pages one by one");
        Ok(())
    }
}

impl<S: PageSink> PageSink for BufferedPageSink<S> {
    fn create(&mut self, model: &Model) -> Result<()> {
        self.state.ensure(SinkState::Initialized, "create")?;

        self.descriptor.apply(&ModelChangeset::from_model(model))?;
        self.sync_columns();

        self.inner_model = model.clone();
        self.inner_model.freeze();
        self.inner.create(&self.inner_model)?;
        self.state = SinkState::Open;

        tracing::info!(
            columns = self.columns.len(),
            parallel = self.scheduler.is_some(),
            "Buffered sink created"
        );
        Ok(())
    }

    fn update_schema(&mut self, changeset: &ModelChangeset) -> Result<()> {
        self.state.ensure(SinkState::Open, "update_schema")?;

        // Stage both views; nothing changes unless the inner sink accepts the update too
        let mut descriptor = self.descriptor.clone();
        let added = descriptor.apply(changeset)?;

        // Replicate the new fields, projections keep their source mapping
        let mut replicated = ModelChangeset::new();
        for field in &changeset.added_fields {
            replicated = replicated.with_field(field.clone());
        }
        for projected in &changeset.added_projected_fields {
            replicated = replicated.with_projected_field(projected.clone());
        }

        let mut replica = self.inner_model.clone();
        replica.unfreeze();
        replica.apply(&replicated)?;
        replica.freeze();

        self.inner.update_schema(&replicated)?;

        self.descriptor = descriptor;
        self.inner_model = replica;
        self.sync_columns();

        tracing::debug!(
            added_columns = added.len(),
            added_fields = replicated.added_fields.len(),
            added_projections = replicated.added_projected_fields.len(),
            "Buffered sink schema updated"
        );
        Ok(())
    }

    fn column_handle(&self, column_id: ColumnId) -> Result<ColumnHandle> {
        self.descriptor
            .handle(column_id)
            .ok_or(Error::ColumnNotFound(column_id))
    }

    fn reserve_page(&mut self, handle: &ColumnHandle, n_elements: usize) -> Result<Page> {
        self.state.ensure(SinkState::Open, "reserve_page")?;
        self.inner.reserve_page(handle, n_elements)
    }

    fn release_page(&mut self, page: Page) {
        self.inner.release_page(page);
    }

    fn commit_page(&mut self, handle: &ColumnHandle, page: &Page) -> Result<Locator> {
        self.state.ensure(SinkState::Open, "commit_page")?;
        let index = self.column_index(handle.physical_id)?;
        // The column's own handle decides the packing, not the caller's copy
        let handle = *self.columns[index].handle();

        let mut buffered = self.inner.reserve_page(&handle, page.n_elements())?;
        if let Err(e) = buffered.copy_from(page) {
            self.inner.release_page(buffered);
            return Err(e.into());
        }
        let item = self.columns[index].buffer_page(buffered);
        self.metrics.pages_buffered.inc();

        let Some(scheduler) = &self.scheduler else {
            return Ok(Locator::placeholder());
        };

        // The task owns the page handle, the scratch buffer and the slot
        item.allocate_sealed_page_buf(page.n_bytes());
        let scratch = item.take_sealed_page_buf().unwrap_or_default();
        let shared = item.shared_page();
        let slot = self.columns[index].register_sealed_page()?;

        let element = handle.element;
        let compression = self.options.compression;
        let pages_sealed = self.metrics.pages_sealed.clone();
        let sealed_bytes = self.metrics.sealed_bytes.clone();
        self.metrics.parallel_zip.set(1);

        scheduler.add_task(Box::new(move || {
            let result = match seal_page(&shared, &element, compression, scratch) {
                Ok(sealed) => {
                    pages_sealed.inc();
                    sealed_bytes.inc_by(sealed.size() as u64);
                    Ok(sealed)
                }
                Err(e) => Err(e.to_string()),
            };
            drop(shared);
            slot.fill(result);
        }));

        tracing::trace!(column_id = handle.physical_id, "Sealing task submitted");
        Ok(Locator::placeholder())
    }

    fn commit_sealed_page(&mut self, column_id: ColumnId, sealed: &SealedPage) -> Result<Locator> {
        self.state.ensure(SinkState::Open, "commit_sealed_page")?;
        self.inner.commit_sealed_page(column_id, sealed)
    }

    fn commit_sealed_page_batch(&mut self, groups: &[SealedPageGroup]) -> Result<()> {
        self.state.ensure(SinkState::Open, "commit_sealed_page_batch")?;
        self.inner.commit_sealed_page_batch(groups)
    }

    #[tracing::instrument(skip(self), fields(n_pages = self.n_buffered_pages()))]
    fn commit_cluster(&mut self, n_entries: u64) -> Result<u64> {
        self.state.ensure(SinkState::Open, "commit_cluster")?;

        if let Some(scheduler) = &self.scheduler {
            scheduler.wait()?;
        }

        let path = self.choose_commit_path()?;

        // Past this point the inner sink may already hold part of the cluster
        let forwarded = match path {
            CommitPath::Batched => self.commit_batched(),
            CommitPath::PerPage => self.commit_per_page(),
        }
        .and_then(|()| self.inner.commit_cluster(n_entries));

        match forwarded {
            Ok(bytes_written) => {
                self.metrics.clusters_committed.inc();
                Ok(bytes_written)
            }
            Err(e) => {
                self.state = SinkState::Failed;
                tracing::error!(
                    error = %e,
                    buffered_pages = self.n_buffered_pages(),
                    "Cluster commit failed after forwarding started"
                );
                Err(e)
            }
        }
    }

    fn commit_cluster_group(&mut self) -> Result<Locator> {
        self.state.ensure(SinkState::Open, "commit_cluster_group")?;
        match self.n_buffered_pages() {
            0 => self.inner.commit_cluster_group(),
            n => Err(Error::UncommittedPages(n)),
        }
    }

    fn commit_dataset(&mut self) -> Result<()> {
        self.state.ensure(SinkState::Open, "commit_dataset")?;
        let n = self.n_buffered_pages();
        if n > 0 {
            return Err(Error::UncommittedPages(n));
        }

        self.inner.commit_dataset()?;
        self.state = SinkState::Finalized;
        tracing::info!("Buffered sink finalized");
        Ok(())
    }

    fn write_options(&self) -> &WriteOptions {
        &self.options
    }

    fn metrics(&self) -> &SinkMetrics {
        &self.metrics
    }
}

impl<S: PageSink> Drop for BufferedPageSink<S> {
    fn drop(&mut self) {
        if let Some(scheduler) = &self.scheduler {
            if let Err(e) = scheduler.wait() {
                tracing::warn!(error = %e, "Sealing tasks failed while dropping buffered sink");
            }
        }
        let pending = self.n_buffered_pages();
        if pending > 0 {
            tracing::warn!(pages = pending, "Dropping buffered sink with uncommitted pages");
        }
    }
}
