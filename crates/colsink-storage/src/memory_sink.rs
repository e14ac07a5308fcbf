//! Memory Page Sink - A Complete Inner Sink Backed by a Byte Buffer
//!
//! `MemoryPageSink` performs the durable half of the write path against an in-memory object:
//! it seals pages, appends them to storage, and records where every page of every cluster
//! landed. It is the sink a `BufferedPageSink` forwards to in tests, benchmarks and the demo.
//!
//! ## What Does MemoryPageSink Do?
//!
//! 1. **Hands out pages** from a pool of recycled buffers (released pages feed the pool)
//! 2. **Seals** committed pages with the configured compression
//! 3. **Appends** sealed bytes to storage and records a `PageInfo` per page
//! 4. **Closes clusters** into `ClusterSummary`s, returning the bytes written per cluster
//! 5. **Writes page lists** for each cluster group, so a reader can find every page
//!
//! ## Storage Layout
//!
//! ```text
//! [sealed page][sealed page]...[page list][sealed page]...[page list]
//! ```
//!
//! ### Page List Envelope
//!
//! ```text
//! magic "CSPL"
//! varint n_clusters
//! per cluster:  varint first_entry, varint n_entries, varint n_pages
//!   per page:   varint column_id, varint n_elements, u32 LE checksum,
//!               zigzag varint position delta, varint bytes_on_storage
//! u32 LE CRC32 of everything above
//! ```
//!
//! Page positions are delta-encoded against the end of the previous page. Pages of a cluster
//! are usually contiguous, so most deltas are zero and take one byte.
//!
//! ## Thread Safety
//!
//! Not thread-safe. Each sink is driven by one control thread.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use colsink_core::{
    seal_page, unseal_page, varint, ColumnHandle, ColumnId, Locator, Model, ModelChangeset, Page,
    SchemaDescriptor, SealedPage,
};
use tracing::{debug, info, trace};

use crate::config::WriteOptions;
use crate::error::{Error, Result};
use crate::metrics::SinkMetrics;
use crate::sink::{PageSink, SealedPageGroup, SinkState};

/// Magic bytes opening a page list envelope
pub const PAGE_LIST_MAGIC: [u8; 4] = *b"CSPL";

/// Released buffers kept for reuse
const MAX_POOLED_BUFFERS: usize = 64;

/// Where one committed page lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub column_id: ColumnId,
    pub n_elements: u32,
    pub checksum: u32,
    pub locator: Locator,
}

/// A committed cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSummary {
    /// Index of the cluster's first entry within the dataset
    pub first_entry: u64,
    pub n_entries: u64,
    /// Pages in commit order
    pub pages: Vec<PageInfo>,
}

/// A committed cluster group and the location of its page list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterGroupSummary {
    pub first_cluster: usize,
    pub n_clusters: usize,
    pub page_list: Locator,
}

pub struct MemoryPageSink {
    options: WriteOptions,
    metrics: SinkMetrics,
    state: SinkState,

    model: Model,
    descriptor: SchemaDescriptor,

    /// Everything written so far
    storage: BytesMut,

    /// Pages of the cluster being built
    open_pages: Vec<PageInfo>,
    clusters: Vec<ClusterSummary>,
    cluster_groups: Vec<ClusterGroupSummary>,

    /// Entries committed in closed clusters
    n_entries: u64,

    /// Storage position where the open cluster started
    cluster_start: usize,

    /// First cluster not yet covered by a page list
    group_first_cluster: usize,

    page_pool: Vec<BytesMut>,
    pool_hits: u64,
    pool_misses: u64,
}

impl MemoryPageSink {
    pub fn new(options: WriteOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options,
            metrics: SinkMetrics::new("memory_sink")?,
            state: SinkState::Initialized,
            model: Model::new(),
            descriptor: SchemaDescriptor::new(),
            storage: BytesMut::new(),
            open_pages: Vec::new(),
            clusters: Vec::new(),
            cluster_groups: Vec::new(),
            n_entries: 0,
            cluster_start: 0,
            group_first_cluster: 0,
            page_pool: Vec::new(),
            pool_hits: 0,
            pool_misses: 0,
        })
    }

    /// Take a buffer from the pool, or allocate one
    fn take_buffer(&mut self, n_bytes: usize) -> BytesMut {
        match self.page_pool.pop() {
            Some(mut buffer) => {
                self.pool_hits += 1;
                buffer.clear();
                buffer.reserve(n_bytes);
                buffer
            }
            None => {
                self.pool_misses += 1;
                BytesMut::with_capacity(n_bytes)
            }
        }
    }

    fn ensure_column(&self, column_id: ColumnId) -> Result<ColumnHandle> {
        self.descriptor
            .handle(column_id)
            .ok_or(Error::ColumnNotFound(column_id))
    }

    /// Append sealed bytes to storage and record the page in the open cluster
    fn write_sealed(&mut self, column_id: ColumnId, sealed: &SealedPage) -> Result<Locator> {
        let bytes_on_storage = u32::try_from(sealed.size()).map_err(|_| {
            Error::Inner(format!("sealed page of {} bytes is too large", sealed.size()))
        })?;
        let locator = Locator::new(self.storage.len() as u64, bytes_on_storage);
        self.storage.put_slice(sealed.buffer());

        self.open_pages.push(PageInfo {
            column_id,
            n_elements: sealed.n_elements(),
            checksum: sealed.checksum(),
            locator,
        });
        self.metrics.pages_committed.inc();

        trace!(
            column_id,
            position = locator.position,
            size = bytes_on_storage,
            "Page written"
        );
        Ok(locator)
    }

    fn encode_page_list(clusters: &[ClusterSummary]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_slice(&PAGE_LIST_MAGIC);
        varint::encode_varint_u64(&mut buf, clusters.len() as u64);

        let mut previous_end = 0u64;
        for cluster in clusters {
            varint::encode_varint_u64(&mut buf, cluster.first_entry);
            varint::encode_varint_u64(&mut buf, cluster.n_entries);
            varint::encode_varint_u64(&mut buf, cluster.pages.len() as u64);

            for page in &cluster.pages {
                varint::encode_varint_u64(&mut buf, page.column_id);
                varint::encode_varint_u64(&mut buf, page.n_elements as u64);
                buf.put_u32_le(page.checksum);
                varint::encode_varint(
                    &mut buf,
                    page.locator.position.wrapping_sub(previous_end) as i64,
                );
                varint::encode_varint_u64(&mut buf, page.locator.bytes_on_storage as u64);
                previous_end = page.locator.end();
            }
        }

        let crc = crc32fast::hash(&buf);
        buf.put_u32_le(crc);
        buf
    }

    /// Byte range of `locator` within storage, rejecting anything out of bounds
    fn storage_range(&self, locator: Locator) -> Result<(usize, usize)> {
        let end = locator.checked_end();
        match end {
            Some(end) if end <= self.storage.len() as u64 => {
                Ok((locator.position as usize, end as usize))
            }
            _ => Err(decode_error(format!(
                "locator {:?} is outside storage of {} bytes",
                locator,
                self.storage.len()
            ))),
        }
    }

    /// Read back the page list written by `commit_cluster_group`
    pub fn decode_page_list(&self, locator: Locator) -> Result<Vec<ClusterSummary>> {
        let (start, end) = self.storage_range(locator)?;
        if end < start + PAGE_LIST_MAGIC.len() + 4 {
            return Err(decode_error(format!(
                "page list at {}..{} is too short",
                start, end
            )));
        }

        let envelope = &self.storage[start..end];
        let (body, trailer) = envelope.split_at(envelope.len() - 4);
        let expected = (&trailer[..]).get_u32_le();
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(colsink_core::Error::ChecksumMismatch { expected, actual }.into());
        }
        if body[..PAGE_LIST_MAGIC.len()] != PAGE_LIST_MAGIC {
            return Err(decode_error("bad page list magic".to_string()));
        }

        let mut cursor = &body[PAGE_LIST_MAGIC.len()..];
        let n_clusters = varint::decode_varint_u64(&mut cursor)?;
        let mut clusters = Vec::new();
        let mut previous_end = 0u64;

        for _ in 0..n_clusters {
            let first_entry = varint::decode_varint_u64(&mut cursor)?;
            let n_entries = varint::decode_varint_u64(&mut cursor)?;
            let n_pages = varint::decode_varint_u64(&mut cursor)?;

            let mut pages = Vec::new();
            for _ in 0..n_pages {
                let column_id = varint::decode_varint_u64(&mut cursor)?;
                let n_elements = decode_u32(&mut cursor, "n_elements")?;
                if cursor.remaining() < 4 {
                    return Err(decode_error("truncated page checksum".to_string()));
                }
                let checksum = cursor.get_u32_le();
                let delta = varint::decode_varint(&mut cursor)?;
                let bytes_on_storage = decode_u32(&mut cursor, "bytes_on_storage")?;

                let locator =
                    Locator::new(previous_end.wrapping_add(delta as u64), bytes_on_storage);
                previous_end = locator.checked_end().ok_or_else(|| {
                    decode_error(format!("page locator {:?} overflows", locator))
                })?;
                pages.push(PageInfo {
                    column_id,
                    n_elements,
                    checksum,
                    locator,
                });
            }

            clusters.push(ClusterSummary {
                first_entry,
                n_entries,
                pages,
            });
        }

        if cursor.has_remaining() {
            return Err(decode_error(format!(
                "{} trailing bytes in page list",
                cursor.remaining()
            )));
        }
        Ok(clusters)
    }

    /// Stored bytes of a committed page, checksum verified
    pub fn read_sealed_page(&self, info: &PageInfo) -> Result<SealedPage> {
        let (start, end) = self.storage_range(info.locator)?;
        let sealed = SealedPage::new(
            Bytes::copy_from_slice(&self.storage[start..end]),
            info.n_elements,
            info.checksum,
        );
        sealed.verify_checksum()?;
        Ok(sealed)
    }

    /// Committed page, unsealed back into memory
    pub fn read_page(&self, info: &PageInfo) -> Result<Page> {
        let handle = self.ensure_column(info.column_id)?;
        let sealed = self.read_sealed_page(info)?;
        Ok(unseal_page(&sealed, &handle.element, info.column_id)?)
    }

    pub fn clusters(&self) -> &[ClusterSummary] {
        &self.clusters
    }

    pub fn cluster_groups(&self) -> &[ClusterGroupSummary] {
        &self.cluster_groups
    }

    pub fn storage(&self) -> &[u8] {
        &self.storage
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn descriptor(&self) -> &SchemaDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    pub fn is_finalized(&self) -> bool {
        self.state == SinkState::Finalized
    }

    /// Entries committed in closed clusters
    pub fn n_entries(&self) -> u64 {
        self.n_entries
    }

    /// Pages written to the cluster that is still open
    pub fn n_open_pages(&self) -> usize {
        self.open_pages.len()
    }

    pub fn pool_hits(&self) -> u64 {
        self.pool_hits
    }

    pub fn pool_misses(&self) -> u64 {
        self.pool_misses
    }
}

impl PageSink for MemoryPageSink {
    fn create(&mut self, model: &Model) -> Result<()> {
        self.state.ensure(SinkState::Initialized, "create")?;

        self.descriptor.apply(&ModelChangeset::from_model(model))?;
        self.model = model.clone();
        self.model.freeze();
        self.state = SinkState::Open;

        info!(
            columns = self.descriptor.n_physical_columns(),
            compression = %self.options.compression,
            "Memory sink created"
        );
        Ok(())
    }

    fn update_schema(&mut self, changeset: &ModelChangeset) -> Result<()> {
        self.state.ensure(SinkState::Open, "update_schema")?;

        let mut model = self.model.clone();
        model.unfreeze();
        model.apply(changeset)?;
        model.freeze();
        let mut descriptor = self.descriptor.clone();
        let added = descriptor.apply(changeset)?;

        self.model = model;
        self.descriptor = descriptor;
        debug!(added_columns = added.len(), "Memory sink schema updated");
        Ok(())
    }

    fn column_handle(&self, column_id: ColumnId) -> Result<ColumnHandle> {
        self.ensure_column(column_id)
    }

    fn reserve_page(&mut self, handle: &ColumnHandle, n_elements: usize) -> Result<Page> {
        self.state.ensure(SinkState::Open, "reserve_page")?;
        self.ensure_column(handle.physical_id)?;

        let element_size = handle.element_size();
        let buffer = self.take_buffer(n_elements * element_size);
        Ok(Page::with_buffer(
            handle.physical_id,
            element_size,
            n_elements,
            buffer,
        ))
    }

    fn release_page(&mut self, page: Page) {
        if self.page_pool.len() < MAX_POOLED_BUFFERS {
            self.page_pool.push(page.into_buffer());
        }
    }

    fn commit_page(&mut self, handle: &ColumnHandle, page: &Page) -> Result<Locator> {
        self.state.ensure(SinkState::Open, "commit_page")?;
        self.ensure_column(handle.physical_id)?;

        let scratch = self.take_buffer(page.n_bytes());
        let sealed = seal_page(page, &handle.element, self.options.compression, scratch)?;
        self.metrics.pages_sealed.inc();
        self.metrics.sealed_bytes.inc_by(sealed.size() as u64);

        self.write_sealed(handle.physical_id, &sealed)
    }

    fn commit_sealed_page(&mut self, column_id: ColumnId, sealed: &SealedPage) -> Result<Locator> {
        self.state.ensure(SinkState::Open, "commit_sealed_page")?;
        self.ensure_column(column_id)?;
        self.write_sealed(column_id, sealed)
    }

    fn commit_sealed_page_batch(&mut self, groups: &[SealedPageGroup]) -> Result<()> {
        self.state.ensure(SinkState::Open, "commit_sealed_page_batch")?;
        for group in groups {
            self.ensure_column(group.column_id)?;
        }

        // One reservation for the whole batch
        let total: usize = groups
            .iter()
            .flat_map(|g| g.pages.iter())
            .map(SealedPage::size)
            .sum();
        self.storage.reserve(total);

        for group in groups {
            for sealed in &group.pages {
                self.write_sealed(group.column_id, sealed)?;
            }
        }

        debug!(
            groups = groups.len(),
            bytes = total,
            "Sealed page batch written"
        );
        Ok(())
    }

    fn commit_cluster(&mut self, n_entries: u64) -> Result<u64> {
        self.state.ensure(SinkState::Open, "commit_cluster")?;

        let bytes_written = (self.storage.len() - self.cluster_start) as u64;
        let pages = std::mem::take(&mut self.open_pages);
        let n_pages = pages.len();

        self.clusters.push(ClusterSummary {
            first_entry: self.n_entries,
            n_entries,
            pages,
        });
        self.n_entries += n_entries;
        self.cluster_start = self.storage.len();
        self.metrics.clusters_committed.inc();

        debug!(
            cluster = self.clusters.len() - 1,
            n_entries,
            n_pages,
            bytes_written,
            "Cluster committed"
        );
        Ok(bytes_written)
    }

    fn commit_cluster_group(&mut self) -> Result<Locator> {
        self.state.ensure(SinkState::Open, "commit_cluster_group")?;
        if !self.open_pages.is_empty() {
            return Err(Error::UncommittedPages(self.open_pages.len()));
        }

        let clusters = &self.clusters[self.group_first_cluster..];
        let envelope = Self::encode_page_list(clusters);
        let n_clusters = clusters.len();

        let page_list = Locator::new(self.storage.len() as u64, envelope.len() as u32);
        self.storage.put_slice(&envelope);
        self.cluster_groups.push(ClusterGroupSummary {
            first_cluster: self.group_first_cluster,
            n_clusters,
            page_list,
        });
        self.group_first_cluster = self.clusters.len();
        self.cluster_start = self.storage.len();

        debug!(
            n_clusters,
            position = page_list.position,
            size = page_list.bytes_on_storage,
            "Cluster group committed"
        );
        Ok(page_list)
    }

    fn commit_dataset(&mut self) -> Result<()> {
        self.state.ensure(SinkState::Open, "commit_dataset")?;
        if !self.open_pages.is_empty() {
            return Err(Error::UncommittedPages(self.open_pages.len()));
        }
        self.state = SinkState::Finalized;

        info!(
            clusters = self.clusters.len(),
            entries = self.n_entries,
            bytes = self.storage.len(),
            "Dataset committed"
        );
        Ok(())
    }

    fn write_options(&self) -> &WriteOptions {
        &self.options
    }

    fn metrics(&self) -> &SinkMetrics {
        &self.metrics
    }
}

fn decode_error(message: String) -> Error {
    Error::Core(colsink_core::Error::Decode(message))
}

fn decode_u32(cursor: &mut &[u8], what: &str) -> Result<u32> {
    let value = varint::decode_varint_u64(cursor)?;
    u32::try_from(value).map_err(|_| decode_error(format!("{} {} does not fit u32", what, value)))
}
