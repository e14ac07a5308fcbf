//! Shared fixtures for the write path integration tests

#![allow(dead_code)]

use colsink_core::{
    ColumnHandle, ColumnId, ElementKind, Field, Locator, Model, ModelChangeset, Page, SealedPage,
};
use colsink_storage::{
    Error, MemoryPageSink, PageSink, Result, SealedPageGroup, SinkMetrics, WriteOptions,
};

/// One call received by a `RecordingSink`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Create {
        fields: Vec<String>,
    },
    UpdateSchema {
        fields: Vec<String>,
        projections: Vec<String>,
    },
    CommitPage {
        column_id: ColumnId,
        values: Vec<i32>,
    },
    CommitSealedPage {
        column_id: ColumnId,
        n_elements: u32,
    },
    CommitSealedPageBatch {
        /// (column, number of pages) per group
        groups: Vec<(ColumnId, usize)>,
    },
    CommitCluster {
        n_entries: u64,
    },
    CommitClusterGroup,
    CommitDataset,
}

/// A `MemoryPageSink` that journals every call and can be told to fail
pub struct RecordingSink {
    memory: MemoryPageSink,
    journal: Vec<SinkEvent>,
    fail_cluster_commit: bool,
    /// Raw page commits left before the injected failure
    page_commits_before_failure: Option<usize>,
}

impl RecordingSink {
    pub fn new(options: WriteOptions) -> Self {
        Self {
            memory: MemoryPageSink::new(options).unwrap(),
            journal: Vec::new(),
            fail_cluster_commit: false,
            page_commits_before_failure: None,
        }
    }

    pub fn journal(&self) -> &[SinkEvent] {
        &self.journal
    }

    /// Journal entries after the `Create` event
    pub fn commits(&self) -> &[SinkEvent] {
        match self.journal.first() {
            Some(SinkEvent::Create { .. }) => &self.journal[1..],
            _ => &self.journal,
        }
    }

    pub fn memory(&self) -> &MemoryPageSink {
        &self.memory
    }

    pub fn fail_next_cluster_commit(&mut self) {
        self.fail_cluster_commit = true;
    }

    /// Fail the `n`-th raw page commit from now (1 = the next one)
    pub fn fail_nth_page_commit(&mut self, n: usize) {
        assert!(n > 0);
        self.page_commits_before_failure = Some(n - 1);
    }
}

impl PageSink for RecordingSink {
    fn create(&mut self, model: &Model) -> Result<()> {
        self.journal.push(SinkEvent::Create {
            fields: model.fields().iter().map(|f| f.name().to_string()).collect(),
        });
        self.memory.create(model)
    }

    fn update_schema(&mut self, changeset: &ModelChangeset) -> Result<()> {
        self.journal.push(SinkEvent::UpdateSchema {
            fields: changeset
                .added_fields
                .iter()
                .map(|f| f.name().to_string())
                .collect(),
            projections: changeset
                .added_projected_fields
                .iter()
                .map(|p| p.field().name().to_string())
                .collect(),
        });
        self.memory.update_schema(changeset)
    }

    fn column_handle(&self, column_id: ColumnId) -> Result<ColumnHandle> {
        self.memory.column_handle(column_id)
    }

    fn reserve_page(&mut self, handle: &ColumnHandle, n_elements: usize) -> Result<Page> {
        self.memory.reserve_page(handle, n_elements)
    }

    fn release_page(&mut self, page: Page) {
        self.memory.release_page(page)
    }

    fn commit_page(&mut self, handle: &ColumnHandle, page: &Page) -> Result<Locator> {
        match self.page_commits_before_failure {
            Some(0) => {
                self.page_commits_before_failure = None;
                return Err(Error::Inner("injected page commit failure".to_string()));
            }
            Some(n) => self.page_commits_before_failure = Some(n - 1),
            None => {}
        }
        self.journal.push(SinkEvent::CommitPage {
            column_id: handle.physical_id,
            values: page_values(page),
        });
        self.memory.commit_page(handle, page)
    }

    fn commit_sealed_page(&mut self, column_id: ColumnId, sealed: &SealedPage) -> Result<Locator> {
        self.journal.push(SinkEvent::CommitSealedPage {
            column_id,
            n_elements: sealed.n_elements(),
        });
        self.memory.commit_sealed_page(column_id, sealed)
    }

    fn commit_sealed_page_batch(&mut self, groups: &[SealedPageGroup]) -> Result<()> {
        self.journal.push(SinkEvent::CommitSealedPageBatch {
            groups: groups.iter().map(|g| (g.column_id, g.len())).collect(),
        });
        self.memory.commit_sealed_page_batch(groups)
    }

    fn commit_cluster(&mut self, n_entries: u64) -> Result<u64> {
        if std::mem::take(&mut self.fail_cluster_commit) {
            return Err(Error::Inner("injected cluster commit failure".to_string()));
        }
        self.journal.push(SinkEvent::CommitCluster { n_entries });
        self.memory.commit_cluster(n_entries)
    }

    fn commit_cluster_group(&mut self) -> Result<Locator> {
        self.journal.push(SinkEvent::CommitClusterGroup);
        self.memory.commit_cluster_group()
    }

    fn commit_dataset(&mut self) -> Result<()> {
        self.journal.push(SinkEvent::CommitDataset);
        self.memory.commit_dataset()
    }

    fn write_options(&self) -> &WriteOptions {
        self.memory.write_options()
    }

    fn metrics(&self) -> &SinkMetrics {
        self.memory.metrics()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn options(compression: colsink_core::Compression) -> WriteOptions {
    WriteOptions {
        compression,
        ..Default::default()
    }
}

/// Three 4-byte columns: `run` (0), `event` (1), `energy` (2)
pub fn three_column_model() -> Model {
    Model::new()
        .with_field(Field::leaf("run", "int", ElementKind::Int32))
        .unwrap()
        .with_field(Field::leaf("event", "unsigned", ElementKind::Index32))
        .unwrap()
        .with_field(Field::leaf("energy", "float", ElementKind::Real32))
        .unwrap()
}

/// Reserve a page of `column_id`, fill it with `values` and commit it
pub fn write_page(sink: &mut impl PageSink, column_id: ColumnId, values: &[i32]) {
    let handle = sink.column_handle(column_id).unwrap();
    let mut page = sink.reserve_page(&handle, values.len()).unwrap();
    let bytes = page.grow(values.len()).unwrap();
    for (chunk, v) in bytes.chunks_exact_mut(4).zip(values) {
        chunk.copy_from_slice(&v.to_ne_bytes());
    }
    sink.commit_page(&handle, &page).unwrap();
    sink.release_page(page);
}

pub fn page_values(page: &Page) -> Vec<i32> {
    page.buffer()
        .chunks_exact(4)
        .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Values of every page committed to `memory`, per cluster, in storage order
pub fn stored_pages(memory: &MemoryPageSink) -> Vec<Vec<(ColumnId, Vec<i32>)>> {
    memory
        .clusters()
        .iter()
        .map(|cluster| {
            cluster
                .pages
                .iter()
                .map(|info| (info.column_id, page_values(&memory.read_page(info).unwrap())))
                .collect()
        })
        .collect()
}

/// Page `p` of column `c`: 25 distinct values
pub fn sample_values(column: ColumnId, page: usize) -> Vec<i32> {
    (0..25)
        .map(|i| (column as i32) * 10_000 + (page as i32) * 100 + i)
        .collect()
}
