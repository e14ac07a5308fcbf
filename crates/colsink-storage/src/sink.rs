//! Page Sink Contract
//!
//! A `PageSink` receives the pages of one write session and turns them into durable storage.
//! The same contract is implemented by sinks that write (`MemoryPageSink`) and by sinks that
//! only stage pages for another sink (`BufferedPageSink`), so a writer never needs to know
//! which one it holds.
//!
//! ## Session Protocol
//!
//! ```text
//! create(model)
//!   ( update_schema(changeset)
//!   | reserve_page / commit_page / release_page
//!   | commit_sealed_page / commit_sealed_page_batch
//!   | commit_cluster(n_entries)
//!   | commit_cluster_group() )*
//! commit_dataset()
//! ```
//!
//! ## Locators
//!
//! `commit_page` and `commit_sealed_page` return where the page was written. Sinks that defer
//! the write return `Locator::placeholder()`; callers must not interpret it.

use colsink_core::{ColumnHandle, ColumnId, Locator, Model, ModelChangeset, Page, SealedPage};

use crate::config::WriteOptions;
use crate::error::{Error, Result};
use crate::metrics::SinkMetrics;

/// Where a sink is in its session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    /// Waiting for `create`
    Initialized,
    /// Accepting pages and commits
    Open,
    /// `commit_dataset` done; nothing more is accepted
    Finalized,
    /// A cluster commit failed after part of it reached storage; nothing more is accepted
    Failed,
}

impl SinkState {
    pub fn name(&self) -> &'static str {
        match self {
            SinkState::Initialized => "initialized",
            SinkState::Open => "open",
            SinkState::Finalized => "finalized",
            SinkState::Failed => "failed",
        }
    }

    /// Fail with `InvalidState` unless the sink is in `expected`
    pub fn ensure(&self, expected: SinkState, operation: &'static str) -> Result<()> {
        if *self != expected {
            return Err(Error::InvalidState {
                operation,
                state: self.name(),
            });
        }
        Ok(())
    }
}

/// The sealed pages of one column, in commit order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPageGroup {
    pub column_id: ColumnId,
    pub pages: Vec<SealedPage>,
}

impl SealedPageGroup {
    pub fn new(column_id: ColumnId, pages: Vec<SealedPage>) -> Self {
        Self { column_id, pages }
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

pub trait PageSink {
    /// Start the session with the initial schema
    fn create(&mut self, model: &Model) -> Result<()>;

    /// Extend the schema; existing columns keep their ids
    fn update_schema(&mut self, changeset: &ModelChangeset) -> Result<()>;

    /// Handle of a physical column known to the sink
    fn column_handle(&self, column_id: ColumnId) -> Result<ColumnHandle>;

    /// Hand out an empty page with room for `n_elements` elements of `handle`'s column
    fn reserve_page(&mut self, handle: &ColumnHandle, n_elements: usize) -> Result<Page>;

    /// Return a page obtained from `reserve_page`
    fn release_page(&mut self, page: Page);

    /// Seal and write `page`; the page stays owned by the caller
    fn commit_page(&mut self, handle: &ColumnHandle, page: &Page) -> Result<Locator>;

    /// Write a page that was sealed elsewhere
    fn commit_sealed_page(&mut self, column_id: ColumnId, sealed: &SealedPage) -> Result<Locator>;

    /// Write several columns' sealed pages in one call, groups and pages in order.
    ///
    /// Sinks that can write the batch with fewer I/O operations should override this.
    fn commit_sealed_page_batch(&mut self, groups: &[SealedPageGroup]) -> Result<()> {
        for group in groups {
            for sealed in &group.pages {
                self.commit_sealed_page(group.column_id, sealed)?;
            }
        }
        Ok(())
    }

    /// Close the current cluster of `n_entries` entries; returns the bytes written for it
    fn commit_cluster(&mut self, n_entries: u64) -> Result<u64>;

    /// Close the clusters committed since the previous group; returns the group's locator
    fn commit_cluster_group(&mut self) -> Result<Locator>;

    /// Finish the session
    fn commit_dataset(&mut self) -> Result<()>;

    fn write_options(&self) -> &WriteOptions;

    fn metrics(&self) -> &SinkMetrics;
}
