//! colsink Storage Layer
//!
//! This crate implements the write path of the colsink columnar format: the component that
//! takes pages of column data from a writer and turns them into durable, compressed storage.
//!
//! ## What is the Write Path?
//!
//! A writer fills one page per column at a time. The write path:
//!
//! 1. **Buffers** committed pages per column until the cluster they belong to is complete
//! 2. **Seals** pages (pack, compress, checksum) in parallel while the writer keeps writing
//! 3. **Commits** each cluster to the inner sink, either as one batch of sealed pages or
//!    page by page
//! 4. **Replicates** schema changes to the inner sink as the writer adds fields
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────┐
//! │   Writer    │
//! └──────┬──────┘
//!        │ pages
//!        ▼
//! ┌──────────────────┐      ┌──────────────────┐
//! │ BufferedPageSink │─────►│  TaskScheduler   │
//! │ - Buffers        │tasks │ - Inline         │
//! │ - Orchestrates   │◄─────│ - ThreadPool     │
//! │   cluster commit │sealed│ - Tokio          │
//! └────────┬─────────┘      └──────────────────┘
//!          │ sealed page batch / pages
//!          ▼
//! ┌──────────────────┐
//! │ PageSink (inner) │
//! │ e.g. MemoryPage- │
//! │ Sink             │
//! └──────────────────┘
//! ```
//!
//! ## Main Components
//!
//! ### BufferedPageSink
//! Wraps any `PageSink` and stages pages until `commit_cluster`.
//!
//! **Key features**:
//! - Copies each committed page, so callers may reuse theirs immediately
//! - Seals pages on an injected scheduler
//! - Commits fully sealed clusters with a single `commit_sealed_page_batch` call
//! - Aborts the commit, forwarding nothing, on sealing failures or inconsistent sealing state
//!
//! ### TaskScheduler
//! Submit/wait-all abstraction for sealing tasks. Implementations run tasks inline, on a
//! rayon pool, or on a tokio runtime's blocking pool.
//!
//! ### MemoryPageSink
//! A complete inner sink over an in-memory buffer, with page lists per cluster group.
//!
//! ## Usage Example
//!
//! ```ignore
//! use colsink_core::{ElementKind, Field, Model};
//! use colsink_storage::{BufferedPageSink, MemoryPageSink, PageSink, ThreadPoolScheduler, WriteOptions};
//! use std::sync::Arc;
//!
//! let options = WriteOptions::default();
//! let scheduler = Arc::new(ThreadPoolScheduler::from_options(&options)?);
//! let mut sink = BufferedPageSink::with_scheduler(MemoryPageSink::new(options)?, scheduler)?;
//!
//! let model = Model::new().with_field(Field::leaf("energy", "double", ElementKind::Real64))?;
//! sink.create(&model)?;
//!
//! let handle = sink.column_handle(0)?;
//! let mut page = sink.reserve_page(&handle, 1024)?;
//! // ... fill page ...
//! sink.commit_page(&handle, &page)?;
//! sink.release_page(page);
//!
//! sink.commit_cluster(1024)?;
//! sink.commit_cluster_group()?;
//! sink.commit_dataset()?;
//! ```
//!
//! ## Design Decisions
//!
//! ### Why Buffer Whole Clusters?
//! - **Parallel sealing**: Pages are sealed while the writer fills the next ones
//! - **Fewer writes**: A fully sealed cluster goes out in one batch
//! - **Column locality**: The inner sink receives each column's pages together
//!
//! ### Why Injected Schedulers?
//! - **Testability**: The inline scheduler makes sealing deterministic
//! - **Embedding**: Applications with a tokio runtime reuse its blocking pool

pub mod buffered_column;
pub mod buffered_sink;
pub mod config;
pub mod error;
pub mod memory_sink;
pub mod metrics;
pub mod scheduler;
pub mod sink;

pub use buffered_column::{BufferedColumn, DrainedPages, SealedPageSlot, SealingStatus, ZipItem};
pub use buffered_sink::BufferedPageSink;
pub use config::WriteOptions;
pub use error::{Error, Result};
pub use memory_sink::{ClusterGroupSummary, ClusterSummary, MemoryPageSink, PageInfo};
pub use metrics::SinkMetrics;
pub use scheduler::{InlineScheduler, Task, TaskScheduler, ThreadPoolScheduler, TokioScheduler};
pub use sink::{PageSink, SealedPageGroup, SinkState};
