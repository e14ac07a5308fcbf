//! Storage Error Types
//!
//! This module defines all error types that can occur on the write path.
//!
//! ## Error Categories
//!
//! ### Invariant Violations
//! - `InvariantViolation`: The buffered state is inconsistent (e.g., only some columns were
//!   sealed). Raised before anything is forwarded to the inner sink.
//! - `UncommittedPages`: A cluster group or the dataset was committed with pages still buffered
//!
//! ### Sealing Task Errors
//! - `TaskFailed`: A sealing task produced an error or never filled its result slot
//! - `TaskPanicked`: Sealing tasks panicked on a worker thread
//! - `Scheduler`: The task scheduler could not be built or used
//!
//! ### Session Errors
//! - `InvalidState`: Operation not allowed in the sink's current state (e.g., after
//!   `commit_dataset`)
//! - `ColumnNotFound`: Physical column id unknown to the sink
//! - `Config`: Invalid `WriteOptions`
//!
//! ### Inner Sink Errors
//! - `Core`, `Io`, `Inner`: Failures of the sink that performs the durable write. The buffered
//!   sink passes them through unchanged and never retries.
//!
//! ## Usage
//!
//! All storage operations return `Result<T>` which is aliased to
//! `Result<T, Error>`. This allows clean error propagation with `?`.

use colsink_core::ColumnId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Core error: {0}")]
    Core(#[from] colsink_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Sealing task for column {column_id} failed: {reason}")]
    TaskFailed { column_id: ColumnId, reason: String },

    #[error("{0} sealing task(s) panicked")]
    TaskPanicked(usize),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Cannot {operation} in state {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Column not found: {0}")]
    ColumnNotFound(ColumnId),

    #[error("{0} buffered page(s) not committed to a cluster")]
    UncommittedPages(usize),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Inner sink error: {0}")]
    Inner(String),
}
