//! Error Types for colsink
//!
//! This module defines the errors raised by the leaf data model: pages, element packing,
//! sealing/unsealing and the schema model.
//!
//! ## Error Categories
//!
//! ### I/O Errors
//! - File system or object store operations performed by sinks built on these types
//!
//! ### Sealing Errors
//! - `InvalidCompression`: Unknown compression type ID
//! - `Compression`: Compressing a page failed
//! - `Decompression`: Decompressing a sealed page failed (likely corruption)
//! - `ChecksumMismatch`: Sealed bytes do not match their stored CRC32
//! - `Unsupported`: Compression algorithm not implemented (e.g., Zstd)
//!
//! ### Page Errors
//! - `InvalidPage`: A page was grown past its capacity or copied into a smaller page
//!
//! ### Schema Errors
//! - `Schema`: Duplicate field, unknown projection source, or a frozen model was modified
//!
//! ### Codec Errors
//! - `Decode`: Truncated or malformed varint / envelope data
//!
//! ## Usage
//! All functions in colsink-core return `Result<T>` which is aliased to `Result<T, Error>`.
//!
//! ```ignore
//! use colsink_core::{seal_page, Compression, Result};
//!
//! fn seal(page: &Page, element: &ColumnElement) -> Result<SealedPage> {
//!     let scratch = BytesMut::with_capacity(page.n_bytes());
//!     seal_page(page, element, Compression::Lz4, scratch)
//! }
//! ```

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid compression type: {0}")]
    InvalidCompression(u16),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Decompression error: {0}")]
    Decompression(String),

    #[error("Checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("Unsupported feature: {0}")]
    Unsupported(String),

    #[error("Invalid page: {0}")]
    InvalidPage(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, Error>;
