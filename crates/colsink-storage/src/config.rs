//! Write Options
//!
//! This module defines configuration for the write path.
//!
//! ## WriteOptions
//!
//! Controls how pages are sealed and how large pages and clusters grow:
//!
//! - **compression**: Compression applied when sealing pages (default: LZ4)
//! - **approx_unzipped_page_size**: Target size of an in-memory page (default: 64KB)
//! - **approx_zipped_cluster_size**: Target compressed size of a cluster (default: 50MB)
//! - **max_unzipped_cluster_size**: Limit for the uncompressed size of a cluster (default: 512MB)
//! - **use_buffered_write**: Wrap the destination sink in a `BufferedPageSink` (default: true)
//!
//! Writers size their pages with `page_capacity` and commit a cluster as soon as
//! `is_cluster_full` says so; `BufferedPageSink::is_cluster_full` does the bookkeeping for
//! buffered sessions.
//! - **sealing_threads**: Worker threads for parallel sealing (default: rayon's choice)
//!
//! The options travel with the sink that performs durable writes; a buffered sink reads them
//! from its inner sink so that both agree on the compression policy.
//!
//! ## Usage
//!
//! ```ignore
//! use colsink_storage::WriteOptions;
//! use colsink_core::Compression;
//!
//! let options = WriteOptions {
//!     compression: Compression::None,
//!     approx_unzipped_page_size: 16 * 1024,
//!     ..Default::default()
//! };
//! options.validate()?;
//! ```

use colsink_core::Compression;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOptions {
    /// Compression policy for sealed pages (default: LZ4)
    #[serde(default)]
    pub compression: Compression,

    /// Target in-memory page size in bytes (default: 64KB)
    #[serde(default = "default_approx_unzipped_page_size")]
    pub approx_unzipped_page_size: usize,

    /// Target compressed cluster size in bytes (default: 50MB)
    #[serde(default = "default_approx_zipped_cluster_size")]
    pub approx_zipped_cluster_size: usize,

    /// Maximum uncompressed cluster size in bytes (default: 512MB)
    #[serde(default = "default_max_unzipped_cluster_size")]
    pub max_unzipped_cluster_size: usize,

    /// Buffer pages until cluster commit (default: true)
    #[serde(default = "default_use_buffered_write")]
    pub use_buffered_write: bool,

    /// Threads for the sealing pool (optional - if None, rayon picks)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sealing_threads: Option<usize>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
            approx_unzipped_page_size: default_approx_unzipped_page_size(),
            approx_zipped_cluster_size: default_approx_zipped_cluster_size(),
            max_unzipped_cluster_size: default_max_unzipped_cluster_size(),
            use_buffered_write: default_use_buffered_write(),
            sealing_threads: None,
        }
    }
}

impl WriteOptions {
    /// Check the options for values no sink can honor
    pub fn validate(&self) -> Result<()> {
        if self.approx_unzipped_page_size == 0 {
            return Err(Error::Config(
                "approx_unzipped_page_size must be positive".to_string(),
            ));
        }
        if self.approx_zipped_cluster_size == 0 {
            return Err(Error::Config(
                "approx_zipped_cluster_size must be positive".to_string(),
            ));
        }
        if self.approx_zipped_cluster_size > self.max_unzipped_cluster_size {
            return Err(Error::Config(format!(
                "approx_zipped_cluster_size ({}) exceeds max_unzipped_cluster_size ({})",
                self.approx_zipped_cluster_size, self.max_unzipped_cluster_size
            )));
        }
        if self.sealing_threads == Some(0) {
            return Err(Error::Config(
                "sealing_threads must be positive when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of elements of `element_size` bytes that fit the target page size
    pub fn page_capacity(&self, element_size: usize) -> usize {
        (self.approx_unzipped_page_size / element_size.max(1)).max(1)
    }

    /// Whether a cluster of `unzipped_bytes`, expected to take `zipped_bytes` on storage, has
    /// grown enough to be committed
    pub fn is_cluster_full(&self, unzipped_bytes: usize, zipped_bytes: usize) -> bool {
        unzipped_bytes >= self.max_unzipped_cluster_size
            || zipped_bytes >= self.approx_zipped_cluster_size
    }
}

fn default_approx_unzipped_page_size() -> usize {
    64 * 1024 // 64KB
}

fn default_approx_zipped_cluster_size() -> usize {
    50 * 1000 * 1000 // 50MB
}

fn default_max_unzipped_cluster_size() -> usize {
    512 * 1024 * 1024 // 512MB
}

fn default_use_buffered_write() -> bool {
    true
}
