//! Compression Policy
//!
//! The compression policy is chosen once per write session (see `WriteOptions` in
//! colsink-storage) and applied to every page when it is sealed.
//!
//! ## Compression Types
//! - **None**: Pages are only packed (bit-packing for boolean columns), never compressed
//! - **LZ4**: Fast block compression, the default
//! - **Zstd**: Reserved; sealing with it fails with `Error::Unsupported`
//!
//! The numeric IDs are stable so a policy can be stored alongside data.

use serde::{Deserialize, Serialize};

/// Compression type applied when sealing pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u16)]
pub enum Compression {
    None = 0,
    #[default]
    Lz4 = 1,
    Zstd = 2,
}

impl TryFrom<u16> for Compression {
    type Error = crate::Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Lz4),
            2 => Ok(Compression::Zstd),
            _ => Err(crate::Error::InvalidCompression(value)),
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Lz4 => write!(f, "lz4"),
            Compression::Zstd => write!(f, "zstd"),
        }
    }
}
