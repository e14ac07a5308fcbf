//! Sealed Pages - Packing, Compressing and Checksumming Pages
//!
//! Sealing turns an in-memory `Page` into the exact bytes a sink stores. It is the expensive,
//! CPU-bound step of the write path and the one buffered sinks run in parallel.
//!
//! ## What Does Sealing Do?
//!
//! 1. **Packs** elements into their storage representation (bit-packing, little-endian)
//! 2. **Compresses** the packed bytes with the session's compression policy
//! 3. **Falls back** to the packed bytes when compression does not make them smaller
//! 4. **Checksums** the stored bytes with CRC32
//!
//! ## Buffer Ownership
//!
//! `seal_page` takes its scratch buffer by value. Compression writes into it and the buffer is
//! frozen into the resulting `SealedPage`, so a scratch buffer can never be observed by two
//! sealing jobs at once.
//!
//! ## Sealed Layout
//!
//! ```text
//! Uncompressed:  [packed elements]                      len == packed_len(n)
//! LZ4:           [uncompressed len: u32 LE][lz4 block]  len <  packed_len(n)
//! ```
//!
//! The reader tells the two apart by comparing the stored size with the packed size, so the
//! compression policy does not need to be stored with each page.
//!
//! ## Example
//!
//! ```ignore
//! let element = ColumnElement::new(ElementKind::Real64);
//! let scratch = BytesMut::with_capacity(page.n_bytes());
//! let sealed = seal_page(&page, &element, Compression::Lz4, scratch)?;
//!
//! let restored = unseal_page(&sealed, &element, page.column_id())?;
//! assert_eq!(restored.buffer(), page.buffer());
//! ```

use std::borrow::Cow;

use bytes::{Bytes, BytesMut};

use crate::column::ColumnId;
use crate::compression::Compression;
use crate::element::ColumnElement;
use crate::page::Page;
use crate::{Error, Result};

/// Size of the little-endian length prefix in front of an LZ4 block
const LZ4_SIZE_PREFIX: usize = 4;

/// The stored representation of a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPage {
    buffer: Bytes,
    n_elements: u32,
    checksum: u32,
}

impl SealedPage {
    /// Wrap stored bytes whose checksum is already known
    pub fn new(buffer: Bytes, n_elements: u32, checksum: u32) -> Self {
        Self {
            buffer,
            n_elements,
            checksum,
        }
    }

    /// Wrap stored bytes and compute their checksum
    pub fn from_bytes(buffer: Bytes, n_elements: u32) -> Self {
        let checksum = crc32fast::hash(&buffer);
        Self::new(buffer, n_elements, checksum)
    }

    pub fn buffer(&self) -> &Bytes {
        &self.buffer
    }

    /// Stored size in bytes
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    pub fn n_elements(&self) -> u32 {
        self.n_elements
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Recompute the CRC32 of the stored bytes and compare it with the recorded one
    pub fn verify_checksum(&self) -> Result<()> {
        let actual = crc32fast::hash(&self.buffer);
        if actual != self.checksum {
            return Err(Error::ChecksumMismatch {
                expected: self.checksum,
                actual,
            });
        }
        Ok(())
    }
}

/// Seal `page` using `element` to pack it and `compression` to compress it.
///
/// `scratch` becomes the sealed page's buffer; any previous contents are discarded.
pub fn seal_page(
    page: &Page,
    element: &ColumnElement,
    compression: Compression,
    mut scratch: BytesMut,
) -> Result<SealedPage> {
    if page.element_size() != element.memory_size() {
        return Err(Error::InvalidPage(format!(
            "page of column {} has {}-byte elements, {:?} needs {}",
            page.column_id(),
            page.element_size(),
            element.kind(),
            element.memory_size()
        )));
    }
    let n_elements = page.n_elements();
    let n_elements_u32 = u32::try_from(n_elements).map_err(|_| {
        Error::InvalidPage(format!("page with {} elements is too large", n_elements))
    })?;
    let packed_len = element.packed_len(n_elements);

    scratch.clear();
    match compression {
        Compression::None => {
            scratch.resize(packed_len, 0);
            element.pack(page.buffer(), n_elements, &mut scratch)?;
        }
        Compression::Lz4 => {
            let packed = pack_for_compression(page, element)?;
            let bound = LZ4_SIZE_PREFIX + lz4_flex::block::get_maximum_output_size(packed.len());
            scratch.resize(bound, 0);
            scratch[..LZ4_SIZE_PREFIX].copy_from_slice(&(packed.len() as u32).to_le_bytes());
            let written = lz4_flex::block::compress_into(&packed, &mut scratch[LZ4_SIZE_PREFIX..])
                .map_err(|e| Error::Compression(e.to_string()))?;

            if LZ4_SIZE_PREFIX + written < packed_len {
                scratch.truncate(LZ4_SIZE_PREFIX + written);
            } else {
                // Incompressible: store packed bytes as-is
                scratch.clear();
                scratch.extend_from_slice(&packed);
            }
        }
        Compression::Zstd => {
            return Err(Error::Unsupported(
                "Zstd compression not yet implemented".to_string(),
            ));
        }
    }

    Ok(SealedPage::from_bytes(scratch.freeze(), n_elements_u32))
}

/// Restore the in-memory page from a sealed page
pub fn unseal_page(
    sealed: &SealedPage,
    element: &ColumnElement,
    column_id: ColumnId,
) -> Result<Page> {
    sealed.verify_checksum()?;

    let n_elements = sealed.n_elements() as usize;
    let packed_len = element.packed_len(n_elements);

    let packed: Cow<'_, [u8]> = if sealed.size() == packed_len {
        Cow::Borrowed(sealed.buffer().as_ref())
    } else {
        let decompressed = lz4_flex::block::decompress_size_prepended(sealed.buffer())
            .map_err(|e| Error::Decompression(e.to_string()))?;
        if decompressed.len() != packed_len {
            return Err(Error::Decompression(format!(
                "expected {} packed bytes, got {}",
                packed_len,
                decompressed.len()
            )));
        }
        Cow::Owned(decompressed)
    };

    let mut page = Page::new(column_id, element.memory_size(), n_elements);
    let dst = page.grow(n_elements)?;
    element.unpack(&packed, n_elements, dst)?;
    Ok(page)
}

/// Packed bytes to feed the compressor; borrows the page when packing is the identity.
fn pack_for_compression<'a>(page: &'a Page, element: &ColumnElement) -> Result<Cow<'a, [u8]>> {
    if !element.is_mapped() && cfg!(target_endian = "little") {
        return Ok(Cow::Borrowed(page.buffer()));
    }
    let mut packed = vec![0u8; element.packed_len(page.n_elements())];
    element.pack(page.buffer(), page.n_elements(), &mut packed)?;
    Ok(Cow::Owned(packed))
}
