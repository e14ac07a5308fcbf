//! In-memory Pages
//!
//! A `Page` is the unit of data the application hands to a page sink: a contiguous buffer of
//! fixed-size elements belonging to one physical column.
//!
//! ## Lifecycle
//! 1. **Reserve**: a sink hands out an empty page with room for `capacity` elements
//! 2. **Fill**: the caller grows the page and writes element bytes
//! 3. **Commit**: the page is handed to the sink (by reference; buffered sinks copy it)
//! 4. **Release**: once committed, the page goes back to the sink, which may recycle its buffer
//!
//! ## Example
//! ```ignore
//! let mut page = sink.reserve_page(&handle, 1024)?;
//! for value in values {
//!     page.grow(1)?.copy_from_slice(&value.to_ne_bytes());
//! }
//! sink.commit_page(&handle, &page)?;
//! sink.release_page(page);
//! ```

use bytes::{BufMut, BytesMut};

use crate::column::ColumnId;
use crate::{Error, Result};

/// A growable buffer of elements for one column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Physical column this page belongs to
    column_id: ColumnId,

    /// Bytes per element
    element_size: usize,

    /// Number of elements written so far
    n_elements: usize,

    /// Maximum number of elements
    capacity: usize,

    /// Element bytes; `len() == n_elements * element_size`
    buffer: BytesMut,
}

impl Page {
    /// Create an empty page with room for `capacity` elements
    pub fn new(column_id: ColumnId, element_size: usize, capacity: usize) -> Self {
        Self {
            column_id,
            element_size,
            n_elements: 0,
            capacity,
            buffer: BytesMut::with_capacity(capacity * element_size),
        }
    }

    /// Wrap an already allocated buffer; its contents are discarded.
    ///
    /// Used by page pools to recycle buffers of released pages.
    pub fn with_buffer(
        column_id: ColumnId,
        element_size: usize,
        capacity: usize,
        mut buffer: BytesMut,
    ) -> Self {
        buffer.clear();
        buffer.reserve(capacity * element_size);
        Self {
            column_id,
            element_size,
            n_elements: 0,
            capacity,
            buffer,
        }
    }

    /// Build a full page from existing element bytes
    pub fn from_bytes(column_id: ColumnId, element_size: usize, bytes: &[u8]) -> Result<Self> {
        if element_size == 0 || bytes.len() % element_size != 0 {
            return Err(Error::InvalidPage(format!(
                "{} bytes is not a whole number of {}-byte elements",
                bytes.len(),
                element_size
            )));
        }
        let n_elements = bytes.len() / element_size;
        let mut page = Self::new(column_id, element_size, n_elements);
        page.buffer.put_slice(bytes);
        page.n_elements = n_elements;
        Ok(page)
    }

    /// Reserve `n` more elements and return their (zeroed) bytes for the caller to fill
    pub fn grow(&mut self, n: usize) -> Result<&mut [u8]> {
        if self.n_elements + n > self.capacity {
            return Err(Error::InvalidPage(format!(
                "cannot grow page of column {} to {} elements (capacity {})",
                self.column_id,
                self.n_elements + n,
                self.capacity
            )));
        }
        Ok(self.grow_unchecked(n))
    }

    /// Reserve `n` more elements without checking the capacity.
    ///
    /// The buffer still grows as needed; only the logical capacity is ignored.
    pub fn grow_unchecked(&mut self, n: usize) -> &mut [u8] {
        let start = self.buffer.len();
        self.buffer.put_bytes(0, n * self.element_size);
        self.n_elements += n;
        if self.n_elements > self.capacity {
            self.capacity = self.n_elements;
        }
        &mut self.buffer[start..]
    }

    /// Replace this page's contents with a copy of `other`'s elements
    pub fn copy_from(&mut self, other: &Page) -> Result<()> {
        if other.element_size != self.element_size {
            return Err(Error::InvalidPage(format!(
                "element size mismatch: {} vs {}",
                other.element_size, self.element_size
            )));
        }
        if other.n_elements > self.capacity {
            return Err(Error::InvalidPage(format!(
                "page with {} elements does not fit capacity {}",
                other.n_elements, self.capacity
            )));
        }
        self.buffer.clear();
        self.buffer.put_slice(other.buffer());
        self.n_elements = other.n_elements;
        Ok(())
    }

    /// Empty the page and reassign it to `column_id`, keeping the allocation
    pub fn reset(&mut self, column_id: ColumnId) {
        self.column_id = column_id;
        self.n_elements = 0;
        self.buffer.clear();
    }

    pub fn column_id(&self) -> ColumnId {
        self.column_id
    }

    pub fn element_size(&self) -> usize {
        self.element_size
    }

    pub fn n_elements(&self) -> usize {
        self.n_elements
    }

    pub fn n_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.n_elements == 0
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Give up the page and keep its allocation
    pub fn into_buffer(self) -> BytesMut {
        self.buffer
    }
}
