//! Buffered Columns
//!
//! A `BufferedColumn` queues the pages committed to one physical column until the next cluster
//! commit. Each queued page is wrapped in a `ZipItem`, which optionally carries the result of
//! sealing that page in the background.
//!
//! ## Ownership Between the Column and a Sealing Task
//!
//! The column owns its items for their whole life. A sealing task never borrows an item; it
//! receives owned pieces instead:
//!
//! - the page, as a clone of the item's `Arc<Page>` (read-only)
//! - the scratch buffer, moved out of the item (written by that task alone)
//! - a clone of the item's `SealedPageSlot` (filled exactly once)
//!
//! Growing the queue therefore never invalidates anything a task holds. Once the scheduler's
//! barrier has passed, every task has dropped its page clone and the column can hand its pages
//! back with `ZipItem::into_page`.
//!
//! ## Sealed Page Registry
//!
//! Alongside the queue the column keeps the slots it registered, in submission order. After a
//! barrier it is the ordered list of sealed pages a batched commit writes.

use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};

use bytes::BytesMut;
use colsink_core::{ColumnHandle, ColumnId, Page, SealedPage};

use crate::error::{Error, Result};

/// Outcome of one sealing task; failures carry a printable reason
pub type SealResult = std::result::Result<SealedPage, String>;

/// Write-once cell receiving the result of one sealing task
#[derive(Debug, Clone, Default)]
pub struct SealedPageSlot(Arc<OnceLock<SealResult>>);

impl SealedPageSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the task's result. Returns false if the slot was already filled.
    pub fn fill(&self, result: SealResult) -> bool {
        self.0.set(result).is_ok()
    }

    pub fn get(&self) -> Option<&SealResult> {
        self.0.get()
    }

    pub fn is_filled(&self) -> bool {
        self.0.get().is_some()
    }

    pub fn sealed_page(&self) -> Option<&SealedPage> {
        match self.0.get() {
            Some(Ok(sealed)) => Some(sealed),
            _ => None,
        }
    }
}

/// A buffered page plus its sealing state
#[derive(Debug)]
pub struct ZipItem {
    page: Arc<Page>,
    scratch: Option<BytesMut>,
    slot: Option<SealedPageSlot>,
}

impl ZipItem {
    fn new(page: Page) -> Self {
        Self {
            page: Arc::new(page),
            scratch: None,
            slot: None,
        }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// A read-only handle on the page for a sealing task
    pub fn shared_page(&self) -> Arc<Page> {
        Arc::clone(&self.page)
    }

    /// Allocate this item's private scratch buffer with at least `n_bytes` capacity.
    ///
    /// The buffer is allocated on first use only.
    pub fn allocate_sealed_page_buf(&mut self, n_bytes: usize) -> &mut BytesMut {
        let scratch = self
            .scratch
            .get_or_insert_with(|| BytesMut::with_capacity(n_bytes));
        if scratch.capacity() < n_bytes {
            scratch.reserve(n_bytes - scratch.len());
        }
        scratch
    }

    /// Move the scratch buffer out, e.g. into the task that seals this item
    pub fn take_sealed_page_buf(&mut self) -> Option<BytesMut> {
        self.scratch.take()
    }

    pub fn has_sealed_page_buf(&self) -> bool {
        self.scratch.is_some()
    }

    pub fn slot(&self) -> Option<&SealedPageSlot> {
        self.slot.as_ref()
    }

    /// True once a sealing task stored a sealed page for this item
    pub fn is_sealed(&self) -> bool {
        self.sealed_page().is_some()
    }

    pub fn sealed_page(&self) -> Option<&SealedPage> {
        self.slot.as_ref().and_then(SealedPageSlot::sealed_page)
    }

    /// Take the page back. Fails if a sealing task still holds it.
    pub fn into_page(self) -> Result<Page> {
        let column_id = self.page.column_id();
        Arc::try_unwrap(self.page).map_err(|_| {
            Error::InvariantViolation(format!(
                "page of column {} is still referenced by a sealing task",
                column_id
            ))
        })
    }
}

/// Sealing state of a whole column, valid after the scheduler's barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealingStatus {
    /// Nothing buffered
    Empty,
    /// Every buffered page has a sealed counterpart
    AllSealed,
    /// At least one buffered page was not sealed
    Unsealed,
}

/// Everything drained out of a column, in commit order
#[derive(Debug, Default)]
pub struct DrainedPages {
    pub items: Vec<ZipItem>,
    pub sealed: Vec<SealedPageSlot>,
}

impl DrainedPages {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Pages of one physical column waiting for the next cluster commit
#[derive(Debug)]
pub struct BufferedColumn {
    handle: ColumnHandle,
    items: VecDeque<ZipItem>,
    sealed: Vec<SealedPageSlot>,
}

impl BufferedColumn {
    pub fn new(handle: ColumnHandle) -> Self {
        Self {
            handle,
            items: VecDeque::new(),
            sealed: Vec::new(),
        }
    }

    pub fn handle(&self) -> &ColumnHandle {
        &self.handle
    }

    pub fn column_id(&self) -> ColumnId {
        self.handle.physical_id
    }

    /// Append `page` at the tail of the queue
    pub fn buffer_page(&mut self, page: Page) -> &mut ZipItem {
        self.items.push_back(ZipItem::new(page));
        // Just pushed
        let last = self.items.len() - 1;
        &mut self.items[last]
    }

    /// Reserve a result slot for the most recently buffered page.
    ///
    /// Must be called before the page's sealing task is submitted.
    pub fn register_sealed_page(&mut self) -> Result<SealedPageSlot> {
        let column_id = self.column_id();
        let tail = self.items.back_mut().ok_or_else(|| {
            Error::InvariantViolation(format!(
                "no buffered page to seal in column {}",
                column_id
            ))
        })?;
        if tail.slot.is_some() {
            return Err(Error::InvariantViolation(format!(
                "last page of column {} already has a sealed page slot",
                column_id
            )));
        }

        let slot = SealedPageSlot::new();
        tail.slot = Some(slot.clone());
        self.sealed.push(slot.clone());
        Ok(slot)
    }

    /// True if every buffered page is sealed; vacuously true when nothing is buffered
    pub fn has_sealed_pages_only(&self) -> bool {
        self.items.iter().all(ZipItem::is_sealed)
    }

    /// Classify the column, failing if any registered sealing task failed or never ran
    pub fn sealing_status(&self) -> Result<SealingStatus> {
        if self.items.is_empty() {
            return Ok(SealingStatus::Empty);
        }
        for slot in &self.sealed {
            match slot.get() {
                Some(Ok(_)) => {}
                Some(Err(reason)) => {
                    return Err(Error::TaskFailed {
                        column_id: self.column_id(),
                        reason: reason.clone(),
                    });
                }
                None => {
                    return Err(Error::TaskFailed {
                        column_id: self.column_id(),
                        reason: "sealing task did not complete".to_string(),
                    });
                }
            }
        }
        if self.has_sealed_pages_only() {
            Ok(SealingStatus::AllSealed)
        } else {
            Ok(SealingStatus::Unsealed)
        }
    }

    /// Sealed pages in submission order, skipping slots that hold no page
    pub fn sealed_pages(&self) -> Vec<SealedPage> {
        self.sealed
            .iter()
            .filter_map(|slot| slot.sealed_page().cloned())
            .collect()
    }

    /// Empty the queue and the registry
    pub fn drain_buffered_pages(&mut self) -> DrainedPages {
        DrainedPages {
            items: self.items.drain(..).collect(),
            sealed: std::mem::take(&mut self.sealed),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ZipItem> {
        self.items.iter()
    }

    /// Uncompressed bytes buffered in this column
    pub fn buffered_bytes(&self) -> usize {
        self.items.iter().map(|item| item.page.n_bytes()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colsink_core::{seal_page, Compression, ElementKind};

    fn column() -> BufferedColumn {
        BufferedColumn::new(ColumnHandle::new(7, ElementKind::Byte))
    }

    fn page(bytes: &[u8]) -> Page {
        Page::from_bytes(7, 1, bytes).unwrap()
    }

    fn seal_item(column: &mut BufferedColumn) {
        let element = column.handle().element;
        let item = column.items.back_mut().unwrap();
        item.allocate_sealed_page_buf(64);
        let scratch = item.take_sealed_page_buf().unwrap();
        let page = item.shared_page();

        let slot = column.register_sealed_page().unwrap();
        let sealed = seal_page(&page, &element, Compression::None, scratch).unwrap();
        assert!(slot.fill(Ok(sealed)));
    }

    #[test]
    fn test_buffer_page_preserves_order() {
        let mut column = column();
        column.buffer_page(page(b"a"));
        column.buffer_page(page(b"bb"));
        column.buffer_page(page(b"ccc"));

        let buffered: Vec<&[u8]> = column.iter().map(|i| i.page().buffer()).collect();
        assert_eq!(buffered, vec![&b"a"[..], &b"bb"[..], &b"ccc"[..]]);
        assert_eq!(column.len(), 3);
        assert_eq!(column.buffered_bytes(), 6);
    }

    #[test]
    fn test_new_item_is_unsealed() {
        let mut column = column();
        let item = column.buffer_page(page(b"xyz"));
        assert!(!item.is_sealed());
        assert!(item.sealed_page().is_none());
        assert!(!item.has_sealed_page_buf());
        assert!(!column.has_sealed_pages_only());
    }

    #[test]
    fn test_empty_column_has_sealed_pages_only() {
        let column = column();
        assert!(column.has_sealed_pages_only());
        assert_eq!(column.sealing_status().unwrap(), SealingStatus::Empty);
    }

    // ---------------------------------------------------------------
    // Scratch buffers
    // ---------------------------------------------------------------

    #[test]
    fn test_scratch_buffer_allocated_once_and_moved() {
        let mut column = column();
        let item = column.buffer_page(page(b"abcd"));

        item.allocate_sealed_page_buf(16);
        let ptr = item.allocate_sealed_page_buf(8).as_ptr();
        assert!(item.has_sealed_page_buf());

        let taken = item.take_sealed_page_buf().unwrap();
        assert_eq!(taken.as_ptr(), ptr);
        assert!(taken.capacity() >= 16);
        assert!(item.take_sealed_page_buf().is_none());
    }

    // ---------------------------------------------------------------
    // Sealed page registry
    // ---------------------------------------------------------------

    #[test]
    fn test_register_requires_buffered_page() {
        let mut column = column();
        assert!(matches!(
            column.register_sealed_page(),
            Err(Error::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_register_twice_for_same_item_fails() {
        let mut column = column();
        column.buffer_page(page(b"a"));
        column.register_sealed_page().unwrap();
        assert!(column.register_sealed_page().is_err());
    }

    #[test]
    fn test_all_sealed_column() {
        let mut column = column();
        for bytes in [&b"one"[..], b"two", b"three"] {
            column.buffer_page(page(bytes));
            seal_item(&mut column);
        }

        assert!(column.has_sealed_pages_only());
        assert_eq!(column.sealing_status().unwrap(), SealingStatus::AllSealed);

        let sealed: Vec<Vec<u8>> = column
            .sealed_pages()
            .iter()
            .map(|s| s.buffer().to_vec())
            .collect();
        assert_eq!(sealed, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
    }

    #[test]
    fn test_partially_sealed_column() {
        let mut column = column();
        column.buffer_page(page(b"one"));
        seal_item(&mut column);
        column.buffer_page(page(b"two"));

        assert!(!column.has_sealed_pages_only());
        assert_eq!(column.sealing_status().unwrap(), SealingStatus::Unsealed);
    }

    #[test]
    fn test_failed_task_reported() {
        let mut column = column();
        column.buffer_page(page(b"one"));
        let slot = column.register_sealed_page().unwrap();
        slot.fill(Err("codec exploded".to_string()));

        match column.sealing_status() {
            Err(Error::TaskFailed { column_id, reason }) => {
                assert_eq!(column_id, 7);
                assert_eq!(reason, "codec exploded");
            }
            other => panic!("unexpected status: {:?}", other),
        }
    }

    #[test]
    fn test_unfilled_slot_reported_as_failure() {
        let mut column = column();
        column.buffer_page(page(b"one"));
        column.register_sealed_page().unwrap();
        assert!(matches!(
            column.sealing_status(),
            Err(Error::TaskFailed { .. })
        ));
    }

    #[test]
    fn test_slot_is_write_once() {
        let slot = SealedPageSlot::new();
        assert!(!slot.is_filled());
        assert!(slot.fill(Err("first".to_string())));
        assert!(!slot.fill(Err("second".to_string())));
        assert_eq!(slot.get(), Some(&Err("first".to_string())));
    }

    // ---------------------------------------------------------------
    // Draining
    // ---------------------------------------------------------------

    #[test]
    fn test_drain_empties_queue_and_registry() {
        let mut column = column();
        column.buffer_page(page(b"one"));
        seal_item(&mut column);
        column.buffer_page(page(b"two"));

        let drained = column.drain_buffered_pages();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained.sealed.len(), 1);
        assert!(drained.items[0].is_sealed());
        assert!(!drained.items[1].is_sealed());

        assert!(column.is_empty());
        assert!(column.sealed_pages().is_empty());
    }

    #[test]
    fn test_drain_is_idempotent() {
        let mut column = column();
        column.buffer_page(page(b"one"));
        column.drain_buffered_pages();

        let again = column.drain_buffered_pages();
        assert!(again.is_empty());
        assert!(again.sealed.is_empty());
    }

    #[test]
    fn test_into_page_fails_while_shared() {
        let mut column = column();
        let held = column.buffer_page(page(b"shared")).shared_page();

        let item = column.drain_buffered_pages().items.pop().unwrap();
        assert!(matches!(item.into_page(), Err(Error::InvariantViolation(_))));
        drop(held);
    }

    #[test]
    fn test_into_page_after_release() {
        let mut column = column();
        let held = column.buffer_page(page(b"free")).shared_page();
        drop(held);

        let item = column.drain_buffered_pages().items.pop().unwrap();
        assert_eq!(item.into_page().unwrap().buffer(), b"free");
    }
}
