//! Physical column identity.

use serde::{Deserialize, Serialize};

use crate::element::{ColumnElement, ElementKind};

/// Physical column id. Dense, assigned in schema order, never reused or renumbered.
pub type ColumnId = u64;

/// Identifies a physical column and carries its element descriptor.
///
/// Handles are handed out by the schema descriptor and stay valid for the whole write
/// session: schema evolution only appends columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnHandle {
    pub physical_id: ColumnId,
    pub element: ColumnElement,
}

impl ColumnHandle {
    pub fn new(physical_id: ColumnId, kind: ElementKind) -> Self {
        Self {
            physical_id,
            element: ColumnElement::new(kind),
        }
    }

    /// Bytes per element in an in-memory page of this column
    pub fn element_size(&self) -> usize {
        self.element.memory_size()
    }
}
