//! colsink core types
//!
//! The leaf data model shared by every page sink: columns, elements, pages, sealed pages,
//! locators and the schema model.

pub mod column;
pub mod compression;
pub mod descriptor;
pub mod element;
pub mod error;
pub mod locator;
pub mod model;
pub mod page;
pub mod sealed;
pub mod varint;

pub use column::{ColumnHandle, ColumnId};
pub use compression::Compression;
pub use descriptor::{ColumnDescriptor, SchemaDescriptor};
pub use element::{ColumnElement, ElementKind};
pub use error::{Error, Result};
pub use locator::Locator;
pub use model::{Field, Model, ModelChangeset, ProjectedField};
pub use page::Page;
pub use sealed::{seal_page, unseal_page, SealedPage};
