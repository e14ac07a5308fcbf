//! Schema Descriptor
//!
//! The descriptor is the sink-side view of a model: it turns fields into physical columns and
//! hands out the `ColumnHandle`s callers commit pages against.
//!
//! ## Column Numbering
//! Physical column ids are assigned densely, depth-first in field order, as changesets are
//! applied. Projected fields never get physical columns; each of their columns becomes an
//! alias of the corresponding source column.
//!
//! Ids are never reused, so two sinks applying the same sequence of changesets agree on every
//! column id.

use serde::{Deserialize, Serialize};

use crate::column::{ColumnHandle, ColumnId};
use crate::element::ColumnElement;
use crate::model::{Field, ModelChangeset, ProjectedField};
use crate::{Error, Result};

/// A physical column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub physical_id: ColumnId,
    pub field_path: String,
    pub element: ColumnElement,
    /// Position among the columns of the same field
    pub index: u32,
}

impl ColumnDescriptor {
    pub fn handle(&self) -> ColumnHandle {
        ColumnHandle {
            physical_id: self.physical_id,
            element: self.element,
        }
    }
}

/// A column of a projected field, resolved to the physical column it reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasColumnDescriptor {
    pub field_path: String,
    pub physical_id: ColumnId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    columns: Vec<ColumnDescriptor>,
    alias_columns: Vec<AliasColumnDescriptor>,
    field_paths: Vec<String>,
}

impl SchemaDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the fields of `changeset`; returns handles of the new physical columns.
    ///
    /// A rejected changeset leaves the descriptor untouched, so no column id is consumed.
    pub fn apply(&mut self, changeset: &ModelChangeset) -> Result<Vec<ColumnHandle>> {
        let mut staged = self.clone();
        let mut added = Vec::new();
        for field in &changeset.added_fields {
            staged.add_field(field, &mut added)?;
        }
        for projected in &changeset.added_projected_fields {
            staged.add_projected_field(projected)?;
        }
        *self = staged;
        Ok(added)
    }

    fn add_field(&mut self, field: &Field, added: &mut Vec<ColumnHandle>) -> Result<()> {
        for (path, f) in field.walk() {
            self.register_path(&path)?;
            for (index, &kind) in f.columns().iter().enumerate() {
                let column = ColumnDescriptor {
                    physical_id: self.columns.len() as ColumnId,
                    field_path: path.clone(),
                    element: ColumnElement::new(kind),
                    index: index as u32,
                };
                added.push(column.handle());
                self.columns.push(column);
            }
        }
        Ok(())
    }

    fn add_projected_field(&mut self, projected: &ProjectedField) -> Result<()> {
        for (path, f) in projected.field().walk() {
            let source = projected.source_of(&path).ok_or_else(|| {
                Error::Schema(format!("projected field '{}' has no source", path))
            })?;
            let source_columns: Vec<ColumnId> = self
                .columns
                .iter()
                .filter(|c| c.field_path == source)
                .map(|c| c.physical_id)
                .collect();
            if source_columns.len() != f.columns().len() {
                return Err(Error::Schema(format!(
                    "projection '{}' has {} columns but source '{}' has {}",
                    path,
                    f.columns().len(),
                    source,
                    source_columns.len()
                )));
            }

            self.register_path(&path)?;
            self.alias_columns
                .extend(source_columns.into_iter().map(|physical_id| AliasColumnDescriptor {
                    field_path: path.clone(),
                    physical_id,
                }));
        }
        Ok(())
    }

    fn register_path(&mut self, path: &str) -> Result<()> {
        if self.field_paths.iter().any(|p| p == path) {
            return Err(Error::Schema(format!("field '{}' already registered", path)));
        }
        self.field_paths.push(path.to_string());
        Ok(())
    }

    pub fn n_physical_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn n_alias_columns(&self) -> usize {
        self.alias_columns.len()
    }

    pub fn column(&self, id: ColumnId) -> Option<&ColumnDescriptor> {
        self.columns.get(id as usize)
    }

    pub fn handle(&self, id: ColumnId) -> Option<ColumnHandle> {
        self.column(id).map(ColumnDescriptor::handle)
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn alias_columns(&self) -> &[AliasColumnDescriptor] {
        &self.alias_columns
    }

    pub fn field_paths(&self) -> &[String] {
        &self.field_paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementKind;

    fn changeset() -> ModelChangeset {
        ModelChangeset::new()
            .with_field(Field::leaf("id", "u64", ElementKind::Index64))
            .with_field(
                Field::record("point", "Point")
                    .with_child(Field::leaf("x", "double", ElementKind::Real64))
                    .with_child(Field::leaf("y", "double", ElementKind::Real64)),
            )
    }

    #[test]
    fn test_physical_ids_assigned_depth_first() {
        let mut descriptor = SchemaDescriptor::new();
        let handles = descriptor.apply(&changeset()).unwrap();

        assert_eq!(handles.len(), 3);
        assert_eq!(descriptor.n_physical_columns(), 3);
        assert_eq!(descriptor.column(0).unwrap().field_path, "id");
        assert_eq!(descriptor.column(1).unwrap().field_path, "point.x");
        assert_eq!(descriptor.column(2).unwrap().field_path, "point.y");
        assert_eq!(
            descriptor.handle(2).unwrap().element.kind(),
            ElementKind::Real64
        );
        assert!(descriptor.handle(3).is_none());
    }

    #[test]
    fn test_incremental_apply_appends_ids() {
        let mut descriptor = SchemaDescriptor::new();
        descriptor.apply(&changeset()).unwrap();

        let more = ModelChangeset::new().with_field(Field::leaf("flag", "bool", ElementKind::Bit));
        let handles = descriptor.apply(&more).unwrap();
        assert_eq!(handles, vec![ColumnHandle::new(3, ElementKind::Bit)]);
        assert_eq!(descriptor.n_physical_columns(), 4);
    }

    #[test]
    fn test_projected_fields_only_add_aliases() {
        let mut descriptor = SchemaDescriptor::new();
        descriptor.apply(&changeset()).unwrap();

        let projection = ModelChangeset::new().with_projected_field(ProjectedField::new(
            Field::leaf("px", "double", ElementKind::Real64),
            [("px", "point.x")],
        ));
        let handles = descriptor.apply(&projection).unwrap();

        assert!(handles.is_empty());
        assert_eq!(descriptor.n_physical_columns(), 3);
        assert_eq!(descriptor.n_alias_columns(), 1);
        assert_eq!(descriptor.alias_columns()[0].physical_id, 1);
    }

    #[test]
    fn test_duplicate_paths_rejected() {
        let mut descriptor = SchemaDescriptor::new();
        descriptor.apply(&changeset()).unwrap();
        let err = descriptor.apply(&changeset()).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn test_rejected_changeset_consumes_no_ids() {
        let mut descriptor = SchemaDescriptor::new();
        descriptor.apply(&changeset()).unwrap();
        let before = descriptor.clone();

        let partly_bad = ModelChangeset::new()
            .with_field(Field::leaf("charge", "int", ElementKind::Int8))
            .with_field(Field::leaf("id", "u64", ElementKind::Index64));
        assert!(descriptor.apply(&partly_bad).is_err());
        assert_eq!(descriptor, before);

        let flag = ModelChangeset::new().with_field(Field::leaf("flag", "bool", ElementKind::Bit));
        let handles = descriptor.apply(&flag).unwrap();
        assert_eq!(handles, vec![ColumnHandle::new(3, ElementKind::Bit)]);
        assert_eq!(descriptor.column(3).unwrap().field_path, "flag");
    }

    #[test]
    fn test_projection_column_count_must_match() {
        let mut descriptor = SchemaDescriptor::new();
        descriptor.apply(&changeset()).unwrap();

        let bad = ModelChangeset::new().with_projected_field(ProjectedField::new(
            Field::leaf("p", "double", ElementKind::Real64),
            [("p", "point")],
        ));
        assert!(descriptor.apply(&bad).is_err());
    }
}
