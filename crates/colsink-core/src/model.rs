//! Schema Model
//!
//! The model describes what an application writes: a list of (possibly nested) fields, each
//! backed by zero or more physical columns, plus projected fields that expose existing data
//! under another name without storing it twice.
//!
//! ## Fields and Paths
//! Fields are addressed by dotted paths: a record field `point` with children `x` and `y`
//! has the paths `point`, `point.x` and `point.y`.
//!
//! ## Projected Fields
//! A projected field maps itself and each of its sub-fields to a source path:
//!
//! ```ignore
//! let alias = ProjectedField::new(
//!     Field::leaf("px", "double", ElementKind::Real64),
//!     [("px", "point.x")],
//! );
//! model.add_projected_field(alias)?;
//! ```
//!
//! ## Freezing
//! A frozen model rejects changes. Sinks keep their model replicas frozen and only unfreeze them
//! while replaying a schema changeset.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::element::ElementKind;
use crate::{Error, Result};

/// A named, typed field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    name: String,
    type_name: String,
    columns: Vec<ElementKind>,
    children: Vec<Field>,
}

impl Field {
    /// A field backed by a single physical column
    pub fn leaf(name: impl Into<String>, type_name: impl Into<String>, kind: ElementKind) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            columns: vec![kind],
            children: Vec::new(),
        }
    }

    /// A field without columns of its own, e.g. a record with sub-fields
    pub fn record(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            columns: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_column(mut self, kind: ElementKind) -> Self {
        self.columns.push(kind);
        self
    }

    pub fn with_child(mut self, child: Field) -> Self {
        self.children.push(child);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn columns(&self) -> &[ElementKind] {
        &self.columns
    }

    pub fn children(&self) -> &[Field] {
        &self.children
    }

    /// Depth-first walk yielding `(path, field)`, starting with this field
    pub fn walk(&self) -> Vec<(String, &Field)> {
        let mut out = Vec::new();
        self.walk_into(self.name.clone(), &mut out);
        out
    }

    fn walk_into<'a>(&'a self, path: String, out: &mut Vec<(String, &'a Field)>) {
        out.push((path.clone(), self));
        for child in &self.children {
            child.walk_into(format!("{}.{}", path, child.name), out);
        }
    }

    /// Physical columns of this field and all of its sub-fields
    pub fn physical_column_count(&self) -> usize {
        self.walk().iter().map(|(_, f)| f.columns.len()).sum()
    }

    fn find(&self, mut parts: std::str::Split<'_, char>) -> Option<&Field> {
        match parts.next() {
            None => Some(self),
            Some(name) => self
                .children
                .iter()
                .find(|c| c.name == name)
                .and_then(|c| c.find(parts)),
        }
    }
}

/// A field that aliases existing fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectedField {
    field: Field,

    /// Projected path -> source path, one entry per path of `field`
    sources: BTreeMap<String, String>,
}

impl ProjectedField {
    pub fn new<K, V>(field: Field, sources: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            field,
            sources: sources
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn field(&self) -> &Field {
        &self.field
    }

    pub fn sources(&self) -> &BTreeMap<String, String> {
        &self.sources
    }

    pub fn source_of(&self, projected_path: &str) -> Option<&str> {
        self.sources.get(projected_path).map(String::as_str)
    }
}

/// The schema of a table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    fields: Vec<Field>,
    projected_fields: Vec<ProjectedField>,
    frozen: bool,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, field: Field) -> Result<Self> {
        self.add_field(field)?;
        Ok(self)
    }

    pub fn add_field(&mut self, field: Field) -> Result<()> {
        self.ensure_unfrozen()?;
        self.ensure_unique(field.name())?;
        self.fields.push(field);
        Ok(())
    }

    pub fn add_projected_field(&mut self, projected: ProjectedField) -> Result<()> {
        self.ensure_unfrozen()?;
        self.ensure_unique(projected.field.name())?;

        for (path, _) in projected.field.walk() {
            let source = projected.source_of(&path).ok_or_else(|| {
                Error::Schema(format!("projected field '{}' has no source", path))
            })?;
            if self.find_path(source).is_none() {
                return Err(Error::Schema(format!(
                    "source field '{}' of projection '{}' does not exist",
                    source, path
                )));
            }
        }

        self.projected_fields.push(projected);
        Ok(())
    }

    /// Add every field and projected field of `changeset`.
    ///
    /// All or nothing: if any addition is rejected the model is left as it was.
    pub fn apply(&mut self, changeset: &ModelChangeset) -> Result<()> {
        let mut staged = self.clone();
        for field in &changeset.added_fields {
            staged.add_field(field.clone())?;
        }
        for projected in &changeset.added_projected_fields {
            staged.add_projected_field(projected.clone())?;
        }
        *self = staged;
        Ok(())
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn unfreeze(&mut self) {
        self.frozen = false;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn projected_fields(&self) -> &[ProjectedField] {
        &self.projected_fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Resolve a dotted path among the regular (non-projected) fields
    pub fn find_path(&self, path: &str) -> Option<&Field> {
        let mut parts = path.split('.');
        let top = parts.next()?;
        self.field(top).and_then(|f| f.find(parts))
    }

    /// Source path of a projected path, searching all projected fields
    pub fn source_of(&self, projected_path: &str) -> Option<&str> {
        self.projected_fields
            .iter()
            .find_map(|p| p.source_of(projected_path))
    }

    pub fn physical_column_count(&self) -> usize {
        self.fields.iter().map(Field::physical_column_count).sum()
    }

    fn ensure_unfrozen(&self) -> Result<()> {
        if self.frozen {
            return Err(Error::Schema("model is frozen".to_string()));
        }
        Ok(())
    }

    fn ensure_unique(&self, name: &str) -> Result<()> {
        let taken = self.fields.iter().any(|f| f.name == name)
            || self.projected_fields.iter().any(|p| p.field.name == name);
        if taken {
            return Err(Error::Schema(format!("field '{}' already exists", name)));
        }
        Ok(())
    }
}

/// Fields added to a model since the last schema update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelChangeset {
    pub added_fields: Vec<Field>,
    pub added_projected_fields: Vec<ProjectedField>,
}

impl ModelChangeset {
    pub fn new() -> Self {
        Self::default()
    }

    /// A changeset that adds the whole model
    pub fn from_model(model: &Model) -> Self {
        Self {
            added_fields: model.fields.clone(),
            added_projected_fields: model.projected_fields.clone(),
        }
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.added_fields.push(field);
        self
    }

    pub fn with_projected_field(mut self, projected: ProjectedField) -> Self {
        self.added_projected_fields.push(projected);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.added_fields.is_empty() && self.added_projected_fields.is_empty()
    }
}
