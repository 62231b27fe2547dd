//! Row schemas: ordered field descriptors.
//!
//! Field order is significant: the position of a field in the schema is the
//! index of its value in every row described by that schema.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::row::Row;
use crate::value::ValueType;

/// Descriptor of one field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldMeta {
    /// Field name, unique within a schema
    pub name: String,
    /// Declared type
    pub value_type: ValueType,
    /// Optional length (characters for text, digits for numbers)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    /// Optional precision (decimals for numbers)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
}

impl FieldMeta {
    /// Create a field without length or precision
    #[must_use]
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            length: None,
            precision: None,
        }
    }

    /// Set the length
    #[must_use]
    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    /// Set the precision
    #[must_use]
    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }
}

/// Ordered list of field descriptors
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<FieldMeta>,
}

impl Schema {
    /// Create an empty schema
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a schema from a list of fields
    ///
    /// # Errors
    ///
    /// Returns error if two fields share a name
    pub fn from_fields(fields: impl IntoIterator<Item = FieldMeta>) -> CoreResult<Self> {
        let mut schema = Self::new();
        for field in fields {
            schema.add_field(field)?;
        }
        Ok(schema)
    }

    /// Append a field at the end
    ///
    /// # Errors
    ///
    /// Returns error if a field with the same name exists
    pub fn add_field(&mut self, field: FieldMeta) -> CoreResult<()> {
        if self.index_of(&field.name).is_some() {
            return Err(CoreError::AlreadyExists {
                kind: "Field".to_string(),
                id: field.name,
            });
        }
        self.fields.push(field);
        Ok(())
    }

    /// Copy of this schema with one more trailing field
    ///
    /// # Errors
    ///
    /// Returns error if a field with the same name exists
    pub fn appended(&self, field: FieldMeta) -> CoreResult<Self> {
        let mut schema = self.clone();
        schema.add_field(field)?;
        Ok(schema)
    }

    /// Position of the named field
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Position of the named field, as an error when absent
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if no field has that name
    pub fn require_index(&self, name: &str) -> CoreResult<usize> {
        self.index_of(name).ok_or_else(|| CoreError::NotFound {
            kind: "Field".to_string(),
            id: name.to_string(),
        })
    }

    /// Field at a position
    #[must_use]
    pub fn field(&self, index: usize) -> Option<&FieldMeta> {
        self.fields.get(index)
    }

    /// All fields in order
    #[must_use]
    pub fn fields(&self) -> &[FieldMeta] {
        &self.fields
    }

    /// Field names in order
    #[must_use]
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Number of fields
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if the schema has no fields
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Same field count and the same type at every position.
    ///
    /// Names, lengths and precisions are not compared.
    #[must_use]
    pub fn is_compatible_with(&self, other: &Self) -> bool {
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(&other.fields)
                .all(|(a, b)| a.value_type == b.value_type)
    }

    /// Check that a row is long enough to be described by this schema
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RowTooShort`] otherwise
    pub fn check_row(&self, row: &Row) -> CoreResult<()> {
        if row.len() < self.len() {
            return Err(CoreError::RowTooShort {
                row_len: row.len(),
                schema_len: self.len(),
            });
        }
        Ok(())
    }
}
