//! Core error types for rowflow.

use crate::value::ValueType;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Validation error
    #[error("Validation failed for {field}: {reason}")]
    Validation {
        /// Offending field or setting
        field: String,
        /// What is wrong with it
        reason: String,
    },

    /// Not found
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of entity looked up
        kind: String,
        /// Identifier used for the lookup
        id: String,
    },

    /// Already exists
    #[error("{kind} already exists: {id}")]
    AlreadyExists {
        /// Kind of entity
        kind: String,
        /// Conflicting identifier
        id: String,
    },

    /// Text could not be converted to the requested type
    #[error("Cannot convert '{text}' to {target:?}")]
    Conversion {
        /// Source text
        text: String,
        /// Requested type
        target: ValueType,
    },

    /// Row is shorter than the schema describing it
    #[error("Row has {row_len} values but schema has {schema_len} fields")]
    RowTooShort {
        /// Number of values in the row
        row_len: usize,
        /// Number of fields in the schema
        schema_len: usize,
    },
}
