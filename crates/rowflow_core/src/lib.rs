//! rowflow Core Types
//!
//! Pure data model for the dataflow engine: typed values, ordered schemas,
//! positional rows and the variable space used to resolve step settings.
//! Nothing in this crate performs I/O or spawns threads.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod id;
pub mod row;
pub mod schema;
pub mod value;
pub mod variables;

// Re-exports
pub use error::{CoreError, CoreResult};
pub use id::{CopyId, RunId};
pub use row::Row;
pub use schema::{FieldMeta, Schema};
pub use value::{Value, ValueType};
pub use variables::VariableSpace;
