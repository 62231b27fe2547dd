//! Positional rows.

use serde::{Deserialize, Serialize};
use std::ops::Index;

use crate::value::Value;

/// A positionally indexed tuple of values.
///
/// A row may be longer than the schema describing it; steps that add a
/// field grow the row to the new schema size before writing the trailing
/// value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row(Vec<Value>);

impl Row {
    /// Create a row from values
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Create a row of `size` nulls
    #[must_use]
    pub fn nulls(size: usize) -> Self {
        Self(vec![Value::Null; size])
    }

    /// Pad with nulls up to `size` values; never shrinks
    pub fn grow_to(&mut self, size: usize) {
        if self.0.len() < size {
            self.0.resize(size, Value::Null);
        }
    }

    /// Write a value, growing the row if the index is past its end
    pub fn set(&mut self, index: usize, value: Value) {
        self.grow_to(index + 1);
        self.0[index] = value;
    }

    /// Value at a position
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// All values
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Take the values out
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.0
    }

    /// Number of values
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check for an empty row
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Index<usize> for Row {
    type Output = Value;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}
