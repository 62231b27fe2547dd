//! Row listeners.

use std::sync::Arc;

use parking_lot::Mutex;
use rowflow_core::{Row, Schema};

/// Observer attached to one step copy.
///
/// Callbacks run on the copy's thread, synchronously with the row transfer.
pub trait RowListener: Send + Sync {
    /// A row was taken from an input row set
    fn row_read(&self, _schema: &Arc<Schema>, _row: &Row) {}

    /// A row was emitted on the regular output
    fn row_written(&self, _schema: &Arc<Schema>, _row: &Row) {}

    /// A row was sent to the error output
    fn error_row_written(&self, _schema: &Arc<Schema>, _row: &Row) {}
}

/// Listener that keeps every written row
#[derive(Debug, Default)]
pub struct RowCollector {
    rows: Mutex<Vec<(Arc<Schema>, Row)>>,
    errors: Mutex<Vec<(Arc<Schema>, Row)>>,
}

impl RowCollector {
    /// Create an empty collector
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows written so far
    #[must_use]
    pub fn rows(&self) -> Vec<Row> {
        self.rows.lock().iter().map(|(_, r)| r.clone()).collect()
    }

    /// Schema of the last written row
    #[must_use]
    pub fn schema(&self) -> Option<Arc<Schema>> {
        self.rows.lock().last().map(|(s, _)| Arc::clone(s))
    }

    /// Error rows written so far
    #[must_use]
    pub fn error_rows(&self) -> Vec<Row> {
        self.errors.lock().iter().map(|(_, r)| r.clone()).collect()
    }

    /// Schema of the last error row
    #[must_use]
    pub fn error_schema(&self) -> Option<Arc<Schema>> {
        self.errors.lock().last().map(|(s, _)| Arc::clone(s))
    }
}

impl RowListener for RowCollector {
    fn row_written(&self, schema: &Arc<Schema>, row: &Row) {
        self.rows.lock().push((Arc::clone(schema), row.clone()));
    }

    fn error_row_written(&self, schema: &Arc<Schema>, row: &Row) {
        self.errors.lock().push((Arc::clone(schema), row.clone()));
    }
}
