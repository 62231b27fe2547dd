//! The step execution contract.

use std::sync::Arc;

use parking_lot::RwLock;
use rowflow_core::CopyId;

use crate::context::StepContext;
use crate::error::StepError;
use crate::listener::RowListener;
use crate::metrics::{MetricsSnapshot, StatusCell, StepMetrics, StepStatus};

/// Result of one `process_row` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Call `process_row` again
    Continue,
    /// No more rows will be produced
    Done,
}

/// One copy of a step.
///
/// The trans calls `init` once, then `process_row` repeatedly on the copy's
/// own thread until it returns [`ProcessOutcome::Done`], an error, or the
/// stop flag is set, then `dispose` exactly once.
pub trait Step: Send {
    /// Resolve settings and locate row sets.
    ///
    /// # Errors
    ///
    /// Returns error if the copy cannot run; the whole trans is then
    /// disposed without starting.
    fn init(&mut self, _ctx: &mut StepContext) -> Result<(), StepError> {
        Ok(())
    }

    /// Consume zero or more rows and emit zero or more rows.
    ///
    /// # Errors
    ///
    /// Returns error on an unrecoverable failure, which stops the trans
    fn process_row(&mut self, ctx: &mut StepContext) -> Result<ProcessOutcome, StepError>;

    /// Release private resources. Called even when `init` failed.
    fn dispose(&mut self, _ctx: &mut StepContext) {}
}

/// Shared, read-only view of a running copy
pub struct StepHandle {
    copy_id: CopyId,
    kind: String,
    status: StatusCell,
    outcome: StatusCell,
    metrics: StepMetrics,
    listeners: RwLock<Vec<Arc<dyn RowListener>>>,
}

impl StepHandle {
    pub(crate) fn new(copy_id: CopyId, kind: impl Into<String>) -> Self {
        Self {
            copy_id,
            kind: kind.into(),
            status: StatusCell::new(StepStatus::Created),
            outcome: StatusCell::new(StepStatus::Created),
            metrics: StepMetrics::new(),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Step name and copy number
    #[must_use]
    pub fn copy_id(&self) -> &CopyId {
        &self.copy_id
    }

    /// Step kind
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> StepStatus {
        self.status.get()
    }

    /// How the copy left its row loop, once it has
    #[must_use]
    pub fn outcome(&self) -> Option<StepStatus> {
        match self.outcome.get() {
            StepStatus::Created => None,
            status => Some(status),
        }
    }

    /// Check if the copy is done with its row loop (or never entered it)
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    /// Line counters
    #[must_use]
    pub fn metrics(&self) -> &StepMetrics {
        &self.metrics
    }

    /// Capture the current metrics.
    ///
    /// A disposed copy reports how it left its row loop.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let status = match (self.status(), self.outcome()) {
            (StepStatus::Disposed, Some(outcome)) => outcome,
            (status, _) => status,
        };
        MetricsSnapshot {
            step: self.copy_id.step.clone(),
            copy: self.copy_id.copy,
            kind: self.kind.clone(),
            status,
            lines_read: self.metrics.lines_read(),
            lines_written: self.metrics.lines_written(),
            lines_input: self.metrics.lines_input(),
            lines_output: self.metrics.lines_output(),
            lines_updated: self.metrics.lines_updated(),
            lines_rejected: self.metrics.lines_rejected(),
            errors: self.metrics.errors(),
            elapsed_secs: self.metrics.elapsed().as_secs_f64(),
        }
    }

    pub(crate) fn set_status(&self, status: StepStatus) {
        self.status.set(status);
    }

    pub(crate) fn set_outcome(&self, status: StepStatus) {
        self.outcome.set(status);
        self.status.set(status);
    }

    pub(crate) fn add_listener(&self, listener: Arc<dyn RowListener>) {
        self.listeners.write().push(listener);
    }

    pub(crate) fn listeners(&self) -> Vec<Arc<dyn RowListener>> {
        self.listeners.read().clone()
    }

    pub(crate) fn has_listeners(&self) -> bool {
        !self.listeners.read().is_empty()
    }
}

impl std::fmt::Debug for StepHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepHandle")
            .field("copy_id", &self.copy_id)
            .field("kind", &self.kind)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
