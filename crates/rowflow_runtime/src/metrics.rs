//! Per-copy status and line counters.
//!
//! Every field is an atomic so that other threads (the trans, the status
//! aggregator step, a host UI) can read a running copy without locking it.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Lifecycle state of a step copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum StepStatus {
    /// Constructed, not initialized
    Created = 0,
    /// `init` succeeded
    Initialized = 1,
    /// Thread is in its row loop
    Running = 2,
    /// Left the loop after `Done`
    Finished = 3,
    /// Left the loop after a fatal error or failed `init`
    Failed = 4,
    /// Left the loop because the stop flag was set
    Stopped = 5,
    /// Resources released
    Disposed = 6,
}

impl StepStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Initialized,
            2 => Self::Running,
            3 => Self::Finished,
            4 => Self::Failed,
            5 => Self::Stopped,
            _ => Self::Disposed,
        }
    }

    /// Check if the copy has left (or never entered) its row loop for good
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Finished | Self::Failed | Self::Stopped | Self::Disposed
        )
    }

    /// Display name
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Initialized => "Initialized",
            Self::Running => "Running",
            Self::Finished => "Finished",
            Self::Failed => "Failed",
            Self::Stopped => "Stopped",
            Self::Disposed => "Disposed",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Atomically readable [`StepStatus`]
#[derive(Debug)]
pub struct StatusCell(AtomicU8);

impl StatusCell {
    /// Create a cell holding `status`
    #[must_use]
    pub const fn new(status: StepStatus) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    /// Current status
    #[must_use]
    pub fn get(&self) -> StepStatus {
        StepStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Publish a new status
    pub fn set(&self, status: StepStatus) {
        self.0.store(status as u8, Ordering::Release);
    }
}

const UNSET: u64 = u64::MAX;

/// Line counters and timing of one copy
#[derive(Debug)]
pub struct StepMetrics {
    lines_read: AtomicU64,
    lines_written: AtomicU64,
    lines_input: AtomicU64,
    lines_output: AtomicU64,
    lines_updated: AtomicU64,
    lines_rejected: AtomicU64,
    errors: AtomicU64,
    base: Instant,
    started_nanos: AtomicU64,
    stopped_nanos: AtomicU64,
}

impl StepMetrics {
    /// Create zeroed metrics
    #[must_use]
    pub fn new() -> Self {
        Self {
            lines_read: AtomicU64::new(0),
            lines_written: AtomicU64::new(0),
            lines_input: AtomicU64::new(0),
            lines_output: AtomicU64::new(0),
            lines_updated: AtomicU64::new(0),
            lines_rejected: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            base: Instant::now(),
            started_nanos: AtomicU64::new(UNSET),
            stopped_nanos: AtomicU64::new(UNSET),
        }
    }

    /// Record a row taken from a row set
    pub fn record_read(&self) {
        self.lines_read.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a row put on a row set
    pub fn record_written(&self) {
        self.lines_written.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a row read from an external source
    pub fn record_input(&self) {
        self.lines_input.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a row written to an external target
    pub fn record_output(&self) {
        self.lines_output.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a row updated in an external target
    pub fn record_updated(&self) {
        self.lines_updated.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a row sent to the error hop
    pub fn record_rejected(&self) {
        self.lines_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a fatal error
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark the start of the row loop
    pub fn mark_started(&self) {
        self.started_nanos
            .store(self.nanos_since_base(), Ordering::Release);
    }

    /// Mark the end of the row loop
    pub fn mark_stopped(&self) {
        self.stopped_nanos
            .store(self.nanos_since_base(), Ordering::Release);
    }

    fn nanos_since_base(&self) -> u64 {
        u64::try_from(self.base.elapsed().as_nanos()).unwrap_or(UNSET - 1)
    }

    /// Rows read from row sets
    #[must_use]
    pub fn lines_read(&self) -> u64 {
        self.lines_read.load(Ordering::Relaxed)
    }

    /// Rows written to row sets
    #[must_use]
    pub fn lines_written(&self) -> u64 {
        self.lines_written.load(Ordering::Relaxed)
    }

    /// Rows read from external sources
    #[must_use]
    pub fn lines_input(&self) -> u64 {
        self.lines_input.load(Ordering::Relaxed)
    }

    /// Rows written to external targets
    #[must_use]
    pub fn lines_output(&self) -> u64 {
        self.lines_output.load(Ordering::Relaxed)
    }

    /// Rows updated in external targets
    #[must_use]
    pub fn lines_updated(&self) -> u64 {
        self.lines_updated.load(Ordering::Relaxed)
    }

    /// Rows sent to the error hop
    #[must_use]
    pub fn lines_rejected(&self) -> u64 {
        self.lines_rejected.load(Ordering::Relaxed)
    }

    /// Fatal errors
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Time spent in the row loop so far (zero before start)
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        let started = self.started_nanos.load(Ordering::Acquire);
        if started == UNSET {
            return Duration::ZERO;
        }
        let stopped = match self.stopped_nanos.load(Ordering::Acquire) {
            UNSET => self.nanos_since_base(),
            nanos => nanos,
        };
        Duration::from_nanos(stopped.saturating_sub(started))
    }
}

impl Default for StepMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of a step copy's metrics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Step name
    pub step: String,
    /// Copy number
    pub copy: usize,
    /// Step kind
    pub kind: String,
    /// Status when captured
    pub status: StepStatus,
    /// Rows read from row sets
    pub lines_read: u64,
    /// Rows written to row sets
    pub lines_written: u64,
    /// Rows from external sources
    pub lines_input: u64,
    /// Rows to external targets
    pub lines_output: u64,
    /// Rows updated externally
    pub lines_updated: u64,
    /// Rows sent to the error hop
    pub lines_rejected: u64,
    /// Fatal errors
    pub errors: u64,
    /// Seconds spent in the row loop
    pub elapsed_secs: f64,
}

impl MetricsSnapshot {
    /// Kettle-style one-line summary
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "I={}, O={}, R={}, W={}, U={}, E={}",
            self.lines_input,
            self.lines_output,
            self.lines_read,
            self.lines_written,
            self.lines_updated,
            self.errors
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_status_cell_roundtrip() {
        let cell = StatusCell::new(StepStatus::Created);
        for status in [
            StepStatus::Initialized,
            StepStatus::Running,
            StepStatus::Finished,
            StepStatus::Failed,
            StepStatus::Stopped,
            StepStatus::Disposed,
        ] {
            cell.set(status);
            assert_eq!(cell.get(), status);
        }
    }

    #[test]
    fn test_status_terminal() {
        assert!(!StepStatus::Created.is_terminal());
        assert!(!StepStatus::Initialized.is_terminal());
        assert!(!StepStatus::Running.is_terminal());
        assert!(StepStatus::Finished.is_terminal());
        assert!(StepStatus::Failed.is_terminal());
        assert!(StepStatus::Stopped.is_terminal());
        assert_eq!(StepStatus::Stopped.to_string(), "Stopped");
    }

    #[test]
    fn test_metrics_counters() {
        let metrics = StepMetrics::new();
        metrics.record_read();
        metrics.record_read();
        metrics.record_written();
        metrics.record_rejected();
        metrics.record_error();
        metrics.record_input();
        metrics.record_output();
        metrics.record_updated();

        assert_eq!(metrics.lines_read(), 2);
        assert_eq!(metrics.lines_written(), 1);
        assert_eq!(metrics.lines_rejected(), 1);
        assert_eq!(metrics.errors(), 1);
        assert_eq!(metrics.lines_input(), 1);
        assert_eq!(metrics.lines_output(), 1);
        assert_eq!(metrics.lines_updated(), 1);
    }

    #[test]
    fn test_metrics_elapsed() {
        let metrics = StepMetrics::new();
        assert_eq!(metrics.elapsed(), Duration::ZERO);

        metrics.mark_started();
        thread::sleep(Duration::from_millis(10));
        metrics.mark_stopped();
        let elapsed = metrics.elapsed();
        assert!(elapsed >= Duration::from_millis(10));

        thread::sleep(Duration::from_millis(5));
        assert_eq!(metrics.elapsed(), elapsed);
    }

    #[test]
    fn test_snapshot_summary() {
        let snapshot = MetricsSnapshot {
            step: "s".to_string(),
            copy: 0,
            kind: "Dummy".to_string(),
            status: StepStatus::Finished,
            lines_read: 3,
            lines_written: 2,
            lines_input: 0,
            lines_output: 0,
            lines_updated: 0,
            lines_rejected: 1,
            errors: 0,
            elapsed_secs: 0.5,
        };
        assert_eq!(snapshot.summary(), "I=0, O=0, R=3, W=2, U=0, E=0");
    }
}
