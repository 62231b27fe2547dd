//! Bounded row channel between two step copies.
//!
//! A row set has exactly one producer and one consumer. `put` blocks while
//! the set is full, `get` blocks while it is empty and not done. The
//! producer marks the set done when it will send nothing more; the consumer
//! cancels it when it will read nothing more, which releases a producer
//! blocked in `put`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use rowflow_core::{CopyId, Row, Schema};

use crate::error::RowSetError;

/// Outcome of a timed read
#[derive(Debug, Clone, PartialEq)]
pub enum GetResult {
    /// Next row in FIFO order
    Row(Arc<Schema>, Row),
    /// Nothing arrived within the timeout
    Timeout,
    /// The set is drained and done (or cancelled)
    Done,
}

#[derive(Debug, Default)]
struct RowSetState {
    queue: VecDeque<(Arc<Schema>, Row)>,
    done: bool,
    cancelled: bool,
}

/// Bounded FIFO of `(schema, row)` pairs
#[derive(Debug)]
pub struct RowSet {
    origin: CopyId,
    destination: CopyId,
    capacity: usize,
    state: Mutex<RowSetState>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl RowSet {
    /// Create a row set; a zero capacity is raised to one
    #[must_use]
    pub fn new(origin: CopyId, destination: CopyId, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            origin,
            destination,
            capacity,
            state: Mutex::new(RowSetState {
                queue: VecDeque::with_capacity(capacity.min(1024)),
                ..RowSetState::default()
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Send a row, blocking while the set is full.
    ///
    /// # Errors
    ///
    /// Returns [`RowSetError::Closed`] if the set is done or cancelled,
    /// including when that happens while waiting for space.
    pub fn put(&self, schema: Arc<Schema>, row: Row) -> Result<(), RowSetError> {
        self.offer(schema, row)
            .map_err(|_| RowSetError::Closed { name: self.name() })
    }

    /// Like [`RowSet::put`], but hands the row back when the set is closed
    pub(crate) fn offer(&self, schema: Arc<Schema>, row: Row) -> Result<(), (Arc<Schema>, Row)> {
        let mut state = self.state.lock();
        while state.queue.len() >= self.capacity && !state.done && !state.cancelled {
            self.not_full.wait(&mut state);
        }
        if state.done || state.cancelled {
            return Err((schema, row));
        }
        state.queue.push_back((schema, row));
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Receive the next row, blocking while the set is empty and not done.
    ///
    /// Returns `None` once the set is drained and done, or cancelled.
    pub fn get(&self) -> Option<(Arc<Schema>, Row)> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.queue.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(item);
            }
            if state.done || state.cancelled {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Receive the next row, waiting at most `timeout`
    pub fn get_wait(&self, timeout: Duration) -> GetResult {
        let mut state = self.state.lock();
        if state.queue.is_empty() && !state.done && !state.cancelled {
            // Spurious wakeups only shorten the wait; the caller polls again.
            let _ = self.not_empty.wait_for(&mut state, timeout);
        }
        if let Some((schema, row)) = state.queue.pop_front() {
            drop(state);
            self.not_full.notify_one();
            return GetResult::Row(schema, row);
        }
        if state.done || state.cancelled {
            GetResult::Done
        } else {
            GetResult::Timeout
        }
    }

    /// Signal that no more rows will be sent. Idempotent.
    pub fn mark_done(&self) {
        let mut state = self.state.lock();
        state.done = true;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Signal that no more rows will be read; buffered rows are discarded
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        state.cancelled = true;
        state.queue.clear();
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Number of buffered rows
    #[must_use]
    pub fn size(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Maximum number of buffered rows
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Check if the producer marked the set done
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state.lock().done
    }

    /// Check if the consumer cancelled the set
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    /// Producing copy
    #[must_use]
    pub fn origin(&self) -> &CopyId {
        &self.origin
    }

    /// Consuming copy
    #[must_use]
    pub fn destination(&self) -> &CopyId {
        &self.destination
    }

    /// `origin - destination`
    #[must_use]
    pub fn name(&self) -> String {
        format!("{} - {}", self.origin, self.destination)
    }
}
