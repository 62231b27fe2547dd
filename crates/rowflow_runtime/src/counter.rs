//! Named counters shared by step copies within one run.
//!
//! Counters are created through [`CounterRegistry::lookup_or_create`], which
//! serializes creation so that concurrent inits agree on one instance. Each
//! counter advances under its own lock.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;

/// Counter registry errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CounterError {
    /// A counter with this name exists with other settings
    #[error(
        "Counter {name} already exists with start={start}, increment={increment}, maximum={maximum}"
    )]
    Mismatch {
        /// Lookup name
        name: String,
        /// Existing start value
        start: i64,
        /// Existing increment
        increment: i64,
        /// Existing maximum
        maximum: i64,
    },

    /// The counter was removed earlier in this run
    #[error("Counter {name} was removed and cannot be created again in this run")]
    Retired {
        /// Lookup name
        name: String,
    },
}

/// A sequence generator with wraparound
#[derive(Debug)]
pub struct Counter {
    start: i64,
    increment: i64,
    maximum: i64,
    current: Mutex<i64>,
}

impl Counter {
    /// Create a counter positioned at `start`
    #[must_use]
    pub fn new(start: i64, increment: i64, maximum: i64) -> Self {
        Self {
            start,
            increment,
            maximum,
            current: Mutex::new(start),
        }
    }

    /// Return the current value and advance.
    ///
    /// Once the next value passes `maximum` (in the direction of the
    /// increment) the counter restarts at `start`. A maximum on the wrong
    /// side of `start` disables wrapping.
    pub fn next_value(&self) -> i64 {
        let mut current = self.current.lock();
        let value = *current;
        let mut next = value.wrapping_add(self.increment);
        if (self.increment > 0 && self.maximum > self.start && next > self.maximum)
            || (self.increment < 0 && self.maximum < self.start && next < self.maximum)
        {
            next = self.start;
        }
        *current = next;
        value
    }

    /// Value the next call to [`Counter::next_value`] will return
    #[must_use]
    pub fn current(&self) -> i64 {
        *self.current.lock()
    }

    /// Initial value
    #[must_use]
    pub const fn start(&self) -> i64 {
        self.start
    }

    /// Step between values
    #[must_use]
    pub const fn increment(&self) -> i64 {
        self.increment
    }

    /// Wrap threshold
    #[must_use]
    pub const fn maximum(&self) -> i64 {
        self.maximum
    }

    /// Check if the counter was created with these settings
    #[must_use]
    pub fn has_settings(&self, start: i64, increment: i64, maximum: i64) -> bool {
        self.start == start && self.increment == increment && self.maximum == maximum
    }
}

/// Concurrent map of named counters
#[derive(Debug, Default)]
pub struct CounterRegistry {
    counters: DashMap<String, Arc<Counter>>,
    retired: DashSet<String>,
    create_lock: Mutex<()>,
}

impl CounterRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the counter registered as `name`, creating it if absent.
    ///
    /// The boolean is `true` when this call created the counter.
    ///
    /// # Errors
    ///
    /// Returns [`CounterError::Mismatch`] if the existing counter has other
    /// settings, or [`CounterError::Retired`] if the name was removed
    pub fn lookup_or_create(
        &self,
        name: &str,
        start: i64,
        increment: i64,
        maximum: i64,
    ) -> Result<(Arc<Counter>, bool), CounterError> {
        let _guard = self.create_lock.lock();

        if let Some(existing) = self.counters.get(name) {
            let counter = Arc::clone(existing.value());
            if !counter.has_settings(start, increment, maximum) {
                return Err(CounterError::Mismatch {
                    name: name.to_string(),
                    start: counter.start,
                    increment: counter.increment,
                    maximum: counter.maximum,
                });
            }
            return Ok((counter, false));
        }

        if self.retired.contains(name) {
            return Err(CounterError::Retired {
                name: name.to_string(),
            });
        }

        let counter = Arc::new(Counter::new(start, increment, maximum));
        self.counters.insert(name.to_string(), Arc::clone(&counter));
        Ok((counter, true))
    }

    /// Get a counter by name
    #[must_use]
    pub fn get_counter(&self, name: &str) -> Option<Arc<Counter>> {
        self.counters.get(name).map(|c| Arc::clone(c.value()))
    }

    /// Register a counter under `name`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`CounterError::Retired`] if the name was removed
    pub fn put_counter(&self, name: &str, counter: Arc<Counter>) -> Result<(), CounterError> {
        let _guard = self.create_lock.lock();
        if self.retired.contains(name) {
            return Err(CounterError::Retired {
                name: name.to_string(),
            });
        }
        self.counters.insert(name.to_string(), counter);
        Ok(())
    }

    /// Remove a counter; the name cannot be registered again in this run
    pub fn remove_counter(&self, name: &str) -> Option<Arc<Counter>> {
        let _guard = self.create_lock.lock();
        self.retired.insert(name.to_string());
        self.counters.remove(name).map(|(_, c)| c)
    }

    /// Registered names
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.counters.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of registered counters
    #[must_use]
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Check if no counter is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}
