//! rowflow Runtime
//!
//! Threaded execution of a trans: bounded row sets between step copies,
//! the step contract and its per-copy context, run-wide named counters,
//! atomic status and line metrics, and the coordinator that wires and
//! runs everything.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod counter;
pub mod error;
pub mod listener;
pub mod metrics;
pub mod plugin;
pub mod rowset;
pub mod step;
pub mod trans;

pub use context::{ERROR_FIELDS, StepContext};
pub use counter::{Counter, CounterError, CounterRegistry};
pub use error::{ExternalError, RowSetError, StepError, TransError};
pub use listener::{RowCollector, RowListener};
pub use metrics::{MetricsSnapshot, StatusCell, StepMetrics, StepStatus};
pub use plugin::{RegistryError, StepFactory, StepRegistry};
pub use rowset::{GetResult, RowSet};
pub use step::{ProcessOutcome, Step, StepHandle};
pub use trans::{Trans, TransResult, TransResultOf, TransStatus};
