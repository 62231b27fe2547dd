//! rowflow Planner
//!
//! Metadata describing a pipeline: named step definitions, the hops wiring
//! them and the trans-wide settings. Validation rejects graphs the runtime
//! cannot execute before any thread is started.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod meta;
pub mod validate;

pub use meta::{
    DEFAULT_ROW_SET_SIZE, Distribution, Hop, PlanError, PlanResult, StepMeta, TransMeta,
};
pub use validate::{ValidationError, Validator};
