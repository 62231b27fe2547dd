//! rowflow Steps
//!
//! Built-in step kinds: the sequencer, the two-stream merge-join, the
//! cross-step status aggregator, and small sources and sinks for wiring
//! pipelines together.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::Arc;

use rowflow_plan::StepMeta;
use rowflow_runtime::{Step, StepError, StepRegistry};

pub mod abort;
pub mod add_sequence;
pub mod data_grid;
pub mod dummy;
pub mod merge_rows;
pub mod row_generator;
pub mod steps_metrics;

pub use abort::{Abort, AbortMeta};
pub use add_sequence::{
    AddSequence, AddSequenceMeta, COUNTER_PREFIX, SequenceMode, SequenceProvider, SequenceProviders,
};
pub use data_grid::{DataGrid, DataGridMeta, GridField};
pub use dummy::Dummy;
pub use merge_rows::{IdenticalSource, MergeRows, MergeRowsMeta, USE_REFERENCE_WHEN_IDENTICAL};
pub use row_generator::{GeneratedField, RowGenerator, RowGeneratorMeta};
pub use steps_metrics::{MetricsFields, MetricsTarget, StepsMetrics, StepsMetricsMeta};

/// Kind names of the built-in steps
pub mod kinds {
    /// [`crate::AddSequence`]
    pub const ADD_SEQUENCE: &str = "AddSequence";
    /// [`crate::MergeRows`]
    pub const MERGE_ROWS: &str = "MergeRows";
    /// [`crate::StepsMetrics`]
    pub const STEPS_METRICS: &str = "StepsMetrics";
    /// [`crate::DataGrid`]
    pub const DATA_GRID: &str = "DataGrid";
    /// [`crate::RowGenerator`]
    pub const ROW_GENERATOR: &str = "RowGenerator";
    /// [`crate::Dummy`]
    pub const DUMMY: &str = "Dummy";
    /// [`crate::Abort`]
    pub const ABORT: &str = "Abort";
}

fn boxed<S: Step + 'static>(step: Result<S, StepError>) -> Result<Box<dyn Step>, StepError> {
    step.map(|s| Box::new(s) as Box<dyn Step>)
}

/// Registry holding every built-in step kind, without sequence providers
#[must_use]
pub fn builtin_registry() -> StepRegistry {
    builtin_registry_with_providers(SequenceProviders::new())
}

/// Registry holding every built-in step kind; AddSequence steps in
/// provider mode can use `providers`
#[must_use]
pub fn builtin_registry_with_providers(providers: SequenceProviders) -> StepRegistry {
    let providers = Arc::new(providers);
    StepRegistry::new()
        .with_step(kinds::ADD_SEQUENCE, move |meta: &StepMeta| {
            boxed(AddSequence::new(meta, Arc::clone(&providers)))
        })
        .with_step(kinds::MERGE_ROWS, |meta: &StepMeta| boxed(MergeRows::new(meta)))
        .with_step(kinds::STEPS_METRICS, |meta: &StepMeta| boxed(StepsMetrics::new(meta)))
        .with_step(kinds::DATA_GRID, |meta: &StepMeta| boxed(DataGrid::new(meta)))
        .with_step(kinds::ROW_GENERATOR, |meta: &StepMeta| boxed(RowGenerator::new(meta)))
        .with_step(kinds::DUMMY, |_: &StepMeta| boxed(Ok(Dummy)))
        .with_step(kinds::ABORT, |meta: &StepMeta| boxed(Abort::new(meta)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry() {
        let registry = builtin_registry();
        assert_eq!(registry.count(), 7);
        for kind in [
            "AddSequence",
            "MergeRows",
            "StepsMetrics",
            "DataGrid",
            "RowGenerator",
            "Dummy",
            "Abort",
        ] {
            assert!(registry.contains(kind), "{kind} missing");
        }
        assert!(registry.create(&StepMeta::new("d", kinds::DUMMY)).is_some());
    }
}
