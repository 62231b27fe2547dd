//! Abort: fails the trans once too many rows arrive.
//!
//! Rows up to the threshold pass through. The first row beyond it stops
//! every step and marks the run failed.

use rowflow_plan::StepMeta;
use rowflow_runtime::{ProcessOutcome, Step, StepContext, StepError};
use serde::{Deserialize, Serialize};

/// Abort settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbortMeta {
    /// Rows allowed before aborting (variables allowed)
    pub row_threshold: String,
    /// Error message; a default naming the row is used when blank
    pub message: String,
    /// Log every row that passes
    pub always_log_rows: bool,
}

impl Default for AbortMeta {
    fn default() -> Self {
        Self {
            row_threshold: "0".to_string(),
            message: String::new(),
            always_log_rows: false,
        }
    }
}

/// Abort step
#[derive(Debug)]
pub struct Abort {
    meta: AbortMeta,
    threshold: u64,
    seen: u64,
}

impl Abort {
    /// Build from a step definition
    ///
    /// # Errors
    ///
    /// Returns error if the settings cannot be decoded
    pub fn new(step: &StepMeta) -> Result<Self, StepError> {
        Ok(Self {
            meta: step.config_as()?,
            threshold: 0,
            seen: 0,
        })
    }
}

impl Step for Abort {
    fn init(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        let threshold = ctx.substitute(&self.meta.row_threshold);
        self.threshold = threshold.trim().parse().map_err(|_| {
            StepError::config(
                ctx.step_name(),
                format!("row threshold '{threshold}' is not a number"),
            )
        })?;
        Ok(())
    }

    fn process_row(&mut self, ctx: &mut StepContext) -> Result<ProcessOutcome, StepError> {
        let Some((schema, row)) = ctx.get_row()? else {
            return Ok(ProcessOutcome::Done);
        };
        self.seen += 1;

        if self.seen > self.threshold {
            let message = if self.meta.message.trim().is_empty() {
                format!("Row nr {} causing abort: {:?}", self.seen, row.values())
            } else {
                ctx.substitute(&self.meta.message)
            };
            return Err(StepError::process(ctx.step_name(), message));
        }

        if self.meta.always_log_rows {
            tracing::info!(row = ?row.values(), "row {}", self.seen);
        }
        ctx.put_row(&schema, row)?;
        Ok(ProcessOutcome::Continue)
    }
}
