//! Dummy: passes every row through unchanged.

use rowflow_runtime::{ProcessOutcome, Step, StepContext, StepError};

/// Dummy step
#[derive(Debug, Default)]
pub struct Dummy;

impl Step for Dummy {
    fn process_row(&mut self, ctx: &mut StepContext) -> Result<ProcessOutcome, StepError> {
        match ctx.get_row()? {
            Some((schema, row)) => {
                ctx.put_row(&schema, row)?;
                Ok(ProcessOutcome::Continue)
            }
            None => Ok(ProcessOutcome::Done),
        }
    }
}
