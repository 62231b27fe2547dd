//! StepsMetrics: reports the final metrics of other steps.
//!
//! Each monitored copy produces one row once it has left its row loop.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use rowflow_core::{CopyId, FieldMeta, Row, Schema, Value, ValueType};
use rowflow_plan::StepMeta;
use rowflow_runtime::{MetricsSnapshot, ProcessOutcome, Step, StepContext, StepError, StepHandle};
use serde::{Deserialize, Serialize};

/// Pause between two polls of the monitored copies
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A monitored step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsTarget {
    /// Step name
    pub step: String,
    /// Copy number; every copy when absent
    #[serde(default)]
    pub copy: Option<usize>,
}

/// Output field names; a field is omitted when its name is absent or blank.
///
/// Without any `fields` setting every field is kept under its default name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsFields {
    /// Step name
    pub step_name: Option<String>,
    /// Step kind
    pub step_id: Option<String>,
    /// Lines input
    pub lines_input: Option<String>,
    /// Lines output
    pub lines_output: Option<String>,
    /// Lines read
    pub lines_read: Option<String>,
    /// Lines written
    pub lines_written: Option<String>,
    /// Lines updated
    pub lines_updated: Option<String>,
    /// Lines rejected
    pub lines_rejected: Option<String>,
    /// Errors
    pub errors: Option<String>,
    /// Seconds spent running
    pub seconds: Option<String>,
}

impl Default for MetricsFields {
    fn default() -> Self {
        let name = |n: &str| Some(n.to_string());
        Self {
            step_name: name("stepname"),
            step_id: name("stepid"),
            lines_input: name("linesinput"),
            lines_output: name("linesoutput"),
            lines_read: name("linesread"),
            lines_written: name("lineswritten"),
            lines_updated: name("linesupdated"),
            lines_rejected: name("linesrejected"),
            errors: name("errors"),
            seconds: name("seconds"),
        }
    }
}

type Extract = fn(&MetricsSnapshot) -> Value;

impl MetricsFields {
    fn columns(&self) -> Vec<(&str, ValueType, Extract)> {
        let columns: [(&Option<String>, ValueType, Extract); 10] = [
            (&self.step_name, ValueType::String, |s| Value::from(s.step.as_str())),
            (&self.step_id, ValueType::String, |s| Value::from(s.kind.as_str())),
            (&self.lines_input, ValueType::Integer, |s| count(s.lines_input)),
            (&self.lines_output, ValueType::Integer, |s| count(s.lines_output)),
            (&self.lines_read, ValueType::Integer, |s| count(s.lines_read)),
            (&self.lines_written, ValueType::Integer, |s| count(s.lines_written)),
            (&self.lines_updated, ValueType::Integer, |s| count(s.lines_updated)),
            (&self.lines_rejected, ValueType::Integer, |s| count(s.lines_rejected)),
            (&self.errors, ValueType::Integer, |s| count(s.errors)),
            (&self.seconds, ValueType::Number, |s| Value::Number(s.elapsed_secs)),
        ];
        columns
            .into_iter()
            .filter_map(|(name, ty, extract)| {
                name.as_deref()
                    .filter(|n| !n.trim().is_empty())
                    .map(|n| (n, ty, extract))
            })
            .collect()
    }
}

fn count(value: u64) -> Value {
    Value::Integer(i64::try_from(value).unwrap_or(i64::MAX))
}

/// StepsMetrics settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepsMetricsMeta {
    /// Monitored steps
    pub targets: Vec<MetricsTarget>,
    /// Output field names
    pub fields: MetricsFields,
}

/// StepsMetrics step
pub struct StepsMetrics {
    meta: StepsMetricsMeta,
    schema: Arc<Schema>,
    extractors: Vec<Extract>,
    pending: IndexMap<CopyId, Arc<StepHandle>>,
}

impl StepsMetrics {
    /// Build from a step definition
    ///
    /// # Errors
    ///
    /// Returns error if the settings cannot be decoded or no field is kept
    pub fn new(step: &StepMeta) -> Result<Self, StepError> {
        let meta: StepsMetricsMeta = step.config_as()?;
        let columns = meta.fields.columns();
        if columns.is_empty() {
            return Err(StepError::config(&step.name, "no output field is configured"));
        }
        let schema = Schema::from_fields(
            columns
                .iter()
                .map(|(name, ty, _)| FieldMeta::new(*name, *ty)),
        )?;
        let extractors = columns.into_iter().map(|(_, _, extract)| extract).collect();
        Ok(Self {
            meta,
            schema: Arc::new(schema),
            extractors,
            pending: IndexMap::new(),
        })
    }

    /// Layout of the emitted rows
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }
}

impl Step for StepsMetrics {
    fn init(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        if self.meta.targets.is_empty() {
            return Err(StepError::config(ctx.step_name(), "no step to monitor"));
        }

        let downstream = ctx.trans_meta().downstream_of(ctx.step_name());
        for target in &self.meta.targets {
            if target.step == ctx.step_name() {
                return Err(StepError::config(ctx.step_name(), "a step cannot monitor itself"));
            }
            if downstream.contains(target.step.as_str()) {
                return Err(StepError::config(
                    ctx.step_name(),
                    format!(
                        "step '{}' is downstream of this step and cannot be monitored",
                        target.step
                    ),
                ));
            }

            let handles: Vec<_> = ctx
                .step_handles(&target.step)
                .into_iter()
                .filter(|h| target.copy.is_none_or(|copy| h.copy_id().copy == copy))
                .collect();
            if handles.is_empty() {
                let copy = target.copy.map(|c| format!(" copy {c}")).unwrap_or_default();
                return Err(StepError::config(
                    ctx.step_name(),
                    format!("unknown step '{}'{copy}", target.step),
                ));
            }
            for handle in handles {
                self.pending.insert(handle.copy_id().clone(), handle);
            }
        }
        tracing::debug!(targets = self.pending.len(), "monitoring steps");
        Ok(())
    }

    fn process_row(&mut self, ctx: &mut StepContext) -> Result<ProcessOutcome, StepError> {
        if ctx.is_stopped() {
            return Ok(ProcessOutcome::Done);
        }

        let finished: Vec<CopyId> = self
            .pending
            .iter()
            .filter(|(_, h)| h.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        for copy_id in finished {
            if let Some(handle) = self.pending.shift_remove(&copy_id) {
                let snapshot = handle.snapshot();
                let row = Row::new(
                    self.extractors
                        .iter()
                        .map(|extract| extract(&snapshot))
                        .collect(),
                );
                ctx.put_row(&self.schema, row)?;
            }
        }

        if self.pending.is_empty() {
            return Ok(ProcessOutcome::Done);
        }
        std::thread::sleep(POLL_INTERVAL);
        Ok(ProcessOutcome::Continue)
    }
}
