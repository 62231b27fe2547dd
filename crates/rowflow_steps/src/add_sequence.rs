//! AddSequence: appends a sequence number to every row.
//!
//! Values come either from a run-wide counter shared by every copy that
//! uses the same counter name, or from an external [`SequenceProvider`].

use std::sync::Arc;

use indexmap::IndexMap;
use rowflow_core::{FieldMeta, Schema, Value, ValueType};
use rowflow_plan::StepMeta;
use rowflow_runtime::{Counter, ExternalError, ProcessOutcome, Step, StepContext, StepError};
use serde::{Deserialize, Serialize};

/// Prefix of counter names in the registry
pub const COUNTER_PREFIX: &str = "@@sequence:";

/// Error code attached to rows the provider could not number
pub const PROVIDER_ERROR_CODE: &str = "ADDSEQ001";

/// Source of sequence values outside the engine, such as a database sequence
pub trait SequenceProvider: Send + Sync {
    /// Next value of `sequence`
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be obtained
    fn next_value(&self, sequence: &str) -> Result<i64, ExternalError>;
}

/// Providers available to AddSequence steps, by name
pub type SequenceProviders = IndexMap<String, Arc<dyn SequenceProvider>>;

/// Where values come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceMode {
    /// Run-wide in-process counter
    #[default]
    Counter,
    /// External provider
    Provider,
}

/// AddSequence settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddSequenceMeta {
    /// Name of the appended field
    pub value_name: String,
    /// Value source
    pub mode: SequenceMode,
    /// Counter shared under this name; defaults to the value name
    pub counter_name: Option<String>,
    /// First value (variables allowed)
    pub start_at: String,
    /// Step between values (variables allowed)
    pub increment_by: String,
    /// Wrap threshold (variables allowed)
    pub max_value: String,
    /// Registered provider name, in provider mode
    pub provider: Option<String>,
    /// Sequence to ask the provider for (variables allowed)
    pub sequence_name: String,
}

impl Default for AddSequenceMeta {
    fn default() -> Self {
        Self {
            value_name: "valuename".to_string(),
            mode: SequenceMode::Counter,
            counter_name: None,
            start_at: "1".to_string(),
            increment_by: "1".to_string(),
            max_value: "999999999".to_string(),
            provider: None,
            sequence_name: String::new(),
        }
    }
}

impl AddSequenceMeta {
    /// Registry key of the counter used by this step
    #[must_use]
    pub fn counter_key(&self, ctx: &StepContext) -> String {
        let name = self
            .counter_name
            .as_deref()
            .map(|n| ctx.substitute(n))
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| self.value_name.clone());
        format!("{COUNTER_PREFIX}{name}")
    }
}

enum Source {
    Counter {
        counter: Arc<Counter>,
        key: String,
        created: bool,
    },
    Provider {
        provider: Arc<dyn SequenceProvider>,
        sequence: String,
    },
}

/// AddSequence step
pub struct AddSequence {
    meta: AddSequenceMeta,
    providers: Arc<SequenceProviders>,
    source: Option<Source>,
    schemas: Option<(Arc<Schema>, Arc<Schema>)>,
}

impl AddSequence {
    /// Build from a step definition
    ///
    /// # Errors
    ///
    /// Returns error if the settings cannot be decoded
    pub fn new(step: &StepMeta, providers: Arc<SequenceProviders>) -> Result<Self, StepError> {
        let meta: AddSequenceMeta = step.config_as()?;
        if meta.value_name.trim().is_empty() {
            return Err(StepError::config(&step.name, "value name is required"));
        }
        Ok(Self {
            meta,
            providers,
            source: None,
            schemas: None,
        })
    }

    fn parse_setting(ctx: &StepContext, label: &str, text: &str) -> Result<i64, StepError> {
        let resolved = ctx.substitute(text);
        resolved.trim().parse().map_err(|_| {
            StepError::config(
                ctx.step_name(),
                format!("{label} '{resolved}' is not an integer"),
            )
        })
    }

    fn output_schema(&mut self, input: &Arc<Schema>) -> Result<Arc<Schema>, StepError> {
        if let Some((cached_in, cached_out)) = &self.schemas {
            if Arc::ptr_eq(cached_in, input) {
                return Ok(Arc::clone(cached_out));
            }
        }
        let output = Arc::new(input.appended(FieldMeta::new(
            self.meta.value_name.clone(),
            ValueType::Integer,
        ))?);
        self.schemas = Some((Arc::clone(input), Arc::clone(&output)));
        Ok(output)
    }
}

impl Step for AddSequence {
    fn init(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        let source = match self.meta.mode {
            SequenceMode::Counter => {
                let start = Self::parse_setting(ctx, "start value", &self.meta.start_at)?;
                let increment = Self::parse_setting(ctx, "increment", &self.meta.increment_by)?;
                let maximum = Self::parse_setting(ctx, "maximum value", &self.meta.max_value)?;
                let key = self.meta.counter_key(ctx);

                let (counter, created) = ctx
                    .counters()
                    .lookup_or_create(&key, start, increment, maximum)
                    .map_err(|e| StepError::config(ctx.step_name(), e.to_string()))?;
                tracing::debug!(counter = %key, created, "using counter");
                Source::Counter {
                    counter,
                    key,
                    created,
                }
            }
            SequenceMode::Provider => {
                let name = self.meta.provider.as_deref().unwrap_or_default();
                let provider = self.providers.get(name).cloned().ok_or_else(|| {
                    StepError::config(
                        ctx.step_name(),
                        format!("sequence provider '{name}' is not registered"),
                    )
                })?;
                let sequence = ctx.substitute(&self.meta.sequence_name);
                if sequence.trim().is_empty() {
                    return Err(StepError::config(ctx.step_name(), "sequence name is required"));
                }
                Source::Provider { provider, sequence }
            }
        };
        self.source = Some(source);
        Ok(())
    }

    fn process_row(&mut self, ctx: &mut StepContext) -> Result<ProcessOutcome, StepError> {
        let Some((schema, mut row)) = ctx.get_row()? else {
            return Ok(ProcessOutcome::Done);
        };

        let value = match &self.source {
            Some(Source::Counter { counter, .. }) => counter.next_value(),
            Some(Source::Provider { provider, sequence }) => match provider.next_value(sequence) {
                Ok(value) => value,
                Err(source) if ctx.has_error_output() => {
                    let description = source.to_string();
                    ctx.put_error(
                        &schema,
                        row,
                        1,
                        &description,
                        &self.meta.value_name,
                        PROVIDER_ERROR_CODE,
                    )?;
                    return Ok(ProcessOutcome::Continue);
                }
                Err(source) => {
                    return Err(StepError::External {
                        step: ctx.step_name().to_string(),
                        source,
                    });
                }
            },
            None => return Err(StepError::process(ctx.step_name(), "step was not initialized")),
        };

        let output = self.output_schema(&schema)?;
        let index = schema.len();
        row.grow_to(output.len());
        row.set(index, Value::Integer(value));
        ctx.put_row(&output, row)?;
        Ok(ProcessOutcome::Continue)
    }

    fn dispose(&mut self, ctx: &mut StepContext) {
        if let Some(Source::Counter {
            key, created: true, ..
        }) = &self.source
        {
            ctx.counters().remove_counter(key);
            tracing::debug!(counter = %key, "counter removed");
        }
        self.source = None;
    }
}
