//! Per-copy execution context.
//!
//! A [`StepContext`] is the only way a step talks to the engine: it owns
//! the copy's row sets, reads and writes rows with bookkeeping, and exposes
//! the trans-wide state (stop flag, counters, other copies' handles).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use rowflow_core::{CopyId, FieldMeta, Row, RunId, Schema, Value, ValueType, VariableSpace};
use rowflow_plan::{Distribution, StepMeta, TransMeta};

use crate::counter::CounterRegistry;
use crate::error::StepError;
use crate::metrics::StepMetrics;
use crate::rowset::{GetResult, RowSet};
use crate::step::StepHandle;

/// Wait per input when rotating over several inputs
const ROTATION_WAIT: Duration = Duration::from_millis(1);

/// Wait on a single input between stop-flag checks
const SINGLE_INPUT_WAIT: Duration = Duration::from_millis(50);

/// Fields appended to rows sent to an error hop
pub const ERROR_FIELDS: [&str; 4] = [
    "nr_errors",
    "error_descriptions",
    "error_fields",
    "error_codes",
];

/// State shared by every copy of one trans run
#[derive(Debug)]
pub(crate) struct TransShared {
    pub(crate) run_id: RunId,
    pub(crate) name: String,
    stopped: AtomicBool,
    errors: AtomicU64,
    first_error: Mutex<Option<String>>,
    pub(crate) counters: CounterRegistry,
    pub(crate) handles: DashMap<CopyId, Arc<StepHandle>>,
}

impl TransShared {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            run_id: RunId::new(),
            name: name.into(),
            stopped: AtomicBool::new(false),
            errors: AtomicU64::new(0),
            first_error: Mutex::new(None),
            counters: CounterRegistry::new(),
            handles: DashMap::new(),
        }
    }

    pub(crate) fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub(crate) fn record_error(&self, message: impl Into<String>) {
        self.errors.fetch_add(1, Ordering::AcqRel);
        let mut first = self.first_error.lock();
        if first.is_none() {
            *first = Some(message.into());
        }
    }

    pub(crate) fn errors(&self) -> u64 {
        self.errors.load(Ordering::Acquire)
    }

    pub(crate) fn first_error(&self) -> Option<String> {
        self.first_error.lock().clone()
    }

    pub(crate) fn handles_of(&self, step: &str) -> Vec<Arc<StepHandle>> {
        let mut handles: Vec<Arc<StepHandle>> = self
            .handles
            .iter()
            .filter(|e| e.key().step == step)
            .map(|e| Arc::clone(e.value()))
            .collect();
        handles.sort_by_key(|h| h.copy_id().copy);
        handles
    }
}

/// Cached error-row schema for one input schema
#[derive(Debug)]
struct ErrorSchema {
    input: Arc<Schema>,
    output: Arc<Schema>,
}

/// Row I/O and trans access for one step copy
#[derive(Debug)]
pub struct StepContext {
    copy_id: CopyId,
    step_meta: StepMeta,
    meta: Arc<TransMeta>,
    shared: Arc<TransShared>,
    handle: Arc<StepHandle>,
    variables: VariableSpace,
    inputs: Vec<Arc<RowSet>>,
    live_inputs: Vec<Arc<RowSet>>,
    next_input: usize,
    outputs: Vec<Arc<RowSet>>,
    live_outputs: Vec<Arc<RowSet>>,
    next_output: usize,
    error_outputs: Vec<Arc<RowSet>>,
    next_error_output: usize,
    input_schema: Option<Arc<Schema>>,
    error_schema: Option<ErrorSchema>,
}

impl StepContext {
    pub(crate) fn new(
        copy_id: CopyId,
        meta: Arc<TransMeta>,
        shared: Arc<TransShared>,
        handle: Arc<StepHandle>,
    ) -> Self {
        let step_meta = meta
            .step(&copy_id.step)
            .cloned()
            .unwrap_or_else(|| StepMeta::new(copy_id.step.clone(), handle.kind()));
        let variables = meta.variable_space();
        Self {
            copy_id,
            step_meta,
            meta,
            shared,
            handle,
            variables,
            inputs: Vec::new(),
            live_inputs: Vec::new(),
            next_input: 0,
            outputs: Vec::new(),
            live_outputs: Vec::new(),
            next_output: 0,
            error_outputs: Vec::new(),
            next_error_output: 0,
            input_schema: None,
            error_schema: None,
        }
    }

    pub(crate) fn add_input(&mut self, row_set: Arc<RowSet>) {
        self.live_inputs.push(Arc::clone(&row_set));
        self.inputs.push(row_set);
    }

    pub(crate) fn add_output(&mut self, row_set: Arc<RowSet>) {
        self.live_outputs.push(Arc::clone(&row_set));
        self.outputs.push(row_set);
    }

    pub(crate) fn add_error_output(&mut self, row_set: Arc<RowSet>) {
        self.error_outputs.push(row_set);
    }

    /// Step name and copy number
    #[must_use]
    pub fn copy_id(&self) -> &CopyId {
        &self.copy_id
    }

    /// Step name
    #[must_use]
    pub fn step_name(&self) -> &str {
        &self.copy_id.step
    }

    /// Copy number
    #[must_use]
    pub fn copy_nr(&self) -> usize {
        self.copy_id.copy
    }

    /// Definition of this step
    #[must_use]
    pub fn step_meta(&self) -> &StepMeta {
        &self.step_meta
    }

    /// Definition of the whole trans
    #[must_use]
    pub fn trans_meta(&self) -> &TransMeta {
        &self.meta
    }

    /// Name of the running trans
    #[must_use]
    pub fn trans_name(&self) -> &str {
        &self.shared.name
    }

    /// Variables visible to this copy
    #[must_use]
    pub fn variables(&self) -> &VariableSpace {
        &self.variables
    }

    /// Mutable variables, for hosts that inject values before init
    pub fn variables_mut(&mut self) -> &mut VariableSpace {
        &mut self.variables
    }

    /// Resolve `${NAME}` and `%%NAME%%` placeholders
    #[must_use]
    pub fn substitute(&self, text: &str) -> String {
        self.variables.substitute(text)
    }

    /// This copy's counters
    #[must_use]
    pub fn metrics(&self) -> &StepMetrics {
        self.handle.metrics()
    }

    /// Run-wide named counters
    #[must_use]
    pub fn counters(&self) -> &CounterRegistry {
        &self.shared.counters
    }

    /// Handles of every copy of `step`, ordered by copy number
    #[must_use]
    pub fn step_handles(&self, step: &str) -> Vec<Arc<StepHandle>> {
        self.shared.handles_of(step)
    }

    /// Check if the trans was asked to stop
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    /// Ask every copy of the trans to stop
    pub fn stop_all(&self) {
        self.shared.stop();
    }

    /// Every input row set, in wiring order
    #[must_use]
    pub fn input_row_sets(&self) -> &[Arc<RowSet>] {
        &self.inputs
    }

    /// Every regular output row set, in wiring order
    #[must_use]
    pub fn output_row_sets(&self) -> &[Arc<RowSet>] {
        &self.outputs
    }

    /// Check if rejected rows have somewhere to go
    #[must_use]
    pub fn has_error_output(&self) -> bool {
        !self.error_outputs.is_empty()
    }

    /// First input row set fed by a copy of `step`
    #[must_use]
    pub fn find_input_row_set(&self, step: &str) -> Option<Arc<RowSet>> {
        self.inputs
            .iter()
            .find(|rs| rs.origin().step == step)
            .cloned()
    }

    /// Read the next row from any input.
    ///
    /// With several inputs the read rotates over them, waiting briefly on
    /// each. Returns `None` when every input is exhausted or the trans is
    /// stopping.
    ///
    /// # Errors
    ///
    /// In safe mode, returns error if rows arrive with incompatible schemas
    pub fn get_row(&mut self) -> Result<Option<(Arc<Schema>, Row)>, StepError> {
        loop {
            if self.is_stopped() || self.live_inputs.is_empty() {
                return Ok(None);
            }
            let wait = if self.live_inputs.len() == 1 {
                SINGLE_INPUT_WAIT
            } else {
                ROTATION_WAIT
            };
            let index = self.next_input % self.live_inputs.len();
            match self.live_inputs[index].get_wait(wait) {
                GetResult::Row(schema, row) => {
                    self.next_input = index + 1;
                    self.check_input_schema(&schema)?;
                    self.record_read(&schema, &row);
                    return Ok(Some((schema, row)));
                }
                GetResult::Timeout => self.next_input = index + 1,
                GetResult::Done => {
                    self.live_inputs.remove(index);
                    self.next_input = index;
                }
            }
        }
    }

    /// Read the next row from one specific input.
    ///
    /// Returns `None` when that input is exhausted or the trans is stopping.
    pub fn get_row_from(&mut self, row_set: &RowSet) -> Option<(Arc<Schema>, Row)> {
        loop {
            if self.is_stopped() {
                return None;
            }
            match row_set.get_wait(SINGLE_INPUT_WAIT) {
                GetResult::Row(schema, row) => {
                    self.record_read(&schema, &row);
                    return Some((schema, row));
                }
                GetResult::Timeout => {}
                GetResult::Done => return None,
            }
        }
    }

    fn record_read(&self, schema: &Arc<Schema>, row: &Row) {
        self.metrics().record_read();
        if self.handle.has_listeners() {
            for listener in self.handle.listeners() {
                listener.row_read(schema, row);
            }
        }
    }

    fn check_input_schema(&mut self, schema: &Arc<Schema>) -> Result<(), StepError> {
        if !self.meta.safe_mode || self.inputs.len() < 2 {
            return Ok(());
        }
        match &self.input_schema {
            None => {
                self.input_schema = Some(Arc::clone(schema));
                Ok(())
            }
            Some(first) if Arc::ptr_eq(first, schema) || first.is_compatible_with(schema) => Ok(()),
            Some(first) => Err(StepError::process(
                self.step_name(),
                format!(
                    "input rows have incompatible layouts: [{}] and [{}]",
                    first.field_names().join(", "),
                    schema.field_names().join(", ")
                ),
            )),
        }
    }

    /// Emit a row on the regular output.
    ///
    /// Outputs whose consumer has closed them are skipped for the rest of
    /// the run.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::OutputClosed`] once every output is closed
    pub fn put_row(&mut self, schema: &Arc<Schema>, row: Row) -> Result<(), StepError> {
        self.metrics().record_written();
        if self.handle.has_listeners() {
            for listener in self.handle.listeners() {
                listener.row_written(schema, &row);
            }
        }

        if self.outputs.is_empty() {
            return Ok(());
        }

        match self.step_meta.distribution {
            Distribution::RoundRobin => self.put_round_robin(schema, row),
            Distribution::CopyToAll => self.put_to_all(schema, row),
        }
    }

    fn put_round_robin(&mut self, schema: &Arc<Schema>, mut row: Row) -> Result<(), StepError> {
        while !self.live_outputs.is_empty() {
            let index = self.next_output % self.live_outputs.len();
            match self.live_outputs[index].offer(Arc::clone(schema), row) {
                Ok(()) => {
                    self.next_output = index + 1;
                    return Ok(());
                }
                Err((_, returned)) => {
                    row = returned;
                    self.live_outputs.remove(index);
                    self.next_output = index;
                }
            }
        }
        Err(StepError::OutputClosed)
    }

    fn put_to_all(&mut self, schema: &Arc<Schema>, row: Row) -> Result<(), StepError> {
        let mut delivered = false;
        self.live_outputs.retain(|rs| {
            let open = rs.offer(Arc::clone(schema), row.clone()).is_ok();
            delivered |= open;
            open
        });
        if delivered {
            Ok(())
        } else {
            Err(StepError::OutputClosed)
        }
    }

    /// Emit a row on one specific output.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::OutputClosed`] if that output is closed
    pub fn put_row_to(
        &mut self,
        row_set: &RowSet,
        schema: &Arc<Schema>,
        row: Row,
    ) -> Result<(), StepError> {
        self.metrics().record_written();
        if self.handle.has_listeners() {
            for listener in self.handle.listeners() {
                listener.row_written(schema, &row);
            }
        }
        row_set
            .put(Arc::clone(schema), row)
            .map_err(|_| StepError::OutputClosed)
    }

    /// Send a rejected row to the error hop.
    ///
    /// The row is extended with the [`ERROR_FIELDS`]: the error count, a
    /// description, the offending field names and the error codes.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::Process`] carrying `description` when the step
    /// has no error hop, which makes the error fatal
    pub fn put_error(
        &mut self,
        schema: &Arc<Schema>,
        mut row: Row,
        nr_errors: i64,
        description: &str,
        fields: &str,
        codes: &str,
    ) -> Result<(), StepError> {
        if self.error_outputs.is_empty() {
            return Err(StepError::process(self.step_name(), description));
        }

        let error_schema = self.error_schema_for(schema)?;
        let base = schema.len();
        row.grow_to(error_schema.len());
        row.set(base, Value::Integer(nr_errors));
        row.set(base + 1, Value::from(description));
        row.set(base + 2, Value::from(fields));
        row.set(base + 3, Value::from(codes));

        self.metrics().record_rejected();
        tracing::debug!(copy = %self.copy_id, %description, "row sent to error hop");
        if self.handle.has_listeners() {
            for listener in self.handle.listeners() {
                listener.error_row_written(&error_schema, &row);
            }
        }

        let outputs = self.error_outputs.len();
        for attempt in 0..outputs {
            let index = (self.next_error_output + attempt) % outputs;
            match self.error_outputs[index].offer(Arc::clone(&error_schema), row) {
                Ok(()) => {
                    self.next_error_output = index + 1;
                    return Ok(());
                }
                Err((_, returned)) => row = returned,
            }
        }
        Err(StepError::OutputClosed)
    }

    fn error_schema_for(&mut self, schema: &Arc<Schema>) -> Result<Arc<Schema>, StepError> {
        if let Some(cached) = &self.error_schema {
            if Arc::ptr_eq(&cached.input, schema) {
                return Ok(Arc::clone(&cached.output));
            }
        }
        let mut output = Schema::clone(schema);
        output.add_field(FieldMeta::new(ERROR_FIELDS[0], ValueType::Integer))?;
        for name in &ERROR_FIELDS[1..] {
            output.add_field(FieldMeta::new(*name, ValueType::String))?;
        }
        let output = Arc::new(output);
        self.error_schema = Some(ErrorSchema {
            input: Arc::clone(schema),
            output: Arc::clone(&output),
        });
        Ok(output)
    }

    /// Signal end-of-stream on every output, regular and error
    pub fn set_output_done(&self) {
        for row_set in self.outputs.iter().chain(&self.error_outputs) {
            row_set.mark_done();
        }
    }

    /// Release every producer feeding this copy
    pub(crate) fn close_inputs(&self) {
        for row_set in &self.inputs {
            row_set.cancel();
        }
    }

    pub(crate) fn handle(&self) -> &Arc<StepHandle> {
        &self.handle
    }

    pub(crate) fn shared(&self) -> &Arc<TransShared> {
        &self.shared
    }
}
