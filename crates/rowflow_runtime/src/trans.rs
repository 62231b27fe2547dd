//! The trans coordinator.
//!
//! A [`Trans`] turns a [`TransMeta`] into running step copies: it builds
//! every copy through the [`StepRegistry`], wires a row set per hop and
//! copy pair, initializes all copies in parallel, then runs each copy on
//! its own OS thread until every thread has left its row loop.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rowflow_core::{CopyId, RunId};
use rowflow_plan::{TransMeta, Validator};
use serde::Serialize;

use crate::context::{StepContext, TransShared};
use crate::counter::CounterRegistry;
use crate::error::{StepError, TransError};
use crate::listener::RowListener;
use crate::metrics::{MetricsSnapshot, StepStatus};
use crate::plugin::StepRegistry;
use crate::rowset::RowSet;
use crate::step::{ProcessOutcome, Step, StepHandle};

/// Result type for trans operations
pub type TransResultOf<T> = Result<T, TransError>;

/// Overall state of a trans, as shown to users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransStatus {
    /// Not started yet
    Waiting,
    /// Copies are running
    Running,
    /// Stop requested, copies still running
    Halting,
    /// Every copy ended without error
    Finished,
    /// Every copy ended, at least one with an error
    FinishedWithErrors,
    /// Every copy ended after a stop request
    Stopped,
}

impl std::fmt::Display for TransStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Waiting => "Waiting",
            Self::Running => "Running",
            Self::Halting => "Halting",
            Self::Finished => "Finished",
            Self::FinishedWithErrors => "Finished (with errors)",
            Self::Stopped => "Stopped",
        };
        f.write_str(text)
    }
}

/// Outcome of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct TransResult {
    /// Run identifier
    pub run_id: RunId,
    /// Trans name
    pub trans: String,
    /// Fatal errors across all copies
    pub errors: u64,
    /// A stop was requested
    pub stopped: bool,
    /// When the threads were started
    pub started_at: Option<DateTime<Utc>>,
    /// When the last thread was joined
    pub finished_at: DateTime<Utc>,
    /// Message of the first fatal error
    pub first_error: Option<String>,
    /// Metrics of every copy, in step definition order
    pub steps: Vec<MetricsSnapshot>,
}

impl TransResult {
    /// Check if any copy failed
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.errors > 0
    }

    /// Metrics of every copy of `step`
    #[must_use]
    pub fn step(&self, step: &str) -> Vec<&MetricsSnapshot> {
        self.steps.iter().filter(|s| s.step == step).collect()
    }

    /// Rows written by all copies of `step`
    #[must_use]
    pub fn lines_written(&self, step: &str) -> u64 {
        self.step(step).iter().map(|s| s.lines_written).sum()
    }

    /// Rows read by all copies of `step`
    #[must_use]
    pub fn lines_read(&self, step: &str) -> u64 {
        self.step(step).iter().map(|s| s.lines_read).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Waiting,
    Prepared,
    Running,
    Finished,
}

/// A step instance together with its context
struct StepCopy {
    step: Box<dyn Step>,
    ctx: StepContext,
}

impl StepCopy {
    fn init(&mut self) -> bool {
        let copy_id = self.ctx.copy_id().clone();
        let result = catch_unwind(AssertUnwindSafe(|| self.step.init(&mut self.ctx)));
        let handle = self.ctx.handle();
        match result {
            Ok(Ok(())) => {
                handle.set_status(StepStatus::Initialized);
                tracing::debug!(copy = %copy_id, "step initialized");
                true
            }
            Ok(Err(err)) => {
                tracing::error!(copy = %copy_id, error = %err, "error initializing step");
                handle.metrics().record_error();
                handle.set_outcome(StepStatus::Failed);
                false
            }
            Err(panic) => {
                tracing::error!(
                    copy = %copy_id,
                    error = %panic_message(&*panic),
                    "step panicked during init"
                );
                handle.metrics().record_error();
                handle.set_outcome(StepStatus::Failed);
                false
            }
        }
    }

    fn dispose(&mut self) {
        let copy_id = self.ctx.copy_id().clone();
        if catch_unwind(AssertUnwindSafe(|| self.step.dispose(&mut self.ctx))).is_err() {
            tracing::error!(copy = %copy_id, "step panicked during dispose");
        }
        self.ctx.handle().set_status(StepStatus::Disposed);
    }

    fn run(mut self) {
        let handle = Arc::clone(self.ctx.handle());
        let shared = Arc::clone(self.ctx.shared());
        let copy_id = self.ctx.copy_id().clone();
        let span = tracing::info_span!(
            "step",
            trans = %shared.name,
            step = %copy_id.step,
            copy = copy_id.copy
        );
        let _enter = span.enter();

        handle.set_status(StepStatus::Running);
        handle.metrics().mark_started();
        tracing::debug!("starting to run");

        let outcome = loop {
            if shared.is_stopped() {
                break StepStatus::Stopped;
            }
            match catch_unwind(AssertUnwindSafe(|| self.step.process_row(&mut self.ctx))) {
                Ok(Ok(ProcessOutcome::Continue)) => {}
                Ok(Ok(ProcessOutcome::Done)) => {
                    break if shared.is_stopped() {
                        StepStatus::Stopped
                    } else {
                        StepStatus::Finished
                    };
                }
                Ok(Err(StepError::OutputClosed)) => {
                    tracing::debug!("every output is closed");
                    break if shared.is_stopped() {
                        StepStatus::Stopped
                    } else {
                        StepStatus::Finished
                    };
                }
                Ok(Err(err)) => {
                    self.fail(&shared, &err.to_string());
                    break StepStatus::Failed;
                }
                Err(panic) => {
                    self.fail(&shared, &format!("panic: {}", panic_message(&*panic)));
                    break StepStatus::Failed;
                }
            }
        };

        handle.metrics().mark_stopped();
        self.ctx.set_output_done();
        self.ctx.close_inputs();
        handle.set_outcome(outcome);

        let snapshot = handle.snapshot();
        tracing::info!(status = %outcome, "finished processing ({})", snapshot.summary());

        self.dispose();
    }

    fn fail(&self, shared: &TransShared, message: &str) {
        let copy_id = self.ctx.copy_id();
        tracing::error!(error = %message, "unexpected error, stopping all steps");
        self.ctx.metrics().record_error();
        shared.record_error(format!("{copy_id}: {message}"));
        shared.stop();
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// One execution of a [`TransMeta`]
pub struct Trans {
    meta: Arc<TransMeta>,
    registry: StepRegistry,
    validator: Validator,
    shared: Arc<TransShared>,
    phase: Phase,
    copies: Vec<StepCopy>,
    handles: IndexMap<CopyId, Arc<StepHandle>>,
    row_sets: Vec<Arc<RowSet>>,
    threads: Vec<(CopyId, JoinHandle<()>)>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl Trans {
    /// Create a trans for one run of `meta`
    #[must_use]
    pub fn new(meta: TransMeta, registry: StepRegistry) -> Self {
        let shared = Arc::new(TransShared::new(meta.name.clone()));
        Self {
            meta: Arc::new(meta),
            registry,
            validator: Validator::new(),
            shared,
            phase: Phase::Waiting,
            copies: Vec::new(),
            handles: IndexMap::new(),
            row_sets: Vec::new(),
            threads: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Use a custom validator
    #[must_use]
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    /// Run identifier
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.shared.run_id
    }

    /// Trans definition
    #[must_use]
    pub fn meta(&self) -> &TransMeta {
        &self.meta
    }

    /// Build, wire and initialize every step copy.
    ///
    /// # Errors
    ///
    /// Returns error if the definition is invalid, a step kind is unknown
    /// or cannot be built, or any copy fails to initialize. In the last
    /// case every copy has been disposed.
    pub fn prepare_execution(&mut self) -> TransResultOf<()> {
        if self.phase != Phase::Waiting {
            return Err(TransError::InvalidState {
                reason: "prepare_execution may only be called once".to_string(),
            });
        }

        self.validator
            .validate(&self.meta)
            .map_err(TransError::Validation)?;

        tracing::info!(trans = %self.meta.name, run = %self.shared.run_id, "preparing execution");
        self.build_copies()?;
        self.wire_row_sets();

        let failed = self.init_copies();
        if !failed.is_empty() {
            for _ in &failed {
                self.shared.record_error("step initialization failed");
            }
            for copy in &mut self.copies {
                copy.dispose();
            }
            self.copies.clear();
            self.phase = Phase::Finished;
            self.finished_at = Some(Utc::now());
            tracing::error!(steps = ?failed, "unable to initialize steps");
            return Err(TransError::InitFailed { steps: failed });
        }

        self.phase = Phase::Prepared;
        Ok(())
    }

    fn build_copies(&mut self) -> TransResultOf<()> {
        for step_meta in self.meta.steps.values() {
            let factory = self
                .registry
                .get(&step_meta.kind)
                .ok_or_else(|| TransError::UnknownKind {
                    step: step_meta.name.clone(),
                    kind: step_meta.kind.clone(),
                })?;

            for copy in 0..step_meta.copies {
                let step = factory(step_meta).map_err(|source| TransError::Construction {
                    step: step_meta.name.clone(),
                    source,
                })?;
                let copy_id = CopyId::new(step_meta.name.clone(), copy);
                let handle = Arc::new(StepHandle::new(copy_id.clone(), step_meta.kind.clone()));
                self.shared
                    .handles
                    .insert(copy_id.clone(), Arc::clone(&handle));
                self.handles.insert(copy_id.clone(), Arc::clone(&handle));
                let ctx = StepContext::new(
                    copy_id,
                    Arc::clone(&self.meta),
                    Arc::clone(&self.shared),
                    handle,
                );
                self.copies.push(StepCopy { step, ctx });
            }
        }
        Ok(())
    }

    /// One row set per copy pair: copy `i` feeds copy `i` when both steps
    /// run the same number of copies, every copy feeds every copy otherwise.
    fn wire_row_sets(&mut self) {
        let index: IndexMap<CopyId, usize> = self
            .copies
            .iter()
            .enumerate()
            .map(|(i, c)| (c.ctx.copy_id().clone(), i))
            .collect();

        let hops: Vec<_> = self.meta.active_hops().cloned().collect();
        for hop in hops {
            let (Some(from), Some(to)) = (self.meta.step(&hop.from), self.meta.step(&hop.to)) else {
                continue;
            };
            let pairs: Vec<(usize, usize)> = if from.copies == to.copies {
                (0..from.copies).map(|i| (i, i)).collect()
            } else {
                (0..from.copies)
                    .flat_map(|i| (0..to.copies).map(move |j| (i, j)))
                    .collect()
            };

            for (i, j) in pairs {
                let origin = CopyId::new(hop.from.clone(), i);
                let destination = CopyId::new(hop.to.clone(), j);
                let (Some(&producer), Some(&consumer)) =
                    (index.get(&origin), index.get(&destination))
                else {
                    continue;
                };
                let row_set = Arc::new(RowSet::new(origin, destination, self.meta.row_set_size));
                if hop.error {
                    self.copies[producer].ctx.add_error_output(Arc::clone(&row_set));
                } else {
                    self.copies[producer].ctx.add_output(Arc::clone(&row_set));
                }
                self.copies[consumer].ctx.add_input(Arc::clone(&row_set));
                tracing::debug!(row_set = %row_set.name(), error = hop.error, "allocated row set");
                self.row_sets.push(row_set);
            }
        }
    }

    /// Initialize every copy on its own thread; returns the copies that failed
    fn init_copies(&mut self) -> Vec<String> {
        thread::scope(|scope| {
            let workers: Vec<_> = self
                .copies
                .iter_mut()
                .map(|copy| {
                    let name = copy.ctx.copy_id().to_string();
                    let worker = thread::Builder::new()
                        .name(format!("init {name}"))
                        .spawn_scoped(scope, move || copy.init());
                    (name, worker)
                })
                .collect();

            workers
                .into_iter()
                .filter_map(|(name, worker)| {
                    let ok = match worker {
                        Ok(worker) => worker.join().unwrap_or(false),
                        Err(err) => {
                            tracing::error!(
                                copy = %name,
                                error = %err,
                                "unable to start init thread"
                            );
                            false
                        }
                    };
                    (!ok).then_some(name)
                })
                .collect()
        })
    }

    /// Start one thread per copy.
    ///
    /// # Errors
    ///
    /// Returns error if the trans is not prepared or a thread cannot be
    /// spawned; in the latter case the trans is stopped.
    pub fn start_threads(&mut self) -> TransResultOf<()> {
        if self.phase != Phase::Prepared {
            return Err(TransError::InvalidState {
                reason: "start_threads requires a prepared trans".to_string(),
            });
        }

        self.phase = Phase::Running;
        self.started_at = Some(Utc::now());
        tracing::info!(trans = %self.meta.name, copies = self.copies.len(), "starting threads");

        let mut copies = std::mem::take(&mut self.copies).into_iter();
        while let Some(copy) = copies.next() {
            let copy_id = copy.ctx.copy_id().clone();
            let spawned = thread::Builder::new()
                .name(copy_id.to_string())
                .spawn(move || copy.run());
            match spawned {
                Ok(thread) => self.threads.push((copy_id, thread)),
                Err(source) => {
                    tracing::error!(
                        copy = %copy_id,
                        error = %source,
                        "unable to start step thread"
                    );
                    self.shared
                        .record_error(format!("{copy_id}: unable to start thread"));
                    self.shared.stop();
                    for row_set in &self.row_sets {
                        row_set.mark_done();
                        row_set.cancel();
                    }
                    for mut rest in copies {
                        rest.ctx.handle().set_outcome(StepStatus::Stopped);
                        rest.dispose();
                    }
                    if let Some(handle) = self.handles.get(&copy_id) {
                        handle.set_outcome(StepStatus::Failed);
                        handle.set_status(StepStatus::Disposed);
                    }
                    return Err(TransError::Spawn {
                        copy: copy_id.to_string(),
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    /// Prepare and start in one call.
    ///
    /// # Errors
    ///
    /// Returns any error of [`Trans::prepare_execution`] or
    /// [`Trans::start_threads`]
    pub fn execute(&mut self) -> TransResultOf<()> {
        self.prepare_execution()?;
        self.start_threads()
    }

    /// Ask every copy to stop at its next loop iteration
    pub fn stop_all(&self) {
        tracing::info!(trans = %self.meta.name, "stopping all steps");
        self.shared.stop();
    }

    /// Join every thread and report the outcome
    pub fn wait_until_finished(&mut self) -> TransResult {
        for (copy_id, thread) in self.threads.drain(..) {
            if thread.join().is_err() {
                tracing::error!(copy = %copy_id, "step thread panicked");
                self.shared.record_error(format!("{copy_id}: thread panicked"));
            }
        }
        if self.phase == Phase::Running {
            self.phase = Phase::Finished;
            self.finished_at = Some(Utc::now());
        }

        let result = self.result();
        if result.is_failed() {
            tracing::error!(
                trans = %result.trans,
                errors = result.errors,
                "trans finished with errors"
            );
        } else {
            tracing::info!(trans = %result.trans, "trans finished");
        }
        result
    }

    fn result(&self) -> TransResult {
        TransResult {
            run_id: self.shared.run_id,
            trans: self.meta.name.clone(),
            errors: self.shared.errors(),
            stopped: self.shared.is_stopped(),
            started_at: self.started_at,
            finished_at: self.finished_at.unwrap_or_else(Utc::now),
            first_error: self.shared.first_error(),
            steps: self.step_metrics(),
        }
    }

    /// Fatal errors so far
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.shared.errors()
    }

    /// Check if a stop was requested
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    /// Check if every copy has left its row loop
    #[must_use]
    pub fn is_finished(&self) -> bool {
        match self.phase {
            Phase::Waiting | Phase::Prepared => false,
            Phase::Running => self.handles.values().all(|h| h.is_finished()),
            Phase::Finished => true,
        }
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> TransStatus {
        match self.phase {
            Phase::Waiting | Phase::Prepared => TransStatus::Waiting,
            _ if self.is_finished() => {
                if self.errors() > 0 {
                    TransStatus::FinishedWithErrors
                } else if self.is_stopped() {
                    TransStatus::Stopped
                } else {
                    TransStatus::Finished
                }
            }
            _ if self.is_stopped() => TransStatus::Halting,
            _ => TransStatus::Running,
        }
    }

    /// Metrics of every copy, in step definition order
    #[must_use]
    pub fn step_metrics(&self) -> Vec<MetricsSnapshot> {
        self.handles.values().map(|h| h.snapshot()).collect()
    }

    /// Handle of one copy
    #[must_use]
    pub fn step_handle(&self, step: &str, copy: usize) -> Option<Arc<StepHandle>> {
        self.handles.get(&CopyId::new(step, copy)).cloned()
    }

    /// Every row set, in wiring order
    #[must_use]
    pub fn row_sets(&self) -> &[Arc<RowSet>] {
        &self.row_sets
    }

    /// Attach a listener to one copy
    ///
    /// # Errors
    ///
    /// Returns error if the trans is not prepared or the copy does not exist
    pub fn add_row_listener(
        &self,
        step: &str,
        copy: usize,
        listener: Arc<dyn RowListener>,
    ) -> TransResultOf<()> {
        let copy_id = CopyId::new(step, copy);
        let handle = self.handles.get(&copy_id).ok_or_else(|| TransError::CopyNotFound {
            copy: copy_id.to_string(),
        })?;
        handle.add_listener(listener);
        Ok(())
    }

    /// Run-wide named counters
    #[must_use]
    pub fn counters(&self) -> &CounterRegistry {
        &self.shared.counters
    }
}

impl std::fmt::Debug for Trans {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trans")
            .field("name", &self.meta.name)
            .field("run_id", &self.shared.run_id)
            .field("phase", &self.phase)
            .field("copies", &self.handles.len())
            .finish_non_exhaustive()
    }
}
