//! Step execution unit: one copy of one step, its behaviour, and its channels.
//!
//! The unit is the only owner of the behaviour's mutable state. Counters and
//! lifecycle state live in `StepShared` so monitors can sample them from any
//! thread while the unit runs.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rowflow_core::prelude::{ExecutionMode, Row, RowSchema, StepCopyId, StepState, StepStatus};
use rowflow_steps::{Fetch, Pass, RowIo, StepBehavior, StepContext, StepError, StepMeta};

use crate::distribution::Outputs;
use crate::error_sink::ErrorSink;
use crate::listener::RowListener;
use crate::metrics;
use crate::rowset::{Poll, RowSet};

/// Thread-safe view of one unit's progress.
pub(crate) struct StepShared {
    id: StepCopyId,
    lifecycle: Mutex<(StepState, Option<String>)>,
    rows_read: AtomicU64,
    rows_written: AtomicU64,
    errors: AtomicU64,
    rows_rejected: AtomicU64,
}

impl StepShared {
    fn new(id: StepCopyId) -> Self {
        Self {
            id,
            lifecycle: Mutex::new((StepState::Created, None)),
            rows_read: AtomicU64::new(0),
            rows_written: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            rows_rejected: AtomicU64::new(0),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, (StepState, Option<String>)> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn id(&self) -> &StepCopyId {
        &self.id
    }

    pub(crate) fn state(&self) -> StepState {
        self.lifecycle().0
    }

    fn set_state(&self, state: StepState, cause: Option<String>) {
        let mut lc = self.lifecycle();
        lc.0 = state;
        if cause.is_some() {
            lc.1 = cause;
        }
    }

    /// Snapshot; buffered counts come from the channels touching this copy.
    pub(crate) fn status(&self, channels: &[Arc<RowSet>]) -> StepStatus {
        let (state, cause) = self.lifecycle().clone();
        let input_buffered = channels
            .iter()
            .filter(|c| c.destination() == &self.id)
            .map(|c| c.size())
            .sum();
        let output_buffered = channels
            .iter()
            .filter(|c| c.origin() == &self.id)
            .map(|c| c.size())
            .sum();
        StepStatus {
            step: self.id.step.to_string(),
            copy: self.id.copy,
            state,
            rows_read: self.rows_read.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            rows_rejected: self.rows_rejected.load(Ordering::Relaxed),
            input_buffered,
            output_buffered,
            cause,
        }
    }
}

/// The `RowIo` handed to a behaviour on every pass.
pub(crate) struct StepIo {
    shared: Arc<StepShared>,
    mode: ExecutionMode,
    inputs: Vec<Arc<RowSet>>,
    next_input: usize,
    last_schema: Option<Arc<RowSchema>>,
    outputs: Outputs,
    listeners: Vec<Arc<dyn RowListener>>,
    error_sink: Arc<dyn ErrorSink>,
    tolerance: u64,
    safe_mode: bool,
    poll_interval: Duration,
    abort: Arc<AtomicBool>,
}

impl StepIo {
    /// Take a row from the first input (from the rotation cursor) that has one.
    /// `Done` only once every input is done and drained.
    fn sweep(&mut self) -> Poll {
        let n = self.inputs.len();
        let mut all_done = true;
        for k in 0..n {
            let i = (self.next_input + k) % n;
            match self.inputs[i].try_get() {
                Poll::Row(row) => {
                    self.next_input = (i + 1) % n;
                    self.accept(i, &row);
                    return Poll::Row(row);
                }
                Poll::Empty => all_done = false,
                Poll::Done => {}
            }
        }
        if all_done {
            Poll::Done
        } else {
            Poll::Empty
        }
    }

    fn accept(&mut self, input: usize, row: &Row) {
        let schema = self.inputs[input].schema();
        if let Some(schema) = &schema {
            for l in &self.listeners {
                l.row_read(schema, row);
            }
        }
        self.last_schema = schema;
        self.shared.rows_read.fetch_add(1, Ordering::Relaxed);
    }

    fn get_blocking(&mut self) -> Fetch {
        loop {
            let live: Vec<usize> = (0..self.inputs.len())
                .filter(|&i| !self.inputs[i].is_finished())
                .collect();
            match live.as_slice() {
                [] => return Fetch::Done,
                [only] => {
                    let i = *only;
                    if let Some(row) = self.inputs[i].get() {
                        self.accept(i, &row);
                        return Fetch::Row(row);
                    }
                }
                _ => {
                    match self.sweep() {
                        Poll::Row(row) => return Fetch::Row(row),
                        Poll::Done => return Fetch::Done,
                        Poll::Empty => {}
                    }
                    let i = live
                        .iter()
                        .copied()
                        .find(|&i| i >= self.next_input)
                        .unwrap_or(live[0]);
                    if let Poll::Row(row) = self.inputs[i].get_timeout(self.poll_interval) {
                        self.next_input = (i + 1) % self.inputs.len();
                        self.accept(i, &row);
                        return Fetch::Row(row);
                    }
                }
            }
            if self.abort.load(Ordering::Acquire) {
                return Fetch::Done;
            }
        }
    }

    /// Write `row` through `send`; listeners and counters only see rows the
    /// outputs accepted.
    fn emit(
        &mut self,
        schema: &Arc<RowSchema>,
        row: Row,
        send: impl FnOnce(&mut Outputs, &Arc<RowSchema>, Row) -> Result<(), StepError>,
    ) -> Result<(), StepError> {
        if self.safe_mode {
            schema.check_row(&row)?;
        }
        let seen = (!self.listeners.is_empty()).then(|| row.clone());
        send(&mut self.outputs, schema, row)?;
        if let Some(row) = seen {
            for l in &self.listeners {
                l.row_written(schema, &row);
            }
        }
        self.shared.rows_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl RowIo for StepIo {
    fn step_name(&self) -> &str {
        &self.shared.id.step
    }

    fn copy(&self) -> usize {
        self.shared.id.copy
    }

    fn get_row(&mut self) -> Fetch {
        if self.inputs.is_empty() {
            return Fetch::Done;
        }
        match self.mode {
            ExecutionMode::Threaded => self.get_blocking(),
            ExecutionMode::Cooperative => match self.sweep() {
                Poll::Row(row) => Fetch::Row(row),
                Poll::Empty => Fetch::Idle,
                Poll::Done => Fetch::Done,
            },
        }
    }

    fn input_schema(&self) -> Option<Arc<RowSchema>> {
        self.last_schema.clone()
    }

    fn put_row(&mut self, schema: &Arc<RowSchema>, row: Row) -> Result<(), StepError> {
        self.emit(schema, row, |out, schema, row| out.send(schema, row))
    }

    fn put_row_to(
        &mut self,
        target: &str,
        schema: &Arc<RowSchema>,
        row: Row,
    ) -> Result<(), StepError> {
        self.emit(schema, row, |out, schema, row| out.send_to(target, schema, row))
    }

    fn put_error(
        &mut self,
        schema: &Arc<RowSchema>,
        row: Row,
        cause: &str,
    ) -> Result<(), StepError> {
        let errors = self.shared.errors.fetch_add(1, Ordering::Relaxed) + 1;
        self.shared.rows_rejected.fetch_add(1, Ordering::Relaxed);
        self.error_sink.error_row(&self.shared.id, schema, &row, cause);
        for l in &self.listeners {
            l.error_row_written(schema, &row);
        }
        if errors > self.tolerance {
            return Err(StepError::ToleranceExceeded {
                errors,
                tolerance: self.tolerance,
            });
        }
        Ok(())
    }

    fn is_stopped(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }
}

/// Static wiring of one unit, assembled by the graph builder.
pub(crate) struct UnitSpec {
    pub id: StepCopyId,
    pub copies: usize,
    pub mode: ExecutionMode,
    pub meta: Arc<dyn StepMeta>,
    pub outputs: Outputs,
    pub error_sink: Arc<dyn ErrorSink>,
    pub tolerance: u64,
    pub safe_mode: bool,
    pub poll_interval: Duration,
    pub abort: Arc<AtomicBool>,
}

pub struct StepUnit {
    meta: Arc<dyn StepMeta>,
    behavior: Box<dyn StepBehavior>,
    io: StepIo,
    copies: usize,
    disposed: bool,
}

impl StepUnit {
    pub(crate) fn new(spec: UnitSpec) -> Self {
        let shared = Arc::new(StepShared::new(spec.id));
        let behavior = spec.meta.create();
        Self {
            meta: spec.meta,
            behavior,
            io: StepIo {
                shared,
                mode: spec.mode,
                inputs: Vec::new(),
                next_input: 0,
                last_schema: None,
                outputs: spec.outputs,
                listeners: Vec::new(),
                error_sink: spec.error_sink,
                tolerance: spec.tolerance,
                safe_mode: spec.safe_mode,
                poll_interval: spec.poll_interval,
                abort: spec.abort,
            },
            copies: spec.copies,
            disposed: false,
        }
    }

    pub fn id(&self) -> &StepCopyId {
        &self.io.shared.id
    }

    pub fn kind(&self) -> &'static str {
        self.meta.kind()
    }

    pub fn state(&self) -> StepState {
        self.io.shared.state()
    }

    pub(crate) fn shared(&self) -> Arc<StepShared> {
        Arc::clone(&self.io.shared)
    }

    pub(crate) fn add_input(&mut self, channel: Arc<RowSet>) {
        self.io.inputs.push(channel);
    }

    pub(crate) fn add_listener(&mut self, listener: Arc<dyn RowListener>) {
        self.io.listeners.push(listener);
    }

    pub(crate) fn set_error_sink(&mut self, sink: Arc<dyn ErrorSink>) {
        self.io.error_sink = sink;
    }

    pub(crate) fn init(&mut self) -> Result<(), StepError> {
        let targets = self.io.outputs.targets();
        let ctx = StepContext {
            step: &self.io.shared.id.step,
            copy: self.io.shared.id.copy,
            copies: self.copies,
            mode: self.io.mode,
            targets: &targets,
        };
        self.behavior.init(&ctx)?;
        self.io.shared.set_state(StepState::Initialized, None);
        tracing::debug!(step = %self.id(), kind = self.kind(), "step initialized");
        Ok(())
    }

    /// One pass of the behaviour. A panic is reported as a step failure.
    pub(crate) fn process_once(&mut self) -> Result<Pass, StepError> {
        if self.io.shared.state() == StepState::Initialized {
            self.io.shared.set_state(StepState::Running, None);
        }
        let behavior = &mut self.behavior;
        let io = &mut self.io;
        catch_unwind(AssertUnwindSafe(|| behavior.process(io))).unwrap_or_else(|payload| {
            Err(StepError::Failed(format!(
                "panic in step pass: {}",
                panic_message(payload.as_ref())
            )))
        })
    }

    /// Enter a terminal state: record the cause, dispose, close outputs.
    pub(crate) fn finish(&mut self, state: StepState, cause: Option<String>) {
        self.dispose();
        self.settle(state, cause);
    }

    /// Enter a terminal state without disposing; the cooperative executor
    /// disposes all units together.
    pub(crate) fn settle(&mut self, state: StepState, cause: Option<String>) {
        if state == StepState::Errored {
            self.io.shared.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.io.shared.set_state(state, cause);
        self.io.outputs.mark_done();
        let status = self.io.shared.status(&[]);
        metrics::emit_span(
            "step_finished",
            &[
                ("step", self.id().to_string()),
                ("state", format!("{state:?}")),
                ("rows_read", status.rows_read.to_string()),
                ("rows_written", status.rows_written.to_string()),
                ("errors", status.errors.to_string()),
            ],
        );
    }

    /// Release the behaviour's resources. Only the first call has an effect.
    pub(crate) fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        let behavior = &mut self.behavior;
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| behavior.dispose())) {
            tracing::error!(
                step = %self.id(),
                cause = %panic_message(payload.as_ref()),
                "panic while disposing step"
            );
        }
        tracing::debug!(step = %self.id(), "step disposed");
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
