//! Step capability contract.
//!
//! The exec runtime resolves a `StepMeta` once per step (immutable, shared by
//! all copies), asks it for one `StepBehavior` per copy (private mutable state),
//! then drives `init` / `process` / `dispose` on that behaviour. Behaviours only
//! ever see rows through `RowIo`, so the same implementation runs unchanged on
//! a dedicated thread or inside the cooperative single-thread loop.

use std::sync::Arc;

use rowflow_core::prelude::{ExecutionMode, Row, RowSchema};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StepError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("error tolerance exceeded: {errors} errors, tolerance {tolerance}")]
    ToleranceExceeded { errors: u64, tolerance: u64 },

    #[error("schema error: {0}")]
    Schema(String),

    #[error("step stopped")]
    Stopped,

    #[error("step failed: {0}")]
    Failed(String),
}

impl StepError {
    /// True when the error only reflects a stop request, not a failure.
    pub fn is_stop(&self) -> bool {
        matches!(self, StepError::Stopped)
    }
}

impl From<rowflow_core::Error> for StepError {
    fn from(e: rowflow_core::Error) -> Self {
        match e {
            rowflow_core::Error::Schema(msg) => StepError::Schema(msg),
            rowflow_core::Error::Config(msg) => StepError::Config(msg),
            other => StepError::Failed(other.to_string()),
        }
    }
}

/// Outcome of one read attempt.
#[derive(Debug)]
pub enum Fetch {
    Row(Row),
    /// Nothing buffered right now, inputs still open. Only seen in cooperative mode.
    Idle,
    /// Every input is finished and drained.
    Done,
}

impl Fetch {
    /// `Err` carries the pass outcome a single-row step should return.
    pub fn into_row(self) -> Result<Row, Pass> {
        match self {
            Fetch::Row(row) => Ok(row),
            Fetch::Idle => Err(Pass::MoreWork),
            Fetch::Done => Err(Pass::NoMoreInput),
        }
    }
}

/// Outcome of one successful pass. Failure is `Err(StepError)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Call again; there may be more to do.
    MoreWork,
    /// All inputs exhausted; the step is done.
    NoMoreInput,
}

/// Identity and environment of the copy being initialized.
#[derive(Debug, Clone)]
pub struct StepContext<'a> {
    pub step: &'a str,
    pub copy: usize,
    pub copies: usize,
    pub mode: ExecutionMode,
    /// Names of the steps this step's hops lead to.
    pub targets: &'a [String],
}

/// Row input/output surface handed to a behaviour on every pass.
///
/// In threaded mode `get_row` and the `put_*` calls may block under
/// backpressure. In cooperative mode they never block: `get_row` returns
/// `Fetch::Idle` instead of waiting.
pub trait RowIo {
    fn step_name(&self) -> &str;

    fn copy(&self) -> usize;

    fn get_row(&mut self) -> Fetch;

    /// Schema of the channel the last row came from.
    fn input_schema(&self) -> Option<Arc<RowSchema>>;

    /// Emit a row to every output hop according to the step's output mode.
    fn put_row(&mut self, schema: &Arc<RowSchema>, row: Row) -> Result<(), StepError>;

    /// Emit a row to the hop leading to `target` only.
    fn put_row_to(
        &mut self,
        target: &str,
        schema: &Arc<RowSchema>,
        row: Row,
    ) -> Result<(), StepError>;

    /// Divert a failed row to the error sink. Fails once the step's error
    /// tolerance is exceeded; propagate that with `?`.
    fn put_error(&mut self, schema: &Arc<RowSchema>, row: Row, cause: &str)
        -> Result<(), StepError>;

    /// True once the run has been asked to stop.
    fn is_stopped(&self) -> bool;
}

/// Per-copy behaviour holding the copy's private mutable state.
pub trait StepBehavior: Send + 'static {
    /// Allocate state and validate the environment. Failure is fatal to the run.
    fn init(&mut self, _ctx: &StepContext<'_>) -> Result<(), StepError> {
        Ok(())
    }

    /// One unit of work: read zero or more rows, write zero or more rows.
    fn process(&mut self, io: &mut dyn RowIo) -> Result<Pass, StepError>;

    /// Release resources. Called exactly once, on every terminal transition.
    fn dispose(&mut self) {}
}

/// Immutable, validated step configuration shared by all copies.
pub trait StepMeta: Send + Sync + 'static {
    /// Registry key (stable).
    fn kind(&self) -> &'static str;

    /// Fresh behaviour for one copy.
    fn create(&self) -> Box<dyn StepBehavior>;

    /// Steps addressed by name through `put_row_to`; checked against the
    /// step's hops when the graph is built.
    fn target_steps(&self) -> Vec<String> {
        vec![]
    }
}
