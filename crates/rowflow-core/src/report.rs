//! Run and step status snapshots.
//!
//! The engine emits a `RunReport` when a run reaches a terminal state; step
//! statuses can be sampled at any time while the run is live. Snapshots are
//! plain data and never hold a lock on the running pipeline.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hash::Hash256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        RunId(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// One thread per step-copy, bounded channels.
    Threaded,
    /// Caller-driven passes on one thread, unbounded channels.
    Cooperative,
}

/// Lifecycle of one step-copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepState {
    Created,
    Initialized,
    Running,
    Finished,
    Stopped,
    Errored,
}

impl StepState {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepState::Finished | StepState::Stopped | StepState::Errored)
    }
}

/// Terminal (or current) state of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Running,
    Finished,
    Stopped,
    Errored,
}

/// Point-in-time view of one step-copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStatus {
    pub step: String,
    pub copy: usize,
    pub state: StepState,
    pub rows_read: u64,
    pub rows_written: u64,
    pub errors: u64,
    pub rows_rejected: u64,
    /// Rows waiting in this copy's input channels.
    pub input_buffered: usize,
    /// Rows waiting in this copy's output channels.
    pub output_buffered: usize,
    /// Why the copy stopped or failed, if it did.
    pub cause: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub id: RunId,
    pub pipeline: String,

    /// Stable hash of the pipeline definition that was run.
    pub fingerprint: Hash256,

    pub mode: ExecutionMode,
    pub state: RunState,

    /// Engine version string for provenance.
    pub engine_version: String,

    /// Milliseconds since Unix epoch (UTC).
    pub started_ms: u64,
    pub finished_ms: u64,

    pub steps: Vec<StepStatus>,
}

impl RunReport {
    pub fn new(pipeline: String, fingerprint: Hash256, mode: ExecutionMode, started_ms: u64) -> Self {
        Self {
            id: RunId::new(),
            pipeline,
            fingerprint,
            mode,
            state: RunState::Running,
            engine_version: crate::VERSION.to_string(),
            started_ms,
            finished_ms: started_ms,
            steps: vec![],
        }
    }

    pub fn finish(mut self, finished_ms: u64, state: RunState, steps: Vec<StepStatus>) -> Self {
        self.finished_ms = finished_ms;
        self.state = state;
        self.steps = steps;
        self
    }

    pub fn rows_read(&self) -> u64 {
        self.steps.iter().map(|s| s.rows_read).sum()
    }

    pub fn rows_written(&self) -> u64 {
        self.steps.iter().map(|s| s.rows_written).sum()
    }

    pub fn errors(&self) -> u64 {
        self.steps.iter().map(|s| s.errors).sum()
    }

    /// Statuses of every copy of `step`, in copy order.
    pub fn step(&self, step: &str) -> Vec<&StepStatus> {
        self.steps.iter().filter(|s| s.step == step).collect()
    }

    /// First recorded failure cause, if any copy errored.
    pub fn first_error(&self) -> Option<&str> {
        self.steps
            .iter()
            .find(|s| s.state == StepState::Errored)
            .and_then(|s| s.cause.as_deref())
    }
}

/// Aggregate step states into a run state.
///
/// Any errored copy makes the run errored. Once every copy is terminal the run
/// is stopped only if some copy actually stopped; a stop request that arrives
/// after normal completion does not change the outcome. While copies are still
/// live, a pending stop request reports the run as stopped.
pub fn aggregate_state<'a>(
    states: impl IntoIterator<Item = &'a StepState>,
    stop_requested: bool,
) -> RunState {
    let mut all_terminal = true;
    let mut any_stopped = false;
    for s in states {
        match s {
            StepState::Errored => return RunState::Errored,
            StepState::Finished => {}
            StepState::Stopped => any_stopped = true,
            _ => all_terminal = false,
        }
    }
    if any_stopped || (stop_requested && !all_terminal) {
        RunState::Stopped
    } else if all_terminal {
        RunState::Finished
    } else {
        RunState::Running
    }
}
