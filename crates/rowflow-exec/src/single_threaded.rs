//! Cooperative executor: the caller drives the pipeline one iteration at a
//! time on its own thread.
//!
//! Units run in topological order, channels are unbounded, and no call ever
//! blocks. Given deterministic steps, two runs over the same input produce
//! the same rows and counters.

use std::sync::Arc;

use rowflow_core::prelude::{ExecutionMode, RunReport, RunState, StepState, StepStatus};
use rowflow_core::report::aggregate_state;
use rowflow_steps::Pass;

use crate::graph::PipelineGraph;
use crate::rowset::{ChannelStats, RowSet};
use crate::runtime::{now_ms, ExecError};
use crate::unit::StepUnit;

pub struct CooperativeExecutor {
    report: RunReport,
    units: Vec<StepUnit>,
    channels: Vec<Arc<RowSet>>,
    initialized: bool,
    failed: bool,
    iterations: u64,
}

impl CooperativeExecutor {
    pub fn new(graph: PipelineGraph) -> Result<Self, ExecError> {
        let parts = graph.into_parts();
        if parts.mode != ExecutionMode::Cooperative {
            return Err(ExecError::Mode(
                "graph was built for threaded execution".into(),
            ));
        }
        Ok(Self {
            report: RunReport::new(parts.name, parts.fingerprint, parts.mode, now_ms()),
            units: parts.units,
            channels: parts.channels,
            initialized: false,
            failed: false,
            iterations: 0,
        })
    }

    /// Initialize every unit in dependency order. Later calls are no-ops.
    ///
    /// On failure every unit is disposed and the executor stays unusable.
    pub fn init(&mut self) -> Result<(), ExecError> {
        if self.initialized || self.failed {
            return Ok(());
        }
        for i in 0..self.units.len() {
            if let Err(cause) = self.units[i].init() {
                let id = self.units[i].id().clone();
                tracing::error!(step = %id, error = %cause, "step initialization failed");
                self.units[i].settle(StepState::Errored, Some(cause.to_string()));
                self.failed = true;
                self.dispose();
                return Err(ExecError::Init {
                    step: id.step.to_string(),
                    copy: id.copy,
                    cause,
                });
            }
        }
        self.initialized = true;
        self.report.started_ms = now_ms();
        tracing::info!(
            pipeline = %self.report.pipeline,
            run = %self.report.id,
            units = self.units.len(),
            "cooperative run initialized"
        );
        Ok(())
    }

    /// Give every live unit one pass, in topological order.
    ///
    /// Returns `true` while some unit reported more work or some channel still
    /// holds rows. Returns `false` once everything drained, or right away after
    /// a step failure.
    pub fn one_iteration(&mut self) -> bool {
        if !self.initialized || self.failed {
            if !self.initialized && !self.failed {
                tracing::warn!(pipeline = %self.report.pipeline, "one_iteration before init");
            }
            return false;
        }
        self.iterations += 1;

        let mut more = false;
        for unit in &mut self.units {
            if unit.state().is_terminal() {
                continue;
            }
            match unit.process_once() {
                Ok(Pass::MoreWork) => more = true,
                Ok(Pass::NoMoreInput) => unit.settle(StepState::Finished, None),
                Err(e) if e.is_stop() => unit.settle(StepState::Stopped, Some(e.to_string())),
                Err(e) => {
                    tracing::error!(step = %unit.id(), error = %e, "step failed");
                    unit.settle(StepState::Errored, Some(e.to_string()));
                    self.failed = true;
                    return false;
                }
            }
        }
        more || self.channels.iter().any(|c| c.size() > 0)
    }

    /// Iterate until the pipeline drains, a step fails, or `max_iterations`
    /// is reached. Initializes first if needed.
    pub fn run_to_completion(&mut self, max_iterations: u64) -> Result<RunState, ExecError> {
        self.init()?;
        while self.iterations < max_iterations && self.one_iteration() {}
        Ok(self.state())
    }

    /// Dispose every unit. Each unit is disposed once, however often this runs.
    pub fn dispose(&mut self) {
        for unit in &mut self.units {
            unit.dispose();
        }
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn state(&self) -> RunState {
        let states: Vec<StepState> = self.units.iter().map(StepUnit::state).collect();
        aggregate_state(&states, states.contains(&StepState::Stopped))
    }

    pub fn statuses(&self) -> Vec<StepStatus> {
        self.units
            .iter()
            .map(|u| u.shared().status(&self.channels))
            .collect()
    }

    pub fn channel_stats(&self) -> Vec<ChannelStats> {
        self.channels.iter().map(|c| c.stats()).collect()
    }

    /// Snapshot report of the run so far.
    pub fn report(&self) -> RunReport {
        let report = self
            .report
            .clone()
            .finish(now_ms(), self.state(), self.statuses());
        tracing::info!(
            pipeline = %report.pipeline,
            run = %report.id,
            state = ?report.state,
            iterations = self.iterations,
            rows_read = report.rows_read(),
            rows_written = report.rows_written(),
            errors = report.errors(),
            "cooperative run report"
        );
        report
    }
}

impl Drop for CooperativeExecutor {
    fn drop(&mut self) {
        self.dispose();
    }
}
