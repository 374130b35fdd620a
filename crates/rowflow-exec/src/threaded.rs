//! Threaded orchestrator: one OS thread per step-copy.
//!
//! Threads only talk through row channels. Stopping is cooperative: an abort
//! flag checked at the top of every loop plus `mark_done` on every channel, so
//! blocked `put`/`get` calls return promptly. Every unit disposes exactly once
//! on its own thread before it exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use rowflow_core::prelude::{ExecutionMode, RunReport, RunState, StepState, StepStatus};
use rowflow_core::report::aggregate_state;
use rowflow_steps::Pass;

use crate::graph::PipelineGraph;
use crate::rowset::{ChannelStats, RowSet};
use crate::runtime::{now_ms, ExecError};
use crate::unit::{StepShared, StepUnit};

struct RunControl {
    abort: Arc<AtomicBool>,
    stop_requested: AtomicBool,
    channels: Vec<Arc<RowSet>>,
}

impl RunControl {
    fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }

    fn abort(&self) {
        self.abort.store(true, Ordering::Release);
        for ch in &self.channels {
            ch.mark_done();
        }
    }

    fn request_stop(&self) {
        if !self.stop_requested.swap(true, Ordering::AcqRel) {
            tracing::warn!("stop requested");
        }
        self.abort();
    }

    fn stop_cause(&self) -> String {
        if self.stop_requested.load(Ordering::Acquire) {
            "run stopped".to_string()
        } else {
            "run aborted after a step failure".to_string()
        }
    }
}

/// Requests a stop of a running `Trans` from any thread.
#[derive(Clone)]
pub struct StopHandle {
    control: Arc<RunControl>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.control.request_stop();
    }
}

/// A running threaded pipeline.
pub struct Trans {
    report: RunReport,
    shared: Vec<Arc<StepShared>>,
    control: Arc<RunControl>,
    handles: Vec<JoinHandle<()>>,
}

impl Trans {
    /// Initialize every unit on the calling thread, then start one thread per unit.
    ///
    /// If any unit fails to initialize, all units are disposed, nothing is
    /// started, and the failure is returned.
    pub fn start(graph: PipelineGraph) -> Result<Self, ExecError> {
        let parts = graph.into_parts();
        if parts.mode != ExecutionMode::Threaded {
            return Err(ExecError::Mode(
                "graph was built for cooperative execution".into(),
            ));
        }

        let mut units = parts.units;
        if let Err(e) = init_all(&mut units) {
            for unit in &mut units {
                unit.dispose();
            }
            return Err(e);
        }

        let report = RunReport::new(parts.name, parts.fingerprint, parts.mode, now_ms());
        let control = Arc::new(RunControl {
            abort: parts.abort,
            stop_requested: AtomicBool::new(false),
            channels: parts.channels,
        });
        let shared: Vec<Arc<StepShared>> = units.iter().map(StepUnit::shared).collect();
        tracing::info!(
            pipeline = %report.pipeline,
            run = %report.id,
            units = units.len(),
            "threaded run started"
        );

        // Threads wait for their unit; units are handed over only once every
        // thread exists, so a failed spawn leaves all units here to dispose.
        let names: Vec<String> = units.iter().map(|u| u.id().to_string()).collect();
        let mut handles = Vec::with_capacity(units.len());
        let mut slots = Vec::with_capacity(units.len());
        for name in names {
            let mut builder = thread::Builder::new().name(name.clone());
            if let Some(size) = parts.thread_stack_size {
                builder = builder.stack_size(size);
            }
            let (tx, rx) = mpsc::sync_channel::<StepUnit>(1);
            let ctl = Arc::clone(&control);
            let spawned = builder.spawn(move || {
                if let Ok(unit) = rx.recv() {
                    run_unit(unit, ctl);
                }
            });
            match spawned {
                Ok(h) => {
                    handles.push(h);
                    slots.push(tx);
                }
                Err(e) => {
                    drop(slots);
                    for h in handles {
                        let _ = h.join();
                    }
                    for unit in &mut units {
                        unit.dispose();
                    }
                    tracing::error!(step = %name, error = %e, "failed to spawn step thread");
                    return Err(ExecError::Thread(format!("spawn {name}: {e}")));
                }
            }
        }
        for (tx, unit) in slots.into_iter().zip(units) {
            if let Err(mpsc::SendError(mut unit)) = tx.send(unit) {
                unit.finish(StepState::Stopped, Some("step thread exited early".into()));
            }
        }

        Ok(Self {
            report,
            shared,
            control,
            handles,
        })
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            control: Arc::clone(&self.control),
        }
    }

    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    /// True once every step thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handles.iter().all(JoinHandle::is_finished)
    }

    pub fn statuses(&self) -> Vec<StepStatus> {
        self.shared
            .iter()
            .map(|s| s.status(&self.control.channels))
            .collect()
    }

    pub fn channel_stats(&self) -> Vec<ChannelStats> {
        self.control.channels.iter().map(|c| c.stats()).collect()
    }

    /// Current aggregate state; `Running` until every unit is terminal.
    pub fn state(&self) -> RunState {
        let states: Vec<StepState> = self.shared.iter().map(|s| s.state()).collect();
        aggregate_state(&states, self.control.stop_requested.load(Ordering::Acquire))
    }

    /// Join every step thread and produce the run report.
    pub fn wait(self) -> RunReport {
        for (handle, shared) in self.handles.into_iter().zip(&self.shared) {
            if handle.join().is_err() {
                tracing::error!(step = %shared.id(), "step thread panicked");
            }
        }
        let steps: Vec<StepStatus> = self
            .shared
            .iter()
            .map(|s| s.status(&self.control.channels))
            .collect();
        let states: Vec<StepState> = steps.iter().map(|s| s.state).collect();
        let state = aggregate_state(&states, self.control.stop_requested.load(Ordering::Acquire));
        let report = self.report.finish(now_ms(), state, steps);
        tracing::info!(
            pipeline = %report.pipeline,
            run = %report.id,
            state = ?report.state,
            rows_read = report.rows_read(),
            rows_written = report.rows_written(),
            errors = report.errors(),
            "threaded run finished"
        );
        report
    }
}

fn init_all(units: &mut [StepUnit]) -> Result<(), ExecError> {
    for unit in units.iter_mut() {
        if let Err(cause) = unit.init() {
            let id = unit.id().clone();
            tracing::error!(step = %id, error = %cause, "step initialization failed");
            unit.settle(StepState::Errored, Some(cause.to_string()));
            return Err(ExecError::Init {
                step: id.step.to_string(),
                copy: id.copy,
                cause,
            });
        }
    }
    Ok(())
}

fn run_unit(mut unit: StepUnit, control: Arc<RunControl>) {
    let (state, cause) = loop {
        if control.is_aborted() {
            break (StepState::Stopped, Some(control.stop_cause()));
        }
        match unit.process_once() {
            Ok(Pass::MoreWork) => {}
            Ok(Pass::NoMoreInput) if control.is_aborted() => {
                break (StepState::Stopped, Some(control.stop_cause()));
            }
            Ok(Pass::NoMoreInput) => break (StepState::Finished, None),
            Err(e) if e.is_stop() || control.is_aborted() => {
                if !control.is_aborted() {
                    // The step itself asked to stop the run.
                    control.request_stop();
                }
                break (StepState::Stopped, Some(control.stop_cause()));
            }
            Err(e) => {
                tracing::error!(step = %unit.id(), error = %e, "step failed");
                break (StepState::Errored, Some(e.to_string()));
            }
        }
    };
    unit.finish(state, cause);
    if state == StepState::Errored {
        control.abort();
    }
    tracing::debug!(step = %unit.id(), state = ?state, "step thread exiting");
}
