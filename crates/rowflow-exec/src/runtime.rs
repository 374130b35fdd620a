//! Engine context: configuration plus step registry. Builds graphs and runs
//! self-contained pipelines.
//!
//! There is no global state; every graph is built from an explicit `Engine`.

use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

use rowflow_core::prelude::{EngineConfig, ExecutionMode, PipelineDef, RunReport};
use rowflow_steps::{Registry, StepError};

use crate::graph::PipelineGraph;
use crate::single_threaded::CooperativeExecutor;
use crate::threaded::Trans;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Core(#[from] rowflow_core::Error),

    #[error("step '{step}': {source}")]
    Registry {
        step: String,
        #[source]
        source: StepError,
    },

    #[error("initialization of step {step}.{copy} failed: {cause}")]
    Init {
        step: String,
        copy: usize,
        #[source]
        cause: StepError,
    },

    #[error("unknown step-copy '{0}'")]
    UnknownStep(String),

    #[error("execution mode: {0}")]
    Mode(String),

    #[error("thread error: {0}")]
    Thread(String),
}

pub struct Engine {
    cfg: EngineConfig,
    registry: Registry,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    /// Engine with the built-in step kinds.
    pub fn new(cfg: EngineConfig) -> Self {
        Self::with_registry(cfg, Registry::new())
    }

    pub fn with_registry(cfg: EngineConfig, registry: Registry) -> Self {
        Self { cfg, registry }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Register plug-in step kinds here before preparing graphs.
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Resolve a pipeline definition into a runnable graph.
    ///
    /// All step configuration is validated here, before anything runs.
    pub fn prepare(&self, def: &PipelineDef, mode: ExecutionMode) -> Result<PipelineGraph, ExecError> {
        self.cfg.validate()?;
        PipelineGraph::build(def, mode, &self.cfg, &self.registry)
    }

    /// Prepare and run a pipeline that needs no external producers.
    pub fn execute(&self, def: &PipelineDef, mode: ExecutionMode) -> Result<RunReport, ExecError> {
        let graph = self.prepare(def, mode)?;
        match mode {
            ExecutionMode::Threaded => Ok(Trans::start(graph)?.wait()),
            ExecutionMode::Cooperative => {
                let mut exec = CooperativeExecutor::new(graph)?;
                exec.run_to_completion(u64::MAX)?;
                exec.dispose();
                Ok(exec.report())
            }
        }
    }
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowflow_core::prelude::{RunState, StepDef};
    use serde_json::json;

    fn generator_pipeline() -> PipelineDef {
        PipelineDef::new("gen")
            .step(StepDef::new("gen", "generator").with_config(json!({
                "limit": 5,
                "fields": [{"name": "n", "type": "Integer", "value": "1"}]
            })))
            .step(StepDef::new("seq", "sequence"))
            .connect("gen", "seq")
    }

    #[test]
    fn execute_both_modes() {
        let engine = Engine::default();
        for mode in [ExecutionMode::Threaded, ExecutionMode::Cooperative] {
            let report = engine.execute(&generator_pipeline(), mode).unwrap();
            assert_eq!(report.state, RunState::Finished);
            assert_eq!(report.step("seq")[0].rows_written, 5);
            assert_eq!(report.mode, mode);
        }
    }

    #[test]
    fn invalid_config_rejected_before_build() {
        let engine = Engine::new(EngineConfig {
            rowset_capacity: 0,
            ..Default::default()
        });
        assert!(matches!(
            engine.prepare(&generator_pipeline(), ExecutionMode::Threaded),
            Err(ExecError::Core(rowflow_core::Error::Config(_)))
        ));
    }
}
