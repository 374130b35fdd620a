//! Resolved pipeline graph: one unit per step-copy, channels per hop.
//!
//! A graph is built for one execution mode. Threaded graphs use bounded
//! channels and tolerate cycles; cooperative graphs use unbounded channels and
//! keep their units in topological order. Producers, listeners, and error sinks
//! are attached between build and start.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use rowflow_core::prelude::{
    ChannelId, EngineConfig, Error, ExecutionMode, Hash256, PipelineDef, Routing, StepCopyId,
    StepStatus,
};
use rowflow_steps::{Registry, StepMeta};

use crate::distribution::{OutputHop, Outputs};
use crate::error_sink::{ErrorSink, TracingErrorSink};
use crate::listener::RowListener;
use crate::producer::RowProducer;
use crate::rowset::{ChannelStats, RowSet};
use crate::runtime::ExecError;
use crate::unit::{StepUnit, UnitSpec};

pub struct PipelineGraph {
    name: String,
    fingerprint: Hash256,
    mode: ExecutionMode,
    /// Units in scheduling order (topological for cooperative graphs).
    units: Vec<StepUnit>,
    channels: Vec<Arc<RowSet>>,
    abort: Arc<AtomicBool>,
    rowset_capacity: usize,
    thread_stack_size: Option<usize>,
    next_channel: u64,
}

impl PipelineGraph {
    pub(crate) fn build(
        def: &PipelineDef,
        mode: ExecutionMode,
        cfg: &EngineConfig,
        registry: &Registry,
    ) -> Result<Self, ExecError> {
        def.validate()?;
        let order: Vec<usize> = match mode {
            ExecutionMode::Cooperative => def.topological_order()?,
            ExecutionMode::Threaded => (0..def.steps.len()).collect(),
        };

        let mut metas: Vec<Arc<dyn StepMeta>> = Vec::with_capacity(def.steps.len());
        for step in &def.steps {
            let meta = registry
                .make(&step.kind, &step.config)
                .map_err(|source| ExecError::Registry {
                    step: step.name.clone(),
                    source,
                })?;
            for target in meta.target_steps() {
                if !def.hops_from(&step.name).any(|h| h.to == target) {
                    return Err(Error::Config(format!(
                        "step '{}' targets '{}' but has no enabled hop to it",
                        step.name, target
                    ))
                    .into());
                }
            }
            metas.push(meta);
        }

        let mut graph = Self {
            name: def.name.clone(),
            fingerprint: def.fingerprint()?,
            mode,
            units: Vec::new(),
            channels: Vec::new(),
            abort: Arc::new(AtomicBool::new(false)),
            rowset_capacity: cfg.rowset_capacity,
            thread_stack_size: cfg.thread_stack_size,
            next_channel: 0,
        };

        // Channels first: outputs are fixed at unit creation, inputs attached after.
        let mut outputs: HashMap<StepCopyId, Vec<OutputHop>> = HashMap::new();
        let mut inputs: HashMap<StepCopyId, Vec<Arc<RowSet>>> = HashMap::new();
        for hop in def.active_hops() {
            let (Some(from), Some(to)) = (def.find_step(&hop.from), def.find_step(&hop.to)) else {
                continue;
            };
            for i in 0..from.copies {
                let origin = StepCopyId::new(from.name.as_str(), i);
                let consumers: Vec<usize> = match hop.routing {
                    Routing::CopyAffinity => vec![i],
                    Routing::RoundRobin | Routing::KeyHash { .. } => (0..to.copies).collect(),
                };
                let mut chans = Vec::with_capacity(consumers.len());
                for j in consumers {
                    let dest = StepCopyId::new(to.name.as_str(), j);
                    let ch = graph.new_channel(origin.clone(), dest.clone());
                    inputs.entry(dest).or_default().push(Arc::clone(&ch));
                    chans.push(ch);
                }
                outputs
                    .entry(origin)
                    .or_default()
                    .push(OutputHop::new(to.name.clone(), hop.routing.clone(), chans));
            }
        }

        let sink: Arc<dyn ErrorSink> = Arc::new(TracingErrorSink);
        for &idx in &order {
            let step = &def.steps[idx];
            for copy in 0..step.copies {
                let id = StepCopyId::new(step.name.as_str(), copy);
                let hops = outputs.remove(&id).unwrap_or_default();
                let mut unit = StepUnit::new(UnitSpec {
                    id: id.clone(),
                    copies: step.copies,
                    mode,
                    meta: Arc::clone(&metas[idx]),
                    outputs: Outputs::new(step.output_mode, hops),
                    error_sink: Arc::clone(&sink),
                    tolerance: step.error_tolerance.unwrap_or(cfg.default_error_tolerance),
                    safe_mode: cfg.safe_mode,
                    poll_interval: cfg.poll_interval(),
                    abort: Arc::clone(&graph.abort),
                });
                for ch in inputs.remove(&id).unwrap_or_default() {
                    unit.add_input(ch);
                }
                graph.units.push(unit);
            }
        }

        tracing::debug!(
            pipeline = %graph.name,
            mode = ?mode,
            units = graph.units.len(),
            channels = graph.channels.len(),
            "pipeline graph built"
        );
        Ok(graph)
    }

    fn new_channel(&mut self, origin: StepCopyId, destination: StepCopyId) -> Arc<RowSet> {
        let id = ChannelId::new(self.next_channel);
        self.next_channel += 1;
        let ch = Arc::new(match self.mode {
            ExecutionMode::Threaded => {
                RowSet::bounded(id, origin, destination, self.rowset_capacity)
            }
            ExecutionMode::Cooperative => RowSet::unbounded(id, origin, destination),
        });
        self.channels.push(Arc::clone(&ch));
        ch
    }

    fn unit_mut(&mut self, step: &str, copy: usize) -> Result<&mut StepUnit, ExecError> {
        self.units
            .iter_mut()
            .find(|u| &*u.id().step == step && u.id().copy == copy)
            .ok_or_else(|| ExecError::UnknownStep(format!("{step}.{copy}")))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fingerprint(&self) -> Hash256 {
        self.fingerprint
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Step-copies in scheduling order.
    pub fn unit_ids(&self) -> Vec<StepCopyId> {
        self.units.iter().map(|u| u.id().clone()).collect()
    }

    /// Open an extra input channel into `step.copy` and return its write end.
    pub fn add_row_producer(&mut self, step: &str, copy: usize) -> Result<RowProducer, ExecError> {
        let target = self.unit_mut(step, copy)?.id().clone();
        let origin = StepCopyId::new(format!("producer:{step}"), copy);
        let ch = self.new_channel(origin, target.clone());
        self.unit_mut(step, copy)?.add_input(Arc::clone(&ch));
        Ok(RowProducer::new(target, ch))
    }

    pub fn add_row_listener(
        &mut self,
        step: &str,
        copy: usize,
        listener: Arc<dyn RowListener>,
    ) -> Result<(), ExecError> {
        self.unit_mut(step, copy)?.add_listener(listener);
        Ok(())
    }

    /// Replace the error sink of every unit.
    pub fn set_error_sink(&mut self, sink: Arc<dyn ErrorSink>) {
        for unit in &mut self.units {
            unit.set_error_sink(Arc::clone(&sink));
        }
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

    pub(crate) fn into_parts(self) -> GraphParts {
        GraphParts {
            name: self.name,
            fingerprint: self.fingerprint,
            mode: self.mode,
            units: self.units,
            channels: self.channels,
            abort: self.abort,
            thread_stack_size: self.thread_stack_size,
        }
    }
}

pub(crate) struct GraphParts {
    pub name: String,
    pub fingerprint: Hash256,
    pub mode: ExecutionMode,
    pub units: Vec<StepUnit>,
    pub channels: Vec<Arc<RowSet>>,
    pub abort: Arc<AtomicBool>,
    pub thread_stack_size: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowflow_core::prelude::{HopDef, StepDef};
    use serde_json::json;

    fn build(def: &PipelineDef, mode: ExecutionMode) -> Result<PipelineGraph, ExecError> {
        PipelineGraph::build(def, mode, &EngineConfig::default(), &Registry::new())
    }

    #[test]
    fn channels_per_copy_pairing() {
        let def = PipelineDef::new("p")
            .step(StepDef::new("a", "dummy").with_copies(2))
            .step(StepDef::new("b", "dummy").with_copies(3))
            .step(StepDef::new("c", "dummy").with_copies(3))
            .connect("a", "b")
            .hop(HopDef::new("b", "c").with_routing(Routing::CopyAffinity));
        let g = build(&def, ExecutionMode::Threaded).unwrap();
        // a->b: 2x3 round robin, b->c: 3 affinity pairs.
        assert_eq!(g.channel_stats().len(), 6 + 3);
        assert!(g
            .channel_stats()
            .iter()
            .all(|c| c.capacity == Some(EngineConfig::default().rowset_capacity)));
    }

    #[test]
    fn cooperative_graph_is_unbounded_and_ordered() {
        let def = PipelineDef::new("p")
            .step(StepDef::new("c", "dummy"))
            .step(StepDef::new("a", "dummy"))
            .step(StepDef::new("b", "dummy"))
            .connect("a", "b")
            .connect("b", "c");
        let g = build(&def, ExecutionMode::Cooperative).unwrap();
        let order: Vec<String> = g.unit_ids().iter().map(|id| id.to_string()).collect();
        assert_eq!(order, vec!["a.0", "b.0", "c.0"]);
        assert!(g.channel_stats().iter().all(|c| c.capacity.is_none()));
    }

    #[test]
    fn cooperative_rejects_cycles_threaded_does_not() {
        let def = PipelineDef::new("loop")
            .step(StepDef::new("a", "dummy"))
            .step(StepDef::new("b", "dummy"))
            .connect("a", "b")
            .connect("b", "a");
        assert!(matches!(
            build(&def, ExecutionMode::Cooperative),
            Err(ExecError::Core(Error::Cycle(_)))
        ));
        assert!(build(&def, ExecutionMode::Threaded).is_ok());
    }

    #[test]
    fn bad_step_config_surfaces_at_build() {
        let def = PipelineDef::new("p")
            .step(StepDef::new("f", "filter").with_config(json!({"bogus": 1})));
        let err = build(&def, ExecutionMode::Threaded).err().unwrap();
        assert!(matches!(err, ExecError::Registry { ref step, .. } if step == "f"));
    }

    #[test]
    fn filter_targets_need_hops() {
        let def = PipelineDef::new("p")
            .step(StepDef::new("f", "filter").with_config(json!({
                "field": "flag",
                "send_true_to": "yes"
            })))
            .step(StepDef::new("yes", "dummy"));
        assert!(matches!(
            build(&def, ExecutionMode::Threaded),
            Err(ExecError::Core(Error::Config(_)))
        ));
    }

    #[test]
    fn producer_on_unknown_copy() {
        let def = PipelineDef::new("p").step(StepDef::new("a", "dummy"));
        let mut g = build(&def, ExecutionMode::Threaded).unwrap();
        assert!(g.add_row_producer("a", 0).is_ok());
        assert!(matches!(
            g.add_row_producer("a", 1),
            Err(ExecError::UnknownStep(_))
        ));
    }
}
