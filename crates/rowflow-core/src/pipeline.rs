//! Resolved pipeline definitions: steps, hops, copy counts and routing.
//!
//! A `PipelineDef` is what an external definition provider hands to the
//! engine. Step behaviour is referenced by `kind` (a registry key) plus a JSON
//! config; the exec crate resolves kinds through the step registry.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hash::{hash_serde, Hash256};

/// How a step spreads rows over several *distinct* target steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputMode {
    /// Rotate rows across target steps.
    #[default]
    Distribute,
    /// Every target step receives its own copy of every row.
    Copy,
}

/// How rows crossing one hop are spread over the copies of the target step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Routing {
    /// Every producer copy feeds every consumer copy in rotation.
    #[default]
    RoundRobin,
    /// Producer copy i feeds consumer copy i only. Copy counts must match.
    CopyAffinity,
    /// Rows with equal key values always land in the same consumer copy.
    KeyHash { fields: Vec<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDef {
    pub name: String,
    /// Registry key of the step behaviour, e.g. "filter".
    pub kind: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default = "one")]
    pub copies: usize,
    #[serde(default)]
    pub output_mode: OutputMode,
    /// Overrides the engine-wide default when set.
    #[serde(default)]
    pub error_tolerance: Option<u64>,
}

fn one() -> usize {
    1
}

fn enabled() -> bool {
    true
}

impl StepDef {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            config: serde_json::Value::Null,
            copies: 1,
            output_mode: OutputMode::Distribute,
            error_tolerance: None,
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_copies(mut self, copies: usize) -> Self {
        self.copies = copies;
        self
    }

    pub fn with_output_mode(mut self, mode: OutputMode) -> Self {
        self.output_mode = mode;
        self
    }

    pub fn with_error_tolerance(mut self, tolerance: u64) -> Self {
        self.error_tolerance = Some(tolerance);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopDef {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub routing: Routing,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

impl HopDef {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            routing: Routing::RoundRobin,
            enabled: true,
        }
    }

    pub fn with_routing(mut self, routing: Routing) -> Self {
        self.routing = routing;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineDef {
    pub name: String,
    pub steps: Vec<StepDef>,
    pub hops: Vec<HopDef>,
}

impl PipelineDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: vec![],
            hops: vec![],
        }
    }

    pub fn step(mut self, step: StepDef) -> Self {
        self.steps.push(step);
        self
    }

    pub fn hop(mut self, hop: HopDef) -> Self {
        self.hops.push(hop);
        self
    }

    /// Shorthand for a default round-robin hop.
    pub fn connect(self, from: &str, to: &str) -> Self {
        self.hop(HopDef::new(from, to))
    }

    pub fn find_step(&self, name: &str) -> Option<&StepDef> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn step_index(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name == name)
    }

    /// Enabled hops only; disabled hops never exist at runtime.
    pub fn active_hops(&self) -> impl Iterator<Item = &HopDef> {
        self.hops.iter().filter(|h| h.enabled)
    }

    pub fn hops_from<'a>(&'a self, step: &'a str) -> impl Iterator<Item = &'a HopDef> + 'a {
        self.active_hops().filter(move |h| h.from == step)
    }

    pub fn hops_into<'a>(&'a self, step: &'a str) -> impl Iterator<Item = &'a HopDef> + 'a {
        self.active_hops().filter(move |h| h.to == step)
    }

    /// Structural checks that hold for every scheduling mode.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for step in &self.steps {
            if step.name.is_empty() {
                return Err(Error::Config("step with empty name".into()));
            }
            if !names.insert(step.name.as_str()) {
                return Err(Error::Config(format!("duplicate step name '{}'", step.name)));
            }
            if step.copies == 0 {
                return Err(Error::Config(format!(
                    "step '{}' must run at least one copy",
                    step.name
                )));
            }
        }

        let mut seen = HashSet::new();
        for hop in self.active_hops() {
            let from = self
                .find_step(&hop.from)
                .ok_or_else(|| Error::Config(format!("hop from unknown step '{}'", hop.from)))?;
            let to = self
                .find_step(&hop.to)
                .ok_or_else(|| Error::Config(format!("hop to unknown step '{}'", hop.to)))?;
            if hop.from == hop.to {
                return Err(Error::Config(format!("step '{}' hops to itself", hop.from)));
            }
            if !seen.insert((hop.from.as_str(), hop.to.as_str())) {
                return Err(Error::Config(format!(
                    "duplicate hop '{}' -> '{}'",
                    hop.from, hop.to
                )));
            }
            match &hop.routing {
                Routing::CopyAffinity if from.copies != to.copies => {
                    return Err(Error::Config(format!(
                        "copy-affinity hop '{}' -> '{}' needs equal copy counts ({} vs {})",
                        hop.from, hop.to, from.copies, to.copies
                    )));
                }
                Routing::KeyHash { fields } if fields.is_empty() => {
                    return Err(Error::Config(format!(
                        "key-hash hop '{}' -> '{}' has no key fields",
                        hop.from, hop.to
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Step indices in dependency order (producers before consumers).
    ///
    /// Kahn's algorithm; among ready steps the one defined first goes first, so
    /// the order is a pure function of the definition.
    pub fn topological_order(&self) -> Result<Vec<usize>> {
        let index: HashMap<&str, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.as_str(), i))
            .collect();

        let mut in_degree = vec![0usize; self.steps.len()];
        let mut dependents: Vec<Vec<usize>> = vec![vec![]; self.steps.len()];
        for hop in self.active_hops() {
            let (Some(&u), Some(&v)) = (index.get(hop.from.as_str()), index.get(hop.to.as_str()))
            else {
                return Err(Error::Config(format!(
                    "hop '{}' -> '{}' references an unknown step",
                    hop.from, hop.to
                )));
            };
            in_degree[v] += 1;
            dependents[u].push(v);
        }

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter_map(|(i, &d)| (d == 0).then_some(Reverse(i)))
            .collect();

        let mut order = Vec::with_capacity(self.steps.len());
        while let Some(Reverse(u)) = ready.pop() {
            order.push(u);
            for &v in &dependents[u] {
                in_degree[v] -= 1;
                if in_degree[v] == 0 {
                    ready.push(Reverse(v));
                }
            }
        }

        if order.len() != self.steps.len() {
            let stuck = in_degree
                .iter()
                .enumerate()
                .filter(|(_, d)| **d > 0)
                .map(|(i, _)| self.steps[i].name.clone())
                .collect();
            return Err(Error::Cycle(stuck));
        }
        Ok(order)
    }

    /// Stable digest of the whole definition.
    pub fn fingerprint(&self) -> Result<Hash256> {
        hash_serde(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear() -> PipelineDef {
        PipelineDef::new("t")
            .step(StepDef::new("a", "dummy"))
            .step(StepDef::new("b", "dummy"))
            .step(StepDef::new("c", "dummy"))
            .connect("a", "b")
            .connect("b", "c")
    }

    #[test]
    fn linear_order() {
        let p = linear();
        p.validate().unwrap();
        assert_eq!(p.topological_order().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn order_respects_deps_over_definition_order() {
        let p = PipelineDef::new("t")
            .step(StepDef::new("sink", "dummy"))
            .step(StepDef::new("src", "dummy"))
            .step(StepDef::new("mid", "dummy"))
            .connect("src", "mid")
            .connect("mid", "sink");
        assert_eq!(p.topological_order().unwrap(), vec![1, 2, 0]);
    }

    #[test]
    fn cycle_detected() {
        let p = linear().connect("c", "a");
        p.validate().unwrap();
        match p.topological_order() {
            Err(Error::Cycle(steps)) => assert_eq!(steps.len(), 3),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn disabled_hop_breaks_cycle() {
        let p = linear().hop(HopDef::new("c", "a").disabled());
        assert!(p.topological_order().is_ok());
    }

    #[test]
    fn validation_errors() {
        let dup = linear().step(StepDef::new("a", "dummy"));
        assert!(matches!(dup.validate(), Err(Error::Config(_))));

        let unknown = linear().connect("a", "zzz");
        assert!(matches!(unknown.validate(), Err(Error::Config(_))));

        let affinity = PipelineDef::new("t")
            .step(StepDef::new("a", "dummy").with_copies(2))
            .step(StepDef::new("b", "dummy").with_copies(3))
            .hop(HopDef::new("a", "b").with_routing(Routing::CopyAffinity));
        assert!(matches!(affinity.validate(), Err(Error::Config(_))));

        let zero = PipelineDef::new("t").step(StepDef::new("a", "dummy").with_copies(0));
        assert!(matches!(zero.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn fingerprint_tracks_content() {
        let a = linear().fingerprint().unwrap();
        let b = linear().fingerprint().unwrap();
        let c = linear().connect("a", "c").fingerprint().unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
