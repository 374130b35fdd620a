//! Step registry: maps a step kind to a factory that validates the step's
//! JSON config and returns its `StepMeta`.
//!
//! Plug-in step kinds are added with `register`; the built-ins are present in
//! `Registry::new()`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::traits::{StepError, StepMeta};

pub type StepFactory =
    Arc<dyn Fn(&serde_json::Value) -> Result<Arc<dyn StepMeta>, StepError> + Send + Sync>;

#[derive(Clone)]
pub struct Registry {
    factories: HashMap<String, StepFactory>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Registry preloaded with the built-in steps.
    pub fn new() -> Self {
        let mut reg = Self::empty();
        reg.register("dummy", crate::dummy::factory);
        reg.register("filter", crate::filter::factory);
        reg.register("select", crate::select::factory);
        reg.register("sequence", crate::sequence::factory);
        reg.register("generator", crate::generator::factory);
        reg.register("abort", crate::abort::factory);
        reg
    }

    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Add or replace a step kind.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<Arc<dyn StepMeta>, StepError> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Resolve and validate one step's configuration.
    pub fn make(
        &self,
        kind: &str,
        config: &serde_json::Value,
    ) -> Result<Arc<dyn StepMeta>, StepError> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| StepError::Config(format!("unknown step kind '{kind}'")))?;
        factory(config)
    }
}

/// Decode a step config; `null` means "all defaults".
pub fn parse_config<T: DeserializeOwned + Default>(
    kind: &str,
    config: &serde_json::Value,
) -> Result<T, StepError> {
    if config.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(config.clone())
        .map_err(|e| StepError::Config(format!("{kind}: invalid config: {e}")))
}
