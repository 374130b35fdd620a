//! Sequence step: appends a running integer counter to every row.
//!
//! The counter lives in the copy's private state, so two copies of the same
//! step count independently.

use std::sync::Arc;

use rowflow_core::prelude::{FieldMeta, RowSchema, Value, ValueType};
use serde::Deserialize;

use crate::registry::parse_config;
use crate::traits::{Pass, RowIo, StepBehavior, StepContext, StepError, StepMeta};

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SequenceConfig {
    pub field: String,
    pub start: i64,
    pub increment: i64,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            field: "seq".into(),
            start: 1,
            increment: 1,
        }
    }
}

pub struct Sequence {
    cfg: SequenceConfig,
}

pub fn factory(config: &serde_json::Value) -> Result<Arc<dyn StepMeta>, StepError> {
    let cfg: SequenceConfig = parse_config("sequence", config)?;
    if cfg.increment == 0 {
        return Err(StepError::Config("sequence: increment must not be 0".into()));
    }
    Ok(Arc::new(Sequence { cfg }))
}

impl StepMeta for Sequence {
    fn kind(&self) -> &'static str {
        "sequence"
    }

    fn create(&self) -> Box<dyn StepBehavior> {
        Box::new(SequenceStep {
            cfg: self.cfg.clone(),
            next: self.cfg.start,
            schemas: None,
        })
    }
}

struct SequenceStep {
    cfg: SequenceConfig,
    next: i64,
    /// (input, output) schema pair.
    schemas: Option<(Arc<RowSchema>, Arc<RowSchema>)>,
}

impl StepBehavior for SequenceStep {
    fn init(&mut self, _ctx: &StepContext<'_>) -> Result<(), StepError> {
        self.next = self.cfg.start;
        Ok(())
    }

    fn process(&mut self, io: &mut dyn RowIo) -> Result<Pass, StepError> {
        let mut row = match io.get_row().into_row() {
            Ok(row) => row,
            Err(pass) => return Ok(pass),
        };
        let input = io
            .input_schema()
            .ok_or_else(|| StepError::Schema("row without schema".into()))?;

        let output = match &self.schemas {
            Some((i, o)) if Arc::ptr_eq(i, &input) => Arc::clone(o),
            _ => {
                let o = Arc::new(
                    input.with_field(FieldMeta::new(self.cfg.field.clone(), ValueType::Integer))?,
                );
                self.schemas = Some((Arc::clone(&input), Arc::clone(&o)));
                o
            }
        };

        row.push(Value::Integer(self.next));
        self.next = self.next.wrapping_add(self.cfg.increment);
        io.put_row(&output, row)?;
        Ok(Pass::MoreWork)
    }
}
