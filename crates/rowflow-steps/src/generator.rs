//! Generator step: a source that emits `limit` copies of one constant row.
//!
//! ```json
//! { "limit": 3,
//!   "fields": [ {"name": "id",   "type": "Integer", "value": "7"},
//!               {"name": "flag", "type": "Boolean", "value": "true"},
//!               {"name": "note", "type": "String"} ] }
//! ```
//! Fields without a value are null.

use std::sync::Arc;

use rowflow_core::prelude::{FieldMeta, Row, RowSchema, Value, ValueType};
use serde::Deserialize;

use crate::registry::parse_config;
use crate::traits::{Pass, RowIo, StepBehavior, StepContext, StepError, StepMeta};

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorField {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: String,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratorConfig {
    pub fields: Vec<GeneratorField>,
    pub limit: u64,
}

pub fn parse_value_type(s: &str) -> Option<ValueType> {
    Some(match s {
        "String" | "string" => ValueType::String,
        "Integer" | "integer" | "i64" => ValueType::Integer,
        "Number" | "number" | "f64" => ValueType::Number,
        "Boolean" | "boolean" | "bool" => ValueType::Boolean,
        "Date" | "date" => ValueType::Date,
        "BigNumber" | "bignumber" | "decimal" => ValueType::BigNumber,
        "Binary" | "binary" | "bytes" => ValueType::Binary,
        "Serializable" | "serializable" | "json" => ValueType::Serializable,
        _ => return None,
    })
}

pub struct Generator {
    schema: Arc<RowSchema>,
    row: Row,
    limit: u64,
}

pub fn factory(config: &serde_json::Value) -> Result<Arc<dyn StepMeta>, StepError> {
    let cfg: GeneratorConfig = parse_config("generator", config)?;
    let mut metas = Vec::with_capacity(cfg.fields.len());
    let mut values = Vec::with_capacity(cfg.fields.len());
    for f in &cfg.fields {
        let ty = parse_value_type(&f.value_type).ok_or_else(|| {
            StepError::Config(format!("generator: unknown type '{}'", f.value_type))
        })?;
        let value = match &f.value {
            None => Value::Null,
            Some(text) => Value::parse_as(ty, text).ok_or_else(|| {
                StepError::Config(format!(
                    "generator: cannot parse '{}' as {} for field '{}'",
                    text, ty, f.name
                ))
            })?,
        };
        metas.push(FieldMeta::new(f.name.clone(), ty));
        values.push(value);
    }
    Ok(Arc::new(Generator {
        schema: Arc::new(RowSchema::new(metas)?),
        row: Row::new(values),
        limit: cfg.limit,
    }))
}

impl StepMeta for Generator {
    fn kind(&self) -> &'static str {
        "generator"
    }

    fn create(&self) -> Box<dyn StepBehavior> {
        Box::new(GeneratorStep {
            schema: Arc::clone(&self.schema),
            row: self.row.clone(),
            limit: self.limit,
            emitted: 0,
        })
    }
}

struct GeneratorStep {
    schema: Arc<RowSchema>,
    row: Row,
    limit: u64,
    emitted: u64,
}

impl StepBehavior for GeneratorStep {
    fn init(&mut self, _ctx: &StepContext<'_>) -> Result<(), StepError> {
        self.emitted = 0;
        Ok(())
    }

    fn process(&mut self, io: &mut dyn RowIo) -> Result<Pass, StepError> {
        if self.emitted >= self.limit {
            return Ok(Pass::NoMoreInput);
        }
        io.put_row(&self.schema, self.row.clone())?;
        self.emitted += 1;
        Ok(Pass::MoreWork)
    }
}
