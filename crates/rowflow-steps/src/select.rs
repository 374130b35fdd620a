//! Select step: keep, reorder, and rename fields.

use std::sync::Arc;

use rowflow_core::prelude::{FieldMeta, Row, RowSchema, Value};
use serde::Deserialize;

use crate::registry::parse_config;
use crate::traits::{Pass, RowIo, StepBehavior, StepError, StepMeta};

#[derive(Debug, Clone, Deserialize)]
pub struct SelectField {
    pub name: String,
    #[serde(default)]
    pub rename: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelectConfig {
    pub fields: Vec<SelectField>,
}

pub struct Select {
    fields: Arc<[SelectField]>,
}

pub fn factory(config: &serde_json::Value) -> Result<Arc<dyn StepMeta>, StepError> {
    let cfg: SelectConfig = parse_config("select", config)?;
    if cfg.fields.is_empty() {
        return Err(StepError::Config("select: no fields given".into()));
    }
    Ok(Arc::new(Select {
        fields: cfg.fields.into(),
    }))
}

impl StepMeta for Select {
    fn kind(&self) -> &'static str {
        "select"
    }

    fn create(&self) -> Box<dyn StepBehavior> {
        Box::new(SelectStep {
            fields: Arc::clone(&self.fields),
            cache: None,
        })
    }
}

struct Projection {
    input: Arc<RowSchema>,
    output: Arc<RowSchema>,
    indices: Vec<usize>,
}

struct SelectStep {
    fields: Arc<[SelectField]>,
    cache: Option<Projection>,
}

impl SelectStep {
    fn project(&mut self, input: &Arc<RowSchema>) -> Result<&Projection, StepError> {
        let stale = !matches!(&self.cache, Some(p) if Arc::ptr_eq(&p.input, input));
        if stale {
            let mut indices = Vec::with_capacity(self.fields.len());
            let mut out = Vec::with_capacity(self.fields.len());
            for f in self.fields.iter() {
                let idx = input.index_of(&f.name).ok_or_else(|| {
                    StepError::Config(format!("select: field '{}' not found", f.name))
                })?;
                let mut meta: FieldMeta = input.fields()[idx].clone();
                if let Some(new_name) = &f.rename {
                    meta.name = new_name.clone();
                }
                indices.push(idx);
                out.push(meta);
            }
            self.cache = Some(Projection {
                input: Arc::clone(input),
                output: Arc::new(RowSchema::new(out)?),
                indices,
            });
        }
        self.cache
            .as_ref()
            .ok_or_else(|| StepError::Failed("select: projection missing".into()))
    }
}

impl StepBehavior for SelectStep {
    fn process(&mut self, io: &mut dyn RowIo) -> Result<Pass, StepError> {
        let row = match io.get_row().into_row() {
            Ok(row) => row,
            Err(pass) => return Ok(pass),
        };
        let input = io
            .input_schema()
            .ok_or_else(|| StepError::Schema("row without schema".into()))?;
        let projection = self.project(&input)?;
        let values: Vec<Value> = projection
            .indices
            .iter()
            .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
            .collect();
        let output = Arc::clone(&projection.output);
        io.put_row(&output, Row::new(values))?;
        Ok(Pass::MoreWork)
    }
}
