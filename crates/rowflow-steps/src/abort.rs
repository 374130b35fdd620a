//! Abort step: passes rows through and fails the step once more than
//! `threshold` rows have arrived. Useful as a guard on "should never happen"
//! branches of a pipeline.

use std::sync::Arc;

use serde::Deserialize;

use crate::registry::parse_config;
use crate::traits::{Pass, RowIo, StepBehavior, StepError, StepMeta};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AbortConfig {
    pub threshold: u64,
    pub message: Option<String>,
}

pub struct Abort {
    cfg: AbortConfig,
}

pub fn factory(config: &serde_json::Value) -> Result<Arc<dyn StepMeta>, StepError> {
    let cfg: AbortConfig = parse_config("abort", config)?;
    Ok(Arc::new(Abort { cfg }))
}

impl StepMeta for Abort {
    fn kind(&self) -> &'static str {
        "abort"
    }

    fn create(&self) -> Box<dyn StepBehavior> {
        Box::new(AbortStep {
            cfg: self.cfg.clone(),
            seen: 0,
        })
    }
}

struct AbortStep {
    cfg: AbortConfig,
    seen: u64,
}

impl StepBehavior for AbortStep {
    fn process(&mut self, io: &mut dyn RowIo) -> Result<Pass, StepError> {
        let row = match io.get_row().into_row() {
            Ok(row) => row,
            Err(pass) => return Ok(pass),
        };
        self.seen += 1;
        if self.seen > self.cfg.threshold {
            let msg = self
                .cfg
                .message
                .clone()
                .unwrap_or_else(|| format!("aborting after {} rows", self.seen));
            return Err(StepError::Failed(msg));
        }
        let schema = io
            .input_schema()
            .ok_or_else(|| StepError::Schema("row without schema".into()))?;
        io.put_row(&schema, row)?;
        Ok(Pass::MoreWork)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::VecIo;
    use rowflow_core::prelude::{Row, RowSchema, Value, ValueType};
    use serde_json::json;

    #[test]
    fn fails_after_threshold() {
        let schema = RowSchema::builder()
            .field("n", ValueType::Integer)
            .build()
            .unwrap()
            .into_shared();
        let rows = (0..5).map(|i| Row::new(vec![Value::Integer(i)])).collect();
        let meta = factory(&json!({"threshold": 2})).unwrap();
        let mut step = meta.create();
        let mut io = VecIo::new(schema, rows);

        let err = io.drain(step.as_mut()).unwrap_err();
        assert!(matches!(err, StepError::Failed(ref m) if m == "aborting after 3 rows"));
        assert_eq!(io.rows().len(), 2);
    }
}
