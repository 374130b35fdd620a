//! Identity step: every input row is written unchanged.

use std::sync::Arc;

use crate::traits::{Pass, RowIo, StepBehavior, StepError, StepMeta};

pub struct Dummy;

impl StepMeta for Dummy {
    fn kind(&self) -> &'static str {
        "dummy"
    }

    fn create(&self) -> Box<dyn StepBehavior> {
        Box::new(DummyStep)
    }
}

pub fn factory(_config: &serde_json::Value) -> Result<Arc<dyn StepMeta>, StepError> {
    Ok(Arc::new(Dummy))
}

struct DummyStep;

impl StepBehavior for DummyStep {
    fn process(&mut self, io: &mut dyn RowIo) -> Result<Pass, StepError> {
        let row = match io.get_row().into_row() {
            Ok(row) => row,
            Err(pass) => return Ok(pass),
        };
        let schema = io
            .input_schema()
            .ok_or_else(|| StepError::Schema("row without schema".into()))?;
        io.put_row(&schema, row)?;
        Ok(Pass::MoreWork)
    }
}
