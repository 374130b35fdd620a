//! In-memory `RowIo` for unit-testing behaviours without the exec runtime.

use std::collections::VecDeque;
use std::sync::Arc;

use rowflow_core::prelude::{Row, RowSchema};

use crate::traits::{Fetch, Pass, RowIo, StepBehavior, StepError};

pub(crate) struct VecIo {
    schema: Arc<RowSchema>,
    input: VecDeque<Row>,
    pub written: Vec<(Option<String>, Arc<RowSchema>, Row)>,
    pub errors: Vec<(Row, String)>,
    pub tolerance: u64,
}

impl VecIo {
    pub(crate) fn new(schema: Arc<RowSchema>, rows: Vec<Row>) -> Self {
        Self {
            schema,
            input: rows.into(),
            written: vec![],
            errors: vec![],
            tolerance: 0,
        }
    }

    /// Drive `step` until it reports `NoMoreInput` or fails.
    pub(crate) fn drain(&mut self, step: &mut dyn StepBehavior) -> Result<(), StepError> {
        while step.process(self)? == Pass::MoreWork {}
        Ok(())
    }

    pub(crate) fn rows(&self) -> Vec<Row> {
        self.written.iter().map(|(_, _, r)| r.clone()).collect()
    }
}

impl RowIo for VecIo {
    fn step_name(&self) -> &str {
        "test"
    }

    fn copy(&self) -> usize {
        0
    }

    fn get_row(&mut self) -> Fetch {
        match self.input.pop_front() {
            Some(row) => Fetch::Row(row),
            None => Fetch::Done,
        }
    }

    fn input_schema(&self) -> Option<Arc<RowSchema>> {
        Some(Arc::clone(&self.schema))
    }

    fn put_row(&mut self, schema: &Arc<RowSchema>, row: Row) -> Result<(), StepError> {
        self.written.push((None, Arc::clone(schema), row));
        Ok(())
    }

    fn put_row_to(
        &mut self,
        target: &str,
        schema: &Arc<RowSchema>,
        row: Row,
    ) -> Result<(), StepError> {
        self.written
            .push((Some(target.to_string()), Arc::clone(schema), row));
        Ok(())
    }

    fn put_error(
        &mut self,
        _schema: &Arc<RowSchema>,
        row: Row,
        cause: &str,
    ) -> Result<(), StepError> {
        self.errors.push((row, cause.to_string()));
        let errors = self.errors.len() as u64;
        if errors > self.tolerance {
            return Err(StepError::ToleranceExceeded {
                errors,
                tolerance: self.tolerance,
            });
        }
        Ok(())
    }

    fn is_stopped(&self) -> bool {
        false
    }
}
