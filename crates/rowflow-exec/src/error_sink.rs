//! Destinations for rows diverted by `RowIo::put_error`.

use std::sync::{Arc, Mutex, PoisonError};

use rowflow_core::prelude::{Row, RowSchema, StepCopyId};

pub trait ErrorSink: Send + Sync {
    fn error_row(&self, step: &StepCopyId, schema: &Arc<RowSchema>, row: &Row, cause: &str);
}

/// Default sink: one `warn` event per diverted row.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn error_row(&self, step: &StepCopyId, _schema: &Arc<RowSchema>, row: &Row, cause: &str) {
        tracing::warn!(step = %step, ?row, cause, "row diverted to error sink");
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRow {
    pub step: StepCopyId,
    pub schema: Arc<RowSchema>,
    pub row: Row,
    pub cause: String,
}

/// Keeps diverted rows in memory; mostly for tests.
#[derive(Debug, Default)]
pub struct CollectingErrorSink {
    rows: Mutex<Vec<ErrorRow>>,
}

impl CollectingErrorSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn rows(&self) -> Vec<ErrorRow> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ErrorSink for CollectingErrorSink {
    fn error_row(&self, step: &StepCopyId, schema: &Arc<RowSchema>, row: &Row, cause: &str) {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ErrorRow {
                step: step.clone(),
                schema: Arc::clone(schema),
                row: row.clone(),
                cause: cause.to_string(),
            });
    }
}
