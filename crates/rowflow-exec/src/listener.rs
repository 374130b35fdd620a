//! Row listeners observe the rows a step-copy reads, writes, and diverts.
//!
//! Listeners are attached to a unit before the run starts and are called on
//! the unit's own thread, so they must be cheap and `Sync`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rowflow_core::prelude::{Row, RowSchema};

pub trait RowListener: Send + Sync {
    fn row_read(&self, _schema: &Arc<RowSchema>, _row: &Row) {}

    fn row_written(&self, _schema: &Arc<RowSchema>, _row: &Row) {}

    fn error_row_written(&self, _schema: &Arc<RowSchema>, _row: &Row) {}
}

#[derive(Default)]
struct Collected {
    read: Vec<(Arc<RowSchema>, Row)>,
    written: Vec<(Arc<RowSchema>, Row)>,
    errors: Vec<(Arc<RowSchema>, Row)>,
}

/// Listener that keeps every observed row, in order.
#[derive(Default)]
pub struct RowCollector {
    inner: Mutex<Collected>,
}

impl RowCollector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Collected> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn rows_read(&self) -> Vec<(Arc<RowSchema>, Row)> {
        self.lock().read.clone()
    }

    pub fn rows_written(&self) -> Vec<(Arc<RowSchema>, Row)> {
        self.lock().written.clone()
    }

    pub fn error_rows(&self) -> Vec<(Arc<RowSchema>, Row)> {
        self.lock().errors.clone()
    }

    /// Written rows without their schemas.
    pub fn written(&self) -> Vec<Row> {
        self.lock().written.iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn clear(&self) {
        let mut c = self.lock();
        c.read.clear();
        c.written.clear();
        c.errors.clear();
    }
}

impl RowListener for RowCollector {
    fn row_read(&self, schema: &Arc<RowSchema>, row: &Row) {
        self.lock().read.push((Arc::clone(schema), row.clone()));
    }

    fn row_written(&self, schema: &Arc<RowSchema>, row: &Row) {
        self.lock().written.push((Arc::clone(schema), row.clone()));
    }

    fn error_row_written(&self, schema: &Arc<RowSchema>, row: &Row) {
        self.lock().errors.push((Arc::clone(schema), row.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowflow_core::prelude::{Value, ValueType};

    #[test]
    fn collector_keeps_order_and_clears() {
        let schema = RowSchema::builder()
            .field("n", ValueType::Integer)
            .build()
            .unwrap()
            .into_shared();
        let c = RowCollector::new();
        for i in 0..3 {
            c.row_written(&schema, &Row::new(vec![Value::Integer(i)]));
        }
        c.row_read(&schema, &Row::new(vec![Value::Integer(9)]));

        let written: Vec<i64> = c
            .written()
            .iter()
            .map(|r| r.get(0).and_then(Value::as_i64).unwrap())
            .collect();
        assert_eq!(written, vec![0, 1, 2]);
        assert_eq!(c.rows_read().len(), 1);
        assert!(c.error_rows().is_empty());

        c.clear();
        assert!(c.rows_written().is_empty());
        assert!(c.rows_read().is_empty());
    }
}
