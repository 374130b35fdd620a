//! Row producers inject rows from outside the pipeline into a step-copy.

use std::sync::Arc;

use rowflow_core::prelude::{Row, RowSchema, StepCopyId};

use crate::rowset::{ChannelError, Offer, RowSet};

/// Write end of an input channel feeding one step-copy.
///
/// The consuming copy only finishes after `finished` is called (or the run is
/// stopped), so every producer must eventually call it.
#[derive(Debug, Clone)]
pub struct RowProducer {
    target: StepCopyId,
    channel: Arc<RowSet>,
}

impl RowProducer {
    pub(crate) fn new(target: StepCopyId, channel: Arc<RowSet>) -> Self {
        Self { target, channel }
    }

    pub fn target(&self) -> &StepCopyId {
        &self.target
    }

    /// Blocks while the channel is full in threaded mode. Fails with
    /// `Closed` after `finished` or once the run is stopped.
    pub fn put_row(&self, schema: &Arc<RowSchema>, row: Row) -> Result<(), ChannelError> {
        self.channel.put(schema, row)
    }

    pub fn try_put_row(&self, schema: &Arc<RowSchema>, row: Row) -> Result<Offer, ChannelError> {
        self.channel.try_put(schema, row)
    }

    /// Signal end of input. Idempotent.
    pub fn finished(&self) {
        self.channel.mark_done();
    }

    /// Rows waiting to be read by the target.
    pub fn buffered(&self) -> usize {
        self.channel.size()
    }
}
