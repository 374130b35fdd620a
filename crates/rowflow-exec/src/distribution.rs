//! Output routing for one step-copy.
//!
//! A copy owns one `OutputHop` per enabled hop leaving its step. The step's
//! `OutputMode` decides how rows spread over hops (rotate or copy to all), the
//! hop's `Routing` decides which consumer copy of that hop gets the row.

use std::sync::Arc;

use rowflow_core::hash::hash_row_key;
use rowflow_core::prelude::{OutputMode, Row, RowSchema, Routing};
use rowflow_steps::StepError;

use crate::rowset::RowSet;

pub(crate) struct OutputHop {
    target: String,
    routing: Routing,
    /// Indexed by consumer copy; a single entry for copy-affinity hops.
    channels: Vec<Arc<RowSet>>,
    next: usize,
    key_cache: Option<(Arc<RowSchema>, Vec<usize>)>,
}

impl OutputHop {
    pub(crate) fn new(target: String, routing: Routing, channels: Vec<Arc<RowSet>>) -> Self {
        Self {
            target,
            routing,
            channels,
            next: 0,
            key_cache: None,
        }
    }

    pub(crate) fn target(&self) -> &str {
        &self.target
    }

    pub(crate) fn channels(&self) -> &[Arc<RowSet>] {
        &self.channels
    }

    fn key_indices(&mut self, schema: &Arc<RowSchema>, fields: &[String]) -> Result<&[usize], StepError> {
        let stale = !matches!(&self.key_cache, Some((s, _)) if Arc::ptr_eq(s, schema));
        if stale {
            let idx = schema.indices_of(fields).map_err(|e| {
                StepError::Schema(format!("routing key for hop to '{}': {e}", self.target))
            })?;
            self.key_cache = Some((Arc::clone(schema), idx));
        }
        Ok(self
            .key_cache
            .as_ref()
            .map(|(_, idx)| idx.as_slice())
            .unwrap_or(&[]))
    }

    /// Consumer channel for this row.
    fn pick(&mut self, schema: &Arc<RowSchema>, row: &Row) -> Result<Option<Arc<RowSet>>, StepError> {
        let n = self.channels.len();
        if n == 0 {
            return Ok(None);
        }
        let idx = match &self.routing {
            Routing::RoundRobin => {
                let i = self.next % n;
                self.next = (i + 1) % n;
                i
            }
            Routing::CopyAffinity => 0,
            Routing::KeyHash { fields } => {
                let fields = fields.clone();
                let key = self.key_indices(schema, &fields)?;
                (hash_row_key(row, key) % n as u64) as usize
            }
        };
        Ok(Some(Arc::clone(&self.channels[idx])))
    }

    fn send(&mut self, schema: &Arc<RowSchema>, row: Row) -> Result<(), StepError> {
        if let Some(ch) = self.pick(schema, &row)? {
            ch.put(schema, row)?;
        }
        Ok(())
    }
}

pub(crate) struct Outputs {
    mode: OutputMode,
    hops: Vec<OutputHop>,
    next_hop: usize,
}

impl Outputs {
    pub(crate) fn new(mode: OutputMode, hops: Vec<OutputHop>) -> Self {
        Self {
            mode,
            hops,
            next_hop: 0,
        }
    }

    pub(crate) fn channels(&self) -> impl Iterator<Item = &Arc<RowSet>> {
        self.hops.iter().flat_map(|h| h.channels().iter())
    }

    pub(crate) fn targets(&self) -> Vec<String> {
        self.hops.iter().map(|h| h.target().to_string()).collect()
    }

    /// Route a row over the hops according to the output mode. Rows written
    /// by a step without hops are dropped.
    pub(crate) fn send(&mut self, schema: &Arc<RowSchema>, row: Row) -> Result<(), StepError> {
        match self.hops.len() {
            0 => Ok(()),
            1 => self.hops[0].send(schema, row),
            n => match self.mode {
                OutputMode::Distribute => {
                    let i = self.next_hop % n;
                    self.next_hop = (i + 1) % n;
                    self.hops[i].send(schema, row)
                }
                OutputMode::Copy => {
                    let (last, rest) = self.hops.split_last_mut().ok_or_else(|| {
                        StepError::Failed("output hops vanished".into())
                    })?;
                    for hop in rest {
                        hop.send(schema, row.clone())?;
                    }
                    last.send(schema, row)
                }
            },
        }
    }

    pub(crate) fn send_to(
        &mut self,
        target: &str,
        schema: &Arc<RowSchema>,
        row: Row,
    ) -> Result<(), StepError> {
        let hop = self
            .hops
            .iter_mut()
            .find(|h| h.target() == target)
            .ok_or_else(|| StepError::Config(format!("no hop to target step '{target}'")))?;
        hop.send(schema, row)
    }

    pub(crate) fn mark_done(&self) {
        for ch in self.channels() {
            ch.mark_done();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowflow_core::prelude::{ChannelId, StepCopyId, Value, ValueType};

    fn schema() -> Arc<RowSchema> {
        RowSchema::builder()
            .field("k", ValueType::String)
            .field("n", ValueType::Integer)
            .build()
            .unwrap()
            .into_shared()
    }

    fn row(k: &str, n: i64) -> Row {
        Row::new(vec![Value::String(k.into()), Value::Integer(n)])
    }

    fn channels(target: &str, n: usize) -> Vec<Arc<RowSet>> {
        (0..n)
            .map(|i| {
                Arc::new(RowSet::unbounded(
                    ChannelId::new(i as u64),
                    StepCopyId::new("src", 0),
                    StepCopyId::new(target, i),
                ))
            })
            .collect()
    }

    #[test]
    fn round_robin_rotates_over_consumer_copies() {
        let chans = channels("b", 3);
        let mut out = Outputs::new(
            OutputMode::Distribute,
            vec![OutputHop::new("b".into(), Routing::RoundRobin, chans.clone())],
        );
        let s = schema();
        for i in 0..7 {
            out.send(&s, row("x", i)).unwrap();
        }
        let sizes: Vec<usize> = chans.iter().map(|c| c.size()).collect();
        assert_eq!(sizes, vec![3, 2, 2]);
    }

    #[test]
    fn key_hash_keeps_equal_keys_together() {
        let chans = channels("b", 4);
        let mut out = Outputs::new(
            OutputMode::Distribute,
            vec![OutputHop::new(
                "b".into(),
                Routing::KeyHash {
                    fields: vec!["k".into()],
                },
                chans.clone(),
            )],
        );
        let s = schema();
        for i in 0..20 {
            out.send(&s, row(if i % 2 == 0 { "even" } else { "odd" }, i)).unwrap();
        }
        let non_empty: Vec<usize> = chans.iter().map(|c| c.size()).filter(|&n| n > 0).collect();
        // Either both keys share a copy or each key owns one copy, never split.
        assert!(non_empty == vec![20] || non_empty == vec![10, 10]);
    }

    #[test]
    fn copy_mode_feeds_every_hop() {
        let b = channels("b", 1);
        let c = channels("c", 1);
        let mut out = Outputs::new(
            OutputMode::Copy,
            vec![
                OutputHop::new("b".into(), Routing::RoundRobin, b.clone()),
                OutputHop::new("c".into(), Routing::RoundRobin, c.clone()),
            ],
        );
        let s = schema();
        for i in 0..4 {
            out.send(&s, row("x", i)).unwrap();
        }
        assert_eq!(b[0].size(), 4);
        assert_eq!(c[0].size(), 4);
    }

    #[test]
    fn send_to_unknown_target_is_config_error() {
        let mut out = Outputs::new(OutputMode::Distribute, vec![]);
        let err = out.send_to("nowhere", &schema(), row("x", 1)).unwrap_err();
        assert!(matches!(err, StepError::Config(_)));
    }
}
