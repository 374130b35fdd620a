//! Row channels ("row sets"): ordered single-producer/single-consumer queues
//! between two step-copies.
//!
//! A bounded channel blocks `put` while full and `get` while empty; both wake
//! as soon as the channel is marked done. Unbounded channels back the
//! cooperative executor, where nothing may block. The done flag is only read
//! and written under the same lock as the queue, so a waiter can never miss
//! the wake-up.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use rowflow_core::prelude::{ChannelId, Row, RowSchema, StepCopyId};
use rowflow_steps::StepError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel is closed")]
    Closed,

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("row has {got} values, schema has {expected} fields")]
    Arity { expected: usize, got: usize },
}

impl From<ChannelError> for StepError {
    fn from(e: ChannelError) -> Self {
        match e {
            ChannelError::Closed => StepError::Stopped,
            other => StepError::Schema(other.to_string()),
        }
    }
}

/// Result of a non-blocking (or timed) read.
#[derive(Debug, PartialEq)]
pub enum Poll {
    Row(Row),
    /// Nothing buffered; the producer is still live.
    Empty,
    /// Done and drained.
    Done,
}

/// Result of a non-blocking write.
#[derive(Debug, PartialEq)]
pub enum Offer {
    Accepted,
    /// Channel at capacity; the row is handed back.
    Full(Row),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub id: ChannelId,
    pub origin: StepCopyId,
    pub destination: StepCopyId,
    pub capacity: Option<usize>,
    pub buffered: usize,
    pub rows_in: u64,
    pub rows_out: u64,
    pub done: bool,
}

struct State {
    queue: VecDeque<Row>,
    done: bool,
    schema: Option<Arc<RowSchema>>,
}

pub struct RowSet {
    id: ChannelId,
    origin: StepCopyId,
    destination: StepCopyId,
    /// `None` means unbounded.
    capacity: Option<usize>,
    state: Mutex<State>,
    not_full: Condvar,
    not_empty: Condvar,
    rows_in: AtomicU64,
    rows_out: AtomicU64,
}

impl std::fmt::Debug for RowSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowSet")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("destination", &self.destination)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl RowSet {
    pub fn bounded(
        id: ChannelId,
        origin: StepCopyId,
        destination: StepCopyId,
        capacity: usize,
    ) -> Self {
        Self::with_capacity(id, origin, destination, Some(capacity.max(1)))
    }

    pub fn unbounded(id: ChannelId, origin: StepCopyId, destination: StepCopyId) -> Self {
        Self::with_capacity(id, origin, destination, None)
    }

    fn with_capacity(
        id: ChannelId,
        origin: StepCopyId,
        destination: StepCopyId,
        capacity: Option<usize>,
    ) -> Self {
        Self {
            id,
            origin,
            destination,
            capacity,
            state: Mutex::new(State {
                queue: VecDeque::new(),
                done: false,
                schema: None,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            rows_in: AtomicU64::new(0),
            rows_out: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn origin(&self) -> &StepCopyId {
        &self.origin
    }

    pub fn destination(&self) -> &StepCopyId {
        &self.destination
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_full(&self, st: &State) -> bool {
        matches!(self.capacity, Some(cap) if st.queue.len() >= cap)
    }

    /// Fix the channel schema on first use; refuse incompatible later ones.
    fn admit(st: &mut State, schema: &Arc<RowSchema>, row: &Row) -> Result<(), ChannelError> {
        if row.len() != schema.len() {
            return Err(ChannelError::Arity {
                expected: schema.len(),
                got: row.len(),
            });
        }
        match &st.schema {
            None => st.schema = Some(Arc::clone(schema)),
            Some(fixed) if Arc::ptr_eq(fixed, schema) || fixed.is_compatible_with(schema) => {}
            Some(fixed) => {
                return Err(ChannelError::SchemaMismatch(format!(
                    "channel carries {} fields, row schema has {}",
                    fixed.len(),
                    schema.len()
                )));
            }
        }
        Ok(())
    }

    fn push(&self, st: &mut State, row: Row) {
        st.queue.push_back(row);
        self.rows_in.fetch_add(1, Ordering::Relaxed);
        self.not_empty.notify_one();
    }

    fn pop(&self, st: &mut State) -> Option<Row> {
        let row = st.queue.pop_front()?;
        self.rows_out.fetch_add(1, Ordering::Relaxed);
        self.not_full.notify_one();
        Some(row)
    }

    /// Append a row, blocking while the channel is full.
    ///
    /// Fails with `Closed` once the channel is done, including when it is
    /// marked done while this call is waiting.
    pub fn put(&self, schema: &Arc<RowSchema>, row: Row) -> Result<(), ChannelError> {
        let mut st = self.lock();
        Self::admit(&mut st, schema, &row)?;
        while !st.done && self.is_full(&st) {
            st = self.not_full.wait(st).unwrap_or_else(PoisonError::into_inner);
        }
        if st.done {
            return Err(ChannelError::Closed);
        }
        self.push(&mut st, row);
        Ok(())
    }

    pub fn try_put(&self, schema: &Arc<RowSchema>, row: Row) -> Result<Offer, ChannelError> {
        let mut st = self.lock();
        if st.done {
            return Err(ChannelError::Closed);
        }
        Self::admit(&mut st, schema, &row)?;
        if self.is_full(&st) {
            return Ok(Offer::Full(row));
        }
        self.push(&mut st, row);
        Ok(Offer::Accepted)
    }

    /// Remove the oldest row, blocking while empty. `None` means done and drained.
    pub fn get(&self) -> Option<Row> {
        let mut st = self.lock();
        loop {
            if let Some(row) = self.pop(&mut st) {
                return Some(row);
            }
            if st.done {
                return None;
            }
            st = self.not_empty.wait(st).unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn try_get(&self) -> Poll {
        let mut st = self.lock();
        match self.pop(&mut st) {
            Some(row) => Poll::Row(row),
            None if st.done => Poll::Done,
            None => Poll::Empty,
        }
    }

    /// Like `get`, but gives up with `Poll::Empty` after `timeout`.
    pub fn get_timeout(&self, timeout: Duration) -> Poll {
        let deadline = Instant::now() + timeout;
        let mut st = self.lock();
        loop {
            if let Some(row) = self.pop(&mut st) {
                return Poll::Row(row);
            }
            if st.done {
                return Poll::Done;
            }
            let now = Instant::now();
            if now >= deadline {
                return Poll::Empty;
            }
            let (guard, _) = self
                .not_empty
                .wait_timeout(st, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            st = guard;
        }
    }

    /// Close the channel. Idempotent; wakes every blocked caller.
    pub fn mark_done(&self) {
        let mut st = self.lock();
        st.done = true;
        drop(st);
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    pub fn is_done(&self) -> bool {
        self.lock().done
    }

    /// Done and nothing left to read.
    pub fn is_finished(&self) -> bool {
        let st = self.lock();
        st.done && st.queue.is_empty()
    }

    /// Buffered rows right now.
    pub fn size(&self) -> usize {
        self.lock().queue.len()
    }

    /// Schema fixed by the first row, if any row was ever put.
    pub fn schema(&self) -> Option<Arc<RowSchema>> {
        self.lock().schema.clone()
    }

    pub fn rows_in(&self) -> u64 {
        self.rows_in.load(Ordering::Relaxed)
    }

    pub fn rows_out(&self) -> u64 {
        self.rows_out.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> ChannelStats {
        let st = self.lock();
        ChannelStats {
            id: self.id,
            origin: self.origin.clone(),
            destination: self.destination.clone(),
            capacity: self.capacity,
            buffered: st.queue.len(),
            rows_in: self.rows_in(),
            rows_out: self.rows_out(),
            done: st.done,
        }
    }
}
