//! Batch output writing.
//!
//! `BatchWriter` accumulates output rows into pooled batches and hands each
//! sealed batch to a downstream `BatchObserver`.

use crate::batch::Batch;
use crate::pool::BatchPool;
use crate::row::Event;
use crate::time::{Timestamp, LOW_WATERMARK_OTHER_TIME, PUNCTUATION_OTHER_TIME};
use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

/// Receives the batches and signals an operator produces.
pub trait BatchObserver<K, P> {
    /// Called with every sealed batch.
    fn on_next(&mut self, batch: Batch<K, P>);

    /// Called when the operator was asked to flush.
    fn on_flush(&mut self) {}

    /// Called once after both inputs completed and the last batch was sent.
    fn on_completed(&mut self) {}
}

/// Adapts a closure into an observer that only sees batches.
pub struct FnObserver<F>(pub F);

impl<K, P, F> BatchObserver<K, P> for FnObserver<F>
where
    F: FnMut(Batch<K, P>),
{
    fn on_next(&mut self, batch: Batch<K, P>) {
        (self.0)(batch)
    }
}

struct SinkState<K, P> {
    batches: Vec<Batch<K, P>>,
    flushes: usize,
    completed: bool,
}

/// An observer that collects everything it receives.
///
/// Clones share the same buffer, so one handle can be given to an operator
/// while another is kept for inspection.
pub struct BatchSink<K, P> {
    state: Rc<RefCell<SinkState<K, P>>>,
}

impl<K, P> Clone for BatchSink<K, P> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<K, P> Default for BatchSink<K, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, P> BatchSink<K, P> {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(SinkState {
                batches: Vec::new(),
                flushes: 0,
                completed: false,
            })),
        }
    }

    /// Returns the number of batches received.
    pub fn batch_count(&self) -> usize {
        self.state.borrow().batches.len()
    }

    /// Returns the number of flush signals received.
    pub fn flush_count(&self) -> usize {
        self.state.borrow().flushes
    }

    /// Returns true once the completion signal arrived.
    pub fn is_completed(&self) -> bool {
        self.state.borrow().completed
    }

    /// Takes the received batches, leaving the sink empty.
    pub fn take_batches(&self) -> Vec<Batch<K, P>> {
        core::mem::take(&mut self.state.borrow_mut().batches)
    }
}

impl<K: Clone, P: Clone> BatchSink<K, P> {
    /// Returns copies of every received row in arrival order.
    pub fn events(&self) -> Vec<Event<K, P>> {
        self.state
            .borrow()
            .batches
            .iter()
            .flat_map(|batch| batch.to_events())
            .collect()
    }
}

impl<K, P> BatchObserver<K, P> for BatchSink<K, P> {
    fn on_next(&mut self, batch: Batch<K, P>) {
        self.state.borrow_mut().batches.push(batch);
    }

    fn on_flush(&mut self) {
        self.state.borrow_mut().flushes += 1;
    }

    fn on_completed(&mut self) {
        self.state.borrow_mut().completed = true;
    }
}

/// State of a writer captured by a checkpoint: its partially filled batch and
/// its counters.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WriterSnapshot<K, P> {
    pub pending: Vec<Event<K, P>>,
    pub next_sequence: u64,
    pub rows_emitted: u64,
}

/// Accumulates rows into pooled batches and emits them when full.
pub struct BatchWriter<K, P> {
    pool: BatchPool<K, P>,
    current: Option<Batch<K, P>>,
    observer: Box<dyn BatchObserver<K, P>>,
    next_sequence: u64,
    rows_emitted: u64,
}

impl<K, P> BatchWriter<K, P> {
    /// Creates a writer drawing batches from `pool`.
    pub fn new(pool: BatchPool<K, P>, observer: Box<dyn BatchObserver<K, P>>) -> Self {
        Self {
            pool,
            current: None,
            observer,
            next_sequence: 0,
            rows_emitted: 0,
        }
    }

    /// Returns the pool batches are drawn from.
    pub fn pool(&self) -> &BatchPool<K, P> {
        &self.pool
    }

    /// Returns the number of rows written so far, including unsent ones.
    pub fn rows_emitted(&self) -> u64 {
        self.rows_emitted
    }

    /// Returns the number of batches handed downstream.
    pub fn batches_emitted(&self) -> u64 {
        self.next_sequence
    }

    /// Returns the number of rows waiting in the partially filled batch.
    pub fn pending_rows(&self) -> usize {
        self.current.as_ref().map(|batch| batch.len()).unwrap_or(0)
    }

    /// Appends an interval row.
    pub fn emit_interval(
        &mut self,
        sync_time: Timestamp,
        other_time: Timestamp,
        key: K,
        hash: i32,
        payload: P,
    ) {
        self.append(sync_time, other_time, key, hash, payload, false);
    }

    /// Seals and emits the partially filled batch. Returns false if there was
    /// nothing to emit.
    pub fn flush(&mut self) -> bool {
        match self.current.take() {
            Some(batch) if !batch.is_empty() => {
                self.seal_and_send(batch);
                true
            }
            Some(batch) => {
                self.current = Some(batch);
                false
            }
            None => false,
        }
    }

    /// Flushes and forwards a flush signal downstream.
    pub fn on_flush(&mut self) {
        self.flush();
        self.observer.on_flush();
    }

    /// Flushes and signals completion downstream.
    pub fn complete(&mut self) {
        self.flush();
        self.observer.on_completed();
    }

    fn append(
        &mut self,
        sync_time: Timestamp,
        other_time: Timestamp,
        key: K,
        hash: i32,
        payload: P,
        control: bool,
    ) {
        let pool = &self.pool;
        let batch = self.current.get_or_insert_with(|| pool.get());
        batch.append(sync_time, other_time, key, hash, payload, control);
        self.rows_emitted += 1;
        if batch.is_full() {
            if let Some(full) = self.current.take() {
                self.seal_and_send(full);
            }
        }
    }

    fn seal_and_send(&mut self, mut batch: Batch<K, P>) {
        batch.seal(self.next_sequence);
        self.next_sequence += 1;
        log::trace!(
            "sealed output batch {} with {} rows",
            batch.meta().sequence,
            batch.len()
        );
        self.observer.on_next(batch);
    }
}

impl<K, P: Default> BatchWriter<K, P> {
    /// Appends a punctuation row for `key`.
    pub fn emit_punctuation(&mut self, time: Timestamp, key: K) {
        self.append(time, PUNCTUATION_OTHER_TIME, key, 0, P::default(), true);
    }
}

impl<K: Default, P: Default> BatchWriter<K, P> {
    /// Appends a low-watermark row.
    pub fn emit_low_watermark(&mut self, time: Timestamp) {
        self.append(
            time,
            LOW_WATERMARK_OTHER_TIME,
            K::default(),
            0,
            P::default(),
            true,
        );
    }
}

impl<K: Clone, P: Clone> BatchWriter<K, P> {
    /// Captures the partially filled batch and counters.
    pub fn checkpoint(&self) -> WriterSnapshot<K, P> {
        WriterSnapshot {
            pending: self
                .current
                .as_ref()
                .map(|batch| batch.to_events())
                .unwrap_or_default(),
            next_sequence: self.next_sequence,
            rows_emitted: self.rows_emitted,
        }
    }

    /// Rebuilds a writer from a checkpoint.
    pub fn restore(
        pool: BatchPool<K, P>,
        observer: Box<dyn BatchObserver<K, P>>,
        snapshot: WriterSnapshot<K, P>,
    ) -> Self {
        let mut writer = Self::new(pool, observer);
        writer.next_sequence = snapshot.next_sequence;
        if !snapshot.pending.is_empty() {
            let mut batch = writer.pool.get();
            for event in snapshot.pending {
                let control = event.is_control();
                batch.append(
                    event.sync_time,
                    event.other_time,
                    event.key,
                    event.hash,
                    event.payload,
                    control,
                );
            }
            writer.current = Some(batch);
        }
        writer.rows_emitted = snapshot.rows_emitted;
        writer
    }
}
