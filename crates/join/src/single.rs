//! Single-timeline interval equi-join.
//!
//! Both inputs share one clock. Rows are queued per side and consumed in
//! sync-time order; a side whose queue is empty holds the other side back
//! at its last low watermark, or not at all once it has completed.

use crate::config::JoinConfig;
use crate::timeline::{Emitter, Horizon, Probing, Rules, Selector, Timeline};
use crate::watermark::WatermarkTracker;
use alloc::boxed::Box;
use tempora_core::{
    Batch, BatchObserver, BatchPool, BatchWriter, Error, PoolStats, Result, RowKind, Side,
    Timestamp, WriterSnapshot, INFINITY_SYNC_TIME,
};
use tempora_index::IndexStats;

/// Checkpointed state of an `EquiJoin`.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EquiJoinSnapshot<K, L, R, O> {
    timeline: Timeline<K, L, R>,
    tracker: WatermarkTracker,
    left_completed: bool,
    right_completed: bool,
    writer: WriterSnapshot<K, O>,
}

impl<K, L, R, O> EquiJoinSnapshot<K, L, R, O> {
    /// Returns the clock at the time of the checkpoint.
    pub fn current_time(&self) -> Timestamp {
        self.timeline.curr_time()
    }

    /// Returns the number of intervals held at the time of the checkpoint.
    pub fn live_intervals(&self) -> usize {
        self.timeline.live_intervals()
    }
}

/// Temporal interval equi-join over one timeline.
///
/// Each left interval is matched against every right interval with an equal
/// key that overlaps it. One output row is emitted per match, spanning the
/// intersection of the two intervals, with a payload built by the selector.
///
/// # Example
///
/// ```rust
/// use tempora_core::{hash_key, Batch, BatchSink, Event};
/// use tempora_join::{EquiJoin, JoinConfig};
///
/// let sink = BatchSink::new();
/// let mut join = EquiJoin::new(
///     JoinConfig::default(),
///     |l: &&str, r: &&str| (*l, *r),
///     sink.clone(),
/// )
/// .unwrap();
///
/// let h = hash_key(&1u32);
/// join.on_left_batch(Batch::from_events([Event::interval(0, 10, 1u32, h, "l")]).unwrap());
/// join.on_right_batch(Batch::from_events([Event::interval(5, 15, 1u32, h, "r")]).unwrap());
///
/// // The left side could still send a row before 5, so the right row waits.
/// assert_eq!(join.pending_rows(), 1);
/// join.on_left_completed();
/// join.on_right_completed();
///
/// let rows = sink.events();
/// assert_eq!(rows.len(), 1);
/// assert_eq!((rows[0].sync_time, rows[0].other_time), (5, 10));
/// assert_eq!(rows[0].payload, ("l", "r"));
/// ```
pub struct EquiJoin<K, L, R, O> {
    config: JoinConfig,
    rules: Rules,
    timeline: Timeline<K, L, R>,
    tracker: WatermarkTracker,
    left_completed: bool,
    right_completed: bool,
    emitter: Emitter<K, L, R, O>,
}

impl<K, L, R, O> EquiJoin<K, L, R, O>
where
    K: Clone + Eq + Default + 'static,
    L: 'static,
    R: 'static,
    O: Default + 'static,
{
    /// Creates a join writing its output to `observer`.
    ///
    /// Fails if `config` does not validate.
    pub fn new<F, B>(config: JoinConfig, selector: F, observer: B) -> Result<Self>
    where
        F: Fn(&L, &R) -> O + 'static,
        B: BatchObserver<K, O> + 'static,
    {
        config.validate()?;
        let writer = BatchWriter::new(pool_for(&config), Box::new(observer));
        log::debug!(
            "equi-join created with {:?} scheduler, batch capacity {}",
            config.scheduler_kind(),
            config.batch_capacity()
        );
        Ok(Self::assemble(
            config,
            Timeline::new(config.scheduler_kind()),
            WatermarkTracker::new(),
            (false, false),
            Emitter::new(writer, Box::new(selector)),
        ))
    }

    fn assemble(
        config: JoinConfig,
        timeline: Timeline<K, L, R>,
        tracker: WatermarkTracker,
        (left_completed, right_completed): (bool, bool),
        emitter: Emitter<K, L, R, O>,
    ) -> Self {
        Self {
            config,
            rules: Rules {
                mode: config.interval_mode(),
                probing: Probing::Immediate,
            },
            timeline,
            tracker,
            left_completed,
            right_completed,
            emitter,
        }
    }

    /// Consumes a batch of left rows.
    pub fn on_left_batch(&mut self, batch: Batch<K, L>) {
        if self.is_closed(Side::Left) {
            return;
        }
        for event in batch.into_events() {
            if event.kind() == RowKind::LowWatermark {
                self.on_watermark(Side::Left, event.sync_time);
            } else {
                self.timeline.push_left(event);
            }
        }
        self.drain();
    }

    /// Consumes a batch of right rows.
    pub fn on_right_batch(&mut self, batch: Batch<K, R>) {
        if self.is_closed(Side::Right) {
            return;
        }
        for event in batch.into_events() {
            if event.kind() == RowKind::LowWatermark {
                self.on_watermark(Side::Right, event.sync_time);
            } else {
                self.timeline.push_right(event);
            }
        }
        self.drain();
    }

    /// Marks the left input as finished.
    pub fn on_left_completed(&mut self) {
        self.complete(Side::Left);
    }

    /// Marks the right input as finished.
    pub fn on_right_completed(&mut self) {
        self.complete(Side::Right);
    }

    /// Emits any partially filled output batch and forwards the flush.
    pub fn on_flush(&mut self) {
        self.emitter.writer.on_flush();
    }

    fn is_closed(&self, side: Side) -> bool {
        let completed = match side {
            Side::Left => self.left_completed,
            Side::Right => self.right_completed,
        };
        if completed {
            log::warn!("dropping {:?} batch received after completion", side);
        }
        completed
    }

    fn horizon(&self) -> Horizon {
        Horizon {
            left: if self.left_completed {
                INFINITY_SYNC_TIME
            } else {
                self.tracker.side(Side::Left)
            },
            right: if self.right_completed {
                INFINITY_SYNC_TIME
            } else {
                self.tracker.side(Side::Right)
            },
        }
    }

    fn drain(&mut self) {
        let horizon = self.horizon();
        self.timeline.drain(horizon, &self.rules, &mut self.emitter);
    }

    fn on_watermark(&mut self, side: Side, time: Timestamp) {
        self.drain();
        if self.tracker.observe(side, time) {
            self.drain();
        }
        if let Some(watermark) = self.tracker.take_advance() {
            self.emitter.writer.emit_low_watermark(watermark);
            log::debug!("emitted low watermark {}", watermark);
        }
    }

    fn complete(&mut self, side: Side) {
        let already = match side {
            Side::Left => core::mem::replace(&mut self.left_completed, true),
            Side::Right => core::mem::replace(&mut self.right_completed, true),
        };
        if already {
            return;
        }
        log::debug!("{:?} input completed", side);
        self.drain();
        if self.left_completed && self.right_completed {
            self.emitter.writer.complete();
            log::debug!(
                "equi-join completed after {} output rows",
                self.emitter.writer.rows_emitted()
            );
        }
    }

    /// Returns the configuration the join was built with.
    pub fn config(&self) -> &JoinConfig {
        &self.config
    }

    /// Returns the join clock.
    pub fn current_time(&self) -> Timestamp {
        self.timeline.curr_time()
    }

    /// Returns the last low watermark emitted downstream.
    pub fn current_watermark(&self) -> Timestamp {
        self.tracker.emitted()
    }

    /// Returns the number of intervals held on both sides.
    pub fn live_intervals(&self) -> usize {
        self.timeline.live_intervals()
    }

    /// Returns the number of input rows not yet consumed.
    pub fn pending_rows(&self) -> usize {
        self.timeline.pending_rows()
    }

    /// Returns the number of interval ends waiting to expire.
    pub fn scheduled_ends(&self) -> usize {
        self.timeline.scheduled_ends()
    }

    pub fn left_index_stats(&self) -> IndexStats {
        self.timeline.left_stats()
    }

    pub fn right_index_stats(&self) -> IndexStats {
        self.timeline.right_stats()
    }

    /// Returns the number of output rows written, including unsent ones.
    pub fn rows_emitted(&self) -> u64 {
        self.emitter.writer.rows_emitted()
    }

    /// Returns the number of output batches handed downstream.
    pub fn batches_emitted(&self) -> u64 {
        self.emitter.writer.batches_emitted()
    }

    /// Returns the pool output batches are drawn from. Consumers hand
    /// processed batches back through it.
    pub fn pool(&self) -> &BatchPool<K, O> {
        self.emitter.writer.pool()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool().stats()
    }
}

impl<K, L, R, O> EquiJoin<K, L, R, O>
where
    K: Clone + Eq + Default + 'static,
    L: Clone + 'static,
    R: Clone + 'static,
    O: Clone + Default + 'static,
{
    /// Captures the join state, including output not yet handed downstream.
    pub fn checkpoint(&self) -> EquiJoinSnapshot<K, L, R, O> {
        EquiJoinSnapshot {
            timeline: self.timeline.clone(),
            tracker: self.tracker,
            left_completed: self.left_completed,
            right_completed: self.right_completed,
            writer: self.emitter.writer.checkpoint(),
        }
    }

    /// Rebuilds a join from a checkpoint.
    ///
    /// `config` must call for the same scheduler as the checkpointed join.
    pub fn restore<F, B>(
        config: JoinConfig,
        selector: F,
        observer: B,
        snapshot: EquiJoinSnapshot<K, L, R, O>,
    ) -> Result<Self>
    where
        F: Fn(&L, &R) -> O + 'static,
        B: BatchObserver<K, O> + 'static,
    {
        config.validate()?;
        if snapshot.timeline.scheduler_kind() != config.scheduler_kind() {
            return Err(Error::invalid_config(alloc::format!(
                "checkpoint uses the {:?} scheduler but the configuration calls for {:?}",
                snapshot.timeline.scheduler_kind(),
                config.scheduler_kind()
            )));
        }
        let writer = BatchWriter::restore(pool_for(&config), Box::new(observer), snapshot.writer);
        log::debug!(
            "equi-join restored at time {} with {} live intervals",
            snapshot.timeline.curr_time(),
            snapshot.timeline.live_intervals()
        );
        Ok(Self::assemble(
            config,
            snapshot.timeline,
            snapshot.tracker,
            (snapshot.left_completed, snapshot.right_completed),
            Emitter::new(writer, Box::new(selector) as Selector<L, R, O>),
        ))
    }
}

pub(crate) fn pool_for<K, O>(config: &JoinConfig) -> BatchPool<K, O> {
    BatchPool::new(config.batch_capacity(), config.max_pooled_batches())
}
