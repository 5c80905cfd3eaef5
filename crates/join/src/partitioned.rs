//! Partitioned interval equi-join.
//!
//! Every partition key gets its own timeline with its own clock, so a busy
//! partition never waits for a quiet one. Rows are routed to their partition
//! as batches arrive and each touched partition is drained before the call
//! returns.
//!
//! Low watermarks are global. When either side's watermark moves every live
//! partition is drained against the new horizon, the joint watermark is
//! forwarded if it advanced, and partitions that ended up with nothing
//! queued and nothing held are evicted. Each watermark that moves a side
//! therefore costs a pass over every live partition, not only the touched
//! ones.
//!
//! Partitions live in an arena in creation order. The key map only resolves
//! a partition key to its arena slot and is rebuilt on restore.

use crate::config::JoinConfig;
use crate::single::pool_for;
use crate::timeline::{Drained, Emitter, Horizon, Probing, Rules, Timeline};
use crate::watermark::WatermarkTracker;
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::hash::Hash;
use hashbrown::HashMap;
use tempora_core::{
    invariant_violation, Batch, BatchObserver, BatchPool, BatchWriter, Error, PoolStats, Result,
    RowKind, Side, Timestamp, WriterSnapshot, INFINITY_SYNC_TIME,
};
use tempora_index::IndexStats;

/// Lifecycle phase of a live partition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartitionPhase {
    /// Holding queued rows or open intervals.
    Active,
    /// Found clean by a drain pass; evicted after the next emitted watermark
    /// unless new rows arrive first.
    Draining,
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
struct PartitionState<PK, K, L, R> {
    key: PK,
    timeline: Timeline<K, L, R>,
    touched: bool,
    purge_candidate: bool,
}

/// Checkpointed state of a `PartitionedEquiJoin`.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PartitionedSnapshot<PK, K, L, R, O> {
    partitions: Vec<Option<PartitionState<PK, K, L, R>>>,
    free_slots: Vec<usize>,
    purge_candidates: Vec<usize>,
    tracker: WatermarkTracker,
    left_completed: bool,
    right_completed: bool,
    writer: WriterSnapshot<K, O>,
}

impl<PK, K, L, R, O> PartitionedSnapshot<PK, K, L, R, O> {
    /// Returns the number of partitions held at the time of the checkpoint.
    pub fn live_partitions(&self) -> usize {
        self.partitions.iter().filter(|p| p.is_some()).count()
    }
}

/// Temporal interval equi-join over independently clocked partitions.
///
/// The partition of a row is derived from its key by the extractor given at
/// construction. Rows of different partitions never join.
pub struct PartitionedEquiJoin<PK, K, L, R, O> {
    config: JoinConfig,
    rules: Rules,
    partition_of: Box<dyn Fn(&K) -> PK>,
    partitions: Vec<Option<PartitionState<PK, K, L, R>>>,
    free_slots: Vec<usize>,
    lookup: HashMap<PK, usize>,
    touched: Vec<usize>,
    purge_candidates: Vec<usize>,
    tracker: WatermarkTracker,
    left_completed: bool,
    right_completed: bool,
    emitter: Emitter<K, L, R, O>,
}

impl<PK, K, L, R, O> PartitionedEquiJoin<PK, K, L, R, O>
where
    PK: Hash + Eq + Clone + 'static,
    K: Clone + Eq + Default + 'static,
    L: 'static,
    R: 'static,
    O: Default + 'static,
{
    /// Creates a partitioned join writing its output to `observer`.
    ///
    /// Fails if `config` does not validate.
    pub fn new<P, F, B>(config: JoinConfig, partition_of: P, selector: F, observer: B) -> Result<Self>
    where
        P: Fn(&K) -> PK + 'static,
        F: Fn(&L, &R) -> O + 'static,
        B: BatchObserver<K, O> + 'static,
    {
        config.validate()?;
        let writer = BatchWriter::new(pool_for(&config), Box::new(observer));
        log::debug!(
            "partitioned equi-join created with {:?} scheduler, batch capacity {}",
            config.scheduler_kind(),
            config.batch_capacity()
        );
        Ok(Self {
            config,
            rules: rules_for(&config),
            partition_of: Box::new(partition_of),
            partitions: Vec::new(),
            free_slots: Vec::new(),
            lookup: HashMap::new(),
            touched: Vec::new(),
            purge_candidates: Vec::new(),
            tracker: WatermarkTracker::new(),
            left_completed: false,
            right_completed: false,
            emitter: Emitter::new(writer, Box::new(selector)),
        })
    }

    /// Consumes a batch of left rows.
    pub fn on_left_batch(&mut self, batch: Batch<K, L>) {
        if self.is_closed(Side::Left) {
            return;
        }
        let mut run: Option<(PK, usize)> = None;
        for event in batch.into_events() {
            if event.kind() == RowKind::LowWatermark {
                self.on_watermark(Side::Left, event.sync_time);
                // The watermark may have evicted the cached partition.
                run = None;
                continue;
            }
            let slot = self.route(&mut run, &event.key);
            self.partition_mut(slot).timeline.push_left(event);
        }
        self.drain_touched();
    }

    /// Consumes a batch of right rows.
    pub fn on_right_batch(&mut self, batch: Batch<K, R>) {
        if self.is_closed(Side::Right) {
            return;
        }
        let mut run: Option<(PK, usize)> = None;
        for event in batch.into_events() {
            if event.kind() == RowKind::LowWatermark {
                self.on_watermark(Side::Right, event.sync_time);
                run = None;
                continue;
            }
            let slot = self.route(&mut run, &event.key);
            self.partition_mut(slot).timeline.push_right(event);
        }
        self.drain_touched();
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

    /// Resolves the partition of `key`, reusing the previous row's lookup
    /// while consecutive rows stay in one partition.
    fn route(&mut self, run: &mut Option<(PK, usize)>, key: &K) -> usize {
        let partition = (self.partition_of)(key);
        if let Some((last, slot)) = run.as_ref() {
            if *last == partition {
                return *slot;
            }
        }
        let slot = self.slot_for(&partition);
        let state = self.partition_mut(slot);
        let first_touch = !core::mem::replace(&mut state.touched, true);
        if first_touch {
            self.touched.push(slot);
        }
        *run = Some((partition, slot));
        slot
    }

    fn slot_for(&mut self, partition: &PK) -> usize {
        if let Some(&slot) = self.lookup.get(partition) {
            return slot;
        }
        let state = PartitionState {
            key: partition.clone(),
            timeline: Timeline::new(self.config.scheduler_kind()),
            touched: false,
            purge_candidate: false,
        };
        let slot = match self.free_slots.pop() {
            Some(slot) => {
                self.partitions[slot] = Some(state);
                slot
            }
            None => {
                self.partitions.push(Some(state));
                self.partitions.len() - 1
            }
        };
        self.lookup.insert(partition.clone(), slot);
        log::debug!(
            "created partition in slot {} ({} live)",
            slot,
            self.lookup.len()
        );
        slot
    }

    fn partition_mut(&mut self, slot: usize) -> &mut PartitionState<PK, K, L, R> {
        match self.partitions.get_mut(slot) {
            Some(Some(state)) => state,
            _ => invariant_violation(format_args!("partition slot {} is empty", slot)),
        }
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

    fn drain_partition(&mut self, slot: usize, horizon: Horizon) {
        let state = match self.partitions.get_mut(slot) {
            Some(Some(state)) => state,
            _ => invariant_violation(format_args!("partition slot {} vanished while queued", slot)),
        };
        state.touched = false;
        let drained = state.timeline.drain(horizon, &self.rules, &mut self.emitter);
        if drained == (Drained::Idle { clean: true }) && !state.purge_candidate {
            state.purge_candidate = true;
            self.purge_candidates.push(slot);
        }
    }

    fn drain_touched(&mut self) {
        if self.touched.is_empty() {
            return;
        }
        let horizon = self.horizon();
        let mut touched = core::mem::take(&mut self.touched);
        for &slot in &touched {
            self.drain_partition(slot, horizon);
        }
        touched.clear();
        self.touched = touched;
    }

    fn drain_all(&mut self) {
        let horizon = self.horizon();
        for slot in 0..self.partitions.len() {
            if self.partitions[slot].is_some() {
                self.drain_partition(slot, horizon);
            }
        }
    }

    fn on_watermark(&mut self, side: Side, time: Timestamp) {
        self.drain_touched();
        if self.tracker.observe(side, time) {
            self.drain_all();
        }
        if let Some(watermark) = self.tracker.take_advance() {
            self.emitter.writer.emit_low_watermark(watermark);
            log::debug!("emitted low watermark {}", watermark);
            self.evict_clean();
        }
    }

    /// Evicts every purge candidate that is still clean.
    fn evict_clean(&mut self) {
        let mut candidates = core::mem::take(&mut self.purge_candidates);
        let mut evicted = 0usize;
        for &slot in &candidates {
            let clean = match self.partitions.get_mut(slot) {
                Some(Some(state)) => {
                    state.purge_candidate = false;
                    state.timeline.is_clean()
                }
                _ => invariant_violation(format_args!("purge candidate {} is missing", slot)),
            };
            if !clean {
                continue;
            }
            if let Some(state) = self.partitions[slot].take() {
                if self.lookup.remove(&state.key).is_none() {
                    invariant_violation(format_args!("partition in slot {} was not mapped", slot));
                }
                self.free_slots.push(slot);
                evicted += 1;
            }
        }
        candidates.clear();
        self.purge_candidates = candidates;
        if evicted > 0 {
            log::debug!(
                "evicted {} partitions, {} remain",
                evicted,
                self.lookup.len()
            );
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
        self.drain_all();
        if self.left_completed && self.right_completed {
            self.evict_clean();
            self.emitter.writer.complete();
            log::debug!(
                "partitioned equi-join completed after {} output rows",
                self.emitter.writer.rows_emitted()
            );
        }
    }

    /// Returns the configuration the join was built with.
    pub fn config(&self) -> &JoinConfig {
        &self.config
    }

    /// Returns the number of partitions currently held.
    pub fn live_partitions(&self) -> usize {
        self.lookup.len()
    }

    /// Returns the number of intervals held across all partitions.
    pub fn live_intervals(&self) -> usize {
        self.live().map(|state| state.timeline.live_intervals()).sum()
    }

    /// Returns the number of input rows queued across all partitions.
    pub fn pending_rows(&self) -> usize {
        self.live().map(|state| state.timeline.pending_rows()).sum()
    }

    /// Returns the last low watermark emitted downstream.
    pub fn current_watermark(&self) -> Timestamp {
        self.tracker.emitted()
    }

    /// Returns the phase of a partition, or `None` if it is not held.
    pub fn partition_phase(&self, partition: &PK) -> Option<PartitionPhase> {
        self.partition(partition).map(|state| {
            if state.purge_candidate {
                PartitionPhase::Draining
            } else {
                PartitionPhase::Active
            }
        })
    }

    /// Returns the local clock of a partition.
    pub fn partition_time(&self, partition: &PK) -> Option<Timestamp> {
        self.partition(partition)
            .map(|state| state.timeline.curr_time())
    }

    /// Returns the left and right index statistics of a partition.
    pub fn partition_index_stats(&self, partition: &PK) -> Option<(IndexStats, IndexStats)> {
        self.partition(partition)
            .map(|state| (state.timeline.left_stats(), state.timeline.right_stats()))
    }

    /// Returns the number of output rows written, including unsent ones.
    pub fn rows_emitted(&self) -> u64 {
        self.emitter.writer.rows_emitted()
    }

    /// Returns the number of output batches handed downstream.
    pub fn batches_emitted(&self) -> u64 {
        self.emitter.writer.batches_emitted()
    }

    /// Returns the pool output batches are drawn from.
    pub fn pool(&self) -> &BatchPool<K, O> {
        self.emitter.writer.pool()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool().stats()
    }

    fn partition(&self, partition: &PK) -> Option<&PartitionState<PK, K, L, R>> {
        let slot = *self.lookup.get(partition)?;
        match self.partitions.get(slot) {
            Some(Some(state)) => Some(state),
            _ => invariant_violation(format_args!("mapped partition slot {} is empty", slot)),
        }
    }

    fn live(&self) -> impl Iterator<Item = &PartitionState<PK, K, L, R>> + '_ {
        self.partitions.iter().flatten()
    }
}

impl<PK, K, L, R, O> PartitionedEquiJoin<PK, K, L, R, O>
where
    PK: Hash + Eq + Clone + 'static,
    K: Clone + Eq + Default + 'static,
    L: Clone + 'static,
    R: Clone + 'static,
    O: Clone + Default + 'static,
{
    /// Captures the join state, including output not yet handed downstream.
    pub fn checkpoint(&self) -> PartitionedSnapshot<PK, K, L, R, O> {
        PartitionedSnapshot {
            partitions: self.partitions.clone(),
            free_slots: self.free_slots.clone(),
            purge_candidates: self.purge_candidates.clone(),
            tracker: self.tracker,
            left_completed: self.left_completed,
            right_completed: self.right_completed,
            writer: self.emitter.writer.checkpoint(),
        }
    }

    /// Rebuilds a partitioned join from a checkpoint. The key map is derived
    /// from the checkpointed partitions.
    pub fn restore<P, F, B>(
        config: JoinConfig,
        partition_of: P,
        selector: F,
        observer: B,
        snapshot: PartitionedSnapshot<PK, K, L, R, O>,
    ) -> Result<Self>
    where
        P: Fn(&K) -> PK + 'static,
        F: Fn(&L, &R) -> O + 'static,
        B: BatchObserver<K, O> + 'static,
    {
        config.validate()?;
        let mut lookup = HashMap::with_capacity(snapshot.partitions.len());
        for (slot, state) in snapshot.partitions.iter().enumerate() {
            let Some(state) = state else {
                continue;
            };
            if state.timeline.scheduler_kind() != config.scheduler_kind() {
                return Err(Error::invalid_config(alloc::format!(
                    "checkpoint uses the {:?} scheduler but the configuration calls for {:?}",
                    state.timeline.scheduler_kind(),
                    config.scheduler_kind()
                )));
            }
            if lookup.insert(state.key.clone(), slot).is_some() {
                return Err(Error::invalid_config(alloc::format!(
                    "checkpoint holds slot {} for a partition that is already mapped",
                    slot
                )));
            }
        }
        let writer = BatchWriter::restore(pool_for(&config), Box::new(observer), snapshot.writer);
        log::debug!(
            "partitioned equi-join restored with {} partitions",
            lookup.len()
        );
        Ok(Self {
            config,
            rules: rules_for(&config),
            partition_of: Box::new(partition_of),
            partitions: snapshot.partitions,
            free_slots: snapshot.free_slots,
            lookup,
            touched: Vec::new(),
            purge_candidates: snapshot.purge_candidates,
            tracker: snapshot.tracker,
            left_completed: snapshot.left_completed,
            right_completed: snapshot.right_completed,
            emitter: Emitter::new(writer, Box::new(selector)),
        })
    }
}

fn rules_for(config: &JoinConfig) -> Rules {
    Rules {
        mode: config.interval_mode(),
        probing: Probing::Deferred,
    }
}
