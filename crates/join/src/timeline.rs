//! The join core shared by both operators.
//!
//! A `Timeline` holds everything one independently clocked stream needs: the
//! active intervals of both sides, their pending ends, the rows queued on
//! each side and the clock. The single-timeline operator owns one; the
//! partitioned operator owns one per partition.
//!
//! Output is produced only when an interval becomes visible. It probes the
//! opposite side's visible intervals and emits one row per key match, clipped
//! to the intersection. Expiry only deletes state.

use crate::config::IntervalMode;
use alloc::boxed::Box;
use alloc::collections::VecDeque;
use core::cmp;
use tempora_core::{invariant_violation, BatchWriter, Event, RowKind, Timestamp, MIN_SYNC_TIME};
use tempora_index::{
    ActiveInterval, ActiveIntervalIndex, Endpoint, EndpointScheduler, IndexStats, SchedulerKind,
};

/// Combines a matched left and right payload into an output payload.
pub type Selector<L, R, O> = Box<dyn Fn(&L, &R) -> O>;

/// Output side of an operator: the batch writer and the payload selector.
pub(crate) struct Emitter<K, L, R, O> {
    pub(crate) writer: BatchWriter<K, O>,
    selector: Selector<L, R, O>,
}

impl<K: Clone, L, R, O> Emitter<K, L, R, O> {
    pub(crate) fn new(writer: BatchWriter<K, O>, selector: Selector<L, R, O>) -> Self {
        Self { writer, selector }
    }

    /// Emits the intersection of a matched pair, if it is not empty.
    #[inline]
    fn emit_match(
        &mut self,
        left: &ActiveInterval<K, L>,
        right: &ActiveInterval<K, R>,
        hash: i32,
    ) {
        let start = cmp::max(left.start, right.start);
        let end = cmp::min(left.end, right.end);
        if start < end {
            let payload = (self.selector)(&left.payload, &right.payload);
            self.writer
                .emit_interval(start, end, left.key.clone(), hash, payload);
        }
    }
}

/// When a newly arrived interval may be probed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Probing {
    /// Rows are merged in time order, so every interval is probed on arrival.
    Immediate,
    /// An interval that the opposite side might still tie with is held
    /// invisible until the clock leaves its start time.
    Deferred,
}

/// Per-operator rules a timeline is driven with.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Rules {
    pub(crate) mode: IntervalMode,
    pub(crate) probing: Probing,
}

/// Earliest time each side can still deliver a row at, when its queue is
/// empty.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Horizon {
    pub(crate) left: Timestamp,
    pub(crate) right: Timestamp,
}

/// How a drain pass ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Drained {
    /// Rows remain on one side that are later than the other side's horizon.
    Blocked,
    /// Both queues are empty. `clean` is true when no interval is held.
    Idle { clean: bool },
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub(crate) struct Timeline<K, L, R> {
    curr_time: Timestamp,
    next_left_time: Timestamp,
    next_right_time: Timestamp,
    last_punctuation: Timestamp,
    left: ActiveIntervalIndex<K, L>,
    right: ActiveIntervalIndex<K, R>,
    ends: EndpointScheduler,
    left_queue: VecDeque<Event<K, L>>,
    right_queue: VecDeque<Event<K, R>>,
}

impl<K, L, R> Timeline<K, L, R> {
    pub(crate) fn new(kind: SchedulerKind) -> Self {
        Self {
            curr_time: MIN_SYNC_TIME,
            next_left_time: MIN_SYNC_TIME,
            next_right_time: MIN_SYNC_TIME,
            last_punctuation: MIN_SYNC_TIME,
            left: ActiveIntervalIndex::new(),
            right: ActiveIntervalIndex::new(),
            ends: EndpointScheduler::new(kind),
            left_queue: VecDeque::new(),
            right_queue: VecDeque::new(),
        }
    }

    pub(crate) fn curr_time(&self) -> Timestamp {
        self.curr_time
    }

    pub(crate) fn push_left(&mut self, event: Event<K, L>) {
        self.left_queue.push_back(event);
    }

    pub(crate) fn push_right(&mut self, event: Event<K, R>) {
        self.right_queue.push_back(event);
    }

    /// Number of intervals held by both indices, visible or not.
    pub(crate) fn live_intervals(&self) -> usize {
        self.left.len() + self.right.len()
    }

    /// Number of rows queued on both sides.
    pub(crate) fn pending_rows(&self) -> usize {
        self.left_queue.len() + self.right_queue.len()
    }

    /// True when nothing is queued and no interval is held.
    pub(crate) fn is_clean(&self) -> bool {
        self.left_queue.is_empty()
            && self.right_queue.is_empty()
            && self.left.is_empty()
            && self.right.is_empty()
    }

    pub(crate) fn left_stats(&self) -> IndexStats {
        *self.left.stats()
    }

    pub(crate) fn right_stats(&self) -> IndexStats {
        *self.right.stats()
    }

    pub(crate) fn scheduled_ends(&self) -> usize {
        self.ends.len()
    }

    pub(crate) fn scheduler_kind(&self) -> SchedulerKind {
        self.ends.kind()
    }
}

impl<K: Clone + Eq, L, R> Timeline<K, L, R> {
    /// Moves the clock to `time` if it is later than the current time.
    ///
    /// Invisible intervals are promoted and probed before any end at or
    /// before `time` is expired.
    pub(crate) fn update_time<O>(&mut self, time: Timestamp, emitter: &mut Emitter<K, L, R, O>) {
        if time <= self.curr_time {
            return;
        }
        self.leave_time(emitter);
        self.reach_time(time);
        self.curr_time = time;
    }

    /// Processes queued rows in time order until a side runs dry and the
    /// other side's horizon stops progress.
    pub(crate) fn drain<O: Default>(
        &mut self,
        horizon: Horizon,
        rules: &Rules,
        emitter: &mut Emitter<K, L, R, O>,
    ) -> Drained {
        loop {
            let left_head = self.left_queue.front().map(|e| e.sync_time);
            let right_head = self.right_queue.front().map(|e| e.sync_time);
            match (left_head, right_head) {
                (Some(l), Some(r)) => {
                    self.next_left_time = l;
                    self.next_right_time = r;
                    // Ties go to the right side.
                    if l < r {
                        self.pop_left(rules, emitter);
                    } else {
                        self.pop_right(rules, emitter);
                    }
                }
                (Some(l), None) => {
                    self.next_left_time = l;
                    self.next_right_time = cmp::max(self.next_right_time, horizon.right);
                    if l > self.next_right_time {
                        let until = self.next_right_time;
                        self.update_time(until, emitter);
                        return Drained::Blocked;
                    }
                    self.pop_left(rules, emitter);
                }
                (None, Some(r)) => {
                    self.next_right_time = r;
                    self.next_left_time = cmp::max(self.next_left_time, horizon.left);
                    if r > self.next_left_time {
                        let until = self.next_left_time;
                        self.update_time(until, emitter);
                        return Drained::Blocked;
                    }
                    self.pop_right(rules, emitter);
                }
                (None, None) => {
                    self.next_left_time = cmp::max(self.next_left_time, horizon.left);
                    self.next_right_time = cmp::max(self.next_right_time, horizon.right);
                    let until = cmp::min(self.next_left_time, self.next_right_time);
                    self.update_time(until, emitter);
                    return Drained::Idle {
                        clean: self.left.is_empty() && self.right.is_empty(),
                    };
                }
            }
        }
    }

    fn pop_left<O: Default>(&mut self, rules: &Rules, emitter: &mut Emitter<K, L, R, O>) {
        let Some(event) = self.left_queue.pop_front() else {
            return;
        };
        match event.kind() {
            RowKind::Interval => {
                let start = event.sync_time;
                self.advance_for_row(start, emitter);
                let interval = ActiveInterval {
                    start,
                    end: rules.mode.left_end(start, event.other_time),
                    key: event.key,
                    payload: event.payload,
                };
                if rules.probing == Probing::Deferred && self.next_right_time <= start {
                    self.left.insert_invisible_interval(event.hash, interval);
                } else {
                    let slot = self.left.insert(event.hash);
                    probe_right(&self.right, &interval, event.hash, emitter);
                    self.ends.insert(interval.end, Endpoint::Left(slot));
                    self.left.populate(slot, interval);
                }
            }
            RowKind::Punctuation => self.punctuate(event.sync_time, event.key, emitter),
            RowKind::LowWatermark => {
                invariant_violation(format_args!("low watermark queued on the left side"))
            }
        }
    }

    fn pop_right<O: Default>(&mut self, rules: &Rules, emitter: &mut Emitter<K, L, R, O>) {
        let Some(event) = self.right_queue.pop_front() else {
            return;
        };
        match event.kind() {
            RowKind::Interval => {
                let start = event.sync_time;
                self.advance_for_row(start, emitter);
                let interval = ActiveInterval {
                    start,
                    end: rules.mode.right_end(start, event.other_time),
                    key: event.key,
                    payload: event.payload,
                };
                if rules.probing == Probing::Deferred && self.next_left_time <= start {
                    self.right.insert_invisible_interval(event.hash, interval);
                } else {
                    let slot = self.right.insert(event.hash);
                    probe_left(&self.left, &interval, event.hash, emitter);
                    self.ends.insert(interval.end, Endpoint::Right(slot));
                    self.right.populate(slot, interval);
                }
            }
            RowKind::Punctuation => self.punctuate(event.sync_time, event.key, emitter),
            RowKind::LowWatermark => {
                invariant_violation(format_args!("low watermark queued on the right side"))
            }
        }
    }

    fn advance_for_row<O>(&mut self, start: Timestamp, emitter: &mut Emitter<K, L, R, O>) {
        if start < self.curr_time {
            invariant_violation(format_args!(
                "clock moved backward from {} to {}",
                self.curr_time, start
            ));
        }
        self.update_time(start, emitter);
    }

    /// Advances to a punctuation and forwards it unless an equal or later
    /// one was already forwarded.
    fn punctuate<O: Default>(
        &mut self,
        time: Timestamp,
        key: K,
        emitter: &mut Emitter<K, L, R, O>,
    ) {
        self.update_time(time, emitter);
        if time > self.last_punctuation {
            self.last_punctuation = time;
            emitter.writer.emit_punctuation(time, key);
        }
    }

    /// Promotes every invisible interval, left side first. A promoted left
    /// interval sees only right intervals that were already visible, so a
    /// pair of promoted intervals is matched once, by the right one.
    fn leave_time<O>(&mut self, emitter: &mut Emitter<K, L, R, O>) {
        if self.left.invisible_len() > 0 {
            let pending = self.left.take_invisible();
            for &slot in &pending {
                self.left.make_visible(slot);
                let hash = self.left.hash_of(slot);
                let interval = self.left.interval(slot);
                probe_right(&self.right, interval, hash, emitter);
                self.ends.insert(interval.end, Endpoint::Left(slot));
            }
            self.left.recycle_invisible(pending);
        }
        if self.right.invisible_len() > 0 {
            let pending = self.right.take_invisible();
            for &slot in &pending {
                self.right.make_visible(slot);
                let hash = self.right.hash_of(slot);
                let interval = self.right.interval(slot);
                probe_left(&self.left, interval, hash, emitter);
                self.ends.insert(interval.end, Endpoint::Right(slot));
            }
            self.right.recycle_invisible(pending);
        }
    }

    /// Removes every interval whose end is at or before `time`.
    fn reach_time(&mut self, time: Timestamp) {
        let mut expired = 0usize;
        while let Some((_, endpoint)) = self.ends.try_next_inclusive(time) {
            match endpoint {
                Endpoint::Left(slot) => {
                    self.left.remove(slot);
                }
                Endpoint::Right(slot) => {
                    self.right.remove(slot);
                }
            }
            expired += 1;
        }
        if expired > 0 {
            log::trace!("expired {} intervals reaching {}", expired, time);
        }
    }
}

fn probe_right<K: Clone + Eq, L, R, O>(
    right: &ActiveIntervalIndex<K, R>,
    left: &ActiveInterval<K, L>,
    hash: i32,
    emitter: &mut Emitter<K, L, R, O>,
) {
    for (_, candidate) in right.find(hash) {
        if candidate.key == left.key {
            emitter.emit_match(left, candidate, hash);
        }
    }
}

fn probe_left<K: Clone + Eq, L, R, O>(
    left: &ActiveIntervalIndex<K, L>,
    right: &ActiveInterval<K, R>,
    hash: i32,
    emitter: &mut Emitter<K, L, R, O>,
) {
    for (_, candidate) in left.find(hash) {
        if candidate.key == right.key {
            emitter.emit_match(candidate, right, hash);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;
    use tempora_core::{BatchPool, BatchSink, INFINITY_SYNC_TIME};

    type Row = Event<u32, u32>;

    fn emitter() -> (Emitter<u32, u32, u32, u32>, BatchSink<u32, u32>) {
        let sink = BatchSink::new();
        let writer = BatchWriter::new(BatchPool::new(64, 2), Box::new(sink.clone()));
        let selector: Selector<u32, u32, u32> = Box::new(|l: &u32, r: &u32| l * 100 + r);
        (Emitter::new(writer, selector), sink)
    }

    fn rules(probing: Probing) -> Rules {
        Rules {
            mode: IntervalMode::Explicit,
            probing,
        }
    }

    const OPEN: Horizon = Horizon {
        left: INFINITY_SYNC_TIME,
        right: INFINITY_SYNC_TIME,
    };

    fn output(emitter: &mut Emitter<u32, u32, u32, u32>, sink: &BatchSink<u32, u32>) -> Vec<(i64, i64, u32, u32)> {
        emitter.writer.flush();
        sink.events()
            .into_iter()
            .filter(|e| !e.is_control())
            .map(|e| (e.sync_time, e.other_time, e.key, e.payload))
            .collect()
    }

    #[test]
    fn test_overlap_emits_intersection() {
        let (mut em, sink) = emitter();
        let mut tl: Timeline<u32, u32, u32> = Timeline::new(SchedulerKind::Ordered);
        tl.push_left(Row::interval(0, 10, 1, 1, 1));
        tl.push_right(Row::interval(5, 15, 1, 1, 2));

        let drained = tl.drain(OPEN, &rules(Probing::Immediate), &mut em);
        assert_eq!(drained, Drained::Idle { clean: true });
        assert_eq!(output(&mut em, &sink), vec![(5, 10, 1, 102)]);
        assert_eq!(tl.curr_time(), INFINITY_SYNC_TIME);
        assert_eq!(tl.live_intervals(), 0);
    }

    #[test]
    fn test_touching_intervals_do_not_join() {
        let (mut em, sink) = emitter();
        let mut tl: Timeline<u32, u32, u32> = Timeline::new(SchedulerKind::Ordered);
        tl.push_left(Row::interval(10, 20, 1, 1, 1));
        tl.push_right(Row::interval(20, 30, 1, 1, 2));
        tl.drain(OPEN, &rules(Probing::Immediate), &mut em);
        assert!(output(&mut em, &sink).is_empty());
    }

    #[test]
    fn test_hash_collision_checks_key() {
        let (mut em, sink) = emitter();
        let mut tl: Timeline<u32, u32, u32> = Timeline::new(SchedulerKind::Ordered);
        // Keys 1 and 2 share hash 9.
        tl.push_left(Row::interval(0, 10, 1, 9, 1));
        tl.push_left(Row::interval(0, 10, 2, 9, 2));
        tl.push_right(Row::interval(1, 5, 2, 9, 3));
        tl.drain(OPEN, &rules(Probing::Immediate), &mut em);
        assert_eq!(output(&mut em, &sink), vec![(1, 5, 2, 203)]);
    }

    #[test]
    fn test_blocked_on_missing_side() {
        let (mut em, sink) = emitter();
        let mut tl: Timeline<u32, u32, u32> = Timeline::new(SchedulerKind::Ordered);
        tl.push_left(Row::interval(5, 10, 1, 1, 1));
        let closed = Horizon {
            left: MIN_SYNC_TIME,
            right: 3,
        };
        assert_eq!(tl.drain(closed, &rules(Probing::Immediate), &mut em), Drained::Blocked);
        assert_eq!(tl.pending_rows(), 1);
        assert_eq!(tl.curr_time(), 3);

        let later = Horizon {
            left: MIN_SYNC_TIME,
            right: 7,
        };
        assert_eq!(tl.drain(later, &rules(Probing::Immediate), &mut em), Drained::Idle { clean: false });
        assert_eq!(tl.pending_rows(), 0);
        assert_eq!(tl.live_intervals(), 1);
        assert!(output(&mut em, &sink).is_empty());
    }

    #[test]
    fn test_deferred_interval_is_promoted_on_leave() {
        let (mut em, sink) = emitter();
        let mut tl: Timeline<u32, u32, u32> = Timeline::new(SchedulerKind::Ordered);
        tl.push_left(Row::interval(5, 10, 1, 1, 1));
        tl.push_right(Row::interval(5, 8, 1, 1, 2));
        let held = Horizon { left: 5, right: 5 };

        let drained = tl.drain(held, &rules(Probing::Deferred), &mut em);
        assert_eq!(drained, Drained::Idle { clean: false });
        // Both tie at 5, so both stay invisible.
        assert!(output(&mut em, &sink).is_empty());
        assert_eq!(tl.scheduled_ends(), 0);

        tl.update_time(6, &mut em);
        assert_eq!(output(&mut em, &sink), vec![(5, 8, 1, 102)]);
        assert_eq!(tl.scheduled_ends(), 2);
    }

    #[test]
    fn test_expiry_is_inclusive() {
        let (mut em, sink) = emitter();
        let mut tl: Timeline<u32, u32, u32> = Timeline::new(SchedulerKind::Ordered);
        tl.push_left(Row::interval(0, 10, 1, 1, 1));
        tl.drain(Horizon { left: 10, right: 10 }, &rules(Probing::Immediate), &mut em);
        assert_eq!(tl.live_intervals(), 0);
        assert_eq!(tl.left_stats().removed(), 1);

        tl.push_right(Row::interval(10, 11, 1, 1, 2));
        tl.drain(OPEN, &rules(Probing::Immediate), &mut em);
        assert!(output(&mut em, &sink).is_empty());
    }

    #[test]
    fn test_fixed_durations() {
        let (mut em, sink) = emitter();
        let mut tl: Timeline<u32, u32, u32> = Timeline::new(SchedulerKind::Fifo);
        let fixed = Rules {
            mode: IntervalMode::Fixed { left: 10, right: 10 },
            probing: Probing::Immediate,
        };
        tl.push_left(Row::point(0, 1, 1, 1));
        tl.push_right(Row::point(4, 1, 1, 2));
        tl.push_right(Row::point(12, 1, 1, 3));
        tl.drain(OPEN, &fixed, &mut em);
        assert_eq!(output(&mut em, &sink), vec![(4, 10, 1, 102)]);
    }

    #[test]
    fn test_punctuation_forwarded_once() {
        let (mut em, sink) = emitter();
        let mut tl: Timeline<u32, u32, u32> = Timeline::new(SchedulerKind::Ordered);
        tl.push_left(Row::punctuation(5, 0));
        tl.push_right(Row::punctuation(5, 0));
        tl.push_right(Row::punctuation(7, 0));
        tl.push_left(Row::punctuation(6, 0));
        tl.drain(OPEN, &rules(Probing::Immediate), &mut em);
        em.writer.flush();

        let forwarded: Vec<i64> = sink
            .events()
            .into_iter()
            .filter(|e| e.kind() == RowKind::Punctuation)
            .map(|e| e.sync_time)
            .collect();
        assert_eq!(forwarded, vec![5, 6, 7]);
    }

    #[test]
    #[should_panic(expected = "clock moved backward")]
    fn test_row_before_clock_panics() {
        let (mut em, _sink) = emitter();
        let mut tl: Timeline<u32, u32, u32> = Timeline::new(SchedulerKind::Ordered);
        tl.update_time(50, &mut em);
        tl.push_left(Row::interval(10, 20, 1, 1, 1));
        tl.drain(OPEN, &rules(Probing::Immediate), &mut em);
    }
}
