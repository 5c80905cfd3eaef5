//! Endpoint scheduling.
//!
//! Once an interval becomes visible its end time is scheduled here, tagged
//! with the side and slot it lives in. When the clock reaches that time the
//! entry is drained and the interval removed from its index.
//!
//! Two strategies are provided:
//!
//! - `Ordered`: a binary min-heap keyed by end time. Entries with equal end
//!   times come out in insertion order.
//! - `Fifo`: a queue. Valid only when end times are inserted in
//!   non-decreasing order, which holds when both sides have the same fixed
//!   duration and starts are visited in time order.

use crate::active::SlotId;
use alloc::collections::{BinaryHeap, VecDeque};
use core::cmp::Ordering;
use tempora_core::{Side, Timestamp};

/// An interval scheduled for removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Endpoint {
    Left(SlotId),
    Right(SlotId),
}

impl Endpoint {
    /// Creates an endpoint for `slot` on `side`.
    #[inline]
    pub fn new(side: Side, slot: SlotId) -> Self {
        match side {
            Side::Left => Endpoint::Left(slot),
            Side::Right => Endpoint::Right(slot),
        }
    }

    /// Returns the side the interval lives on.
    #[inline]
    pub fn side(self) -> Side {
        match self {
            Endpoint::Left(_) => Side::Left,
            Endpoint::Right(_) => Side::Right,
        }
    }

    /// Returns the slot the interval occupies.
    #[inline]
    pub fn slot(self) -> SlotId {
        match self {
            Endpoint::Left(slot) | Endpoint::Right(slot) => slot,
        }
    }
}

/// Which scheduling strategy to use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SchedulerKind {
    Ordered,
    Fifo,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
struct HeapEntry {
    time: Timestamp,
    seq: u64,
    endpoint: Endpoint,
}

// Reversed so that `BinaryHeap` pops the earliest time, then the lowest seq.
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Heap-backed scheduler returning endpoints in end-time order.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OrderedEndpoints {
    heap: BinaryHeap<HeapEntry>,
    next_seq: u64,
}

impl OrderedEndpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, time: Timestamp, endpoint: Endpoint) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(HeapEntry {
            time,
            seq,
            endpoint,
        });
    }

    pub fn peek_time(&self) -> Option<Timestamp> {
        self.heap.peek().map(|entry| entry.time)
    }

    pub fn try_next_inclusive(&mut self, time: Timestamp) -> Option<(Timestamp, Endpoint)> {
        match self.heap.peek() {
            Some(entry) if entry.time <= time => {
                self.heap.pop().map(|entry| (entry.time, entry.endpoint))
            }
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Queue-backed scheduler for end times that arrive already sorted.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FifoEndpoints {
    queue: VecDeque<(Timestamp, Endpoint)>,
}

impl FifoEndpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, time: Timestamp, endpoint: Endpoint) {
        if let Some(&(last, _)) = self.queue.back() {
            if time < last {
                log::warn!(
                    "fifo endpoint scheduled out of order: {} after {}",
                    time,
                    last
                );
            }
        }
        self.queue.push_back((time, endpoint));
    }

    pub fn peek_time(&self) -> Option<Timestamp> {
        self.queue.front().map(|&(time, _)| time)
    }

    pub fn try_next_inclusive(&mut self, time: Timestamp) -> Option<(Timestamp, Endpoint)> {
        match self.queue.front() {
            Some(&(front, _)) if front <= time => self.queue.pop_front(),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Pending interval ends of one timeline.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EndpointScheduler {
    Ordered(OrderedEndpoints),
    Fifo(FifoEndpoints),
}

impl EndpointScheduler {
    /// Creates an empty scheduler of the given kind.
    pub fn new(kind: SchedulerKind) -> Self {
        match kind {
            SchedulerKind::Ordered => EndpointScheduler::Ordered(OrderedEndpoints::new()),
            SchedulerKind::Fifo => EndpointScheduler::Fifo(FifoEndpoints::new()),
        }
    }

    /// Returns the strategy in use.
    pub fn kind(&self) -> SchedulerKind {
        match self {
            EndpointScheduler::Ordered(_) => SchedulerKind::Ordered,
            EndpointScheduler::Fifo(_) => SchedulerKind::Fifo,
        }
    }

    /// Schedules `endpoint` to be drained once the clock reaches `time`.
    #[inline]
    pub fn insert(&mut self, time: Timestamp, endpoint: Endpoint) {
        match self {
            EndpointScheduler::Ordered(inner) => inner.insert(time, endpoint),
            EndpointScheduler::Fifo(inner) => inner.insert(time, endpoint),
        }
    }

    /// Pops the earliest entry if its time is at most `time`.
    #[inline]
    pub fn try_next_inclusive(&mut self, time: Timestamp) -> Option<(Timestamp, Endpoint)> {
        match self {
            EndpointScheduler::Ordered(inner) => inner.try_next_inclusive(time),
            EndpointScheduler::Fifo(inner) => inner.try_next_inclusive(time),
        }
    }

    /// Returns the earliest scheduled time.
    pub fn peek_time(&self) -> Option<Timestamp> {
        match self {
            EndpointScheduler::Ordered(inner) => inner.peek_time(),
            EndpointScheduler::Fifo(inner) => inner.peek_time(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            EndpointScheduler::Ordered(inner) => inner.len(),
            EndpointScheduler::Fifo(inner) => inner.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
