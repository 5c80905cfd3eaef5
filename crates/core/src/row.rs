//! Event rows.
//!
//! An `Event` is one row of a batch: an interval, a punctuation or a low
//! watermark, distinguished by its `other_time`.

use crate::time::{
    Timestamp, LOW_WATERMARK_OTHER_TIME, PUNCTUATION_OTHER_TIME,
};

/// Which input of a binary operator a row belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// Returns the other side.
    #[inline]
    pub fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// The kind of a row, derived from its `other_time`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowKind {
    /// A data row valid over `[sync_time, other_time)`.
    Interval,
    /// A progress marker scoped to one timeline or partition.
    Punctuation,
    /// No data earlier than `sync_time` will follow on this input.
    LowWatermark,
}

/// A single row of an event stream.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Event<K, P> {
    /// Start time of the row.
    pub sync_time: Timestamp,
    /// End time, or one of the control sentinels.
    pub other_time: Timestamp,
    /// Join key (in partitioned streams, the key also carries the partition).
    pub key: K,
    /// Hash of `key`, computed upstream.
    pub hash: i32,
    /// Row payload.
    pub payload: P,
}

impl<K, P> Event<K, P> {
    /// Creates an interval row `[start, end)`.
    #[inline]
    pub fn interval(start: Timestamp, end: Timestamp, key: K, hash: i32, payload: P) -> Self {
        Self {
            sync_time: start,
            other_time: end,
            key,
            hash,
            payload,
        }
    }

    /// Creates a point event `[time, time + 1)`.
    #[inline]
    pub fn point(time: Timestamp, key: K, hash: i32, payload: P) -> Self {
        Self::interval(time, time.saturating_add(1), key, hash, payload)
    }

    /// Returns the kind of this row.
    #[inline]
    pub fn kind(&self) -> RowKind {
        match self.other_time {
            PUNCTUATION_OTHER_TIME => RowKind::Punctuation,
            LOW_WATERMARK_OTHER_TIME => RowKind::LowWatermark,
            _ => RowKind::Interval,
        }
    }

    /// Returns true for punctuation and low-watermark rows.
    #[inline]
    pub fn is_control(&self) -> bool {
        !matches!(self.kind(), RowKind::Interval)
    }
}

impl<K: Default, P: Default> Event<K, P> {
    /// Creates a punctuation row for the timeline or partition `key` names.
    pub fn punctuation(time: Timestamp, key: K) -> Self {
        Self {
            sync_time: time,
            other_time: PUNCTUATION_OTHER_TIME,
            key,
            hash: 0,
            payload: P::default(),
        }
    }

    /// Creates a low-watermark row.
    pub fn low_watermark(time: Timestamp) -> Self {
        Self {
            sync_time: time,
            other_time: LOW_WATERMARK_OTHER_TIME,
            key: K::default(),
            hash: 0,
            payload: P::default(),
        }
    }
}
