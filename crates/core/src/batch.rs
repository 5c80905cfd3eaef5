//! Columnar event batches.
//!
//! A `Batch` stores rows column by column with a fixed capacity and a
//! side-band bit vector that marks control rows. Batches are filled by the
//! producer, sealed, and handed downstream read-only.

use crate::error::{Error, Result};
use crate::row::{Event, RowKind};
use crate::time::{
    is_control_time, Timestamp, LOW_WATERMARK_OTHER_TIME, MIN_SYNC_TIME,
    PUNCTUATION_OTHER_TIME,
};
use alloc::vec;
use alloc::vec::Vec;
use bitvec::vec::BitVec;

/// Metadata stamped on a batch when it is sealed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BatchMeta {
    /// Position of the batch in its producer's output sequence.
    pub sequence: u64,
    /// Sync time of the first row.
    pub first_sync: Timestamp,
    /// Sync time of the last row.
    pub last_sync: Timestamp,
    /// Number of control rows.
    pub control_rows: usize,
}

/// A fixed-capacity columnar batch of rows.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Batch<K, P> {
    sync_times: Vec<Timestamp>,
    other_times: Vec<Timestamp>,
    keys: Vec<K>,
    hashes: Vec<i32>,
    payloads: Vec<P>,
    /// Set bits mark punctuation and low-watermark rows.
    control: BitVec,
    capacity: usize,
    sealed: bool,
    meta: BatchMeta,
}

impl<K, P> Batch<K, P> {
    /// Creates an empty batch able to hold `capacity` rows.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sync_times: Vec::with_capacity(capacity),
            other_times: Vec::with_capacity(capacity),
            keys: Vec::with_capacity(capacity),
            hashes: Vec::with_capacity(capacity),
            payloads: Vec::with_capacity(capacity),
            control: BitVec::with_capacity(capacity),
            capacity,
            sealed: false,
            meta: BatchMeta::default(),
        }
    }

    /// Returns the number of rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.sync_times.len()
    }

    /// Returns true if the batch holds no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sync_times.is_empty()
    }

    /// Returns the fixed row capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns true if no more rows fit.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Returns true once the batch has been sealed.
    #[inline]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Returns the metadata stamped at sealing time.
    #[inline]
    pub fn meta(&self) -> &BatchMeta {
        &self.meta
    }

    #[inline]
    pub fn sync_time(&self, index: usize) -> Timestamp {
        self.sync_times[index]
    }

    #[inline]
    pub fn other_time(&self, index: usize) -> Timestamp {
        self.other_times[index]
    }

    #[inline]
    pub fn key(&self, index: usize) -> &K {
        &self.keys[index]
    }

    #[inline]
    pub fn hash(&self, index: usize) -> i32 {
        self.hashes[index]
    }

    #[inline]
    pub fn payload(&self, index: usize) -> &P {
        &self.payloads[index]
    }

    /// Returns true if row `index` is a control row.
    #[inline]
    pub fn is_control(&self, index: usize) -> bool {
        self.control.get(index).map(|bit| *bit).unwrap_or(false)
    }

    /// Returns the kind of row `index`.
    pub fn row_kind(&self, index: usize) -> RowKind {
        if !self.is_control(index) {
            return RowKind::Interval;
        }
        if self.other_times[index] == PUNCTUATION_OTHER_TIME {
            RowKind::Punctuation
        } else {
            RowKind::LowWatermark
        }
    }

    /// Returns the number of control rows.
    pub fn control_count(&self) -> usize {
        self.control.count_ones()
    }

    /// Returns the sync times column.
    #[inline]
    pub fn sync_times(&self) -> &[Timestamp] {
        &self.sync_times
    }

    /// Returns the other times column.
    #[inline]
    pub fn other_times(&self) -> &[Timestamp] {
        &self.other_times
    }

    /// Appends an interval row `[sync_time, other_time)`.
    pub fn push_interval(
        &mut self,
        sync_time: Timestamp,
        other_time: Timestamp,
        key: K,
        hash: i32,
        payload: P,
    ) -> Result<()> {
        if other_time <= sync_time || is_control_time(other_time) {
            return Err(Error::invalid_interval(sync_time, other_time));
        }
        self.check_push(sync_time)?;
        self.append(sync_time, other_time, key, hash, payload, false);
        Ok(())
    }

    /// Appends an event, routing control rows to the control column.
    pub fn push_event(&mut self, event: Event<K, P>) -> Result<()> {
        match event.kind() {
            RowKind::Interval => self.push_interval(
                event.sync_time,
                event.other_time,
                event.key,
                event.hash,
                event.payload,
            ),
            RowKind::Punctuation | RowKind::LowWatermark => {
                self.check_push(event.sync_time)?;
                self.append(
                    event.sync_time,
                    event.other_time,
                    event.key,
                    event.hash,
                    event.payload,
                    true,
                );
                Ok(())
            }
        }
    }

    /// Seals the batch. A sealed batch rejects further rows.
    pub fn seal(&mut self, sequence: u64) {
        self.meta = BatchMeta {
            sequence,
            first_sync: self.sync_times.first().copied().unwrap_or(MIN_SYNC_TIME),
            last_sync: self.sync_times.last().copied().unwrap_or(MIN_SYNC_TIME),
            control_rows: self.control_count(),
        };
        self.sealed = true;
    }

    /// Removes every row and unseals the batch, keeping its allocations.
    pub fn clear(&mut self) {
        self.sync_times.clear();
        self.other_times.clear();
        self.keys.clear();
        self.hashes.clear();
        self.payloads.clear();
        self.control.clear();
        self.sealed = false;
        self.meta = BatchMeta::default();
    }

    /// Returns an iterator over the rows, borrowing the columns.
    pub fn iter(&self) -> impl Iterator<Item = BatchRow<'_, K, P>> + '_ {
        (0..self.len()).map(move |i| BatchRow {
            sync_time: self.sync_times[i],
            other_time: self.other_times[i],
            key: &self.keys[i],
            hash: self.hashes[i],
            payload: &self.payloads[i],
        })
    }

    /// Consumes the batch, yielding owned rows.
    pub fn into_events(self) -> IntoEvents<K, P> {
        IntoEvents {
            sync_times: self.sync_times.into_iter(),
            other_times: self.other_times.into_iter(),
            keys: self.keys.into_iter(),
            hashes: self.hashes.into_iter(),
            payloads: self.payloads.into_iter(),
        }
    }

    fn check_push(&self, sync_time: Timestamp) -> Result<()> {
        if self.sealed {
            return Err(Error::BatchSealed);
        }
        if self.is_full() {
            return Err(Error::batch_full(self.capacity));
        }
        if let Some(&previous) = self.sync_times.last() {
            if sync_time < previous {
                return Err(Error::out_of_order(previous, sync_time));
            }
        }
        Ok(())
    }

    /// Appends without validation. Callers inside the crate guarantee
    /// capacity, ordering and the control flag.
    #[inline]
    pub(crate) fn append(
        &mut self,
        sync_time: Timestamp,
        other_time: Timestamp,
        key: K,
        hash: i32,
        payload: P,
        control: bool,
    ) {
        self.sync_times.push(sync_time);
        self.other_times.push(other_time);
        self.keys.push(key);
        self.hashes.push(hash);
        self.payloads.push(payload);
        self.control.push(control);
    }
}

impl<K: Default, P: Default> Batch<K, P> {
    /// Appends a punctuation row.
    pub fn push_punctuation(&mut self, time: Timestamp, key: K) -> Result<()> {
        self.push_event(Event::punctuation(time, key))
    }

    /// Appends a low-watermark row.
    pub fn push_low_watermark(&mut self, time: Timestamp) -> Result<()> {
        self.check_push(time)?;
        self.append(
            time,
            LOW_WATERMARK_OTHER_TIME,
            K::default(),
            0,
            P::default(),
            true,
        );
        Ok(())
    }
}

impl<K: Clone, P: Clone> Batch<K, P> {
    /// Builds a batch from events, using the event count as capacity.
    pub fn from_events(events: impl IntoIterator<Item = Event<K, P>>) -> Result<Self> {
        let events: Vec<Event<K, P>> = events.into_iter().collect();
        let mut batch = Self::with_capacity(events.len().max(1));
        for event in events {
            batch.push_event(event)?;
        }
        Ok(batch)
    }

    /// Collects owned copies of the rows.
    pub fn to_events(&self) -> Vec<Event<K, P>> {
        self.iter().map(|row| row.to_event()).collect()
    }
}

impl<K, P> Default for Batch<K, P> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

/// A borrowed view of one batch row.
#[derive(Clone, Copy, Debug)]
pub struct BatchRow<'a, K, P> {
    pub sync_time: Timestamp,
    pub other_time: Timestamp,
    pub key: &'a K,
    pub hash: i32,
    pub payload: &'a P,
}

impl<'a, K: Clone, P: Clone> BatchRow<'a, K, P> {
    /// Copies the row into an owned event.
    pub fn to_event(&self) -> Event<K, P> {
        Event {
            sync_time: self.sync_time,
            other_time: self.other_time,
            key: self.key.clone(),
            hash: self.hash,
            payload: self.payload.clone(),
        }
    }
}

/// Owning iterator produced by [`Batch::into_events`].
pub struct IntoEvents<K, P> {
    sync_times: vec::IntoIter<Timestamp>,
    other_times: vec::IntoIter<Timestamp>,
    keys: vec::IntoIter<K>,
    hashes: vec::IntoIter<i32>,
    payloads: vec::IntoIter<P>,
}

impl<K, P> Iterator for IntoEvents<K, P> {
    type Item = Event<K, P>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(Event {
            sync_time: self.sync_times.next()?,
            other_time: self.other_times.next()?,
            key: self.keys.next()?,
            hash: self.hashes.next()?,
            payload: self.payloads.next()?,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.sync_times.size_hint()
    }
}
