//! Active-interval index.
//!
//! A hash multimap from key hash to the intervals currently open on one side
//! of a join. Entries live in an arena of slots addressed by `SlotId`.
//! Removed slots become tombstones chained into a free list and are reused by
//! later insertions. Visible entries sharing a hash are linked into a doubly
//! linked bucket chain whose head is kept in a `hash -> slot` map.
//!
//! Invisible entries are stored but not linked into any chain, so `find`
//! never returns them until they are promoted with `make_visible`.
//!
//! `find` matches on hash only. Callers compare keys themselves, since
//! distinct keys may share a hash.

use crate::stats::IndexStats;
use alloc::vec::Vec;
use hashbrown::HashMap;
use tempora_core::{invariant_violation, Timestamp};

/// Handle of a slot in an index arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlotId(u32);

impl SlotId {
    /// Returns the arena position of this slot.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// An interval held open by the index.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ActiveInterval<K, P> {
    pub start: Timestamp,
    pub end: Timestamp,
    pub key: K,
    pub payload: P,
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
enum SlotState<K, P> {
    /// Tombstone, chained to the next free slot.
    Free { next_free: Option<u32> },
    /// Handed out by `insert`, waiting for `populate`.
    Reserved { visible: bool },
    Occupied {
        interval: ActiveInterval<K, P>,
        visible: bool,
    },
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
struct Slot<K, P> {
    hash: i32,
    prev: Option<u32>,
    next: Option<u32>,
    state: SlotState<K, P>,
}

impl<K, P> Slot<K, P> {
    fn is_visible(&self) -> bool {
        matches!(
            self.state,
            SlotState::Reserved { visible: true } | SlotState::Occupied { visible: true, .. }
        )
    }
}

/// Hash multimap of the currently open intervals of one join side.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ActiveIntervalIndex<K, P> {
    slots: Vec<Slot<K, P>>,
    free_head: Option<u32>,
    /// Head of the visible chain for each hash.
    buckets: HashMap<i32, u32>,
    /// Invisible entries in insertion order.
    invisible: Vec<SlotId>,
    live: usize,
    stats: IndexStats,
}

impl<K, P> Default for ActiveIntervalIndex<K, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, P> ActiveIntervalIndex<K, P> {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            buckets: HashMap::new(),
            invisible: Vec::new(),
            live: 0,
            stats: IndexStats::new(),
        }
    }

    /// Returns the number of live entries, visible and invisible.
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns true if no entry is live.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Returns the number of invisible entries.
    #[inline]
    pub fn invisible_len(&self) -> usize {
        self.invisible.len()
    }

    /// Returns the number of arena slots, including tombstones.
    #[inline]
    pub fn slot_capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the statistics for this index.
    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }

    /// Reserves a visible slot for `hash`. The slot must be populated before
    /// it can be returned by `find`.
    pub fn insert(&mut self, hash: i32) -> SlotId {
        let id = self.allocate(hash, SlotState::Reserved { visible: true });
        self.link(id);
        SlotId(id)
    }

    /// Reserves an invisible slot for `hash`.
    pub fn insert_invisible(&mut self, hash: i32) -> SlotId {
        let id = self.allocate(hash, SlotState::Reserved { visible: false });
        self.invisible.push(SlotId(id));
        SlotId(id)
    }

    /// Fills a reserved slot.
    pub fn populate(&mut self, slot: SlotId, interval: ActiveInterval<K, P>) {
        let entry = self.slot_mut(slot);
        let visible = match entry.state {
            SlotState::Reserved { visible } => visible,
            _ => invariant_violation(format_args!("populate of unreserved slot {:?}", slot)),
        };
        entry.state = SlotState::Occupied { interval, visible };
    }

    /// Inserts and populates a visible entry.
    pub fn insert_interval(&mut self, hash: i32, interval: ActiveInterval<K, P>) -> SlotId {
        let slot = self.insert(hash);
        self.populate(slot, interval);
        slot
    }

    /// Inserts and populates an invisible entry.
    pub fn insert_invisible_interval(
        &mut self,
        hash: i32,
        interval: ActiveInterval<K, P>,
    ) -> SlotId {
        let slot = self.insert_invisible(hash);
        self.populate(slot, interval);
        slot
    }

    /// Returns the visible populated entries whose hash equals `hash`.
    pub fn find(&self, hash: i32) -> Candidates<'_, K, P> {
        Candidates {
            index: self,
            hash,
            cursor: self.buckets.get(&hash).copied(),
        }
    }

    /// Returns the populated interval in `slot`, if any.
    pub fn get(&self, slot: SlotId) -> Option<&ActiveInterval<K, P>> {
        match &self.slots.get(slot.index())?.state {
            SlotState::Occupied { interval, .. } => Some(interval),
            _ => None,
        }
    }

    /// Returns the populated interval in `slot`.
    ///
    /// Panics through `invariant_violation` if the slot is not populated.
    pub fn interval(&self, slot: SlotId) -> &ActiveInterval<K, P> {
        match self.get(slot) {
            Some(interval) => interval,
            None => invariant_violation(format_args!("slot {:?} is not populated", slot)),
        }
    }

    /// Returns the hash stored in `slot`.
    pub fn hash_of(&self, slot: SlotId) -> i32 {
        self.slot_ref(slot).hash
    }

    /// Returns true if `slot` holds a visible entry.
    pub fn is_visible(&self, slot: SlotId) -> bool {
        self.slots
            .get(slot.index())
            .map(|entry| entry.is_visible())
            .unwrap_or(false)
    }

    /// Removes the entry in `slot` and returns its interval.
    ///
    /// Removing a free slot is an internal consistency failure.
    pub fn remove(&mut self, slot: SlotId) -> Option<ActiveInterval<K, P>> {
        let id = slot.0;
        let (visible, interval) = match &self.slot_ref(slot).state {
            SlotState::Free { .. } => {
                invariant_violation(format_args!("slot {:?} freed twice", slot))
            }
            SlotState::Reserved { visible } => (*visible, None),
            SlotState::Occupied { visible, .. } => (*visible, Some(())),
        };
        if visible {
            self.unlink(id);
        } else {
            self.invisible.retain(|&s| s != slot);
        }
        let next_free = self.free_head;
        let state = core::mem::replace(
            &mut self.slots[id as usize].state,
            SlotState::Free { next_free },
        );
        self.free_head = Some(id);
        self.live -= 1;
        self.stats.record_remove();
        match (interval, state) {
            (Some(()), SlotState::Occupied { interval, .. }) => Some(interval),
            _ => None,
        }
    }

    /// Takes the list of invisible slots in insertion order.
    ///
    /// The entries stay invisible until `make_visible` is called on each.
    /// Hand the emptied buffer back with `recycle_invisible` to keep its
    /// allocation.
    pub fn take_invisible(&mut self) -> Vec<SlotId> {
        core::mem::take(&mut self.invisible)
    }

    /// Returns a buffer obtained from `take_invisible`.
    pub fn recycle_invisible(&mut self, mut buffer: Vec<SlotId>) {
        if self.invisible.is_empty() {
            buffer.clear();
            self.invisible = buffer;
        }
    }

    /// Promotes an invisible populated entry to visible.
    pub fn make_visible(&mut self, slot: SlotId) {
        let entry = self.slot_mut(slot);
        match &mut entry.state {
            SlotState::Occupied { visible, .. } if !*visible => *visible = true,
            _ => invariant_violation(format_args!("slot {:?} is not an invisible entry", slot)),
        }
        self.link(slot.0);
        self.stats.record_promote();
    }

    /// Iterates over the invisible entries as `(slot, hash)` pairs.
    pub fn invisible_slots(&self) -> impl Iterator<Item = (SlotId, i32)> + '_ {
        self.invisible
            .iter()
            .map(move |&slot| (slot, self.slots[slot.index()].hash))
    }

    /// Iterates over every populated entry, visible or not.
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &ActiveInterval<K, P>)> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, entry)| match &entry.state {
            SlotState::Occupied { interval, .. } => Some((SlotId(i as u32), interval)),
            _ => None,
        })
    }

    fn allocate(&mut self, hash: i32, state: SlotState<K, P>) -> u32 {
        let id = match self.free_head {
            Some(id) => {
                let entry = &mut self.slots[id as usize];
                self.free_head = match entry.state {
                    SlotState::Free { next_free } => next_free,
                    _ => invariant_violation(format_args!("free list points at live slot {}", id)),
                };
                entry.hash = hash;
                entry.prev = None;
                entry.next = None;
                entry.state = state;
                id
            }
            None => {
                let id = match u32::try_from(self.slots.len()) {
                    Ok(id) => id,
                    Err(_) => invariant_violation(format_args!("index arena exhausted")),
                };
                self.slots.push(Slot {
                    hash,
                    prev: None,
                    next: None,
                    state,
                });
                id
            }
        };
        self.live += 1;
        self.stats.record_insert(self.live);
        id
    }

    fn link(&mut self, id: u32) {
        let hash = self.slots[id as usize].hash;
        let old_head = self.buckets.insert(hash, id);
        let entry = &mut self.slots[id as usize];
        entry.prev = None;
        entry.next = old_head;
        if let Some(head) = old_head {
            self.slots[head as usize].prev = Some(id);
        }
    }

    fn unlink(&mut self, id: u32) {
        let (hash, prev, next) = {
            let entry = &self.slots[id as usize];
            (entry.hash, entry.prev, entry.next)
        };
        match prev {
            Some(prev) => self.slots[prev as usize].next = next,
            None => match next {
                Some(next) => {
                    self.buckets.insert(hash, next);
                }
                None => {
                    self.buckets.remove(&hash);
                }
            },
        }
        if let Some(next) = next {
            self.slots[next as usize].prev = prev;
        }
        let entry = &mut self.slots[id as usize];
        entry.prev = None;
        entry.next = None;
    }

    fn slot_ref(&self, slot: SlotId) -> &Slot<K, P> {
        match self.slots.get(slot.index()) {
            Some(entry) => entry,
            None => invariant_violation(format_args!("slot {:?} out of range", slot)),
        }
    }

    fn slot_mut(&mut self, slot: SlotId) -> &mut Slot<K, P> {
        match self.slots.get_mut(slot.index()) {
            Some(entry) => entry,
            None => invariant_violation(format_args!("slot {:?} out of range", slot)),
        }
    }
}

/// Iterator over the visible entries of one hash bucket.
pub struct Candidates<'a, K, P> {
    index: &'a ActiveIntervalIndex<K, P>,
    hash: i32,
    cursor: Option<u32>,
}

impl<'a, K, P> Iterator for Candidates<'a, K, P> {
    type Item = (SlotId, &'a ActiveInterval<K, P>);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.cursor {
            let entry = &self.index.slots[id as usize];
            self.cursor = entry.next;
            if entry.hash != self.hash {
                continue;
            }
            if let SlotState::Occupied {
                interval,
                visible: true,
            } = &entry.state
            {
                return Some((SlotId(id), interval));
            }
        }
        None
    }
}
