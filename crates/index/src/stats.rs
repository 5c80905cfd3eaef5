//! Index statistics for Tempora.
//!
//! This module provides counters tracked by the active-interval index.

/// Statistics for an active-interval index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IndexStats {
    /// Total number of slots handed out by `insert` or `insert_invisible`.
    inserted: u64,
    /// Total number of slots released by `remove`.
    removed: u64,
    /// Largest number of simultaneously live entries.
    peak_live: usize,
    /// Number of invisible entries promoted to visible.
    promoted: u64,
}

impl IndexStats {
    /// Creates a new empty stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of insertions.
    pub fn inserted(&self) -> u64 {
        self.inserted
    }

    /// Returns the number of removals.
    pub fn removed(&self) -> u64 {
        self.removed
    }

    /// Returns the peak number of live entries.
    pub fn peak_live(&self) -> usize {
        self.peak_live
    }

    /// Returns the number of promotions from invisible to visible.
    pub fn promoted(&self) -> u64 {
        self.promoted
    }

    /// Records an insertion that brought the index to `live` entries.
    pub(crate) fn record_insert(&mut self, live: usize) {
        self.inserted += 1;
        if live > self.peak_live {
            self.peak_live = live;
        }
    }

    pub(crate) fn record_remove(&mut self) {
        self.removed += 1;
    }

    pub(crate) fn record_promote(&mut self) {
        self.promoted += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_counters() {
        let mut stats = IndexStats::new();
        stats.record_insert(1);
        stats.record_insert(2);
        stats.record_remove();
        stats.record_insert(2);
        stats.record_promote();

        assert_eq!(stats.inserted(), 3);
        assert_eq!(stats.removed(), 1);
        assert_eq!(stats.peak_live(), 2);
        assert_eq!(stats.promoted(), 1);
    }
}
