//! Low-watermark merging.
//!
//! Each input reports its own low watermark. The output may only promise
//! what both inputs promise, so the joint watermark is the earlier of the
//! two, and it is forwarded downstream only when it moves forward.

use core::cmp;
use tempora_core::{Side, Timestamp, MIN_SYNC_TIME};

/// Tracks the latest low watermark of each input and the last one emitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WatermarkTracker {
    left: Timestamp,
    right: Timestamp,
    emitted: Timestamp,
}

impl Default for WatermarkTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl WatermarkTracker {
    pub fn new() -> Self {
        Self {
            left: MIN_SYNC_TIME,
            right: MIN_SYNC_TIME,
            emitted: MIN_SYNC_TIME,
        }
    }

    /// Records a watermark from `side`. Returns true if that side moved.
    pub fn observe(&mut self, side: Side, time: Timestamp) -> bool {
        let slot = match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        };
        if time > *slot {
            *slot = time;
            true
        } else {
            false
        }
    }

    /// Returns the latest watermark seen on `side`.
    pub fn side(&self, side: Side) -> Timestamp {
        match side {
            Side::Left => self.left,
            Side::Right => self.right,
        }
    }

    /// Returns the earlier of the two input watermarks.
    pub fn joint(&self) -> Timestamp {
        cmp::min(self.left, self.right)
    }

    /// Returns the last watermark handed downstream.
    pub fn emitted(&self) -> Timestamp {
        self.emitted
    }

    /// Returns the joint watermark if it is later than the last one emitted,
    /// and records it as emitted.
    pub fn take_advance(&mut self) -> Option<Timestamp> {
        let joint = self.joint();
        if joint > self.emitted {
            self.emitted = joint;
            Some(joint)
        } else {
            None
        }
    }
}
