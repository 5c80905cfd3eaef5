//! Tempora Index - Per-side state of a temporal interval join.
//!
//! This crate provides the two structures each join timeline keeps:
//!
//! - `ActiveIntervalIndex`: a hash multimap from key hash to the intervals
//!   currently open on one side, with slot reuse and an invisible list for
//!   entries that must not be probed yet
//! - `EndpointScheduler`: pending interval ends, drained as the clock
//!   advances, backed by a heap or a FIFO queue
//!
//! # Example
//!
//! ```rust
//! use tempora_index::{ActiveInterval, ActiveIntervalIndex, Endpoint, EndpointScheduler, SchedulerKind};
//!
//! let mut index: ActiveIntervalIndex<u32, &str> = ActiveIntervalIndex::new();
//! let slot = index.insert_interval(7, ActiveInterval { start: 0, end: 10, key: 1, payload: "a" });
//!
//! let mut ends = EndpointScheduler::new(SchedulerKind::Ordered);
//! ends.insert(10, Endpoint::Left(slot));
//!
//! assert_eq!(index.find(7).count(), 1);
//! assert!(ends.try_next_inclusive(9).is_none());
//! let (_, endpoint) = ends.try_next_inclusive(10).unwrap();
//! index.remove(endpoint.slot());
//! assert!(index.is_empty());
//! ```

#![no_std]

extern crate alloc;

pub mod active;
pub mod scheduler;
pub mod stats;

pub use active::{ActiveInterval, ActiveIntervalIndex, Candidates, SlotId};
pub use scheduler::{Endpoint, EndpointScheduler, FifoEndpoints, OrderedEndpoints, SchedulerKind};
pub use stats::IndexStats;
