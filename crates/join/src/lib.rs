//! Tempora Join - Temporal interval equi-joins.
//!
//! This crate joins two streams of time intervals on key equality. Every
//! pair of same-key intervals that overlap produces one output row spanning
//! their intersection `[max(starts), min(ends))`. Intervals are half-open,
//! so touching intervals do not join.
//!
//! # Operators
//!
//! - `EquiJoin`: both inputs on one shared clock
//! - `PartitionedEquiJoin`: one clock per partition key, with global low
//!   watermarks driving progress and partition cleanup
//!
//! Both operators consume `Batch`es, advance incrementally as intervals
//! start and end, and write output batches drawn from a shared pool to a
//! `BatchObserver`. Punctuations are forwarded once per timeline, and low
//! watermarks are merged to the earlier of the two inputs.
//!
//! # Example
//!
//! ```rust
//! use tempora_core::{hash_key, Batch, BatchSink, Event};
//! use tempora_join::{JoinConfig, PartitionedEquiJoin};
//!
//! // Keys are (tenant, user) pairs partitioned by tenant.
//! let sink = BatchSink::new();
//! let mut join = PartitionedEquiJoin::new(
//!     JoinConfig::builder().fixed_durations(10, 10).build().unwrap(),
//!     |key: &(u32, u32)| key.0,
//!     |clicks: &u32, views: &u32| clicks + views,
//!     sink.clone(),
//! )
//! .unwrap();
//!
//! let key = (7, 42);
//! let h = hash_key(&key);
//! join.on_left_batch(Batch::from_events([Event::point(0, key, h, 1), Event::low_watermark(20)]).unwrap());
//! join.on_right_batch(Batch::from_events([Event::point(4, key, h, 2), Event::low_watermark(20)]).unwrap());
//! join.on_flush();
//!
//! let rows: Vec<_> = sink.events().into_iter().filter(|e| !e.is_control()).collect();
//! assert_eq!((rows[0].sync_time, rows[0].other_time, rows[0].payload), (4, 10, 3));
//! assert_eq!(join.current_watermark(), 20);
//! assert_eq!(join.live_partitions(), 0);
//! ```

#![no_std]

extern crate alloc;

pub mod config;
mod partitioned;
mod single;
mod timeline;
mod watermark;

pub use config::{
    IntervalMode, JoinConfig, JoinConfigBuilder, DEFAULT_BATCH_CAPACITY,
    DEFAULT_MAX_POOLED_BATCHES,
};
pub use partitioned::{PartitionPhase, PartitionedEquiJoin, PartitionedSnapshot};
pub use single::{EquiJoin, EquiJoinSnapshot};
pub use timeline::Selector;
pub use watermark::WatermarkTracker;
