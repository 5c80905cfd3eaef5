//! Tempora Core - Event rows, batches and output plumbing for Tempora.
//!
//! This crate provides the data model shared by the Tempora join operators:
//!
//! - `Timestamp` and the reserved `other_time` sentinels for punctuations and
//!   low watermarks
//! - `Event`: one row (interval, punctuation or low watermark)
//! - `Batch`: a fixed-capacity columnar batch with a control bit vector
//! - `BatchPool`: reuse of batch allocations
//! - `BatchWriter` / `BatchObserver`: accumulating output rows into sealed
//!   batches and handing them downstream
//! - `Error`: error types for batch building and configuration
//!
//! # Example
//!
//! ```rust
//! use tempora_core::{hash_key, Batch, RowKind};
//!
//! let mut batch: Batch<u64, &str> = Batch::with_capacity(4);
//! batch.push_interval(0, 10, 1, hash_key(&1u64), "a").unwrap();
//! batch.push_punctuation(5, 0).unwrap();
//!
//! assert_eq!(batch.len(), 2);
//! assert_eq!(batch.row_kind(1), RowKind::Punctuation);
//! assert!(batch.push_interval(3, 4, 1, 0, "late").is_err());
//! ```

#![no_std]

extern crate alloc;

pub mod batch;
mod error;
mod hash;
pub mod pool;
mod row;
pub mod time;
pub mod writer;

pub use batch::{Batch, BatchMeta, BatchRow, IntoEvents};
pub use error::{invariant_violation, Error, Result};
pub use hash::hash_key;
pub use pool::{BatchPool, PoolStats};
pub use row::{Event, RowKind, Side};
pub use time::{
    Timestamp, INFINITY_SYNC_TIME, LOW_WATERMARK_OTHER_TIME, MIN_SYNC_TIME,
    PUNCTUATION_OTHER_TIME,
};
pub use writer::{BatchObserver, BatchSink, BatchWriter, FnObserver, WriterSnapshot};
