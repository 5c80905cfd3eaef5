//! Batch pooling.
//!
//! A `BatchPool` hands out empty batches of one fixed capacity and takes
//! consumed batches back, so column allocations are reused instead of being
//! rebuilt for every batch. The pool is a cheap cloneable handle shared by a
//! producer and its consumers on one thread.

use crate::batch::Batch;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;

/// Counters describing pool activity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Batches allocated because the pool was empty.
    pub allocated: usize,
    /// Batches served from the free list.
    pub reused: usize,
    /// Batches dropped on return because the pool was at its retention limit.
    pub discarded: usize,
}

struct PoolInner<K, P> {
    free: Vec<Batch<K, P>>,
    batch_capacity: usize,
    max_retained: usize,
    stats: PoolStats,
}

/// Shared pool of fixed-capacity batches.
pub struct BatchPool<K, P> {
    inner: Rc<RefCell<PoolInner<K, P>>>,
}

impl<K, P> Clone for BatchPool<K, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<K, P> BatchPool<K, P> {
    /// Creates a pool of batches holding `batch_capacity` rows that keeps at
    /// most `max_retained` idle batches.
    pub fn new(batch_capacity: usize, max_retained: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(PoolInner {
                free: Vec::new(),
                batch_capacity,
                max_retained,
                stats: PoolStats::default(),
            })),
        }
    }

    /// Returns the row capacity of batches served by this pool.
    pub fn batch_capacity(&self) -> usize {
        self.inner.borrow().batch_capacity
    }

    /// Takes an empty batch from the pool, allocating one if none is idle.
    pub fn get(&self) -> Batch<K, P> {
        let mut inner = self.inner.borrow_mut();
        match inner.free.pop() {
            Some(batch) => {
                inner.stats.reused += 1;
                batch
            }
            None => {
                inner.stats.allocated += 1;
                Batch::with_capacity(inner.batch_capacity)
            }
        }
    }

    /// Returns a consumed batch to the pool.
    ///
    /// Batches of a different capacity are dropped.
    pub fn recycle(&self, mut batch: Batch<K, P>) {
        let mut inner = self.inner.borrow_mut();
        if batch.capacity() != inner.batch_capacity || inner.free.len() >= inner.max_retained {
            inner.stats.discarded += 1;
            return;
        }
        batch.clear();
        inner.free.push(batch);
    }

    /// Returns the number of idle batches.
    pub fn available(&self) -> usize {
        self.inner.borrow().free.len()
    }

    /// Returns the pool counters.
    pub fn stats(&self) -> PoolStats {
        self.inner.borrow().stats
    }
}
