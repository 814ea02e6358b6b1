//! Lock-free free list of reusable batch buffers.
//!
//! Every pipeline stage hands batches downstream and the consuming stage
//! returns them here once drained, so steady-state runs allocate nothing.
//! Correctness never depends on pooling: when the pool is empty
//! [`BatchPool::acquire`] allocates, and when it is full
//! [`BatchPool::release`] drops the buffer.
//!
//! Pools are explicit objects passed to each stage, never globals, so each
//! run (and each test) gets its own.
//!
//! # Example
//!
//! ```rust
//! use uniqip::pool::BatchPool;
//! use uniqip::Address;
//!
//! let pool: BatchPool<Vec<Address>> = BatchPool::new(4, 128);
//!
//! let mut batch = pool.acquire();
//! batch.push(Address::new(1, 2, 3, 4));
//! pool.release(batch);
//!
//! let batch = pool.acquire();
//! assert!(batch.is_empty());
//! assert!(batch.capacity() >= 128);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_queue::ArrayQueue;

use crate::tracing_helpers::debug_log;

// ============================================================================
//  Recycle
// ============================================================================

/// A buffer that can be emptied in place and reused.
pub trait Recycle: Send {
    /// Allocate an empty buffer sized for `capacity` items.
    fn with_capacity(capacity: usize) -> Self;

    /// Drop the contents, keep the allocation.
    fn recycle(&mut self);

    /// Number of items currently held.
    fn len(&self) -> usize;

    /// Whether [`Recycle::len`] is zero.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Send> Recycle for Vec<T> {
    fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity(capacity)
    }

    fn recycle(&mut self) {
        self.clear();
    }

    fn len(&self) -> usize {
        Self::len(self)
    }
}

// ============================================================================
//  PoolMetrics
// ============================================================================

/// Pool activity counters.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    returns: AtomicU64,
    drops: AtomicU64,
}

impl PoolMetrics {
    /// Point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            returns: self.returns.load(Ordering::Relaxed),
            drops: self.drops.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`PoolMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSnapshot {
    /// `acquire` calls served from the free list.
    pub hits: u64,
    /// `acquire` calls that had to allocate.
    pub misses: u64,
    /// Buffers put back on the free list.
    pub returns: u64,
    /// Buffers dropped because the free list was full.
    pub drops: u64,
}

impl PoolSnapshot {
    /// Fraction of `acquire` calls served without allocating (1.0 when idle).
    #[must_use]
    #[expect(clippy::cast_precision_loss, reason = "ratio for display")]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            1.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// ============================================================================
//  BatchPool
// ============================================================================

/// Bounded lock-free free list of `T` buffers.
///
/// No ordering is promised between `release` and a later `acquire`.
#[derive(Debug)]
pub struct BatchPool<T> {
    queue: ArrayQueue<T>,
    batch_capacity: usize,
    metrics: PoolMetrics,
}

impl<T: Recycle> BatchPool<T> {
    /// Create an empty pool that retains at most `retain` idle buffers, each
    /// allocated for `batch_capacity` items.
    ///
    /// `retain` is clamped to at least 1.
    #[must_use]
    pub fn new(retain: usize, batch_capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(retain.max(1)),
            batch_capacity,
            metrics: PoolMetrics::default(),
        }
    }

    /// Take an empty buffer, recycled if one is idle.
    #[inline]
    pub fn acquire(&self) -> T {
        if let Some(buf) = self.queue.pop() {
            self.metrics.hits.fetch_add(1, Ordering::Relaxed);
            debug_assert!(buf.is_empty(), "pooled buffer was not emptied");
            buf
        } else {
            self.metrics.misses.fetch_add(1, Ordering::Relaxed);
            T::with_capacity(self.batch_capacity)
        }
    }

    /// Give a drained buffer back.
    ///
    /// The buffer is emptied here, so callers only need to have finished
    /// reading it.
    #[inline]
    pub fn release(&self, mut buf: T) {
        buf.recycle();
        match self.queue.push(buf) {
            Ok(()) => {
                self.metrics.returns.fetch_add(1, Ordering::Relaxed);
            }
            Err(_dropped) => {
                self.metrics.drops.fetch_add(1, Ordering::Relaxed);
                debug_log!(retained = self.queue.capacity(), "pool full, dropping buffer");
            }
        }
    }

    /// Item capacity of freshly allocated buffers.
    #[must_use]
    pub const fn batch_capacity(&self) -> usize {
        self.batch_capacity
    }

    /// Number of idle buffers.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.queue.len()
    }

    /// Activity counters.
    #[must_use]
    pub const fn metrics(&self) -> &PoolMetrics {
        &self.metrics
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Fail fast in tests")]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn _assert_send_sync()
    where
        BatchPool<Vec<u32>>: Send + Sync,
    {
    }

    #[test]
    fn test_acquire_on_empty_pool_allocates() {
        let pool: BatchPool<Vec<u32>> = BatchPool::new(2, 16);

        let buf = pool.acquire();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 16);
        assert_eq!(pool.metrics().snapshot().misses, 1);
    }

    #[test]
    fn test_release_clears_and_reuses() {
        let pool: BatchPool<Vec<u32>> = BatchPool::new(2, 16);

        let mut buf = pool.acquire();
        buf.extend([1, 2, 3]);
        let ptr = buf.as_ptr();
        pool.release(buf);
        assert_eq!(pool.idle(), 1);

        let buf = pool.acquire();
        assert!(buf.is_empty());
        assert_eq!(buf.as_ptr(), ptr);

        let snap = pool.metrics().snapshot();
        assert_eq!(snap.hits, 1);
        assert_eq!(snap.returns, 1);
    }

    #[test]
    fn test_release_into_full_pool_drops() {
        let pool: BatchPool<Vec<u32>> = BatchPool::new(1, 4);
        pool.release(Vec::new());
        assert_eq!(pool.idle(), 1);

        pool.release(Vec::new());

        assert_eq!(pool.idle(), 1);
        let snap = pool.metrics().snapshot();
        assert_eq!((snap.returns, snap.drops), (1, 1));
    }

    #[test]
    fn test_hit_rate() {
        let snap = PoolSnapshot {
            hits: 3,
            misses: 1,
            ..PoolSnapshot::default()
        };
        assert!((snap.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert!((PoolSnapshot::default().hit_rate() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_concurrent_acquire_release() {
        const THREADS: usize = 8;
        const ROUNDS: usize = 1_000;

        let pool = Arc::new(BatchPool::<Vec<usize>>::new(4, 8));

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for i in 0..ROUNDS {
                        let mut buf = pool.acquire();
                        assert!(buf.is_empty());
                        buf.push(t * ROUNDS + i);
                        pool.release(buf);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        let snap = pool.metrics().snapshot();
        assert_eq!(snap.hits + snap.misses, (THREADS * ROUNDS) as u64);
        assert_eq!(snap.returns + snap.drops, (THREADS * ROUNDS) as u64);
        assert!(pool.idle() <= 4);
    }
}
