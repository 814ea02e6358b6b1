//! Address-to-shard routing.
//!
//! [`ShardRouter`] is the pure mapping `address[byte] % shards`. Every router
//! worker keeps its own [`ShardBuffers`], one pooled output batch per shard,
//! and hands a batch off as soon as it reaches the flush size. Buffers are
//! never shared between workers; only the downstream queues are.

use crate::address::Address;
use crate::pool::{BatchPool, Recycle};

// ============================================================================
//  ShardRouter
// ============================================================================

/// Deterministic address-to-shard mapping.
///
/// # Example
///
/// ```rust
/// use uniqip::Address;
/// use uniqip::router::ShardRouter;
///
/// let router = ShardRouter::new(3, 4);
/// assert_eq!(router.shard_of(Address::new(0, 0, 0, 6)), 2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardRouter {
    byte: usize,
    shards: usize,
}

impl ShardRouter {
    /// Route on component `byte` (0 is the leading one) over `shards` shards.
    ///
    /// # Panics
    ///
    /// Panics if `byte > 3` or `shards == 0`.
    #[must_use]
    pub fn new(byte: usize, shards: usize) -> Self {
        assert!(byte < 4, "route byte {byte} is not an address component");
        assert!(shards > 0, "cannot route over zero shards");
        Self { byte, shards }
    }

    /// Component position used for routing.
    #[must_use]
    pub const fn byte(&self) -> usize {
        self.byte
    }

    /// Number of shards.
    #[must_use]
    pub const fn shards(&self) -> usize {
        self.shards
    }

    /// Owning shard of `addr`.
    #[must_use]
    #[inline]
    pub fn shard_of(&self, addr: Address) -> usize {
        usize::from(addr.octet(self.byte)) % self.shards
    }

    /// Owning shard of a value of the routing component.
    #[must_use]
    #[inline]
    pub fn shard_of_component(&self, component: u8) -> usize {
        usize::from(component) % self.shards
    }
}

// ============================================================================
//  ShardBuffers
// ============================================================================

/// One worker's per-shard staging batches.
///
/// Empty batches are acquired from the pool lazily, on the first push for a
/// shard after a hand-off.
#[derive(Debug)]
pub struct ShardBuffers<'p, B> {
    pool: &'p BatchPool<B>,
    pending: Vec<Option<B>>,
    flush_at: usize,
}

impl<'p, B: Recycle> ShardBuffers<'p, B> {
    /// Staging for `shards` shards, handing batches off at `flush_at` items.
    ///
    /// `flush_at` is clamped to at least 1.
    #[must_use]
    pub fn new(pool: &'p BatchPool<B>, shards: usize, flush_at: usize) -> Self {
        Self {
            pool,
            pending: (0..shards).map(|_| None).collect(),
            flush_at: flush_at.max(1),
        }
    }

    /// Append one item to `shard`'s batch via `push`.
    ///
    /// Returns the batch if it reached the flush size; the caller sends it.
    #[inline]
    pub fn stage(&mut self, shard: usize, push: impl FnOnce(&mut B)) -> Option<B> {
        let pool = self.pool;
        let slot = &mut self.pending[shard];
        let batch = slot.get_or_insert_with(|| pool.acquire());
        push(batch);
        if batch.len() >= self.flush_at {
            slot.take()
        } else {
            None
        }
    }

    /// Every non-empty partial batch with its shard, leaving the staging empty.
    pub fn drain(&mut self) -> impl Iterator<Item = (usize, B)> + '_ {
        let pool = self.pool;
        self.pending
            .iter_mut()
            .enumerate()
            .filter_map(move |(shard, slot)| match slot.take() {
                Some(batch) if !batch.is_empty() => Some((shard, batch)),
                Some(empty) => {
                    pool.release(empty);
                    None
                }
                None => None,
            })
    }
}
