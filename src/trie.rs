//! Four-level radix bitmap store.
//!
//! An address `b0.b1.b2.b3` is recorded by descending
//! `root[b0] → L3[b1] → L2[b2]` and setting bit `b3` in the [`Bitmap`] leaf.
//! Nodes are created on first touch (or eagerly, see [`SlotOwnership`]) and
//! are never removed or replaced, so the structure only grows. The distinct
//! count is the population count over every leaf.
//!
//! # Node creation strategies
//!
//! | Trie | Child creation | Bit set | Safe because |
//! |------|----------------|---------|--------------|
//! | [`OwnedTrie`] | `&mut self` | `&mut self` | one owner per trie |
//! | [`LockedTrie`] | read check, upgrade, re-check, create | per-leaf mutex | double-checked locking |
//! | [`OptimisticTrie`] | unsynchronized | unsynchronized | caller owns the top-level slot (`unsafe`) |
//!
//! All three convert into an [`OwnedTrie`], which is the form used for
//! [`Merge`] and full-structure [`CountBits`] verification.

use std::thread;

mod bitmap;
mod locked;
mod optimistic;
mod owned;


pub use bitmap::Bitmap;
pub use locked::{LockedLeaf, LockedNode, LockedTrie};
pub use optimistic::{OptimisticTrie, ShardHandle};
pub use owned::{OwnedNode, OwnedTrie};

/// Children per interior node.
pub const FANOUT: usize = 256;

// ============================================================================
//  Level capabilities
// ============================================================================

/// Population count of a subtree.
pub trait CountBits {
    /// Number of set leaf bits reachable from `self`.
    fn count_bits(&self) -> u64;
}

/// In-place union with an independently built subtree.
///
/// Absent children are taken from `other` wholesale; shared children recurse;
/// leaves OR their words. The result is idempotent and order-independent.
pub trait Merge {
    /// Fold `other` into `self`.
    fn merge(&mut self, other: Self);
}

/// Conversion of a concurrent level into its single-owner form.
pub trait IntoOwned {
    /// The single-owner level with the same content.
    type Owned;

    /// Consume `self`; no other thread can hold a reference any more.
    fn into_owned(self) -> Self::Owned;
}

// ============================================================================
//  SlotOwnership
// ============================================================================

/// The top-level slots owned by one shard: `slot % shards == shard`.
///
/// Two ownerships with the same `shards` and different `shard` are disjoint,
/// and all `shards` of them cover every slot exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotOwnership {
    shard: usize,
    shards: usize,
}

impl SlotOwnership {
    /// Every slot.
    pub const ALL: Self = Self {
        shard: 0,
        shards: 1,
    };

    /// Ownership of `shard` out of `shards`.
    ///
    /// # Panics
    ///
    /// Panics unless `shard < shards <= 256`.
    #[must_use]
    pub fn new(shard: usize, shards: usize) -> Self {
        assert!(
            shard < shards && shards <= FANOUT,
            "shard {shard} out of {shards} is not a valid slot partition"
        );
        Self { shard, shards }
    }

    /// Shard index.
    #[must_use]
    pub const fn shard(&self) -> usize {
        self.shard
    }

    /// Shard count.
    #[must_use]
    pub const fn shards(&self) -> usize {
        self.shards
    }

    /// Whether top-level slot `slot` belongs to this shard.
    #[must_use]
    #[inline]
    pub fn owns(&self, slot: u8) -> bool {
        usize::from(slot) % self.shards == self.shard
    }

    /// Owned slots in ascending order.
    pub fn slots(self) -> impl Iterator<Item = u8> {
        (0..=u8::MAX).filter(move |&slot| self.owns(slot))
    }
}

// ============================================================================
//  Eager population
// ============================================================================

/// Build eagerly populated third-level children for every slot in
/// `ownership`, spread over `workers` short-lived threads.
///
/// Worker `w` builds the owned slots at positions `w, w + workers, ...`, so no
/// two workers touch the same slot.
pub(crate) fn build_parallel<C, F>(
    ownership: SlotOwnership,
    workers: usize,
    build: F,
) -> Vec<(u8, Box<C>)>
where
    C: Send,
    F: Fn() -> Box<C> + Sync,
{
    let slots: Vec<u8> = ownership.slots().collect();
    let workers = workers.clamp(1, slots.len().max(1));
    let build = &build;
    let slots = &slots;

    thread::scope(|s| {
        let handles: Vec<_> = (0..workers)
            .map(|w| {
                s.spawn(move || {
                    slots
                        .iter()
                        .skip(w)
                        .step_by(workers)
                        .map(|&slot| (slot, build()))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ownership_partitions_every_slot_once() {
        for shards in [1usize, 2, 3, 4, 7, 12, 256] {
            let mut seen = [0u8; FANOUT];
            for shard in 0..shards {
                for slot in SlotOwnership::new(shard, shards).slots() {
                    seen[usize::from(slot)] += 1;
                }
            }
            assert!(seen.iter().all(|&n| n == 1), "shards={shards}");
        }
    }

    #[test]
    fn test_ownership_owns() {
        let own = SlotOwnership::new(3, 12);
        assert!(own.owns(3));
        assert!(own.owns(15));
        assert!(own.owns(255));
        assert!(!own.owns(4));
        assert_eq!(own.slots().count(), 22);
        assert_eq!(SlotOwnership::ALL.slots().count(), FANOUT);
    }

    #[test]
    #[should_panic(expected = "not a valid slot partition")]
    fn test_ownership_rejects_bad_shard() {
        let _ = SlotOwnership::new(4, 4);
    }

    #[test]
    fn test_build_parallel_covers_owned_slots() {
        let own = SlotOwnership::new(1, 8);
        let mut built = build_parallel(own, 3, || Box::new(0u32));
        built.sort_by_key(|(slot, _)| *slot);

        let slots: Vec<u8> = built.iter().map(|(slot, _)| *slot).collect();
        assert_eq!(slots, own.slots().collect::<Vec<_>>());
    }
}
