//! Lock-based shared trie.
//!
//! Any thread may create any node. Interior nodes guard their child slots
//! with a [`parking_lot::RwLock`] and use double-checked creation:
//!
//! ```text
//! 1. read lock        → child present? return it
//! 2. upgradable read  → re-check (another creator may have won)
//! 3. upgrade to write → create, store, return
//! ```
//!
//! Leaves guard their bitmap with a [`parking_lot::Mutex`] and check-then-set
//! under it.
//!
//! Children are boxed and never removed or replaced, so a child reference
//! handed out under the lock stays valid after the lock is released, for as
//! long as the node itself is borrowed.

use std::array;
use std::ptr::NonNull;

use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};

use crate::address::Address;
use crate::tracing_helpers::trace_log;

use super::owned::{OwnedNode, OwnedTrie};
use super::{Bitmap, CountBits, FANOUT, IntoOwned, SlotOwnership, build_parallel};

// ============================================================================
//  LockedLeaf
// ============================================================================

/// Mutex-guarded leaf bitmap.
#[derive(Debug, Default)]
pub struct LockedLeaf {
    bits: Mutex<Bitmap>,
}

impl LockedLeaf {
    /// Set the bit for `component` under the leaf lock.
    /// Returns `true` if it was previously unset.
    #[inline]
    pub fn insert(&self, component: u8) -> bool {
        self.bits.lock().insert(component)
    }

    /// Whether `component` is set.
    #[must_use]
    pub fn contains(&self, component: u8) -> bool {
        self.bits.lock().contains(component)
    }
}

impl CountBits for LockedLeaf {
    fn count_bits(&self) -> u64 {
        self.bits.lock().count_bits()
    }
}

impl IntoOwned for LockedLeaf {
    type Owned = Bitmap;

    fn into_owned(self) -> Bitmap {
        self.bits.into_inner()
    }
}

// ============================================================================
//  LockedNode
// ============================================================================

/// Interior node with read-write-locked child slots.
#[derive(Debug)]
pub struct LockedNode<C> {
    children: RwLock<[Option<Box<C>>; FANOUT]>,
}

impl<C> Default for LockedNode<C> {
    fn default() -> Self {
        Self {
            children: RwLock::new(array::from_fn(|_| None)),
        }
    }
}

impl<C> LockedNode<C> {
    /// Child at `idx`, if created.
    #[must_use]
    #[inline]
    pub fn child(&self, idx: u8) -> Option<&C> {
        let ptr = self.children.read()[usize::from(idx)]
            .as_deref()
            .map(NonNull::from);

        // SAFETY: the child is boxed, only ever stored into an empty slot, and
        // never removed or replaced while `self` is borrowed. The pointee
        // therefore outlives the returned borrow of `self`.
        ptr.map(|p| unsafe { p.as_ref() })
    }

    /// Number of created children.
    #[must_use]
    pub fn occupancy(&self) -> usize {
        self.children.read().iter().filter(|c| c.is_some()).count()
    }
}

impl<C: Default> LockedNode<C> {
    /// Child at `idx`, created by the first caller to find it absent.
    ///
    /// Concurrent callers for the same `idx` all receive the same child.
    pub fn child_or_create(&self, idx: u8) -> &C {
        if let Some(child) = self.child(idx) {
            return child;
        }

        let slot = usize::from(idx);
        let guard = self.children.upgradable_read();
        let ptr = if let Some(existing) = guard[slot].as_deref() {
            NonNull::from(existing)
        } else {
            let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
            trace_log!(slot, "locked node: creating child");
            NonNull::from(&**guard[slot].insert(Box::default()))
        };

        // SAFETY: see `child`; the slot now holds a child that is never
        // removed or replaced.
        unsafe { ptr.as_ref() }
    }

    /// Create every absent child (one level deep).
    pub fn populate(&mut self) {
        for slot in self.children.get_mut() {
            slot.get_or_insert_with(Box::default);
        }
    }
}

impl<C: CountBits> CountBits for LockedNode<C> {
    fn count_bits(&self) -> u64 {
        self.children
            .read()
            .iter()
            .flatten()
            .map(|child| child.count_bits())
            .sum()
    }
}

impl<C: IntoOwned> IntoOwned for LockedNode<C> {
    type Owned = OwnedNode<C::Owned>;

    fn into_owned(self) -> Self::Owned {
        let children = self.children.into_inner();
        OwnedNode::from_children(children.map(|c| c.map(|b| Box::new((*b).into_owned()))))
    }
}

type LockedL2 = LockedNode<LockedLeaf>;
type LockedL3 = LockedNode<LockedL2>;
type LockedRoot = LockedNode<LockedL3>;

fn populated_l3() -> Box<LockedL3> {
    let mut l3 = Box::<LockedL3>::default();
    l3.populate();
    l3
}

// ============================================================================
//  LockedTrie
// ============================================================================

/// Distinct-address set shared by any number of threads through `&self`.
///
/// # Example
///
/// ```rust
/// use std::thread;
/// use uniqip::{Address, LockedTrie};
///
/// let trie = LockedTrie::new();
/// thread::scope(|s| {
///     for t in 0..4u8 {
///         let trie = &trie;
///         s.spawn(move || {
///             trie.insert(Address::new(10, 0, 0, t));
///             trie.insert(Address::new(10, 0, 0, 0));
///         });
///     }
/// });
/// assert_eq!(trie.count_bits(), 4);
/// ```
#[derive(Debug, Default)]
pub struct LockedTrie {
    root: LockedRoot,
}

impl LockedTrie {
    /// An empty trie.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `addr`. Returns `true` if this call set its bit.
    ///
    /// Across all threads, exactly one insert of a given address returns `true`.
    #[inline]
    pub fn insert(&self, addr: Address) -> bool {
        let [b0, b1, b2, b3] = addr.octets();
        self.root
            .child_or_create(b0)
            .child_or_create(b1)
            .child_or_create(b2)
            .insert(b3)
    }

    /// Whether `addr` was recorded.
    #[must_use]
    pub fn contains(&self, addr: Address) -> bool {
        let [b0, b1, b2, b3] = addr.octets();
        self.root
            .child(b0)
            .and_then(|l3| l3.child(b1))
            .and_then(|l2| l2.child(b2))
            .is_some_and(|leaf| leaf.contains(b3))
    }

    /// Distinct count by full traversal, taking each node's read lock.
    #[must_use]
    pub fn count_bits(&self) -> u64 {
        self.root.count_bits()
    }

    /// Pre-create the third-level child (and its 256 second-level children)
    /// for every slot in `ownership`, spread over `workers` threads.
    pub fn populate_parallel(&mut self, ownership: SlotOwnership, workers: usize) {
        let children = self.root.children.get_mut();
        for (slot, l3) in build_parallel(ownership, workers, populated_l3) {
            children[usize::from(slot)].get_or_insert(l3);
        }
    }

    /// Number of created top-level children.
    #[must_use]
    pub fn top_level_occupancy(&self) -> usize {
        self.root.occupancy()
    }

    /// Convert into the single-owner form.
    #[must_use]
    pub fn into_owned(self) -> OwnedTrie {
        OwnedTrie::from_root(self.root.into_owned())
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Fail fast in tests")]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::thread;

    use super::*;

    fn _assert_send_sync()
    where
        LockedTrie: Send + Sync,
    {
    }

    #[test]
    fn test_insert_contains() {
        let trie = LockedTrie::new();

        assert!(trie.insert(Address::new(1, 2, 3, 4)));
        assert!(!trie.insert(Address::new(1, 2, 3, 4)));
        assert!(trie.contains(Address::new(1, 2, 3, 4)));
        assert!(!trie.contains(Address::new(1, 2, 3, 5)));
        assert_eq!(trie.count_bits(), 1);
    }

    #[test]
    fn test_child_or_create_returns_same_child() {
        let node: LockedNode<LockedLeaf> = LockedNode::default();

        let a: *const LockedLeaf = node.child_or_create(9);
        let b: *const LockedLeaf = node.child_or_create(9);

        assert_eq!(a, b);
        assert_eq!(node.occupancy(), 1);
    }

    #[test]
    fn test_concurrent_same_prefix_creates_once() {
        const THREADS: usize = 8;

        let trie = Arc::new(LockedTrie::new());
        let new_bits = Arc::new(AtomicU64::new(0));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let trie = Arc::clone(&trie);
                let new_bits = Arc::clone(&new_bits);
                thread::spawn(move || {
                    for b3 in 0..=u8::MAX {
                        if trie.insert(Address::new(7, 7, 7, b3)) {
                            new_bits.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(new_bits.load(Ordering::Relaxed), 256);
        assert_eq!(trie.count_bits(), 256);
        assert_eq!(trie.top_level_occupancy(), 1);
    }

    #[test]
    fn test_into_owned_preserves_content() {
        let trie = LockedTrie::new();
        for i in 0..=u8::MAX {
            trie.insert(Address::new(i, i / 2, 3, i));
        }

        let owned = trie.into_owned();

        assert_eq!(owned.count_bits(), 256);
        assert!(owned.contains(Address::new(200, 100, 3, 200)));
    }

    #[test]
    fn test_populate_parallel_then_insert() {
        let mut trie = LockedTrie::new();
        trie.populate_parallel(SlotOwnership::new(3, 64), 4);

        assert_eq!(trie.top_level_occupancy(), 4);
        assert_eq!(trie.count_bits(), 0);
        assert!(trie.insert(Address::new(195, 0, 0, 1)));
        assert_eq!(trie.count_bits(), 1);
    }
}
