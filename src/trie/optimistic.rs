//! Shared trie with unsynchronized node creation and bit setting.
//!
//! There are no locks and no atomics on the insert path. Soundness rests on
//! one rule: a given top-level slot (and so the whole subtree below it) is
//! only ever touched by one thread at a time. Distinct top-level slots are
//! distinct memory, so owners of disjoint slot sets never race.
//!
//! The rule is enforced in two ways:
//! - [`OptimisticTrie::handles`] splits a `&mut` borrow into one
//!   [`ShardHandle`] per shard over disjoint [`SlotOwnership`]s; each handle
//!   refuses addresses outside its slots.
//! - [`OptimisticTrie::insert_unsynchronized`] is `unsafe` and leaves the
//!   rule to the caller.

use std::array;
use std::cell::UnsafeCell;
use std::fmt as StdFmt;

use crate::address::Address;
use crate::tracing_helpers::trace_log;

use super::owned::{OwnedNode, OwnedTrie};
use super::{Bitmap, CountBits, FANOUT, IntoOwned, SlotOwnership, build_parallel};

// ============================================================================
//  RacyLeaf
// ============================================================================

/// Leaf bitmap mutated through `&self` without synchronization.
#[derive(Default)]
pub struct RacyLeaf {
    bits: UnsafeCell<Bitmap>,
}

// SAFETY: every mutation goes through `insert`, whose contract gives the
// caller exclusive access to this leaf for the duration of the call.
unsafe impl Sync for RacyLeaf {}

impl RacyLeaf {
    /// # Safety
    ///
    /// No other thread may access this leaf during the call.
    #[inline]
    unsafe fn insert(&self, component: u8) -> bool {
        // SAFETY: exclusive access per the caller's contract.
        unsafe { (*self.bits.get()).insert(component) }
    }

    fn bits(&self) -> &Bitmap {
        // SAFETY: readers only run while no `insert` is in flight, which
        // `OptimisticTrie` guarantees through `&mut` handles or the
        // `insert_unsynchronized` contract.
        unsafe { &*self.bits.get() }
    }
}

impl CountBits for RacyLeaf {
    fn count_bits(&self) -> u64 {
        self.bits().count_bits()
    }
}

impl IntoOwned for RacyLeaf {
    type Owned = Bitmap;

    fn into_owned(self) -> Bitmap {
        self.bits.into_inner()
    }
}

// ============================================================================
//  RacyNode
// ============================================================================

/// Interior node whose child slots are created through `&self` without
/// synchronization.
pub struct RacyNode<C> {
    children: [UnsafeCell<Option<Box<C>>>; FANOUT],
}

// SAFETY: a slot is only written by the thread that owns it, see the module
// docs. Children are shared across threads, hence `C: Sync`.
unsafe impl<C: Send + Sync> Sync for RacyNode<C> {}

impl<C> Default for RacyNode<C> {
    fn default() -> Self {
        Self {
            children: array::from_fn(|_| UnsafeCell::new(None)),
        }
    }
}

impl<C> StdFmt::Debug for RacyNode<C> {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.debug_struct("RacyNode").finish_non_exhaustive()
    }
}

impl<C> RacyNode<C> {
    /// Child at `idx`, if created.
    #[inline]
    fn child(&self, idx: u8) -> Option<&C> {
        // SAFETY: no writer is in flight while a reader runs (module rule).
        unsafe { (*self.children[usize::from(idx)].get()).as_deref() }
    }

    fn slots(&self) -> impl Iterator<Item = &C> + '_ {
        (0..=u8::MAX).filter_map(|idx| self.child(idx))
    }

    fn occupancy(&self) -> usize {
        self.slots().count()
    }
}

impl<C: Default> RacyNode<C> {
    /// # Safety
    ///
    /// No other thread may access slot `idx` (or anything below it) during
    /// the call.
    #[inline]
    unsafe fn child_or_create(&self, idx: u8) -> &C {
        // SAFETY: exclusive access to this slot per the caller's contract.
        let slot = unsafe { &mut *self.children[usize::from(idx)].get() };
        slot.get_or_insert_with(|| {
            trace_log!(idx, "optimistic node: creating child");
            Box::default()
        })
    }

    fn populate(&mut self) {
        for slot in &mut self.children {
            slot.get_mut().get_or_insert_with(Box::default);
        }
    }
}

impl<C: CountBits> CountBits for RacyNode<C> {
    fn count_bits(&self) -> u64 {
        self.slots().map(CountBits::count_bits).sum()
    }
}

impl<C: IntoOwned> IntoOwned for RacyNode<C> {
    type Owned = OwnedNode<C::Owned>;

    fn into_owned(self) -> Self::Owned {
        OwnedNode::from_children(
            self.children
                .map(|cell| cell.into_inner().map(|b| Box::new((*b).into_owned()))),
        )
    }
}

type RacyL2 = RacyNode<RacyLeaf>;
type RacyL3 = RacyNode<RacyL2>;
type RacyRoot = RacyNode<RacyL3>;

fn populated_l3() -> Box<RacyL3> {
    let mut l3 = Box::<RacyL3>::default();
    l3.populate();
    l3
}

// ============================================================================
//  OptimisticTrie
// ============================================================================

/// Shared distinct-address set with lock-free, unsynchronized inserts.
///
/// # Example
///
/// ```rust
/// use std::thread;
/// use uniqip::{Address, OptimisticTrie};
///
/// let mut trie = OptimisticTrie::new();
/// thread::scope(|s| {
///     for mut handle in trie.handles(4) {
///         s.spawn(move || {
///             let shard = handle.ownership().shard() as u8;
///             handle.insert(Address::new(shard, 0, 0, 1));
///         });
///     }
/// });
/// assert_eq!(trie.count_bits(), 4);
/// ```
#[derive(Debug, Default)]
pub struct OptimisticTrie {
    root: RacyRoot,
}

impl OptimisticTrie {
    /// An empty trie.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `addr` from a thread that owns its top-level slot.
    /// Returns `true` if this call set its bit.
    ///
    /// # Safety
    ///
    /// While this call runs, no other thread may access the subtree under
    /// `addr.octet(0)`: no concurrent insert of an address with the same
    /// first component, and no concurrent [`contains`](Self::contains) or
    /// [`count_bits`](Self::count_bits). Inserts whose first components
    /// differ may run concurrently.
    #[inline]
    pub unsafe fn insert_unsynchronized(&self, addr: Address) -> bool {
        let [b0, b1, b2, b3] = addr.octets();
        // SAFETY: the caller owns slot `b0` and therefore every node below it.
        unsafe {
            self.root
                .child_or_create(b0)
                .child_or_create(b1)
                .child_or_create(b2)
                .insert(b3)
        }
    }

    /// Record `addr` with exclusive access.
    #[inline]
    pub fn insert(&mut self, addr: Address) -> bool {
        // SAFETY: `&mut self` excludes every other access.
        unsafe { self.insert_unsynchronized(addr) }
    }

    /// Split into one insert handle per shard, shard `s` owning the top-level
    /// slots `slot % shards == s`.
    ///
    /// # Panics
    ///
    /// Panics if `shards > 256`.
    pub fn handles(&mut self, shards: usize) -> Vec<ShardHandle<'_>> {
        let trie: &Self = self;
        (0..shards)
            .map(|shard| ShardHandle {
                trie,
                ownership: SlotOwnership::new(shard, shards),
            })
            .collect()
    }

    /// Whether `addr` was recorded.
    #[must_use]
    pub fn contains(&self, addr: Address) -> bool {
        let [b0, b1, b2, b3] = addr.octets();
        self.root
            .child(b0)
            .and_then(|l3| l3.child(b1))
            .and_then(|l2| l2.child(b2))
            .is_some_and(|leaf| leaf.bits().contains(b3))
    }

    /// Distinct count by full traversal.
    #[must_use]
    pub fn count_bits(&self) -> u64 {
        self.root.count_bits()
    }

    /// Pre-create the third-level child (and its 256 second-level children)
    /// for every slot in `ownership`, spread over `workers` threads.
    pub fn populate_parallel(&mut self, ownership: SlotOwnership, workers: usize) {
        for (slot, l3) in build_parallel(ownership, workers, populated_l3) {
            self.root.children[usize::from(slot)]
                .get_mut()
                .get_or_insert(l3);
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

// ============================================================================
//  ShardHandle
// ============================================================================

/// Exclusive insert access to one shard's top-level slots of an
/// [`OptimisticTrie`].
///
/// Handles from one [`OptimisticTrie::handles`] call own disjoint slots and
/// may be moved to different threads.
#[derive(Debug)]
pub struct ShardHandle<'t> {
    trie: &'t OptimisticTrie,
    ownership: SlotOwnership,
}

impl ShardHandle<'_> {
    /// Slots this handle may write.
    #[must_use]
    pub const fn ownership(&self) -> SlotOwnership {
        self.ownership
    }

    /// Record `addr`. Returns `true` if this call set its bit.
    ///
    /// # Panics
    ///
    /// Panics if `addr`'s first component is not owned by this handle.
    #[inline]
    pub fn insert(&mut self, addr: Address) -> bool {
        let slot = addr.octet(0);
        assert!(
            self.ownership.owns(slot),
            "address {addr} routed to shard {} which does not own slot {slot}",
            self.ownership.shard()
        );
        // SAFETY: sibling handles own disjoint slots, the trie stays mutably
        // borrowed while any handle lives, and `&mut self` keeps this handle
        // on one thread at a time.
        unsafe { self.trie.insert_unsynchronized(addr) }
    }
}
