//! Single-owner trie: every mutation goes through `&mut self`.
//!
//! This is the shard-partitioned form (each counter owns one whole trie) and
//! the canonical form for merging and verification.

use std::array;

use crate::address::Address;

use super::{Bitmap, CountBits, FANOUT, Merge, SlotOwnership, build_parallel};

// ============================================================================
//  OwnedNode
// ============================================================================

/// Interior node: 256 optional children, created on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedNode<C> {
    children: Box<[Option<Box<C>>; FANOUT]>,
}

impl<C> Default for OwnedNode<C> {
    fn default() -> Self {
        Self {
            children: Box::new(array::from_fn(|_| None)),
        }
    }
}

impl<C> OwnedNode<C> {
    /// Build a node from its child slots.
    pub(crate) fn from_children(children: [Option<Box<C>>; FANOUT]) -> Self {
        Self {
            children: Box::new(children),
        }
    }

    /// Child at `idx`, if created.
    #[must_use]
    #[inline]
    pub fn child(&self, idx: u8) -> Option<&C> {
        self.children[usize::from(idx)].as_deref()
    }

    /// Install `child` at `idx` unless a child already exists there.
    ///
    /// Returns `false` (and drops `child`) if the slot was taken.
    pub fn install(&mut self, idx: u8, child: Box<C>) -> bool {
        let slot = &mut self.children[usize::from(idx)];
        if slot.is_some() {
            return false;
        }
        *slot = Some(child);
        true
    }

    /// Created children with their indices, ascending.
    pub fn occupied(&self) -> impl Iterator<Item = (u8, &C)> + '_ {
        (0..=u8::MAX)
            .zip(self.children.iter())
            .filter_map(|(idx, child)| child.as_deref().map(|c| (idx, c)))
    }

    /// Number of created children.
    #[must_use]
    pub fn occupancy(&self) -> usize {
        self.children.iter().filter(|c| c.is_some()).count()
    }
}

impl<C: Default> OwnedNode<C> {
    /// Child at `idx`, created empty if absent.
    #[inline]
    pub fn child_or_create(&mut self, idx: u8) -> &mut C {
        self.children[usize::from(idx)].get_or_insert_with(Box::default)
    }

    /// Create every absent child (one level deep).
    pub fn populate(&mut self) {
        for slot in self.children.iter_mut() {
            slot.get_or_insert_with(Box::default);
        }
    }
}

impl<C: CountBits> CountBits for OwnedNode<C> {
    fn count_bits(&self) -> u64 {
        self.children
            .iter()
            .flatten()
            .map(|child| child.count_bits())
            .sum()
    }
}

impl<C: Merge> Merge for OwnedNode<C> {
    fn merge(&mut self, other: Self) {
        let theirs: [Option<Box<C>>; FANOUT] = *other.children;
        for (mine, theirs) in self.children.iter_mut().zip(theirs) {
            let Some(subtree) = theirs else {
                continue;
            };
            match mine {
                Some(existing) => existing.merge(*subtree),
                None => *mine = Some(subtree),
            }
        }
    }
}

/// Node holding leaves, indexed by the third component.
pub type OwnedL2 = OwnedNode<Bitmap>;

/// Node indexed by the second component.
pub type OwnedL3 = OwnedNode<OwnedL2>;

/// Root, indexed by the leading component.
pub type OwnedRoot = OwnedNode<OwnedL3>;

/// A third-level child with all 256 second-level children pre-created.
fn populated_l3() -> Box<OwnedL3> {
    let mut l3 = Box::<OwnedL3>::default();
    l3.populate();
    l3
}

// ============================================================================
//  OwnedTrie
// ============================================================================

/// Distinct-address set owned by a single task.
///
/// # Example
///
/// ```rust
/// use uniqip::{Address, OwnedTrie};
///
/// let mut trie = OwnedTrie::new();
/// assert!(trie.insert(Address::new(1, 2, 3, 4)));
/// assert!(!trie.insert(Address::new(1, 2, 3, 4)));
/// assert_eq!(trie.count_bits(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OwnedTrie {
    root: OwnedRoot,
}

impl OwnedTrie {
    /// An empty trie.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty trie whose owned top-level slots are eagerly populated,
    /// using `workers` short-lived threads.
    #[must_use]
    pub fn with_populated(ownership: SlotOwnership, workers: usize) -> Self {
        let mut trie = Self::new();
        trie.populate_parallel(ownership, workers);
        trie
    }

    pub(crate) const fn from_root(root: OwnedRoot) -> Self {
        Self { root }
    }

    /// Record `addr`. Returns `true` if it was not seen before.
    #[inline]
    pub fn insert(&mut self, addr: Address) -> bool {
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

    /// Distinct count by full traversal.
    #[must_use]
    pub fn count_bits(&self) -> u64 {
        self.root.count_bits()
    }

    /// Union `other` into `self`, taking over its subtrees where `self` has none.
    pub fn merge(&mut self, other: Self) {
        self.root.merge(other.root);
    }

    /// Pre-create the third-level child (and its 256 second-level children)
    /// for every owned top-level slot, spread over `workers` threads.
    ///
    /// Slots that already have a child are left untouched.
    pub fn populate_parallel(&mut self, ownership: SlotOwnership, workers: usize) {
        for (slot, l3) in build_parallel(ownership, workers, populated_l3) {
            self.root.install(slot, l3);
        }
    }

    /// Number of created top-level children.
    #[must_use]
    pub fn top_level_occupancy(&self) -> usize {
        self.root.occupancy()
    }

    /// Recorded addresses in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Address> + '_ {
        self.root.occupied().flat_map(|(b0, l3)| {
            l3.occupied().flat_map(move |(b1, l2)| {
                l2.occupied().flat_map(move |(b2, leaf)| {
                    leaf.iter().map(move |b3| Address::new(b0, b1, b2, b3))
                })
            })
        })
    }
}

impl Extend<Address> for OwnedTrie {
    fn extend<I: IntoIterator<Item = Address>>(&mut self, iter: I) {
        for addr in iter {
            self.insert(addr);
        }
    }
}

impl FromIterator<Address> for OwnedTrie {
    fn from_iter<I: IntoIterator<Item = Address>>(iter: I) -> Self {
        let mut trie = Self::new();
        trie.extend(iter);
        trie
    }
}
