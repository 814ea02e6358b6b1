//! 256-bit leaf bitmap keyed by an address's trailing component.

use super::{CountBits, Merge};

/// Number of 64-bit words in a leaf.
const WORDS: usize = 4;

/// Shift that selects the word for a component (upper 2 bits).
const WORD_SHIFT: u8 = 6;

/// Mask that selects the bit within a word (lower 6 bits).
const BIT_MASK: u8 = 0b0011_1111;

/// Split a component into `(word index, single-bit mask)`.
#[inline(always)]
const fn locate(component: u8) -> (usize, u64) {
    ((component >> WORD_SHIFT) as usize, 1u64 << (component & BIT_MASK))
}

/// Set of observed trailing components under one 3-component prefix.
///
/// Bits are only ever set, never cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Bitmap {
    words: [u64; WORDS],
}

impl Bitmap {
    /// An empty leaf.
    #[must_use]
    pub const fn new() -> Self {
        Self { words: [0; WORDS] }
    }

    /// Set the bit for `component`. Returns `true` if it was previously unset.
    #[inline]
    pub const fn insert(&mut self, component: u8) -> bool {
        let (word, bit) = locate(component);
        let before = self.words[word];
        self.words[word] = before | bit;
        before & bit == 0
    }

    /// Whether `component` has been inserted.
    #[must_use]
    #[inline]
    pub const fn contains(&self, component: u8) -> bool {
        let (word, bit) = locate(component);
        self.words[word] & bit != 0
    }

    /// Whether no bit is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.words[0] | self.words[1] | self.words[2] | self.words[3] == 0
    }

    /// Raw words, lowest components first.
    #[must_use]
    pub const fn words(&self) -> [u64; WORDS] {
        self.words
    }

    /// Set components in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0..=u8::MAX).filter(|&c| self.contains(c))
    }
}

impl CountBits for Bitmap {
    #[inline]
    fn count_bits(&self) -> u64 {
        self.words.iter().map(|w| u64::from(w.count_ones())).sum()
    }
}

impl Merge for Bitmap {
    #[inline]
    fn merge(&mut self, other: Self) {
        for (mine, theirs) in self.words.iter_mut().zip(other.words) {
            *mine |= theirs;
        }
    }
}
