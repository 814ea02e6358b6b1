//! Shard counters: the consuming end of the pipeline.
//!
//! A [`ShardCounter`] wraps whatever the selected strategy gives one shard to
//! write into (a [`ShardSink`]) and keeps that shard's running count of newly
//! set bits. The orchestrator sums the per-shard counts for the final answer.

use crate::address::{Address, OctetPolicy};
use crate::batch::{AddressBatch, PartialBatch};
use crate::error::CountError;
use crate::pool::Recycle;
use crate::trie::{LockedTrie, OwnedTrie, ShardHandle};

// ============================================================================
//  ShardSink
// ============================================================================

/// Insert-if-absent target for one shard.
pub trait ShardSink {
    /// Record `addr`. Returns `true` if its bit was previously unset.
    fn insert(&mut self, addr: Address) -> bool;
}

/// Shard-partitioned: the shard owns a whole trie.
impl ShardSink for OwnedTrie {
    #[inline]
    fn insert(&mut self, addr: Address) -> bool {
        Self::insert(self, addr)
    }
}

/// Locked: every shard writes the one shared trie.
impl ShardSink for &LockedTrie {
    #[inline]
    fn insert(&mut self, addr: Address) -> bool {
        LockedTrie::insert(self, addr)
    }
}

/// Optimistic: the shard writes only its own top-level slots.
impl ShardSink for ShardHandle<'_> {
    #[inline]
    fn insert(&mut self, addr: Address) -> bool {
        Self::insert(self, addr)
    }
}

// ============================================================================
//  ShardCounter
// ============================================================================

/// Final tally of one shard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardReport {
    /// Shard index.
    pub shard: usize,
    /// Addresses whose bit this shard set (its share of the distinct count).
    pub distinct: u64,
    /// Addresses this shard received, duplicates included.
    pub received: u64,
}

/// One shard's sink plus its running counts.
#[derive(Debug)]
pub struct ShardCounter<S> {
    sink: S,
    report: ShardReport,
}

impl<S: ShardSink> ShardCounter<S> {
    /// Counter for shard `shard` writing into `sink`.
    pub const fn new(shard: usize, sink: S) -> Self {
        Self {
            sink,
            report: ShardReport {
                shard,
                distinct: 0,
                received: 0,
            },
        }
    }

    /// Record one address. Returns `true` if it was new.
    #[inline]
    pub fn record(&mut self, addr: Address) -> bool {
        let fresh = self.sink.insert(addr);
        self.report.distinct += u64::from(fresh);
        self.report.received += 1;
        fresh
    }

    /// Running tally.
    #[must_use]
    pub const fn report(&self) -> ShardReport {
        self.report
    }

    /// Tally and sink.
    pub fn finish(self) -> (ShardReport, S) {
        (self.report, self.sink)
    }
}

impl<S: ShardSink> Extend<Address> for ShardCounter<S> {
    fn extend<I: IntoIterator<Item = Address>>(&mut self, iter: I) {
        for addr in iter {
            self.record(addr);
        }
    }
}

// ============================================================================
//  ShardBatch
// ============================================================================

/// A batch a shard counter can consume.
pub trait ShardBatch: Recycle {
    /// Record every address in `self`.
    ///
    /// # Errors
    ///
    /// [`CountError::MalformedAddress`] if a line fails to decode; addresses
    /// before it have been recorded.
    fn feed<S: ShardSink>(
        &self,
        counter: &mut ShardCounter<S>,
        policy: OctetPolicy,
    ) -> Result<(), CountError>;
}

impl ShardBatch for AddressBatch {
    #[inline]
    fn feed<S: ShardSink>(
        &self,
        counter: &mut ShardCounter<S>,
        _policy: OctetPolicy,
    ) -> Result<(), CountError> {
        counter.extend(self.iter().copied());
        Ok(())
    }
}

/// Completes the decode that routing on the leading component started.
impl ShardBatch for PartialBatch {
    fn feed<S: ShardSink>(
        &self,
        counter: &mut ShardCounter<S>,
        policy: OctetPolicy,
    ) -> Result<(), CountError> {
        for (line_no, line, partial) in self.entries() {
            let addr = partial
                .complete(policy)
                .map_err(|source| CountError::MalformedAddress {
                    line_no,
                    line: line.to_owned(),
                    source,
                })?;
            counter.record(addr);
        }
        Ok(())
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Fail fast in tests")]
mod tests {
    use super::*;
    use crate::address::parse_partial;
    use crate::error::ParseError;
    use crate::trie::OptimisticTrie;

    #[test]
    fn test_counter_counts_new_bits_only() {
        let mut counter = ShardCounter::new(2, OwnedTrie::new());

        assert!(counter.record(Address::new(1, 2, 3, 4)));
        assert!(!counter.record(Address::new(1, 2, 3, 4)));
        assert!(counter.record(Address::new(1, 2, 3, 5)));

        let (report, trie) = counter.finish();
        assert_eq!(
            report,
            ShardReport {
                shard: 2,
                distinct: 2,
                received: 3
            }
        );
        assert_eq!(trie.count_bits(), 2);
    }

    #[test]
    fn test_locked_sinks_share_one_trie() {
        let trie = LockedTrie::new();
        let mut a = ShardCounter::new(0, &trie);
        let mut b = ShardCounter::new(1, &trie);

        a.extend([Address::new(0, 0, 0, 0), Address::new(0, 0, 0, 2)]);
        b.extend([Address::new(0, 0, 0, 1), Address::new(0, 0, 0, 3)]);

        assert_eq!(a.report().distinct + b.report().distinct, 4);
        assert_eq!(trie.count_bits(), 4);
    }

    #[test]
    fn test_handle_sinks() {
        let mut trie = OptimisticTrie::new();
        let mut counters: Vec<_> = trie
            .handles(2)
            .into_iter()
            .enumerate()
            .map(|(shard, handle)| ShardCounter::new(shard, handle))
            .collect();

        counters[0].record(Address::new(4, 0, 0, 0));
        counters[1].record(Address::new(5, 0, 0, 0));
        counters[1].record(Address::new(5, 0, 0, 0));

        let total: u64 = counters.iter().map(|c| c.report().distinct).sum();
        drop(counters);
        assert_eq!(total, 2);
        assert_eq!(trie.count_bits(), 2);
    }

    #[test]
    fn test_feed_partial_batch() {
        let mut batch = PartialBatch::with_capacity(2);
        for (no, line) in [(1, "9.8.7.6"), (2, "9.8.7.6"), (3, "9.8.7.5")] {
            batch.push(no, line, parse_partial(line, OctetPolicy::Truncate).unwrap());
        }

        let mut counter = ShardCounter::new(0, OwnedTrie::new());
        batch.feed(&mut counter, OctetPolicy::Truncate).unwrap();

        assert_eq!(counter.report().distinct, 2);
        assert_eq!(counter.report().received, 3);
    }

    #[test]
    fn test_feed_partial_batch_reports_bad_line() {
        let mut batch = PartialBatch::with_capacity(2);
        for (no, line) in [(4, "1.1.1.1"), (5, "1.2.3")] {
            batch.push(no, line, parse_partial(line, OctetPolicy::Truncate).unwrap());
        }

        let mut counter = ShardCounter::new(0, OwnedTrie::new());
        let err = batch
            .feed(&mut counter, OctetPolicy::Truncate)
            .unwrap_err();

        match err {
            CountError::MalformedAddress {
                line_no,
                line,
                source,
            } => {
                assert_eq!(line_no, 5);
                assert_eq!(line, "1.2.3");
                assert_eq!(
                    source,
                    ParseError::FieldCount {
                        expected: 4,
                        found: 3
                    }
                );
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(counter.report().distinct, 1);
    }
}
