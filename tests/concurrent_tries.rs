//! Stress tests for the shared tries under real threads.
//!
//! ```bash
//! cargo nextest run --test concurrent_tries --release
//! ```

#![expect(clippy::unwrap_used)]

mod common;

use std::collections::HashSet;
use std::sync::Barrier;
use std::thread;

use uniqip::router::ShardRouter;
use uniqip::{Address, LockedTrie, OptimisticTrie, OwnedTrie, SlotOwnership};

const THREADS: usize = 8;
const PER_THREAD: usize = 20_000;

fn workload(seed: u64) -> Vec<Address> {
    // Narrow prefixes force threads onto the same nodes and leaves.
    common::random_addresses(seed, PER_THREAD)
        .into_iter()
        .map(|[a, b, c, d]| Address::new(a % 8, b % 4, c, d))
        .collect()
}

fn oracle(sets: &[Vec<Address>]) -> u64 {
    sets.iter().flatten().collect::<HashSet<_>>().len() as u64
}

// =============================================================================
// LockedTrie
// =============================================================================

#[test]
fn stress_locked_overlapping_inserts() {
    common::init_tracing();
    let sets: Vec<_> = (0..THREADS as u64).map(workload).collect();
    let trie = LockedTrie::new();
    let barrier = Barrier::new(THREADS);

    let fresh: u64 = thread::scope(|s| {
        let handles: Vec<_> = sets
            .iter()
            .map(|set| {
                let (trie, barrier) = (&trie, &barrier);
                s.spawn(move || {
                    barrier.wait();
                    set.iter().filter(|&&addr| trie.insert(addr)).count() as u64
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });

    let expected = oracle(&sets);
    assert_eq!(fresh, expected, "each address reported new exactly once");
    assert_eq!(trie.count_bits(), expected);
    for addr in sets.iter().flatten() {
        assert!(trie.contains(*addr));
    }
}

#[test]
fn stress_locked_same_address_everywhere() {
    common::init_tracing();
    let trie = LockedTrie::new();
    let barrier = Barrier::new(THREADS * 2);
    let addr = Address::new(9, 9, 9, 9);

    let fresh: usize = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS * 2)
            .map(|_| {
                let (trie, barrier) = (&trie, &barrier);
                s.spawn(move || {
                    barrier.wait();
                    usize::from(trie.insert(addr))
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });

    assert_eq!(fresh, 1);
    assert_eq!(trie.count_bits(), 1);
}

#[test]
fn stress_locked_populated_then_shared() {
    common::init_tracing();
    let sets: Vec<_> = (0..THREADS as u64).map(|s| workload(s + 100)).collect();
    let mut trie = LockedTrie::new();
    trie.populate_parallel(SlotOwnership::new(0, 32), 4);
    let populated = trie.top_level_occupancy();
    assert_eq!(populated, 8);

    thread::scope(|s| {
        for set in &sets {
            let trie = &trie;
            s.spawn(move || {
                for &addr in set {
                    trie.insert(addr);
                }
            });
        }
    });

    assert_eq!(trie.count_bits(), oracle(&sets));
    assert_eq!(trie.into_owned().count_bits(), oracle(&sets));
}

// =============================================================================
// OptimisticTrie
// =============================================================================

#[test]
fn stress_optimistic_routed_handles() {
    common::init_tracing();
    let sets: Vec<_> = (0..THREADS as u64).map(|s| workload(s + 200)).collect();
    let router = ShardRouter::new(0, THREADS);

    // Route every address to the handle that owns its leading component.
    let mut routed: Vec<Vec<Address>> = vec![Vec::new(); THREADS];
    for &addr in sets.iter().flatten() {
        routed[router.shard_of(addr)].push(addr);
    }

    let mut trie = OptimisticTrie::new();
    let fresh: u64 = thread::scope(|s| {
        let handles: Vec<_> = trie
            .handles(THREADS)
            .into_iter()
            .zip(&routed)
            .map(|(mut handle, batch)| {
                s.spawn(move || batch.iter().filter(|&&addr| handle.insert(addr)).count() as u64)
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });

    let expected = oracle(&sets);
    assert_eq!(fresh, expected);
    assert_eq!(trie.count_bits(), expected);
}

// =============================================================================
// Partitioned OwnedTries
// =============================================================================

#[test]
fn stress_partitioned_merge() {
    common::init_tracing();
    let sets: Vec<_> = (0..THREADS as u64).map(|s| workload(s + 300)).collect();
    let router = ShardRouter::new(3, THREADS);

    let tries: Vec<OwnedTrie> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|shard| {
                let sets = &sets;
                s.spawn(move || {
                    sets.iter()
                        .flatten()
                        .copied()
                        .filter(|&addr| router.shard_of(addr) == shard)
                        .collect::<OwnedTrie>()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let total: u64 = tries.iter().map(OwnedTrie::count_bits).sum();
    let mut merged = OwnedTrie::new();
    for trie in tries {
        merged.merge(trie);
    }

    let expected = oracle(&sets);
    assert_eq!(total, expected, "shards are disjoint");
    assert_eq!(merged.count_bits(), expected);
}

#[test]
fn stress_repeated_runs() {
    common::init_tracing();
    for round in 0..20u64 {
        let sets: Vec<_> = (0..4).map(|s| workload(round * 10 + s)).collect();
        let trie = LockedTrie::new();
        thread::scope(|s| {
            for set in &sets {
                let trie = &trie;
                s.spawn(move || {
                    for &addr in set {
                        trie.insert(addr);
                    }
                });
            }
        });
        assert_eq!(trie.count_bits(), oracle(&sets), "round {round}");
    }
}
