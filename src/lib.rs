//! # `uniqip`
//!
//! Exact distinct-count of dotted-quad IPv4 addresses streamed from large
//! text files.
//!
//! Addresses are recorded in a four-level radix trie whose leaves are 256-bit
//! bitmaps, so memory grows with the number of distinct `/24` prefixes rather
//! than with the number of lines. A staged pipeline feeds the trie:
//!
//! ```text
//! reader ─▶ parsers ─▶ routers ─▶ counters (one per shard) ─▶ Σ
//! ```
//!
//! ## Strategies
//!
//! | [`Strategy`] | Store | Node creation | Bit set |
//! |--------------|-------|---------------|---------|
//! | `Partitioned` (default) | one [`OwnedTrie`] per shard | owner only | owner only |
//! | `Locked` | one shared [`LockedTrie`] | double-checked `RwLock` | per-leaf `Mutex` |
//! | `Optimistic` | one shared [`OptimisticTrie`] | unsynchronized, slot owner only | unsynchronized, slot owner only |
//!
//! All strategies report the same count for the same input regardless of
//! thread counts, batch sizes or shard count.
//!
//! ## Example
//!
//! ```rust
//! use std::io::Cursor;
//! use uniqip::{PipelineConfig, run_reader};
//!
//! let input = "1.2.3.4\n1.2.3.4\n1.2.3.5\n";
//! let summary = run_reader(Cursor::new(input), "inline", &PipelineConfig::default()).unwrap();
//! assert_eq!(summary.distinct, 2);
//! ```
//!
//! ## Out-of-range fields
//!
//! By default a field such as `256` keeps its low 8 bits and counts as `0`
//! ([`OctetPolicy::Truncate`]). [`OctetPolicy::Strict`] rejects it instead.

#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::inline_always)]

pub mod address;
pub mod batch;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod pool;
pub mod reader;
pub mod router;
pub mod shard;
pub mod trie;

mod tracing_helpers;

pub use address::{Address, OctetPolicy, PartialAddress, parse_address, parse_partial, parse_rest};
pub use config::{PipelineConfig, Strategy, ThreadCounts, Topology};
pub use error::{CountError, ParseError};
pub use pipeline::{RunSummary, count_sequential, count_sequential_reader, run, run_reader};
pub use shard::{ShardReport, ShardSink};
pub use trie::{Bitmap, CountBits, LockedTrie, Merge, OptimisticTrie, OwnedTrie, SlotOwnership};
