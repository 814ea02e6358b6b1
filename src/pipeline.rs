//! Pipeline orchestration.
//!
//! ```text
//! Staged:  reader ─▶ [lines] ─▶ parsers ─▶ [addresses] ─▶ routers ─▶ [shard i] ─▶ counter i
//! Direct:  reader (decode first field, route) ─────────────────────▶ [shard i] ─▶ counter i
//! ```
//!
//! Every `[queue]` is a bounded crossbeam channel, so a slow stage blocks its
//! producers instead of growing memory. Each worker owns one sender clone for
//! its output queue; when every worker of a stage returns, the last clone is
//! dropped and the downstream queue closes once drained. The reader runs on
//! the calling thread and closes the first queue when the input ends.
//!
//! Failures go to a [`FailureSlot`] that keeps only the first report. After
//! that the reader stops, the other stages drain their queues without doing
//! work, and the run returns the recorded error once every worker has been
//! joined.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::thread::ScopedJoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::address::OctetPolicy;
use crate::batch::{AddressBatch, LineBatch, PartialBatch};
use crate::config::{PipelineConfig, Strategy, Topology};
use crate::error::{CountError, Result};
use crate::pool::{BatchPool, PoolSnapshot};
use crate::reader::{LineReader, READ_BUFFER_BYTES};
use crate::shard::{ShardBatch, ShardCounter, ShardReport, ShardSink};
use crate::trie::{LockedTrie, OptimisticTrie, OwnedTrie, SlotOwnership};

mod direct;
mod sequential;
mod stages;

pub use sequential::{count_sequential, count_sequential_reader};

// ============================================================================
//  RunSummary
// ============================================================================

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Distinct addresses seen.
    pub distinct: u64,
    /// Per-shard tallies, by shard index. Their `distinct` fields sum to
    /// [`RunSummary::distinct`].
    pub per_shard: Vec<ShardReport>,
    /// Input lines read, blank lines included.
    pub lines: u64,
    /// Wall time from validation to the final count.
    pub elapsed: Duration,
    /// Full-traversal count, when verification was requested.
    pub traversal: Option<u64>,
    /// Line batch pool activity.
    pub line_pool: PoolSnapshot,
    /// Routed batch pool activity (decoded addresses, or partially decoded
    /// lines under [`Topology::Direct`]).
    pub address_pool: PoolSnapshot,
}

// ============================================================================
//  FailureSlot
// ============================================================================

/// First-error-wins side channel shared by every stage.
#[derive(Debug)]
pub(crate) struct FailureSlot {
    tx: Sender<CountError>,
    rx: Receiver<CountError>,
}

impl FailureSlot {
    pub(crate) fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self { tx, rx }
    }

    /// Record `err` unless an earlier failure is already recorded.
    pub(crate) fn report(&self, err: CountError) {
        let message = err.to_string();
        match self.tx.try_send(err) {
            Ok(()) => tracing::warn!(error = %message, "pipeline failure recorded"),
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                tracing::debug!(error = %message, "dropping later pipeline failure");
            }
        }
    }

    /// Whether any failure has been recorded.
    #[inline]
    pub(crate) fn has_failed(&self) -> bool {
        !self.rx.is_empty()
    }

    /// The recorded failure, if any.
    pub(crate) fn take(&self) -> Option<CountError> {
        self.rx.try_recv().ok()
    }
}

// ============================================================================
//  Pools
// ============================================================================

/// Buffer pools for one run.
#[derive(Debug)]
pub(crate) struct Pools {
    pub(crate) lines: BatchPool<LineBatch>,
    pub(crate) addresses: BatchPool<AddressBatch>,
    pub(crate) partials: BatchPool<PartialBatch>,
}

impl Pools {
    pub(crate) fn new(config: &PipelineConfig) -> Self {
        Self {
            lines: BatchPool::new(config.pool_capacity, config.line_batch),
            addresses: BatchPool::new(config.pool_capacity, config.address_batch),
            partials: BatchPool::new(config.pool_capacity, config.address_batch),
        }
    }

    fn routed_snapshot(&self, topology: Topology) -> PoolSnapshot {
        match topology {
            Topology::Staged => self.addresses.metrics().snapshot(),
            Topology::Direct => self.partials.metrics().snapshot(),
        }
    }
}

// ============================================================================
//  Shared worker pieces
// ============================================================================

/// Counter worker: consume `rx` until it closes.
///
/// After a failure anywhere, batches are released without being recorded.
pub(crate) fn count_shard<S, B>(
    mut counter: ShardCounter<S>,
    rx: &Receiver<B>,
    pool: &BatchPool<B>,
    failures: &FailureSlot,
    policy: OctetPolicy,
) -> (ShardReport, S)
where
    S: ShardSink,
    B: ShardBatch,
{
    for batch in rx {
        if !failures.has_failed() {
            if let Err(err) = batch.feed(&mut counter, policy) {
                failures.report(err);
            }
        }
        pool.release(batch);
    }

    let (report, sink) = counter.finish();
    tracing::debug!(
        shard = report.shard,
        distinct = report.distinct,
        received = report.received,
        "counter drained"
    );
    (report, sink)
}

/// Join every handle of one stage.
///
/// # Errors
///
/// [`CountError::WorkerPanicked`] if any worker panicked.
pub(crate) fn join_stage<T>(
    handles: Vec<ScopedJoinHandle<'_, T>>,
    stage: &'static str,
) -> Result<Vec<T>> {
    let mut out = Vec::with_capacity(handles.len());
    let mut panicked = 0usize;
    for handle in handles {
        match handle.join() {
            Ok(value) => out.push(value),
            Err(_) => panicked += 1,
        }
    }

    if panicked == 0 {
        Ok(out)
    } else {
        tracing::error!(stage, panicked, "worker panicked");
        Err(CountError::WorkerPanicked { stage })
    }
}

/// What a topology hands back: per-shard tallies with their sinks, plus the
/// number of input lines read.
pub(crate) struct Drained<S> {
    pub(crate) shards: Vec<(ShardReport, S)>,
    pub(crate) lines: u64,
}

/// Run the configured topology over `reader`, one counter per sink.
fn drain_into<R, S>(
    reader: LineReader<'_, R>,
    sinks: Vec<S>,
    pools: &Pools,
    config: &PipelineConfig,
) -> Result<Drained<S>>
where
    R: BufRead,
    S: ShardSink + Send,
{
    let failures = FailureSlot::new();
    let drained = match config.topology {
        Topology::Staged => stages::run(reader, sinks, pools, config, &failures),
        Topology::Direct => direct::run(reader, sinks, pools, config, &failures),
    };

    // A panicked worker outranks whatever it may have caused downstream.
    let drained = drained?;
    match failures.take() {
        Some(err) => Err(err),
        None => Ok(drained),
    }
}

// ============================================================================
//  Entry points
// ============================================================================

/// Count the distinct addresses in the file at `path`.
///
/// # Errors
///
/// - [`CountError::InvalidConfig`] if `config` does not validate;
/// - [`CountError::SourceUnavailable`] if the file cannot be opened or read;
/// - [`CountError::MalformedAddress`] for the first bad line seen;
/// - [`CountError::CountMismatch`] if verification is on and fails;
/// - [`CountError::WorkerPanicked`] if a worker thread panicked.
pub fn run(path: &Path, config: &PipelineConfig) -> Result<RunSummary> {
    config.validate()?;
    let file = File::open(path).map_err(|source| CountError::SourceUnavailable {
        path: path.to_path_buf(),
        source,
    })?;
    run_reader(BufReader::with_capacity(READ_BUFFER_BYTES, file), path, config)
}

/// Count the distinct addresses in an already-open source. `label` names the
/// source in error reports.
///
/// # Errors
///
/// As [`run`], except that opening cannot fail.
pub fn run_reader<R: BufRead>(
    source: R,
    label: impl Into<PathBuf>,
    config: &PipelineConfig,
) -> Result<RunSummary> {
    config.validate()?;
    let started = Instant::now();
    let pools = Pools::new(config);
    let reader = LineReader::new(source, label, &pools.lines, config.line_batch);
    let counters = config.threads.counters;

    tracing::info!(
        strategy = %config.strategy,
        topology = %config.topology,
        parsers = config.threads.parsers,
        routers = config.threads.routers,
        counters,
        route_byte = config.effective_route_byte(),
        "starting run"
    );

    let (per_shard, lines, traversal) = match config.strategy {
        Strategy::Partitioned => {
            let sinks = partitioned_sinks(config);
            let Drained { shards, lines } = drain_into(reader, sinks, &pools, config)?;
            let (reports, tries): (Vec<_>, Vec<_>) = shards.into_iter().unzip();
            let traversal = config.verify.then(|| {
                let mut merged = OwnedTrie::new();
                for trie in tries {
                    merged.merge(trie);
                }
                merged.count_bits()
            });
            (reports, lines, traversal)
        }
        Strategy::Locked => {
            let mut trie = LockedTrie::new();
            if config.eager_populate {
                trie.populate_parallel(SlotOwnership::ALL, counters);
            }
            let sinks = vec![&trie; counters];
            let Drained { shards, lines } = drain_into(reader, sinks, &pools, config)?;
            let reports = shards.into_iter().map(|(r, _)| r).collect();
            (reports, lines, config.verify.then(|| trie.count_bits()))
        }
        Strategy::Optimistic => {
            let mut trie = OptimisticTrie::new();
            if config.eager_populate {
                trie.populate_parallel(SlotOwnership::ALL, counters);
            }
            let sinks = trie.handles(counters);
            let Drained { shards, lines } = drain_into(reader, sinks, &pools, config)?;
            let reports = shards.into_iter().map(|(r, _)| r).collect();
            (reports, lines, config.verify.then(|| trie.count_bits()))
        }
    };

    let summary = RunSummary {
        distinct: per_shard.iter().map(|r: &ShardReport| r.distinct).sum(),
        per_shard,
        lines,
        elapsed: started.elapsed(),
        traversal,
        line_pool: pools.lines.metrics().snapshot(),
        address_pool: pools.routed_snapshot(config.topology),
    };
    check_traversal(&summary)?;

    tracing::info!(
        distinct = summary.distinct,
        lines = summary.lines,
        elapsed_ms = summary.elapsed.as_millis(),
        line_pool_hit_rate = summary.line_pool.hit_rate(),
        address_pool_hit_rate = summary.address_pool.hit_rate(),
        "run complete"
    );
    Ok(summary)
}

/// One private trie per counter. Eager population only applies when
/// routing on the leading component, where each counter's top-level slots
/// are known up front.
fn partitioned_sinks(config: &PipelineConfig) -> Vec<OwnedTrie> {
    let counters = config.threads.counters;
    let eager = config.eager_populate && config.effective_route_byte() == 0;
    if config.eager_populate && !eager {
        tracing::warn!(
            route_byte = config.effective_route_byte(),
            "eager population skipped: partitioned shards only own top-level slots when routing on byte 0"
        );
    }

    (0..counters)
        .map(|shard| {
            if eager {
                OwnedTrie::with_populated(SlotOwnership::new(shard, counters), counters)
            } else {
                OwnedTrie::new()
            }
        })
        .collect()
}

fn check_traversal(summary: &RunSummary) -> Result<()> {
    match summary.traversal {
        Some(traversal) if traversal != summary.distinct => {
            tracing::error!(
                incremental = summary.distinct,
                traversal,
                "incremental and traversal counts disagree"
            );
            Err(CountError::CountMismatch {
                incremental: summary.distinct,
                traversal,
            })
        }
        _ => Ok(()),
    }
}
