//! Staged topology: reader, parser pool, router pool, counter pool.

use std::io::BufRead;
use std::mem;
use std::ops::ControlFlow;
use std::thread;

use crossbeam_channel::{Receiver, SendError, Sender, bounded};

use crate::address::{OctetPolicy, parse_address};
use crate::batch::{AddressBatch, LineBatch};
use crate::config::PipelineConfig;
use crate::error::{CountError, Result};
use crate::pool::{BatchPool, Recycle};
use crate::reader::LineReader;
use crate::router::{ShardBuffers, ShardRouter};
use crate::shard::{ShardCounter, ShardSink};
use crate::tracing_helpers::trace_log;

use super::{Drained, FailureSlot, Pools, count_shard, join_stage};

pub(super) fn run<R, S>(
    mut reader: LineReader<'_, R>,
    sinks: Vec<S>,
    pools: &Pools,
    config: &PipelineConfig,
    failures: &FailureSlot,
) -> Result<Drained<S>>
where
    R: BufRead,
    S: ShardSink + Send,
{
    let router = ShardRouter::new(config.effective_route_byte(), sinks.len());
    let policy = config.octets;
    let flush_at = config.address_batch;

    let (line_tx, line_rx) = bounded::<LineBatch>(config.queue_depth);
    let (addr_tx, addr_rx) = bounded::<AddressBatch>(config.queue_depth);
    let (shard_txs, shard_rxs): (Vec<_>, Vec<_>) = (0..sinks.len())
        .map(|_| bounded::<AddressBatch>(config.counter_queue_depth))
        .unzip();

    thread::scope(|s| {
        let counters: Vec<_> = sinks
            .into_iter()
            .zip(shard_rxs)
            .enumerate()
            .map(|(shard, (sink, rx))| {
                s.spawn(move || {
                    count_shard(
                        ShardCounter::new(shard, sink),
                        &rx,
                        &pools.addresses,
                        failures,
                        policy,
                    )
                })
            })
            .collect();

        let routers: Vec<_> = (0..config.threads.routers)
            .map(|_| {
                let rx = addr_rx.clone();
                let txs = shard_txs.clone();
                s.spawn(move || route_addresses(&rx, &txs, router, &pools.addresses, flush_at, failures))
            })
            .collect();
        drop(addr_rx);
        drop(shard_txs);

        let parsers: Vec<_> = (0..config.threads.parsers)
            .map(|_| {
                let rx = line_rx.clone();
                let tx = addr_tx.clone();
                s.spawn(move || parse_lines(&rx, &tx, pools, policy, flush_at, failures))
            })
            .collect();
        drop(line_rx);
        drop(addr_tx);

        read_lines(&mut reader, &line_tx, &pools.lines, failures);
        drop(line_tx);
        tracing::debug!(lines = reader.lines_read(), "reader finished");

        let parsed = join_stage(parsers, "parser");
        let routed = join_stage(routers, "router");
        let counted = join_stage(counters, "counter");
        parsed?;
        routed?;

        Ok(Drained {
            shards: counted?,
            lines: reader.lines_read(),
        })
    })
}

/// Reader loop: push line batches until the input ends, a failure is
/// recorded, or no parser is left.
fn read_lines<R: BufRead>(
    reader: &mut LineReader<'_, R>,
    tx: &Sender<LineBatch>,
    pool: &BatchPool<LineBatch>,
    failures: &FailureSlot,
) {
    for item in reader {
        let batch = match item {
            Ok(batch) => batch,
            Err(err) => {
                failures.report(err);
                return;
            }
        };

        if failures.has_failed() {
            pool.release(batch);
            return;
        }
        trace_log!(first_line = batch.first_line(), lines = batch.len(), "reader: batch");
        if let Err(SendError(batch)) = tx.send(batch) {
            pool.release(batch);
            return;
        }
    }
}

/// Parser worker: decode line batches into address batches.
fn parse_lines(
    rx: &Receiver<LineBatch>,
    tx: &Sender<AddressBatch>,
    pools: &Pools,
    policy: OctetPolicy,
    flush_at: usize,
    failures: &FailureSlot,
) {
    let mut out = pools.addresses.acquire();

    for batch in rx {
        let flow = if failures.has_failed() {
            ControlFlow::Continue(())
        } else {
            parse_batch(&batch, &mut out, tx, pools, policy, flush_at, failures)
        };
        pools.lines.release(batch);
        if flow.is_break() {
            pools.addresses.release(out);
            return;
        }
    }

    if out.is_empty() || failures.has_failed() {
        pools.addresses.release(out);
    } else if let Err(SendError(out)) = tx.send(out) {
        pools.addresses.release(out);
    }
}

/// Decode one line batch into `out`, handing `out` off whenever it fills.
///
/// Breaks if the router pool is gone. A bad line is reported and ends the
/// batch early.
fn parse_batch(
    batch: &LineBatch,
    out: &mut AddressBatch,
    tx: &Sender<AddressBatch>,
    pools: &Pools,
    policy: OctetPolicy,
    flush_at: usize,
    failures: &FailureSlot,
) -> ControlFlow<()> {
    for (line_no, line) in batch.numbered() {
        if line.trim().is_empty() {
            continue;
        }

        match parse_address(line, policy) {
            Ok(addr) => out.push(addr),
            Err(source) => {
                failures.report(CountError::MalformedAddress {
                    line_no,
                    line: line.to_owned(),
                    source,
                });
                return ControlFlow::Continue(());
            }
        }

        if out.len() >= flush_at {
            let full = mem::replace(out, pools.addresses.acquire());
            if let Err(SendError(full)) = tx.send(full) {
                pools.addresses.release(full);
                return ControlFlow::Break(());
            }
        }
    }
    ControlFlow::Continue(())
}

/// Router worker: spread address batches over the shard queues.
fn route_addresses(
    rx: &Receiver<AddressBatch>,
    txs: &[Sender<AddressBatch>],
    router: ShardRouter,
    pool: &BatchPool<AddressBatch>,
    flush_at: usize,
    failures: &FailureSlot,
) {
    let mut staging = ShardBuffers::new(pool, router.shards(), flush_at);

    for batch in rx {
        let flow = if failures.has_failed() {
            ControlFlow::Continue(())
        } else {
            route_batch(&batch, &mut staging, txs, router, pool)
        };
        pool.release(batch);
        if flow.is_break() {
            break;
        }
    }

    flush_staged(&mut staging, txs, pool, failures);
}

/// Stage every address of `batch`; breaks if a counter is gone.
fn route_batch(
    batch: &AddressBatch,
    staging: &mut ShardBuffers<'_, AddressBatch>,
    txs: &[Sender<AddressBatch>],
    router: ShardRouter,
    pool: &BatchPool<AddressBatch>,
) -> ControlFlow<()> {
    for &addr in batch {
        let shard = router.shard_of(addr);
        let Some(full) = staging.stage(shard, |b| b.push(addr)) else {
            continue;
        };
        trace_log!(shard, len = full.len(), "router: hand-off");
        if let Err(SendError(full)) = txs[shard].send(full) {
            pool.release(full);
            return ControlFlow::Break(());
        }
    }
    ControlFlow::Continue(())
}

/// Send every partial staged batch, or release them after a failure.
pub(super) fn flush_staged<B: Recycle>(
    staging: &mut ShardBuffers<'_, B>,
    txs: &[Sender<B>],
    pool: &BatchPool<B>,
    failures: &FailureSlot,
) {
    let failed = failures.has_failed();
    for (shard, batch) in staging.drain() {
        if failed {
            pool.release(batch);
        } else if let Err(SendError(batch)) = txs[shard].send(batch) {
            pool.release(batch);
        }
    }
}
