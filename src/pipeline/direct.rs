//! Direct topology: the reader decodes only the leading component, routes
//! the line on it, and the owning counter decodes the rest.
//!
//! Routing is always on the leading component, so counter `i` only ever
//! touches top-level slots `slot % counters == i`.

use std::io::BufRead;
use std::ops::ControlFlow;
use std::thread;

use crossbeam_channel::{SendError, Sender, bounded};

use crate::address::{OctetPolicy, parse_partial};
use crate::batch::{LineBatch, PartialBatch};
use crate::config::PipelineConfig;
use crate::error::{CountError, Result};
use crate::reader::LineReader;
use crate::router::{ShardBuffers, ShardRouter};
use crate::shard::{ShardCounter, ShardSink};
use crate::tracing_helpers::trace_log;

use super::stages::flush_staged;
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
    let router = ShardRouter::new(0, sinks.len());
    let policy = config.octets;

    let (txs, rxs): (Vec<_>, Vec<_>) = (0..sinks.len())
        .map(|_| bounded::<PartialBatch>(config.counter_queue_depth))
        .unzip();

    thread::scope(|s| {
        let counters: Vec<_> = sinks
            .into_iter()
            .zip(rxs)
            .enumerate()
            .map(|(shard, (sink, rx))| {
                s.spawn(move || {
                    count_shard(
                        ShardCounter::new(shard, sink),
                        &rx,
                        &pools.partials,
                        failures,
                        policy,
                    )
                })
            })
            .collect();

        let mut staging = ShardBuffers::new(&pools.partials, router.shards(), config.address_batch);
        for item in reader.by_ref() {
            let batch = match item {
                Ok(batch) => batch,
                Err(err) => {
                    failures.report(err);
                    break;
                }
            };

            let flow = if failures.has_failed() {
                ControlFlow::Break(())
            } else {
                route_lines(&batch, &mut staging, &txs, router, pools, policy, failures)
            };
            pools.lines.release(batch);
            if flow.is_break() {
                break;
            }
        }
        flush_staged(&mut staging, &txs, &pools.partials, failures);
        drop(txs);
        tracing::debug!(lines = reader.lines_read(), "reader finished");

        Ok(Drained {
            shards: join_stage(counters, "counter")?,
            lines: reader.lines_read(),
        })
    })
}

/// Decode the leading component of every line in `batch` and stage the line
/// for its owning counter.
///
/// Breaks on a bad leading field (after reporting it) or if a counter is gone.
fn route_lines(
    batch: &LineBatch,
    staging: &mut ShardBuffers<'_, PartialBatch>,
    txs: &[Sender<PartialBatch>],
    router: ShardRouter,
    pools: &Pools,
    policy: OctetPolicy,
    failures: &FailureSlot,
) -> ControlFlow<()> {
    for (line_no, line) in batch.numbered() {
        if line.trim().is_empty() {
            continue;
        }

        let partial = match parse_partial(line, policy) {
            Ok(partial) => partial,
            Err(source) => {
                failures.report(CountError::MalformedAddress {
                    line_no,
                    line: line.to_owned(),
                    source,
                });
                return ControlFlow::Break(());
            }
        };

        let shard = router.shard_of_component(partial.first);
        let Some(full) = staging.stage(shard, |b| b.push(line_no, line, partial)) else {
            continue;
        };
        trace_log!(shard, len = full.len(), "direct reader: hand-off");
        if let Err(SendError(full)) = txs[shard].send(full) {
            pools.partials.release(full);
            return ControlFlow::Break(());
        }
    }
    ControlFlow::Continue(())
}
