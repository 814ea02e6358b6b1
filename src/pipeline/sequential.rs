//! Single-threaded baseline: read, decode and insert on the calling thread.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::address::parse_address;
use crate::config::PipelineConfig;
use crate::error::{CountError, Result};
use crate::reader::LineReader;
use crate::shard::{ShardCounter, ShardReport};
use crate::trie::OwnedTrie;

use super::{Pools, RunSummary};

/// Count the file at `path` on the calling thread.
///
/// Only `line_batch`, `pool_capacity`, `octets` and `verify` are read from
/// `config`. The summary has a single shard.
///
/// # Errors
///
/// As [`run`](super::run), minus worker panics.
pub fn count_sequential(path: &Path, config: &PipelineConfig) -> Result<RunSummary> {
    let started = Instant::now();
    let pools = Pools::new(config);
    let reader = LineReader::open(path, &pools.lines, config.line_batch)?;
    count(reader, &pools, config, started)
}

/// Count an already-open source on the calling thread.
///
/// # Errors
///
/// As [`count_sequential`], except that opening cannot fail.
pub fn count_sequential_reader<R: BufRead>(
    source: R,
    label: impl Into<PathBuf>,
    config: &PipelineConfig,
) -> Result<RunSummary> {
    let started = Instant::now();
    let pools = Pools::new(config);
    let reader = LineReader::new(source, label, &pools.lines, config.line_batch);
    count(reader, &pools, config, started)
}

fn count<R: BufRead>(
    mut reader: LineReader<'_, R>,
    pools: &Pools,
    config: &PipelineConfig,
    started: Instant,
) -> Result<RunSummary> {
    let mut counter = ShardCounter::new(0, OwnedTrie::new());

    for batch in reader.by_ref() {
        let batch = batch?;
        for (line_no, line) in batch.numbered() {
            if line.trim().is_empty() {
                continue;
            }
            let addr = parse_address(line, config.octets).map_err(|source| {
                CountError::MalformedAddress {
                    line_no,
                    line: line.to_owned(),
                    source,
                }
            })?;
            counter.record(addr);
        }
        pools.lines.release(batch);
    }

    let (report, trie): (ShardReport, OwnedTrie) = counter.finish();
    let summary = RunSummary {
        distinct: report.distinct,
        per_shard: vec![report],
        lines: reader.lines_read(),
        elapsed: started.elapsed(),
        traversal: config.verify.then(|| trie.count_bits()),
        line_pool: pools.lines.metrics().snapshot(),
        address_pool: pools.addresses.metrics().snapshot(),
    };
    super::check_traversal(&summary)?;

    tracing::info!(
        distinct = summary.distinct,
        lines = summary.lines,
        elapsed_ms = summary.elapsed.as_millis(),
        "sequential count complete"
    );
    Ok(summary)
}
