//! Run configuration.
//!
//! [`PipelineConfig::default`] sizes the worker pools from the CPU count;
//! [`PipelineConfig::from_env`] overlays `UNIQIP_*` variables on top:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `UNIQIP_STRATEGY` | [`strategy`](PipelineConfig::strategy) (`partitioned`, `locked`, `optimistic`) |
//! | `UNIQIP_TOPOLOGY` | [`topology`](PipelineConfig::topology) (`staged`, `direct`) |
//! | `UNIQIP_PARSERS` | [`ThreadCounts::parsers`] |
//! | `UNIQIP_ROUTERS` | [`ThreadCounts::routers`] |
//! | `UNIQIP_COUNTERS` | [`ThreadCounts::counters`] |
//! | `UNIQIP_ROUTE_BYTE` | [`route_byte`](PipelineConfig::route_byte) |
//! | `UNIQIP_STRICT_OCTETS` | `1` selects [`OctetPolicy::Strict`] |
//!
//! Nothing is checked until [`PipelineConfig::validate`].

use std::env;
use std::fmt as StdFmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::thread;

use crate::address::OctetPolicy;
use crate::error::{CountError, Result};
use crate::trie::FANOUT;

/// Lines per reader batch.
pub const DEFAULT_LINE_BATCH: usize = 6000;

/// Addresses per parser and router output batch.
pub const DEFAULT_ADDRESS_BATCH: usize = 2000;

/// Depth of the reader-to-parser and parser-to-router queues.
pub const DEFAULT_QUEUE_DEPTH: usize = 10;

/// Depth of each counter's input queue.
pub const DEFAULT_COUNTER_QUEUE_DEPTH: usize = 7;

/// Idle buffers each pool retains.
pub const DEFAULT_POOL_CAPACITY: usize = 64;

/// Route on the trailing component by default.
pub const DEFAULT_ROUTE_BYTE: usize = 3;

// ============================================================================
//  Strategy / Topology
// ============================================================================

/// How counters share the radix store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum Strategy {
    /// One private trie per shard, merged at the end.
    #[default]
    Partitioned,

    /// One shared trie with double-checked node creation and per-leaf locks.
    Locked,

    /// One shared trie with unsynchronized writes; each shard owns the
    /// top-level slots `slot % counters == shard`. Requires routing on the
    /// leading component.
    Optimistic,
}

impl Strategy {
    /// Lowercase name, as accepted by [`FromStr`].
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Partitioned => "partitioned",
            Self::Locked => "locked",
            Self::Optimistic => "optimistic",
        }
    }
}

impl StdFmt::Display for Strategy {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Strategy {
    type Err = CountError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "partitioned" => Ok(Self::Partitioned),
            "locked" => Ok(Self::Locked),
            "optimistic" => Ok(Self::Optimistic),
            other => Err(CountError::InvalidConfig(format!("unknown strategy {other:?}"))),
        }
    }
}

/// Which stages run between the reader and the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum Topology {
    /// Reader, parser pool, router pool, counter pool.
    #[default]
    Staged,

    /// The reader decodes only the leading component and routes the line
    /// on it; the owning counter decodes the rest.
    Direct,
}

impl Topology {
    /// Lowercase name, as accepted by [`FromStr`].
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Staged => "staged",
            Self::Direct => "direct",
        }
    }
}

impl StdFmt::Display for Topology {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Topology {
    type Err = CountError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "staged" => Ok(Self::Staged),
            "direct" => Ok(Self::Direct),
            other => Err(CountError::InvalidConfig(format!("unknown topology {other:?}"))),
        }
    }
}

// ============================================================================
//  ThreadCounts
// ============================================================================

/// Worker pool sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadCounts {
    /// Parser workers.
    pub parsers: usize,
    /// Router workers.
    pub routers: usize,
    /// Counter workers, one per shard.
    pub counters: usize,
}

impl ThreadCounts {
    /// Split `cpus` in 2:1:4 parts across parsers, routers and counters.
    #[must_use]
    pub fn from_cpus(cpus: usize) -> Self {
        let per = cpus.max(1).div_ceil(7);
        Self {
            parsers: 2 * per,
            routers: per,
            counters: (4 * per).min(FANOUT),
        }
    }

    /// Sizes for the CPUs available to this process.
    #[must_use]
    pub fn detect() -> Self {
        Self::from_cpus(thread::available_parallelism().map_or(1, NonZeroUsize::get))
    }
}

impl Default for ThreadCounts {
    fn default() -> Self {
        Self::detect()
    }
}

// ============================================================================
//  PipelineConfig
// ============================================================================

/// Everything a counting run needs besides its input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Radix store sharing strategy.
    pub strategy: Strategy,
    /// Stage layout.
    pub topology: Topology,
    /// Worker pool sizes.
    pub threads: ThreadCounts,
    /// Address component used for routing (0 = leading).
    pub route_byte: usize,
    /// Lines per reader batch.
    pub line_batch: usize,
    /// Addresses per parser and router batch.
    pub address_batch: usize,
    /// Depth of the inter-stage queues.
    pub queue_depth: usize,
    /// Depth of each counter's queue.
    pub counter_queue_depth: usize,
    /// Idle buffers retained per pool.
    pub pool_capacity: usize,
    /// Out-of-range field handling.
    pub octets: OctetPolicy,
    /// Pre-create the owned top-level subtrees before counting.
    pub eager_populate: bool,
    /// Cross-check the incremental total against a full traversal.
    pub verify: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            topology: Topology::default(),
            threads: ThreadCounts::default(),
            route_byte: DEFAULT_ROUTE_BYTE,
            line_batch: DEFAULT_LINE_BATCH,
            address_batch: DEFAULT_ADDRESS_BATCH,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            counter_queue_depth: DEFAULT_COUNTER_QUEUE_DEPTH,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            octets: OctetPolicy::default(),
            eager_populate: false,
            verify: false,
        }
    }
}

impl PipelineConfig {
    /// Defaults overlaid with `UNIQIP_*` environment variables.
    ///
    /// # Errors
    ///
    /// [`CountError::InvalidConfig`] if a variable is set but unparsable.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(strategy) = env_var::<Strategy>("UNIQIP_STRATEGY")? {
            config.strategy = strategy;
        }
        if let Some(topology) = env_var::<Topology>("UNIQIP_TOPOLOGY")? {
            config.topology = topology;
        }
        if let Some(parsers) = env_var_usize("UNIQIP_PARSERS")? {
            config.threads.parsers = parsers;
        }
        if let Some(routers) = env_var_usize("UNIQIP_ROUTERS")? {
            config.threads.routers = routers;
        }
        if let Some(counters) = env_var_usize("UNIQIP_COUNTERS")? {
            config.threads.counters = counters;
        }
        if let Some(byte) = env_var_usize("UNIQIP_ROUTE_BYTE")? {
            config.route_byte = byte;
        }
        if env::var("UNIQIP_STRICT_OCTETS").is_ok_and(|v| v == "1") {
            config.octets = OctetPolicy::Strict;
        }

        Ok(config)
    }

    /// Component actually routed on: [`Topology::Direct`] always routes on
    /// the leading one.
    #[must_use]
    pub const fn effective_route_byte(&self) -> usize {
        match self.topology {
            Topology::Direct => 0,
            Topology::Staged => self.route_byte,
        }
    }

    /// Check that the configuration can run.
    ///
    /// # Errors
    ///
    /// [`CountError::InvalidConfig`] for zero-sized pools or batches, more
    /// than 256 counters, a route byte past the last component, or
    /// [`Strategy::Optimistic`] routed on anything but the leading component.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(CountError::InvalidConfig(msg));

        let ThreadCounts {
            parsers,
            routers,
            counters,
        } = self.threads;
        if parsers == 0 || routers == 0 || counters == 0 {
            return invalid(format!(
                "thread counts must be positive (parsers {parsers}, routers {routers}, counters {counters})"
            ));
        }
        if counters > FANOUT {
            return invalid(format!("at most {FANOUT} counters, got {counters}"));
        }
        if self.line_batch == 0 || self.address_batch == 0 {
            return invalid("batch sizes must be positive".to_string());
        }
        if self.queue_depth == 0 || self.counter_queue_depth == 0 {
            return invalid("queue depths must be positive".to_string());
        }
        if self.route_byte > 3 {
            return invalid(format!("route byte {} is not in 0..=3", self.route_byte));
        }
        if self.strategy == Strategy::Optimistic && self.effective_route_byte() != 0 {
            return invalid(format!(
                "optimistic strategy needs route byte 0 so each counter owns its top-level slots, got {}",
                self.route_byte
            ));
        }
        Ok(())
    }
}

fn env_var<T: FromStr<Err = CountError>>(name: &str) -> Result<Option<T>> {
    env::var(name).ok().map(|v| v.parse()).transpose()
}

fn env_var_usize(name: &str) -> Result<Option<usize>> {
    env::var(name)
        .ok()
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|_| CountError::InvalidConfig(format!("{name}={v:?} is not a count")))
        })
        .transpose()
}
