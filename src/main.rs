//! `uniqip` command line: count distinct IPv4 addresses in a file.
//!
//! ```bash
//! uniqip --strategy locked --counters 8 ips.txt
//! RUST_LOG=uniqip=debug uniqip --verify ips.txt
//! ```
//!
//! Options not given on the command line fall back to `UNIQIP_*` environment
//! variables, then to the library defaults.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;
use uniqip::{CountError, OctetPolicy, PipelineConfig, RunSummary, Strategy, Topology};

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

// ============================================================================
//  Arguments
// ============================================================================

/// Exact distinct-count of dotted-quad IPv4 addresses, one per line.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input file, one address per line.
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Store shared by the counters.
    #[arg(long, value_enum)]
    strategy: Option<CliStrategy>,

    /// Pipeline shape.
    #[arg(long, value_enum)]
    topology: Option<CliTopology>,

    /// Parser threads.
    #[arg(long, value_name = "N")]
    parsers: Option<usize>,

    /// Router threads.
    #[arg(long, value_name = "N")]
    routers: Option<usize>,

    /// Counter threads, one per shard (at most 256).
    #[arg(long, value_name = "N")]
    counters: Option<usize>,

    /// Address component (0-3) that picks the shard.
    #[arg(long, value_name = "BYTE")]
    route_byte: Option<usize>,

    /// Lines per read batch.
    #[arg(long, value_name = "N")]
    line_batch: Option<usize>,

    /// Addresses per parsed or routed batch.
    #[arg(long, value_name = "N")]
    address_batch: Option<usize>,

    /// Reject components above 255 instead of keeping their low 8 bits.
    #[arg(long)]
    strict_octets: bool,

    /// Allocate the whole trie up front.
    #[arg(long)]
    eager: bool,

    /// Recount by full traversal and fail on disagreement.
    #[arg(long)]
    verify: bool,

    /// Count on the calling thread only.
    #[arg(long)]
    sequential: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliStrategy {
    Partitioned,
    Locked,
    Optimistic,
}

impl From<CliStrategy> for Strategy {
    fn from(strategy: CliStrategy) -> Self {
        match strategy {
            CliStrategy::Partitioned => Self::Partitioned,
            CliStrategy::Locked => Self::Locked,
            CliStrategy::Optimistic => Self::Optimistic,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliTopology {
    Staged,
    Direct,
}

impl From<CliTopology> for Topology {
    fn from(topology: CliTopology) -> Self {
        match topology {
            CliTopology::Staged => Self::Staged,
            CliTopology::Direct => Self::Direct,
        }
    }
}

impl Cli {
    /// Overlay the command line on `config`.
    fn apply(&self, mut config: PipelineConfig) -> PipelineConfig {
        if let Some(strategy) = self.strategy {
            config.strategy = strategy.into();
        }
        if let Some(topology) = self.topology {
            config.topology = topology.into();
        }
        if let Some(parsers) = self.parsers {
            config.threads.parsers = parsers;
        }
        if let Some(routers) = self.routers {
            config.threads.routers = routers;
        }
        if let Some(counters) = self.counters {
            config.threads.counters = counters;
        }
        if let Some(route_byte) = self.route_byte {
            config.route_byte = route_byte;
        }
        if let Some(line_batch) = self.line_batch {
            config.line_batch = line_batch;
        }
        if let Some(address_batch) = self.address_batch {
            config.address_batch = address_batch;
        }
        if self.strict_octets {
            config.octets = OctetPolicy::Strict;
        }
        config.eager_populate |= self.eager;
        config.verify |= self.verify;
        config
    }
}

// ============================================================================
//  Entry point
// ============================================================================

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match count(&cli) {
        Ok(summary) => {
            println!("took {:?}", summary.elapsed);
            println!("distinct {}", summary.distinct);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("uniqip: {err}");
            ExitCode::FAILURE
        }
    }
}

fn count(cli: &Cli) -> Result<RunSummary, CountError> {
    let config = cli.apply(PipelineConfig::from_env()?);
    if cli.sequential {
        uniqip::count_sequential(&cli.file, &config)
    } else {
        uniqip::run(&cli.file, &config)
    }
}

/// Human-readable events on stderr; stdout carries only the result.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "uniqip",
            "--strategy",
            "optimistic",
            "--topology",
            "direct",
            "--counters",
            "3",
            "--strict-octets",
            "--verify",
            "ips.txt",
        ]);
        let config = cli.apply(PipelineConfig::default());

        assert_eq!(config.strategy, Strategy::Optimistic);
        assert_eq!(config.topology, Topology::Direct);
        assert_eq!(config.threads.counters, 3);
        assert_eq!(config.octets, OctetPolicy::Strict);
        assert!(config.verify);
        assert!(!config.eager_populate);
        assert_eq!(cli.file, PathBuf::from("ips.txt"));
    }

    #[test]
    fn test_absent_flags_keep_config() {
        let cli = Cli::parse_from(["uniqip", "ips.txt"]);
        let base = PipelineConfig {
            route_byte: 1,
            ..PipelineConfig::default()
        };
        let config = cli.apply(base.clone());

        assert_eq!(config, base);
    }
}
