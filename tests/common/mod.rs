//! Shared helpers for the integration tests: tracing setup and input files.
//!
//! ```rust,ignore
//! mod common;
//!
//! #[test]
//! fn my_test() {
//!     common::init_tracing();
//!     let file = common::input_file(["1.2.3.4", "1.2.3.5"]);
//!     // ...
//! }
//! ```
//!
//! Environment variables:
//! - `RUST_LOG`: filter directives (e.g. `uniqip=debug,uniqip::pipeline=trace`)
//! - `UNIQIP_LOG_DIR`: log directory (default: `logs/`)
//! - `UNIQIP_LOG_CONSOLE`: set to "0" to silence the console layer
//!
//! Events are also appended to `logs/uniqip.jsonl` as NDJSON:
//!
//! ```bash
//! jq 'select(.fields.message == "run complete")' logs/uniqip.jsonl
//! ```

#![allow(dead_code)]

use std::env;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Once;

use tempfile::NamedTempFile;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

static INIT: Once = Once::new();

/// Install the test subscriber. Only the first call has any effect.
pub fn init_tracing() {
    INIT.call_once(setup_tracing);
}

/// Where and how loudly the test subscriber logs.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Directory for the NDJSON log.
    pub log_dir: PathBuf,
    /// NDJSON file name inside `log_dir`.
    pub log_file: String,
    /// Mirror events to the console.
    pub console_enabled: bool,
    /// Level used when `RUST_LOG` is unset.
    pub default_level: Level,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            log_file: "uniqip.jsonl".to_string(),
            console_enabled: true,
            default_level: Level::WARN,
        }
    }
}

impl TracingConfig {
    /// Defaults overlaid with `UNIQIP_LOG_DIR` and `UNIQIP_LOG_CONSOLE`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = env::var("UNIQIP_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if env::var("UNIQIP_LOG_CONSOLE").is_ok_and(|v| v == "0") {
            config.console_enabled = false;
        }

        config
    }
}

fn make_filter(default_level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("{default_level}")))
}

#[expect(clippy::expect_used)]
fn setup_tracing() {
    let config = TracingConfig::from_env();

    std::fs::create_dir_all(&config.log_dir).expect("Failed to create log directory");
    // Append: nextest runs each test binary in its own process.
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.log_dir.join(&config.log_file))
        .expect("Failed to open log file");

    let console_layer = config.console_enabled.then(|| {
        tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_thread_names(true)
            .with_target(true)
            .compact()
            .with_filter(make_filter(config.default_level))
    });

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::sync::Mutex::new(file))
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .json()
        .with_filter(make_filter(config.default_level));

    let _ = Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init();
}

/// Write `lines` to a fresh temporary file, newline-terminated.
#[expect(clippy::expect_used)]
pub fn input_file<I, S>(lines: I) -> NamedTempFile
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    for line in lines {
        writeln!(file, "{}", line.as_ref()).expect("Failed to write temp file");
    }
    file.flush().expect("Failed to flush temp file");
    file
}

/// Deterministic pseudo-random addresses (SplitMix64), `n` of them.
pub fn random_addresses(seed: u64, n: usize) -> Vec<[u8; 4]> {
    let mut state = seed;
    (0..n)
        .map(|_| {
            state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
            let mut z = state;
            z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
            z ^= z >> 31;
            let b = z.to_be_bytes();
            [b[4], b[5], b[6], b[7]]
        })
        .collect()
}

/// Dotted-quad rendering of `octets`.
pub fn dotted(octets: [u8; 4]) -> String {
    std::net::Ipv4Addr::from(octets).to_string()
}
