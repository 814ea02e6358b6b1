//! Zero-cost tracing for hot paths.
//!
//! With the `hot-trace` feature these macros forward to the `tracing` crate.
//! Without it (the default) they expand to nothing, so per-node and
//! per-batch events cost nothing in release runs. Cold lifecycle events
//! (run start, stage shutdown, failures) call `tracing` directly.
//!
//! ```bash
//! # Node creation and batch hand-offs on stderr
//! RUST_LOG=uniqip=trace cargo run --release --features hot-trace -- ips.txt
//! ```

#![allow(unused_macros, unused_imports)]

/// Trace-level event. No-op without the `hot-trace` feature.
#[cfg(feature = "hot-trace")]
macro_rules! trace_log {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}

#[cfg(not(feature = "hot-trace"))]
macro_rules! trace_log {
    ($($arg:tt)*) => {};
}

/// Debug-level event. No-op without the `hot-trace` feature.
#[cfg(feature = "hot-trace")]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[cfg(not(feature = "hot-trace"))]
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}

pub(crate) use debug_log;
pub(crate) use trace_log;
