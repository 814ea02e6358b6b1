//! Error types for parsing and for whole counting runs.
//!
//! A run fails as a unit: the first [`CountError`] observed by any stage is
//! surfaced once every stage has drained, and the partial count is discarded.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Why a single line did not decode into an [`Address`](crate::Address).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The line did not split into the expected number of dot-separated fields.
    #[error("expected {expected} dot-separated fields, found {found}")]
    FieldCount {
        /// Fields required for a full address.
        expected: usize,
        /// Fields actually present.
        found: usize,
    },

    /// A field is not an integer.
    #[error("invalid octet {field:?}")]
    InvalidOctet {
        /// The offending field text.
        field: String,
    },

    /// A field parsed as an integer outside `0..=255` under
    /// [`OctetPolicy::Strict`](crate::OctetPolicy::Strict).
    #[error("octet {value} out of range 0..=255")]
    OutOfRange {
        /// The parsed value.
        value: i64,
    },

    /// The line is longer than any address can be.
    #[error("line longer than {limit} bytes")]
    LineTooLong {
        /// Longest accepted line, terminator excluded.
        limit: usize,
    },
}

/// Errors that abort a counting run.
#[derive(Debug, Error)]
pub enum CountError {
    /// The input could not be opened, or reading it failed mid-stream.
    #[error("source {} unavailable: {source}", path.display())]
    SourceUnavailable {
        /// Path of the input source.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// A record did not decompose into four in-range integer fields.
    #[error("malformed address at line {line_no} ({line:?}): {source}")]
    MalformedAddress {
        /// 1-based line number in the input.
        line_no: u64,
        /// The offending line, without its terminator.
        line: String,
        /// What was wrong with it.
        #[source]
        source: ParseError,
    },

    /// The run configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The incremental count disagrees with a full bitmap traversal.
    #[error("incremental count {incremental} disagrees with traversal count {traversal}")]
    CountMismatch {
        /// Sum of per-shard counters.
        incremental: u64,
        /// Population count over every leaf bitmap.
        traversal: u64,
    },

    /// A worker thread panicked.
    #[error("{stage} worker panicked")]
    WorkerPanicked {
        /// Pipeline stage the worker belonged to.
        stage: &'static str,
    },
}

impl CountError {
    /// Whether this is a [`CountError::MalformedAddress`].
    #[must_use]
    pub const fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedAddress { .. })
    }

    /// Whether this is a [`CountError::SourceUnavailable`].
    #[must_use]
    pub const fn is_source_unavailable(&self) -> bool {
        matches!(self, Self::SourceUnavailable { .. })
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CountError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_message_names_line() {
        let err = CountError::MalformedAddress {
            line_no: 17,
            line: "1.2.3".to_string(),
            source: ParseError::FieldCount {
                expected: 4,
                found: 3,
            },
        };

        let msg = err.to_string();
        assert!(msg.contains("line 17"), "{msg}");
        assert!(msg.contains("\"1.2.3\""), "{msg}");
        assert!(err.is_malformed());
        assert!(!err.is_source_unavailable());
    }

    #[test]
    fn test_source_unavailable_keeps_io_source() {
        let err = CountError::SourceUnavailable {
            path: PathBuf::from("/nope"),
            source: io::Error::new(io::ErrorKind::NotFound, "gone"),
        };

        assert!(err.is_source_unavailable());
        assert!(std::error::Error::source(&err).is_some());
    }
}
