//! Line source: turns a byte stream into pooled [`LineBatch`]es.
//!
//! [`LineReader`] is a lazy, finite, non-restartable iterator. It yields full
//! batches of `batch_lines` lines and flushes a final partial batch. Lines are
//! passed through untouched apart from the terminator (`\n` or `\r\n`); no
//! deduplication or filtering happens here.
//!
//! A line longer than [`MAX_LINE_BYTES`] is reported as
//! [`CountError::MalformedAddress`] as soon as the limit is crossed, so a
//! source without newlines is never buffered whole.
//!
//! After a read error the iterator yields that error once and then ends.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::iter::FusedIterator;
use std::path::{Path, PathBuf};

use crate::batch::LineBatch;
use crate::error::{CountError, ParseError};
use crate::pool::BatchPool;

/// Read buffer size for file sources.
pub const READ_BUFFER_BYTES: usize = 512 * 1024;

/// Longest accepted line, terminator excluded. Well above any address the
/// truncating parser accepts (four signed 64-bit fields and three dots).
pub const MAX_LINE_BYTES: usize = 256;

/// Bytes of an overlong line kept for the error report.
const OVERLONG_PREVIEW_BYTES: usize = 32;

/// Batched line iterator over a [`BufRead`] source.
#[derive(Debug)]
pub struct LineReader<'p, R> {
    source: R,
    path: PathBuf,
    pool: &'p BatchPool<LineBatch>,
    batch_lines: usize,
    scratch: Vec<u8>,
    next_line: u64,
    done: bool,
}

impl<'p> LineReader<'p, BufReader<File>> {
    /// Open `path` for reading.
    ///
    /// # Errors
    ///
    /// [`CountError::SourceUnavailable`] if the file cannot be opened.
    pub fn open(
        path: &Path,
        pool: &'p BatchPool<LineBatch>,
        batch_lines: usize,
    ) -> Result<Self, CountError> {
        let file = File::open(path).map_err(|source| CountError::SourceUnavailable {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self::new(
            BufReader::with_capacity(READ_BUFFER_BYTES, file),
            path,
            pool,
            batch_lines,
        ))
    }
}

impl<'p, R: BufRead> LineReader<'p, R> {
    /// Wrap an already-open source. `path` is only used in error reports.
    ///
    /// `batch_lines` is clamped to at least 1.
    pub fn new(
        source: R,
        path: impl Into<PathBuf>,
        pool: &'p BatchPool<LineBatch>,
        batch_lines: usize,
    ) -> Self {
        Self {
            source,
            path: path.into(),
            pool,
            batch_lines: batch_lines.max(1),
            scratch: Vec::with_capacity(64),
            next_line: 1,
            done: false,
        }
    }

    /// Number of lines produced so far.
    #[must_use]
    pub const fn lines_read(&self) -> u64 {
        self.next_line - 1
    }

    /// Read one line into `batch`. Returns `false` at end of input.
    fn read_line_into(&mut self, batch: &mut LineBatch) -> Result<bool, CountError> {
        // Room for the longest line plus "\r\n".
        let limit = (MAX_LINE_BYTES + 2) as u64;
        self.scratch.clear();
        loop {
            match (&mut self.source).take(limit).read_until(b'\n', &mut self.scratch) {
                Ok(0) => return Ok(false),
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(source) => {
                    return Err(CountError::SourceUnavailable {
                        path: self.path.clone(),
                        source,
                    });
                }
            }
        }

        let mut line = self.scratch.as_slice();
        if let Some(stripped) = line.strip_suffix(b"\n") {
            line = stripped;
        }
        if let Some(stripped) = line.strip_suffix(b"\r") {
            line = stripped;
        }

        if line.len() > MAX_LINE_BYTES {
            let preview = &line[..OVERLONG_PREVIEW_BYTES];
            return Err(CountError::MalformedAddress {
                line_no: self.next_line,
                line: format!("{}...", String::from_utf8_lossy(preview)),
                source: ParseError::LineTooLong {
                    limit: MAX_LINE_BYTES,
                },
            });
        }

        match std::str::from_utf8(line) {
            Ok(text) => batch.push(text),
            Err(_) => batch.push(&String::from_utf8_lossy(line)),
        }
        self.next_line += 1;
        Ok(true)
    }
}

impl<R: BufRead> Iterator for LineReader<'_, R> {
    type Item = Result<LineBatch, CountError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut batch = self.pool.acquire();
        batch.set_first_line(self.next_line);

        while batch.len() < self.batch_lines {
            match self.read_line_into(&mut batch) {
                Ok(true) => {}
                Ok(false) => {
                    self.done = true;
                    break;
                }
                Err(err) => {
                    self.done = true;
                    self.pool.release(batch);
                    return Some(Err(err));
                }
            }
        }

        if batch.is_empty() {
            self.pool.release(batch);
            None
        } else {
            Some(Ok(batch))
        }
    }
}

impl<R: BufRead> FusedIterator for LineReader<'_, R> {}
