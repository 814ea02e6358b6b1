//! Batch buffers moved between pipeline stages.
//!
//! [`LineBatch`] stores many lines in one contiguous `String` plus end
//! offsets, so recycling it keeps both allocations. Decoded addresses travel
//! in a plain [`AddressBatch`]. [`PartialBatch`] carries lines whose leading
//! component has already been decoded for routing.

use crate::address::{Address, PartialAddress};
use crate::pool::Recycle;

/// Decoded addresses, in arrival order.
pub type AddressBatch = Vec<Address>;

/// Average bytes reserved per line (`"255.255.255.255"` is 15).
const BYTES_PER_LINE: usize = 16;

/// An ordered run of consecutive input lines.
///
/// Lines are stored without terminators. `first_line` is the 1-based number
/// of the first line in the input, so every line's position can be recovered
/// for error reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineBatch {
    text: String,
    ends: Vec<usize>,
    first_line: u64,
}

impl LineBatch {
    /// Append one line.
    #[inline]
    pub fn push(&mut self, line: &str) {
        self.text.push_str(line);
        self.ends.push(self.text.len());
    }

    /// Number of lines held.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.ends.len()
    }

    /// Whether no lines are held.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ends.is_empty()
    }

    /// 1-based input line number of the first line.
    #[must_use]
    pub const fn first_line(&self) -> u64 {
        self.first_line
    }

    /// Set the input line number of the first line.
    pub const fn set_first_line(&mut self, line_no: u64) {
        self.first_line = line_no;
    }

    /// Line at `idx`, if present.
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&str> {
        let end = *self.ends.get(idx)?;
        let start = match idx {
            0 => 0,
            _ => self.ends[idx - 1],
        };
        self.text.get(start..end)
    }

    /// Lines in order.
    pub fn lines(&self) -> impl Iterator<Item = &str> + '_ {
        let mut start = 0;
        self.ends.iter().map(move |&end| {
            let line = &self.text[start..end];
            start = end;
            line
        })
    }

    /// Lines in order, paired with their 1-based input line numbers.
    pub fn numbered(&self) -> impl Iterator<Item = (u64, &str)> + '_ {
        (self.first_line..).zip(self.lines())
    }
}

impl Recycle for LineBatch {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            text: String::with_capacity(capacity.saturating_mul(BYTES_PER_LINE)),
            ends: Vec::with_capacity(capacity),
            first_line: 0,
        }
    }

    fn recycle(&mut self) {
        self.text.clear();
        self.ends.clear();
        self.first_line = 0;
    }

    fn len(&self) -> usize {
        self.ends.len()
    }
}

// ============================================================================
//  PartialBatch
// ============================================================================

/// Lines routed on their leading component, each with its input line number.
///
/// Lines are no longer consecutive once routed, so numbers are kept per line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialBatch {
    lines: LineBatch,
    line_nos: Vec<u64>,
    firsts: Vec<u8>,
    rest_at: Vec<usize>,
}

impl PartialBatch {
    /// Append `line` (input line `line_no`) whose leading component decoded
    /// to `partial`. `partial.rest` must be a suffix of `line`.
    pub fn push(&mut self, line_no: u64, line: &str, partial: PartialAddress<'_>) {
        debug_assert!(line.ends_with(partial.rest), "rest is not a suffix of line");
        self.lines.push(line);
        self.line_nos.push(line_no);
        self.firsts.push(partial.first);
        self.rest_at.push(line.len() - partial.rest.len());
    }

    /// Number of lines held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.line_nos.len()
    }

    /// Whether no lines are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.line_nos.is_empty()
    }

    /// `(line number, full line, partial decode)` in push order.
    pub fn entries(&self) -> impl Iterator<Item = (u64, &str, PartialAddress<'_>)> + '_ {
        self.lines
            .lines()
            .zip(&self.line_nos)
            .zip(self.firsts.iter().zip(&self.rest_at))
            .map(|((line, &line_no), (&first, &at))| {
                let rest = line.get(at..).unwrap_or_default();
                (line_no, line, PartialAddress { first, rest })
            })
    }
}

impl Recycle for PartialBatch {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: LineBatch::with_capacity(capacity),
            line_nos: Vec::with_capacity(capacity),
            firsts: Vec::with_capacity(capacity),
            rest_at: Vec::with_capacity(capacity),
        }
    }

    fn recycle(&mut self) {
        self.lines.recycle();
        self.line_nos.clear();
        self.firsts.clear();
        self.rest_at.clear();
    }

    fn len(&self) -> usize {
        self.line_nos.len()
    }
}
