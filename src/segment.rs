//! Hash-prefix partitioning of the `00..ff` key space into contiguous segments.

use crate::error::{ExportError, ExportResult};
use serde::Serialize;

/// Number of distinct two-hex-digit prefixes.
pub const KEY_SPACE: usize = 256;

/// End boundary of the last segment: one past `ff`.
pub const END_SENTINEL: &str = "100";

/// One contiguous range of key prefixes `[start_key, end_key)`.
/// The last segment carries `END_SENTINEL` and includes every `ff…` key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Segment {
    pub index: usize,
    pub start_key: String,
    pub end_key: String,
}

/// Upper key bound used by row sources when filtering one segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpperBound<'a> {
    /// `key < bound`
    Exclusive(&'a str),
    /// No upper bound (last segment).
    Unbounded,
}

impl Segment {
    #[inline]
    pub fn is_last(&self) -> bool {
        self.end_key == END_SENTINEL
    }

    pub fn upper_bound(&self) -> UpperBound<'_> {
        if self.is_last() {
            UpperBound::Unbounded
        } else {
            UpperBound::Exclusive(&self.end_key)
        }
    }

    /// Membership by lexicographic comparison of the full key against the
    /// two-character boundaries; the same predicate row sources apply.
    pub fn contains(&self, key: &str) -> bool {
        if key < self.start_key.as_str() {
            return false;
        }
        match self.upper_bound() {
            UpperBound::Exclusive(end) => key < end,
            UpperBound::Unbounded => true,
        }
    }
}

fn ordinal_to_hex(val: usize) -> String {
    if val >= KEY_SPACE {
        END_SENTINEL.to_string()
    } else {
        format!("{:02x}", val)
    }
}

/// Parse a two-digit hex boundary (or the sentinel) back into its ordinal.
pub fn hex_to_ordinal(hex: &str) -> ExportResult<usize> {
    usize::from_str_radix(hex, 16)
        .ok()
        .filter(|v| *v <= KEY_SPACE)
        .ok_or_else(|| ExportError::InvalidArgument(format!("invalid hex boundary: {hex}")))
}

fn check_count(n: usize) -> ExportResult<()> {
    if n == 0 || n > KEY_SPACE {
        return Err(ExportError::InvalidArgument(format!(
            "segment count must be in [1, {KEY_SPACE}], got {n}"
        )));
    }
    Ok(())
}

/// Ordinal bounds of segment `i` of `n`: the first `256 % n` segments get one extra unit.
fn ordinal_range(i: usize, n: usize) -> (usize, usize) {
    let size = KEY_SPACE / n;
    let remainder = KEY_SPACE % n;
    let start = i * size + i.min(remainder);
    let end = start + size + usize::from(i < remainder);
    (start, end)
}

/// Split the key space into `n` remainder-balanced segments.
pub fn partition(n: usize) -> ExportResult<Vec<Segment>> {
    check_count(n)?;
    (0..n).map(|i| segment_for_index(i, n)).collect()
}

/// Compute segment `i` of `n` without materializing the full list.
pub fn segment_for_index(i: usize, n: usize) -> ExportResult<Segment> {
    check_count(n)?;
    if i >= n {
        return Err(ExportError::InvalidArgument(format!(
            "segment index {i} out of range [0, {n})"
        )));
    }
    let (start, end) = ordinal_range(i, n);
    Ok(Segment {
        index: i,
        start_key: ordinal_to_hex(start),
        end_key: ordinal_to_hex(end),
    })
}
