//! # Range and Selector Builders
//!
//! Purpose: Build scan boundaries (`Key`, `Range`) and column selectors
//! (`ScanColumn`) from dual-form input, on top of the record codec.
//!
//! ## Design Principles
//! 1. **Encode Once**: Every component is canonical bytes from construction on.
//! 2. **Partial Keys**: Trailing components may be absent; the server treats an
//!    absent component as "start of that level".
//! 3. **Minimal Successors**: Prefix ranges end at the smallest byte string
//!    strictly greater than every string carrying the prefix.
//!
//! ## Prefix Successor Example
//!
//! ```text
//! prefix      successor
//! b"row"   -> b"rox"
//! b"a\xff" -> b"b"        (overflowed trailing bytes are dropped)
//! b"\xff"  -> none        (open upper bound)
//! ```

use bytes::Bytes;

use crate::codec::{encode, DualValue};

/// A full or partial cell key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Key {
    pub row: Bytes,
    pub column_family: Option<Bytes>,
    pub column_qualifier: Option<Bytes>,
    pub visibility: Option<Bytes>,
    pub timestamp: Option<i64>,
}

impl Key {
    /// Creates a row-only key.
    pub fn new(row: impl Into<DualValue>) -> Self {
        Key {
            row: encode(row),
            ..Key::default()
        }
    }

    /// Sets the column family.
    pub fn family(mut self, cf: impl Into<DualValue>) -> Self {
        self.column_family = Some(encode(cf));
        self
    }

    /// Sets the column qualifier.
    pub fn qualifier(mut self, cq: impl Into<DualValue>) -> Self {
        self.column_qualifier = Some(encode(cq));
        self
    }

    /// Sets the visibility label expression.
    pub fn visibility(mut self, visibility: impl Into<DualValue>) -> Self {
        self.visibility = Some(encode(visibility));
        self
    }

    /// Sets the timestamp.
    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Key interval bounding a scan.
///
/// An absent bound is open. Defaults mirror the proxy: start inclusive, end
/// exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Range {
    pub start: Option<Key>,
    pub start_inclusive: bool,
    pub end: Option<Key>,
    pub end_inclusive: bool,
}

impl Default for Range {
    fn default() -> Self {
        Range {
            start: None,
            start_inclusive: true,
            end: None,
            end_inclusive: false,
        }
    }
}

impl Range {
    /// Creates a range from explicit bounds.
    pub fn new(start: Option<Key>, start_inclusive: bool, end: Option<Key>, end_inclusive: bool) -> Self {
        Range {
            start,
            start_inclusive,
            end,
            end_inclusive,
        }
    }

    /// Covers the whole table.
    pub fn all() -> Self {
        Range::default()
    }

    /// Starts at `key` (inclusive) with an open end.
    pub fn starting_at(key: Key) -> Self {
        Range {
            start: Some(key),
            ..Range::default()
        }
    }

    /// Matches exactly one row.
    pub fn exact(row: impl Into<DualValue>) -> Self {
        Self::exact_key(Key::new(row))
    }

    /// Matches exactly one column family within a row.
    pub fn exact_family(row: impl Into<DualValue>, cf: impl Into<DualValue>) -> Self {
        Self::exact_key(Key::new(row).family(cf))
    }

    /// Matches exactly one column within a row.
    pub fn exact_column(
        row: impl Into<DualValue>,
        cf: impl Into<DualValue>,
        cq: impl Into<DualValue>,
    ) -> Self {
        Self::exact_key(Key::new(row).family(cf).qualifier(cq))
    }

    fn exact_key(key: Key) -> Self {
        Range {
            start: Some(key.clone()),
            start_inclusive: true,
            end: Some(key),
            end_inclusive: true,
        }
    }

    /// Matches every row starting with `prefix`.
    ///
    /// An all-`0xFF` prefix has no successor and yields an open upper bound.
    pub fn prefix(prefix: impl Into<DualValue>) -> Self {
        let row = encode(prefix);
        let end = following_prefix(&row).map(Key::from_row);
        Range {
            start: Some(Key::from_row(row)),
            start_inclusive: true,
            end,
            end_inclusive: false,
        }
    }

    /// Matches every column family in `row` starting with `cf_prefix`.
    pub fn prefix_family(row: impl Into<DualValue>, cf_prefix: impl Into<DualValue>) -> Self {
        let row = encode(row);
        let cf = encode(cf_prefix);
        let end = match following_prefix(&cf) {
            Some(next) => Key::from_row(row.clone()).family(next),
            // Nothing follows the family prefix inside this row: stop at the next row.
            None => Key::from_row(following_key(&row)),
        };
        Range {
            start: Some(Key::from_row(row).family(cf)),
            start_inclusive: true,
            end: Some(end),
            end_inclusive: false,
        }
    }

    /// Matches every qualifier in `row`/`cf` starting with `cq_prefix`.
    pub fn prefix_column(
        row: impl Into<DualValue>,
        cf: impl Into<DualValue>,
        cq_prefix: impl Into<DualValue>,
    ) -> Self {
        let row = encode(row);
        let cf = encode(cf);
        let cq = encode(cq_prefix);
        let end = match following_prefix(&cq) {
            Some(next) => Key::from_row(row.clone()).family(cf.clone()).qualifier(next),
            None => Key::from_row(row.clone()).family(following_key(&cf)),
        };
        Range {
            start: Some(Key::from_row(row).family(cf).qualifier(cq)),
            start_inclusive: true,
            end: Some(end),
            end_inclusive: false,
        }
    }
}

impl Key {
    fn from_row(row: Bytes) -> Self {
        Key {
            row,
            ..Key::default()
        }
    }
}

/// Returns the smallest byte string greater than every string prefixed by
/// `prefix`, or `None` when the prefix is empty or all `0xFF`.
///
/// The last byte is incremented; `0xFF` bytes carry leftward and are dropped.
pub fn following_prefix(prefix: &[u8]) -> Option<Bytes> {
    let mut out = prefix.to_vec();
    while let Some(last) = out.pop() {
        if last != u8::MAX {
            out.push(last + 1);
            return Some(Bytes::from(out));
        }
    }
    None
}

/// Returns the immediate successor of `value` (the value plus a zero byte).
pub fn following_key(value: &[u8]) -> Bytes {
    let mut out = Vec::with_capacity(value.len() + 1);
    out.extend_from_slice(value);
    out.push(0);
    Bytes::from(out)
}

/// Column selector for scans.
///
/// A missing qualifier selects every qualifier of the family.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScanColumn {
    pub family: Bytes,
    pub qualifier: Option<Bytes>,
}

impl ScanColumn {
    /// Selects a whole column family.
    pub fn family(cf: impl Into<DualValue>) -> Self {
        ScanColumn {
            family: encode(cf),
            qualifier: None,
        }
    }

    /// Selects one column.
    pub fn new(cf: impl Into<DualValue>, cq: impl Into<DualValue>) -> Self {
        ScanColumn {
            family: encode(cf),
            qualifier: Some(encode(cq)),
        }
    }
}
