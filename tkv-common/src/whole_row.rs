//! # Whole-Row Records
//!
//! Scans that attach `IteratorSetting::whole_row` receive one record per row
//! whose value packs every column of that row. This module unpacks it.
//!
//! ```text
//! value := count:i32 column*count
//! column := len:i32 cf | len:i32 cq | len:i32 visibility | timestamp:i64 | len:i32 value
//! ```
//!
//! All integers are big-endian and signed.

use bytes::{Buf, Bytes};

use crate::codec::DualView;
use crate::error::{CodecError, CodecResult};
use crate::types::KeyValue;

/// One column unpacked from a whole-row value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowColumn {
    pub column_family: DualView,
    pub column_qualifier: DualView,
    pub visibility: DualView,
    pub timestamp: i64,
    pub value: DualView,
}

/// A row and all of its columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WholeRow {
    pub row: DualView,
    pub columns: Vec<RowColumn>,
}

impl WholeRow {
    /// Unpacks a record produced by the whole-row iterator.
    pub fn decode(record: &KeyValue) -> CodecResult<Self> {
        Ok(WholeRow {
            row: record.row().clone(),
            columns: decode_columns(record.value().to_bytes())?,
        })
    }
}

/// Unpacks the columns of a whole-row value.
pub fn decode_columns(data: impl Into<Bytes>) -> CodecResult<Vec<RowColumn>> {
    let mut buf: Bytes = data.into();
    let count = read_len(&mut buf)?;
    // Cap the preallocation: the count comes off the wire.
    let mut columns = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let column_family = read_field(&mut buf)?;
        let column_qualifier = read_field(&mut buf)?;
        let visibility = read_field(&mut buf)?;
        if buf.remaining() < 8 {
            return Err(CodecError::Malformed("truncated timestamp"));
        }
        let timestamp = buf.get_i64();
        let value = read_field(&mut buf)?;
        columns.push(RowColumn {
            column_family,
            column_qualifier,
            visibility,
            timestamp,
            value,
        });
    }
    Ok(columns)
}

fn read_len(buf: &mut Bytes) -> CodecResult<usize> {
    if buf.remaining() < 4 {
        return Err(CodecError::Malformed("truncated length"));
    }
    let len = buf.get_i32();
    if len < 0 {
        return Err(CodecError::Malformed("negative length"));
    }
    Ok(len as usize)
}

fn read_field(buf: &mut Bytes) -> CodecResult<DualView> {
    let len = read_len(buf)?;
    if buf.remaining() < len {
        return Err(CodecError::Malformed("truncated field"));
    }
    Ok(DualView::new(buf.split_to(len)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn put_field(out: &mut Vec<u8>, data: &[u8]) {
        out.put_i32(data.len() as i32);
        out.put_slice(data);
    }

    fn packed(columns: &[(&[u8], &[u8], &[u8], i64, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        out.put_i32(columns.len() as i32);
        for (cf, cq, vis, ts, value) in columns {
            put_field(&mut out, cf);
            put_field(&mut out, cq);
            put_field(&mut out, vis);
            out.put_i64(*ts);
            put_field(&mut out, value);
        }
        out
    }

    #[test]
    fn decodes_packed_columns() {
        let data = packed(&[(b"loc", b"x", b"", 10, b"34"), (b"loc", b"y", b"pub", -1, b"\xff")]);
        let columns = decode_columns(data).unwrap();
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].column_family.as_text().unwrap(), "loc");
        assert_eq!(columns[0].value.as_text().unwrap(), "34");
        assert_eq!(columns[0].timestamp, 10);
        assert_eq!(columns[1].visibility.as_bytes(), b"pub");
        assert_eq!(columns[1].timestamp, -1);
        assert!(columns[1].value.as_text().is_err());
    }

    #[test]
    fn decodes_whole_row_record() {
        let value = packed(&[(b"cf", b"cq", b"", 5, b"v")]);
        let record = KeyValue::new(
            Bytes::from_static(b"User.1"),
            Bytes::new(),
            Bytes::new(),
            Bytes::new(),
            0,
            Bytes::from(value),
        );
        let row = WholeRow::decode(&record).unwrap();
        assert_eq!(row.row.as_text().unwrap(), "User.1");
        assert_eq!(row.columns[0].column_qualifier.as_bytes(), b"cq");
    }

    #[test]
    fn empty_row_has_no_columns() {
        assert!(decode_columns(packed(&[])).unwrap().is_empty());
    }

    #[test]
    fn truncated_input_is_malformed() {
        let mut data = packed(&[(b"cf", b"cq", b"", 5, b"value")]);
        data.truncate(data.len() - 2);
        assert_eq!(decode_columns(data), Err(CodecError::Malformed("truncated field")));
        assert_eq!(decode_columns(vec![0u8, 0]), Err(CodecError::Malformed("truncated length")));
    }

    #[test]
    fn negative_length_is_malformed() {
        let mut data = Vec::new();
        data.put_i32(1);
        data.put_i32(-4);
        assert_eq!(decode_columns(data), Err(CodecError::Malformed("negative length")));
    }
}
