//! # Proxy Wire Mapping
//!
//! Maps record and option types onto RESP values and back. Absent optional
//! fields travel as null bulk strings; booleans as 0/1 integers.
//!
//! ```text
//! key      := [row, cf|nil, cq|nil, vis|nil, ts|nil]
//! range    := [key|nil, start_inclusive, key|nil, end_inclusive]
//! update   := [cf, cq, vis, ts|nil, value, delete]
//! batch    := [[row, [update...]]...]
//! record   := [[row, cf, cq, vis, ts], value]
//! scan     := [[record...], more]
//! ```

use bytes::Bytes;

use tkv_common::{
    AuthorizationSet, BatchScanOptions, ColumnUpdate, IteratorSetting, Key, KeyValue, MutationBatch, Range,
    ScanColumn, ScanOptions, WriterOptions,
};

use crate::error::{ClientError, ClientResult};
use crate::proxy::{ResourceId, ScanBatch};
use crate::resp::RespValue;

/// Error replies starting with this word mean the secret was rejected.
const AUTH_ERROR_PREFIX: &[u8] = b"AUTH";

fn opt_bytes(value: Option<&Bytes>) -> RespValue {
    match value {
        Some(data) => RespValue::bulk(data),
        None => RespValue::null(),
    }
}

fn opt_int(value: Option<i64>) -> RespValue {
    match value {
        Some(value) => RespValue::Integer(value),
        None => RespValue::null(),
    }
}

fn opt_list<T>(items: Option<&Vec<T>>, encode: impl Fn(&T) -> RespValue) -> RespValue {
    match items {
        Some(items) => RespValue::Array(items.iter().map(encode).collect()),
        None => RespValue::null(),
    }
}

pub fn key(key: &Key) -> RespValue {
    RespValue::Array(vec![
        RespValue::bulk(&key.row),
        opt_bytes(key.column_family.as_ref()),
        opt_bytes(key.column_qualifier.as_ref()),
        opt_bytes(key.visibility.as_ref()),
        opt_int(key.timestamp),
    ])
}

pub fn range(range: &Range) -> RespValue {
    RespValue::Array(vec![
        range.start.as_ref().map(key).unwrap_or_else(RespValue::null),
        RespValue::boolean(range.start_inclusive),
        range.end.as_ref().map(key).unwrap_or_else(RespValue::null),
        RespValue::boolean(range.end_inclusive),
    ])
}

pub fn scan_column(column: &ScanColumn) -> RespValue {
    RespValue::Array(vec![RespValue::bulk(&column.family), opt_bytes(column.qualifier.as_ref())])
}

pub fn iterator_setting(setting: &IteratorSetting) -> RespValue {
    let mut properties = Vec::with_capacity(setting.properties.len() * 2);
    for (name, value) in &setting.properties {
        properties.push(RespValue::bulk(name.as_bytes()));
        properties.push(RespValue::bulk(value.as_bytes()));
    }
    RespValue::Array(vec![
        RespValue::Integer(setting.priority as i64),
        RespValue::bulk(setting.name.as_bytes()),
        RespValue::bulk(setting.iterator_class.as_bytes()),
        RespValue::Array(properties),
    ])
}

pub fn authorizations(auths: &AuthorizationSet) -> RespValue {
    RespValue::Array(auths.iter().map(|label| RespValue::bulk(label)).collect())
}

fn opt_authorizations(auths: Option<&AuthorizationSet>) -> RespValue {
    auths.map(authorizations).unwrap_or_else(RespValue::null)
}

pub fn scan_options(opts: &ScanOptions) -> RespValue {
    RespValue::Array(vec![
        opt_authorizations(opts.authorizations.as_ref()),
        opt_list(opts.columns.as_ref(), scan_column),
        opt_list(opts.iterators.as_ref(), iterator_setting),
        opts.range.as_ref().map(range).unwrap_or_else(RespValue::null),
        opt_int(opts.buffer_size.map(|size| size as i64)),
    ])
}

pub fn batch_scan_options(opts: &BatchScanOptions) -> RespValue {
    RespValue::Array(vec![
        opt_authorizations(opts.authorizations.as_ref()),
        opt_list(opts.columns.as_ref(), scan_column),
        opt_list(opts.iterators.as_ref(), iterator_setting),
        opt_list(opts.ranges.as_ref(), range),
        opt_int(opts.threads.map(i64::from)),
    ])
}

pub fn writer_options(opts: &WriterOptions) -> RespValue {
    RespValue::Array(vec![
        opt_int(opts.max_memory.map(|value| value as i64)),
        opt_int(opts.latency_ms.map(|value| value as i64)),
        opt_int(opts.timeout_ms.map(|value| value as i64)),
        opt_int(opts.threads.map(i64::from)),
        opt_int(opts.durability.map(|durability| durability.code())),
    ])
}

fn column_update(update: &ColumnUpdate) -> RespValue {
    RespValue::Array(vec![
        RespValue::bulk(&update.column_family),
        RespValue::bulk(&update.column_qualifier),
        RespValue::bulk(&update.visibility),
        opt_int(update.timestamp),
        RespValue::bulk(&update.value),
        RespValue::boolean(update.delete),
    ])
}

pub fn mutation_batch(batch: &MutationBatch) -> RespValue {
    RespValue::Array(
        batch
            .rows()
            .iter()
            .map(|row| {
                RespValue::Array(vec![
                    RespValue::bulk(&row.row),
                    RespValue::Array(row.updates.iter().map(column_update).collect()),
                ])
            })
            .collect(),
    )
}

/// Maps an error reply onto the client error taxonomy.
pub fn server_error(message: Vec<u8>) -> ClientError {
    if message.starts_with(AUTH_ERROR_PREFIX) {
        return ClientError::Authentication(String::from_utf8_lossy(&message).into_owned());
    }
    ClientError::Server { message }
}

pub fn expect_ok(value: RespValue) -> ClientResult<()> {
    match value {
        RespValue::Simple(_) => Ok(()),
        _ => Err(ClientError::UnexpectedResponse),
    }
}

pub fn decode_bool(value: RespValue) -> ClientResult<bool> {
    match value {
        RespValue::Integer(0) => Ok(false),
        RespValue::Integer(1) => Ok(true),
        _ => Err(ClientError::UnexpectedResponse),
    }
}

pub fn decode_id(value: RespValue) -> ClientResult<ResourceId> {
    let raw = match value {
        RespValue::Bulk(Some(data)) | RespValue::Simple(data) => data,
        _ => return Err(ClientError::UnexpectedResponse),
    };
    String::from_utf8(raw).map_err(|_| ClientError::Protocol)
}

pub fn decode_authorizations(value: RespValue) -> ClientResult<AuthorizationSet> {
    let items = expect_array(value)?;
    let mut labels = Vec::with_capacity(items.len());
    for item in items {
        labels.push(expect_bulk(item)?);
    }
    Ok(labels.into_iter().collect())
}

pub fn decode_rejected(value: RespValue) -> ClientResult<Vec<usize>> {
    expect_array(value)?
        .into_iter()
        .map(|item| match item {
            RespValue::Integer(position) if position >= 0 => Ok(position as usize),
            _ => Err(ClientError::UnexpectedResponse),
        })
        .collect()
}

pub fn decode_scan_batch(value: RespValue) -> ClientResult<ScanBatch> {
    let mut parts = expect_array(value)?.into_iter();
    let (records, more) = match (parts.next(), parts.next(), parts.next()) {
        (Some(records), Some(more), None) => (records, more),
        _ => return Err(ClientError::UnexpectedResponse),
    };
    let results = expect_array(records)?
        .into_iter()
        .map(decode_key_value)
        .collect::<ClientResult<Vec<_>>>()?;
    Ok(ScanBatch {
        results,
        more: decode_bool(more)?,
    })
}

fn decode_key_value(value: RespValue) -> ClientResult<KeyValue> {
    let mut parts = expect_array(value)?.into_iter();
    let (key, value) = match (parts.next(), parts.next(), parts.next()) {
        (Some(key), Some(value), None) => (key, value),
        _ => return Err(ClientError::UnexpectedResponse),
    };

    let mut fields = expect_array(key)?.into_iter();
    let mut next_bulk = || match fields.next() {
        Some(field) => expect_bulk(field),
        None => Err(ClientError::UnexpectedResponse),
    };
    let row = next_bulk()?;
    let column_family = next_bulk()?;
    let column_qualifier = next_bulk()?;
    let visibility = next_bulk()?;
    let timestamp = match (fields.next(), fields.next()) {
        (Some(RespValue::Integer(timestamp)), None) => timestamp,
        _ => return Err(ClientError::UnexpectedResponse),
    };

    Ok(KeyValue::new(
        row,
        column_family,
        column_qualifier,
        visibility,
        timestamp,
        expect_bulk(value)?,
    ))
}

fn expect_array(value: RespValue) -> ClientResult<Vec<RespValue>> {
    match value {
        RespValue::Array(items) => Ok(items),
        _ => Err(ClientError::UnexpectedResponse),
    }
}

fn expect_bulk(value: RespValue) -> ClientResult<Bytes> {
    match value {
        RespValue::Bulk(Some(data)) => Ok(Bytes::from(data)),
        _ => Err(ClientError::UnexpectedResponse),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tkv_common::{Durability, Mutation};

    fn bulk(data: &[u8]) -> RespValue {
        RespValue::bulk(data)
    }

    fn record(row: &[u8], value: &[u8]) -> RespValue {
        RespValue::Array(vec![
            RespValue::Array(vec![bulk(row), bulk(b"cf"), bulk(b"cq"), bulk(b""), RespValue::Integer(9)]),
            bulk(value),
        ])
    }

    #[test]
    fn encodes_partial_key_with_nulls() {
        let encoded = key(&Key::new("r").family("cf"));
        assert_eq!(
            encoded,
            RespValue::Array(vec![
                bulk(b"r"),
                bulk(b"cf"),
                RespValue::null(),
                RespValue::null(),
                RespValue::null(),
            ])
        );
    }

    #[test]
    fn encodes_open_ended_prefix_range() {
        let encoded = range(&Range::prefix(b"\xff"));
        let RespValue::Array(parts) = encoded else {
            panic!("expected array");
        };
        assert_eq!(parts[1], RespValue::Integer(1));
        assert_eq!(parts[2], RespValue::null());
        assert_eq!(parts[3], RespValue::Integer(0));
    }

    #[test]
    fn encodes_batch_grouped_by_row() {
        let mutations = vec![
            Mutation::new("User.1", "loc", "x").value("34"),
            Mutation::new("User.2", "loc", "x").timestamp(5).delete(),
        ];
        let encoded = mutation_batch(&MutationBatch::new(&mutations));
        let expected = RespValue::Array(vec![
            RespValue::Array(vec![
                bulk(b"User.1"),
                RespValue::Array(vec![RespValue::Array(vec![
                    bulk(b"loc"),
                    bulk(b"x"),
                    bulk(b""),
                    RespValue::null(),
                    bulk(b"34"),
                    RespValue::Integer(0),
                ])]),
            ]),
            RespValue::Array(vec![
                bulk(b"User.2"),
                RespValue::Array(vec![RespValue::Array(vec![
                    bulk(b"loc"),
                    bulk(b"x"),
                    bulk(b""),
                    RespValue::Integer(5),
                    bulk(b""),
                    RespValue::Integer(1),
                ])]),
            ]),
        ]);
        assert_eq!(encoded, expected);
    }

    #[test]
    fn encodes_options_with_absent_fields() {
        let encoded = scan_options(&ScanOptions::default());
        assert_eq!(encoded, RespValue::Array(vec![RespValue::null(); 5]));

        let opts = WriterOptions {
            threads: Some(2),
            durability: Some(Durability::Sync),
            ..WriterOptions::default()
        };
        let RespValue::Array(parts) = writer_options(&opts) else {
            panic!("expected array");
        };
        assert_eq!(parts[3], RespValue::Integer(2));
        assert_eq!(parts[4], RespValue::Integer(4));
    }

    #[test]
    fn encodes_iterator_properties_as_pairs() {
        let setting = IteratorSetting::new(10, "vers", "org.example.V").property("max", "3");
        let RespValue::Array(parts) = iterator_setting(&setting) else {
            panic!("expected array");
        };
        assert_eq!(parts[0], RespValue::Integer(10));
        assert_eq!(parts[3], RespValue::Array(vec![bulk(b"max"), bulk(b"3")]));
    }

    #[test]
    fn decodes_scan_batch() {
        let reply = RespValue::Array(vec![
            RespValue::Array(vec![record(b"a", b"1"), record(b"b", b"\xff")]),
            RespValue::Integer(1),
        ]);
        let batch = decode_scan_batch(reply).unwrap();
        assert!(batch.more);
        assert_eq!(batch.results.len(), 2);
        assert_eq!(batch.results[0].row().as_text().unwrap(), "a");
        assert_eq!(batch.results[1].value().as_bytes(), b"\xff");
        assert_eq!(batch.results[1].timestamp(), 9);
    }

    #[test]
    fn rejects_malformed_records() {
        let reply = RespValue::Array(vec![
            RespValue::Array(vec![RespValue::Array(vec![RespValue::Array(vec![bulk(b"a")]), bulk(b"1")])]),
            RespValue::Integer(0),
        ]);
        assert!(matches!(decode_scan_batch(reply), Err(ClientError::UnexpectedResponse)));
        assert!(matches!(decode_bool(RespValue::Integer(2)), Err(ClientError::UnexpectedResponse)));
    }

    #[test]
    fn rejects_keys_with_trailing_fields() {
        let key = RespValue::Array(vec![
            bulk(b"a"),
            bulk(b"cf"),
            bulk(b"cq"),
            bulk(b""),
            RespValue::Integer(9),
            bulk(b"extra"),
        ]);
        let reply = RespValue::Array(vec![
            RespValue::Array(vec![RespValue::Array(vec![key, bulk(b"1")])]),
            RespValue::Integer(0),
        ]);
        assert!(matches!(decode_scan_batch(reply), Err(ClientError::UnexpectedResponse)));
    }

    #[test]
    fn decodes_authorizations_and_rejections() {
        let auths = decode_authorizations(RespValue::Array(vec![bulk(b"B"), bulk(b"A")])).unwrap();
        assert!(auths.contains("A") && auths.contains("B"));

        let rejected = decode_rejected(RespValue::Array(vec![RespValue::Integer(0), RespValue::Integer(2)])).unwrap();
        assert_eq!(rejected, vec![0, 2]);
        assert!(decode_rejected(RespValue::Array(vec![RespValue::Integer(-1)])).is_err());
    }

    #[test]
    fn maps_auth_errors() {
        assert!(matches!(server_error(b"AUTH bad secret".to_vec()), ClientError::Authentication(_)));
        assert!(matches!(server_error(b"ERR nope".to_vec()), ClientError::Server { .. }));
    }
}
