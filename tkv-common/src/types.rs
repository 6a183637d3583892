//! # Record and Option Types
//!
//! Write-side records (`Mutation`, `MutationBatch`), read-side records
//! (`KeyValue`), authorization sets, and the option structs passed when
//! creating writers and scanners.
//!
//! ## Design Principles
//!
//! 1. **Encode at Construction**: Every dual-form field becomes canonical bytes
//!    as soon as the record is built; records are immutable afterwards.
//! 2. **Row Grouping**: Batches group updates by row in first-appearance order,
//!    which is how the proxy expects a batch append.
//! 3. **Traceable Rejections**: A batch remembers where each update came from so
//!    server-side rejections map back to the caller's mutations.
//!
//! ## Batch Layout Example
//!
//! ```text
//! mutations: [r1/a, r2/b, r1/c]
//!
//! MutationBatch
//!   ├── RowUpdates { row: r1, updates: [a, c] }
//!   └── RowUpdates { row: r2, updates: [b] }
//! origins (flattened order -> caller index): [0, 2, 1]
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use bytes::Bytes;
use serde::Deserialize;

use crate::codec::{encode, DualValue, DualView};
use crate::range::{Range, ScanColumn};

/// A single-row write or delete targeting one column coordinate.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Mutation {
    row: Bytes,
    column_family: Bytes,
    column_qualifier: Bytes,
    visibility: Bytes,
    timestamp: Option<i64>,
    value: Bytes,
    delete: bool,
}

impl Mutation {
    /// Creates a put with an empty value and no visibility or timestamp.
    pub fn new(
        row: impl Into<DualValue>,
        cf: impl Into<DualValue>,
        cq: impl Into<DualValue>,
    ) -> Self {
        Mutation {
            row: encode(row),
            column_family: encode(cf),
            column_qualifier: encode(cq),
            visibility: Bytes::new(),
            timestamp: None,
            value: Bytes::new(),
            delete: false,
        }
    }

    /// Sets the cell value.
    pub fn value(mut self, value: impl Into<DualValue>) -> Self {
        self.value = encode(value);
        self
    }

    /// Sets the visibility label expression.
    pub fn visibility(mut self, visibility: impl Into<DualValue>) -> Self {
        self.visibility = encode(visibility);
        self
    }

    /// Sets an explicit timestamp.
    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Marks the mutation as a delete. The value is ignored server-side.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    pub fn row_bytes(&self) -> &Bytes {
        &self.row
    }

    pub fn column_family_bytes(&self) -> &Bytes {
        &self.column_family
    }

    pub fn column_qualifier_bytes(&self) -> &Bytes {
        &self.column_qualifier
    }

    pub fn visibility_bytes(&self) -> &Bytes {
        &self.visibility
    }

    pub fn timestamp_value(&self) -> Option<i64> {
        self.timestamp
    }

    pub fn value_bytes(&self) -> &Bytes {
        &self.value
    }

    pub fn is_delete(&self) -> bool {
        self.delete
    }

    fn column_update(&self) -> ColumnUpdate {
        ColumnUpdate {
            column_family: self.column_family.clone(),
            column_qualifier: self.column_qualifier.clone(),
            visibility: self.visibility.clone(),
            timestamp: self.timestamp,
            value: self.value.clone(),
            delete: self.delete,
        }
    }
}

impl fmt::Debug for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("row", &String::from_utf8_lossy(&self.row))
            .field("cf", &String::from_utf8_lossy(&self.column_family))
            .field("cq", &String::from_utf8_lossy(&self.column_qualifier))
            .field("visibility", &String::from_utf8_lossy(&self.visibility))
            .field("timestamp", &self.timestamp)
            .field("value", &String::from_utf8_lossy(&self.value))
            .field("delete", &self.delete)
            .finish()
    }
}

/// Column-level part of a mutation, as sent inside a row group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnUpdate {
    pub column_family: Bytes,
    pub column_qualifier: Bytes,
    pub visibility: Bytes,
    pub timestamp: Option<i64>,
    pub value: Bytes,
    pub delete: bool,
}

/// All updates for one row within a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowUpdates {
    pub row: Bytes,
    pub updates: Vec<ColumnUpdate>,
}

/// Encoded batch-append payload built from a sequence of mutations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationBatch {
    rows: Vec<RowUpdates>,
    // Flattened update position -> index into the caller's mutation list.
    origins: Vec<usize>,
}

impl MutationBatch {
    /// Groups mutations by row, keeping first-appearance order.
    pub fn new(mutations: &[Mutation]) -> Self {
        let mut rows: Vec<RowUpdates> = Vec::new();
        let mut row_index: HashMap<Bytes, usize> = HashMap::new();
        let mut grouped: Vec<Vec<usize>> = Vec::new();

        for (idx, mutation) in mutations.iter().enumerate() {
            let slot = *row_index.entry(mutation.row.clone()).or_insert_with(|| {
                rows.push(RowUpdates {
                    row: mutation.row.clone(),
                    updates: Vec::new(),
                });
                grouped.push(Vec::new());
                rows.len() - 1
            });
            rows[slot].updates.push(mutation.column_update());
            grouped[slot].push(idx);
        }

        MutationBatch {
            rows,
            origins: grouped.into_iter().flatten().collect(),
        }
    }

    /// Row groups in send order.
    pub fn rows(&self) -> &[RowUpdates] {
        &self.rows
    }

    /// Total number of column updates.
    pub fn len(&self) -> usize {
        self.origins.len()
    }

    /// Returns true when the batch carries no updates.
    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    /// Maps a flattened update position back to the caller's mutation index.
    pub fn origin(&self, position: usize) -> Option<usize> {
        self.origins.get(position).copied()
    }

    /// Selects the caller's mutations named by flattened `positions`.
    ///
    /// Unknown positions are ignored; the result keeps caller order.
    pub fn rejected(&self, mutations: &[Mutation], positions: &[usize]) -> Vec<Mutation> {
        let picked: BTreeSet<usize> = positions
            .iter()
            .filter_map(|&position| self.origin(position))
            .collect();
        picked
            .into_iter()
            .filter_map(|idx| mutations.get(idx).cloned())
            .collect()
    }
}

/// Immutable set of canonical authorization labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct AuthorizationSet {
    labels: BTreeSet<Bytes>,
}

impl AuthorizationSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        AuthorizationSet::default()
    }

    /// Returns true when the encoded label is present.
    pub fn contains(&self, label: impl Into<DualValue>) -> bool {
        let label = label.into();
        self.labels.contains(label.as_bytes())
    }

    /// Labels present in either set.
    pub fn union(&self, other: &AuthorizationSet) -> AuthorizationSet {
        AuthorizationSet {
            labels: self.labels.union(&other.labels).cloned().collect(),
        }
    }

    /// Labels present in both sets.
    pub fn intersection(&self, other: &AuthorizationSet) -> AuthorizationSet {
        AuthorizationSet {
            labels: self.labels.intersection(&other.labels).cloned().collect(),
        }
    }

    /// Iterates labels in byte order.
    pub fn iter(&self) -> impl Iterator<Item = &Bytes> {
        self.labels.iter()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl<V: Into<DualValue>> FromIterator<V> for AuthorizationSet {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        AuthorizationSet {
            labels: iter.into_iter().map(encode).collect(),
        }
    }
}

/// Server-side iterator attached to a scan.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IteratorSetting {
    pub priority: i32,
    pub name: String,
    pub iterator_class: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

/// Java class of the proxy's whole-row iterator.
pub const WHOLE_ROW_ITERATOR_CLASS: &str = "org.apache.accumulo.core.iterators.user.WholeRowIterator";

impl IteratorSetting {
    /// Creates a setting without properties.
    pub fn new(priority: i32, name: impl Into<String>, iterator_class: impl Into<String>) -> Self {
        IteratorSetting {
            priority,
            name: name.into(),
            iterator_class: iterator_class.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Adds one property.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Packs each row into a single record; decode with `WholeRow`.
    pub fn whole_row(priority: i32) -> Self {
        IteratorSetting::new(priority, "WholeRowIterator", WHOLE_ROW_ITERATOR_CLASS)
    }
}

/// Timestamp policy for a new table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeType {
    Logical,
    #[default]
    Millis,
}

impl TimeType {
    /// Wire code used by the proxy.
    pub fn code(self) -> i64 {
        match self {
            TimeType::Logical => 0,
            TimeType::Millis => 1,
        }
    }
}

/// Durability level requested for a writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Durability {
    #[default]
    Default,
    None,
    Log,
    Flush,
    Sync,
}

impl Durability {
    /// Wire code used by the proxy.
    pub fn code(self) -> i64 {
        match self {
            Durability::Default => 0,
            Durability::None => 1,
            Durability::Log => 2,
            Durability::Flush => 3,
            Durability::Sync => 4,
        }
    }
}

/// Options for a single-range scanner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOptions {
    pub authorizations: Option<AuthorizationSet>,
    pub columns: Option<Vec<ScanColumn>>,
    pub iterators: Option<Vec<IteratorSetting>>,
    pub range: Option<Range>,
    pub buffer_size: Option<usize>,
}

impl ScanOptions {
    pub fn with_range(mut self, range: Range) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_authorizations(mut self, authorizations: AuthorizationSet) -> Self {
        self.authorizations = Some(authorizations);
        self
    }

    pub fn with_column(mut self, column: ScanColumn) -> Self {
        self.columns.get_or_insert_with(Vec::new).push(column);
        self
    }

    pub fn with_iterator(mut self, setting: IteratorSetting) -> Self {
        self.iterators.get_or_insert_with(Vec::new).push(setting);
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size);
        self
    }
}

/// Options for a multi-range batch scanner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchScanOptions {
    pub authorizations: Option<AuthorizationSet>,
    pub columns: Option<Vec<ScanColumn>>,
    pub iterators: Option<Vec<IteratorSetting>>,
    pub ranges: Option<Vec<Range>>,
    pub threads: Option<u32>,
}

impl BatchScanOptions {
    pub fn with_range(mut self, range: Range) -> Self {
        self.ranges.get_or_insert_with(Vec::new).push(range);
        self
    }

    pub fn with_authorizations(mut self, authorizations: AuthorizationSet) -> Self {
        self.authorizations = Some(authorizations);
        self
    }

    pub fn with_column(mut self, column: ScanColumn) -> Self {
        self.columns.get_or_insert_with(Vec::new).push(column);
        self
    }

    pub fn with_iterator(mut self, setting: IteratorSetting) -> Self {
        self.iterators.get_or_insert_with(Vec::new).push(setting);
        self
    }

    pub fn with_threads(mut self, threads: u32) -> Self {
        self.threads = Some(threads);
        self
    }
}

/// Options for a batch writer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterOptions {
    pub max_memory: Option<u64>,
    pub latency_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub threads: Option<u32>,
    pub durability: Option<Durability>,
}

/// A decoded scan record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    row: DualView,
    column_family: DualView,
    column_qualifier: DualView,
    visibility: DualView,
    timestamp: i64,
    value: DualView,
}

impl KeyValue {
    /// Builds a record from wire bytes.
    pub fn new(
        row: Bytes,
        column_family: Bytes,
        column_qualifier: Bytes,
        visibility: Bytes,
        timestamp: i64,
        value: Bytes,
    ) -> Self {
        KeyValue {
            row: row.into(),
            column_family: column_family.into(),
            column_qualifier: column_qualifier.into(),
            visibility: visibility.into(),
            timestamp,
            value: value.into(),
        }
    }

    pub fn row(&self) -> &DualView {
        &self.row
    }

    pub fn column_family(&self) -> &DualView {
        &self.column_family
    }

    pub fn column_qualifier(&self) -> &DualView {
        &self.column_qualifier
    }

    pub fn visibility(&self) -> &DualView {
        &self.visibility
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn value(&self) -> &DualView {
        &self.value
    }
}
