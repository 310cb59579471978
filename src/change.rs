//! Change detection between an upstream snapshot and the remote-store snapshot.
//!
//! Two contracts:
//! - [`detect_changes`] runs a full outer join on the composite identity key and
//!   keeps upstream rows the store has never seen (the change set).
//! - [`latest_timestamp_gate`] compares the latest `COLLECTION_END` on each side.
//!   Equality may short-circuit to "nothing to do"; any other answer must be
//!   confirmed by the full join.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::debug;

use crate::columns::{LEFT_SUFFIX, MERGE_INDICATOR, RIGHT_SUFFIX};
use crate::constants::columns::IDENTITY_COLUMNS;
use crate::data::{ColumnName, IdentityKey, Record, RecordSet, Value};

/// Join indicator value carried in the `_merge` column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MergeIndicator {
    /// Key present only upstream.
    LeftOnly,
    /// Key present only in the remote store.
    RightOnly,
    /// Key present on both sides.
    Both,
}

impl MergeIndicator {
    /// Wire spelling of the indicator.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MergeIndicator::LeftOnly => "left_only",
            MergeIndicator::RightOnly => "right_only",
            MergeIndicator::Both => "both",
        }
    }

    /// Parse the indicator from a joined row.
    pub fn of(record: &Record) -> Option<Self> {
        match record.get(MERGE_INDICATOR)?.as_text()? {
            "left_only" => Some(MergeIndicator::LeftOnly),
            "right_only" => Some(MergeIndicator::RightOnly),
            "both" => Some(MergeIndicator::Both),
            _ => None,
        }
    }
}

impl fmt::Display for MergeIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an outer join on the identity key.
///
/// Non-key columns present on both sides appear twice, suffixed `_x`
/// (upstream) and `_y` (remote). Every row carries a `_merge` indicator.
#[derive(Clone, Debug, PartialEq)]
pub struct JoinedTable {
    /// Output column order.
    pub columns: Vec<ColumnName>,
    /// Bare names of the columns that were suffixed.
    pub shared: Vec<ColumnName>,
    /// Joined rows: upstream order first, then remote-only rows in remote order.
    pub rows: Vec<Record>,
}

impl JoinedTable {
    /// Rows carrying `indicator`.
    pub fn rows_with(&self, indicator: MergeIndicator) -> impl Iterator<Item = &Record> {
        self.rows
            .iter()
            .filter(move |row| MergeIndicator::of(row) == Some(indicator))
    }

    /// Number of rows carrying `indicator`.
    pub fn count(&self, indicator: MergeIndicator) -> usize {
        self.rows_with(indicator).count()
    }
}

/// Upstream records absent from the remote store, still join-shaped.
///
/// Produced once per run by [`detect_changes`]; hand it to the column
/// reconciler by value.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeSet {
    /// Output column order inherited from the join.
    pub columns: Vec<ColumnName>,
    /// Bare names of suffixed columns.
    pub shared: Vec<ColumnName>,
    /// New rows in upstream order, one per identity key.
    pub rows: Vec<Record>,
}

impl ChangeSet {
    /// Number of new records.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when nothing is new.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Identity keys of the new records, in order.
    pub fn keys(&self) -> Vec<IdentityKey> {
        self.rows.iter().map(Record::identity_key).collect()
    }
}

/// Answer of the latest-timestamp short-circuit check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LatestCheck {
    /// Both sides end at the same instant; no action needed.
    NoActionNeeded { latest: DateTime<Utc> },
    /// Latest instants differ (or one side has none); run the full join.
    PossibleNewData {
        upstream: Option<DateTime<Utc>>,
        remote: Option<DateTime<Utc>>,
    },
}

impl LatestCheck {
    /// True when the full join may be skipped.
    pub fn is_no_action(&self) -> bool {
        matches!(self, LatestCheck::NoActionNeeded { .. })
    }
}

/// Compare the latest `COLLECTION_END` on each side.
pub fn latest_timestamp_gate(upstream: &RecordSet, remote: &RecordSet) -> LatestCheck {
    let upstream_latest = upstream.latest_collection_end();
    let remote_latest = remote.latest_collection_end();
    match (upstream_latest, remote_latest) {
        (Some(left), Some(right)) if left == right => LatestCheck::NoActionNeeded { latest: left },
        _ => LatestCheck::PossibleNewData {
            upstream: upstream_latest,
            remote: remote_latest,
        },
    }
}

/// Full outer join of `left` and `right` on the composite identity key.
pub fn outer_join(left: &RecordSet, right: &RecordSet) -> JoinedTable {
    let key_columns: Vec<&str> = IDENTITY_COLUMNS.iter().map(|key| key.as_str()).collect();
    let left_columns = left.column_names();
    let right_columns = right.column_names();

    let left_set: HashSet<&str> = left_columns.iter().map(String::as_str).collect();
    let right_set: HashSet<&str> = right_columns.iter().map(String::as_str).collect();
    let shared: Vec<ColumnName> = left_columns
        .iter()
        .filter(|column| right_set.contains(column.as_str()))
        .filter(|column| !key_columns.contains(&column.as_str()))
        .cloned()
        .collect();
    let is_shared = |column: &str| shared.iter().any(|name| name == column);

    let mut columns: Vec<ColumnName> = key_columns.iter().map(|key| key.to_string()).collect();
    for column in &left_columns {
        if key_columns.contains(&column.as_str()) {
            continue;
        }
        if is_shared(column) {
            columns.push(format!("{column}{LEFT_SUFFIX}"));
        } else {
            columns.push(column.clone());
        }
    }
    for column in &right_columns {
        if key_columns.contains(&column.as_str()) {
            continue;
        }
        if is_shared(column) {
            columns.push(format!("{column}{RIGHT_SUFFIX}"));
        } else if !left_set.contains(column.as_str()) {
            columns.push(column.clone());
        }
    }

    let mut index: HashMap<IdentityKey, Vec<usize>> = HashMap::new();
    for (position, record) in right.records.iter().enumerate() {
        index.entry(record.identity_key()).or_default().push(position);
    }

    let build_row = |keys_from: &Record,
                     left_row: Option<&Record>,
                     right_row: Option<&Record>,
                     indicator: MergeIndicator| {
        let mut row = Record::new();
        for key in &key_columns {
            row.insert(*key, keys_from.get(key).cloned().unwrap_or_default());
        }
        for column in &left_columns {
            if key_columns.contains(&column.as_str()) {
                continue;
            }
            let value = left_row
                .and_then(|record| record.get(column))
                .cloned()
                .unwrap_or_default();
            if is_shared(column) {
                row.insert(format!("{column}{LEFT_SUFFIX}"), value);
            } else {
                row.insert(column.clone(), value);
            }
        }
        for column in &right_columns {
            if key_columns.contains(&column.as_str())
                || (!is_shared(column) && left_set.contains(column.as_str()))
            {
                continue;
            }
            let value = right_row
                .and_then(|record| record.get(column))
                .cloned()
                .unwrap_or_default();
            if is_shared(column) {
                row.insert(format!("{column}{RIGHT_SUFFIX}"), value);
            } else {
                row.insert(column.clone(), value);
            }
        }
        row.insert(MERGE_INDICATOR, Value::Text(indicator.as_str().to_string()));
        row
    };

    let mut matched = vec![false; right.records.len()];
    let mut rows = Vec::with_capacity(left.records.len());
    for record in &left.records {
        match index.get(&record.identity_key()) {
            Some(positions) => {
                for &position in positions {
                    matched[position] = true;
                    rows.push(build_row(
                        record,
                        Some(record),
                        Some(&right.records[position]),
                        MergeIndicator::Both,
                    ));
                }
            }
            None => rows.push(build_row(record, Some(record), None, MergeIndicator::LeftOnly)),
        }
    }
    for (position, record) in right.records.iter().enumerate() {
        if !matched[position] {
            rows.push(build_row(record, None, Some(record), MergeIndicator::RightOnly));
        }
    }
    columns.push(MERGE_INDICATOR.to_string());

    JoinedTable {
        columns,
        shared,
        rows,
    }
}

/// Upstream records whose identity key does not appear in `remote`.
///
/// Order follows `upstream`; repeated upstream keys keep their first
/// occurrence. Remote-only rows are never part of the result.
pub fn detect_changes(upstream: &RecordSet, remote: &RecordSet) -> ChangeSet {
    let joined = outer_join(upstream, remote);
    debug!(
        "[ems_sync:change] join rows={} left_only={} both={} right_only={}",
        joined.rows.len(),
        joined.count(MergeIndicator::LeftOnly),
        joined.count(MergeIndicator::Both),
        joined.count(MergeIndicator::RightOnly)
    );

    let mut seen = HashSet::new();
    let rows: Vec<Record> = joined
        .rows
        .into_iter()
        .filter(|row| MergeIndicator::of(row) == Some(MergeIndicator::LeftOnly))
        .filter(|row| seen.insert(row.identity_key()))
        .collect();

    ChangeSet {
        columns: joined.columns,
        shared: joined.shared,
        rows,
    }
}
