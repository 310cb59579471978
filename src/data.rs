use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::canonical::RESULT_DECIMALS;
use crate::constants::columns::{
    COLLECTION_END, EMS_ID, LATITUDE, LONGITUDE, PARAMETER_CODE, RESULT,
};
use crate::columns::ColumnKey;
use crate::utils::scaled_units;

pub use crate::types::{ColumnName, ParameterCode, SourceId, StationId};

/// Canonical cell value.
///
/// `Absent` is the single marker for every upstream spelling of "missing"
/// (null, `NaN`, `NaT`, empty text, ...) and for fields that failed to parse.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// No value.
    #[default]
    Absent,
    /// Text, trimmed only for code columns.
    Text(String),
    /// Whole number, as the store returns object ids.
    Integer(i64),
    /// Float; `RESULT` is already rounded.
    Number(f64),
    /// Boolean.
    Bool(bool),
    /// Absolute instant in UTC.
    Instant(DateTime<Utc>),
}

impl Value {
    /// True for the absent marker.
    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    /// Text payload, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Numeric payload for integer or float values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(value) => Some(*value),
            Value::Integer(value) => Some(*value as f64),
            _ => None,
        }
    }

    /// Instant payload, if this is an instant value.
    pub fn as_instant(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Instant(instant) => Some(*instant),
            _ => None,
        }
    }

    /// Wire form of this value.
    ///
    /// Instants render as RFC 3339 text with an explicit offset; non-finite
    /// floats and `Absent` render as JSON null.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Absent => serde_json::Value::Null,
            Value::Text(text) => serde_json::Value::String(text.clone()),
            Value::Integer(value) => serde_json::Value::from(*value),
            Value::Number(value) => serde_json::Number::from_f64(*value)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Bool(flag) => serde_json::Value::Bool(*flag),
            Value::Instant(instant) => serde_json::Value::String(format_instant(instant)),
        }
    }
}

/// Absolute text form used for every instant leaving the engine.
pub fn format_instant(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

/// One environmental sample observation.
///
/// Stored as an ordered column map so passthrough attributes survive verbatim;
/// the EMS contract fields are read through typed accessors.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    columns: IndexMap<ColumnName, Value>,
}

impl Record {
    /// Empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or replace) a column, keeping its original position when it exists.
    pub fn insert(&mut self, column: impl Into<ColumnName>, value: Value) {
        self.columns.insert(column.into(), value);
    }

    /// Builder-style [`Record::insert`].
    pub fn with(mut self, column: impl Into<ColumnName>, value: Value) -> Self {
        self.insert(column, value);
        self
    }

    /// Value of `column`, if present.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    /// Value of a contract column; missing columns read as absent.
    pub fn field(&self, key: ColumnKey) -> &Value {
        static ABSENT: Value = Value::Absent;
        self.columns.get(key.as_str()).unwrap_or(&ABSENT)
    }

    /// Remove `column`, preserving the order of the remaining columns.
    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.columns.shift_remove(column)
    }

    /// Ordered column names.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Ordered `(column, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// True when the record has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Canonical station identifier.
    pub fn station_id(&self) -> Option<&str> {
        self.field(EMS_ID).as_text()
    }

    /// Canonical parameter code.
    pub fn parameter_code(&self) -> Option<&str> {
        self.field(PARAMETER_CODE).as_text()
    }

    /// Canonical collection end instant.
    pub fn collection_end(&self) -> Option<DateTime<Utc>> {
        self.field(COLLECTION_END).as_instant()
    }

    /// Canonical measurement value.
    pub fn result(&self) -> Option<f64> {
        self.field(RESULT).as_f64()
    }

    /// `(longitude, latitude)` when both are present and numeric.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        let x = self.field(LONGITUDE).as_f64()?;
        let y = self.field(LATITUDE).as_f64()?;
        Some((x, y))
    }

    /// Composite identity key of this record.
    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey {
            station_id: self.station_id().map(str::to_string),
            collection_end: self.collection_end(),
            parameter_code: self.parameter_code().map(str::to_string),
            result_units: self
                .result()
                .and_then(|value| scaled_units(value, RESULT_DECIMALS)),
        }
    }

    pub(crate) fn into_columns(self) -> IndexMap<ColumnName, Value> {
        self.columns
    }

    pub(crate) fn from_columns(columns: IndexMap<ColumnName, Value>) -> Self {
        Self { columns }
    }
}

impl FromIterator<(ColumnName, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (ColumnName, Value)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

/// Composite identity of one observation: `(EMS_ID, COLLECTION_END, PARAMETER_CODE, RESULT)`.
///
/// `RESULT` is held as integer units at the canonical precision so the key is
/// exactly hashable. Missing components compare equal to each other.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey {
    /// Normalized `EMS_ID`.
    pub station_id: Option<StationId>,
    /// `COLLECTION_END` in UTC.
    pub collection_end: Option<DateTime<Utc>>,
    /// Normalized `PARAMETER_CODE`.
    pub parameter_code: Option<ParameterCode>,
    /// `RESULT` in integer micro-units.
    pub result_units: Option<i64>,
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self
            .collection_end
            .as_ref()
            .map(format_instant)
            .unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "{}|{}|{}|{}",
            self.station_id.as_deref().unwrap_or("-"),
            end,
            self.parameter_code.as_deref().unwrap_or("-"),
            self.result_units
                .map(|units| units.to_string())
                .unwrap_or_else(|| "-".to_string()),
        )
    }
}

/// Which collaborator snapshot a record set was materialized from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordOrigin {
    /// Upstream catalog, current resource.
    UpstreamCurrent,
    /// Upstream catalog, historic resource.
    UpstreamHistoric,
    /// Remote feature-store query result.
    RemoteSnapshot,
}

/// Ordered collection of canonical records from one source.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordSet {
    /// Snapshot the records came from.
    pub origin: RecordOrigin,
    /// Records in source order.
    pub records: Vec<Record>,
}

impl RecordSet {
    /// Wrap records from `origin`.
    pub fn new(origin: RecordOrigin, records: Vec<Record>) -> Self {
        Self { origin, records }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when the set holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Latest `COLLECTION_END` in the set, ignoring absent values.
    pub fn latest_collection_end(&self) -> Option<DateTime<Utc>> {
        self.records
            .iter()
            .filter_map(Record::collection_end)
            .max()
    }

    /// Earliest `COLLECTION_END` in the set, ignoring absent values.
    pub fn earliest_collection_end(&self) -> Option<DateTime<Utc>> {
        self.records
            .iter()
            .filter_map(Record::collection_end)
            .min()
    }

    /// Ordered union of column names across all records.
    pub fn column_names(&self) -> Vec<ColumnName> {
        let mut names: indexmap::IndexSet<ColumnName> = indexmap::IndexSet::new();
        for record in &self.records {
            for name in record.column_names() {
                if !names.contains(name) {
                    names.insert(name.to_string());
                }
            }
        }
        names.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn observation(result: f64) -> Record {
        Record::new()
            .with("EMS_ID", Value::Text("E333852".into()))
            .with(
                "COLLECTION_END",
                Value::Instant(Utc.with_ymd_and_hms(2025, 1, 1, 16, 0, 0).unwrap()),
            )
            .with("PARAMETER_CODE", Value::Text("PH-F".into()))
            .with("RESULT", Value::Number(result))
    }

    #[test]
    fn identity_key_uses_fixed_precision_result() {
        assert_eq!(
            observation(7.0).identity_key(),
            observation(7.0000001).identity_key()
        );
        assert_ne!(
            observation(7.0).identity_key(),
            observation(7.000001).identity_key()
        );
    }

    #[test]
    fn missing_columns_read_as_absent() {
        let record = Record::new().with("EMS_ID", Value::Text("E1".into()));
        assert!(record.field(LONGITUDE).is_absent());
        assert_eq!(record.coordinates(), None);
        assert_eq!(record.identity_key().collection_end, None);
    }

    #[test]
    fn instants_render_with_offset() {
        let value = Value::Instant(Utc.with_ymd_and_hms(2025, 7, 1, 15, 0, 0).unwrap());
        assert_eq!(value.to_json(), serde_json::json!("2025-07-01T15:00:00+00:00"));
        assert_eq!(Value::Number(f64::NAN).to_json(), serde_json::Value::Null);
    }

    #[test]
    fn record_set_tracks_extremes_and_columns() {
        let early = observation(1.0);
        let late = observation(2.0).with(
            "COLLECTION_END",
            Value::Instant(Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()),
        );
        let set = RecordSet::new(
            RecordOrigin::UpstreamCurrent,
            vec![late.clone(), early.clone(), Record::new().with("X", Value::Absent)],
        );
        assert_eq!(set.latest_collection_end(), late.collection_end());
        assert_eq!(set.earliest_collection_end(), early.collection_end());
        assert_eq!(
            set.column_names(),
            vec!["EMS_ID", "COLLECTION_END", "PARAMETER_CODE", "RESULT", "X"]
        );
    }
}
