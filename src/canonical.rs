//! Record canonicalization: the single boundary where raw collaborator rows
//! become comparable [`Record`]s.
//!
//! - Identity codes (`EMS_ID`, `PARAMETER_CODE`) are trimmed and upper-cased.
//! - `RESULT`, `LONGITUDE`, `LATITUDE` parse as floats; `RESULT` is rounded to
//!   the canonical precision.
//! - Timestamp columns go through the configured [`TimestampNormalizer`].
//! - Every null spelling and every parse failure becomes [`Value::Absent`].
//! - Everything else passes through by value.

use chrono_tz::Tz;

use crate::columns::ColumnKey;
use crate::constants::canonical::RESULT_DECIMALS;
use crate::constants::columns::{CODE_COLUMNS, NUMERIC_COLUMNS, RESULT, TIMESTAMP_COLUMNS};
use crate::data::{Record, RecordOrigin, RecordSet, Value};
use crate::timestamps::TimestampNormalizer;
use crate::types::{RawRecord, RawValue};
use crate::utils::{is_absent, normalize_code, parse_float, raw_to_text, round_to_places};

/// Maps raw rows to canonical records. Pure; holds only the timestamp policy.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordCanonicalizer {
    timestamps: TimestampNormalizer,
    timestamp_columns: Vec<ColumnKey>,
}

impl RecordCanonicalizer {
    /// Canonicalizer using `timestamps` for the EMS timestamp columns.
    pub fn new(timestamps: TimestampNormalizer) -> Self {
        Self {
            timestamps,
            timestamp_columns: TIMESTAMP_COLUMNS.to_vec(),
        }
    }

    /// Upstream CSV rows: naive timestamps are civil time in `zone`.
    pub fn upstream(zone: Tz) -> Self {
        Self::new(TimestampNormalizer::upstream(zone))
    }

    /// Feature-store rows: naive timestamps are UTC.
    pub fn remote() -> Self {
        Self::new(TimestampNormalizer::remote())
    }

    /// Treat an additional column as instant-valued.
    pub fn with_timestamp_column(mut self, column: ColumnKey) -> Self {
        if !self.timestamp_columns.contains(&column) {
            self.timestamp_columns.push(column);
        }
        self
    }

    /// Canonicalize one raw row, preserving column order.
    pub fn canonicalize(&self, raw: &RawRecord) -> Record {
        raw.iter()
            .map(|(column, value)| (column.clone(), self.canonicalize_value(column, value)))
            .collect()
    }

    /// Canonicalize every row of a snapshot from `origin`.
    pub fn canonicalize_all(&self, origin: RecordOrigin, rows: &[RawRecord]) -> RecordSet {
        RecordSet::new(
            origin,
            rows.iter().map(|row| self.canonicalize(row)).collect(),
        )
    }

    /// Canonical form of one cell of `column`.
    pub fn canonicalize_value(&self, column: &str, raw: &RawValue) -> Value {
        if is_absent(raw) {
            return Value::Absent;
        }
        if self.timestamp_columns.iter().any(|key| key.as_str() == column) {
            return self
                .timestamps
                .normalize_utc(raw)
                .map(Value::Instant)
                .unwrap_or_default();
        }
        if CODE_COLUMNS.iter().any(|key| key.as_str() == column) {
            return raw_to_text(raw)
                .map(normalize_code)
                .filter(|code| !code.is_empty())
                .map(Value::Text)
                .unwrap_or_default();
        }
        if NUMERIC_COLUMNS.iter().any(|key| key.as_str() == column) {
            let places = (column == RESULT.as_str()).then_some(RESULT_DECIMALS);
            return parse_float(raw)
                .map(|value| match places {
                    Some(places) => round_to_places(value, places),
                    None => value,
                })
                .map(Value::Number)
                .unwrap_or_default();
        }
        passthrough(raw)
    }
}

fn passthrough(raw: &RawValue) -> Value {
    match raw {
        RawValue::Null => Value::Absent,
        RawValue::Bool(flag) => Value::Bool(*flag),
        RawValue::Number(number) => match number.as_i64() {
            Some(integer) => Value::Integer(integer),
            None => number.as_f64().map(Value::Number).unwrap_or_default(),
        },
        RawValue::String(text) => Value::Text(text.clone()),
        RawValue::Array(_) | RawValue::Object(_) => Value::Text(raw.to_string()),
    }
}
