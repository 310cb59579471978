//! Timestamp normalization across compact, locale-formatted, and offset-bearing encodings.
//!
//! Every instant produced here is absolute. Naive inputs are localized under a
//! [`ZonePolicy`]; inputs that already carry an offset are converted, never
//! re-localized.

use chrono::offset::LocalResult;
use chrono::{
    DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;

use crate::constants::timestamps::{
    AWARE_FORMATS, COMPACT_FORMAT, DATE_FORMATS, GAP_SEARCH_MINUTES, LOCALE_FORMATS,
};
use crate::types::RawValue;

/// How to interpret values that carry no zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZonePolicy {
    /// Localize naive values in this zone; offset-bearing values are converted.
    AssumeZone(Tz),
    /// Values must carry an absolute offset; naive values are unrepresentable.
    AlreadyAware,
}

/// Zone an instant is expressed in once normalized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetZone {
    /// UTC, used for storage comparisons.
    Utc,
    /// A named civil zone, used for upstream date filtering.
    Civil(Tz),
}

impl TargetZone {
    fn tz(self) -> Tz {
        match self {
            TargetZone::Utc => chrono_tz::UTC,
            TargetZone::Civil(zone) => zone,
        }
    }
}

/// A raw timestamp after syntactic parsing, before zone resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParsedTimestamp {
    /// No zone information.
    Naive(NaiveDateTime),
    /// Carries its own offset.
    Aware(DateTime<FixedOffset>),
}

/// Normalizes raw timestamp cells under a fixed source policy and target zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimestampNormalizer {
    policy: ZonePolicy,
    target: TargetZone,
    epoch_millis: bool,
}

impl TimestampNormalizer {
    /// Create a normalizer.
    pub const fn new(policy: ZonePolicy, target: TargetZone) -> Self {
        Self {
            policy,
            target,
            epoch_millis: false,
        }
    }

    /// Also read non-compact integers as epoch milliseconds.
    pub const fn with_epoch_millis(mut self, enabled: bool) -> Self {
        self.epoch_millis = enabled;
        self
    }

    /// Upstream CSV values: naive civil time in `zone`, compared in UTC.
    pub const fn upstream(zone: Tz) -> Self {
        Self::new(ZonePolicy::AssumeZone(zone), TargetZone::Utc)
    }

    /// Feature-store values: naive values are UTC, integers may be epoch
    /// milliseconds, compared in UTC.
    pub const fn remote() -> Self {
        Self::new(ZonePolicy::AssumeZone(chrono_tz::UTC), TargetZone::Utc).with_epoch_millis(true)
    }

    /// Source policy in effect.
    pub fn policy(&self) -> ZonePolicy {
        self.policy
    }

    /// Normalize to an instant in the target zone; `None` when unparsable or unrepresentable.
    pub fn normalize(&self, raw: &RawValue) -> Option<DateTime<Tz>> {
        self.normalize_utc(raw)
            .map(|instant| to_target(instant, self.target))
    }

    /// Normalize to a UTC instant; `None` when unparsable or unrepresentable.
    pub fn normalize_utc(&self, raw: &RawValue) -> Option<DateTime<Utc>> {
        match parse_raw(raw, self.epoch_millis)? {
            ParsedTimestamp::Aware(value) => Some(value.with_timezone(&Utc)),
            ParsedTimestamp::Naive(naive) => match self.policy {
                ZonePolicy::AssumeZone(zone) => localize(naive, zone),
                ZonePolicy::AlreadyAware => None,
            },
        }
    }
}

/// Express a UTC instant in `target`.
pub fn to_target(instant: DateTime<Utc>, target: TargetZone) -> DateTime<Tz> {
    instant.with_timezone(&target.tz())
}

/// Localize a naive civil time in `zone`.
///
/// Ambiguous times (repeated hour when clocks fall back) are unrepresentable.
/// Non-existent times (skipped hour when clocks spring forward) shift forward
/// to the first valid minute after the gap.
pub fn localize(naive: NaiveDateTime, zone: Tz) -> Option<DateTime<Utc>> {
    match zone.from_local_datetime(&naive) {
        LocalResult::Single(value) => Some(value.with_timezone(&Utc)),
        LocalResult::Ambiguous(_, _) => None,
        LocalResult::None => shift_forward(naive, zone),
    }
}

fn shift_forward(naive: NaiveDateTime, zone: Tz) -> Option<DateTime<Utc>> {
    let floor = naive.with_second(0)?.with_nanosecond(0)?;
    (1..=GAP_SEARCH_MINUTES).find_map(|minutes| {
        let candidate = floor.checked_add_signed(TimeDelta::minutes(minutes))?;
        match zone.from_local_datetime(&candidate) {
            LocalResult::Single(value) => Some(value.with_timezone(&Utc)),
            _ => None,
        }
    })
}

/// Parse a raw cell into a naive or offset-bearing timestamp.
///
/// Numbers are read as the compact `YYYYMMDDHHMMSS` encoding when they form a
/// valid one. Otherwise they are epoch milliseconds (the feature store's date
/// form) when `epoch_millis` is set, and unparsable when it is not.
pub fn parse_raw(raw: &RawValue, epoch_millis: bool) -> Option<ParsedTimestamp> {
    match raw {
        RawValue::String(text) => parse_text(text, epoch_millis),
        RawValue::Number(number) => {
            let integer = number.as_i64().or_else(|| {
                number
                    .as_f64()
                    .filter(|value| value.fract() == 0.0 && value.abs() < i64::MAX as f64)
                    .map(|value| value as i64)
            })?;
            parse_integer(integer, epoch_millis)
        }
        _ => None,
    }
}

/// Parse a text timestamp.
pub fn parse_text(text: &str, epoch_millis: bool) -> Option<ParsedTimestamp> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let digits = trimmed.strip_suffix(".0").unwrap_or(trimmed);
    if !digits.is_empty() && digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return parse_digits(digits, epoch_millis);
    }
    if let Ok(value) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(ParsedTimestamp::Aware(value));
    }
    for format in AWARE_FORMATS {
        if let Ok(value) = DateTime::parse_from_str(trimmed, format) {
            return Some(ParsedTimestamp::Aware(value));
        }
    }
    if let Some(value) = trimmed.strip_suffix('Z').and_then(parse_naive) {
        return Some(ParsedTimestamp::Aware(value.and_utc().fixed_offset()));
    }
    parse_naive(trimmed).map(ParsedTimestamp::Naive)
}

fn parse_naive(text: &str) -> Option<NaiveDateTime> {
    for format in LOCALE_FORMATS {
        if let Ok(value) = NaiveDateTime::parse_from_str(text, format) {
            return Some(value);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}

fn parse_digits(digits: &str, epoch_millis: bool) -> Option<ParsedTimestamp> {
    match digits.len() {
        14 => NaiveDateTime::parse_from_str(digits, COMPACT_FORMAT)
            .ok()
            .map(ParsedTimestamp::Naive),
        8 => NaiveDate::parse_from_str(digits, "%Y%m%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(ParsedTimestamp::Naive),
        _ if epoch_millis => digits.parse::<i64>().ok().and_then(parse_epoch_millis),
        _ => None,
    }
}

fn parse_integer(value: i64, epoch_millis: bool) -> Option<ParsedTimestamp> {
    if value > 0 {
        let digits = value.to_string();
        if digits.len() == 14
            && let Ok(naive) = NaiveDateTime::parse_from_str(&digits, COMPACT_FORMAT)
        {
            return Some(ParsedTimestamp::Naive(naive));
        }
    }
    if epoch_millis {
        parse_epoch_millis(value)
    } else {
        None
    }
}

fn parse_epoch_millis(value: i64) -> Option<ParsedTimestamp> {
    DateTime::<Utc>::from_timestamp_millis(value)
        .map(|instant| ParsedTimestamp::Aware(instant.fixed_offset()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::Vancouver;
    use serde_json::json;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn compact_values_localize_in_standard_and_daylight_time() {
        let normalizer = TimestampNormalizer::upstream(Vancouver);
        assert_eq!(
            normalizer.normalize_utc(&json!("20250101080000")),
            Some(utc(2025, 1, 1, 16, 0, 0))
        );
        assert_eq!(
            normalizer.normalize_utc(&json!("20250701080000")),
            Some(utc(2025, 7, 1, 15, 0, 0))
        );
        assert_eq!(
            normalizer.normalize_utc(&json!(20250101080000_i64)),
            Some(utc(2025, 1, 1, 16, 0, 0))
        );
        assert_eq!(
            normalizer.normalize_utc(&json!("20250101080000.0")),
            Some(utc(2025, 1, 1, 16, 0, 0))
        );
    }

    #[test]
    fn malformed_values_become_absent() {
        let normalizer = TimestampNormalizer::upstream(Vancouver);
        for raw in [json!("2025-13-45"), json!("not a date"), json!(""), json!(null), json!(true)] {
            assert_eq!(normalizer.normalize_utc(&raw), None, "{raw}");
        }
        assert_eq!(normalizer.normalize_utc(&json!("20251340080000")), None);
    }

    #[test]
    fn aware_values_are_converted_not_relocalized() {
        let normalizer = TimestampNormalizer::upstream(Vancouver);
        assert_eq!(
            normalizer.normalize_utc(&json!("2025-01-01T16:00:00+00:00")),
            Some(utc(2025, 1, 1, 16, 0, 0))
        );
        assert_eq!(
            normalizer.normalize_utc(&json!("2025-01-01 08:00:00-08:00")),
            Some(utc(2025, 1, 1, 16, 0, 0))
        );
    }

    #[test]
    fn upstream_digit_strings_must_be_compact() {
        let normalizer = TimestampNormalizer::upstream(Vancouver);
        for raw in [
            json!("2025010108000"),
            json!("2025"),
            json!("123"),
            json!(123),
            json!(1_735_747_200_000_i64),
        ] {
            assert_eq!(normalizer.normalize_utc(&raw), None, "{raw}");
        }
        assert_eq!(
            normalizer.normalize_utc(&json!("20250101")),
            Some(utc(2025, 1, 1, 8, 0, 0))
        );
    }

    #[test]
    fn remote_integers_are_epoch_milliseconds() {
        let normalizer = TimestampNormalizer::remote();
        assert_eq!(
            normalizer.normalize_utc(&json!(1_735_747_200_000_i64)),
            Some(utc(2025, 1, 1, 16, 0, 0))
        );
        assert_eq!(
            normalizer.normalize_utc(&json!("1735747200000")),
            Some(utc(2025, 1, 1, 16, 0, 0))
        );
        assert_eq!(
            normalizer.normalize_utc(&json!(20250101160000_i64)),
            Some(utc(2025, 1, 1, 16, 0, 0))
        );
    }

    #[test]
    fn remote_locale_strings_are_read_as_utc() {
        let normalizer = TimestampNormalizer::remote();
        assert_eq!(
            normalizer.normalize_utc(&json!("2025-01-01 16:00:00")),
            Some(utc(2025, 1, 1, 16, 0, 0))
        );
        assert_eq!(
            normalizer.normalize_utc(&json!("1/1/2025 4:00:00 PM")),
            Some(utc(2025, 1, 1, 16, 0, 0))
        );
        assert_eq!(
            normalizer.normalize_utc(&json!("2025-01-01")),
            Some(utc(2025, 1, 1, 0, 0, 0))
        );
    }

    #[test]
    fn already_aware_policy_rejects_naive_values() {
        let normalizer = TimestampNormalizer::new(ZonePolicy::AlreadyAware, TargetZone::Utc);
        assert_eq!(normalizer.normalize_utc(&json!("20250101080000")), None);
        assert_eq!(
            normalizer.normalize_utc(&json!("2025-01-01T16:00:00Z")),
            Some(utc(2025, 1, 1, 16, 0, 0))
        );
    }

    #[test]
    fn daylight_saving_transitions_resolve_deterministically() {
        // 2025-03-09 02:30 does not exist in Vancouver; shifts to 03:00 PDT.
        let gap = NaiveDateTime::parse_from_str("20250309023000", COMPACT_FORMAT).unwrap();
        assert_eq!(localize(gap, Vancouver), Some(utc(2025, 3, 9, 10, 0, 0)));

        // 2025-11-02 01:30 occurs twice in Vancouver.
        let repeated = NaiveDateTime::parse_from_str("20251102013000", COMPACT_FORMAT).unwrap();
        assert_eq!(localize(repeated, Vancouver), None);
    }

    #[test]
    fn civil_target_keeps_the_same_instant() {
        let normalizer =
            TimestampNormalizer::new(ZonePolicy::AssumeZone(Vancouver), TargetZone::Civil(Vancouver));
        let civil = normalizer.normalize(&json!("20250101080000")).unwrap();
        assert_eq!(civil.format("%Y-%m-%d %H:%M").to_string(), "2025-01-01 08:00");
        assert_eq!(civil.with_timezone(&Utc), utc(2025, 1, 1, 16, 0, 0));
    }
}
