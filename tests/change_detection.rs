use std::collections::HashSet;

use chrono::{TimeZone, Utc};
use chrono_tz::America::Vancouver;
use serde_json::json;

use ems_sync::{
    ColumnReconciler, IdentityKey, RawRecord, RecordCanonicalizer, RecordOrigin, RecordSet,
    TimestampNormalizer, detect_changes,
};

fn upstream_row(station: &str, end: &str, param: &str, result: &str) -> RawRecord {
    [
        ("EMS_ID", json!(station)),
        ("COLLECTION_END", json!(end)),
        ("PARAMETER_CODE", json!(param)),
        ("RESULT", json!(result)),
        ("UNIT", json!("pH units")),
    ]
    .into_iter()
    .map(|(column, value)| (column.to_string(), value))
    .collect()
}

fn upstream(rows: &[RawRecord]) -> RecordSet {
    RecordCanonicalizer::upstream(Vancouver).canonicalize_all(RecordOrigin::UpstreamCurrent, rows)
}

fn as_remote(set: &RecordSet) -> RecordSet {
    RecordSet::new(RecordOrigin::RemoteSnapshot, set.records.clone())
}

fn keys(set: &RecordSet) -> Vec<IdentityKey> {
    set.records.iter().map(|record| record.identity_key()).collect()
}

fn sample_rows() -> Vec<RawRecord> {
    vec![
        upstream_row("E1", "20250101080000", "PH", "7.1"),
        upstream_row("E1", "20250101080000", "NO3D", "0.25"),
        upstream_row("E2", "20250102093000", "PH", "6.8"),
        upstream_row("E3", "20250710120000", "PH", "7.4"),
        upstream_row("E3", "20250711120000", "PH", "7.5"),
    ]
}

#[test]
fn change_set_is_the_set_difference_on_identity_keys() {
    let all = upstream(&sample_rows());
    for split in 0..=all.len() {
        let remote = RecordSet::new(
            RecordOrigin::RemoteSnapshot,
            all.records[..split].to_vec(),
        );
        let remote_keys: HashSet<IdentityKey> = keys(&remote).into_iter().collect();
        let expected: Vec<IdentityKey> = keys(&all)
            .into_iter()
            .filter(|key| !remote_keys.contains(key))
            .collect();
        assert_eq!(detect_changes(&all, &remote).keys(), expected);
    }
}

#[test]
fn comparing_a_set_with_itself_finds_nothing() {
    let all = upstream(&sample_rows());
    assert!(detect_changes(&all, &as_remote(&all)).is_empty());
}

#[test]
fn empty_upstream_finds_nothing() {
    let remote = as_remote(&upstream(&sample_rows()));
    let empty = RecordSet::new(RecordOrigin::UpstreamCurrent, Vec::new());
    assert!(detect_changes(&empty, &remote).is_empty());
}

#[test]
fn formatting_quirks_do_not_create_new_records() {
    let clean = upstream(&[upstream_row("E206908", "20250101080000", "PH-F", "7.0")]);
    let noisy = upstream(&[upstream_row(" e206908\t", "20250101080000", "ph-f ", "7.0000001")]);
    assert_eq!(keys(&clean), keys(&noisy));
    assert!(detect_changes(&noisy, &as_remote(&clean)).is_empty());
}

#[test]
fn change_set_rows_reconcile_to_the_upstream_schema() {
    let all = upstream(&sample_rows());
    let remote = as_remote(&RecordSet::new(
        RecordOrigin::RemoteSnapshot,
        all.records[..2].to_vec(),
    ));
    let change_set = detect_changes(&all, &remote);
    assert_eq!(change_set.len(), 3);

    let clean = ColumnReconciler::default().reconcile(change_set);
    for record in &clean.records {
        let columns: Vec<&str> = record.column_names().collect();
        assert_eq!(
            columns,
            vec!["EMS_ID", "COLLECTION_END", "PARAMETER_CODE", "RESULT", "UNIT"]
        );
    }
    assert_eq!(keys(&clean), keys(&all)[2..].to_vec());
}

#[test]
fn naive_upstream_times_use_the_vancouver_offset_for_their_date() {
    let normalizer = TimestampNormalizer::upstream(Vancouver);
    let winter = normalizer.normalize_utc(&json!("20250101080000")).unwrap();
    assert_eq!(winter, Utc.with_ymd_and_hms(2025, 1, 1, 16, 0, 0).unwrap());
    let summer = normalizer.normalize_utc(&json!("20250701080000")).unwrap();
    assert_eq!(summer, Utc.with_ymd_and_hms(2025, 7, 1, 15, 0, 0).unwrap());
}

#[test]
fn already_aware_values_are_converted_not_relocalized() {
    let normalizer = TimestampNormalizer::upstream(Vancouver);
    let aware = normalizer
        .normalize_utc(&json!("2025-01-01T16:00:00+00:00"))
        .unwrap();
    assert_eq!(aware, Utc.with_ymd_and_hms(2025, 1, 1, 16, 0, 0).unwrap());
    assert_eq!(normalizer.normalize_utc(&json!("not a date")), None);
}
