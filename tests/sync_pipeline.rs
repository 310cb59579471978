use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value as Json, json};

use ems_sync::{
    FeatureStore, InMemorySource, InMemoryStore, NoDataReason, OutputShape, PublishStrategy,
    RawRecord, SyncConfig, SyncError, SyncOutcome, run_sync,
};

fn raw(pairs: &[(&str, Json)]) -> RawRecord {
    pairs
        .iter()
        .map(|(column, value)| (column.to_string(), value.clone()))
        .collect()
}

/// Upstream CSV row: every cell is text, timestamps are compact Vancouver civil time.
fn csv_row(station: &str, end: &str, param: &str, result: &str, lon: &str, lat: &str) -> RawRecord {
    raw(&[
        ("EMS_ID", json!(station)),
        ("MONITORING_LOCATION", json!("HULLCAR WELL")),
        ("COLLECTION_START", json!(end)),
        ("COLLECTION_END", json!(end)),
        ("PARAMETER_CODE", json!(param)),
        ("RESULT", json!(result)),
        ("LONGITUDE", json!(lon)),
        ("LATITUDE", json!(lat)),
    ])
}

/// Feature-layer row: epoch-millisecond dates plus store-managed columns.
fn layer_row(object_id: i64, station: &str, end_ms: i64, param: &str, result: f64) -> RawRecord {
    raw(&[
        ("OBJECTID", json!(object_id)),
        ("EMS_ID", json!(station)),
        ("MONITORING_LOCATION", json!("HULLCAR WELL")),
        ("COLLECTION_START", json!(end_ms)),
        ("COLLECTION_END", json!(end_ms)),
        ("PARAMETER_CODE", json!(param)),
        ("RESULT", json!(result)),
        ("LONGITUDE", json!(-119.2)),
        ("LATITUDE", json!(50.5)),
        ("GIS_LOAD_DATE", json!(1_735_000_000_000i64)),
        ("SHAPE", json!({"x": -119.2, "y": 50.5})),
    ])
}

// 2025-01-01 08:00 America/Vancouver == 2025-01-01T16:00:00Z
const JAN_1_08H: &str = "20250101080000";
const JAN_1_16H_UTC_MS: i64 = 1_735_747_200_000;

fn config() -> SyncConfig {
    let mut config = SyncConfig::default();
    config.upstream.monitoring_locations = Vec::new();
    config
}

fn run_started() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 4, 11, 18, 30, 0).unwrap()
}

#[test]
fn single_new_record_is_appended_with_rounded_result() {
    let source = InMemorySource::new(
        "upstream",
        vec![csv_row(" e1 ", JAN_1_08H, "ph", "7.0000001", "-119.2", "50.5")],
    );
    let store = InMemoryStore::new(Vec::new());

    let outcome = run_sync(&config(), &source, &store, run_started()).unwrap();
    match &outcome {
        SyncOutcome::Published {
            strategy,
            change_count,
            report,
            rejections,
        } => {
            assert_eq!(*strategy, PublishStrategy::Append);
            assert_eq!(*change_count, 1);
            assert!(report.is_complete());
            assert!(rejections.is_empty());
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let calls = store.calls();
    assert_eq!(calls.appends.len(), 1);
    let features = &calls.appends[0];
    assert_eq!(features.len(), 1);
    let attributes = features[0].attributes();
    assert_eq!(attributes["EMS_ID"], json!("E1"));
    assert_eq!(attributes["PARAMETER_CODE"], json!("PH"));
    assert_eq!(attributes["RESULT"], json!(7.0));
    assert_eq!(attributes["COLLECTION_END"], json!("2025-01-01T16:00:00+00:00"));
    assert_eq!(attributes["GIS_LOAD_DATE"], json!("2025-04-11T18:30:00+00:00"));
    assert_eq!(attributes["MONITORING_LOCATION"], json!("HULLCAR WELL"));
    assert!(!attributes.contains_key("_merge"));
    assert!(attributes.keys().all(|column| !column.ends_with("_x") && !column.ends_with("_y")));
    assert_eq!(features[0].point(), (-119.2, 50.5));
}

#[test]
fn append_queries_from_the_earliest_upstream_date() {
    let source = InMemorySource::new(
        "upstream",
        vec![
            csv_row("E1", "20250105080000", "PH", "7.1", "-119.2", "50.5"),
            // 2025-01-01 17:00 Vancouver is already 2025-01-02 in UTC.
            csv_row("E1", "20250101170000", "PH", "7.2", "-119.2", "50.5"),
        ],
    );
    let store = InMemoryStore::new(Vec::new());
    run_sync(&config(), &source, &store, run_started()).unwrap();
    assert_eq!(
        store.calls().queries,
        vec![Some("COLLECTION_END >= DATE '2025-01-01'".to_string())]
    );
}

#[test]
fn identical_records_within_rounding_are_unchanged() {
    let source = InMemorySource::new(
        "upstream",
        vec![csv_row("E1", JAN_1_08H, "PH", "7.000000", "-119.2", "50.5")],
    );
    let store = InMemoryStore::new(vec![layer_row(1, "e1", JAN_1_16H_UTC_MS, "ph", 7.0000001)]);

    let mut full_compare = config();
    full_compare.latest_timestamp_gate = false;
    let outcome = run_sync(&full_compare, &source, &store, run_started()).unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::NoNewData {
            reason: NoDataReason::NoNewRecords
        }
    );

    let gated = run_sync(&config(), &source, &store, run_started()).unwrap();
    assert!(matches!(
        gated,
        SyncOutcome::NoNewData {
            reason: NoDataReason::LatestTimestampsMatch { .. }
        }
    ));
    assert!(store.calls().appends.is_empty());
}

#[test]
fn same_timestamp_different_parameter_is_new() {
    let source = InMemorySource::new(
        "upstream",
        vec![
            csv_row("E1", JAN_1_08H, "PH", "7.0", "-119.2", "50.5"),
            csv_row("E1", JAN_1_08H, "NO3D", "0.25", "-119.2", "50.5"),
        ],
    );
    let store = InMemoryStore::new(vec![layer_row(1, "E1", JAN_1_16H_UTC_MS, "PH", 7.0)]);
    let mut full_compare = config();
    full_compare.latest_timestamp_gate = false;

    let outcome = run_sync(&full_compare, &source, &store, run_started()).unwrap();
    assert!(matches!(outcome, SyncOutcome::Published { change_count: 1, .. }));
    let calls = store.calls();
    let appended = &calls.appends[0];
    assert_eq!(appended.len(), 1);
    assert_eq!(appended[0].attributes()["PARAMETER_CODE"], json!("NO3D"));
    assert!(!appended[0].attributes().contains_key("OBJECTID"));
}

#[test]
fn record_missing_latitude_is_excluded_and_reported() {
    let source = InMemorySource::new(
        "upstream",
        vec![
            csv_row("E1", JAN_1_08H, "PH", "7.1", "-119.2", "50.5"),
            csv_row("E2", JAN_1_08H, "PH", "7.2", "-119.3", ""),
            csv_row("E3", JAN_1_08H, "PH", "7.3", "-119.4", "50.7"),
        ],
    );
    let store = InMemoryStore::new(Vec::new());

    let outcome = run_sync(&config(), &source, &store, run_started()).unwrap();
    let SyncOutcome::Published {
        change_count,
        report,
        rejections,
        ..
    } = outcome
    else {
        panic!("expected a publish");
    };
    assert_eq!(change_count, 3);
    assert_eq!(report.attempted, change_count - 1);
    assert_eq!(rejections.len(), 1);
    assert_eq!(rejections[0].key.station_id.as_deref(), Some("E2"));
    assert_eq!(store.calls().appends[0].len(), 2);
}

#[test]
fn remote_query_failure_aborts_before_any_append() {
    let source = InMemorySource::new(
        "upstream",
        vec![csv_row("E1", JAN_1_08H, "PH", "7.1", "-119.2", "50.5")],
    );
    let store = InMemoryStore::new(Vec::new()).with_query_failure("service unavailable");

    let err = run_sync(&config(), &source, &store, run_started()).unwrap_err();
    assert!(matches!(err, SyncError::SourceUnavailable { .. }));
    assert!(store.calls().appends.is_empty());
    assert!(store.calls().replaces.is_empty());
}

#[test]
fn upstream_failure_aborts_before_querying_the_store() {
    let source = InMemorySource::failing("upstream", "catalog returned success=false");
    let store = InMemoryStore::new(Vec::new());
    assert!(run_sync(&config(), &source, &store, run_started()).is_err());
    assert!(store.calls().queries.is_empty());
}

#[test]
fn empty_upstream_is_no_change_without_querying() {
    let source = InMemorySource::new(
        "upstream",
        vec![csv_row("E9", JAN_1_08H, "PH", "7.1", "-119.2", "50.5")],
    );
    let store = InMemoryStore::new(Vec::new());
    let mut filtered = config();
    filtered.upstream.monitoring_locations = vec!["E1".to_string()];

    let outcome = run_sync(&filtered, &source, &store, run_started()).unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::NoNewData {
            reason: NoDataReason::EmptyUpstream
        }
    );
    assert!(store.calls().queries.is_empty());
}

#[test]
fn all_records_unencodable_makes_no_append_call() {
    let source = InMemorySource::new(
        "upstream",
        vec![csv_row("E1", JAN_1_08H, "PH", "7.1", "n/a", "")],
    );
    let store = InMemoryStore::new(Vec::new());
    let outcome = run_sync(&config(), &source, &store, run_started()).unwrap();
    let SyncOutcome::Published {
        report, rejections, ..
    } = outcome
    else {
        panic!("expected a publish");
    };
    assert_eq!(report.attempted, 0);
    assert_eq!(rejections.len(), 1);
    assert!(store.calls().appends.is_empty());
}

#[test]
fn partial_store_rejection_is_not_a_success() {
    let source = InMemorySource::new(
        "upstream",
        vec![
            csv_row("E1", JAN_1_08H, "PH", "7.1", "-119.2", "50.5"),
            csv_row("E2", JAN_1_08H, "PH", "7.2", "-119.3", "50.6"),
        ],
    );
    let store = InMemoryStore::new(Vec::new()).rejecting([1]);
    let outcome = run_sync(&config(), &source, &store, run_started()).unwrap();
    assert!(!outcome.is_success());
    let SyncOutcome::Published { report, .. } = outcome else {
        panic!("expected a publish");
    };
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failures[0].index, 1);
}

#[test]
fn append_transport_failure_is_an_error() {
    let source = InMemorySource::new(
        "upstream",
        vec![csv_row("E1", JAN_1_08H, "PH", "7.1", "-119.2", "50.5")],
    );
    let store = InMemoryStore::new(Vec::new()).with_append_failure("connection reset");
    let err = run_sync(&config(), &source, &store, run_started()).unwrap_err();
    assert!(matches!(err, SyncError::StoreRejected { .. }));
}

#[test]
fn backdated_correction_needs_the_full_comparison() {
    let source = InMemorySource::new(
        "upstream",
        vec![
            csv_row("E1", "20241215080000", "PH", "6.9", "-119.2", "50.5"),
            csv_row("E1", JAN_1_08H, "PH", "7.0", "-119.2", "50.5"),
        ],
    );
    let store = InMemoryStore::new(vec![layer_row(1, "E1", JAN_1_16H_UTC_MS, "PH", 7.0)]);

    let gated = run_sync(&config(), &source, &store, run_started()).unwrap();
    assert!(matches!(gated, SyncOutcome::NoNewData { .. }));

    let mut full_compare = config();
    full_compare.latest_timestamp_gate = false;
    let outcome = run_sync(&full_compare, &source, &store, run_started()).unwrap();
    assert!(matches!(outcome, SyncOutcome::Published { change_count: 1, .. }));
}

#[test]
fn replace_republishes_snapshot_plus_changes_and_shares() {
    let source = InMemorySource::new(
        "upstream",
        vec![
            csv_row("E1", JAN_1_08H, "PH", "7.0", "-119.2", "50.5"),
            csv_row("E1", "20250102080000", "PH", "7.4", "-119.2", "50.5"),
        ],
    );
    let store = InMemoryStore::new(vec![layer_row(7, "E1", JAN_1_16H_UTC_MS, "PH", 7.0)]);
    let mut replace = config();
    replace.publish_strategy = PublishStrategy::Replace;
    replace.output_shape = OutputShape::GeoJson;
    replace.store.group_id = Some("group-1".to_string());

    let outcome = run_sync(&replace, &source, &store, run_started()).unwrap();
    assert!(outcome.is_success());

    let calls = store.calls();
    assert_eq!(calls.queries, vec![None]);
    assert!(calls.appends.is_empty());
    assert_eq!(calls.replaces.len(), 1);
    let features = &calls.replaces[0];
    assert_eq!(features.len(), 2);
    for feature in features {
        assert_eq!(feature.shape(), OutputShape::GeoJson);
        assert!(!feature.attributes().contains_key("OBJECTID"));
        assert!(!feature.attributes().contains_key("SHAPE"));
        assert_eq!(
            feature.attributes()["GIS_LOAD_DATE"],
            json!("2025-04-11T18:30:00+00:00")
        );
    }
    assert_eq!(features[0].attributes()["COLLECTION_END"], json!("2025-01-01T16:00:00+00:00"));
    assert_eq!(features[1].attributes()["RESULT"], json!(7.4));
    assert_eq!(calls.shares, vec!["group-1".to_string()]);
    assert_eq!(store.id(), "memory");
}
