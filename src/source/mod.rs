//! Upstream source interfaces.
//!
//! Ownership model:
//! - `UpstreamSource` hands back raw rows exactly as delivered (one live fetch per call).
//! - `load_upstream` is the only place those rows are canonicalized and filtered
//!   to the monitoring locations of interest.

use std::collections::HashSet;
use tracing::info;

use crate::canonical::RecordCanonicalizer;
use crate::data::{RecordOrigin, RecordSet};
use crate::errors::SyncError;
use crate::types::{RawRecord, SourceId, StationId};

/// Catalog lookup of downloadable resources.
pub mod catalog;
/// Chunked CSV retrieval for catalog resources.
pub mod csv_source;

pub use catalog::{CatalogResource, CkanCatalog};
pub use csv_source::{CkanCsvSource, read_csv_rows};

/// Upstream tabular source.
///
/// Each call to `fetch` materializes a fresh snapshot; nothing is cached
/// between runs. A failure is a fetch fault and must abort the run.
pub trait UpstreamSource {
    /// Stable source identifier used in logs and errors.
    fn id(&self) -> &str;
    /// Fetch every raw row of the current resource(s), in source order.
    fn fetch(&self) -> Result<Vec<RawRecord>, SyncError>;
}

/// Fetch, canonicalize, and filter an upstream snapshot.
///
/// `stations` are canonical codes; an empty list keeps every row.
pub fn load_upstream(
    source: &dyn UpstreamSource,
    canonicalizer: &RecordCanonicalizer,
    stations: &[StationId],
) -> Result<RecordSet, SyncError> {
    let rows = source.fetch()?;
    let fetched = rows.len();
    let mut set = canonicalizer.canonicalize_all(RecordOrigin::UpstreamCurrent, &rows);
    if !stations.is_empty() {
        let wanted: HashSet<&str> = stations.iter().map(String::as_str).collect();
        set.records.retain(|record| {
            record
                .station_id()
                .is_some_and(|station| wanted.contains(station))
        });
    }
    info!(
        "[ems_sync:source] source '{}' kept {} of {} rows for {} monitoring locations",
        source.id(),
        set.len(),
        fetched,
        stations.len()
    );
    Ok(set)
}

/// In-memory upstream source for tests and small fixtures.
pub struct InMemorySource {
    id: SourceId,
    rows: Vec<RawRecord>,
    failure: Option<String>,
}

impl InMemorySource {
    /// Create a source that always returns `rows`.
    pub fn new(id: impl Into<SourceId>, rows: Vec<RawRecord>) -> Self {
        Self {
            id: id.into(),
            rows,
            failure: None,
        }
    }

    /// Create a source whose fetch always fails with `reason`.
    pub fn failing(id: impl Into<SourceId>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rows: Vec::new(),
            failure: Some(reason.into()),
        }
    }
}

impl UpstreamSource for InMemorySource {
    fn id(&self) -> &str {
        &self.id
    }

    fn fetch(&self) -> Result<Vec<RawRecord>, SyncError> {
        match &self.failure {
            Some(reason) => Err(SyncError::unavailable(self.id.clone(), reason.clone())),
            None => Ok(self.rows.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::Vancouver;
    use serde_json::json;

    fn row(station: &str) -> RawRecord {
        [
            ("EMS_ID".to_string(), json!(station)),
            ("COLLECTION_END".to_string(), json!("20250101080000")),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn load_upstream_filters_on_canonical_station_ids() {
        let source = InMemorySource::new("mem", vec![row(" e1 "), row("E2"), row("E3")]);
        let canonicalizer = RecordCanonicalizer::upstream(Vancouver);
        let set = load_upstream(&source, &canonicalizer, &["E1".into(), "E3".into()]).unwrap();
        let stations: Vec<_> = set.records.iter().filter_map(|r| r.station_id()).collect();
        assert_eq!(stations, vec!["E1", "E3"]);
    }

    #[test]
    fn load_upstream_keeps_everything_without_a_filter() {
        let source = InMemorySource::new("mem", vec![row("E1"), row("E2")]);
        let set = load_upstream(&source, &RecordCanonicalizer::upstream(Vancouver), &[]).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn fetch_failures_propagate() {
        let source = InMemorySource::failing("mem", "catalog down");
        let err = load_upstream(&source, &RecordCanonicalizer::upstream(Vancouver), &[])
            .unwrap_err();
        assert!(matches!(err, SyncError::SourceUnavailable { .. }));
    }
}
