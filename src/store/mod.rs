//! Remote feature-store interfaces.
//!
//! The store is a black box exposing query-by-filter, append, and
//! replace-whole-layer operations. Implementations report per-feature
//! outcomes in an [`AppendReport`]. A publish fault that hits some features
//! is recorded against them in the report; errors are for faults that leave
//! no per-feature result.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use tracing::info;

use crate::canonical::RecordCanonicalizer;
use crate::data::{RecordOrigin, RecordSet};
use crate::errors::SyncError;
use crate::feature::Feature;
use crate::types::{FilterExpression, RawRecord};

/// ArcGIS REST implementation.
pub mod arcgis;

pub use arcgis::ArcGisStore;

/// One rejected feature from an append.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeatureFailure {
    /// Position of the feature in the submitted batch.
    pub index: usize,
    /// Object id assigned by the store, when it reports one.
    pub object_id: Option<i64>,
    /// Store error code.
    pub code: Option<i64>,
    /// Store error description.
    pub description: String,
}

/// Per-feature outcome of an append or replace.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppendReport {
    /// Features submitted.
    pub attempted: usize,
    /// Features the store accepted.
    pub succeeded: usize,
    /// Features the store rejected.
    pub failures: Vec<FeatureFailure>,
}

impl AppendReport {
    /// Report for a batch where every feature succeeded.
    pub fn all_succeeded(attempted: usize) -> Self {
        Self {
            attempted,
            succeeded: attempted,
            failures: Vec::new(),
        }
    }

    /// True when every submitted feature was accepted.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.succeeded == self.attempted
    }

    /// Fold a later sub-batch report into this one, shifting its indexes by `offset`.
    pub fn merge(&mut self, other: AppendReport, offset: usize) {
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.failures
            .extend(other.failures.into_iter().map(|mut failure| {
                failure.index += offset;
                failure
            }));
    }
}

impl fmt::Display for AppendReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "attempted={} succeeded={} failed={}",
            self.attempted,
            self.succeeded,
            self.failures.len()
        )?;
        for failure in &self.failures {
            write!(
                f,
                "; #{} code={} {}",
                failure.index,
                failure
                    .code
                    .map(|code| code.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                failure.description
            )?;
        }
        Ok(())
    }
}

/// Hosted feature layer.
pub trait FeatureStore {
    /// Stable store identifier used in logs and errors.
    fn id(&self) -> &str;
    /// Current rows matching `filter` (all rows when `None`), administrative columns included.
    fn query(&self, filter: Option<&str>) -> Result<Vec<RawRecord>, SyncError>;
    /// Append `features` to the layer.
    fn append(&self, features: &[Feature]) -> Result<AppendReport, SyncError>;
    /// Replace every row of the layer with `features`.
    fn replace(&self, features: &[Feature]) -> Result<AppendReport, SyncError>;
    /// Share the layer's item with `group_id`.
    fn share(&self, _group_id: &str) -> Result<(), SyncError> {
        Ok(())
    }
}

/// Query the store and canonicalize its snapshot.
///
/// A failed query propagates; it is never read as an empty layer.
pub fn load_remote(
    store: &dyn FeatureStore,
    filter: Option<&str>,
    canonicalizer: &RecordCanonicalizer,
) -> Result<RecordSet, SyncError> {
    let rows = store.query(filter)?;
    info!(
        "[ems_sync:store] store '{}' returned {} rows (filter: {})",
        store.id(),
        rows.len(),
        filter.unwrap_or("none")
    );
    Ok(canonicalizer.canonicalize_all(RecordOrigin::RemoteSnapshot, &rows))
}

/// Call log of an [`InMemoryStore`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StoreCalls {
    /// Filters passed to `query`, in call order.
    pub queries: Vec<Option<FilterExpression>>,
    /// Batches passed to `append`.
    pub appends: Vec<Vec<Feature>>,
    /// Batches passed to `replace`.
    pub replaces: Vec<Vec<Feature>>,
    /// Groups passed to `share`.
    pub shares: Vec<String>,
}

/// In-memory feature store for tests.
///
/// Returns a fixed snapshot from `query` (filters are recorded, not applied).
/// Can be made to fail queries or appends, or to reject chosen batch positions.
pub struct InMemoryStore {
    id: String,
    rows: Vec<RawRecord>,
    query_failure: Option<String>,
    append_failure: Option<String>,
    rejected_positions: HashSet<usize>,
    calls: RefCell<StoreCalls>,
}

impl InMemoryStore {
    /// Store whose layer currently holds `rows`.
    pub fn new(rows: Vec<RawRecord>) -> Self {
        Self {
            id: "memory".to_string(),
            rows,
            query_failure: None,
            append_failure: None,
            rejected_positions: HashSet::new(),
            calls: RefCell::new(StoreCalls::default()),
        }
    }

    /// Make every query fail with `reason`.
    pub fn with_query_failure(mut self, reason: impl Into<String>) -> Self {
        self.query_failure = Some(reason.into());
        self
    }

    /// Make every append/replace fail at the transport level with `reason`.
    pub fn with_append_failure(mut self, reason: impl Into<String>) -> Self {
        self.append_failure = Some(reason.into());
        self
    }

    /// Reject the features at these batch positions.
    pub fn rejecting(mut self, positions: impl IntoIterator<Item = usize>) -> Self {
        self.rejected_positions.extend(positions);
        self
    }

    /// Snapshot of the calls made so far.
    pub fn calls(&self) -> StoreCalls {
        self.calls.borrow().clone()
    }

    fn report_for(&self, features: &[Feature]) -> Result<AppendReport, SyncError> {
        if let Some(reason) = &self.append_failure {
            return Err(SyncError::StoreRejected {
                details: reason.clone(),
            });
        }
        let failures: Vec<FeatureFailure> = (0..features.len())
            .filter(|index| self.rejected_positions.contains(index))
            .map(|index| FeatureFailure {
                index,
                object_id: None,
                code: Some(1000),
                description: "rejected by in-memory store".to_string(),
            })
            .collect();
        Ok(AppendReport {
            attempted: features.len(),
            succeeded: features.len() - failures.len(),
            failures,
        })
    }
}

impl FeatureStore for InMemoryStore {
    fn id(&self) -> &str {
        &self.id
    }

    fn query(&self, filter: Option<&str>) -> Result<Vec<RawRecord>, SyncError> {
        self.calls
            .borrow_mut()
            .queries
            .push(filter.map(str::to_string));
        match &self.query_failure {
            Some(reason) => Err(SyncError::unavailable(self.id.clone(), reason.clone())),
            None => Ok(self.rows.clone()),
        }
    }

    fn append(&self, features: &[Feature]) -> Result<AppendReport, SyncError> {
        self.calls.borrow_mut().appends.push(features.to_vec());
        self.report_for(features)
    }

    fn replace(&self, features: &[Feature]) -> Result<AppendReport, SyncError> {
        self.calls.borrow_mut().replaces.push(features.to_vec());
        self.report_for(features)
    }

    fn share(&self, group_id: &str) -> Result<(), SyncError> {
        self.calls.borrow_mut().shares.push(group_id.to_string());
        Ok(())
    }
}
