//! Sync orchestration.
//!
//! One run is a linear pipeline over one snapshot of each side:
//! `FETCH_UPSTREAM -> FETCH_REMOTE -> DETECT_CHANGE -> RECONCILE -> ENCODE -> APPEND`
//! (or `REPLACE`). Any failure before the final stage leaves the store untouched.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::fmt;
use tracing::{error, info, warn};

use crate::canonical::RecordCanonicalizer;
use crate::change::{LatestCheck, detect_changes, latest_timestamp_gate};
use crate::config::{PublishStrategy, SyncConfig};
use crate::constants::columns::COLLECTION_END;
use crate::data::{RecordSet, format_instant};
use crate::errors::SyncError;
use crate::feature::{EncodingRejection, Feature, FeatureEncoder};
use crate::reconcile::ColumnReconciler;
use crate::source::{UpstreamSource, load_upstream};
use crate::store::{AppendReport, FeatureStore, load_remote};
use crate::types::FilterExpression;

/// Pipeline stage, as logged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncStage {
    /// Load and canonicalize the upstream snapshot.
    FetchUpstream,
    /// Query and canonicalize the remote snapshot.
    FetchRemote,
    /// Latest-timestamp gate and outer join.
    DetectChange,
    /// Collapse join columns.
    Reconcile,
    /// Build features.
    Encode,
    /// Append to the layer.
    Append,
    /// Rebuild the layer.
    Replace,
}

impl SyncStage {
    /// Log label of the stage.
    pub const fn as_str(&self) -> &'static str {
        match self {
            SyncStage::FetchUpstream => "FETCH_UPSTREAM",
            SyncStage::FetchRemote => "FETCH_REMOTE",
            SyncStage::DetectChange => "DETECT_CHANGE",
            SyncStage::Reconcile => "RECONCILE",
            SyncStage::Encode => "ENCODE",
            SyncStage::Append => "APPEND",
            SyncStage::Replace => "REPLACE",
        }
    }
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run ended without touching the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NoDataReason {
    /// No upstream rows survived the station filter.
    EmptyUpstream,
    /// Both sides end at the same `COLLECTION_END`.
    LatestTimestampsMatch {
        /// The shared latest instant.
        latest: DateTime<Utc>,
    },
    /// Every upstream identity key already exists remotely.
    NoNewRecords,
}

impl fmt::Display for NoDataReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoDataReason::EmptyUpstream => f.write_str("upstream snapshot is empty"),
            NoDataReason::LatestTimestampsMatch { latest } => write!(
                f,
                "latest COLLECTION_END matches on both sides ({})",
                format_instant(latest)
            ),
            NoDataReason::NoNewRecords => f.write_str("every upstream record already exists remotely"),
        }
    }
}

/// Terminal state of a run.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncOutcome {
    /// Nothing to do; a successful run.
    NoNewData {
        /// What made the run a no-op.
        reason: NoDataReason,
    },
    /// Features were sent to the store (or every new record failed to encode).
    Published {
        /// Strategy used.
        strategy: PublishStrategy,
        /// Size of the change set.
        change_count: usize,
        /// Per-feature store outcome.
        report: AppendReport,
        /// Change-set records excluded from the batch.
        rejections: Vec<EncodingRejection>,
    },
}

impl SyncOutcome {
    /// False only when the store rejected part of the batch.
    pub fn is_success(&self) -> bool {
        match self {
            SyncOutcome::NoNewData { .. } => true,
            SyncOutcome::Published { report, .. } => report.is_complete(),
        }
    }
}

/// `COLLECTION_END >= DATE 'YYYY-MM-DD'` for the earliest upstream instant.
///
/// Uses the earlier of the UTC date and the civil date in `zone`, so a row
/// near midnight is never excluded from the remote snapshot.
pub fn remote_filter(earliest: DateTime<Utc>, zone: Tz) -> FilterExpression {
    let utc_date = earliest.date_naive();
    let civil_date = earliest.with_timezone(&zone).date_naive();
    format!(
        "{} >= DATE '{}'",
        COLLECTION_END,
        utc_date.min(civil_date).format("%Y-%m-%d")
    )
}

/// Runs one sync between an upstream source and a feature store.
pub struct SyncOrchestrator<'a> {
    config: &'a SyncConfig,
    source: &'a dyn UpstreamSource,
    store: &'a dyn FeatureStore,
    reconciler: ColumnReconciler,
}

impl<'a> SyncOrchestrator<'a> {
    /// Orchestrator over the given collaborators.
    pub fn new(
        config: &'a SyncConfig,
        source: &'a dyn UpstreamSource,
        store: &'a dyn FeatureStore,
    ) -> Self {
        Self {
            config,
            source,
            store,
            reconciler: ColumnReconciler::default(),
        }
    }

    /// Use a custom column reconciler.
    pub fn with_reconciler(mut self, reconciler: ColumnReconciler) -> Self {
        self.reconciler = reconciler;
        self
    }

    /// Run the pipeline once. `run_started` is stamped as the load date.
    pub fn run(&self, run_started: DateTime<Utc>) -> Result<SyncOutcome, SyncError> {
        let strategy = self.config.publish_strategy;
        let zone = self.config.upstream.zone;

        enter(SyncStage::FetchUpstream);
        let upstream = load_upstream(
            self.source,
            &RecordCanonicalizer::upstream(zone),
            &self.config.upstream.monitoring_locations,
        )?;
        if upstream.is_empty() {
            return Ok(no_new_data(NoDataReason::EmptyUpstream));
        }

        enter(SyncStage::FetchRemote);
        let filter = match strategy {
            PublishStrategy::Append => upstream
                .earliest_collection_end()
                .map(|earliest| remote_filter(earliest, zone)),
            PublishStrategy::Replace => None,
        };
        let remote = load_remote(self.store, filter.as_deref(), &RecordCanonicalizer::remote())?;

        enter(SyncStage::DetectChange);
        if self.config.latest_timestamp_gate
            && let LatestCheck::NoActionNeeded { latest } = latest_timestamp_gate(&upstream, &remote)
        {
            return Ok(no_new_data(NoDataReason::LatestTimestampsMatch { latest }));
        }
        let change_set = detect_changes(&upstream, &remote);
        if change_set.is_empty() {
            return Ok(no_new_data(NoDataReason::NoNewRecords));
        }
        let change_count = change_set.len();
        info!("[ems_sync:sync] {change_count} new records found upstream");

        enter(SyncStage::Reconcile);
        let new_records = self.reconciler.reconcile(change_set);

        enter(SyncStage::Encode);
        let encoder = FeatureEncoder::new(self.config.output_shape, run_started);
        let encoded = encoder.encode_batch(&new_records);
        if !encoded.rejections.is_empty() {
            warn!(
                "[ems_sync:sync] {} of {change_count} new records excluded (missing coordinates)",
                encoded.rejections.len()
            );
        }
        let rejections = encoded.rejections;
        let features = match strategy {
            PublishStrategy::Append => encoded.features,
            PublishStrategy::Replace => {
                let mut features = self.encode_snapshot(&encoder, remote);
                features.extend(encoded.features);
                features
            }
        };

        if features.is_empty() {
            warn!("[ems_sync:sync] no encodable features; store left untouched");
            return Ok(SyncOutcome::Published {
                strategy,
                change_count,
                report: AppendReport::default(),
                rejections,
            });
        }

        let report = match strategy {
            PublishStrategy::Append => {
                enter(SyncStage::Append);
                self.store.append(&features).inspect_err(|err| {
                    error!("[ems_sync:sync] append of {} features failed: {err}", features.len());
                })?
            }
            PublishStrategy::Replace => {
                enter(SyncStage::Replace);
                let report = self.store.replace(&features).inspect_err(|err| {
                    error!("[ems_sync:sync] replace with {} features failed: {err}", features.len());
                })?;
                if report.is_complete()
                    && let Some(group_id) = &self.config.store.group_id
                {
                    self.store.share(group_id)?;
                }
                report
            }
        };

        if report.is_complete() {
            info!(
                "[ems_sync:sync] new data uploaded: {} features ({strategy})",
                report.succeeded
            );
        } else {
            error!("[ems_sync:sync] store rejected part of the batch: {report}");
        }
        Ok(SyncOutcome::Published {
            strategy,
            change_count,
            report,
            rejections,
        })
    }

    fn encode_snapshot(&self, encoder: &FeatureEncoder, remote: RecordSet) -> Vec<Feature> {
        let kept = self.reconciler.strip_administrative(remote);
        let encoded = encoder.encode_batch(&kept);
        if !encoded.rejections.is_empty() {
            warn!(
                "[ems_sync:sync] {} existing rows lack coordinates and will not be republished",
                encoded.rejections.len()
            );
        }
        encoded.features
    }
}

/// Run one sync with the default column reconciler.
pub fn run_sync(
    config: &SyncConfig,
    source: &dyn UpstreamSource,
    store: &dyn FeatureStore,
    run_started: DateTime<Utc>,
) -> Result<SyncOutcome, SyncError> {
    SyncOrchestrator::new(config, source, store).run(run_started)
}

fn enter(stage: SyncStage) {
    info!("[ems_sync:sync] {stage}");
}

fn no_new_data(reason: NoDataReason) -> SyncOutcome {
    info!("[ems_sync:sync] no new data: {reason}");
    SyncOutcome::NoNewData { reason }
}
