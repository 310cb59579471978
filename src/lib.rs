#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// CLI runner shared by the `ems_sync` binary.
pub mod app;
/// Canonicalization of raw rows into comparable records.
pub mod canonical;
/// Outer join, change detection, and the latest-timestamp gate.
pub mod change;
/// Column keys and join-suffix helpers.
pub mod columns;
/// Run configuration.
pub mod config;
/// Centralized constants used across canonicalization, sources, and stores.
pub mod constants;
/// Record, value, and identity-key types.
pub mod data;
/// Point-feature encoding in Esri JSON and GeoJSON shapes.
pub mod feature;
/// Post-join column cleanup.
pub mod reconcile;
/// Upstream source traits and the catalog CSV source.
pub mod source;
/// Feature-store traits and the ArcGIS REST store.
pub mod store;
/// Sync orchestration and publish strategies.
pub mod sync;
/// Timestamp parsing and zone normalization.
pub mod timestamps;
/// Shared type aliases.
pub mod types;
/// Text and number normalization helpers.
pub mod utils;

mod errors;

pub use canonical::RecordCanonicalizer;
pub use change::{ChangeSet, LatestCheck, detect_changes, latest_timestamp_gate};
pub use config::{PublishStrategy, StoreSettings, SyncConfig, UpstreamSettings};
pub use data::{IdentityKey, Record, RecordOrigin, RecordSet, Value};
pub use errors::SyncError;
pub use feature::{EncodedBatch, Feature, FeatureEncoder, OutputShape};
pub use reconcile::ColumnReconciler;
pub use source::{CkanCsvSource, InMemorySource, UpstreamSource};
pub use store::{AppendReport, ArcGisStore, FeatureFailure, FeatureStore, InMemoryStore};
pub use sync::{NoDataReason, SyncOrchestrator, SyncOutcome, SyncStage, run_sync};
pub use timestamps::{TargetZone, TimestampNormalizer, ZonePolicy};
pub use types::{ColumnName, RawRecord, RawValue, SourceId, StationId};
