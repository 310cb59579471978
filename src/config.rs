use chrono_tz::Tz;
use std::fmt;
use std::str::FromStr;

use crate::constants::defaults::{
    AGO_ITEM_ID, CKAN_API_URL, CSV_CHUNK_SIZE, MONITORING_LOCATION_IDS, RESOURCE_ID_CURRENT,
};
use crate::constants::env;
use crate::constants::timestamps::UPSTREAM_ZONE;
use crate::errors::SyncError;
use crate::feature::OutputShape;
use crate::types::{ItemId, ResourceId, StationId};
use crate::utils::normalize_code;

/// How new data reaches the feature layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PublishStrategy {
    /// Append the change set to the existing layer.
    #[default]
    Append,
    /// Rebuild the whole layer from the remote snapshot plus the change set.
    Replace,
}

impl fmt::Display for PublishStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishStrategy::Append => f.write_str("append"),
            PublishStrategy::Replace => f.write_str("replace"),
        }
    }
}

impl FromStr for PublishStrategy {
    type Err = SyncError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(PublishStrategy::Append),
            "replace" | "republish" => Ok(PublishStrategy::Replace),
            other => Err(SyncError::Configuration(format!(
                "unknown publish strategy '{other}' (expected 'append' or 'replace')"
            ))),
        }
    }
}

/// Portal connection settings.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct StoreSettings {
    /// Portal base URL (e.g. `https://governmentofbc.maps.arcgis.com`).
    pub portal_url: String,
    /// Portal user name.
    pub username: String,
    /// Portal password.
    pub password: String,
    /// Item holding the target layer.
    pub item_id: ItemId,
    /// Layer index inside the item.
    pub layer_index: u32,
    /// Group shared with after a replace.
    pub group_id: Option<String>,
    /// Folder holding the item.
    pub folder_id: Option<String>,
}

impl fmt::Debug for StoreSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreSettings")
            .field("portal_url", &self.portal_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("item_id", &self.item_id)
            .field("layer_index", &self.layer_index)
            .field("group_id", &self.group_id)
            .field("folder_id", &self.folder_id)
            .finish()
    }
}

/// Upstream catalog settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpstreamSettings {
    /// Catalog `resource_show` endpoint.
    pub catalog_url: String,
    /// Resource ids loaded in order (current first, then historic when configured).
    pub resource_ids: Vec<ResourceId>,
    /// Monitoring locations kept after canonicalization; empty keeps every station.
    pub monitoring_locations: Vec<StationId>,
    /// Rows per CSV chunk; `None` reads each file in one pass.
    pub chunk_size: Option<usize>,
    /// Civil zone of naive upstream timestamps.
    pub zone: Tz,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            catalog_url: CKAN_API_URL.to_string(),
            resource_ids: vec![RESOURCE_ID_CURRENT.to_string()],
            monitoring_locations: MONITORING_LOCATION_IDS
                .iter()
                .map(|id| id.to_string())
                .collect(),
            chunk_size: Some(CSV_CHUNK_SIZE),
            zone: UPSTREAM_ZONE,
        }
    }
}

/// Complete run configuration, built once at process start.
#[derive(Clone, Debug, PartialEq)]
pub struct SyncConfig {
    /// Feature-store connection.
    pub store: StoreSettings,
    /// Upstream catalog and CSV loading.
    pub upstream: UpstreamSettings,
    /// Append or replace.
    pub publish_strategy: PublishStrategy,
    /// Wire shape of encoded features.
    pub output_shape: OutputShape,
    /// Allow the latest-timestamp check to end a run early when both sides agree.
    pub latest_timestamp_gate: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            store: StoreSettings {
                item_id: AGO_ITEM_ID.to_string(),
                ..StoreSettings::default()
            },
            upstream: UpstreamSettings::default(),
            publish_strategy: PublishStrategy::default(),
            output_shape: OutputShape::default(),
            latest_timestamp_gate: true,
        }
    }
}

impl SyncConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, SyncError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup` (blank values count as unset).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let require = |key: &str| {
            get(key).ok_or_else(|| {
                SyncError::Configuration(format!("missing required environment variable {key}"))
            })
        };

        let mut config = SyncConfig::default();
        config.store.portal_url = require(env::MAPHUB_URL)?;
        config.store.username = require(env::AGO_USERNAME)?;
        config.store.password = require(env::AGO_PASSWORD)?;
        if let Some(item_id) = get(env::AGO_ITEM_ID) {
            config.store.item_id = item_id;
        }
        if let Some(raw) = get(env::AGO_LAYER_INDEX) {
            config.store.layer_index = raw.parse().map_err(|_| {
                SyncError::Configuration(format!("invalid {}: '{raw}'", env::AGO_LAYER_INDEX))
            })?;
        }
        config.store.group_id = get(env::AGO_GROUP_ID);
        config.store.folder_id = get(env::AGO_FOLDER_ID);

        if let Some(url) = get(env::EMS_CKAN_URL) {
            config.upstream.catalog_url = url;
        }
        if let Some(current) = get(env::EMS_RESOURCE_ID_CURRENT) {
            config.upstream.resource_ids = vec![current];
        }
        if let Some(historic) = get(env::EMS_RESOURCE_ID_HISTORIC) {
            config.upstream.resource_ids.push(historic);
        }
        if let Some(raw) = get(env::EMS_MONITORING_LOCATIONS) {
            config.upstream.monitoring_locations = parse_station_list(&raw);
        }
        if let Some(raw) = get(env::EMS_CSV_CHUNK_SIZE) {
            config.upstream.chunk_size = parse_chunk_size(&raw)?;
        }
        if let Some(raw) = get(env::EMS_PUBLISH_STRATEGY) {
            config.publish_strategy = raw.parse()?;
        }
        if let Some(raw) = get(env::EMS_OUTPUT_SHAPE) {
            config.output_shape = raw.parse()?;
        }
        Ok(config)
    }
}

/// Parse a comma-separated station list into canonical codes.
pub fn parse_station_list(raw: &str) -> Vec<StationId> {
    raw.split(',')
        .map(normalize_code)
        .filter(|code| !code.is_empty())
        .collect()
}

/// Parse a chunk size; `0` means "read the whole file".
pub fn parse_chunk_size(raw: &str) -> Result<Option<usize>, SyncError> {
    let size: usize = raw
        .trim()
        .parse()
        .map_err(|_| SyncError::Configuration(format!("invalid chunk size '{raw}'")))?;
    Ok((size > 0).then_some(size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("MAPHUB_URL", "https://example.maps.arcgis.com"),
        ("AGO_USERNAME", "sync_user"),
        ("AGO_PASSWORD", "secret"),
    ];

    #[test]
    fn defaults_apply_when_only_credentials_are_set() {
        let config = SyncConfig::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(config.store.item_id, AGO_ITEM_ID);
        assert_eq!(config.store.layer_index, 0);
        assert_eq!(config.upstream.resource_ids, vec![RESOURCE_ID_CURRENT]);
        assert_eq!(config.upstream.monitoring_locations.len(), 11);
        assert_eq!(config.upstream.chunk_size, Some(CSV_CHUNK_SIZE));
        assert_eq!(config.publish_strategy, PublishStrategy::Append);
        assert_eq!(config.output_shape, OutputShape::Esri);
        assert!(config.latest_timestamp_gate);
    }

    #[test]
    fn missing_credentials_are_a_configuration_error() {
        let err = SyncConfig::from_lookup(lookup(&REQUIRED[..2])).unwrap_err();
        assert!(matches!(err, SyncError::Configuration(message) if message.contains("AGO_PASSWORD")));

        let mut blank = REQUIRED.to_vec();
        blank[0] = ("MAPHUB_URL", "   ");
        assert!(SyncConfig::from_lookup(lookup(&blank)).is_err());
    }

    #[test]
    fn optional_values_override_defaults() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("EMS_RESOURCE_ID_HISTORIC", "historic-id"),
            ("EMS_MONITORING_LOCATIONS", " e1, E2 ,,"),
            ("EMS_CSV_CHUNK_SIZE", "0"),
            ("EMS_PUBLISH_STRATEGY", "Replace"),
            ("EMS_OUTPUT_SHAPE", "geojson"),
            ("AGO_GROUP_ID", "group-1"),
            ("AGO_LAYER_INDEX", "2"),
        ]);
        let config = SyncConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(
            config.upstream.resource_ids,
            vec![RESOURCE_ID_CURRENT, "historic-id"]
        );
        assert_eq!(config.upstream.monitoring_locations, vec!["E1", "E2"]);
        assert_eq!(config.upstream.chunk_size, None);
        assert_eq!(config.publish_strategy, PublishStrategy::Replace);
        assert_eq!(config.output_shape, OutputShape::GeoJson);
        assert_eq!(config.store.group_id.as_deref(), Some("group-1"));
        assert_eq!(config.store.layer_index, 2);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("EMS_PUBLISH_STRATEGY", "upsert"));
        assert!(SyncConfig::from_lookup(lookup(&pairs)).is_err());
        assert!(parse_chunk_size("-5").is_err());
    }

    #[test]
    fn debug_output_redacts_the_password() {
        let config = SyncConfig::from_lookup(lookup(&REQUIRED)).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
