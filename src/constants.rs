use crate::columns::ColumnKey;

/// Columns of the EMS sample-results contract referenced by the pipeline.
pub mod columns {
    use super::ColumnKey;

    /// Monitoring location identifier (identity component).
    pub const EMS_ID: ColumnKey = ColumnKey::new("EMS_ID");
    /// Start of the sample collection window.
    pub const COLLECTION_START: ColumnKey = ColumnKey::new("COLLECTION_START");
    /// End of the sample collection window (identity component).
    pub const COLLECTION_END: ColumnKey = ColumnKey::new("COLLECTION_END");
    /// Measured parameter code (identity component).
    pub const PARAMETER_CODE: ColumnKey = ColumnKey::new("PARAMETER_CODE");
    /// Measured value (identity component at fixed precision).
    pub const RESULT: ColumnKey = ColumnKey::new("RESULT");
    /// WGS84 longitude of the monitoring location.
    pub const LONGITUDE: ColumnKey = ColumnKey::new("LONGITUDE");
    /// WGS84 latitude of the monitoring location.
    pub const LATITUDE: ColumnKey = ColumnKey::new("LATITUDE");
    /// Load-time attribute stamped on every uploaded feature.
    pub const GIS_LOAD_DATE: ColumnKey = ColumnKey::new("GIS_LOAD_DATE");
    /// Store-managed numeric row identifier.
    pub const OBJECTID: ColumnKey = ColumnKey::new("OBJECTID");
    /// Store-managed geometry column.
    pub const SHAPE: ColumnKey = ColumnKey::new("SHAPE");

    /// Columns carrying instants in the EMS contract.
    pub const TIMESTAMP_COLUMNS: [ColumnKey; 2] = [COLLECTION_START, COLLECTION_END];
    /// Composite identity key, in key order.
    pub const IDENTITY_COLUMNS: [ColumnKey; 4] = [EMS_ID, COLLECTION_END, PARAMETER_CODE, RESULT];
    /// Identity components canonicalized as upper-case codes.
    pub const CODE_COLUMNS: [ColumnKey; 2] = [EMS_ID, PARAMETER_CODE];
    /// Float-valued columns parsed during canonicalization.
    pub const NUMERIC_COLUMNS: [ColumnKey; 3] = [RESULT, LONGITUDE, LATITUDE];
    /// Store-internal columns that must never be uploaded as data.
    pub const ADMIN_COLUMNS: [ColumnKey; 2] = [OBJECTID, SHAPE];
}

/// Constants used by the outer join and column reconciliation.
pub mod join {
    /// Suffix applied to upstream variants of shared columns.
    pub const LEFT_SUFFIX: &str = "_x";
    /// Suffix applied to remote-store variants of shared columns.
    pub const RIGHT_SUFFIX: &str = "_y";
    /// Join-indicator column name.
    pub const MERGE_INDICATOR: &str = "_merge";
}

/// Constants used by record canonicalization.
pub mod canonical {
    /// Decimal places retained for `RESULT` before key comparison.
    pub const RESULT_DECIMALS: u32 = 6;
    /// Raw cell spellings that collapse into the single absent marker (case-insensitive).
    pub const NULL_TOKENS: [&str; 8] = ["", "na", "n/a", "nan", "nat", "none", "null", "<na>"];
}

/// Constants used by timestamp normalization.
pub mod timestamps {
    /// Compact numeric encoding used by the upstream CSV.
    pub const COMPACT_FORMAT: &str = "%Y%m%d%H%M%S";
    /// Civil zone of naive upstream timestamps.
    pub const UPSTREAM_ZONE: chrono_tz::Tz = chrono_tz::America::Vancouver;
    /// Locale-formatted naive layouts accepted from the feature store and CSV exports.
    pub const LOCALE_FORMATS: [&str; 8] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%d %I:%M:%S %p",
        "%m/%d/%Y %I:%M:%S %p",
        "%m/%d/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M",
        "%d-%b-%Y %H:%M:%S",
    ];
    /// Date-only layouts, interpreted as local midnight.
    pub const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];
    /// Offset-bearing layouts beyond RFC 3339.
    pub const AWARE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"];
    /// Upper bound on the forward search out of a daylight-saving gap, in minutes.
    pub const GAP_SEARCH_MINUTES: i64 = 24 * 60;
}

/// Defaults for configuration values and collaborator endpoints.
pub mod defaults {
    /// BC Data Catalog `resource_show` endpoint.
    pub const CKAN_API_URL: &str = "https://catalogue.data.gov.bc.ca/api/3/action/resource_show";
    /// EMS sample results, current expanded CSV.
    pub const RESOURCE_ID_CURRENT: &str = "6aa7f376-a4d3-4fb4-a51c-b4487600d516";
    /// EMS sample results, historic expanded CSV.
    pub const RESOURCE_ID_HISTORIC: &str = "32cc8da0-51ff-4235-9636-f84970e76fa3";
    /// Hosted feature layer item that mirrors the Hullcar Aquifer wells.
    pub const AGO_ITEM_ID: &str = "6cb28330305f49fcbc7e81e38f8dccfa";
    /// Hullcar Aquifer monitoring wells tracked by default.
    pub const MONITORING_LOCATION_IDS: [&str; 11] = [
        "E333852", "E333952", "E333959", "E301112", "E206908", "E319193", "E317974", "E317972",
        "E319192", "E317950", "E319191",
    ];
    /// Rows per CSV chunk.
    pub const CSV_CHUNK_SIZE: usize = 10_000;
    /// Features per `addFeatures` request.
    pub const APPEND_BATCH_SIZE: usize = 1_000;
    /// Upper bound on `query` pages fetched for one snapshot.
    pub const MAX_QUERY_PAGES: usize = 1_000;
    /// Token lifetime requested from the portal, in minutes.
    pub const TOKEN_EXPIRATION_MINUTES: u32 = 60;
    /// Referer sent with token requests.
    pub const TOKEN_REFERER: &str = "https://www.arcgis.com";
}

/// Environment variable names recognized by [`SyncConfig`](crate::config::SyncConfig).
pub mod env {
    /// Portal URL.
    pub const MAPHUB_URL: &str = "MAPHUB_URL";
    /// Portal user name.
    pub const AGO_USERNAME: &str = "AGO_USERNAME";
    /// Portal password.
    pub const AGO_PASSWORD: &str = "AGO_PASSWORD";
    /// Target item id.
    pub const AGO_ITEM_ID: &str = "AGO_ITEM_ID";
    /// Layer index inside the target item.
    pub const AGO_LAYER_INDEX: &str = "AGO_LAYER_INDEX";
    /// Group shared with after a replace.
    pub const AGO_GROUP_ID: &str = "AGO_GROUP_ID";
    /// Folder holding the target item.
    pub const AGO_FOLDER_ID: &str = "AGO_FOLDER_ID";
    /// Catalog `resource_show` endpoint.
    pub const EMS_CKAN_URL: &str = "EMS_CKAN_URL";
    /// Current-results resource id.
    pub const EMS_RESOURCE_ID_CURRENT: &str = "EMS_RESOURCE_ID_CURRENT";
    /// Historic-results resource id (optional).
    pub const EMS_RESOURCE_ID_HISTORIC: &str = "EMS_RESOURCE_ID_HISTORIC";
    /// Comma-separated monitoring location filter.
    pub const EMS_MONITORING_LOCATIONS: &str = "EMS_MONITORING_LOCATIONS";
    /// CSV chunk size (0 reads the whole file).
    pub const EMS_CSV_CHUNK_SIZE: &str = "EMS_CSV_CHUNK_SIZE";
    /// `append` or `replace`.
    pub const EMS_PUBLISH_STRATEGY: &str = "EMS_PUBLISH_STRATEGY";
    /// `esri` or `geojson`.
    pub const EMS_OUTPUT_SHAPE: &str = "EMS_OUTPUT_SHAPE";
}
