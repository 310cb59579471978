//! Encoding of reconciled records into upload-ready point features.
//!
//! Two wire shapes are supported behind the [`FeatureWriter`] trait:
//! - Esri JSON: `{"attributes": {...}, "geometry": {"x": .., "y": ..}}`
//! - GeoJSON: `{"type": "Feature", "geometry": {"type": "Point", ...}, "properties": {...}}`
//!
//! Instants are rendered as RFC 3339 text with an explicit offset. Every
//! feature of one batch carries the same `GIS_LOAD_DATE`, the run start time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::canonical::RecordCanonicalizer;
use crate::constants::columns::{GIS_LOAD_DATE, LATITUDE, LONGITUDE};
use crate::data::{IdentityKey, Record, RecordSet, format_instant};
use crate::errors::SyncError;
use crate::timestamps::{TargetZone, TimestampNormalizer, ZonePolicy};
use crate::types::RawRecord;

/// Ordered JSON attribute map of one feature.
pub type AttributeMap = serde_json::Map<String, serde_json::Value>;

/// Point geometry in Esri JSON form.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EsriPoint {
    /// Longitude.
    pub x: f64,
    /// Latitude.
    pub y: f64,
}

/// Attribute/geometry feature accepted by ArcGIS `addFeatures`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EsriFeature {
    /// Column values.
    pub attributes: AttributeMap,
    /// Point location.
    pub geometry: EsriPoint,
}

/// GeoJSON geometry (points only).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GeoJsonGeometry {
    /// `[longitude, latitude]`.
    Point { coordinates: [f64; 2] },
}

/// GeoJSON `Feature`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "Feature")]
pub struct GeoJsonFeature {
    /// Point location.
    pub geometry: GeoJsonGeometry,
    /// Column values.
    pub properties: AttributeMap,
}

/// One upload-ready feature in either wire shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Feature {
    /// Esri JSON feature.
    Esri(EsriFeature),
    /// GeoJSON feature.
    GeoJson(GeoJsonFeature),
}

impl Feature {
    /// Attribute map regardless of shape.
    pub fn attributes(&self) -> &AttributeMap {
        match self {
            Feature::Esri(feature) => &feature.attributes,
            Feature::GeoJson(feature) => &feature.properties,
        }
    }

    /// `(x, y)` of the point geometry.
    pub fn point(&self) -> (f64, f64) {
        match self {
            Feature::Esri(feature) => (feature.geometry.x, feature.geometry.y),
            Feature::GeoJson(feature) => match feature.geometry {
                GeoJsonGeometry::Point { coordinates: [x, y] } => (x, y),
            },
        }
    }

    /// Shape this feature was encoded in.
    pub fn shape(&self) -> OutputShape {
        match self {
            Feature::Esri(_) => OutputShape::Esri,
            Feature::GeoJson(_) => OutputShape::GeoJson,
        }
    }

    /// Esri JSON rendering, converting GeoJSON features when needed.
    pub fn to_esri(&self) -> EsriFeature {
        match self {
            Feature::Esri(feature) => feature.clone(),
            Feature::GeoJson(feature) => {
                let (x, y) = self.point();
                EsriFeature {
                    attributes: feature.properties.clone(),
                    geometry: EsriPoint { x, y },
                }
            }
        }
    }

    /// Attributes back as a raw row (for verification and republishing).
    pub fn to_raw_record(&self) -> RawRecord {
        self.attributes()
            .iter()
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect()
    }

    /// Decode the attributes back into a canonical record.
    ///
    /// Encoded instants carry their offset, so they are read under the
    /// already-absolute policy.
    pub fn decode(&self) -> Record {
        let canonicalizer = RecordCanonicalizer::new(TimestampNormalizer::new(
            ZonePolicy::AlreadyAware,
            TargetZone::Utc,
        ));
        canonicalizer.canonicalize(&self.to_raw_record())
    }
}

/// Wire shape selector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputShape {
    /// Esri JSON attribute/geometry pairs.
    #[default]
    Esri,
    /// GeoJSON `Feature` objects.
    GeoJson,
}

impl OutputShape {
    /// Writer producing this shape.
    pub fn writer(self) -> Box<dyn FeatureWriter> {
        match self {
            OutputShape::Esri => Box::new(EsriWriter),
            OutputShape::GeoJson => Box::new(GeoJsonWriter),
        }
    }
}

impl fmt::Display for OutputShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputShape::Esri => f.write_str("esri"),
            OutputShape::GeoJson => f.write_str("geojson"),
        }
    }
}

impl FromStr for OutputShape {
    type Err = SyncError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "esri" | "esrijson" | "arcgis" => Ok(OutputShape::Esri),
            "geojson" => Ok(OutputShape::GeoJson),
            other => Err(SyncError::Configuration(format!(
                "unknown output shape '{other}' (expected 'esri' or 'geojson')"
            ))),
        }
    }
}

/// Builds one wire-shaped feature from attributes and a point.
pub trait FeatureWriter: Send + Sync {
    /// Shape produced by this writer.
    fn shape(&self) -> OutputShape;
    /// Assemble the feature.
    fn write(&self, attributes: AttributeMap, x: f64, y: f64) -> Feature;
}

/// Writer for Esri JSON features.
#[derive(Clone, Copy, Debug, Default)]
pub struct EsriWriter;

impl FeatureWriter for EsriWriter {
    fn shape(&self) -> OutputShape {
        OutputShape::Esri
    }

    fn write(&self, attributes: AttributeMap, x: f64, y: f64) -> Feature {
        Feature::Esri(EsriFeature {
            attributes,
            geometry: EsriPoint { x, y },
        })
    }
}

/// Writer for GeoJSON features.
#[derive(Clone, Copy, Debug, Default)]
pub struct GeoJsonWriter;

impl FeatureWriter for GeoJsonWriter {
    fn shape(&self) -> OutputShape {
        OutputShape::GeoJson
    }

    fn write(&self, attributes: AttributeMap, x: f64, y: f64) -> Feature {
        Feature::GeoJson(GeoJsonFeature {
            geometry: GeoJsonGeometry::Point {
                coordinates: [x, y],
            },
            properties: attributes,
        })
    }
}

/// Why a record could not be encoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectionReason {
    /// `LONGITUDE` absent or non-numeric.
    MissingLongitude,
    /// `LATITUDE` absent or non-numeric.
    MissingLatitude,
    /// Both coordinates absent or non-numeric.
    MissingCoordinates,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::MissingLongitude => f.write_str("missing or non-numeric LONGITUDE"),
            RejectionReason::MissingLatitude => f.write_str("missing or non-numeric LATITUDE"),
            RejectionReason::MissingCoordinates => {
                f.write_str("missing or non-numeric LONGITUDE and LATITUDE")
            }
        }
    }
}

/// A record excluded from the batch, with its position and identity.
#[derive(Clone, Debug, PartialEq)]
pub struct EncodingRejection {
    /// Position of the record in the encoded set.
    pub index: usize,
    /// Identity of the rejected record.
    pub key: IdentityKey,
    /// What was missing.
    pub reason: RejectionReason,
}

/// Features plus the records that could not be encoded.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EncodedBatch {
    /// Upload-ready features, in record order.
    pub features: Vec<Feature>,
    /// Records left out of `features`.
    pub rejections: Vec<EncodingRejection>,
}

impl EncodedBatch {
    /// True when there is nothing to upload.
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Encodes records as features in a selectable shape, stamped with one load time.
pub struct FeatureEncoder {
    writer: Box<dyn FeatureWriter>,
    loaded_at: DateTime<Utc>,
}

impl FeatureEncoder {
    /// Encoder for `shape` stamping `loaded_at` on every feature.
    pub fn new(shape: OutputShape, loaded_at: DateTime<Utc>) -> Self {
        Self::with_writer(shape.writer(), loaded_at)
    }

    /// Encoder with a custom writer.
    pub fn with_writer(writer: Box<dyn FeatureWriter>, loaded_at: DateTime<Utc>) -> Self {
        Self { writer, loaded_at }
    }

    /// Shape produced by this encoder.
    pub fn shape(&self) -> OutputShape {
        self.writer.shape()
    }

    /// Load time stamped on every feature.
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Encode one record; fails only when a coordinate is missing.
    pub fn encode(&self, record: &Record) -> Result<Feature, RejectionReason> {
        let x = record.field(LONGITUDE).as_f64();
        let y = record.field(LATITUDE).as_f64();
        let (x, y) = match (x, y) {
            (Some(x), Some(y)) => (x, y),
            (None, Some(_)) => return Err(RejectionReason::MissingLongitude),
            (Some(_), None) => return Err(RejectionReason::MissingLatitude),
            (None, None) => return Err(RejectionReason::MissingCoordinates),
        };

        let mut attributes = AttributeMap::new();
        for (column, value) in record.iter() {
            attributes.insert(column.to_string(), value.to_json());
        }
        attributes.insert(
            GIS_LOAD_DATE.as_str().to_string(),
            serde_json::Value::String(format_instant(&self.loaded_at)),
        );
        Ok(self.writer.write(attributes, x, y))
    }

    /// Encode every record, collecting rejections instead of failing the batch.
    pub fn encode_batch(&self, records: &RecordSet) -> EncodedBatch {
        let mut batch = EncodedBatch::default();
        for (index, record) in records.records.iter().enumerate() {
            match self.encode(record) {
                Ok(feature) => batch.features.push(feature),
                Err(reason) => {
                    let key = record.identity_key();
                    warn!("[ems_sync:encode] skipping record {index} ({key}): {reason}");
                    batch.rejections.push(EncodingRejection { index, key, reason });
                }
            }
        }
        batch
    }
}

impl fmt::Debug for FeatureEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureEncoder")
            .field("shape", &self.shape())
            .field("loaded_at", &self.loaded_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{RecordOrigin, Value};
    use chrono::TimeZone;
    use serde_json::json;

    fn loaded_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 11, 18, 30, 0).unwrap()
    }

    fn located(lon: Value, lat: Value) -> Record {
        Record::new()
            .with("EMS_ID", Value::Text("E333852".into()))
            .with(
                "COLLECTION_END",
                Value::Instant(Utc.with_ymd_and_hms(2025, 1, 1, 16, 0, 0).unwrap()),
            )
            .with("PARAMETER_CODE", Value::Text("PH-F".into()))
            .with("RESULT", Value::Number(7.0))
            .with("LONGITUDE", lon)
            .with("LATITUDE", lat)
            .with("UNIT", Value::Absent)
    }

    #[test]
    fn esri_features_carry_attributes_geometry_and_load_date() {
        let encoder = FeatureEncoder::new(OutputShape::Esri, loaded_at());
        let feature = encoder
            .encode(&located(Value::Number(-119.25), Value::Number(50.5)))
            .unwrap();
        let wire = serde_json::to_value(&feature).unwrap();
        assert_eq!(wire["geometry"], json!({"x": -119.25, "y": 50.5}));
        assert_eq!(wire["attributes"]["COLLECTION_END"], json!("2025-01-01T16:00:00+00:00"));
        assert_eq!(wire["attributes"]["GIS_LOAD_DATE"], json!("2025-04-11T18:30:00+00:00"));
        assert_eq!(wire["attributes"]["UNIT"], json!(null));
        assert_eq!(wire["attributes"]["RESULT"], json!(7.0));
    }

    #[test]
    fn empty_record_set_encodes_to_an_empty_batch() {
        for shape in [OutputShape::Esri, OutputShape::GeoJson] {
            let batch = FeatureEncoder::new(shape, loaded_at())
                .encode_batch(&RecordSet::new(RecordOrigin::UpstreamCurrent, Vec::new()));
            assert!(batch.features.is_empty());
            assert!(batch.rejections.is_empty());
        }
    }

    #[test]
    fn geojson_features_use_point_geometry_and_properties() {
        let encoder = FeatureEncoder::new(OutputShape::GeoJson, loaded_at());
        let feature = encoder
            .encode(&located(Value::Number(-119.25), Value::Number(50.5)))
            .unwrap();
        let wire = serde_json::to_value(&feature).unwrap();
        assert_eq!(wire["type"], json!("Feature"));
        assert_eq!(
            wire["geometry"],
            json!({"type": "Point", "coordinates": [-119.25, 50.5]})
        );
        assert_eq!(wire["properties"]["EMS_ID"], json!("E333852"));
        assert_eq!(feature.to_esri().geometry, EsriPoint { x: -119.25, y: 50.5 });
    }

    #[test]
    fn missing_coordinates_reject_only_that_record() {
        let encoder = FeatureEncoder::new(OutputShape::Esri, loaded_at());
        let records = RecordSet::new(
            RecordOrigin::UpstreamCurrent,
            vec![
                located(Value::Number(-119.0), Value::Number(50.0)),
                located(Value::Number(-119.0), Value::Absent),
                located(Value::Number(-118.0), Value::Number(51.0)),
            ],
        );
        let batch = encoder.encode_batch(&records);
        assert_eq!(batch.features.len(), 2);
        assert_eq!(batch.rejections.len(), 1);
        assert_eq!(batch.rejections[0].index, 1);
        assert_eq!(batch.rejections[0].reason, RejectionReason::MissingLatitude);
    }

    #[test]
    fn load_date_is_identical_across_the_batch() {
        let encoder = FeatureEncoder::new(OutputShape::GeoJson, loaded_at());
        let records = RecordSet::new(
            RecordOrigin::UpstreamCurrent,
            vec![located(Value::Number(-119.0), Value::Number(50.0)); 3],
        );
        let batch = encoder.encode_batch(&records);
        let stamps: Vec<_> = batch
            .features
            .iter()
            .map(|feature| feature.attributes()["GIS_LOAD_DATE"].clone())
            .collect();
        assert!(stamps.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[test]
    fn features_round_trip_through_json_in_both_shapes() {
        for shape in [OutputShape::Esri, OutputShape::GeoJson] {
            let record = located(Value::Number(-119.0), Value::Number(50.0));
            let feature = FeatureEncoder::new(shape, loaded_at()).encode(&record).unwrap();
            let wire = serde_json::to_string(&feature).unwrap();
            let parsed: Feature = serde_json::from_str(&wire).unwrap();
            assert_eq!(parsed.shape(), shape);
            assert_eq!(parsed.decode().identity_key(), record.identity_key());
        }
    }

    #[test]
    fn output_shape_parses_from_config_text() {
        assert_eq!("GeoJSON".parse::<OutputShape>().unwrap(), OutputShape::GeoJson);
        assert_eq!("esri".parse::<OutputShape>().unwrap(), OutputShape::Esri);
        assert!("shapefile".parse::<OutputShape>().is_err());
    }
}
