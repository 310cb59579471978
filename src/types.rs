/// Name of a tabular column as it appears in the upstream CSV or the layer schema.
/// Examples: `EMS_ID`, `COLLECTION_END`, `RESULT_x`
pub type ColumnName = String;
/// Identifier for the collaborator that produced a record set.
/// Examples: `ckan::6aa7f376-a4d3-4fb4-a51c-b4487600d516`, `https://services.arcgis.com/.../FeatureServer/0`
pub type SourceId = String;
/// Monitoring location identifier (canonical form is upper-case, trimmed).
/// Examples: `E333852`, `E206908`
pub type StationId = String;
/// EMS parameter code (canonical form is upper-case, trimmed).
/// Examples: `PH-F`, `NO3D`
pub type ParameterCode = String;
/// Catalog resource identifier resolved to a downloadable CSV.
/// Example: `6aa7f376-a4d3-4fb4-a51c-b4487600d516`
pub type ResourceId = String;
/// Portal item identifier of the hosted feature layer.
/// Example: `6cb28330305f49fcbc7e81e38f8dccfa`
pub type ItemId = String;
/// Store-side `where` clause used to scope a layer query.
/// Example: `COLLECTION_END >= DATE '2025-01-01'`
pub type FilterExpression = String;
/// Raw cell value as delivered by a collaborator (CSV text or JSON attribute).
pub type RawValue = serde_json::Value;
/// One raw row keyed by column, preserving source column order.
pub type RawRecord = indexmap::IndexMap<ColumnName, RawValue>;
