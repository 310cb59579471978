use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info};

use super::UpstreamSource;
use super::catalog::{CatalogResource, CkanCatalog};
use crate::config::UpstreamSettings;
use crate::errors::SyncError;
use crate::types::{RawRecord, RawValue, ResourceId, SourceId};

/// Upstream source that resolves catalog resources and loads their CSV payloads.
///
/// Resources are loaded in configuration order (current, then historic) and
/// concatenated into one row list.
pub struct CkanCsvSource {
    id: SourceId,
    catalog: CkanCatalog,
    resource_ids: Vec<ResourceId>,
    chunk_size: Option<usize>,
}

impl CkanCsvSource {
    /// Build a source over `resource_ids` resolved through `catalog`.
    pub fn new(catalog: CkanCatalog, resource_ids: Vec<ResourceId>) -> Self {
        let id = match resource_ids.first() {
            Some(first) => CkanCatalog::source_id(first),
            None => "ckan::<none>".to_string(),
        };
        Self {
            id,
            catalog,
            resource_ids,
            chunk_size: None,
        }
    }

    /// Build a source from upstream settings.
    pub fn from_settings(settings: &UpstreamSettings) -> Self {
        Self::new(
            CkanCatalog::new(settings.catalog_url.clone()),
            settings.resource_ids.clone(),
        )
        .with_chunk_size(settings.chunk_size)
    }

    /// Read CSVs in chunks of `chunk_size` rows (`None` reads each file at once).
    pub fn with_chunk_size(mut self, chunk_size: Option<usize>) -> Self {
        self.chunk_size = chunk_size.filter(|size| *size > 0);
        self
    }

    fn load_resource(&self, resource: &CatalogResource) -> Result<Vec<RawRecord>, SyncError> {
        let source_id = CkanCatalog::source_id(&resource.id);
        match self.chunk_size {
            Some(size) => info!("[ems_sync:csv] loading {} in chunks of {size} rows", resource.name),
            None => info!("[ems_sync:csv] loading full CSV for {}", resource.name),
        }
        let reader = open_location(&source_id, &resource.url)?;
        read_csv_rows(reader, self.chunk_size, &source_id)
    }
}

impl UpstreamSource for CkanCsvSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn fetch(&self) -> Result<Vec<RawRecord>, SyncError> {
        if self.resource_ids.is_empty() {
            return Err(SyncError::Configuration(
                "no catalog resource ids configured".to_string(),
            ));
        }
        let mut rows = Vec::new();
        for resource_id in &self.resource_ids {
            let resource = self.catalog.resolve(resource_id)?;
            let loaded = self.load_resource(&resource)?;
            info!(
                "[ems_sync:csv] loaded {} rows from resource {}",
                loaded.len(),
                resource.id
            );
            rows.extend(loaded);
        }
        Ok(rows)
    }
}

/// Open a download location: `http(s)://` URLs stream over HTTP, anything else is a path.
fn open_location(source_id: &str, location: &str) -> Result<Box<dyn Read>, SyncError> {
    if location.starts_with("http://") || location.starts_with("https://") {
        let response = ureq::get(location).call().map_err(|err| {
            SyncError::unavailable(source_id, format!("failed downloading {location}: {err}"))
        })?;
        return Ok(Box::new(response.into_body().into_reader()));
    }
    let path = Path::new(location.strip_prefix("file://").unwrap_or(location));
    let file = File::open(path).map_err(|err| {
        SyncError::unavailable(source_id, format!("failed opening {}: {err}", path.display()))
    })?;
    Ok(Box::new(BufReader::new(file)))
}

/// Parse a headered CSV into raw rows, optionally in fixed-size chunks.
///
/// Every cell is delivered as text; typing happens during canonicalization.
/// Rows whose field count differs from the header are a malformed resource.
pub fn read_csv_rows<R: Read>(
    reader: R,
    chunk_size: Option<usize>,
    source_id: &str,
) -> Result<Vec<RawRecord>, SyncError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(reader);
    let headers = csv_reader
        .headers()
        .map_err(|err| csv_fault(source_id, err))?
        .clone();

    let chunk_size = chunk_size.filter(|size| *size > 0).unwrap_or(usize::MAX);
    let mut rows = Vec::new();
    let mut chunk: Vec<RawRecord> = Vec::new();
    let mut chunks = 0usize;
    for result in csv_reader.records() {
        let record = result.map_err(|err| csv_fault(source_id, err))?;
        chunk.push(
            headers
                .iter()
                .zip(record.iter())
                .map(|(column, cell)| (column.to_string(), RawValue::String(cell.to_string())))
                .collect(),
        );
        if chunk.len() >= chunk_size {
            chunks += 1;
            debug!("[ems_sync:csv] chunk {chunks} read ({} rows)", chunk.len());
            rows.append(&mut chunk);
        }
    }
    if !chunk.is_empty() {
        chunks += 1;
        debug!("[ems_sync:csv] chunk {chunks} read ({} rows)", chunk.len());
        rows.append(&mut chunk);
    }
    Ok(rows)
}

fn csv_fault(source_id: &str, err: csv::Error) -> SyncError {
    match err.kind() {
        csv::ErrorKind::Io(_) => {
            SyncError::unavailable(source_id, format!("failed reading CSV stream: {err}"))
        }
        _ => SyncError::inconsistent(source_id, format!("malformed CSV: {err}")),
    }
}
