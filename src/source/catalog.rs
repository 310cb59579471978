use serde::Deserialize;
use tracing::{info, warn};

use crate::errors::SyncError;
use crate::types::ResourceId;

/// A catalog resource resolved to a direct download location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogResource {
    /// Resource id that was looked up.
    pub id: ResourceId,
    /// Human-readable resource name.
    pub name: String,
    /// Direct download URL (or local path).
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct ResourceShowResponse {
    success: bool,
    #[serde(default)]
    result: Option<ResourceShowResult>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ResourceShowResult {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// CKAN `resource_show` client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CkanCatalog {
    endpoint: String,
}

impl CkanCatalog {
    /// Client for the `resource_show` action at `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    /// Source id used for errors raised while resolving `resource_id`.
    pub fn source_id(resource_id: &str) -> String {
        format!("ckan::{resource_id}")
    }

    /// Resolve `resource_id` to its download URL.
    pub fn resolve(&self, resource_id: &str) -> Result<CatalogResource, SyncError> {
        let source_id = Self::source_id(resource_id);
        info!("[ems_sync:ckan] resolving resource {resource_id}");
        let response = ureq::get(&self.endpoint)
            .query("id", resource_id)
            .call()
            .map_err(|err| {
                SyncError::unavailable(
                    source_id.clone(),
                    format!("failed querying catalog endpoint: {err}"),
                )
            })?;
        let body = response.into_body().read_to_string().map_err(|err| {
            SyncError::unavailable(
                source_id.clone(),
                format!("failed reading catalog response body: {err}"),
            )
        })?;
        Self::parse_resource_show_response(resource_id, &body)
    }

    /// Parse a `resource_show` body; `success: false` is a fetch fault.
    pub fn parse_resource_show_response(
        resource_id: &str,
        body: &str,
    ) -> Result<CatalogResource, SyncError> {
        let source_id = Self::source_id(resource_id);
        let parsed: ResourceShowResponse = serde_json::from_str(body).map_err(|err| {
            SyncError::unavailable(
                source_id.clone(),
                format!("failed parsing catalog response: {err}"),
            )
        })?;
        if !parsed.success {
            warn!("[ems_sync:ckan] error retrieving resource info for {resource_id}");
            let detail = parsed
                .error
                .map(|error| error.to_string())
                .unwrap_or_else(|| "catalog reported success=false".to_string());
            return Err(SyncError::unavailable(source_id, detail));
        }
        let result = parsed.result.ok_or_else(|| {
            SyncError::inconsistent(source_id.clone(), "catalog response has no result")
        })?;
        let url = result
            .url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                SyncError::inconsistent(source_id.clone(), "catalog resource has no url")
            })?;
        let name = result.name.unwrap_or_else(|| resource_id.to_string());
        info!("[ems_sync:ckan] data successfully returned for dataset {name}");
        Ok(CatalogResource {
            id: resource_id.to_string(),
            name,
            url,
        })
    }
}
