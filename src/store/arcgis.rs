use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

use super::{AppendReport, FeatureFailure, FeatureStore};
use crate::config::StoreSettings;
use crate::constants::columns::{OBJECTID, SHAPE};
use crate::constants::defaults::{
    APPEND_BATCH_SIZE, MAX_QUERY_PAGES, TOKEN_EXPIRATION_MINUTES, TOKEN_REFERER,
};
use crate::errors::SyncError;
use crate::feature::{EsriFeature, Feature};
use crate::types::RawRecord;

#[derive(Debug, Deserialize)]
struct EditResult {
    #[serde(default, rename = "objectId")]
    object_id: Option<i64>,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<EditError>,
}

#[derive(Debug, Deserialize)]
struct EditError {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
}

/// One page of a layer query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryPage {
    /// Flattened rows of this page.
    pub rows: Vec<RawRecord>,
    /// True when the service holds more rows past this page.
    pub exceeded_transfer_limit: bool,
}

/// Result of an edit request: the per-feature report plus the object ids the
/// store accepted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EditOutcome {
    /// Per-feature outcome.
    pub report: AppendReport,
    /// Object ids of the successful edits, in submission order.
    pub object_ids: Vec<i64>,
}

impl EditOutcome {
    fn merge(&mut self, other: EditOutcome, offset: usize) {
        self.report.merge(other.report, offset);
        self.object_ids.extend(other.object_ids);
    }
}

/// Feature layer on an ArcGIS portal, addressed through its REST endpoints.
///
/// Geometry is returned under the `SHAPE` column so downstream stages treat
/// it as an administrative column.
pub struct ArcGisStore {
    portal_url: String,
    layer_url: String,
    token: String,
    item_id: String,
    username: String,
    folder_id: Option<String>,
    batch_size: usize,
}

impl ArcGisStore {
    /// Sign in and resolve the configured item to its layer endpoint.
    pub fn connect(settings: &StoreSettings) -> Result<Self, SyncError> {
        let portal_url = settings.portal_url.trim_end_matches('/').to_string();
        info!("[ems_sync:arcgis] signing in to {portal_url} as {}", settings.username);
        let token = generate_token(&portal_url, &settings.username, &settings.password)?;

        let item_url = format!("{portal_url}/sharing/rest/content/items/{}", settings.item_id);
        let body = get_text(&portal_url, &item_url, &[("f", "json"), ("token", &token)])?;
        let service_url = parse_item_response(&portal_url, &body)?;
        let layer_url = format!(
            "{}/{}",
            service_url.trim_end_matches('/'),
            settings.layer_index
        );
        info!("[ems_sync:arcgis] target layer {layer_url}");
        Ok(Self {
            portal_url,
            layer_url,
            token,
            item_id: settings.item_id.clone(),
            username: settings.username.clone(),
            folder_id: settings.folder_id.clone(),
            batch_size: APPEND_BATCH_SIZE,
        })
    }

    /// Store over an already-resolved layer endpoint and token.
    pub fn with_layer(
        portal_url: impl Into<String>,
        layer_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            portal_url: portal_url.into(),
            layer_url: layer_url.into(),
            token: token.into(),
            item_id: String::new(),
            username: String::new(),
            folder_id: None,
            batch_size: APPEND_BATCH_SIZE,
        }
    }

    /// Features per `addFeatures` request.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Layer endpoint in use.
    pub fn layer_url(&self) -> &str {
        &self.layer_url
    }

    fn add_features(&self, features: &[Feature]) -> EditOutcome {
        let add_url = format!("{}/addFeatures", self.layer_url);
        add_in_batches(features, self.batch_size, |batch_index, batch| {
            let payload: Vec<EsriFeature> = batch.iter().map(Feature::to_esri).collect();
            let payload = serde_json::to_string(&payload)?;
            debug!(
                "[ems_sync:arcgis] addFeatures batch {} ({} features)",
                batch_index + 1,
                batch.len()
            );
            let body = post_form(
                &self.layer_url,
                &add_url,
                &[
                    ("f", "json"),
                    ("token", &self.token),
                    ("features", &payload),
                    ("rollbackOnFailure", "false"),
                ],
            )
            .map_err(publish_fault)?;
            parse_edit_outcome(&body, "addResults", batch.len())
        })
    }

    fn object_ids(&self) -> Result<Vec<i64>, SyncError> {
        let body = get_text(
            &self.layer_url,
            &format!("{}/query", self.layer_url),
            &[
                ("f", "json"),
                ("token", &self.token),
                ("where", "1=1"),
                ("returnIdsOnly", "true"),
            ],
        )?;
        parse_object_ids_response(&self.layer_url, &body)
    }

    fn delete_object_ids(&self, object_ids: &[i64]) -> Result<(), SyncError> {
        let delete_url = format!("{}/deleteFeatures", self.layer_url);
        for chunk in object_ids.chunks(self.batch_size) {
            let ids = chunk
                .iter()
                .map(i64::to_string)
                .collect::<Vec<_>>()
                .join(",");
            let body = post_form(
                &self.layer_url,
                &delete_url,
                &[("f", "json"), ("token", &self.token), ("objectIds", &ids)],
            )
            .map_err(publish_fault)?;
            let report = parse_edit_response(&body, "deleteResults", chunk.len())?;
            if !report.is_complete() {
                return Err(SyncError::StoreRejected {
                    details: format!("deleteFeatures: {report}"),
                });
            }
        }
        Ok(())
    }

    fn share_url(&self) -> String {
        match &self.folder_id {
            Some(folder) => format!(
                "{}/sharing/rest/content/users/{}/{}/items/{}/share",
                self.portal_url, self.username, folder, self.item_id
            ),
            None => format!(
                "{}/sharing/rest/content/users/{}/items/{}/share",
                self.portal_url, self.username, self.item_id
            ),
        }
    }
}

impl FeatureStore for ArcGisStore {
    fn id(&self) -> &str {
        &self.layer_url
    }

    fn query(&self, filter: Option<&str>) -> Result<Vec<RawRecord>, SyncError> {
        let where_clause = filter.unwrap_or("1=1");
        info!("[ems_sync:arcgis] querying layer where {where_clause}");
        let query_url = format!("{}/query", self.layer_url);
        let mut pages = PagedRows::default();
        loop {
            let offset = pages.fetched.to_string();
            let body = get_text(
                &self.layer_url,
                &query_url,
                &[
                    ("f", "json"),
                    ("token", &self.token),
                    ("where", where_clause),
                    ("outFields", "*"),
                    ("returnGeometry", "true"),
                    ("orderByFields", "OBJECTID ASC"),
                    ("resultOffset", &offset),
                ],
            )?;
            let page = parse_query_response(&self.layer_url, &body)?;
            debug!(
                "[ems_sync:arcgis] query page at offset {offset}: {} rows",
                page.rows.len()
            );
            if !pages.push(&self.layer_url, page)? {
                break;
            }
        }
        Ok(pages.rows)
    }

    fn append(&self, features: &[Feature]) -> Result<AppendReport, SyncError> {
        info!("[ems_sync:arcgis] appending {} features", features.len());
        Ok(self.add_features(features).report)
    }

    fn replace(&self, features: &[Feature]) -> Result<AppendReport, SyncError> {
        let existing = self.object_ids()?;
        info!(
            "[ems_sync:arcgis] republishing {} features over {} existing rows",
            features.len(),
            existing.len()
        );
        swap_layer_rows(
            &existing,
            || self.add_features(features),
            |object_ids| self.delete_object_ids(object_ids),
        )
    }

    fn share(&self, group_id: &str) -> Result<(), SyncError> {
        info!("[ems_sync:arcgis] sharing item {} with group {group_id}", self.item_id);
        let body = post_form(
            &self.portal_url,
            &self.share_url(),
            &[("f", "json"), ("token", &self.token), ("groups", group_id)],
        )?;
        let json = parse_json(&self.portal_url, &body)?;
        check_error_document(&json)?;
        if let Some(not_shared) = json.get("notSharedWith").and_then(Value::as_array)
            && !not_shared.is_empty()
        {
            warn!("[ems_sync:arcgis] item not shared with {not_shared:?}");
            return Err(SyncError::StoreRejected {
                details: format!("item {} not shared with group {group_id}", self.item_id),
            });
        }
        Ok(())
    }
}

fn generate_token(portal_url: &str, username: &str, password: &str) -> Result<String, SyncError> {
    let expiration = TOKEN_EXPIRATION_MINUTES.to_string();
    let body = post_form(
        portal_url,
        &format!("{portal_url}/sharing/rest/generateToken"),
        &[
            ("f", "json"),
            ("username", username),
            ("password", password),
            ("client", "referer"),
            ("referer", TOKEN_REFERER),
            ("expiration", &expiration),
        ],
    )?;
    parse_token_response(portal_url, &body)
}

/// Send `features` in batches of `batch_size` through `send`.
///
/// When a batch fails outright, that batch and every later feature are
/// recorded as failures with the error text and nothing more is sent. The
/// report therefore always covers every submitted feature.
pub fn add_in_batches<F>(features: &[Feature], batch_size: usize, mut send: F) -> EditOutcome
where
    F: FnMut(usize, &[Feature]) -> Result<EditOutcome, SyncError>,
{
    let batch_size = batch_size.max(1);
    let mut outcome = EditOutcome::default();
    for (batch_index, batch) in features.chunks(batch_size).enumerate() {
        let offset = batch_index * batch_size;
        match send(batch_index, batch) {
            Ok(batch_outcome) => outcome.merge(batch_outcome, offset),
            Err(err) => {
                error!(
                    "[ems_sync:arcgis] batch {} failed, {} features not added: {err}",
                    batch_index + 1,
                    features.len() - offset
                );
                let description = err.to_string();
                outcome.report.attempted += features.len() - offset;
                outcome
                    .report
                    .failures
                    .extend((offset..features.len()).map(|index| FeatureFailure {
                        index,
                        object_id: None,
                        code: None,
                        description: description.clone(),
                    }));
                break;
            }
        }
    }
    outcome
}

/// Replace `existing` rows with freshly added ones.
///
/// New rows are added first. Existing rows are deleted only once every add
/// succeeded; otherwise the rows just added are deleted again and the layer
/// keeps its previous content.
pub fn swap_layer_rows<A, D>(
    existing: &[i64],
    add: A,
    mut delete: D,
) -> Result<AppendReport, SyncError>
where
    A: FnOnce() -> EditOutcome,
    D: FnMut(&[i64]) -> Result<(), SyncError>,
{
    let added = add();
    if added.report.is_complete() {
        delete(existing)?;
        return Ok(added.report);
    }
    warn!(
        "[ems_sync:arcgis] replace incomplete ({}); removing {} added rows, keeping {} existing",
        added.report,
        added.object_ids.len(),
        existing.len()
    );
    delete(&added.object_ids)?;
    Ok(added.report)
}

/// Collects `query` pages until the service reports no more rows.
#[derive(Debug, Default)]
struct PagedRows {
    rows: Vec<RawRecord>,
    seen: HashSet<i64>,
    fetched: usize,
    pages: usize,
}

impl PagedRows {
    /// Add a page; `Ok(true)` when another page should be requested.
    ///
    /// A page with no unseen `OBJECTID`s, or too many pages, is a protocol
    /// fault: a truncated snapshot must never read as the whole layer.
    fn push(&mut self, layer_url: &str, page: QueryPage) -> Result<bool, SyncError> {
        let QueryPage {
            rows,
            exceeded_transfer_limit,
        } = page;
        self.pages += 1;
        self.fetched += rows.len();
        let before = self.rows.len();
        for row in rows {
            if let Some(id) = row.get(OBJECTID.as_str()).and_then(Value::as_i64)
                && !self.seen.insert(id)
            {
                continue;
            }
            self.rows.push(row);
        }
        if !exceeded_transfer_limit {
            return Ok(false);
        }
        if self.rows.len() == before {
            return Err(SyncError::inconsistent(
                layer_url,
                format!("query page {} repeated earlier rows", self.pages),
            ));
        }
        if self.pages >= MAX_QUERY_PAGES {
            return Err(SyncError::inconsistent(
                layer_url,
                format!("query exceeded {MAX_QUERY_PAGES} pages"),
            ));
        }
        Ok(true)
    }
}

fn get_text(store_id: &str, url: &str, params: &[(&str, &str)]) -> Result<String, SyncError> {
    let mut request = ureq::get(url);
    for (key, value) in params {
        request = request.query(*key, *value);
    }
    let response = request.call().map_err(|err| {
        SyncError::unavailable(store_id, format!("failed requesting {url}: {err}"))
    })?;
    response.into_body().read_to_string().map_err(|err| {
        SyncError::unavailable(store_id, format!("failed reading response from {url}: {err}"))
    })
}

fn post_form(store_id: &str, url: &str, form: &[(&str, &str)]) -> Result<String, SyncError> {
    let response = ureq::post(url).send_form(form.iter().copied()).map_err(|err| {
        SyncError::unavailable(store_id, format!("failed posting to {url}: {err}"))
    })?;
    response.into_body().read_to_string().map_err(|err| {
        SyncError::unavailable(store_id, format!("failed reading response from {url}: {err}"))
    })
}

fn parse_json(store_id: &str, body: &str) -> Result<Value, SyncError> {
    serde_json::from_str(body).map_err(|err| {
        SyncError::unavailable(store_id, format!("failed parsing store response: {err}"))
    })
}

fn publish_fault(err: SyncError) -> SyncError {
    match err {
        SyncError::StoreRejected { .. } => err,
        other => SyncError::StoreRejected {
            details: other.to_string(),
        },
    }
}

/// ArcGIS reports failures as HTTP 200 with an `error` document.
fn check_error_document(json: &Value) -> Result<(), SyncError> {
    let Some(error) = json.get("error") else {
        return Ok(());
    };
    let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    let details = error
        .get("details")
        .and_then(Value::as_array)
        .map(|details| {
            details
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("; ")
        })
        .filter(|details| !details.is_empty());
    Err(SyncError::StoreRejected {
        details: match details {
            Some(details) => format!("{code}: {message} ({details})"),
            None => format!("{code}: {message}"),
        },
    })
}

/// Extract the token from a `generateToken` response.
pub fn parse_token_response(portal_url: &str, body: &str) -> Result<String, SyncError> {
    let json = parse_json(portal_url, body)?;
    check_error_document(&json)?;
    json.get("token")
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .ok_or_else(|| SyncError::inconsistent(portal_url, "token response has no token"))
}

/// Extract the service URL from a `content/items/<id>` response.
pub fn parse_item_response(portal_url: &str, body: &str) -> Result<String, SyncError> {
    let json = parse_json(portal_url, body)?;
    check_error_document(&json)?;
    json.get("url")
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .ok_or_else(|| SyncError::inconsistent(portal_url, "item has no service url"))
}

/// Flatten one page of a layer `query` response.
///
/// Error documents are fetch faults: a failed query must never read as an
/// empty layer.
pub fn parse_query_response(layer_url: &str, body: &str) -> Result<QueryPage, SyncError> {
    let json = parse_json(layer_url, body)?;
    check_error_document(&json)
        .map_err(|err| SyncError::unavailable(layer_url, err.to_string()))?;
    let features = json
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| SyncError::inconsistent(layer_url, "query response has no features"))?;

    let mut rows = Vec::with_capacity(features.len());
    for feature in features {
        let mut row = RawRecord::new();
        if let Some(attributes) = feature.get("attributes").and_then(Value::as_object) {
            for (column, value) in attributes {
                row.insert(column.clone(), value.clone());
            }
        }
        if let Some(geometry) = feature.get("geometry")
            && !geometry.is_null()
        {
            row.insert(SHAPE.as_str().to_string(), geometry.clone());
        }
        rows.push(row);
    }
    Ok(QueryPage {
        rows,
        exceeded_transfer_limit: json
            .get("exceededTransferLimit")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

/// Extract the object ids from a `returnIdsOnly` query response.
pub fn parse_object_ids_response(layer_url: &str, body: &str) -> Result<Vec<i64>, SyncError> {
    let json = parse_json(layer_url, body)?;
    check_error_document(&json)
        .map_err(|err| SyncError::unavailable(layer_url, err.to_string()))?;
    match json.get("objectIds") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(ids)) => ids
            .iter()
            .map(|id| {
                id.as_i64()
                    .ok_or_else(|| SyncError::inconsistent(layer_url, format!("bad object id {id}")))
            })
            .collect(),
        Some(other) => Err(SyncError::inconsistent(
            layer_url,
            format!("objectIds is not a list: {other}"),
        )),
    }
}

/// Build a report from an edit response (`addResults`, `deleteResults`, ...).
///
/// A result list whose length differs from the submitted batch is a protocol fault.
pub fn parse_edit_response(
    body: &str,
    results_key: &str,
    attempted: usize,
) -> Result<AppendReport, SyncError> {
    parse_edit_outcome(body, results_key, attempted).map(|outcome| outcome.report)
}

/// Like [`parse_edit_response`], also keeping the object ids of successful edits.
pub fn parse_edit_outcome(
    body: &str,
    results_key: &str,
    attempted: usize,
) -> Result<EditOutcome, SyncError> {
    let json: Value = serde_json::from_str(body)?;
    check_error_document(&json)?;
    let results = json
        .get(results_key)
        .cloned()
        .ok_or_else(|| SyncError::StoreRejected {
            details: format!("edit response has no {results_key}"),
        })?;
    let results: Vec<EditResult> = serde_json::from_value(results)?;
    if results.len() != attempted {
        return Err(SyncError::StoreRejected {
            details: format!(
                "edit response has {} results for {attempted} features",
                results.len()
            ),
        });
    }

    let mut report = AppendReport {
        attempted,
        ..AppendReport::default()
    };
    let mut object_ids = Vec::new();
    for (index, result) in results.into_iter().enumerate() {
        if result.success {
            report.succeeded += 1;
            object_ids.extend(result.object_id);
            continue;
        }
        let (code, description) = match result.error {
            Some(error) => (
                error.code,
                error.description.unwrap_or_else(|| "no description".to_string()),
            ),
            None => (None, "no description".to_string()),
        };
        report.failures.push(FeatureFailure {
            index,
            object_id: result.object_id,
            code,
            description,
        });
    }
    Ok(EditOutcome { report, object_ids })
}
