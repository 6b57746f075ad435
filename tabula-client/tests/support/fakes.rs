//! In-process stand-ins for the remote service and the resolver.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tabula_client::{Resolver, Transport};
use tabula_core::{
    FetchError, FetchRequest, Method, Payload, Record, ResourceDescriptor, TabulaError,
    TabulaResult,
};
use tabula_storage::RequestKey;

pub fn record(pairs: &[(&str, &str)]) -> Record {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v)))
        .collect()
}

/// A parsed `[SELECT a,b FROM id][WHERE p = "v"]` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlCall {
    pub columns: Vec<String>,
    pub resource: String,
    pub filter: Option<(String, String)>,
}

fn parse_sql(statement: &str) -> Option<SqlCall> {
    let rest = statement.strip_prefix("[SELECT ")?;
    let (columns, rest) = rest.split_once(" FROM ")?;
    let (resource, rest) = rest.split_once(']')?;
    let filter = match rest.strip_prefix("[WHERE ") {
        Some(clause) => {
            let (property, value) = clause.split_once(" = ")?;
            let value = value.strip_suffix(']')?.trim_matches('"');
            Some((property.to_string(), value.to_string()))
        }
        None => None,
    };
    Some(SqlCall {
        columns: columns.split(',').map(str::to_string).collect(),
        resource: resource.to_string(),
        filter,
    })
}

fn query_param(query: &str, name: &str) -> Option<usize> {
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix(name)?.strip_prefix('='))
        .and_then(|v| v.parse().ok())
}

/// Serves tables by resource id through the SQL, paged query, condition
/// query and import endpoints, plus a metastore catalog.
#[derive(Default)]
pub struct FakeDatastore {
    tables: Mutex<BTreeMap<String, Vec<Record>>>,
    failing: Mutex<BTreeSet<String>>,
    calls: AtomicUsize,
    endpoints: Mutex<Vec<String>>,
    sql_calls: Mutex<Vec<SqlCall>>,
    /// `(dataset, distribution)` pairs served by the metastore endpoints.
    catalog: Mutex<Vec<(String, String)>>,
}

impl FakeDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, resource: &str, rows: Vec<Record>) -> Self {
        self.set_table(resource, rows);
        self
    }

    pub fn set_table(&self, resource: &str, rows: Vec<Record>) {
        self.tables
            .lock()
            .unwrap()
            .insert(resource.to_string(), rows);
    }

    /// Every request touching `resource` fails with a 500.
    pub fn fail_resource(&self, resource: &str) {
        self.failing.lock().unwrap().insert(resource.to_string());
    }

    /// List `dataset` in the metastore catalog, backed by `distribution`.
    pub fn publish(&self, dataset: &str, distribution: &str) {
        self.catalog
            .lock()
            .unwrap()
            .push((dataset.to_string(), distribution.to_string()));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every endpoint requested, in order.
    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.lock().unwrap().clone()
    }

    pub fn sql_calls(&self) -> Vec<SqlCall> {
        self.sql_calls.lock().unwrap().clone()
    }

    pub fn queried_resources(&self) -> Vec<String> {
        self.sql_calls()
            .into_iter()
            .map(|call| call.resource)
            .collect()
    }

    fn rows(&self, endpoint: &str, resource: &str) -> Result<Vec<Record>, FetchError> {
        if self.failing.lock().unwrap().contains(resource) {
            return Err(FetchError::Status {
                endpoint: endpoint.to_string(),
                status: 500,
                message: format!("{} unavailable", resource),
            });
        }
        self.tables
            .lock()
            .unwrap()
            .get(resource)
            .cloned()
            .ok_or_else(|| FetchError::Status {
                endpoint: endpoint.to_string(),
                status: 404,
                message: format!("no resource {}", resource),
            })
    }

    fn sql(&self, endpoint: &str, call: SqlCall) -> Result<Payload, FetchError> {
        let rows = self.rows(endpoint, &call.resource)?;
        let selected: Vec<Value> = rows
            .into_iter()
            .filter(|row| match &call.filter {
                Some((property, value)) => {
                    row.get(property).and_then(Value::as_str) == Some(value.as_str())
                }
                None => true,
            })
            .map(|row| {
                let projected: Record = call
                    .columns
                    .iter()
                    .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
                    .collect();
                Value::Object(projected)
            })
            .collect();
        self.sql_calls.lock().unwrap().push(call);
        Ok(Payload::Json(Value::Array(selected)))
    }

    fn page(&self, endpoint: &str, path: &str, query: &str) -> Result<Payload, FetchError> {
        let resource = path.trim_end_matches("/0");
        let rows = self.rows(endpoint, resource)?;
        let limit = query_param(query, "limit").unwrap_or(rows.len());
        let offset = query_param(query, "offset").unwrap_or(0);
        let page: Vec<Value> = rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(Value::Object)
            .collect();
        let count = page.len();
        Ok(Payload::Json(json!({ "results": page, "count": count })))
    }

    /// Rows of `resource` matching every `{property, value}` condition.
    fn filtered(&self, endpoint: &str, resource: &str, body: &Value) -> Result<Payload, FetchError> {
        let conditions = body["conditions"].as_array().cloned().unwrap_or_default();
        let rows: Vec<Value> = self
            .rows(endpoint, resource)?
            .into_iter()
            .filter(|row| {
                conditions.iter().all(|c| {
                    let property = c["property"].as_str().unwrap_or_default();
                    row.get(property) == Some(&c["value"])
                })
            })
            .map(Value::Object)
            .collect();
        Ok(Payload::Json(json!({ "results": rows })))
    }

    fn metastore(&self, endpoint: &str) -> Option<Result<Payload, FetchError>> {
        let catalog = self.catalog.lock().unwrap().clone();
        if endpoint == "metastore/schemas/dataset/items?show-reference-ids" {
            let entries: Vec<Value> = catalog
                .iter()
                .map(|(dataset, _)| {
                    json!({
                        "identifier": dataset,
                        "title": format!("NADAC {}", dataset),
                        "keyword": [{"data": "NADAC"}],
                    })
                })
                .collect();
            return Some(Ok(Payload::Json(Value::Array(entries))));
        }
        let dataset = endpoint
            .strip_prefix("metastore/schemas/dataset/items/")?
            .strip_suffix("?show-reference-ids")?;
        Some(
            catalog
                .iter()
                .find(|(id, _)| id == dataset)
                .map(|(_, distribution)| {
                    Payload::Json(json!({ "distribution": [{ "identifier": distribution }] }))
                })
                .ok_or_else(|| FetchError::Status {
                    endpoint: endpoint.to_string(),
                    status: 404,
                    message: format!("no dataset {}", dataset),
                }),
        )
    }
}

#[async_trait]
impl Transport for FakeDatastore {
    async fn send(&self, request: &FetchRequest) -> Result<Payload, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let endpoint = request.endpoint.as_str();
        self.endpoints.lock().unwrap().push(endpoint.to_string());

        if let Some(outcome) = self.metastore(endpoint) {
            return outcome;
        }
        if let Some(query) = endpoint.strip_prefix("datastore/sql?query=") {
            let encoded = query.split('&').next().unwrap_or_default();
            let statement = urlencoding::decode(encoded).unwrap().into_owned();
            let call = parse_sql(&statement).ok_or_else(|| FetchError::Status {
                endpoint: endpoint.to_string(),
                status: 400,
                message: format!("bad statement {}", statement),
            })?;
            return self.sql(endpoint, call);
        }
        if let Some(id) = endpoint.strip_prefix("datastore/imports/") {
            self.rows(endpoint, id)?;
            return Ok(Payload::Json(json!({ "status": "done", "resource": id })));
        }
        if endpoint == "datastore/query/download" {
            let id = request
                .body
                .as_ref()
                .and_then(|b| b["resources"][0]["id"].as_str())
                .unwrap_or_default()
                .to_string();
            let rows = self.rows(endpoint, &id)?;
            return Ok(Payload::Bytes(format!("rows\n{}\n", rows.len()).into_bytes()));
        }
        if let (Method::Post, Some(body)) = (request.method, request.body.as_ref()) {
            let resource = match endpoint.strip_prefix("datastore/query/") {
                Some(path) => path.trim_end_matches("/0").to_string(),
                None => body["resources"][0]["id"].as_str().unwrap_or_default().to_string(),
            };
            return self.filtered(endpoint, &resource, body);
        }
        if let Some(rest) = endpoint.strip_prefix("datastore/query/") {
            if let Some((path, format)) = rest.split_once("/download?format=") {
                let rows = self.rows(endpoint, path.trim_end_matches("/0"))?;
                return Ok(Payload::Bytes(
                    format!("{}:{}\n", format, rows.len()).into_bytes(),
                ));
            }
            let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
            return self.page(endpoint, path, query);
        }

        Err(FetchError::Status {
            endpoint: endpoint.to_string(),
            status: 404,
            message: "unknown endpoint".to_string(),
        })
    }
}

/// Resolver returning a fixed resource list, counting resolutions.
pub struct FakeResolver {
    resources: Vec<ResourceDescriptor>,
    resolutions: AtomicUsize,
    failing: AtomicBool,
    delay: Duration,
}

impl FakeResolver {
    pub fn new(ids: &[&str]) -> Self {
        Self {
            resources: ids
                .iter()
                .map(|id| ResourceDescriptor::new(*id).with_dataset(format!("ds-{}", id)))
                .collect(),
            resolutions: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl Resolver for FakeResolver {
    async fn resolve_distributions(&self, _keyword: &str) -> TabulaResult<Vec<ResourceDescriptor>> {
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(TabulaError::Resolver {
                reason: "metastore unavailable".to_string(),
            });
        }
        Ok(self.resources.clone())
    }

    async fn to_distribution_id(&self, dataset_id: &str) -> TabulaResult<ResourceDescriptor> {
        self.resources
            .iter()
            .find(|r| r.dataset.as_deref() == Some(dataset_id))
            .cloned()
            .ok_or_else(|| TabulaError::not_found("distribution", dataset_id))
    }

    fn metadata_cache_prefix(&self, dataset_id: &str) -> Option<String> {
        Some(RequestKey::prefix(
            Method::Get,
            &format!("metastore/schemas/dataset/items/{}", dataset_id),
        ))
    }
}

/// Three drugs per date for one resource, with prices.
pub fn drug_rows(resource: &str, dates: &[&str]) -> Vec<Record> {
    let mut rows = Vec::new();
    for date in dates {
        rows.push(record(&[
            ("ndc", "00001"),
            ("ndc_description", "CALCITRIOL 1 MCG/ML SOLUTION"),
            ("as_of_date", date),
            ("nadac_per_unit", "1.50"),
            ("source", resource),
        ]));
        rows.push(record(&[
            ("ndc", "00002"),
            ("ndc_description", "CALCITRIOL 0.25 MCG CAPSULE"),
            ("as_of_date", date),
            ("nadac_per_unit", "0.40"),
            ("source", resource),
        ]));
        rows.push(record(&[
            ("ndc", "00003"),
            ("ndc_description", "ASPIRIN 81 MG TABLET"),
            ("as_of_date", date),
            ("nadac_per_unit", "0.02"),
            ("source", resource),
        ]));
    }
    rows
}
