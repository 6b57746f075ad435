//! Data model shared by the cache, the fetch layer and the index.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::FetchError;

/// One result row returned by the remote service.
pub type Record = serde_json::Map<String, Value>;

// ============================================================================
// PAYLOAD
// ============================================================================

/// A decoded response body, as stored in the request cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    /// Structured JSON response.
    Json(Value),
    /// Opaque bytes from a download endpoint.
    Bytes(Vec<u8>),
}

impl Payload {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Json(_) => None,
            Self::Bytes(bytes) => Some(bytes),
        }
    }

    /// Approximate in-memory size, used for cache statistics.
    pub fn size_hint(&self) -> usize {
        match self {
            Self::Json(value) => value.to_string().len(),
            Self::Bytes(bytes) => bytes.len(),
        }
    }

    /// Consume the payload as JSON.
    pub fn into_json(self, endpoint: &str) -> Result<Value, FetchError> {
        match self {
            Self::Json(value) => Ok(value),
            Self::Bytes(_) => Err(FetchError::Decode {
                endpoint: endpoint.to_string(),
                reason: "expected a JSON response, got bytes".to_string(),
            }),
        }
    }

    /// Consume the payload as downloaded bytes.
    pub fn into_bytes(self, endpoint: &str) -> Result<Vec<u8>, FetchError> {
        match self {
            Self::Bytes(bytes) => Ok(bytes),
            Self::Json(_) => Err(FetchError::Decode {
                endpoint: endpoint.to_string(),
                reason: "expected a download, got JSON".to_string(),
            }),
        }
    }

    /// Extract result rows.
    ///
    /// Query endpoints answer `{"results": [...]}`, the SQL endpoint answers a
    /// bare array. Both shapes are accepted; every element must be an object.
    pub fn into_rows(self, endpoint: &str) -> Result<Vec<Record>, FetchError> {
        let decode_error = |reason: String| FetchError::Decode {
            endpoint: endpoint.to_string(),
            reason,
        };

        let items = match self.into_json(endpoint)? {
            Value::Array(items) => items,
            Value::Object(mut object) => match object.remove("results") {
                Some(Value::Array(items)) => items,
                Some(other) => {
                    return Err(decode_error(format!(
                        "`results` is not an array: {}",
                        type_name(&other)
                    )))
                }
                None => return Err(decode_error("response has no `results` field".to_string())),
            },
            other => {
                return Err(decode_error(format!(
                    "expected rows, got {}",
                    type_name(&other)
                )))
            }
        };

        items
            .into_iter()
            .map(|item| match item {
                Value::Object(row) => Ok(row),
                other => Err(decode_error(format!(
                    "row is not an object: {}",
                    type_name(&other)
                ))),
            })
            .collect()
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Render a cell as a string key (numbers and booleans are stringified).
pub fn cell_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// ============================================================================
// RESOURCES AND QUERIES
// ============================================================================

/// A physical distribution of a logical dataset.
///
/// Produced by the resolver and treated as opaque by the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Distribution identifier, as accepted by the query endpoints.
    pub id: String,
    /// Identifier of the logical dataset this distribution belongs to.
    pub dataset: Option<String>,
}

impl ResourceDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            dataset: None,
        }
    }

    pub fn with_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.dataset = Some(dataset.into());
        self
    }
}

/// A single filter condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub property: String,
    pub operator: String,
    pub value: String,
}

impl Condition {
    /// Equality condition, the only operator the fan-out issues.
    pub fn eq(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            operator: "=".to_string(),
            value: value.into(),
        }
    }
}

/// What to ask a single resource for. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    pub resource: ResourceDescriptor,
    pub columns: Vec<String>,
    pub filter: Option<Condition>,
}

impl QuerySpec {
    pub fn new(resource: ResourceDescriptor, columns: Vec<String>) -> Self {
        Self {
            resource,
            columns,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: Condition) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// One page of a paginated read.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub rows: Vec<Record>,
    pub requested_limit: usize,
    pub requested_offset: usize,
}

impl Page {
    /// A page shorter than requested is the last one.
    pub fn is_last(&self) -> bool {
        self.rows.is_empty() || self.rows.len() < self.requested_limit
    }
}

// ============================================================================
// REQUESTS
// ============================================================================

/// HTTP method of a remote request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// A fully described remote request.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    /// Endpoint relative to the service base URL (query string included).
    pub endpoint: String,
    pub method: Method,
    pub body: Option<Value>,
    pub headers: BTreeMap<String, String>,
    /// Decode the response as opaque bytes instead of JSON.
    pub download: bool,
}

impl FetchRequest {
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: Method::Get,
            body: None,
            headers: BTreeMap::new(),
            download: false,
        }
    }

    pub fn post(endpoint: impl Into<String>, body: Value) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Self {
            endpoint: endpoint.into(),
            method: Method::Post,
            body: Some(body),
            headers,
            download: false,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_download(mut self, download: bool) -> Self {
        self.download = download;
        self
    }
}
