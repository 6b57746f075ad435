//! Keyword → physical distributions, via the metastore.

use async_trait::async_trait;
use futures_util::future::try_join_all;
use serde_json::Value;
use tabula_core::{FetchRequest, Method, ResourceDescriptor, TabulaError, TabulaResult};
use tabula_storage::RequestKey;

use crate::fetch::{FetchExecutor, ReadOptions};

/// Maps a logical dataset to the physical resources that hold its rows.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Every distribution matching `keyword`, oldest dataset first.
    async fn resolve_distributions(&self, keyword: &str) -> TabulaResult<Vec<ResourceDescriptor>>;

    /// The distribution backing a single dataset.
    async fn to_distribution_id(&self, dataset_id: &str) -> TabulaResult<ResourceDescriptor>;

    /// Cache key prefix of the metadata read for `dataset_id`, if cached.
    ///
    /// Callers remove that prefix so the newest dataset's metadata is read
    /// fresh on the next resolution.
    fn metadata_cache_prefix(&self, _dataset_id: &str) -> Option<String> {
        None
    }

    /// Drop any cached catalog read so the next resolution sees datasets
    /// published since.
    async fn refresh_catalog(&self) -> TabulaResult<()> {
        Ok(())
    }
}

const CATALOG_ENDPOINT: &str = "metastore/schemas/dataset/items";

/// Resolver backed by the service's metastore endpoints.
#[derive(Debug, Clone)]
pub struct MetastoreResolver {
    executor: FetchExecutor,
    title_filter: Option<String>,
}

impl MetastoreResolver {
    pub fn new(executor: FetchExecutor) -> Self {
        Self {
            executor,
            title_filter: None,
        }
    }

    /// Keep only datasets whose title contains `filter`.
    pub fn with_title_filter(mut self, filter: Option<String>) -> Self {
        self.title_filter = filter;
        self
    }

    fn catalog_endpoint() -> String {
        format!("{}?show-reference-ids", CATALOG_ENDPOINT)
    }

    fn dataset_endpoint(dataset_id: &str) -> String {
        format!("{}/{}?show-reference-ids", CATALOG_ENDPOINT, dataset_id)
    }

    async fn read_json(&self, endpoint: &str) -> TabulaResult<Value> {
        let payload = self.executor.read(endpoint, ReadOptions::default()).await?;
        Ok(payload.into_json(endpoint)?)
    }

    /// `(identifier, title)` of catalog datasets matching `keyword`, by title.
    fn matching_datasets(&self, catalog: &Value, keyword: &str) -> TabulaResult<Vec<(String, String)>> {
        let entries = catalog.as_array().ok_or_else(|| TabulaError::Resolver {
            reason: "dataset catalog is not an array".to_string(),
        })?;

        let keyword = keyword.to_lowercase();
        let mut matches: Vec<(String, String)> = entries
            .iter()
            .filter(|entry| has_keyword(entry, &keyword))
            .filter_map(|entry| {
                let id = entry.get("identifier")?.as_str()?;
                let title = entry.get("title").and_then(Value::as_str).unwrap_or_default();
                Some((id.to_string(), title.to_string()))
            })
            .filter(|(_, title)| match &self.title_filter {
                Some(filter) => title.contains(filter.as_str()),
                None => true,
            })
            .collect();

        matches.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(matches)
    }
}

/// Keywords appear as plain strings, or as `{"data": "..."}` when the
/// catalog is read with reference ids.
fn has_keyword(entry: &Value, keyword: &str) -> bool {
    entry
        .get("keyword")
        .and_then(Value::as_array)
        .map(|keywords| {
            keywords.iter().any(|k| {
                let text = k
                    .as_str()
                    .or_else(|| k.get("data").and_then(Value::as_str));
                text.map(|t| t.to_lowercase() == keyword).unwrap_or(false)
            })
        })
        .unwrap_or(false)
}

fn first_distribution_id(dataset: &Value) -> Option<&str> {
    let first = dataset.get("distribution")?.as_array()?.first()?;
    first
        .get("identifier")
        .and_then(Value::as_str)
        .or_else(|| first.get("data")?.get("identifier")?.as_str())
}

#[async_trait]
impl Resolver for MetastoreResolver {
    async fn resolve_distributions(&self, keyword: &str) -> TabulaResult<Vec<ResourceDescriptor>> {
        let catalog = self.read_json(&Self::catalog_endpoint()).await?;
        let datasets = self.matching_datasets(&catalog, keyword)?;

        tracing::debug!(keyword, datasets = datasets.len(), "resolved datasets");
        try_join_all(datasets.iter().map(|(id, _)| self.to_distribution_id(id))).await
    }

    async fn to_distribution_id(&self, dataset_id: &str) -> TabulaResult<ResourceDescriptor> {
        let dataset = self.read_json(&Self::dataset_endpoint(dataset_id)).await?;
        first_distribution_id(&dataset)
            .map(|id| ResourceDescriptor::new(id).with_dataset(dataset_id))
            .ok_or_else(|| TabulaError::not_found("distribution", dataset_id))
    }

    fn metadata_cache_prefix(&self, dataset_id: &str) -> Option<String> {
        Some(RequestKey::prefix(
            Method::Get,
            &format!("{}/{}", CATALOG_ENDPOINT, dataset_id),
        ))
    }

    async fn refresh_catalog(&self) -> TabulaResult<()> {
        let removed = self
            .executor
            .invalidate(&FetchRequest::get(Self::catalog_endpoint()))
            .await?;
        tracing::debug!(removed, "dropped cached dataset catalog");
        Ok(())
    }
}
