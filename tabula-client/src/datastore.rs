//! Typed access to the datastore endpoints.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::{json, Value};
use tabula_core::{cell_as_string, Condition, FetchRequest, Record, TabulaResult};

use crate::fetch::{FetchExecutor, ReadOptions};
use crate::paginate::{CollectionLimits, ExecutorPageSource, PageScope, PaginatedCollector};
use crate::query::SqlQueryBuilder;

/// Default rows per page for full-table reads; the service's maximum.
pub const FULL_SCAN_PAGE_SIZE: usize = 10_000;

/// Alias every single-resource query uses for its resource.
const RESOURCE_ALIAS: &str = "t";

#[derive(Debug, Clone)]
pub struct DatastoreClient {
    executor: FetchExecutor,
    limits: CollectionLimits,
    page_size: usize,
}

impl DatastoreClient {
    pub fn new(executor: FetchExecutor, limits: CollectionLimits) -> Self {
        Self {
            executor,
            limits,
            page_size: FULL_SCAN_PAGE_SIZE,
        }
    }

    /// Rows requested per page by the full-table reads.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn executor(&self) -> &FetchExecutor {
        &self.executor
    }

    /// Import metadata of a distribution (row count, import state, ...).
    pub async fn import_status(&self, distribution_id: &str) -> TabulaResult<Value> {
        let endpoint = format!("datastore/imports/{}", distribution_id);
        let payload = self.executor.read(&endpoint, ReadOptions::default()).await?;
        Ok(payload.into_json(&endpoint)?)
    }

    pub async fn query_distribution(
        &self,
        distribution_id: &str,
        limit: usize,
        offset: usize,
    ) -> TabulaResult<Vec<Record>> {
        self.read_rows(&format!(
            "datastore/query/{}?limit={}&offset={}",
            distribution_id, limit, offset
        ))
        .await
    }

    /// Rows of the first distribution of a dataset.
    pub async fn query_dataset(
        &self,
        dataset_id: &str,
        limit: usize,
        offset: usize,
    ) -> TabulaResult<Vec<Record>> {
        self.read_rows(&format!(
            "datastore/query/{}/0?limit={}&offset={}",
            dataset_id, limit, offset
        ))
        .await
    }

    /// POST a filtered query against one distribution. A `limit` of 0 lets
    /// the service apply its default.
    pub async fn query_conditions(
        &self,
        distribution_id: &str,
        conditions: &[Condition],
        limit: usize,
    ) -> TabulaResult<Vec<Record>> {
        let endpoint = "datastore/query";
        let body = query_body(distribution_id, conditions, limit);
        self.post_rows(endpoint, body).await
    }

    /// POST a filtered query to a distribution's own query endpoint.
    pub async fn query_distribution_conditions(
        &self,
        distribution_id: &str,
        conditions: &[Condition],
        limit: usize,
    ) -> TabulaResult<Vec<Record>> {
        let endpoint = format!("datastore/query/{}", distribution_id);
        self.post_rows(&endpoint, conditions_body(conditions, limit))
            .await
    }

    /// POST a filtered query against the first distribution of a dataset.
    pub async fn query_dataset_conditions(
        &self,
        dataset_id: &str,
        conditions: &[Condition],
        limit: usize,
    ) -> TabulaResult<Vec<Record>> {
        let endpoint = format!("datastore/query/{}/0", dataset_id);
        self.post_rows(&endpoint, conditions_body(conditions, limit))
            .await
    }

    /// Download a whole distribution in `format` (e.g. `csv`).
    pub async fn download_distribution(&self, distribution_id: &str, format: &str) -> TabulaResult<Vec<u8>> {
        self.download(&format!(
            "datastore/query/{}/download?format={}",
            distribution_id, format
        ))
        .await
    }

    pub async fn download_dataset(&self, dataset_id: &str, format: &str) -> TabulaResult<Vec<u8>> {
        self.download(&format!(
            "datastore/query/{}/0/download?format={}",
            dataset_id, format
        ))
        .await
    }

    /// Download the rows matching `conditions` as CSV.
    pub async fn download_query(
        &self,
        distribution_id: &str,
        conditions: &[Condition],
    ) -> TabulaResult<Vec<u8>> {
        let endpoint = "datastore/query/download";
        let mut body = query_body(distribution_id, conditions, 0);
        body["format"] = json!("csv");
        let request = FetchRequest::post(endpoint, body)
            .with_header("Content-Type", "text/csv")
            .with_download(true);
        let payload = self.executor.execute(&request).await?;
        Ok(payload.into_bytes(endpoint)?)
    }

    /// Run a bracketed SQL statement, e.g. `[SELECT ndc FROM id][LIMIT 5]`.
    pub async fn sql(&self, statement: &str, show_db_columns: bool) -> TabulaResult<Vec<Record>> {
        self.read_rows(&SqlQueryBuilder::endpoint(statement, show_db_columns))
            .await
    }

    /// Sorted distinct values of `column` in a distribution.
    pub async fn unique_values(&self, column: &str, distribution_id: &str) -> TabulaResult<Vec<String>> {
        let rows = self
            .sql(&format!("[SELECT {} FROM {}]", column, distribution_id), true)
            .await?;
        let values: BTreeSet<String> = rows
            .iter()
            .filter_map(|row| row.get(column).and_then(cell_as_string))
            .collect();
        Ok(values.into_iter().collect())
    }

    pub async fn all_rows_of_distribution(&self, distribution_id: &str) -> TabulaResult<Vec<Record>> {
        self.collector(PageScope::Distribution)
            .collect_all(distribution_id, self.page_size)
            .await
    }

    pub async fn all_rows_of_dataset(&self, dataset_id: &str) -> TabulaResult<Vec<Record>> {
        self.collector(PageScope::Dataset)
            .collect_all(dataset_id, self.page_size)
            .await
    }

    fn collector(&self, scope: PageScope) -> PaginatedCollector {
        PaginatedCollector::new(
            Arc::new(ExecutorPageSource::new(self.executor.clone(), scope)),
            self.limits,
        )
    }

    async fn read_rows(&self, endpoint: &str) -> TabulaResult<Vec<Record>> {
        let payload = self.executor.read(endpoint, ReadOptions::default()).await?;
        Ok(payload.into_rows(endpoint)?)
    }

    async fn post_rows(&self, endpoint: &str, body: Value) -> TabulaResult<Vec<Record>> {
        let payload = self.executor.query(endpoint, body, BTreeMap::new()).await?;
        Ok(payload.into_rows(endpoint)?)
    }

    async fn download(&self, endpoint: &str) -> TabulaResult<Vec<u8>> {
        let payload = self.executor.read(endpoint, ReadOptions::download()).await?;
        Ok(payload.into_bytes(endpoint)?)
    }
}

/// Conditions against the single aliased resource, without naming it.
fn conditions_body(conditions: &[Condition], limit: usize) -> Value {
    let conditions: Vec<Value> = conditions
        .iter()
        .map(|c| {
            json!({
                "resource": RESOURCE_ALIAS,
                "property": c.property,
                "value": c.value,
                "operator": c.operator,
            })
        })
        .collect();
    json!({
        "conditions": conditions,
        "limit": limit,
    })
}

fn query_body(distribution_id: &str, conditions: &[Condition], limit: usize) -> Value {
    let mut body = conditions_body(conditions, limit);
    body["resources"] = json!([{ "id": distribution_id, "alias": RESOURCE_ALIAS }]);
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_body_shape() {
        let body = query_body("dist-1", &[Condition::eq("ndc", "00002")], 0);
        assert_eq!(
            body,
            json!({
                "conditions": [
                    {"resource": "t", "property": "ndc", "value": "00002", "operator": "="}
                ],
                "limit": 0,
                "resources": [{"id": "dist-1", "alias": "t"}]
            })
        );
    }

    #[test]
    fn test_scoped_body_names_no_resource() {
        let body = conditions_body(&[Condition::eq("ndc", "00002")], 5);
        assert_eq!(
            body,
            json!({
                "conditions": [
                    {"resource": "t", "property": "ndc", "value": "00002", "operator": "="}
                ],
                "limit": 5
            })
        );
    }
}
