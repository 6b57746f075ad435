//! Full scans over paginated endpoints.
//!
//! The service does not report a total count. A page with fewer rows than
//! requested (or no rows at all) is the only end-of-data signal, so a
//! misbehaving service that keeps returning full pages would loop forever.
//! The collector caps pages and rows and reports `CollectionTruncated`
//! instead.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tabula_core::{Page, PaginationConfig, Record, TabulaError, TabulaResult};

use crate::deadline;
use crate::fetch::{FetchExecutor, ReadOptions};

/// Source of pages for a resource.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, resource_id: &str, limit: usize, offset: usize)
        -> TabulaResult<Page>;
}

/// Which paginated endpoint a resource identifier addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageScope {
    /// `datastore/query/{distribution}`
    Distribution,
    /// `datastore/query/{dataset}/0` (first distribution of a dataset)
    Dataset,
}

/// Pages read through the cached executor.
#[derive(Debug, Clone)]
pub struct ExecutorPageSource {
    executor: FetchExecutor,
    scope: PageScope,
}

impl ExecutorPageSource {
    pub fn new(executor: FetchExecutor, scope: PageScope) -> Self {
        Self { executor, scope }
    }

    pub fn endpoint(&self, resource_id: &str, limit: usize, offset: usize) -> String {
        match self.scope {
            PageScope::Distribution => format!(
                "datastore/query/{}?limit={}&offset={}",
                resource_id, limit, offset
            ),
            PageScope::Dataset => format!(
                "datastore/query/{}/0?limit={}&offset={}",
                resource_id, limit, offset
            ),
        }
    }
}

#[async_trait]
impl PageSource for ExecutorPageSource {
    async fn fetch_page(
        &self,
        resource_id: &str,
        limit: usize,
        offset: usize,
    ) -> TabulaResult<Page> {
        let endpoint = self.endpoint(resource_id, limit, offset);
        let rows = self
            .executor
            .read(&endpoint, ReadOptions::default())
            .await?
            .into_rows(&endpoint)?;
        Ok(Page {
            rows,
            requested_limit: limit,
            requested_offset: offset,
        })
    }
}

/// Defensive bounds on a single collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionLimits {
    pub max_pages: usize,
    pub max_rows: usize,
}

impl From<&PaginationConfig> for CollectionLimits {
    fn from(config: &PaginationConfig) -> Self {
        Self {
            max_pages: config.max_pages,
            max_rows: config.max_rows,
        }
    }
}

impl Default for CollectionLimits {
    fn default() -> Self {
        Self::from(&PaginationConfig::default())
    }
}

/// Reads an entire result set page by page.
#[derive(Clone)]
pub struct PaginatedCollector {
    source: Arc<dyn PageSource>,
    limits: CollectionLimits,
}

impl PaginatedCollector {
    pub fn new(source: Arc<dyn PageSource>, limits: CollectionLimits) -> Self {
        Self { source, limits }
    }

    pub fn limits(&self) -> CollectionLimits {
        self.limits
    }

    /// Collect every row of `resource_id`, `page_size` rows per request.
    ///
    /// Pages are fetched sequentially at offsets `0, page_size, 2*page_size, ...`
    /// until a short or empty page arrives. Calling again re-walks the pages;
    /// already-cached pages are served from the cache.
    pub async fn collect_all(&self, resource_id: &str, page_size: usize) -> TabulaResult<Vec<Record>> {
        if page_size == 0 {
            return Err(TabulaError::validation("page_size", "must be > 0"));
        }

        let mut rows = Vec::new();
        let mut offset = 0;
        let mut pages = 0;

        loop {
            if pages >= self.limits.max_pages {
                return Err(self.truncated(resource_id, pages, rows.len()));
            }

            let page = self.source.fetch_page(resource_id, page_size, offset).await?;
            pages += 1;
            let is_last = page.is_last();
            rows.extend(page.rows);

            if rows.len() > self.limits.max_rows {
                return Err(self.truncated(resource_id, pages, rows.len()));
            }
            if is_last {
                break;
            }
            offset += page_size;
        }

        tracing::debug!(
            resource = resource_id,
            pages,
            rows = rows.len(),
            "collected all pages"
        );
        Ok(rows)
    }

    /// `collect_all` bounded by a deadline. On expiry the walk is cancelled
    /// and no partial rows are returned.
    pub async fn collect_all_within(
        &self,
        resource_id: &str,
        page_size: usize,
        deadline: Duration,
    ) -> TabulaResult<Vec<Record>> {
        deadline::within(
            "paginated collection",
            Some(deadline),
            self.collect_all(resource_id, page_size),
        )
        .await
    }

    fn truncated(&self, resource_id: &str, pages: usize, rows: usize) -> TabulaError {
        tracing::warn!(
            resource = resource_id,
            pages,
            rows,
            max_pages = self.limits.max_pages,
            max_rows = self.limits.max_rows,
            "pagination limit reached"
        );
        TabulaError::CollectionTruncated {
            resource: resource_id.to_string(),
            pages,
            rows,
        }
    }
}

impl std::fmt::Debug for PaginatedCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaginatedCollector")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}
