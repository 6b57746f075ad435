//! One query per (resource, item) pair, merged in a deterministic order.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use tabula_core::{
    Condition, QuerySpec, Record, ResourceDescriptor, TabulaError, TabulaResult,
};

use crate::deadline;
use crate::fetch::FetchExecutor;
use crate::query::QueryBuilder;

/// A pair whose query failed. The error is kept, not logged away.
#[derive(Debug, Clone, PartialEq)]
pub struct PairFailure {
    pub resource: ResourceDescriptor,
    pub item: String,
    pub error: TabulaError,
}

/// Merged rows of every successful pair plus the failed pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FanOutResult {
    /// Resource-major, item-minor.
    pub records: Vec<Record>,
    pub failures: Vec<PairFailure>,
    /// Number of pairs queried.
    pub total: usize,
}

impl FanOutResult {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// All-or-nothing view: the records if every pair succeeded.
    pub fn into_complete(self) -> TabulaResult<Vec<Record>> {
        if self.failures.is_empty() {
            Ok(self.records)
        } else {
            Err(TabulaError::IncompleteFanOut {
                failed: self.failures.len(),
                total: self.total,
            })
        }
    }
}

/// Issues independent queries with bounded concurrency.
#[derive(Clone)]
pub struct FanOutDispatcher {
    executor: FetchExecutor,
    builder: Arc<dyn QueryBuilder>,
    concurrency: usize,
    deadline: Option<Duration>,
}

impl FanOutDispatcher {
    pub fn new(executor: FetchExecutor, builder: Arc<dyn QueryBuilder>, concurrency: usize) -> Self {
        Self {
            executor,
            builder,
            concurrency: concurrency.max(1),
            deadline: None,
        }
    }

    /// Cancel the whole fan-out if it runs longer than `deadline`.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run every spec and return the per-spec outcome, in input order.
    pub async fn fetch_each(&self, specs: Vec<QuerySpec>) -> Vec<TabulaResult<Vec<Record>>> {
        stream::iter(specs.into_iter().map(|spec| async move {
            let request = self.builder.build(&spec)?;
            let payload = self.executor.execute(&request).await?;
            let rows = payload.into_rows(&request.endpoint)?;
            Ok::<_, TabulaError>(rows)
        }))
        .buffered(self.concurrency)
        .collect::<Vec<_>>()
        .await
    }

    /// Query every resource for every item, filtering `filter_column = item`.
    ///
    /// A failed pair does not fail the operation; it is reported in
    /// `failures`. Only an expired deadline fails the call as a whole, and
    /// then no partial records are returned.
    pub async fn fetch_across_resources(
        &self,
        resources: &[ResourceDescriptor],
        items: &[String],
        filter_column: &str,
        columns: &[String],
    ) -> TabulaResult<FanOutResult> {
        let pairs: Vec<(ResourceDescriptor, String)> = resources
            .iter()
            .flat_map(|resource| items.iter().map(move |item| (resource.clone(), item.clone())))
            .collect();
        let specs = pairs
            .iter()
            .map(|(resource, item)| {
                QuerySpec::new(resource.clone(), columns.to_vec())
                    .with_filter(Condition::eq(filter_column, item.as_str()))
            })
            .collect();

        let outcomes = deadline::within("fan-out", self.deadline, async {
            Ok(self.fetch_each(specs).await)
        })
        .await?;

        let total = pairs.len();
        let mut result = FanOutResult {
            total,
            ..FanOutResult::default()
        };
        for ((resource, item), outcome) in pairs.into_iter().zip(outcomes) {
            match outcome {
                Ok(rows) => result.records.extend(rows),
                Err(error) => {
                    tracing::warn!(
                        resource = %resource.id,
                        item = %item,
                        error = %error,
                        "fan-out query failed"
                    );
                    result.failures.push(PairFailure {
                        resource,
                        item,
                        error,
                    });
                }
            }
        }

        tracing::debug!(
            pairs = total,
            failed = result.failures.len(),
            records = result.records.len(),
            "fan-out finished"
        );
        Ok(result)
    }
}

impl std::fmt::Debug for FanOutDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanOutDispatcher")
            .field("concurrency", &self.concurrency)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}
