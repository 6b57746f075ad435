//! Drug price history over the indexed dataset.

use std::cmp::Ordering;
use std::sync::Arc;

use serde_json::Value;
use tabula_core::{IndexConfig, Record, TabulaError, TabulaResult};

use crate::datastore::DatastoreClient;
use crate::fanout::{FanOutDispatcher, FanOutResult};
use crate::index::DerivedIndexCache;

/// Which index column price queries filter on.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PriceColumns {
    name: String,
    code: String,
    values: Vec<String>,
    date: String,
}

/// Price lookups by drug code or drug name across every resource.
#[derive(Debug, Clone)]
pub struct DrugPriceService {
    index: Arc<DerivedIndexCache>,
    fanout: FanOutDispatcher,
    datastore: DatastoreClient,
    columns: PriceColumns,
}

impl DrugPriceService {
    pub fn new(
        index: Arc<DerivedIndexCache>,
        fanout: FanOutDispatcher,
        datastore: DatastoreClient,
        config: &IndexConfig,
    ) -> Self {
        Self {
            index,
            fanout,
            datastore,
            columns: PriceColumns {
                name: config.name_column.clone(),
                code: config.code_column.clone(),
                values: config.value_columns.clone(),
                date: config.date_column.clone(),
            },
        }
    }

    pub fn index(&self) -> &Arc<DerivedIndexCache> {
        &self.index
    }

    /// Price rows for the given codes, oldest first.
    ///
    /// Every code must be present in the index; the first unknown code fails
    /// the call with `NotFound` before any query is issued.
    pub async fn prices_for_codes(
        &self,
        codes: &[String],
        columns: Option<&[String]>,
    ) -> TabulaResult<FanOutResult> {
        if codes.is_empty() {
            return Err(TabulaError::validation("codes", "at least one code is required"));
        }
        let known = self.index.all_codes().await?;
        if let Some(unknown) = codes.iter().find(|code| !known.contains(code.as_str())) {
            return Err(TabulaError::not_found("code", unknown.as_str()));
        }
        self.prices(codes, &self.columns.code, columns).await
    }

    /// Price rows for the given drug names, oldest first.
    pub async fn prices_for_names(
        &self,
        names: &[String],
        columns: Option<&[String]>,
    ) -> TabulaResult<FanOutResult> {
        if names.is_empty() {
            return Err(TabulaError::validation("names", "at least one name is required"));
        }
        self.prices(names, &self.columns.name, columns).await
    }

    /// Import metadata of the newest resource.
    pub async fn dataset_info(&self) -> TabulaResult<Value> {
        let latest = self.index.latest_resource().await?;
        self.datastore.import_status(&latest.id).await
    }

    async fn prices(
        &self,
        items: &[String],
        filter_column: &str,
        columns: Option<&[String]>,
    ) -> TabulaResult<FanOutResult> {
        let columns = columns.unwrap_or(&self.columns.values);
        let resources = self.index.resources().await?;
        let mut result = self
            .fanout
            .fetch_across_resources(&resources, items, filter_column, columns)
            .await?;
        sort_by_date(&mut result.records, &self.columns.date);
        Ok(result)
    }
}

/// Stable chronological sort; rows without a parseable date go last.
pub fn sort_by_date(rows: &mut [Record], date_column: &str) {
    rows.sort_by(|a, b| {
        let a = a.get(date_column).and_then(Value::as_str).and_then(date_key);
        let b = b.get(date_column).and_then(Value::as_str).and_then(date_key);
        match (a, b) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    });
}

/// `YYYY-MM-DD` or `MM/DD/YYYY` as the number `YYYYMMDD`.
pub fn date_key(date: &str) -> Option<u32> {
    let date = date.trim();
    let date = date.split(['T', ' ']).next().unwrap_or(date);
    let (year, month, day) = if date.contains('-') {
        let mut parts = date.splitn(3, '-');
        (parts.next()?, parts.next()?, parts.next()?)
    } else if date.contains('/') {
        let mut parts = date.splitn(3, '/');
        let month = parts.next()?;
        let day = parts.next()?;
        (parts.next()?, month, day)
    } else {
        return None;
    };

    let year: u32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    let day: u32 = day.parse().ok()?;
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    Some(year * 10_000 + month * 100 + day)
}
