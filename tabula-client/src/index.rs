//! Name → code index derived from the rows of many resources.
//!
//! The index is expensive to build (one query per sampled resource) and is
//! kept for a TTL. Readers always see a complete index: a rebuild assembles
//! a new [`DerivedIndex`] off to the side and swaps it in with one write.
//! Concurrent callers that find the index stale wait on a single rebuild
//! instead of starting their own.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tabula_core::{
    cell_as_string, CacheError, IndexConfig, QuerySpec, ResourceDescriptor, TabulaError,
    TabulaResult,
};
use tabula_storage::RequestKey;
use tokio::sync::Mutex as AsyncMutex;

use crate::fanout::FanOutDispatcher;
use crate::fetch::FetchExecutor;
use crate::resolver::Resolver;

/// Reserved cache namespace for persisted indexes.
const INDEX_NAMESPACE: &str = "derived-index";

/// What to index and how often.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub keyword: String,
    pub ttl: Duration,
    /// Query every `stride`-th resolved resource.
    pub stride: usize,
    pub name_column: String,
    pub code_column: String,
}

impl From<&IndexConfig> for IndexSpec {
    fn from(config: &IndexConfig) -> Self {
        Self {
            name: config.name.clone(),
            keyword: config.keyword.clone(),
            ttl: config.ttl(),
            stride: config.stride,
            name_column: config.name_column.clone(),
            code_column: config.code_column.clone(),
        }
    }
}

impl IndexSpec {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }
}

/// An immutable, fully built index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedIndex {
    entries: BTreeMap<String, BTreeSet<String>>,
    /// Every resolved resource, sampled or not, oldest first.
    resources: Vec<ResourceDescriptor>,
    built_at: DateTime<Utc>,
}

impl DerivedIndex {
    pub fn new(
        entries: BTreeMap<String, BTreeSet<String>>,
        resources: Vec<ResourceDescriptor>,
        built_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entries,
            resources,
            built_at,
        }
    }

    pub fn codes_for(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.entries.get(name)
    }

    /// Names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn all_codes(&self) -> BTreeSet<String> {
        self.entries.values().flatten().cloned().collect()
    }

    pub fn contains_code(&self, code: &str) -> bool {
        self.entries.values().any(|codes| codes.contains(code))
    }

    pub fn resources(&self) -> &[ResourceDescriptor] {
        &self.resources
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn age(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.built_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    /// Never built.
    Empty,
    Fresh,
    Stale,
}

/// Snapshot of index health, for callers that want to surface it.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexStatus {
    pub state: IndexState,
    pub built_at: Option<DateTime<Utc>>,
    pub names: usize,
    /// Error of the most recent failed rebuild, cleared by a success.
    pub last_error: Option<TabulaError>,
    pub rebuilds: u64,
    pub failures: u64,
}

#[derive(Debug, Default)]
struct RebuildLog {
    last_error: Option<TabulaError>,
    rebuilds: u64,
    failures: u64,
}

/// Owns one derived index and its lifecycle.
pub struct DerivedIndexCache {
    spec: IndexSpec,
    executor: FetchExecutor,
    resolver: Arc<dyn Resolver>,
    fanout: FanOutDispatcher,
    current: RwLock<Option<Arc<DerivedIndex>>>,
    rebuild_gate: AsyncMutex<()>,
    forced_stale: AtomicBool,
    log: Mutex<RebuildLog>,
}

impl DerivedIndexCache {
    pub fn new(
        spec: IndexSpec,
        executor: FetchExecutor,
        resolver: Arc<dyn Resolver>,
        fanout: FanOutDispatcher,
    ) -> Self {
        Self {
            spec,
            executor,
            resolver,
            fanout,
            current: RwLock::new(None),
            rebuild_gate: AsyncMutex::new(()),
            forced_stale: AtomicBool::new(false),
            log: Mutex::new(RebuildLog::default()),
        }
    }

    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    /// Build or adopt the index so the first lookup does not pay for it.
    pub async fn warm_up(&self) -> TabulaResult<IndexStatus> {
        self.rebuild_if_stale().await?;
        self.status()
    }

    /// Codes recorded for `name`.
    pub async fn lookup(&self, name: &str) -> TabulaResult<BTreeSet<String>> {
        let index = self.fresh_index().await?;
        index
            .codes_for(name)
            .cloned()
            .ok_or_else(|| TabulaError::not_found("name", name))
    }

    pub async fn all_names(&self) -> TabulaResult<Vec<String>> {
        let index = self.fresh_index().await?;
        Ok(index.names().map(str::to_string).collect())
    }

    pub async fn all_codes(&self) -> TabulaResult<BTreeSet<String>> {
        Ok(self.fresh_index().await?.all_codes())
    }

    pub async fn contains_code(&self, code: &str) -> TabulaResult<bool> {
        Ok(self.fresh_index().await?.contains_code(code))
    }

    /// Names whose first word equals the first word of `term`, upper-cased.
    ///
    /// `names_matching_base("calcitriol")` finds every `CALCITRIOL ...` entry.
    pub async fn names_matching_base(&self, term: &str) -> TabulaResult<Vec<String>> {
        let base = match term.split_whitespace().next() {
            Some(word) => word.to_uppercase(),
            None => return Ok(Vec::new()),
        };
        let index = self.fresh_index().await?;
        Ok(index
            .names()
            .filter(|name| name.split_whitespace().next() == Some(base.as_str()))
            .map(str::to_string)
            .collect())
    }

    /// Every resolved resource, oldest first.
    pub async fn resources(&self) -> TabulaResult<Vec<ResourceDescriptor>> {
        Ok(self.fresh_index().await?.resources().to_vec())
    }

    /// The newest resolved resource.
    pub async fn latest_resource(&self) -> TabulaResult<ResourceDescriptor> {
        let index = self.fresh_index().await?;
        index
            .resources()
            .last()
            .cloned()
            .ok_or_else(|| TabulaError::not_found("resource", self.spec.keyword.as_str()))
    }

    /// Force the next access to rebuild.
    pub fn mark_stale(&self) {
        self.forced_stale.store(true, Ordering::SeqCst);
    }

    pub fn status(&self) -> TabulaResult<IndexStatus> {
        let snapshot = self.snapshot()?;
        let log = self.log.lock().map_err(|_| CacheError::LockPoisoned)?;
        let state = match &snapshot {
            None => IndexState::Empty,
            Some(index) if self.is_stale(index) => IndexState::Stale,
            Some(_) => IndexState::Fresh,
        };
        Ok(IndexStatus {
            state,
            built_at: snapshot.as_ref().map(|index| index.built_at()),
            names: snapshot.as_ref().map(|index| index.len()).unwrap_or(0),
            last_error: log.last_error.clone(),
            rebuilds: log.rebuilds,
            failures: log.failures,
        })
    }

    /// Rebuild if the index is missing or stale and return the index to use.
    ///
    /// A failed rebuild leaves the previous index in place and serves it; the
    /// failure is recorded in [`status`](Self::status). With no previous
    /// index the failure is returned.
    pub async fn rebuild_if_stale(&self) -> TabulaResult<Arc<DerivedIndex>> {
        let _gate = self.rebuild_gate.lock().await;

        // Another caller may have rebuilt while we waited for the gate.
        if let Some(index) = self.snapshot()? {
            if !self.is_stale(&index) {
                return Ok(index);
            }
        } else if let Some(index) = self.adopt_persisted().await? {
            if !self.is_stale(&index) {
                return Ok(index);
            }
        }

        tracing::info!(index = %self.spec.name, "rebuilding derived index");
        match self.build().await {
            Ok(index) => {
                let index = Arc::new(index);
                self.install(Arc::clone(&index))?;
                self.forced_stale.store(false, Ordering::SeqCst);
                let persisted = self.persist(&index).await;
                self.record(persisted.err())?;
                tracing::info!(
                    index = %self.spec.name,
                    names = index.len(),
                    resources = index.resources().len(),
                    "derived index rebuilt"
                );
                Ok(index)
            }
            Err(err) => {
                let err = self.rebuild_failed(err);
                tracing::warn!(index = %self.spec.name, error = %err, "derived index rebuild failed");
                self.record_failure(err.clone())?;
                match self.snapshot()? {
                    Some(previous) => Ok(previous),
                    None => Err(err),
                }
            }
        }
    }

    async fn fresh_index(&self) -> TabulaResult<Arc<DerivedIndex>> {
        match self.snapshot()? {
            Some(index) if !self.is_stale(&index) => Ok(index),
            _ => self.rebuild_if_stale().await,
        }
    }

    fn snapshot(&self) -> TabulaResult<Option<Arc<DerivedIndex>>> {
        let current = self.current.read().map_err(|_| CacheError::LockPoisoned)?;
        Ok(current.clone())
    }

    fn install(&self, index: Arc<DerivedIndex>) -> TabulaResult<()> {
        let mut current = self.current.write().map_err(|_| CacheError::LockPoisoned)?;
        *current = Some(index);
        Ok(())
    }

    fn is_stale(&self, index: &DerivedIndex) -> bool {
        self.forced_stale.load(Ordering::SeqCst) || index.age() > self.spec.ttl
    }

    fn persisted_key(&self) -> RequestKey {
        RequestKey::reserved(INDEX_NAMESPACE, &self.spec.name)
    }

    /// Install a previously persisted index, fresh or not, so a failed
    /// rebuild still has something to serve.
    async fn adopt_persisted(&self) -> TabulaResult<Option<Arc<DerivedIndex>>> {
        let persisted = match self
            .executor
            .cache()
            .get_typed::<DerivedIndex>(&self.persisted_key())
            .await
        {
            Ok(Some(index)) => Arc::new(index),
            Ok(None) => return Ok(None),
            Err(err) => {
                tracing::warn!(index = %self.spec.name, error = %err, "ignoring unreadable persisted index");
                return Ok(None);
            }
        };

        tracing::debug!(
            index = %self.spec.name,
            built_at = %persisted.built_at(),
            "adopted persisted index"
        );
        self.install(Arc::clone(&persisted))?;
        Ok(Some(persisted))
    }

    async fn persist(&self, index: &DerivedIndex) -> TabulaResult<()> {
        self.executor
            .cache()
            .put_typed(&self.persisted_key(), index)
            .await
    }

    async fn build(&self) -> TabulaResult<DerivedIndex> {
        self.resolver.refresh_catalog().await?;
        let resources = self.resolver.resolve_distributions(&self.spec.keyword).await?;
        if resources.is_empty() {
            return Err(TabulaError::Resolver {
                reason: format!("no resources found for keyword `{}`", self.spec.keyword),
            });
        }

        // The newest dataset's metadata changes between releases.
        if let Some(prefix) = resources
            .last()
            .and_then(|latest| latest.dataset.as_deref())
            .and_then(|dataset| self.resolver.metadata_cache_prefix(dataset))
        {
            self.executor.cache().remove_prefix(&prefix).await?;
        }

        let columns = vec![self.spec.code_column.clone(), self.spec.name_column.clone()];
        let specs: Vec<QuerySpec> = resources
            .iter()
            .step_by(self.spec.stride.max(1))
            .map(|resource| QuerySpec::new(resource.clone(), columns.clone()))
            .collect();
        tracing::debug!(
            index = %self.spec.name,
            resolved = resources.len(),
            sampled = specs.len(),
            "querying sampled resources"
        );

        let mut entries: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for outcome in self.fanout.fetch_each(specs).await {
            for row in outcome? {
                let name = row.get(&self.spec.name_column).and_then(cell_as_string);
                let code = row.get(&self.spec.code_column).and_then(cell_as_string);
                if let (Some(name), Some(code)) = (name, code) {
                    entries.entry(name).or_default().insert(code);
                }
            }
        }

        Ok(DerivedIndex::new(entries, resources, Utc::now()))
    }

    fn rebuild_failed(&self, err: TabulaError) -> TabulaError {
        match err {
            TabulaError::IndexRebuildFailed { .. } => err,
            other => TabulaError::IndexRebuildFailed {
                index: self.spec.name.clone(),
                reason: other.to_string(),
            },
        }
    }

    fn record(&self, persist_error: Option<TabulaError>) -> TabulaResult<()> {
        let mut log = self.log.lock().map_err(|_| CacheError::LockPoisoned)?;
        log.rebuilds += 1;
        if let Some(err) = &persist_error {
            tracing::warn!(index = %self.spec.name, error = %err, "failed to persist derived index");
        }
        log.last_error = persist_error;
        Ok(())
    }

    fn record_failure(&self, err: TabulaError) -> TabulaResult<()> {
        let mut log = self.log.lock().map_err(|_| CacheError::LockPoisoned)?;
        log.failures += 1;
        log.last_error = Some(err);
        Ok(())
    }
}

impl std::fmt::Debug for DerivedIndexCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedIndexCache")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}
