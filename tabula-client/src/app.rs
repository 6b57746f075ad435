//! Wiring of the components from a [`TabulaConfig`].

use std::sync::Arc;

use tabula_core::{TabulaConfig, TabulaResult};
use tabula_storage::{CacheBackend, KeyedCache, LmdbCacheBackend};

use crate::datastore::DatastoreClient;
use crate::fanout::FanOutDispatcher;
use crate::fetch::FetchExecutor;
use crate::index::{DerivedIndexCache, IndexSpec};
use crate::paginate::CollectionLimits;
use crate::prices::DrugPriceService;
use crate::query::SqlQueryBuilder;
use crate::resolver::{MetastoreResolver, Resolver};
use crate::transport::{HttpTransport, Transport};

/// Every component sharing one cache and one transport.
#[derive(Debug, Clone)]
pub struct Tabula {
    pub executor: FetchExecutor,
    pub datastore: DatastoreClient,
    pub index: Arc<DerivedIndexCache>,
    pub prices: DrugPriceService,
}

impl Tabula {
    /// Production wiring: LMDB cache at `cache.path`, HTTP transport,
    /// metastore resolver.
    pub fn open(config: &TabulaConfig) -> TabulaResult<Self> {
        let backend = LmdbCacheBackend::new(&config.cache.path, config.cache.max_size_mb)?;
        let transport = HttpTransport::new(&config.http)?;
        Ok(Self::with_parts(config, Arc::new(backend), Arc::new(transport), None))
    }

    /// Wire the components over the given backend and transport. Without a
    /// resolver, a [`MetastoreResolver`] over the same executor is used.
    pub fn with_parts(
        config: &TabulaConfig,
        backend: Arc<dyn CacheBackend>,
        transport: Arc<dyn Transport>,
        resolver: Option<Arc<dyn Resolver>>,
    ) -> Self {
        let executor = FetchExecutor::new(KeyedCache::new(backend), transport);
        let resolver = resolver.unwrap_or_else(|| {
            Arc::new(
                MetastoreResolver::new(executor.clone())
                    .with_title_filter(config.index.title_filter.clone()),
            )
        });

        let fanout = FanOutDispatcher::new(
            executor.clone(),
            Arc::new(SqlQueryBuilder::default()),
            config.fanout.concurrency,
        )
        .with_deadline(config.fanout.deadline());
        let datastore =
            DatastoreClient::new(executor.clone(), CollectionLimits::from(&config.pagination))
                .with_page_size(config.pagination.page_size);

        // Index rebuilds are not bounded by the per-call fan-out deadline.
        let index = Arc::new(DerivedIndexCache::new(
            IndexSpec::from(&config.index),
            executor.clone(),
            resolver,
            fanout.clone().with_deadline(None),
        ));
        let prices = DrugPriceService::new(Arc::clone(&index), fanout, datastore.clone(), &config.index);

        Self {
            executor,
            datastore,
            index,
            prices,
        }
    }
}
