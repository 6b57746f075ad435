//! Derived index lifecycle: TTL-governed rebuilds, single-flight rebuilds,
//! sampling stride, failure retention and persistence across restarts.

use std::sync::Arc;
use std::time::Duration;

use tabula_client::{
    DerivedIndexCache, FanOutDispatcher, FetchExecutor, IndexSpec, IndexState, MetastoreResolver,
    SqlQueryBuilder,
};
use tabula_core::{FetchRequest, IndexConfig, Payload, TabulaError};
use tabula_storage::{
    CacheBackend, InMemoryCacheBackend, KeyedCache, LmdbCacheBackend, RequestKey,
};

#[path = "support/fakes.rs"]
mod fakes;
use fakes::{drug_rows, FakeDatastore, FakeResolver};

const HOUR: Duration = Duration::from_secs(3600);

fn index_over(
    backend: Arc<dyn CacheBackend>,
    datastore: Arc<FakeDatastore>,
    resolver: Arc<FakeResolver>,
    ttl: Duration,
    stride: usize,
) -> DerivedIndexCache {
    let executor = FetchExecutor::new(KeyedCache::new(backend), datastore);
    let fanout = FanOutDispatcher::new(executor.clone(), Arc::new(SqlQueryBuilder::default()), 4);
    let spec = IndexSpec::from(&IndexConfig::default())
        .with_ttl(ttl)
        .with_stride(stride);
    DerivedIndexCache::new(spec, executor, resolver, fanout)
}

fn datastore_with(ids: &[&str]) -> Arc<FakeDatastore> {
    let datastore = FakeDatastore::new();
    for id in ids {
        datastore.set_table(id, drug_rows(id, &["2024-01-03"]));
    }
    Arc::new(datastore)
}

fn memory() -> Arc<dyn CacheBackend> {
    Arc::new(InMemoryCacheBackend::new())
}

#[tokio::test]
async fn test_ttl_governs_rebuilds() {
    let resolver = Arc::new(FakeResolver::new(&["r0"]));
    let index = index_over(
        memory(),
        datastore_with(&["r0"]),
        Arc::clone(&resolver),
        Duration::from_millis(200),
        1,
    );
    assert_eq!(index.status().unwrap().state, IndexState::Empty);

    index.lookup("ASPIRIN 81 MG TABLET").await.unwrap();
    assert_eq!(resolver.resolutions(), 1);

    index.lookup("ASPIRIN 81 MG TABLET").await.unwrap();
    assert_eq!(resolver.resolutions(), 1);
    assert_eq!(index.status().unwrap().state, IndexState::Fresh);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(index.status().unwrap().state, IndexState::Stale);

    index.lookup("ASPIRIN 81 MG TABLET").await.unwrap();
    assert_eq!(resolver.resolutions(), 2);
    assert_eq!(index.status().unwrap().rebuilds, 2);
}

#[tokio::test]
async fn test_concurrent_stale_lookups_rebuild_once() {
    let resolver = Arc::new(FakeResolver::new(&["r0"]).with_delay(Duration::from_millis(50)));
    let index = index_over(
        memory(),
        datastore_with(&["r0"]),
        Arc::clone(&resolver),
        Duration::from_millis(200),
        1,
    );

    let (a, b) = tokio::join!(index.all_names(), index.all_names());
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(resolver.resolutions(), 1);

    tokio::time::sleep(Duration::from_millis(300)).await;

    let (a, b) = tokio::join!(
        index.lookup("ASPIRIN 81 MG TABLET"),
        index.lookup("CALCITRIOL 0.25 MCG CAPSULE")
    );
    a.unwrap();
    b.unwrap();
    assert_eq!(resolver.resolutions(), 2);
}

#[tokio::test]
async fn test_stride_samples_resources() {
    let ids: Vec<String> = (0..10).map(|i| format!("r{}", i)).collect();
    let ids: Vec<&str> = ids.iter().map(String::as_str).collect();

    let datastore = datastore_with(&ids);
    let index = index_over(
        memory(),
        Arc::clone(&datastore),
        Arc::new(FakeResolver::new(&ids)),
        HOUR,
        4,
    );
    index.warm_up().await.unwrap();
    assert_eq!(datastore.queried_resources(), vec!["r0", "r4", "r8"]);
    // Every resolved resource is kept, not just the sampled ones.
    assert_eq!(index.resources().await.unwrap().len(), 10);

    let datastore = datastore_with(&ids);
    let index = index_over(
        memory(),
        Arc::clone(&datastore),
        Arc::new(FakeResolver::new(&ids)),
        HOUR,
        1,
    );
    index.warm_up().await.unwrap();
    assert_eq!(datastore.queried_resources().len(), 10);
}

#[tokio::test]
async fn test_index_queries() {
    let index = index_over(
        memory(),
        datastore_with(&["r0", "r1"]),
        Arc::new(FakeResolver::new(&["r0", "r1"])),
        HOUR,
        1,
    );

    assert_eq!(
        index.all_names().await.unwrap(),
        vec![
            "ASPIRIN 81 MG TABLET",
            "CALCITRIOL 0.25 MCG CAPSULE",
            "CALCITRIOL 1 MCG/ML SOLUTION",
        ]
    );
    assert_eq!(
        index.names_matching_base("calcitriol").await.unwrap(),
        vec!["CALCITRIOL 0.25 MCG CAPSULE", "CALCITRIOL 1 MCG/ML SOLUTION"]
    );
    assert!(index.names_matching_base("  ").await.unwrap().is_empty());

    let codes = index.lookup("ASPIRIN 81 MG TABLET").await.unwrap();
    assert_eq!(codes.into_iter().collect::<Vec<_>>(), vec!["00003"]);
    assert_eq!(index.all_codes().await.unwrap().len(), 3);
    assert!(index.contains_code("00002").await.unwrap());
    assert!(!index.contains_code("99999").await.unwrap());
    assert_eq!(index.latest_resource().await.unwrap().id, "r1");

    assert_eq!(
        index.lookup("UNOBTAINIUM").await.unwrap_err(),
        TabulaError::not_found("name", "UNOBTAINIUM")
    );
}

#[tokio::test]
async fn test_failed_rebuild_keeps_previous_index() {
    let resolver = Arc::new(FakeResolver::new(&["r0"]));
    let index = index_over(
        memory(),
        datastore_with(&["r0"]),
        Arc::clone(&resolver),
        HOUR,
        1,
    );
    let before = index.all_names().await.unwrap();

    resolver.set_failing(true);
    index.mark_stale();

    assert_eq!(index.all_names().await.unwrap(), before);
    let status = index.status().unwrap();
    assert_eq!(status.state, IndexState::Stale);
    assert_eq!(status.failures, 1);
    assert!(matches!(
        status.last_error,
        Some(TabulaError::IndexRebuildFailed { .. })
    ));

    resolver.set_failing(false);
    index.all_names().await.unwrap();
    let status = index.status().unwrap();
    assert_eq!(status.state, IndexState::Fresh);
    assert_eq!(status.last_error, None);
    assert_eq!(status.rebuilds, 2);
}

#[tokio::test]
async fn test_first_build_failure_is_returned() {
    let datastore = datastore_with(&["r0", "r1"]);
    datastore.fail_resource("r1");
    let index = index_over(
        memory(),
        datastore,
        Arc::new(FakeResolver::new(&["r0", "r1"])),
        HOUR,
        1,
    );

    let err = index.lookup("ASPIRIN 81 MG TABLET").await.unwrap_err();
    assert!(matches!(err, TabulaError::IndexRebuildFailed { ref index, .. } if index == "nadac"));
    assert_eq!(index.status().unwrap().state, IndexState::Empty);
}

#[tokio::test]
async fn test_no_resources_is_a_rebuild_failure() {
    let index = index_over(
        memory(),
        datastore_with(&[]),
        Arc::new(FakeResolver::new(&[])),
        HOUR,
        1,
    );
    assert!(matches!(
        index.warm_up().await,
        Err(TabulaError::IndexRebuildFailed { .. })
    ));
}

#[tokio::test]
async fn test_rebuild_invalidates_newest_dataset_metadata() {
    let backend = memory();
    let stale_metadata = RequestKey::for_request(&FetchRequest::get(
        "metastore/schemas/dataset/items/ds-r1?show-reference-ids",
    ));
    let older_metadata = RequestKey::for_request(&FetchRequest::get(
        "metastore/schemas/dataset/items/ds-r0?show-reference-ids",
    ));
    let payload = Payload::Json(serde_json::json!({}));
    backend.put(&stale_metadata, &payload).await.unwrap();
    backend.put(&older_metadata, &payload).await.unwrap();

    let index = index_over(
        Arc::clone(&backend),
        datastore_with(&["r0", "r1"]),
        Arc::new(FakeResolver::new(&["r0", "r1"])),
        HOUR,
        1,
    );
    index.warm_up().await.unwrap();

    assert!(backend.get(&stale_metadata).await.unwrap().is_none());
    assert!(backend.get(&older_metadata).await.unwrap().is_some());
}

#[tokio::test]
async fn test_persisted_index_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    let names = {
        let backend = Arc::new(LmdbCacheBackend::new(dir.path(), 16).unwrap());
        let index = index_over(
            backend,
            datastore_with(&["r0"]),
            Arc::new(FakeResolver::new(&["r0"])),
            HOUR,
            1,
        );
        index.all_names().await.unwrap()
    };

    let backend = Arc::new(LmdbCacheBackend::new(dir.path(), 16).unwrap());
    let datastore = datastore_with(&[]);
    let resolver = Arc::new(FakeResolver::new(&[]));
    let index = index_over(
        backend,
        Arc::clone(&datastore),
        Arc::clone(&resolver),
        HOUR,
        1,
    );

    assert_eq!(index.all_names().await.unwrap(), names);
    assert_eq!(resolver.resolutions(), 0);
    assert_eq!(datastore.calls(), 0);
    assert_eq!(index.status().unwrap().rebuilds, 0);
}

#[tokio::test]
async fn test_stale_persisted_index_is_fallback() {
    let backend = memory();
    {
        let index = index_over(
            Arc::clone(&backend),
            datastore_with(&["r0"]),
            Arc::new(FakeResolver::new(&["r0"])),
            HOUR,
            1,
        );
        index.warm_up().await.unwrap();
    }

    // A zero TTL makes the persisted copy stale on arrival.
    let resolver = Arc::new(FakeResolver::new(&["r0"]));
    resolver.set_failing(true);
    let index = index_over(
        backend,
        datastore_with(&["r0"]),
        Arc::clone(&resolver),
        Duration::ZERO,
        1,
    );

    assert_eq!(index.all_names().await.unwrap().len(), 3);
    assert_eq!(resolver.resolutions(), 1);
    assert_eq!(index.status().unwrap().failures, 1);
}

#[tokio::test]
async fn test_ttl_rebuild_discovers_new_release() {
    let datastore = datastore_with(&["dist-2024", "dist-2025"]);
    datastore.publish("ds-2024", "dist-2024");

    let executor = FetchExecutor::new(KeyedCache::new(memory()), Arc::clone(&datastore) as _);
    let fanout = FanOutDispatcher::new(executor.clone(), Arc::new(SqlQueryBuilder::default()), 4);
    let spec = IndexSpec::from(&IndexConfig::default())
        .with_ttl(Duration::from_millis(200))
        .with_stride(1);
    let resolver = Arc::new(MetastoreResolver::new(executor.clone()));
    let index = DerivedIndexCache::new(spec, executor, resolver, fanout);

    let ids = |resources: Vec<tabula_core::ResourceDescriptor>| -> Vec<String> {
        resources.into_iter().map(|r| r.id).collect()
    };
    assert_eq!(ids(index.resources().await.unwrap()), vec!["dist-2024"]);

    // Published after the first build; invisible while the index is fresh.
    datastore.publish("ds-2025", "dist-2025");
    assert_eq!(ids(index.resources().await.unwrap()), vec!["dist-2024"]);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        ids(index.resources().await.unwrap()),
        vec!["dist-2024", "dist-2025"]
    );
    assert_eq!(
        index.latest_resource().await.unwrap().dataset.as_deref(),
        Some("ds-2025")
    );
    assert_eq!(index.status().unwrap().rebuilds, 2);
    let catalog_reads = datastore
        .endpoints()
        .iter()
        .filter(|e| e.as_str() == "metastore/schemas/dataset/items?show-reference-ids")
        .count();
    assert_eq!(catalog_reads, 2);
}
