//! TABULA Client - Cache-aside access to a paginated open-data service
//!
//! Every remote call goes through [`FetchExecutor`], which consults the
//! persistent request cache before the network. On top of it:
//!
//! - [`PaginatedCollector`] walks limit/offset pages until a short page.
//! - [`FanOutDispatcher`] runs one query per (resource, item) pair with
//!   bounded concurrency and per-pair failure isolation.
//! - [`DerivedIndexCache`] keeps a TTL-bound name → code index built from
//!   sampled resources.
//! - [`DatastoreClient`] and [`DrugPriceService`] expose the typed endpoints
//!   and price lookups.

pub mod app;
pub mod datastore;
pub mod deadline;
pub mod fanout;
pub mod fetch;
pub mod index;
pub mod paginate;
pub mod prices;
pub mod query;
pub mod resolver;
pub mod telemetry;
pub mod transport;

pub use app::Tabula;
pub use datastore::DatastoreClient;
pub use fanout::{FanOutDispatcher, FanOutResult, PairFailure};
pub use fetch::{FetchExecutor, ReadOptions};
pub use index::{DerivedIndex, DerivedIndexCache, IndexSpec, IndexState, IndexStatus};
pub use paginate::{
    CollectionLimits, ExecutorPageSource, PageScope, PageSource, PaginatedCollector,
};
pub use prices::DrugPriceService;
pub use query::{QueryBuilder, SqlQueryBuilder};
pub use resolver::{MetastoreResolver, Resolver};
pub use telemetry::init_tracing;
pub use transport::{HttpTransport, Transport};
