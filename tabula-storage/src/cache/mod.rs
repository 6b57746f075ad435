//! Request cache with get-or-fetch semantics and durable LMDB storage.
//!
//! The cache is a flat table from canonical request descriptor
//! ([`RequestKey`]) to decoded response ([`tabula_core::Payload`]). It has no
//! TTL and no capacity eviction: freshness belongs to whichever component
//! understands what staleness means for its own data.
//!
//! # Example
//!
//! ```ignore
//! let backend = Arc::new(LmdbCacheBackend::new(".tabula-cache", 1024)?);
//! let cache = KeyedCache::new(backend);
//!
//! let key = RequestKey::for_request(&request);
//! let payload = cache.get_or_fetch(&key, || transport.send(&request)).await?;
//! ```

pub mod keyed;
pub mod lmdb_backend;
pub mod memory;
pub mod request_key;
pub mod traits;

pub use keyed::KeyedCache;
pub use lmdb_backend::{LmdbCacheBackend, LmdbCacheError};
pub use memory::InMemoryCacheBackend;
pub use request_key::RequestKey;
pub use traits::{CacheBackend, CacheStats};
