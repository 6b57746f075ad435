//! LMDB-backed request cache.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped,
//! durable key-value store. Entries written here survive process restarts.
//!
//! # Value Format
//!
//! `[tag: 1 byte][body]` where tag `0` means the body is JSON and tag `1`
//! means the body is an opaque download. No timestamp is stored.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses:
//! - Read transactions for `get` and `stats`
//! - Write transactions for `put`, `remove`, `remove_prefix` and `clear`
//! - Hit/miss counters behind a lock

use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use tabula_core::{CacheError, Payload, TabulaError, TabulaResult};

use super::request_key::RequestKey;
use super::traits::{CacheBackend, CacheStats};

const TAG_JSON: u8 = 0;
const TAG_BYTES: u8 = 1;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for TabulaError {
    fn from(e: LmdbCacheError) -> Self {
        TabulaError::Cache(CacheError::Backend {
            reason: e.to_string(),
        })
    }
}

/// LMDB-backed cache.
///
/// # Example
///
/// ```ignore
/// use tabula_storage::cache::{LmdbCacheBackend, RequestKey};
/// use tabula_core::FetchRequest;
///
/// let backend = LmdbCacheBackend::new("/tmp/tabula-cache", 100)?;
/// let key = RequestKey::for_request(&FetchRequest::get("datastore/imports/abc"));
/// backend.put(&key, &payload).await?;
/// let cached = backend.get(&key).await?;
/// ```
pub struct LmdbCacheBackend {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    /// Hit and miss counters; entry counts are read from LMDB.
    stats: RwLock<CacheStats>,
}

impl LmdbCacheBackend {
    /// Open (or create) an LMDB cache.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(Self {
            env,
            db,
            stats: RwLock::new(CacheStats::default()),
        })
    }

    fn record(&self, hit: bool) {
        if let Ok(mut stats) = self.stats.write() {
            if hit {
                stats.hits += 1;
            } else {
                stats.misses += 1;
            }
        }
    }

    /// Collect keys matching a prefix.
    fn collect_keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, LmdbCacheError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let iter = self
            .db
            .prefix_iter(&rtxn, prefix)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let mut keys = Vec::new();
        for result in iter {
            let (key, _) = result.map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            keys.push(key.to_vec());
        }
        Ok(keys)
    }

    fn delete_keys(&self, keys: &[Vec<u8>]) -> Result<u64, LmdbCacheError> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let mut deleted = 0u64;
        for key in keys {
            if self
                .db
                .delete(&mut wtxn, key)
                .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?
            {
                deleted += 1;
            }
        }

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        Ok(deleted)
    }
}

/// Encode a payload into the stored value format.
fn encode_value(key: &RequestKey, value: &Payload) -> Result<Vec<u8>, CacheError> {
    match value {
        Payload::Json(json) => {
            let body = serde_json::to_vec(json).map_err(|e| CacheError::Encode {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
            let mut bytes = Vec::with_capacity(1 + body.len());
            bytes.push(TAG_JSON);
            bytes.extend_from_slice(&body);
            Ok(bytes)
        }
        Payload::Bytes(body) => {
            let mut bytes = Vec::with_capacity(1 + body.len());
            bytes.push(TAG_BYTES);
            bytes.extend_from_slice(body);
            Ok(bytes)
        }
    }
}

/// Decode a stored value.
fn decode_value(key: &RequestKey, bytes: &[u8]) -> Result<Payload, CacheError> {
    let decode_error = |reason: String| CacheError::Decode {
        key: key.to_string(),
        reason,
    };

    match bytes.split_first() {
        Some((&TAG_JSON, body)) => serde_json::from_slice(body)
            .map(Payload::Json)
            .map_err(|e| decode_error(e.to_string())),
        Some((&TAG_BYTES, body)) => Ok(Payload::Bytes(body.to_vec())),
        Some((tag, _)) => Err(decode_error(format!("unknown value tag {}", tag))),
        None => Err(decode_error("empty value".to_string())),
    }
}

#[async_trait]
impl CacheBackend for LmdbCacheBackend {
    async fn get(&self, key: &RequestKey) -> TabulaResult<Option<Payload>> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        match self.db.get(&rtxn, key.encode()) {
            Ok(Some(bytes)) => {
                self.record(true);
                Ok(Some(decode_value(key, bytes)?))
            }
            Ok(None) => {
                self.record(false);
                Ok(None)
            }
            Err(e) => {
                self.record(false);
                Err(LmdbCacheError::Transaction(e.to_string()).into())
            }
        }
    }

    async fn put(&self, key: &RequestKey, value: &Payload) -> TabulaResult<()> {
        let bytes = encode_value(key, value)?;

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        self.db
            .put(&mut wtxn, key.encode(), &bytes)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(())
    }

    async fn remove(&self, key: &RequestKey) -> TabulaResult<bool> {
        Ok(self.delete_keys(&[key.encode().to_vec()])? > 0)
    }

    async fn remove_prefix(&self, prefix: &str) -> TabulaResult<u64> {
        let keys = self.collect_keys_with_prefix(prefix.as_bytes())?;
        Ok(self.delete_keys(&keys)?)
    }

    async fn clear(&self) -> TabulaResult<u64> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let removed = self
            .db
            .len(&wtxn)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        self.db
            .clear(&mut wtxn)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(removed)
    }

    async fn stats(&self) -> TabulaResult<CacheStats> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let mut entry_count = 0u64;
        let mut size_bytes = 0u64;
        let iter = self
            .db
            .iter(&rtxn)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        for result in iter {
            let (_, value) = result.map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
            entry_count += 1;
            size_bytes += value.len() as u64;
        }

        let mut stats = self.stats.read().map(|s| s.clone()).unwrap_or_default();
        stats.entry_count = entry_count;
        stats.size_bytes = size_bytes;
        Ok(stats)
    }
}
