//! Canonical request descriptors used as cache keys.
//!
//! A `RequestKey` can only be built from a `FetchRequest` or as a reserved
//! key, so every cache entry is addressed by the exact request that produced
//! it.

use sha2::{Digest, Sha256};
use tabula_core::{FetchRequest, Method};

/// Separator between the endpoint and the body digest.
const BODY_SEPARATOR: char = '#';

/// Prefix for keys that do not describe a remote request.
const RESERVED_PREFIX: &str = "@reserved/";

/// Canonical request descriptor.
///
/// # Format
///
/// - Bodiless request: `"{METHOD} {endpoint}"`
/// - Request with a body: `"{METHOD} {endpoint}#{sha256(body) as hex}"`
/// - Reserved entry: `"@reserved/{namespace}/{name}"`
///
/// The body is hashed from its `serde_json` serialization, whose object keys
/// are sorted, so logically equal bodies hash identically. Headers are not
/// part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
    inner: String,
}

impl RequestKey {
    /// Derive the key for a remote request.
    pub fn for_request(request: &FetchRequest) -> Self {
        let mut inner = Self::prefix(request.method, &request.endpoint);
        if let Some(body) = &request.body {
            let mut hasher = Sha256::new();
            hasher.update(body.to_string().as_bytes());
            inner.push(BODY_SEPARATOR);
            inner.push_str(&hex::encode(hasher.finalize()));
        }
        Self { inner }
    }

    /// Key for an entry owned by a local component rather than a request.
    pub fn reserved(namespace: &str, name: &str) -> Self {
        Self {
            inner: format!("{}{}/{}", RESERVED_PREFIX, namespace, name),
        }
    }

    /// String prefix matching every request to endpoints starting with
    /// `endpoint_prefix`. Used for bulk invalidation.
    pub fn prefix(method: Method, endpoint_prefix: &str) -> String {
        format!("{} {}", method.as_str(), endpoint_prefix)
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// Encode for byte-keyed stores.
    pub fn encode(&self) -> &[u8] {
        self.inner.as_bytes()
    }
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.inner)
    }
}

// ============================================================================
// TESTS
// ============================================================================
