//! Read-through LRU cache in front of a document store.

use crate::storage::sqlite::acquire_lock;
use crate::storage::traits::{Document, DocumentStore};
use crate::{Error, Result};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Caches `get` results of an inner [`DocumentStore`].
///
/// Writes go straight to the inner store and then drop the cached entry, so the
/// next read sees the new revision. A `Conflict` on `update` also drops the entry:
/// another process changed the document and the cached copy is stale.
pub struct CachedDocumentStore<S: DocumentStore> {
    inner: S,
    cache: Mutex<LruCache<String, Document>>,
}

impl<S: DocumentStore> CachedDocumentStore<S> {
    /// Default number of cached documents.
    pub const DEFAULT_CAPACITY: usize = 1024;

    /// Wraps `inner` with a cache of `capacity` documents (at least one).
    #[must_use]
    pub fn new(inner: S, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns the wrapped store.
    pub const fn inner(&self) -> &S {
        &self.inner
    }

    /// Number of cached documents.
    #[must_use]
    pub fn cached_len(&self) -> usize {
        acquire_lock(&self.cache).len()
    }

    fn invalidate(&self, key: &str) {
        acquire_lock(&self.cache).pop(key);
    }
}

impl<S: DocumentStore> DocumentStore for CachedDocumentStore<S> {
    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }

    fn get(&self, key: &str) -> Result<Option<Document>> {
        if let Some(document) = acquire_lock(&self.cache).get(key).cloned() {
            metrics::counter!("document_cache_lookups_total", "result" => "hit").increment(1);
            return Ok(Some(document));
        }
        metrics::counter!("document_cache_lookups_total", "result" => "miss").increment(1);

        let document = self.inner.get(key)?;
        if let Some(ref document) = document {
            acquire_lock(&self.cache).put(key.to_string(), document.clone());
        }
        Ok(document)
    }

    fn put(&self, key: &str, body: &str) -> Result<Document> {
        let result = self.inner.put(key, body);
        self.invalidate(key);
        result
    }

    fn update(&self, key: &str, body: &str, expected_revision: u64) -> Result<Document> {
        let result = self.inner.update(key, body, expected_revision);
        match result {
            Ok(_) | Err(Error::Conflict { .. } | Error::NotFound { .. }) => self.invalidate(key),
            Err(_) => {},
        }
        result
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list_keys(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDocumentStore;
    use std::sync::Arc;

    #[test]
    fn test_reads_are_cached_and_writes_invalidate() {
        let store = CachedDocumentStore::new(MemoryDocumentStore::new(), 8);
        store.put("session/a", "v1").unwrap();
        assert_eq!(store.get("session/a").unwrap().unwrap().body, "v1");
        assert_eq!(store.cached_len(), 1);

        store.update("session/a", "v2", 1).unwrap();
        assert_eq!(store.cached_len(), 0);
        assert_eq!(store.get("session/a").unwrap().unwrap().body, "v2");
    }

    #[test]
    fn test_conflict_drops_stale_copy() {
        let backing = Arc::new(MemoryDocumentStore::new());
        let store = CachedDocumentStore::new(Arc::clone(&backing), 8);
        store.put("session/a", "v1").unwrap();
        let cached = store.get("session/a").unwrap().unwrap();

        backing.update("session/a", "remote", 1).unwrap();
        assert_eq!(store.get("session/a").unwrap().unwrap().body, "v1");

        let err = store.update("session/a", "local", cached.revision).unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
        assert_eq!(store.get("session/a").unwrap().unwrap().body, "remote");
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let store = CachedDocumentStore::new(MemoryDocumentStore::new(), 0);
        store.put("a", "1").unwrap();
        store.put("b", "2").unwrap();
        store.get("a").unwrap();
        store.get("b").unwrap();
        assert_eq!(store.cached_len(), 1);
    }
}
