//! In-memory document store.

use crate::storage::sqlite::acquire_lock;
use crate::storage::traits::{Document, DocumentStore};
use crate::{Error, Result};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Document store backed by a `BTreeMap`.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<BTreeMap<String, Document>>,
}

impl MemoryDocumentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    #[must_use]
    pub fn len(&self) -> usize {
        acquire_lock(&self.documents).len()
    }

    /// True when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &str) -> Result<Option<Document>> {
        Ok(acquire_lock(&self.documents).get(key).cloned())
    }

    fn put(&self, key: &str, body: &str) -> Result<Document> {
        let mut documents = acquire_lock(&self.documents);
        if let Some(existing) = documents.get(key) {
            return Err(Error::Conflict {
                key: key.to_string(),
                expected: 0,
                actual: existing.revision,
            });
        }
        let document = Document {
            key: key.to_string(),
            revision: 1,
            body: body.to_string(),
            updated_at: Utc::now(),
        };
        documents.insert(key.to_string(), document.clone());
        Ok(document)
    }

    fn update(&self, key: &str, body: &str, expected_revision: u64) -> Result<Document> {
        let mut documents = acquire_lock(&self.documents);
        let Some(existing) = documents.get_mut(key) else {
            return Err(Error::not_found("document", key));
        };
        if existing.revision != expected_revision {
            return Err(Error::Conflict {
                key: key.to_string(),
                expected: expected_revision,
                actual: existing.revision,
            });
        }
        existing.revision += 1;
        existing.body = body.to_string();
        existing.updated_at = Utc::now();
        Ok(existing.clone())
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let documents = acquire_lock(&self.documents);
        Ok(documents
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_then_update_bumps_revision() {
        let store = MemoryDocumentStore::new();
        let created = store.put("session/a", "{}").unwrap();
        assert_eq!(created.revision, 1);

        let updated = store.update("session/a", "{\"x\":1}", 1).unwrap();
        assert_eq!(updated.revision, 2);
        assert_eq!(store.get("session/a").unwrap().unwrap().body, "{\"x\":1}");
    }

    #[test]
    fn test_put_existing_conflicts() {
        let store = MemoryDocumentStore::new();
        store.put("story/a", "{}").unwrap();
        assert!(matches!(
            store.put("story/a", "{}"),
            Err(Error::Conflict { .. })
        ));
    }

    #[test]
    fn test_stale_update_conflicts() {
        let store = MemoryDocumentStore::new();
        store.put("session/a", "{}").unwrap();
        store.update("session/a", "{}", 1).unwrap();

        let err = store.update("session/a", "{}", 1).unwrap_err();
        assert!(matches!(
            err,
            Error::Conflict {
                expected: 1,
                actual: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let store = MemoryDocumentStore::new();
        assert!(matches!(
            store.update("session/none", "{}", 1),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_list_keys_by_prefix() {
        let store = MemoryDocumentStore::new();
        store.put("unit/s1/LEARN/math", "{}").unwrap();
        store.put("unit/s1/EXPERIENCE/math", "{}").unwrap();
        store.put("unit/s2/LEARN/math", "{}").unwrap();
        store.put("session/s1", "{}").unwrap();

        let keys = store.list_keys("unit/s1/").unwrap();
        assert_eq!(
            keys,
            vec![
                "unit/s1/EXPERIENCE/math".to_string(),
                "unit/s1/LEARN/math".to_string()
            ]
        );
    }
}
