//! Document store trait.

use crate::Result;
use chrono::{DateTime, Utc};

/// A stored document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Document key, e.g. `session/abc`.
    pub key: String,
    /// Monotonic revision. The first `put` stores revision 1.
    pub revision: u64,
    /// Serialized JSON body.
    pub body: String,
    /// Time of the last write.
    pub updated_at: DateTime<Utc>,
}

/// Trait for key-document backends.
///
/// Every write either creates a document (`put`) or replaces it conditionally on
/// the revision the caller read (`update`). There is no unconditional overwrite and
/// no delete: story contexts, units and sessions are never purged.
pub trait DocumentStore: Send + Sync {
    /// Backend name for logs and metrics.
    fn backend_name(&self) -> &'static str;

    /// Retrieves a document by key.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if the backend fails.
    fn get(&self, key: &str) -> Result<Option<Document>>;

    /// Creates a document at revision 1.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Conflict`] if the key already exists.
    fn put(&self, key: &str, body: &str) -> Result<Document>;

    /// Replaces a document if its stored revision equals `expected_revision`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotFound`] if the key is absent, and
    /// [`crate::Error::Conflict`] if the stored revision differs.
    fn update(&self, key: &str, body: &str, expected_revision: u64) -> Result<Document>;

    /// Lists keys starting with `prefix`, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if the backend fails.
    fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Checks whether a key exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

impl<T: DocumentStore + ?Sized> DocumentStore for std::sync::Arc<T> {
    fn backend_name(&self) -> &'static str {
        (**self).backend_name()
    }

    fn get(&self, key: &str) -> Result<Option<Document>> {
        (**self).get(key)
    }

    fn put(&self, key: &str, body: &str) -> Result<Document> {
        (**self).put(key, body)
    }

    fn update(&self, key: &str, body: &str, expected_revision: u64) -> Result<Document> {
        (**self).update(key, body, expected_revision)
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).list_keys(prefix)
    }
}
