//! Storage layer.
//!
//! - [`DocumentStore`] keeps story contexts, content units and sessions as
//!   versioned JSON documents keyed `story/{sid}`, `unit/{sid}/{container}/{subject}`
//!   and `session/{sid}`.
//! - [`QueueStore`] keeps the pre-generation queue.
//! - [`RubricRepository`] gives typed, compare-and-swap access on top of a
//!   document store.
//!
//! Both traits have an in-memory and a `SQLite` backend.

// Row counts and revisions move between i64 (SQLite) and u64/usize.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
// Dropping the connection guard a few statements early buys nothing.
#![allow(clippy::significant_drop_tightening)]

mod cached;
pub mod memory;
mod repository;
pub mod sqlite;
pub mod traits;

pub use cached::CachedDocumentStore;
pub use memory::{MemoryDocumentStore, MemoryQueueStore};
pub use repository::{RubricRepository, Versioned, session_key, story_key, unit_key};
pub use sqlite::{SqliteDocumentStore, SqliteQueueStore};
pub use traits::{Document, DocumentStore, QueueStore};

use crate::Result;
use std::path::Path;
use std::sync::Arc;

/// Which backend to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local maps.
    Memory,
    /// A `SQLite` file under the data directory.
    #[default]
    Sqlite,
}

/// Builds the document and queue stores for `backend`.
///
/// `db_path` is only used by the `SQLite` backend. When `cache_capacity` is
/// non-zero the document store is fronted by a [`CachedDocumentStore`].
///
/// # Errors
///
/// Returns an error if the database cannot be opened.
pub fn open_stores(
    backend: StorageBackend,
    db_path: &Path,
    cache_capacity: usize,
) -> Result<(Arc<dyn DocumentStore>, Arc<dyn QueueStore>)> {
    let (documents, queue): (Arc<dyn DocumentStore>, Arc<dyn QueueStore>) = match backend {
        StorageBackend::Memory => (
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemoryQueueStore::new()),
        ),
        StorageBackend::Sqlite => (
            Arc::new(SqliteDocumentStore::new(db_path)?),
            Arc::new(SqliteQueueStore::new(db_path)?),
        ),
    };
    tracing::info!(
        backend = documents.backend_name(),
        cached = cache_capacity > 0,
        "opened stores"
    );
    if cache_capacity == 0 {
        return Ok((documents, queue));
    }
    Ok((
        Arc::new(CachedDocumentStore::new(documents, cache_capacity)),
        queue,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_sqlite_stores_share_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rubricflow.db");
        let (documents, queue) = open_stores(StorageBackend::Sqlite, &path, 16).unwrap();
        documents.put("session/a", "{}").unwrap();
        assert_eq!(queue.stats().unwrap().open(), 0);
        assert!(path.exists());
    }

    #[test]
    fn test_open_memory_stores() {
        let (documents, _) = open_stores(StorageBackend::Memory, Path::new("unused"), 0).unwrap();
        assert_eq!(documents.backend_name(), "memory");
    }
}
