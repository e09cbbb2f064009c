//! In-memory backends.
//!
//! Used by tests and by single-process runs that do not need durability.

mod documents;
mod queue;

pub use documents::MemoryDocumentStore;
pub use queue::MemoryQueueStore;
