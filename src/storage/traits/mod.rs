//! Storage traits.
//!
//! Two seams separate the services from storage technology:
//! - [`DocumentStore`]: versioned key-document storage with compare-and-swap updates
//! - [`QueueStore`]: the pre-generation work queue with claim-and-lease semantics

mod document;
mod queue;

pub use document::{Document, DocumentStore};
pub use queue::QueueStore;
