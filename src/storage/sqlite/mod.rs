//! `SQLite` backends.
//!
//! - [`SqliteDocumentStore`]: story contexts, units and sessions
//! - [`SqliteQueueStore`]: the pre-generation queue
//!
//! Each backend owns its own `Mutex<Connection>`. Both may point at the same
//! database file; WAL mode and the busy timeout let them share it.
//! Timestamps are stored as Unix milliseconds.

mod connection;
mod documents;
mod metrics;
mod queue;

pub use connection::{acquire_lock, configure_connection, open_connection};
pub use documents::SqliteDocumentStore;
pub use metrics::{observe, record_operation_metrics};
pub use queue::SqliteQueueStore;

use crate::{Error, Result};
use chrono::{DateTime, Utc};

/// Decodes a stored millisecond timestamp.
pub(crate) fn timestamp_from_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| Error::operation("decode_timestamp", format!("out of range: {millis}")))
}
