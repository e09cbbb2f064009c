//! Connection handling shared by the `SQLite` backends.

use crate::{Error, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Acquires a mutex, recovering the inner value if a previous holder panicked.
///
/// Poisoning is logged and counted. The guarded data (a connection or an
/// in-memory map) stays usable because every write is a single statement or a
/// single map insert.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("storage mutex was poisoned, recovering");
            metrics::counter!("storage_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

/// Opens a database file, or an in-memory database when `path` is `None`.
///
/// Parent directories are created as needed.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if the directory or database cannot be opened.
pub fn open_connection(path: Option<&Path>) -> Result<Connection> {
    let Some(path) = path else {
        return Connection::open_in_memory().map_err(|e| Error::operation("open_sqlite_in_memory", e));
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| Error::operation("create_data_dir", e))?;
    }
    let conn = Connection::open(path).map_err(|e| Error::operation("open_sqlite", e))?;
    configure_connection(&conn)?;
    Ok(conn)
}

/// Applies the pragmas every connection runs with.
///
/// - WAL journal so readers do not block the writer
/// - `synchronous = NORMAL`
/// - `busy_timeout` of 5 seconds, so CAS writers from several processes wait
///   instead of failing with `SQLITE_BUSY`
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if the busy timeout cannot be set.
pub fn configure_connection(conn: &Connection) -> Result<()> {
    // journal_mode returns the resulting mode as a row, which pragma_update rejects
    // on some builds; the mode itself is best effort.
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    conn.busy_timeout(std::time::Duration::from_millis(5000))
        .map_err(|e| Error::operation("configure_sqlite", e))?;
    Ok(())
}
