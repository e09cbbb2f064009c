//! Queue store trait.

use crate::Result;
use crate::models::{GenerationTarget, QueueItem, QueueStats};
use chrono::{DateTime, Duration, Utc};

/// Trait for pre-generation queue backends.
///
/// Timestamps are passed in by the caller so that every backend observes the same
/// clock as the services driving it.
pub trait QueueStore: Send + Sync {
    /// Backend name for logs and metrics.
    fn backend_name(&self) -> &'static str;

    /// Adds a pending item.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Conflict`] if an item with the same id exists.
    fn enqueue(&self, item: QueueItem) -> Result<QueueItem>;

    /// Atomically claims the highest-priority claimable item for `worker_id`.
    ///
    /// Claimable items are `pending` or `failed`. Among equal priorities the
    /// oldest item wins. The claimed item moves to `processing` with a lease
    /// ending at `now + lease`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if the backend fails.
    fn claim_next(
        &self,
        worker_id: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueItem>>;

    /// Marks an item completed by the worker holding it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotFound`] for an unknown id and
    /// [`crate::Error::LeaseLost`] unless the item is processing under
    /// `worker_id`.
    fn complete(&self, id: &str, worker_id: &str, now: DateTime<Utc>) -> Result<QueueItem>;

    /// Records a failed attempt by the worker holding the item.
    ///
    /// The retry count is incremented; once it exceeds `max_retries` the item
    /// becomes `permanently_failed`, otherwise it returns to `pending`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotFound`] for an unknown id and
    /// [`crate::Error::LeaseLost`] unless the item is processing under
    /// `worker_id`.
    fn fail(
        &self,
        id: &str,
        worker_id: &str,
        error: &str,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<QueueItem>;

    /// Counts each lapsed lease as a failed attempt.
    ///
    /// `processing` items whose lease lapsed before `now` become `failed`, or
    /// `permanently_failed` once their retry count exceeds `max_retries`.
    /// Returns the number of items reclaimed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if the backend fails.
    fn reclaim_expired(&self, max_retries: u32, now: DateTime<Utc>) -> Result<usize>;

    /// Retrieves an item by id.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if the backend fails.
    fn get(&self, id: &str) -> Result<Option<QueueItem>>;

    /// Counts items by status.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if the backend fails.
    fn stats(&self) -> Result<QueueStats>;

    /// Finds a non-terminal item for `target`, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OperationFailed`] if the backend fails.
    fn find_open(&self, target: &GenerationTarget) -> Result<Option<QueueItem>>;
}

impl<T: QueueStore + ?Sized> QueueStore for std::sync::Arc<T> {
    fn backend_name(&self) -> &'static str {
        (**self).backend_name()
    }

    fn enqueue(&self, item: QueueItem) -> Result<QueueItem> {
        (**self).enqueue(item)
    }

    fn claim_next(
        &self,
        worker_id: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueItem>> {
        (**self).claim_next(worker_id, lease, now)
    }

    fn complete(&self, id: &str, worker_id: &str, now: DateTime<Utc>) -> Result<QueueItem> {
        (**self).complete(id, worker_id, now)
    }

    fn fail(
        &self,
        id: &str,
        worker_id: &str,
        error: &str,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<QueueItem> {
        (**self).fail(id, worker_id, error, max_retries, now)
    }

    fn reclaim_expired(&self, max_retries: u32, now: DateTime<Utc>) -> Result<usize> {
        (**self).reclaim_expired(max_retries, now)
    }

    fn get(&self, id: &str) -> Result<Option<QueueItem>> {
        (**self).get(id)
    }

    fn stats(&self) -> Result<QueueStats> {
        (**self).stats()
    }

    fn find_open(&self, target: &GenerationTarget) -> Result<Option<QueueItem>> {
        (**self).find_open(target)
    }
}
