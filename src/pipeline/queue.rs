//! Pre-generation queue facade.
//!
//! Binds a [`QueueStore`] to the clock, retry limit and lease length so callers
//! never pass timestamps or policy around.

use crate::Result;
use crate::clock::Clock;
use crate::config::QueueConfig;
use crate::models::{GenerationTarget, QueueItem, QueueStats};
use crate::storage::QueueStore;
use chrono::Duration;
use std::sync::Arc;
use tracing::instrument;

/// Result of [`GenerationQueue::enqueue_unique`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enqueued {
    /// A new item was added.
    New(QueueItem),
    /// An open item for the same target already existed.
    Existing(QueueItem),
}

impl Enqueued {
    /// The item, new or existing.
    #[must_use]
    pub const fn item(&self) -> &QueueItem {
        match self {
            Self::New(item) | Self::Existing(item) => item,
        }
    }

    /// True when a new item was added.
    #[must_use]
    pub const fn is_new(&self) -> bool {
        matches!(self, Self::New(_))
    }
}

/// Queue operations with policy applied.
pub struct GenerationQueue {
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    max_retries: u32,
    lease: Duration,
}

impl GenerationQueue {
    /// Creates a queue over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn QueueStore>, clock: Arc<dyn Clock>, config: QueueConfig) -> Self {
        Self {
            store,
            clock,
            max_retries: config.max_retries,
            lease: Duration::seconds(i64::try_from(config.lease_secs).unwrap_or(i64::MAX / 1000)),
        }
    }

    /// Retries allowed before an item is permanently failed.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Enqueues `target` unless an open item for it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    #[instrument(skip(self, target), fields(target = %target))]
    pub fn enqueue_unique(&self, target: GenerationTarget, priority: i32) -> Result<Enqueued> {
        if let Some(existing) = self.store.find_open(&target)? {
            return Ok(Enqueued::Existing(existing));
        }
        let item = self
            .store
            .enqueue(QueueItem::new(target, priority, self.clock.now()))?;
        metrics::counter!("queue_items_total", "event" => "enqueued").increment(1);
        tracing::debug!(item_id = %item.id, "queued generation target");
        Ok(Enqueued::New(item))
    }

    /// Claims the next item for `worker_id`, reclaiming lapsed leases first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn claim(&self, worker_id: &str) -> Result<Option<QueueItem>> {
        let now = self.clock.now();
        let reclaimed = self.store.reclaim_expired(self.max_retries, now)?;
        if reclaimed > 0 {
            metrics::counter!("queue_items_total", "event" => "lease_expired")
                .increment(reclaimed as u64);
            tracing::info!(reclaimed, "reclaimed items with lapsed leases");
        }
        let claimed = self.store.claim_next(worker_id, self.lease, now)?;
        if claimed.is_some() {
            metrics::counter!("queue_items_total", "event" => "claimed").increment(1);
        }
        Ok(claimed)
    }

    /// Marks `id` completed on behalf of `worker_id`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotFound`] for an unknown id and
    /// [`crate::Error::LeaseLost`] when `worker_id` no longer holds the item.
    pub fn complete(&self, id: &str, worker_id: &str) -> Result<QueueItem> {
        let item = self.store.complete(id, worker_id, self.clock.now())?;
        metrics::counter!("queue_items_total", "event" => "completed").increment(1);
        Ok(item)
    }

    /// Records a failed attempt on `id` by `worker_id`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NotFound`] for an unknown id and
    /// [`crate::Error::LeaseLost`] when `worker_id` no longer holds the item.
    pub fn fail(&self, id: &str, worker_id: &str, error: &str) -> Result<QueueItem> {
        let item = self
            .store
            .fail(id, worker_id, error, self.max_retries, self.clock.now())?;
        let event = if item.status.is_terminal() {
            "permanently_failed"
        } else {
            "retried"
        };
        metrics::counter!("queue_items_total", "event" => event).increment(1);
        Ok(item)
    }

    /// Counts lapsed leases as failed attempts.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn reclaim_expired(&self) -> Result<usize> {
        self.store.reclaim_expired(self.max_retries, self.clock.now())
    }

    /// Looks up an item.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn get(&self, id: &str) -> Result<Option<QueueItem>> {
        self.store.get(id)
    }

    /// Open item for `target`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn find_open(&self, target: &GenerationTarget) -> Result<Option<QueueItem>> {
        self.store.find_open(target)
    }

    /// Counts by status.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub fn stats(&self) -> Result<QueueStats> {
        self.store.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;
    use crate::models::{ContainerType, PRIORITY_DEMAND, PRIORITY_WARMING, QueueStatus, Subject};
    use crate::storage::MemoryQueueStore;

    fn target(skill: &str) -> GenerationTarget {
        GenerationTarget::new(
            "stu",
            "3",
            Subject::Math,
            skill,
            ContainerType::Learn,
            "multiple_choice",
        )
    }

    fn queue(max_retries: u32) -> (GenerationQueue, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let config = QueueConfig {
            max_retries,
            lease_secs: 30,
            ..QueueConfig::default()
        };
        let queue = GenerationQueue::new(Arc::new(MemoryQueueStore::new()), clock.clone(), config);
        (queue, clock)
    }

    #[test]
    fn test_enqueue_unique_deduplicates_open_items() {
        let (queue, _) = queue(3);
        let first = queue.enqueue_unique(target("a"), PRIORITY_WARMING).unwrap();
        let second = queue.enqueue_unique(target("a"), PRIORITY_DEMAND).unwrap();
        assert!(first.is_new());
        assert!(!second.is_new());
        assert_eq!(first.item().id, second.item().id);

        queue.claim("w1").unwrap().unwrap();
        queue.complete(&first.item().id, "w1").unwrap();
        assert!(queue.enqueue_unique(target("a"), PRIORITY_DEMAND).unwrap().is_new());
    }

    #[test]
    fn test_permanent_failure_after_max_retries() {
        let (queue, _) = queue(1);
        let id = queue
            .enqueue_unique(target("a"), PRIORITY_DEMAND)
            .unwrap()
            .item()
            .id
            .clone();

        queue.claim("w1").unwrap().unwrap();
        assert_eq!(
            queue.fail(&id, "w1", "boom").unwrap().status,
            QueueStatus::Pending
        );
        queue.claim("w1").unwrap().unwrap();
        let item = queue.fail(&id, "w1", "boom").unwrap();
        assert_eq!(item.status, QueueStatus::PermanentlyFailed);
        assert_eq!(item.retry_count, 2);

        assert!(queue.claim("w1").unwrap().is_none());
        assert_eq!(queue.reclaim_expired().unwrap(), 0);
    }

    #[test]
    fn test_claim_reclaims_lapsed_lease() {
        let (queue, clock) = queue(3);
        queue.enqueue_unique(target("a"), PRIORITY_DEMAND).unwrap();
        let first = queue.claim("w1").unwrap().unwrap();
        assert!(queue.claim("w2").unwrap().is_none());

        clock.advance_secs(31);
        let again = queue.claim("w2").unwrap().unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.claimed_by.as_deref(), Some("w2"));
        assert_eq!(again.retry_count, 1);

        assert!(matches!(
            queue.fail(&first.id, "w1", "late"),
            Err(crate::Error::LeaseLost { .. })
        ));
        assert!(queue.claim("w3").unwrap().is_none());
        assert_eq!(queue.complete(&first.id, "w2").unwrap().status, QueueStatus::Completed);
    }
}
