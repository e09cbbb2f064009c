//! In-memory queue store.

use crate::models::{GenerationTarget, QueueItem, QueueStats};
use crate::storage::sqlite::acquire_lock;
use crate::storage::traits::QueueStore;
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct QueueState {
    /// Item plus its insertion sequence, which breaks ties between equal
    /// priorities and timestamps.
    items: HashMap<String, (u64, QueueItem)>,
    next_seq: u64,
}

/// Queue store held behind a single mutex.
///
/// Every operation runs under the lock, so a claim is a plain status check and
/// write with no race between workers.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    state: Mutex<QueueState>,
}

impl MemoryQueueStore {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_item<F>(&self, id: &str, f: F) -> Result<QueueItem>
    where
        F: FnOnce(&mut QueueItem) -> Result<()>,
    {
        let mut state = acquire_lock(&self.state);
        let Some((_, item)) = state.items.get_mut(id) else {
            return Err(Error::not_found("queue item", id));
        };
        f(item)?;
        Ok(item.clone())
    }
}

impl QueueStore for MemoryQueueStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn enqueue(&self, item: QueueItem) -> Result<QueueItem> {
        let mut state = acquire_lock(&self.state);
        if state.items.contains_key(&item.id) {
            return Err(Error::Conflict {
                key: item.id,
                expected: 0,
                actual: 1,
            });
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.items.insert(item.id.clone(), (seq, item.clone()));
        Ok(item)
    }

    fn claim_next(
        &self,
        worker_id: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueItem>> {
        let mut state = acquire_lock(&self.state);
        let candidate = state
            .items
            .values_mut()
            .filter(|(_, item)| item.status.is_claimable())
            .max_by_key(|(seq, item)| (item.priority, Reverse(item.created_at), Reverse(*seq)));

        Ok(candidate.map(|(_, item)| {
            item.mark_claimed(worker_id, lease, now);
            item.clone()
        }))
    }

    fn complete(&self, id: &str, worker_id: &str, now: DateTime<Utc>) -> Result<QueueItem> {
        self.with_item(id, |item| item.mark_completed(worker_id, now))
    }

    fn fail(
        &self,
        id: &str,
        worker_id: &str,
        error: &str,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<QueueItem> {
        self.with_item(id, |item| item.mark_failed(worker_id, error, max_retries, now))
    }

    fn reclaim_expired(&self, max_retries: u32, now: DateTime<Utc>) -> Result<usize> {
        let mut state = acquire_lock(&self.state);
        let mut reclaimed = 0;
        for (_, item) in state.items.values_mut() {
            if item.lease_expired(now) {
                item.mark_lease_lapsed(max_retries, now);
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    fn get(&self, id: &str) -> Result<Option<QueueItem>> {
        Ok(acquire_lock(&self.state)
            .items
            .get(id)
            .map(|(_, item)| item.clone()))
    }

    fn stats(&self) -> Result<QueueStats> {
        let state = acquire_lock(&self.state);
        let mut stats = QueueStats::default();
        for (_, item) in state.items.values() {
            stats.record(item.status);
        }
        Ok(stats)
    }

    fn find_open(&self, target: &GenerationTarget) -> Result<Option<QueueItem>> {
        let state = acquire_lock(&self.state);
        Ok(state
            .items
            .values()
            .filter(|(_, item)| !item.status.is_terminal() && item.target == *target)
            .min_by_key(|(seq, _)| *seq)
            .map(|(_, item)| item.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContainerType, PRIORITY_DEMAND, PRIORITY_WARMING, QueueStatus, Subject};

    fn now() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::days(19_000)
    }

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

    #[test]
    fn test_claim_prefers_priority_then_age() {
        let store = MemoryQueueStore::new();
        let low = store
            .enqueue(QueueItem::new(target("a"), PRIORITY_WARMING, now()))
            .unwrap();
        let first = store
            .enqueue(QueueItem::new(target("b"), PRIORITY_DEMAND, now()))
            .unwrap();
        let second = store
            .enqueue(QueueItem::new(target("c"), PRIORITY_DEMAND, now()))
            .unwrap();

        let lease = Duration::seconds(60);
        let ids: Vec<String> = (0..3)
            .map(|_| store.claim_next("w", lease, now()).unwrap().unwrap().id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id, low.id]);
        assert!(store.claim_next("w", lease, now()).unwrap().is_none());
    }

    #[test]
    fn test_claimed_item_is_not_claimed_twice() {
        let store = MemoryQueueStore::new();
        store
            .enqueue(QueueItem::new(target("a"), PRIORITY_DEMAND, now()))
            .unwrap();
        let claimed = store
            .claim_next("w1", Duration::seconds(60), now())
            .unwrap()
            .unwrap();
        assert_eq!(claimed.status, QueueStatus::Processing);
        assert_eq!(claimed.claimed_by.as_deref(), Some("w1"));
        assert!(
            store
                .claim_next("w2", Duration::seconds(60), now())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_reclaim_expired_makes_item_claimable() {
        let store = MemoryQueueStore::new();
        let item = store
            .enqueue(QueueItem::new(target("a"), PRIORITY_DEMAND, now()))
            .unwrap();
        store
            .claim_next("w1", Duration::seconds(10), now())
            .unwrap()
            .unwrap();

        assert_eq!(
            store.reclaim_expired(3, now() + Duration::seconds(5)).unwrap(),
            0
        );
        assert_eq!(
            store.reclaim_expired(3, now() + Duration::seconds(11)).unwrap(),
            1
        );
        assert_eq!(
            store.get(&item.id).unwrap().unwrap().status,
            QueueStatus::Failed
        );

        let again = store
            .claim_next("w2", Duration::seconds(10), now() + Duration::seconds(12))
            .unwrap()
            .unwrap();
        assert_eq!(again.id, item.id);
        assert_eq!(again.claimed_by.as_deref(), Some("w2"));
    }

    #[test]
    fn test_find_open_ignores_terminal_items() {
        let store = MemoryQueueStore::new();
        let item = store
            .enqueue(QueueItem::new(target("a"), PRIORITY_DEMAND, now()))
            .unwrap();
        assert!(store.find_open(&target("a")).unwrap().is_some());
        assert!(store.find_open(&target("b")).unwrap().is_none());

        store
            .claim_next("w1", Duration::seconds(60), now())
            .unwrap()
            .unwrap();
        store.complete(&item.id, "w1", now()).unwrap();
        assert!(store.find_open(&target("a")).unwrap().is_none());
        assert_eq!(store.stats().unwrap().completed, 1);
    }

    #[test]
    fn test_unknown_item_is_not_found() {
        let store = MemoryQueueStore::new();
        assert!(matches!(
            store.complete("missing", "w1", now()),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_stale_worker_cannot_release_a_reclaimed_item() {
        let store = MemoryQueueStore::new();
        let item = store
            .enqueue(QueueItem::new(target("a"), PRIORITY_DEMAND, now()))
            .unwrap();
        let lease = Duration::seconds(30);
        store.claim_next("w1", lease, now()).unwrap().unwrap();
        let later = now() + Duration::seconds(31);
        store.reclaim_expired(3, later).unwrap();
        store.claim_next("w2", lease, later).unwrap().unwrap();

        assert!(matches!(
            store.fail(&item.id, "w1", "late failure", 3, later),
            Err(Error::LeaseLost { .. })
        ));
        assert!(matches!(
            store.complete(&item.id, "w1", later),
            Err(Error::LeaseLost { .. })
        ));
        let held = store.get(&item.id).unwrap().unwrap();
        assert_eq!(held.status, QueueStatus::Processing);
        assert_eq!(held.claimed_by.as_deref(), Some("w2"));
        assert_eq!(held.retry_count, 1);
        assert!(store.claim_next("w3", lease, later).unwrap().is_none());
    }

    #[test]
    fn test_repeated_lease_lapses_exhaust_retries() {
        let store = MemoryQueueStore::new();
        let item = store
            .enqueue(QueueItem::new(target("a"), PRIORITY_DEMAND, now()))
            .unwrap();
        let lease = Duration::seconds(10);
        let mut at = now();
        for _ in 0..3 {
            store.claim_next("w", lease, at).unwrap().unwrap();
            at += Duration::seconds(11);
            assert_eq!(store.reclaim_expired(2, at).unwrap(), 1);
        }
        let item = store.get(&item.id).unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::PermanentlyFailed);
        assert_eq!(item.retry_count, 3);
        assert!(store.claim_next("w", lease, at).unwrap().is_none());
    }
}
