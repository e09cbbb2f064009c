//! Pre-generation pipeline.
//!
//! - [`GenerationQueue`]: priority queue of generation targets with leases
//! - [`Worker`]: claims items, synthesizes, caches
//! - [`TransportCache`]: TTL cache the consumer reads from
//! - [`PredictivePreloader`] and [`CacheWarmer`]: enqueue upcoming content
//! - [`Curriculum`]: ordered skills per grade and subject
//!
//! [`ContentPipeline::get_or_enqueue`] is the consumer entry point. It never
//! waits for generation.

mod cache;
mod curriculum;
mod preload;
mod queue;
mod worker;

pub use cache::{CacheKey, CacheRecord, CacheStats, TransportCache};
pub use curriculum::{Curriculum, StaticCurriculum};
pub use preload::{CacheWarmer, PRELOAD_RULES, PredictivePreloader, PreloadReport, PreloadRule, rule_for};
pub use queue::{Enqueued, GenerationQueue};
pub use worker::{TickOutcome, Worker, WorkerDeps, WorkerReport, run_pool};

use crate::Result;
use crate::models::{ContainerType, GenerationTarget, PRIORITY_DEMAND, Subject};
use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;

/// Answer of [`ContentPipeline::get_or_enqueue`].
#[derive(Debug, Clone, PartialEq)]
pub enum ContentStatus {
    /// Cached content.
    Ready(Value),
    /// Not cached yet; generation is queued.
    Pending {
        /// Queue item that will produce the content.
        item_id: String,
    },
}

/// Consumer read path over the cache and the queue.
pub struct ContentPipeline {
    queue: Arc<GenerationQueue>,
    cache: Arc<TransportCache>,
}

impl ContentPipeline {
    /// Creates the read path.
    #[must_use]
    pub const fn new(queue: Arc<GenerationQueue>, cache: Arc<TransportCache>) -> Self {
        Self { queue, cache }
    }

    /// Returns cached content, or enqueues it at demand priority.
    ///
    /// An open item for the same target is reused rather than duplicated.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue fails.
    #[instrument(skip(self), fields(subject = %subject, container = %container))]
    pub fn get_or_enqueue(
        &self,
        student_id: &str,
        grade_level: &str,
        subject: Subject,
        skill_id: &str,
        container: ContainerType,
        question_type: &str,
    ) -> Result<ContentStatus> {
        let target = GenerationTarget::new(
            student_id,
            grade_level,
            subject,
            skill_id,
            container,
            question_type,
        );
        self.get_or_enqueue_target(target)
    }

    /// [`Self::get_or_enqueue`] for a prepared target.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue fails.
    pub fn get_or_enqueue_target(&self, target: GenerationTarget) -> Result<ContentStatus> {
        if let Some(payload) = self.cache.get(&CacheKey::from(&target)) {
            return Ok(ContentStatus::Ready(payload));
        }
        let enqueued = self.queue.enqueue_unique(target, PRIORITY_DEMAND)?;
        Ok(ContentStatus::Pending {
            item_id: enqueued.item().id.clone(),
        })
    }

    /// The cache read from.
    #[must_use]
    pub const fn cache(&self) -> &Arc<TransportCache> {
        &self.cache
    }

    /// The queue written to.
    #[must_use]
    pub const fn queue(&self) -> &Arc<GenerationQueue> {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;
    use crate::config::QueueConfig;
    use crate::storage::MemoryQueueStore;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_get_or_enqueue() {
        let clock = Arc::new(ManualClock::default());
        let queue = Arc::new(GenerationQueue::new(
            Arc::new(MemoryQueueStore::new()),
            clock.clone(),
            QueueConfig::default(),
        ));
        let cache = Arc::new(TransportCache::new(8, Duration::minutes(5), clock));
        let pipeline = ContentPipeline::new(Arc::clone(&queue), Arc::clone(&cache));

        let fetch = || {
            pipeline
                .get_or_enqueue("stu", "3", Subject::Ela, "RL.3.1", ContainerType::Learn, "mc")
                .unwrap()
        };
        let ContentStatus::Pending { item_id } = fetch() else {
            panic!("expected pending");
        };
        assert_eq!(fetch(), ContentStatus::Pending { item_id: item_id.clone() });
        assert_eq!(queue.get(&item_id).unwrap().unwrap().priority, PRIORITY_DEMAND);

        let target = queue.get(&item_id).unwrap().unwrap().target;
        cache.set(CacheKey::from(&target), json!({"ok": true}));
        assert_eq!(fetch(), ContentStatus::Ready(json!({"ok": true})));
    }
}
