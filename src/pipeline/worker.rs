//! Pre-generation worker.
//!
//! A worker claims the highest-priority item, synthesizes its content, caches
//! it and completes the item. Content with validation errors is never cached;
//! it counts as a failed attempt like a generation failure. Several workers can
//! share one queue because claiming is a compare-and-set on the item status.

use super::cache::{CacheKey, TransportCache};
use super::queue::GenerationQueue;
use crate::models::{QueueItem, QueueStatus};
use crate::services::{ContentSynthesisService, RubricPlanner};
use crate::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::instrument;

/// What a worker needs, shared by every worker of a pool.
#[derive(Clone)]
pub struct WorkerDeps {
    /// Queue to claim from.
    pub queue: Arc<GenerationQueue>,
    /// Cache to write into.
    pub cache: Arc<TransportCache>,
    /// Generation and validation.
    pub synthesis: Arc<ContentSynthesisService>,
    /// Builds prompts for queue targets.
    pub planner: Arc<RubricPlanner>,
    /// Sleep between polls of an empty queue.
    pub poll_interval: Duration,
}

/// Result of one [`Worker::tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing was claimable.
    Idle,
    /// The item's content was cached and the item completed.
    Completed {
        /// Item id.
        item_id: String,
    },
    /// The lease lapsed before the outcome was reported; the item's state was
    /// left to whoever holds it now.
    LeaseLost {
        /// Item id.
        item_id: String,
    },
    /// The attempt failed and was recorded on the item.
    Failed {
        /// Item id.
        item_id: String,
        /// True when the item will not be retried.
        permanently: bool,
        /// Why the attempt failed.
        error: String,
    },
}

/// Totals of a worker run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Items completed.
    pub completed: usize,
    /// Failed attempts, permanent ones included.
    pub failed: usize,
    /// Items that reached `permanently_failed`.
    pub permanently_failed: usize,
    /// Results dropped because the lease had lapsed.
    pub lease_lost: usize,
    /// Ticks that hit a storage error.
    pub errors: usize,
}

impl WorkerReport {
    fn record(&mut self, outcome: &TickOutcome) {
        match outcome {
            TickOutcome::Idle => {},
            TickOutcome::Completed { .. } => self.completed += 1,
            TickOutcome::LeaseLost { .. } => self.lease_lost += 1,
            TickOutcome::Failed { permanently, .. } => {
                self.failed += 1;
                if *permanently {
                    self.permanently_failed += 1;
                }
            },
        }
    }

    fn merge(&mut self, other: Self) {
        self.completed += other.completed;
        self.failed += other.failed;
        self.permanently_failed += other.permanently_failed;
        self.lease_lost += other.lease_lost;
        self.errors += other.errors;
    }
}

/// One cooperative worker.
pub struct Worker {
    id: String,
    deps: WorkerDeps,
}

impl Worker {
    /// Creates a worker with id `id`.
    pub fn new(id: impl Into<String>, deps: WorkerDeps) -> Self {
        Self {
            id: id.into(),
            deps,
        }
    }

    /// Worker id recorded on claimed items.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Processes at most one item.
    ///
    /// # Errors
    ///
    /// Returns an error only when the queue itself fails; generation and
    /// validation failures are recorded on the item.
    #[instrument(skip(self), fields(worker_id = %self.id))]
    pub fn tick(&self) -> Result<TickOutcome> {
        let Some(item) = self.deps.queue.claim(&self.id)? else {
            return Ok(TickOutcome::Idle);
        };
        tracing::debug!(item_id = %item.id, target = %item.target, "claimed item");

        match self.generate(&item) {
            Ok(payload) => {
                self.deps.cache.set(CacheKey::from(&item.target), payload);
                match self.deps.queue.complete(&item.id, &self.id) {
                    Err(Error::LeaseLost { .. }) => return Ok(self.lease_lost(item.id)),
                    result => result?,
                };
                tracing::info!(item_id = %item.id, "pre-generated content cached");
                Ok(TickOutcome::Completed { item_id: item.id })
            },
            Err(e) => {
                let error = e.to_string();
                let failed = match self.deps.queue.fail(&item.id, &self.id, &error) {
                    Err(Error::LeaseLost { .. }) => return Ok(self.lease_lost(item.id)),
                    result => result?,
                };
                let permanently = failed.status == QueueStatus::PermanentlyFailed;
                tracing::warn!(
                    item_id = %item.id,
                    retry_count = failed.retry_count,
                    permanently,
                    error = %error,
                    "pre-generation attempt failed"
                );
                Ok(TickOutcome::Failed {
                    item_id: item.id,
                    permanently,
                    error,
                })
            },
        }
    }

    fn lease_lost(&self, item_id: String) -> TickOutcome {
        metrics::counter!("queue_items_total", "event" => "lease_lost").increment(1);
        tracing::warn!(
            worker_id = %self.id,
            item_id = %item_id,
            "lease lapsed before the outcome was reported, dropping it"
        );
        TickOutcome::LeaseLost { item_id }
    }

    fn generate(&self, item: &QueueItem) -> Result<serde_json::Value> {
        let template = self.deps.planner.target_template(&item.target);
        let synthesized = self
            .deps
            .synthesis
            .synthesize(&template, item.target.container)?;
        if !synthesized.validation_errors.is_empty() {
            return Err(Error::ValidationFailure {
                errors: synthesized.validation_errors,
            });
        }
        Ok(synthesized.content.payload)
    }

    /// Ticks until the queue has nothing claimable.
    ///
    /// # Errors
    ///
    /// Returns the first queue error.
    pub fn drain(&self) -> Result<WorkerReport> {
        let mut report = WorkerReport::default();
        loop {
            let outcome = self.tick()?;
            if outcome == TickOutcome::Idle {
                return Ok(report);
            }
            report.record(&outcome);
        }
    }

    /// Polls until `stop` is set, sleeping `poll_interval` while idle.
    ///
    /// Queue errors are logged and counted; the loop keeps going.
    pub fn run(&self, stop: &AtomicBool) -> WorkerReport {
        let mut report = WorkerReport::default();
        tracing::info!(worker_id = %self.id, "worker started");
        while !stop.load(Ordering::SeqCst) {
            match self.tick() {
                Ok(TickOutcome::Idle) => std::thread::sleep(self.deps.poll_interval),
                Ok(outcome) => report.record(&outcome),
                Err(e) => {
                    report.errors += 1;
                    metrics::counter!("worker_errors_total", "kind" => e.kind()).increment(1);
                    tracing::error!(worker_id = %self.id, error = %e, "worker tick failed");
                    std::thread::sleep(self.deps.poll_interval);
                },
            }
        }
        tracing::info!(
            worker_id = %self.id,
            completed = report.completed,
            failed = report.failed,
            "worker stopped"
        );
        report
    }
}

/// Runs `workers` threaded workers over the same queue until `stop` is set.
///
/// Worker ids are `{prefix}-{n}`. Returns the combined report once every
/// worker has stopped.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if a worker thread cannot be spawned;
/// workers already running are stopped first.
pub fn run_pool(
    deps: &WorkerDeps,
    workers: usize,
    prefix: &str,
    stop: &Arc<AtomicBool>,
) -> Result<WorkerReport> {
    let mut handles = Vec::with_capacity(workers.max(1));
    for n in 0..workers.max(1) {
        let worker = Worker::new(format!("{prefix}-{n}"), deps.clone());
        let stop_flag = Arc::clone(stop);
        let spawned = std::thread::Builder::new()
            .name(worker.id().to_string())
            .spawn(move || worker.run(&stop_flag));
        match spawned {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                stop.store(true, Ordering::SeqCst);
                join_all(handles);
                return Err(Error::operation("spawn_worker", e));
            },
        }
    }
    Ok(join_all(handles))
}

fn join_all(handles: Vec<std::thread::JoinHandle<WorkerReport>>) -> WorkerReport {
    let mut total = WorkerReport::default();
    for handle in handles {
        match handle.join() {
            Ok(report) => total.merge(report),
            Err(_) => {
                total.errors += 1;
                tracing::error!("worker thread panicked");
            },
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RubricflowConfig;
    use crate::llm::LlmProvider;
    use crate::models::{ContainerType, GenerationTarget, PRIORITY_DEMAND, Subject};
    use crate::services::test_support::{CannedProvider, container_with};
    use crate::services::{AdaptationDispatch, ServiceContainer};
    use crate::storage::{MemoryDocumentStore, MemoryQueueStore};
    use std::sync::OnceLock;

    /// Provider that stalls past the lease; while it stalls, worker "w2"
    /// takes the item over.
    struct StallingProvider {
        reply: String,
        takeover: OnceLock<(Arc<ManualClock>, Arc<GenerationQueue>)>,
    }

    impl LlmProvider for StallingProvider {
        fn name(&self) -> &'static str {
            "stalling"
        }

        fn complete(&self, prompt: &str) -> Result<String> {
            self.complete_with_system("", prompt)
        }

        fn complete_with_system(&self, _system: &str, _user: &str) -> Result<String> {
            if let Some((clock, queue)) = self.takeover.get() {
                clock.advance_secs(121);
                queue.claim("w2")?;
            }
            Ok(self.reply.clone())
        }
    }

    fn stalled_services(reply: &str) -> ServiceContainer {
        let clock = Arc::new(ManualClock::default());
        let provider = Arc::new(StallingProvider {
            reply: reply.to_string(),
            takeover: OnceLock::new(),
        });
        let mut config = RubricflowConfig::default();
        config.queue.lease_secs = 120;
        let services = ServiceContainer::with_parts(
            config,
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemoryQueueStore::new()),
            provider.clone(),
            clock.clone(),
        )
        .unwrap();
        let _ = provider.takeover.set((clock, Arc::clone(services.queue())));
        services
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
    fn test_tick_caches_valid_content() {
        let services = container_with(Arc::new(CannedProvider::valid()), AdaptationDispatch::Inline);
        let deps = services.worker_deps();
        let item = deps
            .queue
            .enqueue_unique(target("3.OA.1"), PRIORITY_DEMAND)
            .unwrap()
            .item()
            .clone();

        let worker = Worker::new("w1", deps.clone());
        assert_eq!(
            worker.tick().unwrap(),
            TickOutcome::Completed {
                item_id: item.id.clone()
            }
        );
        assert!(deps.cache.contains(&CacheKey::from(&item.target)));
        assert_eq!(
            deps.queue.get(&item.id).unwrap().unwrap().status,
            QueueStatus::Completed
        );
        assert_eq!(worker.tick().unwrap(), TickOutcome::Idle);
    }

    #[test]
    fn test_invalid_content_fails_the_item() {
        let provider = Arc::new(CannedProvider::with_response(r#"{"practice": []}"#));
        let services = container_with(provider, AdaptationDispatch::Inline);
        let deps = services.worker_deps();
        deps.queue
            .enqueue_unique(target("3.OA.1"), PRIORITY_DEMAND)
            .unwrap();

        let report = Worker::new("w1", deps.clone()).drain().unwrap();
        let max_retries = deps.queue.max_retries() as usize;
        assert_eq!(report.completed, 0);
        assert_eq!(report.failed, max_retries + 1);
        assert_eq!(report.permanently_failed, 1);
        assert!(!deps.cache.contains(&CacheKey::from(&target("3.OA.1"))));
        assert_eq!(deps.queue.stats().unwrap().permanently_failed, 1);
    }

    #[test]
    fn test_outcome_after_lapsed_lease_is_dropped() {
        let learn = r#"{"explanation": "Equal groups.", "practice": [1, 2, 3],
            "assessment": {"question": "2 x 5?", "type": "multiple_choice"}}"#;
        for reply in [learn, r#"{"practice": []}"#] {
            let services = stalled_services(reply);
            let deps = services.worker_deps();
            let id = deps
                .queue
                .enqueue_unique(target("3.OA.1"), PRIORITY_DEMAND)
                .unwrap()
                .item()
                .id
                .clone();

            let outcome = Worker::new("w1", deps.clone()).tick().unwrap();
            assert_eq!(outcome, TickOutcome::LeaseLost { item_id: id.clone() });

            let item = deps.queue.get(&id).unwrap().unwrap();
            assert_eq!(item.status, QueueStatus::Processing);
            assert_eq!(item.claimed_by.as_deref(), Some("w2"));
            assert_eq!(item.retry_count, 1);
            assert!(deps.queue.claim("w3").unwrap().is_none());
            assert_eq!(
                deps.queue.complete(&id, "w2").unwrap().status,
                QueueStatus::Completed
            );
        }
    }

    #[test]
    fn test_pool_drains_queue_and_stops() {
        let services = container_with(Arc::new(CannedProvider::valid()), AdaptationDispatch::Inline);
        let deps = WorkerDeps {
            poll_interval: Duration::from_millis(5),
            ..services.worker_deps()
        };
        for skill in ["3.OA.1", "3.OA.2", "3.OA.3", "3.NF.1"] {
            deps.queue.enqueue_unique(target(skill), PRIORITY_DEMAND).unwrap();
        }

        let stop = Arc::new(AtomicBool::new(false));
        let watcher = {
            let stop = Arc::clone(&stop);
            let queue = Arc::clone(&deps.queue);
            std::thread::spawn(move || {
                while queue.stats().unwrap().completed < 4 {
                    std::thread::sleep(Duration::from_millis(5));
                }
                stop.store(true, Ordering::SeqCst);
            })
        };
        let report = run_pool(&deps, 3, "test", &stop).unwrap();
        watcher.join().unwrap();
        assert_eq!(report.completed, 4);
        assert_eq!(report.failed, 0);
    }
}
