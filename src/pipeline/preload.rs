//! Predictive preloading and cache warming.
//!
//! Both only enqueue work; the worker does the generating. Targets that are
//! already cached or already open in the queue are skipped.

use super::cache::{CacheKey, TransportCache};
use super::curriculum::Curriculum;
use super::queue::{Enqueued, GenerationQueue};
use crate::Result;
use crate::config::WarmingConfig;
use crate::models::{ContainerType, GenerationTarget, PRIORITY_PRELOAD, PRIORITY_WARMING, Subject};
use crate::storage::sqlite::acquire_lock;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::instrument;

/// What a navigation from one container preloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreloadRule {
    /// Container that was completed.
    pub trigger: ContainerType,
    /// Container to pre-generate.
    pub preload: ContainerType,
    /// Upcoming skills to pre-generate it for.
    pub count: usize,
}

/// The preload rule table, one rule per trigger.
pub const PRELOAD_RULES: [PreloadRule; 3] = [
    PreloadRule {
        trigger: ContainerType::Learn,
        preload: ContainerType::Experience,
        count: 2,
    },
    PreloadRule {
        trigger: ContainerType::Experience,
        preload: ContainerType::Discover,
        count: 2,
    },
    PreloadRule {
        trigger: ContainerType::Discover,
        preload: ContainerType::Learn,
        count: 3,
    },
];

/// The rule triggered by completing `container`.
#[must_use]
pub const fn rule_for(container: ContainerType) -> PreloadRule {
    PRELOAD_RULES[container.position()]
}

/// Items enqueued and targets skipped by one preload or warming pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreloadReport {
    /// Ids of newly enqueued items.
    pub enqueued: Vec<String>,
    /// Targets already cached or already queued.
    pub skipped: usize,
}

impl PreloadReport {
    fn absorb(&mut self, outcome: Option<Enqueued>) {
        match outcome {
            Some(Enqueued::New(item)) => self.enqueued.push(item.id),
            Some(Enqueued::Existing(_)) | None => self.skipped += 1,
        }
    }
}

fn enqueue_if_absent(
    queue: &GenerationQueue,
    cache: &TransportCache,
    target: GenerationTarget,
    priority: i32,
) -> Result<Option<Enqueued>> {
    if cache.contains(&CacheKey::from(&target)) {
        return Ok(None);
    }
    queue.enqueue_unique(target, priority).map(Some)
}

/// Enqueues upcoming content when a student navigates past a container.
///
/// Every navigation is also tallied per `(trigger, preload)` pair so rule
/// tuning can read observed transition frequencies without a metrics
/// recorder.
pub struct PredictivePreloader {
    queue: Arc<GenerationQueue>,
    cache: Arc<TransportCache>,
    curriculum: Arc<dyn Curriculum>,
    transitions: Mutex<BTreeMap<(ContainerType, ContainerType), u64>>,
}

impl PredictivePreloader {
    /// Creates a preloader.
    #[must_use]
    pub fn new(
        queue: Arc<GenerationQueue>,
        cache: Arc<TransportCache>,
        curriculum: Arc<dyn Curriculum>,
    ) -> Self {
        Self {
            queue,
            cache,
            curriculum,
            transitions: Mutex::new(BTreeMap::new()),
        }
    }

    /// Navigations seen from `from` that preloaded `to`.
    #[must_use]
    pub fn transition_count(&self, from: ContainerType, to: ContainerType) -> u64 {
        acquire_lock(&self.transitions)
            .get(&(from, to))
            .copied()
            .unwrap_or(0)
    }

    /// Applies the rule for `completed.container`: the next skills after
    /// `completed.skill_id` are enqueued for the rule's container at preload
    /// priority.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue fails.
    #[instrument(skip(self, completed), fields(target = %completed))]
    pub fn on_navigation(&self, completed: &GenerationTarget) -> Result<PreloadReport> {
        let rule = rule_for(completed.container);
        *acquire_lock(&self.transitions)
            .entry((rule.trigger, rule.preload))
            .or_insert(0) += 1;
        metrics::counter!(
            "preload_transitions_total",
            "from" => rule.trigger.as_str(),
            "to" => rule.preload.as_str()
        )
        .increment(1);

        let mut report = PreloadReport::default();
        for skill in self.curriculum.next_skills(
            &completed.grade_level,
            completed.subject,
            &completed.skill_id,
            rule.count,
        ) {
            let target = completed.retarget(skill, rule.preload);
            report.absorb(enqueue_if_absent(
                &self.queue,
                &self.cache,
                target,
                PRIORITY_PRELOAD,
            )?);
        }
        tracing::debug!(
            enqueued = report.enqueued.len(),
            skipped = report.skipped,
            "preload pass finished"
        );
        Ok(report)
    }
}

/// Enqueues a random sample of skills at session start.
pub struct CacheWarmer {
    queue: Arc<GenerationQueue>,
    cache: Arc<TransportCache>,
    curriculum: Arc<dyn Curriculum>,
    config: WarmingConfig,
    question_type: String,
    rng: Mutex<StdRng>,
}

impl CacheWarmer {
    /// Creates a warmer. A configured seed makes samples reproducible.
    #[must_use]
    pub fn new(
        queue: Arc<GenerationQueue>,
        cache: Arc<TransportCache>,
        curriculum: Arc<dyn Curriculum>,
        config: WarmingConfig,
        question_type: impl Into<String>,
    ) -> Self {
        let rng = config
            .seed
            .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
        Self {
            queue,
            cache,
            curriculum,
            config,
            question_type: question_type.into(),
            rng: Mutex::new(rng),
        }
    }

    /// True when warming is enabled.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Enqueues up to `sample_size` skills per subject at warming priority.
    ///
    /// Configured subjects win over `session_subjects`. Does nothing when
    /// warming is disabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue fails.
    #[instrument(skip(self, session_subjects))]
    pub fn warm(
        &self,
        student_id: &str,
        grade_level: &str,
        session_subjects: &[Subject],
    ) -> Result<PreloadReport> {
        let mut report = PreloadReport::default();
        if !self.config.enabled || self.config.sample_size == 0 {
            return Ok(report);
        }
        let subjects = if self.config.subjects.is_empty() {
            session_subjects
        } else {
            &self.config.subjects
        };

        for subject in subjects {
            let skills = self.curriculum.skills(grade_level, *subject);
            let sample: Vec<String> = {
                let mut rng = acquire_lock(&self.rng);
                skills
                    .choose_multiple(&mut *rng, self.config.sample_size)
                    .cloned()
                    .collect()
            };
            for skill in sample {
                let target = GenerationTarget::new(
                    student_id,
                    grade_level,
                    *subject,
                    skill,
                    self.config.container,
                    self.question_type.clone(),
                );
                report.absorb(enqueue_if_absent(
                    &self.queue,
                    &self.cache,
                    target,
                    PRIORITY_WARMING,
                )?);
            }
        }
        metrics::counter!("cache_warming_items_total").increment(report.enqueued.len() as u64);
        tracing::info!(
            enqueued = report.enqueued.len(),
            skipped = report.skipped,
            "cache warming queued"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;
    use crate::config::QueueConfig;
    use crate::models::QueueStatus;
    use crate::pipeline::StaticCurriculum;
    use crate::storage::MemoryQueueStore;
    use chrono::Duration;
    use serde_json::json;

    struct Fixture {
        queue: Arc<GenerationQueue>,
        cache: Arc<TransportCache>,
        curriculum: Arc<dyn Curriculum>,
    }

    fn fixture() -> Fixture {
        let clock: Arc<ManualClock> = Arc::new(ManualClock::default());
        Fixture {
            queue: Arc::new(GenerationQueue::new(
                Arc::new(MemoryQueueStore::new()),
                clock.clone(),
                QueueConfig::default(),
            )),
            cache: Arc::new(TransportCache::new(16, Duration::hours(1), clock)),
            curriculum: Arc::new(
                StaticCurriculum::new()
                    .with_skills("3", Subject::Math, ["m1", "m2", "m3", "m4", "m5"])
                    .with_skills("3", Subject::Ela, ["e1", "e2"]),
            ),
        }
    }

    fn completed(skill: &str, container: ContainerType) -> GenerationTarget {
        GenerationTarget::new("stu", "3", Subject::Math, skill, container, "multiple_choice")
    }

    #[test]
    fn test_rule_table() {
        assert_eq!(rule_for(ContainerType::Learn).preload, ContainerType::Experience);
        assert_eq!(rule_for(ContainerType::Learn).count, 2);
        assert_eq!(rule_for(ContainerType::Experience).preload, ContainerType::Discover);
        assert_eq!(rule_for(ContainerType::Discover).count, 3);
    }

    #[test]
    fn test_navigation_enqueues_next_skills() {
        let f = fixture();
        let preloader =
            PredictivePreloader::new(Arc::clone(&f.queue), Arc::clone(&f.cache), f.curriculum);
        let report = preloader
            .on_navigation(&completed("m1", ContainerType::Discover))
            .unwrap();
        assert_eq!(report.enqueued.len(), 3);

        let item = f.queue.get(&report.enqueued[0]).unwrap().unwrap();
        assert_eq!(item.priority, PRIORITY_PRELOAD);
        assert_eq!(item.target.skill_id, "m2");
        assert_eq!(item.target.container, ContainerType::Learn);
        assert_eq!(item.status, QueueStatus::Pending);
    }

    #[test]
    fn test_navigation_tallies_transitions() {
        let f = fixture();
        let preloader = PredictivePreloader::new(f.queue, f.cache, f.curriculum);
        for container in [ContainerType::Learn, ContainerType::Learn, ContainerType::Experience] {
            preloader.on_navigation(&completed("m1", container)).unwrap();
        }
        assert_eq!(
            preloader.transition_count(ContainerType::Learn, ContainerType::Experience),
            2
        );
        assert_eq!(
            preloader.transition_count(ContainerType::Discover, ContainerType::Learn),
            0
        );
        assert_eq!(
            preloader.transition_count(ContainerType::Experience, ContainerType::Discover),
            1
        );
    }

    #[test]
    fn test_navigation_skips_cached_and_queued() {
        let f = fixture();
        f.cache.set(
            CacheKey::from(&completed("m2", ContainerType::Experience)),
            json!({}),
        );
        let preloader =
            PredictivePreloader::new(Arc::clone(&f.queue), Arc::clone(&f.cache), f.curriculum);
        let report = preloader
            .on_navigation(&completed("m1", ContainerType::Learn))
            .unwrap();
        assert_eq!(report.enqueued.len(), 1);
        assert_eq!(report.skipped, 1);

        let again = preloader
            .on_navigation(&completed("m1", ContainerType::Learn))
            .unwrap();
        assert!(again.enqueued.is_empty());
        assert_eq!(again.skipped, 2);
    }

    #[test]
    fn test_warming_is_bounded_and_low_priority() {
        let f = fixture();
        let config = WarmingConfig {
            sample_size: 3,
            seed: Some(7),
            ..WarmingConfig::default()
        };
        let warmer = CacheWarmer::new(
            Arc::clone(&f.queue),
            f.cache,
            f.curriculum,
            config,
            "multiple_choice",
        );
        let report = warmer
            .warm("stu", "3", &[Subject::Math, Subject::Ela])
            .unwrap();
        // 3 of 5 math skills, both ela skills
        assert_eq!(report.enqueued.len(), 5);
        for id in &report.enqueued {
            assert_eq!(f.queue.get(id).unwrap().unwrap().priority, PRIORITY_WARMING);
        }
        assert_eq!(warmer.warm("stu", "3", &[Subject::Ela]).unwrap().skipped, 2);
    }

    #[test]
    fn test_warming_disabled() {
        let f = fixture();
        let config = WarmingConfig {
            enabled: false,
            ..WarmingConfig::default()
        };
        let warmer = CacheWarmer::new(f.queue, f.cache, f.curriculum, config, "mc");
        assert_eq!(warmer.warm("stu", "3", &[Subject::Math]).unwrap(), PreloadReport::default());
    }
}
