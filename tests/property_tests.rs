//! Property-based tests for progression and caching invariants.
//!
//! Uses proptest to verify invariants across random inputs:
//! - Completed containers always form a prefix of the sequence
//! - Derived state agrees with the recorded progress
//! - Cache reads return the stored payload until the TTL elapses
//! - Queue targets always map to the same cache key

// Property tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use chrono::Duration;
use proptest::prelude::*;
use rubricflow::models::{DeviceType, ProgressState};
use rubricflow::pipeline::{CacheKey, TransportCache};
use rubricflow::{
    Clock, ContainerType, DeviceDescriptor, GenerationTarget, ManualClock, Session, Subject,
};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
enum Step {
    Start(usize, usize),
    Complete(usize, usize, u8),
    Resume(bool),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0..4usize, 0..3usize).prop_map(|(s, c)| Step::Start(s, c)),
        (0..4usize, 0..3usize, 0..=100u8).prop_map(|(s, c, score)| Step::Complete(s, c, score)),
        any::<bool>().prop_map(Step::Resume),
    ]
}

proptest! {
    /// Property: no sequence of starts, completions and resumes breaks the
    /// LEARN -> EXPERIENCE -> DISCOVER prefix.
    #[test]
    fn prop_completed_is_always_a_prefix(steps in prop::collection::vec(step(), 0..60)) {
        let clock = ManualClock::default();
        let mut session = Session::new(
            "prop",
            "student",
            "3",
            Subject::ALL.to_vec(),
            DeviceDescriptor::new("a", DeviceType::Desktop),
            clock.now(),
        );

        for step in steps {
            clock.advance_secs(30);
            let now = clock.now();
            match step {
                Step::Start(s, c) => {
                    let _ = session.start(Subject::ALL[s], ContainerType::SEQUENCE[c], now);
                },
                Step::Complete(s, c, score) => {
                    let _ = session.complete(
                        Subject::ALL[s],
                        ContainerType::SEQUENCE[c],
                        f64::from(score),
                        1,
                        now,
                    );
                },
                Step::Resume(other) => {
                    let id = if other { "b" } else { "a" };
                    session.resume_from(&DeviceDescriptor::new(id, DeviceType::Tablet), now);
                },
            }

            for subject in Subject::ALL {
                let progress = session.progress_for(subject);
                prop_assert!(progress.is_valid_prefix());
                prop_assert_eq!(progress.results.len(), progress.completed.len());
                if let ProgressState::Done(last) = progress.state() {
                    prop_assert_eq!(progress.completed.last().copied(), Some(last));
                }
            }
        }
    }

    /// Property: a cached payload is served through `created_at + ttl` and
    /// misses after it.
    #[test]
    fn prop_cache_serves_until_ttl(ttl_secs in 1..10_000i64, elapsed in 0..20_000i64, n in 0..1000u32) {
        let clock = Arc::new(ManualClock::default());
        let cache = TransportCache::new(4, Duration::seconds(ttl_secs), clock.clone());
        let key = CacheKey::from(&GenerationTarget::new(
            "s", "3", Subject::Math, "3.OA.1", ContainerType::Learn, "mc",
        ));
        cache.set(key.clone(), json!({ "n": n }));
        clock.advance_secs(elapsed);

        let read = cache.get(&key);
        if elapsed <= ttl_secs {
            prop_assert_eq!(read, Some(json!({ "n": n })));
        } else {
            prop_assert_eq!(read, None);
            prop_assert!(cache.is_empty());
        }
    }

    /// Property: equal targets share one cache key and differing skills do not.
    #[test]
    fn prop_cache_key_follows_target(
        student in "[a-z0-9]{1,12}",
        skill in "[A-Z0-9.]{1,8}",
        other in "[A-Z0-9.]{1,8}",
    ) {
        let target = GenerationTarget::new(
            student.as_str(), "3", Subject::Ela, skill.as_str(), ContainerType::Discover, "mc",
        );
        prop_assert_eq!(CacheKey::from(&target), CacheKey::from(&target.clone()));
        let moved = target.retarget(other.as_str(), ContainerType::Discover);
        prop_assert_eq!(CacheKey::from(&moved) == CacheKey::from(&target), other == skill);
    }
}
