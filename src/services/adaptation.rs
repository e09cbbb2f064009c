//! Adaptation strategy engine.
//!
//! Turns the performance recorded on completed units into generation
//! parameters for the next unit. The classifiers are free functions over
//! [`AdaptationThresholds`]; the engine only loads units and writes bindings.

use crate::clock::Clock;
use crate::models::{
    AdaptationStrategy, ConceptDensity, ContainerType, Consistency, ContentUnit,
    EncouragementTone, FeedbackFrequency, HintAvailability, PerformanceProfile,
    PerformanceRecord, ScenarioComplexity, SkillApplicationFocus, Subject, SupportLevel, UnitKey,
    Velocity, VocabularyLevel,
};
use crate::storage::RubricRepository;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::instrument;

/// Where completion-time adaptation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdaptationDispatch {
    /// Before `record_completion` returns.
    Inline,
    /// On a spawned thread.
    #[default]
    Detached,
}

impl AdaptationDispatch {
    /// Parses a dispatch name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" | "sync" => Some(Self::Inline),
            "detached" | "background" | "async" => Some(Self::Detached),
            _ => None,
        }
    }

    /// Canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Detached => "detached",
        }
    }
}

/// Every threshold the classifiers use.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptationThresholds {
    /// Minimum score of the mastery band (with a single attempt).
    pub mastery_score: f64,
    /// Minimum score of the proficient band.
    pub proficient_score: f64,
    /// Minimum score of the developing band.
    pub developing_score: f64,
    /// Attempts at which support is raised one step.
    pub high_attempts: u32,
    /// Average seconds per unit below which a student may be fast.
    pub fast_time_secs: u64,
    /// Average score above which a quick student is fast.
    pub fast_score: f64,
    /// Average seconds per unit above which a student is slow.
    pub slow_time_secs: u64,
    /// Most recent scores considered for consistency.
    pub consistency_window: usize,
    /// Variance at or below which scores are consistent.
    pub consistent_variance: f64,
    /// Time limit for the mastery band.
    pub mastery_time_limit_secs: u64,
    /// Added to the time limit of slow students.
    pub slow_time_extension_secs: u64,
}

impl Default for AdaptationThresholds {
    fn default() -> Self {
        Self {
            mastery_score: 90.0,
            proficient_score: 75.0,
            developing_score: 60.0,
            high_attempts: 3,
            fast_time_secs: 300,
            fast_score: 85.0,
            slow_time_secs: 900,
            consistency_window: 3,
            consistent_variance: 25.0,
            mastery_time_limit_secs: 600,
            slow_time_extension_secs: 300,
        }
    }
}

impl AdaptationThresholds {
    /// Checks that score bands are ordered and within 0..=100.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] describing the first inconsistency.
    pub fn validate(&self) -> Result<()> {
        let bands = [
            ("developing_score", self.developing_score),
            ("proficient_score", self.proficient_score),
            ("mastery_score", self.mastery_score),
        ];
        if let Some((name, _)) = bands.iter().find(|(_, v)| !(0.0..=100.0).contains(v)) {
            return Err(Error::InvalidInput(format!("{name} must be within 0..=100")));
        }
        if self.developing_score > self.proficient_score
            || self.proficient_score > self.mastery_score
        {
            return Err(Error::InvalidInput(
                "score bands must satisfy developing <= proficient <= mastery".to_string(),
            ));
        }
        if self.fast_time_secs > self.slow_time_secs {
            return Err(Error::InvalidInput(
                "fast_time_secs must not exceed slow_time_secs".to_string(),
            ));
        }
        Ok(())
    }
}

/// Score band of a single completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceBand {
    /// High score on the first attempt.
    Mastery,
    /// At or above the proficient score.
    Proficient,
    /// At or above the developing score.
    Developing,
    /// Below the developing score.
    Struggling,
}

impl PerformanceBand {
    /// Lower-case label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mastery => "mastery",
            Self::Proficient => "proficient",
            Self::Developing => "developing",
            Self::Struggling => "struggling",
        }
    }
}

impl fmt::Display for PerformanceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies one completion.
///
/// Mastery additionally requires a single attempt; a high score reached after
/// retries is proficient.
#[must_use]
pub fn classify_band(score: f64, attempts: u32, t: &AdaptationThresholds) -> PerformanceBand {
    if score >= t.mastery_score && attempts <= 1 {
        PerformanceBand::Mastery
    } else if score >= t.proficient_score {
        PerformanceBand::Proficient
    } else if score >= t.developing_score {
        PerformanceBand::Developing
    } else {
        PerformanceBand::Struggling
    }
}

/// Classifies pace from the average time per unit and the average score.
#[must_use]
pub fn classify_velocity(avg_time_secs: f64, avg_score: f64, t: &AdaptationThresholds) -> Velocity {
    #[allow(clippy::cast_precision_loss)]
    let (fast, slow) = (t.fast_time_secs as f64, t.slow_time_secs as f64);
    if avg_time_secs < fast && avg_score > t.fast_score {
        Velocity::Fast
    } else if avg_time_secs > slow {
        Velocity::Slow
    } else {
        Velocity::Moderate
    }
}

/// Classifies the trend of the most recent scores, given in completion order.
#[must_use]
pub fn classify_consistency(scores: &[f64], t: &AdaptationThresholds) -> Consistency {
    let window = t.consistency_window.max(2);
    let recent = &scores[scores.len().saturating_sub(window)..];
    if recent.len() < 2 {
        return Consistency::Consistent;
    }
    if recent.windows(2).all(|w| w[1] > w[0]) {
        return Consistency::Improving;
    }
    if recent.windows(2).all(|w| w[1] < w[0]) {
        return Consistency::Declining;
    }
    if variance(recent) <= t.consistent_variance {
        Consistency::Consistent
    } else {
        Consistency::Variable
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[allow(clippy::cast_precision_loss)]
fn variance(values: &[f64]) -> f64 {
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len().max(1) as f64
}

/// Builds a profile from completed units.
///
/// Units without a performance record are ignored. Scores are ordered by
/// completion time before classifying consistency.
#[must_use]
pub fn profile_from_units(
    session_id: &str,
    units: &[ContentUnit],
    t: &AdaptationThresholds,
) -> PerformanceProfile {
    let mut completed: Vec<(Subject, &PerformanceRecord)> = units
        .iter()
        .filter(|u| u.completed)
        .filter_map(|u| u.performance.as_ref().map(|p| (u.key.subject, p)))
        .collect();
    completed.sort_by_key(|(_, p)| p.completed_at);

    let scores: Vec<f64> = completed.iter().map(|(_, p)| p.score).collect();
    let total_time_secs: u64 = completed.iter().map(|(_, p)| p.time_spent_secs).sum();
    let total_attempts: u32 = completed.iter().map(|(_, p)| p.attempts).sum();

    let mut by_subject: BTreeMap<Subject, Vec<f64>> = BTreeMap::new();
    for (subject, record) in &completed {
        by_subject.entry(*subject).or_default().push(record.score);
    }
    let subject_averages: BTreeMap<Subject, f64> = by_subject
        .iter()
        .map(|(subject, scores)| (*subject, mean(scores)))
        .collect();

    let overall_average = mean(&scores);
    #[allow(clippy::cast_precision_loss)]
    let avg_time = if completed.is_empty() {
        0.0
    } else {
        total_time_secs as f64 / completed.len() as f64
    };
    let velocity = if completed.is_empty() {
        Velocity::Moderate
    } else {
        classify_velocity(avg_time, overall_average, t)
    };

    PerformanceProfile {
        session_id: session_id.to_string(),
        overall_average,
        strengths: subject_averages
            .iter()
            .filter(|(_, avg)| **avg >= t.proficient_score)
            .map(|(s, _)| *s)
            .collect(),
        challenges: subject_averages
            .iter()
            .filter(|(_, avg)| **avg < t.developing_score)
            .map(|(s, _)| *s)
            .collect(),
        subject_averages,
        containers_completed: completed.len(),
        total_time_secs,
        total_attempts,
        velocity,
        consistency: classify_consistency(&scores, t),
    }
}

/// Maps the latest completion and the profile through the strategy rule table.
#[must_use]
pub fn derive_strategy(
    latest: &PerformanceRecord,
    profile: Option<&PerformanceProfile>,
    target_container: ContainerType,
    subject: Subject,
    t: &AdaptationThresholds,
) -> AdaptationStrategy {
    let band = classify_band(latest.score, latest.attempts, t);
    let mut strategy = AdaptationStrategy::baseline();
    match band {
        PerformanceBand::Mastery => {
            strategy.scenario_complexity = ScenarioComplexity::Advanced;
            strategy.vocabulary_level = VocabularyLevel::Enriched;
            strategy.concept_density = ConceptDensity::High;
            strategy.support_level = SupportLevel::Minimal;
            strategy.hint_availability = HintAvailability::OnRequest;
            strategy.feedback_frequency = FeedbackFrequency::Summary;
            strategy.encouragement_tone = EncouragementTone::Challenging;
            strategy.skill_application_focus = SkillApplicationFocus::Transfer;
            strategy.practice_quantity = AdaptationStrategy::BASELINE_PRACTICE + 2;
            strategy.time_limit_secs = Some(t.mastery_time_limit_secs);
            strategy.break_suggestions = false;
        },
        PerformanceBand::Proficient => {},
        PerformanceBand::Developing => {
            strategy.scenario_complexity = ScenarioComplexity::Developing;
            strategy.support_level = SupportLevel::Elevated;
            strategy.practice_quantity = AdaptationStrategy::BASELINE_PRACTICE + 1;
        },
        PerformanceBand::Struggling => {
            strategy.scenario_complexity = ScenarioComplexity::Foundational;
            strategy.vocabulary_level = VocabularyLevel::Simplified;
            strategy.concept_density = ConceptDensity::Low;
            strategy.support_level = SupportLevel::Intensive;
            strategy.hint_availability = HintAvailability::Always;
            strategy.feedback_frequency = FeedbackFrequency::Immediate;
            strategy.encouragement_tone = EncouragementTone::Encouraging;
            strategy.skill_application_focus = SkillApplicationFocus::Guided;
            strategy.practice_quantity = AdaptationStrategy::BASELINE_PRACTICE.saturating_sub(1).max(1);
            strategy.time_limit_secs = None;
            strategy.break_suggestions = true;
        },
    }

    let mut modifiers = Vec::new();
    if latest.attempts >= t.high_attempts {
        strategy.support_level = strategy.support_level.raised();
        modifiers.push(format!("{} attempts raised support", latest.attempts));
    }
    if let Some(profile) = profile {
        if profile.velocity == Velocity::Slow
            && let Some(limit) = strategy.time_limit_secs.as_mut()
        {
            *limit += t.slow_time_extension_secs;
            modifiers.push("slow pace relaxed the time limit".to_string());
        }
        if profile.consistency == Consistency::Declining {
            strategy.encouragement_tone = EncouragementTone::Encouraging;
            modifiers.push("declining scores switched to an encouraging tone".to_string());
        }
    }

    strategy.reasoning = format!(
        "{band} band for {target_container}/{subject}: score {:.1} in {} attempt{}; modifiers: {}",
        latest.score,
        latest.attempts,
        if latest.attempts == 1 { "" } else { "s" },
        if modifiers.is_empty() {
            "none".to_string()
        } else {
            modifiers.join(", ")
        }
    );
    strategy
}

/// Loads performance and writes adaptation bindings onto units.
pub struct AdaptationEngine {
    repository: Arc<RubricRepository>,
    thresholds: AdaptationThresholds,
    clock: Arc<dyn Clock>,
}

impl AdaptationEngine {
    /// Creates an engine.
    #[must_use]
    pub fn new(
        repository: Arc<RubricRepository>,
        thresholds: AdaptationThresholds,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            thresholds,
            clock,
        }
    }

    /// The thresholds in use.
    #[must_use]
    pub const fn thresholds(&self) -> &AdaptationThresholds {
        &self.thresholds
    }

    /// Aggregates every completed unit of a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the units cannot be loaded.
    #[instrument(skip(self))]
    pub fn build_performance_profile(&self, session_id: &str) -> Result<PerformanceProfile> {
        let units = self.repository.list_units(session_id)?;
        Ok(profile_from_units(session_id, &units, &self.thresholds))
    }

    /// Chooses the strategy for `target_container` of `subject`.
    ///
    /// # Errors
    ///
    /// Returns an error if the profile cannot be built.
    #[instrument(skip(self, latest), fields(score = latest.score, attempts = latest.attempts))]
    pub fn generate_adaptation_strategy(
        &self,
        session_id: &str,
        latest: &PerformanceRecord,
        target_container: ContainerType,
        subject: Subject,
    ) -> Result<AdaptationStrategy> {
        let profile = self.build_performance_profile(session_id)?;
        let strategy =
            derive_strategy(latest, Some(&profile), target_container, subject, &self.thresholds);
        tracing::debug!(reasoning = %strategy.reasoning, "adaptation strategy chosen");
        Ok(strategy)
    }

    /// Merges the strategy's `adapt_*` bindings into the target unit.
    ///
    /// Nothing is generated here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the unit does not exist, or the last
    /// conflict when compare-and-swap attempts run out.
    #[instrument(skip(self, strategy))]
    pub fn apply_adaptation_to_rubric(
        &self,
        session_id: &str,
        target_container: ContainerType,
        subject: Subject,
        strategy: &AdaptationStrategy,
    ) -> Result<ContentUnit> {
        let key = UnitKey::new(session_id, target_container, subject);
        let now = self.clock.now();
        let (unit, ()) = self.repository.mutate_unit(&key, |unit| {
            unit.template.merge_bindings(strategy.to_bindings());
            unit.updated_at = now;
            Ok(())
        })?;
        metrics::counter!(
            "adaptation_applied_total",
            "container" => target_container.as_str()
        )
        .increment(1);
        Ok(unit)
    }

    /// Plans the unit after `completed`: profile, strategy, bindings.
    ///
    /// Returns `None` when `completed` is the last container.
    ///
    /// # Errors
    ///
    /// Returns the first error of any step.
    pub fn plan_next(
        &self,
        completed: &UnitKey,
        latest: &PerformanceRecord,
    ) -> Result<Option<AdaptationStrategy>> {
        let Some(next) = completed.next() else {
            return Ok(None);
        };
        let strategy = self.generate_adaptation_strategy(
            &next.session_id,
            latest,
            next.container,
            next.subject,
        )?;
        self.apply_adaptation_to_rubric(&next.session_id, next.container, next.subject, &strategy)?;
        Ok(Some(strategy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use test_case::test_case;

    fn t() -> AdaptationThresholds {
        AdaptationThresholds::default()
    }

    fn record(score: f64, attempts: u32) -> PerformanceRecord {
        PerformanceRecord {
            score,
            attempts,
            time_spent_secs: 420,
            struggled_items: vec![],
            completed_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    #[test_case(95.0, 1 => PerformanceBand::Mastery ; "high score first try")]
    #[test_case(95.0, 2 => PerformanceBand::Proficient ; "high score after retry")]
    #[test_case(75.0, 1 => PerformanceBand::Proficient ; "proficient boundary")]
    #[test_case(74.9, 1 => PerformanceBand::Developing ; "just below proficient")]
    #[test_case(60.0, 3 => PerformanceBand::Developing ; "developing boundary")]
    #[test_case(40.0, 4 => PerformanceBand::Struggling ; "struggling")]
    fn test_classify_band(score: f64, attempts: u32) -> PerformanceBand {
        classify_band(score, attempts, &t())
    }

    #[test_case(120.0, 92.0 => Velocity::Fast ; "quick and accurate")]
    #[test_case(120.0, 70.0 => Velocity::Moderate ; "quick but inaccurate")]
    #[test_case(1200.0, 95.0 => Velocity::Slow ; "slow")]
    #[test_case(600.0, 80.0 => Velocity::Moderate ; "expected pace")]
    fn test_classify_velocity(avg_time: f64, avg_score: f64) -> Velocity {
        classify_velocity(avg_time, avg_score, &t())
    }

    #[test_case(&[] => Consistency::Consistent ; "no scores")]
    #[test_case(&[50.0] => Consistency::Consistent ; "one score")]
    #[test_case(&[60.0, 70.0, 80.0] => Consistency::Improving ; "rising")]
    #[test_case(&[90.0, 80.0, 70.0] => Consistency::Declining ; "falling")]
    #[test_case(&[80.0, 82.0, 80.0] => Consistency::Consistent ; "flat")]
    #[test_case(&[40.0, 95.0, 60.0] => Consistency::Variable ; "noisy")]
    #[test_case(&[95.0, 20.0, 60.0, 70.0, 80.0] => Consistency::Improving ; "only the window counts")]
    fn test_classify_consistency(scores: &[f64]) -> Consistency {
        classify_consistency(scores, &t())
    }

    #[test]
    fn test_mastery_is_harder_than_baseline() {
        let strategy = derive_strategy(
            &record(95.0, 1),
            None,
            ContainerType::Experience,
            Subject::Math,
            &t(),
        );
        let baseline = AdaptationStrategy::baseline();
        assert!(strategy.scenario_complexity > baseline.scenario_complexity);
        assert!(strategy.support_level < baseline.support_level);
        assert_eq!(strategy.practice_quantity, baseline.practice_quantity + 2);
        assert!(strategy.time_limit_secs < baseline.time_limit_secs);
        assert!(!strategy.break_suggestions);
        assert!(strategy.reasoning.starts_with("mastery band"));
    }

    #[test]
    fn test_struggling_with_many_attempts() {
        let strategy = derive_strategy(
            &record(40.0, 4),
            None,
            ContainerType::Experience,
            Subject::Math,
            &t(),
        );
        let baseline = AdaptationStrategy::baseline();
        assert!(strategy.scenario_complexity < baseline.scenario_complexity);
        assert!(strategy.support_level > baseline.support_level);
        assert!(strategy.break_suggestions);
        assert_eq!(strategy.time_limit_secs, None);
        assert_eq!(strategy.practice_quantity, 2);
        assert!(strategy.reasoning.contains("4 attempts raised support"));
    }

    #[test]
    fn test_high_attempts_raise_developing_support() {
        let strategy =
            derive_strategy(&record(65.0, 3), None, ContainerType::Discover, Subject::Ela, &t());
        assert_eq!(strategy.support_level, SupportLevel::Intensive);
    }

    #[test]
    fn test_profile_modifiers() {
        let profile = PerformanceProfile {
            session_id: "s".to_string(),
            overall_average: 80.0,
            subject_averages: BTreeMap::new(),
            containers_completed: 3,
            total_time_secs: 3600,
            total_attempts: 3,
            velocity: Velocity::Slow,
            consistency: Consistency::Declining,
            strengths: vec![],
            challenges: vec![],
        };
        let strategy = derive_strategy(
            &record(80.0, 1),
            Some(&profile),
            ContainerType::Experience,
            Subject::Science,
            &t(),
        );
        assert_eq!(
            strategy.time_limit_secs,
            Some(AdaptationStrategy::BASELINE_TIME_LIMIT_SECS + 300)
        );
        assert_eq!(strategy.encouragement_tone, EncouragementTone::Encouraging);
        assert!(strategy.reasoning.contains("slow pace"));

        let untimed = derive_strategy(
            &record(40.0, 1),
            Some(&profile),
            ContainerType::Experience,
            Subject::Science,
            &t(),
        );
        assert_eq!(untimed.time_limit_secs, None);
        assert!(!untimed.reasoning.contains("slow pace"));
        assert!(untimed.reasoning.contains("declining scores"));
    }

    #[test]
    fn test_profile_from_units() {
        use crate::models::PromptTemplate;
        let start = DateTime::<Utc>::UNIX_EPOCH + Duration::days(1);
        let mut units = Vec::new();
        for (i, (subject, score)) in [(Subject::Math, 95.0), (Subject::Ela, 45.0), (Subject::Math, 85.0)]
            .into_iter()
            .enumerate()
        {
            let container = ContainerType::SEQUENCE[i / 2];
            let mut unit = ContentUnit::new(
                UnitKey::new("s1", container, subject),
                PromptTemplate::default(),
                start,
            );
            unit.completed = true;
            unit.performance = Some(PerformanceRecord {
                completed_at: start + Duration::minutes(i64::try_from(i).unwrap()),
                ..record(score, 1)
            });
            units.push(unit);
        }
        units.push(ContentUnit::new(
            UnitKey::new("s1", ContainerType::Discover, Subject::Math),
            PromptTemplate::default(),
            start,
        ));

        let profile = profile_from_units("s1", &units, &t());
        assert_eq!(profile.containers_completed, 3);
        assert_eq!(profile.total_attempts, 3);
        assert_eq!(profile.total_time_secs, 1260);
        assert!((profile.subject_averages[&Subject::Math] - 90.0).abs() < 1e-9);
        assert_eq!(profile.strengths, vec![Subject::Math]);
        assert_eq!(profile.challenges, vec![Subject::Ela]);
        assert_eq!(profile.consistency, Consistency::Variable);
        assert_eq!(profile.velocity, Velocity::Moderate);
    }

    #[test]
    fn test_thresholds_validate() {
        assert!(t().validate().is_ok());
        let inverted = AdaptationThresholds {
            proficient_score: 95.0,
            ..t()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_dispatch_parse() {
        assert_eq!(AdaptationDispatch::parse("Inline"), Some(AdaptationDispatch::Inline));
        assert_eq!(AdaptationDispatch::parse("background"), Some(AdaptationDispatch::Detached));
        assert_eq!(AdaptationDispatch::parse("later"), None);
    }
}
