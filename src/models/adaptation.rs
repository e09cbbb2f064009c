//! Performance profiles and adaptation strategies.

use super::Subject;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

macro_rules! labelled_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident => $label:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Label used in template bindings.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $label),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

labelled_enum! {
    /// How demanding scenarios are. Ordered from easiest to hardest.
    ScenarioComplexity {
        /// Single-step, concrete scenarios.
        Foundational => "foundational",
        /// Slightly below grade level.
        Developing => "developing",
        /// Grade level.
        Standard => "standard",
        /// Multi-step scenarios above grade level.
        Advanced => "advanced",
    }
}

labelled_enum! {
    /// Vocabulary register. Ordered from simplest.
    VocabularyLevel {
        /// Short words, defined terms.
        Simplified => "simplified",
        /// Grade-appropriate vocabulary.
        GradeLevel => "grade_level",
        /// Domain vocabulary beyond grade level.
        Enriched => "enriched",
    }
}

labelled_enum! {
    /// How many new ideas each item introduces. Ordered from lowest.
    ConceptDensity {
        /// One idea per item.
        Low => "low",
        /// Typical density.
        Medium => "medium",
        /// Several linked ideas per item.
        High => "high",
    }
}

labelled_enum! {
    /// Scaffolding around each item. Ordered from least support.
    SupportLevel {
        /// Student works independently.
        Minimal => "minimal",
        /// Typical scaffolding.
        Moderate => "moderate",
        /// Worked steps available.
        Elevated => "elevated",
        /// Step-by-step guidance throughout.
        Intensive => "intensive",
    }
}

impl SupportLevel {
    /// One step more support, saturating at [`SupportLevel::Intensive`].
    #[must_use]
    pub const fn raised(self) -> Self {
        match self {
            Self::Minimal => Self::Moderate,
            Self::Moderate => Self::Elevated,
            Self::Elevated | Self::Intensive => Self::Intensive,
        }
    }
}

labelled_enum! {
    /// When hints are offered. Ordered from least available.
    HintAvailability {
        /// Only when the student asks.
        OnRequest => "on_request",
        /// Offered after a wrong answer.
        Proactive => "proactive",
        /// Shown with every item.
        Always => "always",
    }
}

labelled_enum! {
    /// How often feedback is given. Ordered from least frequent.
    FeedbackFrequency {
        /// Once at the end.
        Summary => "summary",
        /// After each group of items.
        Periodic => "periodic",
        /// After every answer.
        Immediate => "immediate",
    }
}

labelled_enum! {
    /// Voice of the companion persona.
    EncouragementTone {
        /// Pushes the student further.
        Challenging => "challenging",
        /// Matter-of-fact.
        Neutral => "neutral",
        /// Warm and reassuring.
        Encouraging => "encouraging",
    }
}

labelled_enum! {
    /// What the practice emphasizes. Ordered from most guided.
    SkillApplicationFocus {
        /// Guided practice of the procedure.
        Guided => "guided",
        /// Independent practice of the procedure.
        Practice => "practice",
        /// Applying the skill in context.
        Applied => "applied",
        /// Transferring the skill to unfamiliar contexts.
        Transfer => "transfer",
    }
}

labelled_enum! {
    /// How quickly the student moves through units.
    Velocity {
        /// Well above the expected time per unit.
        Slow => "slow",
        /// Expected pace.
        Moderate => "moderate",
        /// Quick and accurate.
        Fast => "fast",
    }
}

labelled_enum! {
    /// Shape of the recent score trend.
    Consistency {
        /// Scores stay close together.
        Consistent => "consistent",
        /// Scores move without a clear direction.
        Variable => "variable",
        /// Scores rise monotonically.
        Improving => "improving",
        /// Scores fall monotonically.
        Declining => "declining",
    }
}

/// Aggregated performance over all completed units of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceProfile {
    /// Session the profile was built from.
    pub session_id: String,
    /// Mean score over every completed unit (0 when none).
    pub overall_average: f64,
    /// Mean score per subject.
    pub subject_averages: BTreeMap<Subject, f64>,
    /// Number of completed units.
    pub containers_completed: usize,
    /// Sum of time spent.
    pub total_time_secs: u64,
    /// Sum of attempts.
    pub total_attempts: u32,
    /// Pace classification.
    pub velocity: Velocity,
    /// Trend classification.
    pub consistency: Consistency,
    /// Subjects at or above the proficient band.
    pub strengths: Vec<Subject>,
    /// Subjects below the developing band.
    pub challenges: Vec<Subject>,
}

/// Generation parameters for the next unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationStrategy {
    /// Scenario difficulty.
    pub scenario_complexity: ScenarioComplexity,
    /// Vocabulary register.
    pub vocabulary_level: VocabularyLevel,
    /// Ideas per item.
    pub concept_density: ConceptDensity,
    /// Scaffolding.
    pub support_level: SupportLevel,
    /// Hint policy.
    pub hint_availability: HintAvailability,
    /// Feedback cadence.
    pub feedback_frequency: FeedbackFrequency,
    /// Companion voice.
    pub encouragement_tone: EncouragementTone,
    /// Practice emphasis.
    pub skill_application_focus: SkillApplicationFocus,
    /// Number of practice items requested in addition to the fixed structure.
    pub practice_quantity: u32,
    /// Time limit for the unit; `None` means untimed.
    pub time_limit_secs: Option<u64>,
    /// Whether the unit should suggest breaks.
    pub break_suggestions: bool,
    /// Explanation of how the strategy was chosen.
    pub reasoning: String,
}

impl AdaptationStrategy {
    /// Default practice quantity.
    pub const BASELINE_PRACTICE: u32 = 3;
    /// Default time limit.
    pub const BASELINE_TIME_LIMIT_SECS: u64 = 900;

    /// The strategy every unit is planned with before any performance is known.
    #[must_use]
    pub fn baseline() -> Self {
        Self {
            scenario_complexity: ScenarioComplexity::Standard,
            vocabulary_level: VocabularyLevel::GradeLevel,
            concept_density: ConceptDensity::Medium,
            support_level: SupportLevel::Moderate,
            hint_availability: HintAvailability::Proactive,
            feedback_frequency: FeedbackFrequency::Periodic,
            encouragement_tone: EncouragementTone::Neutral,
            skill_application_focus: SkillApplicationFocus::Applied,
            practice_quantity: Self::BASELINE_PRACTICE,
            time_limit_secs: Some(Self::BASELINE_TIME_LIMIT_SECS),
            break_suggestions: false,
            reasoning: "baseline strategy: no prior performance".to_string(),
        }
    }

    /// Template bindings for this strategy, prefixed `adapt_`.
    #[must_use]
    pub fn to_bindings(&self) -> Vec<(&'static str, String)> {
        vec![
            (
                "adapt_scenario_complexity",
                self.scenario_complexity.to_string(),
            ),
            ("adapt_vocabulary_level", self.vocabulary_level.to_string()),
            ("adapt_concept_density", self.concept_density.to_string()),
            ("adapt_support_level", self.support_level.to_string()),
            ("adapt_hint_availability", self.hint_availability.to_string()),
            (
                "adapt_feedback_frequency",
                self.feedback_frequency.to_string(),
            ),
            (
                "adapt_encouragement_tone",
                self.encouragement_tone.to_string(),
            ),
            (
                "adapt_skill_application_focus",
                self.skill_application_focus.to_string(),
            ),
            ("adapt_practice_quantity", self.practice_quantity.to_string()),
            (
                "adapt_time_limit",
                self.time_limit_secs
                    .map_or_else(|| "untimed".to_string(), |secs| format!("{secs} seconds")),
            ),
            (
                "adapt_break_suggestions",
                if self.break_suggestions { "yes" } else { "no" }.to_string(),
            ),
            ("adapt_reasoning", self.reasoning.clone()),
        ]
    }
}

impl Default for AdaptationStrategy {
    fn default() -> Self {
        Self::baseline()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_ordered() {
        assert!(ScenarioComplexity::Advanced > ScenarioComplexity::Standard);
        assert!(SupportLevel::Intensive > SupportLevel::Moderate);
        assert!(HintAvailability::Always > HintAvailability::OnRequest);
    }

    #[test]
    fn test_support_raised_saturates() {
        assert_eq!(SupportLevel::Minimal.raised(), SupportLevel::Moderate);
        assert_eq!(SupportLevel::Intensive.raised(), SupportLevel::Intensive);
    }

    #[test]
    fn test_baseline_bindings_cover_every_dimension() {
        let bindings = AdaptationStrategy::baseline().to_bindings();
        assert_eq!(bindings.len(), 12);
        assert!(
            bindings
                .iter()
                .any(|(k, v)| *k == "adapt_time_limit" && v == "900 seconds")
        );
    }
}
