//! Content units ("rubrics").

use super::{ContainerType, PromptTemplate, Subject};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a content unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitKey {
    /// Owning session.
    pub session_id: String,
    /// Phase the unit belongs to.
    pub container: ContainerType,
    /// Subject the unit teaches.
    pub subject: Subject,
}

impl UnitKey {
    /// Creates a unit key.
    pub fn new(session_id: impl Into<String>, container: ContainerType, subject: Subject) -> Self {
        Self {
            session_id: session_id.into(),
            container,
            subject,
        }
    }

    /// Key of the unit for the next container of the same subject.
    #[must_use]
    pub fn next(&self) -> Option<Self> {
        self.container
            .next()
            .map(|container| Self::new(self.session_id.clone(), container, self.subject))
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.session_id, self.container, self.subject)
    }
}

/// The current generated payload of a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedContent {
    /// Parsed structured payload.
    pub payload: serde_json::Value,
    /// SHA-256 of the rendered prompt that produced the payload.
    pub prompt_fingerprint: String,
    /// Provider that produced the payload.
    pub provider: String,
    /// When the payload was generated.
    pub generated_at: DateTime<Utc>,
}

/// Outcome of structural validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    /// True when no errors were found.
    pub valid: bool,
    /// Every structural violation.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ValidationOutcome {
    /// Builds an outcome from a list of errors.
    #[must_use]
    pub const fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// How the student did on a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    /// Score from 0 to 100.
    pub score: f64,
    /// Number of attempts taken.
    pub attempts: u32,
    /// Seconds spent in the phase.
    pub time_spent_secs: u64,
    /// Items the student struggled with.
    #[serde(default)]
    pub struggled_items: Vec<String>,
    /// When the phase was completed.
    pub completed_at: DateTime<Utc>,
}

/// A content unit: the template that controls one `(session, container, subject)`
/// content instance plus what was generated for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentUnit {
    /// Identity.
    pub key: UnitKey,
    /// Prompt template and bindings.
    pub template: PromptTemplate,
    /// Current payload, if generated.
    #[serde(default)]
    pub content: Option<GeneratedContent>,
    /// Validation outcome of the current payload.
    #[serde(default)]
    pub validation: ValidationOutcome,
    /// Performance recorded on completion.
    #[serde(default)]
    pub performance: Option<PerformanceRecord>,
    /// True once completion has been recorded.
    #[serde(default)]
    pub completed: bool,
    /// When the unit was planned.
    pub created_at: DateTime<Utc>,
    /// Last mutation.
    pub updated_at: DateTime<Utc>,
    /// Store revision this copy was read at. Not serialized into the body.
    #[serde(skip)]
    pub revision: u64,
}

impl ContentUnit {
    /// Creates an ungenerated unit.
    #[must_use]
    pub fn new(key: UnitKey, template: PromptTemplate, now: DateTime<Utc>) -> Self {
        Self {
            key,
            template,
            content: None,
            validation: ValidationOutcome::default(),
            performance: None,
            completed: false,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    /// Returns the memoized payload, if any.
    #[must_use]
    pub fn current_payload(&self) -> Option<&serde_json::Value> {
        self.content.as_ref().map(|c| &c.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_key_next() {
        let key = UnitKey::new("s1", ContainerType::Learn, Subject::Math);
        let next = key.next().unwrap();
        assert_eq!(next.container, ContainerType::Experience);
        assert_eq!(next.subject, Subject::Math);
        assert!(
            UnitKey::new("s1", ContainerType::Discover, Subject::Math)
                .next()
                .is_none()
        );
    }

    #[test]
    fn test_validation_outcome_from_errors() {
        assert!(ValidationOutcome::from_errors(vec![]).valid);
        assert!(!ValidationOutcome::from_errors(vec!["x".to_string()]).valid);
    }
}
