//! Curriculum source: the ordered skills of each grade and subject.

use crate::config::CurriculumConfig;
use crate::models::Subject;
use std::collections::BTreeMap;

/// Ordered skills per `(grade, subject)`.
pub trait Curriculum: Send + Sync {
    /// Skills of `subject` at `grade`, in teaching order. Empty when unknown.
    fn skills(&self, grade: &str, subject: Subject) -> Vec<String>;

    /// Up to `count` skills that follow `skill_id`.
    ///
    /// An unknown `skill_id` yields the first `count` skills.
    fn next_skills(&self, grade: &str, subject: Subject, skill_id: &str, count: usize) -> Vec<String> {
        let skills = self.skills(grade, subject);
        let start = skills
            .iter()
            .position(|s| s == skill_id)
            .map_or(0, |i| i + 1);
        skills.into_iter().skip(start).take(count).collect()
    }

    /// First skill of `subject` at `grade`.
    fn first_skill(&self, grade: &str, subject: Subject) -> Option<String> {
        self.skills(grade, subject).into_iter().next()
    }
}

/// A curriculum held in memory, usually loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticCurriculum {
    grades: BTreeMap<String, BTreeMap<Subject, Vec<String>>>,
}

impl StaticCurriculum {
    /// Creates an empty curriculum.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the curriculum from the `[curriculum]` section.
    #[must_use]
    pub fn from_config(config: &CurriculumConfig) -> Self {
        Self {
            grades: config.grades.clone(),
        }
    }

    /// Sets the skills of one grade and subject.
    #[must_use]
    pub fn with_skills<I, S>(mut self, grade: &str, subject: Subject, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.grades
            .entry(grade.to_string())
            .or_default()
            .insert(subject, skills.into_iter().map(Into::into).collect());
        self
    }

    /// Grades that have any skills.
    pub fn grades(&self) -> impl Iterator<Item = &str> {
        self.grades.keys().map(String::as_str)
    }
}

impl Curriculum for StaticCurriculum {
    fn skills(&self, grade: &str, subject: Subject) -> Vec<String> {
        self.grades
            .get(grade.trim())
            .and_then(|subjects| subjects.get(&subject))
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_grade_three() {
        let curriculum = StaticCurriculum::from_config(&CurriculumConfig::default());
        assert_eq!(
            curriculum.first_skill("3", Subject::Math).as_deref(),
            Some("3.OA.1")
        );
        assert!(curriculum.skills("9", Subject::Math).is_empty());
    }

    #[test]
    fn test_next_skills() {
        let curriculum =
            StaticCurriculum::new().with_skills("4", Subject::Science, ["a", "b", "c", "d"]);
        assert_eq!(curriculum.next_skills("4", Subject::Science, "b", 5), vec!["c", "d"]);
        assert_eq!(curriculum.next_skills("4", Subject::Science, "zzz", 2), vec!["a", "b"]);
        assert!(curriculum.next_skills("4", Subject::Science, "d", 3).is_empty());
    }
}
