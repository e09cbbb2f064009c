//! Learning phases and subjects.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the three sequential learning phases a student moves through per subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerType {
    /// Instruction followed by practice and a single assessment.
    Learn,
    /// Applied scenarios: worked examples, practice scenarios and an assessment scenario.
    Experience,
    /// Open exploration: one unifying scenario explored through discovery stations.
    Discover,
}

impl ContainerType {
    /// Every container in progression order.
    pub const SEQUENCE: [Self; 3] = [Self::Learn, Self::Experience, Self::Discover];

    /// Canonical upper-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Learn => "LEARN",
            Self::Experience => "EXPERIENCE",
            Self::Discover => "DISCOVER",
        }
    }

    /// Parses a container name, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "learn" => Some(Self::Learn),
            "experience" => Some(Self::Experience),
            "discover" => Some(Self::Discover),
            _ => None,
        }
    }

    /// Zero-based position in [`Self::SEQUENCE`].
    #[must_use]
    pub const fn position(self) -> usize {
        match self {
            Self::Learn => 0,
            Self::Experience => 1,
            Self::Discover => 2,
        }
    }

    /// The container that follows this one, `None` after DISCOVER.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Learn => Some(Self::Experience),
            Self::Experience => Some(Self::Discover),
            Self::Discover => None,
        }
    }

    /// Containers that must be complete before this one may start.
    #[must_use]
    pub fn prerequisites(self) -> &'static [Self] {
        &Self::SEQUENCE[..self.position()]
    }
}

impl fmt::Display for ContainerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Curriculum subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    /// Mathematics.
    Math,
    /// English language arts.
    Ela,
    /// Science.
    Science,
    /// Social studies.
    SocialStudies,
}

impl Subject {
    /// All subjects.
    pub const ALL: [Self; 4] = [Self::Math, Self::Ela, Self::Science, Self::SocialStudies];

    /// Canonical snake-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Math => "math",
            Self::Ela => "ela",
            Self::Science => "science",
            Self::SocialStudies => "social_studies",
        }
    }

    /// Parses a subject name, accepting common display spellings.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let normalized: String = s
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(char::is_ascii_alphabetic)
            .collect();
        match normalized.as_str() {
            "math" | "maths" | "mathematics" => Some(Self::Math),
            "ela" | "english" | "englishlanguagearts" | "reading" => Some(Self::Ela),
            "science" => Some(Self::Science),
            "socialstudies" | "social" | "history" => Some(Self::SocialStudies),
            _ => None,
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
