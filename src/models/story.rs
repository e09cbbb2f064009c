//! Shared narrative constraints for one session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Narrative frame shared by every unit of a session.
///
/// Written once when the session is planned and never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryContext {
    /// Owning session.
    pub session_id: String,
    /// Companion character guiding the student.
    pub persona: String,
    /// Career used to frame scenarios.
    pub career: String,
    /// Overall theme.
    pub theme: String,
    /// Where scenarios take place.
    pub setting: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl StoryContext {
    /// Template bindings derived from the story, prefixed `story_`.
    #[must_use]
    pub fn bindings(&self) -> [(&'static str, String); 4] {
        [
            ("story_persona", self.persona.clone()),
            ("story_career", self.career.clone()),
            ("story_theme", self.theme.clone()),
            ("story_setting", self.setting.clone()),
        ]
    }
}
