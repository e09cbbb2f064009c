//! Curriculum planning.
//!
//! When a session is planned it gets one story context and one content unit per
//! container and subject. Unit templates are filled with the grade, subject,
//! skill, story and baseline adaptation bindings; adaptation later overwrites the
//! `adapt_*` bindings only.

use crate::clock::Clock;
use crate::models::{
    AdaptationStrategy, ContainerType, ContentUnit, GenerationTarget, PromptTemplate, Session,
    StoryContext, Subject, UnitKey,
};
use crate::pipeline::Curriculum;
use crate::storage::RubricRepository;
use crate::{Error, Result};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::instrument;

/// Narrative chosen explicitly for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorySeed {
    /// Guide character.
    pub persona: String,
    /// Career framing.
    pub career: String,
    /// Theme.
    pub theme: String,
    /// Setting.
    pub setting: String,
}

const STORY_PRESETS: [(&str, &str, &str, &str); 6] = [
    ("Captain Nova", "astronaut", "space exploration", "an orbital research station"),
    ("Dr. Reef", "marine biologist", "ocean life", "a coral reef field lab"),
    ("Chef Basil", "chef", "community cooking", "a busy neighborhood kitchen"),
    ("Ranger Sky", "park ranger", "wildlife protection", "a national park"),
    ("Engineer Volt", "civil engineer", "building a smart city", "a city construction site"),
    ("Curator Quill", "museum curator", "history mysteries", "a natural history museum"),
];

const SYSTEM_TEXT: &str = "You write {{container_label}} material for a grade {{grade_level}} \
{{subject}} student working on skill {{skill_id}}.\n\
Story: {{story_persona}}, a {{story_career}}, guides the student through {{story_theme}} in \
{{story_setting}}. Keep every item inside this story.\n\
Adaptation: complexity {{adapt_scenario_complexity}}, vocabulary {{adapt_vocabulary_level}}, \
concept density {{adapt_concept_density}}, support {{adapt_support_level}}, hints \
{{adapt_hint_availability}}, feedback {{adapt_feedback_frequency}}, tone \
{{adapt_encouragement_tone}}, focus {{adapt_skill_application_focus}}, time limit \
{{adapt_time_limit}}, suggest breaks: {{adapt_break_suggestions}}.";

const LEARN_USER: &str = "Teach {{skill_id}} with a short explanation, then exactly three practice \
questions of type {{question_type}} and one assessment question. Suggest \
{{adapt_practice_quantity}} follow-up practice rounds in the explanation.";

const EXPERIENCE_USER: &str = "Show three worked story scenarios applying {{skill_id}}, two practice \
scenarios for the student, and one assessment scenario of type {{question_type}}.";

const DISCOVER_USER: &str = "Create one unifying story scenario around {{skill_id}} and four discovery \
stations that each explore it with a {{question_type}} question.";

/// Creates story contexts and content units.
pub struct RubricPlanner {
    repository: Arc<RubricRepository>,
    curriculum: Arc<dyn Curriculum>,
    clock: Arc<dyn Clock>,
    question_type: String,
}

impl RubricPlanner {
    /// Creates a planner.
    #[must_use]
    pub fn new(
        repository: Arc<RubricRepository>,
        curriculum: Arc<dyn Curriculum>,
        clock: Arc<dyn Clock>,
        question_type: impl Into<String>,
    ) -> Self {
        Self {
            repository,
            curriculum,
            clock,
            question_type: question_type.into(),
        }
    }

    /// The curriculum skills are drawn from.
    #[must_use]
    pub fn curriculum(&self) -> &Arc<dyn Curriculum> {
        &self.curriculum
    }

    /// Writes the story context and the units of `session`.
    ///
    /// Planning is idempotent: an existing story is kept and existing units
    /// are left untouched, so re-planning a reactivated session keeps its
    /// generated content.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when a subject has no skills for the
    /// session's grade, or any storage error other than a create conflict.
    #[instrument(skip(self, session, seed), fields(session_id = %session.session_id))]
    pub fn plan(&self, session: &Session, seed: Option<&StorySeed>) -> Result<StoryContext> {
        let story = self.ensure_story(&session.session_id, seed)?;
        let now = self.clock.now();
        let mut created = 0usize;
        for subject in &session.subjects {
            let skill = self
                .curriculum
                .first_skill(&session.grade_level, *subject)
                .ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "no curriculum skills for grade {} {subject}",
                        session.grade_level
                    ))
                })?;
            for container in ContainerType::SEQUENCE {
                let key = UnitKey::new(&session.session_id, container, *subject);
                let template = self.template(container, *subject, &session.grade_level, &skill, &story);
                match self.repository.put_unit(&ContentUnit::new(key, template, now)) {
                    Ok(_) => created += 1,
                    Err(Error::Conflict { .. }) => {},
                    Err(e) => return Err(e),
                }
            }
        }
        tracing::info!(units_created = created, "session planned");
        Ok(story)
    }

    /// Template used by the pre-generation worker for a queue target.
    ///
    /// Targets are not tied to a session, so the story comes from the preset
    /// picked for the student.
    #[must_use]
    pub fn target_template(&self, target: &GenerationTarget) -> PromptTemplate {
        let story = preset_story(&target.student_id, self.clock.now());
        self.template(
            target.container,
            target.subject,
            &target.grade_level,
            &target.skill_id,
            &story,
        )
        .with_binding("question_type", target.question_type.clone())
    }

    fn ensure_story(&self, session_id: &str, seed: Option<&StorySeed>) -> Result<StoryContext> {
        if let Some(existing) = self.repository.get_story(session_id)? {
            return Ok(existing);
        }
        let now = self.clock.now();
        let story = seed.map_or_else(
            || preset_story(session_id, now),
            |seed| StoryContext {
                session_id: session_id.to_string(),
                persona: seed.persona.clone(),
                career: seed.career.clone(),
                theme: seed.theme.clone(),
                setting: seed.setting.clone(),
                created_at: now,
            },
        );
        match self.repository.put_story(&story) {
            Ok(()) => Ok(story),
            // a concurrent planner won; theirs is the story
            Err(Error::Conflict { .. }) => self
                .repository
                .get_story(session_id)?
                .ok_or_else(|| Error::not_found("story", session_id)),
            Err(e) => Err(e),
        }
    }

    fn template(
        &self,
        container: ContainerType,
        subject: Subject,
        grade: &str,
        skill: &str,
        story: &StoryContext,
    ) -> PromptTemplate {
        let user = match container {
            ContainerType::Learn => LEARN_USER,
            ContainerType::Experience => EXPERIENCE_USER,
            ContainerType::Discover => DISCOVER_USER,
        };
        let mut template = PromptTemplate::new(SYSTEM_TEXT, user)
            .with_binding("container_label", container_label(container))
            .with_binding("grade_level", grade)
            .with_binding("subject", subject_label(subject))
            .with_binding("skill_id", skill)
            .with_binding("question_type", self.question_type.clone());
        template.merge_bindings(story.bindings());
        template.merge_bindings(AdaptationStrategy::baseline().to_bindings());
        template
    }
}

/// Picks a story preset from a stable hash of `id`.
fn preset_story(id: &str, now: chrono::DateTime<chrono::Utc>) -> StoryContext {
    let digest = Sha256::digest(id.as_bytes());
    let index = usize::from(digest[0]) % STORY_PRESETS.len();
    let (persona, career, theme, setting) = STORY_PRESETS[index];
    StoryContext {
        session_id: id.to_string(),
        persona: persona.to_string(),
        career: career.to_string(),
        theme: theme.to_string(),
        setting: setting.to_string(),
        created_at: now,
    }
}

const fn container_label(container: ContainerType) -> &'static str {
    match container {
        ContainerType::Learn => "instructional",
        ContainerType::Experience => "applied scenario",
        ContainerType::Discover => "open exploration",
    }
}

const fn subject_label(subject: Subject) -> &'static str {
    match subject {
        Subject::Math => "math",
        Subject::Ela => "English language arts",
        Subject::Science => "science",
        Subject::SocialStudies => "social studies",
    }
}
