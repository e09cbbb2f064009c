//! Session orchestration.
//!
//! Owns the session lifecycle and the per-subject phase state machine. Every
//! mutation is a compare-and-swap read-modify-write on the session document,
//! so concurrent resumes from two devices cannot both miss the switch.

use super::curriculum::{RubricPlanner, StorySeed};
use super::synthesis::{CompletionInput, CompletionReceipt, ContentSynthesisService};
use crate::clock::Clock;
use crate::models::{
    ContainerResult, ContainerType, ContentUnit, DeviceDescriptor, GenerationTarget,
    ResumeOutcome, Session, StoryContext, Subject, UnitKey,
};
use crate::pipeline::{CacheWarmer, PredictivePreloader, PreloadReport};
use crate::storage::{RubricRepository, session_key};
use crate::{Error, Result};
use std::sync::Arc;
use tracing::instrument;

/// Input of [`SessionOrchestrator::create_session`].
#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    /// Session id.
    pub session_id: String,
    /// Student.
    pub user_id: String,
    /// Grade level, e.g. `"3"`.
    pub grade_level: String,
    /// Subjects to plan; empty means the configured defaults.
    pub subjects: Vec<Subject>,
    /// Device the session starts on.
    pub device: DeviceDescriptor,
    /// Explicit story; a preset is picked when absent.
    pub story: Option<StorySeed>,
}

/// Result of [`SessionOrchestrator::complete_container`].
#[derive(Debug)]
pub struct ContainerCompletion {
    /// Session after the completion.
    pub session: Session,
    /// The recorded result.
    pub result: ContainerResult,
    /// Completion of the unit, with any pending adaptation.
    pub receipt: CompletionReceipt,
    /// What the preloader enqueued, when one is attached.
    pub preload: Option<PreloadReport>,
}

/// Session lifecycle and progression.
pub struct SessionOrchestrator {
    repository: Arc<RubricRepository>,
    planner: Arc<RubricPlanner>,
    synthesis: Arc<ContentSynthesisService>,
    clock: Arc<dyn Clock>,
    default_subjects: Vec<Subject>,
    question_type: String,
    preloader: Option<Arc<PredictivePreloader>>,
    warmer: Option<Arc<CacheWarmer>>,
}

impl SessionOrchestrator {
    /// Creates an orchestrator without preloading or warming.
    #[must_use]
    pub fn new(
        repository: Arc<RubricRepository>,
        planner: Arc<RubricPlanner>,
        synthesis: Arc<ContentSynthesisService>,
        clock: Arc<dyn Clock>,
        default_subjects: Vec<Subject>,
    ) -> Self {
        Self {
            repository,
            planner,
            synthesis,
            clock,
            default_subjects,
            question_type: "multiple_choice".to_string(),
            preloader: None,
            warmer: None,
        }
    }

    /// Enqueues upcoming content on every completion.
    #[must_use]
    pub fn with_preloader(mut self, preloader: Arc<PredictivePreloader>) -> Self {
        self.preloader = Some(preloader);
        self
    }

    /// Warms the cache when a session is created.
    #[must_use]
    pub fn with_warmer(mut self, warmer: Arc<CacheWarmer>) -> Self {
        self.warmer = Some(warmer);
        self
    }

    /// Question type used for preload targets.
    #[must_use]
    pub fn with_question_type(mut self, question_type: impl Into<String>) -> Self {
        self.question_type = question_type.into();
        self
    }

    /// Creates and plans a session.
    ///
    /// An ended session with the same id is reactivated on the request's
    /// device with its history kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] when a live session with the id exists and
    /// [`Error::InvalidInput`] for empty ids or a grade without curriculum.
    #[instrument(skip(self, request), fields(session_id = %request.session_id, user_id = %request.user_id))]
    pub fn create_session(&self, request: CreateSessionRequest) -> Result<Session> {
        if request.session_id.trim().is_empty() || request.user_id.trim().is_empty() {
            return Err(Error::InvalidInput(
                "session_id and user_id must not be empty".to_string(),
            ));
        }
        let now = self.clock.now();

        if let Some(existing) = self.repository.get_session(&request.session_id)? {
            if existing.is_active {
                return Err(Error::Conflict {
                    key: session_key(&request.session_id),
                    expected: 0,
                    actual: existing.revision,
                });
            }
            let (session, _) = self.repository.mutate_session(&request.session_id, |s| {
                Ok(s.resume_from(&request.device, now))
            })?;
            self.planner.plan(&session, request.story.as_ref())?;
            tracing::info!("ended session reactivated");
            return Ok(session);
        }

        let mut subjects = if request.subjects.is_empty() {
            self.default_subjects.clone()
        } else {
            request.subjects
        };
        subjects.sort();
        subjects.dedup();

        let session = Session::new(
            request.session_id,
            request.user_id,
            request.grade_level,
            subjects,
            request.device,
            now,
        );
        self.planner.plan(&session, request.story.as_ref())?;
        let stored = self.repository.put_session(&session)?;
        metrics::counter!("sessions_created_total").increment(1);

        if let Some(warmer) = &self.warmer
            && let Err(e) = warmer.warm(&stored.user_id, &stored.grade_level, &stored.subjects)
        {
            tracing::warn!(error = %e, "cache warming failed");
        }
        Ok(stored)
    }

    /// Starts `container` for `subject`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SequenceViolation`] when a prerequisite is incomplete
    /// or the container is already complete, [`Error::InvalidInput`] for an
    /// ended session or an unplanned subject.
    #[instrument(skip(self), fields(session_id = %session_id, subject = %subject, container = %container))]
    pub fn start_container(
        &self,
        session_id: &str,
        subject: Subject,
        container: ContainerType,
    ) -> Result<Session> {
        let now = self.clock.now();
        let (session, ()) = self.repository.mutate_session(session_id, |s| {
            ensure_planned(s, subject)?;
            s.start(subject, container, now)
        })?;
        Ok(session)
    }

    /// Completes the in-progress `container` and records the performance.
    ///
    /// Time spent is measured from the recorded start. The transition is
    /// checked against the stored session first, then the performance is
    /// recorded on the unit (which adapts the next unit), and the session
    /// write commits last. A failure before the commit leaves the container in
    /// progress, so the call can be repeated; recording the unit again
    /// replaces its performance. The preloader (when attached) then enqueues
    /// upcoming content.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SequenceViolation`] when `container` is not in
    /// progress, [`Error::InvalidInput`] for bad scores or attempts and
    /// [`Error::NotFound`] when the unit was never planned.
    #[instrument(skip(self, struggled_items), fields(session_id = %session_id, subject = %subject, container = %container, score))]
    pub fn complete_container(
        &self,
        session_id: &str,
        subject: Subject,
        container: ContainerType,
        score: f64,
        attempts: u32,
        struggled_items: Vec<String>,
    ) -> Result<ContainerCompletion> {
        let mut input = CompletionInput {
            score,
            attempts,
            time_spent_secs: 0,
            struggled_items,
        };
        input.validate()?;

        let now = self.clock.now();
        let checked = self
            .repository
            .require_session(session_id)?
            .complete(subject, container, score, attempts, now)?;
        input.time_spent_secs = checked.time_spent_secs;

        let receipt = self
            .synthesis
            .record_completion(session_id, container, subject, input)?;
        let (session, result) = self.repository.mutate_session(session_id, |s| {
            s.complete(subject, container, score, attempts, now)
        })?;
        let preload = self.preload_after(&session, &receipt.unit);
        metrics::counter!("containers_completed_total", "container" => container.as_str())
            .increment(1);

        Ok(ContainerCompletion {
            session,
            result,
            receipt,
            preload,
        })
    }

    fn preload_after(&self, session: &Session, unit: &ContentUnit) -> Option<PreloadReport> {
        let preloader = self.preloader.as_ref()?;
        let skill = unit.template.bindings.get("skill_id")?;
        let target = GenerationTarget::new(
            &session.user_id,
            &session.grade_level,
            unit.key.subject,
            skill,
            unit.key.container,
            self.question_type.clone(),
        );
        match preloader.on_navigation(&target) {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::warn!(error = %e, "preload after completion failed");
                None
            },
        }
    }

    /// Resumes a session from `device`, reactivating it if ended.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown session.
    #[instrument(skip(self, device), fields(session_id = %session_id, device_id = %device.device_id))]
    pub fn resume_session(&self, session_id: &str, device: DeviceDescriptor) -> Result<ResumeOutcome> {
        let now = self.clock.now();
        let (session, is_device_switched) = self
            .repository
            .mutate_session(session_id, |s| Ok(s.resume_from(&device, now)))?;
        if is_device_switched {
            metrics::counter!("device_switches_total").increment(1);
            tracing::info!("session resumed on a different device");
        }
        Ok(ResumeOutcome {
            session,
            is_device_switched,
        })
    }

    /// Ends a session. Nothing is purged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown session.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn end_session(&self, session_id: &str) -> Result<Session> {
        let now = self.clock.now();
        let (session, ()) = self.repository.mutate_session(session_id, |s| {
            s.end(now);
            Ok(())
        })?;
        Ok(session)
    }

    /// Loads a session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown session.
    pub fn get_session(&self, session_id: &str) -> Result<Session> {
        self.repository.require_session(session_id)
    }

    /// Story context of a session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the session was never planned.
    pub fn story(&self, session_id: &str) -> Result<StoryContext> {
        self.repository
            .get_story(session_id)?
            .ok_or_else(|| Error::not_found("story", session_id))
    }

    /// One unit of a session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unplanned unit.
    pub fn unit(
        &self,
        session_id: &str,
        container: ContainerType,
        subject: Subject,
    ) -> Result<ContentUnit> {
        self.repository
            .require_unit(&UnitKey::new(session_id, container, subject))
    }
}

fn ensure_planned(session: &Session, subject: Subject) -> Result<()> {
    if session.subjects.contains(&subject) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "subject {subject} is not part of session '{}'",
            session.session_id
        )))
    }
}
