//! Learning sessions and the per-subject phase state machine.
//!
//! ```text
//! NotStarted -> LEARN in progress -> LEARN done -> EXPERIENCE in progress
//!            -> EXPERIENCE done -> DISCOVER in progress -> DISCOVER done
//! ```
//!
//! The transitions live on [`Session`] as pure functions so the orchestrator only
//! has to load, apply and compare-and-swap.

use super::{ContainerType, Subject};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of device a session is used from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// Desktop or laptop browser.
    #[default]
    Desktop,
    /// Tablet.
    Tablet,
    /// Phone.
    Phone,
    /// Anything else.
    Other,
}

impl DeviceType {
    /// Parses a device type; unknown names map to [`DeviceType::Other`].
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "desktop" | "laptop" => Self::Desktop,
            "tablet" => Self::Tablet,
            "phone" | "mobile" => Self::Phone,
            _ => Self::Other,
        }
    }
}

/// Identifies the device a session is being used from.
///
/// Two descriptors refer to the same device when their `device_id`s match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Stable device identifier.
    pub device_id: String,
    /// Device kind.
    #[serde(default)]
    pub device_type: DeviceType,
    /// Optional user agent or label.
    #[serde(default)]
    pub label: Option<String>,
}

impl DeviceDescriptor {
    /// Creates a descriptor.
    pub fn new(device_id: impl Into<String>, device_type: DeviceType) -> Self {
        Self {
            device_id: device_id.into(),
            device_type,
            label: None,
        }
    }

    /// True when both descriptors refer to the same device.
    #[must_use]
    pub fn same_device(&self, other: &Self) -> bool {
        self.device_id == other.device_id
    }
}

/// One entry of a session's device history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceHistoryEntry {
    /// Device that became active.
    pub device: DeviceDescriptor,
    /// When it became active.
    pub activated_at: DateTime<Utc>,
}

/// Recorded result of a completed container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerResult {
    /// Completed container.
    pub container: ContainerType,
    /// Score from 0 to 100.
    pub score: f64,
    /// Attempts taken.
    pub attempts: u32,
    /// Seconds between start and completion.
    pub time_spent_secs: u64,
    /// Completion time.
    pub completed_at: DateTime<Utc>,
}

/// A container currently being worked on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InProgress {
    /// Container in progress.
    pub container: ContainerType,
    /// When it was started.
    pub started_at: DateTime<Utc>,
}

/// Progression of one subject within a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectProgress {
    /// Completed containers, always a prefix of [`ContainerType::SEQUENCE`].
    #[serde(default)]
    pub completed: Vec<ContainerType>,
    /// Container currently in progress.
    #[serde(default)]
    pub in_progress: Option<InProgress>,
    /// Results in completion order.
    #[serde(default)]
    pub results: Vec<ContainerResult>,
}

/// Derived state of a subject's progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressState {
    /// Nothing started yet.
    NotStarted,
    /// The given container has been started but not completed.
    InProgress(ContainerType),
    /// The given container is the latest completed one.
    Done(ContainerType),
}

impl ProgressState {
    /// True once DISCOVER has been completed.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done(ContainerType::Discover))
    }
}

impl SubjectProgress {
    /// Derives the state machine position.
    #[must_use]
    pub fn state(&self) -> ProgressState {
        if let Some(ref current) = self.in_progress {
            return ProgressState::InProgress(current.container);
        }
        self.completed
            .last()
            .map_or(ProgressState::NotStarted, |c| ProgressState::Done(*c))
    }

    /// True when `completed` is a prefix of the container sequence.
    #[must_use]
    pub fn is_valid_prefix(&self) -> bool {
        self.completed.len() <= ContainerType::SEQUENCE.len()
            && self
                .completed
                .iter()
                .zip(ContainerType::SEQUENCE.iter())
                .all(|(a, b)| a == b)
    }

    /// True when `container` has been completed.
    #[must_use]
    pub fn is_complete(&self, container: ContainerType) -> bool {
        self.completed.contains(&container)
    }
}

/// Pointer to what the student is working on right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentContainer {
    /// Subject.
    pub subject: Subject,
    /// Container.
    pub container: ContainerType,
}

/// A learning session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Identity.
    pub session_id: String,
    /// Student.
    pub user_id: String,
    /// Grade level, e.g. `"3"` or `"K"`.
    pub grade_level: String,
    /// Subjects planned for the session.
    pub subjects: Vec<Subject>,
    /// Device that last held the session.
    pub active_device: DeviceDescriptor,
    /// Every device activation in order, including the first.
    #[serde(default)]
    pub device_history: Vec<DeviceHistoryEntry>,
    /// Per-subject progression.
    #[serde(default)]
    pub progress: BTreeMap<Subject, SubjectProgress>,
    /// Current container pointer.
    #[serde(default)]
    pub current: Option<CurrentContainer>,
    /// False after logout.
    pub is_active: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation.
    pub last_activity_at: DateTime<Utc>,
    /// When the session was last ended.
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// Store revision this copy was read at. Not serialized into the body.
    #[serde(skip)]
    pub revision: u64,
}

impl Session {
    /// Creates an active session on `device`.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        grade_level: impl Into<String>,
        subjects: Vec<Subject>,
        device: DeviceDescriptor,
        now: DateTime<Utc>,
    ) -> Self {
        let progress = subjects
            .iter()
            .map(|s| (*s, SubjectProgress::default()))
            .collect();
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            grade_level: grade_level.into(),
            subjects,
            device_history: vec![DeviceHistoryEntry {
                device: device.clone(),
                activated_at: now,
            }],
            active_device: device,
            progress,
            current: None,
            is_active: true,
            created_at: now,
            last_activity_at: now,
            ended_at: None,
            revision: 0,
        }
    }

    /// Progression of `subject`, empty when the subject was never touched.
    #[must_use]
    pub fn progress_for(&self, subject: Subject) -> SubjectProgress {
        self.progress.get(&subject).cloned().unwrap_or_default()
    }

    /// Derived state for `subject`.
    #[must_use]
    pub fn state(&self, subject: Subject) -> ProgressState {
        self.progress
            .get(&subject)
            .map_or(ProgressState::NotStarted, SubjectProgress::state)
    }

    /// Starts `container` for `subject`.
    ///
    /// Restarting the container already in progress keeps its start time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SequenceViolation`] when a prerequisite is incomplete or the
    /// container was already completed, and [`Error::InvalidInput`] on an ended session.
    pub fn start(
        &mut self,
        subject: Subject,
        container: ContainerType,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_active()?;
        let progress = self.progress.entry(subject).or_default();

        if progress.is_complete(container) {
            return Err(violation(subject, container, "container already completed"));
        }
        if let Some(missing) = container
            .prerequisites()
            .iter()
            .find(|c| !progress.is_complete(**c))
        {
            return Err(violation(
                subject,
                container,
                &format!("prerequisite {missing} is incomplete"),
            ));
        }

        match progress.in_progress {
            Some(ref current) if current.container == container => {},
            _ => {
                progress.in_progress = Some(InProgress {
                    container,
                    started_at: now,
                });
            },
        }

        if !self.subjects.contains(&subject) {
            self.subjects.push(subject);
        }
        self.current = Some(CurrentContainer { subject, container });
        self.last_activity_at = now;
        Ok(())
    }

    /// Completes the in-progress `container` for `subject`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SequenceViolation`] when `container` is not the one in progress.
    pub fn complete(
        &mut self,
        subject: Subject,
        container: ContainerType,
        score: f64,
        attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<ContainerResult> {
        self.ensure_active()?;
        let progress = self.progress.entry(subject).or_default();

        let started_at = match progress.in_progress {
            Some(ref current) if current.container == container => current.started_at,
            Some(ref current) => {
                return Err(violation(
                    subject,
                    container,
                    &format!("{} is in progress", current.container),
                ));
            },
            None => return Err(violation(subject, container, "container was not started")),
        };

        let time_spent_secs = u64::try_from((now - started_at).num_seconds()).unwrap_or(0);
        let result = ContainerResult {
            container,
            score,
            attempts,
            time_spent_secs,
            completed_at: now,
        };

        progress.completed.push(container);
        progress.in_progress = None;
        progress.results.push(result.clone());
        debug_assert!(progress.is_valid_prefix());

        if self
            .current
            .is_some_and(|c| c.subject == subject && c.container == container)
        {
            self.current = None;
        }
        self.last_activity_at = now;
        Ok(result)
    }

    /// Records a resume from `device`; returns true when the device changed.
    pub fn resume_from(&mut self, device: &DeviceDescriptor, now: DateTime<Utc>) -> bool {
        let switched = !self.active_device.same_device(device);
        if switched {
            self.device_history.push(DeviceHistoryEntry {
                device: device.clone(),
                activated_at: now,
            });
            self.active_device = device.clone();
        }
        self.is_active = true;
        self.ended_at = None;
        self.last_activity_at = now;
        switched
    }

    /// Ends the session, keeping all history.
    pub fn end(&mut self, now: DateTime<Utc>) {
        self.is_active = false;
        self.ended_at = Some(now);
        self.current = None;
        self.last_activity_at = now;
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_active {
            Ok(())
        } else {
            Err(Error::InvalidInput(format!(
                "session '{}' has ended; resume it first",
                self.session_id
            )))
        }
    }
}

fn violation(subject: Subject, container: ContainerType, reason: &str) -> Error {
    Error::SequenceViolation {
        subject: subject.to_string(),
        container: container.to_string(),
        reason: reason.to_string(),
    }
}

/// A resumed session plus whether the resume came from a different device.
///
/// When `is_device_switched` is true the caller must discard any locally cached
/// rubric state: content may have changed on the other device.
#[derive(Debug, Clone)]
pub struct ResumeOutcome {
    /// The session after the resume was recorded.
    pub session: Session,
    /// True when the active device changed.
    pub is_device_switched: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session() -> (Session, DateTime<Utc>) {
        let now = DateTime::<Utc>::UNIX_EPOCH + Duration::days(19_000);
        let device = DeviceDescriptor::new("tablet-a", DeviceType::Tablet);
        (
            Session::new("s1", "u1", "3", vec![Subject::Math], device, now),
            now,
        )
    }

    #[test]
    fn test_start_requires_prerequisites() {
        let (mut s, now) = session();
        let err = s
            .start(Subject::Math, ContainerType::Experience, now)
            .unwrap_err();
        assert!(matches!(err, Error::SequenceViolation { .. }));
        assert_eq!(s.state(Subject::Math), ProgressState::NotStarted);
    }

    #[test]
    fn test_full_progression_reaches_terminal() {
        let (mut s, now) = session();
        for (i, container) in ContainerType::SEQUENCE.iter().enumerate() {
            s.start(Subject::Math, *container, now).unwrap();
            let done_at = now + Duration::seconds(60 * (i as i64 + 1));
            let result = s
                .complete(Subject::Math, *container, 80.0, 1, done_at)
                .unwrap();
            assert_eq!(result.time_spent_secs, 60 * (i as u64 + 1));
        }
        assert!(s.state(Subject::Math).is_terminal());
        assert!(s.progress_for(Subject::Math).is_valid_prefix());
    }

    #[test]
    fn test_complete_without_start_is_violation() {
        let (mut s, now) = session();
        let err = s
            .complete(Subject::Math, ContainerType::Learn, 90.0, 1, now)
            .unwrap_err();
        assert!(matches!(err, Error::SequenceViolation { .. }));
    }

    #[test]
    fn test_restart_keeps_start_time() {
        let (mut s, now) = session();
        s.start(Subject::Math, ContainerType::Learn, now).unwrap();
        s.start(Subject::Math, ContainerType::Learn, now + Duration::seconds(30))
            .unwrap();
        let result = s
            .complete(
                Subject::Math,
                ContainerType::Learn,
                70.0,
                2,
                now + Duration::seconds(100),
            )
            .unwrap();
        assert_eq!(result.time_spent_secs, 100);
    }

    #[test]
    fn test_cannot_restart_completed_container() {
        let (mut s, now) = session();
        s.start(Subject::Math, ContainerType::Learn, now).unwrap();
        s.complete(Subject::Math, ContainerType::Learn, 70.0, 1, now)
            .unwrap();
        assert!(s.start(Subject::Math, ContainerType::Learn, now).is_err());
    }

    #[test]
    fn test_resume_from_records_switch_once() {
        let (mut s, now) = session();
        let phone = DeviceDescriptor::new("phone-b", DeviceType::Phone);
        assert!(s.resume_from(&phone, now));
        assert!(!s.resume_from(&phone, now));
        assert_eq!(s.device_history.len(), 2);
        assert_eq!(s.active_device.device_id, "phone-b");
    }

    #[test]
    fn test_ended_session_rejects_progress_until_resumed() {
        let (mut s, now) = session();
        s.end(now);
        assert!(matches!(
            s.start(Subject::Math, ContainerType::Learn, now),
            Err(Error::InvalidInput(_))
        ));
        let device = s.active_device.clone();
        s.resume_from(&device, now);
        assert!(s.start(Subject::Math, ContainerType::Learn, now).is_ok());
    }
}
