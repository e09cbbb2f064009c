//! Pre-generation queue items.

use super::{ContainerType, Subject};
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Priority for content a student is waiting on right now.
pub const PRIORITY_DEMAND: i32 = 100;
/// Priority for predictive preloads after a navigation event.
pub const PRIORITY_PRELOAD: i32 = 75;
/// Priority for session-start cache warming.
pub const PRIORITY_WARMING: i32 = 10;

/// What a queue item will generate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenerationTarget {
    /// Student the content is for.
    pub student_id: String,
    /// Grade level.
    pub grade_level: String,
    /// Subject.
    pub subject: Subject,
    /// Curriculum skill identifier.
    pub skill_id: String,
    /// Container type.
    pub container: ContainerType,
    /// Question style, e.g. `multiple_choice`.
    pub question_type: String,
}

impl GenerationTarget {
    /// Creates a target.
    pub fn new(
        student_id: impl Into<String>,
        grade_level: impl Into<String>,
        subject: Subject,
        skill_id: impl Into<String>,
        container: ContainerType,
        question_type: impl Into<String>,
    ) -> Self {
        Self {
            student_id: student_id.into(),
            grade_level: grade_level.into(),
            subject,
            skill_id: skill_id.into(),
            container,
            question_type: question_type.into(),
        }
    }

    /// Same target for a different skill and container.
    #[must_use]
    pub fn retarget(&self, skill_id: impl Into<String>, container: ContainerType) -> Self {
        Self {
            skill_id: skill_id.into(),
            container,
            ..self.clone()
        }
    }
}

impl fmt::Display for GenerationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}:{}",
            self.student_id,
            self.grade_level,
            self.subject,
            self.skill_id,
            self.container,
            self.question_type
        )
    }
}

/// Lifecycle of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Waiting to be claimed.
    Pending,
    /// Claimed by a worker.
    Processing,
    /// Content generated and cached. Terminal.
    Completed,
    /// Lease expired while processing; claimable again.
    Failed,
    /// Retries exhausted. Terminal; never reclaimed.
    PermanentlyFailed,
}

impl QueueStatus {
    /// Canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::PermanentlyFailed => "permanently_failed",
        }
    }

    /// Parses a status name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "permanently_failed" => Some(Self::PermanentlyFailed),
            _ => None,
        }
    }

    /// True for states a worker may claim.
    #[must_use]
    pub const fn is_claimable(self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }

    /// True for states that never change again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::PermanentlyFailed)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of pre-generation work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Generated identifier.
    pub id: String,
    /// What to generate.
    pub target: GenerationTarget,
    /// Higher is claimed first.
    pub priority: i32,
    /// Lifecycle state.
    pub status: QueueStatus,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Worker holding the claim.
    pub claimed_by: Option<String>,
    /// When the current claim lapses.
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Last failure message.
    pub last_error: Option<String>,
    /// Enqueue time.
    pub created_at: DateTime<Utc>,
    /// Last transition.
    pub updated_at: DateTime<Utc>,
}

impl QueueItem {
    /// Creates a pending item with a fresh id.
    #[must_use]
    pub fn new(target: GenerationTarget, priority: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            target,
            priority,
            status: QueueStatus::Pending,
            retry_count: 0,
            claimed_by: None,
            lease_expires_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// True when the item is processing and its lease lapsed before `now`.
    #[must_use]
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Processing
            && self.lease_expires_at.is_some_and(|expires| expires < now)
    }

    /// Moves a claimable item to `processing` under `worker_id`.
    pub fn mark_claimed(&mut self, worker_id: &str, lease: Duration, now: DateTime<Utc>) {
        self.status = QueueStatus::Processing;
        self.claimed_by = Some(worker_id.to_string());
        self.lease_expires_at = Some(now + lease);
        self.updated_at = now;
    }

    /// Moves the item to `completed`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LeaseLost`] unless the item is processing under
    /// `worker_id`.
    pub fn mark_completed(&mut self, worker_id: &str, now: DateTime<Utc>) -> Result<()> {
        self.ensure_held_by(worker_id)?;
        self.status = QueueStatus::Completed;
        self.lease_expires_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// Records a failed attempt by `worker_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LeaseLost`] unless the item is processing under
    /// `worker_id`.
    pub fn mark_failed(
        &mut self,
        worker_id: &str,
        error: &str,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_held_by(worker_id)?;
        self.record_attempt(error, max_retries, QueueStatus::Pending, now);
        Ok(())
    }

    /// Counts a lapsed lease as a failed attempt. The item becomes `failed`
    /// and claimable again, or `permanently_failed` past `max_retries`.
    pub fn mark_lease_lapsed(&mut self, max_retries: u32, now: DateTime<Utc>) {
        self.record_attempt("lease expired", max_retries, QueueStatus::Failed, now);
    }

    fn record_attempt(
        &mut self,
        error: &str,
        max_retries: u32,
        retry_status: QueueStatus,
        now: DateTime<Utc>,
    ) {
        self.retry_count = self.retry_count.saturating_add(1);
        self.status = if self.retry_count > max_retries {
            QueueStatus::PermanentlyFailed
        } else {
            retry_status
        };
        self.claimed_by = None;
        self.lease_expires_at = None;
        self.last_error = Some(error.to_string());
        self.updated_at = now;
    }

    fn ensure_held_by(&self, worker_id: &str) -> Result<()> {
        if self.status == QueueStatus::Processing && self.claimed_by.as_deref() == Some(worker_id)
        {
            return Ok(());
        }
        Err(Error::LeaseLost {
            item_id: self.id.clone(),
            worker_id: worker_id.to_string(),
        })
    }
}

/// Counts of queue items by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Pending items.
    pub pending: usize,
    /// Processing items.
    pub processing: usize,
    /// Completed items.
    pub completed: usize,
    /// Failed (lease lapsed) items.
    pub failed: usize,
    /// Permanently failed items.
    pub permanently_failed: usize,
}

impl QueueStats {
    /// Adds one item of `status`.
    pub const fn record(&mut self, status: QueueStatus) {
        match status {
            QueueStatus::Pending => self.pending += 1,
            QueueStatus::Processing => self.processing += 1,
            QueueStatus::Completed => self.completed += 1,
            QueueStatus::Failed => self.failed += 1,
            QueueStatus::PermanentlyFailed => self.permanently_failed += 1,
        }
    }

    /// Items not yet in a terminal state.
    #[must_use]
    pub const fn open(&self) -> usize {
        self.pending + self.processing + self.failed
    }
}
