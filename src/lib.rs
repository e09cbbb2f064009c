//! # Rubricflow
//!
//! Rubric-driven, just-in-time content generation and adaptive progression for
//! K-12 learning sessions.
//!
//! A session is planned as a set of content units ("rubrics"), one per
//! `(container, subject)`. Content is generated on first demand, validated
//! against a per-container structural contract, and memoized on the unit.
//! Completing a phase feeds the student's performance into an adaptation
//! strategy that is written onto the next phase's rubric before it is generated.
//!
//! ## Components
//!
//! - [`storage`]: key-document store for story contexts, content units and sessions
//! - [`services::ContentSynthesisService`]: synthesis and validation of one unit
//! - [`services::AdaptationEngine`]: performance profiles and strategy rules
//! - [`services::SessionOrchestrator`]: session lifecycle and phase state machine
//! - [`pipeline`]: priority queue, worker loop, transport cache and preloading
//!
//! ## Example
//!
//! ```rust,ignore
//! use rubricflow::{ContainerType, RubricflowConfig, Subject};
//! use rubricflow::services::ServiceContainer;
//!
//! let services = ServiceContainer::from_config(&RubricflowConfig::load_default())?;
//! let outcome = services
//!     .synthesis()
//!     .generate("session-1", ContainerType::Learn, Subject::Math, false)?;
//! assert!(outcome.validation_errors.is_empty());
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use std::fmt;
use thiserror::Error as ThisError;

pub mod clock;
pub mod config;
pub mod llm;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod services;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RubricflowConfig;
pub use llm::LlmProvider;
pub use models::{
    AdaptationStrategy, ContainerType, ContentUnit, DeviceDescriptor, GenerationTarget,
    PerformanceProfile, QueueItem, QueueStatus, Session, StoryContext, Subject, UnitKey,
};

/// Stage of content generation at which a [`Error::GenerationFailure`] occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStage {
    /// The provider call itself failed (network, status, empty response).
    Provider,
    /// The provider answered but the text could not be parsed as JSON.
    Parse,
}

impl fmt::Display for GenerationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provider => f.write_str("provider"),
            Self::Parse => f.write_str("parse"),
        }
    }
}

/// Error type for rubricflow operations.
///
/// | Variant | Raised When | Policy |
/// |---------|-------------|--------|
/// | `NotFound` | A unit, session, story or queue item is missing | Propagated, never retried |
/// | `ValidationFailure` | Generated content violates its container contract | Non-fatal on the demand path |
/// | `GenerationFailure` | Provider error or unparseable output | Retried by the queue |
/// | `SequenceViolation` | A phase is started or completed out of order | Always fatal |
/// | `Conflict` | A revision check failed or a document already exists | Retried by CAS loops |
/// | `LeaseLost` | A worker reports on a queue item it no longer holds | Result dropped by the worker |
/// | `InvalidInput` | Bad arguments, missing template bindings, ended session | Surfaced |
/// | `OperationFailed` | I/O, `SQLite`, serialization | Surfaced |
#[derive(Debug, ThisError)]
pub enum Error {
    /// A document or queue item does not exist.
    #[error("{kind} not found: {key}")]
    NotFound {
        /// The kind of thing that was looked up.
        kind: &'static str,
        /// The key it was looked up by.
        key: String,
    },

    /// Generated content does not satisfy its structural contract.
    #[error("validation failed: {}", errors.join("; "))]
    ValidationFailure {
        /// Every violation found.
        errors: Vec<String>,
    },

    /// Content generation failed.
    #[error("generation failed at {stage} stage: {cause}")]
    GenerationFailure {
        /// Where generation failed.
        stage: GenerationStage,
        /// The underlying cause.
        cause: String,
    },

    /// A progression invariant would be broken.
    #[error("sequence violation for {subject}/{container}: {reason}")]
    SequenceViolation {
        /// Subject being progressed.
        subject: String,
        /// Container that was requested.
        container: String,
        /// Why the transition is not allowed.
        reason: String,
    },

    /// A compare-and-swap on a document revision lost the race.
    #[error("conflict on '{key}': expected revision {expected}, found {actual}")]
    Conflict {
        /// Document key.
        key: String,
        /// Revision the caller expected.
        expected: u64,
        /// Revision actually stored (0 when the document already existed on create).
        actual: u64,
    },

    /// A queue item is no longer processing under the reporting worker.
    #[error("worker '{worker_id}' no longer holds queue item '{item_id}'")]
    LeaseLost {
        /// Queue item id.
        item_id: String,
        /// Worker that reported the result.
        worker_id: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Shorthand for a [`Error::NotFound`].
    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
        }
    }

    /// Shorthand for a provider-stage [`Error::GenerationFailure`].
    pub fn provider(cause: impl Into<String>) -> Self {
        Self::GenerationFailure {
            stage: GenerationStage::Provider,
            cause: cause.into(),
        }
    }

    /// Shorthand for an [`Error::OperationFailed`].
    pub fn operation(operation: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            cause: cause.to_string(),
        }
    }

    /// Returns true when a queued job that hit this error may be attempted again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::GenerationFailure { .. } | Self::ValidationFailure { .. } | Self::Conflict { .. }
        )
    }

    /// Short, stable label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::ValidationFailure { .. } => "validation_failure",
            Self::GenerationFailure { .. } => "generation_failure",
            Self::SequenceViolation { .. } => "sequence_violation",
            Self::Conflict { .. } => "conflict",
            Self::LeaseLost { .. } => "lease_lost",
            Self::InvalidInput(_) => "invalid_input",
            Self::OperationFailed { .. } => "operation_failed",
        }
    }
}

/// Result type alias for rubricflow operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::not_found("session", "s-1");
        assert_eq!(err.to_string(), "session not found: s-1");

        let err = Error::ValidationFailure {
            errors: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "validation failed: a; b");

        let err = Error::GenerationFailure {
            stage: GenerationStage::Parse,
            cause: "expected value".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "generation failed at parse stage: expected value"
        );
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(Error::provider("timeout").is_retryable());
        assert!(Error::ValidationFailure { errors: vec![] }.is_retryable());
        assert!(!Error::not_found("unit", "k").is_retryable());
        assert!(
            !Error::LeaseLost {
                item_id: "q-1".to_string(),
                worker_id: "w1".to_string(),
            }
            .is_retryable()
        );
        assert!(
            !Error::SequenceViolation {
                subject: "math".to_string(),
                container: "EXPERIENCE".to_string(),
                reason: "LEARN incomplete".to_string(),
            }
            .is_retryable()
        );
    }
}
