//! Data models for rubricflow.
//!
//! This module contains the documents persisted by the store (story contexts,
//! content units, sessions), the pre-generation queue item, and the derived
//! adaptation types.

pub mod adaptation;
mod container;
mod content_unit;
mod queue;
mod session;
mod story;
mod template;

pub use adaptation::{
    AdaptationStrategy, Consistency, ConceptDensity, EncouragementTone, FeedbackFrequency,
    HintAvailability, PerformanceProfile, ScenarioComplexity, SkillApplicationFocus, SupportLevel,
    Velocity, VocabularyLevel,
};
pub use container::{ContainerType, Subject};
pub use content_unit::{
    ContentUnit, GeneratedContent, PerformanceRecord, UnitKey, ValidationOutcome,
};
pub use queue::{
    GenerationTarget, PRIORITY_DEMAND, PRIORITY_PRELOAD, PRIORITY_WARMING, QueueItem, QueueStats,
    QueueStatus,
};
pub use session::{
    ContainerResult, CurrentContainer, DeviceDescriptor, DeviceHistoryEntry, DeviceType,
    InProgress, ProgressState, ResumeOutcome, Session, SubjectProgress,
};
pub use story::StoryContext;
pub use template::{PromptTemplate, RenderedPrompt, extract_variables, substitute_variables};
