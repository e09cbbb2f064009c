//! Business logic services.
//!
//! Services orchestrate storage backends and provide high-level operations.

mod adaptation;
mod container;
mod curriculum;
mod session;
mod synthesis;
mod validation;

pub use adaptation::{
    AdaptationDispatch, AdaptationEngine, AdaptationThresholds, PerformanceBand, classify_band,
    classify_consistency, classify_velocity, derive_strategy, profile_from_units,
};
pub use container::ServiceContainer;
pub use curriculum::{RubricPlanner, StorySeed};
pub use session::{ContainerCompletion, CreateSessionRequest, SessionOrchestrator};
pub use synthesis::{
    CompletionInput, CompletionReceipt, ContentSynthesisService, SynthesisOutcome, Synthesized,
};
pub use validation::{
    DISCOVER_STATION_COUNT, EXPERIENCE_EXAMPLE_COUNT, EXPERIENCE_PRACTICE_COUNT,
    LEARN_PRACTICE_COUNT, validate_content,
};
