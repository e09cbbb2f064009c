//! Content synthesis service.
//!
//! Generates the content of one unit on demand, validates it against the
//! container's structural contract and memoizes it on the unit. Completion
//! recording lives here too because it is what triggers adaptation of the next
//! unit.

use super::adaptation::{AdaptationDispatch, AdaptationEngine};
use super::validation::validate_content;
use crate::clock::Clock;
use crate::llm::{LlmProvider, ResponseShape, parse_json_payload};
use crate::models::{
    ContainerType, ContentUnit, GeneratedContent, PerformanceRecord, PromptTemplate, Subject,
    UnitKey, ValidationOutcome,
};
use crate::storage::RubricRepository;
use crate::{Error, Result};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::instrument;

/// Result of [`ContentSynthesisService::generate`].
#[derive(Debug, Clone)]
pub struct SynthesisOutcome {
    /// The content now current on the unit.
    pub content: GeneratedContent,
    /// Structural violations found in `content`; empty when valid.
    pub validation_errors: Vec<String>,
    /// True when the memoized content was returned without a provider call.
    pub from_memo: bool,
}

/// Content produced by [`ContentSynthesisService::synthesize`], not yet stored.
#[derive(Debug, Clone)]
pub struct Synthesized {
    /// Parsed payload with its provenance.
    pub content: GeneratedContent,
    /// Structural violations.
    pub validation_errors: Vec<String>,
}

/// Performance reported when a student finishes a container.
#[derive(Debug, Clone, Default)]
pub struct CompletionInput {
    /// Score in `0..=100`.
    pub score: f64,
    /// Attempts taken, at least 1.
    pub attempts: u32,
    /// Seconds spent in the container.
    pub time_spent_secs: u64,
    /// Items the student struggled with.
    pub struggled_items: Vec<String>,
}

impl CompletionInput {
    /// Checks score and attempts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a score outside `0..=100` or zero attempts.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=100.0).contains(&self.score) {
            return Err(Error::InvalidInput(format!(
                "score must be within 0..=100, got {}",
                self.score
            )));
        }
        if self.attempts == 0 {
            return Err(Error::InvalidInput("attempts must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Returned by [`ContentSynthesisService::record_completion`].
#[derive(Debug)]
pub struct CompletionReceipt {
    /// The completed unit.
    pub unit: ContentUnit,
    pending_adaptation: Option<JoinHandle<()>>,
}

impl CompletionReceipt {
    /// True while detached adaptation may still be running.
    #[must_use]
    pub fn adaptation_pending(&self) -> bool {
        self.pending_adaptation
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Blocks until detached adaptation finished, then returns the unit.
    pub fn wait(self) -> ContentUnit {
        if let Some(handle) = self.pending_adaptation
            && handle.join().is_err()
        {
            tracing::warn!(unit = %self.unit.key, "adaptation thread panicked");
        }
        self.unit
    }
}

/// Generates, validates and memoizes unit content.
pub struct ContentSynthesisService {
    repository: Arc<RubricRepository>,
    provider: Arc<dyn LlmProvider>,
    adaptation: Arc<AdaptationEngine>,
    dispatch: AdaptationDispatch,
    clock: Arc<dyn Clock>,
}

impl ContentSynthesisService {
    /// Creates a synthesis service.
    #[must_use]
    pub fn new(
        repository: Arc<RubricRepository>,
        provider: Arc<dyn LlmProvider>,
        adaptation: Arc<AdaptationEngine>,
        dispatch: AdaptationDispatch,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            provider,
            adaptation,
            dispatch,
            clock,
        }
    }

    /// Name of the generation provider.
    #[must_use]
    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Renders `template`, calls the provider and validates the answer.
    ///
    /// Touches no storage. Validation errors are returned alongside the
    /// content, not as an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for unbound template variables and
    /// [`Error::GenerationFailure`] when the provider fails or its answer is
    /// not JSON.
    #[instrument(skip(self, template), fields(container = %container, provider = self.provider.name()))]
    pub fn synthesize(
        &self,
        template: &PromptTemplate,
        container: ContainerType,
    ) -> Result<Synthesized> {
        let started = Instant::now();
        let result = self.synthesize_inner(template, container);
        let outcome = match &result {
            Ok(s) if s.validation_errors.is_empty() => "valid",
            Ok(_) => "invalid",
            Err(e) => e.kind(),
        };
        metrics::counter!(
            "synthesis_requests_total",
            "container" => container.as_str(),
            "outcome" => outcome
        )
        .increment(1);
        metrics::histogram!("synthesis_duration_ms", "container" => container.as_str())
            .record(started.elapsed().as_secs_f64() * 1000.0);
        result
    }

    fn synthesize_inner(
        &self,
        template: &PromptTemplate,
        container: ContainerType,
    ) -> Result<Synthesized> {
        let rendered = template.render()?;
        let fingerprint = rendered.fingerprint();
        let system = ResponseShape::for_container(container).append_to(&rendered.system);

        let response = self.provider.complete_with_system(&system, &rendered.user)?;
        let payload = parse_json_payload(&response)?;
        let validation_errors = validate_content(container, &payload);
        if !validation_errors.is_empty() {
            tracing::warn!(
                errors = validation_errors.len(),
                "generated content failed structural validation"
            );
        }

        Ok(Synthesized {
            content: GeneratedContent {
                payload,
                prompt_fingerprint: fingerprint,
                provider: self.provider.name().to_string(),
                generated_at: self.clock.now(),
            },
            validation_errors,
        })
    }

    /// Returns the unit's content, generating it when absent or forced.
    ///
    /// A unit with content and `force_regenerate == false` costs no provider
    /// call. New content and its validation errors are stored together in one
    /// compare-and-swap update, replacing any previous payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unplanned unit, plus every error of
    /// [`Self::synthesize`].
    #[instrument(skip(self), fields(session_id = %session_id, container = %container, subject = %subject))]
    pub fn generate(
        &self,
        session_id: &str,
        container: ContainerType,
        subject: Subject,
        force_regenerate: bool,
    ) -> Result<SynthesisOutcome> {
        let key = UnitKey::new(session_id, container, subject);
        let unit = self.repository.require_unit(&key)?;

        if !force_regenerate && let Some(content) = unit.content {
            metrics::counter!("synthesis_memo_hits_total", "container" => container.as_str())
                .increment(1);
            return Ok(SynthesisOutcome {
                content,
                validation_errors: unit.validation.errors,
                from_memo: true,
            });
        }

        let synthesized = self.synthesize(&unit.template, container)?;
        let now = self.clock.now();
        let (stored, ()) = self.repository.mutate_unit(&key, |unit| {
            unit.content = Some(synthesized.content.clone());
            unit.validation = ValidationOutcome::from_errors(synthesized.validation_errors.clone());
            unit.updated_at = now;
            Ok(())
        })?;
        tracing::info!(
            valid = stored.validation.valid,
            revision = stored.revision,
            "unit content generated"
        );

        Ok(SynthesisOutcome {
            content: synthesized.content,
            validation_errors: synthesized.validation_errors,
            from_memo: false,
        })
    }

    /// Attaches performance to the unit, marks it completed and adapts the
    /// next container's unit.
    ///
    /// Adaptation never fails this call: errors are logged and counted. In
    /// detached mode it runs on its own thread and the receipt carries its
    /// handle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for bad input and [`Error::NotFound`]
    /// for an unplanned unit.
    #[instrument(skip(self, input), fields(session_id = %session_id, container = %container, subject = %subject, score = input.score))]
    pub fn record_completion(
        &self,
        session_id: &str,
        container: ContainerType,
        subject: Subject,
        input: CompletionInput,
    ) -> Result<CompletionReceipt> {
        input.validate()?;
        let key = UnitKey::new(session_id, container, subject);
        let now = self.clock.now();
        let record = PerformanceRecord {
            score: input.score,
            attempts: input.attempts,
            time_spent_secs: input.time_spent_secs,
            struggled_items: input.struggled_items,
            completed_at: now,
        };
        let (unit, ()) = self.repository.mutate_unit(&key, |unit| {
            unit.performance = Some(record.clone());
            unit.completed = true;
            unit.updated_at = now;
            Ok(())
        })?;

        if key.next().is_none() {
            return Ok(CompletionReceipt {
                unit,
                pending_adaptation: None,
            });
        }

        let pending_adaptation = match self.dispatch {
            AdaptationDispatch::Inline => {
                adapt_next(&self.adaptation, &key, &record);
                None
            },
            AdaptationDispatch::Detached => {
                let engine = Arc::clone(&self.adaptation);
                let thread_key = key.clone();
                std::thread::Builder::new()
                    .name("rubricflow-adaptation".to_string())
                    .spawn(move || adapt_next(&engine, &thread_key, &record))
                    .map_err(|e| {
                        tracing::warn!(unit = %key, error = %e, "could not spawn adaptation thread");
                        metrics::counter!("adaptation_failures_total", "stage" => "spawn")
                            .increment(1);
                    })
                    .ok()
            },
        };

        Ok(CompletionReceipt {
            unit,
            pending_adaptation,
        })
    }
}

fn adapt_next(engine: &AdaptationEngine, completed: &UnitKey, latest: &PerformanceRecord) {
    match engine.plan_next(completed, latest) {
        Ok(Some(strategy)) => {
            tracing::debug!(unit = %completed, reasoning = %strategy.reasoning, "next unit adapted");
        },
        Ok(None) => {},
        Err(e) => {
            tracing::warn!(unit = %completed, error = %e, "adaptation of next unit failed");
            metrics::counter!("adaptation_failures_total", "stage" => e.kind()).increment(1);
        },
    }
}
