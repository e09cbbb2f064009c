//! Service container.
//!
//! Wires every service over one document store, one queue store, one
//! provider and one clock. The CLI builds it from configuration; tests build
//! it from parts.

use super::adaptation::AdaptationEngine;
use super::curriculum::RubricPlanner;
use super::session::SessionOrchestrator;
use super::synthesis::ContentSynthesisService;
use crate::clock::{Clock, SystemClock};
use crate::config::RubricflowConfig;
use crate::llm::{LlmProvider, build_provider};
use crate::pipeline::{
    CacheWarmer, ContentPipeline, Curriculum, GenerationQueue, PredictivePreloader,
    StaticCurriculum, TransportCache, WorkerDeps,
};
use crate::storage::{DocumentStore, QueueStore, RubricRepository, open_stores};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;

/// Every service, built once and shared.
pub struct ServiceContainer {
    config: RubricflowConfig,
    clock: Arc<dyn Clock>,
    repository: Arc<RubricRepository>,
    queue: Arc<GenerationQueue>,
    cache: Arc<TransportCache>,
    adaptation: Arc<AdaptationEngine>,
    synthesis: Arc<ContentSynthesisService>,
    planner: Arc<RubricPlanner>,
    preloader: Arc<PredictivePreloader>,
    warmer: Arc<CacheWarmer>,
    sessions: SessionOrchestrator,
    pipeline: ContentPipeline,
}

impl ServiceContainer {
    /// Opens the configured stores and provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory cannot be created, the stores
    /// cannot be opened, or the thresholds are inconsistent.
    pub fn from_config(config: &RubricflowConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .map_err(|e| Error::operation("create_data_dir", e))?;
        let (documents, queue_store) = open_stores(
            config.storage.backend,
            &config.database_path(),
            config.storage.document_cache_capacity,
        )?;
        let provider = build_provider(&config.llm)?;
        Self::with_parts(
            config.clone(),
            documents,
            queue_store,
            provider,
            Arc::new(SystemClock),
        )
    }

    /// Wires the services over explicit parts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the adaptation thresholds are
    /// inconsistent.
    pub fn with_parts(
        config: RubricflowConfig,
        documents: Arc<dyn DocumentStore>,
        queue_store: Arc<dyn QueueStore>,
        provider: Arc<dyn LlmProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.adaptation.thresholds.validate()?;

        let repository = Arc::new(
            RubricRepository::new(documents).with_max_cas_attempts(config.session.max_cas_attempts),
        );
        let queue = Arc::new(GenerationQueue::new(
            queue_store,
            Arc::clone(&clock),
            config.queue,
        ));
        let cache = Arc::new(TransportCache::new(
            config.cache.capacity,
            chrono::Duration::seconds(i64::try_from(config.cache.ttl_secs).unwrap_or(i64::MAX / 1000)),
            Arc::clone(&clock),
        ));
        let curriculum: Arc<dyn Curriculum> =
            Arc::new(StaticCurriculum::from_config(&config.curriculum));

        let adaptation = Arc::new(AdaptationEngine::new(
            Arc::clone(&repository),
            config.adaptation.thresholds.clone(),
            Arc::clone(&clock),
        ));
        let synthesis = Arc::new(ContentSynthesisService::new(
            Arc::clone(&repository),
            provider,
            Arc::clone(&adaptation),
            config.adaptation.dispatch,
            Arc::clone(&clock),
        ));
        let planner = Arc::new(RubricPlanner::new(
            Arc::clone(&repository),
            Arc::clone(&curriculum),
            Arc::clone(&clock),
            config.session.question_type.clone(),
        ));
        let preloader = Arc::new(PredictivePreloader::new(
            Arc::clone(&queue),
            Arc::clone(&cache),
            Arc::clone(&curriculum),
        ));
        let warmer = Arc::new(CacheWarmer::new(
            Arc::clone(&queue),
            Arc::clone(&cache),
            curriculum,
            config.warming.clone(),
            config.session.question_type.clone(),
        ));

        let sessions = SessionOrchestrator::new(
            Arc::clone(&repository),
            Arc::clone(&planner),
            Arc::clone(&synthesis),
            Arc::clone(&clock),
            config.session.default_subjects.clone(),
        )
        .with_question_type(config.session.question_type.clone())
        .with_preloader(Arc::clone(&preloader))
        .with_warmer(Arc::clone(&warmer));
        let pipeline = ContentPipeline::new(Arc::clone(&queue), Arc::clone(&cache));

        tracing::debug!(
            provider = synthesis.provider_name(),
            dispatch = config.adaptation.dispatch.as_str(),
            "services wired"
        );
        Ok(Self {
            config,
            clock,
            repository,
            queue,
            cache,
            adaptation,
            synthesis,
            planner,
            preloader,
            warmer,
            sessions,
            pipeline,
        })
    }

    /// Effective configuration.
    #[must_use]
    pub const fn config(&self) -> &RubricflowConfig {
        &self.config
    }

    /// Time source.
    #[must_use]
    pub const fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Typed document access.
    #[must_use]
    pub const fn repository(&self) -> &Arc<RubricRepository> {
        &self.repository
    }

    /// Pre-generation queue.
    #[must_use]
    pub const fn queue(&self) -> &Arc<GenerationQueue> {
        &self.queue
    }

    /// Transport cache.
    #[must_use]
    pub const fn cache(&self) -> &Arc<TransportCache> {
        &self.cache
    }

    /// Adaptation engine.
    #[must_use]
    pub const fn adaptation(&self) -> &Arc<AdaptationEngine> {
        &self.adaptation
    }

    /// Content synthesis.
    #[must_use]
    pub const fn synthesis(&self) -> &Arc<ContentSynthesisService> {
        &self.synthesis
    }

    /// Session planner.
    #[must_use]
    pub const fn planner(&self) -> &Arc<RubricPlanner> {
        &self.planner
    }

    /// Predictive preloader.
    #[must_use]
    pub const fn preloader(&self) -> &Arc<PredictivePreloader> {
        &self.preloader
    }

    /// Cache warmer.
    #[must_use]
    pub const fn warmer(&self) -> &Arc<CacheWarmer> {
        &self.warmer
    }

    /// Session lifecycle.
    #[must_use]
    pub const fn sessions(&self) -> &SessionOrchestrator {
        &self.sessions
    }

    /// Consumer read path.
    #[must_use]
    pub const fn pipeline(&self) -> &ContentPipeline {
        &self.pipeline
    }

    /// Dependencies for pre-generation workers.
    #[must_use]
    pub fn worker_deps(&self) -> WorkerDeps {
        WorkerDeps {
            queue: Arc::clone(&self.queue),
            cache: Arc::clone(&self.cache),
            synthesis: Arc::clone(&self.synthesis),
            planner: Arc::clone(&self.planner),
            poll_interval: Duration::from_millis(self.config.queue.poll_interval_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageBackend;
    use crate::services::AdaptationThresholds;
    use crate::services::test_support::CannedProvider;

    #[test]
    fn test_from_config_creates_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RubricflowConfig::default().with_data_dir(dir.path().join("nested"));
        config.storage.backend = StorageBackend::Sqlite;
        let services = ServiceContainer::from_config(&config).unwrap();
        assert!(config.database_path().exists());
        assert_eq!(services.queue().stats().unwrap().open(), 0);
    }

    #[test]
    fn test_inconsistent_thresholds_are_rejected() {
        let mut config = RubricflowConfig::default();
        config.adaptation.thresholds = AdaptationThresholds {
            developing_score: 95.0,
            ..AdaptationThresholds::default()
        };
        let (documents, queue) =
            open_stores(StorageBackend::Memory, std::path::Path::new("unused"), 0).unwrap();
        let result = ServiceContainer::with_parts(
            config,
            documents,
            queue,
            Arc::new(CannedProvider::valid()),
            Arc::new(SystemClock),
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
