//! Shared fixtures for the integration tests.

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use rubricflow::config::RubricflowConfig;
use rubricflow::models::DeviceType;
use rubricflow::services::{AdaptationDispatch, CreateSessionRequest, ServiceContainer};
use rubricflow::storage::{
    DocumentStore, MemoryDocumentStore, MemoryQueueStore, QueueStore, SqliteDocumentStore,
    SqliteQueueStore,
};
use rubricflow::{DeviceDescriptor, LlmProvider, ManualClock, Subject};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Answers every prompt with well-formed content for the requested container,
/// unless a fixed reply is set.
pub struct ScriptedProvider {
    calls: AtomicUsize,
    reply: Option<String>,
}

impl ScriptedProvider {
    pub fn valid() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            reply: None,
        })
    }

    pub fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            reply: Some(reply.to_string()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn complete(&self, prompt: &str) -> rubricflow::Result<String> {
        self.complete_with_system("", prompt)
    }

    fn complete_with_system(&self, _system: &str, user: &str) -> rubricflow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reply) = &self.reply {
            return Ok(reply.clone());
        }
        let payload = if user.contains("stations") {
            json!({
                "scenario": {"title": "The lighthouse puzzle"},
                "stations": [{"id": 1}, {"id": 2}, {"id": 3}, {"id": 4}],
            })
        } else if user.contains("worked") {
            json!({
                "examples": [{"id": 1}, {"id": 2}, {"id": 3}],
                "practice": [{"id": 1}, {"id": 2}],
                "assessment": {"prompt": "final check"},
            })
        } else {
            json!({
                "explanation": "Multiplication is repeated addition.",
                "practice": [{"id": 1}, {"id": 2}, {"id": 3}],
                "assessment": {"question": "What is 4 x 6?", "type": "multiple_choice"},
            })
        };
        Ok(format!("Here you go:\n```json\n{payload}\n```"))
    }
}

pub struct Harness {
    pub services: ServiceContainer,
    pub clock: Arc<ManualClock>,
}

pub fn config(dispatch: AdaptationDispatch) -> RubricflowConfig {
    let mut config = RubricflowConfig::default();
    config.adaptation.dispatch = dispatch;
    config.warming.enabled = false;
    config
}

pub fn memory_harness(provider: Arc<ScriptedProvider>, config: RubricflowConfig) -> Harness {
    build(
        provider,
        config,
        Arc::new(MemoryDocumentStore::new()),
        Arc::new(MemoryQueueStore::new()),
    )
}

pub fn sqlite_harness(
    provider: Arc<ScriptedProvider>,
    config: RubricflowConfig,
    db_path: &Path,
) -> Harness {
    build(
        provider,
        config,
        Arc::new(SqliteDocumentStore::new(db_path).unwrap()),
        Arc::new(SqliteQueueStore::new(db_path).unwrap()),
    )
}

fn build(
    provider: Arc<ScriptedProvider>,
    config: RubricflowConfig,
    documents: Arc<dyn DocumentStore>,
    queue: Arc<dyn QueueStore>,
) -> Harness {
    let clock = Arc::new(ManualClock::default());
    let services =
        ServiceContainer::with_parts(config, documents, queue, provider, clock.clone()).unwrap();
    Harness { services, clock }
}

pub fn request(session_id: &str, subjects: &[Subject]) -> CreateSessionRequest {
    CreateSessionRequest {
        session_id: session_id.to_string(),
        user_id: "student-7".to_string(),
        grade_level: "3".to_string(),
        subjects: subjects.to_vec(),
        device: DeviceDescriptor::new("laptop-a", DeviceType::Desktop),
        story: None,
    }
}
