//! Configuration management.
//!
//! Resolution order, later wins:
//! 1. built-in defaults
//! 2. the TOML file (explicit path, or `rubricflow/config.toml` in the platform
//!    config dir)
//! 3. `.env` (loaded by `dotenvy`) and `RUBRICFLOW_*` environment variables

mod file;

pub use file::ConfigFile;

use crate::models::{ContainerType, Subject};
use crate::services::{AdaptationDispatch, AdaptationThresholds};
use crate::storage::StorageBackend;
use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Main configuration for rubricflow.
#[derive(Debug, Clone)]
pub struct RubricflowConfig {
    /// Directory holding the database and logs.
    pub data_dir: PathBuf,
    /// Storage backends.
    pub storage: StorageConfig,
    /// Generation provider.
    pub llm: LlmConfig,
    /// Pre-generation queue.
    pub queue: QueueConfig,
    /// Transport cache.
    pub cache: CacheConfig,
    /// Adaptation engine.
    pub adaptation: AdaptationConfig,
    /// Cache warming.
    pub warming: WarmingConfig,
    /// Curriculum skills.
    pub curriculum: CurriculumConfig,
    /// Session orchestration.
    pub session: SessionConfig,
    /// Logging and metrics.
    pub observability: ObservabilityConfig,
    /// File the configuration was read from, if any.
    pub source: Option<PathBuf>,
}

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Backend for documents and the queue.
    pub backend: StorageBackend,
    /// Database file name, relative to the data directory.
    pub database: String,
    /// Documents held by the read cache; 0 disables it.
    pub document_cache_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            database: "rubricflow.db".to_string(),
            document_cache_capacity: 1024,
        }
    }
}

/// Available generation providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LlmProviderKind {
    /// Anthropic Messages API.
    #[default]
    Anthropic,
    /// `OpenAI` Chat Completions API.
    OpenAi,
}

impl LlmProviderKind {
    /// Parses a provider name; unknown names fall back to Anthropic.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "openai" | "open_ai" | "open-ai" => Self::OpenAi,
            _ => Self::Anthropic,
        }
    }

    /// Canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
        }
    }

    /// Environment variable the provider's key is conventionally read from.
    #[must_use]
    pub const fn api_key_env(self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
        }
    }
}

/// Generation provider configuration.
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    /// Provider.
    pub provider: LlmProviderKind,
    /// Model name; provider default when unset.
    pub model: Option<String>,
    /// API key.
    pub api_key: Option<SecretString>,
    /// Base URL override.
    pub base_url: Option<String>,
    /// Response token limit.
    pub max_tokens: Option<u32>,
    /// Request timeout.
    pub timeout_ms: Option<u64>,
    /// Connect timeout.
    pub connect_timeout_ms: Option<u64>,
    /// Retries for timed-out calls.
    pub max_retries: Option<u32>,
    /// Backoff between retries.
    pub retry_backoff_ms: Option<u64>,
    /// Failures before the breaker opens.
    pub breaker_failure_threshold: Option<u32>,
    /// How long the breaker stays open.
    pub breaker_reset_ms: Option<u64>,
    /// Trial calls while half-open.
    pub breaker_half_open_max_calls: Option<u32>,
    /// Latency budget.
    pub latency_slo_ms: Option<u64>,
}

/// Queue configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Retries before an item is permanently failed.
    pub max_retries: u32,
    /// Idle poll interval.
    pub poll_interval_ms: u64,
    /// Processing lease.
    pub lease_secs: u64,
    /// Worker threads for `worker --workers`.
    pub workers: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            poll_interval_ms: 500,
            lease_secs: 120,
            workers: 1,
        }
    }
}

/// Transport cache configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum records.
    pub capacity: usize,
    /// Record lifetime.
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            ttl_secs: 3600,
        }
    }
}

/// Adaptation configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdaptationConfig {
    /// Where completion-time adaptation runs.
    pub dispatch: AdaptationDispatch,
    /// Classification thresholds.
    pub thresholds: AdaptationThresholds,
}

/// Cache warming configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmingConfig {
    /// Enables warming at session start.
    pub enabled: bool,
    /// Skills sampled per subject.
    pub sample_size: usize,
    /// Subjects to warm; empty means the session's subjects.
    pub subjects: Vec<Subject>,
    /// Container warmed items are generated for.
    pub container: ContainerType,
    /// Seed for reproducible samples.
    pub seed: Option<u64>,
}

impl Default for WarmingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_size: 3,
            subjects: Vec::new(),
            container: ContainerType::Learn,
            seed: None,
        }
    }
}

/// Curriculum configuration: grade → subject → ordered skill ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurriculumConfig {
    /// Skills per grade and subject.
    pub grades: BTreeMap<String, BTreeMap<Subject, Vec<String>>>,
}

impl Default for CurriculumConfig {
    fn default() -> Self {
        let grade_three: BTreeMap<Subject, Vec<String>> = [
            (
                Subject::Math,
                &["3.OA.1", "3.OA.2", "3.OA.3", "3.NF.1", "3.NF.2", "3.MD.1"][..],
            ),
            (
                Subject::Ela,
                &["RL.3.1", "RL.3.2", "RL.3.3", "RI.3.1", "RI.3.2", "L.3.4"][..],
            ),
            (
                Subject::Science,
                &["3-LS1-1", "3-LS3-1", "3-LS4-3", "3-PS2-1", "3-ESS2-1"][..],
            ),
            (
                Subject::SocialStudies,
                &["SS.3.1", "SS.3.2", "SS.3.3", "SS.3.4"][..],
            ),
        ]
        .into_iter()
        .map(|(subject, skills)| {
            (
                subject,
                skills.iter().map(|s| (*s).to_string()).collect::<Vec<_>>(),
            )
        })
        .collect();

        Self {
            grades: BTreeMap::from([("3".to_string(), grade_three)]),
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Subjects planned when a request names none.
    pub default_subjects: Vec<Subject>,
    /// Compare-and-swap attempts per mutation.
    pub max_cas_attempts: u32,
    /// Question style used for queue targets.
    pub question_type: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_subjects: Subject::ALL.to_vec(),
            max_cas_attempts: 8,
            question_type: "multiple_choice".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Parses a format name; unknown names fall back to pretty.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservabilityConfig {
    /// Log format.
    pub log_format: LogFormat,
    /// Filter directive; `RUBRICFLOW_LOG` or `RUST_LOG` win when set.
    pub log_level: Option<String>,
    /// Log file; stderr when unset.
    pub log_file: Option<PathBuf>,
    /// Installs the Prometheus exporter.
    pub metrics_enabled: bool,
    /// Scrape endpoint address.
    pub metrics_listen: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            log_level: None,
            log_file: None,
            metrics_enabled: false,
            metrics_listen: "127.0.0.1:9464".to_string(),
        }
    }
}

impl Default for RubricflowConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            storage: StorageConfig::default(),
            llm: LlmConfig::default(),
            queue: QueueConfig::default(),
            cache: CacheConfig::default(),
            adaptation: AdaptationConfig::default(),
            warming: WarmingConfig::default(),
            curriculum: CurriculumConfig::default(),
            session: SessionConfig::default(),
            observability: ObservabilityConfig::default(),
            source: None,
        }
    }
}

fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "rubricflow")
        .map_or_else(|| PathBuf::from(".rubricflow"), |dirs| dirs.data_dir().to_path_buf())
}

impl RubricflowConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from `path`, then applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| Error::operation("read_config_file", e))?;
        let file: ConfigFile =
            toml::from_str(&contents).map_err(|e| Error::operation("parse_config_file", e))?;
        let mut config = Self::from_config_file(file)?;
        config.source = Some(path.to_path_buf());
        Ok(config.with_env_overrides())
    }

    /// Loads configuration from the default location.
    ///
    /// Checks `rubricflow/config.toml` under the platform config dir and then
    /// under `~/.config`. Falls back to defaults when neither exists or parses.
    /// Environment overrides apply in every case.
    #[must_use]
    pub fn load_default() -> Self {
        let _ = dotenvy::dotenv();
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default().with_env_overrides();
        };

        let candidates = [
            base_dirs.config_dir().join("rubricflow").join("config.toml"),
            base_dirs
                .home_dir()
                .join(".config")
                .join("rubricflow")
                .join("config.toml"),
        ];
        for path in candidates.iter().filter(|p| p.exists()) {
            match Self::load_from_file(path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable config file");
                },
            }
        }
        Self::default().with_env_overrides()
    }

    /// Loads from `path` when given, otherwise from the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit path cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let _ = dotenvy::dotenv();
                Self::load_from_file(path)
            },
            None => Ok(Self::load_default()),
        }
    }

    /// Merges a parsed file over the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for unknown subject or container names.
    pub fn from_config_file(file: ConfigFile) -> Result<Self> {
        let mut config = Self::default();

        if let Some(data_dir) = file.data_dir {
            config.data_dir = PathBuf::from(data_dir);
        }
        if let Some(storage) = file.storage {
            if let Some(backend) = storage.backend {
                config.storage.backend = parse_backend(&backend)?;
            }
            if let Some(database) = storage.database {
                config.storage.database = database;
            }
            if let Some(capacity) = storage.document_cache_capacity {
                config.storage.document_cache_capacity = capacity;
            }
        }
        if let Some(llm) = file.llm {
            if let Some(provider) = llm.provider {
                config.llm.provider = LlmProviderKind::parse(&provider);
            }
            config.llm.model = llm.model;
            config.llm.api_key = llm
                .api_key
                .and_then(|key| expand_env_reference(&key))
                .map(SecretString::from);
            config.llm.base_url = llm.base_url;
            config.llm.max_tokens = llm.max_tokens;
            config.llm.timeout_ms = llm.timeout_ms;
            config.llm.connect_timeout_ms = llm.connect_timeout_ms;
            config.llm.max_retries = llm.max_retries;
            config.llm.retry_backoff_ms = llm.retry_backoff_ms;
            config.llm.breaker_failure_threshold = llm.breaker_failure_threshold;
            config.llm.breaker_reset_ms = llm.breaker_reset_ms;
            config.llm.breaker_half_open_max_calls = llm.breaker_half_open_max_calls;
            config.llm.latency_slo_ms = llm.latency_slo_ms;
        }
        if let Some(queue) = file.queue {
            if let Some(v) = queue.max_retries {
                config.queue.max_retries = v;
            }
            if let Some(v) = queue.poll_interval_ms {
                config.queue.poll_interval_ms = v;
            }
            if let Some(v) = queue.lease_secs {
                config.queue.lease_secs = v.max(1);
            }
            if let Some(v) = queue.workers {
                config.queue.workers = v.max(1);
            }
        }
        if let Some(cache) = file.cache {
            if let Some(v) = cache.capacity {
                config.cache.capacity = v.max(1);
            }
            if let Some(v) = cache.ttl_secs {
                config.cache.ttl_secs = v;
            }
        }
        if let Some(adaptation) = file.adaptation {
            Self::merge_adaptation(&mut config.adaptation, adaptation)?;
        }
        if let Some(warming) = file.warming {
            if let Some(v) = warming.enabled {
                config.warming.enabled = v;
            }
            if let Some(v) = warming.sample_size {
                config.warming.sample_size = v;
            }
            if let Some(subjects) = warming.subjects {
                config.warming.subjects = parse_subjects(&subjects)?;
            }
            if let Some(container) = warming.container {
                config.warming.container = parse_container(&container)?;
            }
            config.warming.seed = warming.seed;
        }
        if let Some(grades) = file.curriculum.and_then(|c| c.grades) {
            let mut parsed = BTreeMap::new();
            for (grade, subjects) in grades {
                let mut by_subject = BTreeMap::new();
                for (subject, skills) in subjects {
                    by_subject.insert(parse_subject(&subject)?, skills);
                }
                parsed.insert(grade, by_subject);
            }
            config.curriculum.grades = parsed;
        }
        if let Some(session) = file.session {
            if let Some(subjects) = session.default_subjects {
                config.session.default_subjects = parse_subjects(&subjects)?;
            }
            if let Some(v) = session.max_cas_attempts {
                config.session.max_cas_attempts = v.max(1);
            }
            if let Some(v) = session.question_type {
                config.session.question_type = v;
            }
        }
        if let Some(observability) = file.observability {
            if let Some(v) = observability.log_format {
                config.observability.log_format = LogFormat::parse(&v);
            }
            config.observability.log_level = observability.log_level;
            config.observability.log_file = observability.log_file.map(PathBuf::from);
            if let Some(metrics) = observability.metrics {
                if let Some(v) = metrics.enabled {
                    config.observability.metrics_enabled = v;
                }
                if let Some(v) = metrics.listen {
                    config.observability.metrics_listen = v;
                }
            }
        }

        Ok(config)
    }

    fn merge_adaptation(target: &mut AdaptationConfig, file: file::ConfigFileAdaptation) -> Result<()> {
        if let Some(dispatch) = file.dispatch {
            target.dispatch = AdaptationDispatch::parse(&dispatch).ok_or_else(|| {
                Error::InvalidInput(format!("unknown adaptation dispatch '{dispatch}'"))
            })?;
        }
        let t = &mut target.thresholds;
        if let Some(v) = file.mastery_score {
            t.mastery_score = v;
        }
        if let Some(v) = file.proficient_score {
            t.proficient_score = v;
        }
        if let Some(v) = file.developing_score {
            t.developing_score = v;
        }
        if let Some(v) = file.high_attempts {
            t.high_attempts = v.max(1);
        }
        if let Some(v) = file.fast_time_secs {
            t.fast_time_secs = v;
        }
        if let Some(v) = file.fast_score {
            t.fast_score = v;
        }
        if let Some(v) = file.slow_time_secs {
            t.slow_time_secs = v;
        }
        if let Some(v) = file.consistency_window {
            t.consistency_window = v.max(2);
        }
        if let Some(v) = file.consistent_variance {
            t.consistent_variance = v;
        }
        if let Some(v) = file.mastery_time_limit_secs {
            t.mastery_time_limit_secs = v;
        }
        if let Some(v) = file.slow_time_extension_secs {
            t.slow_time_extension_secs = v;
        }
        t.validate()
    }

    /// Applies `RUBRICFLOW_*` overrides from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Applies overrides read through `lookup`.
    ///
    /// The provider's conventional key variable (`ANTHROPIC_API_KEY`,
    /// `OPENAI_API_KEY`) is used when no key is configured.
    #[must_use]
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("RUBRICFLOW_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(backend) = lookup("RUBRICFLOW_STORAGE_BACKEND").and_then(|v| parse_backend(&v).ok()) {
            self.storage.backend = backend;
        }
        if let Some(v) = lookup("RUBRICFLOW_LLM_PROVIDER") {
            self.llm.provider = LlmProviderKind::parse(&v);
        }
        if let Some(v) = lookup("RUBRICFLOW_LLM_MODEL") {
            self.llm.model = Some(v);
        }
        if let Some(v) = lookup("RUBRICFLOW_LLM_BASE_URL") {
            self.llm.base_url = Some(v);
        }
        if let Some(v) = lookup("RUBRICFLOW_LLM_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.llm.timeout_ms = Some(v);
        }
        if let Some(v) = lookup("RUBRICFLOW_LLM_MAX_RETRIES").and_then(|v| v.parse().ok()) {
            self.llm.max_retries = Some(v);
        }
        if let Some(key) = lookup("RUBRICFLOW_LLM_API_KEY") {
            self.llm.api_key = Some(SecretString::from(key));
        } else if self.llm.api_key.is_none() {
            self.llm.api_key = lookup(self.llm.provider.api_key_env()).map(SecretString::from);
        }
        if let Some(v) = lookup("RUBRICFLOW_QUEUE_WORKERS").and_then(|v| v.parse::<usize>().ok()) {
            self.queue.workers = v.max(1);
        }
        if let Some(v) = lookup("RUBRICFLOW_QUEUE_MAX_RETRIES").and_then(|v| v.parse().ok()) {
            self.queue.max_retries = v;
        }
        if let Some(v) = lookup("RUBRICFLOW_CACHE_TTL_SECS").and_then(|v| v.parse().ok()) {
            self.cache.ttl_secs = v;
        }
        if let Some(v) = lookup("RUBRICFLOW_ADAPTATION_DISPATCH").and_then(|v| AdaptationDispatch::parse(&v)) {
            self.adaptation.dispatch = v;
        }
        if let Some(v) = lookup("RUBRICFLOW_LOG_FORMAT") {
            self.observability.log_format = LogFormat::parse(&v);
        }
        if let Some(v) = lookup("RUBRICFLOW_METRICS_ENABLED") {
            self.observability.metrics_enabled = matches!(v.trim(), "1" | "true" | "yes");
        }
        self
    }

    /// Sets the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    /// Full path of the `SQLite` database.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.storage.database)
    }

    /// Renders the effective configuration as TOML, with the API key redacted.
    #[must_use]
    pub fn to_display_toml(&self) -> String {
        let key = self.llm.api_key.as_ref().map_or("(unset)", |k| {
            if k.expose_secret().is_empty() {
                "(empty)"
            } else {
                "***REDACTED***"
            }
        });
        let subjects = |list: &[Subject]| {
            list.iter()
                .map(|s| format!("\"{s}\""))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let t = &self.adaptation.thresholds;
        format!(
            "data_dir = \"{data_dir}\"\n\n\
             [storage]\nbackend = \"{backend:?}\"\ndatabase = \"{database}\"\ndocument_cache_capacity = {doc_cache}\n\n\
             [llm]\nprovider = \"{provider}\"\nmodel = \"{model}\"\napi_key = \"{key}\"\n\n\
             [queue]\nmax_retries = {max_retries}\npoll_interval_ms = {poll}\nlease_secs = {lease}\nworkers = {workers}\n\n\
             [cache]\ncapacity = {capacity}\nttl_secs = {ttl}\n\n\
             [adaptation]\ndispatch = \"{dispatch}\"\nmastery_score = {mastery}\nproficient_score = {proficient}\ndeveloping_score = {developing}\nhigh_attempts = {high_attempts}\n\n\
             [warming]\nenabled = {warm_enabled}\nsample_size = {sample}\nsubjects = [{warm_subjects}]\n\n\
             [session]\ndefault_subjects = [{default_subjects}]\nmax_cas_attempts = {cas}\n",
            data_dir = self.data_dir.display(),
            backend = self.storage.backend,
            database = self.storage.database,
            doc_cache = self.storage.document_cache_capacity,
            provider = self.llm.provider.as_str(),
            model = self.llm.model.as_deref().unwrap_or("(provider default)"),
            max_retries = self.queue.max_retries,
            poll = self.queue.poll_interval_ms,
            lease = self.queue.lease_secs,
            workers = self.queue.workers,
            capacity = self.cache.capacity,
            ttl = self.cache.ttl_secs,
            dispatch = self.adaptation.dispatch.as_str(),
            mastery = t.mastery_score,
            proficient = t.proficient_score,
            developing = t.developing_score,
            high_attempts = t.high_attempts,
            warm_enabled = self.warming.enabled,
            sample = self.warming.sample_size,
            warm_subjects = subjects(&self.warming.subjects),
            default_subjects = subjects(&self.session.default_subjects),
            cas = self.session.max_cas_attempts,
        )
    }
}

/// Expands a `${VAR}` reference; other values are returned unchanged.
///
/// Returns `None` when the referenced variable is unset or empty.
fn expand_env_reference(value: &str) -> Option<String> {
    let trimmed = value.trim();
    match trimmed.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
        Some(var) => std::env::var(var).ok().filter(|v| !v.is_empty()),
        None => Some(trimmed.to_string()),
    }
}

fn parse_backend(value: &str) -> Result<StorageBackend> {
    match value.trim().to_lowercase().as_str() {
        "sqlite" => Ok(StorageBackend::Sqlite),
        "memory" => Ok(StorageBackend::Memory),
        other => Err(Error::InvalidInput(format!("unknown storage backend '{other}'"))),
    }
}

fn parse_subject(value: &str) -> Result<Subject> {
    Subject::parse(value).ok_or_else(|| Error::InvalidInput(format!("unknown subject '{value}'")))
}

fn parse_subjects(values: &[String]) -> Result<Vec<Subject>> {
    values.iter().map(|v| parse_subject(v)).collect()
}

fn parse_container(value: &str) -> Result<ContainerType> {
    ContainerType::parse(value)
        .ok_or_else(|| Error::InvalidInput(format!("unknown container '{value}'")))
}
