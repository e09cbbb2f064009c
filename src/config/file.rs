//! On-disk TOML layout.
//!
//! Every field is optional; [`super::RubricflowConfig::from_config_file`] merges
//! what is present over the defaults.

use serde::Deserialize;
use std::collections::BTreeMap;

/// Configuration file structure.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Data directory.
    pub data_dir: Option<String>,
    /// Storage section.
    pub storage: Option<ConfigFileStorage>,
    /// LLM section.
    pub llm: Option<ConfigFileLlm>,
    /// Queue section.
    pub queue: Option<ConfigFileQueue>,
    /// Transport cache section.
    pub cache: Option<ConfigFileCache>,
    /// Adaptation section.
    pub adaptation: Option<ConfigFileAdaptation>,
    /// Cache warming section.
    pub warming: Option<ConfigFileWarming>,
    /// Curriculum section.
    pub curriculum: Option<ConfigFileCurriculum>,
    /// Session section.
    pub session: Option<ConfigFileSession>,
    /// Observability section.
    pub observability: Option<ConfigFileObservability>,
}

/// `[storage]`.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileStorage {
    /// `"sqlite"` or `"memory"`.
    pub backend: Option<String>,
    /// File name of the database inside the data directory.
    pub database: Option<String>,
    /// Documents held by the read cache (0 disables it).
    pub document_cache_capacity: Option<usize>,
}

/// `[llm]`.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileLlm {
    /// Provider name.
    pub provider: Option<String>,
    /// Model name.
    pub model: Option<String>,
    /// API key, or a `${VAR}` reference to one.
    pub api_key: Option<String>,
    /// Base URL.
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

/// `[queue]`.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileQueue {
    /// Retries before an item is permanently failed.
    pub max_retries: Option<u32>,
    /// Idle poll interval.
    pub poll_interval_ms: Option<u64>,
    /// Processing lease.
    pub lease_secs: Option<u64>,
    /// Worker threads.
    pub workers: Option<usize>,
}

/// `[cache]`.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileCache {
    /// Maximum records.
    pub capacity: Option<usize>,
    /// Record lifetime.
    pub ttl_secs: Option<u64>,
}

/// `[adaptation]`.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileAdaptation {
    /// `"inline"` or `"detached"`.
    pub dispatch: Option<String>,
    /// Minimum score of the mastery band.
    pub mastery_score: Option<f64>,
    /// Minimum score of the proficient band.
    pub proficient_score: Option<f64>,
    /// Minimum score of the developing band.
    pub developing_score: Option<f64>,
    /// Attempts that raise support one step.
    pub high_attempts: Option<u32>,
    /// Average seconds per unit below which a student may be fast.
    pub fast_time_secs: Option<u64>,
    /// Average score above which a quick student is fast.
    pub fast_score: Option<f64>,
    /// Average seconds per unit above which a student is slow.
    pub slow_time_secs: Option<u64>,
    /// Scores considered by the consistency classifier.
    pub consistency_window: Option<usize>,
    /// Variance at or below which scores are consistent.
    pub consistent_variance: Option<f64>,
    /// Time limit for the mastery band.
    pub mastery_time_limit_secs: Option<u64>,
    /// Extra time given to slow students.
    pub slow_time_extension_secs: Option<u64>,
}

/// `[warming]`.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileWarming {
    /// Enables warming at session start.
    pub enabled: Option<bool>,
    /// Skills sampled per subject.
    pub sample_size: Option<usize>,
    /// Subjects to warm.
    pub subjects: Option<Vec<String>>,
    /// Container warmed items are generated for.
    pub container: Option<String>,
    /// Seed for reproducible samples.
    pub seed: Option<u64>,
}

/// `[curriculum]`.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileCurriculum {
    /// Grade → subject → ordered skill ids.
    pub grades: Option<BTreeMap<String, BTreeMap<String, Vec<String>>>>,
}

/// `[session]`.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileSession {
    /// Subjects planned when a request names none.
    pub default_subjects: Option<Vec<String>>,
    /// Compare-and-swap attempts per mutation.
    pub max_cas_attempts: Option<u32>,
    /// Question style used for queue targets.
    pub question_type: Option<String>,
}

/// `[observability]`.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileObservability {
    /// `"pretty"` or `"json"`.
    pub log_format: Option<String>,
    /// Filter directive, e.g. `"info,rubricflow=debug"`.
    pub log_level: Option<String>,
    /// Log file path.
    pub log_file: Option<String>,
    /// Metrics exporter.
    pub metrics: Option<ConfigFileMetrics>,
}

/// `[observability.metrics]`.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileMetrics {
    /// Installs the Prometheus exporter.
    pub enabled: Option<bool>,
    /// Listen address of the scrape endpoint.
    pub listen: Option<String>,
}
