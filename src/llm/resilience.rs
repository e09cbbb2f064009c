//! Provider wrapper with timeout retries and a circuit breaker.

use super::LlmProvider;
use crate::config::LlmConfig;
use crate::{Error, GenerationStage, Result};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Resilience configuration for provider calls.
#[derive(Debug, Clone)]
pub struct LlmResilienceConfig {
    /// Maximum number of retries for timed-out calls.
    pub max_retries: u32,
    /// Backoff between retries in milliseconds.
    pub retry_backoff_ms: u64,
    /// Consecutive failures before opening the circuit.
    pub breaker_failure_threshold: u32,
    /// How long to keep the circuit open before half-open.
    pub breaker_reset_timeout_ms: u64,
    /// Maximum trial calls while half-open.
    pub breaker_half_open_max_calls: u32,
    /// Latency budget in milliseconds.
    pub latency_slo_ms: u64,
}

impl Default for LlmResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            retry_backoff_ms: 250,
            breaker_failure_threshold: 5,
            breaker_reset_timeout_ms: 30_000,
            breaker_half_open_max_calls: 1,
            latency_slo_ms: 20_000,
        }
    }
}

impl LlmResilienceConfig {
    /// Loads resilience configuration from config file settings.
    #[must_use]
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut settings = Self::default();
        if let Some(max_retries) = config.max_retries {
            settings.max_retries = max_retries;
        }
        if let Some(retry_backoff_ms) = config.retry_backoff_ms {
            settings.retry_backoff_ms = retry_backoff_ms;
        }
        if let Some(threshold) = config.breaker_failure_threshold {
            settings.breaker_failure_threshold = threshold.max(1);
        }
        if let Some(reset_ms) = config.breaker_reset_ms {
            settings.breaker_reset_timeout_ms = reset_ms;
        }
        if let Some(half_open) = config.breaker_half_open_max_calls {
            settings.breaker_half_open_max_calls = half_open.max(1);
        }
        if let Some(latency_slo_ms) = config.latency_slo_ms {
            settings.latency_slo_ms = latency_slo_ms;
        }
        settings
    }
}

#[derive(Debug)]
enum BreakerState {
    Closed { failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { attempts: u32 },
}

#[derive(Debug)]
struct CircuitBreaker {
    state: BreakerState,
    failure_threshold: u32,
    reset_timeout: Duration,
    half_open_max_calls: u32,
}

impl CircuitBreaker {
    fn new(config: &LlmResilienceConfig) -> Self {
        Self {
            state: BreakerState::Closed { failures: 0 },
            failure_threshold: config.breaker_failure_threshold.max(1),
            reset_timeout: Duration::from_millis(config.breaker_reset_timeout_ms),
            half_open_max_calls: config.breaker_half_open_max_calls.max(1),
        }
    }

    fn allow(&mut self) -> bool {
        match self.state {
            BreakerState::Closed { .. } => true,
            BreakerState::Open { opened_at } => {
                if opened_at.elapsed() >= self.reset_timeout {
                    self.state = BreakerState::HalfOpen { attempts: 1 };
                    true
                } else {
                    false
                }
            },
            BreakerState::HalfOpen { ref mut attempts } => {
                if *attempts >= self.half_open_max_calls {
                    false
                } else {
                    *attempts += 1;
                    true
                }
            },
        }
    }

    const fn on_success(&mut self) {
        self.state = BreakerState::Closed { failures: 0 };
    }

    /// Records a failure; returns true when this failure opened the circuit.
    fn on_failure(&mut self) -> bool {
        match self.state {
            BreakerState::Closed { ref mut failures } => {
                *failures += 1;
                if *failures >= self.failure_threshold {
                    self.state = BreakerState::Open {
                        opened_at: Instant::now(),
                    };
                    return true;
                }
            },
            BreakerState::HalfOpen { .. } => {
                self.state = BreakerState::Open {
                    opened_at: Instant::now(),
                };
                return true;
            },
            BreakerState::Open { .. } => {},
        }
        false
    }

    const fn state_value(&self) -> u8 {
        match self.state {
            BreakerState::Closed { .. } => 0,
            BreakerState::Open { .. } => 1,
            BreakerState::HalfOpen { .. } => 2,
        }
    }
}

/// Provider wrapper that retries timeouts and stops calling a failing provider.
///
/// Only timeouts are retried here. Other provider failures surface at once so
/// the queue can schedule its own retry with a fresh claim.
pub struct ResilientLlmProvider<P: LlmProvider> {
    inner: P,
    config: LlmResilienceConfig,
    breaker: Mutex<CircuitBreaker>,
}

impl<P: LlmProvider> ResilientLlmProvider<P> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: P, config: LlmResilienceConfig) -> Self {
        let breaker = CircuitBreaker::new(&config);
        Self {
            inner,
            config,
            breaker: Mutex::new(breaker),
        }
    }

    /// Returns the wrapped provider.
    pub const fn inner(&self) -> &P {
        &self.inner
    }

    fn lock_breaker(&self) -> std::sync::MutexGuard<'_, CircuitBreaker> {
        self.breaker
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn execute<F>(&self, operation: &'static str, mut call: F) -> Result<String>
    where
        F: FnMut() -> Result<String>,
    {
        let provider: &'static str = self.inner.name();
        let span = tracing::info_span!(
            "llm.request",
            provider = provider,
            operation = operation,
            status = tracing::field::Empty
        );
        let _enter = span.enter();

        let (allowed, state) = {
            let mut breaker = self.lock_breaker();
            (breaker.allow(), breaker.state_value())
        };
        record_breaker_state(provider, state);
        if !allowed {
            span.record("status", "circuit_open");
            metrics::counter!(
                "llm_requests_total",
                "provider" => provider,
                "operation" => operation,
                "status" => "circuit_open"
            )
            .increment(1);
            return Err(Error::provider(format!("{provider}: circuit breaker open")));
        }

        let max_attempts = self.config.max_retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let started = Instant::now();
            let result = call();
            let elapsed = started.elapsed();

            match result {
                Ok(text) => {
                    self.record_request(provider, operation, elapsed, "success");
                    let state = {
                        let mut breaker = self.lock_breaker();
                        breaker.on_success();
                        breaker.state_value()
                    };
                    record_breaker_state(provider, state);
                    span.record("status", "success");
                    return Ok(text);
                },
                Err(err) => {
                    let is_timeout = is_timeout_error(&err);
                    let status = if is_timeout { "timeout" } else { "error" };
                    self.record_request(provider, operation, elapsed, status);
                    span.record("status", status);
                    self.trip_on_failure(provider, operation);

                    if !is_timeout || attempt >= max_attempts {
                        return Err(err);
                    }
                    metrics::counter!(
                        "llm_retries_total",
                        "provider" => provider,
                        "operation" => operation
                    )
                    .increment(1);
                    tracing::warn!(
                        provider,
                        operation,
                        attempt,
                        elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                        "Retrying timed out LLM call"
                    );
                    if self.config.retry_backoff_ms > 0 {
                        std::thread::sleep(Duration::from_millis(self.config.retry_backoff_ms));
                    }
                },
            }
        }
    }

    fn trip_on_failure(&self, provider: &'static str, operation: &'static str) {
        let (tripped, state) = {
            let mut breaker = self.lock_breaker();
            (breaker.on_failure(), breaker.state_value())
        };
        record_breaker_state(provider, state);
        if tripped {
            metrics::counter!(
                "llm_circuit_breaker_trips_total",
                "provider" => provider,
                "operation" => operation
            )
            .increment(1);
            tracing::warn!(provider, operation, "LLM circuit breaker opened");
        }
    }

    fn record_request(
        &self,
        provider: &'static str,
        operation: &'static str,
        elapsed: Duration,
        status: &'static str,
    ) {
        metrics::counter!(
            "llm_requests_total",
            "provider" => provider,
            "operation" => operation,
            "status" => status
        )
        .increment(1);
        metrics::histogram!(
            "llm_request_duration_ms",
            "provider" => provider,
            "operation" => operation,
            "status" => status
        )
        .record(elapsed.as_secs_f64() * 1000.0);

        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        if self.config.latency_slo_ms > 0 && elapsed_ms > self.config.latency_slo_ms {
            metrics::counter!(
                "llm_latency_budget_exceeded_total",
                "provider" => provider,
                "operation" => operation
            )
            .increment(1);
        }
    }
}

fn record_breaker_state(provider: &'static str, state: u8) {
    metrics::gauge!("llm_circuit_breaker_state", "provider" => provider).set(f64::from(state));
}

impl<P: LlmProvider> LlmProvider for ResilientLlmProvider<P> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        self.execute("complete", || self.inner.complete(prompt))
    }

    fn complete_with_system(&self, system: &str, user: &str) -> Result<String> {
        self.execute("complete_with_system", || {
            self.inner.complete_with_system(system, user)
        })
    }
}

fn is_timeout_error(err: &Error) -> bool {
    match err {
        Error::GenerationFailure {
            stage: GenerationStage::Provider,
            cause,
        }
        | Error::OperationFailed { cause, .. } => {
            let lower = cause.to_lowercase();
            lower.contains("timeout")
                || lower.contains("timed out")
                || lower.contains("deadline")
                || lower.contains("elapsed")
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Scripted {
        calls: AtomicU32,
        fail_first: u32,
        cause: &'static str,
    }

    impl Scripted {
        const fn new(fail_first: u32, cause: &'static str) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_first,
                cause,
            }
        }
    }

    impl LlmProvider for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn complete(&self, _prompt: &str) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(Error::provider(self.cause))
            } else {
                Ok("{}".to_string())
            }
        }
    }

    fn config(max_retries: u32, threshold: u32) -> LlmResilienceConfig {
        LlmResilienceConfig {
            max_retries,
            retry_backoff_ms: 0,
            breaker_failure_threshold: threshold,
            breaker_reset_timeout_ms: 60_000,
            ..LlmResilienceConfig::default()
        }
    }

    #[test]
    fn test_timeouts_are_retried() {
        let provider = ResilientLlmProvider::new(
            Scripted::new(2, "anthropic: timeout error: operation timed out"),
            config(2, 10),
        );
        assert_eq!(provider.complete_with_system("s", "u").unwrap(), "{}");
        assert_eq!(provider.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_other_errors_fail_fast() {
        let provider = ResilientLlmProvider::new(
            Scripted::new(1, "API returned status: 400"),
            config(3, 10),
        );
        assert!(provider.complete("p").is_err());
        assert_eq!(provider.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_breaker_opens_after_threshold() {
        let provider =
            ResilientLlmProvider::new(Scripted::new(u32::MAX, "status: 500"), config(0, 2));
        assert!(provider.complete("p").is_err());
        assert!(provider.complete("p").is_err());

        let err = provider.complete("p").unwrap_err();
        assert!(err.to_string().contains("circuit breaker open"));
        assert_eq!(provider.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_breaker_half_opens_after_reset() {
        let provider = ResilientLlmProvider::new(
            Scripted::new(1, "status: 500"),
            LlmResilienceConfig {
                breaker_reset_timeout_ms: 0,
                ..config(0, 1)
            },
        );
        assert!(provider.complete("p").is_err());
        assert_eq!(provider.complete("p").unwrap(), "{}");
        assert_eq!(provider.lock_breaker().state_value(), 0);
    }

    #[test]
    fn test_timeout_detection() {
        assert!(is_timeout_error(&Error::provider("request timed out")));
        assert!(!is_timeout_error(&Error::InvalidInput("timeout".to_string())));
        assert!(!is_timeout_error(&Error::GenerationFailure {
            stage: GenerationStage::Parse,
            cause: "timeout".to_string(),
        }));
    }
}
