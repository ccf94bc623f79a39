//! Retry logic with exponential backoff and circuit breaking.
//!
//! Shared by the LLM call manager (§4.8, provider-level backoff) and the
//! batch orchestrator's per-company scrape retry loop (§4.11). Both only
//! differ in their [`RetryPolicy`] values and in which [`PipelineError`]
//! variants they consider retryable, which is why `should_retry` is a
//! closure supplied by the caller rather than hardcoded here.

use crate::error::PipelineError;
use crate::logging::{log_debug, log_error, log_warn};

use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Retry policy configuration shared across subsystems.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub total_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(16),
            backoff_multiplier: 2.0,
            total_timeout: Duration::from_secs(300),
            request_timeout: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// `5 * 2^attempt` backoff used by the LLM call manager (§4.8).
    pub fn llm_call_manager() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            total_timeout: Duration::from_secs(180),
            request_timeout: Duration::from_secs(120),
        }
    }

    /// `2^(attempt+1)` backoff used by the per-company scrape retry loop (§4.11).
    pub fn scrape_orchestrator() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            total_timeout: Duration::from_secs(120),
            request_timeout: Duration::from_secs(45),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Per-provider / per-domain circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    pub(crate) state: CircuitState,
    pub(crate) failure_count: u32,
    pub(crate) last_failure_time: Option<Instant>,
    pub(crate) failure_threshold: u32,
    pub(crate) recovery_timeout: Duration,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30))
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            failure_threshold,
            recovery_timeout,
        }
    }

    pub fn should_allow_request(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.check_recovery_timeout(),
            CircuitState::HalfOpen => true,
        }
    }

    fn check_recovery_timeout(&mut self) -> bool {
        let Some(last_failure) = self.last_failure_time else {
            return false;
        };
        if last_failure.elapsed() >= self.recovery_timeout {
            log_debug!(
                recovery_timeout_seconds = self.recovery_timeout.as_secs(),
                "circuit breaker attempting recovery"
            );
            self.state = CircuitState::HalfOpen;
            true
        } else {
            false
        }
    }

    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::HalfOpen => {
                log_debug!("circuit breaker recovered, returning to closed state");
                self.state = CircuitState::Closed;
                self.failure_count = 0;
                self.last_failure_time = None;
            }
            CircuitState::Closed => self.failure_count = 0,
            CircuitState::Open => {
                self.failure_count = 0;
                self.last_failure_time = None;
            }
        }
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure_time = Some(Instant::now());

        if self.failure_count >= self.failure_threshold && self.state != CircuitState::Open {
            log_warn!(
                failure_count = self.failure_count,
                failure_threshold = self.failure_threshold,
                recovery_timeout_seconds = self.recovery_timeout.as_secs(),
                "circuit breaker opened due to repeated failures"
            );
        }
        if self.failure_count >= self.failure_threshold {
            self.state = CircuitState::Open;
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }
}

/// Retry executor generalized over the error's retryability, so both the
/// LLM call manager and the scrape orchestrator can share the backoff and
/// circuit-breaking machinery while applying their own retry predicate.
pub struct RetryExecutor {
    pub policy: RetryPolicy,
    pub circuit_breaker: CircuitBreaker,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            circuit_breaker: CircuitBreaker::default(),
        }
    }

    /// Execute `operation`, retrying per `should_retry` until attempts or
    /// total timeout are exhausted.
    pub async fn execute<F, Fut, T>(
        &mut self,
        should_retry: impl Fn(&PipelineError) -> bool,
        operation: F,
    ) -> Result<T, PipelineError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, PipelineError>>,
    {
        let start_time = Instant::now();
        let mut attempt = 0;
        let mut last_error = None;

        while attempt < self.policy.max_attempts {
            if !self.circuit_breaker.should_allow_request() {
                return Err(PipelineError::internal(
                    "circuit breaker is open - subsystem temporarily unavailable",
                ));
            }
            if start_time.elapsed() >= self.policy.total_timeout {
                return Err(PipelineError::internal("retry total timeout exceeded"));
            }

            attempt += 1;
            let operation_start = Instant::now();
            let result = tokio::time::timeout(self.policy.request_timeout, operation()).await;

            match result {
                Ok(Ok(response)) => {
                    self.circuit_breaker.record_success();
                    log_debug!(
                        attempt,
                        duration_ms = operation_start.elapsed().as_millis() as u64,
                        "request succeeded"
                    );
                    return Ok(response);
                }
                Ok(Err(error)) => {
                    let retry = should_retry(&error) && attempt < self.policy.max_attempts;
                    last_error = Some(error);
                    self.circuit_breaker.record_failure();
                    if !retry {
                        break;
                    }
                    let delay = self.calculate_delay(attempt);
                    log_debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying after delay");
                    sleep(delay).await;
                }
                Err(_timeout) => {
                    last_error = Some(PipelineError::llm_timeout(
                        self.policy.request_timeout.as_secs(),
                    ));
                    self.circuit_breaker.record_failure();
                    if attempt >= self.policy.max_attempts {
                        break;
                    }
                    let delay = self.calculate_delay(attempt);
                    sleep(delay).await;
                }
            }
        }

        let final_error = last_error
            .unwrap_or_else(|| PipelineError::internal("retry loop exited with no error recorded"));
        log_error!(
            attempts = attempt,
            total_duration_ms = start_time.elapsed().as_millis() as u64,
            "operation failed after all retry attempts"
        );
        Err(final_error)
    }

    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_seconds = self.policy.initial_delay.as_secs_f64()
            * self.policy.backoff_multiplier.powi((attempt - 1) as i32);
        let delay = Duration::from_secs_f64(delay_seconds.min(self.policy.max_delay.as_secs_f64()));
        let jitter = fastrand::f64() * 0.1;
        Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PipelineError, ProbeTag};

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let mut executor = RetryExecutor::new(RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 1.0,
            total_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
        });

        let attempts = std::sync::atomic::AtomicU32::new(0);
        let result = executor
            .execute(
                |_e: &PipelineError| true,
                || async {
                    let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    if n < 2 {
                        Err(PipelineError::probe(ProbeTag::Timeout, "timed out"))
                    } else {
                        Ok(42)
                    }
                },
            )
            .await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn gives_up_when_should_retry_returns_false() {
        let mut executor = RetryExecutor::new(RetryPolicy::default());
        let result: Result<(), PipelineError> = executor
            .execute(
                |_e: &PipelineError| false,
                || async { Err(PipelineError::bad_request("malformed input")) },
            )
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn circuit_breaker_opens_after_threshold() {
        let mut breaker = CircuitBreaker::new(2, Duration::from_secs(30));
        assert!(breaker.should_allow_request());
        breaker.record_failure();
        assert!(!breaker.is_open());
        breaker.record_failure();
        assert!(breaker.is_open());
    }
}
