//! Weighted multi-provider dispatch with cross-provider retry (§4.8).
//!
//! A request carries a [`Priority`]; providers are filtered to those whose
//! `priority_class` exactly matches the request's priority (a HIGH request
//! never spills onto a NORMAL-class provider and vice versa), then weighted
//! by configured `max_concurrent` (a proxy for real throughput capacity)
//! so busier providers get proportionally more of the traffic. On a
//! retryable failure the call manager moves to the next-best provider
//! rather than hammering the one that just failed.

use crate::config::PriorityClass;
use crate::core_types::{LlmRequest, LlmResponse, Priority};
use crate::error::PipelineError;
use crate::internals::retry::{CircuitBreaker, RetryPolicy};
use crate::llm::provider_manager::ProviderManager;
use crate::logging::{log_error, log_warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;

pub struct CallManager {
    providers: Vec<Arc<ProviderManager>>,
    retry_policy: RetryPolicy,
    /// One breaker per provider, keyed by name and living for the call
    /// manager's whole lifetime, so a provider that trips stays skipped
    /// across dispatches instead of resetting on every call.
    breakers: HashMap<String, Mutex<CircuitBreaker>>,
}

impl CallManager {
    pub fn new(providers: Vec<Arc<ProviderManager>>) -> Self {
        let breakers = providers
            .iter()
            .map(|p| (p.config.name.clone(), Mutex::new(CircuitBreaker::default())))
            .collect();
        Self { providers, retry_policy: RetryPolicy::llm_call_manager(), breakers }
    }

    /// Dispatch `request`, trying providers in weighted-random order and
    /// retrying on the next provider for any error the LLM taxonomy marks
    /// retryable, up to the call manager's retry policy.
    pub async fn dispatch(&self, request: LlmRequest) -> Result<LlmResponse, PipelineError> {
        let candidates = self.eligible_providers(request.priority);
        if candidates.is_empty() {
            return Err(PipelineError::internal("no LLM provider configured for this priority class"));
        }

        let order = weighted_order(&candidates);
        let mut last_error = None;

        for (attempt, provider) in order.iter().enumerate() {
            if attempt as u32 >= self.retry_policy.max_attempts {
                break;
            }

            if let Some(breaker) = self.breakers.get(&provider.config.name) {
                if !breaker.lock().await.should_allow_request() {
                    log_warn!(provider = %provider.config.name, "circuit breaker open, skipping provider");
                    continue;
                }
            }

            match provider.call(request.clone()).await {
                Ok(response) => {
                    if let Some(breaker) = self.breakers.get(&provider.config.name) {
                        breaker.lock().await.record_success();
                    }
                    return Ok(response);
                }
                Err(err) => {
                    if let Some(breaker) = self.breakers.get(&provider.config.name) {
                        breaker.lock().await.record_failure();
                    }
                    let retryable = err.is_llm_retryable();
                    log_warn!(
                        provider = %provider.config.name,
                        attempt = attempt + 1,
                        error = %err,
                        retryable,
                        "LLM call failed"
                    );
                    if !retryable {
                        return Err(err);
                    }
                    last_error = Some(err);
                    let delay = Duration::from_secs(5) * 2u32.pow(attempt as u32);
                    sleep(delay.min(Duration::from_secs(60))).await;
                }
            }
        }

        let final_error = last_error
            .unwrap_or_else(|| PipelineError::internal("no providers attempted the request"));
        log_error!(error = %final_error, "all eligible providers exhausted");
        Err(final_error)
    }

    /// Priority isolation (§4.8/§4.9): a HIGH call may only land on a
    /// provider reserved for HIGH traffic, and a NORMAL call may only land
    /// on a NORMAL provider, so bulk extraction never contends with the
    /// reserved HIGH-only endpoint.
    fn eligible_providers(&self, priority: Priority) -> Vec<Arc<ProviderManager>> {
        let required_class = match priority {
            Priority::High => PriorityClass::High,
            Priority::Normal => PriorityClass::Normal,
            Priority::Low => PriorityClass::Low,
        };
        self.providers
            .iter()
            .filter(|p| p.config.priority_class == required_class)
            .cloned()
            .collect()
    }
}

/// Order providers for this attempt sequence, weighted by `max_concurrent`
/// so higher-capacity providers are tried first more often, using a
/// deterministic-but-varied shuffle driven by `fastrand`.
fn weighted_order(providers: &[Arc<ProviderManager>]) -> Vec<Arc<ProviderManager>> {
    let mut pool: Vec<Arc<ProviderManager>> = Vec::new();
    for provider in providers {
        let weight = provider.config.max_concurrent.max(1);
        for _ in 0..weight {
            pool.push(provider.clone());
        }
    }

    let mut order = Vec::new();
    let mut seen = std::collections::HashSet::new();
    while !pool.is_empty() && order.len() < providers.len() {
        let idx = fastrand::usize(..pool.len());
        let candidate = pool.swap_remove(idx);
        if seen.insert(candidate.config.name.clone()) {
            order.push(candidate);
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderEndpointConfig;
    use crate::core_types::LlmMessage;

    fn provider(name: &str, class: PriorityClass, base_url: String) -> Arc<ProviderManager> {
        Arc::new(
            ProviderManager::new(ProviderEndpointConfig {
                name: name.to_string(),
                base_url,
                api_key: None,
                models: vec!["m".to_string()],
                priority_class: class,
                rpm_limit: 600,
                tpm_limit: 1_000_000,
                max_concurrent: 2,
                retry_policy: RetryPolicy::llm_call_manager(),
                context_window: 32_768,
                max_output_tokens: 4_096,
                weight: 1,
                enabled: true,
                is_local: false,
                safety_margin: 0.8,
            })
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn dispatch_returns_success_from_first_working_provider() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "ok"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 1, "completion_tokens": 1}
            })))
            .mount(&server)
            .await;

        let manager = CallManager::new(vec![provider("p1", PriorityClass::Normal, server.uri())]);
        let request = LlmRequest {
            messages: vec![LlmMessage::user("hi")],
            max_tokens: 50,
            temperature: 0.1,
            priority: Priority::Normal,
            json_mode: false,
        };
        let response = manager.dispatch(request).await.unwrap();
        assert_eq!(response.content, "ok");
    }

    #[tokio::test]
    async fn dispatch_fails_with_no_eligible_providers() {
        let manager = CallManager::new(vec![]);
        let request = LlmRequest {
            messages: vec![LlmMessage::user("hi")],
            max_tokens: 50,
            temperature: 0.1,
            priority: Priority::High,
            json_mode: false,
        };
        assert!(manager.dispatch(request).await.is_err());
    }

    #[tokio::test]
    async fn circuit_breaker_persists_open_state_across_dispatches() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let manager = CallManager::new(vec![provider("p1", PriorityClass::Normal, server.uri())]);
        let request = || LlmRequest {
            messages: vec![LlmMessage::user("hi")],
            max_tokens: 50,
            temperature: 0.1,
            priority: Priority::Normal,
            json_mode: false,
        };

        // Trip the breaker (default threshold is 5 consecutive failures).
        for _ in 0..5 {
            assert!(manager.dispatch(request()).await.is_err());
        }

        let breaker = manager.breakers.get("p1").unwrap().lock().await;
        assert!(breaker.is_open());
    }

    #[tokio::test]
    async fn high_priority_never_lands_on_a_normal_provider() {
        let manager = CallManager::new(vec![provider("p1", PriorityClass::Normal, "http://example.invalid".to_string())]);
        let request = LlmRequest {
            messages: vec![LlmMessage::user("hi")],
            max_tokens: 50,
            temperature: 0.1,
            priority: Priority::High,
            json_mode: false,
        };
        let err = manager.dispatch(request).await.unwrap_err();
        assert!(err.to_string().contains("no LLM provider configured"));
    }
}
