//! Per-provider resource management (§4.7): a semaphore bounding
//! concurrent in-flight calls, the dual-bucket rate limiter, an adaptive
//! `max_tokens` cap that backs off after repeated provider rejections, and
//! loop detection on the returned text.

use crate::config::ProviderEndpointConfig;
use crate::core_types::{LlmRequest, LlmResponse, ProviderStats, TokenUsage};
use crate::error::PipelineError;
use crate::internals::tokens::{estimate_message_tokens, TokenizerFamily};
use crate::llm::loop_detector::{detect_loop, LoopDetectorConfig};
use crate::logging::{log_info, log_warn};
use crate::rate_limiter::RateLimiter;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Owns everything needed to dispatch a call to one configured provider
/// endpoint.
pub struct ProviderManager {
    pub config: ProviderEndpointConfig,
    client: reqwest::Client,
    semaphore: Arc<Semaphore>,
    rate_limiter: RateLimiter,
    adaptive_max_tokens: AtomicU32,
    stats: ProviderStatsCounters,
}

#[derive(Default)]
struct ProviderStatsCounters {
    requests_total: AtomicU64,
    requests_failed: AtomicU64,
    tokens_used: AtomicU64,
    rate_limit_hits: AtomicU64,
    degenerations_detected: AtomicU64,
}

impl ProviderManager {
    pub fn new(config: ProviderEndpointConfig) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| PipelineError::internal(format!("failed to build LLM HTTP client: {e}")))?;

        let rate_limiter =
            RateLimiter::new(config.name.clone(), config.rpm_limit, config.tpm_limit, config.safety_margin);
        let initial_max_tokens = 4096u32;

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            rate_limiter,
            adaptive_max_tokens: AtomicU32::new(initial_max_tokens),
            config,
            client,
            stats: ProviderStatsCounters::default(),
        })
    }

    pub fn stats_snapshot(&self) -> ProviderStats {
        ProviderStats {
            requests_total: self.stats.requests_total.load(Ordering::Relaxed),
            requests_failed: self.stats.requests_failed.load(Ordering::Relaxed),
            tokens_used: self.stats.tokens_used.load(Ordering::Relaxed),
            rate_limit_hits: self.stats.rate_limit_hits.load(Ordering::Relaxed),
            degenerations_detected: self.stats.degenerations_detected.load(Ordering::Relaxed),
        }
    }

    /// Dispatch one request to this provider: acquire the concurrency
    /// permit and rate limit budget, clamp `max_tokens` to the adaptive
    /// cap, call the wire endpoint, and run loop detection on the result.
    pub async fn call(&self, mut request: LlmRequest) -> Result<LlmResponse, PipelineError> {
        let message_pairs: Vec<(&str, &str)> = request
            .messages
            .iter()
            .map(|m| (role_str(m.role), m.content.as_str()))
            .collect();
        let estimated_prompt_tokens = estimate_message_tokens(&message_pairs, TokenizerFamily::Cl100k);

        let safe_input_tokens = self.config.safe_input_tokens();
        if estimated_prompt_tokens > safe_input_tokens {
            return Err(PipelineError::llm_bad_request(format!(
                "estimated prompt of {estimated_prompt_tokens} tokens exceeds provider {}'s safe input budget of {safe_input_tokens} tokens",
                self.config.name
            )));
        }

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| PipelineError::internal("provider semaphore closed"))?;

        let adaptive_cap = self.adaptive_max_tokens.load(Ordering::Relaxed);
        request.max_tokens = request.max_tokens.min(adaptive_cap);

        let estimated_total = estimated_prompt_tokens + request.max_tokens;

        let permit = self.rate_limiter.acquire(estimated_total).await.map_err(|_| {
            self.stats.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
            PipelineError::llm_rate_limit(30)
        })?;

        self.stats.requests_total.fetch_add(1, Ordering::Relaxed);

        let result = self.dispatch_wire_call(&request).await;

        let result = match result {
            Ok(response) => {
                self.rate_limiter.settle(permit, response.usage.total()).await;
                self.stats.tokens_used.fetch_add(response.usage.total() as u64, Ordering::Relaxed);
                self.grow_adaptive_cap();
                self.check_for_loop(&response.content)?;
                Ok(response)
            }
            Err(err) => {
                self.rate_limiter.settle(permit, estimated_prompt_tokens).await;
                self.stats.requests_failed.fetch_add(1, Ordering::Relaxed);
                if matches!(err, PipelineError::LlmBadRequest { .. }) {
                    self.shrink_adaptive_cap();
                }
                Err(err)
            }
        };

        result
    }

    /// Hard enforcement (§4.7 step 8): a detected loop rejects the chunk's
    /// extraction outright rather than quietly returning garbage content.
    fn check_for_loop(&self, content: &str) -> Result<(), PipelineError> {
        let outcome = detect_loop(content, &LoopDetectorConfig::default());
        if outcome.is_degenerate {
            self.stats.degenerations_detected.fetch_add(1, Ordering::Relaxed);
            log_warn!(provider = %self.config.name, repeat_count = outcome.max_repeat_count, "degenerate output detected");
            return Err(PipelineError::llm_degeneration(format!(
                "provider {} returned degenerate output (repeat_count={})",
                self.config.name, outcome.max_repeat_count
            )));
        } else if outcome.would_have_flagged_at_soft_threshold {
            log_info!(provider = %self.config.name, repeat_count = outcome.max_repeat_count, "output approaching repetition threshold");
        }
        Ok(())
    }

    /// Parameter-rejection fallback: a provider that rejects a request for
    /// exceeding its real context window (often smaller than advertised)
    /// teaches us to ask for less next time.
    fn shrink_adaptive_cap(&self) {
        let previous = self.adaptive_max_tokens.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
            Some((current / 2).max(256))
        });
        if let Ok(previous) = previous {
            log_warn!(provider = %self.config.name, previous_cap = previous, "shrinking adaptive max_tokens cap after provider rejection");
        }
    }

    fn grow_adaptive_cap(&self) {
        let _ = self.adaptive_max_tokens.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
            if current < 4096 {
                Some((current + current / 4).min(4096))
            } else {
                None
            }
        });
    }

    async fn dispatch_wire_call(&self, request: &LlmRequest) -> Result<LlmResponse, PipelineError> {
        let model = self.config.models.first().cloned().unwrap_or_else(|| "default".to_string());
        let body = serde_json::json!({
            "model": model,
            "messages": request.messages.iter().map(|m| serde_json::json!({
                "role": role_str(m.role),
                "content": m.content,
            })).collect::<Vec<_>>(),
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "response_format": if request.json_mode { Some(serde_json::json!({"type": "json_object"})) } else { None },
        });

        let mut req = self.client.post(format!("{}/v1/chat/completions", self.config.base_url.trim_end_matches('/'))).json(&body);
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                PipelineError::llm_timeout(120)
            } else {
                PipelineError::llm_provider(e.to_string())
            }
        })?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PipelineError::llm_rate_limit(
                response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ));
        }
        if response.status() == reqwest::StatusCode::BAD_REQUEST {
            let body_text = response.text().await.unwrap_or_default();
            return Err(PipelineError::llm_bad_request(body_text));
        }
        if !response.status().is_success() {
            return Err(PipelineError::llm_provider(format!("HTTP {}", response.status())));
        }

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PipelineError::llm_parse(format!("invalid JSON response: {e}")))?;

        let content = parsed["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| PipelineError::llm_parse("missing choices[0].message.content"))?
            .to_string();
        let finish_reason = parsed["choices"][0]["finish_reason"].as_str().unwrap_or("stop").to_string();
        let usage = TokenUsage {
            prompt_tokens: parsed["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: parsed["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
        };

        Ok(LlmResponse { content, provider: self.config.name.clone(), model, usage, finish_reason })
    }
}

fn role_str(role: crate::core_types::LlmRole) -> &'static str {
    match role {
        crate::core_types::LlmRole::System => "system",
        crate::core_types::LlmRole::User => "user",
        crate::core_types::LlmRole::Assistant => "assistant",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PriorityClass;
    use crate::internals::retry::RetryPolicy;

    fn test_config(base_url: String) -> ProviderEndpointConfig {
        ProviderEndpointConfig {
            name: "test-provider".to_string(),
            base_url,
            api_key: None,
            models: vec!["test-model".to_string()],
            priority_class: PriorityClass::Normal,
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
        }
    }

    #[tokio::test]
    async fn successful_call_updates_stats_and_adaptive_cap() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "Acme Corp makes widgets."}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 50, "completion_tokens": 10}
            })))
            .mount(&server)
            .await;

        let manager = ProviderManager::new(test_config(server.uri())).unwrap();
        let request = LlmRequest {
            messages: vec![crate::core_types::LlmMessage::user("hello")],
            max_tokens: 100,
            temperature: 0.2,
            priority: crate::core_types::Priority::Normal,
            json_mode: false,
        };
        let response = manager.call(request).await.unwrap();
        assert_eq!(response.content, "Acme Corp makes widgets.");
        assert_eq!(manager.stats_snapshot().requests_total, 1);
    }

    #[tokio::test]
    async fn oversized_prompt_is_rejected_before_dispatch() {
        let server = wiremock::MockServer::start().await;
        // No mock registered: a real dispatch would panic the mock server
        // expectations, proving the rejection happens before any wire call.
        let mut config = test_config(server.uri());
        config.context_window = 100;
        config.max_output_tokens = 10;
        let manager = ProviderManager::new(config).unwrap();
        let request = LlmRequest {
            messages: vec![crate::core_types::LlmMessage::user("word ".repeat(5000))],
            max_tokens: 50,
            temperature: 0.2,
            priority: crate::core_types::Priority::Normal,
            json_mode: false,
        };
        let result = manager.call(request).await;
        assert!(matches!(result, Err(PipelineError::LlmBadRequest { .. })));
    }

    #[tokio::test]
    async fn degenerate_output_is_rejected_as_an_error() {
        let server = wiremock::MockServer::start().await;
        let repeated = "the quick brown fox jumps over the lazy dog ".repeat(10);
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": repeated}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 50, "completion_tokens": 80}
            })))
            .mount(&server)
            .await;

        let manager = ProviderManager::new(test_config(server.uri())).unwrap();
        let request = LlmRequest {
            messages: vec![crate::core_types::LlmMessage::user("hello")],
            max_tokens: 100,
            temperature: 0.2,
            priority: crate::core_types::Priority::Normal,
            json_mode: false,
        };
        let result = manager.call(request).await;
        assert!(matches!(result, Err(PipelineError::LlmDegeneration { .. })));
    }

    #[tokio::test]
    async fn bad_request_shrinks_adaptive_cap() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(400).set_body_string("context length exceeded"))
            .mount(&server)
            .await;

        let manager = ProviderManager::new(test_config(server.uri())).unwrap();
        let before = manager.adaptive_max_tokens.load(Ordering::Relaxed);
        let request = LlmRequest {
            messages: vec![crate::core_types::LlmMessage::user("hello")],
            max_tokens: 4096,
            temperature: 0.2,
            priority: crate::core_types::Priority::Normal,
            json_mode: false,
        };
        let result = manager.call(request).await;
        assert!(result.is_err());
        assert!(manager.adaptive_max_tokens.load(Ordering::Relaxed) < before);
    }
}
