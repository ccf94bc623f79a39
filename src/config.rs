//! Runtime configuration for company-profiler.
//!
//! Mirrors the teacher's `LLMConfig::from_env()` pattern: a single
//! `AppConfig::from_env()` entry point that is the *only* place environment
//! variables are read, paired with a `validate()` pass that mirrors the
//! teacher's `provider.validate()` contract.

use crate::error::PipelineError;
use crate::internals::retry::RetryPolicy;
use crate::logging::log_debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One configured LLM provider endpoint, matching spec.md §3's
/// `ProviderConfig` entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEndpointConfig {
    pub name: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub models: Vec<String>,
    pub priority_class: PriorityClass,
    pub rpm_limit: u32,
    pub tpm_limit: u32,
    pub max_concurrent: usize,
    pub retry_policy: RetryPolicy,
    /// Total context window, tokens, used by `safe_input_tokens` to guard
    /// against oversized prompts before a call is ever dispatched.
    pub context_window: u32,
    pub max_output_tokens: u32,
    /// Relative weight in the call manager's weighted provider ordering.
    pub weight: u32,
    pub enabled: bool,
    /// Local/self-hosted providers reserve extra headroom in
    /// `safe_input_tokens` for tokenizer drift between what the caller
    /// estimates and what the backend actually counts.
    pub is_local: bool,
    /// Scales rate-limiter bucket capacity down from the raw rpm/tpm
    /// limits so bursts don't trip the provider's own throttling.
    pub safety_margin: f32,
}

impl ProviderEndpointConfig {
    /// Largest prompt, in tokens, safe to send without risking a
    /// context-window overflow (§4.7 step 1): context window minus the
    /// reserved output budget minus a fixed safety buffer, halved again
    /// for local backends whose tokenizer may diverge from our estimate.
    pub fn safe_input_tokens(&self) -> u32 {
        let budget = self
            .context_window
            .saturating_sub(self.max_output_tokens)
            .saturating_sub(2_500);
        if self.is_local {
            (budget as f32 * 0.8) as u32
        } else {
            budget
        }
    }
}

/// Priority classes used by the call manager's weighted provider selection
/// (§4.8) and the global orchestrator's LLM slot allocation (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriorityClass {
    High,
    Normal,
    Low,
}

/// Where the proxy pool sources its sessions (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProxySource {
    Gateway { url: String },
    CsvList { path: String },
    Disabled,
}

/// Tunables for the batch orchestrator (§4.9, §4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub num_instances: usize,
    pub workers_per_instance: usize,
    pub flush_size: usize,
    pub max_subpages: usize,
    pub ramp_up_delay: Duration,
    pub llm_slot_capacity: usize,
    pub scraper_slot_capacity: usize,
    pub discovery_slot_capacity: usize,
    pub proxy_slot_capacity: usize,
    pub http_connection_slot_capacity: usize,
    pub llm_acquire_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            num_instances: 1,
            workers_per_instance: 8,
            flush_size: 50,
            max_subpages: 8,
            ramp_up_delay: Duration::from_secs(2),
            // Deliberately small: the LLM backend is the VRAM-bottlenecked
            // resource, not the orchestrator's own thread pool.
            llm_slot_capacity: 6,
            scraper_slot_capacity: 1000,
            discovery_slot_capacity: 1000,
            proxy_slot_capacity: 1000,
            http_connection_slot_capacity: 1000,
            llm_acquire_timeout: Duration::from_secs(45),
        }
    }
}

/// Top-level application configuration, loaded once at process startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub serper_api_key: Option<String>,
    pub proxy_source: ProxySource,
    pub providers: Vec<ProviderEndpointConfig>,
    pub orchestrator: OrchestratorConfig,
    pub phoenix_collector_url: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables. This is the only
    /// function in the crate that should call `std::env::var`.
    pub fn from_env() -> Result<Self, PipelineError> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| PipelineError::bad_request("DATABASE_URL is required"))?;

        let serper_api_key = std::env::var("SERPER_API_KEY").ok();

        let proxy_source = match std::env::var("PROXY_GATEWAY_URL") {
            Ok(url) if !url.is_empty() => ProxySource::Gateway { url },
            _ => match std::env::var("PROXY_CSV_PATH") {
                Ok(path) if !path.is_empty() => ProxySource::CsvList { path },
                _ => ProxySource::Disabled,
            },
        };

        let mut providers = Vec::new();
        if let Ok(url) = std::env::var("VLLM_BASE_URL") {
            providers.push(ProviderEndpointConfig {
                name: "vllm".to_string(),
                base_url: url,
                api_key: std::env::var("VLLM_API_KEY").ok(),
                models: std::env::var("VLLM_MODELS")
                    .unwrap_or_default()
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
                priority_class: PriorityClass::High,
                rpm_limit: std::env::var("VLLM_RPM_LIMIT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(600),
                tpm_limit: std::env::var("VLLM_TPM_LIMIT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(2_000_000),
                max_concurrent: std::env::var("VLLM_MAX_CONCURRENT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(4),
                retry_policy: RetryPolicy::llm_call_manager(),
                context_window: std::env::var("VLLM_CONTEXT_WINDOW")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(32_768),
                max_output_tokens: std::env::var("VLLM_MAX_OUTPUT_TOKENS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(2_048),
                weight: std::env::var("VLLM_WEIGHT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(4),
                enabled: std::env::var("VLLM_ENABLED")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(true),
                is_local: true,
                safety_margin: std::env::var("VLLM_SAFETY_MARGIN")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0.8),
            });
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            providers.push(ProviderEndpointConfig {
                name: "openai".to_string(),
                base_url: std::env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com".to_string()),
                api_key: Some(key),
                models: vec!["gpt-4o-mini".to_string()],
                priority_class: PriorityClass::Normal,
                rpm_limit: 500,
                tpm_limit: 200_000,
                max_concurrent: 6,
                retry_policy: RetryPolicy::llm_call_manager(),
                context_window: std::env::var("OPENAI_CONTEXT_WINDOW")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(128_000),
                max_output_tokens: std::env::var("OPENAI_MAX_OUTPUT_TOKENS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(4_096),
                weight: std::env::var("OPENAI_WEIGHT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(6),
                enabled: std::env::var("OPENAI_ENABLED")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(true),
                is_local: false,
                safety_margin: std::env::var("OPENAI_SAFETY_MARGIN")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0.8),
            });
        }

        let orchestrator = OrchestratorConfig {
            num_instances: std::env::var("NUM_INSTANCES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
            workers_per_instance: std::env::var("WORKERS_PER_INSTANCE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8),
            flush_size: std::env::var("FLUSH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50),
            max_subpages: std::env::var("MAX_SUBPAGES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8),
            ..OrchestratorConfig::default()
        };

        let config = Self {
            database_url,
            serper_api_key,
            proxy_source,
            providers,
            orchestrator,
            phoenix_collector_url: std::env::var("PHOENIX_COLLECTOR_URL").ok(),
        };

        config.validate()?;

        log_debug!(
            num_providers = config.providers.len(),
            num_instances = config.orchestrator.num_instances,
            has_serper_key = config.serper_api_key.is_some(),
            "application configuration loaded"
        );

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.database_url.is_empty() {
            return Err(PipelineError::bad_request("DATABASE_URL must not be empty"));
        }
        if !self.providers.iter().any(|p| p.enabled) {
            return Err(PipelineError::bad_request(
                "at least one LLM provider must be configured",
            ));
        }
        if self.orchestrator.num_instances == 0 {
            return Err(PipelineError::bad_request(
                "orchestrator.num_instances must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            database_url: "postgres://localhost/test".to_string(),
            serper_api_key: None,
            proxy_source: ProxySource::Disabled,
            providers: vec![ProviderEndpointConfig {
                name: "vllm".to_string(),
                base_url: "http://localhost:8000".to_string(),
                api_key: None,
                models: vec!["qwen".to_string()],
                priority_class: PriorityClass::High,
                rpm_limit: 600,
                tpm_limit: 2_000_000,
                max_concurrent: 4,
                retry_policy: RetryPolicy::llm_call_manager(),
                context_window: 32_768,
                max_output_tokens: 2_048,
                weight: 4,
                enabled: true,
                is_local: true,
                safety_margin: 0.8,
            }],
            orchestrator: OrchestratorConfig::default(),
            phoenix_collector_url: None,
        }
    }

    #[test]
    fn validate_rejects_empty_database_url() {
        let mut config = base_config();
        config.database_url = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_no_providers() {
        let mut config = base_config();
        config.providers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_well_formed_config() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_all_providers_disabled() {
        let mut config = base_config();
        config.providers[0].enabled = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn safe_input_tokens_reserves_output_and_buffer() {
        let mut provider = base_config().providers.remove(0);
        provider.context_window = 32_768;
        provider.max_output_tokens = 2_048;
        provider.is_local = false;
        assert_eq!(provider.safe_input_tokens(), 32_768 - 2_048 - 2_500);
    }

    #[test]
    fn safe_input_tokens_shrinks_further_for_local_providers() {
        let mut provider = base_config().providers.remove(0);
        provider.context_window = 32_768;
        provider.max_output_tokens = 2_048;
        provider.is_local = true;
        let budget = 32_768 - 2_048 - 2_500;
        assert_eq!(provider.safe_input_tokens(), (budget as f32 * 0.8) as u32);
    }
}
