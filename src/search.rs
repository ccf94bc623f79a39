//! Serper-compatible search client (§6), used by the discovery agent when
//! a company has no recorded website.
//!
//! Rate limited with `governor` rather than the bespoke dual bucket used
//! for LLM providers: Serper's limit is a single RPM dimension, which is
//! exactly `governor`'s direct-rate-limiter use case.

use crate::error::PipelineError;
use async_trait::async_trait;
use governor::{Quota, RateLimiter as GovernorRateLimiter};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, PipelineError>;
}

type GovernorDirectLimiter =
    GovernorRateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>;

struct CacheEntry {
    results: Vec<SearchResult>,
    inserted_at: Instant,
}

/// Serper.dev-backed client with an in-process TTL cache keyed by
/// normalized query, so re-running a batch doesn't re-spend search quota
/// on companies it already looked up (mirrors the original's
/// `search_cache.py`).
pub struct SerperSearchClient {
    client: reqwest::Client,
    api_key: String,
    limiter: GovernorDirectLimiter,
    cache: Mutex<HashMap<String, CacheEntry>>,
    cache_ttl: Duration,
}

impl SerperSearchClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            limiter: GovernorRateLimiter::direct(Quota::per_minute(
                NonZeroU32::new(100).expect("100 is nonzero"),
            )),
            cache: Mutex::new(HashMap::new()),
            cache_ttl: Duration::from_secs(3600),
        }
    }

    fn normalize_query(query: &str) -> String {
        query.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

#[async_trait]
impl SearchClient for SerperSearchClient {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, PipelineError> {
        let key = Self::normalize_query(query);

        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(&key) {
                if entry.inserted_at.elapsed() < self.cache_ttl {
                    return Ok(entry.results.clone());
                }
            }
        }

        self.limiter.until_ready().await;

        let response = self
            .client
            .post("https://google.serper.dev/search")
            .header("X-API-KEY", &self.api_key)
            .json(&serde_json::json!({ "q": query }))
            .send()
            .await
            .map_err(|e| PipelineError::internal(format!("search request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(PipelineError::internal(format!("search API returned {}", response.status())));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PipelineError::internal(format!("invalid search response JSON: {e}")))?;

        let results = body["organic"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|r| {
                        Some(SearchResult {
                            title: r["title"].as_str()?.to_string(),
                            url: r["link"].as_str()?.to_string(),
                            snippet: r["snippet"].as_str().unwrap_or_default().to_string(),
                        })
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        let mut cache = self.cache.lock().await;
        cache.insert(key, CacheEntry { results: results.clone(), inserted_at: Instant::now() });

        Ok(results)
    }
}

/// Shared handle form used by the discovery agent, allowing a mock in tests.
pub type SharedSearchClient = Arc<dyn SearchClient>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_query_casing_and_whitespace() {
        assert_eq!(
            SerperSearchClient::normalize_query("  Acme   Ltda  "),
            "acme ltda"
        );
    }
}
