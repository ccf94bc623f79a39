//! Discovery agent (§4.12): when a company has no recorded website, search
//! for it and ask an LLM to pick the most likely official domain from the
//! results. Runs at HIGH priority since a batch blocks on discovery before
//! scraping can start.

use crate::core_types::{LlmMessage, LlmRequest, Priority};
use crate::error::PipelineError;
use crate::llm::call_manager::CallManager;
use crate::logging::log_info;
use crate::search::SharedSearchClient;
use std::collections::HashSet;

/// Domains that are never a company's own site even when they rank highly
/// for a company-name query (directories, social media, marketplaces).
const DOMAIN_BLACKLIST: &[&str] = &[
    "facebook.com",
    "instagram.com",
    "linkedin.com",
    "youtube.com",
    "mercadolivre.com.br",
    "olx.com.br",
    "econodata.com.br",
    "cnpj.biz",
    "empresascnpj.com",
    "google.com",
    "wikipedia.org",
];

pub struct DiscoveryAgent {
    search: SharedSearchClient,
    call_manager: std::sync::Arc<CallManager>,
}

impl DiscoveryAgent {
    pub fn new(search: SharedSearchClient, call_manager: std::sync::Arc<CallManager>) -> Self {
        Self { search, call_manager }
    }

    /// Search for `razao_social` (optionally narrowed by `municipio`/`uf`)
    /// and ask the LLM to choose the most likely official site from the
    /// non-blacklisted results.
    pub async fn discover_website(
        &self,
        razao_social: &str,
        municipio: Option<&str>,
        uf: Option<&str>,
    ) -> Result<Option<String>, PipelineError> {
        let mut query = razao_social.to_string();
        if let Some(m) = municipio {
            query.push(' ');
            query.push_str(m);
        }
        if let Some(u) = uf {
            query.push(' ');
            query.push_str(u);
        }
        query.push_str(" site oficial");

        let results = self.search.search(&query).await?;
        let blacklist: HashSet<&str> = DOMAIN_BLACKLIST.iter().copied().collect();

        let filtered: Vec<_> = results
            .into_iter()
            .filter(|r| {
                url::Url::parse(&r.url)
                    .ok()
                    .and_then(|u| u.host_str().map(str::to_string))
                    .map(|host| !blacklist.iter().any(|b| host.ends_with(b)))
                    .unwrap_or(false)
            })
            .take(5)
            .collect();

        if filtered.is_empty() {
            return Ok(None);
        }
        if filtered.len() == 1 {
            return Ok(Some(filtered[0].url.clone()));
        }

        let options = filtered
            .iter()
            .enumerate()
            .map(|(i, r)| format!("{}. {} - {} ({})", i + 1, r.title, r.url, r.snippet))
            .collect::<Vec<_>>()
            .join("\n");

        let request = LlmRequest {
            messages: vec![
                LlmMessage::system(
                    "You identify which search result is a Brazilian company's own official \
                     website. Reply with only the number of the best match, or 0 if none look \
                     like the company's own site.",
                ),
                LlmMessage::user(format!(
                    "Company: {razao_social}\n\nSearch results:\n{options}\n\nBest match number:"
                )),
            ],
            max_tokens: 10,
            temperature: 0.0,
            priority: Priority::High,
            json_mode: false,
        };

        let response = self.call_manager.dispatch(request).await?;
        let choice: usize = response.content.trim().chars().take_while(|c| c.is_ascii_digit()).collect::<String>().parse().unwrap_or(0);

        if choice == 0 || choice > filtered.len() {
            log_info!(razao_social = %razao_social, "discovery agent found no confident match");
            return Ok(None);
        }

        Ok(Some(filtered[choice - 1].url.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{SearchClient, SearchResult};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct StubSearch(Vec<SearchResult>);

    #[async_trait]
    impl SearchClient for StubSearch {
        async fn search(&self, _query: &str) -> Result<Vec<SearchResult>, PipelineError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn filters_blacklisted_domains_and_returns_single_remaining_match() {
        let search: SharedSearchClient = Arc::new(StubSearch(vec![
            SearchResult { title: "Acme on Facebook".to_string(), url: "https://facebook.com/acme".to_string(), snippet: String::new() },
            SearchResult { title: "Acme Ltda".to_string(), url: "https://acme.com.br".to_string(), snippet: "official site".to_string() },
        ]));
        let call_manager = Arc::new(CallManager::new(vec![]));
        let agent = DiscoveryAgent::new(search, call_manager);
        let result = agent.discover_website("Acme Ltda", None, None).await.unwrap();
        assert_eq!(result, Some("https://acme.com.br".to_string()));
    }

    #[tokio::test]
    async fn returns_none_when_all_results_blacklisted() {
        let search: SharedSearchClient = Arc::new(StubSearch(vec![
            SearchResult { title: "Acme on LinkedIn".to_string(), url: "https://linkedin.com/company/acme".to_string(), snippet: String::new() },
        ]));
        let call_manager = Arc::new(CallManager::new(vec![]));
        let agent = DiscoveryAgent::new(search, call_manager);
        let result = agent.discover_website("Acme Ltda", None, None).await.unwrap();
        assert_eq!(result, None);
    }
}
