//! Multi-instance batch worker pool (§4.11): `num_instances` logical
//! instances, each running `workers_per_instance` concurrent company
//! pipelines, ramped up with a delay between instance starts so a cold
//! start doesn't slam the global resource pools all at once. Each
//! worker buffers completed results and flushes them to the `Store` in
//! batches of `flush_size` rather than one write per company.

use crate::chunker::SmartChunker;
use crate::config::OrchestratorConfig;
use crate::core_types::{Company, CompanyResult, CompanyStatus, RequestContext};
use crate::error::PipelineError;
use crate::internals::retry::{RetryExecutor, RetryPolicy};
use crate::llm::call_manager::CallManager;
use crate::llm::discovery::DiscoveryAgent;
use crate::logging::{log_error, log_info, log_warn};
use crate::orchestrator::global::{GlobalOrchestrator, ResourceKind};
use crate::orchestrator::metrics::{BatchStatus, MetricsAggregator};
use crate::profile;
use crate::proxy_pool::ProxyPool;
use crate::scraper::{self, ScrapePipelineConfig};
use crate::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Page fetched by `health_check` when gating startup on proxy health
/// (§4.11 step 1-2). Any site that reliably responds is fine; it's only
/// used to prove the proxy path is alive, not to scrape anything.
const PROXY_HEALTH_CHECK_URL: &str = "https://www.google.com";

pub struct BatchOrchestrator {
    store: Arc<dyn Store>,
    proxy_pool: Arc<ProxyPool>,
    call_manager: Arc<CallManager>,
    discovery: Option<Arc<DiscoveryAgent>>,
    global: Arc<GlobalOrchestrator>,
    config: OrchestratorConfig,
    metrics: Arc<Mutex<MetricsAggregator>>,
    /// Persistent across every company's scrape so a domain that keeps
    /// failing trips the breaker instead of getting a fresh one each time.
    scrape_retry: Mutex<RetryExecutor>,
}

impl BatchOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        proxy_pool: Arc<ProxyPool>,
        call_manager: Arc<CallManager>,
        global: Arc<GlobalOrchestrator>,
        config: OrchestratorConfig,
    ) -> Self {
        Self::with_discovery(store, proxy_pool, call_manager, None, global, config)
    }

    pub fn with_discovery(
        store: Arc<dyn Store>,
        proxy_pool: Arc<ProxyPool>,
        call_manager: Arc<CallManager>,
        discovery: Option<Arc<DiscoveryAgent>>,
        global: Arc<GlobalOrchestrator>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            proxy_pool,
            call_manager,
            discovery,
            global,
            config,
            metrics: Arc::new(Mutex::new(MetricsAggregator::new())),
            scrape_retry: Mutex::new(RetryExecutor::new(RetryPolicy::scrape_orchestrator())),
        }
    }

    pub async fn status(&self) -> BatchStatus {
        self.metrics.lock().await.snapshot()
    }

    /// Run the batch to completion: gate startup on proxy health, ramp up
    /// instances, drain the store's pending queue across all workers,
    /// flush buffered results, return the final status.
    pub async fn run(&self) -> BatchStatus {
        if let Err(reason) = self.check_proxy_health().await {
            log_error!(reason = %reason, "aborting batch run: proxy pool is not usable");
            return self.status().await;
        }

        let mut instance_handles = Vec::new();

        for instance_id in 0..self.config.num_instances {
            if instance_id > 0 {
                tokio::time::sleep(self.config.ramp_up_delay).await;
            }
            log_info!(instance_id, "starting orchestrator instance");
            instance_handles.push(self.run_instance(instance_id));
        }

        futures_util::future::join_all(instance_handles).await;
        self.status().await
    }

    /// §4.11 step 1-2: abort before any worker starts if a proxy source
    /// was configured but has zero proxies, or if the ones it has all
    /// fail a live health probe. Running with proxies deliberately
    /// disabled is not gated here.
    async fn check_proxy_health(&self) -> Result<(), String> {
        if self.proxy_pool.is_disabled() {
            return Ok(());
        }

        let preloaded = self.proxy_pool.preload().await;
        if preloaded == 0 {
            return Err("proxy pool has zero proxies configured".to_string());
        }

        let report = self.proxy_pool.health_check(PROXY_HEALTH_CHECK_URL, Duration::from_secs(10)).await;
        if !report.healthy {
            return Err(format!("proxy pool failed health check: {:?}", report.errors));
        }
        Ok(())
    }

    async fn run_instance(&self, instance_id: usize) {
        let mut worker_handles = Vec::new();
        for worker_id in 0..self.config.workers_per_instance {
            worker_handles.push(self.run_worker(instance_id, worker_id));
        }
        futures_util::future::join_all(worker_handles).await;
    }

    async fn run_worker(&self, instance_id: usize, worker_id: usize) {
        let mut buffer: Vec<CompanyResult> = Vec::with_capacity(self.config.flush_size);

        loop {
            let batch = match self.store.fetch_pending(1).await {
                Ok(batch) => batch,
                Err(err) => {
                    log_warn!(instance_id, worker_id, error = %err, "fetch_pending failed");
                    break;
                }
            };
            let Some(company) = batch.into_iter().next() else { break };

            let result = self.process_company(&company).await;
            buffer.push(result.clone());
            self.metrics.lock().await.record(result);

            if buffer.len() >= self.config.flush_size {
                self.flush(&mut buffer).await;
            }
        }

        self.flush(&mut buffer).await;
    }

    async fn flush(&self, buffer: &mut Vec<CompanyResult>) {
        for result in buffer.drain(..) {
            if let Err(err) = self.store.save_result(result).await {
                log_warn!(error = %err, "failed to persist company result");
            }
        }
    }

    async fn process_company(&self, company: &Company) -> CompanyResult {
        let ctx = RequestContext::new(company.cnpj_basico.clone());

        let website = match &company.website {
            Some(w) if !w.trim().is_empty() => w.clone(),
            _ => match self.discover_website(company).await {
                Some(discovered) => discovered,
                None => {
                    return self.failed_result(company, "no_website_and_discovery_not_configured");
                }
            },
        };

        let _scraper_permit = match self.global.acquire(ResourceKind::Scraper).await {
            Ok(p) => p,
            Err(err) => return self.failed_result(company, &err.bucket_tag()),
        };

        let scrape_config = ScrapePipelineConfig { max_subpages: self.config.max_subpages, max_concurrent_subpage_fetches: 4 };
        let scrape_result = self.scrape_with_retry(&website, &ctx, &scrape_config).await;

        if scrape_result.main_page.is_none() {
            let reason = scrape_result.main_page_fail_reason.clone().unwrap_or_else(|| "unknown".to_string());
            return CompanyResult {
                cnpj_basico: company.cnpj_basico.clone(),
                status: CompanyStatus::Failed,
                profile: None,
                main_page_fail_reason: Some(reason),
                pages_total: 0,
                pages_ok: 0,
                pages_failed: 1,
                error_json: None,
                completed_at: chrono::Utc::now(),
            };
        }

        let chunker = SmartChunker::default();
        let chunks = chunker.chunk_scrape_result(&scrape_result);

        let _llm_permit = match self.global.acquire(ResourceKind::Llm).await {
            Ok(p) => p,
            Err(err) => return self.failed_result(company, &err.bucket_tag()),
        };

        let bundles = profile::extract_facts_from_chunks(&chunks, &self.call_manager, 4).await;
        let merged = profile::merge_fact_bundles(bundles);

        let source_urls: Vec<String> = scrape_result.all_pages().map(|p| p.url.clone()).collect();
        let profile = match profile::build_profile(&company.cnpj_basico, merged, source_urls, &self.call_manager).await {
            Ok(profile) => Some(profile),
            Err(err) => {
                log_warn!(cnpj_basico = %company.cnpj_basico, error = %err, "Stage C build failed");
                None
            }
        };

        let pages_ok = scrape_result.pages_ok();
        let pages_total = pages_ok + scrape_result.funnel.pages_rejected;
        let status = if profile.is_some() { CompanyStatus::Success } else { CompanyStatus::PartialSuccess };

        CompanyResult {
            cnpj_basico: company.cnpj_basico.clone(),
            status,
            profile,
            main_page_fail_reason: None,
            pages_total,
            pages_ok,
            pages_failed: scrape_result.funnel.pages_rejected,
            error_json: None,
            completed_at: chrono::Utc::now(),
        }
    }

    /// §1 purpose item (1): discover the official site before giving up on
    /// a company with no recorded website. Runs at the discovery resource
    /// slot so it can't starve the scraper/LLM pools, and silently yields
    /// `None` when no search client was configured.
    async fn discover_website(&self, company: &Company) -> Option<String> {
        let discovery = self.discovery.as_ref()?;
        let _discovery_permit = self.global.acquire(ResourceKind::Discovery).await.ok()?;

        match discovery
            .discover_website(&company.razao_social, company.municipio.as_deref(), company.uf.as_deref())
            .await
        {
            Ok(website) => website,
            Err(err) => {
                log_warn!(cnpj_basico = %company.cnpj_basico, error = %err, "discovery agent failed");
                None
            }
        }
    }

    async fn scrape_with_retry(
        &self,
        website: &str,
        ctx: &RequestContext,
        scrape_config: &ScrapePipelineConfig,
    ) -> crate::core_types::ScrapeResult {
        let proxy_pool = self.proxy_pool.clone();
        let mut executor = self.scrape_retry.lock().await;

        let result = executor
            .execute(
                |err: &PipelineError| err.is_transient_scrape_error(),
                || async {
                    let result = scraper::scrape_all_subpages(website, &proxy_pool, ctx, scrape_config).await;
                    match &result.main_page_fail_reason {
                        Some(reason) if result.main_page.is_none() => {
                            Err(PipelineError::internal(reason.clone()))
                        }
                        _ => Ok(result),
                    }
                },
            )
            .await;

        match result {
            Ok(scrape_result) => scrape_result,
            Err(err) => crate::core_types::ScrapeResult {
                main_page: None,
                subpages: Vec::new(),
                funnel: Default::default(),
                main_page_fail_reason: Some(err.to_string()),
            },
        }
    }

    fn failed_result(&self, company: &Company, reason: &str) -> CompanyResult {
        CompanyResult {
            cnpj_basico: company.cnpj_basico.clone(),
            status: CompanyStatus::Failed,
            profile: None,
            main_page_fail_reason: Some(reason.to_string()),
            pages_total: 0,
            pages_ok: 0,
            pages_failed: 0,
            error_json: None,
            completed_at: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn company(cnpj: &str, website: Option<&str>) -> Company {
        Company {
            cnpj_basico: cnpj.to_string(),
            razao_social: "Acme Ltda".to_string(),
            nome_fantasia: None,
            website: website.map(str::to_string),
            municipio: None,
            uf: None,
            cnae_principal: None,
        }
    }

    #[tokio::test]
    async fn company_with_no_website_is_marked_failed() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new(vec![company("1", None)]));
        let proxy_pool = Arc::new(ProxyPool::new(crate::config::ProxySource::Disabled));
        let call_manager = Arc::new(CallManager::new(vec![]));
        let global = Arc::new(GlobalOrchestrator::with_default_capacities());
        let orchestrator = BatchOrchestrator::new(store.clone(), proxy_pool, call_manager, global, OrchestratorConfig { num_instances: 1, workers_per_instance: 1, flush_size: 1, ..Default::default() });

        let status = orchestrator.run().await;
        assert_eq!(status.failed, 1);
    }

    #[tokio::test]
    async fn discovery_agent_is_used_when_website_missing() {
        use crate::search::{SearchClient, SearchResult, SharedSearchClient};
        use async_trait::async_trait;

        struct StubSearch;
        #[async_trait]
        impl SearchClient for StubSearch {
            async fn search(&self, _query: &str) -> Result<Vec<SearchResult>, PipelineError> {
                Ok(vec![SearchResult {
                    title: "Acme".to_string(),
                    url: "https://acme.com.br".to_string(),
                    snippet: String::new(),
                }])
            }
        }

        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new(vec![]));
        let proxy_pool = Arc::new(ProxyPool::new(crate::config::ProxySource::Disabled));
        let call_manager = Arc::new(CallManager::new(vec![]));
        let search: SharedSearchClient = Arc::new(StubSearch);
        let discovery = Some(Arc::new(DiscoveryAgent::new(search, call_manager.clone())));
        let global = Arc::new(GlobalOrchestrator::with_default_capacities());
        let orchestrator = BatchOrchestrator::with_discovery(
            store,
            proxy_pool,
            call_manager,
            discovery,
            global,
            OrchestratorConfig::default(),
        );

        let found = orchestrator.discover_website(&company("1", None)).await;
        assert_eq!(found, Some("https://acme.com.br".to_string()));
    }

    #[tokio::test]
    async fn discovery_yields_nothing_when_not_configured() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new(vec![]));
        let proxy_pool = Arc::new(ProxyPool::new(crate::config::ProxySource::Disabled));
        let call_manager = Arc::new(CallManager::new(vec![]));
        let global = Arc::new(GlobalOrchestrator::with_default_capacities());
        let orchestrator =
            BatchOrchestrator::new(store, proxy_pool, call_manager, global, OrchestratorConfig::default());

        let found = orchestrator.discover_website(&company("1", None)).await;
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn run_aborts_when_configured_proxy_source_has_no_entries() {
        let store = Arc::new(InMemoryStore::new(vec![company("1", Some("https://acme.example.com"))]));
        let proxy_pool = Arc::new(ProxyPool::new(crate::config::ProxySource::CsvList {
            path: "/nonexistent/proxies.csv".to_string(),
        }));
        let call_manager = Arc::new(CallManager::new(vec![]));
        let global = Arc::new(GlobalOrchestrator::with_default_capacities());
        let orchestrator = BatchOrchestrator::new(store.clone(), proxy_pool, call_manager, global, OrchestratorConfig { num_instances: 1, workers_per_instance: 1, flush_size: 1, ..Default::default() });

        let status = orchestrator.run().await;
        assert_eq!(status.succeeded + status.partial + status.failed, 0);
        assert!(store.results().is_empty());
    }
}
