//! Orchestrates one company's scrape: probe -> main page -> link selection
//! -> bounded-parallel subpage fetch (§4.5).

use crate::core_types::{RequestContext, ScrapeFunnelCounters, ScrapeResult, ScrapedPage};
use crate::error::PipelineError;
use crate::http_client;
use crate::logging::{log_info, log_warn};
use crate::proxy_pool::{ProxyPool, ProxySession};
use crate::scraper::{html, link_selector};
use crate::url_prober;
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::time::Instant;
use url::Url;

/// Main-page fetch is attempted up to `1 + MAX_RETRIES` times unless a
/// site-rejection signal (403/429, Cloudflare, WAF, captcha) short-circuits
/// it immediately, since retrying those only worsens the proxy's reputation.
const MAX_RETRIES: usize = 2;

#[derive(Debug, Clone)]
pub struct ScrapePipelineConfig {
    pub max_subpages: usize,
    pub max_concurrent_subpage_fetches: usize,
}

impl Default for ScrapePipelineConfig {
    fn default() -> Self {
        Self { max_subpages: 8, max_concurrent_subpage_fetches: 4 }
    }
}

/// Run the full scrape funnel for one company's website field.
pub async fn scrape_all_subpages(
    raw_website: &str,
    proxy_pool: &ProxyPool,
    ctx: &RequestContext,
    config: &ScrapePipelineConfig,
) -> ScrapeResult {
    let mut funnel = ScrapeFunnelCounters::default();

    let probe_outcome = match url_prober::probe(raw_website).await {
        Ok(outcome) => outcome,
        Err(err) => {
            log_warn!(cnpj_basico = %ctx.cnpj_basico, error = %err, "probe failed for all URL variations");
            return ScrapeResult {
                main_page: None,
                subpages: Vec::new(),
                funnel,
                main_page_fail_reason: Some(err.bucket_tag()),
            };
        }
    };
    funnel.urls_probed += 1;
    funnel.urls_reachable += 1;

    let proxy_session = proxy_pool.acquire(&ctx.cnpj_basico).await;
    let main_page = match fetch_main_page_with_retry(&probe_outcome.resolved_url, proxy_pool, proxy_session.as_ref()).await {
        Ok(page) => page,
        Err(err) => {
            log_warn!(cnpj_basico = %ctx.cnpj_basico, error = %err, "main page fetch failed after retries");
            return ScrapeResult {
                main_page: None,
                subpages: Vec::new(),
                funnel,
                main_page_fail_reason: Some(err.bucket_tag()),
            };
        }
    };
    funnel.pages_fetched += 1;
    funnel.pages_classified_ok += 1;

    if ctx.is_cancelled() {
        return ScrapeResult { main_page: Some(main_page), subpages: Vec::new(), funnel, main_page_fail_reason: None };
    }

    funnel.urls_discovered += main_page.links.len();
    funnel.links_in_html = main_page.links.len() + main_page.document_links.len();
    funnel.links_after_filter = main_page.links.len();
    let selected = link_selector::select_top_links(&main_page.links, config.max_subpages);
    funnel.links_selected = selected.len();

    let subpages = fetch_subpages_bounded(
        &selected,
        proxy_pool,
        proxy_session.as_ref(),
        config.max_concurrent_subpage_fetches,
        &mut funnel,
    )
    .await;

    log_info!(
        cnpj_basico = %ctx.cnpj_basico,
        subpages_fetched = subpages.len(),
        pages_ok = funnel.pages_classified_ok,
        "scrape complete"
    );

    ScrapeResult { main_page: Some(main_page), subpages, funnel, main_page_fail_reason: None }
}

async fn fetch_page(url_str: &str, proxy: Option<&ProxySession>) -> Result<ScrapedPage, PipelineError> {
    let url = Url::parse(url_str).map_err(|e| PipelineError::bad_request(format!("invalid URL: {e}")))?;
    let host = url.host_str().unwrap_or(url_str).to_string();
    let client = http_client::build_client(&host, proxy)?;

    let response = client
        .get(url.as_str())
        .send()
        .await
        .map_err(|e| http_client::classify_proxy_error(&e))?;

    let status_code = response.status().as_u16();
    let html_body = response.text().await.unwrap_or_default();
    let text = html::extract_text(&html_body);

    html::classify_content(status_code, &text)?;

    let (links, document_links) = html::extract_links(&html_body, &url);

    Ok(ScrapedPage::ok(url.to_string(), html_body, text, status_code, proxy.is_some(), links, document_links))
}

/// Fetch the main page, retrying transient failures up to `MAX_RETRIES`
/// times and recording every attempt's outcome against the proxy session.
/// A site-rejection signal (403/429, Cloudflare, WAF, captcha) stops
/// retrying immediately since further attempts would only look more
/// suspicious to the target site.
async fn fetch_main_page_with_retry(
    url_str: &str,
    proxy_pool: &ProxyPool,
    proxy: Option<&ProxySession>,
) -> Result<ScrapedPage, PipelineError> {
    let mut last_err = None;

    for attempt in 0..=MAX_RETRIES {
        let started = Instant::now();
        let outcome = fetch_page(url_str, proxy).await;
        let latency_ms = started.elapsed().as_millis() as u32;

        if let Some(session) = proxy {
            proxy_pool.record_outcome(&session.session_id, latency_ms, outcome.is_err()).await;
        }

        match outcome {
            Ok(page) => return Ok(page),
            Err(err) if err.is_site_rejection() => {
                log_warn!(attempt, error = %err, "main page fetch rejected by site, not retrying");
                return Err(err);
            }
            Err(err) => {
                if attempt < MAX_RETRIES {
                    log_warn!(attempt, error = %err, "main page fetch failed, retrying");
                }
                last_err = Some(err);
            }
        }
    }

    Err(last_err.expect("loop always runs at least once"))
}

async fn fetch_subpages_bounded(
    urls: &[String],
    proxy_pool: &ProxyPool,
    proxy: Option<&ProxySession>,
    max_concurrent: usize,
    funnel: &mut ScrapeFunnelCounters,
) -> Vec<ScrapedPage> {
    let proxy = proxy.cloned();
    let mut pages = Vec::new();
    let mut in_flight = FuturesUnordered::new();
    let mut remaining = urls.iter().cloned();

    let fetch_one = |url: String, proxy: Option<ProxySession>| async move {
        let started = Instant::now();
        let outcome = fetch_page(&url, proxy.as_ref()).await;
        (outcome, proxy, started.elapsed().as_millis() as u32)
    };

    for _ in 0..max_concurrent {
        if let Some(url) = remaining.next() {
            in_flight.push(fetch_one(url, proxy.clone()));
        }
    }

    while let Some((result, attempt_proxy, latency_ms)) = in_flight.next().await {
        funnel.pages_fetched += 1;
        funnel.subpages_attempted += 1;

        if let Some(session) = &attempt_proxy {
            proxy_pool.record_outcome(&session.session_id, latency_ms, result.is_err()).await;
        }

        match result {
            Ok(page) => {
                funnel.pages_classified_ok += 1;
                funnel.subpages_ok += 1;
                pages.push(page);
            }
            Err(err) => {
                funnel.pages_rejected += 1;
                funnel.record_subpage_error(err.bucket_tag());
            }
        }

        if let Some(url) = remaining.next() {
            in_flight.push(fetch_one(url, proxy.clone()));
        }
    }

    pages
}
