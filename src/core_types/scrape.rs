//! Scraper output entities (spec.md §4.5) and proxy health bookkeeping
//! (§4.2).

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// One fetched page, before chunking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedPage {
    pub url: String,
    pub html: String,
    pub text: String,
    pub status_code: u16,
    pub fetched_via_proxy: bool,
    /// Same-host internal HTML links found on the page.
    pub links: Vec<String>,
    /// Links to non-HTML documents (PDF/DOC/PPT/...) found on the page,
    /// kept separate from `links` since the scraper never fetches them.
    pub document_links: Vec<String>,
    pub success: bool,
    pub error: Option<String>,
}

impl ScrapedPage {
    pub fn ok(url: impl Into<String>, html: String, text: String, status_code: u16, fetched_via_proxy: bool, links: Vec<String>, document_links: Vec<String>) -> Self {
        Self { url: url.into(), html, text, status_code, fetched_via_proxy, links, document_links, success: true, error: None }
    }

    pub fn failed(url: impl Into<String>, status_code: u16, fetched_via_proxy: bool, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: String::new(),
            text: String::new(),
            status_code,
            fetched_via_proxy,
            links: Vec::new(),
            document_links: Vec::new(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Outcome of scraping one company's site: the main page plus any subpages
/// the link selector chose to fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub main_page: Option<ScrapedPage>,
    pub subpages: Vec<ScrapedPage>,
    pub funnel: ScrapeFunnelCounters,
    pub main_page_fail_reason: Option<String>,
}

impl ScrapeResult {
    pub fn all_pages(&self) -> impl Iterator<Item = &ScrapedPage> {
        self.main_page.iter().chain(self.subpages.iter())
    }

    pub fn pages_ok(&self) -> usize {
        self.all_pages().count()
    }
}

/// Counters tracked through the discover -> probe -> select -> fetch ->
/// classify funnel, surfaced in the batch status payload's subpage-pipeline
/// panel (§4.11, §7): `subpages_ok <= subpages_attempted <=
/// min(links_selected, max_subpages)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrapeFunnelCounters {
    pub urls_discovered: usize,
    pub urls_probed: usize,
    pub urls_reachable: usize,
    pub pages_fetched: usize,
    pub pages_classified_ok: usize,
    pub pages_rejected: usize,
    /// Links found in the main page's raw HTML, before any filtering.
    pub links_in_html: usize,
    /// Links remaining after same-host/blacklist/extension filtering.
    pub links_after_filter: usize,
    /// Links the link selector chose to fetch, capped at `max_subpages`.
    pub links_selected: usize,
    /// Subpages the pipeline actually attempted to fetch.
    pub subpages_attempted: usize,
    /// Subpages that fetched and classified successfully.
    pub subpages_ok: usize,
    /// Subpage fetch/classification failures, bucketed by reason tag.
    pub subpage_errors: HashMap<String, usize>,
}

impl ScrapeFunnelCounters {
    pub fn record_subpage_error(&mut self, reason_tag: impl Into<String>) {
        *self.subpage_errors.entry(reason_tag.into()).or_insert(0) += 1;
    }
}

/// Rolling health stats for one proxy session (§4.2). `latencies_ms` is a
/// bounded ring buffer of the last 200 samples used to compute p50/p95.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyStats {
    pub session_id: String,
    pub requests_total: u64,
    pub requests_failed: u64,
    #[serde(skip)]
    pub latencies_ms: VecDeque<u32>,
}

const LATENCY_WINDOW: usize = 200;

impl ProxyStats {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            requests_total: 0,
            requests_failed: 0,
            latencies_ms: VecDeque::with_capacity(LATENCY_WINDOW),
        }
    }

    pub fn record(&mut self, latency_ms: u32, failed: bool) {
        self.requests_total += 1;
        if failed {
            self.requests_failed += 1;
        }
        if self.latencies_ms.len() == LATENCY_WINDOW {
            self.latencies_ms.pop_front();
        }
        self.latencies_ms.push_back(latency_ms);
    }

    pub fn failure_rate(&self) -> f64 {
        if self.requests_total == 0 {
            0.0
        } else {
            self.requests_failed as f64 / self.requests_total as f64
        }
    }

    pub fn percentile(&self, pct: f64) -> Option<u32> {
        if self.latencies_ms.is_empty() {
            return None;
        }
        let mut sorted: Vec<u32> = self.latencies_ms.iter().copied().collect();
        sorted.sort_unstable();
        let idx = ((sorted.len() as f64 - 1.0) * pct).round() as usize;
        sorted.get(idx).copied()
    }

    pub fn p50(&self) -> Option<u32> {
        self.percentile(0.50)
    }

    pub fn p95(&self) -> Option<u32> {
        self.percentile(0.95)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_over_ring_buffer() {
        let mut stats = ProxyStats::new("sess-1");
        for ms in 1..=100u32 {
            stats.record(ms, false);
        }
        assert_eq!(stats.p50(), Some(50));
        assert!(stats.p95().unwrap() >= 95);
    }

    #[test]
    fn ring_buffer_evicts_oldest_sample() {
        let mut stats = ProxyStats::new("sess-2");
        for ms in 0..250u32 {
            stats.record(ms, false);
        }
        assert_eq!(stats.latencies_ms.len(), 200);
        assert_eq!(*stats.latencies_ms.front().unwrap(), 50);
    }

    #[test]
    fn failure_rate_tracks_failed_requests() {
        let mut stats = ProxyStats::new("sess-3");
        stats.record(10, false);
        stats.record(20, true);
        assert!((stats.failure_rate() - 0.5).abs() < f64::EPSILON);
    }
}
