//! Batch status payload aggregation (§4.11, §7): rolls up per-company
//! results into the histogram and percentile figures an operator watches
//! mid-run.

use crate::core_types::{CompanyResult, CompanyStatus};
use crate::error::DiagnosisBucket;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Default, Serialize)]
pub struct BatchStatus {
    pub total_companies: usize,
    pub succeeded: usize,
    pub partial: usize,
    pub failed: usize,
    pub diagnosis_histogram: HashMap<String, usize>,
    pub fail_reason_histogram: HashMap<String, usize>,
    pub pages_total: usize,
    pub pages_ok: usize,
    pub pages_failed: usize,
    pub p50_pages_per_company: Option<f64>,
    pub p95_pages_per_company: Option<f64>,
}

pub struct MetricsAggregator {
    results: Vec<CompanyResult>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self { results: Vec::new() }
    }

    pub fn record(&mut self, result: CompanyResult) {
        self.results.push(result);
    }

    pub fn snapshot(&self) -> BatchStatus {
        let mut status = BatchStatus { total_companies: self.results.len(), ..Default::default() };
        let mut pages_counts = Vec::new();

        for result in &self.results {
            match result.status {
                CompanyStatus::Success => status.succeeded += 1,
                CompanyStatus::PartialSuccess => status.partial += 1,
                CompanyStatus::Failed => status.failed += 1,
            }

            status.pages_total += result.pages_total;
            status.pages_ok += result.pages_ok;
            status.pages_failed += result.pages_failed;
            pages_counts.push(result.pages_ok);

            if let Some(reason) = &result.main_page_fail_reason {
                *status.fail_reason_histogram.entry(reason.clone()).or_insert(0) += 1;
                let bucket = diagnosis_bucket_for_reason(reason);
                *status.diagnosis_histogram.entry(bucket).or_insert(0) += 1;
            }
        }

        pages_counts.sort_unstable();
        status.p50_pages_per_company = percentile(&pages_counts, 0.50);
        status.p95_pages_per_company = percentile(&pages_counts, 0.95);

        status
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

fn percentile(sorted: &[usize], pct: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let idx = ((sorted.len() as f64 - 1.0) * pct).round() as usize;
    sorted.get(idx).map(|v| *v as f64)
}

/// Best-effort mapping from a `bucket_tag` string (as stored on
/// `CompanyResult::main_page_fail_reason`) back to its diagnosis bucket,
/// for aggregation without retaining the original typed error.
fn diagnosis_bucket_for_reason(reason: &str) -> String {
    let bucket = if reason.starts_with("probe_dns") || reason.starts_with("probe_connection_refused")
        || reason.starts_with("probe_ssl") || reason.starts_with("probe_server_error")
        || reason.starts_with("probe_too_many_redirects") || reason == "proxy_http_5xx"
    {
        DiagnosisBucket::SiteOffline
    } else if reason.contains("blocked") || reason.contains("cloudflare") || reason == "proxy_http_403" {
        DiagnosisBucket::Blocked
    } else if reason.contains("thin_content") || reason.contains("soft_404") || reason.contains("empty_content") {
        DiagnosisBucket::ContentIssue
    } else if reason.contains("timeout") || reason.contains("proxy_connection") || reason.contains("proxy_ssl") {
        DiagnosisBucket::ProxyInfra
    } else {
        DiagnosisBucket::Other
    };

    match bucket {
        DiagnosisBucket::SiteOffline => "site_offline",
        DiagnosisBucket::ProxyInfra => "proxy_infra",
        DiagnosisBucket::Blocked => "blocked",
        DiagnosisBucket::ContentIssue => "content_issue",
        DiagnosisBucket::Other => "other",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: CompanyStatus, fail_reason: Option<&str>, pages_ok: usize) -> CompanyResult {
        CompanyResult {
            cnpj_basico: "12345678".to_string(),
            status,
            profile: None,
            main_page_fail_reason: fail_reason.map(str::to_string),
            pages_total: pages_ok + 1,
            pages_ok,
            pages_failed: 1,
            error_json: None,
            completed_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn aggregates_status_counts() {
        let mut agg = MetricsAggregator::new();
        agg.record(result(CompanyStatus::Success, None, 5));
        agg.record(result(CompanyStatus::Failed, Some("probe_dns_error"), 0));
        let snapshot = agg.snapshot();
        assert_eq!(snapshot.succeeded, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.diagnosis_histogram.get("site_offline"), Some(&1));
    }

    #[test]
    fn computes_percentiles_over_pages_ok() {
        let mut agg = MetricsAggregator::new();
        for i in 0..10 {
            agg.record(result(CompanyStatus::Success, None, i));
        }
        let snapshot = agg.snapshot();
        assert!(snapshot.p50_pages_per_company.is_some());
        assert!(snapshot.p95_pages_per_company.unwrap() >= snapshot.p50_pages_per_company.unwrap());
    }
}
