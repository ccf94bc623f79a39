//! Crate-wide error taxonomy.
//!
//! Every layer (probe, proxy, scrape, LLM) raises a typed variant of
//! [`PipelineError`]. The batch orchestrator never lets these escape a
//! per-company task: it catches, categorizes, and folds them into the
//! structured JSON error envelope described for `save_scrape_results_mega_batch`.
//!
//! # Error Categories
//!
//! Use [`PipelineError::category()`] to route handling decisions and
//! [`PipelineError::is_retryable()`]-style helpers to decide whether a
//! caller should retry.

use crate::logging::{log_error, log_warn};
use thiserror::Error;

/// High-level categorization for routing and handling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Probe-layer failures (URL unreachable in any variation).
    Probe,
    /// Proxy-layer failures (timeouts, connection errors, HTTP errors via proxy).
    Proxy,
    /// Scrape-layer content classification failures (Cloudflare, soft 404, thin content).
    Scrape,
    /// LLM provider/call-manager failures.
    Llm,
    /// Caller supplied invalid input; not retryable.
    Client,
    /// Internal invariant violation; should be investigated.
    Internal,
}

/// Severity for logging and alerting decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Critical,
    Error,
    Warning,
    Info,
}

/// The closed taxonomy described in spec §7.
///
/// Layer tags (`probe:dns`, `proxy:timeout`, `scrape:soft_404`, ...) are
/// carried as the `tag` field on each layer's variant so that
/// [`PipelineError::bucket_tag`] and the diagnosis aggregation in
/// `orchestrator::metrics` can group failures without re-deriving the tag
/// from the error message.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    // ---- Probe layer ----
    #[error("probe failed ({tag}): {message}")]
    Probe { tag: ProbeTag, message: String },

    // ---- Proxy layer ----
    #[error("proxy failed ({tag}): {message}")]
    Proxy { tag: ProxyTag, message: String },

    // ---- Scrape layer ----
    #[error("scrape failed ({tag}): {message}")]
    Scrape { tag: ScrapeTag, message: String },

    // ---- LLM layer ----
    #[error("LLM rate limit exceeded, retry after {retry_after_secs}s")]
    LlmRateLimit { retry_after_secs: u64 },

    #[error("LLM request timed out after {timeout_secs}s")]
    LlmTimeout { timeout_secs: u64 },

    #[error("LLM bad request: {message}")]
    LlmBadRequest { message: String },

    #[error("LLM output looks degenerate: {message}")]
    LlmDegeneration { message: String },

    #[error("LLM provider error: {message}")]
    LlmProvider { message: String },

    #[error("failed to parse LLM output as JSON: {message}")]
    LlmParse { message: String },

    // ---- Generic ----
    #[error("invalid input: {message}")]
    BadRequest { message: String },

    #[error("internal invariant violated: {message}")]
    Internal { message: String },
}

/// Probe-layer failure tags, per spec §4.4 / §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeTag {
    Dns,
    Timeout,
    Refused,
    Ssl,
    Blocked,
    ServerError,
    RedirectLoop,
    Other,
}

impl ProbeTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dns => "dns",
            Self::Timeout => "timeout",
            Self::Refused => "refused",
            Self::Ssl => "ssl",
            Self::Blocked => "blocked",
            Self::ServerError => "server_error",
            Self::RedirectLoop => "redirect_loop",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ProbeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Proxy-layer failure tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyTag {
    Timeout,
    Connection,
    Http403,
    Http5xx,
    Ssl,
    EmptyResponse,
    Other,
}

impl ProxyTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::Http403 => "http_403",
            Self::Http5xx => "http_5xx",
            Self::Ssl => "ssl",
            Self::EmptyResponse => "empty_response",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ProxyTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Scrape-layer (content classification) failure tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeTag {
    BlockedCloudflare,
    BlockedWaf,
    Soft404,
    Cloudflare,
    Timeout,
    ThinContent,
    EmptyContent,
    Error,
    NullResponse,
}

impl ScrapeTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BlockedCloudflare => "blocked_cloudflare",
            Self::BlockedWaf => "blocked_waf",
            Self::Soft404 => "soft_404",
            Self::Cloudflare => "cloudflare",
            Self::Timeout => "timeout",
            Self::ThinContent => "thin_content",
            Self::EmptyContent => "empty_content",
            Self::Error => "error",
            Self::NullResponse => "null_response",
        }
    }
}

impl std::fmt::Display for ScrapeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Four top-level failure-diagnosis buckets surfaced in the batch status payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisBucket {
    SiteOffline,
    ProxyInfra,
    Blocked,
    ContentIssue,
    Other,
}

/// Convenient result alias used throughout the crate.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Stable bucket string used in `main_page_fail_reason` and the error
    /// histogram (e.g. `"probe_dns_error"`, `"scrape_blocked_cloudflare"`).
    pub fn bucket_tag(&self) -> String {
        match self {
            Self::Probe { tag, .. } => format!("probe_{}", probe_tag_long(*tag)),
            Self::Proxy { tag, .. } => format!("proxy_{}", tag),
            Self::Scrape { tag, .. } => format!("scrape_{}", tag),
            Self::LlmRateLimit { .. } => "llm_rate_limit".to_string(),
            Self::LlmTimeout { .. } => "llm_timeout".to_string(),
            Self::LlmBadRequest { .. } => "llm_bad_request".to_string(),
            Self::LlmDegeneration { .. } => "llm_degeneration".to_string(),
            Self::LlmProvider { .. } => "llm_error".to_string(),
            Self::LlmParse { .. } => "llm_parse_error".to_string(),
            Self::BadRequest { .. } => "bad_request".to_string(),
            Self::Internal { .. } => "internal".to_string(),
        }
    }

    /// Roll this error up into one of the four operator-facing diagnosis
    /// buckets, per spec §7.
    pub fn diagnosis_bucket(&self) -> DiagnosisBucket {
        use DiagnosisBucket::*;
        match self {
            Self::Probe { tag, .. } => match tag {
                ProbeTag::Dns | ProbeTag::Refused | ProbeTag::ServerError
                | ProbeTag::RedirectLoop | ProbeTag::Ssl => SiteOffline,
                ProbeTag::Timeout | ProbeTag::Other => ProxyInfra,
                ProbeTag::Blocked => Blocked,
            },
            Self::Proxy { tag, .. } => match tag {
                ProxyTag::Http5xx => SiteOffline,
                ProxyTag::Http403 => Blocked,
                _ => ProxyInfra,
            },
            Self::Scrape { tag, .. } => match tag {
                ScrapeTag::BlockedWaf | ScrapeTag::BlockedCloudflare | ScrapeTag::Cloudflare => {
                    Blocked
                }
                ScrapeTag::Soft404 | ScrapeTag::ThinContent | ScrapeTag::EmptyContent => {
                    ContentIssue
                }
                ScrapeTag::Timeout => ProxyInfra,
                ScrapeTag::Error | ScrapeTag::NullResponse => Other,
            },
            _ => Other,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Probe { .. } => ErrorCategory::Probe,
            Self::Proxy { .. } => ErrorCategory::Proxy,
            Self::Scrape { .. } => ErrorCategory::Scrape,
            Self::LlmRateLimit { .. }
            | Self::LlmTimeout { .. }
            | Self::LlmBadRequest { .. }
            | Self::LlmDegeneration { .. }
            | Self::LlmProvider { .. }
            | Self::LlmParse { .. } => ErrorCategory::Llm,
            Self::BadRequest { .. } => ErrorCategory::Client,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Internal { .. } => ErrorSeverity::Critical,
            Self::LlmBadRequest { .. } | Self::BadRequest { .. } => ErrorSeverity::Error,
            Self::Probe { .. } | Self::Proxy { .. } | Self::Scrape { .. } => ErrorSeverity::Warning,
            Self::LlmRateLimit { .. } | Self::LlmTimeout { .. } => ErrorSeverity::Warning,
            Self::LlmDegeneration { .. } | Self::LlmProvider { .. } | Self::LlmParse { .. } => {
                ErrorSeverity::Warning
            }
        }
    }

    /// Whether the LLM call manager (§4.8) should retry with another
    /// provider. `BadRequest` is never retried; everything else in the LLM
    /// family is.
    pub fn is_llm_retryable(&self) -> bool {
        matches!(
            self,
            Self::LlmRateLimit { .. }
                | Self::LlmTimeout { .. }
                | Self::LlmDegeneration { .. }
                | Self::LlmProvider { .. }
        )
    }

    /// Whether this failure looks like the site itself is actively
    /// rejecting us (403/429, a Cloudflare/WAF challenge, a captcha wall).
    /// Retrying these only burns proxy reputation further, so the main-page
    /// fetch retry loop (§4.5 stage 2) short-circuits on sight rather than
    /// spending its remaining attempts.
    pub fn is_site_rejection(&self) -> bool {
        const SITE_REJECTION_SIGNALS: &[&str] =
            &["403", "429", "cloudflare", "captcha", "waf", "forbidden", "blocked"];
        let tag = self.bucket_tag();
        let message = self.to_string().to_lowercase();
        SITE_REJECTION_SIGNALS.iter().any(|signal| tag.contains(signal) || message.contains(signal))
    }

    /// Whether the batch orchestrator's per-company retry loop (§4.11) should
    /// retry this error (transient) or give up immediately (persistent).
    pub fn is_transient_scrape_error(&self) -> bool {
        match self {
            Self::Probe { tag, .. } => {
                matches!(tag, ProbeTag::Timeout | ProbeTag::Other)
            }
            Self::Proxy { tag, .. } => !matches!(tag, ProxyTag::Http403),
            Self::Scrape { tag, .. } => matches!(tag, ScrapeTag::Timeout | ScrapeTag::EmptyContent),
            _ => false,
        }
    }

    pub fn probe(tag: ProbeTag, message: impl Into<String>) -> Self {
        let message = message.into();
        log_warn!(tag = %tag, message = %message, "probe failed");
        Self::Probe { tag, message }
    }

    pub fn proxy(tag: ProxyTag, message: impl Into<String>) -> Self {
        let message = message.into();
        log_warn!(tag = %tag, message = %message, "proxy request failed");
        Self::Proxy { tag, message }
    }

    pub fn scrape(tag: ScrapeTag, message: impl Into<String>) -> Self {
        let message = message.into();
        log_warn!(tag = %tag, message = %message, "scrape content rejected");
        Self::Scrape { tag, message }
    }

    pub fn llm_rate_limit(retry_after_secs: u64) -> Self {
        log_warn!(retry_after_secs, "LLM provider rate limit exceeded");
        Self::LlmRateLimit { retry_after_secs }
    }

    pub fn llm_timeout(timeout_secs: u64) -> Self {
        log_warn!(timeout_secs, "LLM request timed out");
        Self::LlmTimeout { timeout_secs }
    }

    pub fn llm_bad_request(message: impl Into<String>) -> Self {
        let message = message.into();
        log_error!(message = %message, "LLM request rejected as malformed");
        Self::LlmBadRequest { message }
    }

    pub fn llm_degeneration(message: impl Into<String>) -> Self {
        let message = message.into();
        log_warn!(message = %message, "LLM output flagged as degenerate");
        Self::LlmDegeneration { message }
    }

    pub fn llm_provider(message: impl Into<String>) -> Self {
        let message = message.into();
        log_error!(message = %message, "LLM provider error");
        Self::LlmProvider { message }
    }

    pub fn llm_parse(message: impl Into<String>) -> Self {
        let message = message.into();
        log_warn!(message = %message, "failed to parse LLM JSON output");
        Self::LlmParse { message }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        let message = message.into();
        log_error!(message = %message, "invalid input");
        Self::BadRequest { message }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        let message = message.into();
        log_error!(message = %message, "internal invariant violated");
        Self::Internal { message }
    }
}

/// `ProbeTag` uses short names for `DiagnosisBucket` matching but the
/// `main_page_fail_reason` string wants the original long-form suffix
/// (`probe_dns_error`, not `probe_dns`).
fn probe_tag_long(tag: ProbeTag) -> &'static str {
    match tag {
        ProbeTag::Dns => "dns_error",
        ProbeTag::Timeout => "timeout",
        ProbeTag::Refused => "connection_refused",
        ProbeTag::Ssl => "ssl_error",
        ProbeTag::Blocked => "blocked",
        ProbeTag::ServerError => "server_error",
        ProbeTag::RedirectLoop => "too_many_redirects",
        ProbeTag::Other => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_tag_matches_spec_examples() {
        let err = PipelineError::probe(ProbeTag::Dns, "nodename nor servname provided");
        assert_eq!(err.bucket_tag(), "probe_dns_error");

        let err = PipelineError::scrape(ScrapeTag::BlockedCloudflare, "Cloudflare");
        assert_eq!(err.bucket_tag(), "scrape_blocked_cloudflare");
    }

    #[test]
    fn diagnosis_buckets_follow_spec_table() {
        assert_eq!(
            PipelineError::probe(ProbeTag::Dns, "x").diagnosis_bucket(),
            DiagnosisBucket::SiteOffline
        );
        assert_eq!(
            PipelineError::proxy(ProxyTag::Http403, "x").diagnosis_bucket(),
            DiagnosisBucket::Blocked
        );
        assert_eq!(
            PipelineError::scrape(ScrapeTag::ThinContent, "x").diagnosis_bucket(),
            DiagnosisBucket::ContentIssue
        );
        assert_eq!(
            PipelineError::proxy(ProxyTag::Timeout, "x").diagnosis_bucket(),
            DiagnosisBucket::ProxyInfra
        );
    }

    #[test]
    fn llm_bad_request_never_retryable() {
        let err = PipelineError::llm_bad_request("too many tokens");
        assert!(!err.is_llm_retryable());
    }

    #[test]
    fn llm_rate_limit_is_retryable() {
        let err = PipelineError::llm_rate_limit(30);
        assert!(err.is_llm_retryable());
    }

    #[test]
    fn site_rejection_detected_for_cloudflare_and_403() {
        assert!(PipelineError::scrape(ScrapeTag::BlockedCloudflare, "Cloudflare").is_site_rejection());
        assert!(PipelineError::proxy(ProxyTag::Http403, "forbidden").is_site_rejection());
        assert!(!PipelineError::proxy(ProxyTag::Timeout, "timed out").is_site_rejection());
    }
}
