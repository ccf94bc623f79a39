//! Fingerprinted HTTP client and proxy/probe error mapping (§4.3).
//!
//! `reqwest` has no native JA3/TLS fingerprint impersonation; this client
//! rotates realistic `User-Agent` + `Accept-Language` + header-order
//! profiles per request instead, which is the documented limitation noted
//! in DESIGN.md. Browser profiles are picked per-host so repeated fetches
//! of the same site look like one consistent visitor, not a different
//! browser on every request.

use crate::error::{PipelineError, ProbeTag, ProxyTag};
use crate::proxy_pool::ProxySession;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use std::time::Duration;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36 Edg/123.0.0.0",
];

const ACCEPT_LANGUAGES: &[&str] = &["pt-BR,pt;q=0.9,en;q=0.8", "pt-BR,pt;q=0.8", "pt-BR"];

/// Deterministically pick a browser profile for a host, so the same site
/// always sees the same simulated client across the probe + main-page +
/// subpage fetches.
fn profile_index_for_host(host: &str) -> usize {
    let mut hash: u64 = 1469598103934665603;
    for b in host.bytes() {
        hash ^= b as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    (hash % USER_AGENTS.len() as u64) as usize
}

fn headers_for_host(host: &str) -> HeaderMap {
    let idx = profile_index_for_host(host);
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENTS[idx % USER_AGENTS.len()]));
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static(ACCEPT_LANGUAGES[idx % ACCEPT_LANGUAGES.len()]),
    );
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers
}

/// Build a client for fetching `host`, optionally routed through a proxy
/// session. A fresh client is built per (host, proxy) pair rather than
/// reused globally, since header order and proxy routing are the
/// fingerprint surface we're rotating.
pub fn build_client(host: &str, proxy: Option<&ProxySession>) -> Result<reqwest::Client, PipelineError> {
    let mut builder = reqwest::Client::builder()
        .default_headers(headers_for_host(host))
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .redirect(reqwest::redirect::Policy::limited(5));

    if let Some(session) = proxy {
        let proxy = reqwest::Proxy::all(&session.proxy_url)
            .map_err(|e| PipelineError::internal(format!("invalid proxy URL: {e}")))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| PipelineError::internal(format!("failed to build HTTP client: {e}")))
}

/// Map a `reqwest::Error` encountered during URL probing (§4.4) into the
/// closed probe taxonomy.
pub fn classify_probe_error(err: &reqwest::Error) -> PipelineError {
    let tag = if err.is_timeout() {
        ProbeTag::Timeout
    } else if err.is_connect() {
        let msg = err.to_string().to_lowercase();
        if msg.contains("dns") || msg.contains("resolve") || msg.contains("lookup") {
            ProbeTag::Dns
        } else if msg.contains("refused") {
            ProbeTag::Refused
        } else {
            ProbeTag::Other
        }
    } else if err.is_redirect() {
        ProbeTag::RedirectLoop
    } else if let Some(status) = err.status() {
        if status.as_u16() == 403 || status.as_u16() == 401 {
            ProbeTag::Blocked
        } else if status.is_server_error() {
            ProbeTag::ServerError
        } else {
            ProbeTag::Other
        }
    } else if err.to_string().to_lowercase().contains("ssl")
        || err.to_string().to_lowercase().contains("tls")
        || err.to_string().to_lowercase().contains("certificate")
    {
        ProbeTag::Ssl
    } else {
        ProbeTag::Other
    };

    PipelineError::probe(tag, err.to_string())
}

/// Map a `reqwest::Error` encountered while fetching through a proxy
/// (§4.2) into the closed proxy taxonomy.
pub fn classify_proxy_error(err: &reqwest::Error) -> PipelineError {
    let tag = if err.is_timeout() {
        ProxyTag::Timeout
    } else if err.is_connect() {
        ProxyTag::Connection
    } else if let Some(status) = err.status() {
        if status.as_u16() == 403 {
            ProxyTag::Http403
        } else if status.is_server_error() {
            ProxyTag::Http5xx
        } else {
            ProxyTag::Other
        }
    } else if err.to_string().to_lowercase().contains("ssl") {
        ProxyTag::Ssl
    } else if err.is_decode() {
        ProxyTag::EmptyResponse
    } else {
        ProxyTag::Other
    };

    PipelineError::proxy(tag, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_host_gets_same_profile_every_time() {
        assert_eq!(profile_index_for_host("example.com"), profile_index_for_host("example.com"));
    }

    #[test]
    fn builds_client_without_proxy() {
        let client = build_client("example.com", None);
        assert!(client.is_ok());
    }
}
