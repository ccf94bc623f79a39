//! URL variation prober (§4.4): try a handful of plausible URL forms for a
//! company's recorded website field and return the first one that
//! resolves, tagging every failed variation along the way.

use crate::error::{PipelineError, ProbeTag};
use crate::http_client;
use crate::logging::log_debug;
use std::time::Instant;

/// Generate the URL variations to try, in probe order, from a raw website
/// field that may be missing a scheme, a `www.` prefix, or both.
pub fn url_variations(raw: &str) -> Vec<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Vec::new();
    }

    let (scheme_stripped, had_scheme) = match trimmed.split_once("://") {
        Some((_, rest)) => (rest, true),
        None => (trimmed, false),
    };
    let has_www = scheme_stripped.starts_with("www.");
    let bare = scheme_stripped.strip_prefix("www.").unwrap_or(scheme_stripped);

    let mut hosts = Vec::new();
    if has_www {
        hosts.push(scheme_stripped.to_string());
        hosts.push(bare.to_string());
    } else {
        hosts.push(bare.to_string());
        hosts.push(format!("www.{bare}"));
    }

    let mut out = Vec::new();
    for host in hosts {
        out.push(format!("https://{host}"));
        out.push(format!("http://{host}"));
    }

    if had_scheme {
        out.retain(|v| v != trimmed);
        out.insert(0, trimmed.to_string());
    }

    out
}

#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub resolved_url: String,
    pub status_code: u16,
    pub latency_ms: u32,
}

/// Try each URL variation in order, returning the first reachable one.
/// Some probe failures are considered worth retrying with the next
/// variation (DNS, refused, timeout); others (explicit block) stop the
/// probe early since trying `http://` after `https://` was blocked by a
/// WAF won't help.
pub async fn probe(raw_website: &str) -> Result<ProbeOutcome, PipelineError> {
    let variations = url_variations(raw_website);
    if variations.is_empty() {
        return Err(PipelineError::bad_request("empty website field"));
    }

    let mut last_error = None;

    for candidate in &variations {
        let host = url::Url::parse(candidate)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| candidate.clone());

        let client = http_client::build_client(&host, None)?;
        let started = Instant::now();

        log_debug!(candidate = %candidate, "probing URL variation");

        match client.head(candidate).send().await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() || status.is_redirection() {
                    return Ok(ProbeOutcome {
                        resolved_url: resp.url().to_string(),
                        status_code: status.as_u16(),
                        latency_ms: started.elapsed().as_millis() as u32,
                    });
                }
                let err = PipelineError::probe(
                    if status.as_u16() == 403 { ProbeTag::Blocked } else { ProbeTag::ServerError },
                    format!("{candidate} returned {status}"),
                );
                let should_stop = matches!(err, PipelineError::Probe { tag: ProbeTag::Blocked, .. });
                last_error = Some(err);
                if should_stop {
                    break;
                }
            }
            Err(e) => {
                let err = http_client::classify_probe_error(&e);
                last_error = Some(err);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| PipelineError::probe(ProbeTag::Other, "no variation succeeded")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_both_schemes_and_www_variants() {
        let variations = url_variations("example.com");
        assert!(variations.contains(&"https://example.com".to_string()));
        assert!(variations.contains(&"https://www.example.com".to_string()));
        assert!(variations.contains(&"http://example.com".to_string()));
    }

    #[test]
    fn preserves_explicit_scheme_as_first_candidate() {
        let variations = url_variations("http://www.example.com");
        assert_eq!(variations[0], "http://www.example.com");
    }

    #[test]
    fn empty_input_yields_no_variations() {
        assert!(url_variations("   ").is_empty());
    }
}
