//! HTML parsing and content classification helpers shared by the scrape
//! pipeline and the link selector.

use crate::error::{PipelineError, ScrapeTag};
use scraper::{Html, Selector};
use url::Url;

const CLOUDFLARE_SIGNATURES: &[&str] = &[
    "checking your browser before accessing",
    "attention required! | cloudflare",
    "cf-browser-verification",
    "ray id",
    "ddos protection by cloudflare",
];

const SOFT_404_PHRASES: &[&str] = &[
    "page not found",
    "página não encontrada",
    "pagina nao encontrada",
    "404 error",
    "conteúdo não encontrado",
    "a página que você procura não existe",
];

const WAF_SIGNATURES: &[&str] = &["access denied", "incapsula", "akamai", "forbidden by policy"];

const MIN_CONTENT_CHARS: usize = 200;

const DOCUMENT_EXTENSIONS: &[&str] = &[".pdf", ".doc", ".docx", ".ppt", ".pptx", ".xls", ".xlsx"];

/// Extract visible text from HTML, stripping `<script>`/`<style>` content.
pub fn extract_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let body_selector = Selector::parse("body").unwrap();
    let skip_selector = Selector::parse("script, style, noscript").unwrap();

    let skip_texts: std::collections::HashSet<String> = document
        .select(&skip_selector)
        .map(|el| el.text().collect::<String>())
        .collect();

    let mut text = String::new();
    if let Some(body) = document.select(&body_selector).next() {
        for fragment in body.text() {
            if skip_texts.contains(fragment) {
                continue;
            }
            text.push_str(fragment);
            text.push(' ');
        }
    } else {
        text = document.root_element().text().collect::<Vec<_>>().join(" ");
    }

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract and resolve every `<a href>` on the page against `base_url`,
/// keeping only http(s) links on the same host (subdomains like
/// blog.example.com are still worth following for a company site).
/// Returns `(internal_html_links, document_links)`: links to non-HTML
/// documents (PDF/DOC/PPT/XLS/...) are split out since the scraper never
/// fetches them, but they're still useful evidence of what a company
/// publishes.
pub fn extract_links(html: &str, base_url: &Url) -> (Vec<String>, Vec<String>) {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").unwrap();

    let mut links = Vec::new();
    let mut document_links = Vec::new();
    for el in document.select(&selector) {
        let Some(href) = el.value().attr("href") else { continue };
        let Ok(resolved) = base_url.join(href) else { continue };
        if resolved.scheme() != "http" && resolved.scheme() != "https" {
            continue;
        }
        if resolved.host_str() != base_url.host_str() {
            continue;
        }
        let mut resolved = resolved;
        resolved.set_fragment(None);
        let lower_path = resolved.path().to_lowercase();
        if DOCUMENT_EXTENSIONS.iter().any(|ext| lower_path.ends_with(ext)) {
            document_links.push(resolved.to_string());
        } else {
            links.push(resolved.to_string());
        }
    }
    links.sort();
    links.dedup();
    document_links.sort();
    document_links.dedup();
    (links, document_links)
}

/// Classify fetched content, rejecting pages that look like bot blocks,
/// soft 404s, or thin/empty content before they reach the chunker.
pub fn classify_content(status_code: u16, text: &str) -> Result<(), PipelineError> {
    if text.trim().is_empty() {
        return Err(PipelineError::scrape(ScrapeTag::EmptyContent, "no extractable text"));
    }

    let lower = text.to_lowercase();

    if CLOUDFLARE_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
        return Err(PipelineError::scrape(ScrapeTag::BlockedCloudflare, "Cloudflare challenge detected"));
    }

    if WAF_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
        return Err(PipelineError::scrape(ScrapeTag::BlockedWaf, "WAF block page detected"));
    }

    if status_code == 404 || SOFT_404_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
        return Err(PipelineError::scrape(ScrapeTag::Soft404, "soft 404 detected"));
    }

    if text.trim().chars().count() < MIN_CONTENT_CHARS {
        return Err(PipelineError::scrape(ScrapeTag::ThinContent, "content below minimum length"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_text_ignoring_scripts() {
        let html = "<html><body><p>Hello world</p><script>var x = 1;</script></body></html>";
        let text = extract_text(html);
        assert!(text.contains("Hello world"));
        assert!(!text.contains("var x"));
    }

    #[test]
    fn extracts_same_host_links_only() {
        let base = Url::parse("https://example.com/").unwrap();
        let html = r#"<a href="/about">About</a><a href="https://other.com/x">Other</a>"#;
        let (links, document_links) = extract_links(html, &base);
        assert_eq!(links, vec!["https://example.com/about".to_string()]);
        assert!(document_links.is_empty());
    }

    #[test]
    fn splits_document_links_from_html_links() {
        let base = Url::parse("https://example.com/").unwrap();
        let html = r#"<a href="/about">About</a><a href="/catalogo.pdf">Catalog</a>"#;
        let (links, document_links) = extract_links(html, &base);
        assert_eq!(links, vec!["https://example.com/about".to_string()]);
        assert_eq!(document_links, vec!["https://example.com/catalogo.pdf".to_string()]);
    }

    #[test]
    fn classify_rejects_cloudflare_challenge() {
        let text = "Checking your browser before accessing example.com. Ray ID: abc123";
        let err = classify_content(200, text).unwrap_err();
        assert_eq!(err.bucket_tag(), "scrape_blocked_cloudflare");
    }

    #[test]
    fn classify_rejects_thin_content() {
        let err = classify_content(200, "hi").unwrap_err();
        assert_eq!(err.bucket_tag(), "scrape_thin_content");
    }

    #[test]
    fn classify_accepts_substantial_content() {
        let text = "a ".repeat(150);
        assert!(classify_content(200, &text).is_ok());
    }
}
