//! SmartChunker (§4.6): token-bounded chunking of a scrape's concatenated
//! page text, aware of page boundaries so a chunk's `source_urls` can be
//! attributed back to the pages it was drawn from.

use crate::core_types::{Chunk, ScrapeResult};
use crate::internals::tokens::{estimate_tokens, TokenizerFamily};
use crate::logging::log_warn;

const PAGE_START_PREFIX: &str = "--- PAGE START: ";
const PAGE_END_MARKER: &str = "--- PAGE END ---";
const MAX_SOURCE_URLS_PER_CHUNK: usize = 5;

pub struct SmartChunker {
    pub effective_max_tokens: u32,
    pub family: TokenizerFamily,
}

impl Default for SmartChunker {
    fn default() -> Self {
        Self { effective_max_tokens: 6000, family: TokenizerFamily::Cl100k }
    }
}

impl SmartChunker {
    pub fn new(effective_max_tokens: u32) -> Self {
        Self { effective_max_tokens, family: TokenizerFamily::Cl100k }
    }

    /// Serialize every page into one marked-up document, then chunk it.
    pub fn chunk_scrape_result(&self, scrape: &ScrapeResult) -> Vec<Chunk> {
        let mut document = String::new();
        for page in scrape.all_pages() {
            document.push_str(PAGE_START_PREFIX);
            document.push_str(&page.url);
            document.push_str(" ---\n");
            document.push_str(&page.text);
            document.push('\n');
            document.push_str(PAGE_END_MARKER);
            document.push('\n');
        }
        self.chunk_document(&document)
    }

    /// Split a page-marked document into token-bounded chunks.
    pub fn chunk_document(&self, document: &str) -> Vec<Chunk> {
        let segments = split_by_page_markers(document);
        let mut chunks = Vec::new();
        let mut current_text = String::new();
        let mut current_sources: Vec<String> = Vec::new();
        let mut current_tokens = 0u32;

        for (url, text) in segments {
            for piece in self.split_segment_to_fit(&text) {
                let piece_tokens = estimate_tokens(&piece, self.family);

                if current_tokens + piece_tokens > self.effective_max_tokens && !current_text.is_empty() {
                    chunks.push(self.finalize_chunk(chunks.len(), &current_text, &current_sources));
                    current_text.clear();
                    current_sources.clear();
                    current_tokens = 0;
                }

                if !current_text.is_empty() {
                    current_text.push('\n');
                }
                current_text.push_str(&piece);
                current_tokens += piece_tokens;
                if !current_sources.contains(&url) && current_sources.len() < MAX_SOURCE_URLS_PER_CHUNK {
                    current_sources.push(url.clone());
                }
            }
        }

        if !current_text.trim().is_empty() {
            chunks.push(self.finalize_chunk(chunks.len(), &current_text, &current_sources));
        }

        let mut chunks = self.validate_and_resplit(chunks);
        let total = chunks.len();
        for chunk in &mut chunks {
            chunk.total_chunks = total;
        }
        chunks
    }

    fn finalize_chunk(&self, index: usize, text: &str, sources: &[String]) -> Chunk {
        Chunk {
            index,
            total_chunks: 0,
            text: text.to_string(),
            source_urls: sources.iter().take(MAX_SOURCE_URLS_PER_CHUNK).cloned().collect(),
            estimated_tokens: estimate_tokens(text, self.family),
        }
    }

    /// Break one page's text into pieces that each individually fit the
    /// token budget, falling back paragraph -> line -> character as
    /// needed for pathologically long runs of text with no breaks.
    fn split_segment_to_fit(&self, text: &str) -> Vec<String> {
        if estimate_tokens(text, self.family) <= self.effective_max_tokens {
            return vec![text.to_string()];
        }

        let paragraphs: Vec<&str> = text.split("\n\n").filter(|p| !p.trim().is_empty()).collect();
        if paragraphs.len() > 1 {
            return paragraphs.into_iter().flat_map(|p| self.split_segment_to_fit(p)).collect();
        }

        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.len() > 1 {
            return lines.into_iter().flat_map(|l| self.split_segment_to_fit(l)).collect();
        }

        // Single unbroken line too long for the budget: fall back to a
        // character-count approximation (~4 chars/token) and hard-split.
        log_warn!(
            chars = text.chars().count(),
            "falling back to character-level split for unbreakable text"
        );
        let approx_chars_per_chunk = (self.effective_max_tokens as usize).saturating_mul(4).max(1);
        text.chars()
            .collect::<Vec<_>>()
            .chunks(approx_chars_per_chunk)
            .map(|c| c.iter().collect::<String>())
            .collect()
    }

    /// Final sweep: any chunk that still exceeds the budget (estimate
    /// drift from combining pieces) gets re-split on its own.
    fn validate_and_resplit(&self, chunks: Vec<Chunk>) -> Vec<Chunk> {
        let mut out = Vec::new();
        for chunk in chunks {
            if chunk.estimated_tokens <= self.effective_max_tokens {
                out.push(chunk);
                continue;
            }
            log_warn!(index = chunk.index, tokens = chunk.estimated_tokens, "re-splitting oversized chunk");
            for piece in self.split_segment_to_fit(&chunk.text) {
                out.push(Chunk {
                    index: out.len(),
                    total_chunks: 0,
                    text: piece.clone(),
                    source_urls: chunk.source_urls.iter().take(MAX_SOURCE_URLS_PER_CHUNK).cloned().collect(),
                    estimated_tokens: estimate_tokens(&piece, self.family),
                });
            }
        }
        for (i, chunk) in out.iter_mut().enumerate() {
            chunk.index = i;
        }
        out
    }
}

/// Split a page-marked document into `(url, text)` segments. Text outside
/// any marker pair (shouldn't normally happen) is attributed to an empty
/// URL rather than dropped.
fn split_by_page_markers(document: &str) -> Vec<(String, String)> {
    let mut segments = Vec::new();
    let mut rest = document;

    while let Some(start_idx) = rest.find(PAGE_START_PREFIX) {
        if start_idx > 0 {
            let preamble = &rest[..start_idx];
            if !preamble.trim().is_empty() {
                segments.push((String::new(), preamble.trim().to_string()));
            }
        }
        rest = &rest[start_idx + PAGE_START_PREFIX.len()..];
        let Some(header_end) = rest.find(" ---\n") else { break };
        let url = rest[..header_end].to_string();
        rest = &rest[header_end + " ---\n".len()..];

        let end_idx = rest.find(PAGE_END_MARKER).unwrap_or(rest.len());
        let text = rest[..end_idx].trim().to_string();
        if !text.is_empty() {
            segments.push((url, text));
        }
        rest = if end_idx < rest.len() { &rest[end_idx + PAGE_END_MARKER.len()..] } else { "" };
    }

    if segments.is_empty() && !document.trim().is_empty() {
        segments.push((String::new(), document.trim().to_string()));
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::{ScrapeFunnelCounters, ScrapedPage};

    fn page(url: &str, text: &str) -> ScrapedPage {
        ScrapedPage::ok(url, String::new(), text.to_string(), 200, false, vec![], vec![])
    }

    #[test]
    fn chunks_carry_source_urls() {
        let scrape = ScrapeResult {
            main_page: Some(page("https://acme.com", "We are Acme, founded in 2001.")),
            subpages: vec![page("https://acme.com/sobre", "Acme makes widgets.")],
            funnel: ScrapeFunnelCounters::default(),
            main_page_fail_reason: None,
        };
        let chunker = SmartChunker::new(6000);
        let chunks = chunker.chunk_scrape_result(&scrape);
        assert!(!chunks.is_empty());
        assert!(chunks.iter().any(|c| c.source_urls.contains(&"https://acme.com".to_string())));
    }

    #[test]
    fn splits_oversized_document_into_multiple_chunks() {
        let huge_text = "Esta é uma frase de teste sobre a empresa. ".repeat(2000);
        let document = format!("--- PAGE START: https://acme.com ---\n{huge_text}\n--- PAGE END ---\n");
        let chunker = SmartChunker::new(500);
        let chunks = chunker.chunk_document(&document);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.estimated_tokens <= 500);
        }
    }

    #[test]
    fn handles_pathologically_long_unbroken_line() {
        let unbroken = "a".repeat(20_000);
        let document = format!("--- PAGE START: https://acme.com ---\n{unbroken}\n--- PAGE END ---\n");
        let chunker = SmartChunker::new(100);
        let chunks = chunker.chunk_document(&document);
        assert!(chunks.len() > 1);
    }
}
