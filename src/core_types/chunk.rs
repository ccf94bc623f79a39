//! The unit the chunker (§4.6) produces and Stage A (§4.10) consumes.

use serde::{Deserialize, Serialize};

/// A token-bounded slice of one or more pages' text, tagged with the
/// source URLs it was drawn from so Stage A extraction can cite evidence
/// back to a page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    /// Total number of chunks produced from the same scrape, so Stage A
    /// consumers and `FactBundle.source` can report `index / total`.
    pub total_chunks: usize,
    pub text: String,
    /// At most 5 source URLs; a chunk spanning more pages than that still
    /// only carries the first 5 it was drawn from.
    pub source_urls: Vec<String>,
    pub estimated_tokens: u32,
}
