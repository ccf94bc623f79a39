//! Token estimation shared by the chunker (§4.6) and the LLM provider
//! manager's input-token guard (§4.7).
//!
//! The original per-provider [`TokenCounter`] trait is kept but collapsed
//! to a single `cl100k_base`/`o200k_base` estimator — this crate dispatches
//! to many providers behind an OpenAI-compatible wire format, so there is
//! no per-provider tokenizer split left to make; accuracy only matters
//! enough to keep prompts under a provider's context window with margin.

use crate::error::PipelineError;
use crate::logging::log_warn;

use once_cell::sync::Lazy;
use tiktoken_rs::{cl100k_base, o200k_base, CoreBPE};

static CL100K: Lazy<CoreBPE> =
    Lazy::new(|| cl100k_base().expect("cl100k_base tokenizer ranks are bundled at compile time"));
static O200K: Lazy<CoreBPE> =
    Lazy::new(|| o200k_base().expect("o200k_base tokenizer ranks are bundled at compile time"));

/// Which tokenizer family to estimate with. Providers not on the
/// OpenAI/GPT-4o family still get a reasonable approximation from cl100k.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenizerFamily {
    Cl100k,
    O200k,
}

impl TokenizerFamily {
    /// Pick a tokenizer family by model name, defaulting to `cl100k`.
    pub fn for_model(model: &str) -> Self {
        if model.starts_with("o1") || model.starts_with("gpt-4o") || model.starts_with("o200k") {
            Self::O200k
        } else {
            Self::Cl100k
        }
    }

    fn bpe(self) -> &'static CoreBPE {
        match self {
            Self::Cl100k => &CL100K,
            Self::O200k => &O200K,
        }
    }
}

/// Estimate the token count of `text` under the given tokenizer family.
pub fn estimate_tokens(text: &str, family: TokenizerFamily) -> u32 {
    family.bpe().encode_with_special_tokens(text).len() as u32
}

/// Estimate tokens for a chat-style message list (role + content pairs),
/// including per-message formatting overhead.
pub fn estimate_message_tokens(messages: &[(&str, &str)], family: TokenizerFamily) -> u32 {
    let bpe = family.bpe();
    let mut total = 3u32;
    for (role, content) in messages {
        total += 4;
        total += bpe.encode_with_special_tokens(role).len() as u32;
        total += bpe.encode_with_special_tokens(content).len() as u32;
    }
    total += 3;
    total
}

/// Truncate `text` to at most `max_tokens` under the given family,
/// returning the original text unchanged if it already fits.
pub fn truncate_to_tokens(
    text: &str,
    max_tokens: u32,
    family: TokenizerFamily,
) -> Result<String, PipelineError> {
    let bpe = family.bpe();
    let tokens = bpe.encode_with_special_tokens(text);
    if tokens.len() <= max_tokens as usize {
        return Ok(text.to_string());
    }

    log_warn!(
        original_tokens = tokens.len(),
        max_tokens,
        "truncating text to fit token budget"
    );

    let truncated = &tokens[..max_tokens as usize];
    bpe.decode(truncated.to_vec())
        .map_err(|e| PipelineError::llm_parse(format!("failed to decode truncated tokens: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimates_nonzero_tokens_for_text() {
        let n = estimate_tokens("hello world, this is a test sentence", TokenizerFamily::Cl100k);
        assert!(n > 0);
    }

    #[test]
    fn truncate_is_noop_when_under_limit() {
        let text = "short text";
        let out = truncate_to_tokens(text, 1000, TokenizerFamily::Cl100k).unwrap();
        assert_eq!(out, text);
    }

    #[test]
    fn truncate_shrinks_long_text() {
        let text = "word ".repeat(2000);
        let out = truncate_to_tokens(&text, 10, TokenizerFamily::Cl100k).unwrap();
        let tokens = estimate_tokens(&out, TokenizerFamily::Cl100k);
        assert!(tokens <= 10);
    }
}
