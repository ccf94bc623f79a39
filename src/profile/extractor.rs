//! Stage A (§4.10): extract atomic, evidence-grounded facts from each
//! chunk independently via the LLM, fanned out with bounded concurrency.
//! Returns one `FactBundle` per chunk, which Stage B consumes as a list.

use crate::core_types::{Chunk, FactBundle, FactCategory, FactItem, LlmMessage, LlmRequest, Priority};
use crate::error::PipelineError;
use crate::llm::call_manager::CallManager;
use crate::logging::log_warn;
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;

const EVIDENCE_QUOTE_MAX_CHARS: usize = 320;
/// Per-category cap within one chunk's bundle, with local dedup by
/// lowercased/trimmed value before the cap is applied.
const PER_CATEGORY_CAP: usize = 20;

const SYSTEM_PROMPT: &str = "You extract factual claims about a company from a page of its own \
     website. For each fact, give a short category-appropriate key, the value, a short quote \
     (under 160 characters) from the text supporting it, and your confidence in the fact from 0 \
     to 1. Respond with a JSON array of objects with fields: category (one of identity, contact, \
     offerings, reputation), key, value, quote, confidence. If nothing relevant is present, \
     respond with an empty array.";

pub async fn extract_facts_from_chunks(
    chunks: &[Chunk],
    call_manager: &Arc<CallManager>,
    max_concurrent: usize,
) -> Vec<FactBundle> {
    let mut bundles = Vec::with_capacity(chunks.len());
    let mut in_flight = FuturesUnordered::new();
    let mut remaining = chunks.iter();

    for _ in 0..max_concurrent {
        if let Some(chunk) = remaining.next() {
            in_flight.push(extract_from_chunk(chunk.clone(), call_manager.clone()));
        }
    }

    while let Some(result) = in_flight.next().await {
        match result {
            Ok(bundle) => bundles.push(bundle),
            Err(err) => log_warn!(error = %err, "Stage A extraction failed for one chunk"),
        }
        if let Some(chunk) = remaining.next() {
            in_flight.push(extract_from_chunk(chunk.clone(), call_manager.clone()));
        }
    }

    bundles
}

async fn extract_from_chunk(chunk: Chunk, call_manager: Arc<CallManager>) -> Result<FactBundle, PipelineError> {
    let request = LlmRequest {
        messages: vec![
            LlmMessage::system(SYSTEM_PROMPT),
            LlmMessage::user(chunk.text.clone()),
        ],
        max_tokens: 1024,
        temperature: 0.1,
        priority: Priority::Normal,
        json_mode: true,
    };

    let response = call_manager.dispatch(request).await?;
    parse_fact_bundle(&response.content, &chunk)
}

fn parse_fact_bundle(raw: &str, chunk: &Chunk) -> Result<FactBundle, PipelineError> {
    let parsed: serde_json::Value = serde_json::from_str(raw.trim())
        .map_err(|e| PipelineError::llm_parse(format!("Stage A output was not valid JSON: {e}")))?;

    let array = parsed
        .as_array()
        .ok_or_else(|| PipelineError::llm_parse("Stage A output was not a JSON array"))?;

    let source_url = chunk.source_urls.first().cloned().unwrap_or_default();
    let mut seen = std::collections::HashSet::new();
    let mut items = Vec::new();

    for entry in array {
        let Some(category_str) = entry.get("category").and_then(|v| v.as_str()) else { continue };
        let Some(key) = entry.get("key").and_then(|v| v.as_str()) else { continue };
        let Some(value) = entry.get("value").and_then(|v| v.as_str()) else { continue };

        let dedup_key = (category_str.to_string(), value.trim().to_lowercase());
        if !seen.insert(dedup_key) || items.len() >= PER_CATEGORY_CAP * 4 {
            continue;
        }

        let mut quote = entry.get("quote").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        quote.truncate(EVIDENCE_QUOTE_MAX_CHARS);

        let confidence = entry
            .get("confidence")
            .and_then(|v| v.as_f64())
            .map(|v| v.clamp(0.0, 1.0) as f32)
            .unwrap_or(0.5);

        let category = match category_str {
            "identity" => FactCategory::Identity,
            "contact" => FactCategory::Contact,
            "offerings" => FactCategory::Offerings,
            "reputation" => FactCategory::Reputation,
            _ => FactCategory::classify(key, value),
        };

        items.push(FactItem {
            category,
            key: key.to_string(),
            value: value.to_string(),
            evidence_quote: quote,
            source_url: source_url.clone(),
            confidence,
        });
    }

    Ok(FactBundle {
        chunk_index: chunk.index,
        total_chunks: chunk.total_chunks,
        page_source: chunk.source_urls.clone(),
        items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(source_url: &str) -> Chunk {
        Chunk { index: 0, total_chunks: 1, text: "text".to_string(), source_urls: vec![source_url.to_string()], estimated_tokens: 10 }
    }

    #[test]
    fn parses_valid_fact_array() {
        let raw = r#"[{"category": "identity", "key": "razao_social", "value": "Acme Ltda", "quote": "Acme Ltda is a company", "confidence": 0.9}]"#;
        let bundle = parse_fact_bundle(raw, &chunk("https://acme.com")).unwrap();
        assert_eq!(bundle.items.len(), 1);
        assert_eq!(bundle.items[0].source_url, "https://acme.com");
        assert!((bundle.items[0].confidence - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn defaults_confidence_when_missing() {
        let raw = r#"[{"category": "identity", "key": "razao_social", "value": "Acme Ltda", "quote": "quote"}]"#;
        let bundle = parse_fact_bundle(raw, &chunk("https://acme.com")).unwrap();
        assert!((bundle.items[0].confidence - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn truncates_overlong_evidence_quotes() {
        let long_quote = "a".repeat(500);
        let raw = format!(r#"[{{"category": "contact", "key": "email", "value": "a@b.com", "quote": "{long_quote}"}}]"#);
        let bundle = parse_fact_bundle(&raw, &chunk("https://acme.com")).unwrap();
        assert_eq!(bundle.items[0].evidence_quote.len(), EVIDENCE_QUOTE_MAX_CHARS);
    }

    #[test]
    fn rejects_non_json_output() {
        assert!(parse_fact_bundle("not json", &chunk("https://acme.com")).is_err());
    }

    #[test]
    fn bundle_carries_chunk_index_and_total() {
        let mut c = chunk("https://acme.com");
        c.index = 2;
        c.total_chunks = 5;
        let bundle = parse_fact_bundle("[]", &c).unwrap();
        assert_eq!(bundle.chunk_index, 2);
        assert_eq!(bundle.total_chunks, 5);
        assert_eq!(bundle.useful_count(), 0);
    }
}
