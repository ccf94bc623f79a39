//! Stage C (§4.10): ask the LLM for a short narrative summary grounded in
//! the merged facts, then assemble the final [`CompanyProfile`].

use crate::core_types::{CompanyProfile, LlmMessage, LlmRequest, MergedFacts, Priority};
use crate::error::PipelineError;
use crate::llm::call_manager::CallManager;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You write a concise, factual 2-4 sentence summary of a company for a \
     B2B sales team, using only the facts provided. Do not invent anything not present in the \
     facts. Respond with plain text, no markdown.";

pub async fn build_profile(
    cnpj_basico: &str,
    merged: MergedFacts,
    source_urls: Vec<String>,
    call_manager: &Arc<CallManager>,
) -> Result<CompanyProfile, PipelineError> {
    let facts_text = render_facts_for_prompt(&merged);

    let summary = if facts_text.trim().is_empty() {
        String::new()
    } else {
        let request = LlmRequest {
            messages: vec![
                LlmMessage::system(SYSTEM_PROMPT),
                LlmMessage::user(facts_text),
            ],
            max_tokens: 300,
            temperature: 0.3,
            priority: Priority::Normal,
            json_mode: false,
        };
        call_manager.dispatch(request).await?.content
    };

    let confidence = confidence_from_fact_counts(&merged);

    Ok(CompanyProfile {
        cnpj_basico: cnpj_basico.to_string(),
        summary,
        identity: merged.identity,
        contact: merged.contact,
        offerings: merged.offerings,
        reputation: merged.reputation,
        confidence,
        source_urls,
        generated_at: chrono::Utc::now(),
    })
}

fn render_facts_for_prompt(merged: &MergedFacts) -> String {
    let mut out = String::new();
    for (label, items) in [
        ("Identity", &merged.identity),
        ("Contact", &merged.contact),
        ("Offerings", &merged.offerings),
        ("Reputation", &merged.reputation),
    ] {
        if items.is_empty() {
            continue;
        }
        out.push_str(label);
        out.push_str(":\n");
        for item in items {
            out.push_str(&format!("- {}: {}\n", item.key, item.value));
        }
    }
    out
}

/// Simple confidence heuristic: more corroborated categories and more
/// total facts raise confidence, capped at 1.0.
fn confidence_from_fact_counts(merged: &MergedFacts) -> f32 {
    let populated_categories = [
        !merged.identity.is_empty(),
        !merged.contact.is_empty(),
        !merged.offerings.is_empty(),
        !merged.reputation.is_empty(),
    ]
    .iter()
    .filter(|b| **b)
    .count();

    let total = merged.total_facts() as f32;
    let base = (populated_categories as f32 / 4.0) * 0.6;
    let volume_bonus = (total / 20.0).min(0.4);
    (base + volume_bonus).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::{FactCategory, FactItem};

    fn item(category: FactCategory, key: &str, value: &str) -> FactItem {
        FactItem { category, key: key.to_string(), value: value.to_string(), evidence_quote: String::new(), source_url: String::new(), confidence: 0.8 }
    }

    #[test]
    fn confidence_rises_with_populated_categories() {
        let mut merged = MergedFacts::default();
        merged.identity.push(item(FactCategory::Identity, "nome", "Acme"));
        let low = confidence_from_fact_counts(&merged);

        merged.contact.push(item(FactCategory::Contact, "email", "a@b.com"));
        merged.offerings.push(item(FactCategory::Offerings, "produto", "widgets"));
        let high = confidence_from_fact_counts(&merged);

        assert!(high > low);
    }

    #[tokio::test]
    async fn build_profile_skips_llm_call_when_no_facts() {
        let call_manager = Arc::new(CallManager::new(vec![]));
        let profile = build_profile("12345678", MergedFacts::default(), vec![], &call_manager).await.unwrap();
        assert!(profile.summary.is_empty());
    }
}
