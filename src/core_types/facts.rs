//! Stage A/B/C outputs (§4.10): raw per-chunk facts, the deterministic
//! merge, and the final structured profile.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One atomic fact extracted from a chunk by Stage A, with the quote it
/// was grounded on and the model's confidence in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactItem {
    pub category: FactCategory,
    pub key: String,
    pub value: String,
    /// Source text the model grounded this fact on, capped at 320 chars
    /// (the model is instructed to keep it under 160).
    pub evidence_quote: String,
    pub source_url: String,
    /// Model-reported confidence in this fact, 0.0-1.0.
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactCategory {
    Identity,
    Contact,
    Offerings,
    Reputation,
    Other,
}

impl FactCategory {
    /// Classify a fact key/value pair into one of the four merge buckets
    /// using the same keyword/regex heuristics Stage B applies, so callers
    /// that only have a key (not the full `FactItem`) can pre-sort.
    pub fn classify(key: &str, value: &str) -> Self {
        let k = key.to_lowercase();
        let v = value.to_lowercase();
        if k.contains("email") || k.contains("telefone") || k.contains("phone")
            || k.contains("endereco") || k.contains("address") || v.contains('@')
        {
            Self::Contact
        } else if k.contains("produto") || k.contains("servico") || k.contains("product")
            || k.contains("service") || k.contains("oferta")
        {
            Self::Offerings
        } else if k.contains("premio") || k.contains("certifica") || k.contains("award")
            || k.contains("reputa") || k.contains("avalia")
        {
            Self::Reputation
        } else if k.contains("nome") || k.contains("razao") || k.contains("fundacao")
            || k.contains("name") || k.contains("founded")
        {
            Self::Identity
        } else {
            Self::Other
        }
    }
}

/// One chunk's worth of facts extracted by Stage A, plus enough context for
/// Stage B to attribute merged values back to where they came from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FactBundle {
    pub chunk_index: usize,
    pub total_chunks: usize,
    /// The pages this chunk was drawn from, capped at 5 (same cap as
    /// `Chunk::source_urls`).
    pub page_source: Vec<String>,
    pub items: Vec<FactItem>,
}

impl FactBundle {
    pub fn extend(&mut self, other: FactBundle) {
        self.items.extend(other.items);
    }

    /// Number of facts this bundle actually contributed. Stage B discards
    /// bundles where this is 0 rather than merging an empty chunk.
    pub fn useful_count(&self) -> usize {
        self.items.len()
    }
}

/// One piece of evidence backing a merged value: the page it came from and
/// the quote Stage A grounded it on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceEntry {
    pub url: String,
    pub quote: String,
}

const CONTACT_CAP: usize = 80;
const OFFERINGS_CAP: usize = 80;
const REPUTATION_CAP: usize = 50;
const EVIDENCE_CAP: usize = 20;

const COMPANY_NAME_MARKERS: &[&str] = &["ltda", "s.a", "sa ", " me ", "eireli"];
const OFFERING_KEYWORD_MARKERS: &[&str] = &["modelo", "codigo", "código", "sku", "ref.", "referencia", "referência", "reference"];
const SERVICE_STOPWORDS: &[&str] = &["de", "da", "do", "das", "dos"];

const CLIENT_LIST_KEYWORDS: &[&str] = &["cliente", "clientes", "quem confia", "cases"];
const CERTIFICATION_KEYWORDS: &[&str] = &["certificacao", "certificação", "iso", "anvisa", "inmetro"];
const AWARD_KEYWORDS: &[&str] = &["premio", "prêmio", "premiacao", "premiação", "award"];
const PARTNERSHIP_KEYWORDS: &[&str] = &["parceria", "parceiro", "partner"];

static UNIT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\d+\s?(mm|cm|m|kg|g|gb|tb|v|hz|w|l|ml)\b").unwrap());
static ALNUM_MODEL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z]+-?\d+|\d+-?[A-Za-z]+").unwrap());
static YEAR_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(19|20)\d{2}\b").unwrap());
static DIGITS_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d").unwrap());

/// Stage B's deterministic merge: identity/contact/offerings/reputation are
/// each broken down into their spec-named sub-fields via classification
/// heuristics (no LLM call), and every retained value is traceable back
/// through `evidence_map`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergedFacts {
    pub identity: Vec<FactItem>,
    pub contact: Vec<FactItem>,
    pub offerings: Vec<FactItem>,
    pub reputation: Vec<FactItem>,
    pub other: Vec<FactItem>,
    /// `field_key` (e.g. `"contact.email"`, `"offerings.product"`) -> up to
    /// 20 `{url, quote}` entries backing every value merged under that key.
    pub evidence_map: HashMap<String, Vec<EvidenceEntry>>,
}

impl MergedFacts {
    /// Merge a list of per-chunk `FactBundle`s, one per chunk. Bundles with
    /// `useful_count() == 0` (nothing extracted from that chunk) are
    /// discarded before merging.
    pub fn from_bundles(bundles: Vec<FactBundle>) -> Self {
        let mut merged = MergedFacts::default();
        let items: Vec<FactItem> = bundles
            .into_iter()
            .filter(|b| b.useful_count() > 0)
            .flat_map(|b| b.items)
            .collect();

        let mut by_category: HashMap<FactCategory, Vec<FactItem>> = HashMap::new();
        for item in items {
            by_category.entry(item.category).or_default().push(item);
        }

        merged.merge_identity(by_category.remove(&FactCategory::Identity).unwrap_or_default());
        merged.merge_contact(by_category.remove(&FactCategory::Contact).unwrap_or_default());
        merged.merge_offerings(by_category.remove(&FactCategory::Offerings).unwrap_or_default());
        merged.merge_reputation(by_category.remove(&FactCategory::Reputation).unwrap_or_default());
        merged.merge_other(by_category.remove(&FactCategory::Other).unwrap_or_default());

        merged
    }

    /// Kept for call sites that still only have a single bundle (e.g. a
    /// one-chunk scrape); wraps it as a one-element list.
    pub fn from_bundle(bundle: FactBundle) -> Self {
        Self::from_bundles(vec![bundle])
    }

    fn record_evidence(&mut self, field_key: &str, url: &str, quote: &str) {
        if quote.is_empty() {
            return;
        }
        let entries = self.evidence_map.entry(field_key.to_string()).or_default();
        if entries.len() < EVIDENCE_CAP {
            entries.push(EvidenceEntry { url: url.to_string(), quote: quote.to_string() });
        }
    }

    fn merge_identity(&mut self, items: Vec<FactItem>) {
        let mut cnpj: Option<FactItem> = None;
        let mut company_name: Option<FactItem> = None;
        let mut founding_year: Option<FactItem> = None;
        let mut description: Option<FactItem> = None;

        for item in items {
            let digits: String = item.value.chars().filter(|c| c.is_ascii_digit()).collect();
            let lower = item.value.to_lowercase();

            if digits.len() >= 11 && cnpj.is_none() {
                cnpj = Some(item);
            } else if (lower.contains("ltda") || COMPANY_NAME_MARKERS.iter().any(|m| lower.contains(m)))
                && company_name.is_none()
            {
                company_name = Some(item);
            } else if (lower.contains("fundada") || lower.contains("desde")) && founding_year.is_none() {
                let mut item = item;
                if let Some(year) = extract_year(&item.value) {
                    item.value = year;
                }
                founding_year = Some(item);
            } else if !item.value.trim().is_empty() {
                match &description {
                    Some(existing) if existing.value.len() <= item.value.len() => {}
                    _ => description = Some(item),
                }
            }
        }

        for (key, item) in [
            ("identity.cnpj", cnpj),
            ("identity.company_name", company_name),
            ("identity.founding_year", founding_year),
            ("identity.description", description),
        ] {
            if let Some(mut item) = item {
                item.key = key.trim_start_matches("identity.").to_string();
                self.record_evidence(key, &item.source_url, &item.evidence_quote);
                self.identity.push(item);
            }
        }
    }

    fn merge_contact(&mut self, items: Vec<FactItem>) {
        let mut emails: Vec<FactItem> = Vec::new();
        let mut phones: Vec<FactItem> = Vec::new();
        let mut website_url: Option<FactItem> = None;
        let mut locations: Vec<FactItem> = Vec::new();
        let mut seen_email = std::collections::HashSet::new();
        let mut seen_phone = std::collections::HashSet::new();
        let mut seen_location = std::collections::HashSet::new();

        for mut item in items {
            let trimmed = item.value.trim();
            if trimmed.is_empty() {
                continue;
            }
            let lower = trimmed.to_lowercase();
            let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();

            if lower.contains('@') {
                let normalized = lower.clone();
                if seen_email.insert(normalized.clone()) && emails.len() < CONTACT_CAP {
                    item.value = normalized;
                    item.key = "email".to_string();
                    emails.push(item);
                }
            } else if digits.len() >= 8 {
                let normalized: String = trimmed
                    .chars()
                    .filter(|c| c.is_ascii_digit() || *c == '+')
                    .collect();
                if seen_phone.insert(normalized.clone()) && phones.len() < CONTACT_CAP {
                    item.value = normalized;
                    item.key = "phone".to_string();
                    phones.push(item);
                }
            } else if lower.starts_with("http://") || lower.starts_with("https://") {
                if website_url.is_none() {
                    item.value = trimmed.to_string();
                    item.key = "website_url".to_string();
                    website_url = Some(item);
                }
            } else if trimmed.len() >= 5 {
                let normalized = lower.clone();
                if seen_location.insert(normalized) && locations.len() < CONTACT_CAP {
                    item.key = "location".to_string();
                    locations.push(item);
                }
            }
        }

        for item in &emails {
            self.record_evidence("contact.email", &item.source_url, &item.evidence_quote);
        }
        for item in &phones {
            self.record_evidence("contact.phone", &item.source_url, &item.evidence_quote);
        }
        if let Some(item) = &website_url {
            self.record_evidence("contact.website_url", &item.source_url, &item.evidence_quote);
        }
        for item in &locations {
            self.record_evidence("contact.location", &item.source_url, &item.evidence_quote);
        }

        self.contact.extend(emails);
        self.contact.extend(phones);
        self.contact.extend(website_url);
        self.contact.extend(locations);
    }

    fn merge_offerings(&mut self, items: Vec<FactItem>) {
        let mut products: Vec<FactItem> = Vec::new();
        let mut services: Vec<FactItem> = Vec::new();
        let mut seen_product = std::collections::HashSet::new();
        let mut seen_service = std::collections::HashSet::new();

        for mut item in items {
            let trimmed = item.value.trim();
            if trimmed.is_empty() {
                continue;
            }
            let lower = trimmed.to_lowercase();

            let is_product = UNIT_PATTERN.is_match(trimmed)
                || ALNUM_MODEL_PATTERN.is_match(trimmed)
                || OFFERING_KEYWORD_MARKERS.iter().any(|m| lower.contains(m));

            if is_product {
                let normalized = lower.clone();
                if seen_product.insert(normalized) && products.len() < OFFERINGS_CAP {
                    item.key = "product".to_string();
                    products.push(item);
                }
            } else {
                let cleaned = strip_service_stopwords(trimmed);
                if cleaned.is_empty() {
                    continue;
                }
                let normalized = cleaned.to_lowercase();
                if seen_service.insert(normalized) && services.len() < OFFERINGS_CAP {
                    item.value = cleaned;
                    item.key = "service".to_string();
                    services.push(item);
                }
            }
        }

        for item in &products {
            self.record_evidence("offerings.product", &item.source_url, &item.evidence_quote);
        }
        for item in &services {
            self.record_evidence("offerings.service", &item.source_url, &item.evidence_quote);
        }

        self.offerings.extend(products);
        self.offerings.extend(services);
    }

    fn merge_reputation(&mut self, items: Vec<FactItem>) {
        let mut client_list: Vec<FactItem> = Vec::new();
        let mut certifications: Vec<FactItem> = Vec::new();
        let mut awards: Vec<FactItem> = Vec::new();
        let mut partnerships: Vec<FactItem> = Vec::new();

        for mut item in items {
            let quote = item.evidence_quote.to_lowercase();
            let value = item.value.to_lowercase();
            let haystack = format!("{quote} {value}");

            if CLIENT_LIST_KEYWORDS.iter().any(|k| haystack.contains(k)) && client_list.len() < REPUTATION_CAP {
                item.key = "client_list".to_string();
                client_list.push(item);
            } else if CERTIFICATION_KEYWORDS.iter().any(|k| haystack.contains(k)) && certifications.len() < REPUTATION_CAP {
                item.key = "certifications".to_string();
                certifications.push(item);
            } else if AWARD_KEYWORDS.iter().any(|k| haystack.contains(k)) && awards.len() < REPUTATION_CAP {
                item.key = "awards".to_string();
                awards.push(item);
            } else if PARTNERSHIP_KEYWORDS.iter().any(|k| haystack.contains(k)) && partnerships.len() < REPUTATION_CAP {
                item.key = "partnerships".to_string();
                partnerships.push(item);
            }
        }

        for item in &client_list {
            self.record_evidence("reputation.client_list", &item.source_url, &item.evidence_quote);
        }
        for item in &certifications {
            self.record_evidence("reputation.certifications", &item.source_url, &item.evidence_quote);
        }
        for item in &awards {
            self.record_evidence("reputation.awards", &item.source_url, &item.evidence_quote);
        }
        for item in &partnerships {
            self.record_evidence("reputation.partnerships", &item.source_url, &item.evidence_quote);
        }

        self.reputation.extend(client_list);
        self.reputation.extend(certifications);
        self.reputation.extend(awards);
        self.reputation.extend(partnerships);
    }

    fn merge_other(&mut self, items: Vec<FactItem>) {
        for item in items {
            let is_dup = self
                .other
                .iter()
                .any(|existing: &FactItem| existing.key == item.key && existing.value == item.value);
            if !is_dup {
                self.record_evidence(&format!("other.{}", item.key), &item.source_url, &item.evidence_quote);
                self.other.push(item);
            }
        }
    }

    pub fn total_facts(&self) -> usize {
        self.identity.len() + self.contact.len() + self.offerings.len() + self.reputation.len()
            + self.other.len()
    }
}

/// Strip leading Portuguese stopwords (`de`, `da`, `do`, `das`, `dos`) and
/// naively singularize a trailing plural `s`, so "consultoria de
/// engenharia" merges with "consultorias de engenharia" as one service.
fn strip_service_stopwords(value: &str) -> String {
    let cleaned: Vec<&str> = value
        .split_whitespace()
        .filter(|word| !SERVICE_STOPWORDS.contains(&word.to_lowercase().as_str()))
        .collect();
    let joined = cleaned.join(" ");
    if joined.len() > 1 && joined.ends_with('s') && !DIGITS_PATTERN.is_match(&joined) {
        joined[..joined.len() - 1].to_string()
    } else {
        joined
    }
}

/// Extract a 4-digit year from text, falling back to the raw value when
/// none is present (e.g. "fundada há 20 anos" has no literal year).
fn extract_year(value: &str) -> Option<String> {
    YEAR_PATTERN.find(value).map(|m| m.as_str().to_string())
}

/// The final structured profile built by Stage C.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub cnpj_basico: String,
    pub summary: String,
    pub identity: Vec<FactItem>,
    pub contact: Vec<FactItem>,
    pub offerings: Vec<FactItem>,
    pub reputation: Vec<FactItem>,
    pub confidence: f32,
    pub source_urls: Vec<String>,
    pub generated_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(category: FactCategory, key: &str, value: &str) -> FactItem {
        FactItem {
            category,
            key: key.to_string(),
            value: value.to_string(),
            evidence_quote: "quote".to_string(),
            source_url: "https://example.com".to_string(),
            confidence: 0.8,
        }
    }

    fn bundle(items: Vec<FactItem>) -> FactBundle {
        FactBundle { chunk_index: 0, total_chunks: 1, page_source: vec!["https://example.com".to_string()], items }
    }

    #[test]
    fn classify_routes_contact_fields() {
        assert_eq!(FactCategory::classify("email", "a@b.com"), FactCategory::Contact);
        assert_eq!(FactCategory::classify("telefone", "123"), FactCategory::Contact);
    }

    #[test]
    fn classify_routes_offerings() {
        assert_eq!(FactCategory::classify("servico_principal", "consultoria"), FactCategory::Offerings);
    }

    #[test]
    fn bundles_with_zero_useful_facts_are_discarded() {
        let empty = FactBundle { chunk_index: 0, total_chunks: 2, page_source: vec![], items: vec![] };
        let useful = bundle(vec![item(FactCategory::Identity, "razao_social", "Acme Ltda")]);
        let merged = MergedFacts::from_bundles(vec![empty, useful]);
        assert_eq!(merged.identity.len(), 1);
    }

    #[test]
    fn identity_classifies_cnpj_name_and_founding_year() {
        let bundle = bundle(vec![
            item(FactCategory::Identity, "cnpj", "12.345.678/0001-90"),
            item(FactCategory::Identity, "razao_social", "Acme Industria Ltda"),
            item(FactCategory::Identity, "fundacao", "fundada em 2001"),
        ]);
        let merged = MergedFacts::from_bundle(bundle);
        assert!(merged.identity.iter().any(|f| f.key == "cnpj"));
        assert!(merged.identity.iter().any(|f| f.key == "company_name"));
        assert!(merged.identity.iter().any(|f| f.key == "founding_year"));
    }

    #[test]
    fn contact_splits_email_phone_url_and_location() {
        let bundle = bundle(vec![
            item(FactCategory::Contact, "contato", "contato@acme.com"),
            item(FactCategory::Contact, "telefone", "(11) 4002-8922"),
            item(FactCategory::Contact, "site", "https://acme.com"),
            item(FactCategory::Contact, "endereco", "Av. Paulista, 1000"),
        ]);
        let merged = MergedFacts::from_bundle(bundle);
        assert!(merged.contact.iter().any(|f| f.key == "email" && f.value == "contato@acme.com"));
        assert!(merged.contact.iter().any(|f| f.key == "phone"));
        assert!(merged.contact.iter().any(|f| f.key == "website_url"));
        assert!(merged.contact.iter().any(|f| f.key == "location"));
    }

    #[test]
    fn offerings_classifies_products_by_model_code_and_unit_pattern() {
        let bundle = bundle(vec![
            item(FactCategory::Offerings, "produto", "Cabo 1KV HEPR"),
            item(FactCategory::Offerings, "produto", "Modelo XZ-500"),
            item(FactCategory::Offerings, "servico", "consultoria de engenharia"),
        ]);
        let merged = MergedFacts::from_bundle(bundle);
        let products: Vec<&str> = merged.offerings.iter().filter(|f| f.key == "product").map(|f| f.value.as_str()).collect();
        assert!(products.contains(&"Cabo 1KV HEPR"));
        assert!(products.contains(&"Modelo XZ-500"));
        let services: Vec<&FactItem> = merged.offerings.iter().filter(|f| f.key == "service").collect();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].value, "consultoria engenharia");
    }

    #[test]
    fn reputation_classifies_by_evidence_quote_keywords() {
        let mut client = item(FactCategory::Reputation, "caso", "Empresa X");
        client.evidence_quote = "Veja os clientes que confiam na Acme".to_string();
        let mut award = item(FactCategory::Reputation, "premio", "Melhor Fornecedor 2020");
        award.evidence_quote = "Recebemos o award de melhor fornecedor".to_string();

        let merged = MergedFacts::from_bundle(bundle(vec![client, award]));
        assert!(merged.reputation.iter().any(|f| f.key == "client_list"));
        assert!(merged.reputation.iter().any(|f| f.key == "awards"));
    }

    #[test]
    fn every_merged_value_has_an_evidence_map_entry() {
        let bundle = bundle(vec![item(FactCategory::Contact, "contato", "contato@acme.com")]);
        let merged = MergedFacts::from_bundle(bundle);
        assert!(merged.evidence_map.contains_key("contact.email"));
        assert!(!merged.evidence_map["contact.email"].is_empty());
    }

    #[test]
    fn merge_keeps_distinct_values_in_same_category() {
        let bundle = bundle(vec![
            item(FactCategory::Contact, "email", "a@b.com"),
            item(FactCategory::Contact, "email", "c@d.com"),
        ]);
        let merged = MergedFacts::from_bundle(bundle);
        assert_eq!(merged.contact.len(), 2);
    }
}
