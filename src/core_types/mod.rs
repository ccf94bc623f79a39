//! Data model for the company-profiling pipeline.
//!
//! Organized the way the teacher splits its core types: one file per
//! concern, with `mod.rs` re-exporting the names the rest of the crate
//! actually uses.

pub mod chunk;
pub mod company;
pub mod facts;
pub mod llm;
pub mod scrape;

pub use chunk::Chunk;
pub use company::{Company, CompanyResult, CompanyStatus, RequestContext};
pub use facts::{CompanyProfile, EvidenceEntry, FactBundle, FactCategory, FactItem, MergedFacts};
pub use llm::{
    LlmMessage, LlmRequest, LlmResponse, LlmRole, Priority, ProviderStats, TokenUsage,
};
pub use scrape::{ProxyStats, ScrapeFunnelCounters, ScrapeResult, ScrapedPage};
