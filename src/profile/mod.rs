//! Three-stage profile pipeline (§4.10): per-chunk fact extraction (Stage
//! A), deterministic merge (Stage B), and final structured profile build
//! (Stage C).

pub mod builder;
pub mod extractor;
pub mod merge;

pub use builder::build_profile;
pub use extractor::extract_facts_from_chunks;
pub use merge::merge_fact_bundles;
