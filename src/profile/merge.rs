//! Stage B (§4.10): deterministic merge of Stage A's per-chunk facts. No
//! LLM call — classification and deduplication are plain code so the
//! merge step is reproducible and auditable. Bundles with nothing useful
//! extracted are dropped before merging; everything else is sub-classified
//! into the spec's named identity/contact/offerings/reputation fields,
//! capped, and traced back through `evidence_map`.

use crate::core_types::{FactBundle, MergedFacts};

pub fn merge_fact_bundles(bundles: Vec<FactBundle>) -> MergedFacts {
    MergedFacts::from_bundles(bundles)
}
