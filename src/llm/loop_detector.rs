//! Detects degenerate LLM output: a model stuck repeating the same short
//! span over and over instead of producing real content. Hard-enforced
//! per spec.md, with a parallel "would-have-detected" counter at a looser
//! threshold so the hard threshold can be tuned later without needing a
//! second code path (§5 Open Question decision, see DESIGN.md).

use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub struct LoopDetectorConfig {
    pub ngram_size: usize,
    pub repetition_threshold: usize,
    pub soft_repetition_threshold: usize,
}

impl Default for LoopDetectorConfig {
    fn default() -> Self {
        Self { ngram_size: 8, repetition_threshold: 6, soft_repetition_threshold: 4 }
    }
}

pub struct LoopDetectionResult {
    pub is_degenerate: bool,
    pub would_have_flagged_at_soft_threshold: bool,
    pub max_repeat_count: usize,
}

/// Scan `text` for any word n-gram repeated at least `repetition_threshold`
/// times, which is a strong signal of decoder degeneration under
/// repetition penalty misconfiguration or a provider bug.
pub fn detect_loop(text: &str, config: &LoopDetectorConfig) -> LoopDetectionResult {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() < config.ngram_size * config.repetition_threshold {
        return LoopDetectionResult { is_degenerate: false, would_have_flagged_at_soft_threshold: false, max_repeat_count: 0 };
    }

    let mut counts: HashMap<&[&str], usize> = HashMap::new();
    let mut max_repeat = 0usize;

    for window in words.windows(config.ngram_size) {
        let entry = counts.entry(window).or_insert(0);
        *entry += 1;
        max_repeat = max_repeat.max(*entry);
    }

    LoopDetectionResult {
        is_degenerate: max_repeat >= config.repetition_threshold,
        would_have_flagged_at_soft_threshold: max_repeat >= config.soft_repetition_threshold,
        max_repeat_count: max_repeat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_repeated_phrase() {
        let repeated = "the quick brown fox jumps over the lazy dog ".repeat(10);
        let result = detect_loop(&repeated, &LoopDetectorConfig::default());
        assert!(result.is_degenerate);
    }

    #[test]
    fn does_not_flag_normal_prose() {
        let text = "Acme Corporation was founded in 2001 and specializes in industrial widgets \
                     for the automotive sector, serving clients across three continents with a \
                     focus on quality and sustainable manufacturing practices.";
        let result = detect_loop(text, &LoopDetectorConfig::default());
        assert!(!result.is_degenerate);
    }

    #[test]
    fn soft_threshold_trips_before_hard_threshold() {
        let text = "alpha beta gamma delta epsilon zeta eta theta ".repeat(5);
        let result = detect_loop(&text, &LoopDetectorConfig { ngram_size: 8, repetition_threshold: 100, soft_repetition_threshold: 2 });
        assert!(result.would_have_flagged_at_soft_threshold);
        assert!(!result.is_degenerate);
    }
}
