// 🔍 Deduplication Engine - collapse repeated stories across sources
//
// Two signals are duplicates when their normalized title prefixes are
// equal. The highest-confidence phrasing survives.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::scoring::Signal;

/// Default normalized-title prefix length, in characters
pub const DEFAULT_PREFIX_CHARS: usize = 50;

// ============================================================================
// DEDUPLICATION ENGINE
// ============================================================================

#[derive(Debug, Clone)]
pub struct DeduplicationEngine {
    /// Characters of the normalized title compared (default: 50)
    pub prefix_chars: usize,
}

impl DeduplicationEngine {
    pub fn new() -> Self {
        DeduplicationEngine {
            prefix_chars: DEFAULT_PREFIX_CHARS,
        }
    }

    pub fn with_prefix(prefix_chars: usize) -> Self {
        DeduplicationEngine {
            prefix_chars: prefix_chars.max(1),
        }
    }

    /// Lowercased, whitespace-collapsed title truncated to `prefix_chars`
    pub fn dedup_key(&self, title: &str) -> String {
        let normalized = title.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        normalized.chars().take(self.prefix_chars).collect()
    }

    /// Ranking used before dedup: confidence desc, then class weight desc,
    /// then source id and title so equal scores still order the same way
    pub fn rank(a: &Signal, b: &Signal) -> Ordering {
        b.confidence
            .cmp(&a.confidence)
            .then_with(|| b.class_weight.total_cmp(&a.class_weight))
            .then_with(|| a.source_id.cmp(&b.source_id))
            .then_with(|| a.title.cmp(&b.title))
    }

    /// Ranked signals with near-duplicates removed
    pub fn deduplicate(&self, mut signals: Vec<Signal>) -> Vec<Signal> {
        signals.sort_by(Self::rank);

        let mut seen: HashSet<String> = HashSet::new();
        signals
            .into_iter()
            .filter(|signal| seen.insert(self.dedup_key(&signal.title)))
            .collect()
    }
}

impl Default for DeduplicationEngine {
    fn default() -> Self {
        Self::new()
    }
}
