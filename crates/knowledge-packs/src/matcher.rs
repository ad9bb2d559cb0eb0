//! Ranking knowledge entries against free-text signals.
//!
//! Scoring with a signal:
//!
//! - `PATTERN_WEIGHT` per pattern hit in the signal, counting at most
//!   `MAX_PATTERN_HITS` hits
//! - `TAG_WEIGHT` per entry tag that appears in the signal
//! - the entry's severity weight
//!
//! Entries whose pattern does not hit score zero and are dropped. Without
//! a signal every entry in the category scores `BASELINE_WEIGHT`.

use serde::Serialize;
use tracing::debug;

use crate::category::KnowledgeCategory;
use crate::pack::{CompiledEntry, KnowledgeEntry};
use crate::store::KnowledgeIndex;

pub const PATTERN_WEIGHT: f64 = 10.0;
pub const MAX_PATTERN_HITS: usize = 3;
pub const TAG_WEIGHT: f64 = 2.0;
pub const BASELINE_WEIGHT: f64 = 1.0;
/// Added when an entry is tagged with the requested language.
pub const LANGUAGE_BOOST: f64 = 3.0;
/// Added when an entry is tagged with the requested framework.
pub const FRAMEWORK_BOOST: f64 = 3.0;

/// A scored entry. Transient, produced per query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnowledgeMatch {
    pub entry: KnowledgeEntry,
    pub weight: f64,
}

/// Full matching request.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchQuery {
    pub category: KnowledgeCategory,
    pub signal: Option<String>,
    pub language: Option<String>,
    pub framework: Option<String>,
    pub limit: Option<usize>,
}

impl MatchQuery {
    pub fn new(category: KnowledgeCategory) -> Self {
        Self {
            category,
            signal: None,
            language: None,
            framework: None,
            limit: None,
        }
    }

    pub fn with_signal(mut self, signal: impl Into<String>) -> Self {
        self.signal = Some(signal.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_framework(mut self, framework: impl Into<String>) -> Self {
        self.framework = Some(framework.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl KnowledgeIndex {
    /// Entries of `category` ranked against `signal`.
    pub fn match_category(
        &self,
        category: KnowledgeCategory,
        signal: Option<&str>,
    ) -> Vec<KnowledgeMatch> {
        let mut query = MatchQuery::new(category);
        query.signal = signal.map(str::to_string);
        self.matches(&query)
    }

    /// Ranked matches for `query`: descending weight, ties in
    /// registration order.
    pub fn matches(&self, query: &MatchQuery) -> Vec<KnowledgeMatch> {
        let signal = query
            .signal
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let signal_lower = signal.map(str::to_lowercase);

        let mut scored: Vec<KnowledgeMatch> = self
            .entries()
            .iter()
            .filter(|c| c.entry.category == query.category)
            .filter_map(|c| {
                let base = match (signal, signal_lower.as_deref()) {
                    (Some(text), Some(lower)) => signal_score(c, text, lower)?,
                    _ => BASELINE_WEIGHT,
                };
                let weight = base + context_boost(&c.entry, query);
                Some(KnowledgeMatch {
                    entry: c.entry.clone(),
                    weight,
                })
            })
            .collect();

        // stable: equal weights keep registration order
        scored.sort_by(|a, b| b.weight.total_cmp(&a.weight));
        if let Some(limit) = query.limit {
            scored.truncate(limit);
        }

        debug!(
            event = "knowledge.matched",
            category = %query.category,
            with_signal = signal.is_some(),
            matches = scored.len(),
        );
        scored
    }
}

fn signal_score(compiled: &CompiledEntry, signal: &str, signal_lower: &str) -> Option<f64> {
    let hits = compiled
        .regex
        .find_iter(signal)
        .filter(|m| !m.is_empty())
        .take(MAX_PATTERN_HITS)
        .count();
    if hits == 0 {
        return None;
    }
    let tag_hits = compiled
        .entry
        .tags
        .iter()
        .filter(|t| signal_lower.contains(&t.to_lowercase()))
        .count();
    let severity = compiled.entry.severity.map(|s| s.weight()).unwrap_or(0.0);
    Some(PATTERN_WEIGHT * hits as f64 + TAG_WEIGHT * tag_hits as f64 + severity)
}

fn context_boost(entry: &KnowledgeEntry, query: &MatchQuery) -> f64 {
    let tagged = |value: &Option<String>| {
        value
            .as_deref()
            .map(|v| entry.tags.iter().any(|t| t.eq_ignore_ascii_case(v)))
            .unwrap_or(false)
    };
    let mut boost = 0.0;
    if tagged(&query.language) {
        boost += LANGUAGE_BOOST;
    }
    if tagged(&query.framework) {
        boost += FRAMEWORK_BOOST;
    }
    boost
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::parse_pack;

    fn index() -> KnowledgeIndex {
        let text = r#"{"name": "t", "rules": [
            {"id": "root-user", "category": "security", "pattern": "user\\s+root", "recommendation": "Use a non-root user", "severity": "high"},
            {"id": "latest-tag", "category": "security", "pattern": ":latest", "recommendation": "Pin image tags", "tags": ["tags"]},
            {"id": "secrets", "category": "security", "pattern": "password|secret", "recommendation": "Do not bake secrets", "severity": "critical"},
            {"id": "java-heap", "category": "optimization", "pattern": "xmx", "recommendation": "Size the heap", "tags": ["java"]},
            {"id": "node-prune", "category": "optimization", "pattern": "node_modules", "recommendation": "Prune dev deps", "tags": ["node"]}
        ]}"#;
        KnowledgeIndex::build(vec![parse_pack("t", text).unwrap()]).unwrap()
    }

    fn ids(matches: &[KnowledgeMatch]) -> Vec<&str> {
        matches.iter().map(|m| m.entry.id.as_str()).collect()
    }

    #[test]
    fn test_no_signal_returns_category_at_baseline() {
        let idx = index();
        let matches = idx.match_category(KnowledgeCategory::Security, None);
        assert_eq!(ids(&matches), vec!["root-user", "latest-tag", "secrets"]);
        assert!(matches.iter().all(|m| m.weight == BASELINE_WEIGHT));
    }

    #[test]
    fn test_blank_signal_behaves_like_none() {
        let idx = index();
        assert_eq!(
            idx.match_category(KnowledgeCategory::Security, Some("   ")).len(),
            3
        );
    }

    #[test]
    fn test_non_matching_entries_excluded() {
        let idx = index();
        let matches = idx.match_category(KnowledgeCategory::Security, Some("FROM node:latest"));
        assert_eq!(ids(&matches), vec!["latest-tag"]);
    }

    #[test]
    fn test_weight_orders_results() {
        let idx = index();
        let signal = "USER root\nENV PASSWORD=x\nENV SECRET=y\nFROM alpine:latest";
        let matches = idx.match_category(KnowledgeCategory::Security, Some(signal));
        // secrets: 2 hits + critical; root-user: 1 hit + high; latest-tag: 1 hit
        assert_eq!(ids(&matches), vec!["secrets", "root-user", "latest-tag"]);
        assert_eq!(matches[0].weight, 2.0 * PATTERN_WEIGHT + 4.0);
    }

    #[test]
    fn test_ties_keep_declaration_order() {
        let idx = index();
        // one pattern hit and one tag hit each
        let matches = idx.match_category(
            KnowledgeCategory::Optimization,
            Some("java -Xmx512m; rm -rf node_modules"),
        );
        assert_eq!(ids(&matches), vec!["java-heap", "node-prune"]);
        assert_eq!(matches[0].weight, PATTERN_WEIGHT + TAG_WEIGHT);
        assert_eq!(matches[0].weight, matches[1].weight);
    }

    #[test]
    fn test_zero_width_matches_do_not_count() {
        let compiled = CompiledEntry {
            entry: KnowledgeEntry {
                id: "opt".to_string(),
                category: KnowledgeCategory::Security,
                pattern: "(root)?".to_string(),
                recommendation: "y".to_string(),
                severity: None,
                tags: Vec::new(),
                example: None,
                description: None,
            },
            regex: regex::Regex::new("(root)?").unwrap(),
        };
        let signal = "completely unrelated";
        assert_eq!(signal_score(&compiled, signal, signal), None);
        assert_eq!(
            signal_score(&compiled, "user root", "user root"),
            Some(PATTERN_WEIGHT)
        );
    }

    #[test]
    fn test_pattern_hits_are_capped() {
        let idx = index();
        let signal = "secret secret secret secret secret";
        let matches = idx.match_category(KnowledgeCategory::Security, Some(signal));
        assert_eq!(
            matches[0].weight,
            MAX_PATTERN_HITS as f64 * PATTERN_WEIGHT + 4.0
        );
    }

    #[test]
    fn test_language_boost_and_limit() {
        let idx = index();
        let query = MatchQuery::new(KnowledgeCategory::Optimization)
            .with_language("Node")
            .with_limit(1);
        let matches = idx.matches(&query);
        assert_eq!(ids(&matches), vec!["node-prune"]);
        assert_eq!(matches[0].weight, BASELINE_WEIGHT + LANGUAGE_BOOST);
    }
}
