//! Global atomic counters for engine activity.
//!
//! Counters are bumped silently at the call site. [`Metrics::flush`]
//! emits the current values as one `tracing::info!` event, typically at
//! the end of an invocation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    policy_queries: AtomicU64,
    policy_fallbacks: AtomicU64,
    templates_injected: AtomicU64,
    knowledge_matches: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            policy_queries: AtomicU64::new(0),
            policy_fallbacks: AtomicU64::new(0),
            templates_injected: AtomicU64::new(0),
            knowledge_matches: AtomicU64::new(0),
        }
    }

    pub fn inc_policy_queries(&self) {
        self.policy_queries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "policy_queries", "counter incremented");
    }

    /// A policy answer was missing, failed, or invalid and defaults were used.
    pub fn inc_policy_fallbacks(&self) {
        self.policy_fallbacks.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "policy_fallbacks", "counter incremented");
    }

    pub fn add_templates_injected(&self, n: u64) {
        self.templates_injected.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "templates_injected", n, "counter incremented");
    }

    pub fn add_knowledge_matches(&self, n: u64) {
        self.knowledge_matches.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "knowledge_matches", n, "counter incremented");
    }

    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            policy_queries = self.policy_queries(),
            policy_fallbacks = self.policy_fallbacks(),
            templates_injected = self.templates_injected(),
            knowledge_matches = self.knowledge_matches(),
        );
    }

    pub fn policy_queries(&self) -> u64 {
        self.policy_queries.load(Ordering::Relaxed)
    }

    pub fn policy_fallbacks(&self) -> u64 {
        self.policy_fallbacks.load(Ordering::Relaxed)
    }

    pub fn templates_injected(&self) -> u64 {
        self.templates_injected.load(Ordering::Relaxed)
    }

    pub fn knowledge_matches(&self) -> u64 {
        self.knowledge_matches.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.policy_queries.store(0, Ordering::Relaxed);
        self.policy_fallbacks.store(0, Ordering::Relaxed);
        self.templates_injected.store(0, Ordering::Relaxed);
        self.knowledge_matches.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_policy_queries();
        m.inc_policy_queries();
        assert_eq!(m.policy_queries(), 2);

        m.inc_policy_fallbacks();
        assert_eq!(m.policy_fallbacks(), 1);

        m.add_templates_injected(3);
        m.add_knowledge_matches(4);
        assert_eq!(m.templates_injected(), 3);
        assert_eq!(m.knowledge_matches(), 4);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_policy_queries();
        m.inc_policy_fallbacks();
        m.add_templates_injected(1);
        m.add_knowledge_matches(1);
        m.reset();
        assert_eq!(m.policy_queries(), 0);
        assert_eq!(m.policy_fallbacks(), 0);
        assert_eq!(m.templates_injected(), 0);
        assert_eq!(m.knowledge_matches(), 0);
    }
}
