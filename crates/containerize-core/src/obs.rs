//! Structured observability hooks for engine invocations.
//!
//! - [`invocation_span`]: span scoping all events of one invocation
//! - `emit_*`: one function per lifecycle event, each carrying an `event`
//!   field so log pipelines can filter on it

use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::Analysis;

/// Span tagging every event of one invocation. Async code attaches it
/// with `Instrument::instrument`.
pub fn invocation_span(invocation_id: Uuid, analysis: &Analysis) -> tracing::Span {
    tracing::info_span!(
        "containerize.invocation",
        invocation_id = %invocation_id,
        tool = %analysis.tool,
        language = %analysis.language,
        environment = %analysis.environment,
    )
}

pub fn emit_config_resolved(policy_fields: usize, default_fields: usize, policy_consulted: bool) {
    info!(
        event = "config.resolved",
        policy_fields = policy_fields,
        default_fields = default_fields,
        policy_consulted = policy_consulted,
    );
}

/// A policy answer section failed validation and was dropped.
pub fn emit_policy_rejected(section: &str, error: &dyn std::fmt::Display) {
    warn!(event = "config.policy_rejected", section = %section, error = %error);
}

/// A policy query failed; defaults are used instead.
pub fn emit_policy_fallback(query: &str, error: &dyn std::fmt::Display) {
    warn!(event = "policy.fallback", query = %query, error = %error);
}

pub fn emit_templates_injected(candidates: usize, injected: usize, security: usize) {
    info!(
        event = "templates.injected",
        candidates = candidates,
        injected = injected,
        security = security,
    );
}

pub fn emit_template_dropped(index: usize, target: &str, error: &dyn std::fmt::Display) {
    warn!(event = "templates.dropped", index = index, target = %target, error = %error);
}

pub fn emit_knowledge_matched(category: &str, matches: usize) {
    info!(event = "knowledge.matched", category = %category, matches = matches);
}

pub fn emit_plan_finished(invocation_id: Uuid, duration_ms: u64, recommendations: usize) {
    info!(
        event = "plan.finished",
        invocation_id = %invocation_id,
        duration_ms = duration_ms,
        recommendations = recommendations,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::GenerationTool;

    #[test]
    fn test_events_inside_invocation_span() {
        let analysis = Analysis::new("go", "dev", GenerationTool::GenerateDockerfile).unwrap();
        let span = invocation_span(Uuid::new_v4(), &analysis);
        let _entered = span.enter();
        emit_config_resolved(1, 2, true);
    }
}
