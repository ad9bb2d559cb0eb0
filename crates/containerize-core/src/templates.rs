//! Policy template snippets and their injection into recommendations.
//!
//! Snippets come from the `containerization.templates` package, binding
//! `templates`, shaped `{"dockerfile": [...], "kubernetes": [...]}`. Each
//! snippet is decoded on its own; a malformed one is dropped with a
//! warning and the rest still apply.

use std::collections::HashSet;

use policy_engine::PolicyEngine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::analysis::Analysis;
use crate::metrics::METRICS;
use crate::obs;
use crate::recommendation::{Recommendation, RecommendationSet};
use crate::resolver::query_policy;

/// Binding holding the template additions.
pub const TEMPLATES_QUERY: &str = "containerization.templates.templates";

/// Dockerfile sections and Kubernetes component types treated as
/// security-related.
const SECURITY_DOCKERFILE_SECTIONS: &[&str] = &["security"];
const SECURITY_K8S_TYPES: &[&str] = &["security-context", "network-policy", "pod-security"];
const SECURITY_TAG: &str = "security";

/// Conditions on a snippet. An absent or empty dimension is unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnippetConditions {
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub environments: Vec<String>,
    #[serde(default)]
    pub frameworks: Vec<String>,
}

impl SnippetConditions {
    /// Conjunctive, case-insensitive membership across present dimensions.
    pub fn matches(&self, analysis: &Analysis) -> bool {
        fn dimension(allowed: &[String], value: Option<&str>) -> bool {
            allowed.is_empty()
                || value
                    .map(|v| allowed.iter().any(|a| a.trim().eq_ignore_ascii_case(v)))
                    .unwrap_or(false)
        }
        dimension(&self.languages, Some(&analysis.language))
            && dimension(&self.environments, Some(&analysis.environment))
            && dimension(&self.frameworks, analysis.framework.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DockerfileSnippet {
    pub id: String,
    /// Dockerfile section the fragment belongs to (`base`, `security`, ...).
    pub section: String,
    #[serde(default)]
    pub description: String,
    pub content: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub conditions: Option<SnippetConditions>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct K8sSnippet {
    pub id: String,
    /// Component type (`sidecar`, `security-context`, `network-policy`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    /// Structured component spec.
    pub spec: Value,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub conditions: Option<SnippetConditions>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateSnippet {
    Dockerfile(DockerfileSnippet),
    Kubernetes(K8sSnippet),
}

impl TemplateSnippet {
    pub fn id(&self) -> &str {
        match self {
            TemplateSnippet::Dockerfile(s) => &s.id,
            TemplateSnippet::Kubernetes(s) => &s.id,
        }
    }

    pub fn priority(&self) -> i64 {
        match self {
            TemplateSnippet::Dockerfile(s) => s.priority,
            TemplateSnippet::Kubernetes(s) => s.priority,
        }
    }

    fn conditions(&self) -> Option<&SnippetConditions> {
        match self {
            TemplateSnippet::Dockerfile(s) => s.conditions.as_ref(),
            TemplateSnippet::Kubernetes(s) => s.conditions.as_ref(),
        }
    }

    fn tags(&self) -> &[String] {
        match self {
            TemplateSnippet::Dockerfile(s) => &s.tags,
            TemplateSnippet::Kubernetes(s) => &s.tags,
        }
    }

    pub fn applies_to(&self, analysis: &Analysis) -> bool {
        self.conditions().map(|c| c.matches(analysis)).unwrap_or(true)
    }

    pub fn is_security(&self) -> bool {
        let by_target = match self {
            TemplateSnippet::Dockerfile(s) => SECURITY_DOCKERFILE_SECTIONS
                .iter()
                .any(|sec| s.section.eq_ignore_ascii_case(sec)),
            TemplateSnippet::Kubernetes(s) => SECURITY_K8S_TYPES
                .iter()
                .any(|t| s.kind.eq_ignore_ascii_case(t)),
        };
        by_target || self.tags().iter().any(|t| t.eq_ignore_ascii_case(SECURITY_TAG))
    }

    fn into_recommendation(self) -> Recommendation {
        // negative priorities still order snippets but never score below zero
        let score = self.priority().max(0) as f64;
        let (rec, target_tag, template) = match self {
            TemplateSnippet::Dockerfile(s) => {
                let text = describe(&s.description, &s.id);
                let template = serde_json::json!({"section": s.section, "content": s.content});
                (
                    Recommendation::new(s.id, "dockerfile", text).with_tags(s.tags),
                    format!("section:{}", s.section),
                    template,
                )
            }
            TemplateSnippet::Kubernetes(s) => {
                let text = describe(&s.description, &s.id);
                let template = serde_json::json!({"type": s.kind, "spec": s.spec});
                (
                    Recommendation::new(s.id, "kubernetes", text).with_tags(s.tags),
                    format!("type:{}", s.kind),
                    template,
                )
            }
        };
        let mut rec = rec.with_tags(["policy".to_string(), target_tag]).with_score(score);
        rec.policy_driven = true;
        rec.template = Some(template);
        rec
    }
}

fn describe(description: &str, id: &str) -> String {
    if description.trim().is_empty() {
        format!("Apply organization template '{id}'")
    } else {
        description.to_string()
    }
}

/// Snippets in declaration order: every Dockerfile snippet, then every
/// Kubernetes snippet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateAdditions {
    pub snippets: Vec<TemplateSnippet>,
}

impl TemplateAdditions {
    /// Decode a policy answer, dropping snippets that do not validate.
    pub fn from_policy(answer: &Value) -> Self {
        let mut snippets = Vec::new();
        let Value::Object(map) = answer else {
            obs::emit_template_dropped(0, "templates", &"answer is not an object");
            return Self { snippets };
        };

        for (target, key) in [("dockerfile", "dockerfile"), ("kubernetes", "kubernetes")] {
            let items = match map.get(key) {
                None | Some(Value::Null) => continue,
                Some(Value::Array(items)) => items,
                Some(_) => {
                    obs::emit_template_dropped(0, target, &"expected an array");
                    continue;
                }
            };
            for (index, item) in items.iter().enumerate() {
                match decode_snippet(target, item) {
                    Ok(snippet) => snippets.push(snippet),
                    Err(err) => obs::emit_template_dropped(index, target, &err),
                }
            }
        }
        Self { snippets }
    }

    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.snippets.len()
    }

    /// Applicable snippets, stable-sorted by descending priority.
    pub fn applicable(&self, analysis: &Analysis) -> Vec<&TemplateSnippet> {
        let mut selected: Vec<&TemplateSnippet> = self
            .snippets
            .iter()
            .filter(|s| s.applies_to(analysis))
            .collect();
        selected.sort_by(|a, b| b.priority().cmp(&a.priority()));
        selected
    }
}

fn decode_snippet(target: &str, item: &Value) -> Result<TemplateSnippet, String> {
    let snippet = match target {
        "dockerfile" => DockerfileSnippet::deserialize(item)
            .map(TemplateSnippet::Dockerfile)
            .map_err(|e| e.to_string())?,
        _ => K8sSnippet::deserialize(item)
            .map(TemplateSnippet::Kubernetes)
            .map_err(|e| e.to_string())?,
    };
    if snippet.id().trim().is_empty() {
        return Err("snippet id must not be empty".to_string());
    }
    Ok(snippet)
}

/// Fetch template additions. Any failure yields no additions.
pub async fn fetch_templates(engine: &dyn PolicyEngine, analysis: &Analysis) -> TemplateAdditions {
    query_policy(engine, TEMPLATES_QUERY, analysis)
        .await
        .map(|answer| TemplateAdditions::from_policy(&answer))
        .unwrap_or_default()
}

/// Prepend applicable snippets to `recommendations`.
///
/// Security snippets go to the front of `security_considerations`, the
/// rest to the front of `best_practices`, both in priority order and
/// marked policy-driven. A snippet id is injected once: the first in
/// priority order wins, and same-id entries are removed from every list.
/// Other entries already present keep their flag.
pub fn inject_templates(
    mut recommendations: RecommendationSet,
    additions: &TemplateAdditions,
    analysis: &Analysis,
) -> RecommendationSet {
    let mut seen = HashSet::new();
    let selected: Vec<&TemplateSnippet> = additions
        .applicable(analysis)
        .into_iter()
        .filter(|snippet| {
            let first = seen.insert(snippet.id().to_string());
            if !first {
                debug!(id = snippet.id(), "duplicate template id skipped");
            }
            first
        })
        .collect();

    for list in [
        &mut recommendations.security_considerations,
        &mut recommendations.best_practices,
        &mut recommendations.resource_management,
    ] {
        list.retain(|existing| !seen.contains(&existing.id));
    }

    let mut security = Vec::new();
    let mut general = Vec::new();
    for snippet in &selected {
        if snippet.is_security() {
            security.push((*snippet).clone().into_recommendation());
        } else {
            general.push((*snippet).clone().into_recommendation());
        }
    }

    let injected_security = security.len();
    let injected = selected.len();
    prepend(&mut recommendations.security_considerations, security);
    prepend(&mut recommendations.best_practices, general);

    METRICS.add_templates_injected(injected as u64);
    obs::emit_templates_injected(additions.len(), injected, injected_security);
    recommendations
}

fn prepend(list: &mut Vec<Recommendation>, policy: Vec<Recommendation>) {
    if policy.is_empty() {
        return;
    }
    let rest = std::mem::replace(list, policy);
    list.extend(rest);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::GenerationTool;
    use serde_json::json;

    fn analysis(environment: &str) -> Analysis {
        Analysis::new("node", environment, GenerationTool::GenerateDockerfile)
            .unwrap()
            .with_framework("express")
    }

    fn additions(answer: Value) -> TemplateAdditions {
        TemplateAdditions::from_policy(&answer)
    }

    fn ids(recs: &[Recommendation]) -> Vec<&str> {
        recs.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_conditions_are_conjunctive() {
        let a = additions(json!({"dockerfile": [
            {"id": "prod-only", "section": "runtime", "content": "x", "conditions": {"environments": ["production"]}},
            {"id": "node-dev", "section": "runtime", "content": "x", "conditions": {"languages": ["NODE"], "environments": ["development"]}},
            {"id": "node-flask", "section": "runtime", "content": "x", "conditions": {"languages": ["node"], "frameworks": ["flask"]}},
            {"id": "empty-dims", "section": "runtime", "content": "x", "conditions": {"languages": []}}
        ]}));
        let selected: Vec<_> = a.applicable(&analysis("development")).iter().map(|s| s.id()).collect();
        assert_eq!(selected, vec!["node-dev", "empty-dims"]);
    }

    #[test]
    fn test_framework_condition_without_framework_fails() {
        let a = additions(json!({"dockerfile": [
            {"id": "spring", "section": "build", "content": "x", "conditions": {"frameworks": ["spring"]}}
        ]}));
        let bare = Analysis::new("java", "production", GenerationTool::GenerateDockerfile).unwrap();
        assert!(a.applicable(&bare).is_empty());
    }

    #[test]
    fn test_stable_priority_order() {
        let a = additions(json!({
            "dockerfile": [
                {"id": "low", "section": "base", "content": "x", "priority": 1},
                {"id": "high-a", "section": "base", "content": "x", "priority": 10},
                {"id": "high-b", "section": "base", "content": "x", "priority": 10}
            ],
            "kubernetes": [
                {"id": "k-mid", "type": "sidecar", "spec": {}, "priority": 5},
                {"id": "k-high", "type": "sidecar", "spec": {}, "priority": 10}
            ]
        }));
        let selected: Vec<_> = a.applicable(&analysis("staging")).iter().map(|s| s.id()).collect();
        assert_eq!(selected, vec!["high-a", "high-b", "k-high", "k-mid", "low"]);
    }

    #[test]
    fn test_invalid_snippets_dropped() {
        let a = additions(json!({
            "dockerfile": [
                {"id": "ok", "section": "base", "content": "x"},
                {"id": "no-content", "section": "base"},
                {"id": "", "section": "base", "content": "x"},
                {"id": "bad-priority", "section": "base", "content": "x", "priority": "high"}
            ],
            "kubernetes": "not a list"
        }));
        assert_eq!(a.snippets.iter().map(|s| s.id()).collect::<Vec<_>>(), vec!["ok"]);
        assert!(additions(json!(["x"])).is_empty());
    }

    #[test]
    fn test_injection_placement_and_flags() {
        let mut existing = RecommendationSet::default();
        existing.security_considerations.push(Recommendation::new("generic-sec", "security", "generic"));
        existing.best_practices.push(Recommendation::new("generic-bp", "dockerfile", "generic"));

        let a = additions(json!({
            "dockerfile": [
                {"id": "org-ca-certs", "section": "base", "content": "COPY ca.crt /usr/local/share/ca-certificates/", "priority": 5},
                {"id": "org-user", "section": "security", "content": "USER 10001", "priority": 1}
            ],
            "kubernetes": [
                {"id": "org-netpol", "type": "network-policy", "spec": {"policyTypes": ["Ingress"]}, "priority": 9},
                {"id": "org-sidecar", "type": "sidecar", "spec": {}, "tags": ["security"]}
            ]
        }));
        let out = inject_templates(existing, &a, &analysis("production"));

        assert_eq!(
            ids(&out.security_considerations),
            vec!["org-netpol", "org-user", "org-sidecar", "generic-sec"]
        );
        assert_eq!(ids(&out.best_practices), vec!["org-ca-certs", "generic-bp"]);
        assert!(out.security_considerations[..3].iter().all(|r| r.policy_driven));
        assert!(!out.security_considerations[3].policy_driven);
        assert!(!out.best_practices[1].policy_driven);

        let ca = &out.best_practices[0];
        assert_eq!(ca.template.as_ref().unwrap()["section"], json!("base"));
        assert!(ca.tags.contains(&"policy".to_string()));
        assert_eq!(ca.recommendation, "Apply organization template 'org-ca-certs'");
    }

    #[test]
    fn test_same_id_across_targets_injected_once() {
        let mut existing = RecommendationSet::default();
        existing.resource_management.push(Recommendation::new("org-shared", "kubernetes", "stale"));

        let a = additions(json!({
            "dockerfile": [
                {"id": "org-shared", "section": "runtime", "content": "x", "priority": -3}
            ],
            "kubernetes": [
                {"id": "org-shared", "type": "sidecar", "spec": {}, "priority": 7},
                {"id": "org-sunk", "type": "sidecar", "spec": {}, "priority": -5}
            ]
        }));
        let out = inject_templates(existing, &a, &analysis("staging"));

        let shared: Vec<_> = out.iter().filter(|r| r.id == "org-shared").collect();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].category, "kubernetes");
        assert_eq!(shared[0].match_score, 7.0);
        assert_eq!(ids(&out.best_practices), vec!["org-shared", "org-sunk"]);
        assert!(out.resource_management.is_empty());

        let sunk = &out.best_practices[1];
        assert_eq!(sunk.match_score, 0.0);
        assert!(out.iter().all(|r| r.match_score >= 0.0));
    }

    #[test]
    fn test_no_additions_leaves_set_unchanged() {
        let mut existing = RecommendationSet::default();
        existing.best_practices.push(Recommendation::new("a", "dockerfile", "x"));
        let out = inject_templates(existing.clone(), &TemplateAdditions::default(), &analysis("dev"));
        assert_eq!(out, existing);
    }
}
