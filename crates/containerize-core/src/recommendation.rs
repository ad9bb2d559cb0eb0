//! Recommendation entries handed to the downstream generator.

use knowledge_packs::KnowledgeMatch;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{BaseImageCategory, BuildStrategy, FieldSource, OptimizationPriority, ResolvedConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub id: String,
    pub category: String,
    pub recommendation: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub match_score: f64,
    #[serde(default)]
    pub policy_driven: bool,
    /// Snippet payload for template-injected entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Value>,
}

impl Recommendation {
    pub fn new(id: impl Into<String>, category: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            recommendation: text.into(),
            tags: Vec::new(),
            match_score: 1.0,
            policy_driven: false,
            template: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.match_score = score;
        self
    }

    /// Tag with the field's reason and mark policy-driven when it is.
    pub fn sourced(mut self, source: FieldSource) -> Self {
        self.tags.push(source.reason().to_string());
        self.policy_driven = source.is_policy();
        self
    }
}

impl From<KnowledgeMatch> for Recommendation {
    fn from(m: KnowledgeMatch) -> Self {
        Self {
            id: m.entry.id,
            category: m.entry.category.as_str().to_string(),
            recommendation: m.entry.recommendation,
            tags: m.entry.tags,
            match_score: m.weight,
            policy_driven: false,
            template: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationSet {
    #[serde(default)]
    pub security_considerations: Vec<Recommendation>,
    #[serde(default)]
    pub best_practices: Vec<Recommendation>,
    #[serde(default)]
    pub resource_management: Vec<Recommendation>,
}

impl RecommendationSet {
    pub fn len(&self) -> usize {
        self.security_considerations.len() + self.best_practices.len() + self.resource_management.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Recommendation> {
        self.security_considerations
            .iter()
            .chain(&self.best_practices)
            .chain(&self.resource_management)
    }

    /// Append `other`'s lists after ours, skipping ids already present.
    pub fn extend(&mut self, other: RecommendationSet) {
        fn append(into: &mut Vec<Recommendation>, from: Vec<Recommendation>) {
            for rec in from {
                if !into.iter().any(|r| r.id == rec.id) {
                    into.push(rec);
                }
            }
        }
        append(&mut self.security_considerations, other.security_considerations);
        append(&mut self.best_practices, other.best_practices);
        append(&mut self.resource_management, other.resource_management);
    }
}

/// Recommendations derived from the resolved config, each tagged with
/// where its driving field came from.
pub fn config_recommendations(resolved: &ResolvedConfig) -> RecommendationSet {
    let docker = &resolved.config.dockerfile;
    let k8s = &resolved.config.kubernetes;
    let src = |path: &str| resolved.source(path);
    // a group is policy-driven if any field in it is
    let any_src = |paths: &[&str]| {
        if paths.iter().any(|p| src(p).is_policy()) {
            FieldSource::Policy
        } else {
            FieldSource::Default
        }
    };

    let mut set = RecommendationSet::default();

    set.best_practices.push(
        Recommendation::new(
            "config-build-strategy",
            "dockerfile",
            match docker.build_strategy {
                BuildStrategy::MultiStage => {
                    "Use a multi-stage build: compile in a builder stage and copy only runtime artifacts"
                }
                BuildStrategy::SingleStage => "Use a single-stage build on a slim runtime image",
                BuildStrategy::Distroless => {
                    "Build in a builder stage and ship the artifact on a distroless runtime"
                }
            },
        )
        .with_tags(["build"])
        .sourced(src("dockerfile.buildStrategy")),
    );
    set.best_practices.push(
        Recommendation::new(
            "config-base-image",
            "dockerfile",
            match docker.base_image_category {
                BaseImageCategory::Official => "Start from the official language image, pinned to a version",
                BaseImageCategory::Distroless => "Use a distroless base image for the runtime stage",
                BaseImageCategory::Alpine => "Use an Alpine-based image and verify libc compatibility",
                BaseImageCategory::Minimal => "Use a minimal (slim) base image for the runtime stage",
            },
        )
        .with_tags(["base-image"])
        .sourced(src("dockerfile.baseImageCategory")),
    );
    set.best_practices.push(
        Recommendation::new(
            "config-optimization-priority",
            "optimization",
            match docker.optimization_priority {
                OptimizationPriority::Security => "Optimize for security: minimal packages, pinned digests, scanned layers",
                OptimizationPriority::Size => "Optimize for image size: strip build tooling and caches",
                OptimizationPriority::Speed => "Optimize for build speed: order layers for cache reuse",
                OptimizationPriority::Balanced => "Balance image size, build speed and hardening",
            },
        )
        .sourced(src("dockerfile.optimizationPriority")),
    );
    if docker.build_features.healthcheck {
        set.best_practices.push(
            Recommendation::new(
                "config-healthcheck",
                "dockerfile",
                "Declare a HEALTHCHECK for the service",
            )
            .sourced(src("dockerfile.buildFeatures.healthcheck")),
        );
    }

    let security = &docker.security_features;
    for (enabled, id, path, text) in [
        (
            security.non_root_user,
            "config-non-root-user",
            "dockerfile.securityFeatures.nonRootUser",
            "Create and switch to a non-root user before the entrypoint",
        ),
        (
            security.read_only_root_filesystem,
            "config-read-only-rootfs",
            "dockerfile.securityFeatures.readOnlyRootFilesystem",
            "Run with a read-only root filesystem; mount writable paths explicitly",
        ),
        (
            security.vulnerability_scanning,
            "config-vulnerability-scanning",
            "dockerfile.securityFeatures.vulnerabilityScanning",
            "Scan the image for vulnerabilities before it is promoted",
        ),
        (
            security.no_new_privileges,
            "config-no-new-privileges",
            "dockerfile.securityFeatures.noNewPrivileges",
            "Disallow privilege escalation (no-new-privileges)",
        ),
    ] {
        if enabled {
            set.security_considerations.push(
                Recommendation::new(id, "security", text)
                    .with_tags(["security"])
                    .sourced(src(path)),
            );
        }
    }

    let r = &k8s.resource_defaults;
    set.resource_management.push(
        Recommendation::new(
            "config-resources",
            "kubernetes",
            format!(
                "Request {} CPU / {} memory and limit to {} CPU / {} memory",
                r.cpu_request, r.memory_request, r.cpu_limit, r.memory_limit
            ),
        )
        .with_tags(["resources"])
        .sourced(any_src(&[
            "kubernetes.resourceDefaults.cpuRequest",
            "kubernetes.resourceDefaults.cpuLimit",
            "kubernetes.resourceDefaults.memoryRequest",
            "kubernetes.resourceDefaults.memoryLimit",
        ])),
    );
    set.resource_management.push(
        Recommendation::new(
            "config-replicas",
            "kubernetes",
            format!(
                "Run {} replica(s) with a {:?} deployment strategy",
                k8s.replicas, k8s.deployment_strategy
            ),
        )
        .with_tags(["replicas"])
        .sourced(any_src(&[
            "kubernetes.replicas",
            "kubernetes.deploymentStrategy",
        ])),
    );
    if k8s.feature_toggles.horizontal_pod_autoscaler {
        set.resource_management.push(
            Recommendation::new(
                "config-autoscaling",
                "kubernetes",
                "Add a HorizontalPodAutoscaler sized from the resource requests",
            )
            .with_tags(["scaling"])
            .sourced(src("kubernetes.featureToggles.horizontalPodAutoscaler")),
        );
    }
    if k8s.feature_toggles.pod_disruption_budget {
        set.resource_management.push(
            Recommendation::new(
                "config-pod-disruption-budget",
                "kubernetes",
                "Add a PodDisruptionBudget so voluntary disruptions keep one replica available",
            )
            .with_tags(["availability"])
            .sourced(src("kubernetes.featureToggles.podDisruptionBudget")),
        );
    }

    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Analysis, GenerationTool};
    use crate::resolver::resolve_answer;
    use serde_json::json;

    #[test]
    fn test_wire_shape_is_camel_case() {
        let rec = Recommendation::new("a", "security", "do it").with_score(2.5);
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(
            v,
            json!({"id": "a", "category": "security", "recommendation": "do it", "matchScore": 2.5, "policyDriven": false})
        );
    }

    #[test]
    fn test_config_recommendations_carry_reason() {
        let analysis = Analysis::new("java", "production", GenerationTool::GenerateDockerfile).unwrap();
        let answer = json!({"dockerfile": {"buildStrategy": "single-stage"}, "kubernetes": {"replicas": 4}});
        let resolved = resolve_answer(&analysis, Some(&answer));
        let set = config_recommendations(&resolved);

        let build = set.best_practices.iter().find(|r| r.id == "config-build-strategy").unwrap();
        assert!(build.policy_driven);
        assert!(build.tags.contains(&"policy-driven".to_string()));

        let base = set.best_practices.iter().find(|r| r.id == "config-base-image").unwrap();
        assert!(!base.policy_driven);
        assert!(base.tags.contains(&"default".to_string()));

        let replicas = set.resource_management.iter().find(|r| r.id == "config-replicas").unwrap();
        assert!(replicas.policy_driven);
        assert!(replicas.recommendation.contains("Run 4 replica(s)"));

        // production defaults enable every hardening feature
        assert_eq!(set.security_considerations.len(), 4);
    }

    #[test]
    fn test_extend_skips_duplicate_ids() {
        let mut a = RecommendationSet::default();
        a.best_practices.push(Recommendation::new("x", "build", "one"));
        let mut b = RecommendationSet::default();
        b.best_practices.push(Recommendation::new("x", "build", "two"));
        b.best_practices.push(Recommendation::new("y", "build", "three"));
        a.extend(b);
        let ids: Vec<_> = a.best_practices.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y"]);
        assert_eq!(a.best_practices[0].recommendation, "one");
    }
}
