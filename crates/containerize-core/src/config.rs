//! The typed generation configuration and its per-field provenance.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Closed enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildStrategy {
    MultiStage,
    SingleStage,
    Distroless,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseImageCategory {
    Official,
    Distroless,
    Alpine,
    Minimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationPriority {
    Security,
    Size,
    Speed,
    Balanced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentStrategy {
    RollingUpdate,
    Recreate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImagePullPolicy {
    Always,
    IfNotPresent,
    Never,
}

// ---------------------------------------------------------------------------
// Dockerfile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityFeatures {
    pub non_root_user: bool,
    pub read_only_root_filesystem: bool,
    pub vulnerability_scanning: bool,
    pub no_new_privileges: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildFeatures {
    pub layer_caching: bool,
    pub build_cache_mounts: bool,
    pub healthcheck: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerfileConfig {
    pub build_strategy: BuildStrategy,
    pub base_image_category: BaseImageCategory,
    pub optimization_priority: OptimizationPriority,
    pub security_features: SecurityFeatures,
    pub build_features: BuildFeatures,
}

// ---------------------------------------------------------------------------
// Kubernetes
// ---------------------------------------------------------------------------

/// Kubernetes quantity strings (`250m`, `512Mi`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefaults {
    pub cpu_request: String,
    pub cpu_limit: String,
    pub memory_request: String,
    pub memory_limit: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgStandards {
    pub required_labels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub allowed_registries: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
    pub image_pull_policy: ImagePullPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureToggles {
    pub health_probes: bool,
    pub horizontal_pod_autoscaler: bool,
    pub network_policy: bool,
    pub pod_disruption_budget: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct K8sConfig {
    pub resource_defaults: ResourceDefaults,
    pub org_standards: OrgStandards,
    pub feature_toggles: FeatureToggles,
    pub replicas: u32,
    pub deployment_strategy: DeploymentStrategy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub dockerfile: DockerfileConfig,
    pub kubernetes: K8sConfig,
}

// ---------------------------------------------------------------------------
// Provenance
// ---------------------------------------------------------------------------

/// Where a resolved field's value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    Policy,
    Default,
}

impl FieldSource {
    /// Reason tag attached to recommendations built from the field.
    pub fn reason(self) -> &'static str {
        match self {
            FieldSource::Policy => "policy-driven",
            FieldSource::Default => "default",
        }
    }

    pub fn is_policy(self) -> bool {
        self == FieldSource::Policy
    }
}

/// Per-field provenance keyed by wire path (`dockerfile.buildStrategy`,
/// `kubernetes.resourceDefaults.cpuLimit`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance(BTreeMap<String, FieldSource>);

impl Provenance {
    pub fn record(&mut self, path: impl Into<String>, source: FieldSource) {
        self.0.insert(path.into(), source);
    }

    /// Source of `path`; unknown paths count as default.
    pub fn source(&self, path: &str) -> FieldSource {
        self.0.get(path).copied().unwrap_or(FieldSource::Default)
    }

    pub fn policy_fields(&self) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .filter(|(_, s)| s.is_policy())
            .map(|(p, _)| p.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, FieldSource)> {
        self.0.iter().map(|(p, s)| (p.as_str(), *s))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Resolver output: the full config plus where each field came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedConfig {
    pub config: GenerationConfig,
    pub provenance: Provenance,
}

impl ResolvedConfig {
    pub fn source(&self, path: &str) -> FieldSource {
        self.provenance.source(path)
    }

    /// True when at least one field came from policy.
    pub fn any_policy(&self) -> bool {
        self.provenance.policy_fields().next().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_enum_wire_names() {
        assert_eq!(json!(BuildStrategy::MultiStage), json!("multi-stage"));
        assert_eq!(json!(DeploymentStrategy::RollingUpdate), json!("RollingUpdate"));
        assert_eq!(json!(ImagePullPolicy::IfNotPresent), json!("IfNotPresent"));
        assert!(serde_json::from_value::<DeploymentStrategy>(json!("BlueGreen")).is_err());
    }

    #[test]
    fn test_provenance_defaults_unknown_paths() {
        let mut p = Provenance::default();
        p.record("kubernetes.replicas", FieldSource::Policy);
        p.record("dockerfile.buildStrategy", FieldSource::Default);
        assert_eq!(p.source("kubernetes.replicas"), FieldSource::Policy);
        assert_eq!(p.source("nope"), FieldSource::Default);
        assert_eq!(p.policy_fields().collect::<Vec<_>>(), vec!["kubernetes.replicas"]);
        assert_eq!(FieldSource::Policy.reason(), "policy-driven");
    }
}
