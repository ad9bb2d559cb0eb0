//! Validate-then-coerce for policy answers.
//!
//! Policy answers are untyped JSON. They are decoded into closed,
//! all-optional fragment types here and checked for value constraints;
//! nothing untyped flows past this module. Unknown keys and unknown enum
//! values are rejected, never ignored or coerced.

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::config::{
    BaseImageCategory, BuildStrategy, DeploymentStrategy, ImagePullPolicy, OptimizationPriority,
};
use crate::error::{ContainerizeError, Result};

pub const DOCKERFILE_SECTION: &str = "dockerfile";
pub const KUBERNETES_SECTION: &str = "kubernetes";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SecurityFeaturesPolicy {
    pub non_root_user: Option<bool>,
    pub read_only_root_filesystem: Option<bool>,
    pub vulnerability_scanning: Option<bool>,
    pub no_new_privileges: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BuildFeaturesPolicy {
    pub layer_caching: Option<bool>,
    pub build_cache_mounts: Option<bool>,
    pub healthcheck: Option<bool>,
}

/// Dockerfile section of a policy answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DockerfilePolicy {
    pub build_strategy: Option<BuildStrategy>,
    pub base_image_category: Option<BaseImageCategory>,
    pub optimization_priority: Option<OptimizationPriority>,
    #[serde(default)]
    pub security_features: SecurityFeaturesPolicy,
    #[serde(default)]
    pub build_features: BuildFeaturesPolicy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceDefaultsPolicy {
    pub cpu_request: Option<String>,
    pub cpu_limit: Option<String>,
    pub memory_request: Option<String>,
    pub memory_limit: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OrgStandardsPolicy {
    pub required_labels: Option<Vec<String>>,
    pub namespace: Option<String>,
    pub allowed_registries: Option<Vec<String>>,
    pub service_account: Option<String>,
    pub image_pull_policy: Option<ImagePullPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FeatureTogglesPolicy {
    pub health_probes: Option<bool>,
    pub horizontal_pod_autoscaler: Option<bool>,
    pub network_policy: Option<bool>,
    pub pod_disruption_budget: Option<bool>,
}

/// Kubernetes section of a policy answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct K8sPolicy {
    #[serde(default)]
    pub resource_defaults: ResourceDefaultsPolicy,
    #[serde(default)]
    pub org_standards: OrgStandardsPolicy,
    #[serde(default)]
    pub feature_toggles: FeatureTogglesPolicy,
    pub replicas: Option<u32>,
    pub deployment_strategy: Option<DeploymentStrategy>,
}

/// The two sections of a generation-config answer. A missing key (or a
/// `null` value) is `None`: no policy for that target.
pub fn sections(answer: &Value) -> Result<(Option<&Value>, Option<&Value>)> {
    let Value::Object(map) = answer else {
        return Err(ContainerizeError::schema(
            "generation_config",
            format!("expected an object, got {}", kind(answer)),
        ));
    };
    let section = |key: &str| map.get(key).filter(|v| !v.is_null());
    Ok((section(DOCKERFILE_SECTION), section(KUBERNETES_SECTION)))
}

pub fn validate_dockerfile(value: &Value) -> Result<DockerfilePolicy> {
    decode(DOCKERFILE_SECTION, value)
}

pub fn validate_kubernetes(value: &Value) -> Result<K8sPolicy> {
    let policy: K8sPolicy = decode(KUBERNETES_SECTION, value)?;
    let fail = |message: String| Err(ContainerizeError::schema(KUBERNETES_SECTION, message));

    if policy.replicas == Some(0) {
        return fail("replicas must be a positive integer".to_string());
    }

    let resources = &policy.resource_defaults;
    for (field, quantity) in [
        ("cpuRequest", &resources.cpu_request),
        ("cpuLimit", &resources.cpu_limit),
    ] {
        if let Some(q) = quantity {
            if !cpu_quantity().is_match(q) {
                return fail(format!("resourceDefaults.{field} '{q}' is not a CPU quantity"));
            }
        }
    }
    for (field, quantity) in [
        ("memoryRequest", &resources.memory_request),
        ("memoryLimit", &resources.memory_limit),
    ] {
        if let Some(q) = quantity {
            if !memory_quantity().is_match(q) {
                return fail(format!(
                    "resourceDefaults.{field} '{q}' is not a memory quantity"
                ));
            }
        }
    }

    let org = &policy.org_standards;
    if let Some(ns) = &org.namespace {
        if !dns_label().is_match(ns) {
            return fail(format!("orgStandards.namespace '{ns}' is not a DNS-1123 label"));
        }
    }
    if let Some(sa) = &org.service_account {
        if sa.trim().is_empty() {
            return fail("orgStandards.serviceAccount must not be empty".to_string());
        }
    }
    for (field, values) in [
        ("requiredLabels", &org.required_labels),
        ("allowedRegistries", &org.allowed_registries),
    ] {
        if values.iter().flatten().any(|v| v.trim().is_empty()) {
            return fail(format!("orgStandards.{field} contains an empty entry"));
        }
    }

    Ok(policy)
}

fn decode<T: DeserializeOwned>(section: &'static str, value: &Value) -> Result<T> {
    if !value.is_object() {
        return Err(ContainerizeError::schema(
            section,
            format!("expected an object, got {}", kind(value)),
        ));
    }
    T::deserialize(value).map_err(|e| ContainerizeError::schema(section, e.to_string()))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn cpu_quantity() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([0-9]+m|[0-9]+(\.[0-9]+)?)$").expect("valid cpu pattern"))
}

fn memory_quantity() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[0-9]+(\.[0-9]+)?(Ki|Mi|Gi|Ti|Pi|Ei|k|M|G|T|P|E)?$")
            .expect("valid memory pattern")
    })
}

fn dns_label() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([-a-z0-9]{0,61}[a-z0-9])?$").expect("valid dns label pattern")
    })
}
