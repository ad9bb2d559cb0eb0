//! Generation config resolution: policy answer merged per field over the
//! language/environment defaults.
//!
//! Resolution never fails. A missing evaluator, a failed query, a missing
//! section and a section that fails validation all resolve to the same
//! shape: the default for every affected field.

use policy_engine::PolicyEngine;
use serde_json::Value;

use crate::analysis::Analysis;
use crate::config::{
    BuildFeatures, DockerfileConfig, FeatureToggles, FieldSource, GenerationConfig, K8sConfig,
    OrgStandards, Provenance, ResolvedConfig, ResourceDefaults, SecurityFeatures,
};
use crate::defaults::{default_dockerfile, default_kubernetes};
use crate::metrics::METRICS;
use crate::obs;
use crate::schema::{self, DockerfilePolicy, K8sPolicy};

/// Binding holding the generation-config answer.
pub const GENERATION_CONFIG_QUERY: &str = "containerization.generation_config.config";

/// Resolve the config for `analysis`, consulting `engine` when present.
pub async fn resolve(analysis: &Analysis, engine: Option<&dyn PolicyEngine>) -> ResolvedConfig {
    let answer = match engine {
        Some(engine) => query_policy(engine, GENERATION_CONFIG_QUERY, analysis).await,
        None => None,
    };
    let resolved = resolve_answer(analysis, answer.as_ref());
    let policy_fields = resolved.provenance.policy_fields().count();
    obs::emit_config_resolved(
        policy_fields,
        resolved.provenance.len() - policy_fields,
        engine.is_some(),
    );
    resolved
}

/// Query `engine`, mapping every failure to "no answer".
pub(crate) async fn query_policy(
    engine: &dyn PolicyEngine,
    query: &str,
    analysis: &Analysis,
) -> Option<Value> {
    METRICS.inc_policy_queries();
    match engine.query_value(query, &analysis.policy_input()).await {
        Ok(answer) => answer,
        Err(err) => {
            obs::emit_policy_fallback(query, &err);
            METRICS.inc_policy_fallbacks();
            None
        }
    }
}

/// Validate and merge an already-fetched answer.
pub fn resolve_answer(analysis: &Analysis, answer: Option<&Value>) -> ResolvedConfig {
    let (docker_policy, k8s_policy) = match answer.map(schema::sections) {
        None => (None, None),
        Some(Ok((docker, k8s))) => (
            docker.and_then(|v| accept(schema::DOCKERFILE_SECTION, schema::validate_dockerfile(v))),
            k8s.and_then(|v| accept(schema::KUBERNETES_SECTION, schema::validate_kubernetes(v))),
        ),
        Some(Err(err)) => {
            obs::emit_policy_rejected("generation_config", &err);
            METRICS.inc_policy_fallbacks();
            (None, None)
        }
    };

    let mut merge = Merge::default();
    let dockerfile = merge.dockerfile(
        default_dockerfile(analysis),
        &docker_policy.unwrap_or_default(),
    );
    let kubernetes = merge.kubernetes(default_kubernetes(analysis), &k8s_policy.unwrap_or_default());

    ResolvedConfig {
        config: GenerationConfig {
            dockerfile,
            kubernetes,
        },
        provenance: merge.provenance,
    }
}

fn accept<T>(section: &str, validated: crate::error::Result<T>) -> Option<T> {
    match validated {
        Ok(policy) => Some(policy),
        Err(err) => {
            obs::emit_policy_rejected(section, &err);
            METRICS.inc_policy_fallbacks();
            None
        }
    }
}

/// Field-by-field merge that records provenance as it goes.
#[derive(Default)]
struct Merge {
    provenance: Provenance,
}

impl Merge {
    fn pick<T>(&mut self, path: &str, policy: Option<T>, default: T) -> T {
        match policy {
            Some(value) => {
                self.provenance.record(path, FieldSource::Policy);
                value
            }
            None => {
                self.provenance.record(path, FieldSource::Default);
                default
            }
        }
    }

    fn dockerfile(&mut self, d: DockerfileConfig, p: &DockerfilePolicy) -> DockerfileConfig {
        let sf = &p.security_features;
        let bf = &p.build_features;
        DockerfileConfig {
            build_strategy: self.pick("dockerfile.buildStrategy", p.build_strategy, d.build_strategy),
            base_image_category: self.pick(
                "dockerfile.baseImageCategory",
                p.base_image_category,
                d.base_image_category,
            ),
            optimization_priority: self.pick(
                "dockerfile.optimizationPriority",
                p.optimization_priority,
                d.optimization_priority,
            ),
            security_features: SecurityFeatures {
                non_root_user: self.pick(
                    "dockerfile.securityFeatures.nonRootUser",
                    sf.non_root_user,
                    d.security_features.non_root_user,
                ),
                read_only_root_filesystem: self.pick(
                    "dockerfile.securityFeatures.readOnlyRootFilesystem",
                    sf.read_only_root_filesystem,
                    d.security_features.read_only_root_filesystem,
                ),
                vulnerability_scanning: self.pick(
                    "dockerfile.securityFeatures.vulnerabilityScanning",
                    sf.vulnerability_scanning,
                    d.security_features.vulnerability_scanning,
                ),
                no_new_privileges: self.pick(
                    "dockerfile.securityFeatures.noNewPrivileges",
                    sf.no_new_privileges,
                    d.security_features.no_new_privileges,
                ),
            },
            build_features: BuildFeatures {
                layer_caching: self.pick(
                    "dockerfile.buildFeatures.layerCaching",
                    bf.layer_caching,
                    d.build_features.layer_caching,
                ),
                build_cache_mounts: self.pick(
                    "dockerfile.buildFeatures.buildCacheMounts",
                    bf.build_cache_mounts,
                    d.build_features.build_cache_mounts,
                ),
                healthcheck: self.pick(
                    "dockerfile.buildFeatures.healthcheck",
                    bf.healthcheck,
                    d.build_features.healthcheck,
                ),
            },
        }
    }

    fn kubernetes(&mut self, d: K8sConfig, p: &K8sPolicy) -> K8sConfig {
        let rd = &p.resource_defaults;
        let os = &p.org_standards;
        let ft = &p.feature_toggles;

        let replicas = self.pick("kubernetes.replicas", p.replicas, d.replicas);
        K8sConfig {
            resource_defaults: ResourceDefaults {
                cpu_request: self.pick(
                    "kubernetes.resourceDefaults.cpuRequest",
                    rd.cpu_request.clone(),
                    d.resource_defaults.cpu_request,
                ),
                cpu_limit: self.pick(
                    "kubernetes.resourceDefaults.cpuLimit",
                    rd.cpu_limit.clone(),
                    d.resource_defaults.cpu_limit,
                ),
                memory_request: self.pick(
                    "kubernetes.resourceDefaults.memoryRequest",
                    rd.memory_request.clone(),
                    d.resource_defaults.memory_request,
                ),
                memory_limit: self.pick(
                    "kubernetes.resourceDefaults.memoryLimit",
                    rd.memory_limit.clone(),
                    d.resource_defaults.memory_limit,
                ),
            },
            org_standards: OrgStandards {
                required_labels: self.pick(
                    "kubernetes.orgStandards.requiredLabels",
                    os.required_labels.clone(),
                    d.org_standards.required_labels,
                ),
                namespace: self.pick(
                    "kubernetes.orgStandards.namespace",
                    os.namespace.clone().map(Some),
                    d.org_standards.namespace,
                ),
                allowed_registries: self.pick(
                    "kubernetes.orgStandards.allowedRegistries",
                    os.allowed_registries.clone(),
                    d.org_standards.allowed_registries,
                ),
                service_account: self.pick(
                    "kubernetes.orgStandards.serviceAccount",
                    os.service_account.clone().map(Some),
                    d.org_standards.service_account,
                ),
                image_pull_policy: self.pick(
                    "kubernetes.orgStandards.imagePullPolicy",
                    os.image_pull_policy,
                    d.org_standards.image_pull_policy,
                ),
            },
            feature_toggles: FeatureToggles {
                health_probes: self.pick(
                    "kubernetes.featureToggles.healthProbes",
                    ft.health_probes,
                    d.feature_toggles.health_probes,
                ),
                horizontal_pod_autoscaler: self.pick(
                    "kubernetes.featureToggles.horizontalPodAutoscaler",
                    ft.horizontal_pod_autoscaler,
                    d.feature_toggles.horizontal_pod_autoscaler,
                ),
                network_policy: self.pick(
                    "kubernetes.featureToggles.networkPolicy",
                    ft.network_policy,
                    d.feature_toggles.network_policy,
                ),
                // the default follows the merged replica count
                pod_disruption_budget: self.pick(
                    "kubernetes.featureToggles.podDisruptionBudget",
                    ft.pod_disruption_budget,
                    replicas > 1,
                ),
            },
            replicas,
            deployment_strategy: self.pick(
                "kubernetes.deploymentStrategy",
                p.deployment_strategy,
                d.deployment_strategy,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::GenerationTool;
    use crate::config::{BuildStrategy, DeploymentStrategy};
    use crate::defaults::default_config;
    use serde_json::json;

    fn analysis(language: &str, environment: &str) -> Analysis {
        Analysis::new(language, environment, GenerationTool::GenerateDockerfile).unwrap()
    }

    #[test]
    fn test_no_answer_is_all_default() {
        let a = analysis("node", "production");
        let resolved = resolve_answer(&a, None);
        assert_eq!(resolved.config, default_config(&a));
        assert!(!resolved.any_policy());
        assert!(resolved.provenance.len() > 10);
    }

    #[test]
    fn test_replicas_only_keeps_other_defaults() {
        let a = analysis("go", "staging");
        let resolved = resolve_answer(&a, Some(&json!({"kubernetes": {"replicas": 5}})));
        let k8s = &resolved.config.kubernetes;
        assert_eq!(k8s.replicas, 5);
        assert_eq!(k8s.deployment_strategy, DeploymentStrategy::RollingUpdate);
        assert_eq!(k8s.resource_defaults, default_kubernetes(&a).resource_defaults);
        assert_eq!(resolved.source("kubernetes.replicas"), FieldSource::Policy);
        assert_eq!(resolved.source("kubernetes.deploymentStrategy"), FieldSource::Default);
        assert_eq!(
            resolved.source("kubernetes.resourceDefaults.cpuLimit"),
            FieldSource::Default
        );
        assert_eq!(resolved.config.dockerfile, default_dockerfile(&a));
    }

    #[test]
    fn test_invalid_section_degrades_only_that_section() {
        let a = analysis("java", "production");
        let answer = json!({
            "dockerfile": {"buildStrategy": "single-stage"},
            "kubernetes": {"replicas": 0}
        });
        let resolved = resolve_answer(&a, Some(&answer));
        assert_eq!(resolved.config.dockerfile.build_strategy, BuildStrategy::SingleStage);
        assert_eq!(resolved.config.kubernetes, default_kubernetes(&a));
        assert_eq!(resolved.source("kubernetes.replicas"), FieldSource::Default);
    }

    #[test]
    fn test_answer_without_sections_is_no_policy() {
        let a = analysis("python", "development");
        for answer in [json!({}), json!({"unrelated": 1}), json!("nope"), json!(null)] {
            let resolved = resolve_answer(&a, Some(&answer));
            assert_eq!(resolved.config, default_config(&a));
            assert!(!resolved.any_policy());
        }
    }

    #[test]
    fn test_pdb_default_follows_merged_replicas() {
        let a = analysis("go", "development");
        let resolved = resolve_answer(&a, Some(&json!({"kubernetes": {"replicas": 3}})));
        assert!(resolved.config.kubernetes.feature_toggles.pod_disruption_budget);
        assert_eq!(
            resolved.source("kubernetes.featureToggles.podDisruptionBudget"),
            FieldSource::Default
        );
    }

    #[test]
    fn test_nested_feature_override() {
        let a = analysis("go", "production");
        let resolved = resolve_answer(
            &a,
            Some(&json!({"dockerfile": {"securityFeatures": {"vulnerabilityScanning": false}}})),
        );
        let sf = &resolved.config.dockerfile.security_features;
        assert!(!sf.vulnerability_scanning);
        assert!(sf.read_only_root_filesystem);
        assert_eq!(
            resolved.source("dockerfile.securityFeatures.vulnerabilityScanning"),
            FieldSource::Policy
        );
    }

    #[tokio::test]
    async fn test_resolve_without_engine() {
        let a = analysis("rust", "production");
        let resolved = resolve(&a, None).await;
        assert_eq!(resolved.config, default_config(&a));
    }
}
