//! Language and environment default heuristics.
//!
//! These are the values every field falls back to when policy is absent,
//! silent or invalid. All functions are pure.

use crate::analysis::{Analysis, EnvironmentClass};
use crate::config::{
    BaseImageCategory, BuildFeatures, BuildStrategy, DeploymentStrategy, DockerfileConfig,
    FeatureToggles, GenerationConfig, ImagePullPolicy, K8sConfig, OptimizationPriority,
    OrgStandards, ResourceDefaults, SecurityFeatures,
};

/// Languages that compile to an artifact and benefit from a build stage.
const COMPILED_LANGUAGES: &[&str] = &["java", "go", "rust", "dotnet", "csharp", "typescript"];

/// Interpreted languages that default to a single stage.
const INTERPRETED_LANGUAGES: &[&str] = &["python", "node", "javascript", "ruby", "php"];

/// Languages that ship well on distroless in production.
const DISTROLESS_LANGUAGES: &[&str] = &["go", "rust", "java"];

pub const REQUIRED_LABELS: &[&str] = &["app", "environment"];

pub fn default_config(analysis: &Analysis) -> GenerationConfig {
    GenerationConfig {
        dockerfile: default_dockerfile(analysis),
        kubernetes: default_kubernetes(analysis),
    }
}

pub fn default_dockerfile(analysis: &Analysis) -> DockerfileConfig {
    let env = analysis.environment_class();
    let production = env == EnvironmentClass::Production;
    let build_strategy = build_strategy(analysis);

    DockerfileConfig {
        build_strategy,
        base_image_category: match env {
            EnvironmentClass::Production
                if DISTROLESS_LANGUAGES.contains(&analysis.language.as_str()) =>
            {
                BaseImageCategory::Distroless
            }
            EnvironmentClass::Production => BaseImageCategory::Minimal,
            _ => BaseImageCategory::Official,
        },
        optimization_priority: match env {
            EnvironmentClass::Production => OptimizationPriority::Security,
            EnvironmentClass::Staging => OptimizationPriority::Balanced,
            EnvironmentClass::Development => OptimizationPriority::Speed,
        },
        security_features: SecurityFeatures {
            non_root_user: true,
            read_only_root_filesystem: production,
            vulnerability_scanning: production,
            no_new_privileges: production,
        },
        build_features: BuildFeatures {
            layer_caching: true,
            build_cache_mounts: build_strategy == BuildStrategy::MultiStage,
            healthcheck: env != EnvironmentClass::Development,
        },
    }
}

/// Compiled languages build multi-stage. Interpreted ones stay single-stage
/// unless a production workload asks for security optimization (critical
/// tier or high traffic). Unknown languages build multi-stage.
pub fn build_strategy(analysis: &Analysis) -> BuildStrategy {
    let language = analysis.language.as_str();
    if COMPILED_LANGUAGES.contains(&language) {
        return BuildStrategy::MultiStage;
    }
    if INTERPRETED_LANGUAGES.contains(&language) {
        let hardened =
            analysis.is_production() && (analysis.is_critical() || analysis.is_high_traffic());
        return if hardened {
            BuildStrategy::MultiStage
        } else {
            BuildStrategy::SingleStage
        };
    }
    BuildStrategy::MultiStage
}

pub fn default_kubernetes(analysis: &Analysis) -> K8sConfig {
    let env = analysis.environment_class();
    let production = env == EnvironmentClass::Production;
    let replicas = match env {
        EnvironmentClass::Development => 1,
        EnvironmentClass::Staging => 2,
        EnvironmentClass::Production if analysis.is_high_traffic() => 5,
        EnvironmentClass::Production => 3,
    };

    K8sConfig {
        resource_defaults: resource_defaults(analysis),
        org_standards: OrgStandards {
            required_labels: REQUIRED_LABELS.iter().map(|l| l.to_string()).collect(),
            namespace: None,
            allowed_registries: Vec::new(),
            service_account: None,
            image_pull_policy: if production {
                ImagePullPolicy::Always
            } else {
                ImagePullPolicy::IfNotPresent
            },
        },
        feature_toggles: FeatureToggles {
            health_probes: true,
            horizontal_pod_autoscaler: production,
            network_policy: production,
            pod_disruption_budget: replicas > 1,
        },
        replicas,
        deployment_strategy: match env {
            EnvironmentClass::Development => DeploymentStrategy::Recreate,
            _ => DeploymentStrategy::RollingUpdate,
        },
    }
}

/// Requests and limits per environment; the JVM gets twice the memory.
pub fn resource_defaults(analysis: &Analysis) -> ResourceDefaults {
    let (cpu_request, cpu_limit, memory_request_mi, memory_limit_mi) =
        match analysis.environment_class() {
            EnvironmentClass::Development => ("100m", "250m", 128, 256),
            EnvironmentClass::Staging => ("250m", "500m", 256, 512),
            EnvironmentClass::Production => ("500m", "1000m", 512, 1024),
        };
    let factor = if analysis.language == "java" { 2 } else { 1 };
    ResourceDefaults {
        cpu_request: cpu_request.to_string(),
        cpu_limit: cpu_limit.to_string(),
        memory_request: mebibytes(memory_request_mi * factor),
        memory_limit: mebibytes(memory_limit_mi * factor),
    }
}

fn mebibytes(mi: u32) -> String {
    if mi >= 1024 && mi % 1024 == 0 {
        format!("{}Gi", mi / 1024)
    } else {
        format!("{mi}Mi")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::GenerationTool;

    fn analysis(language: &str, environment: &str) -> Analysis {
        Analysis::new(language, environment, GenerationTool::GenerateDockerfile).unwrap()
    }

    #[test]
    fn test_build_strategy_by_language() {
        assert_eq!(build_strategy(&analysis("java", "development")), BuildStrategy::MultiStage);
        assert_eq!(build_strategy(&analysis("go", "production")), BuildStrategy::MultiStage);
        assert_eq!(build_strategy(&analysis("python", "staging")), BuildStrategy::SingleStage);
        assert_eq!(build_strategy(&analysis("node", "production")), BuildStrategy::SingleStage);
        assert_eq!(build_strategy(&analysis("elixir", "development")), BuildStrategy::MultiStage);
    }

    #[test]
    fn test_interpreted_promoted_for_critical_production() {
        let critical = analysis("node", "production").with_criticality_tier("tier-1");
        assert_eq!(build_strategy(&critical), BuildStrategy::MultiStage);
        let busy = analysis("python", "production").with_traffic_level("high");
        assert_eq!(build_strategy(&busy), BuildStrategy::MultiStage);
        let dev_critical = analysis("node", "development").with_criticality_tier("critical");
        assert_eq!(build_strategy(&dev_critical), BuildStrategy::SingleStage);
    }

    #[test]
    fn test_dockerfile_defaults_by_environment() {
        let prod = default_dockerfile(&analysis("go", "production"));
        assert_eq!(prod.base_image_category, BaseImageCategory::Distroless);
        assert_eq!(prod.optimization_priority, OptimizationPriority::Security);
        assert!(prod.security_features.read_only_root_filesystem);
        assert!(prod.build_features.build_cache_mounts);

        let prod_py = default_dockerfile(&analysis("python", "production"));
        assert_eq!(prod_py.base_image_category, BaseImageCategory::Minimal);
        assert!(!prod_py.build_features.build_cache_mounts);

        let dev = default_dockerfile(&analysis("python", "development"));
        assert_eq!(dev.base_image_category, BaseImageCategory::Official);
        assert_eq!(dev.optimization_priority, OptimizationPriority::Speed);
        assert!(dev.security_features.non_root_user);
        assert!(!dev.security_features.vulnerability_scanning);
        assert!(!dev.build_features.healthcheck);
    }

    #[test]
    fn test_kubernetes_defaults() {
        let dev = default_kubernetes(&analysis("node", "development"));
        assert_eq!(dev.replicas, 1);
        assert_eq!(dev.deployment_strategy, DeploymentStrategy::Recreate);
        assert!(!dev.feature_toggles.pod_disruption_budget);
        assert_eq!(dev.org_standards.image_pull_policy, ImagePullPolicy::IfNotPresent);

        let prod = default_kubernetes(&analysis("node", "production").with_traffic_level("high"));
        assert_eq!(prod.replicas, 5);
        assert_eq!(prod.deployment_strategy, DeploymentStrategy::RollingUpdate);
        assert!(prod.feature_toggles.horizontal_pod_autoscaler);
        assert!(prod.feature_toggles.pod_disruption_budget);
        assert_eq!(prod.org_standards.image_pull_policy, ImagePullPolicy::Always);
        assert_eq!(prod.org_standards.required_labels, vec!["app", "environment"]);
    }

    #[test]
    fn test_java_memory_doubles() {
        let java = resource_defaults(&analysis("java", "production"));
        assert_eq!(java.memory_request, "1Gi");
        assert_eq!(java.memory_limit, "2Gi");
        let go = resource_defaults(&analysis("go", "staging"));
        assert_eq!(go.cpu_request, "250m");
        assert_eq!(go.memory_limit, "512Mi");
    }
}
