//! The per-invocation input: what is being containerized, and for whom.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ContainerizeError, Result};

/// Which generation tool is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GenerationTool {
    GenerateDockerfile,
    FixDockerfile,
    GenerateK8sManifests,
}

impl GenerationTool {
    pub const ALL: [GenerationTool; 3] = [
        GenerationTool::GenerateDockerfile,
        GenerationTool::FixDockerfile,
        GenerationTool::GenerateK8sManifests,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            GenerationTool::GenerateDockerfile => "generate-dockerfile",
            GenerationTool::FixDockerfile => "fix-dockerfile",
            GenerationTool::GenerateK8sManifests => "generate-k8s-manifests",
        }
    }

    pub fn targets_kubernetes(self) -> bool {
        matches!(self, GenerationTool::GenerateK8sManifests)
    }
}

impl std::fmt::Display for GenerationTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GenerationTool {
    type Err = ContainerizeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ContainerizeError::InvalidAnalysis(format!("unknown tool '{s}'")))
    }
}

/// Coarse environment class used by the default heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentClass {
    Development,
    Staging,
    Production,
}

/// Immutable description of the target. Serialized camelCase as the
/// policy input document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    pub environment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criticality_tier: Option<String>,
    pub tool: GenerationTool,
}

impl Analysis {
    /// Values are trimmed and lower-cased. Empty language or environment
    /// is rejected.
    pub fn new(language: &str, environment: &str, tool: GenerationTool) -> Result<Self> {
        let language = normalize(language);
        let environment = normalize(environment);
        if language.is_empty() {
            return Err(ContainerizeError::InvalidAnalysis(
                "language must not be empty".to_string(),
            ));
        }
        if environment.is_empty() {
            return Err(ContainerizeError::InvalidAnalysis(
                "environment must not be empty".to_string(),
            ));
        }
        Ok(Self {
            language,
            framework: None,
            environment,
            traffic_level: None,
            criticality_tier: None,
            tool,
        })
    }

    pub fn with_framework(mut self, framework: &str) -> Self {
        self.framework = Some(normalize(framework)).filter(|f| !f.is_empty());
        self
    }

    pub fn with_traffic_level(mut self, level: &str) -> Self {
        self.traffic_level = Some(normalize(level)).filter(|l| !l.is_empty());
        self
    }

    pub fn with_criticality_tier(mut self, tier: &str) -> Self {
        self.criticality_tier = Some(normalize(tier)).filter(|t| !t.is_empty());
        self
    }

    /// Unrecognized environments get development defaults.
    pub fn environment_class(&self) -> EnvironmentClass {
        match self.environment.as_str() {
            "production" | "prod" => EnvironmentClass::Production,
            "staging" | "stage" | "preprod" => EnvironmentClass::Staging,
            _ => EnvironmentClass::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment_class() == EnvironmentClass::Production
    }

    pub fn is_high_traffic(&self) -> bool {
        self.traffic_level.as_deref() == Some("high")
    }

    pub fn is_critical(&self) -> bool {
        matches!(self.criticality_tier.as_deref(), Some("tier-1" | "critical"))
    }

    /// The policy input document.
    pub fn policy_input(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}
