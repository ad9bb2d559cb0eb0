//! Closed vocabularies shared with the rest of the system.

use serde::{Deserialize, Serialize};

/// Knowledge entry category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeCategory {
    Api,
    Architecture,
    Build,
    Caching,
    Configuration,
    Dockerfile,
    Features,
    Generic,
    Kubernetes,
    Optimization,
    Reliability,
    Resilience,
    Security,
    Streaming,
    Validation,
}

impl KnowledgeCategory {
    pub const ALL: [KnowledgeCategory; 15] = [
        Self::Api,
        Self::Architecture,
        Self::Build,
        Self::Caching,
        Self::Configuration,
        Self::Dockerfile,
        Self::Features,
        Self::Generic,
        Self::Kubernetes,
        Self::Optimization,
        Self::Reliability,
        Self::Resilience,
        Self::Security,
        Self::Streaming,
        Self::Validation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Architecture => "architecture",
            Self::Build => "build",
            Self::Caching => "caching",
            Self::Configuration => "configuration",
            Self::Dockerfile => "dockerfile",
            Self::Features => "features",
            Self::Generic => "generic",
            Self::Kubernetes => "kubernetes",
            Self::Optimization => "optimization",
            Self::Reliability => "reliability",
            Self::Resilience => "resilience",
            Self::Security => "security",
            Self::Streaming => "streaming",
            Self::Validation => "validation",
        }
    }
}

impl std::fmt::Display for KnowledgeCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for KnowledgeCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == needle)
            .ok_or_else(|| format!("unknown knowledge category '{s}'"))
    }
}

/// Severity of the issue a knowledge entry addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Ranking bonus applied when a signal matches.
    pub fn weight(self) -> f64 {
        match self {
            Self::Low => 1.0,
            Self::Medium => 2.0,
            Self::High => 3.0,
            Self::Critical => 4.0,
        }
    }
}
