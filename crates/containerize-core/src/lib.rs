//! Containerize Core
//!
//! Turns an [`Analysis`] into a [`GenerationPlan`]: a typed generation
//! config merged from organization policy and language/environment
//! defaults, plus recommendation lists with policy templates injected
//! ahead of generic advice.
//!
//! The pieces compose bottom-up:
//!
//! - [`resolver::resolve`] merges a policy answer over [`defaults`]
//! - [`templates::inject_templates`] prepends applicable policy snippets
//! - [`engine::GenerationEngine::plan`] runs one invocation end to end

pub mod analysis;
pub mod config;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod obs;
pub mod recommendation;
pub mod resolver;
pub mod schema;
pub mod telemetry;
pub mod templates;

pub use analysis::{Analysis, EnvironmentClass, GenerationTool};
pub use config::{
    BaseImageCategory, BuildFeatures, BuildStrategy, DeploymentStrategy, DockerfileConfig,
    FeatureToggles, FieldSource, GenerationConfig, ImagePullPolicy, K8sConfig,
    OptimizationPriority, OrgStandards, Provenance, ResolvedConfig, ResourceDefaults,
    SecurityFeatures,
};
pub use defaults::default_config;
pub use engine::{
    EngineConfig, EngineContext, GenerationEngine, GenerationPlan, DEFAULT_KNOWLEDGE_LIMIT,
    POLICY_DISABLED_ENV,
};
pub use error::{ContainerizeError, Result};
pub use recommendation::{config_recommendations, Recommendation, RecommendationSet};
pub use resolver::{resolve, resolve_answer, GENERATION_CONFIG_QUERY};
pub use templates::{
    fetch_templates, inject_templates, DockerfileSnippet, K8sSnippet, SnippetConditions,
    TemplateAdditions, TemplateSnippet, TEMPLATES_QUERY,
};

pub use metrics::METRICS;
pub use obs::invocation_span;
pub use telemetry::init_tracing;

/// Containerize version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
