//! Engine wiring: configuration, the process-wide context and the
//! per-invocation plan.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use knowledge_packs::{
    KnowledgeBase, KnowledgeCategory, KnowledgeConfig, KnowledgeIndex, KnowledgeMatch, MatchQuery,
    KNOWLEDGE_BASE,
};
use policy_engine::{
    discover, DiscoveryCache, DiscoveryOptions, PolicyEngine, PolicySource, RegoEvaluator,
    CUSTOM_POLICY_ENV, DISCOVERY_CACHE,
};
use serde::Serialize;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Instrument};
use uuid::Uuid;

use crate::analysis::Analysis;
use crate::config::{GenerationConfig, Provenance, ResolvedConfig};
use crate::error::{ContainerizeError, Result};
use crate::metrics::METRICS;
use crate::obs;
use crate::recommendation::{config_recommendations, Recommendation, RecommendationSet};
use crate::resolver::resolve;
use crate::templates::{fetch_templates, inject_templates, TemplateAdditions};

/// Env var that switches policy off entirely (`1`, `true`, `yes`).
pub const POLICY_DISABLED_ENV: &str = "CONTAINERIZE_POLICY_DISABLED";

/// Knowledge matches kept per category in a plan.
pub const DEFAULT_KNOWLEDGE_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Where upward policy discovery starts.
    pub working_dir: PathBuf,
    pub custom_policy_path: Option<PathBuf>,
    pub policy_disabled: bool,
    pub discovery: DiscoveryOptions,
    pub knowledge: KnowledgeConfig,
    pub knowledge_limit: usize,
}

impl EngineConfig {
    /// Config rooted at `working_dir` with nothing read from the environment.
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            custom_policy_path: None,
            policy_disabled: false,
            discovery: DiscoveryOptions::default(),
            knowledge: KnowledgeConfig::default(),
            knowledge_limit: DEFAULT_KNOWLEDGE_LIMIT,
        }
    }

    /// Process working directory plus `CONTAINERIZE_CUSTOM_POLICY_PATH`,
    /// `CONTAINERIZE_POLICY_DISABLED` and `CONTAINERIZE_KNOWLEDGE_DIR`.
    pub fn from_env() -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| ContainerizeError::Config(format!("cannot read working directory: {e}")))?;
        let custom = std::env::var_os(CUSTOM_POLICY_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let disabled = std::env::var(POLICY_DISABLED_ENV)
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let mut config = Self::new(cwd);
        config.custom_policy_path = custom;
        config.policy_disabled = disabled;
        config.knowledge = KnowledgeConfig::from_env();
        Ok(config)
    }

    pub fn with_custom_policy_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.custom_policy_path = Some(path.into());
        self
    }

    pub fn with_knowledge(mut self, knowledge: KnowledgeConfig) -> Self {
        self.knowledge = knowledge;
        self
    }

    pub fn with_knowledge_limit(mut self, limit: usize) -> Self {
        self.knowledge_limit = limit;
        self
    }

    pub fn without_policy(mut self) -> Self {
        self.policy_disabled = true;
        self
    }

    fn discover(&self) -> Vec<PolicySource> {
        if self.policy_disabled {
            debug!("policy disabled; skipping discovery");
            return Vec::new();
        }
        discover(
            &self.working_dir,
            self.custom_policy_path.as_deref(),
            &self.discovery,
        )
    }
}

/// Everything an invocation reads: discovered sources, the compiled
/// evaluator and the knowledge index. Built once, read-only afterwards.
pub struct EngineContext {
    config: EngineConfig,
    sources: Arc<Vec<PolicySource>>,
    evaluator: Option<RegoEvaluator>,
    knowledge: Arc<KnowledgeIndex>,
}

static GLOBAL_CONTEXT: OnceCell<Arc<EngineContext>> = OnceCell::const_new();

impl EngineContext {
    /// Isolated context: fresh discovery and a private knowledge index.
    pub async fn open(config: EngineConfig) -> Result<Self> {
        let discover_config = config.clone();
        let sources = blocking(move || Ok(Arc::new(discover_config.discover()))).await?;
        let knowledge_config = config.knowledge.clone();
        let knowledge = blocking(move || {
            let index = KnowledgeIndex::build(knowledge_config.read_packs()?)?;
            Ok(Arc::new(index))
        })
        .await?;
        Self::assemble(config, sources, knowledge).await
    }

    /// Context backed by process-wide owners: discovery runs at most once
    /// per `cache` and knowledge loads at most once per `knowledge_base`.
    pub async fn open_shared(
        config: EngineConfig,
        cache: &'static DiscoveryCache,
        knowledge_base: &'static KnowledgeBase,
    ) -> Result<Self> {
        let discover_config = config.clone();
        let sources =
            blocking(move || Ok(cache.get_or_discover(|| discover_config.discover()))).await?;
        let knowledge_config = config.knowledge.clone();
        let knowledge = blocking(move || Ok(knowledge_base.load_with(&knowledge_config)?)).await?;
        Self::assemble(config, sources, knowledge).await
    }

    /// The process-wide context, opened from the environment on first use.
    pub async fn global() -> Result<Arc<EngineContext>> {
        GLOBAL_CONTEXT
            .get_or_try_init(|| async {
                let config = EngineConfig::from_env()?;
                Self::open_shared(config, &DISCOVERY_CACHE, &KNOWLEDGE_BASE)
                    .await
                    .map(Arc::new)
            })
            .await
            .map(Arc::clone)
    }

    async fn assemble(
        config: EngineConfig,
        sources: Arc<Vec<PolicySource>>,
        knowledge: Arc<KnowledgeIndex>,
    ) -> Result<Self> {
        let evaluator = if config.policy_disabled || sources.is_empty() {
            None
        } else {
            Some(RegoEvaluator::load_async(sources.to_vec()).await?)
        };
        info!(
            event = "engine.opened",
            working_dir = %config.working_dir.display(),
            sources = sources.len(),
            policy = evaluator.is_some(),
            knowledge_entries = knowledge.len(),
        );
        Ok(Self {
            config,
            sources,
            evaluator,
            knowledge,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sources(&self) -> &[PolicySource] {
        &self.sources
    }

    /// The policy seam, or `None` in pure-default mode.
    pub fn policy(&self) -> Option<&dyn PolicyEngine> {
        self.evaluator
            .as_ref()
            .filter(|e| !e.is_closed())
            .map(|e| e as &dyn PolicyEngine)
    }

    pub fn evaluator(&self) -> Option<&RegoEvaluator> {
        self.evaluator.as_ref()
    }

    pub fn knowledge(&self) -> &KnowledgeIndex {
        &self.knowledge
    }

    /// Release the evaluator early. Later plans run in default mode.
    pub fn close(&self) {
        if let Some(evaluator) = &self.evaluator {
            evaluator.close();
        }
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ContainerizeError::Task(e.to_string()))?
}

/// Everything handed to the downstream generator for one invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationPlan {
    pub invocation_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub analysis: Analysis,
    pub config: GenerationConfig,
    pub provenance: Provenance,
    #[serde(flatten)]
    pub recommendations: RecommendationSet,
    pub policy_sources: Vec<PathBuf>,
}

impl GenerationPlan {
    pub fn policy_driven(&self) -> impl Iterator<Item = &Recommendation> {
        self.recommendations.iter().filter(|r| r.policy_driven)
    }
}

/// Runs invocations against a shared [`EngineContext`].
#[derive(Clone)]
pub struct GenerationEngine {
    context: Arc<EngineContext>,
}

impl GenerationEngine {
    pub fn new(context: Arc<EngineContext>) -> Self {
        Self { context }
    }

    /// Engine over the process-wide context.
    pub async fn from_env() -> Result<Self> {
        Ok(Self::new(EngineContext::global().await?))
    }

    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    pub async fn resolve_config(&self, analysis: &Analysis) -> ResolvedConfig {
        resolve(analysis, self.context.policy()).await
    }

    pub async fn templates(&self, analysis: &Analysis) -> TemplateAdditions {
        match self.context.policy() {
            Some(engine) => fetch_templates(engine, analysis).await,
            None => TemplateAdditions::default(),
        }
    }

    pub fn match_knowledge(&self, query: &MatchQuery) -> Vec<KnowledgeMatch> {
        let matches = self.context.knowledge().matches(query);
        METRICS.add_knowledge_matches(matches.len() as u64);
        obs::emit_knowledge_matched(query.category.as_str(), matches.len());
        matches
    }

    /// Resolve, match knowledge and inject templates for one invocation.
    ///
    /// The config query and the template query run concurrently against
    /// the same evaluator.
    pub async fn plan(&self, analysis: &Analysis, signal: Option<&str>) -> GenerationPlan {
        self.plan_with_id(Uuid::new_v4(), analysis, signal).await
    }

    /// [`plan`](Self::plan) that gives up when `cancel` fires. Nothing
    /// partial is returned on cancellation.
    pub async fn plan_cancellable(
        &self,
        analysis: &Analysis,
        signal: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<GenerationPlan> {
        let invocation_id = Uuid::new_v4();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(invocation_id = %invocation_id, "plan cancelled");
                Err(ContainerizeError::Cancelled(invocation_id))
            }
            plan = self.plan_with_id(invocation_id, analysis, signal) => Ok(plan),
        }
    }

    async fn plan_with_id(
        &self,
        invocation_id: Uuid,
        analysis: &Analysis,
        signal: Option<&str>,
    ) -> GenerationPlan {
        let started = Instant::now();
        let span = obs::invocation_span(invocation_id, analysis);

        async move {
            let (resolved, additions) =
                tokio::join!(self.resolve_config(analysis), self.templates(analysis));

            let mut recommendations = config_recommendations(&resolved);
            recommendations.extend(self.knowledge_recommendations(analysis, signal));
            let recommendations = inject_templates(recommendations, &additions, analysis);

            let plan = GenerationPlan {
                invocation_id,
                generated_at: Utc::now(),
                analysis: analysis.clone(),
                config: resolved.config,
                provenance: resolved.provenance,
                recommendations,
                policy_sources: self.context.sources().iter().map(|s| s.path.clone()).collect(),
            };
            obs::emit_plan_finished(
                invocation_id,
                started.elapsed().as_millis() as u64,
                plan.recommendations.len(),
            );
            plan
        }
        .instrument(span)
        .await
    }

    fn knowledge_recommendations(
        &self,
        analysis: &Analysis,
        signal: Option<&str>,
    ) -> RecommendationSet {
        let collect = |categories: &[KnowledgeCategory]| -> Vec<Recommendation> {
            categories
                .iter()
                .flat_map(|category| self.match_knowledge(&self.query(*category, analysis, signal)))
                .map(Recommendation::from)
                .collect()
        };

        let best_practice_categories: &[KnowledgeCategory] = if analysis.tool.targets_kubernetes() {
            &[KnowledgeCategory::Kubernetes, KnowledgeCategory::Configuration]
        } else {
            &[KnowledgeCategory::Dockerfile, KnowledgeCategory::Build]
        };

        RecommendationSet {
            security_considerations: collect(&[KnowledgeCategory::Security]),
            best_practices: collect(best_practice_categories),
            resource_management: if signal.is_some() {
                collect(&[KnowledgeCategory::Optimization, KnowledgeCategory::Reliability])
            } else {
                Vec::new()
            },
        }
    }

    fn query(
        &self,
        category: KnowledgeCategory,
        analysis: &Analysis,
        signal: Option<&str>,
    ) -> MatchQuery {
        let mut query = MatchQuery::new(category)
            .with_language(analysis.language.clone())
            .with_limit(self.context.config().knowledge_limit);
        if let Some(framework) = &analysis.framework {
            query = query.with_framework(framework.clone());
        }
        if let Some(signal) = signal {
            query = query.with_signal(signal);
        }
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::GenerationTool;
    use crate::config::FieldSource;

    fn empty_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[tokio::test]
    async fn test_open_without_policy_is_default_mode() {
        let dir = empty_dir();
        let ctx = EngineContext::open(EngineConfig::new(dir.path())).await.unwrap();
        assert!(ctx.sources().is_empty());
        assert!(ctx.policy().is_none());
        assert!(!ctx.knowledge().is_empty());
    }

    #[tokio::test]
    async fn test_plan_shape_in_default_mode() {
        let dir = empty_dir();
        let ctx = EngineContext::open(EngineConfig::new(dir.path())).await.unwrap();
        let engine = GenerationEngine::new(Arc::new(ctx));
        let analysis = Analysis::new("python", "production", GenerationTool::GenerateDockerfile).unwrap();

        let plan = engine.plan(&analysis, None).await;
        assert_eq!(plan.policy_driven().count(), 0);
        assert!(!plan.recommendations.security_considerations.is_empty());
        assert!(!plan.recommendations.best_practices.is_empty());
        assert_eq!(plan.provenance.source("dockerfile.buildStrategy"), FieldSource::Default);

        let wire = serde_json::to_value(&plan).unwrap();
        for key in ["securityConsiderations", "bestPractices", "resourceManagement", "config", "invocationId"] {
            assert!(wire.get(key).is_some(), "missing {key}");
        }
    }

    #[tokio::test]
    async fn test_knowledge_limit_applies_per_category() {
        let dir = empty_dir();
        let config = EngineConfig::new(dir.path()).with_knowledge_limit(1);
        let engine = GenerationEngine::new(Arc::new(EngineContext::open(config).await.unwrap()));
        let analysis = Analysis::new("go", "development", GenerationTool::GenerateK8sManifests).unwrap();
        let set = engine.knowledge_recommendations(&analysis, None);
        assert_eq!(set.security_considerations.len(), 1);
        assert_eq!(set.best_practices.len(), 2);
        assert!(set.resource_management.is_empty());
    }

    #[tokio::test]
    async fn test_language_tagged_knowledge_ranks_above_baseline_without_signal() {
        use knowledge_packs::matcher::{BASELINE_WEIGHT, LANGUAGE_BOOST};

        let dir = empty_dir();
        let engine = GenerationEngine::new(Arc::new(
            EngineContext::open(EngineConfig::new(dir.path())).await.unwrap(),
        ));
        let analysis = Analysis::new("java", "development", GenerationTool::GenerateDockerfile).unwrap();
        let set = engine.knowledge_recommendations(&analysis, None);
        let build: Vec<_> = set
            .best_practices
            .iter()
            .filter(|r| r.category == "build")
            .collect();
        assert_eq!(build[0].id, "build-multi-stage");
        assert_eq!(build[0].match_score, BASELINE_WEIGHT + LANGUAGE_BOOST);
        assert!(build[1..].iter().all(|r| r.match_score == BASELINE_WEIGHT));
    }

    #[tokio::test]
    async fn test_cancelled_plan_returns_error() {
        let dir = empty_dir();
        let engine = GenerationEngine::new(Arc::new(
            EngineContext::open(EngineConfig::new(dir.path())).await.unwrap(),
        ));
        let analysis = Analysis::new("go", "staging", GenerationTool::GenerateDockerfile).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let err = engine.plan_cancellable(&analysis, None, &token).await.unwrap_err();
        assert!(matches!(err, ContainerizeError::Cancelled(_)));
    }
}
