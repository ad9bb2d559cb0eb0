//! Containerize CLI
//!
//! The `containerize` command inspects the policy and knowledge that shape
//! Dockerfile and Kubernetes generation.
//!
//! ## Commands
//!
//! - `policy discover`: List discovered policy files in override order
//! - `policy query`: Evaluate a raw `package.binding` query
//! - `config resolve`: Show the merged generation config and field provenance
//! - `plan`: Emit the full generation plan handed to the generator
//! - `knowledge packs` / `knowledge match`: Inspect the knowledge base

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use containerize_core::{
    Analysis, EngineConfig, EngineContext, GenerationEngine, GenerationTool, ResolvedConfig,
    DEFAULT_KNOWLEDGE_LIMIT, METRICS,
};
use knowledge_packs::{KnowledgeCategory, KnowledgeConfig, MatchQuery, KNOWLEDGE_BASE};
use policy_engine::{PolicySource, CUSTOM_POLICY_ENV, DISCOVERY_CACHE};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;

#[derive(Parser)]
#[command(name = "containerize")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Policy-driven container generation config", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Output format for command results
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Directory where upward policy discovery starts (default: current directory)
    #[arg(short = 'C', long, global = true)]
    dir: Option<PathBuf>,

    /// Custom policy file or directory, highest override priority
    #[arg(long, global = true, env = CUSTOM_POLICY_ENV)]
    custom_policy: Option<PathBuf>,

    /// Skip policy entirely and use built-in defaults
    #[arg(long, global = true)]
    no_policy: bool,

    /// Extra knowledge pack directory
    #[arg(long, global = true)]
    knowledge_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect organization policy
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },

    /// Inspect the resolved generation config
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Build the generation plan for one analysis
    Plan {
        #[command(flatten)]
        analysis: AnalysisArgs,

        /// Free-text signal (e.g. Dockerfile content) for knowledge matching
        #[arg(long)]
        signal: Option<String>,

        /// Read the signal from a file instead
        #[arg(long, conflicts_with = "signal")]
        signal_file: Option<PathBuf>,
    },

    /// Inspect the knowledge base
    Knowledge {
        #[command(subcommand)]
        action: KnowledgeAction,
    },
}

#[derive(Subcommand)]
enum PolicyAction {
    /// List discovered policy files, lowest priority first
    Discover,

    /// Evaluate a `package.binding` query against an analysis
    Query {
        /// Query path, e.g. containerization.generation_config.config
        query: String,

        #[command(flatten)]
        analysis: AnalysisArgs,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Merge policy over defaults and print each field's source
    Resolve {
        #[command(flatten)]
        analysis: AnalysisArgs,
    },
}

#[derive(Subcommand)]
enum KnowledgeAction {
    /// List loaded knowledge packs
    Packs,

    /// Rank entries of one category against a signal
    Match {
        /// Knowledge category (e.g. security, dockerfile, kubernetes)
        category: KnowledgeCategory,

        /// Free-text signal to match entry patterns against
        #[arg(long)]
        signal: Option<String>,

        /// Boost entries tagged with this language
        #[arg(long)]
        language: Option<String>,

        /// Boost entries tagged with this framework
        #[arg(long)]
        framework: Option<String>,

        /// Maximum number of matches
        #[arg(short, long, default_value_t = DEFAULT_KNOWLEDGE_LIMIT)]
        limit: usize,
    },
}

#[derive(Args, Debug, Clone)]
struct AnalysisArgs {
    /// Primary language of the repository
    #[arg(short, long)]
    language: String,

    /// Target environment (development, staging, production, ...)
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Detected framework
    #[arg(short, long)]
    framework: Option<String>,

    /// Traffic level (low, medium, high)
    #[arg(long)]
    traffic_level: Option<String>,

    /// Criticality tier (e.g. tier-1, critical)
    #[arg(long)]
    criticality_tier: Option<String>,

    /// Generation tool the config is for
    #[arg(short, long, default_value = "generate-dockerfile")]
    tool: GenerationTool,
}

impl AnalysisArgs {
    fn to_analysis(&self) -> Result<Analysis> {
        let mut analysis = Analysis::new(&self.language, &self.environment, self.tool)?;
        if let Some(framework) = &self.framework {
            analysis = analysis.with_framework(framework);
        }
        if let Some(level) = &self.traffic_level {
            analysis = analysis.with_traffic_level(level);
        }
        if let Some(tier) = &self.criticality_tier {
            analysis = analysis.with_criticality_tier(tier);
        }
        Ok(analysis)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    containerize_core::init_tracing(cli.json, level);

    let engine = open_engine(&cli).await?;
    let format = cli.format;

    let result = match cli.command {
        Commands::Policy { action } => match action {
            PolicyAction::Discover => cmd_policy_discover(&engine, format),
            PolicyAction::Query { query, analysis } => {
                cmd_policy_query(&engine, &query, &analysis.to_analysis()?, format).await
            }
        },
        Commands::Config { action } => match action {
            ConfigAction::Resolve { analysis } => {
                cmd_config_resolve(&engine, &analysis.to_analysis()?, format).await
            }
        },
        Commands::Plan {
            analysis,
            signal,
            signal_file,
        } => {
            let signal = match signal_file {
                Some(path) => Some(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read signal file {:?}", path))?,
                ),
                None => signal,
            };
            cmd_plan(&engine, &analysis.to_analysis()?, signal.as_deref()).await
        }
        Commands::Knowledge { action } => match action {
            KnowledgeAction::Packs => cmd_knowledge_packs(&engine, format),
            KnowledgeAction::Match {
                category,
                signal,
                language,
                framework,
                limit,
            } => {
                let mut query = MatchQuery::new(category).with_limit(limit);
                if let Some(signal) = signal {
                    query = query.with_signal(signal);
                }
                if let Some(language) = language {
                    query = query.with_language(language);
                }
                if let Some(framework) = framework {
                    query = query.with_framework(framework);
                }
                cmd_knowledge_match(&engine, &query, format)
            }
        },
    };

    engine.context().close();
    METRICS.flush();
    result
}

fn has_overrides(cli: &Cli) -> bool {
    cli.dir.is_some() || cli.custom_policy.is_some() || cli.knowledge_dir.is_some() || cli.no_policy
}

fn engine_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = EngineConfig::from_env().context("Failed to read engine configuration")?;
    if let Some(dir) = &cli.dir {
        config.working_dir = dir.clone();
    }
    if let Some(custom) = &cli.custom_policy {
        config = config.with_custom_policy_path(custom);
    }
    if let Some(dir) = &cli.knowledge_dir {
        config = config.with_knowledge(KnowledgeConfig::default().with_extra_dir(dir));
    }
    if cli.no_policy {
        config = config.without_policy();
    }
    Ok(config)
}

/// Without overrides the process-wide context from the environment is used.
async fn open_engine(cli: &Cli) -> Result<GenerationEngine> {
    if !has_overrides(cli) {
        return GenerationEngine::from_env()
            .await
            .context("Failed to open policy and knowledge");
    }
    let config = engine_config(cli)?;
    let context = EngineContext::open_shared(config, &DISCOVERY_CACHE, &KNOWLEDGE_BASE)
        .await
        .context("Failed to open policy and knowledge")?;
    Ok(GenerationEngine::new(Arc::new(context)))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ── Policy ──────────────────────────────────────────────────────────────

fn cmd_policy_discover(engine: &GenerationEngine, format: OutputFormat) -> Result<()> {
    let sources = engine.context().sources();
    match format {
        OutputFormat::Json => print_json(&sources),
        OutputFormat::Text => {
            if sources.is_empty() {
                println!("No policy files found; generation uses built-in defaults");
                return Ok(());
            }
            for line in render_sources(sources) {
                println!("{line}");
            }
            Ok(())
        }
    }
}

fn render_sources(sources: &[PolicySource]) -> Vec<String> {
    sources
        .iter()
        .map(|s| format!("{:<8} {:>6}  {}", s.layer, s.priority(), s.path.display()))
        .collect()
}

async fn cmd_policy_query(
    engine: &GenerationEngine,
    query: &str,
    analysis: &Analysis,
    format: OutputFormat,
) -> Result<()> {
    let Some(policy) = engine.context().policy() else {
        println!("No policy loaded");
        return Ok(());
    };
    let answer = policy
        .query_value(query, &analysis.policy_input())
        .await
        .with_context(|| format!("Query '{}' failed", query))?;
    match (answer, format) {
        (Some(value), _) => print_json(&value),
        (None, OutputFormat::Json) => print_json(&serde_json::Value::Null),
        (None, OutputFormat::Text) => {
            println!("undefined");
            Ok(())
        }
    }
}

// ── Config ──────────────────────────────────────────────────────────────

async fn cmd_config_resolve(
    engine: &GenerationEngine,
    analysis: &Analysis,
    format: OutputFormat,
) -> Result<()> {
    let resolved = engine.resolve_config(analysis).await;
    match format {
        OutputFormat::Json => print_json(&resolved),
        OutputFormat::Text => {
            for line in render_provenance(&resolved) {
                println!("{line}");
            }
            Ok(())
        }
    }
}

fn render_provenance(resolved: &ResolvedConfig) -> Vec<String> {
    let values = serde_json::to_value(&resolved.config).unwrap_or_default();
    resolved
        .provenance
        .iter()
        .map(|(path, source)| {
            let pointer = format!("/{}", path.replace('.', "/"));
            let value = values
                .pointer(&pointer)
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".to_string());
            format!("{:<48} {:<32} {}", path, value, source.reason())
        })
        .collect()
}

// ── Plan ────────────────────────────────────────────────────────────────

async fn cmd_plan(engine: &GenerationEngine, analysis: &Analysis, signal: Option<&str>) -> Result<()> {
    let plan = engine.plan(analysis, signal).await;
    print_json(&plan)
}

// ── Knowledge ───────────────────────────────────────────────────────────

fn cmd_knowledge_packs(engine: &GenerationEngine, format: OutputFormat) -> Result<()> {
    let index = engine.context().knowledge();
    match format {
        OutputFormat::Json => print_json(&index.packs()),
        OutputFormat::Text => {
            for pack in index.packs() {
                println!(
                    "{:<16} {:<8} {:>3} entries  {}  {}",
                    pack.name,
                    pack.version,
                    pack.entries,
                    &pack.digest[..12.min(pack.digest.len())],
                    pack.origin
                );
            }
            println!("Total: {} entries", index.len());
            Ok(())
        }
    }
}

fn cmd_knowledge_match(
    engine: &GenerationEngine,
    query: &MatchQuery,
    format: OutputFormat,
) -> Result<()> {
    let matches = engine.match_knowledge(query);
    match format {
        OutputFormat::Json => print_json(&matches),
        OutputFormat::Text => {
            if matches.is_empty() {
                println!("No matches");
            }
            for m in matches {
                println!("{:>6.1}  {:<36} {}", m.weight, m.entry.id, m.entry.recommendation);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use containerize_core::FieldSource;
    use policy_engine::{PolicyLayer, BUILTIN_DIR_NAME};

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("containerize").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_analysis_args_build_analysis() {
        let cli = parse(&[
            "config",
            "resolve",
            "--language",
            "Java",
            "--environment",
            "production",
            "--framework",
            "spring-boot",
            "--tool",
            "generate-k8s-manifests",
        ]);
        let Commands::Config {
            action: ConfigAction::Resolve { analysis },
        } = cli.command
        else {
            panic!("expected config resolve");
        };
        let analysis = analysis.to_analysis().unwrap();
        assert_eq!(analysis.language, "java");
        assert_eq!(analysis.framework.as_deref(), Some("spring-boot"));
        assert_eq!(analysis.tool, GenerationTool::GenerateK8sManifests);
    }

    #[test]
    fn test_unknown_tool_and_category_rejected() {
        let args = ["containerize", "plan", "--language", "go", "--tool", "helm"];
        assert!(Cli::try_parse_from(args).is_err());
        let args = ["containerize", "knowledge", "match", "astrology"];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_global_flags_shape_engine_config() {
        let cli = parse(&[
            "--no-policy",
            "-C",
            "/srv/app",
            "--format",
            "json",
            "policy",
            "discover",
        ]);
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(has_overrides(&cli));
        assert!(!has_overrides(&parse(&["policy", "discover"])));
        let config = engine_config(&cli).unwrap();
        assert!(config.policy_disabled);
        assert_eq!(config.working_dir, PathBuf::from("/srv/app"));
    }

    #[test]
    fn test_render_sources_lists_layer_and_path() {
        let sources = vec![
            PolicySource::new("/repo/policies/a.rego", PolicyLayer::Builtin, 0),
            PolicySource::new("/org/custom.rego", PolicyLayer::Custom, 0),
        ];
        let lines = render_sources(&sources);
        assert!(lines[0].starts_with("builtin"));
        assert!(lines[0].ends_with("/repo/policies/a.rego"));
        assert!(lines[1].starts_with("custom"));
    }

    #[tokio::test]
    async fn test_render_provenance_marks_policy_fields() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join(BUILTIN_DIR_NAME);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("replicas.rego"),
            "package containerization.generation_config\nconfig := {\"kubernetes\": {\"replicas\": 3}}\n",
        )
        .unwrap();

        let context = EngineContext::open(EngineConfig::new(root.path())).await.unwrap();
        let engine = GenerationEngine::new(Arc::new(context));
        let analysis = Analysis::new("go", "development", GenerationTool::GenerateK8sManifests).unwrap();
        let resolved = engine.resolve_config(&analysis).await;
        assert_eq!(resolved.source("kubernetes.replicas"), FieldSource::Policy);

        let lines = render_provenance(&resolved);
        let replicas = lines
            .iter()
            .find(|l| l.starts_with("kubernetes.replicas "))
            .unwrap();
        assert!(replicas.contains(" 3 "));
        assert!(replicas.ends_with("policy-driven"));
        let strategy = lines
            .iter()
            .find(|l| l.starts_with("kubernetes.deploymentStrategy"))
            .unwrap();
        assert!(strategy.contains("\"Recreate\""));
        assert!(strategy.ends_with("default"));
    }
}
