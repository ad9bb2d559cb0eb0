//! Compilation of parsed modules into a single queryable [`PolicySet`].
//!
//! Sources are compiled in ascending priority. When two sources declare the
//! same package, the higher-priority source's package replaces the earlier
//! one wholesale; rules are never merged across sources.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde_json::Value;
use tracing::debug;

use crate::ast::{Module, Rule, RuleKind};
use crate::error::PolicyError;
use crate::eval::Evaluation;
use crate::parser::parse_module;
use crate::source::{PolicyLayer, PolicySource};
use crate::Result;

/// All definitions of one rule name inside a package.
#[derive(Debug, Clone)]
pub struct RuleGroup {
    pub kind: RuleKind,
    pub definitions: Vec<Rule>,
    pub default: Option<Value>,
}

/// A package as contributed by exactly one source.
#[derive(Debug, Clone)]
pub struct CompiledPackage {
    pub name: String,
    pub origin: PathBuf,
    pub layer: PolicyLayer,
    pub priority: u32,
    pub rules: BTreeMap<String, RuleGroup>,
}

/// Record of a package that a higher-priority source replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowedPackage {
    pub package: String,
    pub shadowed: PathBuf,
    pub by: PathBuf,
}

/// The compiled evaluation unit over every loaded source.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    packages: BTreeMap<String, CompiledPackage>,
    shadowed: Vec<ShadowedPackage>,
}

impl PolicySet {
    /// Read and compile policy files from disk.
    pub fn from_sources(sources: &[PolicySource]) -> Result<Self> {
        let mut texts = Vec::with_capacity(sources.len());
        for source in sources {
            let text = std::fs::read_to_string(&source.path).map_err(|e| PolicyError::Io {
                path: source.path.clone(),
                source: e,
            })?;
            texts.push((source.clone(), text));
        }
        Self::compile(texts)
    }

    /// Compile already-read policy text. Input order does not matter; the
    /// sources' explicit priority decides which package wins.
    pub fn compile(mut sources: Vec<(PolicySource, String)>) -> Result<Self> {
        sources.sort_by_key(|(source, _)| source.priority());

        let mut set = PolicySet::default();
        for (source, text) in &sources {
            let module = parse_module(text)
                .map_err(|e| PolicyError::compile(&source.path, e.line, e.message))?;
            let package = compile_module(source, module)?;

            if let Some(previous) = set.packages.get(&package.name) {
                debug!(
                    package = %package.name,
                    shadowed = %previous.origin.display(),
                    by = %package.origin.display(),
                    "package overridden by higher-priority source"
                );
                set.shadowed.push(ShadowedPackage {
                    package: package.name.clone(),
                    shadowed: previous.origin.clone(),
                    by: package.origin.clone(),
                });
            }
            set.packages.insert(package.name.clone(), package);
        }
        Ok(set)
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn packages(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(String::as_str)
    }

    pub fn package(&self, name: &str) -> Option<&CompiledPackage> {
        self.packages.get(name)
    }

    /// Rule names defined by `package`, sorted.
    pub fn rule_names(&self, package: &str) -> Vec<&str> {
        self.packages
            .get(package)
            .map(|p| p.rules.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn shadowed(&self) -> &[ShadowedPackage] {
        &self.shadowed
    }

    /// Evaluate `package.binding` against `input`.
    ///
    /// Returns `Ok(None)` when the package or binding is absent or when no
    /// rule applies to the input and there is no default.
    pub fn evaluate(&self, query: &str, input: &Value) -> Result<Option<Value>> {
        let (package, binding) = split_query(query)?;
        let Some(compiled) = self.packages.get(package) else {
            return Ok(None);
        };
        Evaluation::new(compiled, input)
            .rule(binding)
            .map_err(|message| PolicyError::Evaluation {
                query: query.to_string(),
                message,
            })
    }
}

/// Split `[data.]a.b.binding` into (`a.b`, `binding`).
pub fn split_query(query: &str) -> Result<(&str, &str)> {
    let trimmed = query.trim();
    let trimmed = trimmed.strip_prefix("data.").unwrap_or(trimmed);
    match trimmed.rsplit_once('.') {
        Some((package, binding)) if !package.is_empty() && !binding.is_empty() => {
            Ok((package, binding))
        }
        _ => Err(PolicyError::InvalidQuery(query.to_string())),
    }
}

fn compile_module(source: &PolicySource, module: Module) -> Result<CompiledPackage> {
    let compile_err = |line: usize, message: String| PolicyError::compile(&source.path, line, message);

    let mut rules: BTreeMap<String, RuleGroup> = BTreeMap::new();
    for rule in module.rules {
        match rules.get_mut(&rule.name) {
            Some(group) if group.kind != rule.kind => {
                return Err(compile_err(
                    rule.line,
                    format!(
                        "rule '{}' mixes ':=' and 'contains' definitions",
                        rule.name
                    ),
                ));
            }
            Some(group) => group.definitions.push(rule),
            None => {
                rules.insert(
                    rule.name.clone(),
                    RuleGroup {
                        kind: rule.kind,
                        definitions: vec![rule],
                        default: None,
                    },
                );
            }
        }
    }

    for default in module.defaults {
        let group = rules.entry(default.name.clone()).or_insert_with(|| RuleGroup {
            kind: RuleKind::Complete,
            definitions: Vec::new(),
            default: None,
        });
        if group.kind == RuleKind::Partial {
            return Err(compile_err(
                default.line,
                format!("partial set rule '{}' cannot have a default", default.name),
            ));
        }
        if group.default.is_some() {
            return Err(compile_err(
                default.line,
                format!("multiple defaults for rule '{}'", default.name),
            ));
        }
        group.default = Some(default.value);
    }

    let known: BTreeSet<&str> = rules.keys().map(String::as_str).collect();
    for group in rules.values() {
        for rule in &group.definitions {
            let mut refs = Vec::new();
            rule.value.rule_refs(&mut refs);
            rule.body.iter().for_each(|e| e.rule_refs(&mut refs));
            if let Some(missing) = refs.iter().find(|name| !known.contains(**name)) {
                return Err(compile_err(
                    rule.line,
                    format!("reference to undefined rule '{missing}'"),
                ));
            }
        }
    }

    Ok(CompiledPackage {
        name: module.package,
        origin: source.path.clone(),
        layer: source.layer,
        priority: source.priority(),
        rules,
    })
}
