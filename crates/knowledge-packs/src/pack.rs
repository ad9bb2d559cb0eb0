//! Knowledge pack parsing and validation.
//!
//! A pack is either a bare JSON array of entries or a manifest object
//! `{name, version, description, rules: [...]}`. Validation is all or
//! nothing: one bad entry rejects the whole pack.

use std::collections::HashSet;
use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::category::{KnowledgeCategory, Severity};
use crate::error::{KnowledgeError, KnowledgeResult};

/// Version recorded for packs that do not declare one.
pub const UNVERSIONED: &str = "0.0.0";

/// Origin prefix for packs compiled into the binary.
pub const BUILTIN_ORIGIN_PREFIX: &str = "builtin:";

/// A single pattern-to-recommendation mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub category: KnowledgeCategory,
    /// Case-insensitive regular expression matched against free text.
    pub pattern: String,
    pub recommendation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// An entry together with its compiled pattern.
#[derive(Debug, Clone)]
pub struct CompiledEntry {
    pub entry: KnowledgeEntry,
    pub regex: Regex,
}

/// Identity and fingerprint of an accepted pack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackInfo {
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Where the pack came from (file path or `builtin:<name>`).
    pub origin: String,
    pub entries: usize,
    /// SHA-256 of the raw pack text.
    pub digest: String,
}

/// A validated pack ready to be registered.
#[derive(Debug, Clone)]
pub struct KnowledgePack {
    pub info: PackInfo,
    pub entries: Vec<CompiledEntry>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PackDocument {
    Bare(Vec<Value>),
    Manifest {
        name: Option<String>,
        version: Option<String>,
        description: Option<String>,
        rules: Vec<Value>,
    },
}

/// Parse and validate one pack. `origin` names the pack in errors.
pub fn parse_pack(origin: &str, text: &str) -> KnowledgeResult<KnowledgePack> {
    let invalid = |pack: &str, reason: String| KnowledgeError::InvalidPack {
        pack: pack.to_string(),
        reason,
    };

    let document: PackDocument = serde_json::from_str(text).map_err(|e| {
        invalid(
            origin,
            format!("expected an array of entries or an object with 'rules': {e}"),
        )
    })?;

    let default_name = Path::new(origin.trim_start_matches(BUILTIN_ORIGIN_PREFIX))
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| origin.to_string());
    let (name, version, description, raw_entries) = match document {
        PackDocument::Bare(entries) => (default_name, None, None, entries),
        PackDocument::Manifest {
            name,
            version,
            description,
            rules,
        } => (name.unwrap_or(default_name), version, description, rules),
    };

    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(raw_entries.len());
    for (index, raw) in raw_entries.into_iter().enumerate() {
        let entry: KnowledgeEntry = serde_json::from_value(raw)
            .map_err(|e| invalid(&name, format!("entry #{index}: {e}")))?;
        let regex = validate_entry(&entry).map_err(|reason| {
            invalid(&name, format!("entry '{}' (#{index}): {reason}", entry.id))
        })?;
        if !seen.insert(entry.id.clone()) {
            return Err(KnowledgeError::DuplicateId {
                id: entry.id,
                pack: name.clone(),
                existing: name,
            });
        }
        entries.push(CompiledEntry { entry, regex });
    }

    let digest = hex::encode(Sha256::digest(text.as_bytes()));
    Ok(KnowledgePack {
        info: PackInfo {
            name,
            version: version.unwrap_or_else(|| UNVERSIONED.to_string()),
            description,
            origin: origin.to_string(),
            entries: entries.len(),
            digest,
        },
        entries,
    })
}

/// Read and parse every `*.json` pack directly inside `dir`, in file-name order.
pub fn load_pack_dir(dir: &Path) -> KnowledgeResult<Vec<KnowledgePack>> {
    let io = |e| KnowledgeError::Io {
        path: dir.to_path_buf(),
        source: e,
    };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io)? {
        let path = entry.map_err(io)?.path();
        if path.is_file() && path.extension().map(|e| e == "json").unwrap_or(false) {
            files.push(path);
        }
    }
    files.sort();

    files
        .iter()
        .map(|path| {
            let text = std::fs::read_to_string(path).map_err(|e| KnowledgeError::Io {
                path: path.clone(),
                source: e,
            })?;
            parse_pack(&path.to_string_lossy(), &text)
        })
        .collect()
}

fn validate_entry(entry: &KnowledgeEntry) -> Result<Regex, String> {
    if entry.id.trim().is_empty() {
        return Err("id must not be empty".to_string());
    }
    if entry.id.chars().any(char::is_whitespace) {
        return Err("id must not contain whitespace".to_string());
    }
    if entry.recommendation.trim().is_empty() {
        return Err("recommendation must not be empty".to_string());
    }
    if entry.pattern.trim().is_empty() {
        return Err("pattern must not be empty".to_string());
    }
    if entry.tags.iter().any(|t| t.trim().is_empty()) {
        return Err("tags must not be empty strings".to_string());
    }
    let regex = RegexBuilder::new(&entry.pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| format!("invalid pattern: {e}"))?;
    // zero-width matches would hit every signal
    if regex.is_match("") {
        return Err("invalid pattern: matches the empty string".to_string());
    }
    Ok(regex)
}
