//! The knowledge store: an immutable index of accepted packs behind a
//! process-wide, load-once owner.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::builtin::builtin_packs;
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::pack::{load_pack_dir, CompiledEntry, KnowledgeEntry, KnowledgePack, PackInfo};

/// Env var naming an extra directory of `*.json` packs.
pub const KNOWLEDGE_DIR_ENV: &str = "CONTAINERIZE_KNOWLEDGE_DIR";

/// Where knowledge comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeConfig {
    pub include_builtin: bool,
    pub extra_dir: Option<PathBuf>,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            include_builtin: true,
            extra_dir: None,
        }
    }
}

impl KnowledgeConfig {
    /// Builtin packs plus `CONTAINERIZE_KNOWLEDGE_DIR` when set and non-empty.
    pub fn from_env() -> Self {
        let extra_dir = std::env::var(KNOWLEDGE_DIR_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        Self {
            include_builtin: true,
            extra_dir,
        }
    }

    pub fn with_extra_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.extra_dir = Some(dir.into());
        self
    }

    pub fn without_builtin(mut self) -> Self {
        self.include_builtin = false;
        self
    }

    /// Read every configured pack. Any failure fails the whole read.
    pub fn read_packs(&self) -> KnowledgeResult<Vec<KnowledgePack>> {
        let mut packs = if self.include_builtin {
            builtin_packs()?
        } else {
            Vec::new()
        };
        if let Some(dir) = &self.extra_dir {
            packs.extend(read_extra_dir(dir)?);
        }
        Ok(packs)
    }
}

fn read_extra_dir(dir: &Path) -> KnowledgeResult<Vec<KnowledgePack>> {
    if !dir.exists() {
        return Err(KnowledgeError::Io {
            path: dir.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "knowledge directory does not exist",
            ),
        });
    }
    load_pack_dir(dir)
}

/// Immutable, validated view over every accepted entry.
///
/// Entries keep registration order (pack order, then order inside the
/// pack); matching relies on it for tie-breaking.
#[derive(Debug, Clone)]
pub struct KnowledgeIndex {
    packs: Vec<PackInfo>,
    entries: Vec<CompiledEntry>,
    owners: HashMap<String, String>,
    loaded_at: DateTime<Utc>,
}

impl KnowledgeIndex {
    pub fn empty() -> Self {
        Self {
            packs: Vec::new(),
            entries: Vec::new(),
            owners: HashMap::new(),
            loaded_at: Utc::now(),
        }
    }

    /// Index `packs`, enforcing id uniqueness across all of them.
    pub fn build(packs: Vec<KnowledgePack>) -> KnowledgeResult<Self> {
        Self::empty().extend(packs)
    }

    /// A new index with `packs` added. `self` is untouched on error.
    pub fn extend(&self, packs: Vec<KnowledgePack>) -> KnowledgeResult<Self> {
        let mut next = self.clone();
        for pack in packs {
            for compiled in &pack.entries {
                if let Some(existing) = next.owners.get(&compiled.entry.id) {
                    return Err(KnowledgeError::DuplicateId {
                        id: compiled.entry.id.clone(),
                        pack: pack.info.name.clone(),
                        existing: existing.clone(),
                    });
                }
                next.owners
                    .insert(compiled.entry.id.clone(), pack.info.name.clone());
            }
            debug!(
                pack = %pack.info.name,
                version = %pack.info.version,
                entries = pack.info.entries,
                digest = %pack.info.digest,
                "knowledge pack accepted"
            );
            next.entries.extend(pack.entries);
            next.packs.push(pack.info);
        }
        next.loaded_at = Utc::now();
        Ok(next)
    }

    pub fn packs(&self) -> &[PackInfo] {
        &self.packs
    }

    pub fn entries(&self) -> &[CompiledEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&KnowledgeEntry> {
        self.entries
            .iter()
            .find(|c| c.entry.id == id)
            .map(|c| &c.entry)
    }

    /// Name of the pack that registered `id`.
    pub fn owner(&self, id: &str) -> Option<&str> {
        self.owners.get(id).map(String::as_str)
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

/// Process-wide owner of the knowledge index.
///
/// `load` is check-then-set under one mutex: the first caller reads and
/// validates packs, every later (or concurrent) caller gets the same
/// index back.
pub struct KnowledgeBase {
    index: Mutex<Option<Arc<KnowledgeIndex>>>,
    /// Config of the load that populated `index`. Locked after `index`.
    loaded_with: Mutex<Option<KnowledgeConfig>>,
}

/// Global knowledge base used by the engine.
pub static KNOWLEDGE_BASE: KnowledgeBase = KnowledgeBase::new();

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self::new()
    }
}

impl KnowledgeBase {
    pub const fn new() -> Self {
        Self {
            index: Mutex::new(None),
            loaded_with: Mutex::new(None),
        }
    }

    /// Load with [`KnowledgeConfig::from_env`].
    pub fn load(&self) -> KnowledgeResult<Arc<KnowledgeIndex>> {
        self.load_with(&KnowledgeConfig::from_env())
    }

    /// Load once. A failed load leaves the base unloaded.
    pub fn load_with(&self, config: &KnowledgeConfig) -> KnowledgeResult<Arc<KnowledgeIndex>> {
        let mut guard = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(index) = guard.as_ref() {
            match self.loaded_config() {
                Some(loaded) if loaded != *config => warn!(
                    event = "knowledge.config_ignored",
                    loaded_extra_dir = ?loaded.extra_dir,
                    requested_extra_dir = ?config.extra_dir,
                    "knowledge already loaded with a different config"
                ),
                _ => debug!("knowledge already loaded"),
            }
            return Ok(Arc::clone(index));
        }
        let index = Arc::new(KnowledgeIndex::build(config.read_packs()?)?);
        info!(
            event = "knowledge.loaded",
            packs = index.packs().len(),
            entries = index.len(),
            extra_dir = ?config.extra_dir,
            loaded_at = %index.loaded_at().to_rfc3339(),
        );
        *guard = Some(Arc::clone(&index));
        *self.loaded_with.lock().unwrap_or_else(PoisonError::into_inner) = Some(config.clone());
        Ok(index)
    }

    /// Config of the load that populated the base, if any.
    pub fn loaded_config(&self) -> Option<KnowledgeConfig> {
        self.loaded_with
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Register more packs on top of what is loaded (or on an empty index).
    /// All-or-nothing: on error nothing from `packs` is visible.
    pub fn add_packs(&self, packs: Vec<KnowledgePack>) -> KnowledgeResult<Arc<KnowledgeIndex>> {
        let mut guard = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        let current = guard
            .as_ref()
            .map(Arc::clone)
            .unwrap_or_else(|| Arc::new(KnowledgeIndex::empty()));
        let names: Vec<String> = packs.iter().map(|p| p.info.name.clone()).collect();
        let next = Arc::new(current.extend(packs)?);
        info!(
            event = "knowledge.loaded",
            packs = ?names,
            entries = next.len(),
        );
        *guard = Some(Arc::clone(&next));
        Ok(next)
    }

    /// Current index, if loaded.
    pub fn index(&self) -> Option<Arc<KnowledgeIndex>> {
        self.index
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(Arc::clone)
    }

    pub fn is_loaded(&self) -> bool {
        self.index().is_some()
    }

    /// Snapshot of every entry (empty when not loaded).
    pub fn all_entries(&self) -> Vec<KnowledgeEntry> {
        self.index()
            .map(|idx| idx.entries().iter().map(|c| c.entry.clone()).collect())
            .unwrap_or_default()
    }

    /// Forget the loaded index (for tests).
    pub fn reset(&self) {
        let mut guard = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = None;
        *self.loaded_with.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
