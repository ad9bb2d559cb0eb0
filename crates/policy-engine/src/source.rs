//! Discovered policy sources and their override priority.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Provenance tier of a policy source. Later layers override earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyLayer {
    /// Policy shipped with the tool.
    Builtin,
    /// Repository-local overrides.
    User,
    /// Operator-injected policy supplied out of band.
    Custom,
}

impl PolicyLayer {
    /// All layers in ascending priority order.
    pub const ALL: [PolicyLayer; 3] = [PolicyLayer::Builtin, PolicyLayer::User, PolicyLayer::Custom];

    fn rank(self) -> u32 {
        match self {
            Self::Builtin => 0,
            Self::User => 1,
            Self::Custom => 2,
        }
    }
}

impl std::fmt::Display for PolicyLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Builtin => write!(f, "builtin"),
            Self::User => write!(f, "user"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// Number of priority slots reserved for files inside a single layer.
const LAYER_STRIDE: u32 = 1 << 16;

/// A discovered policy file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySource {
    pub path: PathBuf,
    pub layer: PolicyLayer,
    /// Position of this file inside its layer after the lexical sort.
    pub order: u32,
}

impl PolicySource {
    pub fn new(path: impl Into<PathBuf>, layer: PolicyLayer, order: u32) -> Self {
        Self {
            path: path.into(),
            layer,
            order,
        }
    }

    /// Override priority: higher wins when two sources declare the same package.
    ///
    /// Derived from the layer first and the in-layer order second, so any
    /// custom source outranks every user source, which outranks every builtin.
    pub fn priority(&self) -> u32 {
        self.layer.rank() * LAYER_STRIDE + self.order.min(LAYER_STRIDE - 1)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Sort sources into ascending priority order (lowest first).
pub fn sort_by_priority(sources: &mut [PolicySource]) {
    sources.sort_by_key(PolicySource::priority);
}
