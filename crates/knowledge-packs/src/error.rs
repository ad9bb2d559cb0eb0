//! Error types for knowledge-packs

use std::path::PathBuf;

use thiserror::Error;

/// Knowledge load failures. All of them are fatal for the load that
/// produced them: nothing from the failing batch is admitted.
#[derive(Error, Debug)]
pub enum KnowledgeError {
    /// A pack failed schema validation and was rejected wholesale.
    #[error("invalid knowledge pack '{pack}': {reason}")]
    InvalidPack { pack: String, reason: String },

    /// Two entries share an id, within one pack or across packs.
    #[error("duplicate knowledge entry id '{id}' in pack '{pack}' (already defined by '{existing}')")]
    DuplicateId {
        id: String,
        pack: String,
        existing: String,
    },

    /// IO error while reading a pack.
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for knowledge-packs operations
pub type KnowledgeResult<T> = std::result::Result<T, KnowledgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_id_display() {
        let err = KnowledgeError::DuplicateId {
            id: "docker-non-root".into(),
            pack: "org-extras".into(),
            existing: "security".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("docker-non-root"));
        assert!(msg.contains("org-extras"));
        assert!(msg.contains("security"));
    }
}
