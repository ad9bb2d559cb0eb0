//! Engine-level error taxonomy.

use knowledge_packs::KnowledgeError;
use policy_engine::PolicyError;

/// Errors surfaced by the engine. Policy answers that fail schema
/// validation are recovered inside the resolver and never reach callers
/// through this type.
#[derive(Debug, thiserror::Error)]
pub enum ContainerizeError {
    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("knowledge error: {0}")]
    Knowledge(#[from] KnowledgeError),

    #[error("invalid analysis: {0}")]
    InvalidAnalysis(String),

    #[error("policy answer for '{section}' failed validation: {message}")]
    Schema {
        section: &'static str,
        message: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invocation {0} cancelled")]
    Cancelled(uuid::Uuid),

    #[error("background task failed: {0}")]
    Task(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ContainerizeError {
    pub(crate) fn schema(section: &'static str, message: impl Into<String>) -> Self {
        Self::Schema {
            section,
            message: message.into(),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, ContainerizeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_display() {
        let err = ContainerizeError::schema("kubernetes", "replicas must be at least 1");
        let msg = err.to_string();
        assert!(msg.contains("kubernetes"));
        assert!(msg.contains("replicas must be at least 1"));
    }

    #[test]
    fn test_policy_error_converts() {
        let err: ContainerizeError = PolicyError::EvaluatorClosed.into();
        assert!(matches!(err, ContainerizeError::Policy(_)));
    }
}
