//! Error types for policy-engine

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while discovering, compiling or evaluating policy.
#[derive(Error, Debug)]
pub enum PolicyError {
    /// A policy source failed to parse or compile.
    #[error("compile error in {source_path}:{line}: {message}")]
    Compile {
        source_path: PathBuf,
        line: usize,
        message: String,
    },

    /// A rule raised a fault while answering a single query.
    #[error("evaluation error for '{query}': {message}")]
    Evaluation { query: String, message: String },

    /// The query string is not of the form `package.path.binding`.
    #[error("invalid query '{0}': expected <package>.<binding>")]
    InvalidQuery(String),

    /// The policy answer could not be decoded into the requested type.
    #[error("cannot decode answer for '{query}': {message}")]
    Decode { query: String, message: String },

    /// The evaluator handle was closed before the query ran.
    #[error("policy evaluator is closed")]
    EvaluatorClosed,

    /// The caller cancelled an in-flight query.
    #[error("policy query '{0}' was cancelled")]
    Cancelled(String),

    /// IO error while reading a policy source.
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The blocking evaluation task panicked or was aborted.
    #[error("evaluation task failed: {0}")]
    Task(String),
}

impl PolicyError {
    pub(crate) fn compile(
        source_path: impl Into<PathBuf>,
        line: usize,
        message: impl Into<String>,
    ) -> Self {
        Self::Compile {
            source_path: source_path.into(),
            line,
            message: message.into(),
        }
    }

    /// Whether this error only affects the query that produced it.
    pub fn is_query_scoped(&self) -> bool {
        matches!(
            self,
            Self::Evaluation { .. } | Self::Decode { .. } | Self::Cancelled(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_error_names_source_and_line() {
        let err = PolicyError::compile("/etc/policies/base.rego", 7, "unexpected token '}'");
        let msg = err.to_string();
        assert!(msg.contains("/etc/policies/base.rego:7"));
        assert!(msg.contains("unexpected token"));
    }

    #[test]
    fn test_query_scoped_classification() {
        let eval = PolicyError::Evaluation {
            query: "a.b".into(),
            message: "conflict".into(),
        };
        assert!(eval.is_query_scoped());
        assert!(!PolicyError::EvaluatorClosed.is_query_scoped());
        assert!(!PolicyError::compile("x.rego", 1, "bad").is_query_scoped());
    }
}
