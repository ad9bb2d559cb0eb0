//! Policy-Engine: layered policy discovery and evaluation for Containerize
//!
//! This crate locates organization policy on disk and answers typed
//! questions about it.
//!
//! ## Layers
//!
//! Policy comes from three layers, lowest priority first: `builtin`
//! (shipped), `user` (repository overrides) and `custom` (operator supplied).
//! When two sources declare the same package, the higher-priority source's
//! package wins.
//!
//! ## Policy language
//!
//! Sources are written in a Rego subset: packages, `default` values,
//! complete rules (`name := value if { ... }`), partial set rules
//! (`name contains value if { ... }`), comparisons, membership and `not`.

pub mod ast;
pub mod compile;
pub mod discovery;
pub mod error;
pub mod eval;
pub mod evaluator;
pub mod lexer;
pub mod parser;
pub mod source;

pub use compile::{split_query, PolicySet, ShadowedPackage};
pub use discovery::{
    discover, find_upward, DiscoveryCache, DiscoveryOptions,
    BUILTIN_DIR_NAME, CUSTOM_POLICY_ENV, DISCOVERY_CACHE, USER_DIR_NAME,
};
pub use error::PolicyError;
pub use evaluator::{query_cancellable, query_config, PolicyEngine, RegoEvaluator};
pub use source::{sort_by_priority, PolicyLayer, PolicySource};

/// Result type for policy-engine operations
pub type Result<T> = std::result::Result<T, PolicyError>;
