//! Knowledge-Packs: curated best-practice knowledge for Containerize
//!
//! Packs are JSON documents of pattern-to-recommendation entries. They are
//! validated wholesale on load, indexed once per process and ranked against
//! free-text repository signals.
//!
//! ## Example
//!
//! ```no_run
//! use knowledge_packs::{KnowledgeCategory, KNOWLEDGE_BASE};
//!
//! let index = KNOWLEDGE_BASE.load()?;
//! for m in index.match_category(KnowledgeCategory::Security, Some("USER root")) {
//!     println!("{:>5.1} {}", m.weight, m.entry.recommendation);
//! }
//! # Ok::<(), knowledge_packs::KnowledgeError>(())
//! ```

pub mod builtin;
pub mod category;
pub mod error;
pub mod matcher;
pub mod pack;
pub mod store;

pub use builtin::{builtin_packs, BUILTIN_PACKS};
pub use category::{KnowledgeCategory, Severity};
pub use error::{KnowledgeError, KnowledgeResult};
pub use matcher::{KnowledgeMatch, MatchQuery};
pub use pack::{load_pack_dir, parse_pack, CompiledEntry, KnowledgeEntry, KnowledgePack, PackInfo};
pub use store::{KnowledgeBase, KnowledgeConfig, KnowledgeIndex, KNOWLEDGE_BASE, KNOWLEDGE_DIR_ENV};
