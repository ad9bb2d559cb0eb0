//! Packs compiled into the binary.

use crate::error::KnowledgeResult;
use crate::pack::{parse_pack, KnowledgePack, BUILTIN_ORIGIN_PREFIX};

const BUILTIN_DOCKERFILE: &str = include_str!("../packs/dockerfile.json");
const BUILTIN_SECURITY: &str = include_str!("../packs/security.json");
const BUILTIN_KUBERNETES: &str = include_str!("../packs/kubernetes.json");
const BUILTIN_OPTIMIZATION: &str = include_str!("../packs/optimization.json");

/// `(name, text)` of every shipped pack, in load order.
pub const BUILTIN_PACKS: [(&str, &str); 4] = [
    ("dockerfile", BUILTIN_DOCKERFILE),
    ("security", BUILTIN_SECURITY),
    ("kubernetes", BUILTIN_KUBERNETES),
    ("optimization", BUILTIN_OPTIMIZATION),
];

pub fn builtin_packs() -> KnowledgeResult<Vec<KnowledgePack>> {
    BUILTIN_PACKS
        .iter()
        .map(|(name, text)| parse_pack(&format!("{BUILTIN_ORIGIN_PREFIX}{name}"), text))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::KnowledgeIndex;

    #[test]
    fn test_builtin_packs_are_valid_and_unique() {
        let packs = builtin_packs().unwrap();
        assert_eq!(packs.len(), BUILTIN_PACKS.len());
        assert!(packs.iter().all(|p| p.info.entries > 0));
        KnowledgeIndex::build(packs).unwrap();
    }

    #[test]
    fn test_bare_array_pack_named_from_origin() {
        let packs = builtin_packs().unwrap();
        let k8s = packs.iter().find(|p| p.info.origin == "builtin:kubernetes").unwrap();
        assert_eq!(k8s.info.name, "kubernetes");
    }
}
