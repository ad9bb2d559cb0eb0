use std::fs;

use knowledge_packs::{
    parse_pack, KnowledgeBase, KnowledgeCategory, KnowledgeConfig, KnowledgeError, MatchQuery,
};

const EXTRA: &str = r#"{
    "name": "org-extras",
    "version": "0.3.0",
    "rules": [
        {"id": "org-approved-registry", "category": "security", "pattern": "docker\\.io", "recommendation": "Pull only from registry.example.com", "severity": "high", "tags": ["registry"]},
        {"id": "org-quarkus-native", "category": "build", "pattern": "quarkus", "recommendation": "Build Quarkus services as native images", "tags": ["quarkus", "java"]}
    ]
}"#;

fn extra_dir(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, body) in files {
        fs::write(dir.path().join(name), body).unwrap();
    }
    dir
}

// ── Load ────────────────────────────────────────────────────────────────

#[test]
fn load_twice_keeps_entry_count() {
    let dir = extra_dir(&[("extras.json", EXTRA)]);
    let kb = KnowledgeBase::new();
    let config = KnowledgeConfig::default().with_extra_dir(dir.path());

    kb.load_with(&config).unwrap();
    let before = kb.all_entries().len();
    kb.load_with(&config).unwrap();
    assert_eq!(kb.all_entries().len(), before);

    let index = kb.index().unwrap();
    assert!(index.packs().iter().any(|p| p.name == "org-extras" && p.version == "0.3.0"));
    assert_eq!(index.owner("org-quarkus-native"), Some("org-extras"));
}

#[test]
fn concurrent_loads_register_once() {
    let kb = std::sync::Arc::new(KnowledgeBase::new());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let kb = std::sync::Arc::clone(&kb);
            std::thread::spawn(move || kb.load_with(&KnowledgeConfig::default()).unwrap().len())
        })
        .collect();
    let counts: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(counts.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(kb.all_entries().len(), counts[0]);
}

// ── Validation ──────────────────────────────────────────────────────────

#[test]
fn duplicate_id_against_builtin_fails_load() {
    let clash = r#"[{"id": "security-non-root-user", "category": "security", "pattern": "x", "recommendation": "y"}]"#;
    let dir = extra_dir(&[("clash.json", clash)]);
    let kb = KnowledgeBase::new();
    let err = kb
        .load_with(&KnowledgeConfig::default().with_extra_dir(dir.path()))
        .unwrap_err();
    assert!(matches!(err, KnowledgeError::DuplicateId { ref existing, .. } if existing == "security"));
    assert!(!kb.is_loaded());
}

#[test]
fn duplicate_id_against_loaded_entries_is_rejected() {
    let kb = KnowledgeBase::new();
    kb.load_with(&KnowledgeConfig::default()).unwrap();
    let before = kb.all_entries().len();

    let pack = parse_pack(
        "late.json",
        r#"[{"id": "k8s-probes", "category": "kubernetes", "pattern": "x", "recommendation": "y"}]"#,
    )
    .unwrap();
    assert!(kb.add_packs(vec![pack]).is_err());
    assert_eq!(kb.all_entries().len(), before);
}

#[test]
fn invalid_pack_in_extra_dir_admits_nothing() {
    let broken = r#"[{"id": "fine", "category": "build", "pattern": "x", "recommendation": "y"},
                     {"id": "broken", "category": "build", "pattern": "[", "recommendation": "y"}]"#;
    let dir = extra_dir(&[("a.json", EXTRA), ("b.json", broken)]);
    let kb = KnowledgeBase::new();
    let err = kb
        .load_with(&KnowledgeConfig::default().with_extra_dir(dir.path()))
        .unwrap_err();
    assert!(matches!(err, KnowledgeError::InvalidPack { .. }));
    assert!(kb.all_entries().is_empty());
}

// ── Matching ────────────────────────────────────────────────────────────

#[test]
fn extra_pack_entries_rank_with_builtin() {
    let dir = extra_dir(&[("extras.json", EXTRA)]);
    let kb = KnowledgeBase::new();
    let index = kb
        .load_with(&KnowledgeConfig::default().with_extra_dir(dir.path()))
        .unwrap();

    let signal = "FROM docker.io/library/ubuntu:latest\nUSER root\nENV API_KEY=abc";
    let matches = index.match_category(KnowledgeCategory::Security, Some(signal));
    let ids: Vec<_> = matches.iter().map(|m| m.entry.id.as_str()).collect();
    assert_eq!(ids.first(), Some(&"security-no-secrets-in-image"));
    assert!(ids.contains(&"org-approved-registry"));
    assert!(ids.contains(&"security-non-root-user"));
    assert!(!ids.contains(&"security-drop-capabilities"));
    assert!(matches.windows(2).all(|w| w[0].weight >= w[1].weight));
}

#[test]
fn framework_boost_lifts_tagged_entries() {
    let dir = extra_dir(&[("extras.json", EXTRA)]);
    let index = KnowledgeBase::new()
        .load_with(&KnowledgeConfig::default().with_extra_dir(dir.path()))
        .unwrap();
    let query = MatchQuery::new(KnowledgeCategory::Build).with_framework("quarkus");
    let matches = index.matches(&query);
    assert_eq!(matches[0].entry.id, "org-quarkus-native");
}
