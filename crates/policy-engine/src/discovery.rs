//! Layered policy discovery.
//!
//! Walks upward from a starting directory to find the built-in and
//! user-override policy directories, then appends the operator-supplied
//! custom path. The returned list is in ascending override priority:
//! `builtin ++ user ++ custom`.
//!
//! Missing directories contribute nothing. Unreadable directories are logged
//! at `warn!` and also contribute nothing; discovery itself never fails.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::source::{sort_by_priority, PolicyLayer, PolicySource};

/// Directory name searched for shipped policy.
pub const BUILTIN_DIR_NAME: &str = "policies";

/// Directory name searched for repository-local overrides.
pub const USER_DIR_NAME: &str = "policies.user";

/// Environment variable naming the custom policy file or directory.
pub const CUSTOM_POLICY_ENV: &str = "CONTAINERIZE_CUSTOM_POLICY_PATH";

/// Knobs for discovery. The defaults match the on-disk convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOptions {
    pub builtin_dir_name: String,
    pub user_dir_name: String,
    /// Policy file extension, without the dot.
    pub extension: String,
    /// File-name suffix marking test-only policy (never loaded).
    pub test_suffix: String,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            builtin_dir_name: BUILTIN_DIR_NAME.to_string(),
            user_dir_name: USER_DIR_NAME.to_string(),
            extension: "rego".to_string(),
            test_suffix: "_test.rego".to_string(),
        }
    }
}

impl DiscoveryOptions {
    fn is_policy_file(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
            return false;
        };
        let has_extension = path
            .extension()
            .map(|ext| ext == self.extension.as_str())
            .unwrap_or(false);
        has_extension && !name.ends_with(self.test_suffix.as_str())
    }
}

/// Discover all policy sources visible from `start`.
///
/// `custom` is the out-of-band custom layer path (usually read from
/// [`CUSTOM_POLICY_ENV`]). It may point at a single file or a directory.
pub fn discover(
    start: &Path,
    custom: Option<&Path>,
    options: &DiscoveryOptions,
) -> Vec<PolicySource> {
    let start = absolute(start);

    let builtin = find_upward(&start, &options.builtin_dir_name)
        .map(|dir| list_policy_dir(&dir, PolicyLayer::Builtin, options))
        .unwrap_or_default();

    let user = find_upward(&start, &options.user_dir_name)
        .map(|dir| list_policy_dir(&dir, PolicyLayer::User, options))
        .unwrap_or_default();

    let custom = custom
        .map(|path| custom_sources(&absolute(path), options))
        .unwrap_or_default();

    info!(
        event = "policy.discovered",
        start = %start.display(),
        builtin = builtin.len(),
        user = user.len(),
        custom = custom.len(),
    );

    let mut sources = builtin;
    sources.extend(user);
    sources.extend(custom);
    sort_by_priority(&mut sources);
    sources
}

/// Nearest ancestor of `start` (inclusive) containing a directory `name`.
pub fn find_upward(start: &Path, name: &str) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_dir())
}

fn custom_sources(path: &Path, options: &DiscoveryOptions) -> Vec<PolicySource> {
    if path.is_dir() {
        list_policy_dir(path, PolicyLayer::Custom, options)
    } else if path.is_file() {
        if path
            .file_name()
            .map(|n| n.to_string_lossy().ends_with(options.test_suffix.as_str()))
            .unwrap_or(false)
        {
            debug!(path = %path.display(), "custom policy is a test artifact, skipping");
            return Vec::new();
        }
        vec![PolicySource::new(path, PolicyLayer::Custom, 0)]
    } else {
        debug!(path = %path.display(), "custom policy path does not exist");
        Vec::new()
    }
}

/// List policy files directly inside `dir`, lexically sorted.
fn list_policy_dir(dir: &Path, layer: PolicyLayer, options: &DiscoveryOptions) -> Vec<PolicySource> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(
                event = "policy.discovery_warning",
                layer = %layer,
                dir = %dir.display(),
                error = %err,
                "cannot read policy directory; layer contributes nothing"
            );
            return Vec::new();
        }
    };

    let mut files = Vec::new();
    for entry in entries {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(err) => {
                warn!(layer = %layer, dir = %dir.display(), error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if path.is_file() && options.is_policy_file(&path) {
            files.push(path);
        }
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    files
        .into_iter()
        .enumerate()
        .map(|(order, path)| PolicySource::new(path, layer, order as u32))
        .collect()
}

fn absolute(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Process-wide discovery cache with check-then-set semantics.
///
/// Discovery runs at most once per process; later calls, including
/// concurrent ones, observe the first result. A working-directory change
/// after the first call is not observed.
pub struct DiscoveryCache {
    cached: Mutex<Option<Arc<Vec<PolicySource>>>>,
}

impl Default for DiscoveryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryCache {
    pub const fn new() -> Self {
        Self {
            cached: Mutex::new(None),
        }
    }

    /// Return the cached sources, running `discover` only on the first call.
    pub fn get_or_discover<F>(&self, discover: F) -> Arc<Vec<PolicySource>>
    where
        F: FnOnce() -> Vec<PolicySource>,
    {
        let mut guard = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sources) = guard.as_ref() {
            return Arc::clone(sources);
        }
        let sources = Arc::new(discover());
        *guard = Some(Arc::clone(&sources));
        sources
    }

    pub fn is_populated(&self) -> bool {
        self.cached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Forget the cached result (test isolation).
    pub fn reset(&self) {
        *self.cached.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Global discovery cache.
pub static DISCOVERY_CACHE: DiscoveryCache = DiscoveryCache::new();

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn touch(path: &Path) {
        fs::write(path, "package test\n").unwrap();
    }

    #[test]
    fn test_policy_file_filter() {
        let opts = DiscoveryOptions::default();
        assert!(opts.is_policy_file(Path::new("/p/base.rego")));
        assert!(!opts.is_policy_file(Path::new("/p/base_test.rego")));
        assert!(!opts.is_policy_file(Path::new("/p/README.md")));
        assert!(!opts.is_policy_file(Path::new("/p/rego")));
    }

    #[test]
    fn test_list_policy_dir_sorts_and_is_non_recursive() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("b.rego"));
        touch(&dir.path().join("a.rego"));
        touch(&dir.path().join("a_test.rego"));
        fs::create_dir(dir.path().join("nested")).unwrap();
        touch(&dir.path().join("nested").join("c.rego"));

        let sources = list_policy_dir(dir.path(), PolicyLayer::Builtin, &DiscoveryOptions::default());
        let names: Vec<_> = sources
            .iter()
            .map(|s| s.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.rego", "b.rego"]);
        assert_eq!(sources[1].order, 1);
    }

    #[test]
    fn test_find_upward_prefers_nearest() {
        let root = tempfile::tempdir().unwrap();
        let deep = root.path().join("x").join("y");
        fs::create_dir_all(&deep).unwrap();
        fs::create_dir(root.path().join("policies")).unwrap();
        fs::create_dir(root.path().join("x").join("policies")).unwrap();

        let found = find_upward(&deep, "policies").unwrap();
        assert_eq!(found, root.path().join("x").join("policies"));
    }

    #[test]
    fn test_missing_custom_path_is_empty() {
        let opts = DiscoveryOptions::default();
        let sources = custom_sources(Path::new("/definitely/not/here.rego"), &opts);
        assert!(sources.is_empty());
    }

    #[test]
    fn test_cache_runs_discovery_once() {
        let cache = DiscoveryCache::new();
        let calls = AtomicUsize::new(0);
        let run = || {
            calls.fetch_add(1, Ordering::SeqCst);
            vec![PolicySource::new("/b/a.rego", PolicyLayer::Builtin, 0)]
        };
        let first = cache.get_or_discover(run);
        let second = cache.get_or_discover(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Vec::new()
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        assert!(cache.is_populated());

        cache.reset();
        assert!(!cache.is_populated());
        let third = cache.get_or_discover(Vec::new);
        assert!(third.is_empty());
    }
}
