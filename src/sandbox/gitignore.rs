//! Layered gitignore decisions for the exploration tools.
//!
//! Specs are collected low-to-high priority: global excludes, the
//! repository's `.git/info/exclude`, then every `.gitignore` from
//! `base_dir` down to the directory being listed. Within one file the
//! compiled matcher already applies git's "last match wins" rule
//! (including `!` re-inclusion); across files, the decision of the last
//! file that matched anything stands.
//!
//! Collection is memoized process-wide; call [`invalidate`] after
//! mutating ignore files (tests do).

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex};

/// One compiled ignore file plus the directory it governs
/// (relative to `base_dir`; empty for repo-level specs).
#[derive(Debug, Clone)]
pub struct IgnoreSpec {
    spec_dir: String,
    matcher: Arc<Gitignore>,
}

/// Ordered spec stack for one directory.
pub type IgnoreSpecs = Arc<Vec<IgnoreSpec>>;

struct SpecCache {
    /// (current_dir, base_dir) -> collected stack.
    collected: HashMap<(PathBuf, PathBuf), IgnoreSpecs>,
    /// Per-file compiled matchers (None = file absent/unreadable).
    compiled: HashMap<PathBuf, Option<Arc<Gitignore>>>,
    /// Cached global excludes file location.
    global_path: Option<Option<PathBuf>>,
}

static CACHE: LazyLock<Mutex<SpecCache>> = LazyLock::new(|| {
    Mutex::new(SpecCache {
        collected: HashMap::new(),
        compiled: HashMap::new(),
        global_path: None,
    })
});

/// Drops all memoized specs. Safe to call concurrently with readers;
/// subsequent lookups re-read from disk.
pub fn invalidate() {
    let mut cache = CACHE.lock().unwrap_or_else(|e| e.into_inner());
    cache.collected.clear();
    cache.compiled.clear();
    cache.global_path = None;
}

/// Collects the ordered spec stack applying to `current_dir`.
///
/// Directories outside `base_dir` get only the repo-level specs.
pub fn collect_specs(current_dir: &Path, base_dir: &Path) -> IgnoreSpecs {
    let key = (current_dir.to_path_buf(), base_dir.to_path_buf());
    {
        let cache = CACHE.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(specs) = cache.collected.get(&key) {
            return Arc::clone(specs);
        }
    }

    let mut specs: Vec<IgnoreSpec> = Vec::new();

    // Repo-level layers first (lowest priority).
    if let Some(matcher) = global_excludes_matcher() {
        specs.push(IgnoreSpec {
            spec_dir: String::new(),
            matcher,
        });
    }
    if let Some(matcher) = load_ignore_file(&base_dir.join(".git").join("info").join("exclude")) {
        specs.push(IgnoreSpec {
            spec_dir: String::new(),
            matcher,
        });
    }

    // Project .gitignore files from base_dir down to current_dir.
    let mut dirs = vec![base_dir.to_path_buf()];
    if current_dir != base_dir {
        if let Ok(rel) = current_dir.strip_prefix(base_dir) {
            let mut acc = base_dir.to_path_buf();
            for part in rel.components() {
                acc.push(part);
                dirs.push(acc.clone());
            }
        }
    }
    for dir in dirs {
        if let Some(matcher) = load_ignore_file(&dir.join(".gitignore")) {
            let spec_dir = dir
                .strip_prefix(base_dir)
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            specs.push(IgnoreSpec { spec_dir, matcher });
        }
    }

    let specs = Arc::new(specs);
    let mut cache = CACHE.lock().unwrap_or_else(|e| e.into_inner());
    cache.collected.insert(key, Arc::clone(&specs));
    specs
}

/// Decides whether `rel_path` (relative to `base_dir`, `/`-separated)
/// is ignored under the given spec stack.
#[must_use]
pub fn is_ignored(rel_path: &str, is_dir: bool, specs: &[IgnoreSpec]) -> bool {
    let rel_posix = rel_path.trim_matches('/');
    if rel_posix.is_empty() || specs.is_empty() {
        return false;
    }

    let mut ignored = false;
    for spec in specs {
        let spec_rel = if spec.spec_dir.is_empty() {
            rel_posix
        } else if rel_posix == spec.spec_dir {
            "."
        } else if let Some(rest) = rel_posix
            .strip_prefix(spec.spec_dir.as_str())
            .and_then(|r| r.strip_prefix('/'))
        {
            rest
        } else {
            continue;
        };

        match spec.matcher.matched(spec_rel, is_dir) {
            ignore::Match::None => {}
            ignore::Match::Ignore(_) => ignored = true,
            ignore::Match::Whitelist(_) => ignored = false,
        }
    }
    ignored
}

/// Loads and caches one ignore file as a relative-path matcher.
fn load_ignore_file(path: &Path) -> Option<Arc<Gitignore>> {
    {
        let cache = CACHE.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = cache.compiled.get(path) {
            return entry.clone();
        }
    }

    let compiled = std::fs::read_to_string(path).ok().and_then(|content| {
        // Empty root: matched() sees our spec-relative paths unchanged.
        let mut builder = GitignoreBuilder::new("");
        for line in content.lines() {
            let _ = builder.add_line(None, line);
        }
        builder.build().ok().map(Arc::new)
    });

    let mut cache = CACHE.lock().unwrap_or_else(|e| e.into_inner());
    cache
        .compiled
        .insert(path.to_path_buf(), compiled.clone());
    compiled
}

/// Resolves the user's global excludes file.
///
/// Priority: `git config --global core.excludesFile`, then
/// `$XDG_CONFIG_HOME/git/ignore`, then `~/.gitignore`.
fn global_excludes_matcher() -> Option<Arc<Gitignore>> {
    let path = {
        let mut cache = CACHE.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cached) = &cache.global_path {
            cached.clone()
        } else {
            let found = find_global_excludes_path();
            cache.global_path = Some(found.clone());
            found
        }
    };
    load_ignore_file(&path?)
}

fn find_global_excludes_path() -> Option<PathBuf> {
    if let Ok(output) = std::process::Command::new("git")
        .args(["config", "--global", "core.excludesFile"])
        .output()
    {
        if output.status.success() {
            let raw = String::from_utf8_lossy(&output.stdout);
            let raw = raw.trim();
            if !raw.is_empty() {
                let path = if let Some(rest) = raw.strip_prefix("~/") {
                    dirs::home_dir().map(|h| h.join(rest))
                } else {
                    Some(PathBuf::from(raw))
                };
                if let Some(path) = path.filter(|p| p.is_file()) {
                    return Some(path);
                }
            }
        }
    }

    let xdg = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")));
    if let Some(path) = xdg.map(|d| d.join("git").join("ignore")) {
        if path.is_file() {
            return Some(path);
        }
    }

    dirs::home_dir()
        .map(|h| h.join(".gitignore"))
        .filter(|p| p.is_file())
}
