//! Gitignore-aware glob matching.
//!
//! Standard semantics: a single `*` does not cross `/`, `**` does.
//! Patterns ending in `/` match directories only. Results come back
//! sorted, relative to the search root.

use crate::config::Settings;
use crate::sandbox::{resolve_repo_path, ResolveOptions};
use globset::GlobBuilder;
use ignore::WalkBuilder;

/// Default result cap.
pub const MAX_GLOB_RESULTS: usize = 50;
/// Upper bound a caller can raise the cap to.
pub const MAX_GLOB_RESULTS_CEILING: usize = 200;

/// Finds files matching a glob pattern.
pub fn glob_handler(
    pattern: &str,
    path: Option<&str>,
    include_hidden: bool,
    max_results: Option<usize>,
    settings: &Settings,
) -> String {
    if pattern.contains("..") {
        return "Error: pattern must not contain '..'".to_string();
    }
    let pattern = pattern.trim_start_matches('/');
    if pattern.is_empty() {
        return "Error: pattern cannot be empty".to_string();
    }

    let root = match path {
        Some(p) => match resolve_repo_path(p, &settings.base_dir, ResolveOptions::repo_only()) {
            Ok(resolved) => resolved,
            Err(e) => return format!("Error: {e}"),
        },
        None => settings.base_dir.clone(),
    };
    if !root.is_dir() {
        return format!("Error: Not a directory: {}", root.display());
    }

    let dirs_only = pattern.ends_with('/');
    let pattern_trimmed = pattern.trim_end_matches('/');

    // A bare name like `pyproject.toml` means "at any depth".
    let effective = if pattern_trimmed.contains('/') {
        pattern_trimmed.to_string()
    } else {
        format!("**/{pattern_trimmed}")
    };

    let matcher = match GlobBuilder::new(&effective)
        .literal_separator(true)
        .build()
    {
        Ok(glob) => glob.compile_matcher(),
        Err(e) => return format!("Error: invalid glob pattern: {e}"),
    };

    let cap = max_results
        .unwrap_or(MAX_GLOB_RESULTS)
        .clamp(1, MAX_GLOB_RESULTS_CEILING);

    let walker = WalkBuilder::new(&root)
        .hidden(!include_hidden)
        .follow_links(false)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        .require_git(false)
        .build();

    let mut results: Vec<String> = Vec::new();
    for entry in walker.flatten() {
        let entry_path = entry.path();
        if entry_path == root {
            continue;
        }
        let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
        if dirs_only != is_dir {
            continue;
        }
        let rel = entry_path
            .strip_prefix(&root)
            .unwrap_or(entry_path)
            .to_string_lossy()
            .replace('\\', "/");
        if matcher.is_match(&rel) {
            results.push(if is_dir { format!("{rel}/") } else { rel });
        }
    }

    if results.is_empty() {
        return "No files found.".to_string();
    }

    results.sort();
    let truncated = results.len() > cap;
    results.truncate(cap);

    let mut output = results.join("\n");
    if truncated {
        output.push_str(&format!("\n... output capped at {cap} matches ..."));
    }
    output
}
