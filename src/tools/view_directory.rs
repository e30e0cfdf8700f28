//! Recursive directory listing in BFS order.
//!
//! Output lists each level's files (sorted) before its directories,
//! then descends into the directories in order, matching the format the
//! search model was trained against. Symlinks are reported as files and
//! never descended.

use crate::config::Settings;
use crate::sandbox::gitignore;
use crate::sandbox::{resolve_repo_path, ResolveOptions};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// Listing stops once this many items have been produced.
pub const MAX_DIR_ITEMS: usize = 250;

/// Lists a directory tree under the virtual root.
pub fn view_directory_handler(path: &str, include_hidden: bool, settings: &Settings) -> String {
    let resolved = match resolve_repo_path(path, &settings.base_dir, ResolveOptions::repo_only()) {
        Ok(p) => p,
        Err(e) => return format!("Error: {e}"),
    };

    if !resolved.exists() {
        return format!("Error: Directory not found: {path}");
    }
    if !resolved.is_dir() {
        return format!("Error: Not a directory: {path}");
    }

    let base_dir = settings.base_dir.clone();
    let (items, truncated) = collect_items(&resolved, include_hidden, &base_dir);

    let mut result = items.join("\n");
    if truncated {
        result.push_str(&format!("\n... output truncated at {MAX_DIR_ITEMS} items ..."));
    }
    result
}

fn collect_items(root: &Path, include_hidden: bool, base_dir: &Path) -> (Vec<String>, bool) {
    let mut items: Vec<String> = Vec::new();
    let mut queue: VecDeque<(PathBuf, PathBuf)> = VecDeque::new();
    queue.push_back((root.to_path_buf(), PathBuf::new()));

    while let Some((current_abs, current_rel)) = queue.pop_front() {
        if items.len() >= MAX_DIR_ITEMS {
            break;
        }

        // Ignore rules can differ per directory (nested .gitignore files).
        let specs = gitignore::collect_specs(&current_abs, base_dir);
        let (files, dirs) = collect_entries(&current_abs, include_hidden, base_dir, &specs);

        for (name, _) in &files {
            if items.len() >= MAX_DIR_ITEMS {
                break;
            }
            items.push(join_rel(&current_rel, name));
        }
        for (name, entry) in dirs {
            if items.len() >= MAX_DIR_ITEMS {
                break;
            }
            let rel = current_rel.join(&name);
            items.push(format!("{}/", join_rel(&current_rel, &name)));
            queue.push_back((entry, rel));
        }
    }

    let truncated = items.len() >= MAX_DIR_ITEMS;
    (items, truncated)
}

type Entries = (Vec<(String, PathBuf)>, Vec<(String, PathBuf)>);

fn collect_entries(
    current_abs: &Path,
    include_hidden: bool,
    base_dir: &Path,
    specs: &gitignore::IgnoreSpecs,
) -> Entries {
    let Ok(read_dir) = std::fs::read_dir(current_abs) else {
        return (Vec::new(), Vec::new());
    };

    let root_rel = current_abs
        .strip_prefix(base_dir)
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_default();

    let mut files: Vec<(String, PathBuf)> = Vec::new();
    let mut dirs: Vec<(String, PathBuf)> = Vec::new();

    for entry in read_dir.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !include_hidden && name.starts_with('.') {
            continue;
        }

        let entry_path = entry.path();
        let is_symlink = entry_path.is_symlink();
        let is_dir = entry_path.is_dir() && !is_symlink;

        let entry_rel = if root_rel.is_empty() {
            name.clone()
        } else {
            format!("{root_rel}/{name}")
        };
        if gitignore::is_ignored(&entry_rel, is_dir, specs) {
            continue;
        }

        // Never descend through symlinks; list them as plain files.
        if is_dir {
            dirs.push((name, entry_path));
        } else if is_symlink || entry_path.is_file() {
            files.push((name, entry_path));
        }
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    dirs.sort_by(|a, b| a.0.cmp(&b.0));
    (files, dirs)
}

fn join_rel(rel: &Path, name: &str) -> String {
    if rel.as_os_str().is_empty() {
        name.to_string()
    } else {
        format!("{}/{name}", rel.to_string_lossy().replace('\\', "/"))
    }
}
