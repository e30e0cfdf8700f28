//! Virtual `/repo` root mapping and traversal-proof path resolution.
//!
//! The upstream model speaks in `/repo/...` paths; these are rewritten
//! to real filesystem paths exactly once, at each tool entry point.
//! Containment is enforced on the *resolved* path, never on string
//! prefixes: a `/repo//etc/passwd` or symlink hop that lands outside
//! `base_dir` is rejected here regardless of how it was spelled.

use crate::error::PathError;
use std::path::{Component, Path, PathBuf};

/// Knobs for [`resolve_repo_path`].
#[derive(Debug, Clone, Copy)]
pub struct ResolveOptions {
    /// Accept paths without a leading `/` (joined onto `base_dir`).
    pub allow_relative: bool,
    /// Accept absolute paths outside the `/repo` prefix.
    pub allow_absolute: bool,
    /// Require absolute paths to stay inside `base_dir`.
    pub require_within_base_dir: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            allow_relative: true,
            allow_absolute: true,
            require_within_base_dir: false,
        }
    }
}

impl ResolveOptions {
    /// Only `/repo/...` inputs are accepted.
    #[must_use]
    pub fn repo_only() -> Self {
        Self {
            allow_relative: false,
            allow_absolute: false,
            require_within_base_dir: true,
        }
    }

    /// Any input form, but the result must stay inside `base_dir`.
    #[must_use]
    pub fn contained() -> Self {
        Self {
            require_within_base_dir: true,
            ..Self::default()
        }
    }
}

/// Resolves a `/repo/...`, relative, or absolute input to an absolute
/// filesystem path.
///
/// `/repo` and `/repo/` map to `base_dir` itself. `/repo/<rel>` strips
/// any extra leading slashes from `<rel>` before joining, closing the
/// `/repo//etc/passwd` hole. `/repo` and relative inputs always get a
/// containment check; absolute inputs only under
/// `require_within_base_dir`.
///
/// # Errors
///
/// `PathError::Escape` when the resolved path leaves `base_dir`,
/// `PathError::Unresolvable` for circular symlinks, and the
/// `*NotAllowed` variants when the input form is disabled.
pub fn resolve_repo_path(
    path: &str,
    base_dir: &Path,
    opts: ResolveOptions,
) -> Result<PathBuf, PathError> {
    let base_resolved = resolve_existing(base_dir)?;

    if path == "/repo" || path == "/repo/" {
        return Ok(base_resolved);
    }

    if let Some(rel) = path.strip_prefix("/repo/") {
        let rel = rel.trim_start_matches('/');
        if rel.is_empty() {
            return Ok(base_resolved);
        }
        let resolved = resolve_lexical(&base_resolved.join(rel), path)?;
        if !is_within(&resolved, &base_resolved) {
            return Err(PathError::Escape {
                path: path.to_string(),
            });
        }
        return Ok(resolved);
    }

    if !Path::new(path).is_absolute() {
        if !opts.allow_relative {
            return Err(PathError::RelativeNotAllowed {
                path: path.to_string(),
            });
        }
        let resolved = resolve_lexical(&base_resolved.join(path), path)?;
        if !is_within(&resolved, &base_resolved) {
            return Err(PathError::Escape {
                path: path.to_string(),
            });
        }
        return Ok(resolved);
    }

    if !opts.allow_absolute {
        return Err(PathError::AbsoluteNotAllowed {
            path: path.to_string(),
        });
    }
    let resolved = resolve_lexical(Path::new(path), path)?;
    if opts.require_within_base_dir && !is_within(&resolved, &base_resolved) {
        return Err(PathError::Escape {
            path: path.to_string(),
        });
    }
    Ok(resolved)
}

/// Maps a `/repo/...` or relative input to a path WITHOUT following
/// symlinks. Use when the caller must check `is_symlink()` before any
/// resolution. Absolute inputs are returned as-is.
#[must_use]
pub fn map_path_no_resolve(path: &str, base_dir: &Path) -> PathBuf {
    if path == "/repo" || path == "/repo/" {
        return base_dir.to_path_buf();
    }
    if let Some(rel) = path.strip_prefix("/repo/") {
        let rel = rel.trim_start_matches('/');
        if rel.is_empty() {
            return base_dir.to_path_buf();
        }
        return base_dir.join(rel);
    }
    if !Path::new(path).is_absolute() {
        return base_dir.join(path);
    }
    PathBuf::from(path)
}

/// Validates a file path for the apply tool.
///
/// Accepts absolute or relative inputs (relative resolved against
/// `base_dir`) and requires containment in `base_dir` or one of the
/// pre-resolved `extra_paths`.
///
/// # Errors
///
/// `PathError::Empty` for blank input, `PathError::Escape` when outside
/// every allowed root.
pub fn validate_file_path(
    file_path: &str,
    base_dir: &Path,
    extra_paths: &[PathBuf],
) -> Result<PathBuf, PathError> {
    if file_path.trim().is_empty() {
        return Err(PathError::Empty);
    }

    let joined = if Path::new(file_path).is_absolute() {
        PathBuf::from(file_path)
    } else {
        base_dir.join(file_path)
    };
    let resolved = resolve_lexical(&joined, file_path)?;

    let base_resolved = resolve_existing(base_dir)?;
    if is_within(&resolved, &base_resolved) {
        return Ok(resolved);
    }
    for extra in extra_paths {
        if let Ok(extra_resolved) = resolve_existing(extra) {
            if is_within(&resolved, &extra_resolved) {
                return Ok(resolved);
            }
        }
    }
    Err(PathError::Escape {
        path: file_path.to_string(),
    })
}

/// Canonicalizes an existing directory/file.
fn resolve_existing(path: &Path) -> Result<PathBuf, PathError> {
    dunce::canonicalize(path).map_err(|_| PathError::Unresolvable {
        path: path.display().to_string(),
    })
}

/// Resolves a possibly not-yet-existing path.
///
/// The path is lexically normalized first (`.`/`..` removed), then the
/// longest existing prefix is canonicalized through the filesystem and
/// the remaining components are appended. Lexical-first ordering means
/// `..` cannot be combined with a symlink to step outside a canonical
/// ancestor.
fn resolve_lexical(path: &Path, original: &str) -> Result<PathBuf, PathError> {
    let normalized = normalize_path(path);

    let mut existing = normalized.as_path();
    let mut remainder = Vec::new();
    loop {
        match dunce::canonicalize(existing) {
            Ok(canonical) => {
                let mut resolved = canonical;
                for part in remainder.iter().rev() {
                    resolved.push(part);
                }
                return Ok(resolved);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => match existing.parent() {
                Some(parent) => {
                    if let Some(name) = existing.file_name() {
                        remainder.push(name.to_os_string());
                    }
                    existing = parent;
                }
                None => return Ok(normalized),
            },
            Err(_) => {
                return Err(PathError::Unresolvable {
                    path: original.to_string(),
                })
            }
        }
    }
}

/// Resolves `.` and `..` components without filesystem access.
fn normalize_path(path: &Path) -> PathBuf {
    let mut components: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if components
                    .last()
                    .is_some_and(|c| matches!(c, Component::Normal(_)))
                {
                    components.pop();
                } else if !components
                    .last()
                    .is_some_and(|c| matches!(c, Component::RootDir | Component::Prefix(_)))
                {
                    components.push(component);
                }
            }
            _ => components.push(component),
        }
    }
    components.iter().collect()
}

/// Containment check on resolved paths.
fn is_within(resolved: &Path, base_resolved: &Path) -> bool {
    resolved.starts_with(base_resolved)
}
