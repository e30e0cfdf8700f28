//! Bounded, encoding-aware file viewer.

use crate::apply::file_io;
use crate::apply::MAX_FILE_SIZE_BYTES;
use crate::config::Settings;
use crate::sandbox::{map_path_no_resolve, resolve_repo_path, ResolveOptions};

/// Default view window when no range is given.
const DEFAULT_VIEW_RANGE: (i64, i64) = (1, 100);

/// Renders a line range of a file as `"<n> <content>"` lines.
///
/// `view_range` is 1-indexed inclusive; an end of `-1` means EOF. When
/// lines remain after the window, a single
/// `... rest of file truncated ...` line is appended. A range entirely
/// past EOF yields empty output with no notice.
pub fn view_file_handler(path: &str, view_range: &[i64], settings: &Settings) -> String {
    let resolved = match resolve_repo_path(path, &settings.base_dir, ResolveOptions::repo_only()) {
        Ok(p) => p,
        Err(e) => return format!("Error: {e}"),
    };

    if map_path_no_resolve(path, &settings.base_dir).is_symlink() {
        return format!("Error: Path is a symlink: {path}");
    }
    if !resolved.exists() {
        return format!("Error: File not found: {path}");
    }
    if !resolved.is_file() {
        return format!("Error: Not a file: {path}");
    }

    let file_size = match std::fs::metadata(&resolved) {
        Ok(m) => m.len(),
        Err(e) => return format!("Error reading file: {e}"),
    };
    if file_size > MAX_FILE_SIZE_BYTES {
        return format!(
            "Error: File too large ({file_size} bytes). Maximum: {MAX_FILE_SIZE_BYTES} bytes"
        );
    }

    // Viewing tolerates mixed encodings: fall back to lossy UTF-8 when
    // the strict detection chain gives up.
    let content = match file_io::read_text_with_fallback(&resolved, settings.default_encoding.as_deref())
    {
        Ok((content, _)) => content,
        Err(file_io::ReadError::EncodingDetection(_)) => match std::fs::read(&resolved) {
            Ok(raw) => String::from_utf8_lossy(&raw).into_owned(),
            Err(e) => return format!("Error reading file: {e}"),
        },
        Err(file_io::ReadError::Io(e)) => return format!("Error reading file: {e}"),
    };

    let lines: Vec<&str> = content.lines().collect();

    let start = view_range.first().copied().unwrap_or(DEFAULT_VIEW_RANGE.0);
    let mut end = view_range.get(1).copied().unwrap_or(DEFAULT_VIEW_RANGE.1);
    if end == -1 {
        end = lines.len() as i64;
    }

    let start_idx = usize::try_from(start.max(1) - 1).unwrap_or(0).min(lines.len());
    let end_idx = usize::try_from(end.max(0)).unwrap_or(0).min(lines.len());

    let mut rendered: Vec<String> = Vec::new();
    for (offset, line) in lines
        .iter()
        .enumerate()
        .take(end_idx)
        .skip(start_idx)
        .map(|(i, l)| (i + 1, l))
    {
        rendered.push(format!("{offset} {line}"));
    }

    let mut result = rendered.join("\n");
    // Out-of-bounds ranges clamp end_idx to the line count, so they get
    // no notice; anything genuinely short of EOF does.
    if end_idx < lines.len() {
        result.push_str("\n... rest of file truncated ...");
    }
    result
}
