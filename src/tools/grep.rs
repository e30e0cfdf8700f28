//! Regex search over the repository.
//!
//! Preferred path is the external `rg` binary (matching the output
//! format the model expects); when it is missing or misbehaves, an
//! in-process fallback built on the ripgrep crates walks the tree with
//! the same caps and a hard deadline.

use crate::config::Settings;
use globset::{Glob, GlobMatcher};
use grep_regex::RegexMatcherBuilder;
use grep_searcher::sinks::UTF8;
use grep_searcher::Searcher;
use ignore::WalkBuilder;
use std::path::Path;
use std::time::{Duration, Instant};

/// Match-line cap across the whole search.
pub const MAX_GREP_MATCHES: usize = 50;
/// Wall-clock budget for one search.
pub const GREP_TIMEOUT: Duration = Duration::from_secs(30);
/// Directory depth bound for the fallback walker.
pub const MAX_GREP_DEPTH: usize = 10;
/// Per-file cap passed to rg (the global cap is applied afterwards).
const RG_PER_FILE_MAX_COUNT: &str = "100";

/// Searches `base_dir` for a regex pattern.
pub async fn grep_search_handler(
    query: &str,
    case_sensitive: bool,
    include_pattern: Option<&str>,
    exclude_pattern: Option<&str>,
    settings: &Settings,
) -> String {
    match run_rg(
        query,
        case_sensitive,
        include_pattern,
        exclude_pattern,
        &settings.base_dir,
    )
    .await
    {
        Some(output) => output,
        None => {
            // rg unavailable or failed; run the in-process fallback off
            // the async loop.
            let query = query.to_string();
            let include = include_pattern.map(str::to_string);
            let exclude = exclude_pattern.map(str::to_string);
            let base_dir = settings.base_dir.clone();
            tokio::task::spawn_blocking(move || {
                fallback_grep(&query, case_sensitive, include.as_deref(), exclude.as_deref(), &base_dir)
            })
            .await
            .unwrap_or_else(|e| format!("Error in grep search: {e}"))
        }
    }
}

/// Runs the external `rg` binary. `None` means "use the fallback".
async fn run_rg(
    query: &str,
    case_sensitive: bool,
    include_pattern: Option<&str>,
    exclude_pattern: Option<&str>,
    base_dir: &Path,
) -> Option<String> {
    let mut cmd = tokio::process::Command::new("rg");
    cmd.args(["--line-number", "--no-heading", "--color=never"]);
    if !case_sensitive {
        cmd.arg("-i");
    }
    if let Some(include) = include_pattern {
        cmd.args(["-g", include]);
    }
    if let Some(exclude) = exclude_pattern {
        cmd.arg("-g").arg(format!("!{exclude}"));
    }
    cmd.args(["--max-count", RG_PER_FILE_MAX_COUNT]);
    cmd.arg(query).arg(".");
    cmd.current_dir(base_dir).kill_on_drop(true);

    let output = match tokio::time::timeout(GREP_TIMEOUT, cmd.output()).await {
        Ok(Ok(output)) => output,
        // Spawn failure (rg missing) or timeout: fallback.
        Ok(Err(_)) | Err(_) => return None,
    };

    match output.status.code() {
        Some(0) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            Some(cap_matches(stdout.trim_end()))
        }
        Some(1) => Some("No matches found.".to_string()),
        _ => None,
    }
}

/// Applies the global match cap and its notice.
fn cap_matches(output: &str) -> String {
    if output.is_empty() {
        return "No matches found.".to_string();
    }
    let lines: Vec<&str> = output.lines().collect();
    if lines.len() > MAX_GREP_MATCHES {
        let mut capped = lines[..MAX_GREP_MATCHES].join("\n");
        capped.push_str(&format!(
            "\n... output capped at {MAX_GREP_MATCHES} matches ..."
        ));
        capped
    } else {
        output.to_string()
    }
}

fn compile_name_matcher(pattern: Option<&str>) -> Option<GlobMatcher> {
    pattern.and_then(|p| Glob::new(p).ok().map(|g| g.compile_matcher()))
}

/// In-process search with ripgrep internals.
///
/// Honors gitignore, skips hidden entries, bounds depth at
/// [`MAX_GREP_DEPTH`] and wall time at [`GREP_TIMEOUT`]; on deadline it
/// returns the matches found so far with a notice.
fn fallback_grep(
    query: &str,
    case_sensitive: bool,
    include_pattern: Option<&str>,
    exclude_pattern: Option<&str>,
    base_dir: &Path,
) -> String {
    let matcher = match RegexMatcherBuilder::new()
        .case_insensitive(!case_sensitive)
        .line_terminator(Some(b'\n'))
        .build(query)
    {
        Ok(m) => m,
        Err(e) => return format!("Invalid regex pattern: {e}"),
    };

    let include = compile_name_matcher(include_pattern);
    let exclude = compile_name_matcher(exclude_pattern);

    let deadline = Instant::now() + GREP_TIMEOUT;
    let mut matches: Vec<String> = Vec::new();
    let mut timed_out = false;

    let walker = WalkBuilder::new(base_dir)
        .hidden(true)
        .follow_links(false)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        .require_git(false)
        .max_depth(Some(MAX_GREP_DEPTH))
        .build();

    let mut searcher = Searcher::new();
    'walk: for entry in walker.flatten() {
        if Instant::now() > deadline {
            timed_out = true;
            break;
        }
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Some(include) = &include {
            if !include.is_match(&file_name) {
                continue;
            }
        }
        if let Some(exclude) = &exclude {
            if exclude.is_match(&file_name) {
                continue;
            }
        }

        let rel = path
            .strip_prefix(base_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        let sink_result = searcher.search_path(
            &matcher,
            path,
            UTF8(|line_number: u64, line: &str| {
                matches.push(format!("{rel}:{line_number}:{}", line.trim_end_matches('\n')));
                Ok(matches.len() < MAX_GREP_MATCHES)
            }),
        );
        if sink_result.is_err() {
            // Binary or unreadable file; skip it.
            continue;
        }
        if matches.len() >= MAX_GREP_MATCHES {
            break 'walk;
        }
    }

    if matches.is_empty() {
        return if timed_out {
            format!("Search timed out after {}s", GREP_TIMEOUT.as_secs())
        } else {
            "No matches found.".to_string()
        };
    }

    let mut result = matches.join("\n");
    if timed_out {
        result.push_str(&format!(
            "\n... search timed out, showing {} matches ...",
            matches.len()
        ));
    } else if matches.len() >= MAX_GREP_MATCHES {
        result.push_str(&format!(
            "\n... output capped at {MAX_GREP_MATCHES} matches ..."
        ));
    }
    result
}
