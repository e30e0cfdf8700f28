//! Observed-files accounting.
//!
//! While the agent explores, every successful `view_file` and
//! `grep_search` result is mined for file/line evidence. If the agent
//! never finalizes with `report_back`, this evidence becomes the
//! partial report; when it does finalize, the same machinery normalizes
//! the reported paths and ranges.

use crate::sandbox::{resolve_repo_path, ResolveOptions};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Coalesced range cap per file.
pub const MAX_RANGES_PER_FILE: usize = 20;
/// File cap in the final map (most-observed first).
pub const MAX_OBSERVED_FILES: usize = 50;

/// Line ranges observed per absolute file path.
#[derive(Debug, Default)]
pub struct ObservedFiles {
    base_dir: PathBuf,
    files: HashMap<String, Vec<(u32, u32)>>,
}

impl ObservedFiles {
    #[must_use]
    pub fn new(base_dir: &Path) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            files: HashMap::new(),
        }
    }

    /// Records evidence from one finished tool call.
    pub fn record(&mut self, name: &str, arguments: &serde_json::Value, result: &str) {
        if result.starts_with("Error:") {
            return;
        }
        match name {
            "view_file" => {
                let Some(path) = arguments.get("path").and_then(|v| v.as_str()) else {
                    return;
                };
                let Some(abs) = self.normalize_view_path(path) else {
                    return;
                };
                if let Some(range) = extract_view_range(result) {
                    self.files.entry(abs).or_default().push(range);
                }
            }
            "grep_search" => self.record_grep(result),
            _ => {}
        }
    }

    /// Parses grep output lines (`path:line:content`) and records a
    /// single-line range per match.
    fn record_grep(&mut self, output: &str) {
        for line in output.lines() {
            if line.is_empty() {
                continue;
            }
            let Some((rel_path, line_number)) = parse_grep_line(line) else {
                continue;
            };
            let rel_path = rel_path.strip_prefix("./").unwrap_or(rel_path);
            // Anything escaping base_dir is silently dropped.
            let Some(abs) = self.to_absolute(rel_path) else {
                continue;
            };
            self.files
                .entry(abs)
                .or_default()
                .push((line_number, line_number));
        }
    }

    /// Coalesces and caps everything observed so far.
    #[must_use]
    pub fn merged(&self) -> BTreeMap<String, Vec<(u32, u32)>> {
        let mut entries: Vec<(&String, &Vec<(u32, u32)>)> = self
            .files
            .iter()
            .filter(|(_, ranges)| !ranges.is_empty())
            .collect();
        // Most-observed files first; ties broken by path for determinism.
        entries.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(b.0)));
        entries.truncate(MAX_OBSERVED_FILES);

        entries
            .into_iter()
            .map(|(path, ranges)| (path.clone(), coalesce_ranges(ranges)))
            .collect()
    }

    /// Normalizes a `report_back` files payload: resolve each path to an
    /// absolute path inside `base_dir`, keep only well-formed positive
    /// ranges, coalesce per file.
    #[must_use]
    pub fn normalize_report_files(
        &self,
        files: &serde_json::Value,
    ) -> BTreeMap<String, Vec<(u32, u32)>> {
        let Some(map) = files.as_object() else {
            return BTreeMap::new();
        };

        let mut normalized: HashMap<String, Vec<(u32, u32)>> = HashMap::new();
        for (path, raw_ranges) in map {
            let Some(abs) = self.to_absolute(path) else {
                tracing::warn!("Filtered out invalid path from report_back: {path}");
                continue;
            };
            let ranges = parse_ranges(raw_ranges);
            if ranges.is_empty() {
                continue;
            }
            normalized.entry(abs).or_default().extend(ranges);
        }

        normalized
            .into_iter()
            .map(|(path, ranges)| (path, coalesce_ranges(&ranges)))
            .collect()
    }

    /// `/repo`-prefixed view paths only; anything else is not model-visible.
    fn normalize_view_path(&self, path: &str) -> Option<String> {
        if !path.starts_with("/repo") {
            return None;
        }
        resolve_repo_path(path, &self.base_dir, ResolveOptions::repo_only())
            .ok()
            .map(|p| p.display().to_string())
    }

    fn to_absolute(&self, path: &str) -> Option<String> {
        resolve_repo_path(path, &self.base_dir, ResolveOptions::contained())
            .ok()
            .map(|p| p.display().to_string())
    }
}

/// Extracts `[first, last]` from `view_file` output lines shaped
/// `"<n> <content>"`. `None` when no numbered lines are present (e.g. a
/// fully out-of-range view).
fn extract_view_range(output: &str) -> Option<(u32, u32)> {
    let mut first: Option<u32> = None;
    let mut last: Option<u32> = None;
    for line in output.lines() {
        let digits: String = line.chars().take_while(char::is_ascii_digit).collect();
        if digits.is_empty() || !line[digits.len()..].starts_with(' ') {
            continue;
        }
        let Ok(number) = digits.parse::<u32>() else {
            continue;
        };
        if first.is_none() {
            first = Some(number);
        }
        last = Some(number);
    }
    Some((first?, last?))
}

/// Splits a grep output line at its `:digits:` column, scanning from the
/// right so filenames containing `:` parse correctly.
fn parse_grep_line(line: &str) -> Option<(&str, u32)> {
    let mut search_end = line.len();
    loop {
        let colon = line[..search_end].rfind(':')?;
        if colon == 0 {
            return None;
        }
        let prev = line[..colon].rfind(':')?;
        let candidate = &line[prev + 1..colon];
        if !candidate.is_empty() && candidate.bytes().all(|b| b.is_ascii_digit()) {
            let number = candidate.parse().ok()?;
            return Some((&line[..prev], number));
        }
        search_end = colon;
    }
}

fn parse_ranges(raw: &serde_json::Value) -> Vec<(u32, u32)> {
    let Some(list) = raw.as_array() else {
        return Vec::new();
    };
    list.iter()
        .filter_map(|pair| {
            let pair = pair.as_array()?;
            if pair.len() != 2 {
                return None;
            }
            let start = pair[0].as_i64()?;
            let end = pair[1].as_i64()?;
            if start > 0 && end >= start {
                Some((u32::try_from(start).ok()?, u32::try_from(end).ok()?))
            } else {
                None
            }
        })
        .collect()
}

/// Sorts and merges ranges that overlap or sit within one line of each
/// other, capping the result at [`MAX_RANGES_PER_FILE`].
fn coalesce_ranges(ranges: &[(u32, u32)]) -> Vec<(u32, u32)> {
    let mut sorted: Vec<(u32, u32)> = ranges.to_vec();
    sorted.sort_unstable();

    let mut merged: Vec<(u32, u32)> = Vec::new();
    for (start, end) in sorted {
        match merged.last_mut() {
            Some(last) if start <= last.1.saturating_add(2) => {
                last.1 = last.1.max(end);
            }
            _ => merged.push((start, end)),
        }
    }
    merged.truncate(MAX_RANGES_PER_FILE);
    merged
}
