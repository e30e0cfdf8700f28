//! Edit-snippet classification and prechecks.
//!
//! A snippet mixes three kinds of lines: *placeholders* (`// ...` /
//! `# ...`, meaning "unchanged code elided"), *remove directives*
//! (`// remove Ident` / `# remove Ident`), and *anchor lines* (everything
//! else). Anchors position the edit; the prechecks here reject snippets
//! the remote merge could only misplace.

use regex::Regex;

/// Minimum stripped length for a line to count as an anchor hit.
const MIN_ANCHOR_LENGTH: usize = 10;
/// Anchor hits required for the precheck to pass.
const MIN_ANCHOR_HITS: usize = 2;
/// A single anchor this long is distinctive enough on its own.
const MIN_SINGLE_ANCHOR_LENGTH: usize = 20;
/// Minimum stripped length for the expects-changes heuristic.
const MIN_NEW_LINE_LENGTH: usize = 5;
/// Minimum stripped length for post-check new-line verification.
const MIN_POST_CHECK_LINE_LENGTH: usize = 15;
/// Share of new lines that must appear in the merged code.
const MIN_NEW_LINE_PASS_RATIO: f64 = 0.6;

const REMOVE_DIRECTIVE_PREFIXES: [&str; 2] = ["// remove ", "# remove "];

/// Instruction phrases that pin the edit position and make the anchor
/// precheck unnecessary.
const POSITION_DIRECTIVES: [&str; 6] = [
    "append to end of file",
    "prepend to start of file",
    "add to end of file",
    "add to start of file",
    "insert at the beginning",
    "insert at the end",
];

/// Lines too common to carry any signal about intended changes.
const TRIVIAL_TOKENS: [&str; 26] = [
    "}",
    "{",
    "]",
    "[",
    ")",
    "(",
    "pass",
    "break",
    "continue",
    "return",
    "else:",
    "try:",
    "except:",
    "finally:",
    "raise",
    "yield",
    "return;",
    "break;",
    "continue;",
    "default:",
    "return null",
    "return null;",
    "return true",
    "return true;",
    "return false",
    "return false;",
];

/// True for blank lines and `// ...` / `# ...` elision markers.
///
/// `// remove X` is a directive, not a placeholder.
#[must_use]
pub fn is_placeholder(line: &str) -> bool {
    let s = line.trim();
    if s.is_empty() {
        return true;
    }
    let lower = s.to_lowercase();
    lower.starts_with("// ...") || lower.starts_with("# ...")
}

fn is_remove_directive(line: &str) -> bool {
    let s = line.trim();
    REMOVE_DIRECTIVE_PREFIXES.iter().any(|p| s.starts_with(p))
}

fn is_trivial_line(line: &str) -> bool {
    TRIVIAL_TOKENS.contains(&line)
}

/// Non-placeholder lines of the snippet (remove directives included).
#[must_use]
pub fn concrete_lines(text: &str) -> Vec<&str> {
    text.lines().filter(|l| !is_placeholder(l)).collect()
}

/// Whether the anchor precheck applies.
///
/// Every edit of an existing file is prechecked; only an instruction
/// carrying an explicit position directive may skip it.
#[must_use]
pub fn should_run_anchor_precheck(instruction: Option<&str>) -> bool {
    let Some(instruction) = instruction else {
        return true;
    };
    let lower = instruction.to_lowercase();
    !POSITION_DIRECTIVES.iter().any(|d| lower.contains(d))
}

/// Checks that enough anchor lines locate inside the file.
///
/// Comparison is on stripped lines to tolerate indentation drift.
/// Passes with 2+ hits of length >= 10, or a single hit of length >= 20.
#[must_use]
pub fn anchor_precheck(concrete: &[&str], initial_code: &str) -> bool {
    let anchors: Vec<&str> = concrete
        .iter()
        .copied()
        .filter(|l| !is_remove_directive(l))
        .collect();
    if anchors.is_empty() {
        return false;
    }

    let mut hits = 0usize;
    for line in &anchors {
        let stripped = line.trim();
        if stripped.len() >= MIN_ANCHOR_LENGTH && contains_stripped_line(initial_code, stripped) {
            hits += 1;
            if hits >= MIN_ANCHOR_HITS {
                return true;
            }
        }
    }

    if hits == 1 {
        for line in &anchors {
            let stripped = line.trim();
            if stripped.len() >= MIN_SINGLE_ANCHOR_LENGTH
                && contains_stripped_line(initial_code, stripped)
            {
                return true;
            }
        }
    }
    false
}

fn contains_stripped_line(code: &str, needle: &str) -> bool {
    code.lines().any(|l| l.trim() == needle)
}

/// Distinguishes "already matches (idempotent)" from "merge failed to
/// apply": true when the snippet carries a remove directive or at least
/// one distinctive line absent from the file.
#[must_use]
pub fn expects_changes(edit_snippet: &str, initial_code: &str) -> bool {
    let concrete = concrete_lines(edit_snippet);

    if concrete.iter().any(|l| is_remove_directive(l)) {
        return true;
    }

    let initial_lines: std::collections::HashSet<&str> =
        initial_code.lines().map(str::trim).collect();

    concrete.iter().any(|line| {
        let stripped = line.trim();
        !stripped.is_empty()
            && !is_remove_directive(stripped)
            && stripped.len() >= MIN_NEW_LINE_LENGTH
            && !is_trivial_line(stripped)
            && !initial_lines.contains(stripped)
    })
}

/// Identifiers named by `// remove X` / `# remove X` directives.
#[must_use]
pub fn remove_targets(edit_snippet: &str) -> Vec<String> {
    let mut targets = Vec::new();
    for line in edit_snippet.lines() {
        let stripped = line.trim();
        for prefix in REMOVE_DIRECTIVE_PREFIXES {
            if let Some(rest) = stripped.strip_prefix(prefix) {
                let ident = rest.trim();
                if !ident.is_empty() {
                    targets.push(ident.to_string());
                }
                break;
            }
        }
    }
    targets
}

/// Snippet lines that should newly appear in the merged code.
fn new_lines<'a>(edit_snippet: &'a str, initial_code: &str) -> Vec<&'a str> {
    let initial_lines: std::collections::HashSet<&str> =
        initial_code.lines().map(str::trim).collect();

    concrete_lines(edit_snippet)
        .into_iter()
        .map(str::trim)
        .filter(|s| {
            !s.is_empty()
                && !is_remove_directive(s)
                && s.len() >= MIN_POST_CHECK_LINE_LENGTH
                && !is_trivial_line(s)
                && !initial_lines.contains(s)
        })
        .collect()
}

/// Verifies the merged code against the snippet's visible intent.
///
/// Remove targets must be gone (word-boundary match); at least 60% of
/// the snippet's new lines must appear in the merged code (some
/// reformatting is tolerated).
///
/// # Errors
///
/// Returns a human-readable reason on the first violated rule.
pub fn post_check_merged_code(
    edit_snippet: &str,
    merged_code: &str,
    initial_code: &str,
) -> Result<(), String> {
    for target in remove_targets(edit_snippet) {
        let pattern = format!(r"\b{}\b", regex::escape(&target));
        if Regex::new(&pattern)
            .map(|re| re.is_match(merged_code))
            .unwrap_or(false)
        {
            return Err(format!(
                "Remove target '{target}' still exists in merged code."
            ));
        }
    }

    let new_lines = new_lines(edit_snippet, initial_code);
    if !new_lines.is_empty() {
        let found = new_lines
            .iter()
            .filter(|l| merged_code.contains(**l))
            .count();
        #[allow(clippy::cast_precision_loss)]
        let ratio = found as f64 / new_lines.len() as f64;
        if ratio < MIN_NEW_LINE_PASS_RATIO {
            let missing = new_lines
                .iter()
                .find(|l| !merged_code.contains(**l))
                .map(|l| l.chars().take(50).collect::<String>())
                .unwrap_or_default();
            return Err(format!(
                "Only {found}/{} new lines found in merged code. Missing: '{missing}...'",
                new_lines.len()
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_detection() {
        assert!(is_placeholder("// ... existing code ..."));
        assert!(is_placeholder("  # ... rest unchanged"));
        assert!(is_placeholder(""));
        assert!(is_placeholder("   "));
        assert!(!is_placeholder("// remove Block"));
        assert!(!is_placeholder("let x = 1;"));
        assert!(!is_placeholder("// comment"));
    }

    #[test]
    fn test_concrete_lines() {
        let snippet = "// ... existing code ...\nfn hello() {}\n\n# ...\n// remove OldFn\n";
        assert_eq!(concrete_lines(snippet), vec!["fn hello() {}", "// remove OldFn"]);
    }

    #[test]
    fn test_precheck_skip_on_position_directive() {
        assert!(should_run_anchor_precheck(None));
        assert!(should_run_anchor_precheck(Some("rename the helper")));
        assert!(!should_run_anchor_precheck(Some("Append to end of file")));
        assert!(!should_run_anchor_precheck(Some(
            "please insert at the beginning of the module"
        )));
    }

    #[test]
    fn test_anchor_precheck_two_hits() {
        let code = "def hello():\n    print('Hello')\n\ndef goodbye():\n    print('Goodbye')\n";
        let concrete = vec!["def hello():", "    print('Hello')", "    print('changed')"];
        assert!(anchor_precheck(&concrete, code));
    }

    #[test]
    fn test_anchor_precheck_single_long_hit() {
        let code = "fn compute_checksum_for_block(data: &[u8]) -> u64 {\n    0\n}\n";
        let concrete = vec!["fn compute_checksum_for_block(data: &[u8]) -> u64 {", "    1"];
        assert!(anchor_precheck(&concrete, code));
    }

    #[test]
    fn test_anchor_precheck_misses() {
        let code = "fn alpha() {}\nfn beta() {}\n";
        // Unrelated snippet: no stripped-equal lines in the file.
        let concrete = vec!["def totally_different():", "    return 999"];
        assert!(!anchor_precheck(&concrete, code));
        // Only short hits never satisfy the precheck.
        let concrete = vec!["}", "return"];
        assert!(!anchor_precheck(&concrete, code));
        // Directive-only snippets have no anchors at all.
        let concrete = vec!["// remove alpha"];
        assert!(!anchor_precheck(&concrete, code));
    }

    #[test]
    fn test_expects_changes() {
        let code = "fn hello() {\n    println!(\"hi\");\n}\n";
        // Snippet equal to existing content: idempotent.
        assert!(!expects_changes("fn hello() {\n    println!(\"hi\");\n}\n", code));
        // New distinctive line.
        assert!(expects_changes("fn hello() {\n    println!(\"bye\");\n}\n", code));
        // Remove directive always expects changes.
        assert!(expects_changes("// remove hello\n", code));
        // Trivial additions carry no signal.
        assert!(!expects_changes("}\nreturn;\n", code));
    }

    #[test]
    fn test_remove_targets() {
        let snippet = "// remove OldHelper\n# remove legacy_fn\n// ... rest ...\n";
        assert_eq!(remove_targets(snippet), vec!["OldHelper", "legacy_fn"]);
    }

    #[test]
    fn test_post_check_remove_target_still_present() {
        let snippet = "// remove OldHelper\n";
        let merged = "fn OldHelper() {}\n";
        let err = post_check_merged_code(snippet, merged, "").unwrap_err();
        assert!(err.contains("OldHelper"));
        // Word boundary: OldHelperEx does not count as OldHelper.
        assert!(post_check_merged_code(snippet, "fn OldHelperEx() {}\n", "").is_ok());
    }

    #[test]
    fn test_post_check_new_line_ratio() {
        let initial = "fn main() {}\n";
        let snippet = "let configured_value = load_configuration();\nlet other_value = compute_from_scratch();\n";
        // Neither new line present: 0% < 60%.
        assert!(post_check_merged_code(snippet, "fn main() {}\n", initial).is_err());
        // Both present: passes.
        let merged = "let configured_value = load_configuration();\nlet other_value = compute_from_scratch();\nfn main() {}\n";
        assert!(post_check_merged_code(snippet, merged, initial).is_ok());
    }
}
