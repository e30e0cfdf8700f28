//! Prompt templates for the search agent.

use crate::search::messages::MAX_CONTEXT_BUDGET_CHARS;

const SYSTEM_PROMPT_HEADER: &str = "\
You are a code search agent operating on a repository mounted at /repo.
Your job is to locate the code relevant to the user's query using the
available exploration tools, then finalize with a single report_back
call.

Rules:
- All paths you pass to tools must be absolute under /repo (e.g. /repo/src/main.rs).
- Explore breadth-first: directory listings and grep before deep file reads.
- Batch independent tool calls in one turn; they run in parallel.
- report_back must be the ONLY tool call in its turn. Its `files` map
  lists each relevant file with 1-indexed inclusive [start, end] line
  ranges.
- Never invent paths or line numbers you have not observed.";

/// Correction appended after a turn that mixed `report_back` with other
/// tools.
pub const MIXED_REPORT_BACK_HINT: &str = "Your previous turn mixed report_back with other tools, \
so report_back was discarded. If you are done exploring, call report_back ALONE as the ONLY tool \
in your next turn.";

/// Builds the static system prompt, enumerating the enabled tools.
#[must_use]
pub fn build_system_prompt(enabled_tools: &[&str]) -> String {
    let mut prompt = String::from(SYSTEM_PROMPT_HEADER);
    prompt.push_str("\n\nEnabled tools: ");
    prompt.push_str(&enabled_tools.join(", "));
    if enabled_tools.contains(&"bash") {
        prompt.push_str(
            "\nThe bash tool is read-only and sandboxed to /repo; pipes, redirects and \
             state-changing commands are rejected.",
        );
    }
    if enabled_tools.contains(&"find_symbol") {
        prompt.push_str(
            "\nLSP tools report 1-indexed line/column positions taken directly from the \
             language server.",
        );
    }
    prompt
}

/// Builds the first user message from the query and an optional
/// semantic-hints block supplied by the retrieval integration.
#[must_use]
pub fn build_user_prompt(query: &str, semantic_hints_section: &str) -> String {
    let mut prompt = format!(
        "Find the code relevant to this request and report the exact files and line ranges:\n\n{query}"
    );
    if !semantic_hints_section.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(semantic_hints_section);
    }
    prompt
}

/// Per-turn status hint injected from turn 2 on.
///
/// `turn` is 0-indexed internally and displayed 1-indexed. The final
/// turn carries an urgency instruction instead of the normal one.
#[must_use]
pub fn build_turn_hint(turn: u32, max_turns: u32, chars_used: usize) -> String {
    let remaining = max_turns - turn;
    let instruction = if remaining == 1 {
        "This is your FINAL turn. Call report_back NOW with everything you have observed."
    } else {
        "Continue exploring, or call report_back alone when you have enough evidence."
    };
    let chars_pct = (chars_used * 100) / MAX_CONTEXT_BUDGET_CHARS;
    format!(
        "[turn {}/{max_turns}, context {chars_pct}% used] {instruction}",
        turn + 1
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_lists_tools() {
        let prompt = build_system_prompt(&["view_file", "grep_search", "report_back"]);
        assert!(prompt.contains("view_file, grep_search, report_back"));
        assert!(!prompt.contains("bash tool"));

        let prompt = build_system_prompt(&["view_file", "bash", "report_back"]);
        assert!(prompt.contains("bash tool is read-only"));
    }

    #[test]
    fn test_turn_hint_final_urgency() {
        let hint = build_turn_hint(1, 6, 20_000);
        assert!(hint.starts_with("[turn 2/6, context 10% used]"));
        assert!(!hint.contains("FINAL"));

        let hint = build_turn_hint(5, 6, 100_000);
        assert!(hint.contains("FINAL"));
    }

    #[test]
    fn test_user_prompt_with_hints() {
        let prompt = build_user_prompt("where is auth?", "Semantic hints:\n- src/auth.rs");
        assert!(prompt.contains("where is auth?"));
        assert!(prompt.contains("Semantic hints"));
    }
}
