//! Message-history maintenance: context sizing, truncation, and
//! tool-call integrity repair.
//!
//! Providers reject histories where an assistant tool-call batch is not
//! immediately followed by its matching tool results. Truncation and
//! provider hiccups both produce such histories, so every chat call is
//! preceded by a repair pass.

use crate::config::HistoryRepair;
use crate::search::chat::ChatMessage;

/// Character budget the turn hint reports progress against.
pub const MAX_CONTEXT_BUDGET_CHARS: usize = 200_000;
/// Hard ceiling; exceeding it triggers truncation of old messages.
pub const MAX_TOTAL_CONTEXT_CHARS: usize = 400_000;
/// Messages kept from the tail during truncation.
const KEEP_RECENT_MESSAGES: usize = 6;

/// Sum of content and tool-call argument lengths across the history.
#[must_use]
pub fn estimate_context_size(messages: &[ChatMessage]) -> usize {
    messages.iter().map(ChatMessage::estimated_chars).sum()
}

/// Truncates an oversized history.
///
/// Keeps the system prompt and the first user message, then the last
/// [`KEEP_RECENT_MESSAGES`] messages. Tool messages left at the head of
/// the tail lost their parent assistant call to truncation and are
/// dropped; a subsequent repair pass restores the pairing invariant for
/// everything kept.
#[must_use]
pub fn truncate_messages(messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    if messages.len() <= 2 + KEEP_RECENT_MESSAGES {
        return messages;
    }

    let tail_start = messages.len() - KEEP_RECENT_MESSAGES;
    let mut result: Vec<ChatMessage> = messages[..2].to_vec();

    let mut tail: &[ChatMessage] = &messages[tail_start..];
    while let Some(first) = tail.first() {
        if first.role == "tool" {
            tail = &tail[1..];
        } else {
            break;
        }
    }
    result.extend_from_slice(tail);
    result
}

/// Restores the pairing invariant: every assistant message carrying
/// `tool_calls = [c1..ck]` is immediately followed by exactly k tool
/// messages with matching ids in order.
///
/// Under [`HistoryRepair::Synthesize`] missing results are filled with
/// `(skipped)` placeholders; under [`HistoryRepair::Drop`] the dangling
/// assistant message (and any partial results) is removed. Orphaned
/// tool messages are dropped in both modes.
#[must_use]
pub fn repair_tool_call_integrity(
    messages: Vec<ChatMessage>,
    mode: HistoryRepair,
    trace_id: &str,
) -> Vec<ChatMessage> {
    let mut repaired: Vec<ChatMessage> = Vec::with_capacity(messages.len());
    let mut index = 0;

    while index < messages.len() {
        let message = &messages[index];

        if message.role == "tool" {
            // Reached only when not consumed by an assistant batch below.
            tracing::debug!("[{trace_id}] dropping orphaned tool message");
            index += 1;
            continue;
        }

        let Some(calls) = message.tool_calls.as_ref().filter(|c| !c.is_empty()) else {
            repaired.push(message.clone());
            index += 1;
            continue;
        };

        // Count the correctly-paired prefix of tool results.
        let mut matched = 0;
        while matched < calls.len() {
            let Some(next) = messages.get(index + 1 + matched) else {
                break;
            };
            if next.role == "tool" && next.tool_call_id.as_deref() == Some(calls[matched].id.as_str())
            {
                matched += 1;
            } else {
                break;
            }
        }

        if matched == calls.len() {
            repaired.extend_from_slice(&messages[index..=index + matched]);
        } else {
            match mode {
                HistoryRepair::Synthesize => {
                    tracing::debug!(
                        "[{trace_id}] synthesizing {} placeholder tool result(s)",
                        calls.len() - matched
                    );
                    repaired.push(message.clone());
                    repaired.extend_from_slice(&messages[index + 1..=index + matched]);
                    for call in &calls[matched..] {
                        repaired.push(ChatMessage::tool(
                            call.id.clone(),
                            call.function.name.clone(),
                            "(skipped)",
                        ));
                    }
                }
                HistoryRepair::Drop => {
                    tracing::debug!(
                        "[{trace_id}] dropping assistant message with dangling tool calls"
                    );
                }
            }
        }
        index += 1 + matched;
    }

    repaired
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::chat::ToolCall;

    fn assistant_with_calls(ids: &[&str]) -> ChatMessage {
        let mut msg = ChatMessage::assistant("");
        msg.tool_calls = Some(
            ids.iter()
                .map(|id| ToolCall::new(*id, "view_file", "{}"))
                .collect(),
        );
        msg
    }

    fn roles(messages: &[ChatMessage]) -> Vec<&str> {
        messages.iter().map(|m| m.role.as_str()).collect()
    }

    #[test]
    fn test_estimate_and_truncate_small_history() {
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("hello")];
        assert_eq!(estimate_context_size(&messages), 8);
        assert_eq!(truncate_messages(messages.clone()).len(), 2);
    }

    #[test]
    fn test_truncate_keeps_head_and_tail() {
        let mut messages = vec![ChatMessage::system("sys"), ChatMessage::user("query")];
        for i in 0..20 {
            messages.push(ChatMessage::assistant(format!("turn {i}")));
        }

        let truncated = truncate_messages(messages);
        assert_eq!(truncated.len(), 8);
        assert_eq!(truncated[0].content.as_deref(), Some("sys"));
        assert_eq!(truncated[1].content.as_deref(), Some("query"));
        assert_eq!(truncated[7].content.as_deref(), Some("turn 19"));
    }

    #[test]
    fn test_truncate_drops_orphaned_tail_tools() {
        let mut messages = vec![ChatMessage::system("sys"), ChatMessage::user("query")];
        for i in 0..10 {
            messages.push(ChatMessage::assistant(format!("turn {i}")));
        }
        // The tail begins with tool results whose assistant is being cut.
        messages.push(ChatMessage::tool("c1", "view_file", "result 1"));
        messages.push(ChatMessage::tool("c2", "view_file", "result 2"));
        for i in 0..4 {
            messages.push(ChatMessage::assistant(format!("late {i}")));
        }

        let truncated = truncate_messages(messages);
        assert!(truncated.iter().all(|m| m.role != "tool"));
    }

    #[test]
    fn test_repair_noop_on_valid_history() {
        let messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::user("query"),
            assistant_with_calls(&["c1", "c2"]),
            ChatMessage::tool("c1", "view_file", "one"),
            ChatMessage::tool("c2", "view_file", "two"),
        ];
        let repaired = repair_tool_call_integrity(messages.clone(), HistoryRepair::Synthesize, "t");
        assert_eq!(roles(&repaired), roles(&messages));
    }

    #[test]
    fn test_repair_synthesizes_missing_results() {
        let messages = vec![
            ChatMessage::system("sys"),
            assistant_with_calls(&["c1", "c2"]),
            ChatMessage::tool("c1", "view_file", "one"),
            ChatMessage::user("next"),
        ];
        let repaired = repair_tool_call_integrity(messages, HistoryRepair::Synthesize, "t");
        assert_eq!(roles(&repaired), vec!["system", "assistant", "tool", "tool", "user"]);
        assert_eq!(repaired[3].tool_call_id.as_deref(), Some("c2"));
        assert_eq!(repaired[3].content.as_deref(), Some("(skipped)"));
    }

    #[test]
    fn test_repair_drop_mode_removes_dangling_assistant() {
        let messages = vec![
            ChatMessage::system("sys"),
            assistant_with_calls(&["c1"]),
            ChatMessage::user("next"),
        ];
        let repaired = repair_tool_call_integrity(messages, HistoryRepair::Drop, "t");
        assert_eq!(roles(&repaired), vec!["system", "user"]);
    }

    #[test]
    fn test_repair_drops_orphaned_tool_messages() {
        let messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::tool("zombie", "grep_search", "stale"),
            ChatMessage::user("query"),
        ];
        let repaired = repair_tool_call_integrity(messages, HistoryRepair::Synthesize, "t");
        assert_eq!(roles(&repaired), vec!["system", "user"]);
    }

    #[test]
    fn test_repair_mismatched_id_is_replaced() {
        let messages = vec![
            assistant_with_calls(&["c1"]),
            ChatMessage::tool("wrong", "view_file", "res"),
        ];
        let repaired = repair_tool_call_integrity(messages, HistoryRepair::Synthesize, "t");
        // The mismatched result is orphaned and a placeholder takes its slot.
        assert_eq!(roles(&repaired), vec!["assistant", "tool"]);
        assert_eq!(repaired[1].tool_call_id.as_deref(), Some("c1"));
    }
}
