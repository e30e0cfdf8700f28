//! The agentic search loop.
//!
//! One session = up to `max_turns` rounds of: timeout check, turn hint,
//! context truncation, integrity repair, chat call, parallel tool
//! dispatch, ordered result append. The loop terminates on a solitary
//! `report_back` call; on turn/time exhaustion or any error it degrades
//! to a partial report built from the observed files.
//!
//! This function never returns `Err` to its caller.

use crate::config::Settings;
use crate::search::chat::{ChatApi, ChatMessage, ToolCall};
use crate::search::messages::{
    estimate_context_size, repair_tool_call_integrity, truncate_messages, MAX_TOTAL_CONTEXT_CHARS,
};
use crate::search::observed::ObservedFiles;
use crate::search::{prompts, schemas};
use crate::tools::{dispatch, ToolEnv, ToolReply};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

/// Concurrent tool executions per turn.
pub const TOOL_POOL_SIZE: usize = 6;

/// Final result of one search session.
#[derive(Debug, Clone, Serialize)]
pub struct SearchReport {
    pub query: String,
    pub explanation: String,
    /// Absolute path -> 1-indexed inclusive line ranges.
    pub files: BTreeMap<String, Vec<(u32, u32)>>,
    pub turns_used: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub trace_id: String,
}

/// Turn-bounded tool-calling orchestrator.
pub struct SearchHarness {
    settings: Arc<Settings>,
    chat: Arc<dyn ChatApi>,
    tools: ToolEnv,
    /// Optional semantic-hints block interpolated into the user prompt.
    semantic_hints: String,
}

impl SearchHarness {
    #[must_use]
    pub fn new(settings: Arc<Settings>, chat: Arc<dyn ChatApi>, tools: ToolEnv) -> Self {
        Self {
            settings,
            chat,
            tools,
            semantic_hints: String::new(),
        }
    }

    #[must_use]
    pub fn with_semantic_hints(mut self, hints: impl Into<String>) -> Self {
        self.semantic_hints = hints.into();
        self
    }

    /// Runs one search session. Never fails: errors surface inside the
    /// report with `partial = true`.
    pub async fn run(&self, query: &str) -> SearchReport {
        let trace_id = format!("{:08x}", rand::random::<u32>());
        self.run_with_trace(query, &trace_id).await
    }

    pub async fn run_with_trace(&self, query: &str, trace_id: &str) -> SearchReport {
        tracing::debug!("[{trace_id}] starting agentic search (query_len={})", query.len());
        let started = Instant::now();
        let mut observed = ObservedFiles::new(&self.settings.base_dir);

        match self
            .run_loop(query, trace_id, started, &mut observed)
            .await
        {
            Ok(report) => {
                tracing::debug!(
                    "[{trace_id}] search finished: {} file(s), {} turn(s), partial={}",
                    report.files.len(),
                    report.turns_used,
                    report.partial
                );
                report
            }
            Err(message) => {
                tracing::warn!("[{trace_id}] search failed: {message}");
                SearchReport {
                    query: query.to_string(),
                    explanation: format!("[ERROR] Search failed: {message}"),
                    files: observed.merged(),
                    turns_used: 0,
                    partial: true,
                    error: Some(message),
                    trace_id: trace_id.to_string(),
                }
            }
        }
    }

    async fn run_loop(
        &self,
        query: &str,
        trace_id: &str,
        started: Instant,
        observed: &mut ObservedFiles,
    ) -> Result<SearchReport, String> {
        let enabled = self.tools.enabled_tool_names();
        let tool_schemas = schemas::tool_schemas(&enabled, self.settings.search_strict_schemas);
        let max_turns = self.settings.search_max_turns;

        let mut messages = vec![
            ChatMessage::system(prompts::build_system_prompt(&enabled)),
            ChatMessage::user(prompts::build_user_prompt(query, &self.semantic_hints)),
        ];

        for turn in 0..max_turns {
            if started.elapsed() > self.settings.search_timeout {
                let files = observed.merged();
                let timeout_secs = self.settings.search_timeout.as_secs();
                return Ok(SearchReport {
                    query: query.to_string(),
                    explanation: format!(
                        "[PARTIAL] Search exceeded the {timeout_secs}s time budget. \
                         Returning {} observed files based on exploration.",
                        files.len()
                    ),
                    files,
                    turns_used: turn,
                    partial: true,
                    error: Some(format!("Search timed out after {timeout_secs}s")),
                    trace_id: trace_id.to_string(),
                });
            }

            if turn > 0 {
                let chars_used = estimate_context_size(&messages);
                messages.push(ChatMessage::user(prompts::build_turn_hint(
                    turn, max_turns, chars_used,
                )));
            }

            let ctx_size = estimate_context_size(&messages);
            if ctx_size > MAX_TOTAL_CONTEXT_CHARS {
                tracing::warn!(
                    "[{trace_id}] context size {ctx_size} exceeds {MAX_TOTAL_CONTEXT_CHARS}, truncating"
                );
                messages = truncate_messages(messages);
            }
            messages =
                repair_tool_call_integrity(messages, self.settings.history_repair, trace_id);

            let response = self
                .chat
                .chat(&messages, &tool_schemas, trace_id)
                .await
                .map_err(|e| e.to_string())?;
            let Some(choice) = response.choices.into_iter().next() else {
                return Err("Search API returned empty choices".to_string());
            };

            let mut message = choice.message;
            message.role = "assistant".to_string();
            let mut calls = message.tool_calls.take().unwrap_or_default();
            tracing::debug!(
                "[{trace_id}] turn {}/{max_turns}: {} tool call(s)",
                turn + 1,
                calls.len()
            );

            if calls.is_empty() {
                // Content-only turn; keep it and ask again.
                messages.push(ChatMessage::assistant(message.content.unwrap_or_default()));
                continue;
            }

            // report_back must arrive alone; strip it from mixed turns
            // and correct the model next turn.
            let mut mixed_report_back = false;
            if calls.len() > 1 && calls.iter().any(|c| c.function.name == "report_back") {
                tracing::warn!("[{trace_id}] report_back mixed with other tools, discarding it");
                calls.retain(|c| c.function.name != "report_back");
                mixed_report_back = true;
            }

            message.tool_calls = Some(calls.clone());
            messages.push(message);

            let (results, report) = self.execute_tools(&calls, observed).await;
            for (call, content) in calls.iter().zip(results) {
                messages.push(ChatMessage::tool(
                    call.id.clone(),
                    call.function.name.clone(),
                    content,
                ));
            }

            if mixed_report_back {
                messages.push(ChatMessage::user(prompts::MIXED_REPORT_BACK_HINT));
            }

            if let Some((explanation, files)) = report {
                return Ok(SearchReport {
                    query: query.to_string(),
                    explanation,
                    files: observed.normalize_report_files(&files),
                    turns_used: turn + 1,
                    partial: false,
                    error: None,
                    trace_id: trace_id.to_string(),
                });
            }
        }

        let files = observed.merged();
        tracing::warn!(
            "[{trace_id}] search did not complete within {max_turns} turns, returning partial results"
        );
        Ok(SearchReport {
            query: query.to_string(),
            explanation: format!(
                "[PARTIAL] Search did not complete within {max_turns} turns. \
                 Returning {} observed files based on exploration.",
                files.len()
            ),
            files,
            turns_used: max_turns,
            partial: true,
            error: None,
            trace_id: trace_id.to_string(),
        })
    }

    /// Executes one turn's tool calls concurrently (bounded by
    /// [`TOOL_POOL_SIZE`]) and returns the per-call message contents in
    /// the original `tool_calls` order, plus the first `report_back`
    /// payload if one was among them.
    async fn execute_tools(
        &self,
        calls: &[ToolCall],
        observed: &mut ObservedFiles,
    ) -> (Vec<String>, Option<(String, serde_json::Value)>) {
        let semaphore = Semaphore::new(TOOL_POOL_SIZE);

        let tasks = calls.iter().map(|call| {
            let env = self.tools.clone();
            let semaphore = &semaphore;
            let name = call.function.name.clone();
            let arguments = call.function.arguments.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                dispatch(&name, &arguments, &env).await
            }
        });
        // join_all preserves input order, which is the protocol order.
        let replies = futures::future::join_all(tasks).await;

        let mut report = None;
        let mut results = Vec::with_capacity(calls.len());
        for (call, reply) in calls.iter().zip(&replies) {
            match reply {
                ToolReply::Text(text) => {
                    let arguments: serde_json::Value =
                        serde_json::from_str(&call.function.arguments)
                            .unwrap_or(serde_json::Value::Null);
                    observed.record(&call.function.name, &arguments, text);
                }
                ToolReply::Report { explanation, files } => {
                    if report.is_none() {
                        report = Some((explanation.clone(), files.clone()));
                    }
                }
            }
            results.push(reply.message_content());
        }
        (results, report)
    }
}
