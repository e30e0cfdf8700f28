//! Sandboxed exploration tools and their dispatch registry.
//!
//! Tool handlers never raise: every failure comes back as an
//! `"Error: ..."` text result that the harness appends like any other
//! tool output, leaving the next step to the model. Filesystem-bound
//! handlers run on the blocking pool so they cannot stall the async
//! harness loop.

pub mod glob;
pub mod grep;
pub mod lsp;
pub mod view_directory;
pub mod view_file;

use crate::config::Settings;
use crate::sandbox::shell;
use lsp::LspBridge;
use serde::Deserialize;
use std::sync::Arc;

/// Per-result character cap before a result enters the message history.
pub const MAX_TOOL_RESULT_CHARS: usize = 50_000;

/// Everything a tool needs at execution time.
#[derive(Clone)]
pub struct ToolEnv {
    pub settings: Arc<Settings>,
    pub lsp: Option<Arc<dyn LspBridge>>,
}

impl ToolEnv {
    #[must_use]
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            settings,
            lsp: None,
        }
    }

    #[must_use]
    pub fn with_lsp(mut self, bridge: Arc<dyn LspBridge>) -> Self {
        self.lsp = Some(bridge);
        self
    }

    /// Tool names exposed to the model: the registry intersected with
    /// the configured allowlist, feature flags, and LSP availability.
    /// `report_back` is always present.
    #[must_use]
    pub fn enabled_tool_names(&self) -> Vec<&'static str> {
        let mut names = vec!["view_file", "view_directory", "grep_search", "glob"];
        if self.settings.search_bash_tools {
            names.push("bash");
        }
        if self.settings.search_lsp_tools {
            if let Some(bridge) = &self.lsp {
                if !bridge.available_languages().is_empty() {
                    names.extend([
                        "find_symbol",
                        "search_symbol",
                        "list_symbols",
                        "get_type",
                        "call_graph",
                    ]);
                }
            }
        }
        if let Some(allowlist) = &self.settings.search_tool_allowlist {
            names.retain(|name| allowlist.iter().any(|allowed| allowed == name));
        }
        names.push("report_back");
        names
    }
}

/// Outcome of one tool call.
#[derive(Debug, Clone)]
pub enum ToolReply {
    /// Plain text appended to the conversation.
    Text(String),
    /// Structured payload from the terminal `report_back` tool.
    Report {
        explanation: String,
        files: serde_json::Value,
    },
}

impl ToolReply {
    /// The string that goes into the `tool` message for this call.
    #[must_use]
    pub fn message_content(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Report { .. } => "Report received.".to_string(),
        }
    }
}

/// Truncates an oversized tool result, noting original and shown sizes.
#[must_use]
pub fn truncate_for_context(text: String, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text;
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push_str(&format!(
        "\n... [truncated] ({total} chars total, showing {max_chars})"
    ));
    truncated
}

// ─── Argument shapes ─────────────────────────────────────────────────────────

const fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
struct ViewFileArgs {
    path: String,
    view_range: Option<Vec<i64>>,
}

#[derive(Deserialize)]
struct ViewDirectoryArgs {
    path: String,
    #[serde(default)]
    include_hidden: bool,
}

#[derive(Deserialize)]
struct GrepArgs {
    query: String,
    #[serde(default = "default_true")]
    case_sensitive: bool,
    include_pattern: Option<String>,
    exclude_pattern: Option<String>,
}

#[derive(Deserialize)]
struct GlobArgs {
    pattern: String,
    path: Option<String>,
    #[serde(default)]
    include_hidden: bool,
    max_results: Option<usize>,
}

#[derive(Deserialize)]
struct BashArgs {
    command: String,
}

#[derive(Deserialize)]
struct ReportBackArgs {
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    files: serde_json::Value,
}

#[derive(Deserialize)]
struct SymbolAtArgs {
    path: String,
    line: u32,
    column: u32,
}

#[derive(Deserialize)]
struct SearchSymbolArgs {
    name: String,
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct ListSymbolsArgs {
    path: String,
}

#[derive(Deserialize)]
struct CallGraphArgs {
    path: String,
    line: u32,
    column: u32,
    depth: Option<u32>,
}

// ─── Dispatch ────────────────────────────────────────────────────────────────

fn parse_args<T: serde::de::DeserializeOwned>(arguments: &str) -> Result<T, String> {
    serde_json::from_str(arguments).map_err(|e| format!("Error: invalid tool arguments: {e}"))
}

/// Executes one tool call by function name.
///
/// Unknown names and malformed argument JSON become error *results*,
/// never panics or `Err`s.
pub async fn dispatch(name: &str, arguments: &str, env: &ToolEnv) -> ToolReply {
    match name {
        "view_file" => {
            let args: ViewFileArgs = match parse_args(arguments) {
                Ok(args) => args,
                Err(e) => return ToolReply::Text(e),
            };
            let settings = Arc::clone(&env.settings);
            run_blocking(move || {
                let range = args.view_range.unwrap_or_default();
                view_file::view_file_handler(&args.path, &range, &settings)
            })
            .await
        }
        "view_directory" => {
            let args: ViewDirectoryArgs = match parse_args(arguments) {
                Ok(args) => args,
                Err(e) => return ToolReply::Text(e),
            };
            let settings = Arc::clone(&env.settings);
            run_blocking(move || {
                view_directory::view_directory_handler(&args.path, args.include_hidden, &settings)
            })
            .await
        }
        "grep_search" => {
            let args: GrepArgs = match parse_args(arguments) {
                Ok(args) => args,
                Err(e) => return ToolReply::Text(e),
            };
            let output = grep::grep_search_handler(
                &args.query,
                args.case_sensitive,
                args.include_pattern.as_deref(),
                args.exclude_pattern.as_deref(),
                &env.settings,
            )
            .await;
            ToolReply::Text(truncate_for_context(output, MAX_TOOL_RESULT_CHARS))
        }
        "glob" => {
            let args: GlobArgs = match parse_args(arguments) {
                Ok(args) => args,
                Err(e) => return ToolReply::Text(e),
            };
            let settings = Arc::clone(&env.settings);
            run_blocking(move || {
                glob::glob_handler(
                    &args.pattern,
                    args.path.as_deref(),
                    args.include_hidden,
                    args.max_results,
                    &settings,
                )
            })
            .await
        }
        "bash" => {
            if !env.settings.search_bash_tools {
                return ToolReply::Text("Error: bash tool is disabled".to_string());
            }
            let args: BashArgs = match parse_args(arguments) {
                Ok(args) => args,
                Err(e) => return ToolReply::Text(e),
            };
            let output = shell::bash_handler(&args.command, &env.settings.base_dir).await;
            ToolReply::Text(truncate_for_context(output, MAX_TOOL_RESULT_CHARS))
        }
        "report_back" => {
            let args: ReportBackArgs = match parse_args(arguments) {
                Ok(args) => args,
                Err(e) => return ToolReply::Text(e),
            };
            ToolReply::Report {
                explanation: args.explanation,
                files: args.files,
            }
        }
        "find_symbol" | "get_type" => {
            let Some(bridge) = env.lsp.clone() else {
                return ToolReply::Text("Error: LSP tools are disabled".to_string());
            };
            let args: SymbolAtArgs = match parse_args(arguments) {
                Ok(args) => args,
                Err(e) => return ToolReply::Text(e),
            };
            let output = if name == "find_symbol" {
                lsp::find_symbol_handler(&bridge, &args.path, args.line, args.column, &env.settings)
                    .await
            } else {
                lsp::get_type_handler(&bridge, &args.path, args.line, args.column, &env.settings)
                    .await
            };
            ToolReply::Text(truncate_for_context(output, MAX_TOOL_RESULT_CHARS))
        }
        "search_symbol" => {
            let Some(bridge) = env.lsp.clone() else {
                return ToolReply::Text("Error: LSP tools are disabled".to_string());
            };
            let args: SearchSymbolArgs = match parse_args(arguments) {
                Ok(args) => args,
                Err(e) => return ToolReply::Text(e),
            };
            let output =
                lsp::search_symbol_handler(&bridge, &args.name, args.limit.unwrap_or(20)).await;
            ToolReply::Text(truncate_for_context(output, MAX_TOOL_RESULT_CHARS))
        }
        "list_symbols" => {
            let Some(bridge) = env.lsp.clone() else {
                return ToolReply::Text("Error: LSP tools are disabled".to_string());
            };
            let args: ListSymbolsArgs = match parse_args(arguments) {
                Ok(args) => args,
                Err(e) => return ToolReply::Text(e),
            };
            let output = lsp::list_symbols_handler(&bridge, &args.path, &env.settings).await;
            ToolReply::Text(truncate_for_context(output, MAX_TOOL_RESULT_CHARS))
        }
        "call_graph" => {
            let Some(bridge) = env.lsp.clone() else {
                return ToolReply::Text("Error: LSP tools are disabled".to_string());
            };
            let args: CallGraphArgs = match parse_args(arguments) {
                Ok(args) => args,
                Err(e) => return ToolReply::Text(e),
            };
            let output = lsp::call_graph_handler(
                &bridge,
                &args.path,
                args.line,
                args.column,
                args.depth.unwrap_or(1),
                &env.settings,
            )
            .await;
            ToolReply::Text(truncate_for_context(output, MAX_TOOL_RESULT_CHARS))
        }
        other => ToolReply::Text(format!("Error: Unknown tool: {other}")),
    }
}

async fn run_blocking(f: impl FnOnce() -> String + Send + 'static) -> ToolReply {
    let output = tokio::task::spawn_blocking(f)
        .await
        .unwrap_or_else(|e| format!("Error: tool execution failed: {e}"));
    ToolReply::Text(truncate_for_context(output, MAX_TOOL_RESULT_CHARS))
}
