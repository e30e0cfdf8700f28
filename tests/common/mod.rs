//! Common test utilities for stitch-mcp integration tests.
//!
//! Provides `TestEnv` for isolated sandbox roots plus scripted
//! implementations of the merge and chat seams.

#![allow(dead_code)] // Test utilities may not all be used in every test file

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use stitch_mcp::apply::{MergeApi, MergeRequest};
use stitch_mcp::error::{ApiError, ErrorDetail};
use stitch_mcp::search::chat::{ChatApi, ChatChoice, ChatMessage, ChatResponse, ToolCall};
use stitch_mcp::Settings;
use tempfile::TempDir;

/// An isolated sandbox root with settings pointing at it.
pub struct TestEnv {
    pub dir: TempDir,
    pub settings: Arc<Settings>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_settings(|_| {})
    }

    /// Creates an environment, letting the caller tweak settings before
    /// they are frozen behind the Arc.
    pub fn with_settings(tweak: impl FnOnce(&mut Settings)) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let base = dunce::canonicalize(dir.path()).expect("Failed to canonicalize temp dir");
        let mut settings = Settings::with_base_dir(base);
        tweak(&mut settings);
        Self {
            dir,
            settings: Arc::new(settings),
        }
    }

    /// Writes a file under the sandbox root.
    pub fn write_file(&self, name: &str, content: &str) {
        let path = self.settings.base_dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(&path, content).expect("Failed to write test file");
    }

    /// Full path to a file in the sandbox.
    pub fn path(&self, name: &str) -> PathBuf {
        self.settings.base_dir.join(name)
    }

    /// Absolute path as the report/observed maps render it.
    pub fn abs(&self, name: &str) -> String {
        self.path(name).display().to_string()
    }

    pub fn read(&self, name: &str) -> String {
        std::fs::read_to_string(self.path(name)).expect("Failed to read test file")
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Scripted merge backend ──────────────────────────────────────────────────

/// MergeApi double that returns a fixed body and counts calls.
pub struct ScriptedMerge {
    response: serde_json::Value,
    pub calls: AtomicUsize,
    pub last_request: Mutex<Option<MergeRequest>>,
}

impl ScriptedMerge {
    /// Responds with the given `mergedCode`.
    pub fn merged_code(code: &str) -> Self {
        Self {
            response: serde_json::json!({"mergedCode": code}),
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Responds with an arbitrary JSON body.
    pub fn raw(response: serde_json::Value) -> Self {
        Self {
            response,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MergeApi for ScriptedMerge {
    async fn merge(&self, request: MergeRequest) -> Result<serde_json::Value, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request);
        Ok(self.response.clone())
    }
}

/// MergeApi double that always fails with the given classified error.
pub struct FailingMerge {
    kind: &'static str,
    pub calls: AtomicUsize,
}

impl FailingMerge {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MergeApi for FailingMerge {
    async fn merge(&self, _request: MergeRequest) -> Result<serde_json::Value, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let detail = ErrorDetail {
            status: 500,
            code: "test".to_string(),
            message: "scripted failure".to_string(),
            raw: String::new(),
        };
        Err(match self.kind {
            "auth" => ApiError::Auth(ErrorDetail {
                status: 401,
                ..detail
            }),
            "validation" => ApiError::Validation(ErrorDetail {
                status: 422,
                ..detail
            }),
            "timeout" => ApiError::Timeout(detail),
            "network" => ApiError::Network(detail),
            _ => ApiError::Server(detail),
        })
    }
}

// ─── Scripted chat backend ───────────────────────────────────────────────────

pub enum ChatStep {
    Respond(ChatResponse),
    Fail(String),
}

/// ChatApi double that replays a fixed script and records every request
/// history it was shown.
pub struct ScriptedChat {
    steps: Mutex<VecDeque<ChatStep>>,
    pub requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedChat {
    pub fn new(steps: Vec<ChatStep>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Message histories observed across calls.
    pub fn request_log(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatApi for ScriptedChat {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        _tools: &[serde_json::Value],
        _trace_id: &str,
    ) -> Result<ChatResponse, ApiError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        match self.steps.lock().unwrap().pop_front() {
            Some(ChatStep::Respond(response)) => Ok(response),
            Some(ChatStep::Fail(message)) => Err(ApiError::Server(ErrorDetail {
                status: 500,
                code: "test".to_string(),
                message,
                raw: String::new(),
            })),
            None => Err(ApiError::Server(ErrorDetail {
                status: 500,
                code: "test".to_string(),
                message: "script exhausted".to_string(),
                raw: String::new(),
            })),
        }
    }
}

/// Builds an assistant turn carrying the given tool calls.
pub fn tool_turn(calls: &[(&str, &str, &str)]) -> ChatStep {
    let tool_calls: Vec<ToolCall> = calls
        .iter()
        .map(|(id, name, arguments)| ToolCall::new(*id, *name, *arguments))
        .collect();
    ChatStep::Respond(ChatResponse {
        choices: vec![ChatChoice {
            message: ChatMessage {
                role: "assistant".to_string(),
                content: None,
                tool_calls: Some(tool_calls),
                tool_call_id: None,
                name: None,
            },
        }],
        usage: None,
    })
}

/// Builds a content-only assistant turn.
pub fn content_turn(content: &str) -> ChatStep {
    ChatStep::Respond(ChatResponse {
        choices: vec![ChatChoice {
            message: ChatMessage::assistant(content),
        }],
        usage: None,
    })
}

/// Builds a `report_back` turn for one file with one range.
pub fn report_turn(id: &str, explanation: &str, files: serde_json::Value) -> ChatStep {
    let arguments = serde_json::json!({"explanation": explanation, "files": files}).to_string();
    tool_turn(&[(id, "report_back", &arguments)])
}
