//! OpenAI-compatible chat wire types and the client seam.
//!
//! The harness only needs one call shape: post a message history plus
//! tool schemas, get back one choice whose message may carry tool
//! calls. Anything provider-specific stays behind [`ChatApi`].

use crate::config::Settings;
use crate::error::{ApiError, ErrorDetail};
use crate::http::HttpClient;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One conversation message in OpenAI chat format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain("assistant", content)
    }

    #[must_use]
    pub fn tool(tool_call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
        }
    }

    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    /// Characters this message contributes to the context estimate.
    #[must_use]
    pub fn estimated_chars(&self) -> usize {
        let content = self.content.as_deref().map_or(0, str::len);
        let arguments = self
            .tool_calls
            .iter()
            .flatten()
            .map(|tc| tc.function.arguments.len())
            .sum::<usize>();
        content + arguments
    }
}

fn default_tool_call_type() -> String {
    "function".to_string()
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_tool_call_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Raw JSON string; decoded per-tool at dispatch time.
    #[serde(default)]
    pub arguments: String,
}

impl ToolCall {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            call_type: default_tool_call_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// Provider response, reduced to what the harness consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
}

/// Seam to the chat completions endpoint.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[serde_json::Value],
        trace_id: &str,
    ) -> Result<ChatResponse, ApiError>;
}

/// Production chat client over the retrying HTTP POST.
pub struct HttpChatClient {
    http: HttpClient,
    settings: Arc<Settings>,
}

impl HttpChatClient {
    #[must_use]
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            http: HttpClient::new(),
            settings,
        }
    }
}

#[async_trait]
impl ChatApi for HttpChatClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[serde_json::Value],
        trace_id: &str,
    ) -> Result<ChatResponse, ApiError> {
        let mut body = serde_json::json!({
            "model": self.settings.search_model,
            "messages": messages,
            "tools": tools,
            "temperature": self.settings.search_temperature,
            "parallel_tool_calls": self.settings.search_parallel_tool_calls,
        });
        if let Some(top_p) = self.settings.search_top_p {
            body["top_p"] = serde_json::json!(top_p);
        }

        let value = self
            .http
            .post_json(
                &self.settings.search_endpoint,
                self.settings.search_api_key.as_deref(),
                &body,
                self.settings.search_timeout,
                trace_id,
            )
            .await?;

        serde_json::from_value(value).map_err(|e| {
            ApiError::Server(ErrorDetail {
                status: 200,
                code: "application_error".to_string(),
                message: format!("unexpected chat response shape: {e}"),
                raw: String::new(),
            })
        })
    }
}
