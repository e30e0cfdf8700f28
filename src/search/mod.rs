//! Agentic search: a turn-bounded tool-calling loop over the sandboxed
//! exploration tools, driven by an OpenAI-compatible chat endpoint.

pub mod chat;
pub mod harness;
pub mod messages;
pub mod observed;
pub mod prompts;
pub mod schemas;

pub use chat::{ChatApi, ChatMessage, ChatResponse, HttpChatClient, ToolCall};
pub use harness::{SearchHarness, SearchReport};
pub use observed::ObservedFiles;
