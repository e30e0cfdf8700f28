//! stitch-mcp: MCP server for LLM-driven code editing and agentic search.
//!
//! Two tools are exposed to the upstream model:
//! - `fast_apply` merges an edit snippet into a local file through a
//!   remote merge service, with pre/post validation and atomic writes.
//! - `agentic_search` runs a bounded multi-turn agent loop in which a
//!   search model explores the repository via sandboxed read-only tools.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              MCP Server (rmcp)              │
//! │         JSON-RPC over stdin/stdout          │
//! └──────────┬──────────────────────┬───────────┘
//!            │                      │
//! ┌──────────▼──────────┐ ┌─────────▼───────────┐
//! │    Apply Engine     │ │   Search Harness    │
//! │ validate → merge →  │ │ chat loop → tool    │
//! │ atomic write/verify │ │ fan-out → report    │
//! └──────────┬──────────┘ └─────────┬───────────┘
//!            │                      │
//! ┌──────────▼──────────────────────▼───────────┐
//! │   Sandbox: /repo mapping, gitignore,        │
//! │   read/list/grep/glob tools, shell vetting  │
//! └──────────┬──────────────────────────────────┘
//!            │
//! ┌──────────▼──────────────────────────────────┐
//! │      Retrying HTTP client (reqwest)         │
//! │   apply + chat endpoints, classified errors │
//! └─────────────────────────────────────────────┘
//! ```

pub mod apply;
pub mod config;
pub mod error;
pub mod http;
pub mod sandbox;
pub mod search;
pub mod server;
pub mod tools;

pub use apply::{ApplyEngine, ApplyReport};
pub use config::Settings;
pub use error::{ApiError, ApplyCode, PathError, Result, ServerError};
pub use search::{SearchHarness, SearchReport};
