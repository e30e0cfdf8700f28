//! LSP query tools.
//!
//! The language-server client itself is an external collaborator; the
//! harness consumes only this query surface. All positions are
//! 1-indexed line/column, passed through unchanged from the server's
//! protocol output. Each request is bounded by [`LSP_TIMEOUT`].

use crate::config::Settings;
use crate::sandbox::{map_path_no_resolve, resolve_repo_path, ResolveOptions};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Per-request budget at the bridge.
pub const LSP_TIMEOUT: Duration = Duration::from_secs(10);

/// Query surface of the external LSP client.
///
/// Implementations format their own result text; handlers only add the
/// sandbox checks and the timeout.
#[async_trait]
pub trait LspBridge: Send + Sync {
    /// Languages the bridge has working servers for.
    fn available_languages(&self) -> Vec<String>;

    async fn find_symbol(&self, path: &Path, line: u32, column: u32) -> Result<String, String>;

    async fn search_symbol(&self, name: &str, limit: usize) -> Result<String, String>;

    async fn list_symbols(&self, path: &Path) -> Result<String, String>;

    async fn get_type(&self, path: &Path, line: u32, column: u32) -> Result<String, String>;

    async fn call_graph(
        &self,
        path: &Path,
        line: u32,
        column: u32,
        depth: u32,
    ) -> Result<String, String>;
}

/// Resolves a `/repo` path for an LSP query, refusing symlinks.
fn resolve_lsp_path(path: &str, settings: &Settings) -> Result<PathBuf, String> {
    let resolved = resolve_repo_path(path, &settings.base_dir, ResolveOptions::repo_only())
        .map_err(|e| e.to_string())?;
    if map_path_no_resolve(path, &settings.base_dir).is_symlink() {
        return Err(format!("Path is a symlink: {path}"));
    }
    if !resolved.is_file() {
        return Err(format!("File not found: {path}"));
    }
    Ok(resolved)
}

async fn with_timeout(
    fut: impl std::future::Future<Output = Result<String, String>>,
) -> Result<String, String> {
    match tokio::time::timeout(LSP_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(format!(
            "LSP request timed out after {}s",
            LSP_TIMEOUT.as_secs()
        )),
    }
}

fn render(result: Result<String, String>) -> String {
    match result {
        Ok(text) if text.trim().is_empty() => "No results.".to_string(),
        Ok(text) => text,
        Err(reason) => format!("Error: {reason}"),
    }
}

pub async fn find_symbol_handler(
    bridge: &Arc<dyn LspBridge>,
    path: &str,
    line: u32,
    column: u32,
    settings: &Settings,
) -> String {
    match resolve_lsp_path(path, settings) {
        Ok(resolved) => render(with_timeout(bridge.find_symbol(&resolved, line, column)).await),
        Err(reason) => format!("Error: {reason}"),
    }
}

pub async fn search_symbol_handler(
    bridge: &Arc<dyn LspBridge>,
    name: &str,
    limit: usize,
) -> String {
    render(with_timeout(bridge.search_symbol(name, limit)).await)
}

pub async fn list_symbols_handler(
    bridge: &Arc<dyn LspBridge>,
    path: &str,
    settings: &Settings,
) -> String {
    match resolve_lsp_path(path, settings) {
        Ok(resolved) => render(with_timeout(bridge.list_symbols(&resolved)).await),
        Err(reason) => format!("Error: {reason}"),
    }
}

pub async fn get_type_handler(
    bridge: &Arc<dyn LspBridge>,
    path: &str,
    line: u32,
    column: u32,
    settings: &Settings,
) -> String {
    match resolve_lsp_path(path, settings) {
        Ok(resolved) => render(with_timeout(bridge.get_type(&resolved, line, column)).await),
        Err(reason) => format!("Error: {reason}"),
    }
}

pub async fn call_graph_handler(
    bridge: &Arc<dyn LspBridge>,
    path: &str,
    line: u32,
    column: u32,
    depth: u32,
    settings: &Settings,
) -> String {
    match resolve_lsp_path(path, settings) {
        Ok(resolved) => {
            render(with_timeout(bridge.call_graph(&resolved, line, column, depth)).await)
        }
        Err(reason) => format!("Error: {reason}"),
    }
}
