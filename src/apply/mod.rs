//! The Fast Apply engine.
//!
//! One operation: take a file path and an edit snippet, validate both
//! locally, ask the remote merge service for the fully merged file, and
//! write it back atomically. Every failure mode is converted to a
//! structured [`ApplyReport`] with a stable error code; the engine never
//! returns `Err` across the tool boundary.
//!
//! Validation order is fail-fast and cheap-first: input shape, path,
//! size, encoding, and anchors all gate the network call.

pub mod file_io;
pub mod snippet;

use crate::config::Settings;
use crate::error::{ApiError, ApplyCode, PathError};
use crate::http::HttpClient;
use crate::sandbox::{map_path_no_resolve, validate_file_path};
use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Files beyond this size are rejected before any read.
pub const MAX_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;

// ─── Remote merge seam ───────────────────────────────────────────────────────

/// Request body for the remote merge endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MergeRequest {
    pub initial_code: String,
    pub edit_snippet: String,
    pub model: String,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    pub metadata: MergeMetadata,
}

/// Tracing metadata forwarded to the merge service.
#[derive(Debug, Clone, Serialize)]
pub struct MergeMetadata {
    pub source: &'static str,
    pub tool: &'static str,
    pub file_path: String,
    pub trace_id: String,
}

/// Seam to the remote merge service. The HTTP implementation lives
/// below; tests substitute scripted implementations.
#[async_trait]
pub trait MergeApi: Send + Sync {
    async fn merge(&self, request: MergeRequest) -> Result<serde_json::Value, ApiError>;
}

/// Production merge client over the retrying HTTP POST.
pub struct HttpMergeClient {
    http: HttpClient,
    settings: Arc<Settings>,
}

impl HttpMergeClient {
    #[must_use]
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            http: HttpClient::new(),
            settings,
        }
    }
}

#[async_trait]
impl MergeApi for HttpMergeClient {
    async fn merge(&self, request: MergeRequest) -> Result<serde_json::Value, ApiError> {
        let trace_id = request.metadata.trace_id.clone();
        let body = serde_json::to_value(&request).unwrap_or_default();
        self.http
            .post_json(
                &self.settings.apply_endpoint,
                self.settings.apply_api_key.as_deref(),
                &body,
                self.settings.apply_timeout,
                &trace_id,
            )
            .await
    }
}

// ─── Result shape ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyStatus {
    Ok,
    Error,
}

/// Structured result of one apply invocation.
///
/// Invariant: `status == Ok` implies `code.is_none()`; `status == Error`
/// implies `code` is one of the stable [`ApplyCode`] strings.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    pub status: ApplyStatus,
    pub path: String,
    pub trace_id: String,
    pub timing_ms: u64,
    pub message: String,
    pub diff: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl ApplyReport {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == ApplyStatus::Ok
    }
}

struct ApplyContext {
    trace_id: String,
    started: Instant,
    file_path: String,
    instruction: Option<String>,
}

impl ApplyContext {
    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn ok(&self, path: &Path, message: impl Into<String>, diff: Option<String>) -> ApplyReport {
        ApplyReport {
            status: ApplyStatus::Ok,
            path: path.display().to_string(),
            trace_id: self.trace_id.clone(),
            timing_ms: self.elapsed_ms(),
            message: message.into(),
            diff,
            code: None,
            detail: None,
        }
    }

    fn error(&self, code: ApplyCode, message: impl Into<String>) -> ApplyReport {
        self.error_with_detail(code, message, None)
    }

    fn error_with_detail(
        &self,
        code: ApplyCode,
        message: impl Into<String>,
        detail: Option<serde_json::Value>,
    ) -> ApplyReport {
        ApplyReport {
            status: ApplyStatus::Error,
            path: self.file_path.clone(),
            trace_id: self.trace_id.clone(),
            timing_ms: self.elapsed_ms(),
            message: message.into(),
            diff: None,
            code: Some(code.as_str()),
            detail,
        }
    }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// Pre/post-validating, atomic, encoding-aware file editor driven by the
/// remote merge service.
pub struct ApplyEngine {
    settings: Arc<Settings>,
    client: Arc<dyn MergeApi>,
}

impl ApplyEngine {
    #[must_use]
    pub fn new(settings: Arc<Settings>, client: Arc<dyn MergeApi>) -> Self {
        Self { settings, client }
    }

    /// Applies an edit snippet to a file.
    ///
    /// Accepts `/repo/...`, relative, or absolute paths; relative paths
    /// resolve against `base_dir`. New files are created locally without
    /// a remote call.
    pub async fn apply(
        &self,
        file_path: &str,
        edit_snippet: &str,
        instruction: Option<&str>,
    ) -> ApplyReport {
        let ctx = ApplyContext {
            trace_id: format!("{:08x}", rand::random::<u32>()),
            started: Instant::now(),
            file_path: file_path.to_string(),
            instruction: instruction.map(str::to_string),
        };

        if edit_snippet.trim().is_empty() {
            return ctx.error(ApplyCode::InvalidInput, "edit_snippet cannot be empty");
        }

        let resolved = match self.resolve(file_path) {
            Ok(path) => path,
            Err(e) => return ctx.error(ApplyCode::InvalidPath, e.to_string()),
        };

        // Symlinked targets are refused outright: the merge would follow
        // the link while the containment check saw the link itself.
        let unresolved = map_path_no_resolve(file_path, &self.settings.base_dir);
        if unresolved.is_symlink() {
            return ctx.error(
                ApplyCode::InvalidPath,
                format!("Path is a symlink: {file_path}"),
            );
        }

        if resolved.exists() && !resolved.is_file() {
            return ctx.error(
                ApplyCode::InvalidPath,
                format!("Path exists but is not a file: {}", resolved.display()),
            );
        }

        if !resolved.exists() {
            return self.create_new_file(&ctx, &resolved, edit_snippet);
        }
        self.apply_to_existing(&ctx, &resolved, edit_snippet).await
    }

    fn resolve(&self, file_path: &str) -> Result<std::path::PathBuf, PathError> {
        // `/repo/...` is normalized first so the shared validator only
        // ever sees real paths.
        let mapped = map_path_no_resolve(file_path, &self.settings.base_dir);
        validate_file_path(
            &mapped.to_string_lossy(),
            &self.settings.base_dir,
            &self.settings.extra_paths,
        )
    }

    fn create_new_file(&self, ctx: &ApplyContext, path: &Path, edit_snippet: &str) -> ApplyReport {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return io_error(ctx, &e);
            }
        }
        if let Err(e) = file_io::atomic_write(path, edit_snippet, encoding_rs::UTF_8) {
            return io_error(ctx, &e);
        }

        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        tracing::info!("[{}] Created new file {}", ctx.trace_id, path.display());
        ctx.ok(path, format!("Created new file ({size} bytes)"), None)
    }

    async fn apply_to_existing(
        &self,
        ctx: &ApplyContext,
        path: &Path,
        edit_snippet: &str,
    ) -> ApplyReport {
        let concrete = snippet::concrete_lines(edit_snippet);
        if concrete.is_empty() {
            return ctx.error(
                ApplyCode::NeedsMoreContext,
                "edit_snippet has no anchor lines. Include 1-3 lines of real code to locate the edit.",
            );
        }

        let file_size = match std::fs::metadata(path) {
            Ok(m) => m.len(),
            Err(e) => return io_error(ctx, &e),
        };
        if file_size > MAX_FILE_SIZE_BYTES {
            return ctx.error(
                ApplyCode::FileTooLarge,
                format!(
                    "File too large ({file_size} bytes). Maximum allowed: {MAX_FILE_SIZE_BYTES} bytes"
                ),
            );
        }

        let (initial_code, detected_encoding) =
            match file_io::read_text_with_fallback(path, self.settings.default_encoding.as_deref())
            {
                Ok(read) => read,
                Err(file_io::ReadError::EncodingDetection(p)) => {
                    return ctx.error(
                        ApplyCode::EncodingError,
                        format!("Cannot detect encoding for file: {}", p.display()),
                    )
                }
                Err(file_io::ReadError::Io(e)) => return io_error(ctx, &e),
            };

        if snippet::should_run_anchor_precheck(ctx.instruction.as_deref())
            && !snippet::anchor_precheck(&concrete, &initial_code)
        {
            return ctx.error(
                ApplyCode::NeedsMoreContext,
                "The anchor lines in edit_snippet cannot be located in the file. \
                 Include 1-3 lines that exist verbatim in the target file.",
            );
        }

        let request = MergeRequest {
            initial_code: initial_code.clone(),
            edit_snippet: edit_snippet.to_string(),
            model: self.settings.apply_model.clone(),
            stream: false,
            instruction: ctx.instruction.clone(),
            metadata: MergeMetadata {
                source: "stitch-mcp",
                tool: "fast_apply",
                file_path: path.display().to_string(),
                trace_id: ctx.trace_id.clone(),
            },
        };

        let response = match self.client.merge(request).await {
            Ok(value) => value,
            Err(err) => return api_error(ctx, &err),
        };

        let Some(merged_code) = response.get("mergedCode").and_then(|v| v.as_str()) else {
            return ctx.error(
                ApplyCode::ApiInvalidResponse,
                "Merge service did not return 'mergedCode'",
            );
        };

        if merged_code == initial_code {
            if snippet::expects_changes(edit_snippet, &initial_code) {
                tracing::warn!(
                    "[{}] APPLY_NOOP: expected changes but merge returned identical content for {}",
                    ctx.trace_id,
                    path.display()
                );
                return ctx.error(
                    ApplyCode::ApplyNoop,
                    "Merge service returned code identical to the original. \
                     Add 1-3 anchor lines before/after the target.",
                );
            }
            tracing::info!(
                "[{}] No changes needed (idempotent) for {}",
                ctx.trace_id,
                path.display()
            );
            return ctx.ok(path, "No changes needed (already matches)", None);
        }

        let diff = similar::TextDiff::from_lines(initial_code.as_str(), merged_code)
            .unified_diff()
            .header("before", "after")
            .to_string();

        if !file_io::is_writable(path) {
            return ctx.error(
                ApplyCode::FileNotWritable,
                format!("File is not writable: {}", ctx.file_path),
            );
        }

        if self.settings.experimental_post_check {
            if let Err(reason) =
                snippet::post_check_merged_code(edit_snippet, merged_code, &initial_code)
            {
                tracing::warn!(
                    "[{}] POST_CHECK_FAILED for {}: {reason}",
                    ctx.trace_id,
                    path.display()
                );
                return ctx.error(
                    ApplyCode::PostCheckFailed,
                    format!("Merged code does not match expected changes: {reason}"),
                );
            }
        }

        if self.settings.backup_enabled {
            file_io::backup_file(path, &ctx.trace_id, &self.settings.backup_dir);
        }

        if let Err(e) = file_io::atomic_write(path, merged_code, detected_encoding) {
            return io_error(ctx, &e);
        }

        match file_io::read_text_with_fallback(path, self.settings.default_encoding.as_deref()) {
            Ok((written, _)) if written == merged_code => {}
            Ok(_) => {
                tracing::error!(
                    "[{}] WRITE_VERIFY_FAILED: content mismatch after write for {}",
                    ctx.trace_id,
                    path.display()
                );
                return ctx.error(
                    ApplyCode::WriteVerifyFailed,
                    "File content does not match expected after write. Possible race condition.",
                );
            }
            Err(e) => {
                return ctx.error(
                    ApplyCode::WriteVerifyFailed,
                    format!("Cannot verify file content after write: {e}"),
                )
            }
        }

        tracing::info!(
            "[{}] Applied merge to {} (latency={}ms)",
            ctx.trace_id,
            path.display(),
            ctx.elapsed_ms()
        );
        ctx.ok(path, "Applied code changes via the merge service.", Some(diff))
    }
}

/// Maps a classified remote failure to a structured report.
fn api_error(ctx: &ApplyContext, err: &ApiError) -> ApplyReport {
    let code = ApplyCode::from(err);
    let detail = err.detail();
    tracing::warn!(
        "[{}] merge call failed ({}) for {}: {err}",
        ctx.trace_id,
        code,
        ctx.file_path
    );
    match code {
        ApplyCode::AuthError => ctx.error_with_detail(
            code,
            "API authentication or permission error. Check the API key configuration.",
            Some(api_detail(detail)),
        ),
        ApplyCode::ApiError => ctx.error_with_detail(
            code,
            "Merge API error. Simplify the edit_snippet or add more distinctive anchor lines.",
            Some(api_detail(detail)),
        ),
        ApplyCode::TimeoutError => ctx.error_with_detail(
            code,
            "Request timed out. Try again later.",
            Some(serde_json::Value::String(err.to_string())),
        ),
        _ => ctx.error_with_detail(
            code,
            "Network error. Check connectivity and retry.",
            Some(serde_json::Value::String(err.to_string())),
        ),
    }
}

fn api_detail(detail: &crate::error::ErrorDetail) -> serde_json::Value {
    serde_json::json!({
        "status_code": detail.status,
        "api_code": detail.code,
        "api_message": detail.message,
    })
}

/// Maps filesystem errors: permission problems get their own code, the
/// rest surface as `FS_ERROR` with the OS error text.
fn io_error(ctx: &ApplyContext, err: &std::io::Error) -> ApplyReport {
    if err.kind() == std::io::ErrorKind::PermissionDenied {
        ctx.error(
            ApplyCode::PermissionError,
            format!("Permission denied: {err}"),
        )
    } else {
        let errno = err
            .raw_os_error()
            .map(|n| format!("errno={n}"))
            .unwrap_or_default();
        ctx.error(
            ApplyCode::FsError,
            format!("Filesystem error ({:?}, {errno}): {err}", err.kind()),
        )
    }
}
