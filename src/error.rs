//! Error types for stitch-mcp.
//!
//! Uses thiserror for ergonomic error handling with proper
//! error chain propagation. Remote API failures are modeled as a sum
//! type with a retryable predicate instead of an exception hierarchy;
//! the retry loop in [`crate::http`] consults the predicate and callers
//! pattern-match the variant.

use std::time::Duration;
use thiserror::Error;

/// Top-level server error.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Tool error: {0}")]
    Tool(String),
}

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

impl ServerError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Tool(_) => "TOOL_ERROR",
        }
    }
}

// ============================================================================
// Remote API errors
// ============================================================================

/// Structured detail attached to every remote API error.
///
/// `status` is 0 for transport-level failures. `code` is the provider's
/// short error code parsed from the response body (free-form string,
/// `unknown` when absent). `raw` preserves the unparsed response text.
#[derive(Debug, Clone, Default)]
pub struct ErrorDetail {
    pub status: u16,
    pub code: String,
    pub message: String,
    pub raw: String,
}

impl ErrorDetail {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: 0,
            code: "unknown".to_string(),
            message: message.into(),
            raw: String::new(),
        }
    }
}

/// Classified remote API failure.
///
/// One variant per response class; the variant decides retryability.
/// 429 carries the parsed `Retry-After` delay when the header was a
/// plain number of seconds.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("[{}] authentication failed (status={})", .0.code, .0.status)]
    Auth(ErrorDetail),

    #[error("[{}] request rejected (status={}): {}", .0.code, .0.status, .0.message)]
    Validation(ErrorDetail),

    #[error("[{}] resource not found (status={})", .0.code, .0.status)]
    NotFound(ErrorDetail),

    #[error("[{}] rate limited (status={})", .detail.code, .detail.status)]
    RateLimit {
        detail: ErrorDetail,
        retry_after: Option<Duration>,
    },

    #[error("[{}] resource locked (status={})", .0.code, .0.status)]
    ResourceLocked(ErrorDetail),

    #[error("[{}] server error (status={}): {}", .0.code, .0.status, .0.message)]
    Server(ErrorDetail),

    #[error("request timed out: {}", .0.message)]
    Timeout(ErrorDetail),

    #[error("network error: {}", .0.message)]
    Network(ErrorDetail),
}

impl ApiError {
    /// The structured detail carried by every variant.
    #[must_use]
    pub fn detail(&self) -> &ErrorDetail {
        match self {
            Self::Auth(d)
            | Self::Validation(d)
            | Self::NotFound(d)
            | Self::ResourceLocked(d)
            | Self::Server(d)
            | Self::Timeout(d)
            | Self::Network(d) => d,
            Self::RateLimit { detail, .. } => detail,
        }
    }

    /// Whether the retry loop may re-issue the request.
    ///
    /// A `Server` error carrying a 2xx status is the "success with a
    /// non-JSON body" case: the service is misbehaving, and re-sending
    /// the same request will not fix it.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Server(detail) => !(200..300).contains(&detail.status),
            Self::RateLimit { .. }
            | Self::ResourceLocked(_)
            | Self::Timeout(_)
            | Self::Network(_) => true,
            Self::Auth(_) | Self::Validation(_) | Self::NotFound(_) => false,
        }
    }

    /// Server-suggested delay before the next attempt (429 only).
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Returns a machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth(_) => "AUTH_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::RateLimit { .. } => "RATE_LIMIT",
            Self::ResourceLocked(_) => "RESOURCE_LOCKED",
            Self::Server(_) => "SERVER_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Network(_) => "NETWORK_ERROR",
        }
    }
}

// ============================================================================
// Sandbox path errors
// ============================================================================

/// Path resolution/validation failure.
#[derive(Error, Debug, Clone)]
pub enum PathError {
    #[error("Path escapes base_dir: {path}")]
    Escape { path: String },

    #[error("Cannot resolve path (circular symlink?): {path}")]
    Unresolvable { path: String },

    #[error("Relative path not allowed: {path}")]
    RelativeNotAllowed { path: String },

    #[error("Absolute path not allowed: {path}")]
    AbsoluteNotAllowed { path: String },

    #[error("file_path cannot be empty")]
    Empty,
}

impl PathError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Escape { .. } => "PATH_ESCAPE",
            Self::Unresolvable { .. } => "PATH_UNRESOLVABLE",
            Self::RelativeNotAllowed { .. } => "RELATIVE_NOT_ALLOWED",
            Self::AbsoluteNotAllowed { .. } => "ABSOLUTE_NOT_ALLOWED",
            Self::Empty => "EMPTY_PATH",
        }
    }
}

// ============================================================================
// Apply error codes
// ============================================================================

/// Stable error codes surfaced in `ApplyReport.code`.
///
/// The apply engine never propagates these as `Err` across the tool
/// boundary; they ride in the structured result so the calling LLM can
/// decide whether to re-issue the edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyCode {
    InvalidInput,
    InvalidPath,
    FileTooLarge,
    EncodingError,
    NeedsMoreContext,
    ApplyNoop,
    PostCheckFailed,
    WriteVerifyFailed,
    FileNotWritable,
    PermissionError,
    FsError,
    AuthError,
    ApiError,
    TimeoutError,
    NetworkError,
    ApiInvalidResponse,
}

impl ApplyCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "INVALID_INPUT",
            Self::InvalidPath => "INVALID_PATH",
            Self::FileTooLarge => "FILE_TOO_LARGE",
            Self::EncodingError => "ENCODING_ERROR",
            Self::NeedsMoreContext => "NEEDS_MORE_CONTEXT",
            Self::ApplyNoop => "APPLY_NOOP",
            Self::PostCheckFailed => "POST_CHECK_FAILED",
            Self::WriteVerifyFailed => "WRITE_VERIFY_FAILED",
            Self::FileNotWritable => "FILE_NOT_WRITABLE",
            Self::PermissionError => "PERMISSION_ERROR",
            Self::FsError => "FS_ERROR",
            Self::AuthError => "AUTH_ERROR",
            Self::ApiError => "API_ERROR",
            Self::TimeoutError => "TIMEOUT_ERROR",
            Self::NetworkError => "NETWORK_ERROR",
            Self::ApiInvalidResponse => "API_INVALID_RESPONSE",
        }
    }
}

impl std::fmt::Display for ApplyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&ApiError> for ApplyCode {
    /// Maps a classified remote failure to the apply taxonomy.
    ///
    /// Auth stays distinct; every other HTTP-level rejection collapses to
    /// `API_ERROR` because the caller's remedy is the same (simplify the
    /// snippet or add anchors), while transport failures keep their own
    /// codes since retrying later may succeed unchanged.
    fn from(err: &ApiError) -> Self {
        match err {
            ApiError::Auth(_) => Self::AuthError,
            ApiError::Timeout(_) => Self::TimeoutError,
            ApiError::Network(_) => Self::NetworkError,
            _ => Self::ApiError,
        }
    }
}

impl From<ServerError> for rmcp::ErrorData {
    fn from(err: ServerError) -> Self {
        rmcp::ErrorData::internal_error(err.to_string(), None)
    }
}
