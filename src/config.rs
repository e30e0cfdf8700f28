//! Environment-driven configuration.
//!
//! Every knob has a documented default; unknown boolean strings fall
//! back to the default rather than erroring, so a stray value in a
//! user's shell profile cannot take the server down.

use crate::error::ServerError;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default Fast Apply endpoint.
pub const DEFAULT_APPLY_ENDPOINT: &str = "https://api.stitch.tools/v1/apply";
/// Default agentic search chat endpoint (OpenAI-compatible).
pub const DEFAULT_SEARCH_ENDPOINT: &str = "https://api.stitch.tools/v1/search/chat/completions";
/// Default apply model identifier sent to the merge service.
pub const DEFAULT_APPLY_MODEL: &str = "auto";
/// Default search model identifier.
pub const DEFAULT_SEARCH_MODEL: &str = "stitch-search";

/// Roots that are never accepted as extra allowed paths.
const UNSAFE_EXTRA_ROOTS: &[&str] = &["/", "/home", "/tmp", "/etc", "/var", "/usr"];

/// How dangling assistant tool-call batches are repaired before a chat
/// call (see `search::messages`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryRepair {
    /// Synthesize `(skipped)` tool results so the protocol invariant holds.
    #[default]
    Synthesize,
    /// Drop the offending assistant message entirely.
    Drop,
}

/// Runtime settings for both the apply engine and the search harness.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Sandbox root. All filesystem access stays inside it.
    pub base_dir: PathBuf,
    /// Additional allowed directories for the apply tool (already resolved).
    pub extra_paths: Vec<PathBuf>,

    pub apply_endpoint: String,
    pub apply_api_key: Option<String>,
    pub apply_model: String,
    pub apply_timeout: Duration,

    pub search_endpoint: String,
    pub search_api_key: Option<String>,
    pub search_model: String,
    pub search_timeout: Duration,
    pub search_max_turns: u32,
    pub search_temperature: f64,
    pub search_top_p: Option<f64>,
    pub search_parallel_tool_calls: bool,
    /// Request `strict` function schemas from the provider.
    pub search_strict_schemas: bool,

    /// Enable the sandboxed `bash` tool for the search agent.
    pub search_bash_tools: bool,
    /// Enable LSP query tools (requires an installed bridge).
    pub search_lsp_tools: bool,
    /// Optional allowlist restricting the search agent's tool set
    /// (`report_back` is always kept).
    pub search_tool_allowlist: Option<Vec<String>>,

    /// Verify merged code against the snippet after the remote merge.
    pub experimental_post_check: bool,
    /// Copy the pre-edit file aside before writing.
    pub backup_enabled: bool,
    pub backup_dir: PathBuf,
    /// Project encoding override; tried before the UTF-8/GBK/detection chain.
    pub default_encoding: Option<String>,

    pub history_repair: HistoryRepair,
}

impl Settings {
    /// Settings with documented defaults for the given sandbox root.
    #[must_use]
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            extra_paths: Vec::new(),
            apply_endpoint: DEFAULT_APPLY_ENDPOINT.to_string(),
            apply_api_key: None,
            apply_model: DEFAULT_APPLY_MODEL.to_string(),
            apply_timeout: Duration::from_secs(60),
            search_endpoint: DEFAULT_SEARCH_ENDPOINT.to_string(),
            search_api_key: None,
            search_model: DEFAULT_SEARCH_MODEL.to_string(),
            search_timeout: Duration::from_secs(120),
            search_max_turns: 6,
            search_temperature: 1.0,
            search_top_p: None,
            search_parallel_tool_calls: true,
            search_strict_schemas: false,
            search_bash_tools: false,
            search_lsp_tools: false,
            search_tool_allowlist: None,
            experimental_post_check: false,
            backup_enabled: false,
            backup_dir: default_backup_dir(),
            default_encoding: None,
            history_repair: HistoryRepair::default(),
        }
    }

    /// Loads settings from the environment.
    ///
    /// `root_override` wins over `STITCH_BASE_DIR` (it comes from the CLI
    /// `--root` flag). The base directory must exist.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` when no base directory is configured
    /// or it is not a directory.
    pub fn from_env(root_override: Option<PathBuf>) -> Result<Self, ServerError> {
        let base_dir = match root_override.or_else(|| env_path("STITCH_BASE_DIR")) {
            Some(dir) => dir,
            None => {
                return Err(ServerError::Config(
                    "base directory not configured; pass --root or set STITCH_BASE_DIR".to_string(),
                ))
            }
        };
        if !base_dir.is_dir() {
            return Err(ServerError::Config(format!(
                "base directory does not exist or is not a directory: {}",
                base_dir.display()
            )));
        }
        let base_dir = dunce::canonicalize(&base_dir).unwrap_or(base_dir);

        let mut settings = Self::with_base_dir(base_dir);
        settings.extra_paths = parse_extra_paths();

        if let Some(v) = env_string("STITCH_APPLY_ENDPOINT") {
            settings.apply_endpoint = v;
        }
        settings.apply_api_key = env_string("STITCH_APPLY_API_KEY");
        if let Some(v) = env_string("STITCH_APPLY_MODEL") {
            settings.apply_model = v;
        }
        if let Some(v) = env_f64("STITCH_APPLY_TIMEOUT") {
            settings.apply_timeout = Duration::from_secs_f64(v);
        }

        if let Some(v) = env_string("STITCH_SEARCH_ENDPOINT") {
            settings.search_endpoint = v;
        }
        settings.search_api_key = env_string("STITCH_SEARCH_API_KEY");
        if let Some(v) = env_string("STITCH_SEARCH_MODEL") {
            settings.search_model = v;
        }
        if let Some(v) = env_f64("STITCH_SEARCH_TIMEOUT") {
            settings.search_timeout = Duration::from_secs_f64(v);
        }
        if let Some(v) = env_u32("STITCH_SEARCH_MAX_TURNS") {
            settings.search_max_turns = v.max(1);
        }
        if let Some(v) = env_f64("STITCH_SEARCH_TEMPERATURE") {
            settings.search_temperature = v;
        }
        settings.search_top_p = env_f64("STITCH_SEARCH_TOP_P");
        settings.search_parallel_tool_calls = env_bool("STITCH_SEARCH_PARALLEL_TOOL_CALLS", true);
        settings.search_strict_schemas = env_bool("STITCH_SEARCH_STRICT_SCHEMAS", false);

        settings.search_bash_tools = env_bool("STITCH_SEARCH_BASH_TOOLS", false);
        settings.search_lsp_tools = env_bool("STITCH_SEARCH_LSP_TOOLS", false);
        settings.search_tool_allowlist = env_string("STITCH_SEARCH_TOOLS").map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });
        settings.experimental_post_check = env_bool("STITCH_EXPERIMENTAL_POST_CHECK", false);
        settings.backup_enabled = env_bool("STITCH_BACKUP_ENABLED", false);
        if let Some(v) = env_path("STITCH_BACKUP_DIR") {
            settings.backup_dir = v;
        }
        settings.default_encoding = env_string("STITCH_DEFAULT_ENCODING");

        settings.history_repair = match env_string("STITCH_HISTORY_REPAIR").as_deref() {
            Some("drop") => HistoryRepair::Drop,
            Some("synthesize") | None => HistoryRepair::Synthesize,
            Some(other) => {
                tracing::warn!(
                    "STITCH_HISTORY_REPAIR={other:?} not recognized, using 'synthesize'"
                );
                HistoryRepair::Synthesize
            }
        };

        Ok(settings)
    }
}

/// Parses a boolean environment variable.
///
/// Unknown values fall back to `default` (with a warning) instead of
/// failing startup.
#[must_use]
pub fn env_bool(name: &str, default: bool) -> bool {
    let Ok(raw) = std::env::var(name) else {
        return default;
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" => default,
        "1" | "true" | "yes" | "y" | "on" => true,
        "0" | "false" | "no" | "n" | "off" => false,
        other => {
            tracing::warn!("{name}={other:?} is not a recognized boolean, using {default}");
            default
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_path(name: &str) -> Option<PathBuf> {
    env_string(name).map(PathBuf::from)
}

fn env_f64(name: &str) -> Option<f64> {
    env_string(name).and_then(|v| v.parse().ok())
}

fn env_u32(name: &str) -> Option<u32> {
    env_string(name).and_then(|v| v.parse().ok())
}

/// Default backup location: `<state dir>/stitch-mcp/backups`.
fn default_backup_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("stitch-mcp")
        .join("backups")
}

/// Parses `STITCH_EXTRA_PATHS` (comma-separated directories).
///
/// Obviously unsafe roots are skipped with a warning; entries that do
/// not resolve are kept as given so the containment check can still use
/// them lexically.
fn parse_extra_paths() -> Vec<PathBuf> {
    let Some(raw) = env_string("STITCH_EXTRA_PATHS") else {
        return Vec::new();
    };
    let mut paths = Vec::new();
    for item in raw.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let resolved = dunce::canonicalize(Path::new(item)).unwrap_or_else(|_| PathBuf::from(item));
        if UNSAFE_EXTRA_ROOTS
            .iter()
            .any(|root| Path::new(root) == resolved)
        {
            tracing::warn!("STITCH_EXTRA_PATHS: ignoring unsafe path: {item}");
            continue;
        }
        if !paths.contains(&resolved) {
            paths.push(resolved);
        }
    }
    paths
}
