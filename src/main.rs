//! stitch-mcp entry point.
//!
//! Usage:
//!   stitch-mcp --mcp --root <path>              # Start MCP server
//!   stitch-mcp --root <path> search <query>     # One-shot search
//!   stitch-mcp --root <path> apply <file> <snippet-file>

use clap::{Parser, Subcommand};
use rmcp::ServiceExt;
use std::path::PathBuf;
use std::sync::Arc;
use stitch_mcp::server::StitchServer;
use stitch_mcp::Settings;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stitch-mcp")]
#[command(about = "MCP server for LLM fast-apply edits and agentic code search")]
#[command(version)]
struct Cli {
    /// Run as MCP server (stdin/stdout JSON-RPC)
    #[arg(long)]
    mcp: bool,

    /// Sandbox root directory (overrides STITCH_BASE_DIR)
    #[arg(long)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one agentic search and print the report as JSON
    Search {
        /// Search query
        query: String,
    },

    /// Apply an edit snippet to a file and print the result as JSON
    Apply {
        /// Target file path (absolute, relative, or /repo/...)
        file_path: String,

        /// File containing the edit snippet
        snippet_file: PathBuf,

        /// Optional instruction for the merge service
        #[arg(short, long)]
        instruction: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // CRITICAL: Log to stderr only (stdout is JSON-RPC for MCP)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("stitch_mcp=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let settings = Arc::new(Settings::from_env(cli.root)?);

    if cli.mcp {
        run_mcp_server(settings).await
    } else if let Some(cmd) = cli.command {
        run_cli(settings, cmd).await
    } else {
        eprintln!("Use --mcp to start the MCP server, or a subcommand for CLI mode.");
        eprintln!("Run with --help for more information.");
        std::process::exit(1);
    }
}

async fn run_mcp_server(settings: Arc<Settings>) -> anyhow::Result<()> {
    tracing::info!(
        "Starting MCP server for base_dir: {}",
        settings.base_dir.display()
    );

    let server = StitchServer::new(settings);
    let service = server.serve(rmcp::transport::io::stdio()).await?;
    service.waiting().await?;

    Ok(())
}

async fn run_cli(settings: Arc<Settings>, cmd: Commands) -> anyhow::Result<()> {
    use stitch_mcp::apply::{ApplyEngine, HttpMergeClient};
    use stitch_mcp::search::{HttpChatClient, SearchHarness};
    use stitch_mcp::tools::ToolEnv;

    match cmd {
        Commands::Search { query } => {
            let harness = SearchHarness::new(
                Arc::clone(&settings),
                Arc::new(HttpChatClient::new(Arc::clone(&settings))),
                ToolEnv::new(Arc::clone(&settings)),
            );
            let report = harness.run(&query).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Apply {
            file_path,
            snippet_file,
            instruction,
        } => {
            let edit_snippet = std::fs::read_to_string(&snippet_file)?;
            let engine = ApplyEngine::new(
                Arc::clone(&settings),
                Arc::new(HttpMergeClient::new(Arc::clone(&settings))),
            );
            let report = engine
                .apply(&file_path, &edit_snippet, instruction.as_deref())
                .await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
